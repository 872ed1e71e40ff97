//! Connecting to the state database.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use sqlx::SqliteConnection;
use sqlx::pool::PoolConnectionMetadata;
use sqlx::sqlite::{SqliteAutoVacuum, SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous};
use std::path::Path;
use std::time::Duration;
use tracing::instrument;

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// One connection per concurrently checked scan, at the default batch
/// concurrency.
const FILE_CONNECTIONS: u32 = 5;

/// Handle on the SQLite file holding everything scanwatch keeps outside the
/// catalog: the update cache, provider capability records and the
/// quarantine event log. Repositories are built from it with
/// `Repo::from(&db)`.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (creating if needed) the database file at `path`, with its
    /// parent directory, and bring the schema up to date.
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).or_raise(|| ErrorKind::Database)?;
        }
        tracing::debug!(path = %path.display(), "opening database");
        let options = connect_options().filename(path).create_if_missing(true);
        Self::open(options, SqlitePoolOptions::new().max_connections(FILE_CONNECTIONS)).await
    }

    /// A private in-memory database, for tests here and in other crates.
    ///
    /// Every connection to `:memory:` is a different database, so the pool
    /// holds exactly one connection and never lets it go; closing it would
    /// throw the data away.
    pub async fn connect_in_memory() -> Result<Self> {
        let options = connect_options().filename(":memory:");
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None);
        Self::open(options, pool).await
    }

    async fn open(options: SqliteConnectOptions, pool: SqlitePoolOptions) -> Result<Self> {
        let pool = pool
            // Query-based PRAGMAs are per connection; run them on each one.
            .after_connect(|conn, meta| Box::pin(async move { apply_pragmas(conn, meta).await }))
            .connect_with(options)
            .await
            .or_raise(|| ErrorKind::Database)?;
        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    #[instrument("migrating state database", skip(self))]
    async fn migrate(&self) -> Result<()> {
        MIGRATOR.run(&self.pool).await.or_raise(|| ErrorKind::Migration)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Let SQLite refresh its planner statistics, then close every
    /// connection. The handle (and its clones) are unusable afterwards.
    pub async fn close(&self) {
        _ = sqlx::query("PRAGMA optimize").execute(&self.pool).await;
        self.pool.close().await;
    }
}

fn connect_options() -> SqliteConnectOptions {
    SqliteConnectOptions::new()
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true)
        .synchronous(SqliteSynchronous::Normal)
        // A batch of scans writing cache entries and quarantine events at
        // the same time queues up behind WAL's single writer.
        .busy_timeout(Duration::from_millis(1500))
        .auto_vacuum(SqliteAutoVacuum::None)
}

async fn apply_pragmas(conn: &mut SqliteConnection, _meta: PoolConnectionMetadata) -> sqlx::Result<()> {
    sqlx::query(
        r#"
            PRAGMA wal_autocheckpoint = 800;
            PRAGMA cache_size = -8192;
            PRAGMA temp_store = MEMORY;
        "#,
    )
    .execute(conn)
    .await?;
    Ok(())
}
