//! Configuration loading and validation.
//!
//! Configuration is layered, later layers overriding earlier ones:
//! 1. built-in defaults,
//! 2. a config file (TOML, YAML or JSON; the explicit path if one is given,
//!    otherwise `config.toml` in the platform config directory if it exists),
//! 3. `SCANWATCH_`-prefixed environment variables, with `__` separating
//!    nested keys (`SCANWATCH_UPDATES__MAX_CONCURRENCY=3`).

pub mod error;

use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const ENV_PREFIX: &str = "SCANWATCH_";

/// What to make of a provider listing no chapters at all for a work.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmptyChapterPolicy {
    /// A failed check: provider pages that fail to parse tend to look
    /// exactly like this.
    #[default]
    Anomaly,
    /// A successful check that found nothing new.
    Success,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base directory for everything scanwatch persists.
    pub data_dir: PathBuf,
    /// Catalog documents; defaults to `<data_dir>/catalog`.
    pub catalog_dir: Option<PathBuf>,
    /// SQLite database file; defaults to `<data_dir>/scanwatch.db`.
    pub database: Option<PathBuf>,
    pub updates: UpdatesConfig,
    pub quarantine: QuarantineConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdatesConfig {
    pub cache_ttl_secs: u64,
    /// Pause between two per-work fetches against the same provider.
    pub request_delay_ms: u64,
    /// How many scans a batch checks at once.
    pub max_concurrency: usize,
    /// Attempts per work fetch, including the first.
    pub retry_attempts: u32,
    pub retry_delay_ms: u64,
    pub empty_chapters: EmptyChapterPolicy,
    /// Wall-clock budget for a whole batch; unlimited if unset.
    pub deadline_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuarantineConfig {
    /// Consecutive errors after which a work is quarantined.
    pub threshold: u32,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = ProjectDirs::from("", "", "scanwatch")
            .map(|dirs| dirs.data_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from(".scanwatch"));
        Self {
            data_dir,
            catalog_dir: None,
            database: None,
            updates: UpdatesConfig::default(),
            quarantine: QuarantineConfig::default(),
        }
    }
}

impl Default for UpdatesConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 30 * 60,
            request_delay_ms: 1000,
            max_concurrency: 5,
            retry_attempts: 1,
            retry_delay_ms: 2000,
            empty_chapters: EmptyChapterPolicy::default(),
            deadline_secs: None,
        }
    }
}

impl Default for QuarantineConfig {
    fn default() -> Self {
        Self { threshold: 10 }
    }
}

impl Config {
    /// Load the layered configuration and validate it.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let config: Self = Self::figment(file)?.extract().or_raise(|| ErrorKind::Parse)?;
        config.validate()?;
        tracing::debug!(data_dir = %config.data_dir.display(), "configuration loaded");
        Ok(config)
    }

    /// The figment behind [`load()`](Self::load), for callers that want to
    /// add their own layers.
    pub fn figment(file: Option<&Path>) -> Result<Figment> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        match file {
            Some(path) => {
                if !path.is_file() {
                    exn::bail!(ErrorKind::NotFound(path.to_path_buf()));
                }
                figment = Self::merge_file(figment, path)?;
            },
            None => {
                if let Some(path) = Self::default_file().filter(|p| p.is_file()) {
                    figment = Self::merge_file(figment, &path)?;
                }
            },
        }
        Ok(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    fn default_file() -> Option<PathBuf> {
        ProjectDirs::from("", "", "scanwatch").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    fn merge_file(figment: Figment, path: &Path) -> Result<Figment> {
        let figment = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => figment.merge(Toml::file_exact(path)),
            Some("yaml" | "yml") => figment.merge(Yaml::file_exact(path)),
            Some("json") => figment.merge(Json::file_exact(path)),
            _ => exn::bail!(ErrorKind::UnsupportedFormat(path.to_path_buf())),
        };
        Ok(figment)
    }

    pub fn validate(&self) -> Result<()> {
        if self.quarantine.threshold == 0 {
            exn::bail!(ErrorKind::Invalid("quarantine.threshold must be at least 1".to_string()));
        }
        if self.updates.retry_attempts == 0 {
            exn::bail!(ErrorKind::Invalid("updates.retry_attempts must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn catalog_dir(&self) -> PathBuf {
        self.catalog_dir.clone().unwrap_or_else(|| self.data_dir.join("catalog"))
    }

    pub fn database_path(&self) -> PathBuf {
        self.database.clone().unwrap_or_else(|| self.data_dir.join("scanwatch.db"))
    }
}

impl UpdatesConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_secs.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;
    use rstest::rstest;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.updates.cache_ttl(), Duration::from_secs(1800));
        assert_eq!(config.updates.request_delay(), Duration::from_secs(1));
        assert_eq!(config.updates.max_concurrency, 5);
        assert_eq!(config.quarantine.threshold, 10);
        assert_eq!(config.updates.empty_chapters, EmptyChapterPolicy::Anomaly);
        assert_eq!(config.catalog_dir(), config.data_dir.join("catalog"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_file_then_env() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "scanwatch.toml",
                r#"
                    data_dir = "/srv/scanwatch"

                    [updates]
                    max_concurrency = 2
                    empty_chapters = "success"

                    [quarantine]
                    threshold = 3
                "#,
            )?;
            jail.set_env("SCANWATCH_UPDATES__MAX_CONCURRENCY", "8");
            let path = jail.directory().join("scanwatch.toml");
            let config = Config::load(Some(&path)).unwrap();
            assert_eq!(config.data_dir, PathBuf::from("/srv/scanwatch"));
            assert_eq!(config.database_path(), PathBuf::from("/srv/scanwatch/scanwatch.db"));
            assert_eq!(config.updates.max_concurrency, 8);
            assert_eq!(config.updates.empty_chapters, EmptyChapterPolicy::Success);
            assert_eq!(config.quarantine.threshold, 3);
            // Untouched values keep their defaults.
            assert_eq!(config.updates.cache_ttl_secs, 1800);
            Ok(())
        });
    }

    #[test]
    fn test_yaml_file() {
        Jail::expect_with(|jail| {
            jail.create_file("scanwatch.yaml", "updates:\n  deadline_secs: 90\n")?;
            let config = Config::load(Some(&jail.directory().join("scanwatch.yaml"))).unwrap();
            assert_eq!(config.updates.deadline(), Some(Duration::from_secs(90)));
            Ok(())
        });
    }

    #[rstest]
    #[case("[quarantine]\nthreshold = 0\n")]
    #[case("[updates]\nretry_attempts = 0\n")]
    fn test_validation(#[case] contents: &str) {
        Jail::expect_with(|jail| {
            jail.create_file("scanwatch.toml", contents)?;
            let err = Config::load(Some(&jail.directory().join("scanwatch.toml"))).unwrap_err();
            assert!(matches!(&*err, ErrorKind::Invalid(_)));
            Ok(())
        });
    }

    #[test]
    fn test_bad_type_is_parse_error() {
        Jail::expect_with(|jail| {
            jail.create_file("scanwatch.toml", "[updates]\nmax_concurrency = \"lots\"\n")?;
            let err = Config::load(Some(&jail.directory().join("scanwatch.toml"))).unwrap_err();
            assert!(matches!(&*err, ErrorKind::Parse));
            Ok(())
        });
    }

    #[test]
    fn test_missing_and_unsupported_files() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load(Some(&dir.path().join("missing.toml"))).unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
        let ini = dir.path().join("scanwatch.ini");
        std::fs::write(&ini, "threshold=1").unwrap();
        let err = Config::load(Some(&ini)).unwrap_err();
        assert!(matches!(&*err, ErrorKind::UnsupportedFormat(_)));
    }
}
