use clap::{Parser, Subcommand};
use exn::ResultExt;
use scanwatch::Tracker;
use scanwatch::config::Config;
use scanwatch::error::{ErrorKind, Result};
use scanwatch_updates::Providers;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "scanwatch", version, about = "Maintenance for scanwatch catalogs and quarantine")]
struct Cli {
    /// Config file (TOML, YAML or JSON).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List scans with a summary of their works.
    Scans,
    /// List the quarantined works of a scan.
    Quarantined { scan: String },
    /// Bring a quarantined work back to active duty.
    Restore {
        scan: String,
        work: String,
        /// Who is asking, for the event log.
        #[arg(long)]
        actor: Option<String>,
    },
    /// Quarantine statistics, rebuilt from the event log.
    Stats,
    /// Most recent quarantine events.
    Events {
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
    },
    /// Quarantine every work over the threshold, in every scan.
    Sweep,
    /// Forget a provider's bulk-update capability so it is detected again.
    Redetect { provider: String },
    /// Drop expired update cache entries (all of them with `--all`).
    PurgeCache {
        #[arg(long)]
        all: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("scanwatch=info")))
        .with_writer(std::io::stderr)
        .init();

    let config = Config::load(cli.config.as_deref()).or_raise(|| ErrorKind::Config)?;
    // Provider plugins register themselves with the embedding application;
    // none of these commands talk to a provider.
    let tracker = Tracker::open(config, Providers::new()).await?;
    let outcome = run(&tracker, cli.command).await;
    tracker.close().await;
    outcome
}

async fn run(tracker: &Tracker, command: Command) -> Result<()> {
    match command {
        Command::Scans => {
            for name in tracker.list_scans().await? {
                match tracker.load_scan(&name).await {
                    Ok(scan) => {
                        let summary = scan.summary();
                        println!(
                            "{name}\t{provider}\tworks={total} active={active} quarantined={quarantined} chapters={chapters}",
                            provider = scan.provider,
                            total = summary.total,
                            active = summary.active,
                            quarantined = summary.quarantined,
                            chapters = summary.chapters,
                        );
                    },
                    Err(e) => {
                        tracing::warn!(scan = %name, error = ?e, "could not load scan");
                        println!("{name}\t(unreadable)");
                    },
                }
            }
        },
        Command::Quarantined { scan } => {
            for work in tracker.list_quarantined(&scan).await? {
                println!(
                    "{}\t{}\terrors={}\t{}",
                    work.id,
                    work.title,
                    work.consecutive_error_count,
                    work.last_error.as_deref().unwrap_or("-"),
                );
            }
        },
        Command::Restore { scan, work, actor } => {
            let event = tracker.restore_work_as(&scan, &work, true, actor).await?;
            println!("restored {} ({}) in {}", event.work_id, event.title, event.scan_name);
        },
        Command::Stats => print_json(&tracker.get_stats().await?)?,
        Command::Events { limit } => {
            for event in tracker.get_recent_events(limit).await? {
                println!(
                    "{}\t{}\t{}/{}\t{}\t{}",
                    event.occurred_at,
                    event.action,
                    event.scan_name,
                    event.work_id,
                    event.error_count,
                    event.reason,
                );
            }
        },
        Command::Sweep => {
            let report = tracker.sweep().await?;
            println!("checked {} scans, quarantined {} works", report.scans_checked, report.quarantined.len());
            for (scan, reason) in report.failed {
                println!("failed: {scan}: {reason}");
            }
        },
        Command::Redetect { provider } => {
            tracker.redetect_capability(&provider).await?;
            println!("{provider}: capability will be detected on the next check");
        },
        Command::PurgeCache { all } => {
            let removed = if all { tracker.clear_cache().await? } else { tracker.purge_cache().await? };
            let stats = tracker.cache_stats();
            println!("removed {removed} entries; {} left ({} valid)", stats.total, stats.valid);
        },
    }
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).or_raise(|| ErrorKind::Output)?;
    println!("{json}");
    Ok(())
}
