//! forum-notify CLI
//!
//! Usage:
//!   forum-notify migrate                      # Create or upgrade the schema
//!   forum-notify sweep --lookback 120         # One sweep over the last two hours
//!   forum-notify sweep --dry-run --json       # Log emails instead of sending
//!   forum-notify test-email --to a@x.com      # Check SMTP settings

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use forum_notify::config::AppConfig;
use forum_notify::database;
use forum_notify::logging::{self, LOG_RETENTION_DAYS};
use forum_notify::notification::SmtpMailer;
use forum_notify::services::ServiceContainer;

#[derive(Parser)]
#[command(
    name = "forum-notify",
    version,
    about = "Email forum users about new activity in topics they follow"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Database URL (overrides DATABASE_URL)
    #[arg(long, global = true)]
    database_url: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply database migrations
    Migrate,

    /// Run one notification sweep and wait for it to finish
    Sweep {
        /// Only report activity after this RFC 3339 timestamp
        #[arg(long, value_parser = parse_timestamp, conflicts_with = "lookback")]
        since: Option<DateTime<Utc>>,

        /// Look back this many minutes when no watermark is configured
        #[arg(long, default_value_t = 60)]
        lookback: u64,

        /// Delay before the sweep runs, in seconds
        #[arg(long, default_value_t = 0)]
        countdown: u64,

        /// Log emails instead of sending them
        #[arg(long)]
        dry_run: bool,

        /// Print the sweep report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Send a test email using the SMTP settings
    TestEmail {
        /// Recipient address
        #[arg(long)]
        to: String,
    },
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("invalid RFC 3339 timestamp: {e}"))
}

/// `now` minus `minutes`, rejecting spans chrono cannot represent.
fn lookback_watermark(now: DateTime<Utc>, minutes: u64) -> anyhow::Result<DateTime<Utc>> {
    i64::try_from(minutes)
        .ok()
        .and_then(chrono::Duration::try_minutes)
        .and_then(|span| now.checked_sub_signed(span))
        .with_context(|| format!("--lookback {minutes} minutes is out of range"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let mut config = AppConfig::from_env().context("failed to load configuration")?;
    if let Some(url) = cli.database_url {
        config.database_url = url;
    }

    let _log_guard = logging::init_logging(&config.log_dir)?;
    logging::install_panic_hook(&config.log_dir);
    if let Err(e) = logging::cleanup_old_logs(Path::new(&config.log_dir), LOG_RETENTION_DAYS).await
    {
        warn!(error = %e, "Failed to clean up old logs");
    }

    match cli.command {
        Commands::Migrate => {
            let pool = database::init_pool(&config.database_url).await?;
            database::run_migrations(&pool).await?;
            info!("Migrations applied");
        }
        Commands::Sweep {
            since,
            lookback,
            countdown,
            dry_run,
            json,
        } => {
            let watermark = match since.or(config.scheduler.initial_watermark) {
                Some(watermark) => watermark,
                None => lookback_watermark(Utc::now(), lookback)?,
            };
            config.scheduler.initial_watermark = Some(watermark);
            config.scheduler.countdown = Duration::from_secs(countdown);

            let pool = database::init_pool(&config.database_url).await?;
            database::run_migrations(&pool).await?;
            let services = ServiceContainer::new(pool, &config, dry_run)?;

            info!(since = %watermark, "Requesting notification sweep");
            services.scheduler.request_notification();
            services.scheduler.wait_idle().await;

            let stats = services.scheduler.stats();
            let report = services
                .scheduler
                .last_report()
                .context("notification sweep failed, see the log for details")?;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!(
                    "Scanned {} users: {} notified, {} without new activity, {} failed",
                    report.users_scanned,
                    report.notified_count(),
                    report.skipped,
                    report.failure_count()
                );
                for failure in &report.failures {
                    println!("  {} ({:?}): {}", failure.user_id, failure.kind, failure.error);
                }
                println!("Next watermark: {}", stats.last_notification.to_rfc3339());
            }
        }
        Commands::TestEmail { to } => {
            let mailer = SmtpMailer::new(config.smtp.clone())?;
            mailer
                .test(&to)
                .await
                .with_context(|| format!("failed to send test email to {to}"))?;
            println!("Test email sent to {to}");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_lookback_watermark() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        assert_eq!(
            lookback_watermark(now, 90).unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 1, 10, 30, 0).unwrap()
        );
        assert_eq!(lookback_watermark(now, 0).unwrap(), now);
    }

    #[test]
    fn test_huge_lookback_is_an_error() {
        let now = Utc::now();
        assert!(lookback_watermark(now, u64::MAX).is_err());
        assert!(lookback_watermark(now, i64::MAX as u64).is_err());
        assert!(lookback_watermark(now, 400_000 * 365 * 24 * 60).is_err());
    }
}
