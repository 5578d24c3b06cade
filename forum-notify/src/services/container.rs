//! Service container for dependency injection.
//!
//! Builds the repositories, mailer, sweep job and scheduler once at startup
//! and hands out shared references.

use std::sync::Arc;

use sqlx::SqlitePool;
use tracing::info;

use crate::Result;
use crate::config::AppConfig;
use crate::database::repositories::{SqlxTopicRepository, SqlxUserRepository};
use crate::notification::{
    LogMailer, Mailer, NotificationScheduler, SmtpMailer, SweepJob,
};

/// Service container holding the notifier's services.
pub struct ServiceContainer {
    /// Database connection pool.
    pub pool: SqlitePool,
    pub users: Arc<SqlxUserRepository>,
    pub topics: Arc<SqlxTopicRepository>,
    /// Outgoing mail. Logs instead of sending in dry-run mode.
    pub mailer: Arc<dyn Mailer>,
    /// Coalescing scheduler; call `request_notification` on new activity.
    pub scheduler: NotificationScheduler,
}

impl ServiceContainer {
    /// Wire up services from the loaded configuration.
    ///
    /// With `dry_run` digests are logged rather than delivered over SMTP.
    pub fn new(pool: SqlitePool, config: &AppConfig, dry_run: bool) -> Result<Self> {
        info!("Initializing service container");

        let users = Arc::new(SqlxUserRepository::new(pool.clone()));
        let topics = Arc::new(SqlxTopicRepository::new(pool.clone()));

        let mailer: Arc<dyn Mailer> = if dry_run {
            info!("Dry run: emails will be logged, not sent");
            Arc::new(LogMailer)
        } else {
            Arc::new(SmtpMailer::new(config.smtp.clone())?)
        };

        let job = SweepJob::new(
            users.clone(),
            topics.clone(),
            mailer.clone(),
            config.digest.clone(),
        );
        let scheduler = NotificationScheduler::new(&config.scheduler, Arc::new(job))?;

        info!("Service container initialized");

        Ok(Self {
            pool,
            users,
            topics,
            mailer,
            scheduler,
        })
    }
}
