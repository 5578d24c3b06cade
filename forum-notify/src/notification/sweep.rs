//! The notification sweep.
//!
//! One sweep scans every user, finds topics with posts they have not seen
//! since the scheduler's watermark, and sends each user with new activity a
//! single digest email. Failures are isolated per user: a broken mailbox or
//! a failing lookup never stops the rest of the batch.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::mailer::Mailer;
use super::message::{DigestSettings, compose_digest};
use crate::Result;
use crate::database::repositories::{ActivityQuery, UserDirectory};

/// Something the scheduler can run once per debounce window.
#[async_trait]
pub trait SweepRunner: Send + Sync {
    /// Run one sweep for activity newer than `since`.
    async fn run(&self, since: DateTime<Utc>) -> Result<SweepReport>;
}

/// Which step failed for a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Activity lookup failed.
    Query,
    /// Mail delivery failed.
    Transport,
}

/// A per-user failure during a sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepFailure {
    pub user_id: String,
    pub kind: FailureKind,
    pub error: String,
}

/// Result of a sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepReport {
    /// Watermark the sweep queried against.
    pub since: DateTime<Utc>,
    /// Users looked at.
    pub users_scanned: usize,
    /// Users that were sent a digest.
    pub notified: Vec<String>,
    /// Users with nothing new.
    pub skipped: usize,
    /// Users whose lookup or send failed.
    pub failures: Vec<SweepFailure>,
}

impl SweepReport {
    /// Create a new empty report.
    pub fn new(since: DateTime<Utc>) -> Self {
        Self {
            since,
            users_scanned: 0,
            notified: Vec::new(),
            skipped: 0,
            failures: Vec::new(),
        }
    }

    fn add_failure(&mut self, user_id: &str, kind: FailureKind, error: String) {
        self.failures.push(SweepFailure {
            user_id: user_id.to_string(),
            kind,
            error,
        });
    }

    /// Get the number of users that were emailed.
    pub fn notified_count(&self) -> usize {
        self.notified.len()
    }

    /// Get the number of failures.
    pub fn failure_count(&self) -> usize {
        self.failures.len()
    }

    /// Check if every user was processed without error.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Sweep over all users, backed by the directory, activity query and mailer.
pub struct SweepJob {
    users: Arc<dyn UserDirectory>,
    activity: Arc<dyn ActivityQuery>,
    mailer: Arc<dyn Mailer>,
    settings: DigestSettings,
}

impl SweepJob {
    pub fn new(
        users: Arc<dyn UserDirectory>,
        activity: Arc<dyn ActivityQuery>,
        mailer: Arc<dyn Mailer>,
        settings: DigestSettings,
    ) -> Self {
        Self {
            users,
            activity,
            mailer,
            settings,
        }
    }
}

#[async_trait]
impl SweepRunner for SweepJob {
    async fn run(&self, since: DateTime<Utc>) -> Result<SweepReport> {
        let users = self.users.list_all_users().await?;
        let mut report = SweepReport::new(since);
        if users.is_empty() {
            debug!("No users, nothing to notify");
            return Ok(report);
        }

        debug!("Sweeping {} users for activity since {}", users.len(), since);

        for user in users {
            report.users_scanned += 1;

            let topics = match self.activity.find_unseen_activity(&user, since).await {
                Ok(topics) => topics,
                Err(e) => {
                    warn!(user_id = %user.id, error = %e, "Failed to query unseen activity");
                    report.add_failure(&user.id, FailureKind::Query, e.to_string());
                    continue;
                }
            };

            if topics.is_empty() {
                report.skipped += 1;
                continue;
            }

            let message = compose_digest(&user, &topics, &self.settings);
            match self.mailer.send(&message).await {
                Ok(()) => {
                    debug!(user_id = %user.id, topics = topics.len(), "Digest sent");
                    report.notified.push(user.id);
                }
                Err(e) => {
                    warn!(user_id = %user.id, error = %e, "Failed to send digest");
                    report.add_failure(&user.id, FailureKind::Transport, e.to_string());
                }
            }
        }

        info!(
            scanned = report.users_scanned,
            notified = report.notified_count(),
            skipped = report.skipped,
            failed = report.failure_count(),
            "Notification sweep finished"
        );
        Ok(report)
    }
}
