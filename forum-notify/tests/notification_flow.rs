//! Integration tests for the forum-notify database layer and notification flow.
//!
//! These tests use a real SQLite database (in-memory) with the actual schema
//! and drive the scheduler end to end with a recording mailer.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use parking_lot::Mutex;

use forum_notify::database::models::{TopicDbModel, UserDbModel};
use forum_notify::database::repositories::{
    ActivityQuery, SqlxTopicRepository, SqlxUserRepository, UserDirectory,
};
use forum_notify::database::{DbPool, init_pool_with_size, run_migrations};
use forum_notify::domain::User;
use forum_notify::notification::{
    DigestSettings, EmailMessage, Mailer, NotificationScheduler, SchedulerConfig, SweepJob,
};
use forum_notify::{Error, Result};

/// Helper to create a test database pool with migrations applied.
///
/// A single connection, since every `:memory:` connection is its own database.
async fn setup_test_db() -> DbPool {
    let pool = init_pool_with_size("sqlite::memory:", 1)
        .await
        .expect("Failed to create test pool");

    run_migrations(&pool)
        .await
        .expect("Failed to run migrations");

    pool
}

fn secs_ago(now: DateTime<Utc>, secs: i64) -> DateTime<Utc> {
    now - chrono::Duration::seconds(secs)
}

/// Mailer that records messages and fails for rejected recipients.
#[derive(Default)]
struct RecordingMailer {
    sent: Mutex<Vec<EmailMessage>>,
    reject: HashSet<String>,
}

impl RecordingMailer {
    fn rejecting(address: &str) -> Self {
        Self {
            reject: HashSet::from([address.to_string()]),
            ..Default::default()
        }
    }

    fn sent(&self) -> Vec<EmailMessage> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, message: &EmailMessage) -> Result<()> {
        if message.recipients.iter().any(|r| self.reject.contains(r)) {
            return Err(Error::Other("mailbox unavailable".to_string()));
        }
        self.sent.lock().push(message.clone());
        Ok(())
    }
}

/// Seeded forum: repositories over one pool.
struct Forum {
    users: Arc<SqlxUserRepository>,
    topics: Arc<SqlxTopicRepository>,
}

impl Forum {
    async fn new() -> Self {
        let pool = setup_test_db().await;
        Self {
            users: Arc::new(SqlxUserRepository::new(pool.clone())),
            topics: Arc::new(SqlxTopicRepository::new(pool)),
        }
    }

    async fn user(&self, username: &str, email: &str, last_seen: DateTime<Utc>) -> UserDbModel {
        let user = UserDbModel::new(username, email).with_last_seen(last_seen);
        self.users.create(&user).await.expect("Failed to create user");
        user
    }

    async fn topic(&self, title: &str, last_updated: DateTime<Utc>) -> TopicDbModel {
        let topic = TopicDbModel::new(title).with_last_updated(last_updated);
        self.topics.create(&topic).await.expect("Failed to create topic");
        topic
    }

    /// Track and read a topic, the state that makes it eligible for digests.
    async fn follow(&self, user: &UserDbModel, topic: &TopicDbModel, read_at: DateTime<Utc>) {
        self.topics.track(&user.id, &topic.id).await.unwrap();
        self.topics.mark_read(&user.id, &topic.id, read_at).await.unwrap();
    }

    fn scheduler(
        &self,
        mailer: Arc<RecordingMailer>,
        countdown: Duration,
        watermark: DateTime<Utc>,
    ) -> NotificationScheduler {
        let settings = DigestSettings {
            forum_name: "actions forum".to_string(),
            base_url: "forum.example.com".to_string(),
        };
        let job = SweepJob::new(self.users.clone(), self.topics.clone(), mailer, settings);
        let config = SchedulerConfig {
            countdown,
            initial_watermark: Some(watermark),
        };
        NotificationScheduler::new(&config, Arc::new(job)).unwrap()
    }
}

mod database_tests {
    use super::*;

    #[tokio::test]
    async fn test_database_migrations() {
        let pool = setup_test_db().await;

        let tables: Vec<(String,)> =
            sqlx::query_as("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
                .fetch_all(&pool)
                .await
                .expect("Failed to query tables");

        let table_names: Vec<&str> = tables.iter().map(|t| t.0.as_str()).collect();
        for table in ["users", "topics", "topic_tracker", "topics_read"] {
            assert!(table_names.contains(&table), "{table} table missing");
        }
    }

    #[tokio::test]
    async fn test_journal_mode() {
        let pool = setup_test_db().await;

        let result: (String,) = sqlx::query_as("PRAGMA journal_mode")
            .fetch_one(&pool)
            .await
            .expect("Failed to query journal mode");

        // Memory databases can't use WAL, but file-based would
        assert!(result.0 == "memory" || result.0 == "wal");
    }
}

mod user_repository_tests {
    use super::*;

    #[tokio::test]
    async fn test_user_crud() {
        let forum = Forum::new().await;
        let now = Utc::now();
        let alice = forum.user("alice", "a@x.com", secs_ago(now, 600)).await;

        let found = forum.users.find_by_id(&alice.id).await.unwrap();
        assert_eq!(found.username, "alice");
        assert_eq!(found.email, "a@x.com");
        assert_eq!(found.last_seen_at, alice.last_seen_at);

        forum.users.update_last_seen(&alice.id, now).await.unwrap();
        let found = forum.users.find_by_id(&alice.id).await.unwrap();
        assert_eq!(found.get_last_seen().timestamp_millis(), now.timestamp_millis());
    }

    #[tokio::test]
    async fn test_missing_user_is_not_found() {
        let forum = Forum::new().await;

        let err = forum.users.find_by_id("nope").await.unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));

        let err = forum.users.update_last_seen("nope", Utc::now()).await.unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_list_all_users() {
        let forum = Forum::new().await;
        assert!(forum.users.list_all_users().await.unwrap().is_empty());

        let now = Utc::now();
        forum.user("alice", "a@x.com", now).await;
        forum.user("bob", "b@x.com", now).await;

        let users = forum.users.list_all_users().await.unwrap();
        let mut names: Vec<_> = users.iter().map(|u| u.username.as_str()).collect();
        names.sort();
        assert_eq!(names, vec!["alice", "bob"]);
    }

    #[tokio::test]
    async fn test_duplicate_username_is_rejected() {
        let forum = Forum::new().await;
        forum.user("alice", "a@x.com", Utc::now()).await;

        let dup = UserDbModel::new("alice", "other@x.com");
        assert!(matches!(
            forum.users.create(&dup).await,
            Err(Error::DatabaseSqlx(_))
        ));
    }
}

mod activity_query_tests {
    use super::*;

    #[tokio::test]
    async fn test_only_tracked_and_read_topics_are_returned() {
        let forum = Forum::new().await;
        let now = Utc::now();
        let user = forum.user("alice", "a@x.com", secs_ago(now, 3600)).await;

        let followed = forum.topic("Followed", secs_ago(now, 10)).await;
        let untracked = forum.topic("Read but not tracked", secs_ago(now, 10)).await;
        let unread = forum.topic("Tracked but never read", secs_ago(now, 10)).await;
        forum.topic("Neither", secs_ago(now, 10)).await;

        forum.follow(&user, &followed, secs_ago(now, 1800)).await;
        forum.topics.mark_read(&user.id, &untracked.id, secs_ago(now, 1800)).await.unwrap();
        forum.topics.track(&user.id, &unread.id).await.unwrap();

        let domain_user: User = forum.users.find_by_id(&user.id).await.unwrap().into();
        let topics = forum
            .topics
            .find_unseen_activity(&domain_user, secs_ago(now, 3600))
            .await
            .unwrap();

        let titles: Vec<_> = topics.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, vec!["Followed"]);
    }

    #[tokio::test]
    async fn test_both_watermarks_bound_the_result() {
        let forum = Forum::new().await;
        let now = Utc::now();
        let user = forum.user("alice", "a@x.com", secs_ago(now, 300)).await;

        let before_last_seen = forum.topic("Before last seen", secs_ago(now, 400)).await;
        let before_since = forum.topic("Before since", secs_ago(now, 200)).await;
        let newest = forum.topic("Newest", secs_ago(now, 10)).await;
        let newer = forum.topic("Newer", secs_ago(now, 50)).await;
        for topic in [&before_last_seen, &before_since, &newest, &newer] {
            forum.follow(&user, topic, secs_ago(now, 500)).await;
        }

        let domain_user: User = forum.users.find_by_id(&user.id).await.unwrap().into();
        let topics = forum
            .topics
            .find_unseen_activity(&domain_user, secs_ago(now, 100))
            .await
            .unwrap();

        // Most recently updated first
        let titles: Vec<_> = topics.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, vec!["Newest", "Newer"]);
    }

    #[tokio::test]
    async fn test_update_in_watermark_millisecond_is_reported() {
        let forum = Forum::new().await;
        let base = Utc::now().trunc_subsecs(3);
        let user = forum.user("alice", "a@x.com", secs_ago(base, 10)).await;
        let topic = forum
            .topic("Same millisecond", base + chrono::Duration::microseconds(900))
            .await;
        forum.follow(&user, &topic, secs_ago(base, 20)).await;
        let domain_user: User = forum.users.find_by_id(&user.id).await.unwrap().into();

        let since = base + chrono::Duration::microseconds(400);
        let topics = forum.topics.find_unseen_activity(&domain_user, since).await.unwrap();
        let titles: Vec<_> = topics.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, vec!["Same millisecond"]);

        // Older than the watermark's millisecond stays out
        let next_ms = base + chrono::Duration::milliseconds(1);
        assert!(
            forum
                .topics
                .find_unseen_activity(&domain_user, next_ms)
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_untrack_and_touch() {
        let forum = Forum::new().await;
        let now = Utc::now();
        let user = forum.user("alice", "a@x.com", secs_ago(now, 300)).await;
        let topic = forum.topic("Roadmap", secs_ago(now, 400)).await;
        forum.follow(&user, &topic, secs_ago(now, 400)).await;
        let domain_user: User = forum.users.find_by_id(&user.id).await.unwrap().into();

        let since = secs_ago(now, 300);
        assert!(forum.topics.find_unseen_activity(&domain_user, since).await.unwrap().is_empty());

        forum.topics.touch(&topic.id, now).await.unwrap();
        assert_eq!(
            forum.topics.find_unseen_activity(&domain_user, since).await.unwrap().len(),
            1
        );

        forum.topics.untrack(&user.id, &topic.id).await.unwrap();
        assert!(forum.topics.find_unseen_activity(&domain_user, since).await.unwrap().is_empty());

        assert!(matches!(
            forum.topics.touch("nope", now).await,
            Err(Error::NotFound { .. })
        ));
    }
}

mod notification_flow_tests {
    use super::*;

    const COUNTDOWN: Duration = Duration::from_millis(200);

    #[tokio::test]
    async fn test_burst_sends_one_digest_after_countdown() {
        let forum = Forum::new().await;
        let t0 = Utc::now();
        let user = forum.user("alice", "a@x.com", secs_ago(t0, 10)).await;
        let topic = forum.topic("Release plan", secs_ago(t0, 1)).await;
        forum.follow(&user, &topic, secs_ago(t0, 5)).await;

        let mailer = Arc::new(RecordingMailer::default());
        let watermark = secs_ago(t0, 60);
        let scheduler = forum.scheduler(mailer.clone(), COUNTDOWN, watermark);

        let armed: Vec<bool> = (0..3).map(|_| scheduler.request_notification()).collect();
        assert_eq!(armed, vec![true, false, false]);
        assert!(scheduler.is_pending());
        assert!(mailer.sent().is_empty());

        scheduler.wait_idle().await;

        let sent = mailer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].recipients, vec!["a@x.com".to_string()]);
        assert_eq!(sent[0].subject, "New messages in actions forum");
        assert!(sent[0].text_body.contains("- Release plan\n"));
        assert!(sent[0].text_body.contains("Forum link: https://forum.example.com"));

        let report = scheduler.last_report().expect("sweep succeeded");
        assert_eq!(report.since, watermark);
        assert_eq!(report.notified, vec![user.id.clone()]);

        let stats = scheduler.stats();
        assert!(!stats.pending);
        assert_eq!(stats.sweeps_completed, 1);
        assert_eq!(stats.signals_absorbed, 2);
        let elapsed = scheduler.last_notification() - t0.trunc_subsecs(3);
        assert!(elapsed >= chrono::Duration::milliseconds(COUNTDOWN.as_millis() as i64));
    }

    #[tokio::test]
    async fn test_rearmed_sweep_only_reports_new_activity() {
        let forum = Forum::new().await;
        let t0 = Utc::now();
        let user = forum.user("alice", "a@x.com", secs_ago(t0, 10)).await;
        let topic = forum.topic("Release plan", secs_ago(t0, 1)).await;
        forum.follow(&user, &topic, secs_ago(t0, 5)).await;

        let mailer = Arc::new(RecordingMailer::default());
        let scheduler = forum.scheduler(mailer.clone(), COUNTDOWN, secs_ago(t0, 60));

        assert!(scheduler.request_notification());
        scheduler.wait_idle().await;
        assert_eq!(mailer.sent().len(), 1);
        let first_watermark = scheduler.last_notification();

        // Nothing changed since the last sweep
        assert!(scheduler.request_notification());
        scheduler.wait_idle().await;
        assert_eq!(mailer.sent().len(), 1);
        assert!(scheduler.last_notification() >= first_watermark);

        // A new post lands just after the current watermark
        let posted_at = scheduler.last_notification() + chrono::Duration::milliseconds(5);
        forum.topics.touch(&topic.id, posted_at).await.unwrap();
        assert!(scheduler.request_notification());
        scheduler.wait_idle().await;
        assert_eq!(mailer.sent().len(), 2);
        assert_eq!(scheduler.stats().sweeps_completed, 3);
    }

    #[tokio::test]
    async fn test_failed_delivery_does_not_block_other_users() {
        let forum = Forum::new().await;
        let t0 = Utc::now();
        let topic = forum.topic("Release plan", secs_ago(t0, 1)).await;
        let alice = forum.user("alice", "a@x.com", secs_ago(t0, 10)).await;
        let bob = forum.user("bob", "b@x.com", secs_ago(t0, 10)).await;
        let carol = forum.user("carol", "c@x.com", secs_ago(t0, 10)).await;
        forum.follow(&alice, &topic, secs_ago(t0, 5)).await;
        forum.follow(&bob, &topic, secs_ago(t0, 5)).await;
        // carol never read the topic

        let mailer = Arc::new(RecordingMailer::rejecting("a@x.com"));
        let scheduler = forum.scheduler(mailer.clone(), Duration::ZERO, secs_ago(t0, 60));

        assert!(scheduler.request_notification());
        scheduler.wait_idle().await;

        let sent = mailer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].recipients, vec!["b@x.com".to_string()]);

        let report = scheduler.last_report().expect("sweep completed");
        assert_eq!(report.users_scanned, 3);
        assert_eq!(report.notified, vec![bob.id.clone()]);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].user_id, alice.id);
        assert!(!report.notified.contains(&carol.id));
    }
}
