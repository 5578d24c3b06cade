//! Topic repository and the unseen activity query.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::database::models::{TopicActivityRow, TopicDbModel};
use crate::database::time;
use crate::domain::{TopicActivity, User};
use crate::{Error, Result};

/// Per-user lookup of topics with posts the user has not seen yet.
#[async_trait]
pub trait ActivityQuery: Send + Sync {
    /// Topics the user tracks and has read before, updated after both the
    /// user's `last_seen` and `since`. Newest first.
    ///
    /// Timestamps are compared at millisecond resolution and the `since`
    /// bound is inclusive: a topic updated in the watermark's millisecond may
    /// be reported twice but is never skipped.
    ///
    /// Nothing new is an empty vector, not an error.
    async fn find_unseen_activity(
        &self,
        user: &User,
        since: DateTime<Utc>,
    ) -> Result<Vec<TopicActivity>>;
}

/// SQLx implementation of ActivityQuery, plus the topic bookkeeping the
/// forum performs when posts are written.
pub struct SqlxTopicRepository {
    pool: SqlitePool,
}

impl SqlxTopicRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, topic: &TopicDbModel) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO topics (id, title, last_updated_at, created_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&topic.id)
        .bind(&topic.title)
        .bind(topic.last_updated_at)
        .bind(topic.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Bump the topic's last update, e.g. after a new post.
    pub async fn touch(&self, topic_id: &str, updated_at: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query("UPDATE topics SET last_updated_at = ? WHERE id = ?")
            .bind(time::datetime_to_ms(updated_at))
            .bind(topic_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found("Topic", topic_id));
        }
        Ok(())
    }

    /// Subscribe a user to a topic.
    pub async fn track(&self, user_id: &str, topic_id: &str) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO topic_tracker (user_id, topic_id) VALUES (?, ?)")
            .bind(user_id)
            .bind(topic_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Unsubscribe a user from a topic.
    pub async fn untrack(&self, user_id: &str, topic_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM topic_tracker WHERE user_id = ? AND topic_id = ?")
            .bind(user_id)
            .bind(topic_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Record that the user read the topic at `read_at`.
    pub async fn mark_read(
        &self,
        user_id: &str,
        topic_id: &str,
        read_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO topics_read (user_id, topic_id, last_read_at)
            VALUES (?, ?, ?)
            ON CONFLICT(user_id, topic_id) DO UPDATE SET last_read_at = excluded.last_read_at
            "#,
        )
        .bind(user_id)
        .bind(topic_id)
        .bind(time::datetime_to_ms(read_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl ActivityQuery for SqlxTopicRepository {
    async fn find_unseen_activity(
        &self,
        user: &User,
        since: DateTime<Utc>,
    ) -> Result<Vec<TopicActivity>> {
        let rows = sqlx::query_as::<_, TopicActivityRow>(
            r#"
            SELECT t.id AS topic_id, t.title, t.last_updated_at
            FROM topics t
            JOIN topic_tracker tt ON tt.topic_id = t.id AND tt.user_id = ?
            JOIN topics_read tr ON tr.topic_id = t.id AND tr.user_id = ?
            WHERE t.last_updated_at > ? AND t.last_updated_at >= ?
            ORDER BY t.last_updated_at DESC, t.id
            "#,
        )
        .bind(&user.id)
        .bind(&user.id)
        .bind(time::datetime_to_ms(user.last_seen))
        .bind(time::datetime_to_ms(since))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(TopicActivity::from).collect())
    }
}
