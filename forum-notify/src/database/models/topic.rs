//! Topic database models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::database::time;
use crate::domain::TopicActivity;

/// Topic database model.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct TopicDbModel {
    /// Unique identifier (UUID)
    pub id: String,
    pub title: String,
    /// Unix epoch milliseconds (UTC) of the latest post in the topic.
    pub last_updated_at: i64,
    /// Unix epoch milliseconds (UTC) when the topic was created.
    pub created_at: i64,
}

impl TopicDbModel {
    /// Create a new topic updated now.
    pub fn new(title: impl Into<String>) -> Self {
        let now = time::now_ms();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            title: title.into(),
            last_updated_at: now,
            created_at: now,
        }
    }

    /// Override the last update timestamp.
    pub fn with_last_updated(mut self, last_updated: DateTime<Utc>) -> Self {
        self.last_updated_at = time::datetime_to_ms(last_updated);
        self
    }
}

/// Row returned by the unseen activity query.
#[derive(Debug, Clone, FromRow)]
pub struct TopicActivityRow {
    pub topic_id: String,
    pub title: String,
    pub last_updated_at: i64,
}

impl From<TopicActivityRow> for TopicActivity {
    fn from(row: TopicActivityRow) -> Self {
        Self {
            topic_id: row.topic_id,
            title: row.title,
            last_updated: time::ms_to_datetime(row.last_updated_at),
        }
    }
}
