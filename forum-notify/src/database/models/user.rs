//! User database model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::database::time;
use crate::domain::User;

/// User database model.
/// Represents a forum account that can receive activity digests.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct UserDbModel {
    /// Unique identifier (UUID)
    pub id: String,
    /// Display name used in the digest greeting
    pub username: String,
    /// Address notifications are delivered to
    pub email: String,
    /// Unix epoch milliseconds (UTC) of the user's last visit.
    pub last_seen_at: i64,
    /// Unix epoch milliseconds (UTC) when the user was created.
    pub created_at: i64,
}

impl UserDbModel {
    /// Create a new user that was last seen now.
    pub fn new(username: impl Into<String>, email: impl Into<String>) -> Self {
        let now = time::now_ms();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            username: username.into(),
            email: email.into(),
            last_seen_at: now,
            created_at: now,
        }
    }

    /// Override the last seen timestamp.
    pub fn with_last_seen(mut self, last_seen: DateTime<Utc>) -> Self {
        self.last_seen_at = time::datetime_to_ms(last_seen);
        self
    }

    /// Get last_seen_at as `DateTime<Utc>`.
    pub fn get_last_seen(&self) -> DateTime<Utc> {
        time::ms_to_datetime(self.last_seen_at)
    }
}

impl From<UserDbModel> for User {
    fn from(model: UserDbModel) -> Self {
        let last_seen = model.get_last_seen();
        Self {
            id: model.id,
            username: model.username,
            email: model.email,
            last_seen,
        }
    }
}
