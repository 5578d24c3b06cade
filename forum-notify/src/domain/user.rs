//! Forum user as seen by the notifier.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A user that may receive activity digests.
///
/// `last_seen` is owned by the account subsystem and only read here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: String,
    pub last_seen: DateTime<Utc>,
}
