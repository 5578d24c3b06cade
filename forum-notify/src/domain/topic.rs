//! Topic activity projection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A topic with new posts, projected from forum storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicActivity {
    pub topic_id: String,
    pub title: String,
    pub last_updated: DateTime<Utc>,
}
