//! Database models for forum-notify.
//!
//! These models map directly to the database schema; conversions into the
//! domain types live next to them.

pub mod topic;
pub mod user;

pub use topic::*;
pub use user::*;
