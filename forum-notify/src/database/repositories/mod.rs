//! Repository layer for database access.
//!
//! Each repository exposes a narrow trait consumed by the notification sweep
//! and an SQLx implementation backed by the forum database.

pub mod topic;
pub mod user;

pub use topic::*;
pub use user::*;
