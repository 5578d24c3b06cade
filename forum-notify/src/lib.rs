//! forum-notify library crate.
//!
//! Emails forum users a digest of new activity in the topics they follow.
//! Activity signals are coalesced by [`notification::NotificationScheduler`]
//! so a burst of posts produces a single delayed sweep.

pub mod config;
pub mod database;
pub mod domain;
pub mod error;
pub mod logging;
pub mod notification;
pub mod services;

pub use error::{Error, Result};
