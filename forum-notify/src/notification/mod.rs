//! New-activity email notifications.
//!
//! Forum activity signals the [`NotificationScheduler`], which coalesces
//! bursts of signals into one delayed [`SweepJob`]. The sweep emails each
//! user a single digest of tracked topics that changed since the last sweep.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use forum_notify::notification::{
//!     DigestSettings, NotificationScheduler, SchedulerConfig, SmtpConfig, SmtpMailer, SweepJob,
//! };
//!
//! let mailer = Arc::new(SmtpMailer::new(SmtpConfig::from_env())?);
//! let job = SweepJob::new(users, topics, mailer, DigestSettings::from_env());
//! let scheduler = NotificationScheduler::new(&SchedulerConfig::default(), Arc::new(job))?;
//!
//! // On every new post:
//! scheduler.request_notification();
//! ```

pub mod account;
pub mod clock;
pub mod mailer;
pub mod message;
pub mod scheduler;
pub mod sweep;

pub use account::{send_activation_token, send_reset_token};
pub use clock::{Clock, SystemClock};
pub use mailer::{EmailMessage, LogMailer, Mailer, SmtpConfig, SmtpMailer, SmtpSecurity};
pub use message::{DigestSettings, compose_digest};
pub use scheduler::{NotificationScheduler, SchedulerConfig, SchedulerStats};
pub use sweep::{FailureKind, SweepFailure, SweepJob, SweepReport, SweepRunner};
