//! Service layer module.
//!
//! Wiring of the notifier's services.

pub mod container;

pub use container::ServiceContainer;
