//! Domain types shared by the notification core and its collaborators.

pub mod topic;
pub mod user;

pub use topic::TopicActivity;
pub use user::User;
