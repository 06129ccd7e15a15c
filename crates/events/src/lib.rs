//! Process-wide publish/subscribe for job lifecycle notifications.
//!
//! - [`EventBus`]: in-process fan-out hub backed by
//!   `tokio::sync::broadcast`.
//! - [`PlatformEvent`]: the notification envelope (`job:start`,
//!   `job:complete`, `job:error`).

pub mod bus;

pub use bus::{EventBus, PlatformEvent};
