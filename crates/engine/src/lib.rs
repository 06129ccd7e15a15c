//! Job lifecycle and event-reconciliation engine.
//!
//! - [`store::JobStore`]: ordered, id-keyed job list and transition logic.
//! - [`submission`]: optimistic insert and in-place confirmation.
//! - [`history`]: paginated history fetch and merge with in-flight jobs.
//! - [`selection::Selection`]: manual / follow-latest selection.
//! - [`dispatch`]: push-channel messages to store events.
//! - [`state::EngineState`]: all of the above behind one owner.
//! - [`service`]: the actor that owns [`state::EngineState`] and its handle.

pub mod dispatch;
pub mod error;
pub mod history;
pub mod selection;
pub mod service;
pub mod state;
pub mod store;
pub mod submission;

pub use error::EngineError;
pub use service::{Engine, EngineConfig, EngineHandle, EngineView};
pub use state::EngineState;
