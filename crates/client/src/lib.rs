//! Network clients for the generation backend.
//!
//! Provides the REST API wrapper (job creation and paginated history),
//! typed parsing of push-channel envelopes, the WebSocket connection, and a
//! supervised, cancellable reconnect loop with exponential backoff.

pub mod api;
pub mod connection;
pub mod messages;
pub mod reconnect;
pub mod stream;
