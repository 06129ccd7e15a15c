//! Domain model for the generation job engine.
//!
//! Everything in this crate is synchronous and free of I/O: the job record
//! and its forward-only status machine, output references and the image
//! resolution law, parameter snapshots, workflow selection, and the narrow
//! persisted-state snapshot.

pub mod error;
pub mod inputs;
pub mod job;
pub mod job_events;
pub mod output;
pub mod record;
pub mod snapshot;
pub mod status;
pub mod types;
pub mod workflow;
