//! `genqueue-app` library crate.
//!
//! Re-exports the daemon's modules for integration testing. The binary
//! entrypoint lives in `main.rs`.

pub mod config;
pub mod persist;
pub mod runtime;

pub use runtime::run;
