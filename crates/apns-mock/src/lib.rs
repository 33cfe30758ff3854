//! Mock push gateway: binary gateway listener plus feedback listener.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// CLI argument parsing and server configuration.
pub mod config;
/// Error types for mock server operations.
pub mod error;
pub mod feedback;
pub mod gateway;
/// Prometheus metrics collection and HTTP endpoint.
pub mod metrics;
pub mod policy;
/// Shared queue between gateway and feedback sessions.
pub mod queue;
/// Accept loops and shared server state.
pub mod server;
pub mod tls;

pub use server::{run, run_with_shutdown, ServerState};
