//! Shared ambient setup for the protomux crates.

pub mod tracing;

pub use tracing::{init_tracing, TracingConfig, TracingError, TracingOutputFormat};
