//! Shared utilities for the Flint binaries.

pub mod logging;

pub use logging::{init_logging, init_logging_json};
