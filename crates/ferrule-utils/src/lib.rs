//! # Ferrule Utilities
//!
//! Shared utilities, logging, and helpers for Ferrule.
//!
//! This crate provides common functionality used across the Ferrule workspace,
//! including the logging bootstrap built on `tracing`.

pub mod logging;

// Re-export commonly used logging functions for convenience
pub use logging::{init_logging, init_logging_with_level, init_test_logging, LogFormat, LogLevel, LoggingError};
pub use tracing::{debug, error, info, trace, warn};
