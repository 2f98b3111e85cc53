//! QP Driver common library
//!
//! This crate contains shared code used across QP Driver components.

pub mod config;
pub mod error;
pub mod metrics;

// Re-export commonly used types
pub use config::QpDriverConfig;
pub use error::{QpDriverError, Result};
pub use metrics::MetricsRegistry;
