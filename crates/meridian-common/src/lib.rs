//! Meridian Common Library
//!
//! Shared error types, configuration helpers, and gRPC definitions for all
//! Meridian services.

pub mod config;
pub mod error;
pub mod proto;

// Re-export commonly used types
pub use error::{GatewayError, Result};
