//! Shared types for the sbc workspace.
//!
//! - The error taxonomy used across crates (stable codes, categories,
//!   remediation hints)
//! - Run and replicate identifiers
//! - Output format selection for CLI payloads

pub mod error;
pub mod id;
pub mod output;

pub use error::{Error, ErrorCategory, Result, StructuredError};
pub use id::{ReplicateIndex, RunId};
pub use output::OutputFormat;

/// Schema version written into every persisted record.
pub const SCHEMA_VERSION: &str = "1.0.0";
