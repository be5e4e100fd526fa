//! Error types for the edgeplane coordinator.
//!
//! This module provides a unified error type [`EdgeError`] for all coordinator operations,
//! along with a convenient [`Result`] type alias.
//!
//! # Error Categories
//!
//! - **Placement**: no eligible node for a block, or the chosen node is bound to another job
//! - **Dispatch**: a worker could not be reached or rejected the request
//! - **Storage**: the persistent or fast store failed a read or write
//! - **Election**: not enough candidates to cover every region
//! - **Configuration**: invalid settings or missing configuration
//!
//! None of these are fatal to the coordinator. Callers log them and reflect the outcome
//! in job and block status.
//!
//! # Example
//!
//! ```rust
//! use edgeplane::error::{EdgeError, Result};
//!
//! fn pick(candidates: &[&str]) -> Result<String> {
//!     candidates
//!         .first()
//!         .map(|c| c.to_string())
//!         .ok_or_else(|| EdgeError::NodeNotFound("no candidate in region".into()))
//! }
//!
//! let err = pick(&[]).unwrap_err();
//! assert!(err.is_retryable());
//! ```

use std::io;
use thiserror::Error;

/// Main error type for edgeplane operations.
#[derive(Error, Debug)]
pub enum EdgeError {
    // Placement errors
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Node {device_id} is bound to content {content_id} job {job_id}")]
    AssignmentConflict {
        device_id: String,
        content_id: String,
        job_id: String,
    },

    // Dispatch errors
    #[error("Dispatch to {device_id} failed: {reason}")]
    DispatchFailure { device_id: String, reason: String },

    // Content errors
    #[error("Content not found: {0}")]
    ContentNotFound(String),

    #[error("Invalid content id {cid}: {reason}")]
    InvalidCid { cid: String, reason: String },

    // Election errors
    #[error("Insufficient validators for {geo}: missing {missing}")]
    InsufficientValidators { geo: String, missing: usize },

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration: {field}: {reason}")]
    InvalidConfig { field: String, reason: String },

    // Storage errors
    #[error("Storage error: {0}")]
    Storage(String),

    // Network errors
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timeout after {0}ms")]
    Timeout(u64),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // External errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EdgeError {
    /// Check if error is retryable.
    ///
    /// Retryable errors describe a placement that did not happen this pass; a later
    /// caching pass or resubmission may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EdgeError::NodeNotFound(_)
                | EdgeError::AssignmentConflict { .. }
                | EdgeError::DispatchFailure { .. }
                | EdgeError::Timeout(_)
                | EdgeError::Network(_)
        )
    }

    /// Short label used for metrics and audit logs.
    pub fn kind(&self) -> &'static str {
        match self {
            EdgeError::NodeNotFound(_) => "node_not_found",
            EdgeError::AssignmentConflict { .. } => "assignment_conflict",
            EdgeError::DispatchFailure { .. } => "dispatch_failure",
            EdgeError::ContentNotFound(_) => "content_not_found",
            EdgeError::InvalidCid { .. } => "invalid_cid",
            EdgeError::InsufficientValidators { .. } => "insufficient_validators",
            EdgeError::Config(_) | EdgeError::InvalidConfig { .. } => "config",
            EdgeError::Storage(_) => "storage",
            EdgeError::Network(_) => "network",
            EdgeError::Timeout(_) => "timeout",
            EdgeError::Serialization(_) => "serialization",
            EdgeError::InvalidInput(_) => "invalid_input",
            EdgeError::Io(_) => "io",
            EdgeError::Internal(_) => "internal",
        }
    }
}

#[cfg(feature = "rocksdb")]
impl From<rocksdb::Error> for EdgeError {
    fn from(e: rocksdb::Error) -> Self {
        EdgeError::Storage(e.to_string())
    }
}

impl From<bincode::Error> for EdgeError {
    fn from(e: bincode::Error) -> Self {
        EdgeError::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for EdgeError {
    fn from(e: serde_json::Error) -> Self {
        EdgeError::Serialization(e.to_string())
    }
}

/// Result type alias for edgeplane operations.
pub type Result<T> = std::result::Result<T, EdgeError>;
