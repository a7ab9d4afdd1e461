// src/error.rs

//! Unified error handling for the watcher.
//!
//! The variants follow the per-site failure taxonomy of the watch cycle:
//! fetch and selector problems end up as content sentinels, threat lookup
//! and capture problems are logged and handled by policy, and persistence
//! problems are surfaced to the operator.

use std::fmt;

use thiserror::Error;

/// Result type alias for watcher operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// AWS S3 error
    #[cfg(feature = "s3")]
    #[error("S3 error: {0}")]
    S3(String),

    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Page could not be loaded
    #[error("Failed to load {url}: {message}")]
    Fetch { url: String, message: String },

    /// Structural selector could not be evaluated
    #[error("Invalid selector '{selector}': {message}")]
    Selector { selector: String, message: String },

    /// Reputation service unreachable or misbehaving
    #[error("Threat lookup failed for {url}: {message}")]
    ThreatLookup { url: String, message: String },

    /// Rendering engine failure
    #[error("Capture failed for {url}: {message}")]
    Capture { url: String, message: String },

    /// An outbound call exceeded its deadline
    #[error("{operation} timed out after {secs}s")]
    Timeout { operation: String, secs: u64 },

    /// Snapshot or artifact store failure
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Requested entity does not exist
    #[error("Not found: {0}")]
    NotFound(String),
}

impl AppError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a fetch error for a URL.
    pub fn fetch(url: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Fetch {
            url: url.into(),
            message: message.to_string(),
        }
    }

    /// Create a selector error.
    pub fn selector(selector: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Selector {
            selector: selector.into(),
            message: message.to_string(),
        }
    }

    /// Create a threat lookup error.
    pub fn threat_lookup(url: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::ThreatLookup {
            url: url.into(),
            message: message.to_string(),
        }
    }

    /// Create a capture error.
    pub fn capture(url: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Capture {
            url: url.into(),
            message: message.to_string(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, secs: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            secs,
        }
    }

    /// Create a persistence error.
    pub fn persistence(message: impl fmt::Display) -> Self {
        Self::Persistence(message.to_string())
    }
}
