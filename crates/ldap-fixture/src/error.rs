//! Error types for fixture operations.
//!
//! The only failure class ever absorbed internally is the transient
//! connection-refusal seen while the server process is still starting;
//! everything else surfaces to the caller, at most wrapped with the
//! operation that was being attempted.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the fixture crate.
#[derive(Debug, Error)]
pub enum FixtureError {
    // Startup errors
    #[error("server artifact missing: {0}")]
    MissingServerJar(PathBuf),

    #[error("runtime not found: {binary}")]
    RuntimeNotFound { binary: String },

    #[error("failed to launch server process: {message}")]
    Launch {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    // Gateway errors
    #[error("gateway handshake failed: {message}")]
    Handshake {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("operation cancelled")]
    Cancelled,

    #[error("gateway channel closed")]
    ChannelClosed,

    #[error("malformed gateway reply: {message}")]
    Protocol { message: String },

    /// Failure reported by the server process, surfaced verbatim.
    #[error("remote call failed: {message}")]
    Remote { message: String },

    /// A remote call issued while assembling the server configuration
    /// failed. Wraps the underlying cause; partially constructed remote
    /// objects are left to the server process's own lifecycle.
    #[error("building remote server configuration failed at `{step}`")]
    ConfigBuild {
        step: String,
        #[source]
        source: Box<FixtureError>,
    },

    // IO / codec errors
    #[error("IO error: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },
}

/// Result type alias for fixture operations.
pub type Result<T> = std::result::Result<T, FixtureError>;

impl From<std::io::Error> for FixtureError {
    fn from(err: std::io::Error) -> Self {
        FixtureError::Io {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for FixtureError {
    fn from(err: serde_json::Error) -> Self {
        FixtureError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl FixtureError {
    /// Wrap a failure with the configuration-build step that hit it.
    pub fn config_build(step: impl Into<String>, source: FixtureError) -> Self {
        FixtureError::ConfigBuild {
            step: step.into(),
            source: Box::new(source),
        }
    }
}
