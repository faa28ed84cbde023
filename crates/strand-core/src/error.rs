//! Error types for Strand Core

use thiserror::Error;

/// Result type alias for orchestration operations
pub type Result<T> = std::result::Result<T, Error>;

/// Orchestration error types
#[derive(Error, Debug)]
pub enum Error {
    // Graph construction errors
    #[error("Failed to create stage {name} ({factory})")]
    ElementCreation { factory: String, name: String },

    #[error("Failed to link {from} -> {to}: {code}")]
    Link { from: String, to: String, code: String },

    // Engine errors
    #[error("Engine error: {0}")]
    EngineRuntime(String),

    #[error("State change to {state} rejected by {target}")]
    StateChange { target: String, state: String },

    #[error("Seek failed: {0}")]
    Seek(String),

    #[error("Invalid surface handle: {0:?}")]
    InvalidSurfaceHandle(Option<u64>),

    /// Reserved: quality-tier constraints are fire-and-forget and never
    /// confirmed by the engine, so nothing raises this today.
    #[error("Caps negotiation failed: {0}")]
    Negotiation(String),

    // Session errors
    #[error("Session is closed")]
    SessionClosed,

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a link error from endpoint descriptions
    pub fn link(from: impl ToString, to: impl ToString, code: impl Into<String>) -> Self {
        Error::Link {
            from: from.to_string(),
            to: to.to_string(),
            code: code.into(),
        }
    }

    /// Returns true if the session can keep going after this error
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            Error::ElementCreation { .. } | Error::InvalidConfig(_) | Error::SessionClosed
        )
    }

    /// Returns the error code for telemetry
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::ElementCreation { .. } => "ELEMENT_CREATION",
            Error::Link { .. } => "LINK",
            Error::EngineRuntime(_) => "ENGINE_RUNTIME",
            Error::StateChange { .. } => "STATE_CHANGE",
            Error::Seek(_) => "SEEK",
            Error::InvalidSurfaceHandle(_) => "INVALID_SURFACE",
            Error::Negotiation(_) => "NEGOTIATION",
            Error::SessionClosed => "SESSION_CLOSED",
            Error::InvalidConfig(_) => "INVALID_CONFIG",
            Error::Json(_) => "JSON",
            Error::Internal(_) => "INTERNAL",
            Error::Io(_) => "IO",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_creation_failure_is_fatal() {
        let err = Error::ElementCreation {
            factory: "decodebin".into(),
            name: "dbin".into(),
        };
        assert!(!err.is_recoverable());
        assert_eq!(err.error_code(), "ELEMENT_CREATION");
    }

    #[test]
    fn test_link_failure_is_recoverable() {
        let err = Error::link("dbin:src_0", "qv:sink", "NOFORMAT");
        assert!(err.is_recoverable());
        assert_eq!(err.to_string(), "Failed to link dbin:src_0 -> qv:sink: NOFORMAT");
    }

    #[test]
    fn test_error_codes_are_distinct() {
        let errors = [
            Error::ElementCreation { factory: "f".into(), name: "n".into() },
            Error::link("a", "b", "NOFORMAT"),
            Error::EngineRuntime("boom".into()),
            Error::StateChange { target: "pipeline".into(), state: "playing".into() },
            Error::Seek("inactive".into()),
            Error::InvalidSurfaceHandle(None),
            Error::Negotiation("caps".into()),
            Error::SessionClosed,
            Error::InvalidConfig("zero".into()),
            Error::Internal("x".into()),
        ];
        let mut codes: Vec<&str> = errors.iter().map(Error::error_code).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }
}
