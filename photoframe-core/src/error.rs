//! Engine Errors - Typed Failures
//!
//! Every engine failure surfaces as one `EngineError`. Collaborators
//! (archive, upload host) have their own error type so that a sharing
//! failure can never be confused with a compositing failure.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Invalid template: {0}")]
    InvalidTemplate(String),

    #[error("Template not found: {0}")]
    TemplateNotFound(String),

    #[error("Invalid photo for slot {slot}: {message}")]
    InvalidPhoto { slot: u8, message: String },

    #[error("Slot {slot} out of range: template has {available} slot(s)")]
    SlotOutOfRange { slot: u8, available: usize },

    #[error("Invalid copy count {0}: must be between 1 and 5")]
    InvalidCopyCount(u32),

    #[error("Invalid tiling: {0}")]
    InvalidTiling(String),

    #[error("Rejected by share policy: {0}")]
    PolicyRejected(String),

    #[error("Pipeline exceeded {0} ms")]
    Timeout(u64),

    #[error("Request cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Stable machine-readable error kind for the caller boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidTemplate,
    TemplateNotFound,
    InvalidPhoto,
    SlotOutOfRange,
    InvalidCopyCount,
    InvalidTiling,
    PolicyRejected,
    Timeout,
    Cancelled,
    Internal,
}

/// Structured error as handed to callers: kind + message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub message: String,
}

impl EngineError {
    pub fn invalid_template(msg: impl Into<String>) -> Self {
        Self::InvalidTemplate(msg.into())
    }

    pub fn invalid_photo(slot: u8, msg: impl Into<String>) -> Self {
        Self::InvalidPhoto { slot, message: msg.into() }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidTemplate(_) => ErrorKind::InvalidTemplate,
            Self::TemplateNotFound(_) => ErrorKind::TemplateNotFound,
            Self::InvalidPhoto { .. } => ErrorKind::InvalidPhoto,
            Self::SlotOutOfRange { .. } => ErrorKind::SlotOutOfRange,
            Self::InvalidCopyCount(_) => ErrorKind::InvalidCopyCount,
            Self::InvalidTiling(_) => ErrorKind::InvalidTiling,
            Self::PolicyRejected(_) => ErrorKind::PolicyRejected,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn report(&self) -> ErrorReport {
        ErrorReport {
            kind: self.kind(),
            message: self.to_string(),
        }
    }
}

/// Failures of the collaborators that run after the engine has produced output.
#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Upload rejected: {0}")]
    Upload(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_serialize_snake_case() {
        let report = EngineError::InvalidCopyCount(6).report();
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["kind"], "invalid_copy_count");
        assert!(json["message"].as_str().unwrap().contains("6"));
    }

    #[test]
    fn tiling_kind_is_distinct_from_copy_count() {
        let err = EngineError::InvalidTiling("margin too large".into());
        assert_eq!(err.kind(), ErrorKind::InvalidTiling);
        assert_eq!(serde_json::to_value(err.report()).unwrap()["kind"], "invalid_tiling");
    }

    #[test]
    fn slot_out_of_range_message() {
        let err = EngineError::SlotOutOfRange { slot: 4, available: 2 };
        assert_eq!(err.kind(), ErrorKind::SlotOutOfRange);
        assert_eq!(err.to_string(), "Slot 4 out of range: template has 2 slot(s)");
    }
}
