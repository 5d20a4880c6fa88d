//! Error types shared across the crate.

use thiserror::Error;

/// Failures reported by a signaling store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store could not be reached or refused the operation.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// No document exists at the given path.
    #[error("document not found: {0}")]
    NotFound(String),

    /// A document could not be converted to or from its typed form.
    #[error("malformed document: {0}")]
    Malformed(String),
}

/// Failures reported by a peer transport.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("peer connection error: {0}")]
    Rtc(#[from] webrtc::Error),

    #[error("invalid session description: {0}")]
    InvalidDescription(String),

    /// The transport refused an operation in its current state.
    #[error("operation rejected: {0}")]
    Rejected(String),
}

/// Failures while acquiring local capture.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MediaError {
    #[error("permission to capture audio was denied")]
    PermissionDenied,

    #[error("no audio capture device available")]
    NoDevice,
}

/// Failures while loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Errors surfaced by the signaling controller to its caller.
#[derive(Error, Debug)]
pub enum CallError {
    #[error("media acquisition failed: {0}")]
    MediaAcquisition(#[from] MediaError),

    #[error("call session not found: {0}")]
    SessionNotFound(String),

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("signaling error: {0}")]
    Signaling(String),

    #[error("call id must not be empty")]
    InvalidCallId,

    /// Another callee already published an answer for this session.
    #[error("call {0} already has an answer")]
    AlreadyAnswered(String),

    #[error("operation not allowed in state {0}")]
    InvalidState(String),
}

impl From<StoreError> for CallError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(path) => CallError::SessionNotFound(path),
            StoreError::Unavailable(msg) => CallError::StoreUnavailable(msg),
            StoreError::Malformed(msg) => CallError::Signaling(msg),
        }
    }
}

impl From<TransportError> for CallError {
    fn from(err: TransportError) -> Self {
        CallError::Signaling(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CallError>;
