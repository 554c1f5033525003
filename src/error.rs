use serde::Serialize;
use thiserror::Error;

use crate::models::SessionStatus;

pub type SessionResult<T> = Result<T, SessionError>;

/// Why the capture device could not be used.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "camelCase")]
pub enum DeviceError {
    #[error("camera permission was denied")]
    PermissionDenied,
    #[error("no camera device was found")]
    NotFound,
    #[error("camera is in use by another application")]
    Busy,
    #[error("camera access was revoked during the session")]
    Revoked,
    #[error("camera failure: {0}")]
    Other(String),
}

/// Image limits. Each variant carries what the test-taker needs to adjust.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QuotaError {
    #[error("You can upload up to {max} images per answer.")]
    TooManyImages { max: usize },
    #[error("Image size must be less than {max_kb}KB. Current size: {size_kb}KB")]
    ImageTooLarge { size_kb: u64, max_kb: u64 },
    #[error("Total image size limit reached ({max_kb}KB). You can upload ~{remaining_kb}KB more.")]
    SessionLimitReached { max_kb: u64, remaining_kb: u64 },
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Please type your answer before submitting.")]
    EmptyAnswer,
    #[error("Please select an image file (got {mime})")]
    NotAnImage { mime: String },
    #[error("no image with url {url} in this answer")]
    ImageNotFound { url: String },
    #[error("unknown question {0}")]
    UnknownQuestion(String),
    #[error("a reference snapshot must be captured before starting")]
    MissingReferenceSnapshot,
    #[error("Please select both domain and section")]
    MissingSelection,
}

/// Failures reported by the exam server or the transport in front of it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("not authorised; please sign in again")]
    Unauthorized,
    #[error("server rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("network failure: {0}")]
    Transport(String),
    #[error("unexpected server response: {0}")]
    Decode(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error(transparent)]
    Quota(#[from] QuotaError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Network(#[from] BackendError),
    #[error("Enable camera to continue test")]
    PermissionRequired,
    #[error("operation not allowed while session is {actual:?}")]
    InvalidState { actual: SessionStatus },
    #[error("the session has already been submitted")]
    Closed,
}

impl SessionError {
    /// Network failures leave confirmed state untouched and may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SessionError::Network(BackendError::Transport(_)))
            || matches!(
                self,
                SessionError::Network(BackendError::Rejected { status, .. }) if *status >= 500
            )
    }
}
