//! CA domain error types.

use mrcert_common::error::ErrorCode;

use crate::bundle::FileRole;

#[derive(Debug, thiserror::Error)]
pub enum CaError {
    #[error("invalid certificate name: {0:?}")]
    InvalidName(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("cannot store certificate without its {role} file")]
    MissingRequiredFile { role: FileRole },

    #[error("certificate already exists: {0}")]
    AlreadyExists(String),

    #[error("certificate not found: {0}")]
    NotFound(String),

    #[error("certificate {name} cannot sign this request: {reason}")]
    SignerNotEligible { name: String, reason: String },

    #[error("{command} exited with {status}: {stderr}")]
    Tool {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("certificate verification failed: {stderr}")]
    Verification { stderr: String },

    #[error("{command} timed out")]
    Timeout { command: String },

    #[error("something went wrong, this should have never happened: {0}")]
    Invariant(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<&CaError> for ErrorCode {
    fn from(e: &CaError) -> Self {
        match e {
            CaError::InvalidName(_) => ErrorCode::InvalidName,
            CaError::InvalidRequest(_) => ErrorCode::InvalidPayload,
            CaError::MissingRequiredFile { .. } => ErrorCode::MissingRequiredFile,
            CaError::AlreadyExists(_) => ErrorCode::Conflict,
            CaError::NotFound(_) => ErrorCode::NotFound,
            CaError::SignerNotEligible { .. } => ErrorCode::SignerNotEligible,
            CaError::Tool { .. } => ErrorCode::ToolFailed,
            CaError::Verification { .. } => ErrorCode::VerificationFailed,
            CaError::Timeout { .. } => ErrorCode::ToolTimeout,
            CaError::Io(_) => ErrorCode::IoError,
            CaError::Invariant(_) | CaError::Json(_) => ErrorCode::Internal,
        }
    }
}

impl CaError {
    /// Whether this error signals a broken internal invariant rather than
    /// an ordinary operational failure.
    pub fn is_invariant(&self) -> bool {
        matches!(self, CaError::Invariant(_))
    }
}
