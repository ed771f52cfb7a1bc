use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Machine-readable error codes for the HTTP API.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidType,
    InvalidName,
    InvalidPayload,
    NotFound,
    Conflict,
    SignerNotEligible,
    MissingRequiredFile,
    VerificationFailed,
    ToolFailed,
    ToolTimeout,
    IoError,
    Internal,
}

impl ErrorCode {
    /// Suggested HTTP status code for this error.
    /// Transport-agnostic (returns u16, not an axum type).
    pub fn http_status(&self) -> u16 {
        match self {
            Self::InvalidType | Self::InvalidName | Self::InvalidPayload => 400,
            Self::NotFound => 404,
            Self::Conflict => 409,
            Self::SignerNotEligible | Self::VerificationFailed => 422,
            Self::ToolTimeout => 504,
            Self::MissingRequiredFile | Self::ToolFailed | Self::IoError | Self::Internal => 500,
        }
    }
}
