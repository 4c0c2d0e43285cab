//! The dispatcher's own closed error-code set (§7). Distinct from
//! `keystone_core::AppError`, which covers the handful of endpoints outside
//! the `/do` envelope — every pipeline stage here maps its failures onto one
//! of these codes plus a caller-facing message, never onto `AppError`.

use axum::http::StatusCode;
use keystone_security::SecurityError;
use keystone_storage::StorageError;

use crate::envelope::DispatchResponse;

/// One entry of the closed error-code set. Numeric values are stable once
/// shipped — clients branch on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchError {
    BadRequest,
    Validation,
    JwtRequired,
    JwtInvalid,
    Forbidden,
    NotFound,
    VersionConflict,
    InvalidState,
    UnknownAction,
    RateLimited,
    Storage,
    Internal,
}

impl DispatchError {
    pub const fn code(self) -> i32 {
        match self {
            DispatchError::BadRequest => 1000,
            DispatchError::Validation => 1001,
            DispatchError::UnknownAction => 1002,
            DispatchError::JwtRequired => 2002,
            DispatchError::JwtInvalid => 2003,
            DispatchError::Forbidden => 2100,
            DispatchError::RateLimited => 2200,
            DispatchError::NotFound => 3000,
            DispatchError::VersionConflict => 3001,
            DispatchError::InvalidState => 3002,
            DispatchError::Storage => 5000,
            DispatchError::Internal => 5001,
        }
    }

    pub const fn http_status(self) -> StatusCode {
        match self {
            DispatchError::BadRequest | DispatchError::Validation | DispatchError::UnknownAction => StatusCode::BAD_REQUEST,
            DispatchError::JwtRequired | DispatchError::JwtInvalid => StatusCode::UNAUTHORIZED,
            DispatchError::Forbidden => StatusCode::FORBIDDEN,
            DispatchError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            DispatchError::NotFound => StatusCode::NOT_FOUND,
            DispatchError::VersionConflict | DispatchError::InvalidState => StatusCode::CONFLICT,
            DispatchError::Storage | DispatchError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn with_message(self, message: impl Into<String>) -> DispatchFailure {
        DispatchFailure {
            kind: self,
            message: message.into(),
        }
    }
}

/// A [`DispatchError`] plus the stable, displayable message sent to the client.
#[derive(Debug, Clone)]
pub struct DispatchFailure {
    pub kind: DispatchError,
    pub message: String,
}

impl DispatchFailure {
    pub fn http_status(&self) -> StatusCode {
        self.kind.http_status()
    }

    pub fn into_response(self) -> DispatchResponse {
        DispatchResponse::error(self.kind.code(), self.message)
    }
}

impl std::fmt::Display for DispatchFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for DispatchFailure {}

impl From<SecurityError> for DispatchFailure {
    fn from(err: SecurityError) -> Self {
        let kind = if err.error_code() == 2002 {
            DispatchError::JwtRequired
        } else {
            DispatchError::JwtInvalid
        };
        kind.with_message(err.to_string())
    }
}

impl From<StorageError> for DispatchFailure {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(msg) => DispatchError::NotFound.with_message(msg),
            StorageError::VersionConflict { id, expected_version } => DispatchError::VersionConflict
                .with_message(format!("version conflict on {id}, expected version {expected_version}")),
            StorageError::Timeout => DispatchError::Storage.with_message("storage operation timed out"),
            StorageError::Database(e) => DispatchError::Storage.with_message(e.to_string()),
            StorageError::Other(msg) => DispatchError::Internal.with_message(msg),
        }
    }
}

pub type DispatchResult<T> = Result<T, DispatchFailure>;
