/// Security-related errors: JWT issuance/validation and engine plumbing.
#[derive(Debug)]
pub enum SecurityError {
    /// The Authorization header or body `jwt` field is missing.
    MissingAuthHeader,
    /// The authorization scheme is not "Bearer".
    InvalidAuthScheme,
    /// The JWT token is invalid (malformed, bad signature, etc.).
    InvalidToken(String),
    /// The JWT token has expired.
    TokenExpired,
    /// Token validation failed (issuer or other claim mismatch).
    ValidationFailed(String),
}

impl std::fmt::Display for SecurityError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SecurityError::MissingAuthHeader => write!(f, "missing bearer token"),
            SecurityError::InvalidAuthScheme => write!(f, "invalid authorization scheme"),
            SecurityError::InvalidToken(msg) => write!(f, "invalid token: {msg}"),
            SecurityError::TokenExpired => write!(f, "token expired"),
            SecurityError::ValidationFailed(msg) => write!(f, "token validation failed: {msg}"),
        }
    }
}

impl std::error::Error for SecurityError {}

impl SecurityError {
    /// Canonical error code per §7 (`jwt_required` / `jwt_invalid`).
    pub fn error_code(&self) -> i32 {
        match self {
            SecurityError::MissingAuthHeader => 2002,
            _ => 2003,
        }
    }
}

impl From<SecurityError> for keystone_core::AppError {
    fn from(err: SecurityError) -> Self {
        keystone_core::AppError::Unauthorized(err.to_string())
    }
}
