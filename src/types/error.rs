//! Error types for AutoScape
//!
//! One enum covers both the business failures a caller can act on
//! (insufficient credits, generation failure, unknown design) and the
//! ambient failures of the service itself (database, config, auth).

use hyper::StatusCode;

/// Main error type for AutoScape operations
#[derive(Debug, thiserror::Error)]
pub enum AutoscapeError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// The principal has no credit left. Recoverable by purchasing more.
    #[error("Insufficient credits")]
    InsufficientCredits,

    /// External generation call failed or timed out. The reservation is
    /// refunded before this surfaces; retry is user-initiated only.
    #[error("Generation failed: {0}")]
    GenerationFailed(String),

    /// Persisting a generated design failed. Never surfaced as a hard HTTP
    /// error: the flow degrades to a session-only hand-off instead.
    #[error("Persistence failed: {0}")]
    PersistenceFailed(String),

    /// A reservation was asked to leave a terminal state. Invariant
    /// violation: logged, never shown to the end user as a blocking error.
    #[error("Invalid reservation state: {0}")]
    InvalidReservationState(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Authentication error: {0}")]
    Auth(String),
}

impl AutoscapeError {
    /// Convert error to HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::InsufficientCredits => StatusCode::PAYMENT_REQUIRED,
            Self::GenerationFailed(_) => StatusCode::BAD_GATEWAY,
            Self::PersistenceFailed(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::InvalidReservationState(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Database(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Http(_) => StatusCode::BAD_REQUEST,
            Self::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Auth(_) => StatusCode::UNAUTHORIZED,
        }
    }

    /// Convert to status code and body tuple for HTTP response
    pub fn into_status_code_and_body(self) -> (StatusCode, String) {
        let status = self.status_code();
        let body = self.to_string();
        (status, body)
    }

    /// Machine-readable error code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::NotFound(_) => "NOT_FOUND",
            Self::InsufficientCredits => "INSUFFICIENT_CREDITS",
            Self::GenerationFailed(_) => "GENERATION_FAILED",
            Self::PersistenceFailed(_) => "PERSISTENCE_FAILED",
            Self::InvalidReservationState(_) => "INVALID_RESERVATION_STATE",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
            Self::Http(_) => "HTTP_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Auth(_) => "AUTH_ERROR",
        }
    }
}

// Implement From conversions for common error types

impl From<std::io::Error> for AutoscapeError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for AutoscapeError {
    fn from(err: serde_json::Error) -> Self {
        Self::BadRequest(format!("JSON error: {}", err))
    }
}

impl From<hyper::Error> for AutoscapeError {
    fn from(err: hyper::Error) -> Self {
        Self::Internal(format!("HTTP error: {}", err))
    }
}

impl From<reqwest::Error> for AutoscapeError {
    fn from(err: reqwest::Error) -> Self {
        Self::Http(err.to_string())
    }
}

impl From<mongodb::error::Error> for AutoscapeError {
    fn from(err: mongodb::error::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<jsonwebtoken::errors::Error> for AutoscapeError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        Self::Unauthorized(format!("JWT error: {}", err))
    }
}

/// Result type alias for AutoScape operations
pub type Result<T> = std::result::Result<T, AutoscapeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            AutoscapeError::InsufficientCredits.status_code(),
            StatusCode::PAYMENT_REQUIRED
        );
        assert_eq!(
            AutoscapeError::GenerationFailed("timeout".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            AutoscapeError::NotFound("design".into()).status_code(),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(AutoscapeError::InsufficientCredits.code(), "INSUFFICIENT_CREDITS");
        assert_eq!(
            AutoscapeError::InvalidReservationState("double refund".into()).code(),
            "INVALID_RESERVATION_STATE"
        );
    }
}
