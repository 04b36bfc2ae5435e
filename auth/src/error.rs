//! Error types for authentication and authorization.

use thiserror::Error;

/// Result type alias for authentication operations.
pub type Result<T> = std::result::Result<T, AuthError>;

/// Error taxonomy for authentication and authorization.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    // ═══════════════════════════════════════════════════════════
    // Authentication Errors
    // ═══════════════════════════════════════════════════════════
    /// No bearer token on the request.
    #[error("Access denied: no token provided")]
    MissingToken,

    /// Token failed signature, issuer or audience checks.
    #[error("Invalid token: {0}")]
    InvalidToken(String),

    /// Token is past its expiry.
    #[error("Token expired")]
    TokenExpired,

    /// Unknown email or wrong password.
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// The account exists but has been deactivated.
    #[error("Account is disabled")]
    AccountDisabled,

    // ═══════════════════════════════════════════════════════════
    // Authorization Errors
    // ═══════════════════════════════════════════════════════════
    /// Caller's role or identity does not permit the operation.
    #[error("Insufficient permissions: {0}")]
    Forbidden(String),

    // ═══════════════════════════════════════════════════════════
    // System Errors
    // ═══════════════════════════════════════════════════════════
    /// Hashing or verifying a password failed.
    #[error("Password hashing failed: {0}")]
    PasswordHash(String),

    /// Signing a token failed.
    #[error("Token signing failed: {0}")]
    Signing(String),

    /// The identity service could not be reached in time.
    #[error("Authentication service unavailable: {0}")]
    Unavailable(String),

    /// The identity service answered with something unexpected.
    #[error("Authentication service error: {0}")]
    Upstream(String),
}

impl AuthError {
    /// Returns `true` if the caller failed to authenticate (HTTP 401).
    ///
    /// # Examples
    ///
    /// ```
    /// # use dentalbook_auth::AuthError;
    /// assert!(AuthError::TokenExpired.is_unauthenticated());
    /// assert!(!AuthError::AccountDisabled.is_unauthenticated());
    /// ```
    #[must_use]
    pub const fn is_unauthenticated(&self) -> bool {
        matches!(
            self,
            Self::MissingToken | Self::InvalidToken(_) | Self::TokenExpired | Self::InvalidCredentials
        )
    }
}
