//! Error types for PIN sealing operations.
//!
//! Backend-specific failures (TPM response codes, credential-store statuses,
//! authentication outcomes) are mapped to this taxonomy at the backend
//! boundary; the dispatcher re-exports the kinds without further translation.

use thiserror::Error;

/// Result type for sealing operations.
pub type Result<T> = std::result::Result<T, HsmError>;

/// Errors that can occur while sealing, unsealing, or managing PINs.
#[derive(Debug, Error)]
pub enum HsmError {
    /// No backend on this host, or the operation is not meaningful for the
    /// active backend.
    #[error("no usable backend: {0}")]
    NotAvailable(String),

    /// A backend required initialization it did not receive.
    #[error("backend not initialized: {0}")]
    NotInitialized(String),

    /// Identity name, PIN length, or argument rejected at the boundary.
    #[error("invalid identity or argument: {0}")]
    InvalidIdentity(String),

    /// The backend rejected the seal for an unclassified reason.
    #[error("failed to seal PIN: {0}")]
    SealFailed(String),

    /// The backend rejected the unseal for an unclassified reason.
    #[error("failed to unseal PIN: {0}")]
    UnsealFailed(String),

    /// No sealed artifact for this identity.
    #[error("no PIN stored for identity '{0}'")]
    NotFound(String),

    /// Wrong credential, biometric, or authorization.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// The TPM policy session rejected the unseal because the platform boot
    /// state changed since the PIN was sealed.
    #[error("platform boot state changed since the PIN was sealed")]
    PcrMismatch,

    /// Out of memory, or backend resource exhaustion.
    #[error("backend resources exhausted: {0}")]
    Memory(String),

    /// Filesystem or credential-store I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Host permission denied (e.g. no access to the TPM device).
    #[error("permission denied: {0}")]
    Permission(String),

    /// The operation exceeded an internal deadline or backend retry loop.
    #[error("operation timed out: {0}")]
    Timeout(String),

    /// The user dismissed the authentication prompt.
    #[error("operation cancelled by user")]
    Cancelled,

    /// The secure element is not ready or locked.
    #[error("secure element not ready: {0}")]
    SeNotReady(String),

    /// Unexpected condition; a bug.
    #[error("internal error: {0}")]
    Internal(String),
}

impl HsmError {
    /// Short stable name of the error kind, used in debug traces.
    pub fn kind(&self) -> &'static str {
        match self {
            HsmError::NotAvailable(_) => "not_available",
            HsmError::NotInitialized(_) => "not_initialized",
            HsmError::InvalidIdentity(_) => "invalid_identity",
            HsmError::SealFailed(_) => "seal_failed",
            HsmError::UnsealFailed(_) => "unseal_failed",
            HsmError::NotFound(_) => "not_found",
            HsmError::AuthFailed(_) => "auth_failed",
            HsmError::PcrMismatch => "pcr_mismatch",
            HsmError::Memory(_) => "memory",
            HsmError::Io(_) => "io",
            HsmError::Permission(_) => "permission",
            HsmError::Timeout(_) => "timeout",
            HsmError::Cancelled => "cancelled",
            HsmError::SeNotReady(_) => "se_not_ready",
            HsmError::Internal(_) => "internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_names_are_stable() {
        assert_eq!(HsmError::PcrMismatch.kind(), "pcr_mismatch");
        assert_eq!(HsmError::NotFound("x".into()).kind(), "not_found");
        assert_eq!(HsmError::Cancelled.kind(), "cancelled");
    }

    #[test]
    fn messages_name_the_identity() {
        let err = HsmError::NotFound("work".into());
        assert!(err.to_string().contains("work"));
    }
}
