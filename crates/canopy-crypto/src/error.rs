//! Cryptographic error types.

use thiserror::Error;

/// Errors that can occur during key derivation and verification.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    /// Invalid secret length.
    #[error("invalid secret length: expected {expected}, got {actual}")]
    InvalidSecretLength {
        /// Expected length in bytes.
        expected: usize,
        /// Actual length in bytes.
        actual: usize,
    },

    /// Key material has the wrong shape for the active scheme.
    #[error("invalid key material length: expected {expected}, got {actual}")]
    InvalidMaterialLength {
        /// Expected length in bytes.
        expected: usize,
        /// Actual length in bytes.
        actual: usize,
    },

    /// Parent key material fails its own pattern binding.
    ///
    /// Narrowing from tampered or mismatched material would launder the
    /// tampering into a fresh, internally-consistent child.
    #[error("parent key material is not bound to the parent pattern")]
    ParentBindingInvalid,

    /// The requested child pattern does not refine the parent pattern.
    #[error("child pattern does not refine parent pattern")]
    NotRefinement,

    /// Invalid hex encoding.
    #[error("invalid hex encoding")]
    InvalidHexEncoding,

    /// I/O error (e.g. reading/writing the master secret file).
    #[error("I/O error: {0}")]
    IoError(String),
}

/// Result type for cryptographic operations.
pub type CryptoResult<T> = Result<T, CryptoError>;
