//! Engine error types.

use canopy_core::{ParseError, Timestamp};
use canopy_crypto::CryptoError;
use thiserror::Error;

/// A validity-window violation.
///
/// The delegation preconditions and the decision point each check a
/// different window relation; the payload says which one failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ExpiryViolation {
    /// The parent capability's window has already closed.
    #[error("parent capability expired at {not_after}, now is {now}")]
    ParentExpired {
        /// Parent's not-after bound.
        not_after: Timestamp,
        /// The caller-supplied current time.
        now: Timestamp,
    },

    /// The requested child expiry reaches past the parent's.
    #[error("requested expiry {requested} exceeds parent expiry {parent_not_after}")]
    BeyondParent {
        /// Requested not-after bound.
        requested: Timestamp,
        /// Parent's not-after bound.
        parent_not_after: Timestamp,
    },

    /// The requested expiry is not in the future.
    #[error("requested expiry {requested} is not after now ({now})")]
    AlreadyPast {
        /// Requested not-after bound.
        requested: Timestamp,
        /// The caller-supplied current time.
        now: Timestamp,
    },

    /// A timestamp fell outside a capability's validity window.
    #[error("capability window [{not_before}, {not_after}] does not contain {at}")]
    OutsideWindow {
        /// Window start.
        not_before: Timestamp,
        /// Window end.
        not_after: Timestamp,
        /// The queried instant.
        at: Timestamp,
    },
}

/// Errors surfaced by the capability engine.
///
/// Every error is returned to the immediate caller; nothing is retried
/// inside the engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// An identity or pattern fails the syntactic rules.
    #[error(transparent)]
    Malformed(#[from] ParseError),

    /// Capability bytes fail the wire format.
    #[error("malformed capability: {reason}")]
    MalformedCapability {
        /// What the parser rejected.
        reason: String,
    },

    /// Two patterns do not stand in a refinement relation either way.
    #[error("patterns are incomparable")]
    Incomparable,

    /// The requested child pattern does not refine the parent's pattern.
    #[error("child pattern does not refine parent pattern")]
    NotRefinement,

    /// A timestamp is outside a validity window.
    #[error(transparent)]
    Expired(ExpiryViolation),

    /// The capability or one of its ancestors is revoked.
    #[error("capability is revoked")]
    Revoked,

    /// The authority refuses a mint request.
    #[error("policy refusal: {reason}")]
    Policy {
        /// Why the authority refused.
        reason: String,
    },

    /// The key primitive disagrees with the structural match.
    ///
    /// Indicates tampered key material or a scheme bug; the decision
    /// point treats this as a deny and logs it at a distinct severity.
    #[error("key material disagrees with structural match")]
    KeyMismatch,

    /// The operation was canceled by its caller, either explicitly or by
    /// an expired deadline.
    #[error("operation canceled")]
    Canceled,

    /// A bounded resource is full.
    #[error("capacity exhausted: {what}")]
    Capacity {
        /// Which resource hit its bound.
        what: &'static str,
    },

    /// The revocation log or another persistence path failed.
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<CryptoError> for EngineError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::NotRefinement => Self::NotRefinement,
            CryptoError::ParentBindingInvalid | CryptoError::InvalidMaterialLength { .. } => {
                Self::KeyMismatch
            }
            CryptoError::IoError(msg) => Self::Storage(msg),
            CryptoError::InvalidSecretLength { .. } | CryptoError::InvalidHexEncoding => {
                Self::MalformedCapability {
                    reason: err.to_string(),
                }
            }
        }
    }
}

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;
