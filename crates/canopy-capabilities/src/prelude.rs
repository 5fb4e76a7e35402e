//! Prelude module - commonly used types for convenient import.
//!
//! Use `use canopy_capabilities::prelude::*;` to import all essential
//! types.
//!
//! # Example
//!
//! ```rust
//! use canopy_capabilities::prelude::*;
//! use canopy_core::{Pattern, Timestamp};
//! use canopy_crypto::MasterSecret;
//!
//! let engine = Engine::new(EngineConfig::default(), MasterSecret::generate()).unwrap();
//! let root = engine
//!     .mint_root(
//!         &Pattern::parse("a/**").unwrap(),
//!         Timestamp::from_millis(0),
//!         Timestamp::from_millis(1_000),
//!         &CallContext::background(),
//!     )
//!     .unwrap();
//! assert!(root.issuer_chain().is_empty());
//! ```

// Errors
pub use crate::{EngineError, EngineResult, ExpiryViolation};

// The capability record
pub use crate::Capability;

// Engine components
pub use crate::{
    AccessDecisionPoint, Authority, AuthorityPolicy, CapabilityStore, DelegationService, Engine,
    KeyDesk, RevocationRegistry, RevocationTarget,
};

// Decisions
pub use crate::{Decision, DenyReason};

// Configuration and plumbing
pub use crate::{CallContext, EngineConfig, EngineMetrics};
