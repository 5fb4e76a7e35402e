//! Canopy Capabilities - Authority, delegation, revocation and access
//! decisions.
//!
//! This crate is the engine proper:
//! - [`Capability`]: the immutable grant record and its wire codec
//! - [`Authority`]: master-secret custody and policy-checked root minting
//! - [`DelegationService`]: narrowing-only issuance with single-flight
//!   derivation
//! - [`CapabilityStore`]: issued-capability cache with LRU eviction
//! - [`RevocationRegistry`]: exact and prefix revocation with an
//!   append-only log
//! - [`AccessDecisionPoint`]: the one authoritative allow/deny entry
//! - [`Engine`]: a wired-up context for embedders
//!
//! # Example
//!
//! ```
//! use canopy_capabilities::{CallContext, Engine, EngineConfig};
//! use canopy_core::{Identity, Pattern, Timestamp};
//! use canopy_crypto::MasterSecret;
//!
//! let engine = Engine::new(EngineConfig::default(), MasterSecret::generate()).unwrap();
//! let ctx = CallContext::background();
//!
//! let root = engine
//!     .mint_root(
//!         &Pattern::parse("facility/zone-a/bin/*/sensor-data/**").unwrap(),
//!         Timestamp::from_millis(0),
//!         Timestamp::from_millis(3_600_000),
//!         &ctx,
//!     )
//!     .unwrap();
//!
//! let identity = Identity::parse("facility/zone-a/bin/BIN-001/sensor-data/fill-level").unwrap();
//! let decision = engine
//!     .decide(&root, &identity, Timestamp::from_millis(1_000), &ctx)
//!     .unwrap();
//! assert!(decision.is_allow());
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod authority;
mod capability;
mod config;
mod context;
mod decision;
mod delegation;
mod engine;
mod error;
mod metrics;
mod revocation;
mod store;

pub use authority::{Authority, AuthorityPolicy, KeyDesk};
pub use capability::{Capability, MAX_CHAIN_LEN, WIRE_VERSION};
pub use config::{
    EngineConfig, DEFAULT_MAX_INFLIGHT, DEFAULT_MAX_VALIDITY_MS, DEFAULT_STORE_CAPACITY,
    DEFAULT_SWEEP_INTERVAL_MS,
};
pub use context::CallContext;
pub use decision::{AccessDecisionPoint, Decision, DenyReason};
pub use delegation::DelegationService;
pub use engine::{Engine, Sweeper};
pub use error::{EngineError, EngineResult, ExpiryViolation};
pub use metrics::{EngineMetrics, MetricsSnapshot};
pub use revocation::{RevocationRegistry, RevocationTarget};
pub use store::{CapabilityStore, IssueKey};
