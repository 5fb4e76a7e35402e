//! Canopy Crypto - Key primitive and fingerprinting for the capability
//! engine.
//!
//! This crate provides:
//! - BLAKE3 fingerprints over capability fields
//! - Master secret handling with zeroize-on-drop and careful file I/O
//! - The [`KeyScheme`] trait: `derive_root`, `narrow`, `covers`
//! - The default [`HmacChainScheme`], a keyed-hash chain over patterns
//!
//! # Security Model
//!
//! The default scheme is **not** an encryption primitive. It binds key
//! material to a pattern so that tampering is detectable and narrowing is
//! one-way without the parent material, but it offers no confidentiality
//! against a holder who shares bytes. Callers that need confidentiality
//! slot a real hierarchical primitive (HIBE or equivalent) behind
//! [`KeyScheme`]; the trait's contracts are the whole interface.
//!
//! # Example
//!
//! ```
//! use canopy_core::{Identity, Pattern};
//! use canopy_crypto::{HmacChainScheme, KeyScheme, MasterSecret};
//!
//! let master = MasterSecret::generate();
//! let scheme = HmacChainScheme::default();
//!
//! let root = Pattern::parse("facility/**").unwrap();
//! let material = scheme.derive_root(&master, &root);
//!
//! let identity = Identity::parse("facility/zone-a").unwrap();
//! assert!(scheme.covers(&material, &root, &identity));
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod chain;
mod error;
mod fingerprint;
mod scheme;
mod secret;

pub use chain::HmacChainScheme;
pub use error::{CryptoError, CryptoResult};
pub use fingerprint::Fingerprint;
pub use scheme::{KeyMaterial, KeyScheme};
pub use secret::MasterSecret;
