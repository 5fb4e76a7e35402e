//! Prelude module - commonly used types for convenient import.
//!
//! Use `use canopy_crypto::prelude::*;` to import all essential types.
//!
//! # Example
//!
//! ```rust
//! use canopy_core::Pattern;
//! use canopy_crypto::prelude::*;
//!
//! let master = MasterSecret::generate();
//! let scheme = HmacChainScheme::default();
//! let material = scheme.derive_root(&master, &Pattern::parse("a/**").unwrap());
//! assert!(!material.is_empty());
//! ```

// Errors
pub use crate::{CryptoError, CryptoResult};

// Fingerprints
pub use crate::Fingerprint;

// Key primitive
pub use crate::{HmacChainScheme, KeyMaterial, KeyScheme, MasterSecret};
