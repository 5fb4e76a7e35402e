//! The key primitive interface.

use std::fmt;

use canopy_core::{Identity, Pattern};
use serde::{Deserialize, Serialize};

use crate::error::CryptoResult;
use crate::secret::MasterSecret;

/// Opaque key material carried inside a capability.
///
/// The engine never interprets these bytes; only the active [`KeyScheme`]
/// does. Equality is byte equality.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct KeyMaterial(Vec<u8>);

impl KeyMaterial {
    /// Wrap raw scheme output.
    #[must_use]
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// The raw bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when the material is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let preview = hex::encode(&self.0[..self.0.len().min(6)]);
        write!(f, "KeyMaterial({preview}.., {} bytes)", self.0.len())
    }
}

impl TryFrom<String> for KeyMaterial {
    type Error = crate::CryptoError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        hex::decode(&value)
            .map(Self)
            .map_err(|_| crate::CryptoError::InvalidHexEncoding)
    }
}

impl From<KeyMaterial> for String {
    fn from(value: KeyMaterial) -> Self {
        hex::encode(value.0)
    }
}

/// The pluggable prefix-capability primitive.
///
/// The engine is structured so that a real HIBE (or any equivalent
/// hierarchical primitive) can replace the default keyed-hash
/// implementation behind this one interface. Implementations MUST be
/// deterministic given equal inputs, and MUST keep `covers` consistent
/// with the structural coverage predicate: `covers` never returns `true`
/// for an identity the pattern does not cover.
pub trait KeyScheme: Send + Sync {
    /// Derive root key material for a pattern from the master secret.
    ///
    /// Runs only inside the authority's trust boundary.
    fn derive_root(&self, master: &MasterSecret, pattern: &Pattern) -> KeyMaterial;

    /// Derive child material for `child_pattern` from its parent.
    ///
    /// Precondition: `child_pattern` refines `parent_pattern`.
    ///
    /// # Errors
    ///
    /// Returns an error if the precondition fails or the parent material
    /// is malformed for this scheme.
    fn narrow(
        &self,
        parent: &KeyMaterial,
        parent_pattern: &Pattern,
        child_pattern: &Pattern,
    ) -> CryptoResult<KeyMaterial>;

    /// Does the material prove authority over `identity` under `pattern`?
    ///
    /// Must agree with structural matching: the material acts as a proof
    /// of the pattern, never as a wider grant.
    fn covers(&self, material: &KeyMaterial, pattern: &Pattern, identity: &Identity) -> bool;
}
