//! Default keyed-hash chain implementation of [`KeyScheme`].
//!
//! Material layout: `chain digest (32B) || pattern binding (32B)`.
//!
//! The chain digest starts from the master secret and absorbs one HMAC
//! step per delegation, so it cannot be walked backwards or sideways
//! without the parent material. The binding is a fold over the pattern's
//! segments - a literal tag with the literal bytes, a `*` tag, or a `**`
//! tag - keyed by the chain digest, so the material is bound to exactly
//! one pattern and unrelated bytes are detectable.
//!
//! This scheme is deterministic and non-cryptographic in the
//! confidentiality sense; see the crate docs for the threat model.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use canopy_core::{Identity, Pattern, PatternSegment};

use crate::error::{CryptoError, CryptoResult};
use crate::scheme::{KeyMaterial, KeyScheme};
use crate::secret::MasterSecret;

type HmacSha256 = Hmac<Sha256>;

/// Total material length: chain digest plus pattern binding.
const MATERIAL_LEN: usize = 64;

/// Segment tags absorbed into the binding fold.
const TAG_LITERAL: u8 = 0x00;
const TAG_ANY: u8 = 0x01;
const TAG_REST: u8 = 0x02;

/// Domain labels for the chain steps.
const ROOT_STEP: &[u8] = b"canopy.chain.root.v1";
const DELEGATION_STEP: &[u8] = b"canopy.chain.step.v1";
const BINDING_INIT: &[u8] = b"canopy.chain.binding.v1";

fn hmac32(key: &[u8], parts: &[&[u8]]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts keys of any length");
    for part in parts {
        mac.update(part);
    }
    mac.finalize().into_bytes().into()
}

/// The default keyed-hash chain scheme (HMAC-SHA256).
#[derive(Debug, Clone, Copy, Default)]
pub struct HmacChainScheme;

impl HmacChainScheme {
    /// Bind a chain digest to a pattern: fold over the pattern segments.
    fn binding(digest: &[u8; 32], pattern: &Pattern) -> [u8; 32] {
        let mut acc = hmac32(digest, &[BINDING_INIT]);
        for segment in pattern.segments() {
            acc = match segment {
                PatternSegment::Literal(lit) => hmac32(&acc, &[&[TAG_LITERAL], lit.as_bytes()]),
                PatternSegment::Any => hmac32(&acc, &[&[TAG_ANY]]),
                PatternSegment::Rest => hmac32(&acc, &[&[TAG_REST]]),
            };
        }
        acc
    }

    /// Recompute the binding fold along an identity's actual path,
    /// honoring the pattern's wildcard tags.
    ///
    /// When `pattern` covers `identity`, literal positions carry the same
    /// bytes in both, so this equals [`Self::binding`].
    fn binding_along(digest: &[u8; 32], pattern: &Pattern, identity: &Identity) -> [u8; 32] {
        let mut acc = hmac32(digest, &[BINDING_INIT]);
        for (segment, id_segment) in pattern.segments().iter().zip(identity.segments()) {
            match segment {
                PatternSegment::Literal(_) => {
                    acc = hmac32(&acc, &[&[TAG_LITERAL], id_segment.as_bytes()]);
                }
                PatternSegment::Any => {
                    acc = hmac32(&acc, &[&[TAG_ANY]]);
                }
                PatternSegment::Rest => {
                    acc = hmac32(&acc, &[&[TAG_REST]]);
                    break;
                }
            }
        }
        acc
    }

    fn split(material: &KeyMaterial) -> CryptoResult<(&[u8], &[u8])> {
        let bytes = material.as_bytes();
        if bytes.len() != MATERIAL_LEN {
            return Err(CryptoError::InvalidMaterialLength {
                expected: MATERIAL_LEN,
                actual: bytes.len(),
            });
        }
        Ok(bytes.split_at(32))
    }

    fn assemble(digest: [u8; 32], pattern: &Pattern) -> KeyMaterial {
        let binding = Self::binding(&digest, pattern);
        let mut bytes = Vec::with_capacity(MATERIAL_LEN);
        bytes.extend_from_slice(&digest);
        bytes.extend_from_slice(&binding);
        KeyMaterial::from_bytes(bytes)
    }
}

impl KeyScheme for HmacChainScheme {
    fn derive_root(&self, master: &MasterSecret, pattern: &Pattern) -> KeyMaterial {
        let digest = hmac32(master.expose(), &[ROOT_STEP, &pattern.canonical_bytes()]);
        Self::assemble(digest, pattern)
    }

    fn narrow(
        &self,
        parent: &KeyMaterial,
        parent_pattern: &Pattern,
        child_pattern: &Pattern,
    ) -> CryptoResult<KeyMaterial> {
        let (parent_digest, parent_binding) = Self::split(parent)?;
        let mut digest = [0u8; 32];
        digest.copy_from_slice(parent_digest);

        // Refuse to extend a chain whose own binding is broken; narrowing
        // would otherwise turn tampered material into a consistent child.
        let expected = Self::binding(&digest, parent_pattern);
        if !bool::from(expected.as_slice().ct_eq(parent_binding)) {
            return Err(CryptoError::ParentBindingInvalid);
        }

        if !child_pattern.refines(parent_pattern) {
            return Err(CryptoError::NotRefinement);
        }

        let child_digest = hmac32(
            &digest,
            &[DELEGATION_STEP, &child_pattern.canonical_bytes()],
        );
        Ok(Self::assemble(child_digest, child_pattern))
    }

    fn covers(&self, material: &KeyMaterial, pattern: &Pattern, identity: &Identity) -> bool {
        let Ok((digest_part, binding_part)) = Self::split(material) else {
            return false;
        };
        if !pattern.covers(identity) {
            return false;
        }
        let mut digest = [0u8; 32];
        digest.copy_from_slice(digest_part);
        let recomputed = Self::binding_along(&digest, pattern, identity);
        bool::from(recomputed.as_slice().ct_eq(binding_part))
    }
}
