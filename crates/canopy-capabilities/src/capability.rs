//! The capability record and its wire codec.
//!
//! Wire format (v1):
//!
//! ```text
//! version(1B) || pattern_len(2B BE) || pattern_bytes
//!            || not_before(8B BE unix ms) || not_after(8B BE unix ms)
//!            || chain_len(1B) || chain_fingerprints(32B each)
//!            || material_len(2B BE) || material_bytes
//!            || fingerprint(32B)
//! ```
//!
//! The fingerprint is a digest over every field before the key material;
//! the material is excluded so that two capabilities with equal
//! fingerprints are interchangeable regardless of which scheme produced
//! their bytes. The parser recomputes it and rejects mismatches, so a
//! serialized capability cannot be reissued with edited fields.

use canopy_core::{Identity, Limits, Pattern, Timestamp};
use canopy_crypto::{Fingerprint, KeyMaterial};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult, ExpiryViolation};

/// Current wire-format version byte.
pub const WIRE_VERSION: u8 = 0x01;

/// Fingerprint domain label for capability records.
const FINGERPRINT_DOMAIN: &str = "canopy.capability.v1";

/// Longest issuer chain the wire format can carry.
pub const MAX_CHAIN_LEN: usize = u8::MAX as usize;

fn malformed(reason: impl Into<String>) -> EngineError {
    EngineError::MalformedCapability {
        reason: reason.into(),
    }
}

/// An immutable grant: a pattern, a validity window, the chain of issuers
/// that produced it, and the key material that proves it.
///
/// Capabilities are only built by the authority ([`crate::Authority`]) and
/// the delegation service ([`crate::DelegationService`]); embedders that
/// receive one over the wire reconstruct it with [`Capability::from_bytes`],
/// which verifies the trailing fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capability {
    pattern: Pattern,
    not_before: Timestamp,
    not_after: Timestamp,
    issuer_chain: Vec<Fingerprint>,
    material: KeyMaterial,
    fingerprint: Fingerprint,
}

impl Capability {
    /// Assemble a capability, computing its fingerprint.
    ///
    /// Crate-internal: issuance goes through the authority or the
    /// delegation service, which establish the record's invariants.
    pub(crate) fn assemble(
        pattern: Pattern,
        not_before: Timestamp,
        not_after: Timestamp,
        issuer_chain: Vec<Fingerprint>,
        material: KeyMaterial,
    ) -> EngineResult<Self> {
        if issuer_chain.len() > MAX_CHAIN_LEN {
            return Err(malformed(format!(
                "issuer chain length {} exceeds {MAX_CHAIN_LEN}",
                issuer_chain.len()
            )));
        }
        let fingerprint =
            Self::compute_fingerprint(&pattern, not_before, not_after, &issuer_chain);
        Ok(Self {
            pattern,
            not_before,
            not_after,
            issuer_chain,
            material,
            fingerprint,
        })
    }

    /// The digest over the non-material fields.
    fn compute_fingerprint(
        pattern: &Pattern,
        not_before: Timestamp,
        not_after: Timestamp,
        issuer_chain: &[Fingerprint],
    ) -> Fingerprint {
        let pattern_bytes = pattern.canonical_bytes();
        let nb = not_before.to_be_bytes();
        let na = not_after.to_be_bytes();
        let chain_len = [u8::try_from(issuer_chain.len()).unwrap_or(u8::MAX)];

        let mut parts: Vec<&[u8]> = vec![&[WIRE_VERSION], &pattern_bytes, &nb, &na, &chain_len];
        for fp in issuer_chain {
            parts.push(fp.as_bytes());
        }
        Fingerprint::digest(FINGERPRINT_DOMAIN, &parts)
    }

    /// The authorized pattern.
    #[must_use]
    pub fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    /// Start of the validity window.
    #[must_use]
    pub fn not_before(&self) -> Timestamp {
        self.not_before
    }

    /// End of the validity window.
    #[must_use]
    pub fn not_after(&self) -> Timestamp {
        self.not_after
    }

    /// Fingerprints from the root capability down to this one's parent.
    ///
    /// Empty for root capabilities.
    #[must_use]
    pub fn issuer_chain(&self) -> &[Fingerprint] {
        &self.issuer_chain
    }

    /// The fingerprint of the capability this one was derived from, if any.
    #[must_use]
    pub fn parent_fingerprint(&self) -> Option<Fingerprint> {
        self.issuer_chain.last().copied()
    }

    /// The opaque key material proving this grant.
    #[must_use]
    pub fn material(&self) -> &KeyMaterial {
        &self.material
    }

    /// This capability's fingerprint.
    #[must_use]
    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    /// Is `at` inside the validity window?
    #[must_use]
    pub fn in_window(&self, at: Timestamp) -> bool {
        self.not_before <= at && at <= self.not_after
    }

    /// Error out unless `at` is inside the validity window.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Expired`].
    pub fn check_window(&self, at: Timestamp) -> EngineResult<()> {
        if self.in_window(at) {
            return Ok(());
        }
        Err(EngineError::Expired(ExpiryViolation::OutsideWindow {
            not_before: self.not_before,
            not_after: self.not_after,
            at,
        }))
    }

    /// Structural checks a presented capability must pass before anything
    /// else looks at it: depth bounds and window ordering.
    ///
    /// The pattern grammar (terminal `**`, segment alphabet) is enforced
    /// by construction in [`Pattern`]; what remains is the engine's own
    /// depth limit, which may be narrower than the parser default.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Malformed`] or
    /// [`EngineError::MalformedCapability`].
    pub fn check_structure(&self, limits: &Limits) -> EngineResult<()> {
        if self.pattern.len() > limits.max_depth {
            return Err(EngineError::Malformed(
                canopy_core::ParseError::DepthExceeded {
                    depth: self.pattern.len(),
                    max: limits.max_depth,
                },
            ));
        }
        if self.not_before > self.not_after {
            return Err(malformed(format!(
                "window start {} is after window end {}",
                self.not_before, self.not_after
            )));
        }
        Ok(())
    }

    /// Serialize to the deterministic wire format.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn to_bytes(&self) -> Vec<u8> {
        let pattern_bytes = self.pattern.canonical_bytes();
        let material_bytes = self.material.as_bytes();

        let mut out = Vec::with_capacity(
            pattern_bytes
                .len()
                .saturating_add(self.issuer_chain.len().saturating_mul(Fingerprint::LEN))
                .saturating_add(material_bytes.len())
                .saturating_add(64),
        );
        out.push(WIRE_VERSION);
        // Lengths are bounded at assembly: patterns by MaxDepth times the
        // segment alphabet, chains by MAX_CHAIN_LEN, material by the scheme.
        out.extend_from_slice(&(pattern_bytes.len() as u16).to_be_bytes());
        out.extend_from_slice(&pattern_bytes);
        out.extend_from_slice(&self.not_before.to_be_bytes());
        out.extend_from_slice(&self.not_after.to_be_bytes());
        out.push(self.issuer_chain.len() as u8);
        for fp in &self.issuer_chain {
            out.extend_from_slice(fp.as_bytes());
        }
        out.extend_from_slice(&(material_bytes.len() as u16).to_be_bytes());
        out.extend_from_slice(material_bytes);
        out.extend_from_slice(self.fingerprint.as_bytes());
        out
    }

    /// Parse and verify a capability from its wire bytes.
    ///
    /// Rejects unknown versions, truncated or oversized input, patterns
    /// that fail the grammar or `limits`, and any record whose trailing
    /// fingerprint does not match a recomputation from the parsed fields.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::MalformedCapability`] or
    /// [`EngineError::Malformed`].
    pub fn from_bytes(bytes: &[u8], limits: &Limits) -> EngineResult<Self> {
        let mut reader = Reader::new(bytes);

        let version = reader.u8("version")?;
        if version != WIRE_VERSION {
            return Err(malformed(format!("unknown version {version:#04x}")));
        }

        let pattern_len = reader.u16("pattern length")? as usize;
        let pattern_bytes = reader.take(pattern_len, "pattern")?;
        let pattern_str = std::str::from_utf8(pattern_bytes)
            .map_err(|_| malformed("pattern is not valid UTF-8"))?;
        let pattern = Pattern::parse_with(pattern_str, limits)?;

        let not_before = Timestamp::from_be_bytes(reader.array::<8>("not-before")?);
        let not_after = Timestamp::from_be_bytes(reader.array::<8>("not-after")?);

        let chain_len = reader.u8("chain length")? as usize;
        let mut issuer_chain = Vec::with_capacity(chain_len);
        for _ in 0..chain_len {
            let fp = reader.array::<32>("chain fingerprint")?;
            issuer_chain.push(Fingerprint::from_bytes(fp));
        }

        let material_len = reader.u16("material length")? as usize;
        let material = KeyMaterial::from_bytes(reader.take(material_len, "material")?.to_vec());

        let claimed = Fingerprint::from_bytes(reader.array::<32>("fingerprint")?);
        reader.finish()?;

        let expected = Self::compute_fingerprint(&pattern, not_before, not_after, &issuer_chain);
        if claimed != expected {
            return Err(malformed("fingerprint does not match record fields"));
        }

        Ok(Self {
            pattern,
            not_before,
            not_after,
            issuer_chain,
            material,
            fingerprint: claimed,
        })
    }

    /// Recompute this record's fingerprint from its fields.
    ///
    /// Matches the stored fingerprint for every capability built by the
    /// engine; a mismatch means the record was forged or corrupted.
    #[must_use]
    pub fn recompute_fingerprint(&self) -> Fingerprint {
        Self::compute_fingerprint(
            &self.pattern,
            self.not_before,
            self.not_after,
            &self.issuer_chain,
        )
    }

    /// The pattern an identity must satisfy, compiled lazily elsewhere.
    ///
    /// Convenience passthrough used by the decision point and tests.
    #[must_use]
    pub fn covers(&self, identity: &Identity) -> bool {
        self.pattern.covers(identity)
    }
}

/// A bounds-checked cursor over wire bytes.
struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, len: usize, what: &str) -> EngineResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .ok_or_else(|| malformed(format!("{what}: length overflow")))?;
        let slice = self
            .bytes
            .get(self.pos..end)
            .ok_or_else(|| malformed(format!("truncated at {what}")))?;
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self, what: &str) -> EngineResult<u8> {
        Ok(self.take(1, what)?[0])
    }

    fn u16(&mut self, what: &str) -> EngineResult<u16> {
        let bytes = self.take(2, what)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn array<const N: usize>(&mut self, what: &str) -> EngineResult<[u8; N]> {
        let slice = self.take(N, what)?;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        Ok(out)
    }

    fn finish(&self) -> EngineResult<()> {
        if self.pos != self.bytes.len() {
            return Err(malformed(format!(
                "{} trailing bytes after record",
                self.bytes.len().saturating_sub(self.pos)
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pat(s: &str) -> Pattern {
        Pattern::parse(s).unwrap()
    }

    fn sample(chain: Vec<Fingerprint>) -> Capability {
        Capability::assemble(
            pat("facility/zone-a/bin/*/sensor-data/**"),
            Timestamp::from_millis(1_000),
            Timestamp::from_millis(60_000),
            chain,
            KeyMaterial::from_bytes(vec![0x5A; 64]),
        )
        .unwrap()
    }

    #[test]
    fn test_fingerprint_excludes_material() {
        let a = sample(vec![]);
        let b = Capability::assemble(
            a.pattern().clone(),
            a.not_before(),
            a.not_after(),
            vec![],
            KeyMaterial::from_bytes(vec![0x77; 64]),
        )
        .unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_fingerprint_covers_every_other_field() {
        let base = sample(vec![]);

        let other_pattern = Capability::assemble(
            pat("facility/zone-b/**"),
            base.not_before(),
            base.not_after(),
            vec![],
            base.material().clone(),
        )
        .unwrap();
        assert_ne!(base.fingerprint(), other_pattern.fingerprint());

        let other_window = Capability::assemble(
            base.pattern().clone(),
            base.not_before(),
            Timestamp::from_millis(90_000),
            vec![],
            base.material().clone(),
        )
        .unwrap();
        assert_ne!(base.fingerprint(), other_window.fingerprint());

        let other_chain = sample(vec![Fingerprint::from_bytes([9u8; 32])]);
        assert_ne!(base.fingerprint(), other_chain.fingerprint());
    }

    #[test]
    fn test_wire_roundtrip() {
        let parent_fp = Fingerprint::from_bytes([3u8; 32]);
        let cap = sample(vec![parent_fp]);
        let bytes = cap.to_bytes();
        let parsed = Capability::from_bytes(&bytes, &Limits::default()).unwrap();
        assert_eq!(parsed, cap);
        assert_eq!(parsed.parent_fingerprint(), Some(parent_fp));
    }

    #[test]
    fn test_rejects_unknown_version() {
        let cap = sample(vec![]);
        let mut bytes = cap.to_bytes();
        bytes[0] = 0x02;
        let err = Capability::from_bytes(&bytes, &Limits::default()).unwrap_err();
        assert!(matches!(err, EngineError::MalformedCapability { .. }));
    }

    #[test]
    fn test_rejects_truncation_everywhere() {
        let cap = sample(vec![Fingerprint::from_bytes([1u8; 32])]);
        let bytes = cap.to_bytes();
        for len in 0..bytes.len() {
            assert!(
                Capability::from_bytes(&bytes[..len], &Limits::default()).is_err(),
                "prefix of length {len} parsed"
            );
        }
    }

    #[test]
    fn test_rejects_trailing_bytes() {
        let cap = sample(vec![]);
        let mut bytes = cap.to_bytes();
        bytes.push(0);
        assert!(Capability::from_bytes(&bytes, &Limits::default()).is_err());
    }

    #[test]
    fn test_rejects_edited_fields() {
        let cap = sample(vec![]);
        let mut bytes = cap.to_bytes();
        // The 36-byte pattern puts not_after at offsets 47..55; flip a
        // byte inside it so the trailing fingerprint no longer matches.
        assert_eq!(cap.pattern().canonical_bytes().len(), 36);
        bytes[50] ^= 0xFF;
        let err = Capability::from_bytes(&bytes, &Limits::default()).unwrap_err();
        assert!(matches!(err, EngineError::MalformedCapability { .. }));
    }

    #[test]
    fn test_rejects_bad_pattern_bytes() {
        let cap = sample(vec![]);
        let mut bytes = cap.to_bytes();
        // Corrupt a pattern byte to one outside the segment alphabet.
        bytes[3] = b' ';
        assert!(Capability::from_bytes(&bytes, &Limits::default()).is_err());
    }

    #[test]
    fn test_window_checks() {
        let cap = sample(vec![]);
        assert!(cap.in_window(Timestamp::from_millis(1_000)));
        assert!(cap.in_window(Timestamp::from_millis(60_000)));
        assert!(!cap.in_window(Timestamp::from_millis(999)));
        assert!(!cap.in_window(Timestamp::from_millis(60_001)));
        assert!(matches!(
            cap.check_window(Timestamp::from_millis(70_000)),
            Err(EngineError::Expired(ExpiryViolation::OutsideWindow { .. }))
        ));
    }

    #[test]
    fn test_structure_depth_limit() {
        let cap = sample(vec![]);
        assert!(cap.check_structure(&Limits::default()).is_ok());
        // A stricter engine limit rejects the same record.
        let strict = Limits { max_depth: 3 };
        assert!(matches!(
            cap.check_structure(&strict),
            Err(EngineError::Malformed(_))
        ));
    }

    #[test]
    fn test_serde_json_roundtrip() {
        let cap = sample(vec![Fingerprint::from_bytes([8u8; 32])]);
        let json = serde_json::to_string(&cap).unwrap();
        let back: Capability = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cap);
    }
}
