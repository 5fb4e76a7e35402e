//! The access decision point.

use std::fmt;
use std::sync::Arc;

use canopy_core::{Identity, Limits, PatternCache, Timestamp};
use canopy_crypto::KeyScheme;
use tracing::error;

use crate::capability::Capability;
use crate::context::CallContext;
use crate::error::{EngineError, EngineResult};
use crate::metrics::EngineMetrics;
use crate::revocation::RevocationRegistry;

/// Why a decision denied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenyReason {
    /// The capability fails structural validity.
    Malformed {
        /// What the structural check rejected.
        reason: String,
    },
    /// The queried instant is outside the validity window.
    Expired,
    /// The capability or an ancestor is revoked.
    Revoked,
    /// The key primitive disagrees with the structural match.
    KeyMismatch,
    /// The pattern does not cover the requested identity.
    NoMatch,
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed { reason } => write!(f, "malformed capability: {reason}"),
            Self::Expired => write!(f, "outside validity window"),
            Self::Revoked => write!(f, "revoked"),
            Self::KeyMismatch => write!(f, "key material mismatch"),
            Self::NoMatch => write!(f, "pattern does not cover identity"),
        }
    }
}

/// The outcome of one access decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// The capability authorizes the identity at the queried instant.
    Allow,
    /// It does not; the reason is the first failed check.
    Deny(DenyReason),
}

impl Decision {
    /// True for [`Decision::Allow`].
    #[must_use]
    pub fn is_allow(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allow => write!(f, "allow"),
            Self::Deny(reason) => write!(f, "deny: {reason}"),
        }
    }
}

/// The one authoritative allow/deny entry point.
///
/// Checks run in a fixed order and stop at the first failure:
/// structure, window, revocation, then coverage. Coverage is decided by
/// the structural matcher and the key primitive together - the primitive
/// is replaceable, so it is never the sole authority, and a disagreement
/// between the two is a [`DenyReason::KeyMismatch`], logged at `error`.
///
/// Apart from metrics counters, deciding has no side effects: with the
/// revocation registry held constant, the outcome is a pure function of
/// `(capability, identity, now)`.
pub struct AccessDecisionPoint {
    revocations: Arc<RevocationRegistry>,
    scheme: Arc<dyn KeyScheme>,
    patterns: PatternCache,
    limits: Limits,
    metrics: EngineMetrics,
}

impl AccessDecisionPoint {
    /// Build a decision point over the given revocation state and scheme.
    #[must_use]
    pub fn new(
        revocations: Arc<RevocationRegistry>,
        scheme: Arc<dyn KeyScheme>,
        patterns: PatternCache,
        limits: Limits,
        metrics: EngineMetrics,
    ) -> Self {
        Self {
            revocations,
            scheme,
            patterns,
            limits,
            metrics,
        }
    }

    /// Does `capability` authorize `identity` at `now`?
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Canceled`] when the context is canceled;
    /// every substantive failure is a [`Decision::Deny`], not an error.
    pub fn decide(
        &self,
        capability: &Capability,
        identity: &Identity,
        now: Timestamp,
        ctx: &CallContext,
    ) -> EngineResult<Decision> {
        ctx.check()?;
        let decision = self.evaluate(capability, identity, now);
        match &decision {
            Decision::Allow => self.metrics.record_allow(),
            Decision::Deny(reason) => {
                self.metrics.record_deny();
                if *reason == DenyReason::KeyMismatch {
                    self.metrics.record_key_mismatch();
                    error!(
                        fingerprint = %capability.fingerprint().short(),
                        pattern = %capability.pattern(),
                        %identity,
                        "key material disagrees with structural match"
                    );
                }
            }
        }
        Ok(decision)
    }

    fn evaluate(&self, capability: &Capability, identity: &Identity, now: Timestamp) -> Decision {
        // 1. Structure: depth bounds, window ordering, and a fingerprint
        //    that matches the record's fields.
        if let Err(err) = capability.check_structure(&self.limits) {
            return Decision::Deny(DenyReason::Malformed {
                reason: err.to_string(),
            });
        }
        if identity.depth() > self.limits.max_depth {
            return Decision::Deny(DenyReason::Malformed {
                reason: format!("identity depth {} exceeds maximum", identity.depth()),
            });
        }
        if capability.recompute_fingerprint() != capability.fingerprint() {
            return Decision::Deny(DenyReason::Malformed {
                reason: "fingerprint does not match record fields".into(),
            });
        }

        // 2. Validity window.
        if !capability.in_window(now) {
            return Decision::Deny(DenyReason::Expired);
        }

        // 3. Revocation.
        if self.revocations.is_revoked(capability, now) {
            return Decision::Deny(DenyReason::Revoked);
        }

        // 4 + 5. Key coverage and structural coverage, independently.
        let (compiled, cache_hit) = self.patterns.get(capability.pattern());
        self.metrics.record_pattern_cache(cache_hit);
        let structural = compiled.matches(identity);
        let key = self
            .scheme
            .covers(capability.material(), capability.pattern(), identity);

        match (structural, key) {
            (true, true) => Decision::Allow,
            (false, false) => Decision::Deny(DenyReason::NoMatch),
            // Either direction of disagreement is suspect: tampered
            // material, or a scheme claiming more than the structure.
            _ => Decision::Deny(DenyReason::KeyMismatch),
        }
    }
}

impl std::fmt::Debug for AccessDecisionPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessDecisionPoint")
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authority::{Authority, AuthorityPolicy};
    use canopy_core::Pattern;
    use canopy_crypto::{HmacChainScheme, KeyMaterial, MasterSecret};

    fn pat(s: &str) -> Pattern {
        Pattern::parse(s).unwrap()
    }

    fn id(s: &str) -> Identity {
        Identity::parse(s).unwrap()
    }

    fn ts(millis: i64) -> Timestamp {
        Timestamp::from_millis(millis)
    }

    struct Fixture {
        authority: Authority,
        revocations: Arc<RevocationRegistry>,
        adp: AccessDecisionPoint,
        metrics: EngineMetrics,
    }

    fn fixture() -> Fixture {
        let metrics = EngineMetrics::new();
        let scheme = Arc::new(HmacChainScheme);
        let authority = Authority::new(
            MasterSecret::from_bytes(&[33u8; 32]).unwrap(),
            scheme.clone(),
            AuthorityPolicy::default(),
        );
        let revocations = Arc::new(RevocationRegistry::in_memory(Limits::default()));
        let adp = AccessDecisionPoint::new(
            Arc::clone(&revocations),
            scheme,
            PatternCache::default(),
            Limits::default(),
            metrics.clone(),
        );
        Fixture {
            authority,
            revocations,
            adp,
            metrics,
        }
    }

    fn mint(fx: &Fixture, pattern: &str, not_after: i64) -> Capability {
        fx.authority
            .mint_root(&pat(pattern), ts(0), ts(not_after), &CallContext::background())
            .unwrap()
    }

    #[test]
    fn test_allow_on_match() {
        let fx = fixture();
        let cap = mint(&fx, "facility/zone-a/bin/*/sensor-data/**", 3_600_000);
        let decision = fx
            .adp
            .decide(
                &cap,
                &id("facility/zone-a/bin/BIN-001/sensor-data/fill-level"),
                ts(1_000),
                &CallContext::background(),
            )
            .unwrap();
        assert_eq!(decision, Decision::Allow);
        assert_eq!(fx.metrics.snapshot().decisions_allowed, 1);
    }

    #[test]
    fn test_deny_expired() {
        let fx = fixture();
        let cap = mint(&fx, "a/**", 1_000);
        let decision = fx
            .adp
            .decide(&cap, &id("a/b"), ts(2_000), &CallContext::background())
            .unwrap();
        assert_eq!(decision, Decision::Deny(DenyReason::Expired));
    }

    #[test]
    fn test_deny_before_window() {
        let fx = fixture();
        let cap = fx
            .authority
            .mint_root(&pat("a/**"), ts(1_000), ts(2_000), &CallContext::background())
            .unwrap();
        let decision = fx
            .adp
            .decide(&cap, &id("a/b"), ts(500), &CallContext::background())
            .unwrap();
        assert_eq!(decision, Decision::Deny(DenyReason::Expired));
    }

    #[test]
    fn test_deny_revoked() {
        let fx = fixture();
        let cap = mint(&fx, "a/**", 3_600_000);
        fx.revocations
            .revoke(cap.fingerprint(), ts(100), &CallContext::background())
            .unwrap();
        let decision = fx
            .adp
            .decide(&cap, &id("a/b"), ts(200), &CallContext::background())
            .unwrap();
        assert_eq!(decision, Decision::Deny(DenyReason::Revoked));
    }

    #[test]
    fn test_deny_structural_mismatch() {
        let fx = fixture();
        let cap = mint(&fx, "facility/zone-a/**", 3_600_000);
        let decision = fx
            .adp
            .decide(
                &cap,
                &id("facility/zone-b/sensor"),
                ts(1_000),
                &CallContext::background(),
            )
            .unwrap();
        assert_eq!(decision, Decision::Deny(DenyReason::NoMatch));
    }

    #[test]
    fn test_deny_key_mismatch_on_forged_material() {
        let fx = fixture();
        let honest = mint(&fx, "a/**", 3_600_000);
        // Same record, unrelated material bytes. The fingerprint still
        // verifies (it excludes material); only the key check can catch
        // the forgery.
        let forged = Capability::assemble(
            honest.pattern().clone(),
            honest.not_before(),
            honest.not_after(),
            honest.issuer_chain().to_vec(),
            KeyMaterial::from_bytes(vec![0xEE; 64]),
        )
        .unwrap();
        assert_eq!(forged.fingerprint(), honest.fingerprint());

        let decision = fx
            .adp
            .decide(&forged, &id("a/b"), ts(1_000), &CallContext::background())
            .unwrap();
        assert_eq!(decision, Decision::Deny(DenyReason::KeyMismatch));
        assert_eq!(fx.metrics.snapshot().key_mismatches, 1);
    }

    #[test]
    fn test_deny_depth_bound() {
        let fx = fixture();
        let cap = mint(&fx, "a/**", 3_600_000);
        let strict = AccessDecisionPoint::new(
            Arc::clone(&fx.revocations),
            Arc::new(HmacChainScheme),
            PatternCache::default(),
            Limits { max_depth: 3 },
            EngineMetrics::new(),
        );
        let decision = strict
            .decide(&cap, &id("a/b/c/d"), ts(1_000), &CallContext::background())
            .unwrap();
        assert!(matches!(
            decision,
            Decision::Deny(DenyReason::Malformed { .. })
        ));
    }

    #[test]
    fn test_decision_is_deterministic() {
        let fx = fixture();
        let cap = mint(&fx, "facility/*/bin/**", 3_600_000);
        let identity = id("facility/zone-a/bin/BIN-001");
        let first = fx
            .adp
            .decide(&cap, &identity, ts(5_000), &CallContext::background())
            .unwrap();
        for _ in 0..10 {
            let again = fx
                .adp
                .decide(&cap, &identity, ts(5_000), &CallContext::background())
                .unwrap();
            assert_eq!(again, first);
        }
    }

    #[test]
    fn test_canceled_context_is_an_error_not_a_deny() {
        let fx = fixture();
        let cap = mint(&fx, "a/**", 3_600_000);
        let ctx = CallContext::background();
        ctx.cancel();
        let err = fx.adp.decide(&cap, &id("a/b"), ts(1_000), &ctx).unwrap_err();
        assert_eq!(err, EngineError::Canceled);
        // No counter moved.
        assert_eq!(fx.metrics.snapshot().decisions_denied, 0);
    }
}
