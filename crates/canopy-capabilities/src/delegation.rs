//! The delegation service: narrowing-only capability issuance.

use std::sync::Arc;

use canopy_core::{Pattern, Timestamp};
use tracing::debug;

use crate::authority::KeyDesk;
use crate::capability::{Capability, MAX_CHAIN_LEN};
use crate::context::CallContext;
use crate::error::{EngineError, EngineResult, ExpiryViolation};
use crate::metrics::EngineMetrics;
use crate::revocation::RevocationRegistry;
use crate::store::{CapabilityStore, IssueKey};

/// Issues child capabilities from parents, never widening.
///
/// Derivation goes through the store's single-flight coordinator, so
/// concurrent identical requests collapse onto one `narrow` call and all
/// receive the same capability.
pub struct DelegationService {
    desk: KeyDesk,
    store: Arc<CapabilityStore>,
    revocations: Arc<RevocationRegistry>,
    metrics: EngineMetrics,
}

impl DelegationService {
    /// A service narrowing through `desk`, caching in `store`, and
    /// refusing parents revoked in `revocations`.
    #[must_use]
    pub fn new(
        desk: KeyDesk,
        store: Arc<CapabilityStore>,
        revocations: Arc<RevocationRegistry>,
        metrics: EngineMetrics,
    ) -> Self {
        Self {
            desk,
            store,
            revocations,
            metrics,
        }
    }

    /// Derive a child capability for `child_pattern` from `parent`,
    /// expiring at `not_after`.
    ///
    /// The child's window starts at the parent's not-before, so equal
    /// inputs always produce the same fingerprint regardless of when the
    /// call happens inside the parent's window.
    ///
    /// Preconditions are checked in order, each with its own error:
    /// parent unexpired, parent unrevoked, refinement, child expiry
    /// within the parent's, child expiry in the future. Nothing is
    /// written unless every check passes.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Expired`], [`EngineError::Revoked`],
    /// [`EngineError::NotRefinement`], [`EngineError::Policy`] (issuer
    /// chain too deep), [`EngineError::Canceled`], or
    /// [`EngineError::Capacity`].
    pub fn delegate(
        &self,
        parent: &Capability,
        child_pattern: &Pattern,
        not_after: Timestamp,
        now: Timestamp,
        ctx: &CallContext,
    ) -> EngineResult<Arc<Capability>> {
        ctx.check()?;

        if now >= parent.not_after() {
            return Err(EngineError::Expired(ExpiryViolation::ParentExpired {
                not_after: parent.not_after(),
                now,
            }));
        }
        if self.revocations.is_revoked(parent, now) {
            return Err(EngineError::Revoked);
        }
        if !child_pattern.refines(parent.pattern()) {
            return Err(EngineError::NotRefinement);
        }
        if not_after > parent.not_after() {
            return Err(EngineError::Expired(ExpiryViolation::BeyondParent {
                requested: not_after,
                parent_not_after: parent.not_after(),
            }));
        }
        if not_after <= now {
            return Err(EngineError::Expired(ExpiryViolation::AlreadyPast {
                requested: not_after,
                now,
            }));
        }
        if parent.issuer_chain().len() >= MAX_CHAIN_LEN {
            return Err(EngineError::Policy {
                reason: format!("delegation depth exceeds {MAX_CHAIN_LEN}"),
            });
        }

        let key = IssueKey::new(child_pattern, not_after, Some(parent.fingerprint()));
        let capability = self.store.issue(key, now, ctx, || {
            self.metrics.record_narrow();
            let material =
                self.desk
                    .narrow(parent.material(), parent.pattern(), child_pattern)?;

            let mut chain = Vec::with_capacity(parent.issuer_chain().len().saturating_add(1));
            chain.extend_from_slice(parent.issuer_chain());
            chain.push(parent.fingerprint());

            Capability::assemble(
                child_pattern.clone(),
                parent.not_before(),
                not_after,
                chain,
                material,
            )
        })?;

        debug!(
            parent = %parent.fingerprint().short(),
            child = %capability.fingerprint().short(),
            pattern = %child_pattern,
            %not_after,
            "delegated capability"
        );
        Ok(capability)
    }
}

impl std::fmt::Debug for DelegationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelegationService").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authority::{Authority, AuthorityPolicy};
    use canopy_core::Limits;
    use canopy_crypto::{HmacChainScheme, MasterSecret};

    fn pat(s: &str) -> Pattern {
        Pattern::parse(s).unwrap()
    }

    fn ts(millis: i64) -> Timestamp {
        Timestamp::from_millis(millis)
    }

    struct Fixture {
        authority: Authority,
        service: DelegationService,
        revocations: Arc<RevocationRegistry>,
        metrics: EngineMetrics,
    }

    fn fixture() -> Fixture {
        let metrics = EngineMetrics::new();
        let authority = Authority::new(
            MasterSecret::from_bytes(&[21u8; 32]).unwrap(),
            Arc::new(HmacChainScheme),
            AuthorityPolicy::default(),
        );
        let store = Arc::new(CapabilityStore::new(128, 64, metrics.clone()));
        let revocations = Arc::new(RevocationRegistry::in_memory(Limits::default()));
        let service = DelegationService::new(
            authority.key_desk(),
            store,
            Arc::clone(&revocations),
            metrics.clone(),
        );
        Fixture {
            authority,
            service,
            revocations,
            metrics,
        }
    }

    fn root(fx: &Fixture) -> Capability {
        fx.authority
            .mint_root(
                &pat("facility/zone-a/bin/*/sensor-data/**"),
                ts(0),
                ts(3_600_000),
                &CallContext::background(),
            )
            .unwrap()
    }

    #[test]
    fn test_delegate_success() {
        let fx = fixture();
        let parent = root(&fx);
        let child = fx
            .service
            .delegate(
                &parent,
                &pat("facility/zone-a/bin/BIN-001/sensor-data/**"),
                ts(1_800_000),
                ts(1_000),
                &CallContext::background(),
            )
            .unwrap();

        assert_eq!(child.parent_fingerprint(), Some(parent.fingerprint()));
        assert_eq!(child.issuer_chain(), &[parent.fingerprint()]);
        assert_eq!(child.not_before(), parent.not_before());
        assert_eq!(child.not_after(), ts(1_800_000));
        assert_eq!(fx.metrics.narrow_calls(), 1);
    }

    #[test]
    fn test_delegate_rejects_expired_parent() {
        let fx = fixture();
        let parent = root(&fx);
        let err = fx
            .service
            .delegate(
                &parent,
                &pat("facility/zone-a/bin/BIN-001/sensor-data/**"),
                ts(3_600_000),
                ts(3_600_000),
                &CallContext::background(),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Expired(ExpiryViolation::ParentExpired { .. })
        ));
    }

    #[test]
    fn test_delegate_rejects_revoked_parent() {
        let fx = fixture();
        let parent = root(&fx);
        fx.revocations
            .revoke(parent.fingerprint(), ts(500), &CallContext::background())
            .unwrap();

        let err = fx
            .service
            .delegate(
                &parent,
                &pat("facility/zone-a/bin/BIN-001/sensor-data/**"),
                ts(1_800_000),
                ts(1_000),
                &CallContext::background(),
            )
            .unwrap_err();
        assert_eq!(err, EngineError::Revoked);
    }

    #[test]
    fn test_delegate_rejects_widening() {
        let fx = fixture();
        let parent = root(&fx);
        let narrowed = fx
            .service
            .delegate(
                &parent,
                &pat("facility/zone-a/bin/BIN-001/sensor-data/**"),
                ts(1_800_000),
                ts(1_000),
                &CallContext::background(),
            )
            .unwrap();

        // Widening back to the parent's pattern is refused.
        let err = fx
            .service
            .delegate(
                &narrowed,
                &pat("facility/zone-a/bin/*/sensor-data/**"),
                ts(1_700_000),
                ts(2_000),
                &CallContext::background(),
            )
            .unwrap_err();
        assert_eq!(err, EngineError::NotRefinement);
    }

    #[test]
    fn test_delegate_rejects_window_extension() {
        let fx = fixture();
        let parent = root(&fx);
        let err = fx
            .service
            .delegate(
                &parent,
                &pat("facility/zone-a/bin/BIN-001/sensor-data/**"),
                ts(7_200_000),
                ts(1_000),
                &CallContext::background(),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Expired(ExpiryViolation::BeyondParent { .. })
        ));
    }

    #[test]
    fn test_delegate_rejects_past_expiry() {
        let fx = fixture();
        let parent = root(&fx);
        let err = fx
            .service
            .delegate(
                &parent,
                &pat("facility/zone-a/bin/BIN-001/sensor-data/**"),
                ts(500),
                ts(1_000),
                &CallContext::background(),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Expired(ExpiryViolation::AlreadyPast { .. })
        ));
    }

    #[test]
    fn test_delegate_precondition_order() {
        let fx = fixture();
        let parent = root(&fx);
        fx.revocations
            .revoke(parent.fingerprint(), ts(0), &CallContext::background())
            .unwrap();

        // Expiry is checked before revocation: an expired AND revoked
        // parent reports expiry.
        let err = fx
            .service
            .delegate(
                &parent,
                &pat("facility/zone-a/bin/BIN-001/sensor-data/**"),
                ts(10),
                ts(4_000_000),
                &CallContext::background(),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Expired(ExpiryViolation::ParentExpired { .. })
        ));

        // Revocation is checked before refinement: a revoked parent with
        // a widening request reports revocation.
        let err = fx
            .service
            .delegate(
                &parent,
                &pat("**"),
                ts(1_800_000),
                ts(1_000),
                &CallContext::background(),
            )
            .unwrap_err();
        assert_eq!(err, EngineError::Revoked);
    }

    #[test]
    fn test_delegate_deterministic_fingerprints() {
        let fx = fixture();
        let parent = root(&fx);
        let child_pattern = pat("facility/zone-a/bin/BIN-001/sensor-data/**");

        let one = fx
            .service
            .delegate(&parent, &child_pattern, ts(1_800_000), ts(1_000), &CallContext::background())
            .unwrap();
        // Same inputs later inside the parent's window: cached, equal.
        let two = fx
            .service
            .delegate(&parent, &child_pattern, ts(1_800_000), ts(20_000), &CallContext::background())
            .unwrap();

        assert_eq!(one.fingerprint(), two.fingerprint());
        assert_eq!(fx.metrics.narrow_calls(), 1);
    }

    #[test]
    fn test_grandchild_chain() {
        let fx = fixture();
        let parent = root(&fx);
        let child = fx
            .service
            .delegate(
                &parent,
                &pat("facility/zone-a/bin/BIN-001/sensor-data/**"),
                ts(1_800_000),
                ts(1_000),
                &CallContext::background(),
            )
            .unwrap();
        let grandchild = fx
            .service
            .delegate(
                &child,
                &pat("facility/zone-a/bin/BIN-001/sensor-data/fill-level/**"),
                ts(900_000),
                ts(2_000),
                &CallContext::background(),
            )
            .unwrap();

        assert_eq!(
            grandchild.issuer_chain(),
            &[parent.fingerprint(), child.fingerprint()]
        );
    }
}
