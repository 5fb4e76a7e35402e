//! The embedding surface: one long-lived context tying the pieces
//! together.
//!
//! Nothing in the engine is a global; embedders build an [`Engine`] and
//! pass it around. It owns the authority, wires the delegation service
//! and decision point to a shared store and revocation registry, and can
//! run a background sweeper for expiry housekeeping.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use canopy_core::{Identity, Pattern, PatternCache, Timestamp};
use canopy_crypto::{HmacChainScheme, KeyScheme, MasterSecret};
use tracing::debug;

use crate::authority::{Authority, AuthorityPolicy};
use crate::capability::Capability;
use crate::config::EngineConfig;
use crate::context::CallContext;
use crate::decision::{AccessDecisionPoint, Decision};
use crate::delegation::DelegationService;
use crate::error::EngineResult;
use crate::metrics::EngineMetrics;
use crate::revocation::{RevocationRegistry, RevocationTarget};
use crate::store::CapabilityStore;

/// A fully wired capability engine.
pub struct Engine {
    authority: Authority,
    delegation: DelegationService,
    adp: AccessDecisionPoint,
    store: Arc<CapabilityStore>,
    revocations: Arc<RevocationRegistry>,
    metrics: EngineMetrics,
    config: EngineConfig,
}

impl Engine {
    /// An engine with the default keyed-hash scheme and an in-memory
    /// revocation registry.
    ///
    /// # Errors
    ///
    /// Returns whatever [`EngineConfig::validate`] rejects.
    pub fn new(config: EngineConfig, secret: MasterSecret) -> EngineResult<Self> {
        let limits = config.limits();
        let registry = RevocationRegistry::in_memory(limits);
        Self::assemble(config, secret, Arc::new(HmacChainScheme), registry)
    }

    /// An engine whose revocation registry persists to the append-only
    /// log at `revocation_log`.
    ///
    /// # Errors
    ///
    /// Returns a config validation error or a storage error from
    /// replaying the log.
    pub fn open(
        config: EngineConfig,
        secret: MasterSecret,
        revocation_log: impl AsRef<Path>,
    ) -> EngineResult<Self> {
        let limits = config.limits();
        let registry = RevocationRegistry::open(revocation_log, limits)?;
        Self::assemble(config, secret, Arc::new(HmacChainScheme), registry)
    }

    /// An engine over a caller-supplied key scheme.
    ///
    /// # Errors
    ///
    /// Returns whatever [`EngineConfig::validate`] rejects.
    pub fn with_scheme(
        config: EngineConfig,
        secret: MasterSecret,
        scheme: Arc<dyn KeyScheme>,
    ) -> EngineResult<Self> {
        let limits = config.limits();
        let registry = RevocationRegistry::in_memory(limits);
        Self::assemble(config, secret, scheme, registry)
    }

    fn assemble(
        config: EngineConfig,
        secret: MasterSecret,
        scheme: Arc<dyn KeyScheme>,
        registry: RevocationRegistry,
    ) -> EngineResult<Self> {
        config.validate()?;
        let limits = config.limits();
        let metrics = EngineMetrics::new();

        let policy = AuthorityPolicy {
            max_validity_ms: config.max_validity_ms,
            root_scope: None,
            limits,
        };
        let authority = Authority::new(secret, Arc::clone(&scheme), policy);
        let store = Arc::new(CapabilityStore::new(
            config.store_capacity,
            config.max_inflight,
            metrics.clone(),
        ));
        let revocations = Arc::new(registry);
        let delegation = DelegationService::new(
            authority.key_desk(),
            Arc::clone(&store),
            Arc::clone(&revocations),
            metrics.clone(),
        );
        let adp = AccessDecisionPoint::new(
            Arc::clone(&revocations),
            scheme,
            PatternCache::new(config.pattern_cache_capacity),
            limits,
            metrics.clone(),
        );

        Ok(Self {
            authority,
            delegation,
            adp,
            store,
            revocations,
            metrics,
            config,
        })
    }

    /// Mint and store a root capability.
    ///
    /// # Errors
    ///
    /// See [`Authority::mint_root`].
    pub fn mint_root(
        &self,
        pattern: &Pattern,
        not_before: Timestamp,
        not_after: Timestamp,
        ctx: &CallContext,
    ) -> EngineResult<Arc<Capability>> {
        let capability = Arc::new(self.authority.mint_root(pattern, not_before, not_after, ctx)?);
        self.store.insert(Arc::clone(&capability))?;
        Ok(capability)
    }

    /// Delegate a narrowed child capability.
    ///
    /// # Errors
    ///
    /// See [`DelegationService::delegate`].
    pub fn delegate(
        &self,
        parent: &Capability,
        child_pattern: &Pattern,
        not_after: Timestamp,
        now: Timestamp,
        ctx: &CallContext,
    ) -> EngineResult<Arc<Capability>> {
        self.delegation
            .delegate(parent, child_pattern, not_after, now, ctx)
    }

    /// Revoke a fingerprint or pattern prefix.
    ///
    /// # Errors
    ///
    /// See [`RevocationRegistry::revoke`].
    pub fn revoke(
        &self,
        target: impl Into<RevocationTarget>,
        effective_at: Timestamp,
        ctx: &CallContext,
    ) -> EngineResult<()> {
        self.revocations.revoke(target, effective_at, ctx)?;
        self.metrics.record_revocation();
        Ok(())
    }

    /// Decide whether `capability` authorizes `identity` at `now`.
    ///
    /// # Errors
    ///
    /// See [`AccessDecisionPoint::decide`].
    pub fn decide(
        &self,
        capability: &Capability,
        identity: &Identity,
        now: Timestamp,
        ctx: &CallContext,
    ) -> EngineResult<Decision> {
        self.adp.decide(capability, identity, now, ctx)
    }

    /// One housekeeping pass: drop expired capabilities and revocation
    /// entries nothing live can reference. Returns the number of store
    /// entries removed.
    pub fn sweep(&self, now: Timestamp) -> usize {
        let removed = self.store.sweep(now);
        let cutoff = now.saturating_add_millis(self.config.max_validity_ms.saturating_neg());
        let reaped = self.revocations.reap(cutoff);
        if removed > 0 || reaped > 0 {
            debug!(removed, reaped, "sweep pass");
        }
        removed
    }

    /// Spawn a background thread running [`Engine::sweep`] on the
    /// configured interval. The thread stops when the handle drops.
    #[must_use]
    pub fn start_sweeper(&self) -> Sweeper {
        Sweeper::spawn(
            Arc::clone(&self.store),
            Arc::clone(&self.revocations),
            Duration::from_millis(self.config.sweep_interval_ms),
            self.config.max_validity_ms,
        )
    }

    /// The authority's public parameters.
    #[must_use]
    pub fn public_params(&self) -> Vec<u8> {
        self.authority.public_params()
    }

    /// Shared metrics handle.
    #[must_use]
    pub fn metrics(&self) -> &EngineMetrics {
        &self.metrics
    }

    /// The capability store.
    #[must_use]
    pub fn store(&self) -> &Arc<CapabilityStore> {
        &self.store
    }

    /// The revocation registry.
    #[must_use]
    pub fn revocations(&self) -> &Arc<RevocationRegistry> {
        &self.revocations
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("store_len", &self.store.len())
            .field("revocations", &self.revocations.len())
            .finish_non_exhaustive()
    }
}

/// Handle to the background expiry sweeper.
///
/// Dropping the handle signals the thread and joins it.
pub struct Sweeper {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Sweeper {
    /// How long the sweeper sleeps between stop-flag checks.
    const TICK: Duration = Duration::from_millis(50);

    fn spawn(
        store: Arc<CapabilityStore>,
        revocations: Arc<RevocationRegistry>,
        interval: Duration,
        max_validity_ms: i64,
    ) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let handle = std::thread::Builder::new()
            .name("canopy-sweeper".into())
            .spawn(move || {
                let mut slept = Duration::ZERO;
                loop {
                    if stop_flag.load(Ordering::Acquire) {
                        return;
                    }
                    if slept < interval {
                        std::thread::sleep(Self::TICK.min(interval));
                        slept = slept.saturating_add(Self::TICK);
                        continue;
                    }
                    slept = Duration::ZERO;
                    let now = Timestamp::now();
                    store.sweep(now);
                    revocations.reap(now.saturating_add_millis(max_validity_ms.saturating_neg()));
                }
            })
            .ok();
        Self { stop, handle }
    }

    /// Ask the sweeper to stop without waiting for it.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        self.stop();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl std::fmt::Debug for Sweeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sweeper")
            .field("stopped", &self.stop.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use canopy_crypto::Fingerprint;

    fn pat(s: &str) -> Pattern {
        Pattern::parse(s).unwrap()
    }

    fn id(s: &str) -> Identity {
        Identity::parse(s).unwrap()
    }

    fn ts(millis: i64) -> Timestamp {
        Timestamp::from_millis(millis)
    }

    fn engine() -> Engine {
        Engine::new(
            EngineConfig::default(),
            MasterSecret::from_bytes(&[55u8; 32]).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn test_end_to_end_flow() {
        let engine = engine();
        let ctx = CallContext::background();

        let root = engine
            .mint_root(&pat("facility/**"), ts(0), ts(3_600_000), &ctx)
            .unwrap();
        let child = engine
            .delegate(&root, &pat("facility/zone-a/**"), ts(1_800_000), ts(1_000), &ctx)
            .unwrap();

        let allowed = engine
            .decide(&child, &id("facility/zone-a/bin"), ts(2_000), &ctx)
            .unwrap();
        assert!(allowed.is_allow());

        engine.revoke(root.fingerprint(), ts(3_000), &ctx).unwrap();
        let denied = engine
            .decide(&child, &id("facility/zone-a/bin"), ts(4_000), &ctx)
            .unwrap();
        assert!(!denied.is_allow());
    }

    #[test]
    fn test_mint_is_stored() {
        let engine = engine();
        let root = engine
            .mint_root(&pat("a/**"), ts(0), ts(1_000), &CallContext::background())
            .unwrap();
        assert!(engine.store().get(&root.fingerprint(), ts(500)).is_some());
    }

    #[test]
    fn test_sweep_counts() {
        let engine = engine();
        let ctx = CallContext::background();
        engine.mint_root(&pat("a/**"), ts(0), ts(100), &ctx).unwrap();
        engine.mint_root(&pat("b/**"), ts(0), ts(10_000), &ctx).unwrap();
        engine
            .revoke(Fingerprint::from_bytes([1u8; 32]), ts(50), &ctx)
            .unwrap();

        assert_eq!(engine.sweep(ts(5_000)), 1);
        // The revocation entry is younger than now - max_validity, so it
        // survives the reap.
        assert_eq!(engine.revocations().len(), 1);
    }

    #[test]
    fn test_rejects_invalid_config() {
        let config = EngineConfig {
            store_capacity: 0,
            ..EngineConfig::default()
        };
        assert!(Engine::new(config, MasterSecret::generate()).is_err());
    }

    #[test]
    fn test_sweeper_lifecycle() {
        let engine = engine();
        let sweeper = engine.start_sweeper();
        std::thread::sleep(Duration::from_millis(20));
        drop(sweeper);
        // Dropping joined the thread; nothing to assert beyond not hanging.
    }
}
