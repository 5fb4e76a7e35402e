//! Capability store with single-flight issuance.
//!
//! The store keeps issued capabilities two ways: an LRU keyed by the
//! issuance key `(pattern canonical bytes, not-after, parent fingerprint)`
//! for the delegation fast path, and a fingerprint index over the same
//! entries for lookups. Entries past their not-after are dropped lazily
//! on access and in bulk by [`CapabilityStore::sweep`].
//!
//! Issuance is single-flight: concurrent calls with the same key
//! collapse onto one derivation. The first caller becomes the leader and
//! runs the derivation; followers block on a condvar until the leader
//! publishes the result. A follower that is canceled or hits its
//! deadline returns [`EngineError::Canceled`] while the leader keeps
//! going - at most one derivation runs per key at any instant.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use canopy_core::{LruCache, Pattern, Timestamp};
use canopy_crypto::Fingerprint;
use tracing::trace;

use crate::capability::Capability;
use crate::context::CallContext;
use crate::error::{EngineError, EngineResult};
use crate::metrics::EngineMetrics;

/// How often a blocked follower rechecks its cancellation flag.
const FOLLOWER_POLL: Duration = Duration::from_millis(25);

/// Identity of one issuance request.
///
/// Two delegate calls with equal keys must yield the same capability, so
/// this is also the single-flight collapse key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IssueKey {
    pattern: Vec<u8>,
    not_after: Timestamp,
    parent: Option<Fingerprint>,
}

impl IssueKey {
    /// Key for a delegation under `parent`, or a root mint when `None`.
    #[must_use]
    pub fn new(pattern: &Pattern, not_after: Timestamp, parent: Option<Fingerprint>) -> Self {
        Self {
            pattern: pattern.canonical_bytes(),
            not_after,
            parent,
        }
    }
}

enum FlightState {
    Pending,
    Done(EngineResult<Arc<Capability>>),
}

struct Flight {
    state: Mutex<FlightState>,
    done: Condvar,
}

impl Flight {
    fn new() -> Self {
        Self {
            state: Mutex::new(FlightState::Pending),
            done: Condvar::new(),
        }
    }

    fn publish(&self, result: EngineResult<Arc<Capability>>) {
        if let Ok(mut state) = self.state.lock() {
            *state = FlightState::Done(result);
        }
        self.done.notify_all();
    }

    /// Block until the leader publishes, polling the follower's context.
    fn wait(&self, ctx: &CallContext) -> EngineResult<Arc<Capability>> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| EngineError::Storage("flight lock poisoned".into()))?;
        loop {
            match &*state {
                FlightState::Done(result) => return result.clone(),
                FlightState::Pending => {
                    ctx.check()?;
                    let wait_for = match ctx.remaining() {
                        Some(remaining) => remaining.min(FOLLOWER_POLL),
                        None => FOLLOWER_POLL,
                    };
                    let (next, _timeout) = self
                        .done
                        .wait_timeout(state, wait_for)
                        .map_err(|_| EngineError::Storage("flight lock poisoned".into()))?;
                    state = next;
                }
            }
        }
    }
}

/// Clears a crashed leader's flight so followers fail instead of hanging.
struct FlightGuard<'a> {
    store: &'a CapabilityStore,
    key: IssueKey,
    flight: Arc<Flight>,
    published: bool,
}

impl FlightGuard<'_> {
    fn publish(mut self, result: EngineResult<Arc<Capability>>) {
        self.remove_from_table();
        self.flight.publish(result);
        self.published = true;
    }

    fn remove_from_table(&self) {
        if let Ok(mut inflight) = self.store.inflight.lock() {
            inflight.remove(&self.key);
        }
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        if !self.published {
            self.remove_from_table();
            self.flight
                .publish(Err(EngineError::Storage("derivation aborted".into())));
        }
    }
}

struct StoreInner {
    recent: LruCache<IssueKey, Arc<Capability>>,
    by_fingerprint: HashMap<Fingerprint, IssueKey>,
}

impl StoreInner {
    fn insert(&mut self, key: IssueKey, capability: Arc<Capability>) {
        self.by_fingerprint
            .insert(capability.fingerprint(), key.clone());
        if let Some((_, evicted)) = self.recent.insert(key, capability) {
            self.by_fingerprint.remove(&evicted.fingerprint());
        }
    }

    fn remove(&mut self, key: &IssueKey) {
        if let Some(capability) = self.recent.remove(key) {
            self.by_fingerprint.remove(&capability.fingerprint());
        }
    }
}

/// Issued-capability cache with single-flight issuance.
pub struct CapabilityStore {
    inner: Mutex<StoreInner>,
    inflight: Mutex<HashMap<IssueKey, Arc<Flight>>>,
    max_inflight: usize,
    metrics: EngineMetrics,
}

impl CapabilityStore {
    /// A store retaining at most `capacity` capabilities and allowing at
    /// most `max_inflight` concurrent derivations.
    #[must_use]
    pub fn new(capacity: usize, max_inflight: usize, metrics: EngineMetrics) -> Self {
        Self {
            inner: Mutex::new(StoreInner {
                recent: LruCache::new(capacity),
                by_fingerprint: HashMap::new(),
            }),
            inflight: Mutex::new(HashMap::new()),
            max_inflight: max_inflight.max(1),
            metrics,
        }
    }

    fn lock_inner(&self) -> EngineResult<std::sync::MutexGuard<'_, StoreInner>> {
        self.inner
            .lock()
            .map_err(|_| EngineError::Storage("capability store lock poisoned".into()))
    }

    /// Fetch by issuance key, dropping the entry if it has expired.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Storage`] only on lock poisoning.
    pub fn lookup(&self, key: &IssueKey, now: Timestamp) -> EngineResult<Option<Arc<Capability>>> {
        let mut inner = self.lock_inner()?;
        let found = inner.recent.get(key).map(Arc::clone);
        match found {
            Some(capability) if capability.not_after() >= now => {
                self.metrics.record_store_hit();
                Ok(Some(capability))
            }
            Some(_) => {
                inner.remove(key);
                self.metrics.record_store_miss();
                Ok(None)
            }
            None => {
                self.metrics.record_store_miss();
                Ok(None)
            }
        }
    }

    /// Fetch by fingerprint, dropping the entry if it has expired.
    #[must_use]
    pub fn get(&self, fingerprint: &Fingerprint, now: Timestamp) -> Option<Arc<Capability>> {
        let mut inner = self.lock_inner().ok()?;
        let key = inner.by_fingerprint.get(fingerprint)?.clone();
        let capability = Arc::clone(inner.recent.get(&key)?);
        if capability.not_after() < now {
            inner.remove(&key);
            return None;
        }
        Some(capability)
    }

    /// Record an already-issued capability (e.g. a fresh root mint).
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Storage`] only on lock poisoning.
    pub fn insert(&self, capability: Arc<Capability>) -> EngineResult<()> {
        let key = IssueKey::new(
            capability.pattern(),
            capability.not_after(),
            capability.parent_fingerprint(),
        );
        self.lock_inner()?.insert(key, capability);
        Ok(())
    }

    /// Issue through the single-flight coordinator.
    ///
    /// Returns a cached capability when one is live for `key`; otherwise
    /// the first caller runs `produce` and everyone with the same key
    /// receives its result.
    ///
    /// # Errors
    ///
    /// Propagates `produce`'s error to the leader and every follower;
    /// returns [`EngineError::Canceled`] for a canceled follower and
    /// [`EngineError::Capacity`] when the in-flight table is full.
    pub fn issue(
        &self,
        key: IssueKey,
        now: Timestamp,
        ctx: &CallContext,
        produce: impl FnOnce() -> EngineResult<Capability>,
    ) -> EngineResult<Arc<Capability>> {
        ctx.check()?;
        if let Some(hit) = self.lookup(&key, now)? {
            return Ok(hit);
        }

        let flight = {
            let mut inflight = self
                .inflight
                .lock()
                .map_err(|_| EngineError::Storage("in-flight table lock poisoned".into()))?;
            if let Some(existing) = inflight.get(&key) {
                // Follower: someone is already deriving this key.
                self.metrics.record_singleflight_follower();
                let existing = Arc::clone(existing);
                drop(inflight);
                trace!("joining in-flight derivation");
                return existing.wait(ctx);
            }
            // Re-check the cache under the table lock: a derivation may
            // have completed between the first lookup and here, and its
            // cache insert precedes its flight removal.
            if let Some(hit) = self.lookup(&key, now)? {
                return Ok(hit);
            }
            if inflight.len() >= self.max_inflight {
                return Err(EngineError::Capacity {
                    what: "single-flight table",
                });
            }
            let flight = Arc::new(Flight::new());
            inflight.insert(key.clone(), Arc::clone(&flight));
            flight
        };

        let guard = FlightGuard {
            store: self,
            key: key.clone(),
            flight,
            published: false,
        };

        let result = produce().map(Arc::new);
        if let Ok(capability) = &result {
            if let Ok(mut inner) = self.inner.lock() {
                inner.insert(key, Arc::clone(capability));
            }
        }
        guard.publish(result.clone());
        result
    }

    /// Remove every entry past its not-after. Returns how many went.
    pub fn sweep(&self, now: Timestamp) -> usize {
        let Ok(mut inner) = self.inner.lock() else {
            return 0;
        };
        let StoreInner {
            recent,
            by_fingerprint,
        } = &mut *inner;
        let before = recent.len();
        recent.retain(|_, capability| capability.not_after() >= now);
        by_fingerprint.retain(|_, key| recent.peek(key).is_some());
        before.saturating_sub(recent.len())
    }

    /// Number of stored capabilities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().map(|inner| inner.recent.len()).unwrap_or(0)
    }

    /// True when the store holds nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for CapabilityStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityStore")
            .field("len", &self.len())
            .field("max_inflight", &self.max_inflight)
            .finish()
    }
}
