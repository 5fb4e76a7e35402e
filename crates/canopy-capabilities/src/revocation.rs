//! The revocation registry.
//!
//! Two kinds of entries: exact fingerprints, which revoke one capability
//! and (through the issuer-chain check) every descendant, and prefix
//! patterns, which revoke every capability whose pattern refines the
//! revocation pattern.
//!
//! Readers observe a monotonically growing set: once `revoke` returns,
//! no later `is_revoked` query reports the target as live. Writers are
//! serialized by the log mutex; the in-memory index sits behind its own
//! reader-writer lock, which is never held across file I/O.
//!
//! On-disk format, one record per revocation, replayed at open:
//!
//! ```text
//! record_len(4B LE) || kind(1B: 0 = fingerprint, 1 = pattern)
//!                   || effective_at(8B BE unix ms) || payload
//! ```

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Write};
use std::path::Path;
use std::sync::{Mutex, RwLock};

use canopy_core::{Limits, Pattern, Timestamp};
use canopy_crypto::Fingerprint;
use tracing::info;

use crate::capability::Capability;
use crate::context::CallContext;
use crate::error::{EngineError, EngineResult};

const KIND_FINGERPRINT: u8 = 0;
const KIND_PATTERN: u8 = 1;

/// What a revocation applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevocationTarget {
    /// One capability and all of its descendants.
    Fingerprint(Fingerprint),
    /// Every capability whose pattern refines this pattern.
    Pattern(Pattern),
}

impl From<Fingerprint> for RevocationTarget {
    fn from(fp: Fingerprint) -> Self {
        Self::Fingerprint(fp)
    }
}

impl From<Pattern> for RevocationTarget {
    fn from(pattern: Pattern) -> Self {
        Self::Pattern(pattern)
    }
}

#[derive(Debug, Default)]
struct Index {
    /// Exact revocations; the value is the earliest effective instant.
    exact: HashMap<Fingerprint, Timestamp>,
    /// Prefix revocations in insertion order.
    prefixes: Vec<(Pattern, Timestamp)>,
}

impl Index {
    fn apply(&mut self, target: RevocationTarget, effective_at: Timestamp) {
        match target {
            RevocationTarget::Fingerprint(fp) => {
                // Keep the earliest effective time so re-revoking can
                // never push an entry into the future.
                self.exact
                    .entry(fp)
                    .and_modify(|at| *at = (*at).min(effective_at))
                    .or_insert(effective_at);
            }
            RevocationTarget::Pattern(pattern) => {
                for (existing, at) in &mut self.prefixes {
                    if *existing == pattern {
                        *at = (*at).min(effective_at);
                        return;
                    }
                }
                self.prefixes.push((pattern, effective_at));
            }
        }
    }

    fn hits(&self, capability: &Capability, at: Timestamp) -> bool {
        if let Some(&effective) = self.exact.get(&capability.fingerprint()) {
            if effective <= at {
                return true;
            }
        }
        for ancestor in capability.issuer_chain() {
            if let Some(&effective) = self.exact.get(ancestor) {
                if effective <= at {
                    return true;
                }
            }
        }
        self.prefixes
            .iter()
            .any(|(pattern, effective)| *effective <= at && capability.pattern().refines(pattern))
    }
}

/// The engine's revocation state, optionally backed by an append-only log.
pub struct RevocationRegistry {
    index: RwLock<Index>,
    /// Serializes writers and owns the log file handle; never nested
    /// inside the index lock.
    log: Mutex<Option<File>>,
    limits: Limits,
}

impl RevocationRegistry {
    /// A registry with no persistence.
    #[must_use]
    pub fn in_memory(limits: Limits) -> Self {
        Self {
            index: RwLock::new(Index::default()),
            log: Mutex::new(None),
            limits,
        }
    }

    /// Open (or create) a registry backed by the log at `path`,
    /// replaying any existing records.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Storage`] on I/O failures or a corrupt log.
    pub fn open(path: impl AsRef<Path>, limits: Limits) -> EngineResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| EngineError::Storage(e.to_string()))?;
        }

        let mut index = Index::default();
        if path.exists() {
            let file = File::open(path).map_err(|e| EngineError::Storage(e.to_string()))?;
            Self::replay(BufReader::new(file), &limits, &mut index)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| EngineError::Storage(e.to_string()))?;

        Ok(Self {
            index: RwLock::new(index),
            log: Mutex::new(Some(file)),
            limits,
        })
    }

    fn replay(mut reader: impl Read, limits: &Limits, index: &mut Index) -> EngineResult<()> {
        loop {
            let mut len_bytes = [0u8; 4];
            match reader.read_exact(&mut len_bytes) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(()),
                Err(e) => return Err(EngineError::Storage(e.to_string())),
            }
            let record_len = u32::from_le_bytes(len_bytes) as usize;
            if record_len < 9 {
                return Err(EngineError::Storage(format!(
                    "revocation record too short: {record_len} bytes"
                )));
            }
            let mut record = vec![0u8; record_len];
            reader
                .read_exact(&mut record)
                .map_err(|e| EngineError::Storage(format!("truncated revocation log: {e}")))?;

            let kind = record[0];
            let mut at_bytes = [0u8; 8];
            at_bytes.copy_from_slice(&record[1..9]);
            let effective_at = Timestamp::from_be_bytes(at_bytes);
            let payload = &record[9..];

            let target = match kind {
                KIND_FINGERPRINT => {
                    let fp = Fingerprint::try_from_slice(payload).ok_or_else(|| {
                        EngineError::Storage("bad fingerprint payload in revocation log".into())
                    })?;
                    RevocationTarget::Fingerprint(fp)
                }
                KIND_PATTERN => {
                    let text = std::str::from_utf8(payload).map_err(|_| {
                        EngineError::Storage("bad pattern payload in revocation log".into())
                    })?;
                    let pattern = Pattern::parse_with(text, limits)
                        .map_err(|e| EngineError::Storage(format!("bad pattern in log: {e}")))?;
                    RevocationTarget::Pattern(pattern)
                }
                other => {
                    return Err(EngineError::Storage(format!(
                        "unknown revocation record kind {other}"
                    )));
                }
            };
            index.apply(target, effective_at);
        }
    }

    fn encode_record(target: &RevocationTarget, effective_at: Timestamp) -> Vec<u8> {
        let (kind, payload): (u8, Vec<u8>) = match target {
            RevocationTarget::Fingerprint(fp) => (KIND_FINGERPRINT, fp.as_bytes().to_vec()),
            RevocationTarget::Pattern(pattern) => (KIND_PATTERN, pattern.canonical_bytes()),
        };
        let record_len = payload.len().saturating_add(9);
        let mut out = Vec::with_capacity(record_len.saturating_add(4));
        out.extend_from_slice(&u32::try_from(record_len).unwrap_or(u32::MAX).to_le_bytes());
        out.push(kind);
        out.extend_from_slice(&effective_at.to_be_bytes());
        out.extend_from_slice(&payload);
        out
    }

    /// Revoke a fingerprint or a pattern prefix, effective at
    /// `effective_at`.
    ///
    /// The record is durable before it becomes visible to readers; once
    /// this returns, every subsequent [`RevocationRegistry::is_revoked`]
    /// for an affected capability answers `true`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Storage`] if the log write fails (the
    /// in-memory index is then left unchanged), or
    /// [`EngineError::Canceled`].
    pub fn revoke(
        &self,
        target: impl Into<RevocationTarget>,
        effective_at: Timestamp,
        ctx: &CallContext,
    ) -> EngineResult<()> {
        ctx.check()?;
        let target = target.into();

        {
            let mut log = self
                .log
                .lock()
                .map_err(|_| EngineError::Storage("revocation log lock poisoned".into()))?;
            if let Some(file) = log.as_mut() {
                let record = Self::encode_record(&target, effective_at);
                file.write_all(&record)
                    .and_then(|()| file.sync_data())
                    .map_err(|e| EngineError::Storage(e.to_string()))?;
            }
        }

        match &target {
            RevocationTarget::Fingerprint(fp) => {
                info!(fingerprint = %fp.short(), %effective_at, "revoked capability");
            }
            RevocationTarget::Pattern(pattern) => {
                info!(%pattern, %effective_at, "revoked pattern prefix");
            }
        }

        let mut index = self
            .index
            .write()
            .map_err(|_| EngineError::Storage("revocation index lock poisoned".into()))?;
        index.apply(target, effective_at);
        Ok(())
    }

    /// Is `capability` revoked as of `at`?
    ///
    /// True iff an exact entry with `effective_at <= at` names the
    /// capability's fingerprint or any fingerprint in its issuer chain,
    /// or a prefix entry with `effective_at <= at` is refined by the
    /// capability's pattern.
    #[must_use]
    pub fn is_revoked(&self, capability: &Capability, at: Timestamp) -> bool {
        match self.index.read() {
            Ok(index) => index.hits(capability, at),
            // A poisoned lock cannot un-revoke anything: fail closed.
            Err(_) => true,
        }
    }

    /// Drop entries that can no longer affect any live capability.
    ///
    /// `cutoff` is the caller's assertion that every capability an entry
    /// effective at or before that instant could revoke has expired
    /// (typically `now - max_validity`). Returns the number of entries
    /// removed. The log is not rewritten; reaped entries disappear from
    /// the index and are skipped as no-ops on replay only once the log
    /// is compacted out of band.
    pub fn reap(&self, cutoff: Timestamp) -> usize {
        let Ok(mut index) = self.index.write() else {
            return 0;
        };
        let before = index.exact.len().saturating_add(index.prefixes.len());
        index.exact.retain(|_, at| *at > cutoff);
        index.prefixes.retain(|(_, at)| *at > cutoff);
        before.saturating_sub(index.exact.len().saturating_add(index.prefixes.len()))
    }

    /// Number of live entries (exact plus prefix).
    #[must_use]
    pub fn len(&self) -> usize {
        match self.index.read() {
            Ok(index) => index.exact.len().saturating_add(index.prefixes.len()),
            Err(_) => 0,
        }
    }

    /// True when no revocations are recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The limits used to parse patterns replayed from the log.
    #[must_use]
    pub fn limits(&self) -> &Limits {
        &self.limits
    }
}

impl std::fmt::Debug for RevocationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RevocationRegistry")
            .field("entries", &self.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use canopy_core::Timestamp;
    use canopy_crypto::KeyMaterial;

    fn pat(s: &str) -> Pattern {
        Pattern::parse(s).unwrap()
    }

    fn cap(pattern: &str, chain: Vec<Fingerprint>) -> Capability {
        Capability::assemble(
            pat(pattern),
            Timestamp::from_millis(0),
            Timestamp::from_millis(1_000_000),
            chain,
            KeyMaterial::from_bytes(vec![1; 64]),
        )
        .unwrap()
    }

    #[test]
    fn test_exact_revocation_hits_self() {
        let registry = RevocationRegistry::in_memory(Limits::default());
        let target = cap("a/b/**", vec![]);

        assert!(!registry.is_revoked(&target, Timestamp::from_millis(50)));
        registry
            .revoke(
                target.fingerprint(),
                Timestamp::from_millis(10),
                &CallContext::background(),
            )
            .unwrap();
        assert!(registry.is_revoked(&target, Timestamp::from_millis(50)));
        // Before the effective instant the capability is still live.
        assert!(!registry.is_revoked(&target, Timestamp::from_millis(5)));
    }

    #[test]
    fn test_exact_revocation_hits_descendants() {
        let registry = RevocationRegistry::in_memory(Limits::default());
        let parent_fp = Fingerprint::from_bytes([4u8; 32]);
        let child = cap("a/b/c/**", vec![Fingerprint::from_bytes([2u8; 32]), parent_fp]);

        registry
            .revoke(parent_fp, Timestamp::from_millis(0), &CallContext::background())
            .unwrap();
        assert!(registry.is_revoked(&child, Timestamp::from_millis(1)));
    }

    #[test]
    fn test_prefix_revocation_direction() {
        let registry = RevocationRegistry::in_memory(Limits::default());
        registry
            .revoke(
                pat("facility/zone-a/**"),
                Timestamp::from_millis(0),
                &CallContext::background(),
            )
            .unwrap();

        // Narrower grants under the prefix are revoked.
        let narrower = cap("facility/zone-a/bin/*/sensor-data/**", vec![]);
        assert!(registry.is_revoked(&narrower, Timestamp::from_millis(1)));

        // Wider or unrelated grants are not.
        let wider = cap("facility/**", vec![]);
        assert!(!registry.is_revoked(&wider, Timestamp::from_millis(1)));
        let elsewhere = cap("facility/zone-b/**", vec![]);
        assert!(!registry.is_revoked(&elsewhere, Timestamp::from_millis(1)));
    }

    #[test]
    fn test_re_revocation_keeps_earliest_instant() {
        let registry = RevocationRegistry::in_memory(Limits::default());
        let target = cap("a/**", vec![]);

        registry
            .revoke(target.fingerprint(), Timestamp::from_millis(100), &CallContext::background())
            .unwrap();
        registry
            .revoke(target.fingerprint(), Timestamp::from_millis(500), &CallContext::background())
            .unwrap();
        // The later record must not resurrect the window 100..500.
        assert!(registry.is_revoked(&target, Timestamp::from_millis(200)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_reap_removes_stale_entries() {
        let registry = RevocationRegistry::in_memory(Limits::default());
        registry
            .revoke(
                Fingerprint::from_bytes([1u8; 32]),
                Timestamp::from_millis(100),
                &CallContext::background(),
            )
            .unwrap();
        registry
            .revoke(pat("a/**"), Timestamp::from_millis(900), &CallContext::background())
            .unwrap();

        assert_eq!(registry.reap(Timestamp::from_millis(500)), 1);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.reap(Timestamp::from_millis(500)), 0);
    }

    #[test]
    fn test_revoke_honors_cancellation() {
        let registry = RevocationRegistry::in_memory(Limits::default());
        let ctx = CallContext::background();
        ctx.cancel();
        let err = registry
            .revoke(pat("a/**"), Timestamp::from_millis(0), &ctx)
            .unwrap_err();
        assert_eq!(err, EngineError::Canceled);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_persistence_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("revocations.log");
        let target = cap("facility/zone-a/bin/**", vec![]);

        {
            let registry = RevocationRegistry::open(&path, Limits::default()).unwrap();
            registry
                .revoke(target.fingerprint(), Timestamp::from_millis(10), &CallContext::background())
                .unwrap();
            registry
                .revoke(
                    pat("facility/zone-a/**"),
                    Timestamp::from_millis(20),
                    &CallContext::background(),
                )
                .unwrap();
        }

        let reopened = RevocationRegistry::open(&path, Limits::default()).unwrap();
        assert_eq!(reopened.len(), 2);
        assert!(reopened.is_revoked(&target, Timestamp::from_millis(30)));
    }

    #[test]
    fn test_replay_rejects_corrupt_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("revocations.log");

        // Truncated record: length says 40 bytes but only 5 follow.
        let mut bytes = 40u32.to_le_bytes().to_vec();
        bytes.extend_from_slice(&[KIND_FINGERPRINT, 0, 0, 0, 0]);
        std::fs::write(&path, &bytes).unwrap();
        assert!(matches!(
            RevocationRegistry::open(&path, Limits::default()),
            Err(EngineError::Storage(_))
        ));

        // Unknown kind byte.
        let mut record = Vec::new();
        record.extend_from_slice(&9u32.to_le_bytes());
        record.push(7);
        record.extend_from_slice(&[0u8; 8]);
        std::fs::write(&path, &record).unwrap();
        assert!(matches!(
            RevocationRegistry::open(&path, Limits::default()),
            Err(EngineError::Storage(_))
        ));
    }

    #[test]
    fn test_empty_log_file_is_fine() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("revocations.log");
        std::fs::write(&path, b"").unwrap();
        let registry = RevocationRegistry::open(&path, Limits::default()).unwrap();
        assert!(registry.is_empty());
    }
}
