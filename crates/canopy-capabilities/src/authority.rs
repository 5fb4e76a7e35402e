//! The central authority: master secret custody and root minting.

use std::sync::Arc;

use canopy_core::{Limits, Pattern, Timestamp};
use canopy_crypto::{Fingerprint, KeyMaterial, KeyScheme, MasterSecret};
use tracing::{debug, info};

use crate::capability::Capability;
use crate::context::CallContext;
use crate::error::{EngineError, EngineResult};

/// What the authority is willing to mint.
#[derive(Debug, Clone)]
pub struct AuthorityPolicy {
    /// Longest validity window, in milliseconds.
    pub max_validity_ms: i64,
    /// If set, every root pattern must refine this pattern.
    pub root_scope: Option<Pattern>,
    /// Depth limits applied to requested patterns.
    pub limits: Limits,
}

impl Default for AuthorityPolicy {
    fn default() -> Self {
        Self {
            max_validity_ms: crate::config::DEFAULT_MAX_VALIDITY_MS,
            root_scope: None,
            limits: Limits::default(),
        }
    }
}

impl AuthorityPolicy {
    fn refuse(reason: impl Into<String>) -> EngineError {
        EngineError::Policy {
            reason: reason.into(),
        }
    }

    /// Check a mint request against this policy.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Policy`] naming the violated rule.
    pub fn check_mint(
        &self,
        pattern: &Pattern,
        not_before: Timestamp,
        not_after: Timestamp,
    ) -> EngineResult<()> {
        if pattern.len() > self.limits.max_depth {
            return Err(Self::refuse(format!(
                "pattern depth {} exceeds configured maximum {}",
                pattern.len(),
                self.limits.max_depth
            )));
        }
        if not_before >= not_after {
            return Err(Self::refuse("validity window is empty"));
        }
        if not_before.millis_until(not_after) > self.max_validity_ms {
            return Err(Self::refuse(format!(
                "validity window exceeds maximum of {}ms",
                self.max_validity_ms
            )));
        }
        if let Some(scope) = &self.root_scope {
            if !pattern.refines(scope) {
                return Err(Self::refuse(format!(
                    "pattern is wider than the authority's scope {scope}"
                )));
            }
        }
        Ok(())
    }
}

/// Holds the master secret and mints root capabilities.
///
/// The secret never leaves this struct: root derivation happens inside
/// [`Authority::mint_root`], and delegation narrows existing material
/// through a [`KeyDesk`], which carries the scheme but not the secret.
pub struct Authority {
    secret: MasterSecret,
    scheme: Arc<dyn KeyScheme>,
    policy: AuthorityPolicy,
}

impl Authority {
    /// An authority over `secret` using the given scheme and policy.
    #[must_use]
    pub fn new(secret: MasterSecret, scheme: Arc<dyn KeyScheme>, policy: AuthorityPolicy) -> Self {
        Self {
            secret,
            scheme,
            policy,
        }
    }

    /// The active policy.
    #[must_use]
    pub fn policy(&self) -> &AuthorityPolicy {
        &self.policy
    }

    /// Mint a root capability for `pattern`, valid in
    /// `[not_before, not_after]`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Policy`] when the request violates the
    /// authority's policy, or [`EngineError::Canceled`].
    pub fn mint_root(
        &self,
        pattern: &Pattern,
        not_before: Timestamp,
        not_after: Timestamp,
        ctx: &CallContext,
    ) -> EngineResult<Capability> {
        ctx.check()?;
        self.policy.check_mint(pattern, not_before, not_after)?;

        let material = self.scheme.derive_root(&self.secret, pattern);
        let capability =
            Capability::assemble(pattern.clone(), not_before, not_after, Vec::new(), material)?;

        info!(
            fingerprint = %capability.fingerprint().short(),
            pattern = %pattern,
            %not_after,
            "minted root capability"
        );
        Ok(capability)
    }

    /// Versioned public parameters for embedders.
    ///
    /// Deterministic for a given master secret, and one-way: the secret
    /// cannot be recovered from them. Collaborators use these to tell
    /// authorities apart.
    #[must_use]
    pub fn public_params(&self) -> Vec<u8> {
        let commitment = Fingerprint::digest("canopy.authority.params.v1", &[self.secret.expose()]);
        let mut out = Vec::with_capacity(1 + Fingerprint::LEN);
        out.push(crate::capability::WIRE_VERSION);
        out.extend_from_slice(commitment.as_bytes());
        out
    }

    /// A narrowing handle for the delegation service.
    ///
    /// The desk shares the authority's scheme but cannot reach the
    /// master secret.
    #[must_use]
    pub fn key_desk(&self) -> KeyDesk {
        KeyDesk {
            scheme: Arc::clone(&self.scheme),
        }
    }
}

impl std::fmt::Debug for Authority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authority")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

/// Narrows key material on behalf of the delegation service.
///
/// Derivation below the root needs only the parent's material, so this
/// handle deliberately excludes the master secret.
#[derive(Clone)]
pub struct KeyDesk {
    scheme: Arc<dyn KeyScheme>,
}

impl KeyDesk {
    /// Derive child material for `child_pattern` from its parent.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotRefinement`] or
    /// [`EngineError::KeyMismatch`] (tampered parent material).
    pub fn narrow(
        &self,
        parent: &KeyMaterial,
        parent_pattern: &Pattern,
        child_pattern: &Pattern,
    ) -> EngineResult<KeyMaterial> {
        debug!(%parent_pattern, %child_pattern, "narrowing key material");
        Ok(self.scheme.narrow(parent, parent_pattern, child_pattern)?)
    }

    /// The scheme behind this desk, for the decision point's key check.
    #[must_use]
    pub fn scheme(&self) -> Arc<dyn KeyScheme> {
        Arc::clone(&self.scheme)
    }
}

impl std::fmt::Debug for KeyDesk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyDesk").finish_non_exhaustive()
    }
}
