//! Command implementations.

use std::path::Path;

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use tracing::info;

use canopy_capabilities::{CallContext, Capability, Decision, Engine, EngineConfig};
use canopy_core::{Identity, Pattern, Timestamp};
use canopy_crypto::{Fingerprint, MasterSecret};

use crate::expiry::parse_expiry;
use crate::{EXIT_DENY, EXIT_OK};

/// The engine plus the paths it was opened from.
pub(crate) struct State {
    engine: Engine,
}

impl State {
    /// Open (or initialize) the state directory: master secret,
    /// revocation log, and an optional `config.toml`.
    pub(crate) fn open(dir: &Path) -> Result<Self> {
        let secret = MasterSecret::load_or_generate(dir.join("master.key"))
            .context("loading master secret")?;

        let config = match std::fs::read_to_string(dir.join("config.toml")) {
            Ok(text) => EngineConfig::from_toml_str(&text).context("parsing config.toml")?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => EngineConfig::default(),
            Err(e) => return Err(e).context("reading config.toml"),
        };

        let engine = Engine::open(config, secret, dir.join("revocations.log"))
            .context("opening engine state")?;
        Ok(Self { engine })
    }

    fn read_capability(&self, arg: &str) -> Result<Capability> {
        let text = if let Some(path) = arg.strip_prefix('@') {
            std::fs::read_to_string(path).with_context(|| format!("reading {path}"))?
        } else {
            arg.to_owned()
        };
        let bytes = BASE64
            .decode(text.trim())
            .context("capability is not valid base64")?;
        Ok(Capability::from_bytes(
            &bytes,
            &self.engine.config().limits(),
        )?)
    }

    fn print_capability(&self, capability: &Capability) {
        println!("{}", BASE64.encode(capability.to_bytes()));
    }
}

pub(crate) fn mint_root(state: &State, pattern: &str, expiry: &str) -> Result<u8> {
    let pattern = Pattern::parse_with(pattern, &state.engine.config().limits())?;
    let now = Timestamp::now();
    let not_after = parse_expiry(expiry, now)?;

    let capability = state
        .engine
        .mint_root(&pattern, now, not_after, &CallContext::background())?;
    info!(fingerprint = %capability.fingerprint(), "minted root");
    state.print_capability(&capability);
    Ok(EXIT_OK)
}

pub(crate) fn delegate(state: &State, parent: &str, pattern: &str, expiry: &str) -> Result<u8> {
    let parent = state.read_capability(parent)?;
    let pattern = Pattern::parse_with(pattern, &state.engine.config().limits())?;
    let now = Timestamp::now();
    let not_after = parse_expiry(expiry, now)?;

    let capability = state.engine.delegate(
        &parent,
        &pattern,
        not_after,
        now,
        &CallContext::background(),
    )?;
    info!(
        parent = %parent.fingerprint(),
        child = %capability.fingerprint(),
        "delegated"
    );
    state.print_capability(&capability);
    Ok(EXIT_OK)
}

pub(crate) fn revoke(state: &State, target: &str) -> Result<u8> {
    let now = Timestamp::now();
    let ctx = CallContext::background();

    // A 64-char hex string is a fingerprint; anything else is a pattern.
    if let Ok(fingerprint) = Fingerprint::from_hex(target) {
        state.engine.revoke(fingerprint, now, &ctx)?;
        println!("revoked fingerprint {fingerprint}");
    } else {
        let pattern = Pattern::parse_with(target, &state.engine.config().limits())?;
        state.engine.revoke(pattern.clone(), now, &ctx)?;
        println!("revoked pattern {pattern}");
    }
    Ok(EXIT_OK)
}

pub(crate) fn check(state: &State, capability: &str, identity: &str) -> Result<u8> {
    let capability = state.read_capability(capability)?;
    let identity = Identity::parse_with(identity, &state.engine.config().limits())?;
    let now = Timestamp::now();

    let decision = state
        .engine
        .decide(&capability, &identity, now, &CallContext::background())?;
    println!("{decision}");
    match decision {
        Decision::Allow => Ok(EXIT_OK),
        Decision::Deny(_) => Ok(EXIT_DENY),
    }
}
