//! Canopy CLI - Operator surface for the capability engine.
//!
//! A thin wrapper over [`canopy_capabilities::Engine`]: mint roots,
//! delegate narrowed grants, revoke, and check access. Capabilities
//! travel as base64 blobs on stdin/stdout so they can be piped between
//! invocations and machines.
//!
//! Exit codes: 0 allow/success, 1 structural or operational error,
//! 2 deny, 3 policy refusal.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod commands;
mod expiry;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use canopy_capabilities::{EngineError, ExpiryViolation};
use canopy_core::ParseError;

/// Exit code for allow and other successes.
const EXIT_OK: u8 = 0;
/// Exit code for structural and operational errors.
const EXIT_STRUCTURAL: u8 = 1;
/// Exit code for denied operations.
const EXIT_DENY: u8 = 2;
/// Exit code for policy refusals.
const EXIT_POLICY: u8 = 3;

/// Canopy - hierarchical capability engine
#[derive(Parser)]
#[command(name = "canopy")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory holding the master secret and revocation log
    #[arg(long, global = true, env = "CANOPY_STATE_DIR", default_value = ".canopy")]
    state_dir: PathBuf,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Mint a root capability for a pattern
    MintRoot {
        /// Authorized pattern, e.g. `facility/zone-a/bin/*/sensor-data/**`
        pattern: String,
        /// Expiry: RFC 3339, unix milliseconds, or a duration like `30m`
        expiry: String,
    },

    /// Derive a narrowed child capability from a parent
    Delegate {
        /// Parent capability: a base64 blob, or `@path` to read one
        parent: String,
        /// Child pattern; must refine the parent's
        pattern: String,
        /// Expiry: RFC 3339, unix milliseconds, or a duration like `30m`
        expiry: String,
    },

    /// Revoke a capability fingerprint or a whole pattern prefix
    Revoke {
        /// A 64-char hex fingerprint, or a pattern such as `facility/zone-a/**`
        target: String,
    },

    /// Check whether a capability authorizes an identity right now
    Check {
        /// Capability: a base64 blob, or `@path` to read one
        capability: String,
        /// Identity path, e.g. `facility/zone-a/bin/BIN-001/sensor-data/fill-level`
        identity: String,
    },
}

/// Map an error to the documented exit code.
fn exit_code_for(err: &anyhow::Error) -> u8 {
    if err.downcast_ref::<ParseError>().is_some() {
        return EXIT_STRUCTURAL;
    }
    match err.downcast_ref::<EngineError>() {
        Some(EngineError::Policy { .. }) => EXIT_POLICY,
        Some(
            EngineError::Revoked
            | EngineError::NotRefinement
            | EngineError::Incomparable
            | EngineError::Expired(
                ExpiryViolation::ParentExpired { .. }
                | ExpiryViolation::BeyondParent { .. }
                | ExpiryViolation::AlreadyPast { .. }
                | ExpiryViolation::OutsideWindow { .. },
            ),
        ) => EXIT_DENY,
        _ => EXIT_STRUCTURAL,
    }
}

fn run(cli: Cli) -> Result<u8> {
    let state = commands::State::open(&cli.state_dir)?;
    match cli.command {
        Commands::MintRoot { pattern, expiry } => commands::mint_root(&state, &pattern, &expiry),
        Commands::Delegate {
            parent,
            pattern,
            expiry,
        } => commands::delegate(&state, &parent, &pattern, &expiry),
        Commands::Revoke { target } => commands::revoke(&state, &target),
        Commands::Check {
            capability,
            identity,
        } => commands::check(&state, &capability, &identity),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match run(cli) {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(exit_code_for(&err))
        }
    }
}
