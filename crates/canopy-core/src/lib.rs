//! Canopy Core - Identity and pattern model for the capability engine.
//!
//! This crate provides:
//! - Hierarchical identity paths (`facility/zone-a/bin/BIN-001/...`)
//! - Authorization patterns with single-level (`*`) and terminal
//!   multi-level (`**`) wildcards
//! - The coverage predicate (does a pattern match an identity?) and the
//!   refinement relation (does one pattern narrow another?)
//! - A compiled-pattern cache for the decision hot path
//!
//! Everything here is pure value logic: no I/O, no clocks besides the
//! [`Timestamp`] convenience constructor, no async.
//!
//! # Example
//!
//! ```
//! use canopy_core::{Identity, Pattern};
//!
//! let pattern = Pattern::parse("facility/zone-a/bin/*/sensor-data/**").unwrap();
//! let identity = Identity::parse("facility/zone-a/bin/BIN-001/sensor-data/fill-level").unwrap();
//!
//! assert!(pattern.covers(&identity));
//!
//! let narrower = Pattern::parse("facility/zone-a/bin/BIN-001/sensor-data/**").unwrap();
//! assert!(narrower.refines(&pattern));
//! assert!(!pattern.refines(&narrower));
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod cache;
mod compiled;
mod error;
mod identity;
mod pattern;
mod time;

pub use cache::LruCache;
pub use compiled::{CompiledPattern, PatternCache, DEFAULT_PATTERN_CACHE_CAPACITY};
pub use error::{ParseError, ParseResult};
pub use identity::Identity;
pub use pattern::{Limits, Pattern, PatternOrder, PatternSegment, DEFAULT_MAX_DEPTH};
pub use time::Timestamp;
