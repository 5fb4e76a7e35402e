//! Prelude module - commonly used types for convenient import.
//!
//! Use `use canopy_core::prelude::*;` to import all essential types.
//!
//! # Example
//!
//! ```rust
//! use canopy_core::prelude::*;
//!
//! let pattern = Pattern::parse("facility/*/sensor-data/**").unwrap();
//! let identity = Identity::parse("facility/zone-a/sensor-data/fill-level").unwrap();
//! assert!(pattern.covers(&identity));
//! ```

// Errors
pub use crate::{ParseError, ParseResult};

// Identity and pattern model
pub use crate::{Identity, Limits, Pattern, PatternOrder, PatternSegment};

// Matching
pub use crate::{CompiledPattern, PatternCache};

// Time
pub use crate::Timestamp;
