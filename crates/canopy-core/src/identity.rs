//! Hierarchical identity paths.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ParseError, ParseResult};
use crate::pattern::{Limits, DEFAULT_MAX_DEPTH};

/// Check one path segment against the literal alphabet.
///
/// Segments are printable ASCII (no whitespace, no control bytes),
/// excluding the separator `/` and the wildcard `*`. Matching is
/// byte-exact: no case folding, no percent-decoding, no normalization.
pub(crate) fn validate_literal(segment: &str, index: usize) -> ParseResult<()> {
    if segment.is_empty() {
        return Err(ParseError::EmptySegment { index });
    }
    for &byte in segment.as_bytes() {
        if byte == b'*' {
            return Err(ParseError::EmbeddedWildcard { index });
        }
        if !byte.is_ascii_graphic() || byte == b'/' {
            return Err(ParseError::InvalidByte { byte, index });
        }
    }
    Ok(())
}

/// A canonical hierarchical path to a protected object.
///
/// An identity is an ordered sequence of 1..=`max_depth` segments, e.g.
/// `facility/zone-a/bin/BIN-001/sensor-data/fill-level`. Two identities are
/// equal iff their segment sequences are byte-equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identity {
    segments: Vec<String>,
}

impl Identity {
    /// Parse an identity path using the default depth limit.
    ///
    /// # Errors
    ///
    /// Returns a [`ParseError`] for empty input, empty segments, bytes
    /// outside the segment alphabet, wildcard segments, or depth overflow.
    pub fn parse(input: &str) -> ParseResult<Self> {
        Self::parse_with(input, &Limits::default())
    }

    /// Parse an identity path under explicit limits.
    ///
    /// # Errors
    ///
    /// Same as [`Identity::parse`].
    pub fn parse_with(input: &str, limits: &Limits) -> ParseResult<Self> {
        if input.is_empty() {
            return Err(ParseError::Empty);
        }

        let mut segments = Vec::new();
        for (index, segment) in input.split('/').enumerate() {
            if segment == "*" || segment == "**" {
                return Err(ParseError::WildcardInIdentity { index });
            }
            validate_literal(segment, index)?;
            segments.push(segment.to_owned());
        }

        if segments.len() > limits.max_depth {
            return Err(ParseError::DepthExceeded {
                depth: segments.len(),
                max: limits.max_depth,
            });
        }

        Ok(Self { segments })
    }

    /// Number of segments.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    /// The path segments, root first.
    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// The canonical byte encoding: segments joined with `/`.
    ///
    /// This is the exact representation hashed into fingerprints and used
    /// as a cache key; it round-trips through [`Identity::parse`].
    #[must_use]
    pub fn canonical_bytes(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments.join("/"))
    }
}

impl TryFrom<String> for Identity {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        // Serde deserialization path; wire-decoded identities are
        // re-checked against engine limits at the decision point.
        Self::parse_with(
            &value,
            &Limits {
                max_depth: DEFAULT_MAX_DEPTH,
            },
        )
    }
}

impl From<Identity> for String {
    fn from(value: Identity) -> Self {
        value.to_string()
    }
}

impl std::str::FromStr for Identity {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
