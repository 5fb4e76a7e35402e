//! Authorization patterns and the coverage / refinement relations.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ParseError, ParseResult};
use crate::identity::{validate_literal, Identity};

/// Default maximum number of segments in an identity or pattern.
pub const DEFAULT_MAX_DEPTH: usize = 8;

/// Structural limits applied while parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Maximum number of segments in an identity or pattern.
    pub max_depth: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

/// One position in a pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PatternSegment {
    /// Matches exactly this segment, byte for byte.
    Literal(String),
    /// `*` - matches exactly one segment, whatever its bytes.
    Any,
    /// `**` - matches one or more trailing segments; terminal only.
    Rest,
}

impl fmt::Display for PatternSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(s) => write!(f, "{s}"),
            Self::Any => write!(f, "*"),
            Self::Rest => write!(f, "**"),
        }
    }
}

/// How two patterns relate under refinement.
///
/// `Q refines P` means every identity covered by `Q` is also covered by
/// `P`. Incomparability is a real outcome of the relation, not a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternOrder {
    /// The two patterns cover exactly the same identities.
    Equal,
    /// `self` covers a subset of the other pattern's identities.
    Refines,
    /// `self` covers a superset of the other pattern's identities.
    Widens,
    /// Neither pattern refines the other.
    Incomparable,
}

/// An identity path with wildcards: the authorization surface of a
/// capability.
///
/// A pattern covers a set of identities (see [`Pattern::covers`]) and can
/// be narrowed by delegation into any pattern that refines it (see
/// [`Pattern::refines`]). `**` may only appear as the final segment and
/// matches *one or more* trailing segments: `a/**` covers `a/b` but not
/// the single-segment identity `a`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Pattern {
    segments: Vec<PatternSegment>,
}

impl Pattern {
    /// Parse a pattern using the default depth limit.
    ///
    /// # Errors
    ///
    /// Returns a [`ParseError`] for empty input, empty segments, bytes
    /// outside the segment alphabet, embedded wildcards (`a*`), a
    /// non-terminal `**`, or depth overflow.
    pub fn parse(input: &str) -> ParseResult<Self> {
        Self::parse_with(input, &Limits::default())
    }

    /// Parse a pattern under explicit limits.
    ///
    /// # Errors
    ///
    /// Same as [`Pattern::parse`].
    pub fn parse_with(input: &str, limits: &Limits) -> ParseResult<Self> {
        if input.is_empty() {
            return Err(ParseError::Empty);
        }

        let raw: Vec<&str> = input.split('/').collect();
        let last = raw.len().saturating_sub(1);

        let mut segments = Vec::with_capacity(raw.len());
        for (index, segment) in raw.iter().enumerate() {
            match *segment {
                "*" => segments.push(PatternSegment::Any),
                "**" => {
                    if index != last {
                        return Err(ParseError::RestNotTerminal { index });
                    }
                    segments.push(PatternSegment::Rest);
                }
                literal => {
                    validate_literal(literal, index)?;
                    segments.push(PatternSegment::Literal(literal.to_owned()));
                }
            }
        }

        // A pattern longer than the depth limit cannot cover any identity.
        if segments.len() > limits.max_depth {
            return Err(ParseError::DepthExceeded {
                depth: segments.len(),
                max: limits.max_depth,
            });
        }

        Ok(Self { segments })
    }

    /// Number of pattern segments (the `**` counts as one).
    #[must_use]
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// True for the (unrepresentable) empty pattern; always false for
    /// parsed patterns.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// The pattern segments, root first.
    #[must_use]
    pub fn segments(&self) -> &[PatternSegment] {
        &self.segments
    }

    /// Position of the terminal `**`, if present.
    #[must_use]
    pub fn rest_index(&self) -> Option<usize> {
        match self.segments.last() {
            Some(PatternSegment::Rest) => Some(self.segments.len().saturating_sub(1)),
            _ => None,
        }
    }

    /// Smallest identity depth this pattern can cover.
    #[must_use]
    pub fn min_depth(&self) -> usize {
        match self.rest_index() {
            // `**` demands at least one trailing segment.
            Some(rest) => rest.saturating_add(1),
            None => self.segments.len(),
        }
    }

    /// The canonical byte encoding: segments joined with `/`.
    ///
    /// Used for fingerprints, derivation keys and the compiled-pattern
    /// cache; round-trips through [`Pattern::parse`].
    #[must_use]
    pub fn canonical_bytes(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }

    /// Does this pattern cover the given identity?
    ///
    /// Segments correspond left to right: a literal must equal the
    /// identity segment, `*` matches any one segment, and the terminal
    /// `**` matches all remaining segments provided there is at least one.
    /// Without `**` the lengths must be equal.
    #[must_use]
    pub fn covers(&self, identity: &Identity) -> bool {
        let id_segments = identity.segments();

        match self.rest_index() {
            None => {
                self.segments.len() == id_segments.len()
                    && self
                        .segments
                        .iter()
                        .zip(id_segments)
                        .all(|(p, s)| segment_covers(p, s))
            }
            Some(rest) => {
                identity.depth() >= rest.saturating_add(1)
                    && self.segments[..rest]
                        .iter()
                        .zip(id_segments)
                        .all(|(p, s)| segment_covers(p, s))
            }
        }
    }

    /// Does every identity covered by `self` fall inside `parent`'s set?
    ///
    /// This is the delegation-narrowing relation: a child grant must
    /// refine its parent. The check is purely structural and never
    /// depends on runtime state.
    #[must_use]
    pub fn refines(&self, parent: &Self) -> bool {
        match (self.rest_index(), parent.rest_index()) {
            // Unbounded child under a bounded parent can always reach
            // deeper than the parent allows.
            (Some(_), None) => false,

            (None, None) => {
                self.segments.len() == parent.segments.len()
                    && self
                        .segments
                        .iter()
                        .zip(&parent.segments)
                        .all(|(q, p)| segment_refines(q, p))
            }

            // Parent ends in `**` at position `rest`: the child's prefix
            // must refine the parent's literal prefix, and the child must
            // guarantee at least one segment under the `**`.
            (None, Some(rest)) => {
                self.segments.len() >= rest.saturating_add(1)
                    && self.segments[..rest]
                        .iter()
                        .zip(&parent.segments[..rest])
                        .all(|(q, p)| segment_refines(q, p))
            }

            // Both end in `**`: the child's wildcard may only sit at the
            // same position or deeper, with a refining prefix.
            (Some(child_rest), Some(parent_rest)) => {
                parent_rest <= child_rest
                    && self.segments[..parent_rest]
                        .iter()
                        .zip(&parent.segments[..parent_rest])
                        .all(|(q, p)| segment_refines(q, p))
            }
        }
    }

    /// Full comparison under the refinement order.
    #[must_use]
    pub fn compare(&self, other: &Self) -> PatternOrder {
        match (self.refines(other), other.refines(self)) {
            (true, true) => PatternOrder::Equal,
            (true, false) => PatternOrder::Refines,
            (false, true) => PatternOrder::Widens,
            (false, false) => PatternOrder::Incomparable,
        }
    }
}

/// Does a single pattern segment cover a concrete identity segment?
fn segment_covers(pattern: &PatternSegment, segment: &str) -> bool {
    match pattern {
        PatternSegment::Literal(lit) => lit == segment,
        PatternSegment::Any | PatternSegment::Rest => true,
    }
}

/// Positional refinement between non-`**` segments.
fn segment_refines(child: &PatternSegment, parent: &PatternSegment) -> bool {
    match (child, parent) {
        (PatternSegment::Literal(a), PatternSegment::Literal(b)) => a == b,
        (PatternSegment::Literal(_) | PatternSegment::Any, PatternSegment::Any) => true,
        _ => false,
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, segment) in self.segments.iter().enumerate() {
            if index > 0 {
                write!(f, "/")?;
            }
            write!(f, "{segment}")?;
        }
        Ok(())
    }
}

impl TryFrom<String> for Pattern {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Pattern> for String {
    fn from(value: Pattern) -> Self {
        value.to_string()
    }
}

impl std::str::FromStr for Pattern {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pat(s: &str) -> Pattern {
        Pattern::parse(s).unwrap()
    }

    fn id(s: &str) -> Identity {
        Identity::parse(s).unwrap()
    }

    #[test]
    fn test_parse_segments() {
        let p = pat("facility/*/bin/**");
        assert_eq!(p.len(), 4);
        assert_eq!(p.rest_index(), Some(3));
        assert_eq!(p.min_depth(), 4);
        assert_eq!(p.to_string(), "facility/*/bin/**");
    }

    #[test]
    fn test_reject_interior_rest() {
        assert_eq!(
            Pattern::parse("a/**/c"),
            Err(ParseError::RestNotTerminal { index: 1 })
        );
    }

    #[test]
    fn test_reject_embedded_wildcard() {
        assert_eq!(
            Pattern::parse("a/b*/c"),
            Err(ParseError::EmbeddedWildcard { index: 1 })
        );
        assert_eq!(
            Pattern::parse("a/***"),
            Err(ParseError::EmbeddedWildcard { index: 1 })
        );
    }

    #[test]
    fn test_reject_unmatchable_depth() {
        assert!(matches!(
            Pattern::parse("a/b/c/d/e/f/g/h/**"),
            Err(ParseError::DepthExceeded { depth: 9, max: 8 })
        ));
    }

    #[test]
    fn test_covers_exact() {
        assert!(pat("a/b/c").covers(&id("a/b/c")));
        assert!(!pat("a/b/c").covers(&id("a/b/x")));
        assert!(!pat("a/b/c").covers(&id("a/b")));
        assert!(!pat("a/b/c").covers(&id("a/b/c/d")));
    }

    #[test]
    fn test_covers_single_wildcard() {
        assert!(pat("a/*/c").covers(&id("a/anything/c")));
        assert!(!pat("a/*/c").covers(&id("a/c")));
        // Trailing `*` matches exactly one segment.
        assert!(pat("a/b/*").covers(&id("a/b/c")));
        assert!(!pat("a/b/*").covers(&id("a/b")));
        assert!(!pat("a/b/*").covers(&id("a/b/c/d")));
    }

    #[test]
    fn test_covers_rest_requires_one_segment() {
        // `a/**` does not cover the single-segment identity `a`.
        assert!(!pat("a/**").covers(&id("a")));
        assert!(pat("a/**").covers(&id("a/b")));
        assert!(pat("a/**").covers(&id("a/b/c/d")));
    }

    #[test]
    fn test_covers_bare_rest() {
        // `**` alone covers every identity of depth >= 1.
        assert!(pat("**").covers(&id("a")));
        assert!(pat("**").covers(&id("a/b/c/d/e/f/g/h")));
    }

    #[test]
    fn test_covers_spec_example() {
        let p = pat("facility/zone-a/bin/*/sensor-data/**");
        assert!(p.covers(&id("facility/zone-a/bin/BIN-001/sensor-data/fill-level")));
        assert!(p.covers(&id("facility/zone-a/bin/BIN-002/sensor-data/fill-level")));
        assert!(!p.covers(&id("facility/zone-a/bin/BIN-001/sensor-data")));
        assert!(!p.covers(&id("facility/zone-b/bin/BIN-001/sensor-data/fill-level")));
    }

    #[test]
    fn test_refines_literals_and_any() {
        assert!(pat("a/b").refines(&pat("a/b")));
        assert!(pat("a/b").refines(&pat("a/*")));
        assert!(pat("a/*").refines(&pat("a/*")));
        assert!(!pat("a/*").refines(&pat("a/b")));
        assert!(!pat("a/b").refines(&pat("a/c")));
        assert!(!pat("a/b").refines(&pat("a/b/c")));
    }

    #[test]
    fn test_refines_under_rest() {
        assert!(pat("a/b/c").refines(&pat("a/**")));
        assert!(pat("a/b/**").refines(&pat("a/**")));
        assert!(pat("a/*/c").refines(&pat("a/**")));
        // The child must guarantee a segment under the parent's `**`.
        assert!(!pat("a").refines(&pat("a/**")));
        // A bounded parent never admits an unbounded child.
        assert!(!pat("a/**").refines(&pat("a/b")));
        assert!(!pat("a/**").refines(&pat("a/*")));
    }

    #[test]
    fn test_refines_rest_positions() {
        // `**` may move deeper, never shallower.
        assert!(pat("a/b/**").refines(&pat("a/**")));
        assert!(!pat("a/**").refines(&pat("a/b/**")));
        assert!(pat("**").covers(&id("a")));
        assert!(pat("a/**").refines(&pat("**")));
        assert!(!pat("**").refines(&pat("a/**")));
    }

    #[test]
    fn test_refines_spec_scenario() {
        let root = pat("facility/zone-a/bin/*/sensor-data/**");
        let narrowed = pat("facility/zone-a/bin/BIN-001/sensor-data/**");
        assert!(narrowed.refines(&root));
        assert!(!root.refines(&narrowed));
    }

    #[test]
    fn test_compare_orders() {
        assert_eq!(pat("a/b").compare(&pat("a/b")), PatternOrder::Equal);
        assert_eq!(pat("a/b").compare(&pat("a/*")), PatternOrder::Refines);
        assert_eq!(pat("a/*").compare(&pat("a/b")), PatternOrder::Widens);
        assert_eq!(pat("a/b").compare(&pat("x/*")), PatternOrder::Incomparable);
        assert_eq!(
            pat("a/**").compare(&pat("b/**")),
            PatternOrder::Incomparable
        );
    }

    #[test]
    fn test_refinement_implies_subset() {
        // Spot-check the semantic definition on a small universe.
        let patterns = [
            pat("a/b"),
            pat("a/*"),
            pat("a/**"),
            pat("**"),
            pat("a/b/**"),
            pat("a/b/c"),
            pat("*/b"),
        ];
        let identities = [
            id("a"),
            id("a/b"),
            id("a/c"),
            id("x/b"),
            id("a/b/c"),
            id("a/b/c/d"),
        ];

        for q in &patterns {
            for p in &patterns {
                if q.refines(p) {
                    for identity in &identities {
                        assert!(
                            !q.covers(identity) || p.covers(identity),
                            "{q} refines {p} but covers {identity} which {p} does not"
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn test_serde_as_string() {
        let p = pat("a/*/c/**");
        let json = serde_json::to_string(&p).unwrap();
        assert_eq!(json, "\"a/*/c/**\"");
        let back: Pattern = serde_json::from_str(&json).unwrap();
        assert_eq!(back, p);

        let bad: Result<Pattern, _> = serde_json::from_str("\"a/**/c\"");
        assert!(bad.is_err());
    }

    #[test]
    fn test_canonical_roundtrip() {
        for s in ["a", "**", "a/*/c", "facility/zone-a/bin/*/sensor-data/**"] {
            let p = pat(s);
            assert_eq!(p.canonical_bytes(), s.as_bytes());
            assert_eq!(Pattern::parse(s).unwrap(), p);
        }
    }
}
