//! Compiled patterns and the pattern-compile cache.
//!
//! Parsing and wildcard bookkeeping are cheap but not free; the decision
//! hot path matches the same capability patterns over and over. A
//! [`CompiledPattern`] is a flat segment-kind array sized for O(depth)
//! matching, and [`PatternCache`] memoizes compilations keyed by the
//! pattern's canonical bytes with LRU eviction.

use std::sync::{Arc, Mutex};

use crate::cache::LruCache;
use crate::identity::Identity;
use crate::pattern::{Pattern, PatternSegment};

/// Default capacity of the compile cache.
pub const DEFAULT_PATTERN_CACHE_CAPACITY: usize = 4_096;

/// One compiled matcher step.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Step {
    Literal(Box<str>),
    Any,
    Rest,
}

/// A pattern lowered to a flat array of matcher steps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledPattern {
    steps: Vec<Step>,
    /// Smallest identity depth the pattern can cover.
    min_depth: usize,
    /// Exact required depth when there is no terminal `**`.
    exact_depth: Option<usize>,
}

impl CompiledPattern {
    /// Lower a parsed pattern.
    #[must_use]
    pub fn compile(pattern: &Pattern) -> Self {
        let steps = pattern
            .segments()
            .iter()
            .map(|segment| match segment {
                PatternSegment::Literal(lit) => Step::Literal(lit.as_str().into()),
                PatternSegment::Any => Step::Any,
                PatternSegment::Rest => Step::Rest,
            })
            .collect();
        Self {
            steps,
            min_depth: pattern.min_depth(),
            exact_depth: match pattern.rest_index() {
                Some(_) => None,
                None => Some(pattern.len()),
            },
        }
    }

    /// Does the compiled pattern cover the identity?
    ///
    /// Equivalent to [`Pattern::covers`] on the source pattern.
    #[must_use]
    pub fn matches(&self, identity: &Identity) -> bool {
        let depth = identity.depth();
        if depth < self.min_depth {
            return false;
        }
        if let Some(exact) = self.exact_depth {
            if depth != exact {
                return false;
            }
        }
        for (step, segment) in self.steps.iter().zip(identity.segments()) {
            match step {
                Step::Literal(lit) => {
                    if lit.as_ref() != segment.as_str() {
                        return false;
                    }
                }
                Step::Any => {}
                Step::Rest => break,
            }
        }
        true
    }
}

/// A shared, LRU-evicting cache of compiled patterns.
///
/// Keyed by canonical pattern bytes. Cheap to clone; clones share the
/// same underlying cache.
#[derive(Clone)]
pub struct PatternCache {
    inner: Arc<Mutex<LruCache<Vec<u8>, Arc<CompiledPattern>>>>,
}

impl PatternCache {
    /// Create a cache with the given capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(LruCache::new(capacity))),
        }
    }

    /// Fetch the compiled form of `pattern`, compiling on miss.
    ///
    /// Returns the compiled pattern and whether this call was a cache hit.
    #[must_use]
    pub fn get(&self, pattern: &Pattern) -> (Arc<CompiledPattern>, bool) {
        let key = pattern.canonical_bytes();
        let mut cache = match self.inner.lock() {
            Ok(guard) => guard,
            // A poisoned compile cache only holds derived data; keep going.
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(compiled) = cache.get(&key) {
            return (Arc::clone(compiled), true);
        }
        let compiled = Arc::new(CompiledPattern::compile(pattern));
        cache.insert(key, Arc::clone(&compiled));
        (compiled, false)
    }

    /// Number of cached compilations.
    #[must_use]
    pub fn len(&self) -> usize {
        match self.inner.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    /// True when nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PatternCache {
    fn default() -> Self {
        Self::new(DEFAULT_PATTERN_CACHE_CAPACITY)
    }
}

impl std::fmt::Debug for PatternCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PatternCache")
            .field("len", &self.len())
            .finish()
    }
}
