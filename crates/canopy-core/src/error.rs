//! Parse error types for identities and patterns.

use thiserror::Error;

/// Errors produced while parsing an identity path or a pattern.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// The input was empty.
    #[error("path must not be empty")]
    Empty,

    /// The path has more segments than the configured maximum depth.
    #[error("path depth {depth} exceeds maximum {max}")]
    DepthExceeded {
        /// Number of segments in the input.
        depth: usize,
        /// Configured maximum depth.
        max: usize,
    },

    /// A segment was empty (leading, trailing or doubled `/`).
    #[error("empty segment at position {index}")]
    EmptySegment {
        /// Zero-based segment position.
        index: usize,
    },

    /// A segment contains a byte outside the allowed alphabet.
    ///
    /// Segments are printable ASCII excluding `/` and `*`.
    #[error("invalid byte {byte:#04x} in segment at position {index}")]
    InvalidByte {
        /// The offending byte.
        byte: u8,
        /// Zero-based segment position.
        index: usize,
    },

    /// A `*` wildcard appeared inside a literal segment (e.g. `foo*`).
    ///
    /// Wildcards must stand alone: a segment is either a literal, `*`,
    /// or the terminal `**`.
    #[error("embedded wildcard in segment at position {index}")]
    EmbeddedWildcard {
        /// Zero-based segment position.
        index: usize,
    },

    /// A `**` wildcard appeared anywhere but the final position.
    #[error("multi-level wildcard must be terminal, found at position {index}")]
    RestNotTerminal {
        /// Zero-based segment position.
        index: usize,
    },

    /// A wildcard segment appeared in an identity path.
    ///
    /// Identities are concrete; only patterns carry wildcards.
    #[error("wildcard segment at position {index} is not allowed in an identity")]
    WildcardInIdentity {
        /// Zero-based segment position.
        index: usize,
    },
}

/// Result type for parse operations.
pub type ParseResult<T> = Result<T, ParseError>;
