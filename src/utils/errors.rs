//! Error types for the affine algebra.
//!
//! Poison (division or modulo by an invalid divisor during folding) has its
//! own type so callers can tell it apart from ordinary precondition failures
//! reported by the checked `try_*` entry points.

use crate::affine::expr::BinaryKind;
use thiserror::Error;
use std::fmt;

/// Top-level error type for the crate.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AffineError {
    /// Folding evaluated an undefined division or modulo
    #[error("Poison: {0}")]
    Poison(#[from] PoisonError),

    /// A map operation was called outside its preconditions
    #[error("Map error: {0}")]
    Map(#[from] MapError),
}

/// Folding hit a division or modulo whose divisor makes the expression
/// undefined for the given operands.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("{kind} by {divisor} is undefined")]
pub struct PoisonError {
    /// The operation that was evaluated
    pub kind: BinaryKind,
    /// The offending divisor
    pub divisor: i64,
}

impl PoisonError {
    pub(crate) fn new(kind: BinaryKind, divisor: i64) -> Self {
        Self { kind, divisor }
    }
}

/// A precondition violation on an affine map operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub struct MapError {
    /// The error message
    pub message: String,
    /// The kind of map error
    pub kind: MapErrorKind,
}

impl MapError {
    pub(crate) fn new(kind: MapErrorKind, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind,
        }
    }
}

impl fmt::Display for MapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?})", self.message, self.kind)
    }
}

/// What a [`MapError`] is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapErrorKind {
    /// Dimension count of one map does not match result count of another
    ArityMismatch,
    /// Operation requires a map without symbols
    SymbolsNotAllowed,
    /// A dim, symbol or result position is out of range
    PositionOutOfRange,
    /// Wrong number of operands supplied
    OperandCount,
    /// Vector does not describe a permutation
    InvalidPermutation,
    /// Maps in a batch do not share a dim/symbol space
    InconsistentSpace,
    /// Evaluation produced a value that does not fit in `i64`
    Overflow,
}

/// Result type using AffineError.
pub type AffineResult<T> = Result<T, AffineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poison_display() {
        let err = PoisonError::new(BinaryKind::Mod, 0);
        assert_eq!(err.to_string(), "mod by 0 is undefined");
        let top: AffineError = err.into();
        assert!(top.to_string().starts_with("Poison:"));
    }

    #[test]
    fn test_map_error_display() {
        let err = MapError::new(MapErrorKind::ArityMismatch, "expected 2 results, found 3");
        let s = format!("{}", err);
        assert!(s.contains("expected 2 results"));
        assert!(s.contains("ArityMismatch"));
    }
}
