//! Constant folding of affine expressions.
//!
//! Folding evaluates an expression over operands that may or may not be known
//! constants. It has three outcomes: a value, "unknown" when some operand is
//! not a constant, and poison when a division or modulo is undefined. Operands
//! fold left to right and stop at the first unknown, so poison is only seen
//! when both sides of the offending node are known. Poison is sticky: it
//! propagates to the enclosing expression and, for maps, to the whole fold.

use crate::affine::expr::{AffineExpr, BinaryKind, ExprKind};
use crate::utils::errors::PoisonError;
use num_integer::Integer;
use serde::{Serialize, Deserialize};
use std::fmt;

/// Integer type tag carried by an [`IntegerAttr`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IntegerType {
    /// Target index type; the type of every folded affine value
    Index,
    /// Signless integer of the given bit width
    Signless(u32),
}

/// A 64-bit integer constant tagged with its type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IntegerAttr {
    value: i64,
    ty: IntegerType,
}

impl IntegerAttr {
    /// A constant of type `ty`.
    pub fn new(value: i64, ty: IntegerType) -> Self {
        Self { value, ty }
    }

    /// An `index`-typed constant.
    pub fn index(value: i64) -> Self {
        Self::new(value, IntegerType::Index)
    }

    /// The integer value.
    pub fn value(&self) -> i64 { self.value }
    /// The type tag.
    pub fn ty(&self) -> IntegerType { self.ty }
}

impl From<i64> for IntegerAttr {
    fn from(value: i64) -> Self {
        Self::index(value)
    }
}

impl fmt::Display for IntegerAttr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ty {
            IntegerType::Index => write!(f, "{} : index", self.value),
            IntegerType::Signless(width) => write!(f, "{} : i{}", self.value, width),
        }
    }
}

/// Result of folding a single expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FoldOutcome {
    /// The expression evaluates to this value
    Constant(i64),
    /// Some operand needed by the expression is not a known constant
    Unknown,
    /// The expression divides or takes a modulo by an invalid divisor
    Poison,
}

impl FoldOutcome {
    /// The folded value, if any.
    pub fn value(self) -> Option<i64> {
        match self {
            FoldOutcome::Constant(value) => Some(value),
            _ => None,
        }
    }

    /// True for [`FoldOutcome::Poison`].
    pub fn is_poison(self) -> bool {
        self == FoldOutcome::Poison
    }
}

impl From<Result<Option<i64>, PoisonError>> for FoldOutcome {
    fn from(result: Result<Option<i64>, PoisonError>) -> Self {
        match result {
            Ok(Some(value)) => FoldOutcome::Constant(value),
            Ok(None) => FoldOutcome::Unknown,
            Err(_) => FoldOutcome::Poison,
        }
    }
}

/// Floor of `lhs / rhs`; `None` when `rhs == 0` or the quotient overflows.
pub fn floor_div(lhs: i64, rhs: i64) -> Option<i64> {
    lhs.checked_div(rhs)?;
    Some(Integer::div_floor(&lhs, &rhs))
}

/// Ceiling of `lhs / rhs`; `None` when `rhs == 0` or the quotient overflows.
pub fn ceil_div(lhs: i64, rhs: i64) -> Option<i64> {
    lhs.checked_div(rhs)?;
    let (quotient, remainder) = Integer::div_rem(&lhs, &rhs);
    if remainder != 0 && ((remainder > 0) == (rhs > 0)) {
        Some(quotient + 1)
    } else {
        Some(quotient)
    }
}

/// Non-negative remainder of `lhs` by a positive `rhs`.
pub fn modulo(lhs: i64, rhs: i64) -> Option<i64> {
    if rhs < 1 {
        return None;
    }
    Some(Integer::mod_floor(&lhs, &rhs))
}

/// Evaluate one binary operator on constants. Add and Mul wrap on overflow;
/// a division whose quotient does not fit yields `Ok(None)`.
pub(crate) fn evaluate_binary(kind: BinaryKind, lhs: i64, rhs: i64) -> Result<Option<i64>, PoisonError> {
    match kind {
        BinaryKind::Add => Ok(Some(lhs.wrapping_add(rhs))),
        BinaryKind::Mul => Ok(Some(lhs.wrapping_mul(rhs))),
        BinaryKind::Mod => {
            if rhs < 1 {
                return Err(PoisonError::new(kind, rhs));
            }
            Ok(modulo(lhs, rhs))
        }
        BinaryKind::FloorDiv | BinaryKind::CeilDiv => {
            if rhs == 0 {
                return Err(PoisonError::new(kind, rhs));
            }
            if kind == BinaryKind::FloorDiv {
                Ok(floor_div(lhs, rhs))
            } else {
                Ok(ceil_div(lhs, rhs))
            }
        }
    }
}

/// Evaluates affine expressions over a fixed operand list.
///
/// Operands are the dims followed by the symbols of the enclosing map; `None`
/// marks an operand that is not a known constant.
#[derive(Debug)]
pub struct ExprConstantFolder<'a> {
    num_dims: usize,
    operands: &'a [Option<IntegerAttr>],
}

impl<'a> ExprConstantFolder<'a> {
    /// A folder over `operands`, of which the first `num_dims` are dims.
    pub fn new(num_dims: usize, operands: &'a [Option<IntegerAttr>]) -> Self {
        Self { num_dims, operands }
    }

    /// Fold `expr` to an index constant. `Ok(None)` means it could not be
    /// folded; `Err` means it is poison.
    pub fn fold(&self, expr: AffineExpr<'_>) -> Result<Option<i64>, PoisonError> {
        match expr.kind() {
            ExprKind::Constant(value) => Ok(Some(value)),
            ExprKind::Dim(pos) => Ok(self.operand(pos)),
            ExprKind::Symbol(pos) => Ok(self.operand(self.num_dims + pos)),
            ExprKind::Binary(kind, lhs, rhs) => {
                // The divisor is only inspected once the dividend is known.
                let Some(lhs) = self.fold(lhs)? else {
                    return Ok(None);
                };
                let Some(rhs) = self.fold(rhs)? else {
                    return Ok(None);
                };
                let folded = evaluate_binary(kind, lhs, rhs);
                if let Err(poison) = &folded {
                    log::debug!("poison while folding {}: {}", expr, poison);
                }
                folded
            }
        }
    }

    /// Fold `expr` into an index-typed attribute.
    pub fn fold_to_attr(&self, expr: AffineExpr<'_>) -> Result<Option<IntegerAttr>, PoisonError> {
        Ok(self.fold(expr)?.map(IntegerAttr::index))
    }

    fn operand(&self, index: usize) -> Option<i64> {
        self.operands.get(index).copied().flatten().map(|attr| attr.value())
    }
}

impl<'c> AffineExpr<'c> {
    /// Fold this expression given `num_dims` and the dim-then-symbol operands.
    pub fn constant_fold(&self, num_dims: usize, operands: &[Option<IntegerAttr>]) -> FoldOutcome {
        ExprConstantFolder::new(num_dims, operands).fold(*self).into()
    }
}

/// Convenience for tests and callers that hold plain integers.
pub fn index_operands(values: &[Option<i64>]) -> Vec<Option<IntegerAttr>> {
    values.iter().map(|v| v.map(IntegerAttr::index)).collect()
}
