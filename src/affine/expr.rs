//! Affine expressions.
//!
//! An affine expression is built from dimension identifiers `d0, d1, ...`,
//! symbol identifiers `s0, s1, ...` and integer constants, combined with
//! `+`, `*`, `floordiv`, `ceildiv` and `mod`:
//!
//! ```text
//! d0 * 4 + s0 floordiv 2 + 1
//! ```
//!
//! Expressions are interned in a [`Context`]; an [`AffineExpr`] is a `Copy`
//! handle and two handles compare equal iff the expressions are structurally
//! equal.

use crate::affine::context::{Context, ExprId, ExprNode};
use crate::affine::fold;
use crate::affine::map::AffineMap;
use num_integer::Integer;
use serde::{Serialize, Deserialize};
use std::collections::HashMap;
use std::fmt;
use std::hash::{BuildHasher, Hash, Hasher};
use std::ops::{Add, Mul, Neg, Rem, Sub};

/// Binary operator of an affine expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryKind {
    /// Wrapping addition.
    Add,
    /// Wrapping multiplication.
    Mul,
    /// Non-negative remainder; the divisor must be positive.
    Mod,
    /// Division rounding toward negative infinity.
    FloorDiv,
    /// Division rounding toward positive infinity.
    CeilDiv,
}

impl fmt::Display for BinaryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinaryKind::Add => "+",
            BinaryKind::Mul => "*",
            BinaryKind::Mod => "mod",
            BinaryKind::FloorDiv => "floordiv",
            BinaryKind::CeilDiv => "ceildiv",
        };
        f.write_str(s)
    }
}

/// Structural view of one expression node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExprKind<'c> {
    /// Dimension identifier at a position
    Dim(usize),
    /// Symbol identifier at a position
    Symbol(usize),
    /// Integer constant
    Constant(i64),
    /// Binary operation with its operands
    Binary(BinaryKind, AffineExpr<'c>, AffineExpr<'c>),
}

/// Handle to an interned affine expression.
#[derive(Clone, Copy)]
pub struct AffineExpr<'c> {
    ctx: &'c Context,
    id: ExprId,
}

impl PartialEq for AffineExpr<'_> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.ctx, other.ctx) && self.id == other.id
    }
}

impl Eq for AffineExpr<'_> {}

impl Hash for AffineExpr<'_> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::ptr::hash(self.ctx, state);
        self.id.hash(state);
    }
}

/// Values usable as the right-hand side of the affine operators.
pub trait IntoAffineExpr<'c> {
    /// Convert into an expression of `ctx`.
    fn into_affine_expr(self, ctx: &'c Context) -> AffineExpr<'c>;
}

impl<'c> IntoAffineExpr<'c> for AffineExpr<'c> {
    fn into_affine_expr(self, _ctx: &'c Context) -> AffineExpr<'c> {
        self
    }
}

impl<'c> IntoAffineExpr<'c> for i64 {
    fn into_affine_expr(self, ctx: &'c Context) -> AffineExpr<'c> {
        ctx.constant_expr(self)
    }
}

impl<'c> IntoAffineExpr<'c> for i32 {
    fn into_affine_expr(self, ctx: &'c Context) -> AffineExpr<'c> {
        ctx.constant_expr(i64::from(self))
    }
}

impl<'c> AffineExpr<'c> {
    pub(crate) fn from_raw(ctx: &'c Context, id: ExprId) -> Self {
        Self { ctx, id }
    }

    pub(crate) fn id(&self) -> ExprId {
        self.id
    }

    pub(crate) fn belongs_to(&self, ctx: &Context) -> bool {
        std::ptr::eq(self.ctx, ctx)
    }

    /// The context this expression lives in.
    pub fn context(&self) -> &'c Context {
        self.ctx
    }

    /// Structural view of this node.
    pub fn kind(&self) -> ExprKind<'c> {
        match self.ctx.expr_node(self.id) {
            ExprNode::Dim(pos) => ExprKind::Dim(pos),
            ExprNode::Symbol(pos) => ExprKind::Symbol(pos),
            ExprNode::Constant(value) => ExprKind::Constant(value),
            ExprNode::Binary { kind, lhs, rhs } => ExprKind::Binary(
                kind,
                AffineExpr::from_raw(self.ctx, lhs),
                AffineExpr::from_raw(self.ctx, rhs),
            ),
        }
    }

    /// Operator of a binary node.
    pub fn binary_kind(&self) -> Option<BinaryKind> {
        match self.ctx.expr_node(self.id) {
            ExprNode::Binary { kind, .. } => Some(kind),
            _ => None,
        }
    }

    /// `Some(i)` for `d_i`.
    pub fn dim_position(&self) -> Option<usize> {
        match self.ctx.expr_node(self.id) {
            ExprNode::Dim(pos) => Some(pos),
            _ => None,
        }
    }

    /// `Some(i)` for `s_i`.
    pub fn symbol_position(&self) -> Option<usize> {
        match self.ctx.expr_node(self.id) {
            ExprNode::Symbol(pos) => Some(pos),
            _ => None,
        }
    }

    /// Value of a constant node.
    pub fn constant_value(&self) -> Option<i64> {
        match self.ctx.expr_node(self.id) {
            ExprNode::Constant(value) => Some(value),
            _ => None,
        }
    }

    /// True if this node is an integer constant.
    pub fn is_constant(&self) -> bool {
        self.constant_value().is_some()
    }

    /// True if no dimension identifier occurs in the expression.
    pub fn is_symbolic_or_constant(&self) -> bool {
        match self.kind() {
            ExprKind::Dim(_) => false,
            ExprKind::Symbol(_) | ExprKind::Constant(_) => true,
            ExprKind::Binary(_, lhs, rhs) => {
                lhs.is_symbolic_or_constant() && rhs.is_symbolic_or_constant()
            }
        }
    }

    /// True if the expression is affine in the strict sense: products have a
    /// constant factor and divisors are constants.
    pub fn is_pure_affine(&self) -> bool {
        match self.kind() {
            ExprKind::Dim(_) | ExprKind::Symbol(_) | ExprKind::Constant(_) => true,
            ExprKind::Binary(BinaryKind::Add, lhs, rhs) => {
                lhs.is_pure_affine() && rhs.is_pure_affine()
            }
            ExprKind::Binary(BinaryKind::Mul, lhs, rhs) => {
                lhs.is_pure_affine()
                    && rhs.is_pure_affine()
                    && (lhs.is_constant() || rhs.is_constant())
            }
            ExprKind::Binary(_, lhs, rhs) => lhs.is_pure_affine() && rhs.is_constant(),
        }
    }

    /// True if `d<position>` occurs in the expression.
    pub fn is_function_of_dim(&self, position: usize) -> bool {
        match self.kind() {
            ExprKind::Dim(pos) => pos == position,
            ExprKind::Symbol(_) | ExprKind::Constant(_) => false,
            ExprKind::Binary(_, lhs, rhs) => {
                lhs.is_function_of_dim(position) || rhs.is_function_of_dim(position)
            }
        }
    }

    /// True if `s<position>` occurs in the expression.
    pub fn is_function_of_symbol(&self, position: usize) -> bool {
        match self.kind() {
            ExprKind::Symbol(pos) => pos == position,
            ExprKind::Dim(_) | ExprKind::Constant(_) => false,
            ExprKind::Binary(_, lhs, rhs) => {
                lhs.is_function_of_symbol(position) || rhs.is_function_of_symbol(position)
            }
        }
    }

    /// Visit every node in post-order.
    pub fn walk<F: FnMut(AffineExpr<'c>)>(&self, callback: &mut F) {
        if let ExprKind::Binary(_, lhs, rhs) = self.kind() {
            lhs.walk(callback);
            rhs.walk(callback);
        }
        callback(*self);
    }

    /// Largest integer known to divide the expression for all inputs.
    /// `0` means the expression is the constant zero.
    pub fn largest_known_divisor(&self) -> u64 {
        match self.kind() {
            ExprKind::Dim(_) | ExprKind::Symbol(_) => 1,
            ExprKind::Constant(value) => value.unsigned_abs(),
            ExprKind::Binary(BinaryKind::Mul, lhs, rhs) => {
                let l = lhs.largest_known_divisor();
                let r = rhs.largest_known_divisor();
                l.checked_mul(r).unwrap_or(l.max(r))
            }
            ExprKind::Binary(BinaryKind::Add | BinaryKind::Mod, lhs, rhs) => {
                lhs.largest_known_divisor().gcd(&rhs.largest_known_divisor())
            }
            ExprKind::Binary(_, lhs, rhs) => match rhs.constant_value() {
                Some(divisor) if divisor != 0 => {
                    let divisor = divisor.unsigned_abs();
                    let known = lhs.largest_known_divisor();
                    if known % divisor == 0 { known / divisor } else { 1 }
                }
                _ => 1,
            },
        }
    }

    /// True if the expression is known to be a multiple of `factor`.
    pub fn is_multiple_of(&self, factor: i64) -> bool {
        if factor == 0 {
            return self.constant_value() == Some(0);
        }
        let factor = factor.unsigned_abs();
        match self.kind() {
            ExprKind::Dim(_) | ExprKind::Symbol(_) => factor == 1,
            ExprKind::Constant(value) => value.unsigned_abs() % factor == 0,
            ExprKind::Binary(BinaryKind::Mul, lhs, rhs) => {
                let l = lhs.largest_known_divisor();
                let r = rhs.largest_known_divisor();
                l % factor == 0
                    || r % factor == 0
                    || l.checked_mul(r).map_or(false, |p| p % factor == 0)
            }
            ExprKind::Binary(_, lhs, rhs) => {
                lhs.largest_known_divisor().gcd(&rhs.largest_known_divisor()) % factor == 0
            }
        }
    }

    // Construction.

    /// Build `lhs <kind> rhs`, applying local canonicalization: constant
    /// folding, constants on the right of commutative operators, and removal
    /// of neutral elements. Division or modulo by a constant that is not a
    /// valid divisor is kept as written.
    pub fn binary(kind: BinaryKind, lhs: Self, rhs: Self) -> Self {
        assert!(
            rhs.belongs_to(lhs.ctx),
            "operands of a binary affine expression must share a context"
        );
        match kind {
            BinaryKind::Add => Self::build_add(lhs, rhs),
            BinaryKind::Mul => Self::build_mul(lhs, rhs),
            BinaryKind::FloorDiv | BinaryKind::CeilDiv | BinaryKind::Mod => {
                Self::build_div_like(kind, lhs, rhs)
            }
        }
    }

    fn build_add(lhs: Self, rhs: Self) -> Self {
        let ctx = lhs.ctx;
        if let (Some(a), Some(b)) = (lhs.constant_value(), rhs.constant_value()) {
            if let Some(sum) = a.checked_add(b) {
                return ctx.constant_expr(sum);
            }
        }
        if lhs.is_constant() && !rhs.is_constant() {
            return Self::build_add(rhs, lhs);
        }
        if let Some(c2) = rhs.constant_value() {
            if c2 == 0 {
                return lhs;
            }
            // (x + c1) + c2 -> x + (c1 + c2)
            if let ExprKind::Binary(BinaryKind::Add, inner, c1) = lhs.kind() {
                if let Some(sum) = c1.constant_value().and_then(|c1| c1.checked_add(c2)) {
                    return Self::build_add(inner, ctx.constant_expr(sum));
                }
            }
        }
        ctx.binary_expr(BinaryKind::Add, lhs, rhs)
    }

    fn build_mul(lhs: Self, rhs: Self) -> Self {
        let ctx = lhs.ctx;
        if let (Some(a), Some(b)) = (lhs.constant_value(), rhs.constant_value()) {
            if let Some(product) = a.checked_mul(b) {
                return ctx.constant_expr(product);
            }
        }
        if lhs.is_constant() && !rhs.is_constant() {
            return Self::build_mul(rhs, lhs);
        }
        if let Some(c2) = rhs.constant_value() {
            match c2 {
                0 => return rhs,
                1 => return lhs,
                _ => {}
            }
            // (x * c1) * c2 -> x * (c1 * c2)
            if let ExprKind::Binary(BinaryKind::Mul, inner, c1) = lhs.kind() {
                if let Some(product) = c1.constant_value().and_then(|c1| c1.checked_mul(c2)) {
                    return Self::build_mul(inner, ctx.constant_expr(product));
                }
            }
        }
        ctx.binary_expr(BinaryKind::Mul, lhs, rhs)
    }

    fn build_div_like(kind: BinaryKind, lhs: Self, rhs: Self) -> Self {
        let ctx = lhs.ctx;
        if let (Some(a), Some(b)) = (lhs.constant_value(), rhs.constant_value()) {
            if let Ok(Some(value)) = fold::evaluate_binary(kind, a, b) {
                return ctx.constant_expr(value);
            }
        }
        if rhs.constant_value() == Some(1) {
            return match kind {
                BinaryKind::Mod => ctx.constant_expr(0),
                _ => lhs,
            };
        }
        ctx.binary_expr(kind, lhs, rhs)
    }

    /// `self floordiv rhs`
    pub fn floor_div(self, rhs: impl IntoAffineExpr<'c>) -> Self {
        let rhs = rhs.into_affine_expr(self.ctx);
        Self::binary(BinaryKind::FloorDiv, self, rhs)
    }

    /// `self ceildiv rhs`
    pub fn ceil_div(self, rhs: impl IntoAffineExpr<'c>) -> Self {
        let rhs = rhs.into_affine_expr(self.ctx);
        Self::binary(BinaryKind::CeilDiv, self, rhs)
    }

    // Rewriting.

    /// Rebuild the expression bottom-up. `f` is offered every node before its
    /// children; returning `Some` replaces the whole subtree.
    fn rewrite<F: FnMut(Self) -> Option<Self>>(self, f: &mut F) -> Self {
        if let Some(replacement) = f(self) {
            return replacement;
        }
        match self.kind() {
            ExprKind::Binary(kind, lhs, rhs) => {
                let new_lhs = lhs.rewrite(f);
                let new_rhs = rhs.rewrite(f);
                if new_lhs == lhs && new_rhs == rhs {
                    self
                } else {
                    Self::binary(kind, new_lhs, new_rhs)
                }
            }
            _ => self,
        }
    }

    /// Substitute `d_i` by `dims[i]` and `s_j` by `syms[j]`. Identifiers
    /// beyond the given slices are left untouched.
    pub fn replace_dims_and_symbols(&self, dims: &[AffineExpr<'c>], syms: &[AffineExpr<'c>]) -> Self {
        self.rewrite(&mut |e| match e.kind() {
            ExprKind::Dim(pos) => Some(dims.get(pos).copied().unwrap_or(e)),
            ExprKind::Symbol(pos) => Some(syms.get(pos).copied().unwrap_or(e)),
            _ => None,
        })
    }

    /// Substitute dims only.
    pub fn replace_dims(&self, dims: &[AffineExpr<'c>]) -> Self {
        self.replace_dims_and_symbols(dims, &[])
    }

    /// Substitute symbols only.
    pub fn replace_symbols(&self, syms: &[AffineExpr<'c>]) -> Self {
        self.replace_dims_and_symbols(&[], syms)
    }

    /// Renumber `d_i` to `d_{i + shift}` for `offset <= i < num_dims`.
    pub fn shift_dims(&self, num_dims: usize, shift: usize, offset: usize) -> Self {
        let ctx = self.ctx;
        let dims: Vec<_> = (0..num_dims)
            .map(|i| ctx.dim_expr(if i < offset { i } else { i + shift }))
            .collect();
        self.replace_dims(&dims)
    }

    /// Renumber `s_i` to `s_{i + shift}` for `offset <= i < num_symbols`.
    pub fn shift_symbols(&self, num_symbols: usize, shift: usize, offset: usize) -> Self {
        let ctx = self.ctx;
        let syms: Vec<_> = (0..num_symbols)
            .map(|i| ctx.symbol_expr(if i < offset { i } else { i + shift }))
            .collect();
        self.replace_symbols(&syms)
    }

    /// Replace every occurrence of the sub-expression `expr` by `replacement`.
    pub fn replace(&self, expr: AffineExpr<'c>, replacement: AffineExpr<'c>) -> Self {
        self.rewrite(&mut |e| (e == expr).then_some(replacement))
    }

    /// Replace every occurrence of any key of `map` by its value. Outer
    /// matches win over matches inside them.
    pub fn replace_all<S: BuildHasher>(&self, map: &HashMap<AffineExpr<'c>, AffineExpr<'c>, S>) -> Self {
        self.rewrite(&mut |e| map.get(&e).copied())
    }

    /// Substitute the dimensions of this expression by the results of `map`.
    pub fn compose(&self, map: &AffineMap<'c>) -> Self {
        self.replace_dims(&map.results())
    }
}

impl<'c, T: IntoAffineExpr<'c>> Add<T> for AffineExpr<'c> {
    type Output = AffineExpr<'c>;

    fn add(self, rhs: T) -> Self::Output {
        let rhs = rhs.into_affine_expr(self.ctx);
        AffineExpr::binary(BinaryKind::Add, self, rhs)
    }
}

impl<'c, T: IntoAffineExpr<'c>> Sub<T> for AffineExpr<'c> {
    type Output = AffineExpr<'c>;

    fn sub(self, rhs: T) -> Self::Output {
        let rhs = rhs.into_affine_expr(self.ctx);
        self + (-rhs)
    }
}

impl<'c, T: IntoAffineExpr<'c>> Mul<T> for AffineExpr<'c> {
    type Output = AffineExpr<'c>;

    fn mul(self, rhs: T) -> Self::Output {
        let rhs = rhs.into_affine_expr(self.ctx);
        AffineExpr::binary(BinaryKind::Mul, self, rhs)
    }
}

/// `self mod rhs`
impl<'c, T: IntoAffineExpr<'c>> Rem<T> for AffineExpr<'c> {
    type Output = AffineExpr<'c>;

    fn rem(self, rhs: T) -> Self::Output {
        let rhs = rhs.into_affine_expr(self.ctx);
        AffineExpr::binary(BinaryKind::Mod, self, rhs)
    }
}

impl<'c> Neg for AffineExpr<'c> {
    type Output = AffineExpr<'c>;

    fn neg(self) -> Self::Output {
        self * -1i64
    }
}

/// Writes `expr`, parenthesized when it is a binary node.
fn fmt_operand(expr: &AffineExpr<'_>, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if expr.binary_kind().is_some() {
        write!(f, "({})", expr)
    } else {
        write!(f, "{}", expr)
    }
}

impl fmt::Display for AffineExpr<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind() {
            ExprKind::Dim(pos) => write!(f, "d{}", pos),
            ExprKind::Symbol(pos) => write!(f, "s{}", pos),
            ExprKind::Constant(value) => write!(f, "{}", value),
            ExprKind::Binary(BinaryKind::Add, lhs, rhs) => {
                write!(f, "{}", lhs)?;
                if let Some(c) = rhs.constant_value() {
                    if c < 0 {
                        return write!(f, " - {}", c.unsigned_abs());
                    }
                }
                if let ExprKind::Binary(BinaryKind::Mul, term, coeff) = rhs.kind() {
                    match coeff.constant_value() {
                        Some(-1) => {
                            f.write_str(" - ")?;
                            return fmt_operand(&term, f);
                        }
                        Some(c) if c < 0 => {
                            f.write_str(" - ")?;
                            fmt_operand(&term, f)?;
                            return write!(f, " * {}", c.unsigned_abs());
                        }
                        _ => {}
                    }
                }
                f.write_str(" + ")?;
                if rhs.binary_kind() == Some(BinaryKind::Add) {
                    write!(f, "({})", rhs)
                } else {
                    write!(f, "{}", rhs)
                }
            }
            ExprKind::Binary(kind, lhs, rhs) => {
                fmt_operand(&lhs, f)?;
                write!(f, " {} ", kind)?;
                fmt_operand(&rhs, f)
            }
        }
    }
}

impl fmt::Debug for AffineExpr<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AffineExpr({})", self)
    }
}
