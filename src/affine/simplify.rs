//! Normalization of affine expressions.
//!
//! The simplifier flattens an expression into a linear form
//! `c0*d0 + c1*d1 + ... + k0*s0 + ... + opaque terms + constant`, collecting
//! like terms, and rebuilds it in a canonical order. Sub-expressions that are
//! not linear (products of two non-constants, divisions and modulos that do
//! not simplify) are simplified recursively and kept as opaque terms.

use crate::affine::context::{Context, ExprId};
use crate::affine::expr::{AffineExpr, BinaryKind, ExprKind};
use num_integer::Integer;
use std::collections::BTreeMap;

/// A summand of a linear form. The derived order is the output order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Term {
    Dim(usize),
    Symbol(usize),
    Opaque(ExprId),
}

/// Sum of `coefficient * term` plus a constant. Coefficients are non-zero.
#[derive(Clone, Debug, Default)]
struct LinearForm {
    terms: BTreeMap<Term, i64>,
    constant: i64,
}

impl LinearForm {
    fn constant(value: i64) -> Self {
        Self { terms: BTreeMap::new(), constant: value }
    }

    fn term(term: Term) -> Self {
        let mut terms = BTreeMap::new();
        terms.insert(term, 1);
        Self { terms, constant: 0 }
    }

    fn as_constant(&self) -> Option<i64> {
        self.terms.is_empty().then_some(self.constant)
    }

    fn checked_add(mut self, other: &Self) -> Option<Self> {
        for (&term, &coeff) in &other.terms {
            let sum = self.terms.get(&term).copied().unwrap_or(0).checked_add(coeff)?;
            if sum == 0 {
                self.terms.remove(&term);
            } else {
                self.terms.insert(term, sum);
            }
        }
        self.constant = self.constant.checked_add(other.constant)?;
        Some(self)
    }

    fn checked_scale(mut self, factor: i64) -> Option<Self> {
        if factor == 0 {
            return Some(Self::constant(0));
        }
        for coeff in self.terms.values_mut() {
            *coeff = coeff.checked_mul(factor)?;
        }
        self.constant = self.constant.checked_mul(factor)?;
        Some(self)
    }
}

struct Simplifier<'c> {
    ctx: &'c Context,
}

impl<'c> Simplifier<'c> {
    fn flatten(&self, expr: AffineExpr<'c>) -> LinearForm {
        match expr.kind() {
            ExprKind::Dim(pos) => LinearForm::term(Term::Dim(pos)),
            ExprKind::Symbol(pos) => LinearForm::term(Term::Symbol(pos)),
            ExprKind::Constant(value) => LinearForm::constant(value),
            ExprKind::Binary(BinaryKind::Add, lhs, rhs) => {
                let rhs = self.flatten(rhs);
                self.flatten(lhs)
                    .checked_add(&rhs)
                    .unwrap_or_else(|| self.atom(expr))
            }
            ExprKind::Binary(BinaryKind::Mul, lhs, rhs) => {
                let lhs = self.flatten(lhs);
                let rhs = self.flatten(rhs);
                let scaled = match (lhs.as_constant(), rhs.as_constant()) {
                    (_, Some(factor)) => lhs.checked_scale(factor),
                    (Some(factor), None) => rhs.checked_scale(factor),
                    (None, None) => {
                        let product = AffineExpr::binary(BinaryKind::Mul, self.rebuild(&lhs), self.rebuild(&rhs));
                        return self.atom(product);
                    }
                };
                scaled.unwrap_or_else(|| self.atom(expr))
            }
            ExprKind::Binary(kind, lhs, rhs) => self.flatten_div_like(kind, lhs, rhs),
        }
    }

    /// `(c*X + k) op c` reduces when every coefficient of `X` is a multiple
    /// of the positive divisor `c`.
    fn flatten_div_like(&self, kind: BinaryKind, lhs: AffineExpr<'c>, rhs: AffineExpr<'c>) -> LinearForm {
        let lhs = self.flatten(lhs);
        let rhs = self.flatten(rhs);
        if let Some(divisor) = rhs.as_constant().filter(|&d| d > 0) {
            if lhs.terms.values().all(|coeff| coeff % divisor == 0) {
                let terms: BTreeMap<_, _> = lhs.terms.iter().map(|(&t, &c)| (t, c / divisor)).collect();
                let constant = lhs.constant;
                return match kind {
                    BinaryKind::Mod => LinearForm::constant(Integer::mod_floor(&constant, &divisor)),
                    BinaryKind::FloorDiv => LinearForm { terms, constant: Integer::div_floor(&constant, &divisor) },
                    _ => {
                        let rounded = Integer::mod_floor(&constant, &divisor) != 0;
                        LinearForm { terms, constant: Integer::div_floor(&constant, &divisor) + i64::from(rounded) }
                    }
                };
            }
        }
        let rebuilt = AffineExpr::binary(kind, self.rebuild(&lhs), self.rebuild(&rhs));
        self.atom(rebuilt)
    }

    fn atom(&self, expr: AffineExpr<'c>) -> LinearForm {
        match expr.kind() {
            ExprKind::Dim(pos) => LinearForm::term(Term::Dim(pos)),
            ExprKind::Symbol(pos) => LinearForm::term(Term::Symbol(pos)),
            ExprKind::Constant(value) => LinearForm::constant(value),
            ExprKind::Binary(..) => LinearForm::term(Term::Opaque(expr.id())),
        }
    }

    fn term_expr(&self, term: Term) -> AffineExpr<'c> {
        match term {
            Term::Dim(pos) => self.ctx.dim_expr(pos),
            Term::Symbol(pos) => self.ctx.symbol_expr(pos),
            Term::Opaque(id) => AffineExpr::from_raw(self.ctx, id),
        }
    }

    fn rebuild(&self, form: &LinearForm) -> AffineExpr<'c> {
        let mut acc: Option<AffineExpr<'c>> = None;
        for (&term, &coeff) in &form.terms {
            let summand = self.term_expr(term) * coeff;
            acc = Some(match acc {
                Some(acc) => acc + summand,
                None => summand,
            });
        }
        match acc {
            Some(acc) => acc + form.constant,
            None => self.ctx.constant_expr(form.constant),
        }
    }
}

/// Bring `expr` into canonical form: like terms collected, dims in ascending
/// order, then symbols, then non-linear sub-terms, then the constant.
///
/// The result is equivalent to `expr` for every input and simplifying it
/// again returns it unchanged.
pub fn simplify_affine_expr<'c>(expr: AffineExpr<'c>, num_dims: usize, num_symbols: usize) -> AffineExpr<'c> {
    debug_assert!(
        {
            let mut in_range = true;
            expr.walk(&mut |e| match e.kind() {
                ExprKind::Dim(pos) if pos >= num_dims => in_range = false,
                ExprKind::Symbol(pos) if pos >= num_symbols => in_range = false,
                _ => {}
            });
            in_range
        },
        "{} uses identifiers outside {} dims and {} symbols",
        expr,
        num_dims,
        num_symbols
    );
    let simplifier = Simplifier { ctx: expr.context() };
    let form = simplifier.flatten(expr);
    simplifier.rebuild(&form)
}
