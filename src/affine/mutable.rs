//! Scratch builder for affine maps.

use crate::affine::context::Context;
use crate::affine::expr::AffineExpr;
use crate::affine::map::AffineMap;
use crate::affine::simplify::simplify_affine_expr;
use smallvec::SmallVec;

/// A detached, editable copy of an affine map.
///
/// Edits touch only this copy; nothing is interned until
/// [`MutableAffineMap::affine_map`] is called. Not meant to be shared between
/// threads while being edited.
#[derive(Debug, Clone)]
pub struct MutableAffineMap<'c> {
    ctx: &'c Context,
    results: SmallVec<[AffineExpr<'c>; 8]>,
    num_dims: usize,
    num_symbols: usize,
}

impl<'c> MutableAffineMap<'c> {
    /// Start editing a copy of `map`.
    pub fn new(map: AffineMap<'c>) -> Self {
        Self {
            ctx: map.context(),
            results: map.results().into_iter().collect(),
            num_dims: map.num_dims(),
            num_symbols: map.num_symbols(),
        }
    }

    /// Discard all edits and start over from `map`.
    pub fn reset(&mut self, map: AffineMap<'c>) {
        self.ctx = map.context();
        self.results.clear();
        self.results.extend(map.results());
        self.num_dims = map.num_dims();
        self.num_symbols = map.num_symbols();
    }

    /// Context of the source map.
    pub fn context(&self) -> &'c Context { self.ctx }
    /// Current results.
    pub fn results(&self) -> &[AffineExpr<'c>] { &self.results }
    /// Current result `idx`.
    pub fn result(&self, idx: usize) -> AffineExpr<'c> { self.results[idx] }
    /// Current result count.
    pub fn num_results(&self) -> usize { self.results.len() }
    /// Current dim count.
    pub fn num_dims(&self) -> usize { self.num_dims }
    /// Current symbol count.
    pub fn num_symbols(&self) -> usize { self.num_symbols }

    /// Overwrite result `idx`.
    pub fn set_result(&mut self, idx: usize, result: AffineExpr<'c>) {
        assert!(result.belongs_to(self.ctx), "result must come from the map's context");
        self.results[idx] = result;
    }

    /// Append a result.
    pub fn push_result(&mut self, result: AffineExpr<'c>) {
        assert!(result.belongs_to(self.ctx), "result must come from the map's context");
        self.results.push(result);
    }

    /// Change the dim count. Results are not checked until interning.
    pub fn set_num_dims(&mut self, num_dims: usize) {
        self.num_dims = num_dims;
    }

    /// Change the symbol count.
    pub fn set_num_symbols(&mut self, num_symbols: usize) {
        self.num_symbols = num_symbols;
    }

    /// True if result `idx` is known to be a multiple of `factor`.
    pub fn is_multiple_of(&self, idx: usize, factor: i64) -> bool {
        self.results[idx].is_multiple_of(factor)
    }

    /// Simplify every result in place.
    pub fn simplify(&mut self) {
        let (num_dims, num_symbols) = (self.num_dims, self.num_symbols);
        for result in self.results.iter_mut() {
            *result = simplify_affine_expr(*result, num_dims, num_symbols);
        }
    }

    /// Intern the current state as an [`AffineMap`].
    pub fn affine_map(&self) -> AffineMap<'c> {
        AffineMap::get(self.ctx, self.num_dims, self.num_symbols, &self.results)
    }
}

impl<'c> From<AffineMap<'c>> for MutableAffineMap<'c> {
    fn from(map: AffineMap<'c>) -> Self {
        Self::new(map)
    }
}
