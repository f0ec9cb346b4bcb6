//! Affine maps for access functions and loop transformations.
//!
//! An affine map takes `num_dims` dimension inputs and `num_symbols` symbol
//! inputs to a tuple of affine expressions:
//!
//! ```text
//! (d0, d1)[s0] -> (d0 floordiv 128, d0 mod 128, d1 + s0)
//! ```
//!
//! Maps are interned like expressions and never change once built; every
//! transformation returns a new map.

use crate::affine::context::{Context, ExprId, MapId, MapStorage};
use crate::affine::expr::{AffineExpr, ExprKind};
use crate::affine::fold::{ExprConstantFolder, IntegerAttr};
use crate::utils::errors::{AffineResult, MapError, MapErrorKind, PoisonError};
use num_integer::Integer;
use smallvec::SmallVec;
use std::collections::HashMap;
use std::fmt;
use std::hash::{BuildHasher, Hash, Hasher};
use std::sync::Arc;

/// Handle to an interned affine map.
#[derive(Clone, Copy)]
pub struct AffineMap<'c> {
    ctx: &'c Context,
    id: MapId,
}

impl PartialEq for AffineMap<'_> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.ctx, other.ctx) && self.id == other.id
    }
}

impl Eq for AffineMap<'_> {}

impl Hash for AffineMap<'_> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::ptr::hash(self.ctx, state);
        self.id.hash(state);
    }
}

/// Result of [`AffineMap::partial_constant_fold`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialFold<'c> {
    /// Same arity as the input; folded results replaced by constants
    pub map: AffineMap<'c>,
    /// Every result as an integer, present only if all of them folded
    pub constants: Option<Vec<i64>>,
}

impl<'c> AffineMap<'c> {
    // Construction.

    /// Intern the map `(d0..d{num_dims})[s0..s{num_symbols}] -> (results)`.
    ///
    /// Panics if the results mention a dim or symbol out of range and the
    /// context has `verify_maps` enabled.
    pub fn get(ctx: &'c Context, num_dims: usize, num_symbols: usize, results: &[AffineExpr<'c>]) -> Self {
        if ctx.config().verify_maps {
            if let Err(err) = Self::verify(ctx, num_dims, num_symbols, results) {
                panic!("invalid affine map: {}", err);
            }
        }
        Self::intern(ctx, num_dims, num_symbols, results)
    }

    /// Like [`AffineMap::get`], but always verifies and reports violations.
    pub fn try_get(
        ctx: &'c Context,
        num_dims: usize,
        num_symbols: usize,
        results: &[AffineExpr<'c>],
    ) -> Result<Self, MapError> {
        Self::verify(ctx, num_dims, num_symbols, results)?;
        Ok(Self::intern(ctx, num_dims, num_symbols, results))
    }

    fn intern(ctx: &'c Context, num_dims: usize, num_symbols: usize, results: &[AffineExpr<'c>]) -> Self {
        assert!(
            results.iter().all(|e| e.belongs_to(ctx)),
            "affine map results must come from the map's context"
        );
        let storage = MapStorage {
            num_dims,
            num_symbols,
            results: results.iter().map(|e| e.id()).collect::<Arc<[_]>>(),
        };
        Self { ctx, id: ctx.intern_map(storage) }
    }

    fn verify(ctx: &Context, num_dims: usize, num_symbols: usize, results: &[AffineExpr<'c>]) -> Result<(), MapError> {
        for (idx, expr) in results.iter().enumerate() {
            if !expr.belongs_to(ctx) {
                return Err(MapError::new(
                    MapErrorKind::InconsistentSpace,
                    format!("result {} belongs to another context", idx),
                ));
            }
            let mut bad = None;
            expr.walk(&mut |e| match e.kind() {
                ExprKind::Dim(pos) if pos >= num_dims => bad = Some(format!("d{}", pos)),
                ExprKind::Symbol(pos) if pos >= num_symbols => bad = Some(format!("s{}", pos)),
                _ => {}
            });
            if let Some(name) = bad {
                return Err(MapError::new(
                    MapErrorKind::PositionOutOfRange,
                    format!(
                        "result {} ({}) uses {} but the map has {} dims and {} symbols",
                        idx, expr, name, num_dims, num_symbols
                    ),
                ));
            }
        }
        Ok(())
    }

    /// The map `() -> ()`.
    pub fn empty(ctx: &'c Context) -> Self {
        Self::get(ctx, 0, 0, &[])
    }

    /// `() -> (value)`
    pub fn constant_map(ctx: &'c Context, value: i64) -> Self {
        Self::get(ctx, 0, 0, &[ctx.constant_expr(value)])
    }

    /// `(d0, ..., dn) -> (d0, ..., dn)`
    pub fn multi_dim_identity(ctx: &'c Context, num_dims: usize) -> Self {
        let dims: Vec<_> = (0..num_dims).map(|i| ctx.dim_expr(i)).collect();
        Self::get(ctx, num_dims, 0, &dims)
    }

    /// Identity on the `results` most minor of `dims` dimensions, e.g.
    /// `minor_identity(3, 2)` is `(d0, d1, d2) -> (d1, d2)`.
    pub fn minor_identity(ctx: &'c Context, dims: usize, results: usize) -> Self {
        assert!(dims >= results, "minor identity needs dims >= results ({} < {})", dims, results);
        let exprs: Vec<_> = (dims - results..dims).map(|i| ctx.dim_expr(i)).collect();
        Self::get(ctx, dims, 0, &exprs)
    }

    /// Identity map keeping only the dimensions accepted by `keep`.
    pub fn filtered_identity(ctx: &'c Context, num_dims: usize, keep: impl Fn(usize) -> bool) -> Self {
        let exprs: Vec<_> = (0..num_dims).filter(|&i| keep(i)).map(|i| ctx.dim_expr(i)).collect();
        Self::get(ctx, num_dims, 0, &exprs)
    }

    /// `(d0, ..., dn) -> (d_targets[0], d_targets[1], ...)`
    pub fn multi_dim_map_with_targets(ctx: &'c Context, num_dims: usize, targets: &[usize]) -> Self {
        let exprs: Vec<_> = targets.iter().map(|&t| ctx.dim_expr(t)).collect();
        Self::get(ctx, num_dims, 0, &exprs)
    }

    /// Permutation map sending result `i` to `d_permutation[i]`.
    pub fn permutation_map(ctx: &'c Context, permutation: &[usize]) -> Self {
        match Self::try_permutation_map(ctx, permutation) {
            Ok(map) => map,
            Err(err) => panic!("{}", err),
        }
    }

    /// Like [`AffineMap::permutation_map`], but reports an empty or
    /// malformed vector instead of panicking.
    pub fn try_permutation_map(ctx: &'c Context, permutation: &[usize]) -> Result<Self, MapError> {
        let Some(&max) = permutation.iter().max() else {
            return Err(MapError::new(
                MapErrorKind::InvalidPermutation,
                "cannot create a permutation map from an empty vector",
            ));
        };
        if max >= permutation.len() {
            return Err(MapError::new(
                MapErrorKind::InvalidPermutation,
                format!("{:?} is not a permutation", permutation),
            ));
        }
        let map = Self::multi_dim_map_with_targets(ctx, max + 1, permutation);
        if !map.is_permutation() {
            return Err(MapError::new(
                MapErrorKind::InvalidPermutation,
                format!("{:?} is not a permutation", permutation),
            ));
        }
        Ok(map)
    }

    /// One map per expression list, all sharing the smallest dim and symbol
    /// counts that cover every list.
    pub fn infer_from_expr_list<L: AsRef<[AffineExpr<'c>]>>(ctx: &'c Context, lists: &[L]) -> Vec<Self> {
        let mut num_dims = 0;
        let mut num_symbols = 0;
        for list in lists {
            for expr in list.as_ref() {
                expr.walk(&mut |e| match e.kind() {
                    ExprKind::Dim(pos) => num_dims = num_dims.max(pos + 1),
                    ExprKind::Symbol(pos) => num_symbols = num_symbols.max(pos + 1),
                    _ => {}
                });
            }
        }
        lists
            .iter()
            .map(|list| Self::get(ctx, num_dims, num_symbols, list.as_ref()))
            .collect()
    }

    // Accessors.

    fn storage(&self) -> &'c MapStorage {
        self.ctx.map_storage(self.id)
    }

    fn wrap(&self, ids: &[ExprId]) -> Vec<AffineExpr<'c>> {
        ids.iter().map(|&id| AffineExpr::from_raw(self.ctx, id)).collect()
    }

    /// The context this map lives in.
    pub fn context(&self) -> &'c Context { self.ctx }
    /// Number of dimension inputs.
    pub fn num_dims(&self) -> usize { self.storage().num_dims }
    /// Number of symbol inputs.
    pub fn num_symbols(&self) -> usize { self.storage().num_symbols }
    /// Number of result expressions.
    pub fn num_results(&self) -> usize { self.storage().results.len() }

    /// Dims plus symbols.
    pub fn num_inputs(&self) -> usize {
        let storage = self.storage();
        storage.num_dims + storage.num_symbols
    }

    /// All result expressions, in order.
    pub fn results(&self) -> Vec<AffineExpr<'c>> {
        self.wrap(&self.storage().results)
    }

    /// Result `idx`. Panics if out of range.
    pub fn result(&self, idx: usize) -> AffineExpr<'c> {
        AffineExpr::from_raw(self.ctx, self.storage().results[idx])
    }

    /// Position of the dimension at result `idx`. Panics if that result is
    /// not a bare dimension.
    pub fn dim_position(&self, idx: usize) -> usize {
        match self.result(idx).dim_position() {
            Some(pos) => pos,
            None => panic!("result {} of {} is not a dimension", idx, self),
        }
    }

    /// First result equal to the dimension expression `input`.
    pub fn result_position(&self, input: AffineExpr<'c>) -> Option<usize> {
        input.dim_position()?;
        self.storage().results.iter().position(|&id| id == input.id() && input.belongs_to(self.ctx))
    }

    /// True for `() -> ()`.
    pub fn is_empty(&self) -> bool {
        let storage = self.storage();
        storage.num_dims == 0 && storage.num_symbols == 0 && storage.results.is_empty()
    }

    /// Exactly one result, and it is a constant.
    pub fn is_single_constant(&self) -> bool {
        self.num_results() == 1 && self.result(0).is_constant()
    }

    /// Every result is a constant. Vacuously true without results.
    pub fn is_constant(&self) -> bool {
        self.results().iter().all(|e| e.is_constant())
    }

    /// The value of a single-constant map. Panics otherwise.
    pub fn single_constant_result(&self) -> i64 {
        assert!(self.is_single_constant(), "map must have a single constant result");
        self.result(0).constant_value().unwrap_or_default()
    }

    /// Values of an all-constant map. Panics otherwise.
    pub fn constant_results(&self) -> Vec<i64> {
        let values: Option<Vec<i64>> = self.results().iter().map(|e| e.constant_value()).collect();
        match values {
            Some(values) => values,
            None => panic!("map {} must have only constant results", self),
        }
    }

    /// Some result mentions `d<position>`.
    pub fn is_function_of_dim(&self, position: usize) -> bool {
        self.results().iter().any(|e| e.is_function_of_dim(position))
    }

    /// Some result mentions `s<position>`.
    pub fn is_function_of_symbol(&self, position: usize) -> bool {
        self.results().iter().any(|e| e.is_function_of_symbol(position))
    }

    /// Walk every result expression in post-order.
    pub fn walk_exprs<F: FnMut(AffineExpr<'c>)>(&self, callback: &mut F) {
        for expr in self.results() {
            expr.walk(callback);
        }
    }

    /// GCD of the largest known divisors of all results, or `u64::MAX` if
    /// every result is zero.
    pub fn largest_known_divisor_of_map_exprs(&self) -> u64 {
        let gcd = self
            .results()
            .iter()
            .fold(0u64, |acc, e| acc.gcd(&e.largest_known_divisor()));
        if gcd == 0 { u64::MAX } else { gcd }
    }

    // Classification.

    /// `(d0, ..., dn) -> (d0, ..., dn)`
    pub fn is_identity(&self) -> bool {
        let storage = self.storage();
        if storage.num_dims != storage.results.len() {
            return false;
        }
        self.wrap(&storage.results)
            .iter()
            .enumerate()
            .all(|(i, e)| e.dim_position() == Some(i))
    }

    /// `()[s0, ..., sn] -> (s0, ..., sn)`
    pub fn is_symbol_identity(&self) -> bool {
        let storage = self.storage();
        if storage.num_symbols != storage.results.len() {
            return false;
        }
        self.wrap(&storage.results)
            .iter()
            .enumerate()
            .all(|(i, e)| e.symbol_position() == Some(i))
    }

    /// `(d0, ..., dn) -> (dk, ..., dn)` with no symbols.
    pub fn is_minor_identity(&self) -> bool {
        let storage = self.storage();
        let Some(suffix_start) = storage.num_dims.checked_sub(storage.results.len()) else {
            return false;
        };
        storage.num_symbols == 0
            && self
                .wrap(&storage.results)
                .iter()
                .enumerate()
                .all(|(i, e)| e.dim_position() == Some(suffix_start + i))
    }

    /// Positions of results that are the constant `0`.
    pub fn broadcast_dims(&self) -> Vec<usize> {
        self.results()
            .iter()
            .enumerate()
            .filter(|(_, e)| e.constant_value() == Some(0))
            .map(|(i, _)| i)
            .collect()
    }

    /// If this map is a minor identity where some results may be replaced
    /// by the constant `0`, the positions of those broadcast results.
    pub fn minor_identity_broadcast_dims(&self) -> Option<Vec<usize>> {
        let storage = self.storage();
        let num_results = storage.results.len();
        if storage.num_dims < num_results {
            return None;
        }
        let suffix_start = storage.num_dims - num_results;
        let mut broadcast = Vec::new();
        for (idx, expr) in self.wrap(&storage.results).into_iter().enumerate() {
            match expr.kind() {
                ExprKind::Constant(0) => broadcast.push(idx),
                ExprKind::Dim(pos) if pos == suffix_start + idx => {}
                _ => return None,
            }
        }
        Some(broadcast)
    }

    /// See [`AffineMap::minor_identity_broadcast_dims`].
    pub fn is_minor_identity_with_broadcasting(&self) -> bool {
        self.minor_identity_broadcast_dims().is_some()
    }

    /// If some permutation of the results plus broadcasts turns this map into
    /// a minor identity, that permutation: result `i` moves to position
    /// `perm[i]`.
    ///
    /// `(d0, d1, d2) -> (0, d1)` gives `[1, 0]` and `(d0, d1) -> (d1, 0, 0, d0)`
    /// gives `[3, 0, 1, 2]`. Broadcast results take the first free slots, so
    /// other valid permutations may exist.
    pub fn permutation_of_minor_identity_with_broadcasting(&self) -> Option<Vec<usize>> {
        let num_inputs = self.num_inputs();
        let results = self.results();
        let num_results = results.len();
        let projection_start = num_inputs.saturating_sub(num_results);
        // More results than inputs: the minor identity starts with broadcasts.
        let leading_broadcast = num_results.saturating_sub(num_inputs);
        let mut permuted = vec![0; num_results];
        let mut found = vec![false; num_inputs.max(num_results)];
        let mut broadcast: SmallVec<[usize; 4]> = SmallVec::new();
        for (idx, expr) in results.iter().enumerate() {
            match expr.kind() {
                ExprKind::Constant(0) => broadcast.push(idx),
                ExprKind::Dim(pos) if pos >= projection_start => {
                    let target = pos - projection_start + leading_broadcast;
                    if found[target] {
                        return None;
                    }
                    permuted[idx] = target;
                    found[target] = true;
                }
                _ => return None,
            }
        }
        let mut slot = 0;
        for idx in broadcast {
            while found[slot] {
                slot += 1;
            }
            permuted[idx] = slot;
            slot += 1;
        }
        Some(permuted)
    }

    /// True if the map has no symbols and each result is a distinct dimension
    /// or, when `allow_zero_in_results`, the constant `0`.
    pub fn is_projected_permutation(&self, allow_zero_in_results: bool) -> bool {
        let storage = self.storage();
        if storage.num_symbols > 0 {
            return false;
        }
        let num_inputs = storage.num_dims + storage.num_symbols;
        if storage.results.len() > num_inputs {
            return false;
        }
        let mut seen = vec![false; num_inputs];
        for expr in self.wrap(&storage.results) {
            match expr.kind() {
                ExprKind::Dim(pos) => match seen.get_mut(pos) {
                    Some(slot) if !*slot => *slot = true,
                    _ => return false,
                },
                ExprKind::Constant(0) if allow_zero_in_results => {}
                _ => return false,
            }
        }
        true
    }

    /// A square projected permutation without broadcasts.
    pub fn is_permutation(&self) -> bool {
        self.num_dims() == self.num_results() && self.is_projected_permutation(false)
    }

    // Folding.

    /// Fold every result over `operands` (dims then symbols). See
    /// [`PartialFold`]; poison anywhere aborts the whole fold.
    pub fn partial_constant_fold(&self, operands: &[Option<IntegerAttr>]) -> Result<PartialFold<'c>, PoisonError> {
        let storage = self.storage();
        assert_eq!(
            operands.len(),
            storage.num_dims + storage.num_symbols,
            "expected one operand per map input"
        );
        let folder = ExprConstantFolder::new(storage.num_dims, operands);
        let mut exprs = Vec::with_capacity(storage.results.len());
        let mut constants = Some(Vec::with_capacity(storage.results.len()));
        for expr in self.wrap(&storage.results) {
            match folder.fold(expr)? {
                Some(value) => {
                    exprs.push(self.ctx.constant_expr(value));
                    if let Some(constants) = constants.as_mut() {
                        constants.push(value);
                    }
                }
                None => {
                    exprs.push(expr);
                    constants = None;
                }
            }
        }
        Ok(PartialFold {
            map: Self::get(self.ctx, storage.num_dims, storage.num_symbols, &exprs),
            constants,
        })
    }

    /// Fold every result to an index constant. `Ok(None)` if some result
    /// could not be folded, or if the map has no results to fold.
    pub fn constant_fold(&self, operands: &[Option<IntegerAttr>]) -> Result<Option<Vec<IntegerAttr>>, PoisonError> {
        let folded = self.partial_constant_fold(operands)?;
        Ok(folded
            .constants
            .filter(|values| !values.is_empty())
            .map(|values| values.into_iter().map(IntegerAttr::index).collect()))
    }

    // Substitution and composition.

    /// Substitute dims and symbols in every result. The caller states the
    /// dim and symbol counts of the new map; the result count is unchanged.
    pub fn replace_dims_and_symbols(
        &self,
        dims: &[AffineExpr<'c>],
        syms: &[AffineExpr<'c>],
        num_result_dims: usize,
        num_result_syms: usize,
    ) -> Self {
        let exprs: Vec<_> = self
            .results()
            .iter()
            .map(|e| e.replace_dims_and_symbols(dims, syms))
            .collect();
        Self::get(self.ctx, num_result_dims, num_result_syms, &exprs)
    }

    /// Replace every occurrence of `expr` by `replacement` in all results.
    pub fn replace(
        &self,
        expr: AffineExpr<'c>,
        replacement: AffineExpr<'c>,
        num_result_dims: usize,
        num_result_syms: usize,
    ) -> Self {
        let exprs: Vec<_> = self.results().iter().map(|e| e.replace(expr, replacement)).collect();
        Self::get(self.ctx, num_result_dims, num_result_syms, &exprs)
    }

    /// Apply all substitutions of `map` to every result.
    pub fn replace_all<S: BuildHasher>(
        &self,
        map: &HashMap<AffineExpr<'c>, AffineExpr<'c>, S>,
        num_result_dims: usize,
        num_result_syms: usize,
    ) -> Self {
        let exprs: Vec<_> = self.results().iter().map(|e| e.replace_all(map)).collect();
        Self::get(self.ctx, num_result_dims, num_result_syms, &exprs)
    }

    /// Like [`AffineMap::replace_all`], inferring the dim and symbol counts
    /// from the rewritten results.
    pub fn replace_all_inferred<S: BuildHasher>(&self, map: &HashMap<AffineExpr<'c>, AffineExpr<'c>, S>) -> Self {
        let exprs: Vec<_> = self.results().iter().map(|e| e.replace_all(map)).collect();
        Self::infer_from_expr_list(self.ctx, &[exprs])
            .pop()
            .unwrap_or_else(|| Self::empty(self.ctx))
    }

    /// `self ∘ other`: feed the results of `other` into the dims of `self`.
    ///
    /// The new map has `other`'s dims. Its symbols are the symbols of `self`
    /// followed by those of `other`.
    pub fn compose(&self, other: &AffineMap<'c>) -> Self {
        match self.try_compose(other) {
            Ok(map) => map,
            Err(err) => panic!("{}", err),
        }
    }

    /// Checked [`AffineMap::compose`].
    pub fn try_compose(&self, other: &AffineMap<'c>) -> Result<Self, MapError> {
        if !std::ptr::eq(self.ctx, other.ctx) {
            return Err(MapError::new(MapErrorKind::InconsistentSpace, "cannot compose maps of different contexts"));
        }
        if self.num_dims() != other.num_results() {
            return Err(MapError::new(
                MapErrorKind::ArityMismatch,
                format!(
                    "cannot compose {} with {}: {} dims vs {} results",
                    self,
                    other,
                    self.num_dims(),
                    other.num_results()
                ),
            ));
        }
        let ctx = self.ctx;
        let num_dims = other.num_dims();
        let own_symbols = self.num_symbols();
        let num_symbols = own_symbols + other.num_symbols();
        let new_dims: Vec<_> = (0..num_dims).map(|i| ctx.dim_expr(i)).collect();
        let new_symbols: Vec<_> = (own_symbols..num_symbols).map(|i| ctx.symbol_expr(i)).collect();
        let other = other.replace_dims_and_symbols(&new_dims, &new_symbols, num_dims, num_symbols);
        let exprs: Vec<_> = self.results().iter().map(|e| e.compose(&other)).collect();
        Ok(Self::get(ctx, num_dims, num_symbols, &exprs))
    }

    /// Evaluate a symbol-free map at the point `values`.
    pub fn compose_values(&self, values: &[i64]) -> Vec<i64> {
        match self.try_compose_values(values) {
            Ok(result) => result,
            Err(err) => panic!("{}", err),
        }
    }

    /// Checked [`AffineMap::compose_values`]. Poison and quotient overflow
    /// are reported instead of panicking.
    pub fn try_compose_values(&self, values: &[i64]) -> AffineResult<Vec<i64>> {
        if self.num_symbols() != 0 {
            return Err(MapError::new(MapErrorKind::SymbolsNotAllowed, format!("expected symbol-less map, got {}", self)).into());
        }
        if values.len() != self.num_dims() {
            return Err(MapError::new(
                MapErrorKind::OperandCount,
                format!("expected {} values, got {}", self.num_dims(), values.len()),
            )
            .into());
        }
        let operands: Vec<_> = values.iter().map(|&v| Some(IntegerAttr::index(v))).collect();
        let folder = ExprConstantFolder::new(values.len(), &operands);
        let mut result = Vec::with_capacity(self.num_results());
        for expr in self.results() {
            match folder.fold(expr)? {
                Some(value) => result.push(value),
                // Every operand is known, so only an overflowing quotient
                // leaves a result unfolded.
                None => {
                    return Err(MapError::new(
                        MapErrorKind::Overflow,
                        format!("{} overflows for {:?}", expr, values),
                    )
                    .into())
                }
            }
        }
        Ok(result)
    }

    // Result selection.

    /// Remove result `pos`.
    pub fn drop_result(&self, pos: usize) -> Self {
        self.drop_results(&[pos])
    }

    /// Remove the results at `positions` (any order, duplicates allowed).
    pub fn drop_results(&self, positions: &[usize]) -> Self {
        let mut mask = vec![false; self.num_results()];
        for &pos in positions {
            assert!(pos < mask.len(), "result position {} out of range for {}", pos, self);
            mask[pos] = true;
        }
        self.drop_results_mask(&mask)
    }

    /// Remove the results whose bit is set in `mask`.
    pub fn drop_results_mask(&self, mask: &[bool]) -> Self {
        let storage = self.storage();
        let exprs: Vec<_> = self
            .wrap(&storage.results)
            .into_iter()
            .enumerate()
            .filter(|(i, _)| !mask.get(*i).copied().unwrap_or(false))
            .map(|(_, e)| e)
            .collect();
        Self::get(self.ctx, storage.num_dims, storage.num_symbols, &exprs)
    }

    /// Number of results that are the constant `0`.
    pub fn num_zero_results(&self) -> usize {
        self.broadcast_dims().len()
    }

    /// Remove every constant `0` result.
    pub fn drop_zero_results(&self) -> Self {
        self.drop_results(&self.broadcast_dims())
    }

    /// The results at `positions`, in that order.
    pub fn sub_map(&self, positions: &[usize]) -> Self {
        let storage = self.storage();
        let exprs: Vec<_> = positions
            .iter()
            .map(|&i| AffineExpr::from_raw(self.ctx, storage.results[i]))
            .collect();
        Self::get(self.ctx, storage.num_dims, storage.num_symbols, &exprs)
    }

    /// `length` consecutive results starting at `start`.
    pub fn slice_map(&self, start: usize, length: usize) -> Self {
        let storage = self.storage();
        let exprs = self.wrap(&storage.results[start..start + length]);
        Self::get(self.ctx, storage.num_dims, storage.num_symbols, &exprs)
    }

    /// The first `num_results` results; the empty map for zero.
    pub fn major_sub_map(&self, num_results: usize) -> Self {
        if num_results == 0 {
            return Self::empty(self.ctx);
        }
        if num_results > self.num_results() {
            return *self;
        }
        self.slice_map(0, num_results)
    }

    /// The last `num_results` results; the empty map for zero.
    pub fn minor_sub_map(&self, num_results: usize) -> Self {
        if num_results == 0 {
            return Self::empty(self.ctx);
        }
        let total = self.num_results();
        if num_results > total {
            return *self;
        }
        self.slice_map(total - num_results, num_results)
    }

    /// Append `shift` new dims; existing dims at or after `offset` move up.
    pub fn shift_dims(&self, shift: usize, offset: usize) -> Self {
        let storage = self.storage();
        let exprs: Vec<_> = self
            .wrap(&storage.results)
            .iter()
            .map(|e| e.shift_dims(storage.num_dims, shift, offset))
            .collect();
        Self::get(self.ctx, storage.num_dims + shift, storage.num_symbols, &exprs)
    }

    /// Append `shift` new symbols; existing symbols at or after `offset` move up.
    pub fn shift_symbols(&self, shift: usize, offset: usize) -> Self {
        let storage = self.storage();
        let exprs: Vec<_> = self
            .wrap(&storage.results)
            .iter()
            .map(|e| e.shift_symbols(storage.num_symbols, shift, offset))
            .collect();
        Self::get(self.ctx, storage.num_dims, storage.num_symbols + shift, &exprs)
    }
}

impl fmt::Display for AffineMap<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let storage = self.storage();
        write!(f, "(")?;
        for i in 0..storage.num_dims {
            if i > 0 { write!(f, ", ")?; }
            write!(f, "d{}", i)?;
        }
        write!(f, ")")?;
        if storage.num_symbols > 0 {
            write!(f, "[")?;
            for i in 0..storage.num_symbols {
                if i > 0 { write!(f, ", ")?; }
                write!(f, "s{}", i)?;
            }
            write!(f, "]")?;
        }
        write!(f, " -> (")?;
        for (i, expr) in self.wrap(&storage.results).iter().enumerate() {
            if i > 0 { write!(f, ", ")?; }
            write!(f, "{}", expr)?;
        }
        write!(f, ")")
    }
}

impl fmt::Debug for AffineMap<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AffineMap({})", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::affine::fold::index_operands;
    use crate::utils::ContextConfig;

    #[test]
    fn test_identity() {
        let ctx = Context::new();
        let id = AffineMap::multi_dim_identity(&ctx, 3);
        assert!(id.is_identity());
        assert!(id.is_permutation());
        assert_eq!(id.num_inputs(), 3);
        assert_eq!(id.compose_values(&[1, 2, 3]), vec![1, 2, 3]);
        assert_eq!(id.to_string(), "(d0, d1, d2) -> (d0, d1, d2)");
    }

    #[test]
    fn test_interning() {
        let ctx = Context::new();
        let d0 = ctx.dim_expr(0);
        let a = AffineMap::get(&ctx, 1, 0, &[d0 + 1]);
        let b = AffineMap::get(&ctx, 1, 0, &[ctx.dim_expr(0) + 1]);
        let c = AffineMap::get(&ctx, 2, 0, &[d0 + 1]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_empty_and_constant() {
        let ctx = Context::new();
        let empty = AffineMap::empty(&ctx);
        assert!(empty.is_empty());
        assert_eq!(empty.to_string(), "() -> ()");
        let c = AffineMap::constant_map(&ctx, 42);
        assert!(c.is_single_constant());
        assert_eq!(c.single_constant_result(), 42);
        assert_eq!(c.constant_results(), vec![42]);
        assert!(!c.is_empty());
    }

    #[test]
    fn test_try_get_rejects_out_of_range() {
        let ctx = Context::new();
        let err = AffineMap::try_get(&ctx, 1, 0, &[ctx.dim_expr(1)]).unwrap_err();
        assert_eq!(err.kind, MapErrorKind::PositionOutOfRange);
        let err = AffineMap::try_get(&ctx, 1, 1, &[ctx.symbol_expr(2)]).unwrap_err();
        assert_eq!(err.kind, MapErrorKind::PositionOutOfRange);
        assert!(AffineMap::try_get(&ctx, 2, 1, &[ctx.dim_expr(1) + ctx.symbol_expr(0)]).is_ok());
    }

    #[test]
    #[should_panic(expected = "invalid affine map")]
    fn test_get_verifies_when_enabled() {
        let ctx = Context::with_config(ContextConfig::new().verify_maps(true));
        AffineMap::get(&ctx, 0, 0, &[ctx.dim_expr(0)]);
    }

    #[test]
    fn test_minor_identity() {
        let ctx = Context::new();
        let minor = AffineMap::minor_identity(&ctx, 3, 2);
        let expected = AffineMap::get(&ctx, 3, 0, &[ctx.dim_expr(1), ctx.dim_expr(2)]);
        assert_eq!(minor, expected);
        assert!(minor.is_minor_identity());
        let not_minor = AffineMap::get(&ctx, 3, 0, &[ctx.dim_expr(0), ctx.dim_expr(2)]);
        assert!(!not_minor.is_minor_identity());
        let with_symbol = AffineMap::get(&ctx, 3, 1, &[ctx.dim_expr(1), ctx.dim_expr(2)]);
        assert!(!with_symbol.is_minor_identity());
        let too_many = AffineMap::get(&ctx, 1, 0, &[ctx.dim_expr(0), ctx.dim_expr(0)]);
        assert!(!too_many.is_minor_identity());
        // Classification interns nothing.
        let maps_before = ctx.num_maps();
        assert!(AffineMap::multi_dim_identity(&ctx, 3).is_minor_identity());
        assert_eq!(ctx.num_maps(), maps_before + 1);
    }

    #[test]
    fn test_minor_identity_with_broadcasting() {
        let ctx = Context::new();
        let zero = ctx.constant_expr(0);
        let map = AffineMap::get(&ctx, 3, 0, &[zero, ctx.dim_expr(2)]);
        assert_eq!(map.minor_identity_broadcast_dims(), Some(vec![0]));
        assert!(map.is_minor_identity_with_broadcasting());
        assert!(!map.is_minor_identity());

        let wrong_dim = AffineMap::get(&ctx, 3, 0, &[ctx.dim_expr(1), zero]);
        assert_eq!(wrong_dim.minor_identity_broadcast_dims(), None);
        let nonzero = AffineMap::get(&ctx, 3, 0, &[ctx.constant_expr(1), ctx.dim_expr(2)]);
        assert!(!nonzero.is_minor_identity_with_broadcasting());
    }

    #[test]
    fn test_permutation_of_minor_identity() {
        let ctx = Context::new();
        let d = |i| ctx.dim_expr(i);
        let zero = ctx.constant_expr(0);

        let map = AffineMap::get(&ctx, 3, 0, &[zero, d(1)]);
        assert_eq!(map.permutation_of_minor_identity_with_broadcasting(), Some(vec![1, 0]));

        let map = AffineMap::get(&ctx, 3, 0, &[d(0), zero]);
        assert_eq!(map.permutation_of_minor_identity_with_broadcasting(), None);

        let map = AffineMap::get(&ctx, 4, 0, &[zero, d(1), d(3)]);
        assert_eq!(map.permutation_of_minor_identity_with_broadcasting(), Some(vec![1, 0, 2]));

        let map = AffineMap::get(&ctx, 2, 0, &[d(1), zero, zero, d(0)]);
        assert_eq!(map.permutation_of_minor_identity_with_broadcasting(), Some(vec![3, 0, 1, 2]));
    }

    #[test]
    fn test_projected_permutation() {
        let ctx = Context::new();
        let d0 = ctx.dim_expr(0);
        let d1 = ctx.dim_expr(1);
        let zero = ctx.constant_expr(0);

        let broadcast = AffineMap::get(&ctx, 2, 0, &[zero, d1]);
        assert!(broadcast.is_projected_permutation(true));
        assert!(!broadcast.is_projected_permutation(false));

        let duplicate = AffineMap::get(&ctx, 2, 0, &[d0, d0]);
        assert!(!duplicate.is_projected_permutation(true));

        let projected = AffineMap::get(&ctx, 3, 0, &[ctx.dim_expr(2), d0]);
        assert!(projected.is_projected_permutation(false));
        assert!(!projected.is_permutation());

        let with_symbols = AffineMap::get(&ctx, 2, 1, &[d1, d0]);
        assert!(!with_symbols.is_projected_permutation(true));

        let swap = AffineMap::get(&ctx, 2, 0, &[d1, d0]);
        assert!(swap.is_permutation());
        assert_eq!(AffineMap::permutation_map(&ctx, &[1, 0]), swap);
    }

    #[test]
    fn test_invalid_permutation_vector() {
        let ctx = Context::new();
        let err = AffineMap::try_permutation_map(&ctx, &[0, 0]).unwrap_err();
        assert_eq!(err.kind, MapErrorKind::InvalidPermutation);
        assert!(AffineMap::try_permutation_map(&ctx, &[]).is_err());
        assert!(AffineMap::try_permutation_map(&ctx, &[0, 2]).is_err());
    }

    #[test]
    fn test_symbol_identity() {
        let ctx = Context::new();
        let map = AffineMap::get(&ctx, 0, 2, &[ctx.symbol_expr(0), ctx.symbol_expr(1)]);
        assert!(map.is_symbol_identity());
        assert!(!map.is_identity());
    }

    #[test]
    fn test_partial_constant_fold() {
        let ctx = Context::new();
        let d0 = ctx.dim_expr(0);
        let d1 = ctx.dim_expr(1);
        let map = AffineMap::get(&ctx, 2, 0, &[d0 + 1, d1, ctx.constant_expr(5)]);

        let partial = map.partial_constant_fold(&index_operands(&[Some(2), None])).unwrap();
        let expected = AffineMap::get(&ctx, 2, 0, &[ctx.constant_expr(3), d1, ctx.constant_expr(5)]);
        assert_eq!(partial.map, expected);
        assert_eq!(partial.constants, None);

        let full = map.partial_constant_fold(&index_operands(&[Some(2), Some(7)])).unwrap();
        assert_eq!(full.constants, Some(vec![3, 7, 5]));
        assert!(full.map.is_constant());
        assert_eq!(full.map.constant_results(), vec![3, 7, 5]);

        let attrs = map.constant_fold(&index_operands(&[Some(2), Some(7)])).unwrap().unwrap();
        assert_eq!(attrs, vec![IntegerAttr::index(3), IntegerAttr::index(7), IntegerAttr::index(5)]);
        assert_eq!(map.constant_fold(&index_operands(&[None, Some(7)])).unwrap(), None);
    }

    #[test]
    fn test_fold_poison_suppresses_results() {
        let ctx = Context::new();
        let d0 = ctx.dim_expr(0);
        let map = AffineMap::get(&ctx, 1, 0, &[d0, d0 % 0]);
        assert!(map.partial_constant_fold(&index_operands(&[Some(3)])).is_err());
        assert!(map.constant_fold(&index_operands(&[Some(3)])).is_err());

        let div = AffineMap::get(&ctx, 1, 0, &[d0.floor_div(0)]);
        let err = div.constant_fold(&index_operands(&[Some(3)])).unwrap_err();
        assert_eq!(err.divisor, 0);
    }

    #[test]
    fn test_fold_unknown_dividend_is_not_poison() {
        let ctx = Context::new();
        let d0 = ctx.dim_expr(0);
        let d1 = ctx.dim_expr(1);
        let map = AffineMap::get(&ctx, 2, 0, &[d0 % 0, d1 + 1]);
        let folded = map.partial_constant_fold(&index_operands(&[None, Some(3)])).unwrap();
        assert_eq!(folded.map, AffineMap::get(&ctx, 2, 0, &[d0 % 0, ctx.constant_expr(4)]));
        assert_eq!(folded.constants, None);
        assert_eq!(map.constant_fold(&index_operands(&[None, Some(3)])).unwrap(), None);
        // Once the dividend is known the divisor poisons the whole map.
        assert!(map.partial_constant_fold(&index_operands(&[Some(1), Some(3)])).is_err());
    }

    #[test]
    fn test_fold_without_results() {
        let ctx = Context::new();
        let map = AffineMap::get(&ctx, 1, 0, &[]);
        let partial = map.partial_constant_fold(&index_operands(&[Some(2)])).unwrap();
        assert_eq!(partial.map, map);
        assert_eq!(partial.constants, Some(vec![]));
        assert_eq!(map.constant_fold(&index_operands(&[Some(2)])).unwrap(), None);
    }

    #[test]
    fn test_fold_constant_map() {
        let ctx = Context::new();
        let map = AffineMap::get(&ctx, 1, 0, &[ctx.constant_expr(4), ctx.constant_expr(-1)]);
        let folded = map.partial_constant_fold(&index_operands(&[None])).unwrap();
        assert_eq!(folded.constants, Some(map.constant_results()));
        assert_eq!(folded.map, map);
    }

    #[test]
    fn test_compose() {
        let ctx = Context::new();
        let d0 = ctx.dim_expr(0);
        let d1 = ctx.dim_expr(1);
        let s0 = ctx.symbol_expr(0);
        let s1 = ctx.symbol_expr(1);

        // (d0, d1) -> (d0 + d1) after (d0) -> (d0 * 2, d0 + 1)
        let outer = AffineMap::get(&ctx, 2, 0, &[d0 + d1]);
        let inner = AffineMap::get(&ctx, 1, 0, &[d0 * 2, d0 + 1]);
        let composed = outer.compose(&inner);
        assert_eq!(composed, AffineMap::get(&ctx, 1, 0, &[d0 * 2 + (d0 + 1)]));
        assert_eq!(composed.compose_values(&[5]), vec![16]);

        // Symbols of `self` come first, then those of `other`.
        let outer = AffineMap::get(&ctx, 1, 1, &[d0 + s0]);
        let inner = AffineMap::get(&ctx, 1, 1, &[d0 * 2 + s0]);
        let composed = outer.compose(&inner);
        assert_eq!(composed.num_symbols(), 2);
        assert_eq!(composed, AffineMap::get(&ctx, 1, 2, &[d0 * 2 + s1 + s0]));
    }

    #[test]
    fn test_compose_arity_mismatch() {
        let ctx = Context::new();
        let outer = AffineMap::multi_dim_identity(&ctx, 2);
        let inner = AffineMap::multi_dim_identity(&ctx, 3);
        let err = outer.try_compose(&inner).unwrap_err();
        assert_eq!(err.kind, MapErrorKind::ArityMismatch);
    }

    #[test]
    fn test_compose_values() {
        let ctx = Context::new();
        let d0 = ctx.dim_expr(0);
        let d1 = ctx.dim_expr(1);
        let map = AffineMap::get(&ctx, 2, 0, &[d0 + d1, d0.floor_div(2), d1 % 3]);
        assert_eq!(map.compose_values(&[3, 4]), vec![7, 1, 1]);

        let with_symbol = AffineMap::get(&ctx, 1, 1, &[d0]);
        assert!(with_symbol.try_compose_values(&[1]).is_err());
        assert!(map.try_compose_values(&[1]).is_err());

        let poison = AffineMap::get(&ctx, 1, 0, &[d0 % 0]);
        assert!(matches!(
            poison.try_compose_values(&[1]),
            Err(crate::utils::AffineError::Poison(_))
        ));

        let negate = AffineMap::get(&ctx, 1, 0, &[d0.floor_div(-1)]);
        assert_eq!(negate.compose_values(&[5]), vec![-5]);
        assert!(matches!(
            negate.try_compose_values(&[i64::MIN]),
            Err(crate::utils::AffineError::Map(MapError { kind: MapErrorKind::Overflow, .. }))
        ));
    }

    #[test]
    fn test_replace_dims_and_symbols() {
        let ctx = Context::new();
        let d0 = ctx.dim_expr(0);
        let d1 = ctx.dim_expr(1);
        let s0 = ctx.symbol_expr(0);
        let map = AffineMap::get(&ctx, 2, 1, &[d0 + s0, d1]);
        let replaced = map.replace_dims_and_symbols(&[d1, d0], &[ctx.constant_expr(3)], 2, 0);
        assert_eq!(replaced, AffineMap::get(&ctx, 2, 0, &[d1 + 3, d0]));
        assert_eq!(replaced.num_results(), map.num_results());
    }

    #[test]
    fn test_sparse_replace() {
        let ctx = Context::new();
        let d0 = ctx.dim_expr(0);
        let d1 = ctx.dim_expr(1);
        let tile = d0.floor_div(32);
        let map = AffineMap::get(&ctx, 1, 0, &[tile, d0 % 32]);
        let replaced = map.replace(tile, d1, 2, 0);
        assert_eq!(replaced, AffineMap::get(&ctx, 2, 0, &[d1, d0 % 32]));

        let mut subs = HashMap::new();
        subs.insert(d0 % 32, ctx.dim_expr(2));
        let inferred = map.replace_all_inferred(&subs);
        assert_eq!(inferred.num_dims(), 3);
        assert_eq!(inferred.results(), vec![tile, ctx.dim_expr(2)]);
        let explicit = map.replace_all(&subs, 4, 0);
        assert_eq!(explicit.num_dims(), 4);
    }

    #[test]
    fn test_drop_results_round_trip() {
        let ctx = Context::new();
        let d0 = ctx.dim_expr(0);
        let d1 = ctx.dim_expr(1);
        let map = AffineMap::get(&ctx, 2, 0, &[d0, d1 * 2, d0 + d1]);
        let dropped = map.drop_results(&[1]);
        assert_eq!(dropped.results(), vec![d0, d0 + d1]);
        assert_eq!(dropped.num_dims(), 2);
        let rebuilt = AffineMap::get(&ctx, 2, 0, &[dropped.result(0), d1 * 2, dropped.result(1)]);
        assert_eq!(rebuilt, map);
        assert_eq!(map.drop_results_mask(&[true, false, true]).results(), vec![d1 * 2]);
        assert_eq!(map.drop_result(0).num_results(), 2);
    }

    #[test]
    fn test_zero_results() {
        let ctx = Context::new();
        let zero = ctx.constant_expr(0);
        let map = AffineMap::get(&ctx, 2, 0, &[zero, ctx.dim_expr(1), zero]);
        assert_eq!(map.num_zero_results(), 2);
        assert_eq!(map.broadcast_dims(), vec![0, 2]);
        assert_eq!(map.drop_zero_results().results(), vec![ctx.dim_expr(1)]);
    }

    #[test]
    fn test_sub_maps() {
        let ctx = Context::new();
        let id = AffineMap::multi_dim_identity(&ctx, 4);
        let d = |i| ctx.dim_expr(i);
        assert_eq!(id.sub_map(&[3, 1]).results(), vec![d(3), d(1)]);
        assert_eq!(id.slice_map(1, 2).results(), vec![d(1), d(2)]);
        assert_eq!(id.major_sub_map(2).results(), vec![d(0), d(1)]);
        assert_eq!(id.minor_sub_map(2).results(), vec![d(2), d(3)]);
        assert_eq!(id.minor_sub_map(9), id);
        assert!(id.major_sub_map(0).is_empty());
    }

    #[test]
    fn test_positions_and_functions_of() {
        let ctx = Context::new();
        let d0 = ctx.dim_expr(0);
        let d2 = ctx.dim_expr(2);
        let map = AffineMap::get(&ctx, 3, 1, &[d2, d0 + ctx.symbol_expr(0)]);
        assert_eq!(map.dim_position(0), 2);
        assert_eq!(map.result_position(d2), Some(0));
        assert_eq!(map.result_position(d0), None);
        assert!(map.is_function_of_dim(0));
        assert!(!map.is_function_of_dim(1));
        assert!(map.is_function_of_symbol(0));
        let mut count = 0;
        map.walk_exprs(&mut |_| count += 1);
        assert_eq!(count, 4);
    }

    #[test]
    fn test_shift_and_divisor() {
        let ctx = Context::new();
        let d0 = ctx.dim_expr(0);
        let s0 = ctx.symbol_expr(0);
        let map = AffineMap::get(&ctx, 1, 1, &[d0 * 4, s0 * 6]);
        assert_eq!(map.largest_known_divisor_of_map_exprs(), 2);
        let shifted = map.shift_dims(2, 0);
        assert_eq!(shifted.num_dims(), 3);
        assert_eq!(shifted.result(0), ctx.dim_expr(2) * 4);
        let shifted = map.shift_symbols(1, 0);
        assert_eq!(shifted.num_symbols(), 2);
        assert_eq!(shifted.result(1), ctx.symbol_expr(1) * 6);
        let zeros = AffineMap::get(&ctx, 0, 0, &[ctx.constant_expr(0)]);
        assert_eq!(zeros.largest_known_divisor_of_map_exprs(), u64::MAX);
    }

    #[test]
    fn test_infer_from_expr_list() {
        let ctx = Context::new();
        let maps = AffineMap::infer_from_expr_list(
            &ctx,
            &[vec![ctx.dim_expr(2)], vec![ctx.symbol_expr(0), ctx.dim_expr(0)]],
        );
        assert_eq!(maps.len(), 2);
        assert!(maps.iter().all(|m| m.num_dims() == 3 && m.num_symbols() == 1));
    }

    #[test]
    fn test_filtered_identity_and_targets() {
        let ctx = Context::new();
        let filtered = AffineMap::filtered_identity(&ctx, 4, |d| d % 2 == 1);
        assert_eq!(filtered.results(), vec![ctx.dim_expr(1), ctx.dim_expr(3)]);
        let targets = AffineMap::multi_dim_map_with_targets(&ctx, 3, &[2, 0]);
        assert_eq!(targets.to_string(), "(d0, d1, d2) -> (d2, d0)");
    }

    #[test]
    fn test_display_with_symbols() {
        let ctx = Context::new();
        let map = AffineMap::get(&ctx, 2, 1, &[ctx.dim_expr(0) + ctx.symbol_expr(0), ctx.dim_expr(1) % 4]);
        assert_eq!(map.to_string(), "(d0, d1)[s0] -> (d0 + s0, d1 mod 4)");
    }
}
