//! Operations over affine maps: projection, compression, inversion,
//! concatenation and simplification.
//!
//! Operations that take several maps treat them as a single unit of work so
//! that all of them agree on one dim/symbol numbering.

use crate::affine::context::Context;
use crate::affine::expr::{AffineExpr, ExprKind};
use crate::affine::map::AffineMap;
use crate::affine::simplify::simplify_affine_expr;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Space {
    Dims,
    Symbols,
}

fn identifier<'c>(ctx: &'c Context, space: Space, position: usize) -> AffineExpr<'c> {
    match space {
        Space::Dims => ctx.dim_expr(position),
        Space::Symbols => ctx.symbol_expr(position),
    }
}

fn project_common<'c>(map: AffineMap<'c>, to_project: &[bool], compress: bool, space: Space) -> AffineMap<'c> {
    let ctx = map.context();
    let count = match space {
        Space::Dims => map.num_dims(),
        Space::Symbols => map.num_symbols(),
    };
    assert_eq!(to_project.len(), count, "projection mask must cover every position");

    let zero = ctx.constant_expr(0);
    let mut kept = 0;
    let replacements: Vec<_> = to_project
        .iter()
        .enumerate()
        .map(|(pos, &project)| {
            if project {
                zero
            } else if compress {
                kept += 1;
                identifier(ctx, space, kept - 1)
            } else {
                identifier(ctx, space, pos)
            }
        })
        .collect();
    let new_count = if compress { kept } else { count };

    match space {
        Space::Dims => map.replace_dims_and_symbols(&replacements, &[], new_count, map.num_symbols()),
        Space::Symbols => map.replace_dims_and_symbols(&[], &replacements, map.num_dims(), new_count),
    }
}

/// Replace every dim flagged in `to_project` by `0`. With `compress`, the
/// remaining dims are renumbered contiguously and the dim count shrinks.
pub fn project_dims<'c>(map: AffineMap<'c>, to_project: &[bool], compress: bool) -> AffineMap<'c> {
    project_common(map, to_project, compress, Space::Dims)
}

/// Symbol counterpart of [`project_dims`].
pub fn project_symbols<'c>(map: AffineMap<'c>, to_project: &[bool], compress: bool) -> AffineMap<'c> {
    project_common(map, to_project, compress, Space::Symbols)
}

/// Drop the dims flagged in `unused` and renumber the rest.
pub fn compress_dims<'c>(map: AffineMap<'c>, unused: &[bool]) -> AffineMap<'c> {
    project_dims(map, unused, true)
}

/// Drop the symbols flagged in `unused` and renumber the rest.
pub fn compress_symbols<'c>(map: AffineMap<'c>, unused: &[bool]) -> AffineMap<'c> {
    project_symbols(map, unused, true)
}

/// Drop the dims no result refers to.
pub fn compress_unused_dims(map: AffineMap<'_>) -> AffineMap<'_> {
    compress_dims(map, &unused_dims_bit_vector(&[map]))
}

/// Drop the symbols no result refers to.
pub fn compress_unused_symbols(map: AffineMap<'_>) -> AffineMap<'_> {
    compress_symbols(map, &unused_symbols_bit_vector(&[map]))
}

fn compress_unused_list<'c>(
    maps: &[AffineMap<'c>],
    space: Space,
    compress: fn(AffineMap<'c>) -> AffineMap<'c>,
) -> Vec<AffineMap<'c>> {
    let Some(first) = maps.first() else {
        return Vec::new();
    };
    let (num_dims, num_symbols) = (first.num_dims(), first.num_symbols());
    for map in maps {
        assert!(
            map.num_dims() == num_dims && map.num_symbols() == num_symbols,
            "maps must share one dim and symbol space: {} vs {}",
            first,
            map
        );
    }

    let all_results: Vec<_> = maps.iter().flat_map(|m| m.results()).collect();
    let unified = AffineMap::get(first.context(), num_dims, num_symbols, &all_results);
    let compressed = compress(unified);

    let dropped = match space {
        Space::Dims => num_dims - compressed.num_dims(),
        Space::Symbols => num_symbols - compressed.num_symbols(),
    };
    if dropped > 0 {
        log::debug!(
            "compressed {} unused {} across {} maps",
            dropped,
            if space == Space::Dims { "dims" } else { "symbols" },
            maps.len()
        );
    }

    let mut offset = 0;
    maps.iter()
        .map(|map| {
            let slice = compressed.slice_map(offset, map.num_results());
            offset += map.num_results();
            slice
        })
        .collect()
}

/// Drop the dims unused by every map in `maps`, renumbering all maps the
/// same way. The maps must share their dim and symbol counts.
pub fn compress_unused_dims_in<'c>(maps: &[AffineMap<'c>]) -> Vec<AffineMap<'c>> {
    compress_unused_list(maps, Space::Dims, compress_unused_dims)
}

/// Symbol counterpart of [`compress_unused_dims_in`].
pub fn compress_unused_symbols_in<'c>(maps: &[AffineMap<'c>]) -> Vec<AffineMap<'c>> {
    compress_unused_list(maps, Space::Symbols, compress_unused_symbols)
}

fn unused_bit_vector(maps: &[AffineMap<'_>], space: Space) -> Vec<bool> {
    let count = maps
        .iter()
        .map(|m| match space {
            Space::Dims => m.num_dims(),
            Space::Symbols => m.num_symbols(),
        })
        .max()
        .unwrap_or(0);
    let mut unused = vec![true; count];
    for map in maps {
        map.walk_exprs(&mut |e| {
            let position = match (space, e.kind()) {
                (Space::Dims, ExprKind::Dim(pos)) | (Space::Symbols, ExprKind::Symbol(pos)) => pos,
                _ => return,
            };
            if let Some(slot) = unused.get_mut(position) {
                *slot = false;
            }
        });
    }
    unused
}

/// `true` for each dim that no map in `maps` is a function of.
pub fn unused_dims_bit_vector(maps: &[AffineMap<'_>]) -> Vec<bool> {
    unused_bit_vector(maps, Space::Dims)
}

/// `true` for each symbol that no map in `maps` is a function of.
pub fn unused_symbols_bit_vector(maps: &[AffineMap<'_>]) -> Vec<bool> {
    unused_bit_vector(maps, Space::Symbols)
}

/// Project out `projected_dims`, optionally compressing the dims, then
/// optionally drop symbols left unused.
pub fn projected_map<'c>(
    map: AffineMap<'c>,
    projected_dims: &[bool],
    compress_dims: bool,
    compress_symbols: bool,
) -> AffineMap<'c> {
    let projected = project_dims(map, projected_dims, compress_dims);
    if compress_symbols {
        compress_unused_symbols(projected)
    } else {
        projected
    }
}

/// Invert a map whose results cover every dim.
///
/// Results that are not dims are ignored and the first result naming a dim
/// wins. Returns `None` if some dim is not named by any result. The empty
/// map is its own inverse.
///
/// ```text
/// (d0, d1, d2) -> (d1, d1, d0, d2, d1, d2, d1, d0)
///   inverts to
/// (d0, d1, d2, d3, d4, d5, d6, d7) -> (d2, d0, d3)
/// ```
pub fn inverse_permutation(map: AffineMap<'_>) -> Option<AffineMap<'_>> {
    if map.is_empty() {
        return Some(map);
    }
    assert_eq!(map.num_symbols(), 0, "inverse_permutation expects a map without symbols");
    let ctx = map.context();
    let mut exprs: Vec<Option<AffineExpr<'_>>> = vec![None; map.num_dims()];
    for (idx, expr) in map.results().into_iter().enumerate() {
        if let Some(pos) = expr.dim_position() {
            match exprs.get_mut(pos) {
                Some(slot) if slot.is_none() => *slot = Some(ctx.dim_expr(idx)),
                _ => {}
            }
        }
    }
    let Some(seen) = exprs.into_iter().collect::<Option<Vec<_>>>() else {
        log::debug!("{} is not invertible: some dim is not a result", map);
        return None;
    };
    Some(AffineMap::get(ctx, map.num_results(), 0, &seen))
}

/// Invert a projected permutation, sending dims that no result names to `0`.
///
/// ```text
/// (d0, d1, d2) -> (d2, 0, d0)
///   inverts to
/// (d0, d1, d2) -> (d2, 0, d0)
/// ```
pub fn inverse_and_broadcast_projected_permutation(map: AffineMap<'_>) -> AffineMap<'_> {
    assert!(
        map.is_projected_permutation(true),
        "{} is not a projected permutation",
        map
    );
    let ctx = map.context();
    let mut exprs = vec![ctx.constant_expr(0); map.num_dims()];
    for (idx, expr) in map.results().into_iter().enumerate() {
        if let Some(pos) = expr.dim_position() {
            exprs[pos] = ctx.dim_expr(idx);
        }
    }
    AffineMap::get(ctx, map.num_results(), 0, &exprs)
}

/// Stack the results of `maps` into one map. The dim count is the largest
/// one among the inputs; symbols are concatenated in order. No maps gives
/// `() -> ()`.
pub fn concat_affine_maps<'c>(ctx: &'c Context, maps: &[AffineMap<'c>]) -> AffineMap<'c> {
    let mut num_dims = 0;
    let mut num_symbols = 0;
    let mut results = Vec::with_capacity(maps.iter().map(|m| m.num_results()).sum());
    for map in maps {
        results.extend(
            map.results()
                .iter()
                .map(|e| e.shift_symbols(map.num_symbols(), num_symbols, 0)),
        );
        num_symbols += map.num_symbols();
        num_dims = num_dims.max(map.num_dims());
    }
    AffineMap::get(ctx, num_dims, num_symbols, &results)
}

/// Remove results equal to the one right before them.
pub fn remove_duplicate_exprs(map: AffineMap<'_>) -> AffineMap<'_> {
    let mut results = map.results();
    results.dedup();
    AffineMap::get(map.context(), map.num_dims(), map.num_symbols(), &results)
}

/// Re-express `map` over `rank` dims, where the dims flagged in
/// `projected_dims` are the ones `map` does not see.
///
/// ```text
/// (d0, d1) -> (d1, d0), rank 3, projected {1}
///   gives
/// (d0, d1, d2) -> (d2, d0)
/// ```
pub fn expand_dims_to_rank<'c>(map: AffineMap<'c>, rank: usize, projected_dims: &[bool]) -> AffineMap<'c> {
    let identity = AffineMap::multi_dim_identity(map.context(), rank);
    let projection = identity.drop_results_mask(projected_dims);
    map.compose(&projection)
}

/// Simplify every result of `map`.
pub fn simplify_affine_map(map: AffineMap<'_>) -> AffineMap<'_> {
    let (num_dims, num_symbols) = (map.num_dims(), map.num_symbols());
    let results: Vec<_> = map
        .results()
        .into_iter()
        .map(|e| simplify_affine_expr(e, num_dims, num_symbols))
        .collect();
    AffineMap::get(map.context(), num_dims, num_symbols, &results)
}

/// Substitute the known entries of `operands` (dims then symbols) into
/// `map` and renumber the remaining dims and symbols contiguously.
///
/// Also returns the indices of the operands that are still inputs of the
/// new map, in order.
pub fn fold_constants_into_map<'c>(map: AffineMap<'c>, operands: &[Option<i64>]) -> (AffineMap<'c>, Vec<usize>) {
    let ctx = map.context();
    let (num_dims, num_symbols) = (map.num_dims(), map.num_symbols());
    assert_eq!(operands.len(), num_dims + num_symbols, "expected one operand per map input");

    let mut remaining = Vec::new();
    let mut replace = |range: std::ops::Range<usize>, space: Space| {
        let mut next = 0;
        let replacements: Vec<_> = range
            .map(|idx| match operands[idx] {
                Some(value) => ctx.constant_expr(value),
                None => {
                    remaining.push(idx);
                    next += 1;
                    identifier(ctx, space, next - 1)
                }
            })
            .collect();
        (replacements, next)
    };
    let (dims, new_dims) = replace(0..num_dims, Space::Dims);
    let (symbols, new_symbols) = replace(num_dims..num_dims + num_symbols, Space::Symbols);
    (
        map.replace_dims_and_symbols(&dims, &symbols, new_dims, new_symbols),
        remaining,
    )
}
