//! Affine expressions and maps.
//!
//! This module provides the algebra used to describe loop bounds, memory
//! access functions and iteration-space transformations:
//! - Hash-consed affine expressions owned by a [`Context`]
//! - Affine maps and their classification (identity, permutation, broadcast)
//! - Constant folding with explicit poison
//! - Composition, projection, compression and inversion
//! - Simplification and a mutable scratch map

pub mod context;
pub mod expr;
pub mod fold;
pub mod map;
pub mod mutable;
pub mod operations;
pub mod simplify;

mod proptests;

pub use context::Context;
pub use expr::{AffineExpr, BinaryKind, ExprKind, IntoAffineExpr};
pub use fold::{ExprConstantFolder, FoldOutcome, IntegerAttr, IntegerType};
pub use map::{AffineMap, PartialFold};
pub use mutable::MutableAffineMap;
pub use operations::{
    compress_dims, compress_symbols, compress_unused_dims, compress_unused_dims_in,
    compress_unused_symbols, compress_unused_symbols_in, concat_affine_maps, expand_dims_to_rank,
    fold_constants_into_map, inverse_and_broadcast_projected_permutation, inverse_permutation,
    project_dims, project_symbols, projected_map, remove_duplicate_exprs, simplify_affine_map,
    unused_dims_bit_vector, unused_symbols_bit_vector,
};
pub use simplify::simplify_affine_expr;
