//! # polyaffine - Affine Algebra for Polyhedral Compilation
//!
//! The affine expression and affine map layer of a polyhedral compiler:
//! - Hash-consed affine expressions over dims, symbols and constants
//! - Affine maps with identity / permutation / broadcast classification
//! - Constant folding with poison for undefined division and modulo
//! - Composition, substitution, projection, compression and inversion
//!
//! ## Architecture
//!
//! ```text
//! Context (uniquing stores) → AffineExpr → AffineMap → operations / folding
//! ```
//!
//! ## Example
//!
//! ```rust
//! use polyaffine::prelude::*;
//!
//! let ctx = Context::new();
//! let (d0, d1) = (ctx.dim_expr(0), ctx.dim_expr(1));
//!
//! // Tile the first loop by 32.
//! let tiled = AffineMap::get(&ctx, 2, 0, &[d0.floor_div(32), d0 % 32, d1]);
//! assert_eq!(tiled.compose_values(&[70, 3]), vec![2, 6, 3]);
//!
//! let swap = AffineMap::permutation_map(&ctx, &[1, 0]);
//! assert_eq!(inverse_permutation(swap), Some(swap));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod affine;
pub mod utils;

// Re-export commonly used types
pub mod prelude {
    //! Convenient re-exports of commonly used types and functions.

    pub use crate::affine::*;
    pub use crate::utils::errors::*;
    pub use crate::utils::ContextConfig;
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
