//! Property-based tests for the affine algebra.

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use crate::affine::fold::{ceil_div, floor_div, index_operands, modulo, FoldOutcome};
    use crate::affine::operations::inverse_permutation;
    use crate::affine::simplify::simplify_affine_expr;
    use crate::affine::{AffineExpr, AffineMap, Context};

    const NUM_DIMS: usize = 3;
    const NUM_SYMBOLS: usize = 2;

    /// Context-free description of an expression, built into a context on
    /// demand.
    #[derive(Debug, Clone)]
    enum Recipe {
        Dim(usize),
        Symbol(usize),
        Const(i64),
        Add(Box<Recipe>, Box<Recipe>),
        Scale(Box<Recipe>, i64),
        FloorDiv(Box<Recipe>, i64),
        CeilDiv(Box<Recipe>, i64),
        Mod(Box<Recipe>, i64),
    }

    fn recipe() -> impl Strategy<Value = Recipe> {
        let leaf = prop_oneof![
            (0..NUM_DIMS).prop_map(Recipe::Dim),
            (0..NUM_SYMBOLS).prop_map(Recipe::Symbol),
            (-20i64..20).prop_map(Recipe::Const),
        ];
        leaf.prop_recursive(4, 24, 2, |inner| {
            prop_oneof![
                (inner.clone(), inner.clone()).prop_map(|(a, b)| Recipe::Add(Box::new(a), Box::new(b))),
                (inner.clone(), -5i64..5).prop_map(|(a, c)| Recipe::Scale(Box::new(a), c)),
                (inner.clone(), 1i64..8).prop_map(|(a, c)| Recipe::FloorDiv(Box::new(a), c)),
                (inner.clone(), 1i64..8).prop_map(|(a, c)| Recipe::CeilDiv(Box::new(a), c)),
                (inner, 1i64..8).prop_map(|(a, c)| Recipe::Mod(Box::new(a), c)),
            ]
        })
    }

    fn point() -> impl Strategy<Value = Vec<i64>> {
        prop::collection::vec(-50i64..50, NUM_DIMS + NUM_SYMBOLS)
    }

    fn build<'c>(ctx: &'c Context, recipe: &Recipe) -> AffineExpr<'c> {
        match recipe {
            Recipe::Dim(pos) => ctx.dim_expr(*pos),
            Recipe::Symbol(pos) => ctx.symbol_expr(*pos),
            Recipe::Const(value) => ctx.constant_expr(*value),
            Recipe::Add(a, b) => build(ctx, a) + build(ctx, b),
            Recipe::Scale(a, c) => build(ctx, a) * *c,
            Recipe::FloorDiv(a, c) => build(ctx, a).floor_div(*c),
            Recipe::CeilDiv(a, c) => build(ctx, a).ceil_div(*c),
            Recipe::Mod(a, c) => build(ctx, a) % *c,
        }
    }

    fn reference_floor(a: i64, b: i64) -> i64 {
        let q = a / b;
        if a % b != 0 && ((a < 0) != (b < 0)) { q - 1 } else { q }
    }

    fn reference_ceil(a: i64, b: i64) -> i64 {
        let q = a / b;
        if a % b != 0 && ((a < 0) == (b < 0)) { q + 1 } else { q }
    }

    fn evaluate(recipe: &Recipe, point: &[i64]) -> i64 {
        match recipe {
            Recipe::Dim(pos) => point[*pos],
            Recipe::Symbol(pos) => point[NUM_DIMS + *pos],
            Recipe::Const(value) => *value,
            Recipe::Add(a, b) => evaluate(a, point) + evaluate(b, point),
            Recipe::Scale(a, c) => evaluate(a, point) * c,
            Recipe::FloorDiv(a, c) => reference_floor(evaluate(a, point), *c),
            Recipe::CeilDiv(a, c) => reference_ceil(evaluate(a, point), *c),
            Recipe::Mod(a, c) => evaluate(a, point).rem_euclid(*c),
        }
    }

    fn fold_at(expr: AffineExpr<'_>, point: &[i64]) -> FoldOutcome {
        let operands: Vec<_> = point.iter().map(|&v| Some(v)).collect();
        expr.constant_fold(NUM_DIMS, &index_operands(&operands))
    }

    fn non_zero() -> impl Strategy<Value = i64> {
        prop_oneof![(-1000i64..=-1i64), (1i64..=1000i64)]
    }

    proptest! {
        // Integer rounding helpers

        #[test]
        fn floor_and_ceil_match_reference(a in -1000i64..1000, b in non_zero()) {
            prop_assert_eq!(floor_div(a, b), Some(reference_floor(a, b)));
            prop_assert_eq!(ceil_div(a, b), Some(reference_ceil(a, b)));
        }

        #[test]
        fn modulo_is_non_negative(a in -1000i64..1000, b in 1i64..1000) {
            let m = modulo(a, b).unwrap();
            prop_assert!((0..b).contains(&m));
            prop_assert_eq!(reference_floor(a, b) * b + m, a);
        }

        // Folding

        #[test]
        fn fold_matches_evaluation(r in recipe(), p in point()) {
            let ctx = Context::new();
            let expr = build(&ctx, &r);
            prop_assert_eq!(fold_at(expr, &p), FoldOutcome::Constant(evaluate(&r, &p)));
        }

        #[test]
        fn fold_with_unknown_operand_never_poisons(r in recipe()) {
            let ctx = Context::new();
            let expr = build(&ctx, &r);
            let operands = vec![None; NUM_DIMS + NUM_SYMBOLS];
            prop_assert!(!expr.constant_fold(NUM_DIMS, &operands).is_poison());
        }

        // Simplification

        #[test]
        fn simplify_is_idempotent(r in recipe()) {
            let ctx = Context::new();
            let once = simplify_affine_expr(build(&ctx, &r), NUM_DIMS, NUM_SYMBOLS);
            prop_assert_eq!(simplify_affine_expr(once, NUM_DIMS, NUM_SYMBOLS), once);
        }

        #[test]
        fn simplify_preserves_value(r in recipe(), p in point()) {
            let ctx = Context::new();
            let expr = build(&ctx, &r);
            let simplified = simplify_affine_expr(expr, NUM_DIMS, NUM_SYMBOLS);
            prop_assert_eq!(fold_at(simplified, &p), fold_at(expr, &p));
        }

        // Composition

        #[test]
        fn compose_with_identity(a in recipe(), b in recipe()) {
            let ctx = Context::new();
            let map = AffineMap::get(&ctx, NUM_DIMS, NUM_SYMBOLS, &[build(&ctx, &a), build(&ctx, &b)]);
            let inner = AffineMap::multi_dim_identity(&ctx, NUM_DIMS);
            let outer = AffineMap::multi_dim_identity(&ctx, map.num_results());
            prop_assert_eq!(map.compose(&inner), map);
            prop_assert_eq!(outer.compose(&map), map);
        }

        #[test]
        fn compose_values_matches_evaluation(a in recipe(), p in prop::collection::vec(-50i64..50, NUM_DIMS)) {
            let ctx = Context::new();
            // Bind the symbols to zero so the map is symbol-free.
            let zeros = vec![ctx.constant_expr(0); NUM_SYMBOLS];
            let expr = build(&ctx, &a).replace_symbols(&zeros);
            let map = AffineMap::get(&ctx, NUM_DIMS, 0, &[expr]);
            let mut full = p.clone();
            full.extend(std::iter::repeat(0).take(NUM_SYMBOLS));
            prop_assert_eq!(map.compose_values(&p), vec![evaluate(&a, &full)]);
        }

        // Inversion

        #[test]
        fn inverse_permutation_is_an_involution(
            perm in (1usize..7).prop_flat_map(|n| Just((0..n).collect::<Vec<usize>>()).prop_shuffle())
        ) {
            let ctx = Context::new();
            let map = AffineMap::permutation_map(&ctx, &perm);
            let inverse = inverse_permutation(map).unwrap();
            prop_assert!(inverse.is_permutation());
            prop_assert_eq!(inverse_permutation(inverse), Some(map));
            prop_assert!(map.compose(&inverse).is_identity());
        }
    }
}
