//! Affine context - owns the uniquing stores
//!
//! Every [`AffineExpr`] and [`AffineMap`] is a small copyable handle into the
//! stores of the context that created it. Structurally equal descriptions are
//! stored once, so handle equality is structural equality.

use crate::affine::expr::{AffineExpr, BinaryKind};
use crate::utils::{ContextConfig, Uniquer};
use once_cell::sync::Lazy;
use std::fmt;
use std::sync::Arc;

/// Index of an interned expression node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct ExprId(u32);

/// Index of an interned map.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct MapId(u32);

/// Structural description of one expression node. Children are referenced by
/// id, so nodes form a DAG inside the arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) enum ExprNode {
    Dim(usize),
    Symbol(usize),
    Constant(i64),
    Binary {
        kind: BinaryKind,
        lhs: ExprId,
        rhs: ExprId,
    },
}

/// Structural description of a map.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) struct MapStorage {
    pub num_dims: usize,
    pub num_symbols: usize,
    pub results: Arc<[ExprId]>,
}

/// Process-wide context, for callers that do not manage their own.
static GLOBAL_CONTEXT: Lazy<Context> = Lazy::new(Context::new);

/// Owner of all interned affine expressions and maps.
///
/// A context is `Send + Sync`. Reading an interned expression or map takes no
/// lock; only interning a new one serializes, inside the store.
pub struct Context {
    config: ContextConfig,
    exprs: Uniquer<ExprNode>,
    maps: Uniquer<MapStorage>,
}

impl Default for Context {
    fn default() -> Self { Self::new() }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("num_exprs", &self.num_exprs())
            .field("num_maps", &self.num_maps())
            .field("config", &self.config)
            .finish()
    }
}

impl Context {
    /// Create a context with the default configuration.
    pub fn new() -> Self {
        Self::with_config(ContextConfig::default())
    }

    /// Create a context with the given configuration.
    pub fn with_config(config: ContextConfig) -> Self {
        Self {
            exprs: Uniquer::with_capacity(config.expr_capacity),
            maps: Uniquer::with_capacity(config.map_capacity),
            config,
        }
    }

    /// The lazily created process-wide context.
    pub fn global() -> &'static Context {
        &GLOBAL_CONTEXT
    }

    /// Settings this context was created with.
    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    /// `d<position>`
    pub fn dim_expr(&self, position: usize) -> AffineExpr<'_> {
        self.intern_expr(ExprNode::Dim(position))
    }

    /// `s<position>`
    pub fn symbol_expr(&self, position: usize) -> AffineExpr<'_> {
        self.intern_expr(ExprNode::Symbol(position))
    }

    /// The integer constant `value`.
    pub fn constant_expr(&self, value: i64) -> AffineExpr<'_> {
        self.intern_expr(ExprNode::Constant(value))
    }

    /// Intern `lhs <kind> rhs` exactly as given, without canonicalization.
    ///
    /// Most callers want the operators on [`AffineExpr`] instead, which fold
    /// constants and drop neutral elements.
    pub fn binary_expr<'c>(
        &'c self,
        kind: BinaryKind,
        lhs: AffineExpr<'c>,
        rhs: AffineExpr<'c>,
    ) -> AffineExpr<'c> {
        assert!(
            lhs.belongs_to(self) && rhs.belongs_to(self),
            "operands of a binary affine expression must come from this context"
        );
        self.intern_expr(ExprNode::Binary {
            kind,
            lhs: lhs.id(),
            rhs: rhs.id(),
        })
    }

    /// Number of distinct expressions interned so far.
    pub fn num_exprs(&self) -> usize {
        self.exprs.len()
    }

    /// Number of distinct maps interned so far.
    pub fn num_maps(&self) -> usize {
        self.maps.len()
    }

    pub(crate) fn intern_expr(&self, node: ExprNode) -> AffineExpr<'_> {
        let (raw, inserted) = self.exprs.intern(node);
        if inserted {
            log::trace!("interned affine expr #{}: {:?}", raw, node);
        }
        AffineExpr::from_raw(self, ExprId(raw))
    }

    pub(crate) fn expr_node(&self, id: ExprId) -> ExprNode {
        *self.exprs.resolve(id.0)
    }

    pub(crate) fn intern_map(&self, storage: MapStorage) -> MapId {
        let (raw, inserted) = self.maps.intern(storage);
        if inserted {
            log::trace!("interned affine map #{}", raw);
        }
        MapId(raw)
    }

    pub(crate) fn map_storage(&self, id: MapId) -> &MapStorage {
        self.maps.resolve(id.0)
    }
}
