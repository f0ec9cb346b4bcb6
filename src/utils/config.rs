//! Context configuration

use serde::{Serialize, Deserialize};

/// Configuration for an affine [`Context`](crate::affine::Context).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Number of expressions the store is pre-sized for
    pub expr_capacity: usize,

    /// Number of maps the store is pre-sized for
    pub map_capacity: usize,

    /// Check dim/symbol positions of every map on construction
    pub verify_maps: bool,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            expr_capacity: 256,
            map_capacity: 64,
            verify_maps: cfg!(debug_assertions),
        }
    }
}

impl ContextConfig {
    /// Create a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set initial expression arena capacity
    pub fn expr_capacity(mut self, capacity: usize) -> Self {
        self.expr_capacity = capacity;
        self
    }

    /// Set initial map arena capacity
    pub fn map_capacity(mut self, capacity: usize) -> Self {
        self.map_capacity = capacity;
        self
    }

    /// Enable or disable map verification
    pub fn verify_maps(mut self, verify: bool) -> Self {
        self.verify_maps = verify;
        self
    }
}
