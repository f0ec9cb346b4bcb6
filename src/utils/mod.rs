//! Utility modules for the affine algebra.
//!
//! This module contains common utilities used throughout the codebase:
//! - Error types
//! - Structural interning
//! - Context configuration

pub mod errors;
pub mod intern;
pub mod config;

// Re-exports
pub use errors::*;
pub use intern::Uniquer;
pub use config::ContextConfig;
