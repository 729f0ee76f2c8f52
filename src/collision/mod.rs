//! Contact input produced by an external collision pipeline.

pub mod manifold;

pub use manifold::{ContactManifold, ManifoldPoint, MAX_MANIFOLD_POINTS};
