//! Defines physical material properties.

use serde::{Deserialize, Serialize};

/// Represents the physical properties of a rigid body affecting contacts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Material {
    /// Coefficient of restitution (bounciness). Range [0, 1].
    /// 0 = perfectly inelastic (no bounce), 1 = perfectly elastic.
    pub restitution: f64,
    /// Coefficient of friction. Range [0, infinity).
    pub friction: f64,
}

impl Material {
    /// Creates a new material with the given restitution and friction.
    pub fn new(restitution: f64, friction: f64) -> Self {
        Material {
            restitution: restitution.clamp(0.0, 1.0),
            friction: friction.max(0.0),
        }
    }

    /// Friction for a touching pair: the geometric mean, so a frictionless
    /// surface makes the whole contact frictionless.
    pub fn mix_friction(a: &Material, b: &Material) -> f64 {
        (a.friction * b.friction).sqrt()
    }

    /// Restitution for a touching pair: the bouncier material wins.
    pub fn mix_restitution(a: &Material, b: &Material) -> f64 {
        a.restitution.max(b.restitution)
    }

    pub(crate) fn is_valid(&self) -> bool {
        self.friction.is_finite()
            && self.friction >= 0.0
            && self.restitution.is_finite()
            && (0.0..=1.0).contains(&self.restitution)
    }
}

impl Default for Material {
    /// Default material properties (moderate restitution, moderate friction).
    fn default() -> Self {
        Material {
            restitution: 0.2,
            friction: 0.5,
        }
    }
}
