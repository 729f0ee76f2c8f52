//! World and solver configuration

use super::error::{invalid_config, Result};
use crate::math::Vec2;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Tuning knobs for the sequential impulse solver.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SolverConfig {
    /// Sequential impulse passes over every constraint per step
    pub velocity_iterations: usize,

    /// Position correction passes per step
    pub position_iterations: usize,

    /// Fraction of positional error removed per position iteration
    pub baumgarte: f64,

    /// Linear tolerance; errors below this are left alone (m)
    pub linear_slop: f64,

    /// Angular tolerance (rad)
    pub angular_slop: f64,

    /// Largest positional correction applied by one iteration (m)
    pub max_linear_correction: f64,

    /// Largest angular correction applied by one iteration (rad)
    pub max_angular_correction: f64,

    /// Largest distance a body may travel in one step (m)
    pub max_translation: f64,

    /// Largest rotation a body may perform in one step (rad)
    pub max_rotation: f64,

    /// Approach speed below which contacts are treated as inelastic (m/s)
    pub restitution_threshold: f64,

    /// Reapply the previous step's impulses before iterating
    pub warm_starting: bool,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            velocity_iterations: 8,
            position_iterations: 3,
            baumgarte: 0.2,
            linear_slop: 0.005,
            angular_slop: 2.0 / 180.0 * PI,
            max_linear_correction: 0.2,
            max_angular_correction: 8.0 / 180.0 * PI,
            max_translation: 2.0,
            max_rotation: 0.5 * PI,
            restitution_threshold: 1.0,
            warm_starting: true,
        }
    }
}

impl SolverConfig {
    pub fn validate(&self) -> Result<()> {
        if self.velocity_iterations == 0 {
            return Err(invalid_config("velocity_iterations must be at least 1"));
        }
        if self.position_iterations == 0 {
            return Err(invalid_config("position_iterations must be at least 1"));
        }
        let positive = [
            ("linear_slop", self.linear_slop),
            ("angular_slop", self.angular_slop),
            ("max_linear_correction", self.max_linear_correction),
            ("max_angular_correction", self.max_angular_correction),
            ("max_translation", self.max_translation),
            ("max_rotation", self.max_rotation),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(invalid_config(format!("{name} must be positive, got {value}")));
            }
        }
        if !(self.baumgarte.is_finite() && self.baumgarte > 0.0 && self.baumgarte <= 1.0) {
            return Err(invalid_config(format!(
                "baumgarte must be in (0, 1], got {}",
                self.baumgarte
            )));
        }
        if !(self.restitution_threshold.is_finite() && self.restitution_threshold >= 0.0) {
            return Err(invalid_config("restitution_threshold must be non-negative"));
        }
        Ok(())
    }
}

/// Physics world configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WorldConfig {
    /// Gravity vector (default: -10 in Y)
    pub gravity: Vec2,

    /// Fixed timestep used by [`PhysicsWorld::advance`](crate::world::PhysicsWorld::advance)
    pub timestep: f64,

    /// Maximum number of fixed steps taken by one `advance` call
    pub max_substeps: u32,

    pub solver: SolverConfig,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            gravity: Vec2::new(0.0, -10.0),
            timestep: 1.0 / 60.0,
            max_substeps: 8,
            solver: SolverConfig::default(),
        }
    }
}

impl WorldConfig {
    /// Create a configuration for high-precision simulation
    pub fn high_precision() -> Self {
        Self {
            solver: SolverConfig {
                velocity_iterations: 16,
                position_iterations: 6,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Create a configuration for fast simulation (lower quality)
    pub fn fast() -> Self {
        Self {
            solver: SolverConfig {
                velocity_iterations: 4,
                position_iterations: 1,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Set gravity
    pub fn with_gravity(mut self, gravity: Vec2) -> Self {
        self.gravity = gravity;
        self
    }

    /// Set timestep
    pub fn with_timestep(mut self, timestep: f64) -> Self {
        self.timestep = timestep;
        self
    }

    /// Set both iteration counts
    pub fn with_iterations(mut self, velocity: usize, position: usize) -> Self {
        self.solver.velocity_iterations = velocity;
        self.solver.position_iterations = position;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !self.gravity.is_finite() {
            return Err(invalid_config("gravity must be finite"));
        }
        if !(self.timestep.is_finite() && self.timestep > 0.0) {
            return Err(invalid_config(format!(
                "timestep must be positive, got {}",
                self.timestep
            )));
        }
        if self.max_substeps == 0 {
            return Err(invalid_config("max_substeps must be at least 1"));
        }
        self.solver.validate()
    }
}
