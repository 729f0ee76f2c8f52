//! Velocity-level constraints solved by sequential impulses.
//!
//! Every joint kind and every contact implements [`Constraint`]. The solver
//! works on island-local copies of body state ([`Position`], [`Velocity`]),
//! addressed by index, so a constraint never holds a reference to a body.

use crate::common::SolverConfig;
use crate::math::Vec2;
use crate::objects::BodyHandle;
use serde::{Deserialize, Serialize};

pub mod contact_constraint;
pub mod distance_joint;
pub mod gear_joint;
pub mod joint;
pub mod mouse_joint;
pub mod prismatic_joint;
pub mod pulley_joint;
pub mod revolute_joint;
pub mod weld_joint;

pub use contact_constraint::ContactConstraint;
pub use distance_joint::{linear_stiffness, DistanceJoint, DistanceJointDef};
pub use gear_joint::{GearJoint, GearJointDef};
pub use joint::{Joint, JointDef, JointHandle, JointKind, JointKindDef, JointType};
pub use mouse_joint::{MouseJoint, MouseJointDef};
pub use prismatic_joint::{PrismaticJoint, PrismaticJointDef};
pub use pulley_joint::{PulleyJoint, PulleyJointDef};
pub use revolute_joint::{RevoluteJoint, RevoluteJointDef};
pub use weld_joint::{WeldJoint, WeldJointDef};

/// The effective mass of a constraint could not be inverted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SingularMass;

/// A constraint driven by the sequential impulse solver.
pub trait Constraint {
    /// Computes effective masses and bias terms from the current body state.
    /// Fails when the effective mass is singular; the constraint is then
    /// skipped for the rest of the step.
    fn init_velocity_constraints(&mut self, data: &SolverData) -> Result<(), SingularMass>;

    /// Reapplies the previous step's accumulated impulses, or clears them
    /// when warm starting is off.
    fn warm_start(&mut self, data: &mut SolverData);

    /// One sequential impulse pass.
    fn solve_velocity_constraints(&mut self, data: &mut SolverData);

    /// One position correction pass. Returns `true` when the remaining
    /// error is within tolerance.
    fn solve_position_constraints(&mut self, data: &mut SolverData) -> bool;
}

/// Per-step timing passed to constraints.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeStep {
    pub dt: f64,
    pub inv_dt: f64,
    /// `dt / previous dt`, used to rescale warm starting impulses.
    pub dt_ratio: f64,
    pub warm_starting: bool,
}

impl TimeStep {
    pub fn new(dt: f64, previous_dt: f64, warm_starting: bool) -> Self {
        let inv_dt = if dt > 0.0 { 1.0 / dt } else { 0.0 };
        let dt_ratio = if previous_dt > 0.0 { dt / previous_dt } else { 0.0 };
        Self {
            dt,
            inv_dt,
            dt_ratio,
            warm_starting,
        }
    }
}

/// Center of mass position and angle of a body inside the solver.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Position {
    pub c: Vec2,
    pub a: f64,
}

impl Position {
    pub fn is_finite(&self) -> bool {
        self.c.is_finite() && self.a.is_finite()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Velocity {
    pub v: Vec2,
    pub w: f64,
}

impl Velocity {
    pub fn is_finite(&self) -> bool {
        self.v.is_finite() && self.w.is_finite()
    }
}

/// Constant per-step body data seen by the solver.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolverBody {
    /// `None` for the fixed world frame.
    pub handle: Option<BodyHandle>,
    pub inv_mass: f64,
    pub inv_inertia: f64,
    pub local_center: Vec2,
    pub force: Vec2,
    pub torque: f64,
    pub gravity_scale: f64,
    pub linear_damping: f64,
    pub angular_damping: f64,
}

impl SolverBody {
    /// The fixed world frame. Every island stores it at index 0.
    pub const GROUND: SolverBody = SolverBody {
        handle: None,
        inv_mass: 0.0,
        inv_inertia: 0.0,
        local_center: Vec2::ZERO,
        force: Vec2::ZERO,
        torque: 0.0,
        gravity_scale: 0.0,
        linear_damping: 0.0,
        angular_damping: 0.0,
    };

    /// Infinite mass and inertia.
    pub fn is_immovable(&self) -> bool {
        self.inv_mass == 0.0 && self.inv_inertia == 0.0
    }
}

pub struct SolverData<'a> {
    pub step: TimeStep,
    pub config: &'a SolverConfig,
    pub bodies: &'a [SolverBody],
    pub positions: &'a mut [Position],
    pub velocities: &'a mut [Velocity],
}

/// Solver-local indices and mass data for a two-body constraint, refreshed
/// in `init_velocity_constraints`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub(crate) struct BodyPair {
    pub index_a: usize,
    pub index_b: usize,
    pub local_center_a: Vec2,
    pub local_center_b: Vec2,
    pub inv_mass_a: f64,
    pub inv_mass_b: f64,
    pub inv_i_a: f64,
    pub inv_i_b: f64,
}

impl BodyPair {
    pub fn bind(&mut self, index_a: usize, index_b: usize) {
        self.index_a = index_a;
        self.index_b = index_b;
    }

    pub fn load(&mut self, bodies: &[SolverBody]) {
        let a = &bodies[self.index_a];
        let b = &bodies[self.index_b];
        self.local_center_a = a.local_center;
        self.local_center_b = b.local_center;
        self.inv_mass_a = a.inv_mass;
        self.inv_mass_b = b.inv_mass;
        self.inv_i_a = a.inv_inertia;
        self.inv_i_b = b.inv_inertia;
    }
}

/// Which side of a joint limit is engaged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LimitState {
    #[default]
    Inactive,
    AtLower,
    AtUpper,
    /// Lower and upper limits coincide; the limit acts as a bilateral lock.
    Equal,
}

impl LimitState {
    pub fn evaluate(value: f64, lower: f64, upper: f64, slop: f64) -> Self {
        if (upper - lower).abs() < 2.0 * slop {
            LimitState::Equal
        } else if value <= lower {
            LimitState::AtLower
        } else if value >= upper {
            LimitState::AtUpper
        } else {
            LimitState::Inactive
        }
    }

    pub fn lower_active(self) -> bool {
        matches!(self, LimitState::AtLower | LimitState::Equal)
    }

    pub fn upper_active(self) -> bool {
        matches!(self, LimitState::AtUpper | LimitState::Equal)
    }
}

/// Baumgarte-scaled linear correction, clamped per iteration.
pub(crate) fn linear_correction(config: &SolverConfig, error: f64) -> f64 {
    (config.baumgarte * error).clamp(-config.max_linear_correction, config.max_linear_correction)
}

pub(crate) fn angular_correction(config: &SolverConfig, error: f64) -> f64 {
    (config.baumgarte * error)
        .clamp(-config.max_angular_correction, config.max_angular_correction)
}

/// Baumgarte-scaled point correction, clamped in length.
pub(crate) fn point_correction(config: &SolverConfig, error: Vec2) -> Vec2 {
    let scaled = error * config.baumgarte;
    let length = scaled.magnitude();
    if length > config.max_linear_correction {
        scaled * (config.max_linear_correction / length)
    } else {
        scaled
    }
}

/// `1 / k`, or `None` when `k` is zero or not finite.
pub(crate) fn invert(k: f64) -> Option<f64> {
    if k > 0.0 && k.is_finite() {
        Some(1.0 / k)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_limit_state_evaluation() {
        assert_eq!(LimitState::evaluate(0.0, -1.0, 1.0, 0.01), LimitState::Inactive);
        assert_eq!(LimitState::evaluate(-1.5, -1.0, 1.0, 0.01), LimitState::AtLower);
        assert_eq!(LimitState::evaluate(1.0, -1.0, 1.0, 0.01), LimitState::AtUpper);
        assert_eq!(LimitState::evaluate(3.0, 0.5, 0.5, 0.01), LimitState::Equal);
        assert!(LimitState::Equal.lower_active() && LimitState::Equal.upper_active());
        assert!(!LimitState::AtLower.upper_active());
    }

    #[test]
    fn test_corrections_are_scaled_and_clamped() {
        let config = SolverConfig::default();
        assert_abs_diff_eq!(linear_correction(&config, 0.1), 0.02, epsilon = 1e-12);
        assert_abs_diff_eq!(linear_correction(&config, 10.0), 0.2, epsilon = 1e-12);
        assert_abs_diff_eq!(linear_correction(&config, -10.0), -0.2, epsilon = 1e-12);

        let big = point_correction(&config, Vec2::new(30.0, 40.0));
        assert_abs_diff_eq!(big.magnitude(), 0.2, epsilon = 1e-12);
        let small = point_correction(&config, Vec2::new(0.1, 0.0));
        assert_abs_diff_eq!(small.x, 0.02, epsilon = 1e-12);

        let angle = angular_correction(&config, 10.0);
        assert_abs_diff_eq!(angle, config.max_angular_correction, epsilon = 1e-12);
    }

    #[test]
    fn test_time_step_ratio() {
        let step = TimeStep::new(0.01, 0.02, true);
        assert_abs_diff_eq!(step.dt_ratio, 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(step.inv_dt, 100.0, epsilon = 1e-9);
        assert_eq!(TimeStep::new(0.01, 0.0, true).dt_ratio, 0.0);
    }

    #[test]
    fn test_invert() {
        assert_eq!(invert(4.0), Some(0.25));
        assert_eq!(invert(0.0), None);
        assert_eq!(invert(f64::INFINITY), None);
    }
}
