use super::{invert, linear_correction, BodyPair, Constraint, SingularMass, SolverData};
use crate::common::error::{invalid_config, Result};
use crate::math::{Rot, Vec2};
use crate::objects::RigidBody;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Keeps two anchor points at a fixed distance, or between `min_length`
/// and `max_length` with an optional spring pulling towards `length`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DistanceJointDef {
    /// Anchor point on body A, in local coordinates.
    pub local_anchor_a: Vec2,
    /// Anchor point on body B, in local coordinates.
    pub local_anchor_b: Vec2,
    /// Spring rest length.
    pub length: f64,
    pub min_length: f64,
    pub max_length: f64,
    /// Spring stiffness in N/m. Zero disables the spring.
    pub stiffness: f64,
    /// Spring damping in N*s/m.
    pub damping: f64,
}

impl Default for DistanceJointDef {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl DistanceJointDef {
    /// A rigid rod of the given length between the two body origins.
    pub fn new(length: f64) -> Self {
        Self {
            local_anchor_a: Vec2::ZERO,
            local_anchor_b: Vec2::ZERO,
            length,
            min_length: length,
            max_length: length,
            stiffness: 0.0,
            damping: 0.0,
        }
    }

    /// A rigid rod between two world anchors. The current distance becomes
    /// the length. `None` for body A means the world frame.
    pub fn initialize(
        body_a: Option<&RigidBody>,
        body_b: &RigidBody,
        anchor_a: Vec2,
        anchor_b: Vec2,
    ) -> Self {
        let length = anchor_a.distance(anchor_b);
        Self {
            local_anchor_a: body_a.map_or(anchor_a, |b| b.local_point(anchor_a)),
            local_anchor_b: body_b.local_point(anchor_b),
            ..Self::new(length)
        }
    }

    pub fn with_anchors(mut self, local_anchor_a: Vec2, local_anchor_b: Vec2) -> Self {
        self.local_anchor_a = local_anchor_a;
        self.local_anchor_b = local_anchor_b;
        self
    }

    pub fn with_limits(mut self, min_length: f64, max_length: f64) -> Self {
        self.min_length = min_length;
        self.max_length = max_length;
        self
    }

    pub fn with_spring(mut self, stiffness: f64, damping: f64) -> Self {
        self.stiffness = stiffness;
        self.damping = damping;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !self.local_anchor_a.is_finite() || !self.local_anchor_b.is_finite() {
            return Err(invalid_config("distance joint anchors must be finite"));
        }
        if !(self.length.is_finite() && self.length >= 0.0) {
            return Err(invalid_config(format!(
                "distance joint length must be non-negative, got {}",
                self.length
            )));
        }
        if !(self.min_length >= 0.0 && self.max_length >= self.min_length) {
            return Err(invalid_config(format!(
                "distance joint limits out of order: [{}, {}]",
                self.min_length, self.max_length
            )));
        }
        if self.max_length == 0.0 {
            return Err(invalid_config("distance joint max_length must be positive"));
        }
        if !(self.stiffness.is_finite() && self.stiffness >= 0.0)
            || !(self.damping.is_finite() && self.damping >= 0.0)
        {
            return Err(invalid_config("distance joint spring must be non-negative"));
        }
        if self.stiffness > 0.0 && self.length == 0.0 {
            return Err(invalid_config("a sprung distance joint needs a positive length"));
        }
        if self.stiffness > 0.0 && self.length == 0.0 {
            return Err(invalid_config(
                "zero-length distance joint cannot have a stiff spring",
            ));
        }
        Ok(())
    }
}

/// Spring stiffness and damping for an oscillation frequency (Hz) and
/// damping ratio, using the reduced mass of the pair. Static bodies pass
/// a mass of zero.
pub fn linear_stiffness(frequency: f64, damping_ratio: f64, mass_a: f64, mass_b: f64) -> (f64, f64) {
    let mass = if mass_a > 0.0 && mass_b > 0.0 {
        mass_a * mass_b / (mass_a + mass_b)
    } else if mass_a > 0.0 {
        mass_a
    } else {
        mass_b
    };
    let omega = 2.0 * PI * frequency;
    let stiffness = mass * omega * omega;
    let damping = 2.0 * mass * damping_ratio * omega;
    (stiffness, damping)
}

#[derive(Debug, Clone, PartialEq)]
pub struct DistanceJoint {
    local_anchor_a: Vec2,
    local_anchor_b: Vec2,
    length: f64,
    min_length: f64,
    max_length: f64,
    stiffness: f64,
    damping: f64,

    pub(crate) bodies: BodyPair,
    u: Vec2,
    r_a: Vec2,
    r_b: Vec2,
    current_length: f64,
    mass: f64,
    soft_mass: f64,
    gamma: f64,
    bias: f64,
    impulse: f64,
    lower_impulse: f64,
    upper_impulse: f64,
}

impl DistanceJoint {
    pub(crate) fn new(def: &DistanceJointDef) -> Self {
        Self {
            local_anchor_a: def.local_anchor_a,
            local_anchor_b: def.local_anchor_b,
            length: def.length,
            min_length: def.min_length,
            max_length: def.max_length,
            stiffness: def.stiffness,
            damping: def.damping,
            bodies: BodyPair::default(),
            u: Vec2::ZERO,
            r_a: Vec2::ZERO,
            r_b: Vec2::ZERO,
            current_length: def.length,
            mass: 0.0,
            soft_mass: 0.0,
            gamma: 0.0,
            bias: 0.0,
            impulse: 0.0,
            lower_impulse: 0.0,
            upper_impulse: 0.0,
        }
    }

    pub fn local_anchor_a(&self) -> Vec2 {
        self.local_anchor_a
    }

    pub fn local_anchor_b(&self) -> Vec2 {
        self.local_anchor_b
    }

    pub fn length(&self) -> f64 {
        self.length
    }

    pub fn min_length(&self) -> f64 {
        self.min_length
    }

    pub fn max_length(&self) -> f64 {
        self.max_length
    }

    /// Anchor separation measured at the start of the last step.
    pub fn current_length(&self) -> f64 {
        self.current_length
    }

    pub fn stiffness(&self) -> f64 {
        self.stiffness
    }

    pub fn damping(&self) -> f64 {
        self.damping
    }

    fn is_rigid(&self) -> bool {
        self.min_length == self.max_length
    }

    /// Sets the rest length. A rigid joint keeps its limits equal to it.
    ///
    /// Zero is accepted only for a limit-only rope, as in the definition.
    pub fn set_length(&mut self, length: f64) -> Result<()> {
        if !(length.is_finite() && length >= 0.0) {
            return Err(invalid_config(format!(
                "distance joint length must be non-negative, got {length}"
            )));
        }
        if length == 0.0 && (self.is_rigid() || self.stiffness > 0.0) {
            return Err(invalid_config(
                "a rigid or sprung distance joint needs a positive length",
            ));
        }
        if self.is_rigid() {
            self.min_length = length;
            self.max_length = length;
        }
        self.length = length;
        self.impulse = 0.0;
        Ok(())
    }

    pub fn set_limits(&mut self, min_length: f64, max_length: f64) -> Result<()> {
        if !(min_length >= 0.0 && max_length >= min_length && max_length > 0.0) {
            return Err(invalid_config(format!(
                "distance joint limits out of order: [{min_length}, {max_length}]"
            )));
        }
        if min_length != self.min_length || max_length != self.max_length {
            self.min_length = min_length;
            self.max_length = max_length;
            self.lower_impulse = 0.0;
            self.upper_impulse = 0.0;
        }
        Ok(())
    }

    pub fn set_spring(&mut self, stiffness: f64, damping: f64) -> Result<()> {
        if !(stiffness.is_finite() && stiffness >= 0.0 && damping.is_finite() && damping >= 0.0) {
            return Err(invalid_config("distance joint spring must be non-negative"));
        }
        if stiffness > 0.0 && self.length == 0.0 {
            return Err(invalid_config("a sprung distance joint needs a positive length"));
        }
        self.stiffness = stiffness;
        self.damping = damping;
        Ok(())
    }

    pub fn reaction_force(&self, inv_dt: f64) -> Vec2 {
        self.u * (inv_dt * (self.impulse + self.lower_impulse - self.upper_impulse))
    }

    pub(crate) fn reset_impulses(&mut self) {
        self.impulse = 0.0;
        self.lower_impulse = 0.0;
        self.upper_impulse = 0.0;
    }

    fn apply(&self, data: &mut SolverData, p: Vec2) {
        let b = &self.bodies;
        let va = &mut data.velocities[b.index_a];
        va.v -= p * b.inv_mass_a;
        va.w -= b.inv_i_a * self.r_a.cross(p);
        let vb = &mut data.velocities[b.index_b];
        vb.v += p * b.inv_mass_b;
        vb.w += b.inv_i_b * self.r_b.cross(p);
    }

    /// Relative velocity of the anchors along the axis.
    fn axial_speed(&self, data: &SolverData) -> f64 {
        let va = data.velocities[self.bodies.index_a];
        let vb = data.velocities[self.bodies.index_b];
        let vp_a = va.v + Vec2::scalar_cross(va.w, self.r_a);
        let vp_b = vb.v + Vec2::scalar_cross(vb.w, self.r_b);
        self.u.dot(vp_b - vp_a)
    }
}

impl Constraint for DistanceJoint {
    fn init_velocity_constraints(&mut self, data: &SolverData) -> std::result::Result<(), SingularMass> {
        self.bodies.load(data.bodies);
        let b = self.bodies;
        let pa = data.positions[b.index_a];
        let pb = data.positions[b.index_b];

        self.r_a = Rot::new(pa.a).apply(self.local_anchor_a - b.local_center_a);
        self.r_b = Rot::new(pb.a).apply(self.local_anchor_b - b.local_center_b);
        let d = pb.c + self.r_b - pa.c - self.r_a;

        // Coincident anchors have no defined axis.
        self.current_length = d.magnitude();
        if self.current_length > data.config.linear_slop {
            self.u = d * (1.0 / self.current_length);
        } else {
            self.u = Vec2::ZERO;
            self.mass = 0.0;
            self.soft_mass = 0.0;
            self.reset_impulses();
            return Ok(());
        }

        let cr_au = self.r_a.cross(self.u);
        let cr_bu = self.r_b.cross(self.u);
        let mut inv_mass =
            b.inv_mass_a + b.inv_i_a * cr_au * cr_au + b.inv_mass_b + b.inv_i_b * cr_bu * cr_bu;
        self.mass = invert(inv_mass).ok_or(SingularMass)?;

        if self.stiffness > 0.0 && self.min_length < self.max_length {
            let c = self.current_length - self.length;
            let h = data.step.dt;
            let gamma = h * (self.damping + h * self.stiffness);
            self.gamma = if gamma != 0.0 { 1.0 / gamma } else { 0.0 };
            self.bias = c * h * self.stiffness * self.gamma;
            inv_mass += self.gamma;
            self.soft_mass = invert(inv_mass).unwrap_or(0.0);
        } else {
            self.gamma = 0.0;
            self.bias = 0.0;
            self.soft_mass = self.mass;
        }
        Ok(())
    }

    fn warm_start(&mut self, data: &mut SolverData) {
        if data.step.warm_starting {
            let ratio = data.step.dt_ratio;
            self.impulse *= ratio;
            self.lower_impulse *= ratio;
            self.upper_impulse *= ratio;
            let p = self.u * (self.impulse + self.lower_impulse - self.upper_impulse);
            self.apply(data, p);
        } else {
            self.reset_impulses();
        }
    }

    fn solve_velocity_constraints(&mut self, data: &mut SolverData) {
        if self.u == Vec2::ZERO {
            return;
        }

        if self.is_rigid() {
            let c_dot = self.axial_speed(data);
            let impulse = -self.mass * c_dot;
            self.impulse += impulse;
            self.apply(data, self.u * impulse);
            return;
        }

        if self.stiffness > 0.0 {
            let c_dot = self.axial_speed(data);
            let impulse = -self.soft_mass * (c_dot + self.bias + self.gamma * self.impulse);
            self.impulse += impulse;
            self.apply(data, self.u * impulse);
        }

        // Lower limit
        {
            let c = self.current_length - self.min_length;
            let bias = c.max(0.0) * data.step.inv_dt;
            let c_dot = self.axial_speed(data);
            let impulse = -self.mass * (c_dot + bias);
            let old = self.lower_impulse;
            self.lower_impulse = (old + impulse).max(0.0);
            let impulse = self.lower_impulse - old;
            self.apply(data, self.u * impulse);
        }

        // Upper limit
        {
            let c = self.max_length - self.current_length;
            let bias = c.max(0.0) * data.step.inv_dt;
            let c_dot = -self.axial_speed(data);
            let impulse = -self.mass * (c_dot + bias);
            let old = self.upper_impulse;
            self.upper_impulse = (old + impulse).max(0.0);
            let impulse = self.upper_impulse - old;
            self.apply(data, self.u * -impulse);
        }
    }

    fn solve_position_constraints(&mut self, data: &mut SolverData) -> bool {
        let b = self.bodies;
        let mut pa = data.positions[b.index_a];
        let mut pb = data.positions[b.index_b];

        let r_a = Rot::new(pa.a).apply(self.local_anchor_a - b.local_center_a);
        let r_b = Rot::new(pb.a).apply(self.local_anchor_b - b.local_center_b);
        let (u, length) = (pb.c + r_b - pa.c - r_a).normalize_with_length();
        if u == Vec2::ZERO {
            return true;
        }

        let error = if self.is_rigid() {
            length - self.min_length
        } else if length < self.min_length {
            length - self.min_length
        } else if length > self.max_length {
            length - self.max_length
        } else {
            return true;
        };

        let impulse = -self.mass * linear_correction(data.config, error);
        let p = u * impulse;

        pa.c -= p * b.inv_mass_a;
        pa.a -= b.inv_i_a * r_a.cross(p);
        pb.c += p * b.inv_mass_b;
        pb.a += b.inv_i_b * r_b.cross(p);
        data.positions[b.index_a] = pa;
        data.positions[b.index_b] = pb;

        error.abs() < data.config.linear_slop
    }
}
