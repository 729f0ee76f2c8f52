use super::{invert, linear_correction, BodyPair, Constraint, SingularMass, SolverData};
use crate::common::error::{invalid_config, Result};
use crate::math::{Rot, Vec2};
use crate::objects::RigidBody;
use serde::{Deserialize, Serialize};

/// Rope segments shorter than this (in multiples of the linear slop) are
/// treated as having no direction.
const MIN_SEGMENT_SLOPS: f64 = 10.0;

/// Two bodies hung from fixed ground anchors by one rope:
/// `length_a + ratio * length_b == constant`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PulleyJointDef {
    /// First ground anchor in world coordinates.
    pub ground_anchor_a: Vec2,
    /// Second ground anchor in world coordinates.
    pub ground_anchor_b: Vec2,
    pub local_anchor_a: Vec2,
    pub local_anchor_b: Vec2,
    pub length_a: f64,
    pub length_b: f64,
    /// Block and tackle ratio.
    pub ratio: f64,
}

impl Default for PulleyJointDef {
    fn default() -> Self {
        Self {
            ground_anchor_a: Vec2::new(-1.0, 1.0),
            ground_anchor_b: Vec2::new(1.0, 1.0),
            local_anchor_a: Vec2::new(-1.0, 0.0),
            local_anchor_b: Vec2::new(1.0, 0.0),
            length_a: 0.0,
            length_b: 0.0,
            ratio: 1.0,
        }
    }
}

impl PulleyJointDef {
    /// Rope lengths are taken from the current anchor positions.
    pub fn initialize(
        body_a: &RigidBody,
        body_b: &RigidBody,
        ground_anchor_a: Vec2,
        ground_anchor_b: Vec2,
        anchor_a: Vec2,
        anchor_b: Vec2,
        ratio: f64,
    ) -> Self {
        Self {
            ground_anchor_a,
            ground_anchor_b,
            local_anchor_a: body_a.local_point(anchor_a),
            local_anchor_b: body_b.local_point(anchor_b),
            length_a: anchor_a.distance(ground_anchor_a),
            length_b: anchor_b.distance(ground_anchor_b),
            ratio,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let points = [
            self.ground_anchor_a,
            self.ground_anchor_b,
            self.local_anchor_a,
            self.local_anchor_b,
        ];
        if points.iter().any(|p| !p.is_finite()) {
            return Err(invalid_config("pulley joint anchors must be finite"));
        }
        if !(self.length_a.is_finite() && self.length_a >= 0.0)
            || !(self.length_b.is_finite() && self.length_b >= 0.0)
        {
            return Err(invalid_config("pulley joint lengths must be non-negative"));
        }
        if !(self.ratio.is_finite() && self.ratio > f64::EPSILON) {
            return Err(invalid_config(format!(
                "pulley joint ratio must be positive, got {}",
                self.ratio
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PulleyJoint {
    ground_anchor_a: Vec2,
    ground_anchor_b: Vec2,
    local_anchor_a: Vec2,
    local_anchor_b: Vec2,
    length_a: f64,
    length_b: f64,
    ratio: f64,
    constant: f64,

    pub(crate) bodies: BodyPair,
    u_a: Vec2,
    u_b: Vec2,
    r_a: Vec2,
    r_b: Vec2,
    mass: f64,
    impulse: f64,
}

impl PulleyJoint {
    pub(crate) fn new(def: &PulleyJointDef) -> Self {
        Self {
            ground_anchor_a: def.ground_anchor_a,
            ground_anchor_b: def.ground_anchor_b,
            local_anchor_a: def.local_anchor_a,
            local_anchor_b: def.local_anchor_b,
            length_a: def.length_a,
            length_b: def.length_b,
            ratio: def.ratio,
            constant: def.length_a + def.ratio * def.length_b,
            bodies: BodyPair::default(),
            u_a: Vec2::ZERO,
            u_b: Vec2::ZERO,
            r_a: Vec2::ZERO,
            r_b: Vec2::ZERO,
            mass: 0.0,
            impulse: 0.0,
        }
    }

    pub fn ground_anchor_a(&self) -> Vec2 {
        self.ground_anchor_a
    }

    pub fn ground_anchor_b(&self) -> Vec2 {
        self.ground_anchor_b
    }

    pub fn local_anchor_a(&self) -> Vec2 {
        self.local_anchor_a
    }

    pub fn local_anchor_b(&self) -> Vec2 {
        self.local_anchor_b
    }

    pub fn length_a(&self) -> f64 {
        self.length_a
    }

    pub fn length_b(&self) -> f64 {
        self.length_b
    }

    pub fn ratio(&self) -> f64 {
        self.ratio
    }

    /// Total rope length, `length_a + ratio * length_b`.
    pub fn constant(&self) -> f64 {
        self.constant
    }

    pub fn reaction_force(&self, inv_dt: f64) -> Vec2 {
        self.u_b * (inv_dt * self.impulse)
    }

    pub(crate) fn reset_impulses(&mut self) {
        self.impulse = 0.0;
    }

    fn apply(&self, data: &mut SolverData, impulse: f64) {
        let b = self.bodies;
        let p_a = self.u_a * -impulse;
        let p_b = self.u_b * (-self.ratio * impulse);
        let va = &mut data.velocities[b.index_a];
        va.v += p_a * b.inv_mass_a;
        va.w += b.inv_i_a * self.r_a.cross(p_a);
        let vb = &mut data.velocities[b.index_b];
        vb.v += p_b * b.inv_mass_b;
        vb.w += b.inv_i_b * self.r_b.cross(p_b);
    }

    /// Unit rope directions, current lengths and effective mass for the
    /// given anchors.
    fn segments(&self, c_a: Vec2, c_b: Vec2, r_a: Vec2, r_b: Vec2, slop: f64) -> (Vec2, Vec2, f64, f64, f64) {
        let b = self.bodies;
        let (mut u_a, len_a) = (c_a + r_a - self.ground_anchor_a).normalize_with_length();
        let (mut u_b, len_b) = (c_b + r_b - self.ground_anchor_b).normalize_with_length();
        if len_a <= MIN_SEGMENT_SLOPS * slop {
            u_a = Vec2::ZERO;
        }
        if len_b <= MIN_SEGMENT_SLOPS * slop {
            u_b = Vec2::ZERO;
        }
        let ru_a = r_a.cross(u_a);
        let ru_b = r_b.cross(u_b);
        let m_a = b.inv_mass_a + b.inv_i_a * ru_a * ru_a;
        let m_b = b.inv_mass_b + b.inv_i_b * ru_b * ru_b;
        (u_a, u_b, len_a, len_b, m_a + self.ratio * self.ratio * m_b)
    }
}

impl Constraint for PulleyJoint {
    fn init_velocity_constraints(&mut self, data: &SolverData) -> std::result::Result<(), SingularMass> {
        self.bodies.load(data.bodies);
        let b = self.bodies;
        let pa = data.positions[b.index_a];
        let pb = data.positions[b.index_b];

        self.r_a = Rot::new(pa.a).apply(self.local_anchor_a - b.local_center_a);
        self.r_b = Rot::new(pb.a).apply(self.local_anchor_b - b.local_center_b);
        let (u_a, u_b, _, _, inv_mass) =
            self.segments(pa.c, pb.c, self.r_a, self.r_b, data.config.linear_slop);
        self.u_a = u_a;
        self.u_b = u_b;
        self.mass = invert(inv_mass).ok_or(SingularMass)?;
        Ok(())
    }

    fn warm_start(&mut self, data: &mut SolverData) {
        if data.step.warm_starting {
            self.impulse *= data.step.dt_ratio;
            self.apply(data, self.impulse);
        } else {
            self.impulse = 0.0;
        }
    }

    fn solve_velocity_constraints(&mut self, data: &mut SolverData) {
        let va = data.velocities[self.bodies.index_a];
        let vb = data.velocities[self.bodies.index_b];
        let vp_a = va.v + Vec2::scalar_cross(va.w, self.r_a);
        let vp_b = vb.v + Vec2::scalar_cross(vb.w, self.r_b);

        let c_dot = -self.u_a.dot(vp_a) - self.ratio * self.u_b.dot(vp_b);
        let impulse = -self.mass * c_dot;
        self.impulse += impulse;
        self.apply(data, impulse);
    }

    fn solve_position_constraints(&mut self, data: &mut SolverData) -> bool {
        let b = self.bodies;
        let mut pa = data.positions[b.index_a];
        let mut pb = data.positions[b.index_b];

        let r_a = Rot::new(pa.a).apply(self.local_anchor_a - b.local_center_a);
        let r_b = Rot::new(pb.a).apply(self.local_anchor_b - b.local_center_b);
        let (u_a, u_b, len_a, len_b, inv_mass) =
            self.segments(pa.c, pb.c, r_a, r_b, data.config.linear_slop);
        let mass = invert(inv_mass).unwrap_or(0.0);

        let error = self.constant - len_a - self.ratio * len_b;
        let impulse = -mass * linear_correction(data.config, error);

        let p_a = u_a * -impulse;
        let p_b = u_b * (-self.ratio * impulse);
        pa.c += p_a * b.inv_mass_a;
        pa.a += b.inv_i_a * r_a.cross(p_a);
        pb.c += p_b * b.inv_mass_b;
        pb.a += b.inv_i_b * r_b.cross(p_b);
        data.positions[b.index_a] = pa;
        data.positions[b.index_b] = pb;

        error.abs() < data.config.linear_slop
    }
}
