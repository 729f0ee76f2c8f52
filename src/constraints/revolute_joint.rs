use super::{
    angular_correction, invert, point_correction, BodyPair, Constraint, LimitState, SingularMass,
    SolverData,
};
use crate::common::error::{invalid_config, Result};
use crate::math::{Mat22, Rot, Vec2};
use crate::objects::RigidBody;
use serde::{Deserialize, Serialize};

/// Forces two anchor points (one on each body) to coincide while leaving
/// relative rotation free, optionally limited and motorized.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RevoluteJointDef {
    pub local_anchor_a: Vec2,
    pub local_anchor_b: Vec2,
    /// `angle_b - angle_a` in the reference pose.
    pub reference_angle: f64,
    pub enable_limit: bool,
    pub lower_angle: f64,
    pub upper_angle: f64,
    pub enable_motor: bool,
    /// Target relative angular velocity (rad/s).
    pub motor_speed: f64,
    pub max_motor_torque: f64,
}

impl Default for RevoluteJointDef {
    fn default() -> Self {
        Self {
            local_anchor_a: Vec2::ZERO,
            local_anchor_b: Vec2::ZERO,
            reference_angle: 0.0,
            enable_limit: false,
            lower_angle: 0.0,
            upper_angle: 0.0,
            enable_motor: false,
            motor_speed: 0.0,
            max_motor_torque: 0.0,
        }
    }
}

impl RevoluteJointDef {
    /// Pins both bodies at a shared world anchor in their current pose.
    pub fn initialize(body_a: Option<&RigidBody>, body_b: &RigidBody, anchor: Vec2) -> Self {
        let angle_a = body_a.map_or(0.0, RigidBody::angle);
        Self {
            local_anchor_a: body_a.map_or(anchor, |b| b.local_point(anchor)),
            local_anchor_b: body_b.local_point(anchor),
            reference_angle: body_b.angle() - angle_a,
            ..Default::default()
        }
    }

    pub fn with_limits(mut self, lower_angle: f64, upper_angle: f64) -> Self {
        self.enable_limit = true;
        self.lower_angle = lower_angle;
        self.upper_angle = upper_angle;
        self
    }

    pub fn with_motor(mut self, motor_speed: f64, max_motor_torque: f64) -> Self {
        self.enable_motor = true;
        self.motor_speed = motor_speed;
        self.max_motor_torque = max_motor_torque;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !self.local_anchor_a.is_finite()
            || !self.local_anchor_b.is_finite()
            || !self.reference_angle.is_finite()
        {
            return Err(invalid_config("revolute joint frame must be finite"));
        }
        if !(self.lower_angle.is_finite()
            && self.upper_angle.is_finite()
            && self.lower_angle <= self.upper_angle)
        {
            return Err(invalid_config(format!(
                "revolute joint limits out of order: [{}, {}]",
                self.lower_angle, self.upper_angle
            )));
        }
        if !self.motor_speed.is_finite()
            || !(self.max_motor_torque.is_finite() && self.max_motor_torque >= 0.0)
        {
            return Err(invalid_config("revolute joint motor must be finite with non-negative torque"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RevoluteJoint {
    local_anchor_a: Vec2,
    local_anchor_b: Vec2,
    reference_angle: f64,
    enable_limit: bool,
    lower_angle: f64,
    upper_angle: f64,
    enable_motor: bool,
    motor_speed: f64,
    max_motor_torque: f64,

    pub(crate) bodies: BodyPair,
    r_a: Vec2,
    r_b: Vec2,
    k: Mat22,
    angle: f64,
    axial_mass: f64,
    limit_state: LimitState,
    impulse: Vec2,
    motor_impulse: f64,
    lower_impulse: f64,
    upper_impulse: f64,
}

impl RevoluteJoint {
    pub(crate) fn new(def: &RevoluteJointDef) -> Self {
        Self {
            local_anchor_a: def.local_anchor_a,
            local_anchor_b: def.local_anchor_b,
            reference_angle: def.reference_angle,
            enable_limit: def.enable_limit,
            lower_angle: def.lower_angle,
            upper_angle: def.upper_angle,
            enable_motor: def.enable_motor,
            motor_speed: def.motor_speed,
            max_motor_torque: def.max_motor_torque,
            bodies: BodyPair::default(),
            r_a: Vec2::ZERO,
            r_b: Vec2::ZERO,
            k: Mat22::default(),
            angle: 0.0,
            axial_mass: 0.0,
            limit_state: LimitState::Inactive,
            impulse: Vec2::ZERO,
            motor_impulse: 0.0,
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

    pub fn reference_angle(&self) -> f64 {
        self.reference_angle
    }

    /// Relative angle measured at the start of the last step.
    pub fn joint_angle(&self) -> f64 {
        self.angle
    }

    pub fn limit_state(&self) -> LimitState {
        self.limit_state
    }

    pub fn is_limit_enabled(&self) -> bool {
        self.enable_limit
    }

    pub fn limits(&self) -> (f64, f64) {
        (self.lower_angle, self.upper_angle)
    }

    pub fn is_motor_enabled(&self) -> bool {
        self.enable_motor
    }

    pub fn motor_speed(&self) -> f64 {
        self.motor_speed
    }

    pub fn max_motor_torque(&self) -> f64 {
        self.max_motor_torque
    }

    pub fn enable_limit(&mut self, flag: bool) {
        if flag != self.enable_limit {
            self.enable_limit = flag;
            self.lower_impulse = 0.0;
            self.upper_impulse = 0.0;
        }
    }

    pub fn set_limits(&mut self, lower: f64, upper: f64) -> Result<()> {
        if !(lower.is_finite() && upper.is_finite() && lower <= upper) {
            return Err(invalid_config(format!(
                "revolute joint limits out of order: [{lower}, {upper}]"
            )));
        }
        if lower != self.lower_angle || upper != self.upper_angle {
            self.lower_angle = lower;
            self.upper_angle = upper;
            self.lower_impulse = 0.0;
            self.upper_impulse = 0.0;
        }
        Ok(())
    }

    pub fn enable_motor(&mut self, flag: bool) {
        self.enable_motor = flag;
    }

    pub fn set_motor_speed(&mut self, speed: f64) -> Result<()> {
        if !speed.is_finite() {
            return Err(invalid_config("motor speed must be finite"));
        }
        self.motor_speed = speed;
        Ok(())
    }

    pub fn set_max_motor_torque(&mut self, torque: f64) -> Result<()> {
        if !(torque.is_finite() && torque >= 0.0) {
            return Err(invalid_config("max motor torque must be non-negative"));
        }
        self.max_motor_torque = torque;
        Ok(())
    }

    pub fn reaction_force(&self, inv_dt: f64) -> Vec2 {
        self.impulse * inv_dt
    }

    pub fn reaction_torque(&self, inv_dt: f64) -> f64 {
        inv_dt * (self.motor_impulse + self.lower_impulse - self.upper_impulse)
    }

    pub(crate) fn reset_impulses(&mut self) {
        self.impulse = Vec2::ZERO;
        self.motor_impulse = 0.0;
        self.lower_impulse = 0.0;
        self.upper_impulse = 0.0;
    }

    fn fixed_rotation(&self) -> bool {
        self.bodies.inv_i_a + self.bodies.inv_i_b == 0.0
    }

    fn apply_angular(&self, data: &mut SolverData, impulse: f64) {
        data.velocities[self.bodies.index_a].w -= self.bodies.inv_i_a * impulse;
        data.velocities[self.bodies.index_b].w += self.bodies.inv_i_b * impulse;
    }
}

/// Point-to-point effective mass for anchors `r_a` and `r_b`.
pub(crate) fn point_mass(b: &BodyPair, r_a: Vec2, r_b: Vec2) -> Mat22 {
    let (m_a, m_b, i_a, i_b) = (b.inv_mass_a, b.inv_mass_b, b.inv_i_a, b.inv_i_b);
    let off = -r_a.y * r_a.x * i_a - r_b.y * r_b.x * i_b;
    Mat22::from_columns(
        Vec2::new(m_a + m_b + r_a.y * r_a.y * i_a + r_b.y * r_b.y * i_b, off),
        Vec2::new(off, m_a + m_b + r_a.x * r_a.x * i_a + r_b.x * r_b.x * i_b),
    )
}

impl Constraint for RevoluteJoint {
    fn init_velocity_constraints(&mut self, data: &SolverData) -> std::result::Result<(), SingularMass> {
        self.bodies.load(data.bodies);
        let b = self.bodies;
        let pa = data.positions[b.index_a];
        let pb = data.positions[b.index_b];

        self.r_a = Rot::new(pa.a).apply(self.local_anchor_a - b.local_center_a);
        self.r_b = Rot::new(pb.a).apply(self.local_anchor_b - b.local_center_b);
        self.k = point_mass(&b, self.r_a, self.r_b);
        if self.k.determinant() == 0.0 {
            return Err(SingularMass);
        }

        self.axial_mass = invert(b.inv_i_a + b.inv_i_b).unwrap_or(0.0);
        self.angle = pb.a - pa.a - self.reference_angle;

        if self.enable_limit && !self.fixed_rotation() {
            let state = LimitState::evaluate(
                self.angle,
                self.lower_angle,
                self.upper_angle,
                data.config.angular_slop,
            );
            if state != self.limit_state {
                self.lower_impulse = 0.0;
                self.upper_impulse = 0.0;
            }
            self.limit_state = state;
        } else {
            self.limit_state = LimitState::Inactive;
            self.lower_impulse = 0.0;
            self.upper_impulse = 0.0;
        }

        if !self.enable_motor || self.fixed_rotation() {
            self.motor_impulse = 0.0;
        }
        Ok(())
    }

    fn warm_start(&mut self, data: &mut SolverData) {
        if !data.step.warm_starting {
            self.reset_impulses();
            return;
        }
        let ratio = data.step.dt_ratio;
        self.impulse *= ratio;
        self.motor_impulse *= ratio;
        self.lower_impulse *= ratio;
        self.upper_impulse *= ratio;

        let b = self.bodies;
        let axial = self.motor_impulse + self.lower_impulse - self.upper_impulse;
        let p = self.impulse;
        let va = &mut data.velocities[b.index_a];
        va.v -= p * b.inv_mass_a;
        va.w -= b.inv_i_a * (self.r_a.cross(p) + axial);
        let vb = &mut data.velocities[b.index_b];
        vb.v += p * b.inv_mass_b;
        vb.w += b.inv_i_b * (self.r_b.cross(p) + axial);
    }

    fn solve_velocity_constraints(&mut self, data: &mut SolverData) {
        let b = self.bodies;
        let fixed_rotation = self.fixed_rotation();

        if self.enable_motor && !fixed_rotation {
            let c_dot = data.velocities[b.index_b].w - data.velocities[b.index_a].w - self.motor_speed;
            let impulse = -self.axial_mass * c_dot;
            let old = self.motor_impulse;
            let max_impulse = data.step.dt * self.max_motor_torque;
            self.motor_impulse = (old + impulse).clamp(-max_impulse, max_impulse);
            self.apply_angular(data, self.motor_impulse - old);
        }

        if self.enable_limit && !fixed_rotation {
            if self.limit_state.lower_active() {
                let c = self.angle - self.lower_angle;
                let bias = c.max(0.0) * data.step.inv_dt;
                let c_dot = data.velocities[b.index_b].w - data.velocities[b.index_a].w;
                let impulse = -self.axial_mass * (c_dot + bias);
                let old = self.lower_impulse;
                self.lower_impulse = (old + impulse).max(0.0);
                self.apply_angular(data, self.lower_impulse - old);
            }
            if self.limit_state.upper_active() {
                let c = self.upper_angle - self.angle;
                let bias = c.max(0.0) * data.step.inv_dt;
                let c_dot = data.velocities[b.index_a].w - data.velocities[b.index_b].w;
                let impulse = -self.axial_mass * (c_dot + bias);
                let old = self.upper_impulse;
                self.upper_impulse = (old + impulse).max(0.0);
                self.apply_angular(data, -(self.upper_impulse - old));
            }
        }

        // Point constraint
        let va = data.velocities[b.index_a];
        let vb = data.velocities[b.index_b];
        let c_dot = vb.v + Vec2::scalar_cross(vb.w, self.r_b) - va.v - Vec2::scalar_cross(va.w, self.r_a);
        let impulse = self.k.solve(-c_dot).unwrap_or(Vec2::ZERO);
        self.impulse += impulse;

        let va = &mut data.velocities[b.index_a];
        va.v -= impulse * b.inv_mass_a;
        va.w -= b.inv_i_a * self.r_a.cross(impulse);
        let vb = &mut data.velocities[b.index_b];
        vb.v += impulse * b.inv_mass_b;
        vb.w += b.inv_i_b * self.r_b.cross(impulse);
    }

    fn solve_position_constraints(&mut self, data: &mut SolverData) -> bool {
        let b = self.bodies;
        let config = data.config;
        let mut pa = data.positions[b.index_a];
        let mut pb = data.positions[b.index_b];

        let mut angular_error = 0.0;
        if self.enable_limit && !self.fixed_rotation() {
            let angle = pb.a - pa.a - self.reference_angle;
            let slop = config.angular_slop;
            let c = if (self.upper_angle - self.lower_angle).abs() < 2.0 * slop {
                angle - self.lower_angle
            } else if angle <= self.lower_angle {
                (angle - self.lower_angle + slop).min(0.0)
            } else if angle >= self.upper_angle {
                (angle - self.upper_angle - slop).max(0.0)
            } else {
                0.0
            };
            let limit_impulse = -self.axial_mass * angular_correction(config, c);
            pa.a -= b.inv_i_a * limit_impulse;
            pb.a += b.inv_i_b * limit_impulse;
            angular_error = c.abs();
        }

        let r_a = Rot::new(pa.a).apply(self.local_anchor_a - b.local_center_a);
        let r_b = Rot::new(pb.a).apply(self.local_anchor_b - b.local_center_b);
        let c = pb.c + r_b - pa.c - r_a;
        let position_error = c.magnitude();

        let k = point_mass(&b, r_a, r_b);
        let impulse = -k.solve(point_correction(config, c)).unwrap_or(Vec2::ZERO);

        pa.c -= impulse * b.inv_mass_a;
        pa.a -= b.inv_i_a * r_a.cross(impulse);
        pb.c += impulse * b.inv_mass_b;
        pb.a += b.inv_i_b * r_b.cross(impulse);
        data.positions[b.index_a] = pa;
        data.positions[b.index_b] = pb;

        position_error <= config.linear_slop && angular_error <= config.angular_slop
    }
}
