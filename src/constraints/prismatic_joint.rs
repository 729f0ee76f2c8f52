use super::{
    angular_correction, invert, linear_correction, BodyPair, Constraint, LimitState, SingularMass,
    SolverData,
};
use crate::common::error::{invalid_config, Result};
use crate::math::{Mat22, Mat33, Rot, Vec2, Vec3};
use crate::objects::RigidBody;
use serde::{Deserialize, Serialize};

/// Allows relative translation along one axis fixed in body A and removes
/// relative rotation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PrismaticJointDef {
    pub local_anchor_a: Vec2,
    pub local_anchor_b: Vec2,
    /// Translation axis in the frame of body A. Normalized on creation.
    pub local_axis_a: Vec2,
    pub reference_angle: f64,
    pub enable_limit: bool,
    pub lower_translation: f64,
    pub upper_translation: f64,
    pub enable_motor: bool,
    /// Target relative speed along the axis (m/s).
    pub motor_speed: f64,
    pub max_motor_force: f64,
}

impl Default for PrismaticJointDef {
    fn default() -> Self {
        Self {
            local_anchor_a: Vec2::ZERO,
            local_anchor_b: Vec2::ZERO,
            local_axis_a: Vec2::X,
            reference_angle: 0.0,
            enable_limit: false,
            lower_translation: 0.0,
            upper_translation: 0.0,
            enable_motor: false,
            motor_speed: 0.0,
            max_motor_force: 0.0,
        }
    }
}

impl PrismaticJointDef {
    /// Slides along `axis` (world) through `anchor` (world) in the current pose.
    pub fn initialize(
        body_a: Option<&RigidBody>,
        body_b: &RigidBody,
        anchor: Vec2,
        axis: Vec2,
    ) -> Self {
        let angle_a = body_a.map_or(0.0, RigidBody::angle);
        Self {
            local_anchor_a: body_a.map_or(anchor, |b| b.local_point(anchor)),
            local_anchor_b: body_b.local_point(anchor),
            local_axis_a: body_a.map_or(axis, |b| b.local_vector(axis)),
            reference_angle: body_b.angle() - angle_a,
            ..Default::default()
        }
    }

    pub fn with_axis(mut self, local_axis_a: Vec2) -> Self {
        self.local_axis_a = local_axis_a;
        self
    }

    pub fn with_limits(mut self, lower: f64, upper: f64) -> Self {
        self.enable_limit = true;
        self.lower_translation = lower;
        self.upper_translation = upper;
        self
    }

    pub fn with_motor(mut self, motor_speed: f64, max_motor_force: f64) -> Self {
        self.enable_motor = true;
        self.motor_speed = motor_speed;
        self.max_motor_force = max_motor_force;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !self.local_anchor_a.is_finite()
            || !self.local_anchor_b.is_finite()
            || !self.reference_angle.is_finite()
        {
            return Err(invalid_config("prismatic joint frame must be finite"));
        }
        if !self.local_axis_a.is_finite() || self.local_axis_a.normalize() == Vec2::ZERO {
            return Err(invalid_config("prismatic joint axis must be a non-zero vector"));
        }
        if !(self.lower_translation.is_finite()
            && self.upper_translation.is_finite()
            && self.lower_translation <= self.upper_translation)
        {
            return Err(invalid_config(format!(
                "prismatic joint limits out of order: [{}, {}]",
                self.lower_translation, self.upper_translation
            )));
        }
        if !self.motor_speed.is_finite()
            || !(self.max_motor_force.is_finite() && self.max_motor_force >= 0.0)
        {
            return Err(invalid_config("prismatic joint motor must be finite with non-negative force"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PrismaticJoint {
    local_anchor_a: Vec2,
    local_anchor_b: Vec2,
    local_x_axis_a: Vec2,
    local_y_axis_a: Vec2,
    reference_angle: f64,
    enable_limit: bool,
    lower_translation: f64,
    upper_translation: f64,
    enable_motor: bool,
    motor_speed: f64,
    max_motor_force: f64,

    pub(crate) bodies: BodyPair,
    axis: Vec2,
    perp: Vec2,
    s1: f64,
    s2: f64,
    a1: f64,
    a2: f64,
    k: Mat22,
    translation: f64,
    axial_mass: f64,
    limit_state: LimitState,
    /// Perpendicular and angular accumulated impulse.
    impulse: Vec2,
    motor_impulse: f64,
    lower_impulse: f64,
    upper_impulse: f64,
}

impl PrismaticJoint {
    pub(crate) fn new(def: &PrismaticJointDef) -> Self {
        let x_axis = def.local_axis_a.normalize();
        Self {
            local_anchor_a: def.local_anchor_a,
            local_anchor_b: def.local_anchor_b,
            local_x_axis_a: x_axis,
            local_y_axis_a: Vec2::scalar_cross(1.0, x_axis),
            reference_angle: def.reference_angle,
            enable_limit: def.enable_limit,
            lower_translation: def.lower_translation,
            upper_translation: def.upper_translation,
            enable_motor: def.enable_motor,
            motor_speed: def.motor_speed,
            max_motor_force: def.max_motor_force,
            bodies: BodyPair::default(),
            axis: Vec2::ZERO,
            perp: Vec2::ZERO,
            s1: 0.0,
            s2: 0.0,
            a1: 0.0,
            a2: 0.0,
            k: Mat22::default(),
            translation: 0.0,
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

    pub fn local_axis_a(&self) -> Vec2 {
        self.local_x_axis_a
    }

    pub fn reference_angle(&self) -> f64 {
        self.reference_angle
    }

    /// Translation along the axis measured at the start of the last step.
    pub fn joint_translation(&self) -> f64 {
        self.translation
    }

    pub fn limit_state(&self) -> LimitState {
        self.limit_state
    }

    pub fn is_limit_enabled(&self) -> bool {
        self.enable_limit
    }

    pub fn limits(&self) -> (f64, f64) {
        (self.lower_translation, self.upper_translation)
    }

    pub fn is_motor_enabled(&self) -> bool {
        self.enable_motor
    }

    pub fn motor_speed(&self) -> f64 {
        self.motor_speed
    }

    pub fn max_motor_force(&self) -> f64 {
        self.max_motor_force
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
                "prismatic joint limits out of order: [{lower}, {upper}]"
            )));
        }
        if lower != self.lower_translation || upper != self.upper_translation {
            self.lower_translation = lower;
            self.upper_translation = upper;
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

    pub fn set_max_motor_force(&mut self, force: f64) -> Result<()> {
        if !(force.is_finite() && force >= 0.0) {
            return Err(invalid_config("max motor force must be non-negative"));
        }
        self.max_motor_force = force;
        Ok(())
    }

    pub fn reaction_force(&self, inv_dt: f64) -> Vec2 {
        let axial = self.motor_impulse + self.lower_impulse - self.upper_impulse;
        (self.perp * self.impulse.x + self.axis * axial) * inv_dt
    }

    pub fn reaction_torque(&self, inv_dt: f64) -> f64 {
        inv_dt * self.impulse.y
    }

    pub(crate) fn reset_impulses(&mut self) {
        self.impulse = Vec2::ZERO;
        self.motor_impulse = 0.0;
        self.lower_impulse = 0.0;
        self.upper_impulse = 0.0;
    }

    /// Relative speed of the anchors along the axis.
    fn axial_speed(&self, data: &SolverData) -> f64 {
        let va = data.velocities[self.bodies.index_a];
        let vb = data.velocities[self.bodies.index_b];
        self.axis.dot(vb.v - va.v) + self.a2 * vb.w - self.a1 * va.w
    }

    /// Applies an impulse along the axis, positive pushing B away from A.
    fn apply_axial(&self, data: &mut SolverData, impulse: f64) {
        let b = self.bodies;
        let p = self.axis * impulse;
        let va = &mut data.velocities[b.index_a];
        va.v -= p * b.inv_mass_a;
        va.w -= b.inv_i_a * impulse * self.a1;
        let vb = &mut data.velocities[b.index_b];
        vb.v += p * b.inv_mass_b;
        vb.w += b.inv_i_b * impulse * self.a2;
    }
}

impl Constraint for PrismaticJoint {
    fn init_velocity_constraints(&mut self, data: &SolverData) -> std::result::Result<(), SingularMass> {
        self.bodies.load(data.bodies);
        let b = self.bodies;
        let pa = data.positions[b.index_a];
        let pb = data.positions[b.index_b];
        let q_a = Rot::new(pa.a);

        let r_a = q_a.apply(self.local_anchor_a - b.local_center_a);
        let r_b = Rot::new(pb.a).apply(self.local_anchor_b - b.local_center_b);
        let d = pb.c - pa.c + r_b - r_a;

        self.axis = q_a.apply(self.local_x_axis_a);
        self.a1 = (d + r_a).cross(self.axis);
        self.a2 = r_b.cross(self.axis);
        self.axial_mass = invert(
            b.inv_mass_a + b.inv_mass_b + b.inv_i_a * self.a1 * self.a1 + b.inv_i_b * self.a2 * self.a2,
        )
        .unwrap_or(0.0);

        self.perp = q_a.apply(self.local_y_axis_a);
        self.s1 = (d + r_a).cross(self.perp);
        self.s2 = r_b.cross(self.perp);

        let k11 = b.inv_mass_a + b.inv_mass_b + b.inv_i_a * self.s1 * self.s1 + b.inv_i_b * self.s2 * self.s2;
        let k12 = b.inv_i_a * self.s1 + b.inv_i_b * self.s2;
        let mut k22 = b.inv_i_a + b.inv_i_b;
        if k22 == 0.0 {
            // Both bodies have fixed rotation
            k22 = 1.0;
        }
        self.k = Mat22::from_columns(Vec2::new(k11, k12), Vec2::new(k12, k22));
        if self.k.determinant() == 0.0 {
            return Err(SingularMass);
        }

        self.translation = self.axis.dot(d);
        if self.enable_limit {
            let state = LimitState::evaluate(
                self.translation,
                self.lower_translation,
                self.upper_translation,
                data.config.linear_slop,
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

        if !self.enable_motor {
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
        let p = self.perp * self.impulse.x + self.axis * axial;
        let l_a = self.impulse.x * self.s1 + self.impulse.y + axial * self.a1;
        let l_b = self.impulse.x * self.s2 + self.impulse.y + axial * self.a2;

        let va = &mut data.velocities[b.index_a];
        va.v -= p * b.inv_mass_a;
        va.w -= b.inv_i_a * l_a;
        let vb = &mut data.velocities[b.index_b];
        vb.v += p * b.inv_mass_b;
        vb.w += b.inv_i_b * l_b;
    }

    fn solve_velocity_constraints(&mut self, data: &mut SolverData) {
        if self.enable_motor {
            let c_dot = self.axial_speed(data);
            let impulse = self.axial_mass * (self.motor_speed - c_dot);
            let old = self.motor_impulse;
            let max_impulse = data.step.dt * self.max_motor_force;
            self.motor_impulse = (old + impulse).clamp(-max_impulse, max_impulse);
            self.apply_axial(data, self.motor_impulse - old);
        }

        if self.enable_limit {
            if self.limit_state.lower_active() {
                let c = self.translation - self.lower_translation;
                let bias = c.max(0.0) * data.step.inv_dt;
                let c_dot = self.axial_speed(data);
                let impulse = -self.axial_mass * (c_dot + bias);
                let old = self.lower_impulse;
                self.lower_impulse = (old + impulse).max(0.0);
                self.apply_axial(data, self.lower_impulse - old);
            }
            if self.limit_state.upper_active() {
                let c = self.upper_translation - self.translation;
                let bias = c.max(0.0) * data.step.inv_dt;
                let c_dot = -self.axial_speed(data);
                let impulse = -self.axial_mass * (c_dot + bias);
                let old = self.upper_impulse;
                self.upper_impulse = (old + impulse).max(0.0);
                self.apply_axial(data, -(self.upper_impulse - old));
            }
        }

        // Perpendicular and angular rows
        let b = self.bodies;
        let va = data.velocities[b.index_a];
        let vb = data.velocities[b.index_b];
        let c_dot = Vec2::new(
            self.perp.dot(vb.v - va.v) + self.s2 * vb.w - self.s1 * va.w,
            vb.w - va.w,
        );
        let df = self.k.solve(-c_dot).unwrap_or(Vec2::ZERO);
        self.impulse += df;

        let p = self.perp * df.x;
        let l_a = df.x * self.s1 + df.y;
        let l_b = df.x * self.s2 + df.y;
        let va = &mut data.velocities[b.index_a];
        va.v -= p * b.inv_mass_a;
        va.w -= b.inv_i_a * l_a;
        let vb = &mut data.velocities[b.index_b];
        vb.v += p * b.inv_mass_b;
        vb.w += b.inv_i_b * l_b;
    }

    fn solve_position_constraints(&mut self, data: &mut SolverData) -> bool {
        let b = self.bodies;
        let config = data.config;
        let mut pa = data.positions[b.index_a];
        let mut pb = data.positions[b.index_b];
        let q_a = Rot::new(pa.a);

        let r_a = q_a.apply(self.local_anchor_a - b.local_center_a);
        let r_b = Rot::new(pb.a).apply(self.local_anchor_b - b.local_center_b);
        let d = pb.c + r_b - pa.c - r_a;

        let axis = q_a.apply(self.local_x_axis_a);
        let a1 = (d + r_a).cross(axis);
        let a2 = r_b.cross(axis);
        let perp = q_a.apply(self.local_y_axis_a);
        let s1 = (d + r_a).cross(perp);
        let s2 = r_b.cross(perp);

        let c1 = Vec2::new(perp.dot(d), pb.a - pa.a - self.reference_angle);
        let mut linear_error = c1.x.abs();
        let angular_error = c1.y.abs();

        let mut c2 = 0.0;
        let mut active = false;
        if self.enable_limit {
            let translation = axis.dot(d);
            let slop = config.linear_slop;
            if (self.upper_translation - self.lower_translation).abs() < 2.0 * slop {
                c2 = translation - self.lower_translation;
                linear_error = linear_error.max(c2.abs());
                active = true;
            } else if translation <= self.lower_translation {
                c2 = (translation - self.lower_translation + slop).min(0.0);
                linear_error = linear_error.max(self.lower_translation - translation);
                active = true;
            } else if translation >= self.upper_translation {
                c2 = (translation - self.upper_translation - slop).max(0.0);
                linear_error = linear_error.max(translation - self.upper_translation);
                active = true;
            }
        }

        let (m_a, m_b, i_a, i_b) = (b.inv_mass_a, b.inv_mass_b, b.inv_i_a, b.inv_i_b);
        let k11 = m_a + m_b + i_a * s1 * s1 + i_b * s2 * s2;
        let k12 = i_a * s1 + i_b * s2;
        let mut k22 = i_a + i_b;
        if k22 == 0.0 {
            k22 = 1.0;
        }

        let c1 = Vec2::new(linear_correction(config, c1.x), angular_correction(config, c1.y));
        let impulse = if active {
            let k13 = i_a * s1 * a1 + i_b * s2 * a2;
            let k23 = i_a * a1 + i_b * a2;
            let k33 = m_a + m_b + i_a * a1 * a1 + i_b * a2 * a2;
            let k = Mat33::from_columns(
                Vec3::new(k11, k12, k13),
                Vec3::new(k12, k22, k23),
                Vec3::new(k13, k23, k33),
            );
            let c = Vec3::new(c1.x, c1.y, linear_correction(config, c2));
            k.solve33(-c)
        } else {
            let k = Mat22::from_columns(Vec2::new(k11, k12), Vec2::new(k12, k22));
            k.solve(-c1).map(|i| Vec3::new(i.x, i.y, 0.0))
        };
        let Some(impulse) = impulse else {
            return false;
        };

        let p = perp * impulse.x + axis * impulse.z;
        let l_a = impulse.x * s1 + impulse.y + impulse.z * a1;
        let l_b = impulse.x * s2 + impulse.y + impulse.z * a2;

        pa.c -= p * m_a;
        pa.a -= i_a * l_a;
        pb.c += p * m_b;
        pb.a += i_b * l_b;
        data.positions[b.index_a] = pa;
        data.positions[b.index_b] = pb;

        linear_error <= config.linear_slop && angular_error <= config.angular_slop
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::WorldConfig;
    use crate::constraints::{JointDef, JointKind};
    use crate::objects::{BodyDef, MassProperties};
    use crate::world::PhysicsWorld;
    use approx::assert_abs_diff_eq;

    const DT: f64 = 1.0 / 60.0;

    #[test]
    fn test_validate_axis_and_limits() {
        assert!(PrismaticJointDef::default().with_axis(Vec2::ZERO).validate().is_err());
        assert!(PrismaticJointDef::default().with_limits(2.0, 1.0).validate().is_err());
        assert!(PrismaticJointDef::default().with_axis(Vec2::new(0.0, 3.0)).validate().is_ok());
    }

    #[test]
    fn test_axis_is_normalized() {
        let joint = PrismaticJoint::new(&PrismaticJointDef::default().with_axis(Vec2::new(0.0, 3.0)));
        assert_eq!(joint.local_axis_a(), Vec2::Y);
        assert_abs_diff_eq!(joint.local_y_axis_a.x, -1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_slider_holds_against_gravity_and_slides_freely() {
        let mut world = PhysicsWorld::new(WorldConfig::default()).unwrap();
        let ground = world.create_body(&BodyDef::new_static(Vec2::ZERO)).unwrap();
        let slider = world
            .create_body(
                &BodyDef::dynamic(Vec2::new(0.0, 1.0), MassProperties::rectangle(1.0, 0.5, 0.5))
                    .with_velocity(Vec2::new(1.0, 0.0), 0.0),
            )
            .unwrap();
        let def = PrismaticJointDef::initialize(
            Some(world.body(ground).unwrap()),
            world.body(slider).unwrap(),
            Vec2::new(0.0, 1.0),
            Vec2::X,
        );
        world.create_joint(&JointDef::new(Some(ground), slider, def)).unwrap();

        for _ in 0..60 {
            world.step(DT).unwrap();
        }
        let body = world.body(slider).unwrap();
        assert_abs_diff_eq!(body.position().y, 1.0, epsilon = 1e-3);
        assert_abs_diff_eq!(body.angle(), 0.0, epsilon = 1e-3);
        assert_abs_diff_eq!(body.position().x, 1.0, epsilon = 1e-2);
        assert_abs_diff_eq!(body.linear_velocity().x, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_limit_and_motor() {
        let mut world = PhysicsWorld::new(WorldConfig::default().with_gravity(Vec2::ZERO)).unwrap();
        let slider = world
            .create_body(&BodyDef::dynamic(Vec2::ZERO, MassProperties::circle(1.0, 0.5)))
            .unwrap();
        let def = PrismaticJointDef::default()
            .with_limits(-1.0, 0.5)
            .with_motor(2.0, 50.0);
        let joint = world.create_joint(&JointDef::new(None, slider, def)).unwrap();

        for _ in 0..120 {
            world.step(DT).unwrap();
            assert!(world.body(slider).unwrap().position().x < 0.5 + 0.05);
        }
        let x = world.body(slider).unwrap().position().x;
        assert!(x > 0.45, "slider stopped short at {x}");
        match world.joint(joint).unwrap().kind() {
            JointKind::Prismatic(p) => assert_eq!(p.limit_state(), LimitState::AtUpper),
            other => panic!("unexpected joint {other:?}"),
        }

        // Reverse the motor; the slider should leave the upper limit
        world.joint_mut(joint).unwrap().set_motor_speed(-2.0).unwrap();
        for _ in 0..10 {
            world.step(DT).unwrap();
        }
        assert!(world.body(slider).unwrap().linear_velocity().x < -1.9);
    }
}
