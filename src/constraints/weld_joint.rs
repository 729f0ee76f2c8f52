use super::{
    angular_correction, invert, point_correction, BodyPair, Constraint, SingularMass, SolverData,
};
use crate::common::error::{invalid_config, Result};
use crate::math::{Mat33, Rot, Vec2, Vec3};
use crate::objects::RigidBody;
use serde::{Deserialize, Serialize};

/// Glues two bodies together. With a positive angular stiffness the
/// rotational part becomes a damped spring.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct WeldJointDef {
    pub local_anchor_a: Vec2,
    pub local_anchor_b: Vec2,
    pub reference_angle: f64,
    /// Angular stiffness in N*m/rad. Zero makes the weld rigid.
    pub stiffness: f64,
    /// Angular damping in N*m*s/rad.
    pub damping: f64,
}

impl WeldJointDef {
    /// Welds the bodies at a world anchor in their current pose.
    pub fn initialize(body_a: Option<&RigidBody>, body_b: &RigidBody, anchor: Vec2) -> Self {
        let angle_a = body_a.map_or(0.0, RigidBody::angle);
        Self {
            local_anchor_a: body_a.map_or(anchor, |b| b.local_point(anchor)),
            local_anchor_b: body_b.local_point(anchor),
            reference_angle: body_b.angle() - angle_a,
            ..Default::default()
        }
    }

    pub fn with_spring(mut self, stiffness: f64, damping: f64) -> Self {
        self.stiffness = stiffness;
        self.damping = damping;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !self.local_anchor_a.is_finite()
            || !self.local_anchor_b.is_finite()
            || !self.reference_angle.is_finite()
        {
            return Err(invalid_config("weld joint frame must be finite"));
        }
        if !(self.stiffness.is_finite() && self.stiffness >= 0.0)
            || !(self.damping.is_finite() && self.damping >= 0.0)
        {
            return Err(invalid_config("weld joint spring must be non-negative"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WeldJoint {
    local_anchor_a: Vec2,
    local_anchor_b: Vec2,
    reference_angle: f64,
    stiffness: f64,
    damping: f64,

    pub(crate) bodies: BodyPair,
    r_a: Vec2,
    r_b: Vec2,
    mass: Mat33,
    gamma: f64,
    bias: f64,
    impulse: Vec3,
}

/// Full point-plus-angle effective mass.
fn weld_mass(b: &BodyPair, r_a: Vec2, r_b: Vec2) -> Mat33 {
    let (m_a, m_b, i_a, i_b) = (b.inv_mass_a, b.inv_mass_b, b.inv_i_a, b.inv_i_b);
    let k12 = -r_a.y * r_a.x * i_a - r_b.y * r_b.x * i_b;
    let k13 = -r_a.y * i_a - r_b.y * i_b;
    let k23 = r_a.x * i_a + r_b.x * i_b;
    Mat33::from_columns(
        Vec3::new(m_a + m_b + r_a.y * r_a.y * i_a + r_b.y * r_b.y * i_b, k12, k13),
        Vec3::new(k12, m_a + m_b + r_a.x * r_a.x * i_a + r_b.x * r_b.x * i_b, k23),
        Vec3::new(k13, k23, i_a + i_b),
    )
}

impl WeldJoint {
    pub(crate) fn new(def: &WeldJointDef) -> Self {
        Self {
            local_anchor_a: def.local_anchor_a,
            local_anchor_b: def.local_anchor_b,
            reference_angle: def.reference_angle,
            stiffness: def.stiffness,
            damping: def.damping,
            bodies: BodyPair::default(),
            r_a: Vec2::ZERO,
            r_b: Vec2::ZERO,
            mass: Mat33::default(),
            gamma: 0.0,
            bias: 0.0,
            impulse: Vec3::ZERO,
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

    pub fn stiffness(&self) -> f64 {
        self.stiffness
    }

    pub fn damping(&self) -> f64 {
        self.damping
    }

    pub fn reaction_force(&self, inv_dt: f64) -> Vec2 {
        self.impulse.xy() * inv_dt
    }

    pub fn reaction_torque(&self, inv_dt: f64) -> f64 {
        inv_dt * self.impulse.z
    }

    pub(crate) fn reset_impulses(&mut self) {
        self.impulse = Vec3::ZERO;
    }

    fn apply(&self, data: &mut SolverData, p: Vec2, angular: f64) {
        let b = self.bodies;
        let va = &mut data.velocities[b.index_a];
        va.v -= p * b.inv_mass_a;
        va.w -= b.inv_i_a * (self.r_a.cross(p) + angular);
        let vb = &mut data.velocities[b.index_b];
        vb.v += p * b.inv_mass_b;
        vb.w += b.inv_i_b * (self.r_b.cross(p) + angular);
    }
}

impl Constraint for WeldJoint {
    fn init_velocity_constraints(&mut self, data: &SolverData) -> std::result::Result<(), SingularMass> {
        self.bodies.load(data.bodies);
        let b = self.bodies;
        let pa = data.positions[b.index_a];
        let pb = data.positions[b.index_b];

        self.r_a = Rot::new(pa.a).apply(self.local_anchor_a - b.local_center_a);
        self.r_b = Rot::new(pb.a).apply(self.local_anchor_b - b.local_center_b);
        let k = weld_mass(&b, self.r_a, self.r_b);

        if self.stiffness > 0.0 {
            let mut mass = k.inverse22().ok_or(SingularMass)?;
            let mut inv_m = b.inv_i_a + b.inv_i_b;
            let c = pb.a - pa.a - self.reference_angle;
            let h = data.step.dt;
            let gamma = h * (self.damping + h * self.stiffness);
            self.gamma = if gamma != 0.0 { 1.0 / gamma } else { 0.0 };
            self.bias = c * h * self.stiffness * self.gamma;
            inv_m += self.gamma;
            mass.ez.z = invert(inv_m).unwrap_or(0.0);
            self.mass = mass;
        } else {
            self.gamma = 0.0;
            self.bias = 0.0;
            self.mass = if k.ez.z == 0.0 {
                k.inverse22().ok_or(SingularMass)?
            } else {
                k.sym_inverse33().ok_or(SingularMass)?
            };
        }
        Ok(())
    }

    fn warm_start(&mut self, data: &mut SolverData) {
        if data.step.warm_starting {
            self.impulse = self.impulse * data.step.dt_ratio;
            self.apply(data, self.impulse.xy(), self.impulse.z);
        } else {
            self.impulse = Vec3::ZERO;
        }
    }

    fn solve_velocity_constraints(&mut self, data: &mut SolverData) {
        let b = self.bodies;

        if self.stiffness > 0.0 {
            let c_dot2 = data.velocities[b.index_b].w - data.velocities[b.index_a].w;
            let impulse2 = -self.mass.ez.z * (c_dot2 + self.bias + self.gamma * self.impulse.z);
            self.impulse.z += impulse2;
            self.apply(data, Vec2::ZERO, impulse2);

            let va = data.velocities[b.index_a];
            let vb = data.velocities[b.index_b];
            let c_dot1 = vb.v + Vec2::scalar_cross(vb.w, self.r_b) - va.v - Vec2::scalar_cross(va.w, self.r_a);
            let impulse1 = -self.mass.mul22(c_dot1);
            self.impulse.x += impulse1.x;
            self.impulse.y += impulse1.y;
            self.apply(data, impulse1, 0.0);
        } else {
            let va = data.velocities[b.index_a];
            let vb = data.velocities[b.index_b];
            let c_dot1 = vb.v + Vec2::scalar_cross(vb.w, self.r_b) - va.v - Vec2::scalar_cross(va.w, self.r_a);
            let c_dot2 = vb.w - va.w;
            let impulse = -(self.mass * Vec3::new(c_dot1.x, c_dot1.y, c_dot2));
            self.impulse = self.impulse + impulse;
            self.apply(data, impulse.xy(), impulse.z);
        }
    }

    fn solve_position_constraints(&mut self, data: &mut SolverData) -> bool {
        let b = self.bodies;
        let config = data.config;
        let mut pa = data.positions[b.index_a];
        let mut pb = data.positions[b.index_b];

        let r_a = Rot::new(pa.a).apply(self.local_anchor_a - b.local_center_a);
        let r_b = Rot::new(pb.a).apply(self.local_anchor_b - b.local_center_b);
        let k = weld_mass(&b, r_a, r_b);

        let c1 = pb.c + r_b - pa.c - r_a;
        let position_error = c1.magnitude();
        let mut angular_error = 0.0;
        let c1 = point_correction(config, c1);

        let impulse = if self.stiffness > 0.0 {
            k.solve22(c1).map(|p| Vec3::new(-p.x, -p.y, 0.0))
        } else {
            let c2 = pb.a - pa.a - self.reference_angle;
            angular_error = c2.abs();
            let c = Vec3::new(c1.x, c1.y, angular_correction(config, c2));
            if k.ez.z > 0.0 {
                k.solve33(c).map(|i| -i)
            } else {
                k.solve22(c1).map(|p| Vec3::new(-p.x, -p.y, 0.0))
            }
        };
        let Some(impulse) = impulse else {
            return false;
        };

        let p = impulse.xy();
        pa.c -= p * b.inv_mass_a;
        pa.a -= b.inv_i_a * (r_a.cross(p) + impulse.z);
        pb.c += p * b.inv_mass_b;
        pb.a += b.inv_i_b * (r_b.cross(p) + impulse.z);
        data.positions[b.index_a] = pa;
        data.positions[b.index_b] = pb;

        position_error <= config.linear_slop && angular_error <= config.angular_slop
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::WorldConfig;
    use crate::constraints::JointDef;
    use crate::objects::{BodyDef, MassProperties};
    use crate::world::PhysicsWorld;
    use approx::assert_abs_diff_eq;

    const DT: f64 = 1.0 / 60.0;

    #[test]
    fn test_weld_mass_is_symmetric() {
        let pair = BodyPair {
            inv_mass_a: 1.0,
            inv_mass_b: 2.0,
            inv_i_a: 0.5,
            inv_i_b: 0.25,
            ..Default::default()
        };
        let k = weld_mass(&pair, Vec2::new(0.3, -0.2), Vec2::new(-1.0, 0.4));
        assert_eq!(k.ex.y, k.ey.x);
        assert_eq!(k.ex.z, k.ez.x);
        assert_eq!(k.ey.z, k.ez.y);
    }

    #[test]
    fn test_cantilever_keeps_relative_pose() {
        let mut world = PhysicsWorld::new(WorldConfig::default()).unwrap();
        let wall = world.create_body(&BodyDef::new_static(Vec2::ZERO)).unwrap();
        let beam = world
            .create_body(&BodyDef::dynamic(Vec2::new(1.0, 0.0), MassProperties::rectangle(1.0, 2.0, 0.2)))
            .unwrap();
        let def = WeldJointDef::initialize(
            Some(world.body(wall).unwrap()),
            world.body(beam).unwrap(),
            Vec2::ZERO,
        );
        world.create_joint(&JointDef::new(Some(wall), beam, def)).unwrap();

        for _ in 0..120 {
            world.step(DT).unwrap();
        }
        let body = world.body(beam).unwrap();
        assert!(body.position().distance(Vec2::new(1.0, 0.0)) < 0.02, "beam at {:?}", body.position());
        assert!(body.angle().abs() < 0.02, "beam sagged to {}", body.angle());
    }

    #[test]
    fn test_soft_weld_bends_then_recovers() {
        let mut world = PhysicsWorld::new(WorldConfig::default().with_gravity(Vec2::ZERO)).unwrap();
        let hub = world.create_body(&BodyDef::new_static(Vec2::ZERO)).unwrap();
        let arm = world
            .create_body(
                &BodyDef::dynamic(Vec2::ZERO, MassProperties::new(1.0, 1.0)).with_velocity(Vec2::ZERO, 2.0),
            )
            .unwrap();
        let def = WeldJointDef::default().with_spring(50.0, 20.0);
        world.create_joint(&JointDef::new(Some(hub), arm, def)).unwrap();

        let mut max_angle: f64 = 0.0;
        for _ in 0..300 {
            world.step(DT).unwrap();
            max_angle = max_angle.max(world.body(arm).unwrap().angle());
        }
        assert!(max_angle > 0.01, "soft weld never bent");
        assert_abs_diff_eq!(world.body(arm).unwrap().angle(), 0.0, epsilon = 1e-2);
    }
}
