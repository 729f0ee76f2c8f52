use super::{BodyPair, Constraint, SingularMass, SolverData};
use crate::common::error::{ensure_finite_vec, invalid_config, Result};
use crate::math::{Mat22, Rot, Vec2};
use crate::objects::RigidBody;
use serde::{Deserialize, Serialize};

/// Drags a point on body B towards a world target with a soft, force-limited
/// spring. Body A is not affected.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MouseJointDef {
    /// Initial target in world coordinates.
    pub target: Vec2,
    pub local_anchor_b: Vec2,
    pub max_force: f64,
    /// Linear stiffness in N/m.
    pub stiffness: f64,
    /// Linear damping in N*s/m.
    pub damping: f64,
}

impl Default for MouseJointDef {
    fn default() -> Self {
        Self {
            target: Vec2::ZERO,
            local_anchor_b: Vec2::ZERO,
            max_force: 0.0,
            stiffness: 0.0,
            damping: 0.0,
        }
    }
}

impl MouseJointDef {
    /// Grabs `body` at the world point `target`.
    pub fn initialize(body: &RigidBody, target: Vec2, max_force: f64, stiffness: f64, damping: f64) -> Self {
        Self {
            target,
            local_anchor_b: body.local_point(target),
            max_force,
            stiffness,
            damping,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !self.target.is_finite() || !self.local_anchor_b.is_finite() {
            return Err(invalid_config("mouse joint target must be finite"));
        }
        for (name, value) in [
            ("max_force", self.max_force),
            ("stiffness", self.stiffness),
            ("damping", self.damping),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(invalid_config(format!(
                    "mouse joint {name} must be non-negative, got {value}"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MouseJoint {
    target: Vec2,
    local_anchor_b: Vec2,
    max_force: f64,
    stiffness: f64,
    damping: f64,

    pub(crate) bodies: BodyPair,
    r_b: Vec2,
    mass: Mat22,
    position_bias: Vec2,
    gamma: f64,
    impulse: Vec2,
}

impl MouseJoint {
    pub(crate) fn new(def: &MouseJointDef) -> Self {
        Self {
            target: def.target,
            local_anchor_b: def.local_anchor_b,
            max_force: def.max_force,
            stiffness: def.stiffness,
            damping: def.damping,
            bodies: BodyPair::default(),
            r_b: Vec2::ZERO,
            mass: Mat22::default(),
            position_bias: Vec2::ZERO,
            gamma: 0.0,
            impulse: Vec2::ZERO,
        }
    }

    pub fn target(&self) -> Vec2 {
        self.target
    }

    pub fn local_anchor_b(&self) -> Vec2 {
        self.local_anchor_b
    }

    pub fn max_force(&self) -> f64 {
        self.max_force
    }

    pub fn set_target(&mut self, target: Vec2) -> Result<()> {
        ensure_finite_vec(target, "mouse target")?;
        self.target = target;
        Ok(())
    }

    pub fn set_max_force(&mut self, force: f64) -> Result<()> {
        if !(force.is_finite() && force >= 0.0) {
            return Err(invalid_config("mouse joint max_force must be non-negative"));
        }
        self.max_force = force;
        Ok(())
    }

    pub fn reaction_force(&self, inv_dt: f64) -> Vec2 {
        self.impulse * inv_dt
    }

    pub(crate) fn reset_impulses(&mut self) {
        self.impulse = Vec2::ZERO;
    }

    fn apply(&self, data: &mut SolverData, impulse: Vec2) {
        let b = self.bodies;
        let vb = &mut data.velocities[b.index_b];
        vb.v += impulse * b.inv_mass_b;
        vb.w += b.inv_i_b * self.r_b.cross(impulse);
    }
}

impl Constraint for MouseJoint {
    fn init_velocity_constraints(&mut self, data: &SolverData) -> std::result::Result<(), SingularMass> {
        self.bodies.load(data.bodies);
        let b = self.bodies;
        let pb = data.positions[b.index_b];
        let h = data.step.dt;

        let gamma = h * (self.damping + h * self.stiffness);
        self.gamma = if gamma != 0.0 { 1.0 / gamma } else { 0.0 };
        let beta = h * self.stiffness * self.gamma;

        self.r_b = Rot::new(pb.a).apply(self.local_anchor_b - b.local_center_b);
        let (m_b, i_b, r) = (b.inv_mass_b, b.inv_i_b, self.r_b);
        let k = Mat22::from_columns(
            Vec2::new(m_b + i_b * r.y * r.y + self.gamma, -i_b * r.x * r.y),
            Vec2::new(-i_b * r.x * r.y, m_b + i_b * r.x * r.x + self.gamma),
        );
        self.mass = k.inverse().ok_or(SingularMass)?;

        self.position_bias = (pb.c + self.r_b - self.target) * beta;
        Ok(())
    }

    fn warm_start(&mut self, data: &mut SolverData) {
        if data.step.warm_starting {
            self.impulse *= data.step.dt_ratio;
            self.apply(data, self.impulse);
        } else {
            self.impulse = Vec2::ZERO;
        }
    }

    fn solve_velocity_constraints(&mut self, data: &mut SolverData) {
        let vb = data.velocities[self.bodies.index_b];
        let c_dot = vb.v + Vec2::scalar_cross(vb.w, self.r_b);
        let mut impulse = self.mass * -(c_dot + self.position_bias + self.impulse * self.gamma);

        let old = self.impulse;
        self.impulse += impulse;
        let max_impulse = data.step.dt * self.max_force;
        if self.impulse.magnitude_squared() > max_impulse * max_impulse {
            self.impulse = self.impulse * (max_impulse / self.impulse.magnitude());
        }
        impulse = self.impulse - old;
        self.apply(data, impulse);
    }

    fn solve_position_constraints(&mut self, _data: &mut SolverData) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::WorldConfig;
    use crate::constraints::{linear_stiffness, JointDef};
    use crate::objects::{BodyDef, MassProperties};
    use crate::world::PhysicsWorld;

    const DT: f64 = 1.0 / 60.0;

    #[test]
    fn test_validate() {
        let def = MouseJointDef {
            max_force: -1.0,
            ..Default::default()
        };
        assert!(def.validate().is_err());
        assert!(MouseJointDef::default().validate().is_ok());
    }

    #[test]
    fn test_drags_body_to_target() {
        let mut world = PhysicsWorld::new(WorldConfig::default().with_gravity(Vec2::ZERO)).unwrap();
        let body = world
            .create_body(&BodyDef::dynamic(Vec2::ZERO, MassProperties::circle(1.0, 0.5)))
            .unwrap();
        let (stiffness, damping) = linear_stiffness(5.0, 0.7, 1.0, 0.0);
        let def = MouseJointDef::initialize(world.body(body).unwrap(), Vec2::ZERO, 1000.0, stiffness, damping);
        let joint = world.create_joint(&JointDef::new(None, body, def)).unwrap();

        world.joint_mut(joint).unwrap().set_target(Vec2::new(2.0, 1.0)).unwrap();
        for _ in 0..180 {
            world.step(DT).unwrap();
        }
        let p = world.body(body).unwrap().position();
        assert!(p.distance(Vec2::new(2.0, 1.0)) < 0.01, "body at {p:?}");
    }

    #[test]
    fn test_force_is_limited() {
        let mut world = PhysicsWorld::new(WorldConfig::default().with_gravity(Vec2::ZERO)).unwrap();
        let body = world
            .create_body(&BodyDef::dynamic(Vec2::ZERO, MassProperties::circle(1.0, 0.5)))
            .unwrap();
        let def = MouseJointDef {
            target: Vec2::new(100.0, 0.0),
            max_force: 6.0,
            stiffness: 1.0e4,
            damping: 10.0,
            ..Default::default()
        };
        let joint = world.create_joint(&JointDef::new(None, body, def)).unwrap();

        world.step(DT).unwrap();
        let force = world.joint(joint).unwrap().reaction_force(1.0 / DT);
        assert!(force.magnitude() <= 6.0 + 1e-9);
        let v = world.body(body).unwrap().linear_velocity();
        assert!(v.x > 0.0 && v.x <= 6.0 * DT + 1e-9);
    }
}
