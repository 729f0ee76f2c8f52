use super::joint::{Joint, JointHandle, JointKind, JointType};
use super::{invert, linear_correction, Constraint, SingularMass, SolverData};
use crate::common::error::{invalid_config, Result};
use crate::math::{Rot, Transform, Vec2};
use crate::objects::BodyHandle;
use serde::{Deserialize, Serialize};

/// Couples two revolute or prismatic joints:
/// `coordinate_1 + ratio * coordinate_2 == constant`.
///
/// Both joints must outlive the gear; destroying either one destroys the gear.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GearJointDef {
    pub joint_1: JointHandle,
    pub joint_2: JointHandle,
    pub ratio: f64,
}

impl GearJointDef {
    pub fn new(joint_1: JointHandle, joint_2: JointHandle, ratio: f64) -> Self {
        Self {
            joint_1,
            joint_2,
            ratio,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.joint_1 == self.joint_2 {
            return Err(invalid_config("gear joint needs two distinct joints"));
        }
        if !(self.ratio.is_finite() && self.ratio != 0.0) {
            return Err(invalid_config(format!(
                "gear joint ratio must be finite and non-zero, got {}",
                self.ratio
            )));
        }
        Ok(())
    }
}

/// One side of a gear: the driven body, the body it is jointed to, and the
/// joint frame copied from the underlying joint.
#[derive(Debug, Clone, Copy, PartialEq)]
struct GearSide {
    joint_type: JointType,
    /// Body A of the underlying joint; `None` is the world frame.
    base: Option<BodyHandle>,
    driven: BodyHandle,
    local_anchor_base: Vec2,
    local_anchor_driven: Vec2,
    local_axis_base: Vec2,
    reference_angle: f64,
}

impl GearSide {
    fn from_joint(joint: &Joint) -> Result<Self> {
        let (joint_type, anchor_base, anchor_driven, axis, reference_angle) = match joint.kind() {
            JointKind::Revolute(r) => (
                JointType::Revolute,
                r.local_anchor_a(),
                r.local_anchor_b(),
                Vec2::ZERO,
                r.reference_angle(),
            ),
            JointKind::Prismatic(p) => (
                JointType::Prismatic,
                p.local_anchor_a(),
                p.local_anchor_b(),
                p.local_axis_a(),
                p.reference_angle(),
            ),
            other => {
                return Err(invalid_config(format!(
                    "gear joint can only couple revolute or prismatic joints, got {:?}",
                    other.joint_type()
                )))
            }
        };
        Ok(Self {
            joint_type,
            base: joint.body_a(),
            driven: joint.body_b(),
            local_anchor_base: anchor_base,
            local_anchor_driven: anchor_driven,
            local_axis_base: axis,
            reference_angle,
        })
    }

    /// Joint coordinate from body origin transforms.
    fn coordinate(&self, base: Transform, driven: Transform) -> f64 {
        match self.joint_type {
            JointType::Prismatic => {
                let p_base = self.local_anchor_base;
                let p_driven = base.rot().apply_inverse(
                    driven.rot().apply(self.local_anchor_driven) + (driven.position - base.position),
                );
                (p_driven - p_base).dot(self.local_axis_base)
            }
            _ => driven.rotation - base.rotation - self.reference_angle,
        }
    }
}

/// Solver indices and mass data for one body of the gear.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
struct GearBody {
    index: usize,
    local_center: Vec2,
    inv_mass: f64,
    inv_i: f64,
}

/// Jacobian of one side: linear part shared by driven and base body,
/// angular part for each.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
struct SideJacobian {
    jv: Vec2,
    jw_driven: f64,
    jw_base: f64,
    inv_mass: f64,
    coordinate: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GearJoint {
    joint_1: JointHandle,
    joint_2: JointHandle,
    side_1: GearSide,
    side_2: GearSide,
    ratio: f64,
    constant: f64,

    /// Driven body of joint 1, driven body of joint 2, base of joint 1,
    /// base of joint 2.
    bodies: [GearBody; 4],
    jacobian_1: SideJacobian,
    jacobian_2: SideJacobian,
    mass: f64,
    impulse: f64,
}

impl GearJoint {
    /// `frame` returns the current origin transform of a body, identity for
    /// the world frame.
    pub(crate) fn new(
        def: &GearJointDef,
        joint_1: &Joint,
        joint_2: &Joint,
        frame: impl Fn(Option<BodyHandle>) -> Transform,
    ) -> Result<Self> {
        let side_1 = GearSide::from_joint(joint_1)?;
        let side_2 = GearSide::from_joint(joint_2)?;
        let coordinate_1 = side_1.coordinate(frame(side_1.base), frame(Some(side_1.driven)));
        let coordinate_2 = side_2.coordinate(frame(side_2.base), frame(Some(side_2.driven)));

        Ok(Self {
            joint_1: def.joint_1,
            joint_2: def.joint_2,
            side_1,
            side_2,
            ratio: def.ratio,
            constant: coordinate_1 + def.ratio * coordinate_2,
            bodies: [GearBody::default(); 4],
            jacobian_1: SideJacobian::default(),
            jacobian_2: SideJacobian::default(),
            mass: 0.0,
            impulse: 0.0,
        })
    }

    pub fn joint_1(&self) -> JointHandle {
        self.joint_1
    }

    pub fn joint_2(&self) -> JointHandle {
        self.joint_2
    }

    pub fn ratio(&self) -> f64 {
        self.ratio
    }

    pub fn constant(&self) -> f64 {
        self.constant
    }

    /// Bodies in solver order: driven 1, driven 2, base 1, base 2.
    pub(crate) fn body_slots(&self) -> [Option<BodyHandle>; 4] {
        [
            Some(self.side_1.driven),
            Some(self.side_2.driven),
            self.side_1.base,
            self.side_2.base,
        ]
    }

    /// Anchors on the two driven bodies.
    pub(crate) fn local_anchors(&self) -> (Vec2, Vec2) {
        (self.side_1.local_anchor_driven, self.side_2.local_anchor_driven)
    }

    pub(crate) fn bind(&mut self, indices: &[usize]) {
        for (body, &index) in self.bodies.iter_mut().zip(indices) {
            body.index = index;
        }
    }

    pub fn reaction_force(&self, inv_dt: f64) -> Vec2 {
        self.jacobian_1.jv * (inv_dt * self.impulse)
    }

    pub fn reaction_torque(&self, inv_dt: f64) -> f64 {
        inv_dt * self.impulse * self.jacobian_1.jw_driven
    }

    pub(crate) fn reset_impulses(&mut self) {
        self.impulse = 0.0;
    }

    /// Jacobian and coordinate of one side at the given solver positions.
    fn side_jacobian(
        side: &GearSide,
        driven: &GearBody,
        base: &GearBody,
        data: &SolverData,
        scale: f64,
    ) -> SideJacobian {
        let pd = data.positions[driven.index];
        let pb = data.positions[base.index];
        match side.joint_type {
            JointType::Prismatic => {
                let q_base = Rot::new(pb.a);
                let q_driven = Rot::new(pd.a);
                let u = q_base.apply(side.local_axis_base);
                let r_base = q_base.apply(side.local_anchor_base - base.local_center);
                let r_driven = q_driven.apply(side.local_anchor_driven - driven.local_center);
                let jw_base = scale * r_base.cross(u);
                let jw_driven = scale * r_driven.cross(u);

                let p_base = side.local_anchor_base - base.local_center;
                let p_driven = q_base.apply_inverse(r_driven + (pd.c - pb.c));
                SideJacobian {
                    jv: u * scale,
                    jw_driven,
                    jw_base,
                    inv_mass: scale * scale * (driven.inv_mass + base.inv_mass)
                        + base.inv_i * jw_base * jw_base
                        + driven.inv_i * jw_driven * jw_driven,
                    coordinate: (p_driven - p_base).dot(side.local_axis_base),
                }
            }
            _ => SideJacobian {
                jv: Vec2::ZERO,
                jw_driven: scale,
                jw_base: scale,
                inv_mass: scale * scale * (driven.inv_i + base.inv_i),
                coordinate: pd.a - pb.a - side.reference_angle,
            },
        }
    }

    fn apply_velocity(&self, data: &mut SolverData, impulse: f64) {
        let [a, b, c, d] = self.bodies;
        let (j1, j2) = (self.jacobian_1, self.jacobian_2);
        data.velocities[a.index].v += j1.jv * (a.inv_mass * impulse);
        data.velocities[a.index].w += a.inv_i * impulse * j1.jw_driven;
        data.velocities[b.index].v += j2.jv * (b.inv_mass * impulse);
        data.velocities[b.index].w += b.inv_i * impulse * j2.jw_driven;
        data.velocities[c.index].v -= j1.jv * (c.inv_mass * impulse);
        data.velocities[c.index].w -= c.inv_i * impulse * j1.jw_base;
        data.velocities[d.index].v -= j2.jv * (d.inv_mass * impulse);
        data.velocities[d.index].w -= d.inv_i * impulse * j2.jw_base;
    }
}

impl Constraint for GearJoint {
    fn init_velocity_constraints(&mut self, data: &SolverData) -> std::result::Result<(), SingularMass> {
        for body in &mut self.bodies {
            let source = &data.bodies[body.index];
            body.local_center = source.local_center;
            body.inv_mass = source.inv_mass;
            body.inv_i = source.inv_inertia;
        }
        let [a, b, c, d] = self.bodies;
        self.jacobian_1 = Self::side_jacobian(&self.side_1, &a, &c, data, 1.0);
        self.jacobian_2 = Self::side_jacobian(&self.side_2, &b, &d, data, self.ratio);
        self.mass = invert(self.jacobian_1.inv_mass + self.jacobian_2.inv_mass).ok_or(SingularMass)?;
        Ok(())
    }

    fn warm_start(&mut self, data: &mut SolverData) {
        if data.step.warm_starting {
            self.impulse *= data.step.dt_ratio;
            self.apply_velocity(data, self.impulse);
        } else {
            self.impulse = 0.0;
        }
    }

    fn solve_velocity_constraints(&mut self, data: &mut SolverData) {
        let [a, b, c, d] = self.bodies;
        let (j1, j2) = (self.jacobian_1, self.jacobian_2);
        let (va, vb, vc, vd) = (
            data.velocities[a.index],
            data.velocities[b.index],
            data.velocities[c.index],
            data.velocities[d.index],
        );
        let c_dot = j1.jv.dot(va.v - vc.v)
            + j2.jv.dot(vb.v - vd.v)
            + (j1.jw_driven * va.w - j1.jw_base * vc.w)
            + (j2.jw_driven * vb.w - j2.jw_base * vd.w);

        let impulse = -self.mass * c_dot;
        self.impulse += impulse;
        self.apply_velocity(data, impulse);
    }

    fn solve_position_constraints(&mut self, data: &mut SolverData) -> bool {
        let [a, b, c, d] = self.bodies;
        let j1 = Self::side_jacobian(&self.side_1, &a, &c, data, 1.0);
        let j2 = Self::side_jacobian(&self.side_2, &b, &d, data, self.ratio);
        let inv_mass = j1.inv_mass + j2.inv_mass;

        let error = j1.coordinate + self.ratio * j2.coordinate - self.constant;
        let impulse = match invert(inv_mass) {
            Some(mass) => -mass * linear_correction(data.config, error),
            None => 0.0,
        };

        // Applied as increments so bodies shared between both sides stay consistent.
        data.positions[a.index].c += j1.jv * (a.inv_mass * impulse);
        data.positions[a.index].a += a.inv_i * impulse * j1.jw_driven;
        data.positions[b.index].c += j2.jv * (b.inv_mass * impulse);
        data.positions[b.index].a += b.inv_i * impulse * j2.jw_driven;
        data.positions[c.index].c -= j1.jv * (c.inv_mass * impulse);
        data.positions[c.index].a -= c.inv_i * impulse * j1.jw_base;
        data.positions[d.index].c -= j2.jv * (d.inv_mass * impulse);
        data.positions[d.index].a -= d.inv_i * impulse * j2.jw_base;

        error.abs() < data.config.linear_slop
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::WorldConfig;
    use crate::common::PhysicsError;
    use crate::constraints::{DistanceJointDef, JointDef, RevoluteJointDef};
    use crate::objects::{BodyDef, MassProperties};
    use crate::world::PhysicsWorld;
    use approx::assert_abs_diff_eq;

    const DT: f64 = 1.0 / 60.0;

    fn wheel(world: &mut PhysicsWorld, x: f64) -> (BodyHandle, JointHandle) {
        let body = world
            .create_body(&BodyDef::dynamic(Vec2::new(x, 0.0), MassProperties::circle(1.0, 0.5)))
            .unwrap();
        let def = RevoluteJointDef {
            local_anchor_a: Vec2::new(x, 0.0),
            ..Default::default()
        };
        let joint = world.create_joint(&JointDef::new(None, body, def)).unwrap();
        (body, joint)
    }

    #[test]
    fn test_validate() {
        assert!(GearJointDef::new(JointHandle(1), JointHandle(1), 1.0).validate().is_err());
        assert!(GearJointDef::new(JointHandle(1), JointHandle(2), 0.0).validate().is_err());
        assert!(GearJointDef::new(JointHandle(1), JointHandle(2), -2.0).validate().is_ok());
    }

    #[test]
    fn test_gear_couples_wheel_angles() {
        let mut world = PhysicsWorld::new(WorldConfig::default().with_gravity(Vec2::ZERO)).unwrap();
        let (wheel_1, joint_1) = wheel(&mut world, 0.0);
        let (wheel_2, joint_2) = wheel(&mut world, 2.0);
        let def = JointDef::gear(
            world.joint(joint_1).unwrap(),
            world.joint(joint_2).unwrap(),
            2.0,
        );
        world.create_joint(&def).unwrap();

        world
            .body_mut(wheel_1)
            .unwrap()
            .set_angular_velocity(1.0)
            .unwrap();
        for _ in 0..120 {
            world.step(DT).unwrap();
        }
        let a1 = world.body(wheel_1).unwrap().angle();
        let a2 = world.body(wheel_2).unwrap().angle();
        assert!(a1.abs() > 0.1, "wheel 1 did not turn");
        assert_abs_diff_eq!(a1 + 2.0 * a2, 0.0, epsilon = 1e-3);
        let w1 = world.body(wheel_1).unwrap().angular_velocity();
        let w2 = world.body(wheel_2).unwrap().angular_velocity();
        assert_abs_diff_eq!(w1 + 2.0 * w2, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_gear_rejects_other_joint_kinds() {
        let mut world = PhysicsWorld::new(WorldConfig::default()).unwrap();
        let (_, joint_1) = wheel(&mut world, 0.0);
        let a = world
            .create_body(&BodyDef::dynamic(Vec2::new(5.0, 0.0), MassProperties::default()))
            .unwrap();
        let rod = world
            .create_joint(&JointDef::new(None, a, DistanceJointDef::new(1.0)))
            .unwrap();
        let def = JointDef::gear(world.joint(joint_1).unwrap(), world.joint(rod).unwrap(), 1.0);
        assert!(matches!(
            world.create_joint(&def),
            Err(PhysicsError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_destroying_coupled_joint_destroys_gear() {
        let mut world = PhysicsWorld::new(WorldConfig::default()).unwrap();
        let (_, joint_1) = wheel(&mut world, 0.0);
        let (_, joint_2) = wheel(&mut world, 2.0);
        let def = JointDef::gear(world.joint(joint_1).unwrap(), world.joint(joint_2).unwrap(), 1.0);
        let gear = world.create_joint(&def).unwrap();

        world.destroy_joint(joint_2).unwrap();
        assert!(matches!(world.joint(gear), Err(PhysicsError::JointNotFound(_))));
        assert!(world.joint(joint_1).is_ok());
        world.step(DT).unwrap();
    }
}
