//! Joint definitions and the runtime joint that dispatches to each kind.

use super::{
    Constraint, DistanceJoint, DistanceJointDef, GearJoint, GearJointDef, MouseJoint, MouseJointDef,
    PrismaticJoint, PrismaticJointDef, PulleyJoint, PulleyJointDef, RevoluteJoint,
    RevoluteJointDef, SingularMass, SolverData, WeldJoint, WeldJointDef,
};
use crate::common::error::{invalid_config, PhysicsError, Result};
use crate::math::{Transform, Vec2};
use crate::objects::BodyHandle;
use crate::world::PhysicsWorld;
use serde::{Deserialize, Serialize};

/// Identity of a joint. Handles are never reused within a world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JointHandle(pub(crate) u32);

impl JointHandle {
    pub fn id(self) -> u32 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JointType {
    Distance,
    Revolute,
    Prismatic,
    Pulley,
    Mouse,
    Gear,
    Weld,
}

/// Kind-specific parameters of a [`JointDef`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum JointKindDef {
    Distance(DistanceJointDef),
    Revolute(RevoluteJointDef),
    Prismatic(PrismaticJointDef),
    Pulley(PulleyJointDef),
    Mouse(MouseJointDef),
    Gear(GearJointDef),
    Weld(WeldJointDef),
}

impl JointKindDef {
    pub fn joint_type(&self) -> JointType {
        match self {
            JointKindDef::Distance(_) => JointType::Distance,
            JointKindDef::Revolute(_) => JointType::Revolute,
            JointKindDef::Prismatic(_) => JointType::Prismatic,
            JointKindDef::Pulley(_) => JointType::Pulley,
            JointKindDef::Mouse(_) => JointType::Mouse,
            JointKindDef::Gear(_) => JointType::Gear,
            JointKindDef::Weld(_) => JointType::Weld,
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            JointKindDef::Distance(def) => def.validate(),
            JointKindDef::Revolute(def) => def.validate(),
            JointKindDef::Prismatic(def) => def.validate(),
            JointKindDef::Pulley(def) => def.validate(),
            JointKindDef::Mouse(def) => def.validate(),
            JointKindDef::Gear(def) => def.validate(),
            JointKindDef::Weld(def) => def.validate(),
        }
    }
}

impl From<DistanceJointDef> for JointKindDef {
    fn from(def: DistanceJointDef) -> Self {
        JointKindDef::Distance(def)
    }
}

impl From<RevoluteJointDef> for JointKindDef {
    fn from(def: RevoluteJointDef) -> Self {
        JointKindDef::Revolute(def)
    }
}

impl From<PrismaticJointDef> for JointKindDef {
    fn from(def: PrismaticJointDef) -> Self {
        JointKindDef::Prismatic(def)
    }
}

impl From<PulleyJointDef> for JointKindDef {
    fn from(def: PulleyJointDef) -> Self {
        JointKindDef::Pulley(def)
    }
}

impl From<MouseJointDef> for JointKindDef {
    fn from(def: MouseJointDef) -> Self {
        JointKindDef::Mouse(def)
    }
}

impl From<GearJointDef> for JointKindDef {
    fn from(def: GearJointDef) -> Self {
        JointKindDef::Gear(def)
    }
}

impl From<WeldJointDef> for JointKindDef {
    fn from(def: WeldJointDef) -> Self {
        JointKindDef::Weld(def)
    }
}

/// Plain description of a joint, validated by `PhysicsWorld::create_joint`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JointDef {
    /// `None` attaches the joint to the fixed world frame; local anchors on
    /// side A are then world coordinates.
    pub body_a: Option<BodyHandle>,
    pub body_b: BodyHandle,
    /// Keep generating contacts between the two jointed bodies.
    pub collide_connected: bool,
    pub user_data: u64,
    pub kind: JointKindDef,
}

impl JointDef {
    pub fn new(body_a: Option<BodyHandle>, body_b: BodyHandle, kind: impl Into<JointKindDef>) -> Self {
        Self {
            body_a,
            body_b,
            collide_connected: false,
            user_data: 0,
            kind: kind.into(),
        }
    }

    /// A gear between two existing revolute or prismatic joints, attached to
    /// the bodies they drive.
    pub fn gear(joint_1: &Joint, joint_2: &Joint, ratio: f64) -> Self {
        Self::new(
            Some(joint_1.body_b()),
            joint_2.body_b(),
            GearJointDef::new(joint_1.handle(), joint_2.handle(), ratio),
        )
    }

    pub fn with_collide_connected(mut self, flag: bool) -> Self {
        self.collide_connected = flag;
        self
    }

    pub fn with_user_data(mut self, user_data: u64) -> Self {
        self.user_data = user_data;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.body_a == Some(self.body_b) {
            return Err(invalid_config("a joint cannot connect a body to itself"));
        }
        self.kind.validate()
    }
}

/// Runtime state of each joint kind.
#[derive(Debug, Clone, PartialEq)]
pub enum JointKind {
    Distance(DistanceJoint),
    Revolute(RevoluteJoint),
    Prismatic(PrismaticJoint),
    Pulley(PulleyJoint),
    Mouse(MouseJoint),
    Gear(GearJoint),
    Weld(WeldJoint),
}

impl JointKind {
    /// Builds every kind except gears, which need the joints they couple.
    pub(crate) fn from_def(def: &JointKindDef) -> Option<Self> {
        Some(match def {
            JointKindDef::Distance(d) => JointKind::Distance(DistanceJoint::new(d)),
            JointKindDef::Revolute(d) => JointKind::Revolute(RevoluteJoint::new(d)),
            JointKindDef::Prismatic(d) => JointKind::Prismatic(PrismaticJoint::new(d)),
            JointKindDef::Pulley(d) => JointKind::Pulley(PulleyJoint::new(d)),
            JointKindDef::Mouse(d) => JointKind::Mouse(MouseJoint::new(d)),
            JointKindDef::Weld(d) => JointKind::Weld(WeldJoint::new(d)),
            JointKindDef::Gear(_) => return None,
        })
    }

    pub fn joint_type(&self) -> JointType {
        match self {
            JointKind::Distance(_) => JointType::Distance,
            JointKind::Revolute(_) => JointType::Revolute,
            JointKind::Prismatic(_) => JointType::Prismatic,
            JointKind::Pulley(_) => JointType::Pulley,
            JointKind::Mouse(_) => JointType::Mouse,
            JointKind::Gear(_) => JointType::Gear,
            JointKind::Weld(_) => JointType::Weld,
        }
    }

    fn as_constraint_mut(&mut self) -> &mut dyn Constraint {
        match self {
            JointKind::Distance(j) => j,
            JointKind::Revolute(j) => j,
            JointKind::Prismatic(j) => j,
            JointKind::Pulley(j) => j,
            JointKind::Mouse(j) => j,
            JointKind::Gear(j) => j,
            JointKind::Weld(j) => j,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Joint {
    handle: JointHandle,
    body_a: Option<BodyHandle>,
    body_b: BodyHandle,
    collide_connected: bool,
    pub user_data: u64,
    kind: JointKind,
    /// Island-local body indices, in `body_slots` order.
    indices: Vec<usize>,
}

impl Joint {
    pub(crate) fn new(handle: JointHandle, def: &JointDef, kind: JointKind) -> Self {
        Self {
            handle,
            body_a: def.body_a,
            body_b: def.body_b,
            collide_connected: def.collide_connected,
            user_data: def.user_data,
            kind,
            indices: Vec::new(),
        }
    }

    pub fn handle(&self) -> JointHandle {
        self.handle
    }

    pub fn joint_type(&self) -> JointType {
        self.kind.joint_type()
    }

    pub fn body_a(&self) -> Option<BodyHandle> {
        self.body_a
    }

    pub fn body_b(&self) -> BodyHandle {
        self.body_b
    }

    pub fn collide_connected(&self) -> bool {
        self.collide_connected
    }

    pub fn kind(&self) -> &JointKind {
        &self.kind
    }

    pub fn kind_mut(&mut self) -> &mut JointKind {
        &mut self.kind
    }

    /// Bodies the solver needs, `None` standing for the world frame.
    /// Gears list both driven bodies followed by both base bodies.
    pub(crate) fn body_slots(&self) -> Vec<Option<BodyHandle>> {
        match &self.kind {
            JointKind::Gear(gear) => gear.body_slots().to_vec(),
            _ => vec![self.body_a, Some(self.body_b)],
        }
    }

    /// True if the joint constrains `body` in any way.
    pub fn references(&self, body: BodyHandle) -> bool {
        self.body_slots().contains(&Some(body))
    }

    /// Gear joints that couple `joint` must go when it does.
    pub(crate) fn depends_on(&self, joint: JointHandle) -> bool {
        match &self.kind {
            JointKind::Gear(gear) => gear.joint_1() == joint || gear.joint_2() == joint,
            _ => false,
        }
    }

    pub(crate) fn bind(&mut self, indices: Vec<usize>) {
        match &mut self.kind {
            JointKind::Distance(j) => j.bodies.bind(indices[0], indices[1]),
            JointKind::Revolute(j) => j.bodies.bind(indices[0], indices[1]),
            JointKind::Prismatic(j) => j.bodies.bind(indices[0], indices[1]),
            JointKind::Pulley(j) => j.bodies.bind(indices[0], indices[1]),
            JointKind::Mouse(j) => j.bodies.bind(indices[0], indices[1]),
            JointKind::Gear(j) => j.bind(&indices),
            JointKind::Weld(j) => j.bodies.bind(indices[0], indices[1]),
        }
        self.indices = indices;
    }

    pub(crate) fn solver_indices(&self) -> &[usize] {
        &self.indices
    }

    pub(crate) fn reset_impulses(&mut self) {
        match &mut self.kind {
            JointKind::Distance(j) => j.reset_impulses(),
            JointKind::Revolute(j) => j.reset_impulses(),
            JointKind::Prismatic(j) => j.reset_impulses(),
            JointKind::Pulley(j) => j.reset_impulses(),
            JointKind::Mouse(j) => j.reset_impulses(),
            JointKind::Gear(j) => j.reset_impulses(),
            JointKind::Weld(j) => j.reset_impulses(),
        }
    }

    fn local_anchors(&self) -> (Vec2, Vec2) {
        match &self.kind {
            JointKind::Distance(j) => (j.local_anchor_a(), j.local_anchor_b()),
            JointKind::Revolute(j) => (j.local_anchor_a(), j.local_anchor_b()),
            JointKind::Prismatic(j) => (j.local_anchor_a(), j.local_anchor_b()),
            JointKind::Pulley(j) => (j.local_anchor_a(), j.local_anchor_b()),
            JointKind::Mouse(j) => (j.target(), j.local_anchor_b()),
            JointKind::Gear(j) => j.local_anchors(),
            JointKind::Weld(j) => (j.local_anchor_a(), j.local_anchor_b()),
        }
    }

    /// World position of the anchor on body A.
    pub fn anchor_a(&self, world: &PhysicsWorld) -> Vec2 {
        let (local_a, _) = self.local_anchors();
        match &self.kind {
            JointKind::Mouse(_) => local_a,
            _ => frame(world, self.body_a).apply(local_a),
        }
    }

    /// World position of the anchor on body B.
    pub fn anchor_b(&self, world: &PhysicsWorld) -> Vec2 {
        let (_, local_b) = self.local_anchors();
        frame(world, Some(self.body_b)).apply(local_b)
    }

    /// Constraint force on body B from the last step.
    pub fn reaction_force(&self, inv_dt: f64) -> Vec2 {
        match &self.kind {
            JointKind::Distance(j) => j.reaction_force(inv_dt),
            JointKind::Revolute(j) => j.reaction_force(inv_dt),
            JointKind::Prismatic(j) => j.reaction_force(inv_dt),
            JointKind::Pulley(j) => j.reaction_force(inv_dt),
            JointKind::Mouse(j) => j.reaction_force(inv_dt),
            JointKind::Gear(j) => j.reaction_force(inv_dt),
            JointKind::Weld(j) => j.reaction_force(inv_dt),
        }
    }

    /// Constraint torque on body B from the last step.
    pub fn reaction_torque(&self, inv_dt: f64) -> f64 {
        match &self.kind {
            JointKind::Revolute(j) => j.reaction_torque(inv_dt),
            JointKind::Prismatic(j) => j.reaction_torque(inv_dt),
            JointKind::Gear(j) => j.reaction_torque(inv_dt),
            JointKind::Weld(j) => j.reaction_torque(inv_dt),
            JointKind::Distance(_) | JointKind::Pulley(_) | JointKind::Mouse(_) => 0.0,
        }
    }

    fn unsupported(&self, operation: &str) -> PhysicsError {
        PhysicsError::UnsupportedOperation(format!(
            "{operation} is not available on {:?} joints",
            self.joint_type()
        ))
    }

    pub fn enable_motor(&mut self, flag: bool) -> Result<()> {
        match &mut self.kind {
            JointKind::Revolute(j) => j.enable_motor(flag),
            JointKind::Prismatic(j) => j.enable_motor(flag),
            _ => return Err(self.unsupported("enable_motor")),
        }
        Ok(())
    }

    pub fn set_motor_speed(&mut self, speed: f64) -> Result<()> {
        match &mut self.kind {
            JointKind::Revolute(j) => j.set_motor_speed(speed),
            JointKind::Prismatic(j) => j.set_motor_speed(speed),
            _ => Err(self.unsupported("set_motor_speed")),
        }
    }

    /// Maximum motor torque for revolute joints, force for prismatic joints.
    pub fn set_max_motor(&mut self, max: f64) -> Result<()> {
        match &mut self.kind {
            JointKind::Revolute(j) => j.set_max_motor_torque(max),
            JointKind::Prismatic(j) => j.set_max_motor_force(max),
            _ => Err(self.unsupported("set_max_motor")),
        }
    }

    pub fn enable_limit(&mut self, flag: bool) -> Result<()> {
        match &mut self.kind {
            JointKind::Revolute(j) => j.enable_limit(flag),
            JointKind::Prismatic(j) => j.enable_limit(flag),
            _ => return Err(self.unsupported("enable_limit")),
        }
        Ok(())
    }

    /// Angle limits for revolute joints, translation limits for prismatic
    /// joints, length limits for distance joints.
    pub fn set_limits(&mut self, lower: f64, upper: f64) -> Result<()> {
        match &mut self.kind {
            JointKind::Revolute(j) => j.set_limits(lower, upper),
            JointKind::Prismatic(j) => j.set_limits(lower, upper),
            JointKind::Distance(j) => j.set_limits(lower, upper),
            _ => Err(self.unsupported("set_limits")),
        }
    }

    pub fn set_target(&mut self, target: Vec2) -> Result<()> {
        match &mut self.kind {
            JointKind::Mouse(j) => j.set_target(target),
            _ => Err(self.unsupported("set_target")),
        }
    }

    pub fn set_length(&mut self, length: f64) -> Result<()> {
        match &mut self.kind {
            JointKind::Distance(j) => j.set_length(length),
            _ => Err(self.unsupported("set_length")),
        }
    }

    /// Spring stiffness (N/m) and damping (N·s/m) of a distance joint.
    pub fn set_spring(&mut self, stiffness: f64, damping: f64) -> Result<()> {
        match &mut self.kind {
            JointKind::Distance(j) => j.set_spring(stiffness, damping),
            _ => Err(self.unsupported("set_spring")),
        }
    }
}

fn frame(world: &PhysicsWorld, body: Option<BodyHandle>) -> Transform {
    body.and_then(|handle| world.body(handle).ok())
        .map_or_else(Transform::identity, |b| b.transform())
}

impl Constraint for Joint {
    fn init_velocity_constraints(&mut self, data: &SolverData) -> std::result::Result<(), SingularMass> {
        // Nothing can move; any impulse would be meaningless.
        if self.indices.iter().all(|&i| data.bodies[i].is_immovable()) {
            return Err(SingularMass);
        }
        self.kind.as_constraint_mut().init_velocity_constraints(data)
    }

    fn warm_start(&mut self, data: &mut SolverData) {
        self.kind.as_constraint_mut().warm_start(data)
    }

    fn solve_velocity_constraints(&mut self, data: &mut SolverData) {
        self.kind.as_constraint_mut().solve_velocity_constraints(data)
    }

    fn solve_position_constraints(&mut self, data: &mut SolverData) -> bool {
        self.kind.as_constraint_mut().solve_position_constraints(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::WorldConfig;
    use crate::objects::{BodyDef, MassProperties};

    fn world_with_pair() -> (PhysicsWorld, BodyHandle, BodyHandle) {
        let mut world = PhysicsWorld::new(WorldConfig::default()).unwrap();
        let a = world.create_body(&BodyDef::new_static(Vec2::new(0.0, 2.0))).unwrap();
        let b = world
            .create_body(&BodyDef::dynamic(Vec2::new(1.0, 2.0), MassProperties::default()))
            .unwrap();
        (world, a, b)
    }

    #[test]
    fn test_def_rejects_self_joint() {
        let (_, _, b) = world_with_pair();
        let def = JointDef::new(Some(b), b, DistanceJointDef::new(1.0));
        assert!(matches!(def.validate(), Err(PhysicsError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_kind_def_conversion() {
        let def: JointKindDef = WeldJointDef::default().into();
        assert_eq!(def.joint_type(), JointType::Weld);
        let def: JointKindDef = MouseJointDef::default().into();
        assert_eq!(def.joint_type(), JointType::Mouse);
    }

    #[test]
    fn test_unsupported_setters() {
        let (mut world, a, b) = world_with_pair();
        let handle = world
            .create_joint(&JointDef::new(Some(a), b, DistanceJointDef::new(1.0)))
            .unwrap();
        let joint = world.joint_mut(handle).unwrap();
        assert!(matches!(
            joint.set_motor_speed(1.0),
            Err(PhysicsError::UnsupportedOperation(_))
        ));
        assert!(matches!(
            joint.set_target(Vec2::ZERO),
            Err(PhysicsError::UnsupportedOperation(_))
        ));
        assert!(joint.set_length(2.0).is_ok());
        match joint.kind() {
            JointKind::Distance(d) => {
                assert_eq!(d.length(), 2.0);
                assert_eq!(d.min_length(), 2.0);
                assert_eq!(d.max_length(), 2.0);
            }
            other => panic!("unexpected joint {other:?}"),
        }
    }

    #[test]
    fn test_set_spring() {
        let (mut world, a, b) = world_with_pair();
        let def = DistanceJointDef::new(1.0).with_limits(0.5, 2.0);
        let handle = world.create_joint(&JointDef::new(Some(a), b, def)).unwrap();
        let joint = world.joint_mut(handle).unwrap();

        joint.set_spring(40.0, 2.0).unwrap();
        match joint.kind() {
            JointKind::Distance(d) => assert_eq!((d.stiffness(), d.damping()), (40.0, 2.0)),
            other => panic!("unexpected joint {other:?}"),
        }
        assert!(joint.set_spring(-1.0, 0.0).is_err());

        let def = RevoluteJointDef::initialize(None, world.body(b).unwrap(), Vec2::new(1.0, 2.0));
        let hinge = world.create_joint(&JointDef::new(None, b, def)).unwrap();
        assert!(matches!(
            world.joint_mut(hinge).unwrap().set_spring(1.0, 0.0),
            Err(PhysicsError::UnsupportedOperation(_))
        ));
    }

    #[test]
    fn test_world_anchors() {
        let (mut world, a, b) = world_with_pair();
        let def = RevoluteJointDef::initialize(
            Some(world.body(a).unwrap()),
            world.body(b).unwrap(),
            Vec2::new(0.5, 2.0),
        );
        let handle = world.create_joint(&JointDef::new(Some(a), b, def)).unwrap();
        let joint = world.joint(handle).unwrap();
        assert_eq!(joint.anchor_a(&world), Vec2::new(0.5, 2.0));
        assert_eq!(joint.anchor_b(&world), Vec2::new(0.5, 2.0));
        assert!(joint.references(a) && joint.references(b));
    }
}
