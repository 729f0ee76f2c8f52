//! Constraint-based 2D rigid body dynamics.
//!
//! Bodies and joints live in a [`PhysicsWorld`]. Contacts come from an
//! external collision stage as [`ContactManifold`]s and are handed to the
//! world before each step.

pub mod collision;
pub mod common;
pub mod constraints;
pub mod integration;
pub mod math;
pub mod objects;
pub mod world;

mod solver;

// Re-export key types for easier use
pub use collision::{ContactManifold, ManifoldPoint};
pub use common::{Material, PhysicsError, Result, SolverConfig, WorldConfig};
pub use constraints::{
    DistanceJointDef, GearJointDef, Joint, JointDef, JointHandle, JointType, MouseJointDef,
    PrismaticJointDef, PulleyJointDef, RevoluteJointDef, WeldJointDef,
};
pub use math::Vec2;
pub use objects::{BodyDef, BodyHandle, BodyType, MassProperties, RigidBody};
pub use world::{Diagnostic, PhysicsWorld, StepReport};
