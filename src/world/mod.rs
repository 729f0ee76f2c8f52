pub mod physics_world;
pub mod report;

pub use physics_world::PhysicsWorld;
pub use report::{ConstraintId, Diagnostic, StepPhase, StepReport};
