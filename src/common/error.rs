//! Error types for the dynamics core

use crate::constraints::JointHandle;
use crate::objects::BodyHandle;
use thiserror::Error;

/// Errors returned by world, body and joint operations.
///
/// Problems that only affect one constraint or body during a step are not
/// errors; they are reported as [`Diagnostic`](crate::world::Diagnostic)s.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PhysicsError {
    /// A definition was rejected at creation time
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A body mutator received a non-finite value
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Handle does not refer to a live body
    #[error("Rigid body not found: {0:?}")]
    BodyNotFound(BodyHandle),

    /// Handle does not refer to a live joint
    #[error("Joint not found: {0:?}")]
    JointNotFound(JointHandle),

    /// Joint setter called on a joint kind without that parameter
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// The world is in the middle of a step
    #[error("A simulation step is already in progress")]
    StepInProgress,
}

/// Result type for physics operations
pub type Result<T> = std::result::Result<T, PhysicsError>;

pub(crate) fn invalid_config(msg: impl Into<String>) -> PhysicsError {
    PhysicsError::InvalidConfiguration(msg.into())
}

pub(crate) fn ensure_finite(value: f64, what: &str) -> Result<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(PhysicsError::InvalidState(format!("{what} must be finite, got {value}")))
    }
}

pub(crate) fn ensure_finite_vec(value: crate::math::Vec2, what: &str) -> Result<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(PhysicsError::InvalidState(format!("{what} must be finite, got {value:?}")))
    }
}
