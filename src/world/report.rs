//! Step outcome reporting

use crate::constraints::JointHandle;
use crate::objects::BodyHandle;
use log::warn;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a step currently is. Observable as `Idle` between steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum StepPhase {
    #[default]
    Idle,
    CollectConstraints,
    WarmStart,
    SolveVelocity,
    IntegratePositions,
    SolvePosition,
    ClearForces,
}

/// A constraint named in a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConstraintId {
    Joint(JointHandle),
    /// Index into the contacts supplied for the step.
    Contact(usize),
}

/// A problem confined to one constraint or body for one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Diagnostic {
    /// The effective mass could not be inverted; the constraint was skipped.
    SingularConstraint { constraint: ConstraintId },
    /// The body's state became non-finite. It was frozen at its
    /// start-of-step transform with zero velocity.
    NumericDivergence { body: BodyHandle },
    /// A supplied contact was dropped before solving.
    RejectedContact { index: usize, reason: String },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::SingularConstraint { constraint } => {
                write!(f, "singular constraint {constraint:?} skipped")
            }
            Diagnostic::NumericDivergence { body } => {
                write!(f, "body {body:?} diverged and was frozen")
            }
            Diagnostic::RejectedContact { index, reason } => {
                write!(f, "contact {index} rejected: {reason}")
            }
        }
    }
}

/// Logs `diagnostic` and records it.
pub(crate) fn emit(diagnostics: &mut Vec<Diagnostic>, diagnostic: Diagnostic) {
    warn!("{diagnostic}");
    diagnostics.push(diagnostic);
}

/// Summary of one or more steps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepReport {
    /// Number of steps taken.
    pub steps: u32,
    /// Islands solved, summed over the steps.
    pub islands: usize,
    /// Diagnostics in the order they were raised.
    pub diagnostics: Vec<Diagnostic>,
}

impl StepReport {
    pub fn is_clean(&self) -> bool {
        self.diagnostics.is_empty()
    }

    pub fn singular_constraints(&self) -> impl Iterator<Item = ConstraintId> + '_ {
        self.diagnostics.iter().filter_map(|d| match d {
            Diagnostic::SingularConstraint { constraint } => Some(*constraint),
            _ => None,
        })
    }

    pub fn diverged_bodies(&self) -> impl Iterator<Item = BodyHandle> + '_ {
        self.diagnostics.iter().filter_map(|d| match d {
            Diagnostic::NumericDivergence { body } => Some(*body),
            _ => None,
        })
    }

    pub(crate) fn merge(&mut self, other: StepReport) {
        self.steps += other.steps;
        self.islands += other.islands;
        self.diagnostics.extend(other.diagnostics);
    }
}
