//! One connected group of bodies and the constraints between them.
//!
//! Body state is copied into flat arrays for the step. Index 0 always holds
//! the fixed world frame, so joints attached to the world need no special
//! casing. Static bodies are copied into every island that touches them.

use crate::collision::ContactManifold;
use crate::common::SolverConfig;
use crate::constraints::{
    Constraint, ContactConstraint, Joint, Position, SolverBody, SolverData, TimeStep, Velocity,
};
use crate::integration::{integrate_position, integrate_velocity};
use crate::math::Vec2;
use crate::objects::{BodySet, RigidBody};
use crate::world::report::{emit, ConstraintId, Diagnostic};

/// Everything a phase needs besides the island itself.
#[derive(Debug, Clone, Copy)]
pub(crate) struct StepContext {
    pub step: TimeStep,
    pub config: SolverConfig,
    pub gravity: Vec2,
}

#[derive(Debug)]
pub(crate) struct Island {
    bodies: Vec<SolverBody>,
    positions: Vec<Position>,
    velocities: Vec<Velocity>,
    /// Positions at the start of the step, restored for frozen bodies.
    start: Vec<Position>,
    frozen: Vec<bool>,

    /// Joints paired with their index in world storage.
    joints: Vec<(usize, Joint)>,
    joint_active: Vec<bool>,
    contacts: Vec<ContactConstraint>,
    contact_active: Vec<bool>,

    converged: bool,
    diagnostics: Vec<Diagnostic>,
}

impl Island {
    pub fn new() -> Self {
        Self {
            bodies: vec![SolverBody::GROUND],
            positions: vec![Position::default()],
            velocities: vec![Velocity::default()],
            start: vec![Position::default()],
            frozen: vec![false],
            joints: Vec::new(),
            joint_active: Vec::new(),
            contacts: Vec::new(),
            contact_active: Vec::new(),
            converged: false,
            diagnostics: Vec::new(),
        }
    }

    /// Copies a body in and returns its island-local index.
    pub fn add_body(&mut self, body: &RigidBody) -> usize {
        self.bodies.push(SolverBody {
            handle: Some(body.handle()),
            inv_mass: body.inv_mass(),
            inv_inertia: body.inv_inertia(),
            local_center: body.local_center(),
            force: body.force(),
            torque: body.torque(),
            gravity_scale: body.gravity_scale,
            linear_damping: body.linear_damping,
            angular_damping: body.angular_damping,
        });
        let position = Position {
            c: body.world_center(),
            a: body.angle(),
        };
        self.positions.push(position);
        self.start.push(position);
        self.velocities.push(Velocity {
            v: body.linear_velocity(),
            w: body.angular_velocity(),
        });
        self.frozen.push(false);
        self.bodies.len() - 1
    }

    /// Adds a joint already bound to island-local indices.
    pub fn add_joint(&mut self, world_index: usize, joint: Joint) {
        self.joints.push((world_index, joint));
        self.joint_active.push(true);
    }

    /// Adds a bound contact and captures its anchors at the current
    /// positions.
    pub fn add_contact(&mut self, mut contact: ContactConstraint, manifold: &ContactManifold) {
        contact.capture_anchors(manifold, &self.positions);
        self.contacts.push(contact);
        self.contact_active.push(true);
    }

    /// Bodies in the island, static copies included.
    pub fn body_count(&self) -> usize {
        self.bodies.len() - 1
    }

    pub fn is_converged(&self) -> bool {
        self.converged
    }

    /// Gravity and accumulated forces into velocity.
    pub fn integrate_velocities(&mut self, ctx: &StepContext) {
        let dt = ctx.step.dt;
        for (body, velocity) in self.bodies.iter().zip(self.velocities.iter_mut()).skip(1) {
            integrate_velocity(body, velocity, ctx.gravity, dt);
        }
        self.check_divergence();
    }

    /// Prepares every active constraint. Singular ones are switched off for
    /// the rest of the step.
    pub fn init_constraints(&mut self, ctx: &StepContext) {
        let Island {
            bodies,
            positions,
            velocities,
            joints,
            joint_active,
            contacts,
            contact_active,
            diagnostics,
            ..
        } = self;
        let data = SolverData {
            step: ctx.step,
            config: &ctx.config,
            bodies: bodies.as_slice(),
            positions: positions.as_mut_slice(),
            velocities: velocities.as_mut_slice(),
        };

        for ((_, joint), active) in joints.iter_mut().zip(joint_active.iter_mut()) {
            if *active && joint.init_velocity_constraints(&data).is_err() {
                *active = false;
                joint.reset_impulses();
                let constraint = ConstraintId::Joint(joint.handle());
                emit(diagnostics, Diagnostic::SingularConstraint { constraint });
            }
        }
        for (contact, active) in contacts.iter_mut().zip(contact_active.iter_mut()) {
            if *active && contact.init_velocity_constraints(&data).is_err() {
                *active = false;
                let constraint = ConstraintId::Contact(contact.manifold_index);
                emit(diagnostics, Diagnostic::SingularConstraint { constraint });
            }
        }
    }

    pub fn warm_start(&mut self, ctx: &StepContext) {
        self.for_each_active(ctx, |constraint, data| constraint.warm_start(data));
    }

    /// One sequential impulse pass: joints in creation order, then contacts
    /// in supplied order.
    pub fn solve_velocities(&mut self, ctx: &StepContext) {
        self.for_each_active(ctx, |constraint, data| constraint.solve_velocity_constraints(data));
    }

    pub fn integrate_positions(&mut self, ctx: &StepContext) {
        let config = &ctx.config;
        for ((position, velocity), frozen) in self
            .positions
            .iter_mut()
            .zip(self.velocities.iter_mut())
            .zip(&self.frozen)
            .skip(1)
        {
            if !*frozen {
                integrate_position(position, velocity, config, ctx.step.dt);
            }
        }
        self.check_divergence();
    }

    /// One position correction pass. Skipped once the island has converged.
    pub fn solve_positions(&mut self, ctx: &StepContext) -> bool {
        if self.converged {
            return true;
        }
        let mut ok = true;
        self.for_each_active(ctx, |constraint, data| {
            ok &= constraint.solve_position_constraints(data);
        });
        self.converged = ok;
        ok
    }

    /// Freezes any body whose state is no longer finite.
    pub fn check_divergence(&mut self) {
        for index in 1..self.bodies.len() {
            if !self.frozen[index]
                && !(self.positions[index].is_finite() && self.velocities[index].is_finite())
            {
                self.freeze(index);
            }
        }
    }

    fn freeze(&mut self, index: usize) {
        self.frozen[index] = true;
        self.positions[index] = self.start[index];
        self.velocities[index] = Velocity::default();
        self.bodies[index].inv_mass = 0.0;
        self.bodies[index].inv_inertia = 0.0;

        for ((_, joint), active) in self.joints.iter().zip(self.joint_active.iter_mut()) {
            if joint.solver_indices().contains(&index) {
                *active = false;
            }
        }
        for (contact, active) in self.contacts.iter().zip(self.contact_active.iter_mut()) {
            if contact.bodies.index_a == index || contact.bodies.index_b == index {
                *active = false;
            }
        }
        if let Some(body) = self.bodies[index].handle {
            emit(&mut self.diagnostics, Diagnostic::NumericDivergence { body });
        }
    }

    fn for_each_active(
        &mut self,
        ctx: &StepContext,
        mut op: impl FnMut(&mut dyn Constraint, &mut SolverData),
    ) {
        let Island {
            bodies,
            positions,
            velocities,
            joints,
            joint_active,
            contacts,
            contact_active,
            ..
        } = self;
        let mut data = SolverData {
            step: ctx.step,
            config: &ctx.config,
            bodies: bodies.as_slice(),
            positions: positions.as_mut_slice(),
            velocities: velocities.as_mut_slice(),
        };

        for ((_, joint), active) in joints.iter_mut().zip(joint_active.iter()) {
            if *active {
                op(joint, &mut data);
            }
        }
        for (contact, active) in contacts.iter_mut().zip(contact_active.iter()) {
            if *active {
                op(contact, &mut data);
            }
        }
    }

    /// Copies solved state back to the dynamic bodies.
    pub fn write_back(&self, bodies: &mut BodySet) {
        for index in 1..self.bodies.len() {
            let Some(handle) = self.bodies[index].handle else {
                continue;
            };
            let Some(body) = bodies.get_mut(handle) else {
                continue;
            };
            if body.is_static() {
                continue;
            }
            let (p, v) = (self.positions[index], self.velocities[index]);
            body.store_solver_state(p.c, p.a, v.v, v.w);
        }
    }

    pub fn into_parts(self) -> (Vec<(usize, Joint)>, Vec<ContactConstraint>, Vec<Diagnostic>) {
        (self.joints, self.contacts, self.diagnostics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::{BodyDef, MassProperties};

    fn context() -> StepContext {
        StepContext {
            step: TimeStep::new(0.1, 0.0, true),
            config: SolverConfig::default(),
            gravity: Vec2::new(0.0, -10.0),
        }
    }

    #[test]
    fn test_ground_is_never_integrated() {
        let mut set = BodySet::new();
        let handle = set.insert(&BodyDef::dynamic(Vec2::ZERO, MassProperties::default()));
        let mut island = Island::new();
        island.add_body(set.get(handle).unwrap());

        island.integrate_velocities(&context());

        assert_eq!(island.velocities[0], Velocity::default());
        assert_eq!(island.velocities[1].v, Vec2::new(0.0, -1.0));
        assert_eq!(island.body_count(), 1);
    }

    #[test]
    fn test_divergence_freezes_once() {
        let mut set = BodySet::new();
        let handle = set.insert(&BodyDef::dynamic(Vec2::new(1.0, 2.0), MassProperties::default()));
        let mut island = Island::new();
        island.add_body(set.get(handle).unwrap());
        island.positions[1].c = Vec2::new(f64::NAN, 0.0);

        island.check_divergence();
        island.check_divergence();

        assert_eq!(island.positions[1].c, Vec2::new(1.0, 2.0));
        assert_eq!(island.velocities[1], Velocity::default());
        assert_eq!(island.bodies[1].inv_mass, 0.0);
        assert_eq!(island.diagnostics, vec![Diagnostic::NumericDivergence { body: handle }]);

        island.write_back(&mut set);
        assert_eq!(set.get(handle).unwrap().position(), Vec2::new(1.0, 2.0));
    }
}
