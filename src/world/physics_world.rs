use crate::{
    collision::ContactManifold,
    common::{error::invalid_config, PhysicsError, Result, WorldConfig},
    constraints::{GearJoint, Joint, JointDef, JointHandle, JointKind, JointKindDef, TimeStep},
    math::{Transform, Vec2},
    objects::{BodyDef, BodyHandle, BodySet, RigidBody},
    solver::{self, StepContext},
};
use super::report::{emit, Diagnostic, StepPhase, StepReport};

use log::{debug, trace};
use std::collections::HashMap;

/// Warm starting impulses of one contact point, keyed by body pair and
/// feature id.
type ContactKey = (BodyHandle, BodyHandle, u32);

/// Owns every body and joint and advances them in time.
#[derive(Debug)]
pub struct PhysicsWorld {
    config: WorldConfig,
    bodies: BodySet,
    /// Joints in creation order, which is also solve order.
    joints: Vec<Joint>,
    next_joint_id: u32,

    /// Contacts supplied for the next step.
    pending_contacts: Vec<ContactManifold>,
    /// Contacts solved by the last step, with their final impulses.
    contacts: Vec<ContactManifold>,
    contact_cache: HashMap<ContactKey, (f64, f64)>,

    phase: StepPhase,
    /// Length of the last non-empty step, 0 before the first one.
    previous_dt: f64,
    accumulator: f64,
}

impl PhysicsWorld {
    /// Creates a new, empty physics world.
    pub fn new(config: WorldConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            bodies: BodySet::new(),
            joints: Vec::new(),
            next_joint_id: 0,
            pending_contacts: Vec::new(),
            contacts: Vec::new(),
            contact_cache: HashMap::new(),
            phase: StepPhase::Idle,
            previous_dt: 0.0,
            accumulator: 0.0,
        })
    }

    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    pub fn gravity(&self) -> Vec2 {
        self.config.gravity
    }

    pub fn set_gravity(&mut self, gravity: Vec2) -> Result<()> {
        if !gravity.is_finite() {
            return Err(invalid_config("gravity must be finite"));
        }
        self.config.gravity = gravity;
        Ok(())
    }

    pub fn phase(&self) -> StepPhase {
        self.phase
    }

    // ==================== Bodies ====================

    pub fn create_body(&mut self, def: &BodyDef) -> Result<BodyHandle> {
        def.validate()?;
        let handle = self.bodies.insert(def);
        debug!("created {:?} body {handle:?}", def.body_type);
        Ok(handle)
    }

    /// Removes a body together with every joint, gear joint and contact
    /// that references it.
    pub fn destroy_body(&mut self, handle: BodyHandle) -> Result<()> {
        self.bodies
            .remove(handle)
            .ok_or(PhysicsError::BodyNotFound(handle))?;

        let removed: Vec<JointHandle> = self
            .joints
            .iter()
            .filter(|joint| joint.references(handle))
            .map(Joint::handle)
            .collect();
        self.joints.retain(|joint| !joint.references(handle));
        self.remove_gears_of(&removed);

        let touches = |m: &ContactManifold| m.body_a == handle || m.body_b == handle;
        self.pending_contacts.retain(|m| !touches(m));
        self.contacts.retain(|m| !touches(m));
        self.contact_cache
            .retain(|&(a, b, _), _| a != handle && b != handle);

        debug!("destroyed body {handle:?} and {} joint(s)", removed.len());
        Ok(())
    }

    /// Stops a body, drops its pending forces and zeroes the warm starting
    /// state of everything attached to it.
    pub fn reset_body(&mut self, handle: BodyHandle) -> Result<()> {
        self.body_mut(handle)?.reset_motion();
        for joint in self.joints.iter_mut().filter(|j| j.references(handle)) {
            joint.reset_impulses();
        }
        self.contact_cache
            .retain(|&(a, b, _), _| a != handle && b != handle);
        Ok(())
    }

    pub fn body(&self, handle: BodyHandle) -> Result<&RigidBody> {
        self.bodies.get(handle).ok_or(PhysicsError::BodyNotFound(handle))
    }

    pub fn body_mut(&mut self, handle: BodyHandle) -> Result<&mut RigidBody> {
        self.bodies
            .get_mut(handle)
            .ok_or(PhysicsError::BodyNotFound(handle))
    }

    /// Live bodies in storage order.
    pub fn bodies(&self) -> impl Iterator<Item = &RigidBody> {
        self.bodies.iter()
    }

    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }

    /// Drops forces and torques accumulated since the last step.
    pub fn clear_forces(&mut self) {
        for body in self.bodies.iter_mut() {
            body.clear_forces();
        }
    }

    // ==================== Joints ====================

    pub fn create_joint(&mut self, def: &JointDef) -> Result<JointHandle> {
        def.validate()?;
        if let Some(a) = def.body_a {
            self.body(a)?;
        }
        self.body(def.body_b)?;

        let kind = match &def.kind {
            JointKindDef::Gear(gear) => {
                let joint_1 = self.joint(gear.joint_1)?;
                let joint_2 = self.joint(gear.joint_2)?;
                if def.body_a != Some(joint_1.body_b()) || def.body_b != joint_2.body_b() {
                    return Err(invalid_config(
                        "gear joint bodies must be the bodies driven by the coupled joints",
                    ));
                }
                let frame = |body: Option<BodyHandle>| {
                    body.and_then(|h| self.bodies.get(h))
                        .map_or_else(Transform::identity, RigidBody::transform)
                };
                JointKind::Gear(GearJoint::new(gear, joint_1, joint_2, frame)?)
            }
            other => JointKind::from_def(other)
                .ok_or_else(|| invalid_config("unsupported joint definition"))?,
        };

        let handle = JointHandle(self.next_joint_id);
        self.next_joint_id += 1;
        self.joints.push(Joint::new(handle, def, kind));
        debug!("created {:?} joint {handle:?}", def.kind.joint_type());
        Ok(handle)
    }

    /// Removes a joint and any gear joint coupling it.
    pub fn destroy_joint(&mut self, handle: JointHandle) -> Result<()> {
        let index = self.joint_index(handle)?;
        self.joints.remove(index);
        self.remove_gears_of(&[handle]);
        debug!("destroyed joint {handle:?}");
        Ok(())
    }

    fn remove_gears_of(&mut self, removed: &[JointHandle]) {
        if removed.is_empty() {
            return;
        }
        self.joints.retain(|joint| {
            let orphaned = removed.iter().any(|&r| joint.depends_on(r));
            if orphaned {
                debug!("destroyed gear joint {:?} with its coupled joint", joint.handle());
            }
            !orphaned
        });
    }

    fn joint_index(&self, handle: JointHandle) -> Result<usize> {
        // Handles increase monotonically, so creation order is sorted
        self.joints
            .binary_search_by_key(&handle, Joint::handle)
            .map_err(|_| PhysicsError::JointNotFound(handle))
    }

    pub fn joint(&self, handle: JointHandle) -> Result<&Joint> {
        let index = self.joint_index(handle)?;
        Ok(&self.joints[index])
    }

    pub fn joint_mut(&mut self, handle: JointHandle) -> Result<&mut Joint> {
        let index = self.joint_index(handle)?;
        Ok(&mut self.joints[index])
    }

    /// Joints in creation order.
    pub fn joints(&self) -> impl Iterator<Item = &Joint> {
        self.joints.iter()
    }

    /// Joints constraining `body`.
    pub fn joints_of(&self, body: BodyHandle) -> impl Iterator<Item = &Joint> {
        self.joints.iter().filter(move |joint| joint.references(body))
    }

    pub fn joint_count(&self) -> usize {
        self.joints.len()
    }

    // ==================== Contacts ====================

    /// False when a joint between the two bodies disables their collision.
    pub fn should_collide(&self, a: BodyHandle, b: BodyHandle) -> bool {
        !self.joints.iter().any(|joint| {
            let connects = (joint.body_a() == Some(a) && joint.body_b() == b)
                || (joint.body_a() == Some(b) && joint.body_b() == a);
            connects && !joint.collide_connected()
        })
    }

    /// Supplies the contacts for the next step, replacing any not yet
    /// consumed. Impulses on points seen in the previous step are
    /// overwritten by the warm starting cache.
    pub fn set_contacts(&mut self, contacts: Vec<ContactManifold>) {
        self.pending_contacts = contacts;
    }

    /// Contacts solved by the last step, with their accumulated impulses.
    pub fn contacts(&self) -> &[ContactManifold] {
        &self.contacts
    }

    /// Returns indices of the contacts to solve. Invalid ones are reported,
    /// ones disabled by a joint are dropped silently.
    fn accept_contacts(
        &self,
        manifolds: &mut [ContactManifold],
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Vec<usize> {
        let mut accepted = Vec::with_capacity(manifolds.len());
        for (index, manifold) in manifolds.iter_mut().enumerate() {
            if let Err(reason) = manifold.check() {
                emit(diagnostics, Diagnostic::RejectedContact { index, reason });
                continue;
            }
            let (Some(a), Some(b)) = (self.bodies.get(manifold.body_a), self.bodies.get(manifold.body_b))
            else {
                let reason = "unknown or destroyed body".to_string();
                emit(diagnostics, Diagnostic::RejectedContact { index, reason });
                continue;
            };
            if a.is_static() && b.is_static() {
                let reason = "both bodies are static".to_string();
                emit(diagnostics, Diagnostic::RejectedContact { index, reason });
                continue;
            }
            if !self.should_collide(manifold.body_a, manifold.body_b) {
                debug!("contact {index} filtered: jointed bodies do not collide");
                continue;
            }
            for point in &mut manifold.points {
                let key = (manifold.body_a, manifold.body_b, point.id);
                if let Some(&(normal, tangent)) = self.contact_cache.get(&key) {
                    point.normal_impulse = normal;
                    point.tangent_impulse = tangent;
                }
            }
            accepted.push(index);
        }
        accepted
    }

    // ==================== Simulation ====================

    fn enter(&mut self, phase: StepPhase) {
        trace!("{:?} -> {:?}", self.phase, phase);
        self.phase = phase;
    }

    /// Advances the simulation by exactly one step of `dt` seconds.
    ///
    /// `dt == 0` leaves the world untouched. Problems confined to single
    /// bodies or constraints do not fail the step; they are listed in the
    /// returned report.
    pub fn step(&mut self, dt: f64) -> Result<StepReport> {
        if self.phase != StepPhase::Idle {
            return Err(PhysicsError::StepInProgress);
        }
        if !dt.is_finite() || dt < 0.0 {
            return Err(invalid_config(format!("dt must be finite and non-negative, got {dt}")));
        }
        if dt == 0.0 {
            return Ok(StepReport::default());
        }

        let mut diagnostics = Vec::new();
        let solver_config = self.config.solver;
        let ctx = StepContext {
            step: TimeStep::new(dt, self.previous_dt, solver_config.warm_starting),
            config: solver_config,
            gravity: self.config.gravity,
        };

        // 1. Capture state, apply forces, prepare constraints
        self.enter(StepPhase::CollectConstraints);
        let mut manifolds = std::mem::take(&mut self.pending_contacts);
        let accepted = self.accept_contacts(&mut manifolds, &mut diagnostics);
        let mut joints: Vec<Option<Joint>> = std::mem::take(&mut self.joints)
            .into_iter()
            .map(Some)
            .collect();
        let mut islands =
            solver::build_islands(&self.bodies, &mut joints, &manifolds, &accepted, &mut diagnostics);
        debug!(
            "step: {} island(s), {} joint(s), {} contact(s)",
            islands.len(),
            joints.len(),
            accepted.len()
        );
        solver::integrate_velocities(&mut islands, &ctx);
        solver::init_constraints(&mut islands, &ctx);

        // 2. Warm start
        self.enter(StepPhase::WarmStart);
        solver::warm_start(&mut islands, &ctx);

        // 3. Solve velocity constraints (iteratively)
        self.enter(StepPhase::SolveVelocity);
        for _ in 0..solver_config.velocity_iterations {
            solver::solve_velocities(&mut islands, &ctx);
        }

        // 4. Update positions from the solved velocity
        self.enter(StepPhase::IntegratePositions);
        solver::integrate_positions(&mut islands, &ctx);

        // 5. Positional correction
        self.enter(StepPhase::SolvePosition);
        for _ in 0..solver_config.position_iterations {
            if solver::solve_positions(&mut islands, &ctx) {
                break;
            }
        }
        solver::check_divergence(&mut islands);

        // 6. Write back and clear accumulators
        self.enter(StepPhase::ClearForces);
        let island_count = islands.len();
        for island in islands {
            island.write_back(&mut self.bodies);
            let (island_joints, contacts, island_diagnostics) = island.into_parts();
            for (index, joint) in island_joints {
                joints[index] = Some(joint);
            }
            for contact in contacts {
                contact.store_impulses(&mut manifolds[contact.manifold_index]);
            }
            diagnostics.extend(island_diagnostics);
        }
        self.joints = joints.into_iter().flatten().collect();
        self.store_contacts(manifolds, &accepted);
        self.clear_forces();

        self.previous_dt = dt;
        self.enter(StepPhase::Idle);
        Ok(StepReport {
            steps: 1,
            islands: island_count,
            diagnostics,
        })
    }

    fn store_contacts(&mut self, manifolds: Vec<ContactManifold>, accepted: &[usize]) {
        let mut keep = vec![false; manifolds.len()];
        for &index in accepted {
            keep[index] = true;
        }
        self.contact_cache.clear();
        self.contacts.clear();
        for (manifold, keep) in manifolds.into_iter().zip(keep) {
            if !keep {
                continue;
            }
            for point in &manifold.points {
                self.contact_cache.insert(
                    (manifold.body_a, manifold.body_b, point.id),
                    (point.normal_impulse, point.tangent_impulse),
                );
            }
            self.contacts.push(manifold);
        }
    }

    /// Advances by `elapsed` seconds in fixed steps of `config.timestep`.
    ///
    /// Leftover time carries over to the next call. Time beyond
    /// `max_substeps` steps is dropped.
    pub fn advance(&mut self, elapsed: f64) -> Result<StepReport> {
        if !elapsed.is_finite() || elapsed < 0.0 {
            return Err(invalid_config(format!(
                "elapsed time must be finite and non-negative, got {elapsed}"
            )));
        }
        self.accumulator += elapsed;

        let timestep = self.config.timestep;
        let mut report = StepReport::default();
        while self.accumulator >= timestep && report.steps < self.config.max_substeps {
            report.merge(self.step(timestep)?);
            self.accumulator -= timestep;
        }
        if self.accumulator >= timestep {
            debug!("dropping {:.4}s of simulation time", self.accumulator);
            self.accumulator = 0.0;
        }
        Ok(report)
    }

    /// Fraction of a fixed step left in the accumulator, for interpolating
    /// rendered transforms.
    pub fn interpolation_alpha(&self) -> f64 {
        self.accumulator / self.config.timestep
    }
}
