//! Island construction and the sequential impulse pipeline.
//!
//! Islands are seeded from dynamic bodies in arena order and grown through
//! joints and contacts. Static bodies end an island's growth, so two stacks
//! resting on the same ground solve independently. Every phase runs over
//! all islands before the next phase starts.

mod island;

pub(crate) use island::{Island, StepContext};

use crate::collision::ContactManifold;
use crate::common::Material;
use crate::constraints::{ContactConstraint, Joint};
use crate::objects::{BodyHandle, BodySet};
use crate::world::report::{emit, ConstraintId, Diagnostic};
use std::collections::HashMap;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

#[derive(Debug, Clone, Copy)]
enum Edge {
    Joint(usize),
    Contact(usize),
}

/// Groups bodies, joints and accepted contacts into islands.
///
/// Joints are moved out of `joints` into the island that solves them.
/// Joints whose bodies are all static stay behind and are reported as
/// singular.
pub(crate) fn build_islands(
    bodies: &BodySet,
    joints: &mut [Option<Joint>],
    manifolds: &[ContactManifold],
    accepted: &[usize],
    diagnostics: &mut Vec<Diagnostic>,
) -> Vec<Island> {
    let slots = bodies.capacity();
    let is_dynamic = |handle: BodyHandle| bodies.get(handle).map_or(false, |b| !b.is_static());

    let mut edges: Vec<Vec<Edge>> = vec![Vec::new(); slots];
    for (index, joint) in joints.iter().enumerate() {
        let Some(joint) = joint else { continue };
        let slots_of_joint = joint.body_slots();
        if !slots_of_joint.iter().flatten().any(|&h| is_dynamic(h)) {
            let constraint = ConstraintId::Joint(joint.handle());
            emit(diagnostics, Diagnostic::SingularConstraint { constraint });
            continue;
        }
        for handle in slots_of_joint.into_iter().flatten() {
            edges[handle.index()].push(Edge::Joint(index));
        }
    }
    for &index in accepted {
        let manifold = &manifolds[index];
        edges[manifold.body_a.index()].push(Edge::Contact(index));
        edges[manifold.body_b.index()].push(Edge::Contact(index));
    }

    let mut visited = vec![false; slots];
    // Island number + 1 that last copied each static body
    let mut static_stamp = vec![0usize; slots];
    let mut joint_taken = vec![false; joints.len()];
    let mut contact_taken = vec![false; manifolds.len()];
    let mut islands = Vec::new();

    for seed in bodies.iter().filter(|b| !b.is_static()) {
        let seed = seed.handle();
        if visited[seed.index()] {
            continue;
        }
        visited[seed.index()] = true;
        let stamp = islands.len() + 1;

        let mut members: Vec<BodyHandle> = Vec::new();
        let mut island_joints: Vec<usize> = Vec::new();
        let mut island_contacts: Vec<usize> = Vec::new();
        let mut stack = vec![seed];

        while let Some(handle) = stack.pop() {
            members.push(handle);
            for edge in &edges[handle.index()] {
                let neighbours: Vec<BodyHandle> = match *edge {
                    Edge::Joint(j) => {
                        if joint_taken[j] {
                            continue;
                        }
                        joint_taken[j] = true;
                        island_joints.push(j);
                        joints[j]
                            .as_ref()
                            .map(|joint| joint.body_slots().into_iter().flatten().collect())
                            .unwrap_or_default()
                    }
                    Edge::Contact(c) => {
                        if contact_taken[c] {
                            continue;
                        }
                        contact_taken[c] = true;
                        island_contacts.push(c);
                        vec![manifolds[c].body_a, manifolds[c].body_b]
                    }
                };
                for other in neighbours {
                    let slot = other.index();
                    if is_dynamic(other) {
                        if !visited[slot] {
                            visited[slot] = true;
                            stack.push(other);
                        }
                    } else if static_stamp[slot] != stamp {
                        static_stamp[slot] = stamp;
                        members.push(other);
                    }
                }
            }
        }

        // Stable solve order regardless of graph traversal order
        island_joints.sort_unstable();
        island_contacts.sort_unstable();

        let mut island = Island::new();
        let mut local: HashMap<BodyHandle, usize> = HashMap::with_capacity(members.len());
        for handle in members {
            if let Some(body) = bodies.get(handle) {
                local.insert(handle, island.add_body(body));
            }
        }
        let index_of = |slot: Option<BodyHandle>| slot.and_then(|h| local.get(&h).copied()).unwrap_or(0);

        for j in island_joints {
            if let Some(mut joint) = joints[j].take() {
                let indices = joint.body_slots().into_iter().map(index_of).collect();
                joint.bind(indices);
                island.add_joint(j, joint);
            }
        }
        for c in island_contacts {
            let manifold = &manifolds[c];
            let (Some(a), Some(b)) = (bodies.get(manifold.body_a), bodies.get(manifold.body_b)) else {
                continue;
            };
            let mut contact = ContactConstraint::new(
                c,
                manifold,
                Material::mix_friction(&a.material, &b.material),
                Material::mix_restitution(&a.material, &b.material),
            );
            contact
                .bodies
                .bind(index_of(Some(manifold.body_a)), index_of(Some(manifold.body_b)));
            island.add_contact(contact, manifold);
        }
        islands.push(island);
    }
    islands
}

#[cfg(feature = "parallel")]
fn for_each_island<F>(islands: &mut [Island], op: F)
where
    F: Fn(&mut Island) + Send + Sync,
{
    islands.par_iter_mut().for_each(op);
}

#[cfg(not(feature = "parallel"))]
fn for_each_island<F>(islands: &mut [Island], op: F)
where
    F: Fn(&mut Island),
{
    islands.iter_mut().for_each(op);
}

pub(crate) fn integrate_velocities(islands: &mut [Island], ctx: &StepContext) {
    for_each_island(islands, |island| island.integrate_velocities(ctx));
}

pub(crate) fn init_constraints(islands: &mut [Island], ctx: &StepContext) {
    for_each_island(islands, |island| island.init_constraints(ctx));
}

pub(crate) fn warm_start(islands: &mut [Island], ctx: &StepContext) {
    for_each_island(islands, |island| island.warm_start(ctx));
}

pub(crate) fn solve_velocities(islands: &mut [Island], ctx: &StepContext) {
    for_each_island(islands, |island| island.solve_velocities(ctx));
}

pub(crate) fn integrate_positions(islands: &mut [Island], ctx: &StepContext) {
    for_each_island(islands, |island| island.integrate_positions(ctx));
}

/// One position pass over every unconverged island. Returns `true` once all
/// islands are within tolerance.
pub(crate) fn solve_positions(islands: &mut [Island], ctx: &StepContext) -> bool {
    for_each_island(islands, |island| {
        island.solve_positions(ctx);
    });
    islands.iter().all(Island::is_converged)
}

pub(crate) fn check_divergence(islands: &mut [Island]) {
    for_each_island(islands, Island::check_divergence);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraints::{DistanceJointDef, JointDef, JointHandle, JointKind};
    use crate::math::Vec2;
    use crate::objects::{BodyDef, MassProperties};

    fn dynamic(set: &mut BodySet, x: f64) -> BodyHandle {
        set.insert(&BodyDef::dynamic(Vec2::new(x, 0.0), MassProperties::default()))
    }

    fn rod(id: u32, a: Option<BodyHandle>, b: BodyHandle) -> Option<Joint> {
        let def = JointDef::new(a, b, DistanceJointDef::new(1.0));
        let kind = JointKind::from_def(&def.kind).unwrap();
        Some(Joint::new(JointHandle(id), &def, kind))
    }

    #[test]
    fn test_static_bodies_split_islands() {
        let mut set = BodySet::new();
        let ground = set.insert(&BodyDef::new_static(Vec2::ZERO));
        let a = dynamic(&mut set, 1.0);
        let b = dynamic(&mut set, 2.0);
        let c = dynamic(&mut set, 5.0);
        let mut joints = vec![rod(0, Some(ground), a), rod(1, Some(a), b), rod(2, Some(ground), c)];
        let mut diagnostics = Vec::new();

        let islands = build_islands(&set, &mut joints, &[], &[], &mut diagnostics);

        assert_eq!(islands.len(), 2);
        // a, b and their copy of the ground
        assert_eq!(islands[0].body_count(), 3);
        assert_eq!(islands[1].body_count(), 2);
        assert!(joints.iter().all(Option::is_none));
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn test_contacts_join_islands() {
        let mut set = BodySet::new();
        let a = dynamic(&mut set, 0.0);
        let b = dynamic(&mut set, 1.0);
        dynamic(&mut set, 9.0);
        let manifolds =
            vec![ContactManifold::new(a, b, Vec2::X).with_point(Vec2::new(0.5, 0.0), -0.01, 0)];
        let mut diagnostics = Vec::new();

        let islands = build_islands(&set, &mut [], &manifolds, &[0], &mut diagnostics);

        assert_eq!(islands.len(), 2);
        assert_eq!(islands[0].body_count(), 2);
        assert_eq!(islands[1].body_count(), 1);
    }

    #[test]
    fn test_static_only_joint_is_reported() {
        let mut set = BodySet::new();
        let ground = set.insert(&BodyDef::new_static(Vec2::ZERO));
        let mut joints = vec![rod(7, None, ground)];
        let mut diagnostics = Vec::new();

        let islands = build_islands(&set, &mut joints, &[], &[], &mut diagnostics);

        assert!(islands.is_empty());
        assert!(joints[0].is_some());
        assert_eq!(
            diagnostics,
            vec![Diagnostic::SingularConstraint {
                constraint: ConstraintId::Joint(JointHandle(7))
            }]
        );
    }
}
