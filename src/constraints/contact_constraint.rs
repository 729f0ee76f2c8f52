use super::{BodyPair, Constraint, Position, SingularMass, SolverData};
use crate::collision::ContactManifold;
use crate::math::{Rot, Vec2};

/// Solver state for one manifold point.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
struct ContactPoint {
    /// Contact point relative to each center of mass, in body frames.
    local_a: Vec2,
    local_b: Vec2,
    initial_separation: f64,

    r_a: Vec2,
    r_b: Vec2,
    normal_mass: f64,
    tangent_mass: f64,
    velocity_bias: f64,
    normal_impulse: f64,
    tangent_impulse: f64,
}

/// Non-penetration plus Coulomb friction for one manifold.
#[derive(Debug, Clone, PartialEq)]
pub struct ContactConstraint {
    /// Position of the manifold in the list supplied for the step.
    pub(crate) manifold_index: usize,
    pub(crate) bodies: BodyPair,
    friction: f64,
    restitution: f64,
    restitution_threshold: f64,
    normal: Vec2,
    /// Normal in the frame of body A, for position correction.
    local_normal: Vec2,
    points: Vec<ContactPoint>,
}

impl ContactConstraint {
    /// The manifold must already have passed validation.
    pub(crate) fn new(
        manifold_index: usize,
        manifold: &ContactManifold,
        friction: f64,
        restitution: f64,
    ) -> Self {
        let points = manifold
            .points
            .iter()
            .map(|p| ContactPoint {
                initial_separation: p.separation,
                normal_impulse: p.normal_impulse,
                tangent_impulse: p.tangent_impulse,
                ..Default::default()
            })
            .collect();
        Self {
            manifold_index,
            bodies: BodyPair::default(),
            friction,
            restitution,
            restitution_threshold: 0.0,
            normal: manifold.normal.normalize(),
            local_normal: Vec2::ZERO,
            points,
        }
    }

    pub fn friction(&self) -> f64 {
        self.friction
    }

    pub fn restitution(&self) -> f64 {
        self.restitution
    }

    /// Accumulated (normal, tangent) impulses per point.
    pub fn impulses(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.points.iter().map(|p| (p.normal_impulse, p.tangent_impulse))
    }

    /// Writes accumulated impulses back into the manifold.
    pub(crate) fn store_impulses(&self, manifold: &mut ContactManifold) {
        for (out, point) in manifold.points.iter_mut().zip(&self.points) {
            out.normal_impulse = point.normal_impulse;
            out.tangent_impulse = point.tangent_impulse;
        }
    }

    /// Captures world contact points in both body frames. Called once per
    /// step before any solver pass moves the bodies.
    pub(crate) fn capture_anchors(&mut self, manifold: &ContactManifold, positions: &[Position]) {
        let b = self.bodies;
        let pa = positions[b.index_a];
        let pb = positions[b.index_b];
        let (q_a, q_b) = (Rot::new(pa.a), Rot::new(pb.a));
        self.local_normal = q_a.apply_inverse(self.normal);
        for (point, source) in self.points.iter_mut().zip(&manifold.points) {
            point.local_a = q_a.apply_inverse(source.point - pa.c);
            point.local_b = q_b.apply_inverse(source.point - pb.c);
        }
    }

    fn apply(&self, data: &mut SolverData, r_a: Vec2, r_b: Vec2, p: Vec2) {
        let b = self.bodies;
        let va = &mut data.velocities[b.index_a];
        va.v -= p * b.inv_mass_a;
        va.w -= b.inv_i_a * r_a.cross(p);
        let vb = &mut data.velocities[b.index_b];
        vb.v += p * b.inv_mass_b;
        vb.w += b.inv_i_b * r_b.cross(p);
    }

    fn relative_velocity(data: &SolverData, b: &BodyPair, r_a: Vec2, r_b: Vec2) -> Vec2 {
        let va = data.velocities[b.index_a];
        let vb = data.velocities[b.index_b];
        vb.v + Vec2::scalar_cross(vb.w, r_b) - va.v - Vec2::scalar_cross(va.w, r_a)
    }
}

impl Constraint for ContactConstraint {
    fn init_velocity_constraints(&mut self, data: &SolverData) -> Result<(), SingularMass> {
        self.bodies.load(data.bodies);
        self.restitution_threshold = data.config.restitution_threshold;
        let b = self.bodies;
        let pa = data.positions[b.index_a];
        let pb = data.positions[b.index_b];
        let (q_a, q_b) = (Rot::new(pa.a), Rot::new(pb.a));
        let normal = self.normal;
        let tangent = normal.cross_scalar(1.0);

        for i in 0..self.points.len() {
            let point = self.points[i];
            let r_a = q_a.apply(point.local_a);
            let r_b = q_b.apply(point.local_b);

            let rn_a = r_a.cross(normal);
            let rn_b = r_b.cross(normal);
            let k_normal = b.inv_mass_a + b.inv_mass_b + b.inv_i_a * rn_a * rn_a + b.inv_i_b * rn_b * rn_b;
            if k_normal <= 0.0 {
                return Err(SingularMass);
            }

            let rt_a = r_a.cross(tangent);
            let rt_b = r_b.cross(tangent);
            let k_tangent = b.inv_mass_a + b.inv_mass_b + b.inv_i_a * rt_a * rt_a + b.inv_i_b * rt_b * rt_b;

            // An open gap may close within the step: allow approach up to
            // separation / dt. Bounce only on a real approach, not on
            // resting jitter.
            let v_rel = normal.dot(Self::relative_velocity(data, &b, r_a, r_b));
            let velocity_bias = if point.initial_separation > 0.0 {
                -point.initial_separation * data.step.inv_dt
            } else if v_rel < -self.restitution_threshold {
                -self.restitution * v_rel
            } else {
                0.0
            };

            let point = &mut self.points[i];
            point.r_a = r_a;
            point.r_b = r_b;
            point.normal_mass = 1.0 / k_normal;
            point.tangent_mass = if k_tangent > 0.0 { 1.0 / k_tangent } else { 0.0 };
            point.velocity_bias = velocity_bias;
        }
        Ok(())
    }

    fn warm_start(&mut self, data: &mut SolverData) {
        if !data.step.warm_starting {
            for point in &mut self.points {
                point.normal_impulse = 0.0;
                point.tangent_impulse = 0.0;
            }
            return;
        }
        let tangent = self.normal.cross_scalar(1.0);
        for i in 0..self.points.len() {
            let point = &mut self.points[i];
            point.normal_impulse *= data.step.dt_ratio;
            point.tangent_impulse *= data.step.dt_ratio;
            let point = self.points[i];
            let p = self.normal * point.normal_impulse + tangent * point.tangent_impulse;
            self.apply(data, point.r_a, point.r_b, p);
        }
    }

    fn solve_velocity_constraints(&mut self, data: &mut SolverData) {
        let b = self.bodies;
        let normal = self.normal;
        let tangent = normal.cross_scalar(1.0);

        // Friction first: normal impulses are more important to end up correct.
        for i in 0..self.points.len() {
            let point = self.points[i];
            let dv = Self::relative_velocity(data, &b, point.r_a, point.r_b);
            let lambda = -point.tangent_mass * dv.dot(tangent);
            let max_friction = self.friction * point.normal_impulse;
            let new_impulse = (point.tangent_impulse + lambda).clamp(-max_friction, max_friction);
            let lambda = new_impulse - point.tangent_impulse;
            self.points[i].tangent_impulse = new_impulse;
            self.apply(data, point.r_a, point.r_b, tangent * lambda);
        }

        for i in 0..self.points.len() {
            let point = self.points[i];
            let dv = Self::relative_velocity(data, &b, point.r_a, point.r_b);
            let vn = dv.dot(normal);
            let lambda = -point.normal_mass * (vn - point.velocity_bias);
            let new_impulse = (point.normal_impulse + lambda).max(0.0);
            let lambda = new_impulse - point.normal_impulse;
            self.points[i].normal_impulse = new_impulse;
            self.apply(data, point.r_a, point.r_b, normal * lambda);
        }
    }

    fn solve_position_constraints(&mut self, data: &mut SolverData) -> bool {
        let b = self.bodies;
        let config = data.config;
        let mut min_separation: f64 = 0.0;

        for point in &self.points {
            let mut pa = data.positions[b.index_a];
            let mut pb = data.positions[b.index_b];
            let (q_a, q_b) = (Rot::new(pa.a), Rot::new(pb.a));

            let normal = q_a.apply(self.local_normal);
            let anchor_a = pa.c + q_a.apply(point.local_a);
            let anchor_b = pb.c + q_b.apply(point.local_b);
            let separation = point.initial_separation + (anchor_b - anchor_a).dot(normal);
            let contact = (anchor_a + anchor_b) * 0.5;
            let r_a = contact - pa.c;
            let r_b = contact - pb.c;

            min_separation = min_separation.min(separation);

            // Leave `linear_slop` of overlap so contacts do not jitter.
            let c = (config.baumgarte * (separation + config.linear_slop))
                .clamp(-config.max_linear_correction, 0.0);

            let rn_a = r_a.cross(normal);
            let rn_b = r_b.cross(normal);
            let k = b.inv_mass_a + b.inv_mass_b + b.inv_i_a * rn_a * rn_a + b.inv_i_b * rn_b * rn_b;
            let impulse = if k > 0.0 { -c / k } else { 0.0 };
            let p = normal * impulse;

            pa.c -= p * b.inv_mass_a;
            pa.a -= b.inv_i_a * r_a.cross(p);
            pb.c += p * b.inv_mass_b;
            pb.a += b.inv_i_b * r_b.cross(p);
            data.positions[b.index_a] = pa;
            data.positions[b.index_b] = pb;
        }

        min_separation >= -3.0 * config.linear_slop
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{Material, SolverConfig};
    use crate::constraints::{Position, SolverBody, TimeStep, Velocity};
    use crate::objects::BodyHandle;
    use approx::assert_abs_diff_eq;

    fn body(inv_mass: f64, inv_inertia: f64) -> SolverBody {
        SolverBody {
            inv_mass,
            inv_inertia,
            ..SolverBody::GROUND
        }
    }

    fn ground_contact(separation: f64) -> (ContactManifold, ContactConstraint) {
        let handle = |index| BodyHandle {
            index,
            generation: 0,
        };
        let manifold =
            ContactManifold::new(handle(0), handle(1), Vec2::Y).with_point(Vec2::ZERO, separation, 0);
        let ground = Material::new(0.0, 0.5);
        let ball = Material::new(0.0, 0.5);
        let mut constraint = ContactConstraint::new(
            0,
            &manifold,
            Material::mix_friction(&ground, &ball),
            Material::mix_restitution(&ground, &ball),
        );
        constraint.bodies.bind(0, 1);
        (manifold, constraint)
    }

    #[test]
    fn test_normal_impulse_stops_approach_and_never_pulls() {
        let config = SolverConfig::default();
        let bodies = [SolverBody::GROUND, body(1.0, 0.0)];
        let mut positions = [Position::default(), Position { c: Vec2::new(0.0, 0.5), a: 0.0 }];
        let mut velocities = [Velocity::default(), Velocity { v: Vec2::new(0.0, -0.5), w: 0.0 }];
        let (manifold, mut contact) = ground_contact(0.0);

        let mut data = SolverData {
            step: TimeStep::new(1.0 / 60.0, 0.0, true),
            config: &config,
            bodies: &bodies,
            positions: &mut positions,
            velocities: &mut velocities,
        };
        contact.capture_anchors(&manifold, data.positions);
        contact.init_velocity_constraints(&data).unwrap();
        contact.warm_start(&mut data);
        for _ in 0..4 {
            contact.solve_velocity_constraints(&mut data);
        }
        assert_abs_diff_eq!(data.velocities[1].v.y, 0.0, epsilon = 1e-12);
        let (normal, _) = contact.impulses().next().unwrap();
        assert_abs_diff_eq!(normal, 0.5, epsilon = 1e-12);

        // Separating bodies are left alone.
        data.velocities[1].v = Vec2::new(0.0, 2.0);
        let mut separating = ground_contact(0.0).1;
        separating.capture_anchors(&manifold, data.positions);
        separating.init_velocity_constraints(&data).unwrap();
        separating.solve_velocity_constraints(&mut data);
        assert_abs_diff_eq!(data.velocities[1].v.y, 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_friction_is_bounded_by_normal_impulse() {
        let config = SolverConfig::default();
        let bodies = [SolverBody::GROUND, body(1.0, 0.0)];
        let mut positions = [Position::default(), Position { c: Vec2::new(0.0, 0.5), a: 0.0 }];
        let mut velocities = [Velocity::default(), Velocity { v: Vec2::new(5.0, -1.0), w: 0.0 }];
        let (manifold, mut contact) = ground_contact(0.0);

        let mut data = SolverData {
            step: TimeStep::new(1.0 / 60.0, 0.0, true),
            config: &config,
            bodies: &bodies,
            positions: &mut positions,
            velocities: &mut velocities,
        };
        contact.capture_anchors(&manifold, data.positions);
        contact.init_velocity_constraints(&data).unwrap();
        for _ in 0..8 {
            contact.solve_velocity_constraints(&mut data);
        }
        let (normal, tangent) = contact.impulses().next().unwrap();
        assert!(tangent.abs() <= contact.friction() * normal + 1e-12);
        // Friction of 0.5 over a normal impulse of 1 removes 0.5 of sliding speed
        assert_abs_diff_eq!(data.velocities[1].v.x, 4.5, epsilon = 1e-9);
    }

    #[test]
    fn test_position_correction_pushes_out_penetration() {
        let config = SolverConfig::default();
        let bodies = [SolverBody::GROUND, body(1.0, 0.0)];
        let mut positions = [Position::default(), Position { c: Vec2::new(0.0, 0.4), a: 0.0 }];
        let mut velocities = [Velocity::default(), Velocity::default()];
        let (manifold, mut contact) = ground_contact(-0.1);

        let mut data = SolverData {
            step: TimeStep::new(1.0 / 60.0, 0.0, true),
            config: &config,
            bodies: &bodies,
            positions: &mut positions,
            velocities: &mut velocities,
        };
        contact.capture_anchors(&manifold, data.positions);
        contact.init_velocity_constraints(&data).unwrap();
        assert!(!contact.solve_position_constraints(&mut data));
        // 0.2 * (-0.1 + 0.005) of correction
        assert_abs_diff_eq!(data.positions[1].c.y, 0.4 + 0.019, epsilon = 1e-12);
        for _ in 0..40 {
            contact.solve_position_constraints(&mut data);
        }
        assert!(contact.solve_position_constraints(&mut data));
    }

    #[test]
    fn test_open_gap_allows_approach_until_closed() {
        let config = SolverConfig::default();
        let bodies = [SolverBody::GROUND, body(1.0, 0.0)];
        let mut positions = [Position::default(), Position { c: Vec2::new(0.0, 0.58), a: 0.0 }];
        let mut velocities = [Velocity::default(), Velocity { v: Vec2::new(0.0, -10.0), w: 0.0 }];
        let (manifold, mut contact) = ground_contact(0.08);

        let mut data = SolverData {
            step: TimeStep::new(1.0 / 60.0, 0.0, true),
            config: &config,
            bodies: &bodies,
            positions: &mut positions,
            velocities: &mut velocities,
        };
        contact.capture_anchors(&manifold, data.positions);
        contact.init_velocity_constraints(&data).unwrap();
        for _ in 0..4 {
            contact.solve_velocity_constraints(&mut data);
        }
        // Exactly fast enough to close the 8 cm gap in one step
        assert_abs_diff_eq!(data.velocities[1].v.y, -0.08 * 60.0, epsilon = 1e-9);

        // A slow approach is not touched
        data.velocities[1].v = Vec2::new(0.0, -1.0);
        let mut slow = ground_contact(0.08).1;
        slow.capture_anchors(&manifold, data.positions);
        slow.init_velocity_constraints(&data).unwrap();
        slow.solve_velocity_constraints(&mut data);
        assert_abs_diff_eq!(data.velocities[1].v.y, -1.0, epsilon = 1e-12);
        assert_eq!(slow.impulses().next().unwrap().0, 0.0);
    }
}
