use crate::math::vec2::Vec2;
use crate::objects::BodyHandle;
use serde::{Deserialize, Serialize};

/// Most points a single manifold may carry.
pub const MAX_MANIFOLD_POINTS: usize = 2;

/// One point of contact between two bodies, as reported by the narrow phase.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ManifoldPoint {
    /// Contact point in world coordinates.
    pub point: Vec2,
    /// Signed distance along the normal. Negative means penetration.
    pub separation: f64,
    /// Feature key used to match this point across steps for warm starting.
    pub id: u32,
    /// Accumulated normal impulse. Written by the solver.
    pub normal_impulse: f64,
    /// Accumulated friction impulse. Written by the solver.
    pub tangent_impulse: f64,
}

impl ManifoldPoint {
    pub fn new(point: Vec2, separation: f64, id: u32) -> Self {
        Self {
            point,
            separation,
            id,
            normal_impulse: 0.0,
            tangent_impulse: 0.0,
        }
    }
}

/// Contact information between a pair of bodies for one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactManifold {
    pub body_a: BodyHandle,
    pub body_b: BodyHandle,
    /// The collision normal, pointing from body A towards body B.
    pub normal: Vec2,
    pub points: Vec<ManifoldPoint>,
}

impl ContactManifold {
    pub fn new(body_a: BodyHandle, body_b: BodyHandle, normal: Vec2) -> Self {
        Self {
            body_a,
            body_b,
            normal,
            points: Vec::with_capacity(MAX_MANIFOLD_POINTS),
        }
    }

    pub fn with_point(mut self, point: Vec2, separation: f64, id: u32) -> Self {
        self.points.push(ManifoldPoint::new(point, separation, id));
        self
    }

    /// Deepest penetration in the manifold (most negative separation).
    pub fn min_separation(&self) -> f64 {
        self.points
            .iter()
            .map(|p| p.separation)
            .fold(f64::INFINITY, f64::min)
    }

    /// Checks the numeric shape of the manifold. Geometry is trusted.
    ///
    /// Returns the reason for rejection on failure.
    pub(crate) fn check(&self) -> Result<(), String> {
        if self.body_a == self.body_b {
            return Err("manifold references the same body twice".to_string());
        }
        if self.points.is_empty() {
            return Err("manifold has no points".to_string());
        }
        if self.points.len() > MAX_MANIFOLD_POINTS {
            return Err(format!(
                "manifold has {} points, at most {MAX_MANIFOLD_POINTS} are supported",
                self.points.len()
            ));
        }
        if !self.normal.is_finite() {
            return Err(format!("non-finite normal {:?}", self.normal));
        }
        let (_, length) = self.normal.normalize_with_length();
        if length == 0.0 {
            return Err("zero-length normal".to_string());
        }
        for p in &self.points {
            if !p.point.is_finite()
                || !p.separation.is_finite()
                || !p.normal_impulse.is_finite()
                || !p.tangent_impulse.is_finite()
            {
                return Err(format!("non-finite data in point {}", p.id));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(index: u32) -> BodyHandle {
        BodyHandle {
            index,
            generation: 0,
        }
    }

    fn manifold() -> ContactManifold {
        ContactManifold::new(handle(0), handle(1), Vec2::Y).with_point(Vec2::ZERO, -0.01, 0)
    }

    #[test]
    fn test_valid_manifold_passes() {
        assert!(manifold().check().is_ok());
        assert_eq!(manifold().min_separation(), -0.01);
    }

    #[test]
    fn test_rejects_same_body() {
        let m = ContactManifold::new(handle(3), handle(3), Vec2::Y).with_point(Vec2::ZERO, 0.0, 0);
        assert!(m.check().is_err());
    }

    #[test]
    fn test_rejects_point_count() {
        let empty = ContactManifold::new(handle(0), handle(1), Vec2::Y);
        assert!(empty.check().is_err());

        let too_many = manifold()
            .with_point(Vec2::X, 0.0, 1)
            .with_point(Vec2::Y, 0.0, 2);
        let reason = too_many.check().unwrap_err();
        assert!(reason.contains("3 points"));
    }

    #[test]
    fn test_rejects_bad_numbers() {
        let mut m = manifold();
        m.normal = Vec2::ZERO;
        assert!(m.check().is_err());

        let mut m = manifold();
        m.points[0].separation = f64::NAN;
        assert!(m.check().is_err());

        let mut m = manifold();
        m.normal = Vec2::new(f64::INFINITY, 0.0);
        assert!(m.check().is_err());
    }
}
