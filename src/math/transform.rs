use super::vec2::Vec2;
use serde::{Deserialize, Serialize};

/// A rotation stored as its sine and cosine, so repeated application
/// inside the solver does not recompute trigonometry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rot {
    pub s: f64,
    pub c: f64,
}

impl Rot {
    pub const IDENTITY: Rot = Rot { s: 0.0, c: 1.0 };

    pub fn new(angle: f64) -> Self {
        let (s, c) = angle.sin_cos();
        Self { s, c }
    }

    /// Rotates a vector.
    pub fn apply(self, v: Vec2) -> Vec2 {
        Vec2::new(self.c * v.x - self.s * v.y, self.s * v.x + self.c * v.y)
    }

    /// Inverse-rotates a vector.
    pub fn apply_inverse(self, v: Vec2) -> Vec2 {
        Vec2::new(self.c * v.x + self.s * v.y, -self.s * v.x + self.c * v.y)
    }

    pub fn angle(self) -> f64 {
        self.s.atan2(self.c)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Transform {
    pub position: Vec2,
    pub rotation: f64, // Angle in radians
}

impl Transform {
    /// Creates a new transform.
    pub fn new(position: Vec2, rotation: f64) -> Self {
        Self { position, rotation }
    }

    /// Creates an identity transform (no translation, no rotation).
    pub fn identity() -> Self {
        Self {
            position: Vec2::ZERO,
            rotation: 0.0,
        }
    }

    pub fn rot(self) -> Rot {
        Rot::new(self.rotation)
    }

    /// Applies the transform (rotation then translation) to a point.
    pub fn apply(self, point: Vec2) -> Vec2 {
        self.rot().apply(point) + self.position
    }

    /// Applies the inverse transform (inverse translation then inverse rotation) to a point.
    pub fn apply_inverse(self, point: Vec2) -> Vec2 {
        self.rot().apply_inverse(point - self.position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::f64::consts::PI;
    const EPSILON: f64 = 1e-10;

    #[test]
    fn test_transform_apply_combined() {
        // Rotation of (1,0) -> (0,1), then translation -> (10, 6)
        let t = Transform::new(Vec2::new(10.0, 5.0), PI / 2.0);
        let tp = t.apply(Vec2::new(1.0, 0.0));
        assert_abs_diff_eq!(tp.x, 10.0, epsilon = EPSILON);
        assert_abs_diff_eq!(tp.y, 6.0, epsilon = EPSILON);
    }

    #[test]
    fn test_transform_apply_inverse_round_trip() {
        let t = Transform::new(Vec2::new(10.0, 5.0), PI / 4.0);
        let p_local = Vec2::new(1.0, 1.0);
        let back = t.apply_inverse(t.apply(p_local));
        assert_abs_diff_eq!(back.x, p_local.x, epsilon = EPSILON);
        assert_abs_diff_eq!(back.y, p_local.y, epsilon = EPSILON);
    }

    #[test]
    fn test_transform_identity() {
        let p = Vec2::new(5.0, -3.0);
        assert_eq!(Transform::identity().apply(p), p);
        assert_eq!(Transform::identity().apply_inverse(p), p);
    }

    #[test]
    fn test_rot_matches_vec2_rotate() {
        let angle = 0.7;
        let v = Vec2::new(2.0, -1.0);
        let a = Rot::new(angle).apply(v);
        let b = v.rotate(angle);
        assert_abs_diff_eq!(a.x, b.x, epsilon = EPSILON);
        assert_abs_diff_eq!(a.y, b.y, epsilon = EPSILON);
        assert_abs_diff_eq!(Rot::new(angle).angle(), angle, epsilon = EPSILON);

        let back = Rot::new(angle).apply_inverse(a);
        assert_abs_diff_eq!(back.x, v.x, epsilon = EPSILON);
        assert_abs_diff_eq!(back.y, v.y, epsilon = EPSILON);
    }
}
