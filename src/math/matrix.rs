//! Small column-major matrices used to solve coupled constraint rows.

use super::vec2::Vec2;
use std::ops::{Add, Mul, Neg, Sub};

/// 3-component vector for the three-row weld constraint.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3 { x: 0.0, y: 0.0, z: 0.0 };

    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn dot(self, other: Self) -> f64 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    pub fn cross(self, other: Self) -> Self {
        Self::new(
            self.y * other.z - self.z * other.y,
            self.z * other.x - self.x * other.z,
            self.x * other.y - self.y * other.x,
        )
    }

    pub fn xy(self) -> Vec2 {
        Vec2::new(self.x, self.y)
    }
}

impl Add for Vec3 {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Vec3 {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Mul<f64> for Vec3 {
    type Output = Self;
    fn mul(self, s: f64) -> Self {
        Self::new(self.x * s, self.y * s, self.z * s)
    }
}

impl Neg for Vec3 {
    type Output = Self;
    fn neg(self) -> Self {
        Self::new(-self.x, -self.y, -self.z)
    }
}

/// 2x2 matrix stored as two columns.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Mat22 {
    pub ex: Vec2,
    pub ey: Vec2,
}

impl Mat22 {
    pub const fn from_columns(ex: Vec2, ey: Vec2) -> Self {
        Self { ex, ey }
    }

    pub fn determinant(&self) -> f64 {
        self.ex.x * self.ey.y - self.ey.x * self.ex.y
    }

    /// Solves `A * x = b`. Returns `None` when the matrix is singular.
    pub fn solve(&self, b: Vec2) -> Option<Vec2> {
        let det = self.determinant();
        if det == 0.0 || !det.is_finite() {
            return None;
        }
        let inv = 1.0 / det;
        Some(Vec2::new(
            inv * (self.ey.y * b.x - self.ey.x * b.y),
            inv * (self.ex.x * b.y - self.ex.y * b.x),
        ))
    }

    pub fn inverse(&self) -> Option<Mat22> {
        let det = self.determinant();
        if det == 0.0 || !det.is_finite() {
            return None;
        }
        let inv = 1.0 / det;
        Some(Mat22::from_columns(
            Vec2::new(inv * self.ey.y, -inv * self.ex.y),
            Vec2::new(-inv * self.ey.x, inv * self.ex.x),
        ))
    }
}

impl Mul<Vec2> for Mat22 {
    type Output = Vec2;
    fn mul(self, v: Vec2) -> Vec2 {
        Vec2::new(
            self.ex.x * v.x + self.ey.x * v.y,
            self.ex.y * v.x + self.ey.y * v.y,
        )
    }
}

/// 3x3 matrix stored as three columns.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Mat33 {
    pub ex: Vec3,
    pub ey: Vec3,
    pub ez: Vec3,
}

impl Mat33 {
    pub const fn from_columns(ex: Vec3, ey: Vec3, ez: Vec3) -> Self {
        Self { ex, ey, ez }
    }

    pub fn determinant(&self) -> f64 {
        self.ex.dot(self.ey.cross(self.ez))
    }

    /// Solves the full 3x3 system. Returns `None` when the matrix is singular.
    pub fn solve33(&self, b: Vec3) -> Option<Vec3> {
        let det = self.determinant();
        if det == 0.0 || !det.is_finite() {
            return None;
        }
        let inv = 1.0 / det;
        Some(Vec3::new(
            inv * b.dot(self.ey.cross(self.ez)),
            inv * self.ex.dot(b.cross(self.ez)),
            inv * self.ex.dot(self.ey.cross(b)),
        ))
    }

    /// Solves only the upper-left 2x2 block.
    pub fn solve22(&self, b: Vec2) -> Option<Vec2> {
        self.upper22().solve(b)
    }

    pub fn upper22(&self) -> Mat22 {
        Mat22::from_columns(self.ex.xy(), self.ey.xy())
    }

    /// Inverse of the upper-left 2x2 block, padded with zeros.
    pub fn inverse22(&self) -> Option<Mat33> {
        let inv = self.upper22().inverse()?;
        Some(Mat33::from_columns(
            Vec3::new(inv.ex.x, inv.ex.y, 0.0),
            Vec3::new(inv.ey.x, inv.ey.y, 0.0),
            Vec3::ZERO,
        ))
    }

    /// Inverse of a symmetric 3x3 matrix.
    pub fn sym_inverse33(&self) -> Option<Mat33> {
        let det = self.determinant();
        if det == 0.0 || !det.is_finite() {
            return None;
        }
        let inv = 1.0 / det;

        let a11 = self.ex.x;
        let a12 = self.ey.x;
        let a13 = self.ez.x;
        let a22 = self.ey.y;
        let a23 = self.ez.y;
        let a33 = self.ez.z;

        let ex = Vec3::new(
            inv * (a22 * a33 - a23 * a23),
            inv * (a13 * a23 - a12 * a33),
            inv * (a12 * a23 - a13 * a22),
        );
        let ey = Vec3::new(
            ex.y,
            inv * (a11 * a33 - a13 * a13),
            inv * (a13 * a12 - a11 * a23),
        );
        let ez = Vec3::new(ex.z, ey.z, inv * (a11 * a22 - a12 * a12));
        Some(Mat33::from_columns(ex, ey, ez))
    }

    /// Multiplies by the upper-left 2x2 block only.
    pub fn mul22(&self, v: Vec2) -> Vec2 {
        self.upper22() * v
    }
}

impl Mul<Vec3> for Mat33 {
    type Output = Vec3;
    fn mul(self, v: Vec3) -> Vec3 {
        self.ex * v.x + self.ey * v.y + self.ez * v.z
    }
}
