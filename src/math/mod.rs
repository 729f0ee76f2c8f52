pub mod matrix;
pub mod transform;
pub mod vec2;

pub use matrix::{Mat22, Mat33, Vec3};
pub use transform::{Rot, Transform};
pub use vec2::Vec2;
