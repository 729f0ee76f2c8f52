use crate::common::error::{ensure_finite, ensure_finite_vec, invalid_config, Result};
use crate::common::Material;
use crate::math::{Rot, Transform, Vec2};
use serde::{Deserialize, Serialize};

/// Stable identity of a body inside a [`PhysicsWorld`](crate::world::PhysicsWorld).
///
/// The generation changes every time a slot is reused, so a handle to a
/// destroyed body never aliases a newer one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BodyHandle {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl BodyHandle {
    pub fn index(self) -> usize {
        self.index as usize
    }

    pub fn generation(self) -> u32 {
        self.generation
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BodyType {
    /// Infinite mass, never moves.
    Static,
    #[default]
    Dynamic,
}

/// Mass, rotational inertia about the center of mass, and the center of
/// mass relative to the body origin.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MassProperties {
    pub mass: f64,
    pub inertia: f64,
    pub local_center: Vec2,
}

impl MassProperties {
    pub fn new(mass: f64, inertia: f64) -> Self {
        Self {
            mass,
            inertia,
            local_center: Vec2::ZERO,
        }
    }

    /// Solid disc.
    pub fn circle(mass: f64, radius: f64) -> Self {
        Self::new(mass, 0.5 * mass * radius * radius)
    }

    /// Thin rod rotating about its midpoint.
    pub fn rod(mass: f64, length: f64) -> Self {
        Self::new(mass, (1.0 / 12.0) * mass * length * length)
    }

    /// Solid rectangle centered on the body origin.
    pub fn rectangle(mass: f64, width: f64, height: f64) -> Self {
        Self::new(mass, mass * (width * width + height * height) / 12.0)
    }

    pub fn with_local_center(mut self, local_center: Vec2) -> Self {
        self.local_center = local_center;
        self
    }
}

impl Default for MassProperties {
    fn default() -> Self {
        Self::circle(1.0, 0.5)
    }
}

/// Plain description of a body, validated by `PhysicsWorld::create_body`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BodyDef {
    pub body_type: BodyType,
    /// World position of the body origin
    pub position: Vec2,
    pub angle: f64,
    pub linear_velocity: Vec2,
    pub angular_velocity: f64,
    pub mass: MassProperties,
    pub material: Material,
    pub linear_damping: f64,
    pub angular_damping: f64,
    pub gravity_scale: f64,
    pub fixed_rotation: bool,
    pub user_data: u64,
}

impl Default for BodyDef {
    fn default() -> Self {
        Self {
            body_type: BodyType::Dynamic,
            position: Vec2::ZERO,
            angle: 0.0,
            linear_velocity: Vec2::ZERO,
            angular_velocity: 0.0,
            mass: MassProperties::default(),
            material: Material::default(),
            linear_damping: 0.0,
            angular_damping: 0.0,
            gravity_scale: 1.0,
            fixed_rotation: false,
            user_data: 0,
        }
    }
}

impl BodyDef {
    /// A dynamic body at `position` with the given mass properties.
    pub fn dynamic(position: Vec2, mass: MassProperties) -> Self {
        Self {
            position,
            mass,
            ..Default::default()
        }
    }

    /// A static body at `position`.
    pub fn new_static(position: Vec2) -> Self {
        Self {
            body_type: BodyType::Static,
            position,
            ..Default::default()
        }
    }

    pub fn with_angle(mut self, angle: f64) -> Self {
        self.angle = angle;
        self
    }

    pub fn with_velocity(mut self, linear: Vec2, angular: f64) -> Self {
        self.linear_velocity = linear;
        self.angular_velocity = angular;
        self
    }

    pub fn with_material(mut self, material: Material) -> Self {
        self.material = material;
        self
    }

    pub fn with_damping(mut self, linear: f64, angular: f64) -> Self {
        self.linear_damping = linear;
        self.angular_damping = angular;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !self.position.is_finite() || !self.angle.is_finite() {
            return Err(invalid_config("body transform must be finite"));
        }
        if !self.linear_velocity.is_finite() || !self.angular_velocity.is_finite() {
            return Err(invalid_config("body velocity must be finite"));
        }
        if !self.material.is_valid() {
            return Err(invalid_config(format!(
                "material out of range: {:?}",
                self.material
            )));
        }
        for (name, value) in [
            ("linear_damping", self.linear_damping),
            ("angular_damping", self.angular_damping),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(invalid_config(format!("{name} must be non-negative, got {value}")));
            }
        }
        if !self.gravity_scale.is_finite() {
            return Err(invalid_config("gravity_scale must be finite"));
        }
        if self.body_type == BodyType::Dynamic {
            let mass = &self.mass;
            if !(mass.mass.is_finite() && mass.mass > 0.0) {
                return Err(invalid_config(format!(
                    "dynamic body mass must be positive, got {}",
                    mass.mass
                )));
            }
            if !(mass.inertia.is_finite() && mass.inertia >= 0.0) {
                return Err(invalid_config(format!(
                    "rotational inertia must be non-negative, got {}",
                    mass.inertia
                )));
            }
            if !mass.local_center.is_finite() {
                return Err(invalid_config("center of mass must be finite"));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RigidBody {
    handle: BodyHandle,
    body_type: BodyType,
    fixed_rotation: bool,

    // Primary state
    position: Vec2, // World position of the body origin
    angle: f64,     // Radians
    linear_velocity: Vec2,
    angular_velocity: f64, // Radians per second

    // Accumulators for forces/torques applied during a time step
    force: Vec2,
    torque: f64,

    // Physical properties
    mass: f64,
    inv_mass: f64, // 1.0 / mass (0.0 for static)
    inertia: f64,  // About the center of mass
    inv_inertia: f64,
    local_center: Vec2,

    pub material: Material,
    pub linear_damping: f64,
    pub angular_damping: f64,
    pub gravity_scale: f64,
    pub user_data: u64,
}

impl RigidBody {
    /// Builds a body from a definition that has already passed validation.
    pub(crate) fn from_def(handle: BodyHandle, def: &BodyDef) -> Self {
        let (mass, inv_mass, inertia, inv_inertia, local_center) = match def.body_type {
            BodyType::Static => (0.0, 0.0, f64::INFINITY, 0.0, Vec2::ZERO),
            BodyType::Dynamic => {
                let props = def.mass;
                let inv_inertia = if def.fixed_rotation || props.inertia <= 0.0 {
                    0.0
                } else {
                    1.0 / props.inertia
                };
                (
                    props.mass,
                    1.0 / props.mass,
                    props.inertia,
                    inv_inertia,
                    props.local_center,
                )
            }
        };
        let (linear_velocity, angular_velocity) = match def.body_type {
            BodyType::Static => (Vec2::ZERO, 0.0),
            BodyType::Dynamic => (def.linear_velocity, def.angular_velocity),
        };

        Self {
            handle,
            body_type: def.body_type,
            fixed_rotation: def.fixed_rotation,
            position: def.position,
            angle: def.angle,
            linear_velocity,
            angular_velocity,
            force: Vec2::ZERO,
            torque: 0.0,
            mass,
            inv_mass,
            inertia,
            inv_inertia,
            local_center,
            material: def.material,
            linear_damping: def.linear_damping,
            angular_damping: def.angular_damping,
            gravity_scale: def.gravity_scale,
            user_data: def.user_data,
        }
    }

    pub fn handle(&self) -> BodyHandle {
        self.handle
    }

    pub fn body_type(&self) -> BodyType {
        self.body_type
    }

    pub fn is_static(&self) -> bool {
        self.body_type == BodyType::Static
    }

    pub fn is_fixed_rotation(&self) -> bool {
        self.fixed_rotation
    }

    /// World position of the body origin.
    pub fn position(&self) -> Vec2 {
        self.position
    }

    pub fn angle(&self) -> f64 {
        self.angle
    }

    pub fn transform(&self) -> Transform {
        Transform::new(self.position, self.angle)
    }

    pub fn linear_velocity(&self) -> Vec2 {
        self.linear_velocity
    }

    pub fn angular_velocity(&self) -> f64 {
        self.angular_velocity
    }

    pub fn force(&self) -> Vec2 {
        self.force
    }

    pub fn torque(&self) -> f64 {
        self.torque
    }

    pub fn mass(&self) -> f64 {
        self.mass
    }

    pub fn inv_mass(&self) -> f64 {
        self.inv_mass
    }

    pub fn inertia(&self) -> f64 {
        self.inertia
    }

    pub fn inv_inertia(&self) -> f64 {
        self.inv_inertia
    }

    pub fn local_center(&self) -> Vec2 {
        self.local_center
    }

    /// World position of the center of mass.
    pub fn world_center(&self) -> Vec2 {
        self.position + Rot::new(self.angle).apply(self.local_center)
    }

    /// Converts a point in the body frame to world coordinates.
    pub fn world_point(&self, local_point: Vec2) -> Vec2 {
        self.transform().apply(local_point)
    }

    /// Converts a world point to the body frame.
    pub fn local_point(&self, world_point: Vec2) -> Vec2 {
        self.transform().apply_inverse(world_point)
    }

    pub fn world_vector(&self, local_vector: Vec2) -> Vec2 {
        Rot::new(self.angle).apply(local_vector)
    }

    pub fn local_vector(&self, world_vector: Vec2) -> Vec2 {
        Rot::new(self.angle).apply_inverse(world_vector)
    }

    /// Velocity of the material point currently at `world_point`.
    pub fn linear_velocity_at_point(&self, world_point: Vec2) -> Vec2 {
        self.linear_velocity
            + Vec2::scalar_cross(self.angular_velocity, world_point - self.world_center())
    }

    pub fn linear_momentum(&self) -> Vec2 {
        self.linear_velocity * self.mass
    }

    /// Angular momentum about the world point `about`.
    pub fn angular_momentum(&self, about: Vec2) -> f64 {
        if self.is_static() {
            return 0.0;
        }
        self.mass * (self.world_center() - about).cross(self.linear_velocity)
            + self.inertia * self.angular_velocity
    }

    pub fn kinetic_energy(&self) -> f64 {
        if self.is_static() {
            return 0.0;
        }
        0.5 * self.mass * self.linear_velocity.magnitude_squared()
            + 0.5 * self.inertia * self.angular_velocity * self.angular_velocity
    }

    /// Applies a force at a world point, generating torque about the center
    /// of mass. Accumulates until the end of the next step.
    pub fn apply_force(&mut self, force: Vec2, world_point: Vec2) -> Result<()> {
        ensure_finite_vec(force, "force")?;
        ensure_finite_vec(world_point, "force application point")?;
        if self.is_static() {
            return Ok(());
        }
        self.force += force;
        self.torque += (world_point - self.world_center()).cross(force);
        Ok(())
    }

    /// Applies a force at the center of mass.
    pub fn apply_force_to_center(&mut self, force: Vec2) -> Result<()> {
        ensure_finite_vec(force, "force")?;
        if self.is_static() {
            return Ok(());
        }
        self.force += force;
        Ok(())
    }

    pub fn apply_torque(&mut self, torque: f64) -> Result<()> {
        ensure_finite(torque, "torque")?;
        if self.is_static() {
            return Ok(());
        }
        self.torque += torque;
        Ok(())
    }

    /// Applies an impulse at a world point. Changes velocity immediately.
    pub fn apply_impulse(&mut self, impulse: Vec2, world_point: Vec2) -> Result<()> {
        ensure_finite_vec(impulse, "impulse")?;
        ensure_finite_vec(world_point, "impulse application point")?;
        if self.is_static() {
            return Ok(());
        }
        self.linear_velocity += impulse * self.inv_mass;
        self.angular_velocity +=
            self.inv_inertia * (world_point - self.world_center()).cross(impulse);
        Ok(())
    }

    pub fn apply_angular_impulse(&mut self, impulse: f64) -> Result<()> {
        ensure_finite(impulse, "angular impulse")?;
        if self.is_static() {
            return Ok(());
        }
        self.angular_velocity += self.inv_inertia * impulse;
        Ok(())
    }

    /// Teleports the body origin. Velocities are kept.
    pub fn set_transform(&mut self, position: Vec2, angle: f64) -> Result<()> {
        ensure_finite_vec(position, "position")?;
        ensure_finite(angle, "angle")?;
        self.position = position;
        self.angle = angle;
        Ok(())
    }

    pub fn set_linear_velocity(&mut self, velocity: Vec2) -> Result<()> {
        ensure_finite_vec(velocity, "linear velocity")?;
        if !self.is_static() {
            self.linear_velocity = velocity;
        }
        Ok(())
    }

    pub fn set_angular_velocity(&mut self, velocity: f64) -> Result<()> {
        ensure_finite(velocity, "angular velocity")?;
        if !self.is_static() && !self.fixed_rotation {
            self.angular_velocity = velocity;
        }
        Ok(())
    }

    /// Called at the end of every step.
    pub fn clear_forces(&mut self) {
        self.force = Vec2::ZERO;
        self.torque = 0.0;
    }

    /// Stops the body and drops pending forces.
    pub(crate) fn reset_motion(&mut self) {
        self.linear_velocity = Vec2::ZERO;
        self.angular_velocity = 0.0;
        self.clear_forces();
    }

    /// Writes solver results back. `center` is the world center of mass.
    pub(crate) fn store_solver_state(&mut self, center: Vec2, angle: f64, v: Vec2, w: f64) {
        self.angle = angle;
        self.position = center - Rot::new(angle).apply(self.local_center);
        self.linear_velocity = v;
        self.angular_velocity = w;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::PhysicsError;
    use approx::assert_abs_diff_eq;
    use std::f64::consts::PI;
    const EPSILON: f64 = 1e-10;

    fn handle() -> BodyHandle {
        BodyHandle {
            index: 0,
            generation: 0,
        }
    }

    fn dynamic(mass: MassProperties) -> RigidBody {
        RigidBody::from_def(handle(), &BodyDef::dynamic(Vec2::ZERO, mass))
    }

    #[test]
    fn test_mass_properties_shapes() {
        let circle = MassProperties::circle(10.0, 2.0);
        assert_abs_diff_eq!(circle.inertia, 20.0, epsilon = EPSILON);
        let rod = MassProperties::rod(12.0, 4.0);
        assert_abs_diff_eq!(rod.inertia, 16.0, epsilon = EPSILON);
        let square = MassProperties::rectangle(2.0, 1.0, 1.0);
        assert_abs_diff_eq!(square.inertia, 1.0 / 3.0, epsilon = EPSILON);
    }

    #[test]
    fn test_rigidbody_dynamic_inverse_values() {
        let rb = dynamic(MassProperties::circle(10.0, 2.0));
        assert_eq!(rb.mass(), 10.0);
        assert_abs_diff_eq!(rb.inv_mass(), 0.1, epsilon = EPSILON);
        assert_abs_diff_eq!(rb.inv_inertia(), 1.0 / 20.0, epsilon = EPSILON);
        assert!(!rb.is_static());
    }

    #[test]
    fn test_rigidbody_static() {
        let rb = RigidBody::from_def(
            handle(),
            &BodyDef::new_static(Vec2::new(1.0, 2.0))
                .with_angle(0.5)
                .with_velocity(Vec2::new(3.0, 0.0), 1.0),
        );
        assert_eq!(rb.inv_mass(), 0.0);
        assert_eq!(rb.inv_inertia(), 0.0);
        assert!(rb.inertia().is_infinite());
        assert_eq!(rb.position(), Vec2::new(1.0, 2.0));
        assert_eq!(rb.angle(), 0.5);
        // Static bodies never carry velocity
        assert_eq!(rb.linear_velocity(), Vec2::ZERO);
        assert_eq!(rb.angular_velocity(), 0.0);
    }

    #[test]
    fn test_fixed_rotation_has_zero_inverse_inertia() {
        let def = BodyDef {
            fixed_rotation: true,
            ..BodyDef::dynamic(Vec2::ZERO, MassProperties::circle(1.0, 1.0))
        };
        let rb = RigidBody::from_def(handle(), &def);
        assert_eq!(rb.inv_inertia(), 0.0);
    }

    #[test]
    fn test_validate_rejects_bad_mass() {
        let negative = BodyDef::dynamic(Vec2::ZERO, MassProperties::new(-1.0, 1.0));
        assert!(matches!(
            negative.validate(),
            Err(PhysicsError::InvalidConfiguration(_))
        ));
        let zero = BodyDef::dynamic(Vec2::ZERO, MassProperties::new(0.0, 1.0));
        assert!(zero.validate().is_err());
        let bad_inertia = BodyDef::dynamic(Vec2::ZERO, MassProperties::new(1.0, -1.0));
        assert!(bad_inertia.validate().is_err());
        // Static bodies ignore mass entirely
        let mut stat = BodyDef::new_static(Vec2::ZERO);
        stat.mass = MassProperties::new(-5.0, -5.0);
        assert!(stat.validate().is_ok());
    }

    #[test]
    fn test_apply_force_at_point() {
        let mut rb = dynamic(MassProperties::circle(1.0, 1.0));
        rb.apply_force(Vec2::new(10.0, 0.0), Vec2::new(0.0, 1.0)).unwrap();
        assert_eq!(rb.force(), Vec2::new(10.0, 0.0));
        // r = (0,1), torque = r x F = -10
        assert_abs_diff_eq!(rb.torque(), -10.0, epsilon = EPSILON);

        rb.apply_force_to_center(Vec2::new(0.0, 5.0)).unwrap();
        assert_eq!(rb.force(), Vec2::new(10.0, 5.0));
        assert_abs_diff_eq!(rb.torque(), -10.0, epsilon = EPSILON);

        rb.clear_forces();
        assert_eq!(rb.force(), Vec2::ZERO);
        assert_eq!(rb.torque(), 0.0);
    }

    #[test]
    fn test_apply_force_rejects_non_finite() {
        let mut rb = dynamic(MassProperties::circle(1.0, 1.0));
        let err = rb.apply_force(Vec2::new(f64::NAN, 0.0), Vec2::ZERO);
        assert!(matches!(err, Err(PhysicsError::InvalidState(_))));
        assert_eq!(rb.force(), Vec2::ZERO);
        assert!(rb.set_transform(Vec2::new(f64::INFINITY, 0.0), 0.0).is_err());
        assert!(rb.set_angular_velocity(f64::NAN).is_err());
    }

    #[test]
    fn test_static_body_ignores_forces_and_impulses() {
        let mut rb = RigidBody::from_def(handle(), &BodyDef::new_static(Vec2::ZERO));
        rb.apply_force(Vec2::new(10.0, 10.0), Vec2::new(1.0, 0.0)).unwrap();
        rb.apply_impulse(Vec2::new(10.0, 10.0), Vec2::new(1.0, 0.0)).unwrap();
        rb.set_linear_velocity(Vec2::new(1.0, 0.0)).unwrap();
        assert_eq!(rb.force(), Vec2::ZERO);
        assert_eq!(rb.linear_velocity(), Vec2::ZERO);
        assert_eq!(rb.angular_velocity(), 0.0);
    }

    #[test]
    fn test_apply_impulse_changes_velocity() {
        let mut rb = dynamic(MassProperties::new(2.0, 0.5));
        rb.apply_impulse(Vec2::new(0.0, 4.0), Vec2::new(1.0, 0.0)).unwrap();
        assert_eq!(rb.linear_velocity(), Vec2::new(0.0, 2.0));
        // r x J = 1 * 4 = 4, w = 4 / 0.5
        assert_abs_diff_eq!(rb.angular_velocity(), 8.0, epsilon = EPSILON);
    }

    #[test]
    fn test_offset_center_of_mass() {
        let mass = MassProperties::circle(1.0, 1.0).with_local_center(Vec2::new(1.0, 0.0));
        let def = BodyDef::dynamic(Vec2::new(2.0, 0.0), mass).with_angle(PI / 2.0);
        let mut rb = RigidBody::from_def(handle(), &def);
        let center = rb.world_center();
        assert_abs_diff_eq!(center.x, 2.0, epsilon = EPSILON);
        assert_abs_diff_eq!(center.y, 1.0, epsilon = EPSILON);

        rb.store_solver_state(Vec2::new(5.0, 5.0), 0.0, Vec2::ZERO, 0.0);
        assert_abs_diff_eq!(rb.position().x, 4.0, epsilon = EPSILON);
        assert_abs_diff_eq!(rb.position().y, 5.0, epsilon = EPSILON);
    }

    #[test]
    fn test_local_world_point_round_trip() {
        let rb = RigidBody::from_def(
            handle(),
            &BodyDef::dynamic(Vec2::new(3.0, -1.0), MassProperties::default()).with_angle(0.3),
        );
        let p = Vec2::new(0.4, 1.2);
        let back = rb.local_point(rb.world_point(p));
        assert_abs_diff_eq!(back.x, p.x, epsilon = EPSILON);
        assert_abs_diff_eq!(back.y, p.y, epsilon = EPSILON);
    }

    #[test]
    fn test_momentum_and_energy() {
        let rb = RigidBody::from_def(
            handle(),
            &BodyDef::dynamic(Vec2::new(0.0, 1.0), MassProperties::new(2.0, 0.5))
                .with_velocity(Vec2::new(3.0, 0.0), 2.0),
        );
        assert_eq!(rb.linear_momentum(), Vec2::new(6.0, 0.0));
        // m * (r x v) + I w = 2 * (0*0 - 1*3) + 0.5 * 2
        assert_abs_diff_eq!(rb.angular_momentum(Vec2::ZERO), -5.0, epsilon = EPSILON);
        assert_abs_diff_eq!(rb.kinetic_energy(), 0.5 * 2.0 * 9.0 + 0.5 * 0.5 * 4.0, epsilon = EPSILON);
        let tip = rb.linear_velocity_at_point(Vec2::new(1.0, 1.0));
        assert_abs_diff_eq!(tip.x, 3.0, epsilon = EPSILON);
        assert_abs_diff_eq!(tip.y, 2.0, epsilon = EPSILON);
    }
}
