use crate::common::SolverConfig;
use crate::constraints::{Position, SolverBody, Velocity};
use crate::math::Vec2;

/// First half of semi-implicit Euler: gravity and accumulated force/torque
/// into velocity, followed by damping.
pub fn integrate_velocity(body: &SolverBody, velocity: &mut Velocity, gravity: Vec2, dt: f64) {
    if body.inv_mass == 0.0 {
        // Static object, do not integrate
        return;
    }

    // v = v + (g + F/m) * dt
    let linear_acceleration = gravity * body.gravity_scale + body.force * body.inv_mass;
    velocity.v += linear_acceleration * dt;
    // omega = omega + (T/I) * dt
    velocity.w += body.torque * body.inv_inertia * dt;

    // Pade approximation of exp(-damping * dt), stable for any dt
    velocity.v *= 1.0 / (1.0 + dt * body.linear_damping);
    velocity.w *= 1.0 / (1.0 + dt * body.angular_damping);
}

/// Second half of semi-implicit Euler: position from the solved velocity.
///
/// Motion per step is capped by `max_translation` and `max_rotation`; the
/// velocity is scaled down to match so the two stay consistent. Angles are
/// left unwrapped.
pub fn integrate_position(
    position: &mut Position,
    velocity: &mut Velocity,
    config: &SolverConfig,
    dt: f64,
) {
    let translation = velocity.v * dt;
    if translation.magnitude_squared() > config.max_translation * config.max_translation {
        velocity.v *= config.max_translation / translation.magnitude();
    }

    let rotation = velocity.w * dt;
    if rotation * rotation > config.max_rotation * config.max_rotation {
        velocity.w *= config.max_rotation / rotation.abs();
    }

    position.c += velocity.v * dt;
    position.a += velocity.w * dt;
}
