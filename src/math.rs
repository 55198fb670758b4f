use glam::{Quat, Vec3};
use std::f32::consts::{PI, TAU};

pub const SMALL_NUMBER: f32 = 1.0e-8;
pub const KINDA_SMALL_NUMBER: f32 = 1.0e-4;

/// Difference between a current transform and a target transform.
///
/// `angular_degrees` is signed and unwound to [-180, 180]; `angular_size` is its
/// magnitude. The rotational delta is `inverse(current) * target`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StateDelta {
    pub linear: Vec3,
    pub linear_size: f32,
    pub angular_axis: Vec3,
    pub angular_degrees: f32,
    pub angular_size: f32,
}

impl StateDelta {
    pub fn between(
        current_position: Vec3,
        current_rotation: Quat,
        target_position: Vec3,
        target_rotation: Quat,
    ) -> Self {
        let linear = target_position - current_position;
        let delta = current_rotation.inverse() * target_rotation;
        let (angular_axis, radians) = axis_angle_unwound(delta);
        let angular_degrees = radians.to_degrees();

        Self {
            linear,
            linear_size: linear.length(),
            angular_axis,
            angular_degrees,
            angular_size: angular_degrees.abs(),
        }
    }

    /// Weighted scalar error used by the convergence check.
    pub fn error(&self, per_linear_unit: f32, per_angular_degree: f32) -> f32 {
        self.linear_size * per_linear_unit + self.angular_size * per_angular_degree
    }
}

pub fn unwind_radians(mut angle: f32) -> f32 {
    while angle > PI {
        angle -= TAU;
    }
    while angle < -PI {
        angle += TAU;
    }
    angle
}

pub fn unwind_degrees(mut angle: f32) -> f32 {
    while angle > 180.0 {
        angle -= 360.0;
    }
    while angle < -180.0 {
        angle += 360.0;
    }
    angle
}

/// Axis and signed angle in radians, with the angle unwound to [-PI, PI].
pub fn axis_angle_unwound(rotation: Quat) -> (Vec3, f32) {
    let (axis, angle) = rotation.to_axis_angle();
    (axis, unwind_radians(angle))
}

/// Splits a vector into its unit direction and length. Near-zero vectors yield a
/// zero direction.
pub fn direction_and_length(vector: Vec3) -> (Vec3, f32) {
    let length = vector.length();
    if length > SMALL_NUMBER {
        (vector / length, length)
    } else {
        (Vec3::ZERO, 0.0)
    }
}

pub fn safe_normal(vector: Vec3) -> Vec3 {
    direction_and_length(vector).0
}

/// Rejects near-zero and non-unit quaternions.
pub fn is_valid_rotation(rotation: Quat) -> bool {
    let size_squared = rotation.length_squared();
    if !size_squared.is_finite() || size_squared < KINDA_SMALL_NUMBER {
        return false;
    }
    (1.0 - size_squared).abs() <= KINDA_SMALL_NUMBER
}

/// Rotates `rotation` by an angular velocity given in degrees per second.
pub fn integrate_rotation_degrees(rotation: Quat, angular_velocity_deg: Vec3, seconds: f32) -> Quat {
    let (axis, speed) = direction_and_length(angular_velocity_deg);
    Quat::from_axis_angle(axis, speed.to_radians() * seconds) * rotation
}

/// Rotates `rotation` by an angular velocity given in radians per second.
pub fn integrate_rotation_radians(rotation: Quat, angular_velocity: Vec3, seconds: f32) -> Quat {
    let (axis, speed) = direction_and_length(angular_velocity);
    Quat::from_axis_angle(axis, speed * seconds) * rotation
}

/// Unsigned angle in degrees between two rotations.
pub fn angular_distance_degrees(a: Quat, b: Quat) -> f32 {
    let (_, radians) = axis_angle_unwound(a.inverse() * b);
    radians.abs().to_degrees()
}

/// Coordinate-wise divergence test: true when any component differs by more
/// than `threshold`.
pub fn exceeds_per_component(a: Vec3, b: Vec3, threshold: f32) -> bool {
    (a - b).abs().max_element() > threshold
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1.0e-3
    }

    #[test]
    fn delta_reports_linear_and_angular_difference() {
        let current = Quat::IDENTITY;
        let target = Quat::from_rotation_z(90f32.to_radians());
        let delta = StateDelta::between(Vec3::ZERO, current, Vec3::new(3.0, 4.0, 0.0), target);

        assert!(approx(delta.linear_size, 5.0));
        assert!(approx(delta.angular_size, 90.0));
        assert!(approx(delta.angular_axis.z.abs(), 1.0));
    }

    #[test]
    fn delta_angle_is_unwound_to_half_turn() {
        let current = Quat::IDENTITY;
        let target = Quat::from_rotation_y(270f32.to_radians());
        let delta = StateDelta::between(Vec3::ZERO, current, Vec3::ZERO, target);

        assert!(approx(delta.angular_size, 90.0));
        assert!(delta.angular_degrees.abs() <= 180.0);
    }

    #[test]
    fn rotation_guard_rejects_degenerate_quaternions() {
        assert!(is_valid_rotation(Quat::IDENTITY));
        assert!(!is_valid_rotation(Quat::from_xyzw(0.0, 0.0, 0.0, 0.0)));
        assert!(!is_valid_rotation(Quat::from_xyzw(0.0, 0.0, 0.0, 2.0)));
        assert!(!is_valid_rotation(Quat::from_xyzw(f32::NAN, 0.0, 0.0, 1.0)));
    }

    #[test]
    fn integrating_zero_angular_velocity_keeps_rotation() {
        let rotation = Quat::from_rotation_x(0.3);
        assert_eq!(integrate_rotation_degrees(rotation, Vec3::ZERO, 0.5), rotation);
    }

    #[test]
    fn integrating_degrees_matches_radians() {
        let rotation = Quat::IDENTITY;
        let by_degrees = integrate_rotation_degrees(rotation, Vec3::new(0.0, 90.0, 0.0), 1.0);
        let by_radians =
            integrate_rotation_radians(rotation, Vec3::new(0.0, 90f32.to_radians(), 0.0), 1.0);
        assert!(angular_distance_degrees(by_degrees, by_radians) < 0.01);
    }

    #[test]
    fn per_component_threshold_ignores_magnitude() {
        let a = Vec3::ZERO;
        let b = Vec3::new(0.9, 0.9, 0.9);
        assert!(!exceeds_per_component(a, b, 1.0));
        assert!(exceeds_per_component(a, Vec3::new(0.0, -1.5, 0.0), 1.0));
    }
}
