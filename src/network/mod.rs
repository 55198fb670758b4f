pub mod replication;

use crate::math::{integrate_rotation_degrees, is_valid_rotation};
use crate::physics::BodyHandle;
use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReplicationMode {
    Default,
    PredictiveInterpolation,
    Resimulation,
}

impl Default for ReplicationMode {
    fn default() -> Self {
        ReplicationMode::Default
    }
}

impl ReplicationMode {
    pub fn label(self) -> &'static str {
        match self {
            ReplicationMode::Default => "Default",
            ReplicationMode::PredictiveInterpolation => "PredictiveInterpolation",
            ReplicationMode::Resimulation => "Resimulation",
        }
    }
}

/// Authoritative rigid-body snapshot as decoded from the wire.
///
/// Angular velocity is carried in degrees per second. A state with none of its
/// flags set is the "stop replicating" sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RigidBodyState {
    pub position: Vec3,
    pub rotation: Quat,
    pub linear_velocity: Vec3,
    pub angular_velocity_deg: Vec3,
    pub sleeping: bool,
    pub replicate_physics: bool,
    pub needs_update: bool,
}

impl Default for RigidBodyState {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            linear_velocity: Vec3::ZERO,
            angular_velocity_deg: Vec3::ZERO,
            sleeping: false,
            replicate_physics: true,
            needs_update: false,
        }
    }
}

impl RigidBodyState {
    pub fn at(position: Vec3) -> Self {
        Self {
            position,
            ..Self::default()
        }
    }

    pub fn cleared() -> Self {
        Self {
            sleeping: false,
            replicate_physics: false,
            needs_update: false,
            ..Self::default()
        }
    }

    pub fn with_rotation(mut self, rotation: Quat) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn with_linear_velocity(mut self, velocity: Vec3) -> Self {
        self.linear_velocity = velocity;
        self
    }

    pub fn with_angular_velocity_deg(mut self, velocity: Vec3) -> Self {
        self.angular_velocity_deg = velocity;
        self
    }

    pub fn asleep(mut self) -> Self {
        self.sleeping = true;
        self
    }

    pub fn is_cleared(&self) -> bool {
        !self.sleeping && !self.replicate_physics && !self.needs_update
    }

    pub fn should_sleep(&self) -> bool {
        self.sleeping
    }

    pub fn has_valid_rotation(&self) -> bool {
        is_valid_rotation(self.rotation)
    }

    /// Advances position by linear velocity and rotation by angular velocity.
    pub fn extrapolate(&mut self, seconds: f32) {
        self.position += self.linear_velocity * seconds;
        self.rotation = integrate_rotation_degrees(self.rotation, self.angular_velocity_deg, seconds);
    }

    pub fn extrapolated(mut self, seconds: f32) -> Self {
        self.extrapolate(seconds);
        self
    }
}

/// Optional per-update override of the Default strategy's blend factors.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ErrorCorrectionOverride {
    pub linear_velocity_coefficient: f32,
    pub angular_velocity_coefficient: f32,
    pub position_lerp: f32,
    pub angle_lerp: f32,
}

/// Decoded replication update for a single body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetUpdate {
    pub body: BodyHandle,
    pub state: RigidBodyState,
    pub server_frame: i64,
    #[serde(default)]
    pub latency_one_way: f32,
    #[serde(default)]
    pub mode: ReplicationMode,
    #[serde(default)]
    pub frame_offset: Option<i32>,
    #[serde(default)]
    pub error_correction: Option<ErrorCorrectionOverride>,
}

impl TargetUpdate {
    pub fn new(body: BodyHandle, state: RigidBodyState, server_frame: i64) -> Self {
        Self {
            body,
            state,
            server_frame,
            latency_one_way: 0.0,
            mode: ReplicationMode::Default,
            frame_offset: None,
            error_correction: None,
        }
    }

    /// Update that tells the receiver to stop replicating `body`.
    pub fn stop(body: BodyHandle) -> Self {
        Self::new(body, RigidBodyState::cleared(), 0)
    }

    pub fn with_latency(mut self, latency_one_way: f32) -> Self {
        self.latency_one_way = latency_one_way;
        self
    }

    pub fn with_mode(mut self, mode: ReplicationMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_frame_offset(mut self, frame_offset: i32) -> Self {
        self.frame_offset = Some(frame_offset);
        self
    }

    pub fn with_error_correction(mut self, correction: ErrorCorrectionOverride) -> Self {
        self.error_correction = Some(correction);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cleared_state_is_the_stop_sentinel() {
        assert!(RigidBodyState::cleared().is_cleared());
        assert!(!RigidBodyState::default().is_cleared());
        assert!(!RigidBodyState::cleared().asleep().is_cleared());
        assert!(TargetUpdate::stop(BodyHandle::new(3, 1)).state.is_cleared());
    }

    #[test]
    fn extrapolate_moves_along_velocity() {
        let state = RigidBodyState::at(Vec3::new(1.0, 0.0, 0.0))
            .with_linear_velocity(Vec3::new(2.0, 0.0, 0.0))
            .with_angular_velocity_deg(Vec3::new(0.0, 0.0, 90.0));
        let moved = state.extrapolated(0.5);

        assert!((moved.position.x - 2.0).abs() < 1.0e-5);
        let angle = moved.rotation.angle_between(Quat::IDENTITY).to_degrees();
        assert!((angle - 45.0).abs() < 1.0e-2);
    }

    #[test]
    fn update_decodes_with_missing_optional_fields() {
        let json = r#"{
            "body": { "index": 2, "generation": 0 },
            "state": { "position": [1.0, 2.0, 3.0], "sleeping": true },
            "server_frame": 12
        }"#;
        let update: TargetUpdate = serde_json::from_str(json).expect("decode update");

        assert_eq!(update.body, BodyHandle::new(2, 0));
        assert_eq!(update.state.position, Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(update.state.rotation, Quat::IDENTITY);
        assert!(update.state.replicate_physics);
        assert_eq!(update.mode, ReplicationMode::Default);
        assert_eq!(update.frame_offset, None);
    }
}
