use crate::math::safe_normal;
use crate::network::replication::config::{ErrorCorrectionSettings, PredictiveSettings, ReplicationConfig};
use crate::physics::PhysicsBody;
use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HardSnapReason {
    /// Positional error larger than `max_linear_hard_snap_distance`.
    LinearDistance,
    /// Correction failed to converge for longer than `error_accumulation_seconds`.
    AccumulatedError,
    /// `always_hard_snap` is set.
    Forced,
    /// Kinematic body with kinematic hard snapping enabled.
    Kinematic,
}

/// Thresholds deciding when soft correction gives way to a hard snap.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HardSnapPolicy {
    pub max_linear_distance: f32,
    pub error_accumulation_seconds: f32,
    pub always_hard_snap: bool,
    pub kinematic_hard_snap: bool,
}

impl HardSnapPolicy {
    pub fn from_config(config: &ReplicationConfig) -> Self {
        Self {
            max_linear_distance: config.error_correction.max_linear_hard_snap_distance,
            error_accumulation_seconds: config.error_correction.error_accumulation_seconds,
            always_hard_snap: config.error_correction.always_hard_snap,
            kinematic_hard_snap: config.predictive.kinematic_hard_snap,
        }
    }

    pub fn evaluate_default(&self, linear_error: f32, accumulated: f32) -> Option<HardSnapReason> {
        if linear_error > self.max_linear_distance {
            Some(HardSnapReason::LinearDistance)
        } else if accumulated > self.error_accumulation_seconds {
            Some(HardSnapReason::AccumulatedError)
        } else if self.always_hard_snap {
            Some(HardSnapReason::Forced)
        } else {
            None
        }
    }

    pub fn evaluate_predictive(&self, can_simulate: bool, accumulated: f32) -> Option<HardSnapReason> {
        if !can_simulate && self.kinematic_hard_snap {
            Some(HardSnapReason::Kinematic)
        } else if accumulated > self.error_accumulation_seconds {
            Some(HardSnapReason::AccumulatedError)
        } else if self.always_hard_snap {
            Some(HardSnapReason::Forced)
        } else {
            None
        }
    }
}

/// Previous-tick positions the convergence heuristics compare against.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressSample {
    pub current: Vec3,
    pub prev_pos: Vec3,
    pub prev_pos_target: Vec3,
    pub target: Vec3,
}

/// Default-mode accumulator update.
///
/// Error grows while the body moved less than `error_accumulation_distance_sq`
/// toward the previous target and the error direction persisted; otherwise it
/// decays by `delta_seconds`, never below zero.
pub fn accumulate_default(
    accumulated: f32,
    delta_seconds: f32,
    sample: ProgressSample,
    settings: &ErrorCorrectionSettings,
) -> f32 {
    let prev_delta = sample.prev_pos_target - sample.prev_pos;
    let prev_progress = (sample.current - sample.prev_pos).dot(safe_normal(prev_delta));
    let prev_similarity = (sample.target - sample.current).dot(prev_delta);

    if prev_progress < settings.error_accumulation_distance_sq
        && prev_similarity > settings.error_accumulation_similarity
    {
        accumulated + delta_seconds
    } else {
        (accumulated - delta_seconds).max(0.0)
    }
}

/// Outcome of the predictive expected-distance heuristic.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PredictiveProgress {
    pub accumulated: f32,
    pub soft_snap: bool,
}

/// Predictive-mode accumulator update.
///
/// Compares how far the body actually moved along the previous replicated
/// velocity with how far that velocity should have carried it. Falling short of
/// `min_expected_distance_covered` accumulates error and requests a soft snap.
/// Fast bodies (above the velocity limits) reset the accumulator.
#[allow(clippy::too_many_arguments)]
pub fn accumulate_predictive(
    accumulated: f32,
    delta_seconds: f32,
    current: Vec3,
    prev_pos: Vec3,
    prev_lin_vel: Vec3,
    target_lin_speed: f32,
    target_ang_speed_rad: f32,
    settings: &PredictiveSettings,
) -> PredictiveProgress {
    let within_limits = settings.disable_error_velocity_limits
        || (target_lin_speed < settings.error_accumulation_linear_velocity_limit
            && target_ang_speed_rad < settings.error_accumulation_angular_velocity_limit);
    if !within_limits {
        return PredictiveProgress {
            accumulated: 0.0,
            soft_snap: false,
        };
    }

    let expected = (prev_lin_vel * delta_seconds).length();
    let covered = (current - prev_pos).dot(safe_normal(prev_lin_vel));
    // A body with no replicated velocity is not expected to travel.
    let alpha = if expected > 0.0 {
        (covered / expected).clamp(0.0, 1.0)
    } else {
        1.0
    };

    if alpha < settings.min_expected_distance_covered {
        PredictiveProgress {
            accumulated: accumulated + delta_seconds,
            soft_snap: true,
        }
    } else if accumulated > 0.0 {
        PredictiveProgress {
            accumulated: (accumulated
                - delta_seconds * settings.error_accumulation_decrease_multiplier)
                .max(0.0),
            soft_snap: true,
        }
    } else {
        PredictiveProgress {
            accumulated,
            soft_snap: false,
        }
    }
}

/// Discontinuous correction to `position`/`rotation` plus direct velocity
/// assignment. Angular velocity arrives in degrees and is written in radians.
pub fn apply_hard_snap(
    body: &mut dyn PhysicsBody,
    position: Vec3,
    rotation: Quat,
    linear_velocity: Vec3,
    angular_velocity_deg: Vec3,
    settings: &ErrorCorrectionSettings,
) {
    body.apply_transform_correction(
        position,
        rotation,
        settings.correct_connected_bodies,
        settings.correct_connected_bodies_friction,
    );
    body.set_linear_velocity(linear_velocity);
    body.set_angular_velocity(angular_velocity_deg * (std::f32::consts::PI / 180.0));
}
