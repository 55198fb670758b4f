use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

pub const DEFAULT_FIXED_DELTA_SECONDS: f32 = 1.0 / 60.0;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read replication config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse replication config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("replication config field `{0}` must be a finite, non-negative number")]
    Invalid(&'static str),
}

/// Tunables shared by the Default strategy and the hard-snap policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorCorrectionSettings {
    pub ping_extrapolation: f32,
    pub ping_limit: f32,
    pub error_per_linear_difference: f32,
    pub error_per_angular_difference: f32,
    pub max_restored_state_error: f32,
    pub max_linear_hard_snap_distance: f32,
    pub position_lerp: f32,
    pub angle_lerp: f32,
    pub linear_velocity_coefficient: f32,
    pub angular_velocity_coefficient: f32,
    pub error_accumulation_seconds: f32,
    pub error_accumulation_distance_sq: f32,
    pub error_accumulation_similarity: f32,
    pub always_hard_snap: bool,
    pub correct_connected_bodies: bool,
    pub correct_connected_bodies_friction: bool,
}

impl Default for ErrorCorrectionSettings {
    fn default() -> Self {
        Self {
            ping_extrapolation: 0.1,
            ping_limit: 100.0,
            error_per_linear_difference: 1.0,
            error_per_angular_difference: 1.0,
            max_restored_state_error: 1.0,
            max_linear_hard_snap_distance: 400.0,
            position_lerp: 0.0,
            angle_lerp: 0.4,
            linear_velocity_coefficient: 100.0,
            angular_velocity_coefficient: 10.0,
            error_accumulation_seconds: 0.5,
            error_accumulation_distance_sq: 15.0,
            error_accumulation_similarity: 100.0,
            always_hard_snap: false,
            correct_connected_bodies: false,
            correct_connected_bodies_friction: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictiveSettings {
    pub position_correction_time_base: f32,
    pub position_correction_time_min: f32,
    pub position_correction_time_multiplier: f32,
    pub rotation_correction_time_base: f32,
    pub rotation_correction_time_min: f32,
    pub rotation_correction_time_multiplier: f32,
    pub position_interpolation_time_multiplier: f32,
    pub average_receive_interval_smoothing: f32,
    pub extrapolation_time_multiplier: f32,
    pub extrapolation_min_time: f32,
    pub min_expected_distance_covered: f32,
    pub error_accumulation_decrease_multiplier: f32,
    pub disable_error_velocity_limits: bool,
    pub error_accumulation_linear_velocity_limit: f32,
    pub error_accumulation_angular_velocity_limit: f32,
    pub soft_snap_position_strength: f32,
    pub soft_snap_rotation_strength: f32,
    pub soft_snap_to_source: bool,
    pub disable_soft_snap: bool,
    pub early_out_distance_sqr: f32,
    pub early_out_angle: f32,
    pub early_out_with_velocity: bool,
    pub skip_velocity_rep_on_position_early_out: bool,
    pub post_resim_wait_for_update: bool,
    pub velocity_based: bool,
    pub correction_as_velocity: bool,
    pub sleep_connected_bodies: bool,
    pub kinematic_prediction: bool,
    pub kinematic_hard_snap: bool,
    pub skip_replication: bool,
    pub dont_clear_target: bool,
    pub sleep_seconds_clear_target: f32,
    pub target_tick_alignment_clamp_multiplier: f32,
    pub teleport_detection_enabled: bool,
    pub teleport_detection_min_distance: f32,
    pub teleport_detection_velocity_multiplier: f32,
}

impl Default for PredictiveSettings {
    fn default() -> Self {
        Self {
            position_correction_time_base: 0.0,
            position_correction_time_min: 0.1,
            position_correction_time_multiplier: 1.0,
            rotation_correction_time_base: 0.0,
            rotation_correction_time_min: 0.1,
            rotation_correction_time_multiplier: 1.0,
            position_interpolation_time_multiplier: 1.1,
            average_receive_interval_smoothing: 3.0,
            extrapolation_time_multiplier: 3.0,
            extrapolation_min_time: 0.75,
            min_expected_distance_covered: 0.5,
            error_accumulation_decrease_multiplier: 0.5,
            disable_error_velocity_limits: false,
            error_accumulation_linear_velocity_limit: 50.0,
            error_accumulation_angular_velocity_limit: 1.5,
            soft_snap_position_strength: 0.5,
            soft_snap_rotation_strength: 0.5,
            soft_snap_to_source: false,
            disable_soft_snap: false,
            early_out_distance_sqr: 1.0,
            early_out_angle: 1.5,
            early_out_with_velocity: true,
            skip_velocity_rep_on_position_early_out: true,
            post_resim_wait_for_update: false,
            velocity_based: true,
            correction_as_velocity: false,
            sleep_connected_bodies: true,
            kinematic_prediction: true,
            kinematic_hard_snap: false,
            skip_replication: false,
            dont_clear_target: false,
            sleep_seconds_clear_target: 15.0,
            target_tick_alignment_clamp_multiplier: 2.0,
            teleport_detection_enabled: true,
            teleport_detection_min_distance: 200.0,
            teleport_detection_velocity_multiplier: 1.3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResimulationSettings {
    pub position_threshold_enabled: bool,
    pub position_threshold: f32,
    pub rotation_threshold_enabled: bool,
    pub rotation_threshold_degrees: f32,
    pub linear_velocity_threshold_enabled: bool,
    pub linear_velocity_threshold: f32,
    pub angular_velocity_threshold_enabled: bool,
    pub angular_velocity_threshold_degrees: f32,
    pub runtime_correction_enabled: bool,
    pub runtime_velocity_correction: bool,
    pub runtime_correct_connected_bodies: bool,
    pub position_stability_multiplier: f32,
    pub rotation_stability_multiplier: f32,
    pub velocity_stability_multiplier: f32,
    pub angular_velocity_stability_multiplier: f32,
    pub apply_predictive_interpolation_when_behind_server: bool,
    /// Park predictive targets whose body interacts with a resimulated body.
    pub disable_replication_on_interaction: bool,
}

impl Default for ResimulationSettings {
    fn default() -> Self {
        Self {
            position_threshold_enabled: true,
            position_threshold: 1.0,
            rotation_threshold_enabled: true,
            rotation_threshold_degrees: 4.0,
            linear_velocity_threshold_enabled: false,
            linear_velocity_threshold: 1.0,
            angular_velocity_threshold_enabled: false,
            angular_velocity_threshold_degrees: 10.0,
            runtime_correction_enabled: false,
            runtime_velocity_correction: false,
            runtime_correct_connected_bodies: true,
            position_stability_multiplier: 0.5,
            rotation_stability_multiplier: 1.0,
            velocity_stability_multiplier: 0.5,
            angular_velocity_stability_multiplier: 0.5,
            apply_predictive_interpolation_when_behind_server: true,
            disable_replication_on_interaction: false,
        }
    }
}

/// Immutable tunables handed to the scheduler at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicationConfig {
    /// Fixed simulation step. Teleport detection and target alignment are
    /// disabled when this is zero.
    pub fixed_delta_seconds: f32,
    pub error_correction: ErrorCorrectionSettings,
    pub predictive: PredictiveSettings,
    pub resimulation: ResimulationSettings,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            fixed_delta_seconds: DEFAULT_FIXED_DELTA_SECONDS,
            error_correction: ErrorCorrectionSettings::default(),
            predictive: PredictiveSettings::default(),
            resimulation: ResimulationSettings::default(),
        }
    }
}

impl ReplicationConfig {
    pub fn builder() -> ReplicationConfigBuilder {
        ReplicationConfigBuilder::default()
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: ReplicationConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    pub fn to_json_pretty(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn uses_fixed_step(&self) -> bool {
        self.fixed_delta_seconds > 0.0
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let ec = &self.error_correction;
        let pi = &self.predictive;
        let rs = &self.resimulation;
        let fields: [(&'static str, f32); 44] = [
            ("fixed_delta_seconds", self.fixed_delta_seconds),
            ("ping_extrapolation", ec.ping_extrapolation),
            ("ping_limit", ec.ping_limit),
            ("error_per_linear_difference", ec.error_per_linear_difference),
            ("error_per_angular_difference", ec.error_per_angular_difference),
            ("max_restored_state_error", ec.max_restored_state_error),
            ("max_linear_hard_snap_distance", ec.max_linear_hard_snap_distance),
            ("position_lerp", ec.position_lerp),
            ("angle_lerp", ec.angle_lerp),
            ("linear_velocity_coefficient", ec.linear_velocity_coefficient),
            ("angular_velocity_coefficient", ec.angular_velocity_coefficient),
            ("error_accumulation_seconds", ec.error_accumulation_seconds),
            ("error_accumulation_distance_sq", ec.error_accumulation_distance_sq),
            ("error_accumulation_similarity", ec.error_accumulation_similarity),
            ("position_correction_time_base", pi.position_correction_time_base),
            ("position_correction_time_min", pi.position_correction_time_min),
            ("position_correction_time_multiplier", pi.position_correction_time_multiplier),
            ("rotation_correction_time_base", pi.rotation_correction_time_base),
            ("rotation_correction_time_min", pi.rotation_correction_time_min),
            ("rotation_correction_time_multiplier", pi.rotation_correction_time_multiplier),
            ("position_interpolation_time_multiplier", pi.position_interpolation_time_multiplier),
            ("average_receive_interval_smoothing", pi.average_receive_interval_smoothing),
            ("extrapolation_time_multiplier", pi.extrapolation_time_multiplier),
            ("extrapolation_min_time", pi.extrapolation_min_time),
            ("min_expected_distance_covered", pi.min_expected_distance_covered),
            ("error_accumulation_decrease_multiplier", pi.error_accumulation_decrease_multiplier),
            ("error_accumulation_linear_velocity_limit", pi.error_accumulation_linear_velocity_limit),
            ("error_accumulation_angular_velocity_limit", pi.error_accumulation_angular_velocity_limit),
            ("soft_snap_position_strength", pi.soft_snap_position_strength),
            ("soft_snap_rotation_strength", pi.soft_snap_rotation_strength),
            ("early_out_distance_sqr", pi.early_out_distance_sqr),
            ("early_out_angle", pi.early_out_angle),
            ("sleep_seconds_clear_target", pi.sleep_seconds_clear_target),
            ("target_tick_alignment_clamp_multiplier", pi.target_tick_alignment_clamp_multiplier),
            ("teleport_detection_min_distance", pi.teleport_detection_min_distance),
            ("teleport_detection_velocity_multiplier", pi.teleport_detection_velocity_multiplier),
            ("position_threshold", rs.position_threshold),
            ("rotation_threshold_degrees", rs.rotation_threshold_degrees),
            ("linear_velocity_threshold", rs.linear_velocity_threshold),
            ("angular_velocity_threshold_degrees", rs.angular_velocity_threshold_degrees),
            ("position_stability_multiplier", rs.position_stability_multiplier),
            ("rotation_stability_multiplier", rs.rotation_stability_multiplier),
            ("velocity_stability_multiplier", rs.velocity_stability_multiplier),
            ("angular_velocity_stability_multiplier", rs.angular_velocity_stability_multiplier),
        ];

        for (name, value) in fields {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::Invalid(name));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct ReplicationConfigBuilder {
    config: ReplicationConfig,
}

impl ReplicationConfigBuilder {
    pub fn fixed_delta_seconds(mut self, seconds: f32) -> Self {
        self.config.fixed_delta_seconds = seconds;
        self
    }

    pub fn error_correction(mut self, edit: impl FnOnce(&mut ErrorCorrectionSettings)) -> Self {
        edit(&mut self.config.error_correction);
        self
    }

    pub fn predictive(mut self, edit: impl FnOnce(&mut PredictiveSettings)) -> Self {
        edit(&mut self.config.predictive);
        self
    }

    pub fn resimulation(mut self, edit: impl FnOnce(&mut ResimulationSettings)) -> Self {
        edit(&mut self.config.resimulation);
        self
    }

    pub fn build(self) -> ReplicationConfig {
        self.config
    }
}
