use crate::network::replication::config::ReplicationConfig;
use crate::network::replication::lod::LodData;
use crate::network::{ErrorCorrectionOverride, ReplicationMode, RigidBodyState, TargetUpdate};
use crate::physics::BodyHandle;
use glam::{Quat, Vec3};

pub const UNSET_FRAME: i64 = -1;

/// Correction phase of a target.
///
/// | from    | event                                   | to      |
/// |---------|-----------------------------------------|---------|
/// | Active  | `mark_waiting(frame, mode)`             | Waiting |
/// | Waiting | accepted update with frame >= `frame`   | Active  |
/// | Waiting | accepted update with frame < `frame`    | Waiting |
///
/// While waiting the target resolves to `mode_override` and strategies must
/// leave the body transform alone.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TargetPhase {
    Active,
    Waiting {
        until_server_frame: i64,
        mode_override: ReplicationMode,
    },
}

/// Fallback applied to a Resimulation target whose frame is outside history.
///
/// | demotion          | cleared by                  |
/// |-------------------|-----------------------------|
/// | `UntilNextUpdate` | the next accepted update    |
/// | `Permanent`       | never; later Resimulation updates keep PredictiveInterpolation |
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeDemotion {
    None,
    UntilNextUpdate,
    Permanent,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum IngestOutcome {
    Accepted {
        previous_mode: ReplicationMode,
        teleport_distance: Option<f32>,
    },
    Stale,
}

pub(crate) struct IngestContext<'a> {
    pub config: &'a ReplicationConfig,
    pub local_frame: i64,
    pub lod: Option<LodData>,
}

/// Per-body replication record owned by the scheduler.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplicationTarget {
    body: BodyHandle,
    pub(crate) target_state: RigidBodyState,
    pub(crate) server_frame: i64,
    pub(crate) frame_offset: Option<i32>,
    pub(crate) receive_frame: i64,
    pub(crate) latency_one_way: f32,
    pub(crate) prev_pos: Vec3,
    pub(crate) prev_pos_target: Vec3,
    pub(crate) prev_rot_target: Quat,
    pub(crate) prev_lin_vel: Vec3,
    pub(crate) accumulated_error_seconds: f32,
    pub(crate) accumulated_sleep_seconds: f32,
    pub(crate) tick_count: i32,
    pub(crate) receive_interval: i64,
    pub(crate) average_receive_interval: f32,
    pub(crate) mode: ReplicationMode,
    pub(crate) initial_mode: ReplicationMode,
    pub(crate) demotion: ModeDemotion,
    pub(crate) phase: TargetPhase,
    pub(crate) allow_target_altering: bool,
    pub(crate) error_correction: Option<ErrorCorrectionOverride>,
    pub(crate) history_checked: bool,
    updates_received: u32,
}

impl ReplicationTarget {
    /// Fresh target seeded from the first update it will receive.
    pub fn new(update: &TargetUpdate) -> Self {
        Self {
            body: update.body,
            target_state: update.state,
            server_frame: UNSET_FRAME,
            frame_offset: None,
            receive_frame: UNSET_FRAME,
            latency_one_way: update.latency_one_way,
            prev_pos: update.state.position,
            prev_pos_target: update.state.position,
            prev_rot_target: update.state.rotation,
            prev_lin_vel: update.state.linear_velocity,
            accumulated_error_seconds: 0.0,
            accumulated_sleep_seconds: 0.0,
            tick_count: 0,
            receive_interval: 0,
            average_receive_interval: 0.0,
            mode: update.mode,
            initial_mode: update.mode,
            demotion: ModeDemotion::None,
            phase: TargetPhase::Active,
            allow_target_altering: false,
            error_correction: update.error_correction,
            history_checked: false,
            updates_received: 0,
        }
    }

    pub fn body(&self) -> BodyHandle {
        self.body
    }

    pub fn target_state(&self) -> &RigidBodyState {
        &self.target_state
    }

    pub fn server_frame(&self) -> i64 {
        self.server_frame
    }

    pub fn frame_offset(&self) -> Option<i32> {
        self.frame_offset
    }

    /// Server frame mapped into the local frame timeline.
    pub fn local_frame(&self) -> i64 {
        self.server_frame - i64::from(self.frame_offset.unwrap_or(0))
    }

    pub fn receive_frame(&self) -> i64 {
        self.receive_frame
    }

    pub fn latency_one_way(&self) -> f32 {
        self.latency_one_way
    }

    pub fn tick_count(&self) -> i32 {
        self.tick_count
    }

    pub fn accumulated_error_seconds(&self) -> f32 {
        self.accumulated_error_seconds
    }

    pub fn accumulated_sleep_seconds(&self) -> f32 {
        self.accumulated_sleep_seconds
    }

    pub fn receive_interval(&self) -> i64 {
        self.receive_interval
    }

    pub fn average_receive_interval(&self) -> f32 {
        self.average_receive_interval
    }

    pub fn prev_pos_target(&self) -> Vec3 {
        self.prev_pos_target
    }

    pub fn prev_rot_target(&self) -> Quat {
        self.prev_rot_target
    }

    pub fn mode(&self) -> ReplicationMode {
        self.mode
    }

    pub fn demotion(&self) -> ModeDemotion {
        self.demotion
    }

    pub fn phase(&self) -> TargetPhase {
        self.phase
    }

    pub fn allow_target_altering(&self) -> bool {
        self.allow_target_altering
    }

    pub fn updates_received(&self) -> u32 {
        self.updates_received
    }

    pub fn is_waiting(&self) -> bool {
        matches!(self.phase, TargetPhase::Waiting { .. })
    }

    /// Mode the scheduler dispatches to this tick.
    pub fn effective_mode(&self) -> ReplicationMode {
        match self.phase {
            TargetPhase::Waiting { mode_override, .. } => mode_override,
            TargetPhase::Active => self.mode,
        }
    }

    pub fn mark_waiting(&mut self, until_server_frame: i64, mode_override: ReplicationMode) {
        self.phase = TargetPhase::Waiting {
            until_server_frame,
            mode_override,
        };
    }

    fn update_waiting(&mut self, server_frame: i64) {
        if let TargetPhase::Waiting {
            until_server_frame, ..
        } = self.phase
        {
            if server_frame >= until_server_frame {
                self.phase = TargetPhase::Active;
            }
        }
    }

    pub(crate) fn demote(&mut self, demotion: ModeDemotion) {
        self.mode = ReplicationMode::PredictiveInterpolation;
        if self.demotion != ModeDemotion::Permanent {
            self.demotion = demotion;
        }
        self.prev_pos_target = self.target_state.position;
        self.prev_rot_target = self.target_state.rotation;
    }

    /// Per-tick LOD recommendation. Returns the previous mode when it changed.
    pub(crate) fn apply_lod_mode(&mut self, requested: ReplicationMode) -> Option<ReplicationMode> {
        let mode = if self.demotion != ModeDemotion::None && requested == ReplicationMode::Resimulation {
            ReplicationMode::PredictiveInterpolation
        } else {
            requested
        };
        if mode == self.mode {
            return None;
        }
        let previous = self.mode;
        self.mode = mode;
        if mode == ReplicationMode::Resimulation {
            self.history_checked = false;
        }
        Some(previous)
    }

    pub(crate) fn extrapolate_ticks(&mut self, ticks: i32, delta_seconds: f32) {
        self.target_state.extrapolate(ticks as f32 * delta_seconds);
    }

    fn resolve_requested_mode(&self, requested: ReplicationMode) -> ReplicationMode {
        if self.demotion == ModeDemotion::Permanent && requested == ReplicationMode::Resimulation {
            ReplicationMode::PredictiveInterpolation
        } else {
            requested
        }
    }

    fn update_average_receive_interval(&mut self, smoothing: f32) {
        if self.receive_interval <= 0 {
            return;
        }
        let interval = self.receive_interval as f32;
        if self.average_receive_interval <= 0.0 {
            self.average_receive_interval = interval;
            return;
        }
        let alpha = (1.0 / (interval * smoothing.max(f32::EPSILON))).clamp(0.0, 1.0);
        self.average_receive_interval += (interval - self.average_receive_interval) * alpha;
    }

    fn apply_lod(&mut self, lod: LodData, local_frame: i64, delta_seconds: f32) {
        self.mode = self.resolve_requested_mode(lod.mode);
        if self.mode != ReplicationMode::PredictiveInterpolation || self.target_state.sleeping {
            return;
        }
        let target_client_frame = self.local_frame();
        if lod.aligned_frame > target_client_frame {
            let full_prediction_time = (local_frame - target_client_frame) as f32 * delta_seconds;
            self.target_state
                .extrapolate(full_prediction_time - lod.aligned_time);
            self.tick_count = (lod.aligned_frame - target_client_frame) as i32;
        }
    }

    /// Folds an update into the target. Never touches the physics body.
    pub(crate) fn ingest(&mut self, update: &TargetUpdate, ctx: &IngestContext<'_>) -> IngestOutcome {
        self.latency_one_way = update.latency_one_way;

        let first = self.updates_received == 0;
        if !(first || update.server_frame == 0 || update.server_frame > self.server_frame) {
            return IngestOutcome::Stale;
        }

        let config = ctx.config;
        let delta_seconds = config.fixed_delta_seconds;
        let prev_tick_count = if self.server_frame < 0 { 0 } else { self.tick_count };
        let send_interval = if self.server_frame <= 0 || update.server_frame <= 0 {
            0
        } else {
            update.server_frame - self.server_frame
        };
        let prev_allow_target_altering = self.allow_target_altering;
        let frame_offset_corrected = self.frame_offset.unwrap_or(0) != update.frame_offset.unwrap_or(0);
        self.allow_target_altering = !self.target_state.sleeping && !update.state.sleeping;
        let prev_lin_vel = self.target_state.linear_velocity;

        self.receive_interval = if send_interval > 0 {
            send_interval
        } else {
            let prev_receive_frame = if self.receive_frame < 0 {
                ctx.local_frame - 1
            } else {
                self.receive_frame
            };
            ctx.local_frame - prev_receive_frame
        };
        self.update_average_receive_interval(config.predictive.average_receive_interval_smoothing);

        let previous_mode = self.mode;
        if self.demotion == ModeDemotion::UntilNextUpdate {
            self.demotion = ModeDemotion::None;
        }
        self.server_frame = update.server_frame;
        self.receive_frame = ctx.local_frame;
        self.target_state = update.state;
        self.mode = self.resolve_requested_mode(update.mode);
        self.frame_offset = update.frame_offset;
        self.error_correction = update.error_correction;
        self.tick_count = 0;
        self.accumulated_sleep_seconds = 0.0;
        self.history_checked = false;
        self.updates_received += 1;

        self.update_waiting(update.server_frame);

        if let Some(lod) = ctx.lod {
            self.apply_lod(lod, ctx.local_frame, delta_seconds);
        }

        let mut teleport_distance = None;
        if self.mode == ReplicationMode::PredictiveInterpolation {
            let pi = &config.predictive;

            if self.tick_count == 0
                && !first
                && prev_allow_target_altering
                && self.allow_target_altering
                && !frame_offset_corrected
            {
                let limit = (self.average_receive_interval.ceil()
                    * pi.target_tick_alignment_clamp_multiplier.floor()) as i64;
                let offset = (i64::from(prev_tick_count) - self.receive_interval).clamp(-limit, limit);
                self.tick_count = offset as i32;
                if !self.is_waiting() {
                    self.extrapolate_ticks(self.tick_count, delta_seconds);
                }
            }

            if pi.teleport_detection_enabled && !first && send_interval > 0 && config.uses_fixed_step() {
                let position_offset = update.state.position - self.prev_pos_target;
                let min_distance = pi.teleport_detection_min_distance;
                if position_offset.length_squared() > min_distance * min_distance {
                    let velocity = if update.state.linear_velocity.length_squared()
                        > prev_lin_vel.length_squared()
                    {
                        update.state.linear_velocity
                    } else {
                        prev_lin_vel
                    };
                    let seconds = send_interval as f32 * delta_seconds;
                    let possible = velocity * (seconds * pi.teleport_detection_velocity_multiplier);
                    if possible.length_squared() < position_offset.length_squared() {
                        self.accumulated_error_seconds =
                            config.error_correction.error_accumulation_seconds + 1.0;
                        teleport_distance = Some(position_offset.length());
                    }
                }
            }

            self.prev_pos_target = update.state.position;
            self.prev_rot_target = update.state.rotation;
        }

        IngestOutcome::Accepted {
            previous_mode,
            teleport_distance,
        }
    }
}
