use crate::math::{angular_distance_degrees, exceeds_per_component};
use crate::network::replication::config::ResimulationSettings;
use crate::network::replication::strategy::{ReplicationStrategy, StrategyContext, StrategyOutcome};
use crate::network::replication::target::{ModeDemotion, ReplicationTarget};
use crate::network::{ReplicationMode, RigidBodyState};
use crate::physics::history::HistoryStore;
use crate::physics::{ObjectState, PhysicsBody};
use crate::telemetry::ReplicationEvent;

/// Compares the authoritative state against locally recorded history and asks
/// for an authoritative replay when they diverge.
#[derive(Debug, Default, Clone, Copy)]
pub struct ResimulationStrategy;

/// Channel that exceeded its divergence threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DivergedChannel {
    Position,
    LinearVelocity,
    AngularVelocity,
    Rotation,
}

/// Per-component comparison of `target` against the recorded `past` state.
/// Channels are checked in a fixed order and the first one that diverges wins.
pub fn diverged_channel(
    target: &RigidBodyState,
    past: &RigidBodyState,
    settings: &ResimulationSettings,
) -> Option<DivergedChannel> {
    if settings.position_threshold_enabled
        && exceeds_per_component(target.position, past.position, settings.position_threshold)
    {
        return Some(DivergedChannel::Position);
    }
    if settings.linear_velocity_threshold_enabled
        && exceeds_per_component(
            target.linear_velocity,
            past.linear_velocity,
            settings.linear_velocity_threshold,
        )
    {
        return Some(DivergedChannel::LinearVelocity);
    }
    if settings.angular_velocity_threshold_enabled
        && exceeds_per_component(
            target.angular_velocity_deg,
            past.angular_velocity_deg,
            settings.angular_velocity_threshold_degrees,
        )
    {
        return Some(DivergedChannel::AngularVelocity);
    }
    if settings.rotation_threshold_enabled
        && angular_distance_degrees(past.rotation, target.rotation) > settings.rotation_threshold_degrees
    {
        return Some(DivergedChannel::Rotation);
    }
    None
}

/// Decides whether a Resimulation target can be served by the retained history.
///
/// A target older than the earliest retained frame can never be replayed and is
/// demoted for good. A target the history has not reached yet, or a missing or
/// empty history, demotes until the next update when the settings allow it.
pub fn check_history_window(
    target: &ReplicationTarget,
    history: Option<&dyn HistoryStore>,
    settings: &ResimulationSettings,
) -> Option<ModeDemotion> {
    let Some(history) = history else {
        return Some(ModeDemotion::UntilNextUpdate);
    };
    let Some(earliest) = history.earliest_retained_frame() else {
        return Some(ModeDemotion::UntilNextUpdate);
    };

    let local_frame = target.local_frame();
    if local_frame < earliest {
        Some(ModeDemotion::Permanent)
    } else if !history.is_frame_within_history(local_frame)
        && settings.apply_predictive_interpolation_when_behind_server
    {
        Some(ModeDemotion::UntilNextUpdate)
    } else {
        None
    }
}

impl ReplicationStrategy for ResimulationStrategy {
    fn mode(&self) -> ReplicationMode {
        ReplicationMode::Resimulation
    }

    fn apply(
        &self,
        body: &mut dyn PhysicsBody,
        target: &mut ReplicationTarget,
        ctx: &StrategyContext<'_>,
    ) -> StrategyOutcome {
        let Some(history) = ctx.history else {
            return unusable(target);
        };
        if target.server_frame <= 0 {
            return unusable(target);
        }
        let local_frame = target.local_frame();
        if !history.is_frame_within_history(local_frame) {
            return unusable(target);
        }
        let Some(past) = history.past_state_at_frame(target.body(), local_frame) else {
            log::debug!(
                "[replication] no recorded state for {:?} at frame {local_frame}",
                target.body()
            );
            return unusable(target);
        };

        let settings = &ctx.config.resimulation;
        let should_sleep = target.target_state.should_sleep();
        let diverged = diverged_channel(&target.target_state, &past, settings);

        if body.is_sleeping() && !should_sleep {
            body.set_object_state(ObjectState::Dynamic);
        }

        let mut outcome = StrategyOutcome::keep();
        let mut clear = true;
        let blocked = history.blocked_resim_frame().unwrap_or(i64::MIN);

        if diverged.is_some() && target.tick_count == 0 && local_frame > blocked {
            log::debug!(
                "[replication] {:?} diverged on {:?} at frame {local_frame}",
                target.body(),
                diverged
            );
            outcome.resimulation_frame = Some(local_frame);
            outcome.push(ReplicationEvent::ResimulationRequested {
                body: target.body(),
                frame: local_frame,
            });
        } else if settings.runtime_correction_enabled {
            let tick_count = i64::from(target.tick_count);
            let predicted_frames = ctx.local_frame - local_frame - tick_count;
            if !target.is_waiting() && tick_count <= predicted_frames && predicted_frames > 0 {
                apply_runtime_correction(body, &target.target_state, &past, predicted_frames, settings);
            }
            clear = tick_count >= predicted_frames;
        }

        if target.is_waiting() {
            clear = false;
        } else if clear && should_sleep {
            body.apply_transform_correction(
                target.target_state.position,
                target.target_state.rotation,
                true,
                true,
            );
            body.set_object_state(ObjectState::Sleeping);
            if ctx.config.predictive.sleep_connected_bodies {
                body.sleep_connected_bodies();
            }
        }

        outcome.remove = clear;
        outcome
    }
}

/// Exit for a target that cannot be compared against history this tick. A
/// waiting target stays parked until its awaited update arrives.
fn unusable(target: &ReplicationTarget) -> StrategyOutcome {
    if target.is_waiting() {
        StrategyOutcome::keep()
    } else {
        StrategyOutcome::remove()
    }
}

/// Spreads the recorded error over the frames predicted since `past` was
/// simulated so each remaining tick closes `1 / predicted_frames` of it.
fn apply_runtime_correction(
    body: &mut dyn PhysicsBody,
    target: &RigidBodyState,
    past: &RigidBodyState,
    predicted_frames: i64,
    settings: &ResimulationSettings,
) {
    let frames = predicted_frames as f32;
    let position = body.position() + (target.position - past.position) * (settings.position_stability_multiplier / frames);

    let current_rotation = body.rotation();
    let corrected_goal = current_rotation * (past.rotation.inverse() * target.rotation);
    let rotation = current_rotation
        .slerp(corrected_goal, settings.rotation_stability_multiplier / frames)
        .normalize();

    if settings.runtime_velocity_correction {
        let to_radians = std::f32::consts::PI / 180.0;
        let linear = body.linear_velocity()
            + (target.linear_velocity - past.linear_velocity)
                * (settings.velocity_stability_multiplier / frames);
        let angular = body.angular_velocity()
            + (target.angular_velocity_deg - past.angular_velocity_deg)
                * to_radians
                * (settings.angular_velocity_stability_multiplier / frames);
        body.set_linear_velocity(linear);
        body.set_angular_velocity(angular);
    }

    body.apply_transform_correction(position, rotation, settings.runtime_correct_connected_bodies, true);
}
