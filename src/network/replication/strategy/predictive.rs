use crate::math::{KINDA_SMALL_NUMBER, angular_distance_degrees, axis_angle_unwound};
use crate::network::replication::accumulator::accumulate_predictive;
use crate::network::replication::strategy::{ReplicationStrategy, StrategyContext, StrategyOutcome};
use crate::network::replication::target::ReplicationTarget;
use crate::network::ReplicationMode;
use crate::physics::{ObjectState, PhysicsBody};
use crate::telemetry::ReplicationEvent;

/// Velocity-based blending toward a forward-extrapolated target.
///
/// Dynamic bodies are steered by blending their velocity toward the target's
/// velocity plus a positional error term, kinematic bodies are interpolated
/// through kinematic targets, and a stuck body is soft-snapped and eventually
/// hard-snapped once its accumulated error crosses the policy threshold.
#[derive(Debug, Default, Clone, Copy)]
pub struct PredictiveInterpolationStrategy;

impl PredictiveInterpolationStrategy {
    /// Sleep handling, clear decision and per-tick target extrapolation shared
    /// by every exit path.
    fn end(
        &self,
        body: &mut dyn PhysicsBody,
        target: &mut ReplicationTarget,
        ctx: &StrategyContext<'_>,
        can_simulate: bool,
        ok_to_clear: bool,
        mut outcome: StrategyOutcome,
    ) -> StrategyOutcome {
        let pi = &ctx.config.predictive;
        let should_sleep = target.target_state.should_sleep();
        let replicating = target.target_state.replicate_physics;

        if ok_to_clear && should_sleep && can_simulate {
            body.set_object_state(ObjectState::Sleeping);
            if pi.sleep_connected_bodies {
                body.sleep_connected_bodies();
            }
        }

        let clear = ok_to_clear
            && !pi.dont_clear_target
            && ((should_sleep && target.accumulated_sleep_seconds >= pi.sleep_seconds_clear_target)
                || !replicating
                || !can_simulate);

        if !clear && target.allow_target_altering {
            let dt = ctx.delta_seconds;
            let by_interval =
                (target.average_receive_interval * pi.extrapolation_time_multiplier).ceil() as i32;
            let by_time = if dt > 0.0 {
                (pi.extrapolation_min_time / dt).ceil() as i32
            } else {
                0
            };
            if target.tick_count <= by_interval.max(by_time) {
                target.extrapolate_ticks(1, dt);
            } else {
                log::trace!(
                    "[replication] {:?} reached its extrapolation limit",
                    target.body()
                );
                target.allow_target_altering = false;
            }
        }

        outcome.remove = clear;
        outcome
    }
}

impl ReplicationStrategy for PredictiveInterpolationStrategy {
    fn mode(&self) -> ReplicationMode {
        ReplicationMode::PredictiveInterpolation
    }

    fn apply(
        &self,
        body: &mut dyn PhysicsBody,
        target: &mut ReplicationTarget,
        ctx: &StrategyContext<'_>,
    ) -> StrategyOutcome {
        let pi = &ctx.config.predictive;
        if pi.skip_replication {
            return StrategyOutcome::remove();
        }

        let mut outcome = StrategyOutcome::keep();
        if ctx.config.resimulation.disable_replication_on_interaction
            && body.in_resimulation_island()
        {
            let until = ctx.local_frame + i64::from(target.frame_offset.unwrap_or(0));
            if !target.is_waiting() {
                outcome.push(ReplicationEvent::WaitingForUpdate {
                    body: target.body(),
                    until_server_frame: until,
                });
            }
            target.mark_waiting(until, ReplicationMode::Resimulation);
            return outcome;
        }

        let dt = ctx.delta_seconds;
        let sleeping = body.is_sleeping();
        let can_simulate = body.is_dynamic() || sleeping;
        target.accumulated_sleep_seconds = if sleeping {
            target.accumulated_sleep_seconds + dt
        } else {
            0.0
        };

        if target.is_waiting() {
            return self.end(body, target, ctx, can_simulate, true, outcome);
        }

        let early_out = (pi.early_out_with_velocity
            || target.target_state.linear_velocity.length_squared() < KINDA_SMALL_NUMBER)
            && (target.prev_pos_target - body.position()).length_squared() < pi.early_out_distance_sqr;
        if early_out
            && angular_distance_degrees(body.rotation(), target.target_state.rotation) < pi.early_out_angle
        {
            return self.end(body, target, ctx, can_simulate, true, outcome);
        }

        let current_position = body.position();
        let current_rotation = body.rotation();
        let current_lin_vel = body.linear_velocity();
        let current_ang_vel = body.angular_velocity();

        let target_position = target.target_state.position;
        let target_rotation = target.target_state.rotation;
        let target_lin_vel = target.target_state.linear_velocity;
        let target_ang_vel = target.target_state.angular_velocity_deg * (std::f32::consts::PI / 180.0);

        if let Some(reason) = ctx
            .policy
            .evaluate_predictive(can_simulate, target.accumulated_error_seconds)
        {
            target.accumulated_error_seconds = 0.0;
            if body.is_kinematic() {
                body.set_kinematic_target(target.prev_pos_target, target.prev_rot_target);
            } else {
                body.apply_transform_correction(
                    target.prev_pos_target,
                    target.prev_rot_target,
                    ctx.config.error_correction.correct_connected_bodies,
                    true,
                );
                body.set_linear_velocity(target_lin_vel);
                body.set_angular_velocity(target_ang_vel);
            }
            target.prev_lin_vel = target_lin_vel;
            log::debug!("[replication] hard snap {:?} ({reason:?})", target.body());
            outcome.push(ReplicationEvent::HardSnap {
                body: target.body(),
                mode: ReplicationMode::PredictiveInterpolation,
                reason,
            });
            return self.end(body, target, ctx, can_simulate, true, outcome);
        }

        let progress = accumulate_predictive(
            target.accumulated_error_seconds,
            dt,
            current_position,
            target.prev_pos,
            target.prev_lin_vel,
            target_lin_vel.length(),
            target_ang_vel.length(),
            pi,
        );
        target.accumulated_error_seconds = progress.accumulated;
        let mut soft_snap = !pi.velocity_based || progress.soft_snap;
        if pi.disable_soft_snap && pi.velocity_based {
            soft_snap = false;
        }

        if body.is_kinematic() {
            let average = target.average_receive_interval;
            let interpolation_ticks =
                average.ceil() - (ctx.local_frame - target.receive_frame) as f32;

            if (pi.kinematic_prediction && target.allow_target_altering) || interpolation_ticks > 0.0 {
                let span = if pi.kinematic_prediction { average } else { interpolation_ticks };
                let lerp = if span > 0.0 { (1.0 / span).min(1.0) } else { 1.0 };
                let (goal_position, goal_rotation) = if pi.kinematic_prediction {
                    (target_position, target_rotation)
                } else {
                    (target.prev_pos_target, target.prev_rot_target)
                };
                body.set_kinematic_target(
                    current_position.lerp(goal_position, lerp),
                    current_rotation.slerp(goal_rotation, lerp).normalize(),
                );
            } else {
                return self.end(body, target, ctx, can_simulate, true, outcome);
            }
        } else {
            if sleeping {
                body.set_object_state(ObjectState::Dynamic);
            }

            let average_seconds = target.average_receive_interval * dt;
            // one interpolation window drives both the linear and angular blends
            let interpolation_time = average_seconds * pi.position_interpolation_time_multiplier;
            let rtt = target.latency_one_way * 2.0;
            let position_correction_time = (pi.position_correction_time_base
                + average_seconds
                + rtt * pi.position_correction_time_multiplier)
                .max(dt + pi.position_correction_time_min);
            let rotation_correction_time = (pi.rotation_correction_time_base
                + average_seconds
                + rtt * pi.rotation_correction_time_multiplier)
                .max(dt + pi.rotation_correction_time_min);

            let mut correction_position = current_position;
            if !(early_out && pi.skip_velocity_rep_on_position_early_out) {
                let position_diff = target_position - current_position;
                let velocity_diff = target_lin_vel - current_lin_vel;
                let alpha = blend_alpha(dt, interpolation_time);

                let replicated = if pi.correction_as_velocity {
                    let blended = velocity_diff + position_diff / position_correction_time;
                    current_lin_vel + blended * alpha
                } else {
                    let correction_alpha = blend_alpha(dt, position_correction_time);
                    correction_position = current_position + position_diff * correction_alpha;
                    current_lin_vel + velocity_diff * alpha
                };
                body.set_linear_velocity(replicated);
                target.prev_lin_vel = replicated;
            }

            let mut correction_rotation = current_rotation;
            {
                let velocity_diff = target_ang_vel - current_ang_vel;
                let alpha = blend_alpha(dt, interpolation_time);

                let replicated = if pi.correction_as_velocity {
                    let (axis, angle) = axis_angle_unwound(target_rotation * current_rotation.inverse());
                    let blended = velocity_diff + axis * (angle / rotation_correction_time);
                    current_ang_vel + blended * alpha
                } else {
                    let correction_alpha = blend_alpha(dt, rotation_correction_time);
                    correction_rotation = current_rotation
                        .slerp(target_rotation, correction_alpha)
                        .normalize();
                    current_ang_vel + velocity_diff * alpha
                };
                body.set_angular_velocity(replicated);
            }

            target.prev_pos = current_position;

            let ec = &ctx.config.error_correction;
            if !pi.correction_as_velocity {
                body.apply_transform_correction(
                    correction_position,
                    correction_rotation,
                    ec.correct_connected_bodies,
                    ec.correct_connected_bodies_friction,
                );
            }

            if soft_snap {
                let (source_position, source_rotation) = if pi.soft_snap_to_source {
                    (target.prev_pos_target, target.prev_rot_target)
                } else {
                    (target_position, target_rotation)
                };
                body.apply_transform_correction(
                    current_position.lerp(
                        source_position,
                        pi.soft_snap_position_strength.clamp(0.0, 1.0),
                    ),
                    current_rotation
                        .slerp(source_rotation, pi.soft_snap_rotation_strength.clamp(0.0, 1.0))
                        .normalize(),
                    ec.correct_connected_bodies,
                    ec.correct_connected_bodies_friction,
                );
            }
        }

        self.end(body, target, ctx, can_simulate, false, outcome)
    }
}

/// `delta / span` clamped to [0, 1]. A zero span blends fully.
fn blend_alpha(delta_seconds: f32, span: f32) -> f32 {
    if span > 0.0 {
        (delta_seconds / span).clamp(0.0, 1.0)
    } else {
        1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::replication::config::ReplicationConfig;
    use crate::network::replication::strategy::testing::ingested;
    use crate::network::{RigidBodyState, TargetUpdate};
    use crate::physics::BodyHandle;
    use crate::physics::world::SimBody;
    use glam::{Quat, Vec3};

    const DT: f32 = 1.0 / 60.0;

    fn handle() -> BodyHandle {
        BodyHandle::new(2, 0)
    }

    fn update(state: RigidBodyState, frame: i64) -> TargetUpdate {
        TargetUpdate::new(handle(), state, frame).with_mode(ReplicationMode::PredictiveInterpolation)
    }

    fn run(
        config: &ReplicationConfig,
        body: &mut SimBody,
        target: &mut ReplicationTarget,
        frame: i64,
    ) -> StrategyOutcome {
        let ctx = StrategyContext::new(config, DT, frame);
        PredictiveInterpolationStrategy.apply(body, target, &ctx)
    }

    #[test]
    fn dynamic_body_is_pulled_toward_target() {
        let config = ReplicationConfig::default();
        let state = RigidBodyState::at(Vec3::new(10.0, 0.0, 0.0)).with_linear_velocity(Vec3::X);
        let mut target = ingested(&config, update(state, 5), 10);
        let mut body = SimBody::dynamic(Vec3::ZERO);

        let outcome = run(&config, &mut body, &mut target, 10);

        assert!(!outcome.remove);
        assert!(body.position.x > 0.0 && body.position.x < 10.0);
        assert!(body.linear_velocity.x > 0.0);
        // blended shift, then the soft snap for a body lagging its velocity
        assert_eq!(body.transform_corrections(), 2);
    }

    #[test]
    fn linear_and_angular_velocity_share_one_interpolation_window() {
        let config = ReplicationConfig::default();
        let state = RigidBodyState::at(Vec3::new(5.0, 0.0, 0.0))
            .with_linear_velocity(Vec3::new(6.0, 0.0, 0.0))
            .with_angular_velocity_deg(Vec3::new(0.0, 360.0, 0.0));
        let mut target = ingested(&config, update(state, 5), 10);
        target.average_receive_interval = 3.0;
        let mut body = SimBody::dynamic(Vec3::ZERO);

        run(&config, &mut body, &mut target, 10);

        let expected = 1.0 / (3.0 * config.predictive.position_interpolation_time_multiplier);
        let linear_alpha = body.linear_velocity.x / 6.0;
        let angular_alpha = body.angular_velocity.y / std::f32::consts::TAU;
        assert!((linear_alpha - expected).abs() < 1.0e-4);
        assert!((angular_alpha - expected).abs() < 1.0e-4);
    }

    #[test]
    fn accumulated_error_triggers_hard_snap_to_source() {
        let config = ReplicationConfig::default();
        let state = RigidBodyState::at(Vec3::new(30.0, 0.0, 0.0));
        let mut target = ingested(&config, update(state, 5), 10);
        target.accumulated_error_seconds = config.error_correction.error_accumulation_seconds + 1.0;
        let mut body = SimBody::dynamic(Vec3::ZERO).with_linear_velocity(Vec3::Y);

        let outcome = run(&config, &mut body, &mut target, 10);

        assert_eq!(body.position, Vec3::new(30.0, 0.0, 0.0));
        assert_eq!(body.linear_velocity, Vec3::ZERO);
        assert_eq!(target.accumulated_error_seconds(), 0.0);
        assert!(matches!(
            outcome.events.as_slice(),
            [ReplicationEvent::HardSnap { .. }]
        ));
    }

    #[test]
    fn resting_body_at_target_early_outs() {
        let config = ReplicationConfig::default();
        let mut target = ingested(&config, update(RigidBodyState::at(Vec3::ONE), 5), 10);
        let mut body = SimBody::dynamic(Vec3::ONE + Vec3::splat(0.1));

        let outcome = run(&config, &mut body, &mut target, 10);

        assert!(!outcome.remove);
        assert_eq!(body.transform_corrections(), 0);
        assert_eq!(body.position, Vec3::ONE + Vec3::splat(0.1));
    }

    #[test]
    fn asleep_target_sleeps_body_and_clears_after_timeout() {
        let config = ReplicationConfig::builder()
            .predictive(|pi| pi.sleep_seconds_clear_target = 2.0 * DT)
            .build();
        let mut target = ingested(&config, update(RigidBodyState::at(Vec3::ZERO).asleep(), 5), 10);
        let mut body = SimBody::dynamic(Vec3::ZERO);

        assert!(!run(&config, &mut body, &mut target, 10).remove);
        assert!(body.is_sleeping());
        assert_eq!(body.connected_sleep_requests(), 1);

        assert!(!run(&config, &mut body, &mut target, 11).remove);
        assert!(run(&config, &mut body, &mut target, 12).remove);
    }

    #[test]
    fn kinematic_body_steps_toward_predicted_target() {
        let config = ReplicationConfig::default();
        let mut target = ingested(&config, update(RigidBodyState::at(Vec3::new(4.0, 0.0, 0.0)), 5), 10);
        target.average_receive_interval = 4.0;
        let mut body = SimBody::kinematic(Vec3::ZERO);

        let outcome = run(&config, &mut body, &mut target, 10);

        assert!(!outcome.remove);
        let (position, rotation) = body.kinematic_target().expect("kinematic target set");
        assert!((position.x - 1.0).abs() < 1.0e-5);
        assert!(rotation.angle_between(Quat::IDENTITY) < 1.0e-5);
    }

    #[test]
    fn kinematic_body_clears_once_interpolation_window_passes() {
        let config = ReplicationConfig::builder()
            .predictive(|pi| pi.kinematic_prediction = false)
            .build();
        let mut target = ingested(&config, update(RigidBodyState::at(Vec3::new(4.0, 0.0, 0.0)), 5), 10);
        target.average_receive_interval = 2.0;
        let mut body = SimBody::kinematic(Vec3::ZERO);

        assert!(run(&config, &mut body, &mut target, 13).remove);
        assert!(body.kinematic_target().is_none());
    }

    #[test]
    fn waiting_target_skips_correction() {
        let config = ReplicationConfig::default();
        let mut target = ingested(&config, update(RigidBodyState::at(Vec3::new(9.0, 0.0, 0.0)), 5), 10);
        target.mark_waiting(50, ReplicationMode::PredictiveInterpolation);
        let mut body = SimBody::dynamic(Vec3::ZERO);

        run(&config, &mut body, &mut target, 10);

        assert_eq!(body.position, Vec3::ZERO);
        assert_eq!(body.transform_corrections(), 0);
    }

    #[test]
    fn interaction_with_resimulated_body_parks_target() {
        let config = ReplicationConfig::builder()
            .resimulation(|rs| rs.disable_replication_on_interaction = true)
            .build();
        let mut target = ingested(&config, update(RigidBodyState::at(Vec3::X), 5).with_frame_offset(3), 10);
        let mut body = SimBody::dynamic(Vec3::ZERO);
        body.in_resimulation_island = true;

        let outcome = run(&config, &mut body, &mut target, 10);

        assert!(target.is_waiting());
        assert_eq!(target.effective_mode(), ReplicationMode::Resimulation);
        assert!(matches!(
            outcome.events.as_slice(),
            [ReplicationEvent::WaitingForUpdate { until_server_frame: 13, .. }]
        ));
    }

    #[test]
    fn extrapolation_stops_at_tick_limit() {
        let config = ReplicationConfig::default();
        let state = RigidBodyState::at(Vec3::ZERO).with_linear_velocity(Vec3::new(60.0, 0.0, 0.0));
        let mut target = ingested(&config, update(state, 5), 10);
        target.allow_target_altering = true;
        target.tick_count = 1_000;
        let mut body = SimBody::dynamic(Vec3::ZERO);

        run(&config, &mut body, &mut target, 10);

        assert!(!target.allow_target_altering());
        assert_eq!(target.target_state().position, Vec3::ZERO);
    }
}
