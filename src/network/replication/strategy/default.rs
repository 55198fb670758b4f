use crate::math::StateDelta;
use crate::network::replication::accumulator::{ProgressSample, accumulate_default, apply_hard_snap};
use crate::network::replication::strategy::{ReplicationStrategy, StrategyContext, StrategyOutcome};
use crate::network::replication::target::ReplicationTarget;
use crate::network::ReplicationMode;
use crate::physics::{ObjectState, PhysicsBody};
use crate::telemetry::ReplicationEvent;

/// Spring toward the latency-extrapolated target, falling back to a hard snap
/// when the body is far away or stops converging.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultStrategy;

struct BlendFactors {
    linear_velocity_coefficient: f32,
    angular_velocity_coefficient: f32,
    position_lerp: f32,
    angle_lerp: f32,
}

impl BlendFactors {
    fn resolve(target: &ReplicationTarget, ctx: &StrategyContext<'_>) -> Self {
        let ec = &ctx.config.error_correction;
        match target.error_correction {
            Some(over) => Self {
                linear_velocity_coefficient: over.linear_velocity_coefficient,
                angular_velocity_coefficient: over.angular_velocity_coefficient,
                position_lerp: over.position_lerp,
                angle_lerp: over.angle_lerp,
            },
            None => Self {
                linear_velocity_coefficient: ec.linear_velocity_coefficient,
                angular_velocity_coefficient: ec.angular_velocity_coefficient,
                position_lerp: ec.position_lerp,
                angle_lerp: ec.angle_lerp,
            },
        }
    }
}

impl DefaultStrategy {
    fn finish(
        &self,
        body: &mut dyn PhysicsBody,
        target: &mut ReplicationTarget,
        ctx: &StrategyContext<'_>,
        mut outcome: StrategyOutcome,
    ) -> StrategyOutcome {
        let should_sleep = target.target_state.should_sleep();
        if should_sleep && !body.is_kinematic() && !body.is_sleeping() {
            body.set_object_state(ObjectState::Sleeping);
        }

        target.accumulated_sleep_seconds = if body.is_sleeping() {
            target.accumulated_sleep_seconds + ctx.delta_seconds
        } else {
            0.0
        };

        let pi = &ctx.config.predictive;
        if should_sleep
            && !pi.dont_clear_target
            && target.accumulated_sleep_seconds >= pi.sleep_seconds_clear_target
        {
            log::debug!(
                "[replication] {:?} asleep for {:.2}s, clearing target",
                target.body(),
                target.accumulated_sleep_seconds
            );
            outcome.remove = true;
        }
        outcome
    }
}

impl ReplicationStrategy for DefaultStrategy {
    fn mode(&self) -> ReplicationMode {
        ReplicationMode::Default
    }

    fn apply(
        &self,
        body: &mut dyn PhysicsBody,
        target: &mut ReplicationTarget,
        ctx: &StrategyContext<'_>,
    ) -> StrategyOutcome {
        if !body.is_simulated() {
            log::debug!("[replication] {:?} is not simulated, dropping target", target.body());
            return StrategyOutcome::remove();
        }
        if !target.target_state.has_valid_rotation() {
            log::warn!(
                "[replication] {:?} target rotation {:?} is not a unit quaternion",
                target.body(),
                target.target_state.rotation
            );
            return StrategyOutcome::remove();
        }

        let outcome = StrategyOutcome::keep();
        if target.is_waiting() {
            return self.finish(body, target, ctx, outcome);
        }
        // Both snapshots asleep: hold the body where it settled.
        if !target.allow_target_altering && target.target_state.should_sleep() && body.is_sleeping() {
            return self.finish(body, target, ctx, outcome);
        }

        let ec = &ctx.config.error_correction;
        let dt = ctx.delta_seconds;
        let ping = target.latency_one_way.clamp(0.0, ec.ping_limit);
        let extrapolated = target.target_state.extrapolated(ping * ec.ping_extrapolation);

        let current_position = body.position();
        let current_rotation = body.rotation();
        let delta = StateDelta::between(
            current_position,
            current_rotation,
            extrapolated.position,
            extrapolated.rotation,
        );
        let error = delta.error(ec.error_per_linear_difference, ec.error_per_angular_difference);

        let mut outcome = outcome;
        if error < ec.max_restored_state_error {
            target.accumulated_error_seconds = 0.0;
        } else {
            target.accumulated_error_seconds = accumulate_default(
                target.accumulated_error_seconds,
                dt,
                ProgressSample {
                    current: current_position,
                    prev_pos: target.prev_pos,
                    prev_pos_target: target.prev_pos_target,
                    target: extrapolated.position,
                },
                ec,
            );

            if let Some(reason) = ctx
                .policy
                .evaluate_default(delta.linear_size, target.accumulated_error_seconds)
            {
                log::debug!(
                    "[replication] hard snap {:?} ({reason:?}, error {error:.3})",
                    target.body()
                );
                apply_hard_snap(
                    body,
                    extrapolated.position,
                    extrapolated.rotation,
                    extrapolated.linear_velocity,
                    extrapolated.angular_velocity_deg,
                    ec,
                );
                target.accumulated_error_seconds = 0.0;
                outcome.push(ReplicationEvent::HardSnap {
                    body: target.body(),
                    mode: ReplicationMode::Default,
                    reason,
                });
            } else {
                let factors = BlendFactors::resolve(target, ctx);
                let linear_velocity = extrapolated.linear_velocity
                    + delta.linear * factors.linear_velocity_coefficient * dt;
                let angular_velocity_deg = extrapolated.angular_velocity_deg
                    + delta.angular_axis
                        * delta.angular_degrees
                        * factors.angular_velocity_coefficient
                        * dt;

                body.set_position(current_position.lerp(extrapolated.position, factors.position_lerp));
                body.set_rotation(
                    current_rotation
                        .slerp(extrapolated.rotation, factors.angle_lerp)
                        .normalize(),
                );
                body.set_linear_velocity(linear_velocity);
                body.set_angular_velocity(angular_velocity_deg * (std::f32::consts::PI / 180.0));
            }
        }

        target.prev_pos_target = extrapolated.position;
        target.prev_pos = current_position;
        self.finish(body, target, ctx, outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::replication::config::ReplicationConfig;
    use crate::network::replication::strategy::testing::ingested;
    use crate::network::{ErrorCorrectionOverride, RigidBodyState, TargetUpdate};
    use crate::physics::BodyHandle;
    use crate::physics::world::SimBody;
    use crate::telemetry::ReplicationEvent;
    use glam::{Quat, Vec3};

    fn handle() -> BodyHandle {
        BodyHandle::new(0, 0)
    }

    fn run(
        config: &ReplicationConfig,
        body: &mut SimBody,
        target: &mut ReplicationTarget,
    ) -> StrategyOutcome {
        let ctx = StrategyContext::new(config, 1.0 / 60.0, 10);
        DefaultStrategy.apply(body, target, &ctx)
    }

    #[test]
    fn far_body_is_hard_snapped_onto_target() {
        let config = ReplicationConfig::builder()
            .error_correction(|ec| ec.max_linear_hard_snap_distance = 5.0)
            .build();
        let mut target = ingested(
            &config,
            TargetUpdate::new(handle(), RigidBodyState::at(Vec3::ZERO), 100),
            10,
        );
        let mut body = SimBody::dynamic(Vec3::new(10.0, 0.0, 0.0));

        let outcome = run(&config, &mut body, &mut target);

        assert!(!outcome.remove);
        assert!(body.position.length() < 1.0e-4);
        assert_eq!(target.accumulated_error_seconds(), 0.0);
        assert!(matches!(
            outcome.events.as_slice(),
            [ReplicationEvent::HardSnap { .. }]
        ));
    }

    #[test]
    fn small_error_is_softly_corrected_through_velocity() {
        let config = ReplicationConfig::default();
        let mut target = ingested(
            &config,
            TargetUpdate::new(handle(), RigidBodyState::at(Vec3::new(2.0, 0.0, 0.0)), 5),
            10,
        );
        let mut body = SimBody::dynamic(Vec3::ZERO);

        let outcome = run(&config, &mut body, &mut target);

        assert!(outcome.events.is_empty());
        // position_lerp defaults to zero so only velocity moves the body
        assert_eq!(body.position, Vec3::ZERO);
        assert!(body.linear_velocity.x > 0.0);
        assert_eq!(target.prev_pos_target(), Vec3::new(2.0, 0.0, 0.0));
    }

    #[test]
    fn converged_target_is_kept() {
        let config = ReplicationConfig::default();
        let mut target = ingested(
            &config,
            TargetUpdate::new(handle(), RigidBodyState::at(Vec3::ONE), 5),
            10,
        );
        let mut body = SimBody::dynamic(Vec3::ONE);

        let outcome = run(&config, &mut body, &mut target);
        assert!(!outcome.remove);
        assert_eq!(body.transform_corrections(), 0);
    }

    #[test]
    fn invalid_rotation_clears_target() {
        let config = ReplicationConfig::default();
        let state = RigidBodyState::at(Vec3::ZERO).with_rotation(Quat::from_xyzw(0.0, 0.0, 0.0, 0.0));
        let mut target = ingested(&config, TargetUpdate::new(handle(), state, 5), 10);
        let mut body = SimBody::dynamic(Vec3::X);

        assert!(run(&config, &mut body, &mut target).remove);
        assert_eq!(body.position, Vec3::X);
    }

    #[test]
    fn static_bodies_are_not_replicated() {
        let config = ReplicationConfig::default();
        let mut target = ingested(
            &config,
            TargetUpdate::new(handle(), RigidBodyState::at(Vec3::ZERO), 5),
            10,
        );
        let mut body = SimBody::fixed(Vec3::X);
        assert!(run(&config, &mut body, &mut target).remove);
    }

    #[test]
    fn per_update_override_replaces_blend_factors() {
        let config = ReplicationConfig::default();
        let update = TargetUpdate::new(handle(), RigidBodyState::at(Vec3::new(2.0, 0.0, 0.0)), 5)
            .with_error_correction(ErrorCorrectionOverride {
                linear_velocity_coefficient: 0.0,
                angular_velocity_coefficient: 0.0,
                position_lerp: 0.5,
                angle_lerp: 0.0,
            });
        let mut target = ingested(&config, update, 10);
        let mut body = SimBody::dynamic(Vec3::ZERO);

        run(&config, &mut body, &mut target);

        assert!((body.position.x - 1.0).abs() < 1.0e-5);
        assert_eq!(body.linear_velocity, Vec3::ZERO);
    }

    #[test]
    fn sleeping_target_puts_body_to_sleep() {
        let config = ReplicationConfig::default();
        let mut target = ingested(
            &config,
            TargetUpdate::new(handle(), RigidBodyState::at(Vec3::ZERO).asleep(), 5),
            10,
        );
        let mut body = SimBody::dynamic(Vec3::ZERO);

        run(&config, &mut body, &mut target);
        assert!(body.is_sleeping());
    }

    #[test]
    fn waiting_target_leaves_transform_alone() {
        let config = ReplicationConfig::default();
        let mut target = ingested(
            &config,
            TargetUpdate::new(handle(), RigidBodyState::at(Vec3::new(50.0, 0.0, 0.0)), 5),
            10,
        );
        target.mark_waiting(20, ReplicationMode::Default);
        let mut body = SimBody::dynamic(Vec3::ZERO).with_linear_velocity(Vec3::Y);

        run(&config, &mut body, &mut target);

        assert_eq!(body.position, Vec3::ZERO);
        assert_eq!(body.linear_velocity, Vec3::Y);
    }
}
