use glam::{Quat, Vec3};
use theta_netphys::math::StateDelta;
use theta_netphys::network::replication::{
    IngestStatus, ModeDemotion, ReplicationConfig, ReplicationScheduler,
};
use theta_netphys::network::{ReplicationMode, RigidBodyState, TargetUpdate};
use theta_netphys::physics::history::{FrameHistory, HistoryStore};
use theta_netphys::physics::world::{BodyWorld, SimBody};
use theta_netphys::physics::BodyHandle;
use theta_netphys::telemetry::ReplicationEvent;

const DT: f32 = 1.0 / 60.0;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn world_with(body: SimBody) -> (BodyWorld, BodyHandle) {
    let mut world = BodyWorld::new();
    let handle = world.spawn(body);
    (world, handle)
}

fn at_x(x: f32) -> RigidBodyState {
    RigidBodyState::at(Vec3::new(x, 0.0, 0.0))
}

#[test]
fn duplicate_frame_leaves_target_unchanged_except_latency() {
    init_logging();
    let mut scheduler = ReplicationScheduler::default();
    let body = BodyHandle::new(0, 0);
    let update = TargetUpdate::new(body, at_x(3.0), 7).with_latency(0.05);

    assert_eq!(scheduler.ingest(update.clone()), IngestStatus::Created);
    let before = scheduler.target(body).expect("target").clone();

    assert_eq!(
        scheduler.ingest(update.with_latency(0.2)),
        IngestStatus::Stale
    );
    let after = scheduler.target(body).expect("target");
    assert_eq!(after.target_state(), before.target_state());
    assert_eq!(after.server_frame(), before.server_frame());
    assert_eq!(after.receive_frame(), before.receive_frame());
    assert_eq!(after.updates_received(), before.updates_received());
    assert!((after.latency_one_way() - 0.2).abs() < f32::EPSILON);
}

#[test]
fn out_of_order_frames_settle_on_the_newest_state() {
    init_logging();
    let body = BodyHandle::new(0, 0);

    let mut in_order = ReplicationScheduler::default();
    in_order.ingest(TargetUpdate::new(body, at_x(1.0), 1));
    in_order.ingest(TargetUpdate::new(body, at_x(2.0), 2));

    let mut reversed = ReplicationScheduler::default();
    reversed.ingest(TargetUpdate::new(body, at_x(2.0), 2));
    assert_eq!(
        reversed.ingest(TargetUpdate::new(body, at_x(1.0), 1)),
        IngestStatus::Stale
    );

    assert_eq!(
        in_order.target(body).expect("in order").target_state(),
        reversed.target(body).expect("reversed").target_state()
    );
}

#[test]
fn far_body_hard_snaps_onto_target() {
    init_logging();
    let config = ReplicationConfig::builder()
        .error_correction(|ec| ec.max_linear_hard_snap_distance = 5.0)
        .build();
    let mut scheduler = ReplicationScheduler::new(config.clone());
    let (mut world, body) = world_with(SimBody::dynamic(Vec3::new(10.0, 0.0, 0.0)));

    scheduler.ingest(TargetUpdate::new(body, RigidBodyState::at(Vec3::ZERO), 100));
    let report = scheduler.advance(DT, &mut world, None);

    assert_eq!(report.hard_snaps, 1);
    let snapped = world.get(body).expect("body");
    assert!(snapped.position.length() < 1.0e-4);

    let target = scheduler.target(body).expect("target kept after snap");
    assert_eq!(target.accumulated_error_seconds(), 0.0);
    let residual = StateDelta::between(
        snapped.position,
        snapped.rotation,
        target.target_state().position,
        target.target_state().rotation,
    );
    let ec = &config.error_correction;
    assert!(
        residual.error(ec.error_per_linear_difference, ec.error_per_angular_difference)
            < ec.max_restored_state_error
    );
    assert!(report.events.iter().any(|event| matches!(
        event,
        ReplicationEvent::HardSnap {
            mode: ReplicationMode::Default,
            ..
        }
    )));
}

#[test]
fn repeated_server_frame_is_rejected_unless_zero() {
    init_logging();
    let mut scheduler = ReplicationScheduler::default();
    let body = BodyHandle::new(4, 1);

    scheduler.ingest(TargetUpdate::new(body, at_x(1.0), 1));
    assert_eq!(
        scheduler.ingest(TargetUpdate::new(body, at_x(9.0), 1)),
        IngestStatus::Stale
    );
    assert_eq!(scheduler.target(body).expect("target").target_state().position.x, 1.0);

    assert_eq!(
        scheduler.ingest(TargetUpdate::new(body, at_x(5.0), 0)),
        IngestStatus::Updated
    );
    assert_eq!(scheduler.target(body).expect("target").target_state().position.x, 5.0);
}

#[test]
fn sleeping_snapshots_hold_a_sleeping_body_in_place() {
    init_logging();
    let mut scheduler = ReplicationScheduler::default();
    let (mut world, body) = world_with(SimBody::dynamic(Vec3::new(1.0, 0.0, 0.0)).asleep());

    scheduler.ingest(TargetUpdate::new(body, RigidBodyState::at(Vec3::ZERO).asleep(), 1));
    scheduler.ingest(TargetUpdate::new(body, RigidBodyState::at(Vec3::ZERO).asleep(), 2));
    assert!(!scheduler.target(body).expect("target").allow_target_altering());

    for _ in 0..3 {
        scheduler.advance(DT, &mut world, None);
    }

    let held = world.get(body).expect("body");
    assert_eq!(held.position, Vec3::new(1.0, 0.0, 0.0));
    assert!(scheduler.target(body).is_some());
}

#[test]
fn waiting_targets_never_move_their_body() {
    init_logging();
    for mode in [
        ReplicationMode::Default,
        ReplicationMode::PredictiveInterpolation,
        ReplicationMode::Resimulation,
    ] {
        let mut scheduler = ReplicationScheduler::default();
        let start = Vec3::new(5.0, 1.0, 0.0);
        let rotation = Quat::from_rotation_y(0.3);
        let (mut world, body) = world_with(SimBody::dynamic(start).with_rotation(rotation));

        scheduler.ingest(TargetUpdate::new(body, RigidBodyState::at(Vec3::ZERO), 1).with_mode(mode));
        assert!(scheduler.mark_waiting(body, 10, mode));

        // an empty history leaves a Resimulation target nothing to compare against
        let mut history = FrameHistory::default();
        for _ in 0..3 {
            let report = scheduler.advance(DT, &mut world, Some(&mut history));
            assert!(!report.was_evicted(body), "{mode:?} evicted a waiting target");
        }
        let parked = world.get(body).expect("body");
        assert_eq!(parked.position, start, "{mode:?} moved a waiting body");
        assert_eq!(parked.rotation, rotation, "{mode:?} rotated a waiting body");
        assert!(scheduler.target(body).expect("target").is_waiting());
    }
}

#[test]
fn waiting_ends_once_the_awaited_frame_arrives() {
    init_logging();
    let mut scheduler = ReplicationScheduler::default();
    let (mut world, body) = world_with(SimBody::dynamic(Vec3::new(5.0, 0.0, 0.0)));
    let update = |frame| {
        TargetUpdate::new(body, RigidBodyState::at(Vec3::ZERO), frame)
            .with_mode(ReplicationMode::PredictiveInterpolation)
    };

    scheduler.ingest(update(1));
    scheduler.mark_waiting(body, 10, ReplicationMode::PredictiveInterpolation);
    scheduler.ingest(update(9));
    assert!(scheduler.target(body).expect("target").is_waiting());

    scheduler.ingest(update(10));
    assert!(!scheduler.target(body).expect("target").is_waiting());
    scheduler.advance(DT, &mut world, None);
    assert!(world.get(body).expect("body").position.x < 5.0);
}

#[test]
fn resimulation_target_older_than_history_is_demoted_for_good() {
    init_logging();
    let mut scheduler = ReplicationScheduler::default();
    let (mut world, body) = world_with(SimBody::dynamic(Vec3::ZERO));
    let mut history = FrameHistory::default();
    for frame in 10..=13 {
        history
            .record_frame(frame, world.snapshot())
            .expect("record frame");
    }
    assert_eq!(history.earliest_retained_frame(), Some(10));

    scheduler.ingest(
        TargetUpdate::new(body, at_x(4.0), 12)
            .with_mode(ReplicationMode::Resimulation)
            .with_frame_offset(5),
    );
    let report = scheduler.advance(DT, &mut world, Some(&mut history));

    let target = scheduler.target(body).expect("target");
    assert_eq!(target.mode(), ReplicationMode::PredictiveInterpolation);
    assert_eq!(target.demotion(), ModeDemotion::Permanent);
    assert!(report.resimulation_requests.is_empty());
    assert!(history.pending_resimulations().is_empty());
    assert!(report.events.iter().any(|event| matches!(
        event,
        ReplicationEvent::ModeChanged {
            to: ReplicationMode::PredictiveInterpolation,
            permanent: true,
            ..
        }
    )));

    scheduler.ingest(
        TargetUpdate::new(body, at_x(4.0), 30)
            .with_mode(ReplicationMode::Resimulation)
            .with_frame_offset(0),
    );
    assert_eq!(
        scheduler.target(body).expect("target").mode(),
        ReplicationMode::PredictiveInterpolation
    );
}

#[test]
fn teleport_forces_a_hard_snap_on_the_next_advance() {
    init_logging();
    let config = ReplicationConfig::builder()
        .predictive(|pi| pi.teleport_detection_min_distance = 5.0)
        .build();
    let error_budget = config.error_correction.error_accumulation_seconds;
    let mut scheduler = ReplicationScheduler::new(config);
    let (mut world, body) = world_with(SimBody::dynamic(Vec3::ZERO));
    let update = |x, frame| {
        TargetUpdate::new(body, at_x(x), frame).with_mode(ReplicationMode::PredictiveInterpolation)
    };

    scheduler.ingest(update(0.0, 1));
    scheduler.ingest(update(50.0, 2));
    assert!(scheduler.target(body).expect("target").accumulated_error_seconds() > error_budget);

    let report = scheduler.advance(DT, &mut world, None);
    assert_eq!(report.hard_snaps, 1);
    assert!((world.get(body).expect("body").position.x - 50.0).abs() < 1.0e-4);
    assert_eq!(scheduler.target(body).expect("target").accumulated_error_seconds(), 0.0);
}

#[test]
fn despawned_body_evicts_its_target() {
    init_logging();
    let mut scheduler = ReplicationScheduler::default();
    let (mut world, body) = world_with(SimBody::dynamic(Vec3::ZERO));
    scheduler.ingest(TargetUpdate::new(body, at_x(1.0), 1));

    world.despawn(body).expect("despawn");
    let report = scheduler.advance(DT, &mut world, None);

    assert!(report.was_evicted(body));
    assert!(scheduler.is_empty());
}
