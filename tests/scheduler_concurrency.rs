use glam::Vec3;
use std::thread;
use theta_netphys::network::replication::{ReplicationConfig, ReplicationScheduler};
use theta_netphys::network::{RigidBodyState, TargetUpdate};
use theta_netphys::physics::world::{BodyWorld, SimBody};
use theta_netphys::physics::BodyHandle;
use theta_netphys::SimulationLoop;

const DT: f32 = 1.0 / 60.0;

#[test]
fn updates_from_a_receive_thread_are_applied_on_advance() {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut scheduler = ReplicationScheduler::default();
    let mut world = BodyWorld::new();
    let bodies: Vec<BodyHandle> = (0..8)
        .map(|index| world.spawn(SimBody::dynamic(Vec3::new(index as f32, 0.0, 0.0))))
        .collect();

    let inbox = scheduler.inbox();
    let producer_bodies = bodies.clone();
    let producer = thread::spawn(move || {
        for frame in 1..=20 {
            inbox.submit_batch(producer_bodies.iter().map(|body| {
                TargetUpdate::new(*body, RigidBodyState::at(Vec3::new(0.0, frame as f32, 0.0)), frame)
            }));
        }
    });
    producer.join().expect("producer thread");

    let report = scheduler.advance(DT, &mut world, None);
    assert_eq!(report.ingested, 8 * 20);
    assert_eq!(report.rejected, 0);
    assert_eq!(scheduler.len(), bodies.len());
    for body in &bodies {
        let target = scheduler.target(*body).expect("target");
        assert_eq!(target.server_frame(), 20);
        assert_eq!(target.target_state().position.y, 20.0);
    }
    assert!(scheduler.inbox().is_empty());
}

#[test]
fn parallel_and_sequential_advance_agree() {
    let config = ReplicationConfig::builder()
        .error_correction(|ec| ec.max_linear_hard_snap_distance = 3.0)
        .build();
    let mut sequential = SimulationLoop::new(config.clone());
    let mut parallel = SimulationLoop::new(config).with_parallel_replication(true);

    for sim in [&mut sequential, &mut parallel] {
        let bodies: Vec<BodyHandle> = (0..32)
            .map(|index| {
                sim.world_mut()
                    .spawn(SimBody::dynamic(Vec3::new(index as f32 * 0.25, 0.0, 0.0)))
            })
            .collect();
        let inbox = sim.scheduler().inbox();
        inbox.submit_batch(
            bodies
                .iter()
                .map(|body| TargetUpdate::new(*body, RigidBodyState::at(Vec3::ZERO), 1)),
        );
        sim.run(4);
    }

    let expected = sequential.world().snapshot();
    let actual = parallel.world().snapshot();
    assert_eq!(expected.len(), actual.len());
    for ((handle_a, a), (handle_b, b)) in expected.iter().zip(actual.iter()) {
        assert_eq!(handle_a, handle_b);
        assert!((a.position - b.position).length() < 1.0e-5);
    }
    assert_eq!(
        sequential.scheduler().len(),
        parallel.scheduler().len()
    );
}
