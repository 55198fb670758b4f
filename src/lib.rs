//! Client-side rigid-body replication: authoritative server snapshots are
//! folded into per-body targets and reconciled against local simulation by
//! one of three strategies.

pub mod engine;
pub mod math;
pub mod network;
pub mod physics;
pub mod telemetry;

pub use engine::SimulationLoop;
pub use network::replication::{ReplicationConfig, ReplicationScheduler};
pub use network::{ReplicationMode, RigidBodyState, TargetUpdate};
