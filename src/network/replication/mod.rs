//! Client-side reconciliation of locally simulated rigid bodies against
//! authoritative server snapshots.

pub mod accumulator;
pub mod config;
pub mod lod;
pub mod scheduler;
pub mod strategy;
pub mod target;

pub use accumulator::{HardSnapPolicy, HardSnapReason};
pub use config::{
    ConfigError, ErrorCorrectionSettings, PredictiveSettings, ReplicationConfig,
    ResimulationSettings,
};
pub use lod::{LodData, LodQuery, ReplicationLod};
pub use scheduler::{
    AdvanceReport, IngestStatus, ReplicationInbox, ReplicationScheduler, ResimulationRequest,
};
pub use strategy::{ReplicationStrategy, StrategyContext, StrategyOutcome};
pub use target::{ModeDemotion, ReplicationTarget, TargetPhase};
