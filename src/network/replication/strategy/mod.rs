//! Per-mode correction strategies.
//!
//! A strategy reads one target and nudges one body toward it. Side effects
//! that reach beyond the body (events, resimulation requests, eviction) are
//! returned in a [`StrategyOutcome`] and applied by the scheduler afterwards,
//! which keeps dispatch free of shared mutable state.

pub mod default;
pub mod predictive;
pub mod resimulation;

pub use default::DefaultStrategy;
pub use predictive::PredictiveInterpolationStrategy;
pub use resimulation::ResimulationStrategy;

use crate::network::replication::accumulator::HardSnapPolicy;
use crate::network::replication::config::ReplicationConfig;
use crate::network::replication::target::ReplicationTarget;
use crate::network::ReplicationMode;
use crate::physics::history::HistoryStore;
use crate::physics::PhysicsBody;
use crate::telemetry::ReplicationEvent;

/// Read-only inputs shared by every strategy invocation in one tick.
#[derive(Clone, Copy)]
pub struct StrategyContext<'a> {
    pub config: &'a ReplicationConfig,
    pub policy: HardSnapPolicy,
    pub delta_seconds: f32,
    /// Local physics frame being simulated.
    pub local_frame: i64,
    pub history: Option<&'a dyn HistoryStore>,
}

impl<'a> StrategyContext<'a> {
    pub fn new(config: &'a ReplicationConfig, delta_seconds: f32, local_frame: i64) -> Self {
        Self {
            config,
            policy: HardSnapPolicy::from_config(config),
            delta_seconds,
            local_frame,
            history: None,
        }
    }

    pub fn with_history(mut self, history: &'a dyn HistoryStore) -> Self {
        self.history = Some(history);
        self
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct StrategyOutcome {
    /// The target is finished and should be evicted.
    pub remove: bool,
    pub events: Vec<ReplicationEvent>,
    /// Local frame to resimulate from.
    pub resimulation_frame: Option<i64>,
}

impl StrategyOutcome {
    pub fn keep() -> Self {
        Self::default()
    }

    pub fn remove() -> Self {
        Self {
            remove: true,
            ..Self::default()
        }
    }

    pub fn push(&mut self, event: ReplicationEvent) {
        self.events.push(event);
    }
}

/// One correction algorithm, selected by a target's effective mode.
pub trait ReplicationStrategy: Send + Sync {
    fn mode(&self) -> ReplicationMode;

    fn apply(
        &self,
        body: &mut dyn PhysicsBody,
        target: &mut ReplicationTarget,
        ctx: &StrategyContext<'_>,
    ) -> StrategyOutcome;
}

/// One boxed strategy per mode.
pub struct StrategySet {
    default: Box<dyn ReplicationStrategy>,
    predictive: Box<dyn ReplicationStrategy>,
    resimulation: Box<dyn ReplicationStrategy>,
}

impl Default for StrategySet {
    fn default() -> Self {
        Self {
            default: Box::new(DefaultStrategy),
            predictive: Box::new(PredictiveInterpolationStrategy),
            resimulation: Box::new(ResimulationStrategy),
        }
    }
}

impl StrategySet {
    pub fn get(&self, mode: ReplicationMode) -> &dyn ReplicationStrategy {
        match mode {
            ReplicationMode::Default => self.default.as_ref(),
            ReplicationMode::PredictiveInterpolation => self.predictive.as_ref(),
            ReplicationMode::Resimulation => self.resimulation.as_ref(),
        }
    }

    /// Replaces the strategy registered for `strategy.mode()`.
    pub fn replace(&mut self, strategy: Box<dyn ReplicationStrategy>) {
        match strategy.mode() {
            ReplicationMode::Default => self.default = strategy,
            ReplicationMode::PredictiveInterpolation => self.predictive = strategy,
            ReplicationMode::Resimulation => self.resimulation = strategy,
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use crate::network::replication::target::{IngestContext, ReplicationTarget};
    use crate::network::replication::config::ReplicationConfig;
    use crate::network::TargetUpdate;

    /// Target that has already ingested `update` at `local_frame`.
    pub fn ingested(
        config: &ReplicationConfig,
        update: TargetUpdate,
        local_frame: i64,
    ) -> ReplicationTarget {
        let mut target = ReplicationTarget::new(&update);
        target.ingest(
            &update,
            &IngestContext {
                config,
                local_frame,
                lod: None,
            },
        );
        target
    }
}
