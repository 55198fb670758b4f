//! Deterministic replay of recorded update traces through a [`SimulationLoop`].

use crate::engine::SimulationLoop;
use crate::network::replication::config::{ConfigError, ReplicationConfig};
use crate::network::{RigidBodyState, TargetUpdate};
use crate::physics::history::HistoryError;
use crate::physics::world::SimBody;
use crate::physics::BodyHandle;
use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("failed to read trace: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse trace: {0}")]
    Parse(#[from] serde_json::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    History(#[from] HistoryError),
    #[error("update scheduled at frame {frame} targets unknown body {body:?}")]
    UnknownBody { frame: i64, body: BodyHandle },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceBodyKind {
    #[default]
    Dynamic,
    Kinematic,
    Fixed,
}

/// Body spawned before the first frame. Handles are assigned in list order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceBody {
    pub kind: TraceBodyKind,
    pub position: Vec3,
    pub rotation: Quat,
    pub linear_velocity: Vec3,
    pub asleep: bool,
}

impl TraceBody {
    fn to_sim_body(&self) -> SimBody {
        let body = match self.kind {
            TraceBodyKind::Dynamic => SimBody::dynamic(self.position),
            TraceBodyKind::Kinematic => SimBody::kinematic(self.position),
            TraceBodyKind::Fixed => SimBody::fixed(self.position),
        }
        .with_rotation(self.rotation)
        .with_linear_velocity(self.linear_velocity);
        if self.asleep { body.asleep() } else { body }
    }
}

/// Update handed to the inbox right before local frame `at_frame` runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledUpdate {
    pub at_frame: i64,
    pub update: TargetUpdate,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReplayTrace {
    #[serde(default)]
    pub config: ReplicationConfig,
    #[serde(default)]
    pub history_frames: Option<usize>,
    #[serde(default)]
    pub parallel: bool,
    pub frames: u32,
    #[serde(default)]
    pub bodies: Vec<TraceBody>,
    #[serde(default)]
    pub updates: Vec<ScheduledUpdate>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReplaySummary {
    pub frames: u32,
    pub submitted: usize,
    pub ingested: usize,
    pub rejected: usize,
    pub hard_snaps: usize,
    pub evictions: usize,
    pub resimulations: u64,
    pub events: BTreeMap<&'static str, usize>,
    pub slowest_step_ms: f32,
    pub final_states: Vec<(BodyHandle, RigidBodyState)>,
}

impl ReplayTrace {
    pub fn from_json_str(json: &str) -> Result<Self, ReplayError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_path(path: &Path) -> Result<Self, ReplayError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    pub fn run(&self) -> Result<ReplaySummary, ReplayError> {
        self.config.validate()?;
        let mut sim = SimulationLoop::new(self.config.clone()).with_parallel_replication(self.parallel);
        if let Some(frames) = self.history_frames {
            sim = sim.with_history_capacity(frames)?;
        }

        let handles: Vec<BodyHandle> = self
            .bodies
            .iter()
            .map(|body| sim.world_mut().spawn(body.to_sim_body()))
            .collect();
        if let Some(orphan) = self
            .updates
            .iter()
            .find(|scheduled| !handles.contains(&scheduled.update.body))
        {
            return Err(ReplayError::UnknownBody {
                frame: orphan.at_frame,
                body: orphan.update.body,
            });
        }

        let mut pending: Vec<&ScheduledUpdate> = self.updates.iter().collect();
        pending.sort_by_key(|scheduled| scheduled.at_frame);
        let mut pending = pending.into_iter().peekable();

        let inbox = sim.scheduler().inbox();
        let mut summary = ReplaySummary {
            frames: self.frames,
            ..ReplaySummary::default()
        };
        for _ in 0..self.frames {
            let frame = sim.frame();
            while let Some(scheduled) = pending.next_if(|scheduled| scheduled.at_frame <= frame) {
                inbox.submit(scheduled.update.clone());
                summary.submitted += 1;
            }

            let report = sim.step();
            summary.ingested += report.ingested;
            summary.rejected += report.rejected;
            summary.hard_snaps += report.hard_snaps;
            for event in &report.events {
                *summary.events.entry(event.label()).or_default() += 1;
            }
            summary.slowest_step_ms = summary.slowest_step_ms.max(sim.last_profile().total_ms());
        }

        summary.evictions = summary.events.get("target_evicted").copied().unwrap_or(0);
        summary.resimulations = sim.resimulation_count();
        summary.final_states = sim.world().snapshot();
        log::info!(
            "[replay] {} frames, {} updates, {} hard snaps, {} resimulations",
            summary.frames,
            summary.submitted,
            summary.hard_snaps,
            summary.resimulations
        );
        Ok(summary)
    }
}
