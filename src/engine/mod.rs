//! Fixed-step driver tying the body world, the rewind history and the
//! replication scheduler together.

pub mod replay;

use crate::network::replication::config::{DEFAULT_FIXED_DELTA_SECONDS, ReplicationConfig};
use crate::network::replication::scheduler::{AdvanceReport, ReplicationScheduler};
use crate::physics::history::{FrameHistory, HistoryError, HistoryStore};
use crate::physics::world::BodyWorld;
use crate::physics::BodyHandle;
use std::time::{Duration, Instant};

const SLOW_STEP_THRESHOLD_MS: f32 = 8.0;
const SLOW_RESIMULATION_THRESHOLD_MS: f32 = 12.0;

#[derive(Debug, Clone)]
pub struct ResimulationProfile {
    pub from_frame: i64,
    pub frames: u32,
    pub bodies: Vec<BodyHandle>,
    pub duration: Duration,
}

impl ResimulationProfile {
    pub fn duration_ms(&self) -> f32 {
        self.duration.as_secs_f64() as f32 * 1000.0
    }
}

#[derive(Debug, Clone, Default)]
pub struct StepProfile {
    pub frame: i64,
    pub replication: Duration,
    pub integration: Duration,
    pub resimulation: Option<ResimulationProfile>,
    pub total: Duration,
}

impl StepProfile {
    pub fn total_ms(&self) -> f32 {
        self.total.as_secs_f64() as f32 * 1000.0
    }

    pub fn replication_ms(&self) -> f32 {
        self.replication.as_secs_f64() as f32 * 1000.0
    }

    pub fn integration_ms(&self) -> f32 {
        self.integration.as_secs_f64() as f32 * 1000.0
    }
}

/// One client simulation: replicate, integrate, record, then replay any
/// requested resimulation.
pub struct SimulationLoop {
    world: BodyWorld,
    history: FrameHistory,
    scheduler: ReplicationScheduler,
    delta_seconds: f32,
    parallel_replication: bool,
    last_profile: StepProfile,
    resimulations: u64,
}

impl SimulationLoop {
    pub fn new(config: ReplicationConfig) -> Self {
        let delta_seconds = if config.uses_fixed_step() {
            config.fixed_delta_seconds
        } else {
            DEFAULT_FIXED_DELTA_SECONDS
        };
        Self {
            world: BodyWorld::new(),
            history: FrameHistory::default(),
            scheduler: ReplicationScheduler::new(config),
            delta_seconds,
            parallel_replication: false,
            last_profile: StepProfile::default(),
            resimulations: 0,
        }
    }

    pub fn with_history_capacity(mut self, frames: usize) -> Result<Self, HistoryError> {
        self.history = FrameHistory::with_capacity(frames)?;
        Ok(self)
    }

    pub fn with_parallel_replication(mut self, enabled: bool) -> Self {
        self.parallel_replication = enabled;
        self
    }

    pub fn world(&self) -> &BodyWorld {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut BodyWorld {
        &mut self.world
    }

    pub fn scheduler(&self) -> &ReplicationScheduler {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut ReplicationScheduler {
        &mut self.scheduler
    }

    pub fn history(&self) -> &FrameHistory {
        &self.history
    }

    pub fn delta_seconds(&self) -> f32 {
        self.delta_seconds
    }

    /// Frame the next `step` simulates.
    pub fn frame(&self) -> i64 {
        self.scheduler.frame()
    }

    pub fn last_profile(&self) -> &StepProfile {
        &self.last_profile
    }

    pub fn resimulation_count(&self) -> u64 {
        self.resimulations
    }

    pub fn step(&mut self) -> AdvanceReport {
        let step_start = Instant::now();
        let frame = self.scheduler.frame();
        let delta_seconds = self.delta_seconds;

        let replication_start = Instant::now();
        let report = if self.parallel_replication {
            self.scheduler
                .advance_parallel(delta_seconds, &mut self.world, Some(&mut self.history))
        } else {
            self.scheduler
                .advance(delta_seconds, &mut self.world, Some(&mut self.history))
        };
        let replication = replication_start.elapsed();

        let integration_start = Instant::now();
        self.world.step(delta_seconds);
        self.record(frame);
        let integration = integration_start.elapsed();

        let resimulation = self.resimulate(frame, &report);

        let profile = StepProfile {
            frame,
            replication,
            integration,
            resimulation,
            total: step_start.elapsed(),
        };

        if profile.total_ms() > SLOW_STEP_THRESHOLD_MS {
            log::warn!(
                "[engine] frame {frame} took {:.3} ms (replication {:.3} ms, integration {:.3} ms)",
                profile.total_ms(),
                profile.replication_ms(),
                profile.integration_ms()
            );
        }
        self.last_profile = profile;
        report
    }

    /// Steps `frames` times and returns every report.
    pub fn run(&mut self, frames: u32) -> Vec<AdvanceReport> {
        (0..frames).map(|_| self.step()).collect()
    }

    fn record(&mut self, frame: i64) {
        let snapshot = self.world.snapshot();
        if let Err(err) = self.history.record_frame(frame, snapshot.iter().copied()) {
            log::warn!("[history] {err}; discarding newer frames");
            self.history.truncate_after(frame - 1);
            if let Err(err) = self.history.record_frame(frame, snapshot) {
                log::warn!("[history] frame {frame} not recorded: {err}");
            }
        }
    }

    /// Rewinds to the earliest requested frame and re-integrates up to
    /// `current_frame`, overriding each requested body at its own frame.
    fn resimulate(&mut self, current_frame: i64, report: &AdvanceReport) -> Option<ResimulationProfile> {
        let (from_frame, bodies) = self.history.take_resimulation_request()?;
        if from_frame > current_frame || !self.history.is_frame_within_history(from_frame) {
            log::warn!(
                "[history] cannot resimulate from frame {from_frame} (current {current_frame})"
            );
            return None;
        }

        let start = Instant::now();
        let Some(recorded) = self.history.frame_states(from_frame).cloned() else {
            log::warn!(
                "[history] frame {from_frame} has no recorded states, dropping resimulation for {bodies:?}"
            );
            return None;
        };
        for (handle, state) in &recorded {
            if let Some(body) = self.world.get_mut(*handle) {
                body.restore(state);
            }
        }
        self.restore_authoritative(report, from_frame);

        self.history.truncate_after(from_frame - 1);
        self.record(from_frame);
        let mut frames = 0;
        for frame in (from_frame + 1)..=current_frame {
            self.world.step(self.delta_seconds);
            self.restore_authoritative(report, frame);
            self.record(frame);
            frames += 1;
        }
        self.history.block_resimulation_until(from_frame);
        self.resimulations += 1;
        self.scheduler.on_resimulation_finished();

        let profile = ResimulationProfile {
            from_frame,
            frames,
            bodies,
            duration: start.elapsed(),
        };
        log::debug!(
            "[engine] resimulated {} frame(s) from {from_frame} for {} bodies",
            profile.frames,
            profile.bodies.len()
        );
        if profile.duration_ms() > SLOW_RESIMULATION_THRESHOLD_MS {
            log::warn!(
                "[engine] resimulation from frame {from_frame} took {:.3} ms",
                profile.duration_ms()
            );
        }
        Some(profile)
    }

    /// Overrides every body the server reported for `frame` with its
    /// authoritative end-of-frame state.
    fn restore_authoritative(&mut self, report: &AdvanceReport, frame: i64) {
        for request in report
            .resimulation_requests
            .iter()
            .filter(|request| request.frame == frame)
        {
            if let Some(body) = self.world.get_mut(request.body) {
                body.restore(&request.state);
            }
        }
    }
}
