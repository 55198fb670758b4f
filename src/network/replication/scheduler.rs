use crate::network::replication::config::{ConfigError, ReplicationConfig};
use crate::network::replication::lod::{LodQuery, ReplicationLod};
use crate::network::replication::strategy::resimulation::check_history_window;
use crate::network::replication::strategy::{
    ReplicationStrategy, StrategyContext, StrategyOutcome, StrategySet,
};
use crate::network::replication::target::{IngestContext, IngestOutcome, ModeDemotion, ReplicationTarget};
use crate::network::{ReplicationMode, RigidBodyState, TargetUpdate};
use crate::physics::history::HistoryStore;
use crate::physics::{BodyHandle, BodyStore, PhysicsBody};
use crate::telemetry::{EvictionReason, RejectReason, ReplicationEvent, ReplicationObserver};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

const SLOW_ADVANCE_THRESHOLD_MS: f32 = 2.0;

/// Producer side of the scheduler's update queue. Clones share one queue, so
/// the network receive path can own a handle while the simulation thread owns
/// the scheduler.
#[derive(Debug, Clone, Default)]
pub struct ReplicationInbox {
    queue: Arc<Mutex<VecDeque<TargetUpdate>>>,
}

impl ReplicationInbox {
    fn lock(&self) -> MutexGuard<'_, VecDeque<TargetUpdate>> {
        self.queue
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn submit(&self, update: TargetUpdate) {
        self.lock().push_back(update);
    }

    pub fn submit_batch(&self, updates: impl IntoIterator<Item = TargetUpdate>) {
        self.lock().extend(updates);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn drain(&self) -> Vec<TargetUpdate> {
        self.lock().drain(..).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestStatus {
    Created,
    Updated,
    /// Not newer than the frame already held; the target is unchanged.
    Stale,
    /// The state was the stop sentinel; any existing target was removed.
    Stopped,
    /// The state failed validation; the target keeps its previous state.
    Rejected,
}

/// Replay request raised by a Resimulation target, with the authoritative
/// state to restore at `frame`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ResimulationRequest {
    pub frame: i64,
    pub body: BodyHandle,
    pub state: RigidBodyState,
}

/// Summary of one [`ReplicationScheduler::advance`] call.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AdvanceReport {
    pub frame: i64,
    pub ingested: usize,
    pub rejected: usize,
    pub processed: usize,
    pub evicted: Vec<BodyHandle>,
    pub hard_snaps: usize,
    pub resimulation_requests: Vec<ResimulationRequest>,
    pub events: Vec<ReplicationEvent>,
    pub duration_ms: f32,
}

impl AdvanceReport {
    pub fn was_evicted(&self, body: BodyHandle) -> bool {
        self.evicted.contains(&body)
    }
}

/// Owns every replication target and drives the per-tick correction pass.
pub struct ReplicationScheduler {
    config: ReplicationConfig,
    targets: BTreeMap<BodyHandle, ReplicationTarget>,
    inbox: ReplicationInbox,
    strategies: StrategySet,
    lod: Option<Box<dyn ReplicationLod>>,
    observer: Option<Box<dyn ReplicationObserver>>,
    frame: i64,
}

impl Default for ReplicationScheduler {
    fn default() -> Self {
        Self::new(ReplicationConfig::default())
    }
}

impl ReplicationScheduler {
    pub fn new(config: ReplicationConfig) -> Self {
        Self {
            config,
            targets: BTreeMap::new(),
            inbox: ReplicationInbox::default(),
            strategies: StrategySet::default(),
            lod: None,
            observer: None,
            frame: 0,
        }
    }

    /// Like [`ReplicationScheduler::new`] but rejects invalid tunables.
    pub fn try_new(config: ReplicationConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::new(config))
    }

    pub fn with_lod(mut self, lod: impl ReplicationLod + 'static) -> Self {
        self.set_lod(lod);
        self
    }

    pub fn set_lod(&mut self, lod: impl ReplicationLod + 'static) {
        self.lod = Some(Box::new(lod));
    }

    pub fn with_observer(mut self, observer: impl ReplicationObserver + 'static) -> Self {
        self.set_observer(observer);
        self
    }

    pub fn set_observer(&mut self, observer: impl ReplicationObserver + 'static) {
        self.observer = Some(Box::new(observer));
    }

    pub fn with_strategy(mut self, strategy: impl ReplicationStrategy + 'static) -> Self {
        self.strategies.replace(Box::new(strategy));
        self
    }

    pub fn config(&self) -> &ReplicationConfig {
        &self.config
    }

    pub fn inbox(&self) -> ReplicationInbox {
        self.inbox.clone()
    }

    /// Local frame the next `advance` simulates.
    pub fn frame(&self) -> i64 {
        self.frame
    }

    pub fn set_frame(&mut self, frame: i64) {
        self.frame = frame;
    }

    pub fn target(&self, body: BodyHandle) -> Option<&ReplicationTarget> {
        self.targets.get(&body)
    }

    pub fn targets(&self) -> impl Iterator<Item = &ReplicationTarget> {
        self.targets.values()
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn remove(&mut self, body: BodyHandle) -> Option<ReplicationTarget> {
        self.targets.remove(&body)
    }

    /// Folds one update into its target immediately. Updates arriving from
    /// other threads should go through [`ReplicationScheduler::inbox`].
    pub fn ingest(&mut self, update: TargetUpdate) -> IngestStatus {
        let mut events = Vec::new();
        let status = self.ingest_into(&update, &mut events);
        self.notify(&events);
        status
    }

    fn ingest_into(&mut self, update: &TargetUpdate, events: &mut Vec<ReplicationEvent>) -> IngestStatus {
        let body = update.body;

        if update.state.is_cleared() {
            if self.targets.remove(&body).is_some() {
                log::debug!("[replication] stop requested for {body:?}");
                events.push(ReplicationEvent::TargetEvicted {
                    body,
                    reason: EvictionReason::Stopped,
                });
            }
            return IngestStatus::Stopped;
        }

        if !update.state.has_valid_rotation() {
            log::warn!(
                "[replication] rejecting frame {} for {body:?}: rotation {:?} is not a unit quaternion",
                update.server_frame,
                update.state.rotation
            );
            events.push(ReplicationEvent::UpdateRejected {
                body,
                server_frame: update.server_frame,
                reason: RejectReason::InvalidRotation,
            });
            return IngestStatus::Rejected;
        }

        let lod = self
            .lod
            .as_ref()
            .and_then(|lod| lod.lod_data(body, LodQuery::All));
        let ctx = IngestContext {
            config: &self.config,
            local_frame: self.frame,
            lod,
        };

        let (created, target) = match self.targets.entry(body) {
            Entry::Vacant(entry) => (true, entry.insert(ReplicationTarget::new(update))),
            Entry::Occupied(entry) => (false, entry.into_mut()),
        };

        match target.ingest(update, &ctx) {
            IngestOutcome::Stale => {
                log::trace!(
                    "[replication] dropping stale frame {} for {body:?} (holding {})",
                    update.server_frame,
                    target.server_frame()
                );
                events.push(ReplicationEvent::UpdateRejected {
                    body,
                    server_frame: update.server_frame,
                    reason: RejectReason::Stale,
                });
                IngestStatus::Stale
            }
            IngestOutcome::Accepted {
                previous_mode,
                teleport_distance,
            } => {
                if let Some(distance) = teleport_distance {
                    log::debug!("[replication] teleport detected for {body:?} ({distance:.1} units)");
                    events.push(ReplicationEvent::TeleportDetected { body, distance });
                }
                if !created && previous_mode != target.mode() {
                    events.push(ReplicationEvent::ModeChanged {
                        body,
                        from: previous_mode,
                        to: target.mode(),
                        permanent: false,
                    });
                }
                if created {
                    IngestStatus::Created
                } else {
                    IngestStatus::Updated
                }
            }
        }
    }

    /// Parks `body` until an update with at least `until_server_frame` arrives.
    pub fn mark_waiting(
        &mut self,
        body: BodyHandle,
        until_server_frame: i64,
        mode_override: ReplicationMode,
    ) -> bool {
        let Some(target) = self.targets.get_mut(&body) else {
            return false;
        };
        target.mark_waiting(until_server_frame, mode_override);
        self.notify(&[ReplicationEvent::WaitingForUpdate {
            body,
            until_server_frame,
        }]);
        true
    }

    /// Called once a resimulation replay completed. With
    /// `post_resim_wait_for_update` set, predictive targets hold their bodies
    /// until an update newer than the replayed frames arrives.
    pub fn on_resimulation_finished(&mut self) -> usize {
        if !self.config.predictive.post_resim_wait_for_update {
            return 0;
        }

        let mut events = Vec::new();
        for (body, target) in self.targets.iter_mut() {
            if target.is_waiting() || target.mode() != ReplicationMode::PredictiveInterpolation {
                continue;
            }
            let until = self.frame + i64::from(target.frame_offset().unwrap_or(0));
            target.mark_waiting(until, ReplicationMode::PredictiveInterpolation);
            events.push(ReplicationEvent::WaitingForUpdate {
                body: *body,
                until_server_frame: until,
            });
        }
        self.notify(&events);
        events.len()
    }

    /// Applies queued updates, then runs one correction pass over every target.
    pub fn advance(
        &mut self,
        delta_seconds: f32,
        bodies: &mut dyn BodyStore,
        mut history: Option<&mut dyn HistoryStore>,
    ) -> AdvanceReport {
        let started = Instant::now();
        let mut report = AdvanceReport {
            frame: self.frame,
            ..AdvanceReport::default()
        };
        let mut events = Vec::new();
        self.drain_inbox(&mut report, &mut events);
        self.prepare_targets(history.as_deref(), &mut events);

        let mut results = Vec::with_capacity(self.targets.len());
        {
            let mut ctx = StrategyContext::new(&self.config, delta_seconds, self.frame);
            ctx.history = history.as_deref();
            for (handle, target) in self.targets.iter_mut() {
                let outcome = bodies
                    .body_mut(*handle)
                    .map(|body| dispatch(&self.strategies, &ctx, target, body));
                results.push((*handle, outcome));
            }
        }

        let history = history
            .as_mut()
            .map(|history| &mut **history as &mut dyn HistoryStore);
        self.settle(results, history, &mut report, &mut events);
        self.finish(started, report, events)
    }

    /// Same contract as [`ReplicationScheduler::advance`], with strategies
    /// dispatched across the rayon pool. Each body is borrowed by exactly one
    /// task.
    pub fn advance_parallel(
        &mut self,
        delta_seconds: f32,
        bodies: &mut dyn BodyStore,
        mut history: Option<&mut dyn HistoryStore>,
    ) -> AdvanceReport {
        let started = Instant::now();
        let mut report = AdvanceReport {
            frame: self.frame,
            ..AdvanceReport::default()
        };
        let mut events = Vec::new();
        self.drain_inbox(&mut report, &mut events);
        self.prepare_targets(history.as_deref(), &mut events);

        let mut live: HashMap<BodyHandle, &mut dyn PhysicsBody> =
            bodies.bodies_mut().into_iter().collect();
        let mut work: Vec<(BodyHandle, &mut ReplicationTarget, Option<&mut dyn PhysicsBody>)> = self
            .targets
            .iter_mut()
            .map(|(handle, target)| (*handle, target, live.remove(handle)))
            .collect();

        let results: Vec<(BodyHandle, Option<StrategyOutcome>)> = {
            let mut ctx = StrategyContext::new(&self.config, delta_seconds, self.frame);
            ctx.history = history.as_deref();
            let strategies = &self.strategies;
            work.par_iter_mut()
                .map(|(handle, target, body)| {
                    let outcome = body
                        .as_deref_mut()
                        .map(|body| dispatch(strategies, &ctx, target, body));
                    (*handle, outcome)
                })
                .collect()
        };
        drop(work);

        let history = history
            .as_mut()
            .map(|history| &mut **history as &mut dyn HistoryStore);
        self.settle(results, history, &mut report, &mut events);
        self.finish(started, report, events)
    }

    fn drain_inbox(&mut self, report: &mut AdvanceReport, events: &mut Vec<ReplicationEvent>) {
        for update in self.inbox.drain() {
            match self.ingest_into(&update, events) {
                IngestStatus::Created | IngestStatus::Updated | IngestStatus::Stopped => {
                    report.ingested += 1;
                }
                IngestStatus::Stale | IngestStatus::Rejected => report.rejected += 1,
            }
        }
    }

    /// Per-tick mode housekeeping that must run before dispatch: the LOD island
    /// check and the history window check for fresh Resimulation targets.
    fn prepare_targets(&mut self, history: Option<&dyn HistoryStore>, events: &mut Vec<ReplicationEvent>) {
        for (body, target) in self.targets.iter_mut() {
            if let Some(data) = self
                .lod
                .as_ref()
                .and_then(|lod| lod.lod_data(*body, LodQuery::IslandCheck))
            {
                if let Some(from) = target.apply_lod_mode(data.mode) {
                    events.push(ReplicationEvent::ModeChanged {
                        body: *body,
                        from,
                        to: target.mode(),
                        permanent: false,
                    });
                }
            }

            if target.mode() != ReplicationMode::Resimulation
                || target.history_checked
                || target.is_waiting()
            {
                continue;
            }
            target.history_checked = true;

            if let Some(demotion) = check_history_window(target, history, &self.config.resimulation) {
                log::warn!(
                    "[replication] {body:?} frame {} is outside rewind history, falling back to PredictiveInterpolation ({demotion:?})",
                    target.local_frame()
                );
                target.demote(demotion);
                events.push(ReplicationEvent::ModeChanged {
                    body: *body,
                    from: ReplicationMode::Resimulation,
                    to: ReplicationMode::PredictiveInterpolation,
                    permanent: demotion == ModeDemotion::Permanent,
                });
            }
        }
    }

    fn settle(
        &mut self,
        results: Vec<(BodyHandle, Option<StrategyOutcome>)>,
        mut history: Option<&mut dyn HistoryStore>,
        report: &mut AdvanceReport,
        events: &mut Vec<ReplicationEvent>,
    ) {
        for (body, outcome) in results {
            let Some(outcome) = outcome else {
                log::debug!("[replication] {body:?} no longer exists, evicting target");
                self.targets.remove(&body);
                report.evicted.push(body);
                events.push(ReplicationEvent::TargetEvicted {
                    body,
                    reason: EvictionReason::BodyMissing,
                });
                continue;
            };

            report.processed += 1;
            report.hard_snaps += outcome
                .events
                .iter()
                .filter(|event| matches!(event, ReplicationEvent::HardSnap { .. }))
                .count();
            events.extend(outcome.events);

            if let Some(frame) = outcome.resimulation_frame {
                match history.as_deref_mut() {
                    Some(history) => {
                        history.request_resimulation(frame, body);
                        if let Some(target) = self.targets.get(&body) {
                            report.resimulation_requests.push(ResimulationRequest {
                                frame,
                                body,
                                state: *target.target_state(),
                            });
                        }
                    }
                    None => log::warn!(
                        "[replication] dropping resimulation request for {body:?}: no history attached"
                    ),
                }
            }

            if outcome.remove {
                self.targets.remove(&body);
                report.evicted.push(body);
                events.push(ReplicationEvent::TargetEvicted {
                    body,
                    reason: EvictionReason::Cleared,
                });
            }
        }
    }

    fn finish(&mut self, started: Instant, mut report: AdvanceReport, events: Vec<ReplicationEvent>) -> AdvanceReport {
        self.notify(&events);
        report.events = events;
        report.duration_ms = started.elapsed().as_secs_f64() as f32 * 1000.0;
        if report.duration_ms > SLOW_ADVANCE_THRESHOLD_MS {
            log::warn!(
                "[scheduler] frame {} advance took {:.3} ms for {} targets",
                report.frame,
                report.duration_ms,
                report.processed
            );
        }
        self.frame += 1;
        report
    }

    fn notify(&mut self, events: &[ReplicationEvent]) {
        if let Some(observer) = self.observer.as_mut() {
            for event in events {
                observer.on_event(event);
            }
        }
    }
}

fn dispatch(
    strategies: &StrategySet,
    ctx: &StrategyContext<'_>,
    target: &mut ReplicationTarget,
    body: &mut dyn PhysicsBody,
) -> StrategyOutcome {
    let outcome = strategies
        .get(target.effective_mode())
        .apply(body, target, ctx);
    target.tick_count += 1;
    outcome
}
