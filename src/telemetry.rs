use crate::network::ReplicationMode;
use crate::network::replication::accumulator::HardSnapReason;
use crate::physics::BodyHandle;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

pub const DEFAULT_EVENT_LOG_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EvictionReason {
    /// A "stop replicating" update arrived.
    Stopped,
    /// The active strategy declared the target finished.
    Cleared,
    /// The body no longer resolves in the physics backend.
    BodyMissing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RejectReason {
    /// Server frame not newer than the one already held.
    Stale,
    /// Rotation is not a finite unit quaternion.
    InvalidRotation,
}

/// Discrete things the replication layer did to a body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ReplicationEvent {
    HardSnap {
        body: BodyHandle,
        mode: ReplicationMode,
        reason: HardSnapReason,
    },
    TeleportDetected {
        body: BodyHandle,
        distance: f32,
    },
    ModeChanged {
        body: BodyHandle,
        from: ReplicationMode,
        to: ReplicationMode,
        permanent: bool,
    },
    WaitingForUpdate {
        body: BodyHandle,
        until_server_frame: i64,
    },
    ResimulationRequested {
        body: BodyHandle,
        frame: i64,
    },
    TargetEvicted {
        body: BodyHandle,
        reason: EvictionReason,
    },
    UpdateRejected {
        body: BodyHandle,
        server_frame: i64,
        reason: RejectReason,
    },
}

impl ReplicationEvent {
    pub fn body(&self) -> BodyHandle {
        match self {
            ReplicationEvent::HardSnap { body, .. }
            | ReplicationEvent::TeleportDetected { body, .. }
            | ReplicationEvent::ModeChanged { body, .. }
            | ReplicationEvent::WaitingForUpdate { body, .. }
            | ReplicationEvent::ResimulationRequested { body, .. }
            | ReplicationEvent::TargetEvicted { body, .. }
            | ReplicationEvent::UpdateRejected { body, .. } => *body,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ReplicationEvent::HardSnap { .. } => "hard_snap",
            ReplicationEvent::TeleportDetected { .. } => "teleport_detected",
            ReplicationEvent::ModeChanged { .. } => "mode_changed",
            ReplicationEvent::WaitingForUpdate { .. } => "waiting_for_update",
            ReplicationEvent::ResimulationRequested { .. } => "resimulation_requested",
            ReplicationEvent::TargetEvicted { .. } => "target_evicted",
            ReplicationEvent::UpdateRejected { .. } => "update_rejected",
        }
    }
}

/// Receives every event the scheduler emits, in emission order.
pub trait ReplicationObserver: Send {
    fn on_event(&mut self, event: &ReplicationEvent);
}

impl<F> ReplicationObserver for F
where
    F: FnMut(&ReplicationEvent) + Send,
{
    fn on_event(&mut self, event: &ReplicationEvent) {
        self(event)
    }
}

/// Forwards events to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogObserver;

impl ReplicationObserver for LogObserver {
    fn on_event(&mut self, event: &ReplicationEvent) {
        match event {
            ReplicationEvent::TeleportDetected { body, distance } => {
                log::info!("[telemetry] {body:?} teleported {distance:.2} units");
            }
            ReplicationEvent::UpdateRejected {
                body,
                server_frame,
                reason,
            } => {
                log::warn!("[telemetry] {body:?} rejected frame {server_frame}: {reason:?}");
            }
            other => log::debug!("[telemetry] {} {:?}", other.label(), other.body()),
        }
    }
}

/// Bounded, cloneable event recorder. Clones share the same buffer, so one
/// handle can be given to the scheduler while another is inspected.
#[derive(Debug, Clone)]
pub struct EventLog {
    events: Arc<Mutex<VecDeque<ReplicationEvent>>>,
    capacity: usize,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_EVENT_LOG_CAPACITY)
    }
}

impl EventLog {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Arc::new(Mutex::new(VecDeque::with_capacity(capacity.min(64)))),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<ReplicationEvent>> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn record(&self, event: ReplicationEvent) {
        let mut events = self.lock();
        if events.len() == self.capacity {
            events.pop_front();
        }
        events.push_back(event);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn snapshot(&self) -> Vec<ReplicationEvent> {
        self.lock().iter().cloned().collect()
    }

    pub fn drain(&self) -> Vec<ReplicationEvent> {
        self.lock().drain(..).collect()
    }

    pub fn count_where(&self, predicate: impl Fn(&ReplicationEvent) -> bool) -> usize {
        self.lock().iter().filter(|event| predicate(event)).count()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.snapshot())
    }
}

impl ReplicationObserver for EventLog {
    fn on_event(&mut self, event: &ReplicationEvent) {
        self.record(event.clone());
    }
}
