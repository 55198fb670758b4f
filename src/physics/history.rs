use crate::network::RigidBodyState;
use crate::physics::BodyHandle;
use std::collections::{HashMap, VecDeque};
use thiserror::Error;

pub const DEFAULT_HISTORY_FRAMES: usize = 64;

/// Read access to recorded simulation frames plus the resimulation request sink.
pub trait HistoryStore: Sync {
    fn past_state_at_frame(&self, body: BodyHandle, frame: i64) -> Option<RigidBodyState>;
    fn is_frame_within_history(&self, frame: i64) -> bool;
    /// `None` while nothing has been recorded.
    fn earliest_retained_frame(&self) -> Option<i64>;
    fn request_resimulation(&mut self, frame: i64, body: BodyHandle);

    /// Frames at or before this one can no longer be resimulated.
    fn blocked_resim_frame(&self) -> Option<i64> {
        None
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HistoryError {
    #[error("frame {frame} is not newer than the latest recorded frame {latest}")]
    OutOfOrder { frame: i64, latest: i64 },
    #[error("history capacity must be at least one frame")]
    ZeroCapacity,
}

#[derive(Debug, Clone)]
struct FrameRecord {
    frame: i64,
    states: HashMap<BodyHandle, RigidBodyState>,
}

/// Ring buffer of per-frame body states.
#[derive(Debug, Clone)]
pub struct FrameHistory {
    capacity: usize,
    frames: VecDeque<FrameRecord>,
    pending: Vec<(i64, BodyHandle)>,
    blocked_until: Option<i64>,
}

impl Default for FrameHistory {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_HISTORY_FRAMES,
            frames: VecDeque::with_capacity(DEFAULT_HISTORY_FRAMES),
            pending: Vec::new(),
            blocked_until: None,
        }
    }
}

impl FrameHistory {
    pub fn with_capacity(capacity: usize) -> Result<Self, HistoryError> {
        if capacity == 0 {
            return Err(HistoryError::ZeroCapacity);
        }
        Ok(Self {
            capacity,
            frames: VecDeque::with_capacity(capacity),
            ..Self::default()
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn latest_frame(&self) -> Option<i64> {
        self.frames.back().map(|record| record.frame)
    }

    pub fn record_frame<I>(&mut self, frame: i64, states: I) -> Result<(), HistoryError>
    where
        I: IntoIterator<Item = (BodyHandle, RigidBodyState)>,
    {
        if let Some(latest) = self.latest_frame() {
            if frame <= latest {
                return Err(HistoryError::OutOfOrder { frame, latest });
            }
        }
        if self.frames.len() == self.capacity {
            self.frames.pop_front();
        }
        self.frames.push_back(FrameRecord {
            frame,
            states: states.into_iter().collect(),
        });
        Ok(())
    }

    /// Drops every frame newer than `frame` so a resimulation can re-record them.
    pub fn truncate_after(&mut self, frame: i64) {
        while self.frames.back().is_some_and(|record| record.frame > frame) {
            self.frames.pop_back();
        }
    }

    pub fn frame_states(&self, frame: i64) -> Option<&HashMap<BodyHandle, RigidBodyState>> {
        self.frames
            .iter()
            .find(|record| record.frame == frame)
            .map(|record| &record.states)
    }

    pub fn block_resimulation_until(&mut self, frame: i64) {
        self.blocked_until = Some(self.blocked_until.map_or(frame, |blocked| blocked.max(frame)));
    }

    pub fn pending_resimulations(&self) -> &[(i64, BodyHandle)] {
        &self.pending
    }

    /// Takes all pending requests, returning the earliest requested frame.
    pub fn take_resimulation_request(&mut self) -> Option<(i64, Vec<BodyHandle>)> {
        let frame = self.pending.iter().map(|(frame, _)| *frame).min()?;
        let mut bodies: Vec<BodyHandle> = self.pending.drain(..).map(|(_, body)| body).collect();
        bodies.sort();
        bodies.dedup();
        Some((frame, bodies))
    }
}

impl HistoryStore for FrameHistory {
    fn past_state_at_frame(&self, body: BodyHandle, frame: i64) -> Option<RigidBodyState> {
        self.frame_states(frame)
            .and_then(|states| states.get(&body))
            .copied()
    }

    fn is_frame_within_history(&self, frame: i64) -> bool {
        match (self.earliest_retained_frame(), self.latest_frame()) {
            (Some(earliest), Some(latest)) => frame >= earliest && frame <= latest,
            _ => false,
        }
    }

    fn earliest_retained_frame(&self) -> Option<i64> {
        self.frames.front().map(|record| record.frame)
    }

    fn request_resimulation(&mut self, frame: i64, body: BodyHandle) {
        log::debug!("[history] resimulation requested from frame {frame} for {body:?}");
        self.pending.push((frame, body));
    }

    fn blocked_resim_frame(&self) -> Option<i64> {
        self.blocked_until
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    fn record(history: &mut FrameHistory, frame: i64, body: BodyHandle, x: f32) {
        history
            .record_frame(frame, [(body, RigidBodyState::at(Vec3::new(x, 0.0, 0.0)))])
            .expect("record frame");
    }

    #[test]
    fn oldest_frames_are_evicted_at_capacity() {
        let body = BodyHandle::new(0, 0);
        let mut history = FrameHistory::with_capacity(3).expect("history");
        for frame in 1..=5 {
            record(&mut history, frame, body, frame as f32);
        }

        assert_eq!(history.earliest_retained_frame(), Some(3));
        assert!(!history.is_frame_within_history(2));
        assert!(history.is_frame_within_history(5));
        assert!(!history.is_frame_within_history(6));
        let past = history.past_state_at_frame(body, 4).expect("state at frame 4");
        assert_eq!(past.position.x, 4.0);
    }

    #[test]
    fn frames_must_be_recorded_in_order() {
        let body = BodyHandle::new(0, 0);
        let mut history = FrameHistory::default();
        record(&mut history, 10, body, 0.0);
        let result = history.record_frame(10, Vec::<(BodyHandle, RigidBodyState)>::new());
        assert_eq!(
            result,
            Err(HistoryError::OutOfOrder {
                frame: 10,
                latest: 10
            })
        );
        assert_eq!(FrameHistory::with_capacity(0).err(), Some(HistoryError::ZeroCapacity));
    }

    #[test]
    fn truncation_allows_rerecording() {
        let body = BodyHandle::new(0, 0);
        let mut history = FrameHistory::default();
        for frame in 1..=4 {
            record(&mut history, frame, body, 0.0);
        }
        history.truncate_after(2);
        assert_eq!(history.latest_frame(), Some(2));
        record(&mut history, 3, body, 7.0);
        assert_eq!(
            history.past_state_at_frame(body, 3).map(|s| s.position.x),
            Some(7.0)
        );
    }

    #[test]
    fn resimulation_requests_collapse_to_earliest_frame() {
        let mut history = FrameHistory::default();
        let a = BodyHandle::new(0, 0);
        let b = BodyHandle::new(1, 0);
        history.request_resimulation(12, a);
        history.request_resimulation(9, b);
        history.request_resimulation(11, a);

        let (frame, bodies) = history.take_resimulation_request().expect("request");
        assert_eq!(frame, 9);
        assert_eq!(bodies, vec![a, b]);
        assert!(history.take_resimulation_request().is_none());
    }
}
