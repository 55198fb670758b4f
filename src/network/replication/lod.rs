use crate::network::ReplicationMode;
use crate::physics::BodyHandle;

/// Which part of the LOD decision the scheduler is asking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LodQuery {
    /// Full evaluation when a new update is ingested. Alignment data is honoured.
    All,
    /// Cheap per-tick re-evaluation; only the mode recommendation is used.
    IslandCheck,
}

/// Recommendation produced by a [`ReplicationLod`] provider.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LodData {
    pub mode: ReplicationMode,
    /// Local frame the predictive target should be aligned to.
    pub aligned_frame: i64,
    /// Seconds of prediction already covered by the aligned frame.
    pub aligned_time: f32,
}

impl LodData {
    pub fn mode_only(mode: ReplicationMode) -> Self {
        Self {
            mode,
            aligned_frame: i64::MIN,
            aligned_time: 0.0,
        }
    }
}

/// Optional replication level-of-detail provider, typically driven by distance
/// to the local player or by interaction with resimulated bodies.
pub trait ReplicationLod: Send {
    fn lod_data(&self, body: BodyHandle, query: LodQuery) -> Option<LodData>;
}

impl<F> ReplicationLod for F
where
    F: Fn(BodyHandle, LodQuery) -> Option<LodData> + Send,
{
    fn lod_data(&self, body: BodyHandle, query: LodQuery) -> Option<LodData> {
        self(body, query)
    }
}
