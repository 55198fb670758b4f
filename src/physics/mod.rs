pub mod history;
#[cfg(feature = "physics-rapier")]
pub mod rapier;
pub mod world;

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

/// Generational handle referencing a body owned by a physics backend.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BodyHandle {
    pub index: u32,
    pub generation: u32,
}

impl BodyHandle {
    pub const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    pub const fn to_raw(self) -> (u32, u32) {
        (self.index, self.generation)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectState {
    Static,
    Kinematic,
    Dynamic,
    Sleeping,
}

/// Capability surface the replication strategies need from a simulated body.
///
/// Angular velocity is exchanged in radians per second.
pub trait PhysicsBody: Send {
    fn position(&self) -> Vec3;
    fn rotation(&self) -> Quat;
    fn linear_velocity(&self) -> Vec3;
    fn angular_velocity(&self) -> Vec3;

    fn set_position(&mut self, position: Vec3);
    fn set_rotation(&mut self, rotation: Quat);
    fn set_linear_velocity(&mut self, velocity: Vec3);
    fn set_angular_velocity(&mut self, velocity: Vec3);

    /// Moves the body discontinuously, optionally dragging constraint-connected
    /// bodies along and recomputing friction anchors.
    fn apply_transform_correction(
        &mut self,
        position: Vec3,
        rotation: Quat,
        correct_connected_bodies: bool,
        recalculate_friction: bool,
    );

    fn object_state(&self) -> ObjectState;
    fn set_object_state(&mut self, state: ObjectState);
    fn set_kinematic_target(&mut self, position: Vec3, rotation: Quat);

    fn sleep_connected_bodies(&mut self) {}

    /// Whether the body shares a constraint island with a resimulated body.
    fn in_resimulation_island(&self) -> bool {
        false
    }

    fn is_kinematic(&self) -> bool {
        self.object_state() == ObjectState::Kinematic
    }

    fn is_sleeping(&self) -> bool {
        self.object_state() == ObjectState::Sleeping
    }

    fn is_dynamic(&self) -> bool {
        self.object_state() == ObjectState::Dynamic
    }

    fn is_simulated(&self) -> bool {
        self.object_state() != ObjectState::Static
    }
}

/// Resolves handles to live bodies. Destroyed bodies resolve to `None`.
pub trait BodyStore {
    fn body_mut(&mut self, handle: BodyHandle) -> Option<&mut dyn PhysicsBody>;

    /// Every live body, each borrowed exactly once.
    fn bodies_mut(&mut self) -> Vec<(BodyHandle, &mut dyn PhysicsBody)>;

    fn contains(&mut self, handle: BodyHandle) -> bool {
        self.body_mut(handle).is_some()
    }
}
