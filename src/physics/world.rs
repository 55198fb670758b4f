use crate::math::integrate_rotation_radians;
use crate::network::RigidBodyState;
use crate::physics::{BodyHandle, BodyStore, ObjectState, PhysicsBody};
use glam::{Quat, Vec3};
use thiserror::Error;

/// Rigid body simulated by [`BodyWorld`] with an explicit Euler integrator.
#[derive(Debug, Clone, PartialEq)]
pub struct SimBody {
    pub position: Vec3,
    pub rotation: Quat,
    pub linear_velocity: Vec3,
    pub angular_velocity: Vec3,
    pub state: ObjectState,
    /// Set by the game layer while the body touches a resimulated body.
    pub in_resimulation_island: bool,
    kinematic_target: Option<(Vec3, Quat)>,
    transform_corrections: u32,
    connected_sleep_requests: u32,
}

impl SimBody {
    fn with_state(position: Vec3, state: ObjectState) -> Self {
        Self {
            position,
            rotation: Quat::IDENTITY,
            linear_velocity: Vec3::ZERO,
            angular_velocity: Vec3::ZERO,
            state,
            in_resimulation_island: false,
            kinematic_target: None,
            transform_corrections: 0,
            connected_sleep_requests: 0,
        }
    }

    pub fn dynamic(position: Vec3) -> Self {
        Self::with_state(position, ObjectState::Dynamic)
    }

    pub fn kinematic(position: Vec3) -> Self {
        Self::with_state(position, ObjectState::Kinematic)
    }

    pub fn fixed(position: Vec3) -> Self {
        Self::with_state(position, ObjectState::Static)
    }

    pub fn with_rotation(mut self, rotation: Quat) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn with_linear_velocity(mut self, velocity: Vec3) -> Self {
        self.linear_velocity = velocity;
        self
    }

    pub fn asleep(mut self) -> Self {
        self.state = ObjectState::Sleeping;
        self
    }

    pub fn kinematic_target(&self) -> Option<(Vec3, Quat)> {
        self.kinematic_target
    }

    pub fn transform_corrections(&self) -> u32 {
        self.transform_corrections
    }

    pub fn connected_sleep_requests(&self) -> u32 {
        self.connected_sleep_requests
    }

    pub fn integrate(&mut self, delta_seconds: f32) {
        match self.state {
            ObjectState::Dynamic => {
                self.position += self.linear_velocity * delta_seconds;
                self.rotation =
                    integrate_rotation_radians(self.rotation, self.angular_velocity, delta_seconds)
                        .normalize();
            }
            ObjectState::Kinematic => {
                if let Some((position, rotation)) = self.kinematic_target.take() {
                    if delta_seconds > 0.0 {
                        self.linear_velocity = (position - self.position) / delta_seconds;
                    }
                    self.position = position;
                    self.rotation = rotation;
                }
            }
            ObjectState::Static | ObjectState::Sleeping => {}
        }
    }

    /// Snapshot in wire units (angular velocity in degrees per second).
    pub fn snapshot(&self) -> RigidBodyState {
        RigidBodyState {
            position: self.position,
            rotation: self.rotation,
            linear_velocity: self.linear_velocity,
            angular_velocity_deg: self.angular_velocity * 180.0 / std::f32::consts::PI,
            sleeping: self.state == ObjectState::Sleeping,
            replicate_physics: true,
            needs_update: false,
        }
    }

    pub fn restore(&mut self, state: &RigidBodyState) {
        self.position = state.position;
        self.rotation = state.rotation;
        self.linear_velocity = state.linear_velocity;
        self.angular_velocity = state.angular_velocity_deg * std::f32::consts::PI / 180.0;
        if state.sleeping && self.state == ObjectState::Dynamic {
            self.state = ObjectState::Sleeping;
        } else if !state.sleeping && self.state == ObjectState::Sleeping {
            self.state = ObjectState::Dynamic;
        }
    }
}

impl PhysicsBody for SimBody {
    fn position(&self) -> Vec3 {
        self.position
    }

    fn rotation(&self) -> Quat {
        self.rotation
    }

    fn linear_velocity(&self) -> Vec3 {
        self.linear_velocity
    }

    fn angular_velocity(&self) -> Vec3 {
        self.angular_velocity
    }

    fn set_position(&mut self, position: Vec3) {
        self.position = position;
    }

    fn set_rotation(&mut self, rotation: Quat) {
        self.rotation = rotation;
    }

    fn set_linear_velocity(&mut self, velocity: Vec3) {
        self.linear_velocity = velocity;
    }

    fn set_angular_velocity(&mut self, velocity: Vec3) {
        self.angular_velocity = velocity;
    }

    fn apply_transform_correction(
        &mut self,
        position: Vec3,
        rotation: Quat,
        _correct_connected_bodies: bool,
        _recalculate_friction: bool,
    ) {
        self.position = position;
        self.rotation = rotation;
        self.transform_corrections += 1;
    }

    fn object_state(&self) -> ObjectState {
        self.state
    }

    fn set_object_state(&mut self, state: ObjectState) {
        if state == ObjectState::Sleeping {
            self.linear_velocity = Vec3::ZERO;
            self.angular_velocity = Vec3::ZERO;
        }
        self.state = state;
    }

    fn set_kinematic_target(&mut self, position: Vec3, rotation: Quat) {
        self.kinematic_target = Some((position, rotation));
    }

    fn sleep_connected_bodies(&mut self) {
        self.connected_sleep_requests += 1;
    }

    fn in_resimulation_island(&self) -> bool {
        self.in_resimulation_island
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WorldError {
    #[error("body {0:?} is not alive in this world")]
    NoSuchBody(BodyHandle),
}

struct BodySlot {
    generation: u32,
    body: Option<SimBody>,
}

/// In-memory body set with generational handles.
#[derive(Default)]
pub struct BodyWorld {
    slots: Vec<BodySlot>,
    free_list: Vec<u32>,
}

impl BodyWorld {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawn(&mut self, body: SimBody) -> BodyHandle {
        if let Some(index) = self.free_list.pop() {
            let slot = &mut self.slots[index as usize];
            slot.body = Some(body);
            BodyHandle::new(index, slot.generation)
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(BodySlot {
                generation: 0,
                body: Some(body),
            });
            BodyHandle::new(index, 0)
        }
    }

    pub fn despawn(&mut self, handle: BodyHandle) -> Result<SimBody, WorldError> {
        let slot = self
            .slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation && slot.body.is_some())
            .ok_or(WorldError::NoSuchBody(handle))?;
        let body = slot.body.take().ok_or(WorldError::NoSuchBody(handle))?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free_list.push(handle.index);
        Ok(body)
    }

    pub fn is_alive(&self, handle: BodyHandle) -> bool {
        self.get(handle).is_some()
    }

    pub fn get(&self, handle: BodyHandle) -> Option<&SimBody> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.body.as_ref())
    }

    pub fn get_mut(&mut self, handle: BodyHandle) -> Option<&mut SimBody> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.body.as_mut())
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.body.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = (BodyHandle, &SimBody)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.body
                .as_ref()
                .map(|body| (BodyHandle::new(index as u32, slot.generation), body))
        })
    }

    pub fn step(&mut self, delta_seconds: f32) {
        for body in self.slots.iter_mut().filter_map(|slot| slot.body.as_mut()) {
            body.integrate(delta_seconds);
        }
    }

    pub fn snapshot(&self) -> Vec<(BodyHandle, RigidBodyState)> {
        self.iter()
            .map(|(handle, body)| (handle, body.snapshot()))
            .collect()
    }
}

impl BodyStore for BodyWorld {
    fn body_mut(&mut self, handle: BodyHandle) -> Option<&mut dyn PhysicsBody> {
        self.get_mut(handle).map(|body| body as &mut dyn PhysicsBody)
    }

    fn bodies_mut(&mut self) -> Vec<(BodyHandle, &mut dyn PhysicsBody)> {
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(index, slot)| {
                let generation = slot.generation;
                slot.body.as_mut().map(|body| {
                    (
                        BodyHandle::new(index as u32, generation),
                        body as &mut dyn PhysicsBody,
                    )
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn despawned_handles_stop_resolving() {
        let mut world = BodyWorld::new();
        let first = world.spawn(SimBody::dynamic(Vec3::ZERO));
        world.despawn(first).expect("despawn");

        let second = world.spawn(SimBody::dynamic(Vec3::ONE));
        assert_eq!(second.index, first.index);
        assert_ne!(second.generation, first.generation);
        assert!(world.body_mut(first).is_none());
        assert!(world.body_mut(second).is_some());
        assert_eq!(world.despawn(first), Err(WorldError::NoSuchBody(first)));
    }

    #[test]
    fn dynamic_bodies_integrate_velocity() {
        let mut world = BodyWorld::new();
        let handle = world.spawn(SimBody::dynamic(Vec3::ZERO).with_linear_velocity(Vec3::X));
        world.step(0.5);
        world.step(0.5);

        let body = world.get(handle).expect("body");
        assert!((body.position.x - 1.0).abs() < 1.0e-6);
    }

    #[test]
    fn kinematic_bodies_follow_their_target() {
        let mut world = BodyWorld::new();
        let handle = world.spawn(SimBody::kinematic(Vec3::ZERO));
        world
            .body_mut(handle)
            .expect("body")
            .set_kinematic_target(Vec3::new(0.0, 2.0, 0.0), Quat::IDENTITY);
        world.step(0.5);

        let body = world.get(handle).expect("body");
        assert_eq!(body.position, Vec3::new(0.0, 2.0, 0.0));
        assert_eq!(body.linear_velocity, Vec3::new(0.0, 4.0, 0.0));
        assert!(body.kinematic_target().is_none());
    }

    #[test]
    fn sleeping_bodies_do_not_move() {
        let mut world = BodyWorld::new();
        let handle = world.spawn(SimBody::dynamic(Vec3::ZERO).with_linear_velocity(Vec3::X));
        world
            .body_mut(handle)
            .expect("body")
            .set_object_state(ObjectState::Sleeping);
        world.step(1.0);

        assert_eq!(world.get(handle).expect("body").position, Vec3::ZERO);
    }

    #[test]
    fn bodies_mut_lists_each_live_body_once() {
        let mut world = BodyWorld::new();
        let a = world.spawn(SimBody::dynamic(Vec3::ZERO));
        let b = world.spawn(SimBody::dynamic(Vec3::ONE));
        world.despawn(a).expect("despawn");

        let handles: Vec<BodyHandle> = world.bodies_mut().into_iter().map(|(h, _)| h).collect();
        assert_eq!(handles, vec![b]);
    }
}
