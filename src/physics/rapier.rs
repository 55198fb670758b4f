//! `PhysicsBody` and `BodyStore` for rapier3d rigid bodies.

use crate::physics::{BodyHandle, BodyStore, ObjectState, PhysicsBody};
use glam::{Quat, Vec3};
use rapier3d::na::{Quaternion, Translation3, UnitQuaternion};
use rapier3d::prelude::*;

fn to_vector(v: Vec3) -> Vector<Real> {
    vector![v.x, v.y, v.z]
}

fn from_vector(v: &Vector<Real>) -> Vec3 {
    Vec3::new(v.x, v.y, v.z)
}

fn to_rotation(q: Quat) -> Rotation<Real> {
    UnitQuaternion::from_quaternion(Quaternion::new(q.w, q.x, q.y, q.z))
}

fn from_rotation(r: &Rotation<Real>) -> Quat {
    let coords = r.coords;
    Quat::from_xyzw(coords.x, coords.y, coords.z, coords.w)
}

fn to_isometry(position: Vec3, rotation: Quat) -> Isometry<Real> {
    Isometry::from_parts(
        Translation3::new(position.x, position.y, position.z),
        to_rotation(rotation),
    )
}

impl From<RigidBodyHandle> for BodyHandle {
    fn from(handle: RigidBodyHandle) -> Self {
        let (index, generation) = handle.into_raw_parts();
        BodyHandle::new(index, generation)
    }
}

impl From<BodyHandle> for RigidBodyHandle {
    fn from(handle: BodyHandle) -> Self {
        RigidBodyHandle::from_raw_parts(handle.index, handle.generation)
    }
}

impl PhysicsBody for RigidBody {
    fn position(&self) -> Vec3 {
        from_vector(self.translation())
    }

    fn rotation(&self) -> Quat {
        from_rotation(RigidBody::rotation(self))
    }

    fn linear_velocity(&self) -> Vec3 {
        from_vector(self.linvel())
    }

    fn angular_velocity(&self) -> Vec3 {
        from_vector(self.angvel())
    }

    fn set_position(&mut self, position: Vec3) {
        let rotation = PhysicsBody::rotation(self);
        RigidBody::set_position(self, to_isometry(position, rotation), true);
    }

    fn set_rotation(&mut self, rotation: Quat) {
        let position = PhysicsBody::position(self);
        RigidBody::set_position(self, to_isometry(position, rotation), true);
    }

    fn set_linear_velocity(&mut self, velocity: Vec3) {
        self.set_linvel(to_vector(velocity), true);
    }

    fn set_angular_velocity(&mut self, velocity: Vec3) {
        self.set_angvel(to_vector(velocity), true);
    }

    fn apply_transform_correction(
        &mut self,
        position: Vec3,
        rotation: Quat,
        correct_connected_bodies: bool,
        recalculate_friction: bool,
    ) {
        if correct_connected_bodies || recalculate_friction {
            log::trace!(
                "[rapier] connected-body correction is resolved by the solver on the next step"
            );
        }
        RigidBody::set_position(self, to_isometry(position, rotation), true);
    }

    fn object_state(&self) -> ObjectState {
        if self.is_fixed() {
            ObjectState::Static
        } else if self.is_kinematic() {
            ObjectState::Kinematic
        } else if self.is_sleeping() {
            ObjectState::Sleeping
        } else {
            ObjectState::Dynamic
        }
    }

    fn set_object_state(&mut self, state: ObjectState) {
        match state {
            ObjectState::Sleeping => self.sleep(),
            ObjectState::Dynamic if self.is_dynamic() => self.wake_up(true),
            other => {
                log::trace!("[rapier] body type change to {other:?} is owned by the game layer");
            }
        }
    }

    fn set_kinematic_target(&mut self, position: Vec3, rotation: Quat) {
        self.set_next_kinematic_position(to_isometry(position, rotation));
    }
}

impl BodyStore for RigidBodySet {
    fn body_mut(&mut self, handle: BodyHandle) -> Option<&mut dyn PhysicsBody> {
        self.get_mut(handle.into())
            .map(|body| body as &mut dyn PhysicsBody)
    }

    fn bodies_mut(&mut self) -> Vec<(BodyHandle, &mut dyn PhysicsBody)> {
        self.iter_mut()
            .map(|(handle, body)| (BodyHandle::from(handle), body as &mut dyn PhysicsBody))
            .collect()
    }
}
