//! Joint hierarchy stored as an arena, plus the working copies solvers
//! mutate between commits.

use std::sync::Arc;
use bevy::math::{Quat, Vec3};
use itertools::zip;
use crate::constraint::Constraint;
use crate::error::SkeletonError;
use crate::math::{rotation_angle, rotation_between, Frame, EPSILON};


pub type JointId = usize;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Axis {
	X, Y, Z
}

impl Axis {
	pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

	pub fn to_vec3(&self) -> Vec3 {
		match *self {
			Axis::X => Vec3::new(1.0, 0.0, 0.0),
			Axis::Y => Vec3::new(0.0, 1.0, 0.0),
			Axis::Z => Vec3::new(0.0, 0.0, 1.0),
		}
	}

	pub fn component_mut<'a>(&self, v: &'a mut Vec3) -> &'a mut f32 {
		match *self {
			Axis::X => &mut v.x,
			Axis::Y => &mut v.y,
			Axis::Z => &mut v.z,
		}
	}
}

#[derive(Clone, Debug)]
pub struct Joint {
	pub id: JointId,
	pub name: String,
	pub parent: Option<JointId>,
	/// Offset from the parent joint, in the parent's frame.
	pub translation: Vec3,
	pub rotation: Quat,
	pub constraint: Option<Arc<Constraint>>,
}

impl Joint {
	pub fn new(id: JointId, name: impl Into<String>, parent: Option<JointId>, translation: Vec3, rotation: Quat) -> Self {
		Joint { id, name: name.into(), parent, translation, rotation, constraint: None }
	}

	/// Length of the segment from the parent to this joint.
	pub fn length(&self) -> f32 {
		self.translation.length()
	}

	/// Applies `delta` on top of the current local rotation, through the
	/// constraint if there is one. Returns the delta actually applied.
	pub fn rotate(&mut self, delta: Quat) -> Quat {
		let delta = match &self.constraint {
			Some(constraint) => constraint.constrain_rotation(delta, self),
			None => delta,
		};
		self.rotation = (self.rotation * delta).normalize();
		delta
	}
}

/// Joints addressed by index. A parent always has a smaller index than
/// its children.
#[derive(Clone, Debug, Default)]
pub struct Skeleton {
	joints: Vec<Joint>,
}

impl Skeleton {
	pub fn new() -> Self {
		Skeleton::default()
	}

	pub fn add_joint(
		&mut self,
		name: impl Into<String>,
		parent: Option<JointId>,
		translation: Vec3,
		rotation: Quat,
	) -> Result<JointId, SkeletonError> {
		let name = name.into();
		if let Some(parent) = parent {
			if parent >= self.joints.len() {
				return Err(SkeletonError::UnknownParent { parent, name })
			}
		}
		let id = self.joints.len();
		self.joints.push(Joint::new(id, name, parent, translation, rotation.normalize()));
		Ok(id)
	}

	pub fn len(&self) -> usize {
		self.joints.len()
	}

	pub fn is_empty(&self) -> bool {
		self.joints.is_empty()
	}

	pub fn joint(&self, id: JointId) -> Option<&Joint> {
		self.joints.get(id)
	}

	pub fn joints(&self) -> &[Joint] {
		&self.joints
	}

	pub fn children(&self, id: JointId) -> impl Iterator<Item = JointId> + '_ {
		self.joints.iter().filter(move |j| j.parent == Some(id)).map(|j| j.id)
	}

	/// Attaches `constraint` to a joint. Rotational limits without a rest
	/// rotation take the joint's current local rotation as rest.
	pub fn set_constraint(&mut self, id: JointId, mut constraint: Constraint) -> Result<(), SkeletonError> {
		let joint = self.joints.get_mut(id).ok_or(SkeletonError::UnknownJoint(id))?;
		if constraint.needs_rest() && constraint.rest().is_none() {
			constraint.set_rest(joint.rotation);
		}
		joint.constraint = Some(Arc::new(constraint));
		Ok(())
	}

	pub fn set_rotation(&mut self, id: JointId, rotation: Quat) -> Result<(), SkeletonError> {
		let joint = self.joints.get_mut(id).ok_or(SkeletonError::UnknownJoint(id))?;
		joint.rotation = rotation.normalize();
		Ok(())
	}

	/// Moves a joint by `delta`, filtered by its constraint. Returns the
	/// translation actually applied.
	pub fn translate(&mut self, id: JointId, delta: Vec3) -> Result<Vec3, SkeletonError> {
		let joint = self.joints.get_mut(id).ok_or(SkeletonError::UnknownJoint(id))?;
		let delta = match &joint.constraint {
			Some(constraint) => constraint.constrain_translation(delta, joint),
			None => delta,
		};
		joint.translation += delta;
		Ok(delta)
	}

	/// World frame of one joint, walking its parents.
	pub fn world_frame(&self, id: JointId) -> Option<Frame> {
		let joint = self.joints.get(id)?;
		let parent = match joint.parent {
			Some(parent) => self.world_frame(parent)?,
			None => Frame::IDENTITY,
		};
		Some(parent.child(joint.translation, joint.rotation))
	}

	/// World frames of every joint in one pass.
	pub fn cumulative_transforms(&self) -> Vec<Frame> {
		let mut frames: Vec<Frame> = Vec::with_capacity(self.joints.len());
		for joint in &self.joints {
			let parent = joint.parent.map_or(Frame::IDENTITY, |p| frames[p]);
			frames.push(parent.child(joint.translation, joint.rotation));
		}
		frames
	}

	/// Contiguous parent-to-child path from `root` to `effector`, both included.
	pub fn chain(&self, root: JointId, effector: JointId) -> Result<Vec<JointId>, SkeletonError> {
		if root >= self.joints.len() { return Err(SkeletonError::UnknownJoint(root)) }
		if effector >= self.joints.len() { return Err(SkeletonError::UnknownJoint(effector)) }

		let mut path = vec![effector];
		let mut current = effector;
		while current != root {
			current = self.joints[current].parent.ok_or(SkeletonError::NoPath { root, effector })?;
			path.push(current);
		}
		path.reverse();
		Ok(path)
	}

	/// `root` and all of its descendants, parents first.
	pub fn subtree(&self, root: JointId) -> Vec<JointId> {
		let mut inside = vec![false; self.joints.len()];
		let mut ids = Vec::new();
		for joint in self.joints.iter().skip(root) {
			let member = joint.id == root || joint.parent.map_or(false, |p| inside[p]);
			if member {
				inside[joint.id] = true;
				ids.push(joint.id);
			}
		}
		ids
	}
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum Parent {
	Local(usize),
	/// Frame of a joint outside the working copy, frozen at copy time.
	External(Frame),
}

/// A private deep copy of some joints and their world frames. Solvers
/// iterate on a `Pose` and only touch the live [`Skeleton`] in `commit`.
#[derive(Clone, Debug, Default)]
pub struct Pose {
	pub joints: Vec<Joint>,
	parents: Vec<Parent>,
	frames: Vec<Frame>,
}

impl Pose {
	/// `ids` must list parents before children, as `chain` and `subtree` do.
	pub fn from_skeleton(skeleton: &Skeleton, ids: &[JointId]) -> Pose {
		let world = skeleton.cumulative_transforms();
		let joints: Vec<Joint> = ids.iter().filter_map(|&id| skeleton.joint(id).cloned()).collect();
		let parents = joints.iter()
			.map(|joint| match joint.parent {
				Some(parent) => match joints.iter().position(|j| j.id == parent) {
					Some(index) => Parent::Local(index),
					None => Parent::External(world[parent]),
				},
				None => Parent::External(Frame::IDENTITY),
			})
			.collect();

		let mut pose = Pose { frames: vec![Frame::IDENTITY; joints.len()], joints, parents };
		pose.forward_kinematics();
		pose
	}

	pub fn len(&self) -> usize {
		self.joints.len()
	}

	pub fn is_empty(&self) -> bool {
		self.joints.is_empty()
	}

	pub fn index_of(&self, id: JointId) -> Option<usize> {
		self.joints.iter().position(|j| j.id == id)
	}

	pub fn frame(&self, index: usize) -> Frame {
		self.frames[index]
	}

	pub fn position(&self, index: usize) -> Vec3 {
		self.frames[index].position
	}

	pub fn positions(&self) -> Vec<Vec3> {
		self.frames.iter().map(|f| f.position).collect()
	}

	pub fn rotations(&self) -> Vec<Quat> {
		self.joints.iter().map(|j| j.rotation).collect()
	}

	pub fn parent_frame(&self, index: usize) -> Frame {
		match self.parents[index] {
			Parent::Local(parent) => self.frames[parent],
			Parent::External(frame) => frame,
		}
	}

	/// Sum of segment lengths between joints of the copy.
	pub fn reach(&self) -> f32 {
		zip(&self.joints, &self.parents)
			.filter(|(_, parent)| matches!(parent, Parent::Local(_)))
			.map(|(joint, _)| joint.length())
			.sum()
	}

	pub fn forward_kinematics(&mut self) {
		for index in 0..self.joints.len() {
			self.update_frame(index);
		}
	}

	/// Recomputes one world frame from its parent's; descendants are stale
	/// until they are updated too.
	pub fn update_frame(&mut self, index: usize) {
		let joint = &self.joints[index];
		self.frames[index] = self.parent_frame(index).child(joint.translation, joint.rotation);
	}

	/// Constrained local rotation change; returns the applied angle.
	pub fn rotate_local(&mut self, index: usize, delta: Quat) -> f32 {
		rotation_angle(self.joints[index].rotate(delta))
	}

	/// Sets the local rotation as far as the constraint allows.
	pub fn set_local(&mut self, index: usize, rotation: Quat) -> f32 {
		let delta = (self.joints[index].rotation.inverse() * rotation).normalize();
		self.rotate_local(index, delta)
	}

	/// Rotates joint `index` so that `child`'s offset points along
	/// `direction` in world space, then refreshes its frame.
	pub fn aim(&mut self, index: usize, child: usize, direction: Vec3) -> f32 {
		let current = self.frames[index].rotation * self.joints[child].translation;
		if current.length() < EPSILON || direction.length() < EPSILON {
			self.update_frame(index);
			return 0.0
		}
		let world = rotation_between(current, direction) * self.frames[index].rotation;
		self.orient(index, world)
	}

	/// Rotates joint `index` toward a world rotation, then refreshes its frame.
	pub fn orient(&mut self, index: usize, world: Quat) -> f32 {
		let local = (self.parent_frame(index).rotation.inverse() * world).normalize();
		let applied = self.set_local(index, local);
		self.update_frame(index);
		applied
	}

	/// Writes local rotations back to the live joints.
	pub fn commit(&self, skeleton: &mut Skeleton) {
		self.commit_rotations(skeleton, &self.rotations());
	}

	/// Writes `rotations`, one per joint of the copy, to the live joints.
	pub fn commit_rotations(&self, skeleton: &mut Skeleton, rotations: &[Quat]) {
		for (joint, rotation) in zip(&self.joints, rotations) {
			if let Some(live) = skeleton.joints.get_mut(joint.id) {
				live.rotation = *rotation;
			}
		}
	}
}
