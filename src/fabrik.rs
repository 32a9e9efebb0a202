//! Forward And Backward Reaching IK on a single chain, with constraint
//! projection, roll correction and a randomised escape from stalls.

use bevy::log::{debug, warn};
use bevy::math::{Quat, Vec3};
use itertools::Itertools;
use rand::Rng;
use crate::chain::{Joint, Pose, Skeleton};
use crate::config::FabrikConfig;
use crate::math::{is_identity, orthogonal, random_rotation, random_unit_vector, rotation_between, twist_angle, EPSILON};
use crate::solver::{Context, Strategy, Target};


#[derive(Debug, Clone)]
pub struct Fabrik {
	pose: Pose,
	best: Pose,
	best_error: f32,
	target: Option<Target>,
	/// Rotation applied to each joint since the last reset or exploration.
	changes: Vec<f32>,
	/// Errors of the previous two iterations, oldest first.
	recent: [f32; 2],
	iteration: usize,
	explorations: usize,
	degenerate: bool,
}

impl Default for Fabrik {
	fn default() -> Self {
		Fabrik {
			pose: Pose::default(),
			best: Pose::default(),
			best_error: f32::NAN,
			target: None,
			changes: Vec::new(),
			recent: [f32::INFINITY; 2],
			iteration: 0,
			explorations: 0,
			degenerate: true,
		}
	}
}

impl Fabrik {
	/// Best pose seen since the last reset.
	pub fn best(&self) -> &Pose { &self.best }

	pub fn explorations(&self) -> usize { self.explorations }

	fn effector_error(pose: &Pose, target: &Target) -> f32 {
		match pose.len() {
			0 => f32::NAN,
			n => pose.position(n - 1).distance(target.position),
		}
	}

	fn remember(&mut self, error: f32) {
		if error < self.best_error {
			self.best = self.pose.clone();
			self.best_error = error;
		}
	}

	/// Perturbs the best pose in a batch of ways and adopts the perturbation
	/// that reaches closest, if it beats the best so far.
	fn explore(&mut self, target: &Target, config: &FabrikConfig, rng: &mut impl Rng) -> bool {
		let movable = self.best.len() - 1;
		let ranked: Vec<usize> = (0..movable)
			.sorted_by(|a, b| self.changes[*a].total_cmp(&self.changes[*b]))
			.collect();

		let mut scratch = vec![0.0; self.best.len()];
		let mut winner: Option<(Pose, f32)> = None;
		for trial in 0..config.exploration_trials {
			let mut candidate = self.best.clone();
			if trial < config.biased_trials {
				// least-changed joints get the largest nudge
				for (rank, &index) in ranked.iter().enumerate() {
					let scale = (movable - rank) as f32 / movable as f32;
					candidate.rotate_local(index, random_rotation(rng, config.small_angle * scale));
				}
			} else {
				let index = rng.gen_range(0..movable);
				let joint = &candidate.joints[index];
				let incoming = joint.rotation.inverse() * joint.translation;
				let axis = match incoming.length() > EPSILON {
					true => incoming.normalize(),
					false => random_unit_vector(rng),
				};
				let angle = rng.gen_range(-config.large_angle..=config.large_angle);
				candidate.rotate_local(index, Quat::from_axis_angle(axis, angle));
			}
			candidate.forward_kinematics();
			reach(&mut candidate, target, &mut scratch);

			let error = Self::effector_error(&candidate, target);
			if winner.as_ref().map_or(true, |(_, best)| error < *best) {
				winner = Some((candidate, error));
			}
		}

		match winner {
			Some((pose, error)) if error < self.best_error => {
				debug!("fabrik exploration {} improved error {} -> {}", self.explorations, self.best_error, error);
				self.pose = pose.clone();
				self.best = pose;
				self.best_error = error;
				self.changes.iter_mut().for_each(|c| *c = 0.0);
				self.recent = [f32::INFINITY; 2];
				true
			},
			_ => {
				debug!("fabrik exploration {} found nothing better than {}", self.explorations, self.best_error);
				false
			},
		}
	}
}

impl Strategy for Fabrik {
	fn reset(&mut self, skeleton: &Skeleton, ctx: &mut Context) {
		*self = Fabrik::default();
		let (effector, target) = match ctx.primary_target() {
			Some(primary) => primary,
			None => return,
		};
		let ids = match skeleton.chain(ctx.root, effector) {
			Ok(ids) => ids,
			Err(err) => {
				warn!("fabrik: {}", err);
				return
			},
		};

		self.pose = Pose::from_skeleton(skeleton, &ids);
		self.best = self.pose.clone();
		self.best_error = Self::effector_error(&self.pose, &target);
		self.target = Some(target);
		self.changes = vec![0.0; self.pose.len()];
		self.degenerate = self.pose.len() < 2 || self.pose.reach() < EPSILON;
	}

	fn iterate(&mut self, ctx: &mut Context) -> bool {
		let target = match self.target {
			Some(target) if !self.degenerate => target,
			_ => return true,
		};
		let config = ctx.config;
		if self.best_error <= config.error_threshold { return true }

		self.iteration += 1;
		let change = reach(&mut self.pose, &target, &mut self.changes);
		let fabrik = &config.fabrik;
		if (fabrik.fix_twisting || fabrik.keep_direction) && self.iteration % fabrik.twist_interval == 0 {
			correct_twist(&mut self.pose, target.position, fabrik);
		}

		let error = Self::effector_error(&self.pose, &target);
		self.remember(error);
		if error <= config.error_threshold { return true }

		let stalled = change < config.min_change_threshold || error > self.recent[0];
		self.recent = [self.recent[1], error];
		if !stalled { return false }

		if !fabrik.deadlock_avoidance || self.explorations >= fabrik.max_explorations {
			return true
		}
		self.explorations += 1;
		!self.explore(&target, fabrik, &mut *ctx.rng)
	}

	fn update(&self, skeleton: &mut Skeleton) {
		self.best.commit(skeleton);
	}

	fn error(&self) -> f32 {
		self.best_error
	}

	fn snapshot(&self) -> Vec<Vec3> {
		self.pose.positions()
	}
}

/// One forward and one backward pass. Returns the total rotation applied.
pub fn reach(pose: &mut Pose, target: &Target, changes: &mut [f32]) -> f32 {
	let desired = forward_reaching(pose, target.position);
	backward_reaching(pose, &desired, target.orientation, changes)
}

/// Tip-to-root pass: pins the effector on `target` and drags each joint
/// toward the next one, keeping segment lengths. Joints with a rotational
/// constraint bend the incoming segment into their feasible range.
pub fn forward_reaching(pose: &Pose, target: Vec3) -> Vec<Vec3> {
	let n = pose.len();
	let mut desired = pose.positions();
	if n == 0 { return desired }
	desired[n - 1] = target;

	for i in (0..n - 1).rev() {
		let child = i + 1;
		let length = pose.joints[child].length();
		let toward = desired[i] - desired[child];
		let direction = match toward.length() > EPSILON {
			true => toward.normalize(),
			false => (pose.position(i) - pose.position(child)).normalize_or_zero(),
		};
		desired[i] = desired[child] + direction * length;

		if child + 1 < n {
			if let Some(incoming) = feasible_incoming(pose, i, &desired) {
				desired[i] = desired[child] - incoming * length;
			}
		}
	}
	desired
}

/// Direction of segment `parent -> parent + 1` that keeps joint `parent + 1`
/// inside its constraint given where its own child wants to be, or `None`
/// when the proposed bend is already feasible.
fn feasible_incoming(pose: &Pose, parent: usize, desired: &[Vec3]) -> Option<Vec3> {
	let joint_index = parent + 1;
	let joint = &pose.joints[joint_index];
	let constraint = joint.constraint.as_ref()?;

	let incoming = desired[joint_index] - desired[parent];
	let outgoing = desired[joint_index + 1] - desired[joint_index];
	let parent_world = pose.frame(parent).rotation;
	let joint_world = pose.frame(joint_index).rotation;

	let parent_world = rotation_between(parent_world * joint.translation, incoming) * parent_world;
	let joint_world = rotation_between(joint_world * pose.joints[joint_index + 1].translation, outgoing) * joint_world;
	let local = (parent_world.inverse() * joint_world).normalize();
	let clamped = constraint.clamp(local, joint.rotation);
	if clamped.abs_diff_eq(local, 1e-5) { return None }

	let parent_world = (joint_world * clamped.inverse()).normalize();
	let direction = (parent_world * joint.translation).normalize_or_zero();
	if direction == Vec3::ZERO { None } else { Some(direction) }
}

/// Root-to-tip pass: the root keeps its position, every joint is rotated
/// (through its constraint) to point at the next desired position. Returns
/// the total rotation applied and adds each joint's share to `changes`.
pub fn backward_reaching(pose: &mut Pose, desired: &[Vec3], orientation: Option<Quat>, changes: &mut [f32]) -> f32 {
	let n = pose.len();
	if n == 0 { return 0.0 }

	let mut total = 0.0;
	pose.update_frame(0);
	for i in 0..n - 1 {
		let direction = desired[i + 1] - pose.position(i);
		let applied = pose.aim(i, i + 1, direction);
		changes[i] += applied;
		total += applied;
		pose.update_frame(i + 1);
	}
	if let Some(orientation) = orientation {
		let applied = pose.orient(n - 1, orientation);
		changes[n - 1] += applied;
		total += applied;
	}
	total
}

/// Moves roll about each intermediate segment between a joint and its
/// child. World positions stay put; only orientations change.
pub fn correct_twist(pose: &mut Pose, target: Vec3, config: &FabrikConfig) {
	let n = pose.len();
	if n < 3 { return }
	let reference = target - pose.position(0);

	for i in 1..n - 1 {
		let world = pose.frame(i).rotation;
		let bone = pose.joints[i + 1].translation;
		let axis = (world * bone).normalize_or_zero();
		if axis == Vec3::ZERO { continue }

		let mut roll = Quat::IDENTITY;
		if config.fix_twisting {
			// undo the local twist about the outgoing segment
			let twist = twist_angle(pose.joints[i].rotation, bone.normalize());
			roll = Quat::from_axis_angle(axis, -twist);
		}
		if config.keep_direction {
			let current = roll * (world * orthogonal(bone));
			let wanted = reference - axis * reference.dot(axis);
			if wanted.length() > EPSILON {
				let angle = axis.dot(current.cross(wanted)).atan2(current.dot(wanted));
				roll = Quat::from_axis_angle(axis, angle) * roll;
			}
		}
		if is_identity(roll) { continue }

		let parent = pose.parent_frame(i).rotation;
		let rolled = (roll * world).normalize();
		let local = (parent.inverse() * rolled).normalize();
		let child_local = (rolled.inverse() * pose.frame(i + 1).rotation).normalize();
		if !feasible(&pose.joints[i], local) || !feasible(&pose.joints[i + 1], child_local) {
			continue
		}
		pose.joints[i].rotation = local;
		pose.joints[i + 1].rotation = child_local;
		pose.update_frame(i);
		pose.update_frame(i + 1);
	}
	pose.forward_kinematics();
}

fn feasible(joint: &Joint, local: Quat) -> bool {
	match &joint.constraint {
		Some(constraint) => constraint.clamp(local, joint.rotation).abs_diff_eq(local, 1e-5),
		None => true,
	}
}
