//! Small closed loop: a short chain whose effector is also tied back to
//! the chain root by a link of fixed length. Positions are relaxed toward
//! the target with annealed noise, then turned back into rotations.

use bevy::log::warn;
use bevy::math::Vec3;
use rand::Rng;
use crate::chain::{Pose, Skeleton};
use crate::math::{random_unit_vector, EPSILON};
use crate::solver::{Context, Strategy, Target};


#[derive(Debug, Clone)]
pub struct ClosedLoop {
	pose: Pose,
	best: Pose,
	best_error: f32,
	target: Option<Target>,
	/// Length of the link from the effector back to the chain root.
	closure: f32,
	/// Current noise amplitude, in world units.
	noise: f32,
	degenerate: bool,
}

impl Default for ClosedLoop {
	fn default() -> Self {
		ClosedLoop {
			pose: Pose::default(),
			best: Pose::default(),
			best_error: f32::NAN,
			target: None,
			closure: 0.0,
			noise: 0.0,
			degenerate: true,
		}
	}
}

impl ClosedLoop {
	pub fn closure(&self) -> f32 { self.closure }

	pub fn best(&self) -> &Pose { &self.best }

	fn loop_error(&self, pose: &Pose, target: &Target) -> f32 {
		let n = pose.len();
		if n == 0 { return f32::NAN }
		let effector = pose.position(n - 1);
		let residual = (effector.distance(pose.position(0)) - self.closure).abs();
		effector.distance(target.position) + residual
	}
}

/// Moves `points[b]` (and `points[a]` unless it is pinned) so the two are
/// `length` apart.
fn satisfy(points: &mut [Vec3], a: usize, b: usize, length: f32, pinned: bool) {
	let delta = points[b] - points[a];
	let distance = delta.length();
	if distance < EPSILON { return }
	let correction = delta * ((distance - length) / distance);
	if pinned {
		points[b] -= correction;
	} else {
		points[a] += correction * 0.5;
		points[b] -= correction * 0.5;
	}
}

/// Position-based relaxation of every link, the effector pulled to
/// `target` at the start of each pass. The root never moves.
pub fn relax(points: &mut [Vec3], lengths: &[f32], closure: f32, target: Vec3, passes: usize) {
	let n = points.len();
	if n < 2 { return }
	let root = points[0];
	for _ in 0..passes {
		points[n - 1] = target;
		for i in (0..n - 1).rev() {
			satisfy(points, i, i + 1, lengths[i], i == 0);
		}
		satisfy(points, 0, n - 1, closure, true);
		points[0] = root;
	}
}

impl Strategy for ClosedLoop {
	fn reset(&mut self, skeleton: &Skeleton, ctx: &mut Context) {
		*self = ClosedLoop::default();
		let (effector, target) = match ctx.primary_target() {
			Some(primary) => primary,
			None => return,
		};
		match skeleton.chain(ctx.root, effector) {
			Ok(ids) => self.pose = Pose::from_skeleton(skeleton, &ids),
			Err(err) => {
				warn!("closed loop: {}", err);
				return
			},
		}

		let n = self.pose.len();
		let config = &ctx.config.closed_loop;
		if n > 0 {
			self.closure = config.closure_length
				.unwrap_or_else(|| self.pose.position(n - 1).distance(self.pose.position(0)));
		}
		if n > 3 {
			warn!("closed loop over {} joints, expected a short loop of 3", n);
		}
		self.noise = config.noise * self.pose.reach();
		self.best = self.pose.clone();
		self.best_error = self.loop_error(&self.pose, &target);
		self.target = Some(target);
		self.degenerate = n < 2 || self.pose.reach() < EPSILON;
	}

	fn iterate(&mut self, ctx: &mut Context) -> bool {
		let target = match self.target {
			Some(target) if !self.degenerate => target,
			_ => return true,
		};
		let config = &ctx.config.closed_loop;
		let n = self.pose.len();

		let lengths: Vec<f32> = (1..n).map(|i| self.pose.joints[i].length()).collect();
		let mut points = self.pose.positions();
		relax(&mut points, &lengths, self.closure, target.position, config.relaxation_passes);

		for point in points.iter_mut().take(n - 1).skip(1) {
			let amount = self.noise * ctx.rng.gen::<f32>();
			*point += random_unit_vector(&mut *ctx.rng) * amount;
		}
		self.noise *= config.noise_decay;

		let mut change = 0.0;
		self.pose.update_frame(0);
		for i in 0..n - 1 {
			change += self.pose.aim(i, i + 1, points[i + 1] - self.pose.position(i));
			self.pose.update_frame(i + 1);
		}
		if let Some(orientation) = target.orientation {
			change += self.pose.orient(n - 1, orientation);
		}

		let error = self.loop_error(&self.pose, &target);
		if error < self.best_error {
			self.best = self.pose.clone();
			self.best_error = error;
		}

		self.best_error <= ctx.config.error_threshold
			|| (change < ctx.config.min_change_threshold && self.noise < ctx.config.min_change_threshold)
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

#[cfg(test)]
mod tests {
	use super::*;
	use std::collections::BTreeMap;
	use crate::chain::JointId;
	use crate::config::SolverConfig;
	use bevy::math::Quat;
	use rand::rngs::StdRng;
	use rand::SeedableRng;

	/// Right triangle: root at the origin, legs along +X then +Y.
	fn triangle() -> (Skeleton, Vec<JointId>) {
		let mut skeleton = Skeleton::new();
		let root = skeleton.add_joint("root", None, Vec3::ZERO, Quat::IDENTITY).unwrap();
		let knee = skeleton.add_joint("knee", Some(root), Vec3::X, Quat::IDENTITY).unwrap();
		let tip = skeleton.add_joint("tip", Some(knee), Vec3::Y, Quat::IDENTITY).unwrap();
		(skeleton, vec![root, knee, tip])
	}

	#[test]
	fn relax_restores_link_lengths() {
		let mut points = vec![Vec3::ZERO, Vec3::new(1.0, 0.0, 0.0), Vec3::new(1.0, 1.0, 0.0)];
		relax(&mut points, &[1.0, 1.0], 2f32.sqrt(), Vec3::new(0.0, 2f32.sqrt(), 0.0), 50);

		assert_eq!(points[0], Vec3::ZERO);
		assert!((points[0].distance(points[1]) - 1.0).abs() < 0.05);
		assert!((points[1].distance(points[2]) - 1.0).abs() < 0.05);
		assert!((points[2].distance(points[0]) - 2f32.sqrt()).abs() < 0.05);
	}

	#[test]
	fn rotates_the_loop_toward_the_target() {
		let (mut skeleton, ids) = triangle();
		let mut targets = BTreeMap::new();
		targets.insert(ids[2], Target::at(Vec3::new(0.0, 2f32.sqrt(), 0.0)));
		let config = SolverConfig::default();
		let mut rng = StdRng::seed_from_u64(9);
		let mut ctx = Context { root: ids[0], targets: &targets, config: &config, rng: &mut rng };

		let mut closed = ClosedLoop::default();
		closed.reset(&skeleton, &mut ctx);
		let initial = closed.error();
		assert!((closed.closure() - 2f32.sqrt()).abs() < 1e-5);

		for _ in 0..100 {
			if closed.iterate(&mut ctx) { break }
		}
		assert!(closed.error() < initial * 0.25);

		closed.update(&mut skeleton);
		let frames = skeleton.cumulative_transforms();
		assert!((frames[ids[2]].position.length() - 2f32.sqrt()).abs() < 0.1);
	}

	#[test]
	fn single_joint_is_degenerate() {
		let (skeleton, ids) = triangle();
		let mut targets = BTreeMap::new();
		targets.insert(ids[0], Target::at(Vec3::ONE));
		let config = SolverConfig::default();
		let mut rng = StdRng::seed_from_u64(1);
		let mut ctx = Context { root: ids[0], targets: &targets, config: &config, rng: &mut rng };

		let mut closed = ClosedLoop::default();
		closed.reset(&skeleton, &mut ctx);
		assert!(closed.iterate(&mut ctx));
	}
}
