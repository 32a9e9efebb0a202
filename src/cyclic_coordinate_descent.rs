use bevy::log::warn;
use bevy::math::Vec3;
use crate::chain::{Pose, Skeleton};
use crate::math::{rotation_between, EPSILON};
use crate::solver::{Context, Strategy, Target};


#[derive(Debug, Clone)]
pub struct CyclicCoordinateDescent {
	pose: Pose,
	target: Option<Target>,
	error: f32,
	degenerate: bool,
}

impl Default for CyclicCoordinateDescent {
	fn default() -> Self {
		CyclicCoordinateDescent { pose: Pose::default(), target: None, error: f32::NAN, degenerate: true }
	}
}

impl CyclicCoordinateDescent {
	pub fn pose(&self) -> &Pose { &self.pose }

	fn effector_error(&self, target: &Target) -> f32 {
		match self.pose.len() {
			0 => f32::NAN,
			n => self.pose.position(n - 1).distance(target.position),
		}
	}
}

/// One tip-to-root sweep. Each joint turns so that the direction to the
/// effector lines up with the direction to the target; returns the total
/// rotation applied.
pub fn cyclic_coordinate_descent(pose: &mut Pose, target: Vec3) -> f32 {
	const PERP_LENGTH_THRESHOLD: f32 = 0.0001;

	let len = pose.len();
	if len < 2 { return 0.0 }

	let mut total = 0.0;
	for i in (0..len - 1).rev() {
		let frame = pose.frame(i);
		let end_dir = pose.position(len - 1) - frame.position;
		let target_dir = target - frame.position;

		if end_dir.length() < PERP_LENGTH_THRESHOLD || target_dir.length() < PERP_LENGTH_THRESHOLD { continue }

		// both directions in the joint's own frame, so the delta is local
		let inverse = frame.rotation.inverse();
		let delta = rotation_between(inverse * end_dir, inverse * target_dir);
		total += pose.rotate_local(i, delta);

		for j in i..len {
			pose.update_frame(j);
		}
	}
	total
}

impl Strategy for CyclicCoordinateDescent {
	fn reset(&mut self, skeleton: &Skeleton, ctx: &mut Context) {
		*self = CyclicCoordinateDescent::default();
		let (effector, target) = match ctx.primary_target() {
			Some(primary) => primary,
			None => return,
		};
		match skeleton.chain(ctx.root, effector) {
			Ok(ids) => self.pose = Pose::from_skeleton(skeleton, &ids),
			Err(err) => {
				warn!("ccd: {}", err);
				return
			},
		}
		self.target = Some(target);
		self.error = self.effector_error(&target);
		self.degenerate = self.pose.len() < 2 || self.pose.reach() < EPSILON;
	}

	fn iterate(&mut self, ctx: &mut Context) -> bool {
		let target = match self.target {
			Some(target) if !self.degenerate => target,
			_ => return true,
		};

		let mut total = cyclic_coordinate_descent(&mut self.pose, target.position);
		if let Some(orientation) = target.orientation {
			total += self.pose.orient(self.pose.len() - 1, orientation);
		}
		self.error = self.effector_error(&target);

		self.error < ctx.config.error_threshold || total < ctx.config.min_change_threshold
	}

	fn update(&self, skeleton: &mut Skeleton) {
		self.pose.commit(skeleton);
	}

	fn error(&self) -> f32 {
		self.error
	}

	fn snapshot(&self) -> Vec<Vec3> {
		self.pose.positions()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::chain::tests::straight_chain;
	use crate::constraint::Hinge;
	use crate::math::rad;
	use approx::assert_relative_eq;

	#[test]
	fn one_sweep_solves_two_joints() {
		let (skeleton, ids) = straight_chain(&[1.0]);
		let mut pose = Pose::from_skeleton(&skeleton, &ids);
		let target = Vec3::new(0.0, 0.6, 0.8);

		cyclic_coordinate_descent(&mut pose, target);
		assert!(pose.position(1).distance(target) < 1e-4);
	}

	#[test]
	fn sweep_keeps_segment_lengths() {
		let (skeleton, ids) = straight_chain(&[1.0, 0.5, 1.5]);
		let mut pose = Pose::from_skeleton(&skeleton, &ids);

		for _ in 0..5 {
			cyclic_coordinate_descent(&mut pose, Vec3::new(-1.0, 1.0, 1.0));
		}
		let positions = pose.positions();
		assert_relative_eq!(positions[0].distance(positions[1]), 1.0, epsilon = 1e-4);
		assert_relative_eq!(positions[1].distance(positions[2]), 0.5, epsilon = 1e-4);
		assert_relative_eq!(positions[2].distance(positions[3]), 1.5, epsilon = 1e-4);
	}

	#[test]
	fn hinge_limits_the_sweep() {
		let (mut skeleton, ids) = straight_chain(&[1.0]);
		skeleton.set_constraint(ids[0], Hinge::new(Vec3::Z, 0.0, rad(30.0)).into()).unwrap();
		let mut pose = Pose::from_skeleton(&skeleton, &ids);

		cyclic_coordinate_descent(&mut pose, Vec3::new(0.0, 1.0, 0.0));
		assert_relative_eq!(pose.position(1).angle_between(Vec3::X), rad(30.0), epsilon = 1e-4);
	}

	#[test]
	fn target_on_joint_is_skipped() {
		let (skeleton, ids) = straight_chain(&[1.0, 1.0]);
		let mut pose = Pose::from_skeleton(&skeleton, &ids);
		assert_eq!(cyclic_coordinate_descent(&mut pose, Vec3::new(1.0, 0.0, 0.0)), 0.0);
	}
}
