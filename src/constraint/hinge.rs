use bevy::log::warn;
use bevy::math::{Quat, Vec3};
use crate::math::{clamp_angle, is_identity, swing_twist, twist_angle, EPSILON};


/// One rotational degree of freedom about `axis`, limited to `[-min, max]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Hinge {
	axis: Vec3,
	min: f32,
	max: f32,
	pub(super) rest: Option<Quat>,
}

impl Hinge {
	pub fn new(axis: Vec3, min: f32, max: f32) -> Self {
		let axis = axis.normalize_or_zero();
		if axis == Vec3::ZERO {
			warn!("hinge axis has zero length, the hinge will not limit rotation");
		}
		Hinge { axis, min: min.abs(), max, rest: None }
	}

	pub fn with_rest(mut self, rest: Quat) -> Self {
		self.rest = Some(rest.normalize());
		self
	}

	pub fn axis(&self) -> Vec3 { self.axis }

	pub fn range(&self) -> (f32, f32) { (-self.min, self.max) }

	/// Signed hinge angle of `local` relative to rest.
	pub fn angle(&self, local: Quat) -> f32 {
		let rest = self.rest.unwrap_or(Quat::IDENTITY);
		twist_angle(rest.inverse() * local, self.axis)
	}

	pub fn clamp(&self, local: Quat) -> Quat {
		if self.axis == Vec3::ZERO { return local }

		let rest = self.rest.unwrap_or(Quat::IDENTITY);
		let relative = (rest.inverse() * local).normalize();
		let (swing, _) = swing_twist(relative, self.axis);
		let angle = twist_angle(relative, self.axis);
		let clamped = clamp_angle(angle, -self.min, self.max);

		if is_identity(swing) && (clamped - angle).abs() < EPSILON {
			return local
		}
		(rest * Quat::from_axis_angle(self.axis, clamped)).normalize()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::math::rad;
	use approx::assert_relative_eq;
	use proptest::prelude::*;
	use std::f32::consts::PI;

	#[test]
	fn clamps_to_the_closer_bound() {
		let hinge = Hinge::new(Vec3::Z, 0.0, rad(90.0)).with_rest(Quat::IDENTITY);

		let over = hinge.clamp(Quat::from_rotation_z(rad(120.0)));
		assert_relative_eq!(hinge.angle(over), rad(90.0), epsilon = 1e-5);

		let under = hinge.clamp(Quat::from_rotation_z(rad(-30.0)));
		assert_relative_eq!(hinge.angle(under), 0.0, epsilon = 1e-5);
	}

	#[test]
	fn wraps_past_pi_to_nearest_bound() {
		let hinge = Hinge::new(Vec3::Z, rad(10.0), rad(170.0)).with_rest(Quat::IDENTITY);

		// -175° sits 15° from +170° across the wrap, 165° from -10°
		let clamped = hinge.clamp(Quat::from_rotation_z(rad(-175.0)));
		assert_relative_eq!(hinge.angle(clamped), rad(170.0), epsilon = 1e-4);
	}

	#[test]
	fn discards_off_axis_swing() {
		let hinge = Hinge::new(Vec3::Z, PI, PI).with_rest(Quat::IDENTITY);
		let local = Quat::from_rotation_z(0.5) * Quat::from_rotation_x(0.3);
		let clamped = hinge.clamp(local);
		let axis = clamped * Vec3::Z;
		assert!(axis.abs_diff_eq(Vec3::Z, 1e-5));
	}

	#[test]
	fn angle_is_measured_from_rest() {
		let rest = Quat::from_rotation_z(rad(30.0));
		let hinge = Hinge::new(Vec3::Z, rad(10.0), rad(10.0)).with_rest(rest);
		let clamped = hinge.clamp(Quat::from_rotation_z(rad(60.0)));
		assert!(clamped.abs_diff_eq(Quat::from_rotation_z(rad(40.0)), 1e-5));
	}

	#[test]
	fn zero_axis_degrades_to_free_rotation() {
		let hinge = Hinge::new(Vec3::ZERO, 0.0, 0.0);
		let local = Quat::from_rotation_x(1.0);
		assert_eq!(hinge.clamp(local), local);
	}

	proptest! {
		#[test]
		fn clamped_angle_stays_in_range(theta in -PI..PI, min in 0.0f32..1.5, max in 0.0f32..1.5) {
			let hinge = Hinge::new(Vec3::Z, min, max).with_rest(Quat::IDENTITY);
			let angle = hinge.angle(hinge.clamp(Quat::from_rotation_z(theta)));
			prop_assert!(angle >= -min - 1e-4 && angle <= max + 1e-4);
		}

		#[test]
		fn feasible_angle_is_unchanged(t in 0.0f32..1.0) {
			let hinge = Hinge::new(Vec3::Z, 0.8, 1.2).with_rest(Quat::IDENTITY);
			let theta = -0.8 + t * 2.0;
			let local = Quat::from_rotation_z(theta);
			prop_assert_eq!(hinge.clamp(local), local);
		}
	}
}
