//! Joint limits applied whenever a solver proposes to move a joint.
//!
//! Every rotational limit works relative to a rest rotation (the local
//! rotation at which swing and twist are zero). [`Skeleton::set_constraint`]
//! captures the joint's current rotation as rest when none was given.
//!
//! [`Skeleton::set_constraint`]: crate::chain::Skeleton::set_constraint

mod cone;
mod hinge;
mod polygon;
mod translation;

use bevy::math::{Quat, Vec3};
use crate::chain::Joint;
use crate::math::clamp_angle;

pub use cone::{Cone, SwingFrame, SwingLimits};
pub use hinge::Hinge;
pub use polygon::{PolygonCone, PolygonMode};
pub use translation::TranslationLimit;


/// Twist range `[-min, max]` about a constraint's twist axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TwistLimit {
	pub min: f32,
	pub max: f32,
}

impl TwistLimit {
	pub fn new(min: f32, max: f32) -> Self {
		TwistLimit { min: min.abs(), max }
	}

	pub fn clamp(&self, angle: f32) -> f32 {
		clamp_angle(angle, -self.min, self.max)
	}
}

#[derive(Debug, Clone, PartialEq)]
pub enum Constraint {
	/// The joint cannot move at all.
	Fixed,
	Hinge(Hinge),
	Cone(Cone),
	Polygon(PolygonCone),
	/// Limits translation only; rotation stays free.
	Translation(TranslationLimit),
}

impl Constraint {
	pub fn rest(&self) -> Option<Quat> {
		match self {
			Constraint::Hinge(hinge) => hinge.rest,
			Constraint::Cone(cone) => cone.rest,
			Constraint::Polygon(polygon) => polygon.rest,
			Constraint::Fixed | Constraint::Translation(_) => None,
		}
	}

	pub fn set_rest(&mut self, rest: Quat) {
		let rest = Some(rest.normalize());
		match self {
			Constraint::Hinge(hinge) => hinge.rest = rest,
			Constraint::Cone(cone) => cone.rest = rest,
			Constraint::Polygon(polygon) => polygon.rest = rest,
			Constraint::Fixed | Constraint::Translation(_) => {},
		}
	}

	/// Rest-pose setup is only meaningful for the rotational limits.
	pub fn needs_rest(&self) -> bool {
		matches!(self, Constraint::Hinge(_) | Constraint::Cone(_) | Constraint::Polygon(_))
	}

	/// Projects an absolute local rotation into the feasible set.
	/// `current` is returned for `Fixed`, since that joint never moves.
	pub fn clamp(&self, local: Quat, current: Quat) -> Quat {
		match self {
			Constraint::Fixed => current,
			Constraint::Hinge(hinge) => hinge.clamp(local),
			Constraint::Cone(cone) => cone.clamp(local),
			Constraint::Polygon(polygon) => polygon.clamp(local),
			Constraint::Translation(_) => local,
		}
	}

	/// Returns the feasible part of `delta`, a rotation proposed on top of
	/// the joint's current local rotation.
	pub fn constrain_rotation(&self, delta: Quat, joint: &Joint) -> Quat {
		match self {
			Constraint::Fixed => Quat::IDENTITY,
			Constraint::Translation(_) => delta,
			_ => {
				let candidate = (joint.rotation * delta).normalize();
				let feasible = self.clamp(candidate, joint.rotation);
				if feasible == candidate {
					return delta
				}
				(joint.rotation.inverse() * feasible).normalize()
			},
		}
	}

	pub fn constrain_translation(&self, delta: Vec3, _joint: &Joint) -> Vec3 {
		match self {
			Constraint::Fixed => Vec3::ZERO,
			Constraint::Translation(limit) => limit.filter(delta),
			_ => delta,
		}
	}
}

impl From<Hinge> for Constraint {
	fn from(hinge: Hinge) -> Self { Constraint::Hinge(hinge) }
}

impl From<Cone> for Constraint {
	fn from(cone: Cone) -> Self { Constraint::Cone(cone) }
}

impl From<PolygonCone> for Constraint {
	fn from(polygon: PolygonCone) -> Self { Constraint::Polygon(polygon) }
}

impl From<TranslationLimit> for Constraint {
	fn from(limit: TranslationLimit) -> Self { Constraint::Translation(limit) }
}
