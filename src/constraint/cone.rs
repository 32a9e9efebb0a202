use std::f32::consts::FRAC_1_SQRT_2;
use bevy::log::warn;
use bevy::math::{Quat, Vec2, Vec3};
use crate::constraint::TwistLimit;
use crate::math::{orthogonal, rotation_between, swing_twist, twist_angle, EPSILON};


const ELLIPSE_ITERATIONS: usize = 8;

/// Twist axis plus an orthonormal up/right pair spanning the swing plane.
///
/// A swing direction maps to 2D by its azimuth in the up/right plane and
/// its angle away from the axis, so `|(x, y)|` is the swing angle itself.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SwingFrame {
	pub axis: Vec3,
	pub up: Vec3,
	pub right: Vec3,
}

impl SwingFrame {
	/// Returns `None` when `axis` has zero length.
	pub fn new(axis: Vec3, up: Option<Vec3>) -> Option<Self> {
		let axis = axis.normalize_or_zero();
		if axis == Vec3::ZERO { return None }

		let up = up
			.map(|up| (up - axis * up.dot(axis)).normalize_or_zero())
			.filter(|up| *up != Vec3::ZERO)
			.unwrap_or_else(|| orthogonal(axis));
		let right = up.cross(axis).normalize();
		Some(SwingFrame { axis, up, right })
	}

	pub fn coordinates(&self, direction: Vec3) -> Vec2 {
		let planar = Vec2::new(direction.dot(self.right), direction.dot(self.up));
		let planar_length = planar.length();
		if planar_length < EPSILON { return Vec2::ZERO }

		let angle = planar_length.atan2(direction.dot(self.axis));
		planar * (angle / planar_length)
	}

	pub fn direction(&self, coordinates: Vec2) -> Vec3 {
		let angle = coordinates.length();
		if angle < EPSILON { return self.axis }

		let planar = coordinates / angle;
		self.axis * angle.cos() + (self.right * planar.x + self.up * planar.y) * angle.sin()
	}
}

/// Swing half-angles per side of the cone, in radians.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SwingLimits {
	pub up: f32,
	pub down: f32,
	pub left: f32,
	pub right: f32,
}

impl SwingLimits {
	pub fn uniform(angle: f32) -> Self {
		SwingLimits { up: angle, down: angle, left: angle, right: angle }
	}

	fn semi_axes(&self, point: Vec2) -> (f32, f32) {
		let a = if point.x >= 0.0 { self.right } else { self.left };
		let b = if point.y >= 0.0 { self.up } else { self.down };
		(a.max(0.0), b.max(0.0))
	}

	pub fn contains(&self, point: Vec2) -> bool {
		let (a, b) = self.semi_axes(point);
		match (a < EPSILON, b < EPSILON) {
			(true, true) => point.length() < EPSILON,
			(true, false) => point.x.abs() < EPSILON && point.y.abs() <= b,
			(false, true) => point.y.abs() < EPSILON && point.x.abs() <= a,
			(false, false) => (point.x / a).powi(2) + (point.y / b).powi(2) <= 1.0 + EPSILON,
		}
	}

	/// Nearest point of the bounding ellipse, or `point` itself when inside.
	pub fn project(&self, point: Vec2) -> Vec2 {
		if self.contains(point) { return point }

		let (a, b) = self.semi_axes(point);
		match (a < EPSILON, b < EPSILON) {
			(true, true) => Vec2::ZERO,
			(true, false) => Vec2::new(0.0, point.y.clamp(-b, b)),
			(false, true) => Vec2::new(point.x.clamp(-a, a), 0.0),
			(false, false) => nearest_on_ellipse(point, a, b),
		}
	}
}

/// Iterative parametric projection onto the ellipse `(x/a)² + (y/b)² = 1`;
/// works in the first quadrant and mirrors back.
fn nearest_on_ellipse(point: Vec2, a: f32, b: f32) -> Vec2 {
	let px = point.x.abs();
	let py = point.y.abs();
	let mut tx = FRAC_1_SQRT_2;
	let mut ty = FRAC_1_SQRT_2;

	for _ in 0..ELLIPSE_ITERATIONS {
		let x = a * tx;
		let y = b * ty;
		let ex = (a * a - b * b) * tx.powi(3) / a;
		let ey = (b * b - a * a) * ty.powi(3) / b;

		let r = (x - ex).hypot(y - ey);
		let q = (px - ex).hypot(py - ey).max(EPSILON);

		tx = (((px - ex) * r / q + ex) / a).clamp(0.0, 1.0);
		ty = (((py - ey) * r / q + ey) / b).clamp(0.0, 1.0);
		let t = tx.hypot(ty);
		tx /= t;
		ty /= t;
	}
	Vec2::new((a * tx).copysign(point.x), (b * ty).copysign(point.y))
}

/// Ball-and-socket limit: swing bounded by an ellipse, optional twist range.
#[derive(Debug, Clone, PartialEq)]
pub struct Cone {
	frame: Option<SwingFrame>,
	limits: SwingLimits,
	twist: Option<TwistLimit>,
	pub(super) rest: Option<Quat>,
}

impl Cone {
	pub fn new(axis: Vec3, limits: SwingLimits) -> Self {
		let frame = SwingFrame::new(axis, None);
		if frame.is_none() {
			warn!("cone twist axis has zero length, the cone will not limit rotation");
		}
		Cone { frame, limits, twist: None, rest: None }
	}

	pub fn circular(axis: Vec3, angle: f32) -> Self {
		Cone::new(axis, SwingLimits::uniform(angle))
	}

	/// Orients the up half-angle; `up` is projected off the twist axis.
	pub fn with_up(mut self, up: Vec3) -> Self {
		if let Some(frame) = self.frame {
			self.frame = SwingFrame::new(frame.axis, Some(up));
		}
		self
	}

	pub fn with_twist(mut self, min: f32, max: f32) -> Self {
		self.twist = Some(TwistLimit::new(min, max));
		self
	}

	pub fn with_rest(mut self, rest: Quat) -> Self {
		self.rest = Some(rest.normalize());
		self
	}

	pub fn frame(&self) -> Option<&SwingFrame> { self.frame.as_ref() }

	pub fn limits(&self) -> &SwingLimits { &self.limits }

	/// Swing coordinates of `local` relative to rest.
	pub fn swing_coordinates(&self, local: Quat) -> Vec2 {
		match self.frame {
			Some(frame) => {
				let rest = self.rest.unwrap_or(Quat::IDENTITY);
				frame.coordinates(rest.inverse() * local * frame.axis)
			},
			None => Vec2::ZERO,
		}
	}

	pub fn project_swing(&self, coordinates: Vec2) -> Vec2 {
		self.limits.project(coordinates)
	}

	pub fn clamp(&self, local: Quat) -> Quat {
		let frame = match self.frame {
			Some(frame) => frame,
			None => return local,
		};
		let rest = self.rest.unwrap_or(Quat::IDENTITY);
		let relative = (rest.inverse() * local).normalize();

		let coordinates = frame.coordinates(relative * frame.axis);
		let projected = self.limits.project(coordinates);
		let angle = twist_angle(relative, frame.axis);
		let clamped = self.twist.map_or(angle, |twist| twist.clamp(angle));

		if projected == coordinates && (clamped - angle).abs() < EPSILON {
			return local
		}

		let (swing, _) = swing_twist(relative, frame.axis);
		let swing = if projected == coordinates {
			swing
		} else {
			rotation_between(frame.axis, frame.direction(projected))
		};
		(rest * swing * Quat::from_axis_angle(frame.axis, clamped)).normalize()
	}
}
