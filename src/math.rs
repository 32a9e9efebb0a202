use std::f32::consts::{PI, TAU};
use bevy::math::{Quat, Vec2, Vec3};
use rand::Rng;


pub const EPSILON: f32 = 1e-6;

/// A world-space position and orientation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frame {
	pub position: Vec3,
	pub rotation: Quat,
}

impl Frame {
	pub const IDENTITY: Frame = Frame { position: Vec3::ZERO, rotation: Quat::IDENTITY };

	pub fn child(&self, translation: Vec3, rotation: Quat) -> Frame {
		Frame {
			position: self.position + self.rotation * translation,
			rotation: (self.rotation * rotation).normalize(),
		}
	}
}

impl Default for Frame {
	fn default() -> Self { Frame::IDENTITY }
}

pub fn rad(degrees: f32) -> f32 {
	PI * degrees / 180.0
}

/// Wraps an angle into (-π, π].
pub fn wrap_angle(angle: f32) -> f32 {
	let mut wrapped = (angle + PI).rem_euclid(TAU) - PI;
	if wrapped <= -PI { wrapped += TAU }
	wrapped
}

/// Shortest angular distance between two angles.
pub fn angular_distance(a: f32, b: f32) -> f32 {
	wrap_angle(a - b).abs()
}

/// Clamps `angle` into `[lo, hi]`. Out-of-range angles go to whichever
/// bound is angularly closer, so a value just past -π lands on `hi`
/// rather than jumping to `lo`.
pub fn clamp_angle(angle: f32, lo: f32, hi: f32) -> f32 {
	let angle = wrap_angle(angle);
	if angle >= lo && angle <= hi { return angle }
	// ranges wider than a full turn cannot exclude anything
	if hi - lo >= TAU { return angle }

	if angular_distance(angle, lo) <= angular_distance(angle, hi) { lo } else { hi }
}

/// Any unit vector perpendicular to `v`.
pub fn orthogonal(v: Vec3) -> Vec3 {
	let other = if v.x.abs() < 0.9 { Vec3::X } else { Vec3::Y };
	v.cross(other).normalize_or_zero()
}

/// Minimal rotation taking direction `from` onto direction `to`.
pub fn rotation_between(from: Vec3, to: Vec3) -> Quat {
	let from = from.normalize_or_zero();
	let to = to.normalize_or_zero();
	if from == Vec3::ZERO || to == Vec3::ZERO { return Quat::IDENTITY }

	let dot = from.dot(to).clamp(-1.0, 1.0);
	if dot >= 1.0 - EPSILON { return Quat::IDENTITY }
	if dot <= -1.0 + EPSILON { return Quat::from_axis_angle(orthogonal(from), PI) }

	let axis = from.cross(to).normalize();
	Quat::from_axis_angle(axis, dot.acos())
}

/// Rotation angle of `q`, in [0, π].
pub fn rotation_angle(q: Quat) -> f32 {
	2.0 * q.w.abs().min(1.0).acos()
}

/// True when `q` is the identity rotation up to float noise.
pub fn is_identity(q: Quat) -> bool {
	Vec3::new(q.x, q.y, q.z).length() < 1e-4
}

/// Signed angle of the twist of `q` about the unit `axis`, in (-π, π].
pub fn twist_angle(q: Quat, axis: Vec3) -> f32 {
	let projection = Vec3::new(q.x, q.y, q.z).dot(axis);
	wrap_angle(2.0 * projection.atan2(q.w))
}

/// Splits `q` into `swing * twist`, where twist rotates about `axis`.
pub fn swing_twist(q: Quat, axis: Vec3) -> (Quat, Quat) {
	let twist = Quat::from_axis_angle(axis, twist_angle(q, axis));
	let swing = (q * twist.inverse()).normalize();
	(swing, twist)
}

pub fn random_unit_vector<R: Rng>(rng: &mut R) -> Vec3 {
	let z: f32 = rng.gen_range(-1.0..1.0);
	let azimuth: f32 = rng.gen_range(0.0..TAU);
	let r = (1.0 - z * z).max(0.0).sqrt();
	Vec3::new(r * azimuth.cos(), r * azimuth.sin(), z)
}

pub fn random_rotation<R: Rng>(rng: &mut R, max_angle: f32) -> Quat {
	if max_angle <= 0.0 { return Quat::IDENTITY }
	Quat::from_axis_angle(random_unit_vector(rng), rng.gen_range(-max_angle..=max_angle))
}

pub fn cross2(a: Vec2, b: Vec2) -> f32 {
	a.x * b.y - a.y * b.x
}

pub fn closest_point_on_segment(p: Vec2, a: Vec2, b: Vec2) -> Vec2 {
	let ab = b - a;
	let length_squared = ab.length_squared();
	if length_squared < EPSILON * EPSILON { return a }

	let t = ((p - a).dot(ab) / length_squared).clamp(0.0, 1.0);
	a + ab * t
}
