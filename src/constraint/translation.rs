use bevy::log::warn;
use bevy::math::Vec3;


/// Restricts translation to a line or a plane through the joint.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TranslationLimit {
	Axis(Vec3),
	/// Plane given by its normal.
	Plane(Vec3),
}

impl TranslationLimit {
	pub fn axis(axis: Vec3) -> Self {
		TranslationLimit::Axis(checked(axis))
	}

	pub fn plane(normal: Vec3) -> Self {
		TranslationLimit::Plane(checked(normal))
	}

	pub fn filter(&self, delta: Vec3) -> Vec3 {
		match *self {
			TranslationLimit::Axis(axis) if axis != Vec3::ZERO => axis * delta.dot(axis),
			TranslationLimit::Plane(normal) if normal != Vec3::ZERO => delta - normal * delta.dot(normal),
			_ => delta,
		}
	}
}

fn checked(v: Vec3) -> Vec3 {
	let v = v.normalize_or_zero();
	if v == Vec3::ZERO {
		warn!("translation limit direction has zero length, translation stays free");
	}
	v
}
