use bevy::log::warn;
use bevy::math::{Quat, Vec2, Vec3};
use itertools::Itertools;
use crate::constraint::{SwingFrame, TwistLimit};
use crate::math::{closest_point_on_segment, cross2, rotation_between, swing_twist, twist_angle, EPSILON};


const BOUNDARY_TOLERANCE: f32 = 1e-5;


#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolygonMode {
	/// Boundary mapped into the swing plane, tested in 2D.
	Planar,
	/// Boundary kept on the unit sphere, tested against great circles.
	Spherical,
}

/// Swing limit described by a convex loop of boundary directions around
/// the twist axis, with an optional twist range.
#[derive(Debug, Clone, PartialEq)]
pub struct PolygonCone {
	frame: Option<SwingFrame>,
	mode: PolygonMode,
	boundary: Vec<Vec3>,
	planar: Vec<Vec2>,
	normals: Vec<Vec3>,
	twist: Option<TwistLimit>,
	pub(super) rest: Option<Quat>,
}

impl PolygonCone {
	/// `boundary` holds directions in the rest frame, ordered around `axis`.
	pub fn new(axis: Vec3, boundary: &[Vec3], mode: PolygonMode) -> Self {
		let boundary: Vec<Vec3> = boundary.iter()
			.map(|v| v.normalize_or_zero())
			.filter(|v| *v != Vec3::ZERO)
			.collect();
		let mut frame = SwingFrame::new(axis, None);
		if frame.is_none() {
			warn!("polygon twist axis has zero length, the polygon will not limit rotation");
		} else if boundary.len() < 3 {
			warn!("polygon constraint needs at least 3 boundary directions, got {}", boundary.len());
			frame = None;
		}

		let planar = match frame {
			Some(frame) => boundary.iter().map(|v| frame.coordinates(*v)).collect(),
			None => Vec::new(),
		};
		let normals = match frame {
			Some(frame) => boundary.iter()
				.circular_tuple_windows()
				.map(|(a, b)| {
					let normal = a.cross(*b).normalize_or_zero();
					if normal.dot(frame.axis) < 0.0 { -normal } else { normal }
				})
				.collect(),
			None => Vec::new(),
		};

		PolygonCone { frame, mode, boundary, planar, normals, twist: None, rest: None }
	}

	pub fn with_twist(mut self, min: f32, max: f32) -> Self {
		self.twist = Some(TwistLimit::new(min, max));
		self
	}

	pub fn with_rest(mut self, rest: Quat) -> Self {
		self.rest = Some(rest.normalize());
		self
	}

	pub fn mode(&self) -> PolygonMode { self.mode }

	pub fn boundary(&self) -> &[Vec3] { &self.boundary }

	pub fn contains(&self, direction: Vec3) -> bool {
		let frame = match self.frame {
			Some(frame) => frame,
			None => return true,
		};
		match self.mode {
			PolygonMode::Planar => contains_planar(&self.planar, frame.coordinates(direction)),
			PolygonMode::Spherical => self.normals.iter().all(|n| n.dot(direction) >= -BOUNDARY_TOLERANCE),
		}
	}

	/// Nearest feasible swing direction, or `direction` itself when inside.
	pub fn project(&self, direction: Vec3) -> Vec3 {
		let frame = match self.frame {
			Some(frame) => frame,
			None => return direction,
		};
		if self.contains(direction) { return direction }

		match self.mode {
			PolygonMode::Planar => {
				let point = frame.coordinates(direction);
				let nearest = self.planar.iter()
					.circular_tuple_windows()
					.map(|(a, b)| closest_point_on_segment(point, *a, *b))
					.min_by(|p, q| p.distance_squared(point).total_cmp(&q.distance_squared(point)))
					.unwrap_or(point);
				frame.direction(nearest)
			},
			PolygonMode::Spherical => {
				self.boundary.iter()
					.circular_tuple_windows()
					.flat_map(|(a, b)| nearest_on_arc(direction, *a, *b))
					.max_by(|p, q| p.dot(direction).total_cmp(&q.dot(direction)))
					.unwrap_or(direction)
			},
		}
	}

	pub fn clamp(&self, local: Quat) -> Quat {
		let frame = match self.frame {
			Some(frame) => frame,
			None => return local,
		};
		let rest = self.rest.unwrap_or(Quat::IDENTITY);
		let relative = (rest.inverse() * local).normalize();

		let direction = relative * frame.axis;
		let inside = self.contains(direction);
		let angle = twist_angle(relative, frame.axis);
		let clamped = self.twist.map_or(angle, |twist| twist.clamp(angle));

		if inside && (clamped - angle).abs() < EPSILON {
			return local
		}

		let swing = if inside {
			swing_twist(relative, frame.axis).0
		} else {
			rotation_between(frame.axis, self.project(direction))
		};
		(rest * swing * Quat::from_axis_angle(frame.axis, clamped)).normalize()
	}
}

/// Even-odd ray casting along +x.
fn contains_planar(polygon: &[Vec2], point: Vec2) -> bool {
	let mut inside = false;
	for (a, b) in polygon.iter().circular_tuple_windows() {
		if (a.y > point.y) != (b.y > point.y) {
			let x = a.x + (point.y - a.y) / (b.y - a.y) * (b.x - a.x);
			if point.x < x { inside = !inside }
		}
	}
	inside || polygon.iter().circular_tuple_windows().any(|(a, b)| {
		cross2(*b - *a, point - *a).abs() < BOUNDARY_TOLERANCE
			&& closest_point_on_segment(point, *a, *b).distance(point) < BOUNDARY_TOLERANCE
	})
}

/// Candidates for the nearest point of the great-circle arc `a -> b`:
/// the arc projection when it falls inside the arc, plus both endpoints.
fn nearest_on_arc(direction: Vec3, a: Vec3, b: Vec3) -> Vec<Vec3> {
	let mut candidates = vec![a, b];
	let edge = a.cross(b);
	let normal = edge.normalize_or_zero();
	if normal == Vec3::ZERO { return candidates }

	let projected = (direction - normal * direction.dot(normal)).normalize_or_zero();
	if projected != Vec3::ZERO
		&& a.cross(projected).dot(edge) >= 0.0
		&& projected.cross(b).dot(edge) >= 0.0
	{
		candidates.push(projected);
	}
	candidates
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::math::rad;
	use approx::assert_relative_eq;
	use proptest::prelude::*;
	use std::f32::consts::TAU;

	/// Square of half-width 40° around +Y.
	fn square(mode: PolygonMode) -> PolygonCone {
		let tilt = |x: f32, z: f32| Vec3::new(rad(x).tan(), 1.0, rad(z).tan()).normalize();
		let boundary = [tilt(40.0, 40.0), tilt(-40.0, 40.0), tilt(-40.0, -40.0), tilt(40.0, -40.0)];
		PolygonCone::new(Vec3::Y, &boundary, mode).with_rest(Quat::IDENTITY)
	}

	#[test]
	fn axis_is_inside_both_modes() {
		assert!(square(PolygonMode::Planar).contains(Vec3::Y));
		assert!(square(PolygonMode::Spherical).contains(Vec3::Y));
	}

	#[test]
	fn far_direction_is_outside_both_modes() {
		let away = Vec3::new(1.0, 0.2, 0.0).normalize();
		assert!(!square(PolygonMode::Planar).contains(away));
		assert!(!square(PolygonMode::Spherical).contains(away));
	}

	#[test]
	fn spherical_projection_lands_on_the_edge_plane() {
		let polygon = square(PolygonMode::Spherical);
		let away = Vec3::new(1.0, 0.2, 0.0).normalize();
		let projected = polygon.project(away);
		assert_relative_eq!(projected.length(), 1.0, epsilon = 1e-5);
		assert!(polygon.contains(projected));
		let on_some_edge = polygon.normals.iter().any(|n| n.dot(projected).abs() < 1e-4);
		assert!(on_some_edge);
	}

	#[test]
	fn planar_projection_is_inside_after_clamp() {
		let polygon = square(PolygonMode::Planar);
		let clamped = polygon.clamp(Quat::from_rotation_z(rad(-90.0)));
		assert!(polygon.contains(clamped * Vec3::Y));
	}

	#[test]
	fn too_few_vertices_degrade_to_free_rotation() {
		let polygon = PolygonCone::new(Vec3::Y, &[Vec3::X, Vec3::Z], PolygonMode::Spherical);
		let local = Quat::from_rotation_x(2.0);
		assert_eq!(polygon.clamp(local), local);
	}

	#[test]
	fn twist_is_clamped_inside_the_polygon() {
		let polygon = square(PolygonMode::Spherical).with_twist(rad(5.0), rad(5.0));
		let clamped = polygon.clamp(Quat::from_rotation_y(rad(30.0)));
		assert_relative_eq!(twist_angle(clamped, Vec3::Y), rad(5.0), epsilon = 1e-4);
	}

	proptest! {
		#[test]
		fn spherical_projection_is_nearest_sampled(phi in 0.0f32..TAU, swing in 0.9f32..2.5) {
			let polygon = square(PolygonMode::Spherical);
			let frame = SwingFrame::new(Vec3::Y, None).unwrap();
			let direction = frame.direction(Vec2::new(phi.cos(), phi.sin()) * swing);
			prop_assume!(!polygon.contains(direction));

			let projected = polygon.project(direction);
			let best_sampled = polygon.boundary.iter()
				.circular_tuple_windows()
				.flat_map(|(a, b)| (0..=200).map(move |i| a.lerp(*b, i as f32 / 200.0).normalize()))
				.map(|p| p.dot(direction))
				.fold(f32::NEG_INFINITY, f32::max);
			prop_assert!(projected.dot(direction) >= best_sampled - 1e-4);
		}

		#[test]
		fn spherical_inside_is_returned_unchanged(edge in 0usize..4, s in 0.0f32..1.0, t in 0.0f32..0.95) {
			let polygon = square(PolygonMode::Spherical);
			let a = polygon.boundary[edge];
			let b = polygon.boundary[(edge + 1) % 4];
			let rim = a.lerp(b, s).normalize();
			let direction = Vec3::Y.lerp(rim, t).normalize();

			prop_assert!(polygon.contains(direction));
			prop_assert_eq!(polygon.project(direction), direction);
			let local = rotation_between(Vec3::Y, direction);
			prop_assert_eq!(polygon.clamp(local), local);
		}

		#[test]
		fn planar_inside_is_returned_unchanged(edge in 0usize..4, s in 0.0f32..1.0, t in 0.0f32..0.95) {
			let polygon = square(PolygonMode::Planar);
			let frame = SwingFrame::new(Vec3::Y, None).unwrap();
			let a = polygon.planar[edge];
			let b = polygon.planar[(edge + 1) % 4];
			let direction = frame.direction(a.lerp(b, s) * t);

			prop_assert!(polygon.contains(direction));
			prop_assert_eq!(polygon.project(direction), direction);
			let local = rotation_between(Vec3::Y, direction);
			prop_assert_eq!(polygon.clamp(local), local);
		}

		#[test]
		fn planar_projection_is_nearest_sampled(edge in 0usize..4, s in 0.0f32..1.0, r in 1.05f32..1.9) {
			let polygon = square(PolygonMode::Planar);
			let frame = SwingFrame::new(Vec3::Y, None).unwrap();
			let a = polygon.planar[edge];
			let b = polygon.planar[(edge + 1) % 4];
			let point = a.lerp(b, s) * r;
			let direction = frame.direction(point);
			prop_assume!(!polygon.contains(direction));

			let projected = frame.coordinates(polygon.project(direction));
			let on_edge = polygon.planar.iter()
				.circular_tuple_windows()
				.any(|(p, q)| closest_point_on_segment(projected, *p, *q).distance(projected) < 1e-3);
			prop_assert!(on_edge);

			let best_sampled = polygon.planar.iter()
				.circular_tuple_windows()
				.flat_map(|(p, q)| (0..=200).map(move |i| p.lerp(*q, i as f32 / 200.0)))
				.map(|p| p.distance(point))
				.fold(f32::INFINITY, f32::min);
			prop_assert!(projected.distance(point) <= best_sampled + 1e-3);
		}
	}
}
