use approx::assert_relative_eq;
use bevy::math::{Quat, Vec3};
use ik_solvers::math::twist_angle;
use ik_solvers::prelude::*;
use ik_solvers::Algorithm;
use proptest::prelude::*;


/// Root at the origin plus one joint per segment, laid out along +X.
fn straight_chain(lengths: &[f32]) -> (Skeleton, Vec<JointId>) {
	let mut skeleton = Skeleton::new();
	let mut ids = vec![skeleton.add_joint("root", None, Vec3::ZERO, Quat::IDENTITY).unwrap()];
	for (i, length) in lengths.iter().enumerate() {
		let parent = *ids.last().unwrap();
		ids.push(skeleton.add_joint(format!("joint{}", i + 1), Some(parent), Vec3::new(*length, 0.0, 0.0), Quat::IDENTITY).unwrap());
	}
	(skeleton, ids)
}

fn positions(skeleton: &Skeleton, ids: &[JointId]) -> Vec<Vec3> {
	let frames = skeleton.cumulative_transforms();
	ids.iter().map(|id| frames[*id].position).collect()
}

fn assert_unit_segments(points: &[Vec3]) {
	for pair in points.windows(2) {
		assert_relative_eq!(pair[0].distance(pair[1]), 1.0, epsilon = 1e-4);
	}
}

#[test]
fn collinear_chain_reaches_inside_its_length() {
	let (mut skeleton, ids) = straight_chain(&[1.0, 1.0, 1.0]);
	let config = SolverConfig { max_iterations: 50, ..SolverConfig::default() };
	let mut solver = Solver::new(SolverKind::Fabrik, ids[0], config).unwrap();
	let target = Vec3::new(2.5, 0.0, 0.0);
	solver.set_target(ids[3], target);

	while solver.solve(&mut skeleton) == SolverState::Running {}

	assert!(solver.error() < 0.01);
	let points = positions(&skeleton, &ids);
	assert!(points[3].distance(target) < 0.01);
	let length: f32 = points.windows(2).map(|w| w[0].distance(w[1])).sum();
	assert_relative_eq!(length, 3.0, epsilon = 1e-4);
}

#[test]
fn hinge_stops_the_bend_at_its_limit() {
	let (mut skeleton, ids) = straight_chain(&[1.0, 1.0]);
	skeleton.set_constraint(ids[1], Hinge::new(Vec3::Z, 0.0, rad(90.0)).into()).unwrap();
	let mut solver = Solver::new(SolverKind::Fabrik, ids[0], SolverConfig::default()).unwrap();
	let target = Vec3::new(0.2, 0.3, 0.0);
	solver.set_target(ids[2], target);

	while solver.solve(&mut skeleton) == SolverState::Running {}

	let bend = twist_angle(skeleton.joint(ids[1]).unwrap().rotation, Vec3::Z);
	assert_relative_eq!(bend, rad(90.0), epsilon = 1e-3);
	// closest a right-angled elbow gets is sqrt(2) from the root
	assert!(solver.error() > 0.0);
	assert_relative_eq!(solver.error(), 2f32.sqrt() - target.length(), epsilon = 0.02);
}

#[test]
fn hinge_stops_the_bend_of_a_three_segment_chain() {
	let (mut skeleton, ids) = straight_chain(&[1.0, 1.0, 1.0]);
	skeleton.set_constraint(ids[2], Hinge::new(Vec3::Z, 0.0, rad(90.0)).into()).unwrap();
	let mut config = SolverConfig::default();
	config.fabrik.deadlock_avoidance = false;
	let mut solver = Solver::new(SolverKind::Fabrik, ids[0], config).unwrap();
	let target = Vec3::new(0.1, 0.3, 0.0);
	solver.set_target(ids[3], target);

	while solver.solve(&mut skeleton) == SolverState::Running {}

	let bend = twist_angle(skeleton.joint(ids[2]).unwrap().rotation, Vec3::Z);
	assert_relative_eq!(bend, rad(90.0), epsilon = 1e-3);
	// two unit segments at a right angle span sqrt(2), so the tip stays sqrt(2) - 1 out
	let closest = 2f32.sqrt() - 1.0 - target.length();
	assert!(solver.error() > closest - 1e-3);
	assert!(solver.error() < 0.5);
	assert_unit_segments(&positions(&skeleton, &ids));
}

fn twisting_fabrik_config() -> SolverConfig {
	let mut config = SolverConfig { max_iterations: 40, ..SolverConfig::default() };
	config.debug.record_history = true;
	config.fabrik.fix_twisting = true;
	config.fabrik.keep_direction = true;
	config.fabrik.twist_interval = 1;
	config
}

#[test]
fn exploration_and_twist_correction_keep_segment_lengths() {
	let (mut skeleton, ids) = straight_chain(&[1.0, 1.0, 1.0]);
	let mut solver = Solver::new(SolverKind::Fabrik, ids[0], twisting_fabrik_config()).unwrap();
	// out of reach, so the chain stalls and explores
	solver.set_target(ids[3], Vec3::new(0.0, 5.0, 0.0));

	while solver.solve(&mut skeleton) == SolverState::Running {
		assert_unit_segments(&positions(&skeleton, &ids));
	}

	assert_unit_segments(&positions(&skeleton, &ids));
	match solver.algorithm() {
		Algorithm::Fabrik(fabrik) => assert!(fabrik.explorations() > 0),
		other => panic!("expected fabrik, got {:?}", other),
	}
	assert!(solver.history().len() > 1);
	for (_, points) in solver.history().iter() {
		assert_unit_segments(points);
	}
}

proptest! {
	#![proptest_config(ProptestConfig::with_cases(16))]

	#[test]
	fn fabrik_keeps_segment_lengths_across_solves(x in -4.0f32..4.0, y in -4.0f32..4.0, z in -4.0f32..4.0) {
		let (mut skeleton, ids) = straight_chain(&[1.0, 1.0, 1.0]);
		let mut solver = Solver::new(SolverKind::Fabrik, ids[0], twisting_fabrik_config()).unwrap();
		solver.set_target(ids[3], Vec3::new(x, y, z));

		loop {
			let state = solver.solve(&mut skeleton);
			let points = positions(&skeleton, &ids);
			for pair in points.windows(2) {
				prop_assert!((pair[0].distance(pair[1]) - 1.0).abs() < 1e-4);
			}
			if state != SolverState::Running { break }
		}
		for (_, points) in solver.history().iter() {
			for pair in points.windows(2) {
				prop_assert!((pair[0].distance(pair[1]) - 1.0).abs() < 1e-4);
			}
		}
	}
}

#[test]
fn ccd_solves_two_joints_in_one_iteration() {
	let (mut skeleton, ids) = straight_chain(&[1.0]);
	let config = SolverConfig { times_per_frame: 1.0, ..SolverConfig::default() };
	let mut solver = Solver::new(SolverKind::Ccd, ids[0], config).unwrap();
	solver.set_target(ids[1], Vec3::new(0.0, 0.0, 1.0));

	assert_eq!(solver.solve(&mut skeleton), SolverState::Converged);
	assert!(solver.error() < 0.01);
	assert!(positions(&skeleton, &ids)[1].distance(Vec3::Z) < 0.01);
}

#[test]
fn unchanged_target_keeps_counting() {
	let (mut skeleton, ids) = straight_chain(&[1.0, 1.0, 1.0]);
	let config = SolverConfig { error_threshold: 0.0, min_change_threshold: 0.0, ..SolverConfig::default() };
	let mut solver = Solver::new(SolverKind::Evolutionary, ids[0], config).unwrap();

	solver.set_target(ids[3], Target::at(Vec3::new(0.0, 4.0, 0.0)));
	solver.solve(&mut skeleton);
	assert_eq!(solver.iterations(), 1);

	// a fresh but equal target is not a change
	solver.set_target(ids[3], Target::at(Vec3::new(0.0, 4.0, 0.0)));
	solver.solve(&mut skeleton);
	assert_eq!(solver.iterations(), 2);

	solver.set_target(ids[3], Target::at(Vec3::new(0.0, 4.0, 0.0)).with_orientation(Quat::from_rotation_z(0.3)));
	solver.solve(&mut skeleton);
	assert_eq!(solver.iterations(), 1);
}

#[test]
fn fabrik_orients_the_effector() {
	let (mut skeleton, ids) = straight_chain(&[1.0, 1.0, 1.0]);
	let mut solver = Solver::new(SolverKind::Fabrik, ids[0], SolverConfig::default()).unwrap();
	let orientation = Quat::from_rotation_y(0.7);
	solver.set_target(ids[3], Target::at(Vec3::new(1.0, 2.0, 0.0)).with_orientation(orientation));

	while solver.solve(&mut skeleton) == SolverState::Running {}

	let frame = skeleton.world_frame(ids[3]).unwrap();
	assert!(frame.rotation.abs_diff_eq(orientation, 1e-4) || frame.rotation.abs_diff_eq(-orientation, 1e-4));
	assert!(solver.error() < 0.01);
}

#[test]
fn cone_limited_chain_stays_inside_its_cone() {
	let (mut skeleton, ids) = straight_chain(&[1.0, 1.0, 1.0]);
	for id in &ids[1..3] {
		skeleton.set_constraint(*id, Cone::circular(Vec3::X, rad(30.0)).into()).unwrap();
	}
	let mut solver = Solver::new(SolverKind::Fabrik, ids[0], SolverConfig::default()).unwrap();
	solver.set_target(ids[3], Vec3::new(-1.0, 1.0, 0.5));

	while solver.solve(&mut skeleton) == SolverState::Running {}

	for id in &ids[1..3] {
		let direction = skeleton.joint(*id).unwrap().rotation * Vec3::X;
		assert!(direction.angle_between(Vec3::X) <= rad(30.0) + 1e-3);
	}
	assert!(solver.error().is_finite());
}

#[test]
fn closed_loop_solver_runs_through_the_state_machine() {
	let mut skeleton = Skeleton::new();
	let root = skeleton.add_joint("root", None, Vec3::ZERO, Quat::IDENTITY).unwrap();
	let knee = skeleton.add_joint("knee", Some(root), Vec3::X, Quat::IDENTITY).unwrap();
	let tip = skeleton.add_joint("tip", Some(knee), Vec3::Y, Quat::IDENTITY).unwrap();
	let mut solver = Solver::new(SolverKind::ClosedLoop, root, SolverConfig::default()).unwrap();
	solver.set_target(tip, Vec3::new(0.0, 1.0, 1.0));

	let before = skeleton.world_frame(tip).unwrap().position.distance(Vec3::new(0.0, 1.0, 1.0));
	while solver.solve(&mut skeleton) == SolverState::Running {}
	let after = skeleton.world_frame(tip).unwrap().position.distance(Vec3::new(0.0, 1.0, 1.0));
	assert!(after < before);
}

#[test]
fn solver_config_from_toml() {
	let config = SolverConfig::from_toml_str(
		r#"
		max_iterations = 20
		seed = 42

		[fabrik]
		exploration_trials = 8
		biased_trials = 4
		"#,
	).unwrap();
	let solver = Solver::new(SolverKind::Fabrik, 0, config).unwrap();
	assert_eq!(solver.config().fabrik.exploration_trials, 8);
	assert_eq!(solver.config().seed, 42);
}
