//! The iteration driver shared by every algorithm: target bookkeeping,
//! reset on change, the fractional per-call budget and the final commit.

use std::collections::BTreeMap;
use bevy::log::{debug, trace};
use bevy::math::{Quat, Vec3};
use rand::rngs::StdRng;
use rand::SeedableRng;
use crate::chain::{JointId, Skeleton};
use crate::closed_loop::ClosedLoop;
use crate::config::SolverConfig;
use crate::cyclic_coordinate_descent::CyclicCoordinateDescent;
use crate::error::ConfigError;
use crate::evolutionary::Evolutionary;
use crate::fabrik::Fabrik;


/// Desired world pose of one effector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Target {
	pub position: Vec3,
	pub orientation: Option<Quat>,
}

impl Target {
	pub fn at(position: Vec3) -> Self {
		Target { position, orientation: None }
	}

	pub fn with_orientation(mut self, orientation: Quat) -> Self {
		self.orientation = Some(orientation.normalize());
		self
	}
}

impl From<Vec3> for Target {
	fn from(position: Vec3) -> Self {
		Target::at(position)
	}
}

/// Joint positions of the working copy after each iteration, keyed by
/// iteration index. Only recorded, never read back by the solvers.
#[derive(Debug, Clone, Default)]
pub struct History {
	frames: BTreeMap<usize, Vec<Vec3>>,
}

impl History {
	pub fn record(&mut self, iteration: usize, positions: Vec<Vec3>) {
		self.frames.insert(iteration, positions);
	}

	pub fn get(&self, iteration: usize) -> Option<&[Vec3]> {
		self.frames.get(&iteration).map(Vec::as_slice)
	}

	pub fn len(&self) -> usize {
		self.frames.len()
	}

	pub fn is_empty(&self) -> bool {
		self.frames.is_empty()
	}

	pub fn iter(&self) -> impl Iterator<Item = (usize, &[Vec3])> + '_ {
		self.frames.iter().map(|(i, positions)| (*i, positions.as_slice()))
	}

	pub fn clear(&mut self) {
		self.frames.clear();
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolverState {
	/// No target set, nothing was done.
	Idle,
	Running,
	Converged,
	/// Iteration budget used up without converging.
	Exhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolverKind {
	Fabrik,
	Ccd,
	Evolutionary,
	ClosedLoop,
}

/// What an algorithm sees of the solver during reset and iteration.
pub(crate) struct Context<'a> {
	pub root: JointId,
	pub targets: &'a BTreeMap<JointId, Target>,
	pub config: &'a SolverConfig,
	pub rng: &'a mut StdRng,
}

impl Context<'_> {
	/// Target driven by the single-chain algorithms: the lowest effector id.
	pub fn primary_target(&self) -> Option<(JointId, Target)> {
		self.targets.iter().next().map(|(id, target)| (*id, *target))
	}
}

pub(crate) trait Strategy {
	/// Rebuilds working copies from the live skeleton.
	fn reset(&mut self, skeleton: &Skeleton, ctx: &mut Context);
	/// One algorithm step; true when the algorithm considers itself done.
	fn iterate(&mut self, ctx: &mut Context) -> bool;
	/// Writes the best known solution to the live skeleton.
	fn update(&self, skeleton: &mut Skeleton);
	/// Current residual, NaN before the first reset.
	fn error(&self) -> f32;
	/// World positions of the working copy, for the history.
	fn snapshot(&self) -> Vec<Vec3>;
}

#[derive(Debug, Clone)]
pub enum Algorithm {
	Fabrik(Fabrik),
	Ccd(CyclicCoordinateDescent),
	Evolutionary(Evolutionary),
	ClosedLoop(ClosedLoop),
}

impl Algorithm {
	pub fn new(kind: SolverKind) -> Self {
		match kind {
			SolverKind::Fabrik => Algorithm::Fabrik(Fabrik::default()),
			SolverKind::Ccd => Algorithm::Ccd(CyclicCoordinateDescent::default()),
			SolverKind::Evolutionary => Algorithm::Evolutionary(Evolutionary::default()),
			SolverKind::ClosedLoop => Algorithm::ClosedLoop(ClosedLoop::default()),
		}
	}

	pub fn kind(&self) -> SolverKind {
		match self {
			Algorithm::Fabrik(_) => SolverKind::Fabrik,
			Algorithm::Ccd(_) => SolverKind::Ccd,
			Algorithm::Evolutionary(_) => SolverKind::Evolutionary,
			Algorithm::ClosedLoop(_) => SolverKind::ClosedLoop,
		}
	}

	fn strategy(&self) -> &dyn Strategy {
		match self {
			Algorithm::Fabrik(a) => a,
			Algorithm::Ccd(a) => a,
			Algorithm::Evolutionary(a) => a,
			Algorithm::ClosedLoop(a) => a,
		}
	}

	fn strategy_mut(&mut self) -> &mut dyn Strategy {
		match self {
			Algorithm::Fabrik(a) => a,
			Algorithm::Ccd(a) => a,
			Algorithm::Evolutionary(a) => a,
			Algorithm::ClosedLoop(a) => a,
		}
	}
}

/// Drives one algorithm toward the targets set on it. Call [`Solver::solve`]
/// at whatever cadence suits the caller; each call spends at most
/// `times_per_frame` iterations and commits once.
#[derive(Debug, Clone)]
pub struct Solver {
	root: JointId,
	config: SolverConfig,
	algorithm: Algorithm,
	targets: BTreeMap<JointId, Target>,
	/// Targets as they were at the last reset.
	previous: Option<BTreeMap<JointId, Target>>,
	force: bool,
	iterations: usize,
	accumulator: f32,
	state: SolverState,
	rng: StdRng,
	history: History,
}

impl Solver {
	pub fn new(kind: SolverKind, root: JointId, config: SolverConfig) -> Result<Self, ConfigError> {
		config.validate()?;
		Ok(Solver {
			root,
			algorithm: Algorithm::new(kind),
			targets: BTreeMap::new(),
			previous: None,
			force: false,
			iterations: 0,
			accumulator: 0.0,
			state: SolverState::Idle,
			rng: StdRng::seed_from_u64(config.seed),
			history: History::default(),
			config,
		})
	}

	pub fn root(&self) -> JointId { self.root }

	pub fn config(&self) -> &SolverConfig { &self.config }

	pub fn algorithm(&self) -> &Algorithm { &self.algorithm }

	pub fn set_target(&mut self, effector: JointId, target: impl Into<Target>) {
		self.targets.insert(effector, target.into());
	}

	pub fn remove_target(&mut self, effector: JointId) -> Option<Target> {
		self.targets.remove(&effector)
	}

	pub fn clear_targets(&mut self) {
		self.targets.clear();
	}

	pub fn target(&self, effector: JointId) -> Option<&Target> {
		self.targets.get(&effector)
	}

	/// Makes the next `solve` start over even if no target moved.
	pub fn force_reset(&mut self) {
		self.force = true;
	}

	pub fn set_max_iterations(&mut self, max_iterations: usize) {
		self.config.max_iterations = max_iterations;
	}

	pub fn set_error_threshold(&mut self, threshold: f32) {
		self.config.error_threshold = threshold.max(0.0);
	}

	pub fn set_min_change_threshold(&mut self, threshold: f32) {
		self.config.min_change_threshold = threshold.max(0.0);
	}

	pub fn set_times_per_frame(&mut self, times_per_frame: f32) {
		self.config.times_per_frame = times_per_frame.max(0.0);
	}

	pub fn iterations(&self) -> usize { self.iterations }

	pub fn state(&self) -> SolverState { self.state }

	pub fn history(&self) -> &History { &self.history }

	/// Residual of the best solution so far; NaN when no target is set.
	pub fn error(&self) -> f32 {
		if self.targets.is_empty() { return f32::NAN }
		self.algorithm.strategy().error()
	}

	pub fn solve(&mut self, skeleton: &mut Skeleton) -> SolverState {
		if self.targets.is_empty() {
			self.state = SolverState::Idle;
			return self.state
		}

		if self.force || self.changed() {
			self.reset(skeleton);
			self.force = false;
		}

		if self.iterations >= self.config.max_iterations {
			if self.state == SolverState::Running {
				self.state = SolverState::Exhausted;
			}
			return self.state
		}

		self.accumulator += self.config.times_per_frame;
		while self.accumulator >= 1.0 {
			self.accumulator -= 1.0;

			let mut ctx = Context {
				root: self.root,
				targets: &self.targets,
				config: &self.config,
				rng: &mut self.rng,
			};
			let converged = self.algorithm.strategy_mut().iterate(&mut ctx);
			self.iterations += 1;

			let strategy = self.algorithm.strategy();
			if self.config.debug.record_history {
				self.history.record(self.iterations - 1, strategy.snapshot());
			}
			if self.config.debug.log_iterations {
				trace!("{:?} iteration {}: error {}", self.algorithm.kind(), self.iterations, strategy.error());
			}

			if converged {
				debug!("{:?} converged after {} iterations, error {}", self.algorithm.kind(), self.iterations, strategy.error());
				self.iterations = self.config.max_iterations;
				self.accumulator = 0.0;
				self.state = SolverState::Converged;
				break
			}
			if self.iterations >= self.config.max_iterations {
				debug!("{:?} exhausted {} iterations, error {}", self.algorithm.kind(), self.iterations, strategy.error());
				self.accumulator = 0.0;
				self.state = SolverState::Exhausted;
				break
			}
		}

		self.algorithm.strategy().update(skeleton);
		self.state
	}

	/// Targets compared by value against the snapshot taken at reset.
	fn changed(&self) -> bool {
		self.previous.as_ref() != Some(&self.targets)
	}

	fn reset(&mut self, skeleton: &Skeleton) {
		debug!("{:?} reset with {} target(s)", self.algorithm.kind(), self.targets.len());
		self.previous = Some(self.targets.clone());
		self.iterations = 0;
		self.accumulator = 0.0;
		self.state = SolverState::Running;
		self.history.clear();

		let mut ctx = Context {
			root: self.root,
			targets: &self.targets,
			config: &self.config,
			rng: &mut self.rng,
		};
		self.algorithm.strategy_mut().reset(skeleton, &mut ctx);
	}
}
