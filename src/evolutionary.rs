//! Population search over every joint of a subtree at once, so several
//! effectors can be driven together.
//!
//! Each generation the elites are refined by greedy per-axis steps, the
//! rest of the population is bred from rank-selected parents, and an
//! extinction score per individual scales how hard its offspring mutate.

use std::f32::consts::PI;
use bevy::log::{debug, warn};
use bevy::math::{Quat, Vec3};
use itertools::{zip, Itertools};
use rand::Rng;
use crate::chain::{Axis, Pose, Skeleton};
use crate::config::EvolutionConfig;
use crate::math::{random_rotation, rotation_angle, EPSILON};
use crate::solver::{Context, Strategy};


/// One candidate: a local rotation per joint of the subtree.
#[derive(Debug, Clone, PartialEq)]
pub struct Individual {
	pub rotations: Vec<Quat>,
	/// Summed effector distances plus weighted orientation error.
	pub fitness: f32,
	/// 0 for the fittest individual of a generation, 1 for the least fit.
	pub extinction: f32,
	/// Last accepted step per joint, one component per local axis.
	pub gradient: Vec<Vec3>,
}

impl Individual {
	fn new(rotations: Vec<Quat>) -> Self {
		let gradient = vec![Vec3::ZERO; rotations.len()];
		Individual { rotations, fitness: f32::INFINITY, extinction: 0.0, gradient }
	}
}

/// The subtree being posed, and what it is scored against.
#[derive(Debug, Clone, Default)]
struct Structure {
	pose: Pose,
	/// Pose index and target of each effector inside the subtree.
	effectors: Vec<(usize, Vec3, Option<Quat>)>,
	/// Rotations at reset, used where a constraint forbids any motion.
	initial: Vec<Quat>,
	orientation_weight: f32,
	/// Reach of the subtree, normalises fitness when scaling steps.
	scale: f32,
}

impl Structure {
	fn fitness(&mut self, rotations: &[Quat]) -> f32 {
		for (joint, rotation) in zip(&mut self.pose.joints, rotations) {
			joint.rotation = *rotation;
		}
		self.pose.forward_kinematics();

		self.effectors.iter()
			.map(|(index, position, orientation)| {
				let frame = self.pose.frame(*index);
				let distance = frame.position.distance(*position);
				match orientation {
					Some(orientation) => {
						let difference = (orientation.inverse() * frame.rotation).normalize();
						distance + self.orientation_weight * rotation_angle(difference)
					},
					None => distance,
				}
			})
			.sum()
	}

	/// Nearest rotation joint `index` is allowed to take.
	fn feasible(&self, index: usize, rotation: Quat) -> Quat {
		match &self.pose.joints[index].constraint {
			Some(constraint) => constraint.clamp(rotation.normalize(), self.initial[index]),
			None => rotation.normalize(),
		}
	}

	fn random_individual(&self, rng: &mut impl Rng) -> Individual {
		let rotations = (0..self.pose.len())
			.map(|i| self.feasible(i, self.initial[i] * random_rotation(rng, PI)))
			.collect();
		Individual::new(rotations)
	}

	fn evaluate(&mut self, individual: &mut Individual) {
		individual.fitness = self.fitness(&individual.rotations);
	}

	/// Greedy step of joint `index` about `axis` by `±step`. Keeps the best
	/// of the three and returns the signed step taken, 0 when none helped.
	fn greedy_step(&mut self, individual: &mut Individual, index: usize, axis: Axis, step: f32) -> f32 {
		let original = individual.rotations[index];
		let mut taken = 0.0;
		for signed in [step, -step] {
			let candidate = self.feasible(index, original * Quat::from_axis_angle(axis.to_vec3(), signed));
			individual.rotations[index] = candidate;
			let fitness = self.fitness(&individual.rotations);
			if fitness < individual.fitness {
				individual.fitness = fitness;
				taken = signed;
			}
		}
		individual.rotations[index] = match taken != 0.0 {
			true => self.feasible(index, original * Quat::from_axis_angle(axis.to_vec3(), taken)),
			false => original,
		};
		taken
	}

	fn step_size(&self, fitness: f32, max_step: f32) -> f32 {
		match self.scale > EPSILON {
			true => (fitness / self.scale).min(1.0) * max_step,
			false => 0.0,
		}
	}
}

#[derive(Debug, Clone)]
pub struct Evolutionary {
	structure: Structure,
	population: Vec<Individual>,
	best: Option<Individual>,
	generation: usize,
	wipes: usize,
	degenerate: bool,
}

impl Default for Evolutionary {
	fn default() -> Self {
		Evolutionary {
			structure: Structure::default(),
			population: Vec::new(),
			best: None,
			generation: 0,
			wipes: 0,
			degenerate: true,
		}
	}
}

impl Evolutionary {
	/// Fittest individual seen since the last reset.
	pub fn best(&self) -> Option<&Individual> { self.best.as_ref() }

	pub fn population(&self) -> &[Individual] { &self.population }

	pub fn generation(&self) -> usize { self.generation }

	pub fn wipes(&self) -> usize { self.wipes }

	/// Local greedy descent: every joint, every axis, one random-sized step.
	fn exploit(structure: &mut Structure, individual: &mut Individual, max_step: f32, rng: &mut impl Rng) {
		let scale = structure.step_size(individual.fitness, max_step);
		if scale <= 0.0 { return }
		for index in 0..individual.rotations.len() {
			for axis in Axis::ALL {
				let step = rng.gen::<f32>() * scale;
				if step < EPSILON { continue }
				let taken = structure.greedy_step(individual, index, axis, step);
				*axis.component_mut(&mut individual.gradient[index]) = taken;
			}
		}
	}

	/// Searches the best individual's neighbourhood with full-sized steps.
	/// Returns the improved copy, or `None` when no direction helps.
	fn stagnation_search(&mut self, max_step: f32) -> Option<Individual> {
		let best = self.best.as_ref()?;
		let step = self.structure.step_size(best.fitness, max_step);
		if step < EPSILON { return None }

		let mut neighbour = best.clone();
		let mut improved = false;
		for index in 0..neighbour.rotations.len() {
			for axis in Axis::ALL {
				if self.structure.greedy_step(&mut neighbour, index, axis, step) != 0.0 {
					improved = true;
				}
			}
		}
		improved.then(|| neighbour)
	}

	/// Roulette over ranks: position `r` of an `n`-long pool weighs `n - r`.
	fn select(pool: &[usize], rng: &mut impl Rng) -> usize {
		let n = pool.len();
		let mut pick = rng.gen_range(0..n * (n + 1) / 2);
		for (rank, _) in pool.iter().enumerate() {
			let weight = n - rank;
			if pick < weight { return rank }
			pick -= weight;
		}
		n - 1
	}

	fn breed(&mut self, parent: &Individual, other: &Individual, config: &EvolutionConfig, rng: &mut impl Rng) -> Individual {
		let mut child = parent.clone();
		if rng.gen::<f32>() < config.recombination_probability {
			for (i, (a, b)) in zip(&other.rotations, &other.gradient).enumerate() {
				let weight: f32 = rng.gen();
				child.rotations[i] = child.rotations[i].slerp(*a, weight);
				child.gradient[i] = child.gradient[i].lerp(*b, weight);
			}
		}

		let extinction = 0.5 * (parent.extinction + other.extinction);
		let step = config.max_step * extinction.max(0.1);
		for rotation in child.rotations.iter_mut() {
			if rng.gen::<f32>() < config.mutation_probability {
				*rotation = *rotation * random_rotation(rng, step);
			}
		}

		if let Some(best) = &self.best {
			if rng.gen::<f32>() < config.adoption_probability {
				for (i, (rotation, gradient)) in zip(&best.rotations, &parent.gradient).enumerate() {
					let pull = rng.gen::<f32>() * (1.0 - extinction);
					let g = *gradient * rng.gen::<f32>();
					child.rotations[i] = child.rotations[i].slerp(*rotation, pull)
						* Quat::from_rotation_x(g.x)
						* Quat::from_rotation_y(g.y)
						* Quat::from_rotation_z(g.z);
				}
			}
		}

		for i in 0..child.rotations.len() {
			child.rotations[i] = self.structure.feasible(i, child.rotations[i]);
		}
		self.structure.evaluate(&mut child);
		child
	}

	fn sort_and_score(&mut self) {
		self.population.sort_by(|a, b| a.fitness.total_cmp(&b.fitness));
		let n = self.population.len();
		let (min, max) = match (self.population.first(), self.population.last()) {
			(Some(first), Some(last)) => (first.fitness, last.fitness),
			_ => return,
		};
		for (i, individual) in self.population.iter_mut().enumerate() {
			let rank = if n > 1 { i as f32 / (n - 1) as f32 } else { 0.0 };
			individual.extinction = match max > EPSILON {
				true => (individual.fitness + min * (rank - 1.0)) / max,
				false => 0.0,
			};
		}
	}

	fn remember_best(&mut self) {
		let candidate = match self.population.first() {
			Some(first) => first,
			None => return,
		};
		if self.best.as_ref().map_or(true, |best| candidate.fitness < best.fitness) {
			self.best = Some(candidate.clone());
		}
	}

	fn generation_step(&mut self, config: &EvolutionConfig, rng: &mut impl Rng) {
		let size = config.population_size;
		let elites = config.elitism_size.min(self.population.len());

		let mut next: Vec<Individual> = self.population.iter().take(elites).cloned().collect();
		for elite in next.iter_mut() {
			Self::exploit(&mut self.structure, elite, config.max_step, rng);
		}

		let mut pool: Vec<usize> = (0..self.population.len()).collect();
		while next.len() < size {
			if pool.len() < 2 {
				pool = (0..self.population.len()).collect();
			}
			let first = Self::select(&pool, rng);
			let mut second = Self::select(&pool, rng);
			if second == first {
				second = (first + 1) % pool.len();
			}
			let parent = self.population[pool[first]].clone();
			let other = self.population[pool[second]].clone();
			let child = self.breed(&parent, &other, config, rng);

			// parents leave the pool only once a child beats them
			for rank in [first.max(second), first.min(second)] {
				if child.fitness < self.population[pool[rank]].fitness {
					pool.remove(rank);
				}
			}
			next.push(child);
		}

		self.population = next;
		self.sort_and_score();
		self.remember_best();
	}

	fn wipe(&mut self, config: &EvolutionConfig, rng: &mut impl Rng) {
		self.wipes += 1;
		debug!("evolutionary wipe {} at generation {}", self.wipes, self.generation);
		let mut population = Vec::with_capacity(config.population_size);
		if let Some(best) = &self.best {
			population.push(best.clone());
		}
		while population.len() < config.population_size {
			let mut individual = self.structure.random_individual(rng);
			self.structure.evaluate(&mut individual);
			population.push(individual);
		}
		self.population = population;
		self.sort_and_score();
	}
}

impl Strategy for Evolutionary {
	fn reset(&mut self, skeleton: &Skeleton, ctx: &mut Context) {
		*self = Evolutionary::default();
		let ids = skeleton.subtree(ctx.root);
		if ids.is_empty() {
			warn!("evolutionary: unknown root joint {}", ctx.root);
			return
		}
		let pose = Pose::from_skeleton(skeleton, &ids);

		let effectors = ctx.targets.iter()
			.filter_map(|(id, target)| match pose.index_of(*id) {
				Some(index) => Some((index, target.position, target.orientation)),
				None => {
					warn!("evolutionary: effector {} is outside the subtree of {}", id, ctx.root);
					None
				},
			})
			.collect_vec();

		let config = &ctx.config.evolution;
		self.degenerate = effectors.is_empty() || pose.reach() < EPSILON;
		self.structure = Structure {
			initial: pose.rotations(),
			scale: pose.reach(),
			orientation_weight: config.orientation_weight,
			effectors,
			pose,
		};

		// nothing to score against; `best` stays empty so the error reads NaN
		if self.structure.effectors.is_empty() { return }

		let mut population = vec![Individual::new(self.structure.initial.clone())];
		while population.len() < config.population_size {
			population.push(self.structure.random_individual(&mut *ctx.rng));
		}
		for individual in population.iter_mut() {
			self.structure.evaluate(individual);
		}
		self.population = population;
		self.sort_and_score();
		self.remember_best();
	}

	fn iterate(&mut self, ctx: &mut Context) -> bool {
		if self.degenerate { return true }
		let config = &ctx.config.evolution;
		self.generation += 1;

		self.generation_step(config, &mut *ctx.rng);

		if config.wipe {
			match self.stagnation_search(config.max_step) {
				Some(improved) => {
					self.best = Some(improved.clone());
					if let Some(worst) = self.population.last_mut() {
						*worst = improved;
					}
					self.sort_and_score();
				},
				None => self.wipe(config, &mut *ctx.rng),
			}
		}

		self.error() <= ctx.config.error_threshold
	}

	fn update(&self, skeleton: &mut Skeleton) {
		if let Some(best) = &self.best {
			self.structure.pose.commit_rotations(skeleton, &best.rotations);
		}
	}

	fn error(&self) -> f32 {
		self.best.as_ref().map_or(f32::NAN, |best| best.fitness)
	}

	fn snapshot(&self) -> Vec<Vec3> {
		let mut pose = self.structure.pose.clone();
		if let Some(best) = &self.best {
			for (joint, rotation) in zip(&mut pose.joints, &best.rotations) {
				joint.rotation = *rotation;
			}
			pose.forward_kinematics();
		}
		pose.positions()
	}
}
