//! Solver tunables. Every table is optional in TOML; missing fields take
//! the defaults below.

use std::f32::consts::{FRAC_PI_4, PI};
use serde::{Deserialize, Serialize};
use crate::error::ConfigError;


#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
	/// Iteration budget per target; reaching it stops further work.
	pub max_iterations: usize,
	/// End-effector distance below which a solve counts as converged.
	pub error_threshold: f32,
	/// Per-iteration change below which an iteration counts as stalled.
	pub min_change_threshold: f32,
	/// Algorithm iterations per `solve()` call, fractional values accumulate.
	pub times_per_frame: f32,
	pub seed: u64,
	pub fabrik: FabrikConfig,
	pub evolution: EvolutionConfig,
	pub closed_loop: ClosedLoopConfig,
	pub debug: DebugConfig,
}

impl Default for SolverConfig {
	fn default() -> Self {
		SolverConfig {
			max_iterations: 100,
			error_threshold: 0.01,
			min_change_threshold: 1e-4,
			times_per_frame: 1.0,
			seed: 0,
			fabrik: FabrikConfig::default(),
			evolution: EvolutionConfig::default(),
			closed_loop: ClosedLoopConfig::default(),
			debug: DebugConfig::default(),
		}
	}
}

/// FABRIK exploration and twist correction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FabrikConfig {
	pub deadlock_avoidance: bool,
	/// Random perturbations tried per exploration.
	pub exploration_trials: usize,
	/// How many of those favour the least-changed joints.
	pub biased_trials: usize,
	/// Largest rotation (radians) of a rank-scaled perturbation.
	pub small_angle: f32,
	/// Largest rotation (radians) of a single-joint perturbation.
	pub large_angle: f32,
	/// Explorations allowed per target before a stall ends the solve.
	pub max_explorations: usize,
	pub fix_twisting: bool,
	pub keep_direction: bool,
	/// Iterations between twist corrections.
	pub twist_interval: usize,
}

impl Default for FabrikConfig {
	fn default() -> Self {
		FabrikConfig {
			deadlock_avoidance: true,
			exploration_trials: 20,
			biased_trials: 10,
			small_angle: 0.3,
			large_angle: PI,
			max_explorations: 10,
			fix_twisting: false,
			keep_direction: false,
			twist_interval: 4,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvolutionConfig {
	pub population_size: usize,
	/// Individuals carried over and locally exploited each generation.
	pub elitism_size: usize,
	pub recombination_probability: f32,
	pub mutation_probability: f32,
	pub adoption_probability: f32,
	/// Largest per-axis step (radians) of exploitation and mutation.
	pub max_step: f32,
	/// Reinitialise the population when the best individual stagnates.
	pub wipe: bool,
	/// Fitness weight of orientation error, per radian.
	pub orientation_weight: f32,
}

impl Default for EvolutionConfig {
	fn default() -> Self {
		EvolutionConfig {
			population_size: 24,
			elitism_size: 3,
			recombination_probability: 0.9,
			mutation_probability: 0.5,
			adoption_probability: 0.5,
			max_step: FRAC_PI_4,
			wipe: true,
			orientation_weight: 0.1,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClosedLoopConfig {
	/// Initial position noise, as a fraction of the loop's reach.
	pub noise: f32,
	/// Noise multiplier applied after every iteration.
	pub noise_decay: f32,
	pub relaxation_passes: usize,
	/// Length of the link closing the loop; captured at reset when unset.
	pub closure_length: Option<f32>,
}

impl Default for ClosedLoopConfig {
	fn default() -> Self {
		ClosedLoopConfig {
			noise: 0.05,
			noise_decay: 0.8,
			relaxation_passes: 8,
			closure_length: None,
		}
	}
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
	/// Trace the error after every iteration.
	pub log_iterations: bool,
	/// Keep per-iteration joint positions in the solver history.
	pub record_history: bool,
}

impl SolverConfig {
	pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
		let config: SolverConfig = toml::from_str(source)?;
		config.validate()?;
		Ok(config)
	}

	pub fn validate(&self) -> Result<(), ConfigError> {
		if !(self.times_per_frame >= 0.0) {
			return Err(ConfigError::invalid("times_per_frame", format!("{} (must be >= 0)", self.times_per_frame)))
		}
		if !(self.error_threshold >= 0.0) {
			return Err(ConfigError::invalid("error_threshold", format!("{} (must be >= 0)", self.error_threshold)))
		}
		if !(self.min_change_threshold >= 0.0) {
			return Err(ConfigError::invalid("min_change_threshold", format!("{} (must be >= 0)", self.min_change_threshold)))
		}

		let fabrik = &self.fabrik;
		if fabrik.biased_trials > fabrik.exploration_trials {
			return Err(ConfigError::invalid("fabrik.biased_trials", "must not exceed exploration_trials"))
		}
		if fabrik.twist_interval == 0 {
			return Err(ConfigError::invalid("fabrik.twist_interval", "must be > 0"))
		}
		for (field, angle) in [
			("fabrik.small_angle", fabrik.small_angle),
			("fabrik.large_angle", fabrik.large_angle),
			("evolution.max_step", self.evolution.max_step),
			("evolution.orientation_weight", self.evolution.orientation_weight),
			("closed_loop.noise", self.closed_loop.noise),
		] {
			if !angle.is_finite() || angle < 0.0 {
				return Err(ConfigError::invalid(field, format!("{} (must be finite and >= 0)", angle)))
			}
		}

		let evolution = &self.evolution;
		if evolution.population_size < 2 {
			return Err(ConfigError::invalid("evolution.population_size", format!("{} (must be >= 2)", evolution.population_size)))
		}
		if evolution.elitism_size >= evolution.population_size {
			return Err(ConfigError::invalid("evolution.elitism_size", "must be smaller than population_size"))
		}
		for (field, p) in [
			("evolution.recombination_probability", evolution.recombination_probability),
			("evolution.mutation_probability", evolution.mutation_probability),
			("evolution.adoption_probability", evolution.adoption_probability),
		] {
			if !(0.0..=1.0).contains(&p) {
				return Err(ConfigError::invalid(field, format!("{} (must be within [0, 1])", p)))
			}
		}

		let closed_loop = &self.closed_loop;
		if !(0.0..=1.0).contains(&closed_loop.noise_decay) {
			return Err(ConfigError::invalid("closed_loop.noise_decay", "must be within [0, 1]"))
		}
		if closed_loop.closure_length.map_or(false, |length| length < 0.0) {
			return Err(ConfigError::invalid("closed_loop.closure_length", "must be >= 0"))
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn defaults_are_valid() {
		assert!(SolverConfig::default().validate().is_ok());
	}

	#[test]
	fn partial_toml_keeps_defaults() {
		let config = SolverConfig::from_toml_str(
			r#"
			max_iterations = 50
			times_per_frame = 0.5

			[fabrik]
			fix_twisting = true

			[evolution]
			population_size = 8
			elitism_size = 2
			"#,
		).unwrap();

		assert_eq!(config.max_iterations, 50);
		assert_eq!(config.times_per_frame, 0.5);
		assert!(config.fabrik.fix_twisting);
		assert_eq!(config.fabrik.exploration_trials, 20);
		assert_eq!(config.evolution.population_size, 8);
		assert_eq!(config.error_threshold, 0.01);
	}

	#[test]
	fn negative_times_per_frame_is_rejected() {
		let config = SolverConfig { times_per_frame: -1.0, ..SolverConfig::default() };
		let err = config.validate().unwrap_err();
		assert!(err.to_string().contains("times_per_frame"));
	}

	#[test]
	fn elitism_must_leave_room_for_offspring() {
		let mut config = SolverConfig::default();
		config.evolution.elitism_size = config.evolution.population_size;
		assert!(matches!(config.validate(), Err(ConfigError::InvalidValue { field: "evolution.elitism_size", .. })));
	}

	#[test]
	fn probabilities_are_bounded() {
		let mut config = SolverConfig::default();
		config.evolution.mutation_probability = 1.5;
		assert!(config.validate().is_err());
	}

	#[test]
	fn negative_or_nan_angles_are_rejected() {
		let err = SolverConfig::from_toml_str("[fabrik]\nlarge_angle = -1.0").unwrap_err();
		assert!(matches!(err, ConfigError::InvalidValue { field: "fabrik.large_angle", .. }));

		let err = SolverConfig::from_toml_str("[fabrik]\nsmall_angle = nan").unwrap_err();
		assert!(matches!(err, ConfigError::InvalidValue { field: "fabrik.small_angle", .. }));

		let err = SolverConfig::from_toml_str("[evolution]\nmax_step = inf").unwrap_err();
		assert!(matches!(err, ConfigError::InvalidValue { field: "evolution.max_step", .. }));

		let mut config = SolverConfig::default();
		config.closed_loop.noise = -0.1;
		assert!(config.validate().is_err());
	}

	#[test]
	fn bad_toml_is_a_parse_error() {
		assert!(matches!(SolverConfig::from_toml_str("max_iterations = \"many\""), Err(ConfigError::Toml(_))));
	}
}
