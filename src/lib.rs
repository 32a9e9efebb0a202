//! Inverse kinematics for joint hierarchies: FABRIK, cyclic coordinate
//! descent, an evolutionary solver for trees with several effectors, and a
//! small closed-loop solver, all driven through one [`Solver`].

pub mod chain;
pub mod closed_loop;
pub mod config;
pub mod constraint;
pub mod cyclic_coordinate_descent;
pub mod error;
pub mod evolutionary;
pub mod fabrik;
pub mod math;
pub mod solver;

pub use chain::{Axis, Joint, JointId, Pose, Skeleton};
pub use config::{ClosedLoopConfig, DebugConfig, EvolutionConfig, FabrikConfig, SolverConfig};
pub use constraint::{Cone, Constraint, Hinge, PolygonCone, PolygonMode, SwingLimits, TranslationLimit};
pub use error::{ConfigError, SkeletonError};
pub use solver::{Algorithm, History, Solver, SolverKind, SolverState, Target};

pub mod prelude {
	pub use crate::chain::{JointId, Skeleton};
	pub use crate::config::SolverConfig;
	pub use crate::constraint::{Cone, Constraint, Hinge, PolygonCone, PolygonMode, SwingLimits, TranslationLimit};
	pub use crate::math::rad;
	pub use crate::solver::{Solver, SolverKind, SolverState, Target};
}
