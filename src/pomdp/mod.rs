//! Point-based approximate value iteration for POMDPs.
//!
//! This module provides the model, belief and value-function types and the
//! three solvers built on the shared Bellman backup.
//!
//! # Overview
//!
//! Data flows through the engine in one direction:
//!
//! ```text
//! ModelStore -> BeliefSet -> backup -> Solver (PBVI | Perseus | HSVI2) -> Policy -> Evaluator
//! ```
//!
//! - [`ModelStore`] is immutable once built and shared read-only by every
//!   worker thread.
//! - [`BeliefSet`] is grown by forward simulation before a PBVI or Perseus
//!   solve; HSVI2 generates its own points.
//! - [`Policy`] is a set of action-tagged alpha vectors and the output of
//!   every solver.
//!
//! # Example
//!
//! ```
//! use pomdp_solver::domains::tiger;
//! use pomdp_solver::pomdp::{BeliefSet, Evaluator, EvaluatorConfig, ExpansionMethod, Solver, SolverConfig};
//! use rand::rngs::StdRng;
//! use rand::SeedableRng;
//!
//! let model = tiger::standard().unwrap();
//!
//! let mut rng = StdRng::seed_from_u64(1);
//! let mut beliefs = BeliefSet::from_initial(&model);
//! beliefs.expand(&model, ExpansionMethod::RandomUnique, 16, 1_000, &mut rng);
//!
//! let config = SolverConfig::perseus().with_seed(1).with_threads(1);
//! let outcome = Solver::new(&model, config).unwrap().solve(&beliefs);
//!
//! let evaluator = Evaluator::new(EvaluatorConfig::default().with_trials(10).with_seed(1)).unwrap();
//! let adr = evaluator.compute_adr(&model, &outcome.policy, model.initial_belief());
//! println!("V(b0) = {:.3}, ADR = {:.3}", outcome.initial_value(&model), adr.mean);
//! ```
//!
//! # References
//!
//! - Pineau, J., Gordon, G., Thrun, S. "Point-based value iteration: An anytime algorithm for POMDPs" (2003)
//! - Spaan, M., Vlassis, N. "Perseus: Randomized Point-based Value Iteration for POMDPs" (2005)
//! - Smith, T., Simmons, R. "Point-Based POMDP Algorithms: Improved Analysis and Implementation" (2005)

pub mod backup;
pub mod belief;
pub mod config;
pub mod evaluate;
pub mod hsvi2;
pub mod mdp;
pub mod model;
mod pbvi;
mod perseus;
pub mod policy;
pub mod solver;

pub use backup::{backup, BackupResult};
pub use belief::{Belief, BeliefSet, ExpansionMethod, ExpansionReport};
pub use config::{
    Algorithm, ConfigError, EvaluatorConfig, Hsvi2Params, SolveProgress, SolveStats, SolverConfig, Termination,
};
pub use evaluate::{compute_adr, AdrEstimate, EvaluationReport, Evaluator};
pub use hsvi2::{BoundPair, UpperBound};
pub use mdp::{value_iteration, MdpSolution, ValueIterationConfig};
pub use model::{ModelBuilder, ModelError, ModelStore, RawModel};
pub use policy::{AlphaVector, Policy, PolicyError};
pub use solver::{solve, SolveOutcome, Solver};
