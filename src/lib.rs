//! # POMDP Solver
//!
//! Point-based approximate value iteration for partially observable Markov
//! decision processes.
//!
//! ## Features
//!
//! - **Sparse Models**: Bounded-width successor lists and per-transition observation tables
//! - **Three Solvers**: PBVI, Perseus and HSVI2 sharing one Bellman backup
//! - **Parallel Backups**: Per-belief backups and rollouts run on a rayon pool
//! - **Provable Bounds**: HSVI2 reports a lower and an upper bound at the initial belief
//! - **Policy Evaluation**: Monte-Carlo average discounted return (ADR)
//!
//! ## Quick Start
//!
//! ```
//! use pomdp_solver::domains::tiger;
//! use pomdp_solver::pomdp::{solve, BeliefSet, ExpansionMethod, SolverConfig};
//! use rand::rngs::StdRng;
//! use rand::SeedableRng;
//!
//! // 1. Build or load a model
//! let model = tiger::standard().unwrap();
//!
//! // 2. Collect belief points
//! let mut rng = StdRng::seed_from_u64(0);
//! let mut beliefs = BeliefSet::from_initial(&model);
//! beliefs.expand(&model, ExpansionMethod::RandomUnique, 16, 1_000, &mut rng);
//!
//! // 3. Solve
//! let outcome = solve(&model, &beliefs, SolverConfig::pbvi().with_threads(1)).unwrap();
//!
//! // 4. Act
//! let action = outcome.policy.action(model.initial_belief());
//! assert_eq!(action, tiger::LISTEN);
//! ```
//!
//! ## Modules
//!
//! - [`pomdp`]: Models, beliefs, the backup operator, solvers and evaluation
//! - [`domains`]: Built-in problems (tiger, coin)
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    Solver (algorithm dispatch)                  │
//! │  - PBVI                   - Perseus                             │
//! │  - HSVI2 (bound pair)     - stats / callbacks                   │
//! └─────────────────────────────────────────────────────────────────┘
//!                               │
//!                               │ shared backup(b, Γ)
//!                               ▼
//!         ┌─────────────────────┼─────────────────────┐
//!         │                     │                     │
//!         ▼                     ▼                     ▼
//!    ┌─────────┐         ┌───────────┐         ┌───────────┐
//!    │  Model  │         │  Belief   │         │  Policy   │
//!    │  Store  │         │   Set     │         │ Evaluator │
//!    └─────────┘         └───────────┘         └───────────┘
//! ```

#![warn(missing_docs)]

/// POMDP solving engine.
///
/// This is the core module containing the model, the backup operator and
/// the solvers.
pub mod pomdp;

/// Built-in problems.
///
/// Contains the tiger and coin problems for testing and benchmarking.
pub mod domains;

// Re-export commonly used types at crate root for convenience
pub use pomdp::{
    AlphaVector, Belief, BeliefSet, ModelBuilder, ModelError, ModelStore, Policy, SolveOutcome, Solver, SolverConfig,
};
