//! The single solve entry point shared by every algorithm.
//!
//! [`Solver`] owns the configuration and RNG, acquires an execution backend
//! for the duration of one solve and dispatches to the selected algorithm.
//! Every algorithm returns the best policy found so far together with a
//! [`Termination`] reason; running out of budget is never an error.

use std::time::Instant;

use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;

use crate::pomdp::belief::{Belief, BeliefSet};
use crate::pomdp::config::{Algorithm, ConfigError, SolveProgress, SolveStats, SolverConfig, Termination};
use crate::pomdp::model::ModelStore;
use crate::pomdp::policy::Policy;
use crate::pomdp::{hsvi2, pbvi, perseus};

/// Policy produced by a solve, with its statistics.
#[derive(Debug, Clone)]
pub struct SolveOutcome {
    /// The final value function.
    pub policy: Policy,
    /// What happened during the solve.
    pub stats: SolveStats,
}

impl SolveOutcome {
    /// `V(b0)` under the returned policy.
    pub fn initial_value(&self, model: &ModelStore) -> f64 {
        self.policy.value(model.initial_belief())
    }
}

/// Where data-parallel work runs.
///
/// A `Parallel` backend owns its thread pool, so the workers exist exactly as
/// long as the solve that acquired them.
pub(crate) enum Backend {
    Sequential,
    Parallel(rayon::ThreadPool),
}

impl Backend {
    /// `Some(0)` and `Some(1)` select the sequential path; `None` uses every
    /// core. A pool that fails to build degrades to sequential execution.
    pub(crate) fn acquire(num_threads: Option<usize>) -> Self {
        let threads = match num_threads {
            Some(0) | Some(1) => return Backend::Sequential,
            Some(threads) => threads,
            None => 0,
        };

        match rayon::ThreadPoolBuilder::new().num_threads(threads).build() {
            Ok(pool) => Backend::Parallel(pool),
            Err(err) => {
                log::warn!("thread pool unavailable ({}), running sequentially", err);
                Backend::Sequential
            }
        }
    }

    /// `items.iter().map(f)` on the backend, preserving order.
    pub(crate) fn map<T, U, F>(&self, items: &[T], f: F) -> Vec<U>
    where
        T: Sync,
        U: Send,
        F: Fn(&T) -> U + Sync + Send,
    {
        match self {
            Backend::Sequential => items.iter().map(f).collect(),
            Backend::Parallel(pool) => pool.install(|| items.par_iter().map(f).collect()),
        }
    }

    /// `(0..len).map(f)` on the backend, preserving order.
    pub(crate) fn map_indices<U, F>(&self, len: usize, f: F) -> Vec<U>
    where
        U: Send,
        F: Fn(usize) -> U + Sync + Send,
    {
        match self {
            Backend::Sequential => (0..len).map(f).collect(),
            Backend::Parallel(pool) => pool.install(|| (0..len).into_par_iter().map(f).collect()),
        }
    }

    pub(crate) fn is_parallel(&self) -> bool {
        matches!(self, Backend::Parallel(_))
    }
}

/// Wall-clock budget checked at the top of every solver loop.
pub(crate) struct Budget {
    start: Instant,
    limit_seconds: Option<f64>,
}

impl Budget {
    pub(crate) fn new(limit_seconds: Option<f64>) -> Self {
        Self {
            start: Instant::now(),
            limit_seconds,
        }
    }

    pub(crate) fn exhausted(&self) -> bool {
        self.limit_seconds
            .map_or(false, |limit| self.elapsed_seconds() >= limit)
    }

    pub(crate) fn elapsed_seconds(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

/// Everything an algorithm needs for one solve.
pub(crate) struct SolveContext<'a> {
    pub(crate) model: &'a ModelStore,
    pub(crate) config: &'a SolverConfig,
    pub(crate) backend: Backend,
    pub(crate) budget: Budget,
}

/// Runs the configured algorithm against a model.
///
/// # Example
/// ```
/// use pomdp_solver::domains::coin;
/// use pomdp_solver::pomdp::{BeliefSet, Solver, SolverConfig};
///
/// let model = coin::standard().unwrap();
/// let mut solver = Solver::new(&model, SolverConfig::hsvi2().with_threads(1)).unwrap();
/// let outcome = solver.solve(&BeliefSet::from_initial(&model));
/// assert!(outcome.stats.converged());
/// ```
pub struct Solver<'m> {
    model: &'m ModelStore,
    config: SolverConfig,
    rng: StdRng,
}

impl<'m> Solver<'m> {
    /// Create a solver, validating `config` up front.
    pub fn new(model: &'m ModelStore, config: SolverConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Ok(Self { model, config, rng })
    }

    /// The model being solved.
    pub fn model(&self) -> &ModelStore {
        self.model
    }

    /// The solver configuration.
    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    /// Solve over `beliefs`.
    pub fn solve(&mut self, beliefs: &BeliefSet) -> SolveOutcome {
        self.solve_with_callback(beliefs, |_| {})
    }

    /// Solve over `beliefs`, calling `callback` after every iteration (PBVI,
    /// Perseus) or trial (HSVI2).
    ///
    /// PBVI and Perseus back up exactly the points of `beliefs`; an empty set
    /// is replaced by the model's initial belief. HSVI2 generates its own
    /// points from the initial belief and ignores `beliefs`.
    pub fn solve_with_callback<F>(&mut self, beliefs: &BeliefSet, mut callback: F) -> SolveOutcome
    where
        F: FnMut(&SolveProgress),
    {
        let context = SolveContext {
            model: self.model,
            config: &self.config,
            backend: Backend::acquire(self.config.num_threads),
            budget: Budget::new(self.config.time_limit_seconds),
        };

        let fallback;
        let points: &[Belief] = if beliefs.is_empty() {
            fallback = [self.model.initial_belief().clone()];
            &fallback
        } else {
            beliefs.as_slice()
        };

        log::info!(
            "solving with {} (n={}, m={}, z={}, {} belief points, {})",
            self.config.algorithm,
            self.model.num_states(),
            self.model.num_actions(),
            self.model.num_observations(),
            points.len(),
            if context.backend.is_parallel() { "parallel" } else { "sequential" }
        );

        let mut outcome = match self.config.algorithm {
            Algorithm::Pbvi => pbvi::solve(&context, points, &mut callback),
            Algorithm::Perseus => perseus::solve(&context, points, &mut self.rng, &mut callback),
            Algorithm::Hsvi2 => hsvi2::solve(&context, &mut callback),
        };
        outcome.stats.elapsed_seconds = context.budget.elapsed_seconds();

        log::info!(
            "{} finished: {:?} after {} iterations, {} vectors, V(b0) = {:.5} in {:.3}s",
            self.config.algorithm,
            outcome.stats.termination,
            outcome.stats.iterations,
            outcome.policy.len(),
            outcome.initial_value(self.model),
            outcome.stats.elapsed_seconds
        );

        outcome
    }
}

/// One-shot `solve(model, beliefs, config)`.
///
/// # Arguments
/// * `model` - The model to solve
/// * `beliefs` - Points to back up (ignored by HSVI2; `{b0}` when empty)
/// * `config` - Algorithm and budgets, validated before solving
pub fn solve(model: &ModelStore, beliefs: &BeliefSet, config: SolverConfig) -> Result<SolveOutcome, ConfigError> {
    Ok(Solver::new(model, config)?.solve(beliefs))
}

/// Progress snapshot helper shared by the algorithms.
pub(crate) fn progress(iteration: usize, alpha_vectors: usize, residual: f64, budget: &Budget) -> SolveProgress {
    SolveProgress {
        iteration,
        alpha_vectors,
        residual,
        elapsed_seconds: budget.elapsed_seconds(),
    }
}

/// Termination for a loop that ran out of iterations or time.
pub(crate) fn budget_termination(budget: &Budget) -> Termination {
    if budget.exhausted() {
        Termination::TimeLimit
    } else {
        Termination::IterationLimit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::{coin, tiger};

    #[test]
    fn test_backend_preserves_order() {
        let items: Vec<usize> = (0..100).collect();
        for threads in [Some(1), Some(3)] {
            let backend = Backend::acquire(threads);
            assert_eq!(backend.map(&items, |&x| x * 2), (0..100).map(|x| x * 2).collect::<Vec<_>>());
            assert_eq!(backend.map_indices(5, |i| i + 1), vec![1, 2, 3, 4, 5]);
        }
        assert!(!Backend::acquire(Some(0)).is_parallel());
        assert!(Backend::acquire(Some(2)).is_parallel());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let model = tiger::standard().unwrap();
        let config = SolverConfig::pbvi().with_epsilon(-1.0);
        assert!(Solver::new(&model, config).is_err());
    }

    #[test]
    fn test_empty_belief_set_uses_initial_belief() {
        let model = coin::standard().unwrap();
        let config = SolverConfig::pbvi().with_threads(1).with_max_iterations(5);
        let outcome = solve(&model, &BeliefSet::new(), config).unwrap();

        assert!(!outcome.policy.is_empty());
        assert_eq!(outcome.stats.belief_points, 1);
        assert_eq!(outcome.stats.algorithm, Some(Algorithm::Pbvi));
    }

    #[test]
    fn test_time_limit_is_not_an_error() {
        let model = tiger::standard().unwrap();
        let config = SolverConfig::pbvi()
            .with_threads(1)
            .with_max_iterations(usize::MAX)
            .with_time_limit(1e-9);
        let outcome = solve(&model, &BeliefSet::from_initial(&model), config).unwrap();

        assert_eq!(outcome.stats.termination, Termination::TimeLimit);
        assert!(!outcome.policy.is_empty());
    }
}
