//! Configuration options for the point-based solvers and the evaluator.
//!
//! This module provides configuration structs that control which algorithm
//! runs, when it stops, and how much parallelism it may use.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The closed set of solving strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Algorithm {
    /// Point-based value iteration over a fixed belief set.
    Pbvi,
    /// Randomised point-based value iteration over a fixed belief set.
    Perseus,
    /// Heuristic search value iteration with upper and lower bounds.
    Hsvi2,
}

impl Algorithm {
    /// All algorithms, in a stable order.
    pub const ALL: [Algorithm; 3] = [Algorithm::Pbvi, Algorithm::Perseus, Algorithm::Hsvi2];

    /// Short lowercase name.
    pub fn name(&self) -> &'static str {
        match self {
            Algorithm::Pbvi => "pbvi",
            Algorithm::Perseus => "perseus",
            Algorithm::Hsvi2 => "hsvi2",
        }
    }

    /// Whether the algorithm backs up a caller-supplied belief set.
    pub fn uses_belief_set(&self) -> bool {
        !matches!(self, Algorithm::Hsvi2)
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Algorithm {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pbvi" => Ok(Algorithm::Pbvi),
            "perseus" => Ok(Algorithm::Perseus),
            "hsvi2" | "hsvi" => Ok(Algorithm::Hsvi2),
            _ => Err(ConfigError::UnknownAlgorithm(s.to_string())),
        }
    }
}

/// HSVI2-specific parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hsvi2Params {
    /// Maximum number of root-to-leaf trials.
    pub trials: usize,

    /// A trial stops descending once the best observation branch's
    /// probability-weighted gap is at most `delta`.
    pub delta: f64,

    /// Relative growth of either bound since the last prune that triggers a
    /// prune pass (0.1 = 10%).
    pub prune_growth_threshold: f64,

    /// Hard cap on lower-bound vectors.
    ///
    /// `None` uses `max(n, m) + trials * horizon + 1`.
    pub max_alpha_vectors: Option<usize>,
}

impl Default for Hsvi2Params {
    fn default() -> Self {
        Self {
            trials: 1000,
            delta: 1e-4,
            prune_growth_threshold: 0.1,
            max_alpha_vectors: None,
        }
    }
}

/// Configuration for a solve.
///
/// # Example
/// ```
/// use pomdp_solver::pomdp::{Algorithm, SolverConfig};
///
/// let config = SolverConfig::perseus().with_epsilon(1e-3).with_seed(7);
/// assert_eq!(config.algorithm, Algorithm::Perseus);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolverConfig {
    /// Which strategy to run.
    pub algorithm: Algorithm,

    /// Convergence threshold: Bellman residual for PBVI/Perseus, root gap for
    /// HSVI2.
    pub epsilon: f64,

    /// Iteration cap for PBVI and Perseus.
    pub max_iterations: usize,

    /// Wall-clock budget in seconds. `None` means no limit.
    pub time_limit_seconds: Option<f64>,

    /// Number of worker threads for backups.
    ///
    /// Set to 0 or 1 for single-threaded execution.
    /// Set to `None` to use all available cores.
    pub num_threads: Option<usize>,

    /// Random seed for reproducibility (Perseus point selection).
    pub seed: Option<u64>,

    /// HSVI2 parameters (ignored by the other algorithms).
    pub hsvi2: Hsvi2Params,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::Pbvi,
            epsilon: 0.01,
            max_iterations: 1000,
            time_limit_seconds: None,
            num_threads: None,
            seed: None,
            hsvi2: Hsvi2Params::default(),
        }
    }
}

impl SolverConfig {
    /// Create a new SolverConfig with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// PBVI with default settings.
    pub fn pbvi() -> Self {
        Self::default()
    }

    /// Perseus with default settings.
    pub fn perseus() -> Self {
        Self {
            algorithm: Algorithm::Perseus,
            ..Default::default()
        }
    }

    /// HSVI2 with the settings used by the benchmark suite.
    pub fn hsvi2() -> Self {
        Self {
            algorithm: Algorithm::Hsvi2,
            epsilon: 1e-3,
            ..Default::default()
        }
    }

    /// Default settings for `algorithm`.
    pub fn for_algorithm(algorithm: Algorithm) -> Self {
        match algorithm {
            Algorithm::Pbvi => Self::pbvi(),
            Algorithm::Perseus => Self::perseus(),
            Algorithm::Hsvi2 => Self::hsvi2(),
        }
    }

    /// Builder method: set the convergence threshold.
    pub fn with_epsilon(mut self, epsilon: f64) -> Self {
        self.epsilon = epsilon;
        self
    }

    /// Builder method: set the PBVI/Perseus iteration cap.
    pub fn with_max_iterations(mut self, iterations: usize) -> Self {
        self.max_iterations = iterations;
        self
    }

    /// Builder method: set the wall-clock budget.
    pub fn with_time_limit(mut self, seconds: f64) -> Self {
        self.time_limit_seconds = Some(seconds);
        self
    }

    /// Builder method: set number of threads.
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.num_threads = Some(threads);
        self
    }

    /// Builder method: set random seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Builder method: set the HSVI2 parameters.
    pub fn with_hsvi2(mut self, params: Hsvi2Params) -> Self {
        self.hsvi2 = params;
        self
    }

    /// Validate the configuration and return any errors.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.epsilon.is_finite() && self.epsilon > 0.0) {
            return Err(ConfigError::InvalidEpsilon(self.epsilon));
        }
        if self.max_iterations == 0 {
            return Err(ConfigError::ZeroBudget("max_iterations"));
        }
        if let Some(seconds) = self.time_limit_seconds {
            if !(seconds > 0.0) {
                return Err(ConfigError::InvalidTimeLimit(seconds));
            }
        }

        let hsvi2 = &self.hsvi2;
        if hsvi2.trials == 0 {
            return Err(ConfigError::ZeroBudget("trials"));
        }
        if !(hsvi2.delta.is_finite() && hsvi2.delta >= 0.0) {
            return Err(ConfigError::InvalidParameter("delta", hsvi2.delta));
        }
        if !(hsvi2.prune_growth_threshold.is_finite() && hsvi2.prune_growth_threshold >= 0.0) {
            return Err(ConfigError::InvalidParameter(
                "prune_growth_threshold",
                hsvi2.prune_growth_threshold,
            ));
        }
        if hsvi2.max_alpha_vectors == Some(0) {
            return Err(ConfigError::ZeroBudget("max_alpha_vectors"));
        }

        Ok(())
    }
}

/// Configuration for Monte-Carlo policy evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluatorConfig {
    /// Number of independent rollouts.
    pub trials: usize,

    /// Rollout length; `None` uses the model's horizon.
    pub horizon: Option<usize>,

    /// How many times a zero-probability observation is resampled before the
    /// rollout ends.
    pub max_observation_retries: usize,

    /// Wall-clock budget in seconds; rollouts not yet started are skipped.
    pub time_limit_seconds: Option<f64>,

    /// Number of worker threads (0 or 1 = sequential, `None` = all cores).
    pub num_threads: Option<usize>,

    /// Random seed. Rollout `i` uses `seed + i`, so results do not depend on
    /// the thread count.
    pub seed: Option<u64>,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            trials: 100,
            horizon: None,
            max_observation_retries: 10,
            time_limit_seconds: None,
            num_threads: None,
            seed: None,
        }
    }
}

impl EvaluatorConfig {
    /// Builder method: set the number of rollouts.
    pub fn with_trials(mut self, trials: usize) -> Self {
        self.trials = trials;
        self
    }

    /// Builder method: set the rollout length.
    pub fn with_horizon(mut self, horizon: usize) -> Self {
        self.horizon = Some(horizon);
        self
    }

    /// Builder method: set the wall-clock budget.
    pub fn with_time_limit(mut self, seconds: f64) -> Self {
        self.time_limit_seconds = Some(seconds);
        self
    }

    /// Builder method: set number of threads.
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.num_threads = Some(threads);
        self
    }

    /// Builder method: set random seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Validate the configuration and return any errors.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.trials == 0 {
            return Err(ConfigError::ZeroBudget("trials"));
        }
        if self.horizon == Some(0) {
            return Err(ConfigError::ZeroBudget("horizon"));
        }
        if let Some(seconds) = self.time_limit_seconds {
            if !(seconds > 0.0) {
                return Err(ConfigError::InvalidTimeLimit(seconds));
            }
        }
        Ok(())
    }
}

/// Errors that can occur when validating configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    /// Convergence threshold must be positive and finite.
    #[error("epsilon {0} must be positive and finite")]
    InvalidEpsilon(f64),

    /// A count budget was zero.
    #[error("{0} must be at least 1")]
    ZeroBudget(&'static str),

    /// Time limit must be positive.
    #[error("time limit {0}s must be positive")]
    InvalidTimeLimit(f64),

    /// A non-negative parameter was negative or not finite.
    #[error("{0} {1} must be non-negative and finite")]
    InvalidParameter(&'static str, f64),

    /// Unrecognised algorithm name.
    #[error("unknown algorithm `{0}` (expected pbvi, perseus or hsvi2)")]
    UnknownAlgorithm(String),
}

/// Why a solve stopped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// Residual or root gap fell below epsilon.
    Converged,
    /// Iteration or trial cap reached.
    #[default]
    IterationLimit,
    /// Wall-clock budget exhausted.
    TimeLimit,
    /// HSVI2 lower bound reached `max_alpha_vectors`.
    VectorLimit,
}

/// Statistics tracked during a solve.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SolveStats {
    /// Which algorithm produced these stats.
    pub algorithm: Option<Algorithm>,

    /// Iterations (PBVI/Perseus) or trials (HSVI2) completed.
    pub iterations: usize,

    /// Belief points backed up per iteration (PBVI/Perseus) or interior
    /// upper-bound points at the end (HSVI2).
    pub belief_points: usize,

    /// Widest support among the points counted in `belief_points` (HSVI2
    /// also counts the initial belief).
    #[serde(default)]
    pub belief_support: usize,

    /// Total backups performed.
    pub backups: usize,

    /// Vectors in the returned policy.
    pub alpha_vectors: usize,

    /// Total time spent solving (in seconds).
    pub elapsed_seconds: f64,

    /// Last Bellman residual (PBVI/Perseus).
    pub residual: Option<f64>,

    /// Lower bound at the initial belief (HSVI2).
    pub lower_bound: Option<f64>,

    /// Upper bound at the initial belief (HSVI2).
    pub upper_bound: Option<f64>,

    /// Why the solve stopped.
    pub termination: Termination,
}

impl SolveStats {
    /// Create new empty stats.
    pub fn new(algorithm: Algorithm) -> Self {
        Self {
            algorithm: Some(algorithm),
            ..Default::default()
        }
    }

    /// Whether the solve reached its convergence criterion.
    pub fn converged(&self) -> bool {
        self.termination == Termination::Converged
    }

    /// `upper - lower` at the initial belief, when both bounds are tracked.
    pub fn gap(&self) -> Option<f64> {
        match (self.lower_bound, self.upper_bound) {
            (Some(lower), Some(upper)) => Some(upper - lower),
            _ => None,
        }
    }
}

/// Progress reported to solve callbacks after each iteration or trial.
#[derive(Debug, Clone)]
pub struct SolveProgress {
    /// Iterations or trials completed so far.
    pub iteration: usize,
    /// Current number of (lower-bound) vectors.
    pub alpha_vectors: usize,
    /// Bellman residual (PBVI/Perseus) or root gap (HSVI2).
    pub residual: f64,
    /// Elapsed time in seconds.
    pub elapsed_seconds: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_validate() {
        for algorithm in Algorithm::ALL {
            let config = SolverConfig::for_algorithm(algorithm);
            assert_eq!(config.algorithm, algorithm);
            assert!(config.validate().is_ok());
        }
        assert!(EvaluatorConfig::default().validate().is_ok());
    }

    #[test]
    fn test_invalid_configs() {
        assert_eq!(
            SolverConfig::default().with_epsilon(0.0).validate(),
            Err(ConfigError::InvalidEpsilon(0.0))
        );
        assert_eq!(
            SolverConfig::default().with_max_iterations(0).validate(),
            Err(ConfigError::ZeroBudget("max_iterations"))
        );
        assert_eq!(
            SolverConfig::default().with_time_limit(-1.0).validate(),
            Err(ConfigError::InvalidTimeLimit(-1.0))
        );

        let params = Hsvi2Params {
            delta: -1.0,
            ..Default::default()
        };
        assert!(SolverConfig::hsvi2().with_hsvi2(params).validate().is_err());
        assert!(EvaluatorConfig::default().with_trials(0).validate().is_err());
    }

    #[test]
    fn test_algorithm_parsing() {
        assert_eq!("PBVI".parse::<Algorithm>(), Ok(Algorithm::Pbvi));
        assert_eq!("hsvi".parse::<Algorithm>(), Ok(Algorithm::Hsvi2));
        assert!("sarsop".parse::<Algorithm>().is_err());
        assert_eq!(Algorithm::Perseus.to_string(), "perseus");
    }

    #[test]
    fn test_config_serde() {
        let config = SolverConfig::hsvi2().with_seed(3);
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"hsvi2\""));
        let back: SolverConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.algorithm, Algorithm::Hsvi2);
        assert_eq!(back.seed, Some(3));
    }
}
