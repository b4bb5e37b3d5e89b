//! Value iteration on the fully observable MDP underlying a model.
//!
//! Observations are ignored. Started from `R_max / (1 - γ)` every iterate is
//! an upper bound on the POMDP value at the corresponding corner of the
//! simplex, which is what HSVI2 seeds its upper bound with.

use serde::{Deserialize, Serialize};

use crate::pomdp::config::ConfigError;
use crate::pomdp::model::ModelStore;
use crate::pomdp::solver::Backend;

/// Configuration for [`value_iteration`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValueIterationConfig {
    /// Stop once the largest per-state change is below this.
    pub epsilon: f64,

    /// Maximum number of sweeps.
    pub max_iterations: usize,

    /// Starting value for every state. `None` uses `R_max / (1 - γ)`.
    pub initial_value: Option<f64>,

    /// Number of worker threads (0 or 1 = sequential, `None` = all cores).
    pub num_threads: Option<usize>,
}

impl Default for ValueIterationConfig {
    fn default() -> Self {
        Self {
            epsilon: 1e-6,
            max_iterations: 10_000,
            initial_value: None,
            num_threads: None,
        }
    }
}

impl ValueIterationConfig {
    /// Builder method: set the convergence threshold.
    pub fn with_epsilon(mut self, epsilon: f64) -> Self {
        self.epsilon = epsilon;
        self
    }

    /// Builder method: set the sweep cap.
    pub fn with_max_iterations(mut self, iterations: usize) -> Self {
        self.max_iterations = iterations;
        self
    }

    /// Builder method: set the starting value.
    pub fn with_initial_value(mut self, value: f64) -> Self {
        self.initial_value = Some(value);
        self
    }

    /// Builder method: set number of threads.
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.num_threads = Some(threads);
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
        if let Some(value) = self.initial_value {
            if !value.is_finite() {
                return Err(ConfigError::InvalidParameter("initial_value", value));
            }
        }
        Ok(())
    }
}

/// Result of [`value_iteration`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MdpSolution {
    /// `V(s)` for every state.
    pub values: Vec<f64>,
    /// Greedy action per state (lowest index on ties).
    pub actions: Vec<usize>,
    /// Sweeps performed.
    pub iterations: usize,
    /// Largest change in the last sweep.
    pub residual: f64,
    /// Whether the residual fell below epsilon.
    pub converged: bool,
}

/// Solve the underlying MDP of `model`.
pub fn value_iteration(model: &ModelStore, config: &ValueIterationConfig) -> Result<MdpSolution, ConfigError> {
    config.validate()?;
    let backend = Backend::acquire(config.num_threads);
    Ok(run(model, config, &backend))
}

pub(crate) fn run(model: &ModelStore, config: &ValueIterationConfig, backend: &Backend) -> MdpSolution {
    let start = config
        .initial_value
        .unwrap_or_else(|| model.max_reward() / (1.0 - model.gamma()));

    let mut values = vec![start; model.num_states()];
    let mut actions = vec![0; model.num_states()];
    let mut iterations = 0;
    let mut residual = f64::INFINITY;

    while iterations < config.max_iterations {
        let current = &values;
        let sweep: Vec<(f64, usize)> = backend.map_indices(model.num_states(), |s| greedy(model, current, s));

        residual = sweep
            .iter()
            .zip(values.iter())
            .map(|(&(new, _), old)| (new - old).abs())
            .fold(0.0, f64::max);

        let (next, greedy_actions): (Vec<f64>, Vec<usize>) = sweep.into_iter().unzip();
        values = next;
        actions = greedy_actions;
        iterations += 1;

        if residual < config.epsilon {
            break;
        }
    }

    log::debug!(
        "mdp value iteration: {} sweeps, residual {:.3e}",
        iterations,
        residual
    );

    MdpSolution {
        values,
        actions,
        iterations,
        residual,
        converged: residual < config.epsilon,
    }
}

/// `Q(s, a) = R(s, a) + γ Σ_{s'} T(s, a, s') V(s')`.
pub fn q_value(model: &ModelStore, values: &[f64], state: usize, action: usize) -> f64 {
    let future: f64 = model
        .successors(state, action)
        .map(|(_, next, t)| t * values[next])
        .sum();
    model.reward(state, action) + model.gamma() * future
}

fn greedy(model: &ModelStore, values: &[f64], state: usize) -> (f64, usize) {
    let mut best = (q_value(model, values, state, 0), 0);
    for action in 1..model.num_actions() {
        let q = q_value(model, values, state, action);
        if q > best.0 {
            best = (q, action);
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::{coin, tiger};
    use float_eq::assert_float_eq;

    #[test]
    fn test_coin_values() {
        let model = coin::standard().unwrap();
        let config = ValueIterationConfig::default().with_threads(1).with_epsilon(1e-9);
        let solution = value_iteration(&model, &config).unwrap();

        // Fully observed, every guess is right: 1 / (1 - γ).
        assert!(solution.converged);
        for &v in &solution.values {
            assert_float_eq!(v, 1.0 / (1.0 - model.gamma()), abs <= 1e-6);
        }
        assert_eq!(solution.actions, vec![coin::GUESS_HEADS, coin::GUESS_TAILS]);
    }

    #[test]
    fn test_iterates_from_above_stay_above() {
        let model = tiger::standard().unwrap();
        let exact = value_iteration(&model, &ValueIterationConfig::default().with_epsilon(1e-10)).unwrap();

        let truncated = value_iteration(
            &model,
            &ValueIterationConfig::default()
                .with_threads(1)
                .with_initial_value(1_000.0)
                .with_max_iterations(5),
        )
        .unwrap();

        assert_eq!(truncated.iterations, 5);
        assert!(!truncated.converged);
        for (upper, v) in truncated.values.iter().zip(&exact.values) {
            assert!(upper >= v);
        }
        // Knowing the state, the tiger is worth 10 / (1 - γ) from either side.
        assert_float_eq!(exact.values[0], 200.0, abs <= 1e-6);
    }

    #[test]
    fn test_invalid_config() {
        let model = coin::standard().unwrap();
        let config = ValueIterationConfig::default().with_epsilon(0.0);
        assert!(value_iteration(&model, &config).is_err());
    }
}
