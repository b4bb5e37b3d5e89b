//! Monte-Carlo evaluation of a policy and the one-line experiment report.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::pomdp::belief::{Belief, BeliefSet};
use crate::pomdp::config::{ConfigError, EvaluatorConfig};
use crate::pomdp::model::ModelStore;
use crate::pomdp::policy::Policy;
use crate::pomdp::solver::{Backend, Budget, SolveOutcome};

/// Rollouts launched between two time-limit checks.
const BATCH_SIZE: usize = 64;

/// Average discounted return estimate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdrEstimate {
    /// Mean discounted return over the completed rollouts.
    pub mean: f64,
    /// Rollouts completed.
    pub trials: usize,
    /// Standard error of the mean (zero for a single rollout).
    pub standard_error: f64,
}

/// Runs independent rollouts of a policy from a start belief.
#[derive(Debug, Clone)]
pub struct Evaluator {
    config: EvaluatorConfig,
}

impl Evaluator {
    /// Create an evaluator, validating `config`.
    pub fn new(config: EvaluatorConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    /// The evaluator configuration.
    pub fn config(&self) -> &EvaluatorConfig {
        &self.config
    }

    /// Estimate the ADR of `policy` from `start`.
    ///
    /// Rollout `i` is driven by its own RNG seeded with `seed + i`, so the
    /// estimate is reproducible for a fixed seed whatever the thread count.
    /// With a time limit, batches not yet started when it expires are skipped.
    ///
    /// # Arguments
    /// * `model` - The model to simulate
    /// * `policy` - The policy acting on exact beliefs
    /// * `start` - Belief the start state of every rollout is drawn from
    pub fn compute_adr(&self, model: &ModelStore, policy: &Policy, start: &Belief) -> AdrEstimate {
        let config = &self.config;
        let horizon = config.horizon.unwrap_or_else(|| model.horizon());
        let base_seed = config.seed.unwrap_or_else(|| rand::thread_rng().gen());
        let backend = Backend::acquire(config.num_threads);
        let budget = Budget::new(config.time_limit_seconds);

        let mut returns: Vec<f64> = Vec::with_capacity(config.trials);
        while returns.len() < config.trials {
            if budget.exhausted() {
                log::warn!(
                    "evaluation time limit reached after {} of {} rollouts",
                    returns.len(),
                    config.trials
                );
                break;
            }

            let offset = returns.len();
            let batch = BATCH_SIZE.min(config.trials - offset);
            returns.extend(backend.map_indices(batch, |i| {
                let mut rng = StdRng::seed_from_u64(base_seed.wrapping_add((offset + i) as u64));
                rollout(model, policy, start, horizon, config.max_observation_retries, &mut rng)
            }));
        }

        let estimate = summarize(&returns);
        log::debug!(
            "ADR {:.5} ± {:.5} over {} rollouts",
            estimate.mean,
            estimate.standard_error,
            estimate.trials
        );
        estimate
    }
}

/// ADR with `trials` rollouts and otherwise default settings.
pub fn compute_adr(model: &ModelStore, policy: &Policy, start: &Belief, trials: usize) -> Result<AdrEstimate, ConfigError> {
    let evaluator = Evaluator::new(EvaluatorConfig::default().with_trials(trials))?;
    Ok(evaluator.compute_adr(model, policy, start))
}

/// Discounted return of one simulated episode of at most `horizon` steps.
///
/// A step whose successor or observation cannot be sampled consistently with
/// the current belief is resampled up to `max_retries` times; after that the
/// episode ends with no further reward.
pub fn rollout<R: Rng>(
    model: &ModelStore,
    policy: &Policy,
    start: &Belief,
    horizon: usize,
    max_retries: usize,
    rng: &mut R,
) -> f64 {
    let gamma = model.gamma();
    let mut state = start.sample_state(rng);
    let mut belief = start.clone();
    let mut discount = 1.0;
    let mut total = 0.0;

    for _ in 0..horizon {
        let action = policy.action(&belief);
        total += discount * model.reward(state, action);

        let mut next = None;
        for _ in 0..=max_retries {
            let Some((k, successor)) = model.sample_successor(state, action, rng) else {
                break;
            };
            let Some(observation) = model.sample_observation(state, action, k, rng) else {
                continue;
            };
            if let Some(updated) = model.belief_update(&belief, action, observation) {
                next = Some((successor, updated));
                break;
            }
        }

        match next {
            Some((successor, updated)) => {
                state = successor;
                belief = updated;
            }
            None => break,
        }
        discount *= gamma;
    }

    total
}

fn summarize(returns: &[f64]) -> AdrEstimate {
    let trials = returns.len();
    if trials == 0 {
        return AdrEstimate {
            mean: 0.0,
            trials: 0,
            standard_error: 0.0,
        };
    }

    let mean = returns.iter().sum::<f64>() / trials as f64;
    let standard_error = if trials > 1 {
        let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (trials - 1) as f64;
        (variance / trials as f64).sqrt()
    } else {
        0.0
    };

    AdrEstimate {
        mean,
        trials,
        standard_error,
    }
}

/// One experiment row: `n,m,z,r,ns,rz,size,time,V(b0),ADR(b0)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    /// States.
    pub n: usize,
    /// Actions.
    pub m: usize,
    /// Observations.
    pub z: usize,
    /// Belief points the solve worked on: the supplied set for PBVI and
    /// Perseus, the upper-bound points for HSVI2.
    pub r: usize,
    /// Maximum successors per state-action pair.
    pub ns: usize,
    /// Widest belief support among those points.
    pub rz: usize,
    /// Alpha vectors in the final policy.
    pub size: usize,
    /// Solve wall-clock seconds.
    pub time: f64,
    /// `V(b0)`.
    pub value: f64,
    /// `ADR(b0)`.
    pub adr: f64,
}

impl EvaluationReport {
    /// Column header matching [`EvaluationReport::to_csv_row`].
    pub const CSV_HEADER: &'static str = "n,m,z,r,ns,rz,size,time,V(b0),ADR(b0)";

    /// Assemble a row from a finished solve and its ADR.
    ///
    /// `beliefs` is the set handed to the solver. HSVI2 never reads it, so its
    /// rows describe the points the solve itself visited.
    pub fn new(model: &ModelStore, beliefs: &BeliefSet, outcome: &SolveOutcome, adr: f64) -> Self {
        let stats = &outcome.stats;
        let (r, rz) = match stats.algorithm {
            Some(algorithm) if !algorithm.uses_belief_set() => (stats.belief_points, stats.belief_support),
            _ => (beliefs.len(), beliefs.max_support()),
        };

        Self {
            n: model.num_states(),
            m: model.num_actions(),
            z: model.num_observations(),
            r,
            ns: model.max_successors(),
            rz,
            size: outcome.policy.len(),
            time: outcome.stats.elapsed_seconds,
            value: outcome.initial_value(model),
            adr,
        }
    }

    /// Integers as-is, reals with five decimals.
    pub fn to_csv_row(&self) -> String {
        format!(
            "{},{},{},{},{},{},{},{:.5},{:.5},{:.5}",
            self.n, self.m, self.z, self.r, self.ns, self.rz, self.size, self.time, self.value, self.adr
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::tiger;
    use crate::pomdp::config::{Algorithm, SolveStats};
    use crate::pomdp::model::ModelBuilder;
    use crate::pomdp::policy::AlphaVector;
    use float_eq::assert_float_eq;

    /// Two states, identity dynamics, one observation, start in state 0.
    fn deterministic_model() -> ModelStore {
        let mut builder = ModelBuilder::new(2, 2, 1);
        builder.gamma(0.9).initial_belief(&[1.0, 0.0]);
        for s in 0..2 {
            for a in 0..2 {
                builder.transition(s, a, s, 1.0).observation(a, s, 0, 1.0);
            }
        }
        builder.reward(0, 0, 2.0).reward(0, 1, -1.0).reward(1, 0, 0.0).reward(1, 1, 0.0);
        builder.build().unwrap()
    }

    #[test]
    fn test_single_rollout_matches_discounted_sum() {
        let model = deterministic_model();
        let policy = Policy::from_vectors(2, vec![AlphaVector::new(0, vec![20.0, 0.0])]).unwrap();

        let config = EvaluatorConfig::default().with_trials(1).with_horizon(10).with_seed(5);
        let estimate = Evaluator::new(config).unwrap().compute_adr(&model, &policy, model.initial_belief());

        let expected: f64 = (0..10).map(|t| 2.0 * 0.9f64.powi(t)).sum();
        assert_eq!(estimate.trials, 1);
        assert_eq!(estimate.standard_error, 0.0);
        assert_float_eq!(estimate.mean, expected, abs <= 1e-9);
    }

    #[test]
    fn test_adr_is_reproducible_across_thread_counts() {
        let model = tiger::standard().unwrap();
        let policy = crate::pomdp::backup::initial_lower_bound(&model);
        let b0 = model.initial_belief();

        let base = EvaluatorConfig::default().with_trials(200).with_horizon(30).with_seed(9);
        let one = Evaluator::new(base.clone().with_threads(1)).unwrap().compute_adr(&model, &policy, b0);
        let four = Evaluator::new(base.with_threads(4)).unwrap().compute_adr(&model, &policy, b0);

        assert_eq!(one, four);
        assert_eq!(one.trials, 200);
    }

    #[test]
    fn test_always_listen_costs_one_per_step() {
        let model = tiger::standard().unwrap();
        let policy = Policy::from_vectors(2, vec![AlphaVector::new(tiger::LISTEN, vec![0.0, 0.0])]).unwrap();
        let adr = compute_adr(&model, &policy, model.initial_belief(), 20).unwrap();

        let horizon = model.horizon() as i32;
        let expected = -(1.0 - 0.95f64.powi(horizon)) / (1.0 - 0.95);
        assert_float_eq!(adr.mean, expected, abs <= 1e-9);
    }

    #[test]
    fn test_csv_row_format() {
        let model = tiger::standard().unwrap();
        let beliefs = BeliefSet::from_initial(&model);
        let mut stats = SolveStats::new(Algorithm::Pbvi);
        stats.elapsed_seconds = 0.25;
        let outcome = SolveOutcome {
            policy: Policy::from_vectors(2, vec![AlphaVector::new(0, vec![1.0, 2.0])]).unwrap(),
            stats,
        };

        let report = EvaluationReport::new(&model, &beliefs, &outcome, 1.0 / 3.0);
        assert_eq!(EvaluationReport::CSV_HEADER.split(',').count(), 10);
        assert_eq!(report.to_csv_row(), "2,3,2,1,2,2,1,0.25000,1.50000,0.33333");
    }

    #[test]
    fn test_csv_row_for_hsvi2_uses_visited_points() {
        let model = tiger::standard().unwrap();
        let beliefs = BeliefSet::from_beliefs(
            [[0.5, 0.5], [0.85, 0.15], [0.15, 0.85]].map(|probs| Belief::from_dense(&probs).unwrap()),
            BeliefSet::DEFAULT_TOLERANCE,
        );
        assert_eq!(beliefs.len(), 3);

        let mut stats = SolveStats::new(Algorithm::Hsvi2);
        stats.belief_points = 113;
        stats.belief_support = 2;
        stats.elapsed_seconds = 0.5;
        let outcome = SolveOutcome {
            policy: Policy::from_vectors(2, vec![AlphaVector::new(0, vec![1.0, 2.0])]).unwrap(),
            stats,
        };

        let report = EvaluationReport::new(&model, &beliefs, &outcome, 2.0);
        assert_eq!(report.r, 113);
        assert_eq!(report.to_csv_row(), "2,3,2,113,2,2,1,0.50000,1.50000,2.00000");
    }

    #[test]
    fn test_report_from_hsvi2_solve() {
        let model = tiger::standard().unwrap();
        let beliefs = BeliefSet::from_initial(&model);
        let config = crate::pomdp::config::SolverConfig::hsvi2().with_threads(1).with_hsvi2(
            crate::pomdp::config::Hsvi2Params {
                trials: 5,
                ..Default::default()
            },
        );
        let outcome = crate::pomdp::solver::solve(&model, &beliefs, config).unwrap();

        let report = EvaluationReport::new(&model, &beliefs, &outcome, 0.0);
        assert_eq!(report.r, outcome.stats.belief_points);
        assert!(report.r > 0);
        assert_eq!(report.rz, 2);
    }
}
