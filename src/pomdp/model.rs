//! Immutable sparse representation of an MDP/POMDP.
//!
//! A [`ModelStore`] is built once (by [`ModelBuilder`] or from a [`RawModel`]
//! document) and never mutated afterwards, so it can be shared by reference
//! across every worker thread without locking.
//!
//! # Layout
//!
//! ```text
//! slot(s, a, k) = (s * m + a) * ns + k        k in [0, ns)
//!
//! successors[slot]   -> Some(s') | None (sentinel, only after valid entries)
//! transitions[slot]  -> T(s, a, s')
//! observations[slot] -> [(o, O(s, a, s', o))]  sorted by o
//! rewards[s * m + a] -> R(s, a)
//! ```

use std::fs;
use std::path::Path;

use rand::Rng;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pomdp::belief::Belief;

/// Tolerance used when checking that probability rows sum to one.
pub const PROBABILITY_TOLERANCE: f64 = 1e-6;

/// Horizon used when a model does not specify one.
///
/// Large enough that `gamma^horizon` is negligible for the discount factors
/// typically used with point-based solvers.
pub const DEFAULT_HORIZON: usize = 1_000;

/// Errors raised while constructing or loading a model.
///
/// Every variant except [`ModelError::Io`] and [`ModelError::Json`] describes a
/// malformed model and is detected before any solving starts.
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum ModelError {
    #[error("malformed model: at least one {0} is required")]
    EmptyDimension(&'static str),

    #[error("malformed model: discount factor {0} is outside (0, 1)")]
    InvalidDiscount(f64),

    #[error("malformed model: horizon must be at least 1")]
    InvalidHorizon,

    #[error("malformed model: {kind} index {index} is out of range [0, {bound})")]
    IndexOutOfRange {
        kind: &'static str,
        index: i64,
        bound: usize,
    },

    #[error("malformed model: probability {value} for {context} is not a valid probability")]
    InvalidProbability { context: String, value: f64 },

    #[error("malformed model: transitions for state {state}, action {action} sum to {sum:.6} (expected 1)")]
    TransitionSum { state: usize, action: usize, sum: f64 },

    #[error("malformed model: observations for state {state}, action {action}, successor {successor} sum to {sum:.6} (expected 1)")]
    ObservationSum {
        state: usize,
        action: usize,
        successor: usize,
        sum: f64,
    },

    #[error("malformed model: successor list for state {state}, action {action} has a valid entry at slot {slot} after the sentinel")]
    SentinelGap { state: usize, action: usize, slot: usize },

    #[error("malformed model: sentinel slot {slot} for state {state}, action {action} carries transition probability {value}")]
    SentinelTransition {
        state: usize,
        action: usize,
        slot: usize,
        value: f64,
    },

    #[error("malformed model: observations for action {action}, successor {successor} sum to {sum:.6} (expected 1)")]
    SharedObservationSum { action: usize, successor: usize, sum: f64 },

    #[error("malformed model: array `{name}` has length {actual}, expected {expected}")]
    ArrayLength {
        name: &'static str,
        actual: usize,
        expected: usize,
    },

    #[error("malformed model: reward for state {state}, action {action} is not finite")]
    InvalidReward { state: usize, action: usize },

    #[error("malformed model: initial belief is invalid ({0})")]
    InitialBelief(String),

    #[error("failed to read model: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse model: {0}")]
    Json(#[from] serde_json::Error),
}

impl ModelError {
    /// Whether this error describes an inconsistent model (as opposed to I/O).
    pub fn is_malformed(&self) -> bool {
        !matches!(self, ModelError::Io(_) | ModelError::Json(_))
    }
}

/// One reachable observation branch of a belief/action pair.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationBranch {
    /// Observation index.
    pub observation: usize,
    /// `Pr(o | b, a)`.
    pub probability: f64,
    /// Unnormalised successor weights `(s', Pr(s', o | b, a))`, sorted by state.
    /// They sum to `probability`.
    pub weights: Vec<(usize, f64)>,
}

impl ObservationBranch {
    /// The Bayesian posterior `b^{a,o}`.
    pub fn belief(&self) -> Option<Belief> {
        Belief::from_weights(self.weights.iter().copied())
    }
}

/// Sparse, immutable MDP/POMDP model.
#[derive(Debug, Clone)]
pub struct ModelStore {
    n: usize,
    m: usize,
    z: usize,
    ns: usize,
    gamma: f64,
    horizon: usize,
    successors: Vec<Option<usize>>,
    transitions: Vec<f64>,
    rewards: Vec<f64>,
    observation_offsets: Vec<usize>,
    observation_entries: Vec<(usize, f64)>,
    initial_belief: Belief,
    min_reward: f64,
    max_reward: f64,
}

impl ModelStore {
    /// Number of states `n`.
    pub fn num_states(&self) -> usize {
        self.n
    }

    /// Number of actions `m`.
    pub fn num_actions(&self) -> usize {
        self.m
    }

    /// Number of observations `z`.
    pub fn num_observations(&self) -> usize {
        self.z
    }

    /// Maximum number of successors of any (state, action) pair.
    pub fn max_successors(&self) -> usize {
        self.ns
    }

    /// Discount factor.
    pub fn gamma(&self) -> f64 {
        self.gamma
    }

    /// Planning/rollout horizon.
    pub fn horizon(&self) -> usize {
        self.horizon
    }

    /// Smallest reward over all (state, action) pairs.
    pub fn min_reward(&self) -> f64 {
        self.min_reward
    }

    /// Largest reward over all (state, action) pairs.
    pub fn max_reward(&self) -> f64 {
        self.max_reward
    }

    /// The model's initial belief.
    pub fn initial_belief(&self) -> &Belief {
        &self.initial_belief
    }

    #[inline]
    fn slot(&self, state: usize, action: usize, k: usize) -> usize {
        (state * self.m + action) * self.ns + k
    }

    /// The `k`-th successor of `(state, action)`, or `None` past the last one.
    pub fn successor(&self, state: usize, action: usize, k: usize) -> Option<usize> {
        if k >= self.ns {
            return None;
        }
        self.successors[self.slot(state, action, k)]
    }

    /// Probability of the `k`-th successor (zero past the last one).
    pub fn transition_prob(&self, state: usize, action: usize, k: usize) -> f64 {
        if k >= self.ns {
            return 0.0;
        }
        self.transitions[self.slot(state, action, k)]
    }

    /// Iterate the valid `(k, s', T(s, a, s'))` triples of `(state, action)`.
    pub fn successors(
        &self,
        state: usize,
        action: usize,
    ) -> impl Iterator<Item = (usize, usize, f64)> + '_ {
        let base = self.slot(state, action, 0);
        (0..self.ns).map_while(move |k| {
            self.successors[base + k].map(|next| (k, next, self.transitions[base + k]))
        })
    }

    /// Reward `R(state, action)`.
    pub fn reward(&self, state: usize, action: usize) -> f64 {
        self.rewards[state * self.m + action]
    }

    /// Expected immediate reward of `action` under `belief`.
    pub fn expected_reward(&self, belief: &Belief, action: usize) -> f64 {
        belief
            .entries()
            .iter()
            .map(|&(s, p)| p * self.reward(s, action))
            .sum()
    }

    /// Observation distribution of the `k`-th successor slot of `(state, action)`.
    pub fn observations(&self, state: usize, action: usize, k: usize) -> &[(usize, f64)] {
        if k >= self.ns {
            return &[];
        }
        let slot = self.slot(state, action, k);
        &self.observation_entries[self.observation_offsets[slot]..self.observation_offsets[slot + 1]]
    }

    /// Observation distribution for the transition `(state, action, next)`.
    ///
    /// Empty when `next` is not a successor of `(state, action)`.
    pub fn observation_distribution(
        &self,
        state: usize,
        action: usize,
        next: usize,
    ) -> &[(usize, f64)] {
        self.successors(state, action)
            .find(|&(_, s, _)| s == next)
            .map(|(k, _, _)| self.observations(state, action, k))
            .unwrap_or(&[])
    }

    /// `O(s, a, s'_k, o)`.
    pub fn observation_prob(&self, state: usize, action: usize, k: usize, observation: usize) -> f64 {
        let entries = self.observations(state, action, k);
        entries
            .binary_search_by_key(&observation, |&(o, _)| o)
            .map(|i| entries[i].1)
            .unwrap_or(0.0)
    }

    /// Every reachable observation branch of `(belief, action)`, sorted by
    /// observation index. Branches with zero probability are omitted.
    pub fn successor_branches(&self, belief: &Belief, action: usize) -> Vec<ObservationBranch> {
        let mut by_observation: FxHashMap<usize, FxHashMap<usize, f64>> = FxHashMap::default();

        for &(s, p) in belief.entries() {
            for (k, next, t) in self.successors(s, action) {
                for &(o, q) in self.observations(s, action, k) {
                    let weight = p * t * q;
                    if weight > 0.0 {
                        *by_observation
                            .entry(o)
                            .or_default()
                            .entry(next)
                            .or_insert(0.0) += weight;
                    }
                }
            }
        }

        let mut branches: Vec<ObservationBranch> = by_observation
            .into_iter()
            .map(|(observation, weights)| {
                let mut weights: Vec<(usize, f64)> = weights.into_iter().collect();
                weights.sort_unstable_by_key(|&(s, _)| s);
                let probability = weights.iter().map(|&(_, w)| w).sum();
                ObservationBranch {
                    observation,
                    probability,
                    weights,
                }
            })
            .collect();
        branches.sort_unstable_by_key(|branch| branch.observation);
        branches
    }

    /// Exact Bayesian belief update `b^{a,o}`.
    ///
    /// Returns `None` when `o` is impossible under `(belief, action)`.
    pub fn belief_update(&self, belief: &Belief, action: usize, observation: usize) -> Option<Belief> {
        let mut posterior: FxHashMap<usize, f64> = FxHashMap::default();

        for &(s, p) in belief.entries() {
            for (k, next, t) in self.successors(s, action) {
                let q = self.observation_prob(s, action, k, observation);
                if q > 0.0 {
                    *posterior.entry(next).or_insert(0.0) += p * t * q;
                }
            }
        }

        Belief::from_weights(posterior)
    }

    /// Sample a successor slot of `(state, action)`, returning `(k, s')`.
    pub fn sample_successor<R: Rng>(&self, state: usize, action: usize, rng: &mut R) -> Option<(usize, usize)> {
        let r: f64 = rng.gen();
        let mut cumsum = 0.0;
        let mut last = None;

        for (k, next, t) in self.successors(state, action) {
            cumsum += t;
            last = Some((k, next));
            if r < cumsum {
                return last;
            }
        }

        // Floating point shortfall in the cumulative sum
        last
    }

    /// Sample an observation for the `k`-th successor slot of `(state, action)`.
    pub fn sample_observation<R: Rng>(&self, state: usize, action: usize, k: usize, rng: &mut R) -> Option<usize> {
        let entries = self.observations(state, action, k);
        let r: f64 = rng.gen();
        let mut cumsum = 0.0;

        for &(o, q) in entries {
            cumsum += q;
            if r < cumsum {
                return Some(o);
            }
        }

        entries.last().map(|&(o, _)| o)
    }

    /// Load a [`RawModel`] JSON document, keeping the first reward objective.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ModelError> {
        let text = fs::read_to_string(path)?;
        let raw: RawModel = serde_json::from_str(&text)?;
        raw.into_model(first_objective)
    }
}

/// Default scalarization: the first reward objective.
pub fn first_objective(rewards: &[f64]) -> f64 {
    rewards.first().copied().unwrap_or(0.0)
}

fn check_probability(value: f64, context: impl FnOnce() -> String) -> Result<(), ModelError> {
    if value.is_finite() && (0.0..=1.0 + PROBABILITY_TOLERANCE).contains(&value) {
        Ok(())
    } else {
        Err(ModelError::InvalidProbability {
            context: context(),
            value,
        })
    }
}

fn check_index(kind: &'static str, index: usize, bound: usize) -> Result<(), ModelError> {
    if index < bound {
        Ok(())
    } else {
        Err(ModelError::IndexOutOfRange {
            kind,
            index: index as i64,
            bound,
        })
    }
}

/// Incremental, validating constructor for [`ModelStore`].
///
/// Probabilities given twice for the same entry are summed.
///
/// # Example
/// ```
/// use pomdp_solver::pomdp::ModelBuilder;
///
/// let mut builder = ModelBuilder::new(1, 1, 1);
/// builder.gamma(0.9).transition(0, 0, 0, 1.0).observation(0, 0, 0, 1.0).reward(0, 0, 1.0);
/// let model = builder.build().unwrap();
/// assert_eq!(model.num_states(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct ModelBuilder {
    n: usize,
    m: usize,
    z: usize,
    gamma: f64,
    horizon: usize,
    transitions: FxHashMap<(usize, usize), Vec<(usize, f64)>>,
    rewards: FxHashMap<(usize, usize), f64>,
    shared_observations: FxHashMap<(usize, usize), Vec<(usize, f64)>>,
    specific_observations: FxHashMap<(usize, usize, usize), Vec<(usize, f64)>>,
    initial_belief: Option<Vec<(usize, f64)>>,
}

impl ModelBuilder {
    /// Start a model with `n` states, `m` actions and `z` observations.
    pub fn new(n: usize, m: usize, z: usize) -> Self {
        Self {
            n,
            m,
            z,
            gamma: 0.95,
            horizon: DEFAULT_HORIZON,
            transitions: FxHashMap::default(),
            rewards: FxHashMap::default(),
            shared_observations: FxHashMap::default(),
            specific_observations: FxHashMap::default(),
            initial_belief: None,
        }
    }

    /// Set the discount factor.
    pub fn gamma(&mut self, gamma: f64) -> &mut Self {
        self.gamma = gamma;
        self
    }

    /// Set the horizon.
    pub fn horizon(&mut self, horizon: usize) -> &mut Self {
        self.horizon = horizon;
        self
    }

    /// Add `T(state, action, next) = prob`.
    pub fn transition(&mut self, state: usize, action: usize, next: usize, prob: f64) -> &mut Self {
        self.transitions
            .entry((state, action))
            .or_default()
            .push((next, prob));
        self
    }

    /// Set `R(state, action)`. Unset rewards are zero.
    pub fn reward(&mut self, state: usize, action: usize, reward: f64) -> &mut Self {
        self.rewards.insert((state, action), reward);
        self
    }

    /// Add `O(action, next, observation) = prob`, shared by every source state.
    pub fn observation(&mut self, action: usize, next: usize, observation: usize, prob: f64) -> &mut Self {
        self.shared_observations
            .entry((action, next))
            .or_default()
            .push((observation, prob));
        self
    }

    /// Add an observation probability for one specific `(state, action, next)`
    /// transition. Overrides the shared distribution for that transition.
    pub fn observation_from(
        &mut self,
        state: usize,
        action: usize,
        next: usize,
        observation: usize,
        prob: f64,
    ) -> &mut Self {
        self.specific_observations
            .entry((state, action, next))
            .or_default()
            .push((observation, prob));
        self
    }

    /// Set the initial belief from a dense probability vector.
    pub fn initial_belief(&mut self, probs: &[f64]) -> &mut Self {
        self.initial_belief = Some(probs.iter().copied().enumerate().collect());
        self
    }

    /// Set the initial belief from sparse `(state, prob)` pairs.
    pub fn initial_belief_sparse(&mut self, entries: Vec<(usize, f64)>) -> &mut Self {
        self.initial_belief = Some(entries);
        self
    }

    /// Validate everything and build the immutable model.
    pub fn build(&self) -> Result<ModelStore, ModelError> {
        let (n, m, z) = (self.n, self.m, self.z);
        if n == 0 {
            return Err(ModelError::EmptyDimension("state"));
        }
        if m == 0 {
            return Err(ModelError::EmptyDimension("action"));
        }
        if z == 0 {
            return Err(ModelError::EmptyDimension("observation"));
        }
        if !(self.gamma > 0.0 && self.gamma < 1.0) {
            return Err(ModelError::InvalidDiscount(self.gamma));
        }
        if self.horizon == 0 {
            return Err(ModelError::InvalidHorizon);
        }

        // Merged, sorted, strictly positive successor rows.
        let mut rows: Vec<Vec<(usize, f64)>> = vec![Vec::new(); n * m];
        for (&(s, a), entries) in &self.transitions {
            check_index("state", s, n)?;
            check_index("action", a, m)?;
            let mut merged: FxHashMap<usize, f64> = FxHashMap::default();
            for &(next, p) in entries {
                check_index("state", next, n)?;
                check_probability(p, || format!("T({s}, {a}, {next})"))?;
                *merged.entry(next).or_insert(0.0) += p;
            }
            let mut row: Vec<(usize, f64)> = merged.into_iter().filter(|&(_, p)| p > 0.0).collect();
            row.sort_unstable_by_key(|&(next, _)| next);
            rows[s * m + a] = row;
        }

        for s in 0..n {
            for a in 0..m {
                let sum: f64 = rows[s * m + a].iter().map(|&(_, p)| p).sum();
                if (sum - 1.0).abs() > PROBABILITY_TOLERANCE {
                    return Err(ModelError::TransitionSum { state: s, action: a, sum });
                }
            }
        }

        let ns = rows.iter().map(Vec::len).max().unwrap_or(0).max(1);

        let mut rewards = vec![0.0; n * m];
        for (&(s, a), &r) in &self.rewards {
            check_index("state", s, n)?;
            check_index("action", a, m)?;
            if !r.is_finite() {
                return Err(ModelError::InvalidReward { state: s, action: a });
            }
            rewards[s * m + a] = r;
        }

        // Every supplied row is checked, reachable or not.
        for (&(a, next), entries) in &self.shared_observations {
            check_index("action", a, m)?;
            check_index("state", next, n)?;
            let sum = observation_row_sum(entries, z, |o| format!("O({a}, {next}, {o})"))?;
            if (sum - 1.0).abs() > PROBABILITY_TOLERANCE {
                return Err(ModelError::SharedObservationSum {
                    action: a,
                    successor: next,
                    sum,
                });
            }
        }
        for (&(s, a, next), entries) in &self.specific_observations {
            check_index("state", s, n)?;
            check_index("action", a, m)?;
            check_index("state", next, n)?;
            let sum = observation_row_sum(entries, z, |o| format!("O({s}, {a}, {next}, {o})"))?;
            if (sum - 1.0).abs() > PROBABILITY_TOLERANCE {
                return Err(ModelError::ObservationSum {
                    state: s,
                    action: a,
                    successor: next,
                    sum,
                });
            }
        }

        let mut successors = vec![None; n * m * ns];
        let mut transitions = vec![0.0; n * m * ns];
        let mut observation_offsets = Vec::with_capacity(n * m * ns + 1);
        let mut observation_entries = Vec::new();
        observation_offsets.push(0);

        for s in 0..n {
            for a in 0..m {
                let row = &rows[s * m + a];
                for k in 0..ns {
                    let slot = (s * m + a) * ns + k;
                    if let Some(&(next, p)) = row.get(k) {
                        successors[slot] = Some(next);
                        transitions[slot] = p;

                        let source = self
                            .specific_observations
                            .get(&(s, a, next))
                            .or_else(|| self.shared_observations.get(&(a, next)));
                        let distribution = merge_observations(source.map(Vec::as_slice).unwrap_or(&[]), s, a, next)?;
                        let sum: f64 = distribution.iter().map(|&(_, q)| q).sum();
                        if (sum - 1.0).abs() > PROBABILITY_TOLERANCE {
                            return Err(ModelError::ObservationSum {
                                state: s,
                                action: a,
                                successor: next,
                                sum,
                            });
                        }
                        observation_entries.extend(distribution);
                    }
                    observation_offsets.push(observation_entries.len());
                }
            }
        }

        let initial_belief = match &self.initial_belief {
            Some(entries) => validate_initial_belief(entries, n)?,
            None => Belief::uniform(n),
        };

        let min_reward = rewards.iter().copied().fold(f64::INFINITY, f64::min);
        let max_reward = rewards.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        Ok(ModelStore {
            n,
            m,
            z,
            ns,
            gamma: self.gamma,
            horizon: self.horizon,
            successors,
            transitions,
            rewards,
            observation_offsets,
            observation_entries,
            initial_belief,
            min_reward,
            max_reward,
        })
    }
}

/// Index and range check one observation row, returning its total mass.
fn observation_row_sum(
    entries: &[(usize, f64)],
    z: usize,
    context: impl Fn(usize) -> String,
) -> Result<f64, ModelError> {
    let mut sum = 0.0;
    for &(o, q) in entries {
        check_index("observation", o, z)?;
        check_probability(q, || context(o))?;
        sum += q;
    }
    Ok(sum)
}

fn merge_observations(
    entries: &[(usize, f64)],
    state: usize,
    action: usize,
    next: usize,
) -> Result<Vec<(usize, f64)>, ModelError> {
    let mut merged: FxHashMap<usize, f64> = FxHashMap::default();
    for &(o, q) in entries {
        check_probability(q, || format!("O({state}, {action}, {next}, {o})"))?;
        *merged.entry(o).or_insert(0.0) += q;
    }
    let mut distribution: Vec<(usize, f64)> = merged.into_iter().filter(|&(_, q)| q > 0.0).collect();
    distribution.sort_unstable_by_key(|&(o, _)| o);
    Ok(distribution)
}

fn validate_initial_belief(entries: &[(usize, f64)], n: usize) -> Result<Belief, ModelError> {
    for &(s, p) in entries {
        if s >= n {
            return Err(ModelError::InitialBelief(format!("state {s} out of range")));
        }
        if !p.is_finite() || p < 0.0 {
            return Err(ModelError::InitialBelief(format!("probability {p} for state {s}")));
        }
    }
    let sum: f64 = entries.iter().map(|&(_, p)| p).sum();
    if (sum - 1.0).abs() > PROBABILITY_TOLERANCE {
        return Err(ModelError::InitialBelief(format!("probabilities sum to {sum:.6}")));
    }
    Belief::from_weights(entries.iter().copied())
        .ok_or_else(|| ModelError::InitialBelief("no probability mass".to_string()))
}

fn default_horizon() -> usize {
    DEFAULT_HORIZON
}

/// Flat "raw" model document, the serde-facing boundary of the loader.
///
/// Arrays are row-major:
/// - `successors`, `transitions`: `n * m * ns`, `-1` marks the end of a row
/// - `rewards`: one `n * m` array per objective
/// - `observations`: `m * n * z`, `O(a, s', o)`
/// - `initial_belief`: `n` (uniform when omitted)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawModel {
    /// Number of states.
    pub n: usize,
    /// Number of actions.
    pub m: usize,
    /// Number of observations.
    pub z: usize,
    /// Width of each successor row.
    pub ns: usize,
    /// Discount factor.
    pub gamma: f64,
    /// Horizon.
    #[serde(default = "default_horizon")]
    pub horizon: usize,
    /// Successor state indices.
    pub successors: Vec<i64>,
    /// Transition probabilities aligned with `successors`.
    pub transitions: Vec<f64>,
    /// Reward arrays, one per objective.
    pub rewards: Vec<Vec<f64>>,
    /// Observation probabilities.
    pub observations: Vec<f64>,
    /// Dense initial belief.
    #[serde(default)]
    pub initial_belief: Option<Vec<f64>>,
}

impl RawModel {
    /// Validate the arrays and build a model, reducing each reward vector to a
    /// scalar with `scalarize`.
    pub fn into_model<F>(self, scalarize: F) -> Result<ModelStore, ModelError>
    where
        F: Fn(&[f64]) -> f64,
    {
        let RawModel {
            n,
            m,
            z,
            ns,
            gamma,
            horizon,
            successors,
            transitions,
            rewards,
            observations,
            initial_belief,
        } = self;

        let table = n * m * ns;
        if successors.len() != table {
            return Err(ModelError::ArrayLength {
                name: "successors",
                actual: successors.len(),
                expected: table,
            });
        }
        if transitions.len() != table {
            return Err(ModelError::ArrayLength {
                name: "transitions",
                actual: transitions.len(),
                expected: table,
            });
        }
        if rewards.is_empty() {
            return Err(ModelError::EmptyDimension("reward objective"));
        }
        for objective in &rewards {
            if objective.len() != n * m {
                return Err(ModelError::ArrayLength {
                    name: "rewards",
                    actual: objective.len(),
                    expected: n * m,
                });
            }
        }
        if observations.len() != m * n * z {
            return Err(ModelError::ArrayLength {
                name: "observations",
                actual: observations.len(),
                expected: m * n * z,
            });
        }

        let mut builder = ModelBuilder::new(n, m, z);
        builder.gamma(gamma).horizon(horizon);

        for s in 0..n {
            for a in 0..m {
                let mut ended = false;
                for k in 0..ns {
                    let slot = (s * m + a) * ns + k;
                    let next = successors[slot];
                    if next < 0 {
                        if next != -1 {
                            return Err(ModelError::IndexOutOfRange {
                                kind: "state",
                                index: next,
                                bound: n,
                            });
                        }
                        if transitions[slot] != 0.0 {
                            return Err(ModelError::SentinelTransition {
                                state: s,
                                action: a,
                                slot: k,
                                value: transitions[slot],
                            });
                        }
                        ended = true;
                        continue;
                    }
                    if ended {
                        return Err(ModelError::SentinelGap { state: s, action: a, slot: k });
                    }
                    if next as usize >= n {
                        return Err(ModelError::IndexOutOfRange {
                            kind: "state",
                            index: next,
                            bound: n,
                        });
                    }
                    builder.transition(s, a, next as usize, transitions[slot]);
                }

                let objectives: Vec<f64> = rewards.iter().map(|r| r[s * m + a]).collect();
                builder.reward(s, a, scalarize(&objectives));
            }
        }

        for a in 0..m {
            for next in 0..n {
                for o in 0..z {
                    let q = observations[(a * n + next) * z + o];
                    if q != 0.0 {
                        builder.observation(a, next, o, q);
                    }
                }
            }
        }

        if let Some(probs) = initial_belief {
            if probs.len() != n {
                return Err(ModelError::ArrayLength {
                    name: "initial_belief",
                    actual: probs.len(),
                    expected: n,
                });
            }
            builder.initial_belief(&probs);
        }

        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::tiger;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn two_state_raw() -> RawModel {
        RawModel {
            n: 2,
            m: 1,
            z: 2,
            ns: 2,
            gamma: 0.9,
            horizon: 10,
            successors: vec![0, 1, 1, -1],
            transitions: vec![0.5, 0.5, 1.0, 0.0],
            rewards: vec![vec![1.0, 2.0], vec![10.0, 20.0]],
            observations: vec![1.0, 0.0, 0.25, 0.75],
            initial_belief: Some(vec![1.0, 0.0]),
        }
    }

    #[test]
    fn test_raw_model_scalarization() {
        let model = two_state_raw().into_model(first_objective).unwrap();
        assert_eq!(model.reward(0, 0), 1.0);
        assert_eq!(model.reward(1, 0), 2.0);

        let summed = two_state_raw().into_model(|r| r.iter().sum()).unwrap();
        assert_eq!(summed.reward(0, 0), 11.0);
        assert_eq!(summed.reward(1, 0), 22.0);
        assert_eq!(summed.max_successors(), 2);
    }

    #[test]
    fn test_raw_model_sentinel_gap() {
        let mut raw = two_state_raw();
        raw.successors = vec![-1, 1, 1, -1];
        let err = raw.into_model(first_objective).unwrap_err();
        assert!(matches!(err, ModelError::SentinelGap { state: 0, action: 0, slot: 1 }));
        assert!(err.is_malformed());
    }

    #[test]
    fn test_raw_model_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        fs::write(&path, serde_json::to_string(&two_state_raw()).unwrap()).unwrap();

        let model = ModelStore::from_json_file(&path).unwrap();
        assert_eq!(model.num_states(), 2);
        assert_eq!(model.horizon(), 10);
        assert_eq!(model.observation_distribution(0, 0, 1), &[(0, 0.25), (1, 0.75)]);
    }

    #[test]
    fn test_builder_rejects_bad_transition_sum() {
        let mut builder = ModelBuilder::new(2, 1, 1);
        builder
            .transition(0, 0, 0, 0.5)
            .transition(0, 0, 1, 0.4)
            .transition(1, 0, 1, 1.0)
            .observation(0, 0, 0, 1.0)
            .observation(0, 1, 0, 1.0);
        let err = builder.build().unwrap_err();
        assert!(matches!(err, ModelError::TransitionSum { state: 0, action: 0, .. }));
    }

    #[test]
    fn test_builder_rejects_out_of_range_indices() {
        let mut builder = ModelBuilder::new(1, 1, 1);
        builder.transition(0, 0, 3, 1.0).observation(0, 0, 0, 1.0);
        assert!(matches!(
            builder.build().unwrap_err(),
            ModelError::IndexOutOfRange { kind: "state", index: 3, bound: 1 }
        ));

        let mut builder = ModelBuilder::new(1, 1, 1);
        builder.transition(0, 0, 0, 1.0).observation(0, 0, 2, 1.0);
        assert!(matches!(
            builder.build().unwrap_err(),
            ModelError::IndexOutOfRange { kind: "observation", .. }
        ));
    }

    #[test]
    fn test_builder_rejects_missing_observations_and_bad_gamma() {
        let mut builder = ModelBuilder::new(1, 1, 1);
        builder.transition(0, 0, 0, 1.0);
        assert!(matches!(builder.build().unwrap_err(), ModelError::ObservationSum { .. }));

        builder.observation(0, 0, 0, 1.0).gamma(1.0);
        assert!(matches!(builder.build().unwrap_err(), ModelError::InvalidDiscount(_)));

        builder.gamma(0.5).initial_belief(&[0.5]);
        assert!(matches!(builder.build().unwrap_err(), ModelError::InitialBelief(_)));
    }

    #[test]
    fn test_builder_rejects_bad_unreachable_observation_row() {
        // Nothing transitions into state 1, so its rows are never merged.
        let mut builder = ModelBuilder::new(2, 1, 1);
        builder
            .transition(0, 0, 0, 1.0)
            .transition(1, 0, 0, 1.0)
            .observation(0, 0, 0, 1.0)
            .observation(0, 1, 0, 7.5);
        let err = builder.build().unwrap_err();
        assert!(matches!(err, ModelError::InvalidProbability { value, .. } if value == 7.5));

        let mut builder = ModelBuilder::new(2, 1, 2);
        builder
            .transition(0, 0, 0, 1.0)
            .transition(1, 0, 0, 1.0)
            .observation(0, 0, 0, 1.0)
            .observation(0, 1, 1, 0.5);
        assert!(matches!(
            builder.build().unwrap_err(),
            ModelError::SharedObservationSum { action: 0, successor: 1, .. }
        ));

        let mut builder = ModelBuilder::new(2, 1, 1);
        builder
            .transition(0, 0, 0, 1.0)
            .transition(1, 0, 0, 1.0)
            .observation(0, 0, 0, 1.0)
            .observation_from(0, 0, 1, 0, 0.25);
        assert!(matches!(
            builder.build().unwrap_err(),
            ModelError::ObservationSum { state: 0, action: 0, successor: 1, .. }
        ));
    }

    #[test]
    fn test_raw_model_rejects_mass_on_sentinel() {
        let mut raw = two_state_raw();
        raw.transitions = vec![0.5, 0.5, 1.0, 0.3];
        let err = raw.into_model(first_objective).unwrap_err();
        assert!(matches!(err, ModelError::SentinelTransition { state: 1, action: 0, slot: 1, .. }));
        assert!(err.is_malformed());
    }

    #[test]
    fn test_raw_model_rejects_bad_unreachable_observations() {
        let mut raw = two_state_raw();
        raw.successors = vec![0, -1, 0, -1];
        raw.transitions = vec![1.0, 0.0, 1.0, 0.0];
        raw.observations = vec![1.0, 0.0, 2.0, 5.0];
        let err = raw.into_model(first_objective).unwrap_err();
        assert!(matches!(err, ModelError::InvalidProbability { value, .. } if value == 2.0));
    }

    /// Identity dynamics; observation 0 always, except that staying in state 1
    /// reveals observation 1.
    fn revealing_model() -> ModelStore {
        let mut builder = ModelBuilder::new(2, 1, 2);
        builder
            .transition(0, 0, 0, 1.0)
            .transition(1, 0, 1, 1.0)
            .observation(0, 0, 0, 1.0)
            .observation(0, 1, 0, 1.0)
            .observation_from(1, 0, 1, 1, 1.0);
        builder.build().unwrap()
    }

    #[test]
    fn test_source_specific_observation_overrides_shared() {
        let model = revealing_model();
        assert_eq!(model.observation_distribution(0, 0, 0), &[(0, 1.0)]);
        assert_eq!(model.observation_distribution(1, 0, 1), &[(1, 1.0)]);
        assert_eq!(model.observation_prob(1, 0, 0, 0), 0.0);
    }

    #[test]
    fn test_belief_update_uses_source_specific_observations() {
        let model = revealing_model();
        let uniform = model.initial_belief().clone();

        assert_eq!(model.belief_update(&uniform, 0, 0).unwrap(), Belief::point(0));
        assert_eq!(model.belief_update(&uniform, 0, 1).unwrap(), Belief::point(1));

        let branches = model.successor_branches(&uniform, 0);
        assert_eq!(branches.len(), 2);
        assert!((branches[1].probability - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_sparse_initial_belief_merges_duplicates() {
        let mut builder = ModelBuilder::new(2, 1, 1);
        builder
            .transition(0, 0, 0, 1.0)
            .transition(1, 0, 1, 1.0)
            .observation(0, 0, 0, 1.0)
            .observation(0, 1, 0, 1.0)
            .initial_belief_sparse(vec![(1, 0.25), (0, 0.5), (1, 0.25)]);
        let model = builder.build().unwrap();

        let b0 = model.initial_belief();
        assert_eq!(b0.support_len(), 2);
        assert!((b0.probability(0) - 0.5).abs() < 1e-12);
        assert!((b0.probability(1) - 0.5).abs() < 1e-12);

        builder.initial_belief_sparse(vec![(0, 0.75), (0, 0.75)]);
        assert!(matches!(builder.build().unwrap_err(), ModelError::InitialBelief(_)));
    }

    #[test]
    fn test_tiger_listen_update() {
        let model = tiger::standard().unwrap();
        let uniform = model.initial_belief().clone();

        let posterior = model.belief_update(&uniform, tiger::LISTEN, tiger::HEAR_LEFT).unwrap();
        assert!((posterior.probability(tiger::TIGER_LEFT) - 0.85).abs() < 1e-12);
        assert!((posterior.probability(tiger::TIGER_RIGHT) - 0.15).abs() < 1e-12);

        let branches = model.successor_branches(&uniform, tiger::LISTEN);
        assert_eq!(branches.len(), 2);
        let total: f64 = branches.iter().map(|b| b.probability).sum();
        assert!((total - 1.0).abs() < 1e-12);
        assert_eq!(branches[0].belief().unwrap(), posterior);
    }

    #[test]
    fn test_impossible_observation_has_no_update() {
        let mut builder = ModelBuilder::new(2, 1, 2);
        builder
            .transition(0, 0, 0, 1.0)
            .transition(1, 0, 1, 1.0)
            .observation(0, 0, 0, 1.0)
            .observation(0, 1, 1, 1.0)
            .initial_belief(&[1.0, 0.0]);
        let model = builder.build().unwrap();

        assert!(model.belief_update(model.initial_belief(), 0, 1).is_none());
        assert!(model.belief_update(model.initial_belief(), 0, 0).is_some());
    }

    #[test]
    fn test_sampling_stays_in_support() {
        let model = tiger::standard().unwrap();
        let mut rng = StdRng::seed_from_u64(7);

        for _ in 0..200 {
            let (k, next) = model.sample_successor(0, tiger::LISTEN, &mut rng).unwrap();
            assert_eq!(next, 0);
            let o = model.sample_observation(0, tiger::LISTEN, k, &mut rng).unwrap();
            assert!(o < model.num_observations());
        }
    }
}
