//! Belief points and belief-set expansion.
//!
//! A [`Belief`] is a sparse probability vector over states. A [`BeliefSet`] is
//! the growing, deduplicated collection of points that PBVI and Perseus back
//! up; it is expanded by forward simulation through the model.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::pomdp::model::ModelStore;

/// Normalising constants at or below this are treated as zero.
pub const MIN_NORMALIZER: f64 = 1e-15;

/// Sparse probability distribution over states.
///
/// Entries are sorted by state, strictly positive and sum to one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Belief {
    entries: Vec<(usize, f64)>,
}

impl Belief {
    /// Normalise non-negative `(state, weight)` pairs into a belief.
    ///
    /// Repeated states are merged. Returns `None` if the total weight is zero
    /// (or not finite), which is how impossible observations surface.
    pub fn from_weights<I>(weights: I) -> Option<Self>
    where
        I: IntoIterator<Item = (usize, f64)>,
    {
        let mut entries: Vec<(usize, f64)> = weights.into_iter().filter(|&(_, w)| w > 0.0).collect();
        entries.sort_unstable_by_key(|&(s, _)| s);
        entries.dedup_by(|later, kept| {
            if later.0 == kept.0 {
                kept.1 += later.1;
                true
            } else {
                false
            }
        });

        let total: f64 = entries.iter().map(|&(_, w)| w).sum();
        if !total.is_finite() || total <= MIN_NORMALIZER {
            return None;
        }
        for entry in &mut entries {
            entry.1 /= total;
        }
        Some(Self { entries })
    }

    /// Belief from a dense vector (`probs[s]`).
    pub fn from_dense(probs: &[f64]) -> Option<Self> {
        Self::from_weights(probs.iter().copied().enumerate())
    }

    /// All mass on one state.
    pub fn point(state: usize) -> Self {
        Self {
            entries: vec![(state, 1.0)],
        }
    }

    /// Uniform over `n` states.
    pub fn uniform(n: usize) -> Self {
        let p = 1.0 / n as f64;
        Self {
            entries: (0..n).map(|s| (s, p)).collect(),
        }
    }

    /// The sparse `(state, prob)` entries.
    pub fn entries(&self) -> &[(usize, f64)] {
        &self.entries
    }

    /// Number of states with non-zero probability.
    pub fn support_len(&self) -> usize {
        self.entries.len()
    }

    /// `b(state)`.
    pub fn probability(&self, state: usize) -> f64 {
        self.entries
            .binary_search_by_key(&state, |&(s, _)| s)
            .map(|i| self.entries[i].1)
            .unwrap_or(0.0)
    }

    /// Dot product with a dense vector indexed by state.
    #[inline]
    pub fn dot(&self, values: &[f64]) -> f64 {
        self.entries.iter().map(|&(s, p)| p * values[s]).sum()
    }

    /// L1 distance between two beliefs.
    pub fn l1_distance(&self, other: &Belief) -> f64 {
        let (mut i, mut j) = (0, 0);
        let (a, b) = (&self.entries, &other.entries);
        let mut distance = 0.0;

        while i < a.len() && j < b.len() {
            match a[i].0.cmp(&b[j].0) {
                std::cmp::Ordering::Less => {
                    distance += a[i].1;
                    i += 1;
                }
                std::cmp::Ordering::Greater => {
                    distance += b[j].1;
                    j += 1;
                }
                std::cmp::Ordering::Equal => {
                    distance += (a[i].1 - b[j].1).abs();
                    i += 1;
                    j += 1;
                }
            }
        }
        distance += a[i..].iter().map(|&(_, p)| p).sum::<f64>();
        distance += b[j..].iter().map(|&(_, p)| p).sum::<f64>();
        distance
    }

    /// Sample a state from this belief.
    pub fn sample_state<R: Rng>(&self, rng: &mut R) -> usize {
        let r: f64 = rng.gen();
        let mut cumsum = 0.0;

        for &(s, p) in &self.entries {
            cumsum += p;
            if r < cumsum {
                return s;
            }
        }

        // Fallback to last state (handles floating point imprecision)
        self.entries.last().map(|&(s, _)| s).unwrap_or(0)
    }
}

/// How [`BeliefSet::expand`] chooses new points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpansionMethod {
    /// One random forward step per sample; every successful sample counts.
    Random,
    /// Like `Random`, but only samples that were actually inserted count.
    RandomUnique,
    /// For each member, simulate every action once and keep the successor
    /// farthest from the set.
    DistinctBeliefs,
}

/// Outcome of an expansion call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExpansionReport {
    /// Points actually inserted.
    pub added: usize,
    /// Forward simulations attempted.
    pub trials: usize,
}

/// Ordered set of beliefs, unique up to an L1 tolerance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BeliefSet {
    beliefs: Vec<Belief>,
    tolerance: f64,
}

impl Default for BeliefSet {
    fn default() -> Self {
        Self::new()
    }
}

impl BeliefSet {
    /// Default L1 distance below which two beliefs are considered equal.
    pub const DEFAULT_TOLERANCE: f64 = 1e-6;

    /// Empty set with the default tolerance.
    pub fn new() -> Self {
        Self::with_tolerance(Self::DEFAULT_TOLERANCE)
    }

    /// Empty set with a custom tolerance.
    pub fn with_tolerance(tolerance: f64) -> Self {
        Self {
            beliefs: Vec::new(),
            tolerance,
        }
    }

    /// Set containing only the model's initial belief.
    pub fn from_initial(model: &ModelStore) -> Self {
        let mut set = Self::new();
        set.add(model.initial_belief().clone());
        set
    }

    /// Build a set from beliefs, skipping near-duplicates.
    pub fn from_beliefs<I: IntoIterator<Item = Belief>>(beliefs: I, tolerance: f64) -> Self {
        let mut set = Self::with_tolerance(tolerance);
        for belief in beliefs {
            set.add(belief);
        }
        set
    }

    /// Insert `belief` unless an existing member is within the tolerance.
    pub fn add(&mut self, belief: Belief) -> bool {
        if self.contains_near(&belief) {
            return false;
        }
        self.beliefs.push(belief);
        true
    }

    /// Whether a member lies within the tolerance of `belief`.
    pub fn contains_near(&self, belief: &Belief) -> bool {
        self.beliefs
            .iter()
            .any(|member| member.l1_distance(belief) < self.tolerance)
    }

    /// Smallest L1 distance from `belief` to any member (infinite if empty).
    pub fn distance_to(&self, belief: &Belief) -> f64 {
        self.beliefs
            .iter()
            .map(|member| member.l1_distance(belief))
            .fold(f64::INFINITY, f64::min)
    }

    /// Number of points.
    pub fn len(&self) -> usize {
        self.beliefs.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.beliefs.is_empty()
    }

    /// Point by insertion index.
    pub fn get(&self, index: usize) -> Option<&Belief> {
        self.beliefs.get(index)
    }

    /// Iterate points in insertion order.
    pub fn iter(&self) -> std::slice::Iter<'_, Belief> {
        self.beliefs.iter()
    }

    /// All points in insertion order.
    pub fn as_slice(&self) -> &[Belief] {
        &self.beliefs
    }

    /// The deduplication tolerance.
    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    /// Widest support of any member (`rz`).
    pub fn max_support(&self) -> usize {
        self.beliefs.iter().map(Belief::support_len).max().unwrap_or(0)
    }

    /// Grow the set by forward simulation.
    ///
    /// Stops once `target` points have been counted (see [`ExpansionMethod`])
    /// or `max_trials` simulations have been attempted, whichever is first.
    /// Running out of trials is not an error; the report says how many points
    /// were actually added. An empty set is seeded with the model's initial
    /// belief first (not counted).
    pub fn expand<R: Rng>(
        &mut self,
        model: &ModelStore,
        method: ExpansionMethod,
        target: usize,
        max_trials: usize,
        rng: &mut R,
    ) -> ExpansionReport {
        if self.beliefs.is_empty() {
            self.add(model.initial_belief().clone());
        }

        let mut report = ExpansionReport::default();

        match method {
            ExpansionMethod::Random => {
                let mut counted = 0;
                while counted < target && report.trials < max_trials {
                    report.trials += 1;
                    if let Some(belief) = self.sample_forward(model, rng) {
                        counted += 1;
                        if self.add(belief) {
                            report.added += 1;
                        }
                    }
                }
            }
            ExpansionMethod::RandomUnique => {
                while report.added < target && report.trials < max_trials {
                    report.trials += 1;
                    if let Some(belief) = self.sample_forward(model, rng) {
                        if self.add(belief) {
                            report.added += 1;
                        }
                    }
                }
            }
            ExpansionMethod::DistinctBeliefs => {
                'rounds: while report.added < target && report.trials < max_trials {
                    let members = self.beliefs.len();
                    for index in 0..members {
                        if report.added >= target || report.trials >= max_trials {
                            break 'rounds;
                        }
                        let source = self.beliefs[index].clone();
                        let mut farthest: Option<(f64, Belief)> = None;

                        for action in 0..model.num_actions() {
                            if report.trials >= max_trials {
                                break;
                            }
                            report.trials += 1;
                            let Some(candidate) = simulate_step(model, &source, action, rng) else {
                                continue;
                            };
                            let distance = self.distance_to(&candidate);
                            if farthest.as_ref().map_or(true, |(best, _)| distance > *best) {
                                farthest = Some((distance, candidate));
                            }
                        }

                        if let Some((_, belief)) = farthest {
                            if self.add(belief) {
                                report.added += 1;
                            }
                        }
                    }
                }
            }
        }

        log::debug!(
            "expanded belief set with {:?}: {} added in {} trials ({} total)",
            method,
            report.added,
            report.trials,
            self.beliefs.len()
        );

        report
    }

    /// One random forward step from a random member.
    fn sample_forward<R: Rng>(&self, model: &ModelStore, rng: &mut R) -> Option<Belief> {
        let source = &self.beliefs[rng.gen_range(0..self.beliefs.len())];
        let action = rng.gen_range(0..model.num_actions());
        simulate_step(model, source, action, rng)
    }
}

/// Sample a true state, successor and observation, then apply the exact
/// belief update. `None` when the update is impossible.
fn simulate_step<R: Rng>(model: &ModelStore, belief: &Belief, action: usize, rng: &mut R) -> Option<Belief> {
    let state = belief.sample_state(rng);
    let (k, _) = model.sample_successor(state, action, rng)?;
    let observation = model.sample_observation(state, action, k, rng)?;
    model.belief_update(belief, action, observation)
}
