//! Heuristic search value iteration (HSVI2).
//!
//! Keeps a lower bound (alpha vectors) and an upper bound (corner values plus
//! interior belief points, sawtooth interpolation) on the optimal value and
//! tightens both along trials that descend from the initial belief:
//!
//! - act greedily on the upper bound,
//! - follow the observation with the largest probability-weighted gap,
//! - stop once the gap at depth `d` is at most `ε γ^-d`, the weighted gap is
//!   at most `delta`, or the horizon is reached,
//! - back up both bounds at every node on the way back to the root.
//!
//! The bounds live in a [`BoundPair`] behind an `RwLock` that is handed to
//! each trial. Updates only ever tighten a bound.

use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::pomdp::backup::backup;
use crate::pomdp::belief::Belief;
use crate::pomdp::config::{Algorithm, SolveProgress, SolveStats, Termination};
use crate::pomdp::mdp::{self, ValueIterationConfig};
use crate::pomdp::model::ModelStore;
use crate::pomdp::policy::{AlphaVector, Policy};
use crate::pomdp::solver::{progress, Backend, SolveContext, SolveOutcome};

/// Slack below which a bound change is treated as no change.
const IMPROVEMENT_TOLERANCE: f64 = 1e-12;

/// Per-action blind-policy iteration limits for the initial lower bound.
const BLIND_TOLERANCE: f64 = 1e-9;
const BLIND_MAX_ITERATIONS: usize = 10_000;

#[derive(Debug, Clone)]
struct UpperPoint {
    belief: Belief,
    value: f64,
    corner_value: f64,
}

/// Sawtooth upper bound: a value per simplex corner plus interior points.
///
/// `U(b) = min(b·c, min_i b·c + (v_i - b_i·c) min_{s ∈ supp b_i} b(s) / b_i(s))`
#[derive(Debug, Clone)]
pub struct UpperBound {
    corners: Vec<f64>,
    points: Vec<UpperPoint>,
}

impl UpperBound {
    /// Bound with the given corner values and no interior points.
    pub fn new(corners: Vec<f64>) -> Self {
        Self {
            corners,
            points: Vec::new(),
        }
    }

    /// Corner values.
    pub fn corners(&self) -> &[f64] {
        &self.corners
    }

    /// Number of interior points.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Whether there are no interior points.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Widest support among the interior points.
    pub fn max_support(&self) -> usize {
        self.points.iter().map(|point| point.belief.support_len()).max().unwrap_or(0)
    }

    /// `U(b)`.
    pub fn value(&self, belief: &Belief) -> f64 {
        self.value_excluding(belief, None)
    }

    fn value_excluding(&self, belief: &Belief, skip: Option<usize>) -> f64 {
        let corner = belief.dot(&self.corners);
        let mut best = corner;

        for (i, point) in self.points.iter().enumerate() {
            if Some(i) == skip {
                continue;
            }
            let mut ratio = f64::INFINITY;
            for &(s, p) in point.belief.entries() {
                ratio = ratio.min(belief.probability(s) / p);
                if ratio == 0.0 {
                    break;
                }
            }
            if ratio > 0.0 && ratio.is_finite() {
                best = best.min(corner + (point.value - point.corner_value) * ratio);
            }
        }

        best
    }

    /// Record `U(b) ≤ value`. Ignored unless it tightens the bound at `b`.
    /// Returns whether the bound changed.
    pub fn insert(&mut self, belief: &Belief, value: f64) -> bool {
        if value >= self.value(belief) - IMPROVEMENT_TOLERANCE {
            return false;
        }

        if let [(state, _)] = belief.entries() {
            self.corners[*state] = value;
            for point in &mut self.points {
                point.corner_value = point.belief.dot(&self.corners);
            }
            return true;
        }

        let corner_value = belief.dot(&self.corners);
        match self.points.iter_mut().find(|point| point.belief == *belief) {
            Some(point) => point.value = value,
            None => self.points.push(UpperPoint {
                belief: belief.clone(),
                value,
                corner_value,
            }),
        }
        true
    }

    /// Drop interior points the remaining points already imply. Returns how
    /// many were removed.
    pub fn prune(&mut self) -> usize {
        let before = self.points.len();
        let mut i = 0;
        while i < self.points.len() {
            let point = &self.points[i];
            if self.value_excluding(&point.belief, Some(i)) <= point.value + IMPROVEMENT_TOLERANCE {
                self.points.remove(i);
            } else {
                i += 1;
            }
        }
        before - self.points.len()
    }
}

/// The lower and upper bounds, updated together.
#[derive(Debug, Clone)]
pub struct BoundPair {
    /// Lower bound; becomes the returned policy.
    pub lower: Policy,
    /// Upper bound.
    pub upper: UpperBound,
}

impl BoundPair {
    /// Initial bounds: blind-policy vectors below, MDP values above.
    pub fn initial(model: &ModelStore, num_threads: Option<usize>) -> Self {
        let mut lower = Policy::new(model.num_states());
        for action in 0..model.num_actions() {
            lower.push(blind_policy_vector(model, action));
        }

        let config = ValueIterationConfig {
            num_threads,
            ..Default::default()
        };
        let backend = Backend::acquire(num_threads);
        let corners = mdp::run(model, &config, &backend).values;

        Self {
            lower,
            upper: UpperBound::new(corners),
        }
    }

    /// `U(b) - L(b)`.
    pub fn gap(&self, belief: &Belief) -> f64 {
        self.upper.value(belief) - self.lower.value(belief)
    }
}

/// Value of repeating `action` forever, iterated up from `R_min / (1 - γ)`.
fn blind_policy_vector(model: &ModelStore, action: usize) -> AlphaVector {
    let n = model.num_states();
    let gamma = model.gamma();
    let mut values = vec![model.min_reward() / (1.0 - gamma); n];

    for _ in 0..BLIND_MAX_ITERATIONS {
        let next: Vec<f64> = (0..n)
            .map(|s| {
                let future: f64 = model.successors(s, action).map(|(_, s2, t)| t * values[s2]).sum();
                model.reward(s, action) + gamma * future
            })
            .collect();
        let change = next
            .iter()
            .zip(&values)
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f64::max);
        values = next;
        if change < BLIND_TOLERANCE {
            break;
        }
    }

    AlphaVector::new(action, values)
}

fn read(bounds: &RwLock<BoundPair>) -> RwLockReadGuard<'_, BoundPair> {
    bounds.read().unwrap_or_else(PoisonError::into_inner)
}

fn write(bounds: &RwLock<BoundPair>) -> RwLockWriteGuard<'_, BoundPair> {
    bounds.write().unwrap_or_else(PoisonError::into_inner)
}

/// `max_a Q_U(b, a)` with its argmax (lowest action on ties).
fn upper_action(model: &ModelStore, upper: &UpperBound, belief: &Belief) -> (usize, f64) {
    let mut best = (0, f64::NEG_INFINITY);
    for action in 0..model.num_actions() {
        let future: f64 = model
            .successor_branches(belief, action)
            .iter()
            .filter_map(|branch| branch.belief().map(|next| branch.probability * upper.value(&next)))
            .sum();
        let q = model.expected_reward(belief, action) + model.gamma() * future;
        if q > best.1 {
            best = (action, q);
        }
    }
    best
}

/// Successor with the largest `Pr(o) · gap`, lowest observation on ties.
fn most_uncertain_successor(
    model: &ModelStore,
    bounds: &BoundPair,
    belief: &Belief,
    action: usize,
) -> Option<(Belief, f64)> {
    let mut best: Option<(Belief, f64)> = None;
    for branch in model.successor_branches(belief, action) {
        let Some(next) = branch.belief() else {
            continue;
        };
        let weighted = branch.probability * bounds.gap(&next);
        if best.as_ref().map_or(true, |(_, w)| weighted > *w) {
            best = Some((next, weighted));
        }
    }
    best
}

struct Limits {
    epsilon: f64,
    delta: f64,
    horizon: usize,
    max_vectors: usize,
}

#[derive(Debug, Default)]
struct TrialReport {
    depth: usize,
    backups: usize,
    saturated: bool,
}

/// One descent from `root` followed by updates on the way back.
fn run_trial(model: &ModelStore, bounds: &RwLock<BoundPair>, root: &Belief, limits: &Limits) -> TrialReport {
    let mut report = TrialReport::default();
    let mut path: Vec<Belief> = Vec::new();
    let mut belief = root.clone();

    // Descent: only read access is needed until the path is known.
    loop {
        let depth = path.len();
        let guard = read(bounds);
        // The gap allowed at depth d grows as ε γ^-d.
        let threshold = limits.epsilon * model.gamma().powf(-(depth as f64));
        if depth >= limits.horizon || guard.gap(&belief) <= threshold {
            break;
        }

        // Act greedily on the upper bound, then follow the observation whose
        // successor contributes most to the gap.
        let (action, _) = upper_action(model, &guard.upper, &belief);
        let next = most_uncertain_successor(model, &guard, &belief, action);
        drop(guard);

        // A node that passed the gap test is updated even if the descent
        // stops below it on `delta`.
        path.push(belief);
        match next {
            Some((child, weighted)) if weighted > limits.delta => belief = child,
            _ => break,
        }
    }
    report.depth = path.len();

    // Updates run deepest first so each node sees its children's new bounds.
    for node in path.iter().rev() {
        let mut guard = write(bounds);

        // Lower bound: add the backup only if it raises L(b) and fits the cap.
        let backed_up = backup(model, node, guard.lower.vectors());
        if let Some(result) = backed_up {
            report.backups += 1;
            if result.value > guard.lower.value(node) + IMPROVEMENT_TOLERANCE {
                if guard.lower.len() < limits.max_vectors {
                    guard.lower.push(result.vector);
                } else {
                    report.saturated = true;
                }
            }
        }

        // Upper bound: insert ignores anything that does not tighten U(b).
        let (_, q) = upper_action(model, &guard.upper, node);
        guard.upper.insert(node, q);
    }

    report
}

/// Remove dominated lower vectors and implied upper points, keeping the root
/// upper value from loosening.
fn prune(bounds: &RwLock<BoundPair>, root: &Belief) -> (usize, usize) {
    let mut guard = write(bounds);
    let root_upper = guard.upper.value(root);

    let lower_removed = guard.lower.remove_dominated();
    let upper_removed = guard.upper.prune();

    if guard.upper.value(root) > root_upper {
        guard.upper.insert(root, root_upper);
    }
    (lower_removed, upper_removed)
}

pub(crate) fn solve<F>(context: &SolveContext<'_>, callback: &mut F) -> SolveOutcome
where
    F: FnMut(&SolveProgress),
{
    let model = context.model;
    let config = context.config;
    let params = &config.hsvi2;
    let root = model.initial_belief().clone();

    let limits = Limits {
        epsilon: config.epsilon,
        delta: params.delta,
        horizon: model.horizon(),
        max_vectors: params.max_alpha_vectors.unwrap_or_else(|| {
            model
                .num_states()
                .max(model.num_actions())
                .saturating_add(params.trials.saturating_mul(model.horizon()))
                .saturating_add(1)
        }),
    };

    let bounds = RwLock::new(BoundPair::initial(model, config.num_threads));
    let mut stats = SolveStats::new(Algorithm::Hsvi2);
    let mut saturated = false;
    let (mut lower_at_prune, mut upper_at_prune) = {
        let guard = read(&bounds);
        (guard.lower.len(), guard.upper.len())
    };

    loop {
        let gap = read(&bounds).gap(&root);
        if gap <= config.epsilon {
            stats.termination = Termination::Converged;
            break;
        }
        if saturated {
            stats.termination = Termination::VectorLimit;
            break;
        }
        if stats.iterations >= params.trials {
            stats.termination = Termination::IterationLimit;
            break;
        }
        if context.budget.exhausted() {
            stats.termination = Termination::TimeLimit;
            break;
        }

        let report = run_trial(model, &bounds, &root, &limits);
        stats.iterations += 1;
        stats.backups += report.backups;
        saturated |= report.saturated;

        let (lower_len, upper_len) = {
            let guard = read(&bounds);
            (guard.lower.len(), guard.upper.len())
        };
        let growth = params.prune_growth_threshold;
        if lower_len as f64 > lower_at_prune as f64 * (1.0 + growth)
            || upper_len as f64 > upper_at_prune as f64 * (1.0 + growth)
        {
            let (lower_removed, upper_removed) = prune(&bounds, &root);
            log::debug!(
                "hsvi2 prune: {} lower vectors, {} upper points removed",
                lower_removed,
                upper_removed
            );
            let guard = read(&bounds);
            lower_at_prune = guard.lower.len();
            upper_at_prune = guard.upper.len();
        }

        let guard = read(&bounds);
        let gap = guard.gap(&root);
        log::debug!(
            "hsvi2 trial {}: depth {}, {} lower vectors, {} upper points, gap {:.6}",
            stats.iterations,
            report.depth,
            guard.lower.len(),
            guard.upper.len(),
            gap
        );
        callback(&progress(stats.iterations, guard.lower.len(), gap, &context.budget));
    }

    let BoundPair { lower, upper } = bounds.into_inner().unwrap_or_else(PoisonError::into_inner);
    stats.lower_bound = Some(lower.value(&root));
    stats.upper_bound = Some(upper.value(&root));
    stats.belief_points = upper.len();
    stats.belief_support = upper.max_support().max(root.support_len());
    stats.alpha_vectors = lower.len();

    SolveOutcome { policy: lower, stats }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::{coin, tiger};
    use crate::pomdp::belief::BeliefSet;
    use crate::pomdp::config::{Hsvi2Params, SolverConfig};
    use crate::pomdp::solver::Solver;
    use float_eq::assert_float_eq;

    #[test]
    fn test_upper_bound_sawtooth() {
        let mut upper = UpperBound::new(vec![10.0, 10.0]);
        let uniform = Belief::uniform(2);
        assert_eq!(upper.value(&uniform), 10.0);

        assert!(upper.insert(&uniform, 8.0));
        assert!(!upper.insert(&uniform, 9.0));
        assert_eq!(upper.len(), 1);
        assert_float_eq!(upper.value(&uniform), 8.0, abs <= 1e-12);

        // Halfway to a corner: min ratio 0.5, so half the interior improvement.
        let skewed = Belief::from_dense(&[0.75, 0.25]).unwrap();
        assert_float_eq!(upper.value(&skewed), 9.0, abs <= 1e-12);
        assert_eq!(upper.value(&Belief::point(0)), 10.0);

        assert!(upper.insert(&Belief::point(0), 6.0));
        assert_eq!(upper.corners(), &[6.0, 10.0]);
        assert!(upper.value(&uniform) <= 8.0);
    }

    #[test]
    fn test_upper_prune_keeps_needed_points() {
        let mut upper = UpperBound::new(vec![10.0, 10.0]);
        let uniform = Belief::uniform(2);
        let skewed = Belief::from_dense(&[0.75, 0.25]).unwrap();
        upper.insert(&uniform, 8.0);
        // Implied by the uniform point (9.0 there), so not inserted.
        assert!(!upper.insert(&skewed, 9.0));
        upper.insert(&skewed, 8.5);

        assert_eq!(upper.prune(), 0);
        assert_float_eq!(upper.value(&uniform), 8.0, abs <= 1e-12);
        assert_float_eq!(upper.value(&skewed), 8.5, abs <= 1e-12);
    }

    #[test]
    fn test_initial_bounds_bracket_value() {
        let model = tiger::standard().unwrap();
        let bounds = BoundPair::initial(&model, Some(1));
        let b0 = model.initial_belief();

        assert_eq!(bounds.lower.len(), model.num_actions());
        // Listening forever costs 1 per step.
        assert_float_eq!(bounds.lower.value(b0), -1.0 / (1.0 - model.gamma()), abs <= 1e-6);
        assert_float_eq!(bounds.upper.value(b0), 200.0, abs <= 1e-6);
        assert!(bounds.lower.value(b0) <= tiger::OPTIMAL_VALUE);
        assert!(bounds.upper.value(b0) >= tiger::OPTIMAL_VALUE);
    }

    #[test]
    fn test_coin_converges_to_closed_form() {
        let model = coin::standard().unwrap();
        let config = SolverConfig::hsvi2().with_threads(1).with_epsilon(0.01);
        let mut solver = Solver::new(&model, config).unwrap();
        let outcome = solver.solve(&BeliefSet::new());

        assert!(outcome.stats.converged());
        let gap = outcome.stats.gap().unwrap();
        assert!(gap <= 0.01 && gap >= -1e-9, "gap {}", gap);
        assert_float_eq!(outcome.stats.lower_bound.unwrap(), coin::OPTIMAL_VALUE, abs <= 0.01);
        assert_float_eq!(outcome.stats.upper_bound.unwrap(), coin::OPTIMAL_VALUE, abs <= 0.01);
        assert_eq!(outcome.policy.action(model.initial_belief()), coin::GUESS_HEADS);
    }

    #[test]
    fn test_tiger_gap_never_increases() {
        let model = tiger::standard().unwrap();
        let params = Hsvi2Params {
            trials: 10,
            ..Default::default()
        };
        let config = SolverConfig::hsvi2().with_threads(1).with_hsvi2(params);
        let mut solver = Solver::new(&model, config).unwrap();

        let mut gaps = Vec::new();
        let outcome = solver.solve_with_callback(&BeliefSet::new(), |p| gaps.push(p.residual));

        assert!(!gaps.is_empty() && gaps.len() <= 10);
        for pair in gaps.windows(2) {
            assert!(pair[1] <= pair[0] + 1e-9, "gap grew from {} to {}", pair[0], pair[1]);
        }
        let lower = outcome.stats.lower_bound.unwrap();
        let upper = outcome.stats.upper_bound.unwrap();
        assert!(lower <= tiger::OPTIMAL_VALUE + 1e-6);
        assert!(upper >= tiger::OPTIMAL_VALUE - 1e-6);
        assert!(upper - lower < 220.0);
    }

    #[test]
    fn test_vector_cap_stops_solve() {
        let model = tiger::standard().unwrap();
        let params = Hsvi2Params {
            max_alpha_vectors: Some(model.num_actions()),
            ..Default::default()
        };
        let config = SolverConfig::hsvi2().with_threads(1).with_hsvi2(params);
        let outcome = Solver::new(&model, config).unwrap().solve(&BeliefSet::new());

        assert_eq!(outcome.stats.termination, Termination::VectorLimit);
        assert!(outcome.policy.len() <= model.num_actions());
        assert_eq!(outcome.stats.iterations, 1);
    }
}
