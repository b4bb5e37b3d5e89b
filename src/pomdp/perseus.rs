//! Perseus: randomised point-based value iteration.
//!
//! An iteration only backs up as many points as it takes to improve every
//! point of the set. Each new vector removes from the pending list every
//! belief it already improves, so one backup usually covers many points and
//! the vector set stays small.

use rand::Rng;

use crate::pomdp::backup::{backup, initial_lower_bound};
use crate::pomdp::belief::Belief;
use crate::pomdp::config::{Algorithm, SolveProgress, SolveStats, Termination};
use crate::pomdp::policy::Policy;
use crate::pomdp::solver::{budget_termination, progress, SolveContext, SolveOutcome};

pub(crate) fn solve<R, F>(
    context: &SolveContext<'_>,
    beliefs: &[Belief],
    rng: &mut R,
    callback: &mut F,
) -> SolveOutcome
where
    R: Rng,
    F: FnMut(&SolveProgress),
{
    let model = context.model;
    let config = context.config;

    let mut stats = SolveStats::new(Algorithm::Perseus);
    stats.belief_points = beliefs.len();
    stats.belief_support = beliefs.iter().map(Belief::support_len).max().unwrap_or(0);

    let mut policy = initial_lower_bound(model);

    loop {
        if stats.iterations >= config.max_iterations || context.budget.exhausted() {
            stats.termination = budget_termination(&context.budget);
            break;
        }

        // (maximiser index, V_old(b)) for every point.
        let current = &policy;
        let old: Vec<(usize, f64)> = context.backend.map(beliefs, |b| {
            let index = current.best_index(b).unwrap_or(0);
            (index, current.vectors()[index].dot(b))
        });

        // Points whose value under the new set has not yet reached V_old.
        let mut next = Policy::new(model.num_states());
        let mut pending: Vec<usize> = (0..beliefs.len()).collect();
        let mut backups = 0;

        while !pending.is_empty() {
            let pick = pending[rng.gen_range(0..pending.len())];
            let belief = &beliefs[pick];
            let (old_index, old_value) = old[pick];

            backups += 1;
            let added = match backup(model, belief, policy.vectors()) {
                Some(result) if result.value >= old_value => result.vector,
                // Guard: keep the old maximiser so V_new(b) >= V_old(b).
                _ => policy.vectors()[old_index].clone(),
            };

            // Every point the added vector already improves is done for this
            // iteration, the picked point included.
            pending.retain(|&j| j != pick && added.dot(&beliefs[j]) < old[j].1);
            if !next.vectors().contains(&added) {
                next.push(added);
            }
        }

        // Residual over the whole set, not only the backed-up points.
        let residual = beliefs
            .iter()
            .zip(&old)
            .map(|(b, &(_, old_value))| (next.value(b) - old_value).abs())
            .fold(0.0, f64::max);

        policy = next;
        stats.iterations += 1;
        stats.backups += backups;
        stats.residual = Some(residual);

        log::debug!(
            "perseus iteration {}: {} backups for {} points, {} vectors, residual {:.6}",
            stats.iterations,
            backups,
            beliefs.len(),
            policy.len(),
            residual
        );
        callback(&progress(stats.iterations, policy.len(), residual, &context.budget));

        if residual < config.epsilon {
            stats.termination = Termination::Converged;
            break;
        }
    }

    stats.alpha_vectors = policy.len();
    SolveOutcome { policy, stats }
}
