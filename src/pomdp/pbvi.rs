//! Point-based value iteration.
//!
//! Every iteration backs up every point of a fixed belief set against the
//! previous vector set, then keeps only the vectors that win somewhere on the
//! set. A backup that falls short of the previous value at its point is
//! replaced by the previous maximiser, so `V(b)` never decreases on the set.

use crate::pomdp::backup::{backup, initial_lower_bound};
use crate::pomdp::belief::Belief;
use crate::pomdp::config::{Algorithm, SolveProgress, SolveStats, Termination};
use crate::pomdp::policy::{AlphaVector, Policy};
use crate::pomdp::solver::{budget_termination, progress, SolveContext, SolveOutcome};

pub(crate) fn solve<F>(context: &SolveContext<'_>, beliefs: &[Belief], callback: &mut F) -> SolveOutcome
where
    F: FnMut(&SolveProgress),
{
    let model = context.model;
    let config = context.config;
    let backend = &context.backend;

    let mut stats = SolveStats::new(Algorithm::Pbvi);
    stats.belief_points = beliefs.len();
    stats.belief_support = beliefs.iter().map(Belief::support_len).max().unwrap_or(0);

    // Γ₀ lies below every policy, so the first backups can only raise it.
    let mut policy = initial_lower_bound(model);
    let mut values = backend.map(beliefs, |b| policy.value(b));

    loop {
        // Budgets are checked before any work so a spent budget costs nothing.
        if stats.iterations >= config.max_iterations || context.budget.exhausted() {
            stats.termination = budget_termination(&context.budget);
            break;
        }

        // Back up every point against the previous set. Points are
        // independent, so this is the parallel phase.
        let current = &policy;
        let candidates: Vec<Option<AlphaVector>> = backend.map_indices(beliefs.len(), |i| {
            let belief = &beliefs[i];
            match backup(model, belief, current.vectors()) {
                Some(result) if result.value >= values[i] => Some(result.vector),
                // Guard: a backup below V_old(b) yields to the old maximiser.
                _ => current.best_vector(belief).cloned(),
            }
        });
        stats.backups += beliefs.len();

        // Several points often produce the same vector.
        let mut next = Policy::new(model.num_states());
        for vector in candidates.into_iter().flatten() {
            if !next.vectors().contains(&vector) {
                next.push(vector);
            }
        }
        // Vectors that win at no point of the set do not affect V on the set.
        let pruned = next.prune_for_beliefs(beliefs);

        // Residual: largest change of V over the set.
        let next_values = backend.map(beliefs, |b| next.value(b));
        let residual = next_values
            .iter()
            .zip(&values)
            .map(|(new, old)| (new - old).abs())
            .fold(0.0, f64::max);

        policy = next;
        values = next_values;
        stats.iterations += 1;
        stats.residual = Some(residual);

        log::debug!(
            "pbvi iteration {}: {} vectors ({} pruned), residual {:.6}",
            stats.iterations,
            policy.len(),
            pruned,
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
