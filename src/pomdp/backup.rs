//! The point-based Bellman backup shared by every solver.
//!
//! For a belief `b` and vector set `Γ`:
//!
//! ```text
//! α_a(s) = R(s, a) + γ Σ_{s'} T(s, a, s') Σ_o O(s, a, s', o) α_{a,o}(s')
//! α_{a,o} = argmax_{α ∈ Γ} Σ_{s'} Pr(s', o | b, a) α(s')
//! backup(b, Γ) = argmax_a α_a · b
//! ```
//!
//! Every argmax uses strict `>` so ties go to the lowest index: lowest action,
//! then earliest vector in `Γ`.

use crate::pomdp::belief::Belief;
use crate::pomdp::model::ModelStore;
use crate::pomdp::policy::{AlphaVector, Policy};

/// Result of backing up one belief point.
#[derive(Debug, Clone, PartialEq)]
pub struct BackupResult {
    /// The new action-tagged vector.
    pub vector: AlphaVector,
    /// `vector · b`.
    pub value: f64,
}

/// Back up `belief` against `vectors`.
///
/// # Arguments
/// * `model` - The model supplying rewards, successors and observations
/// * `belief` - The point to back up
/// * `vectors` - The current vector set `Γ`
///
/// Returns `None` when `vectors` is empty, since there is nothing to select
/// the continuation from.
pub fn backup(model: &ModelStore, belief: &Belief, vectors: &[AlphaVector]) -> Option<BackupResult> {
    let first = action_backup(model, belief, 0, vectors)?;
    let mut best = BackupResult {
        value: belief.dot(&first),
        vector: AlphaVector::new(0, first),
    };

    for action in 1..model.num_actions() {
        let values = action_backup(model, belief, action, vectors)?;
        let value = belief.dot(&values);
        // Strict: the lowest action keeps ties.
        if value > best.value {
            best = BackupResult {
                vector: AlphaVector::new(action, values),
                value,
            };
        }
    }

    Some(best)
}

/// The candidate vector `α_a` for a single action, or `None` for an empty `Γ`.
pub fn action_backup(
    model: &ModelStore,
    belief: &Belief,
    action: usize,
    vectors: &[AlphaVector],
) -> Option<Vec<f64>> {
    if vectors.is_empty() {
        return None;
    }

    // Unreachable observations keep vector 0: every vector scores zero there.
    let mut selected = vec![0usize; model.num_observations()];
    for branch in model.successor_branches(belief, action) {
        selected[branch.observation] = best_for_weights(vectors, &branch.weights);
    }

    let gamma = model.gamma();
    let values = (0..model.num_states())
        .map(|s| {
            let mut future = 0.0;
            for (k, next, t) in model.successors(s, action) {
                for &(o, q) in model.observations(s, action, k) {
                    future += t * q * vectors[selected[o]].values[next];
                }
            }
            model.reward(s, action) + gamma * future
        })
        .collect();
    Some(values)
}

/// Index of the vector maximising `Σ w(s') α(s')` over sparse weights.
fn best_for_weights(vectors: &[AlphaVector], weights: &[(usize, f64)]) -> usize {
    let mut best = 0;
    let mut best_value = f64::NEG_INFINITY;

    for (i, vector) in vectors.iter().enumerate() {
        let value: f64 = weights.iter().map(|&(s, w)| w * vector.values[s]).sum();
        if value > best_value {
            best = i;
            best_value = value;
        }
    }

    best
}

/// `Γ₀`: a single vector at `R_min / (1 - γ)`, a lower bound on every policy.
pub fn initial_lower_bound(model: &ModelStore) -> Policy {
    let mut policy = Policy::new(model.num_states());
    policy.push(AlphaVector::constant(
        model.num_states(),
        model.min_reward() / (1.0 - model.gamma()),
        0,
    ));
    policy
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::tiger;

    #[test]
    fn test_backup_from_initial_bound() {
        let model = tiger::standard().unwrap();
        let gamma0 = initial_lower_bound(&model);
        let floor = model.min_reward() / (1.0 - model.gamma());

        let result = backup(&model, model.initial_belief(), gamma0.vectors()).unwrap();

        // Listening costs 1, opening costs 45 in expectation at the uniform belief.
        assert_eq!(result.vector.action, tiger::LISTEN);
        assert!((result.value - (-1.0 + model.gamma() * floor)).abs() < 1e-9);
        assert!(result.value >= gamma0.value(model.initial_belief()));
    }

    #[test]
    fn test_backup_value_matches_dot() {
        let model = tiger::standard().unwrap();
        let policy = initial_lower_bound(&model);
        let belief = Belief::from_dense(&[0.97, 0.03]).unwrap();

        let result = backup(&model, &belief, policy.vectors()).unwrap();
        assert_eq!(result.value, result.vector.dot(&belief));
        assert_eq!(result.vector.values.len(), model.num_states());
    }

    #[test]
    fn test_backup_prefers_informative_vectors() {
        let model = tiger::standard().unwrap();
        let vectors = vec![
            AlphaVector::new(tiger::OPEN_RIGHT, vec![10.0, -100.0]),
            AlphaVector::new(tiger::OPEN_LEFT, vec![-100.0, 10.0]),
            AlphaVector::new(tiger::LISTEN, vec![-1.0, -1.0]),
        ];

        // Tiger probably on the left: one more listen beats opening right now.
        let belief = Belief::from_dense(&[0.85, 0.15]).unwrap();
        let values = action_backup(&model, &belief, tiger::LISTEN, &vectors).unwrap();
        let listen = belief.dot(&values);
        let open = belief.dot(&action_backup(&model, &belief, tiger::OPEN_RIGHT, &vectors).unwrap());
        assert!(listen > open);
    }

    #[test]
    fn test_backup_of_empty_set_is_none() {
        let model = tiger::standard().unwrap();
        assert!(backup(&model, model.initial_belief(), &[]).is_none());
        assert!(action_backup(&model, model.initial_belief(), tiger::LISTEN, &[]).is_none());
    }
}
