//! Coin reveal: a two-state problem with a closed-form value.
//!
//! A coin lies heads or tails and never moves. Each step the agent guesses a
//! face (reward 1 if right, 0 otherwise) or waits (reward 0). After any action
//! the coin is shown, so from the second step on the state is known.
//!
//! From the uniform belief the best first move is a blind guess worth 0.5,
//! followed by a correct guess every step: `V*(b0) = 0.5 + γ / (1 - γ)`.

use crate::pomdp::belief::Belief;
use crate::pomdp::model::{ModelBuilder, ModelError, ModelStore};

/// The coin shows heads.
pub const HEADS: usize = 0;
/// The coin shows tails.
pub const TAILS: usize = 1;

/// Guess heads.
pub const GUESS_HEADS: usize = 0;
/// Guess tails.
pub const GUESS_TAILS: usize = 1;
/// Wait without guessing.
pub const WAIT: usize = 2;

/// Discount factor of [`standard`].
pub const GAMMA: f64 = 0.9;

/// `V*(b0)` for [`standard`].
pub const OPTIMAL_VALUE: f64 = 0.5 + GAMMA / (1.0 - GAMMA);

/// Build the coin problem with discount `gamma`.
pub fn coin(gamma: f64) -> Result<ModelStore, ModelError> {
    let mut builder = ModelBuilder::new(2, 3, 2);
    builder.gamma(gamma);

    for state in [HEADS, TAILS] {
        for action in [GUESS_HEADS, GUESS_TAILS, WAIT] {
            builder
                .transition(state, action, state, 1.0)
                .observation(action, state, state, 1.0);
        }
        let correct = if state == HEADS { GUESS_HEADS } else { GUESS_TAILS };
        builder.reward(state, correct, 1.0);
    }

    builder.build()
}

/// The coin problem with `γ = 0.9`.
pub fn standard() -> Result<ModelStore, ModelError> {
    coin(GAMMA)
}

/// Uniform belief plus both certain beliefs: every belief the problem reaches.
pub fn standard_beliefs() -> Vec<Belief> {
    vec![Belief::uniform(2), Belief::point(HEADS), Belief::point(TAILS)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coin_model() {
        let model = standard().unwrap();
        assert_eq!(model.max_successors(), 1);
        assert_eq!(model.reward(HEADS, GUESS_HEADS), 1.0);
        assert_eq!(model.reward(HEADS, GUESS_TAILS), 0.0);
        assert_eq!(model.reward(TAILS, WAIT), 0.0);
        assert_eq!(model.min_reward(), 0.0);
    }

    #[test]
    fn test_coin_reveals_state() {
        let model = standard().unwrap();
        let shown = model.belief_update(model.initial_belief(), WAIT, TAILS).unwrap();
        assert_eq!(shown, Belief::point(TAILS));
        assert!(model.belief_update(&shown, WAIT, HEADS).is_none());
    }
}
