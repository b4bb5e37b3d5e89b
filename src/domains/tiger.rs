//! The tiger problem (Kaelbling, Littman & Cassandra, 1998).
//!
//! ## Rules
//!
//! - A tiger is behind the left or the right door, equally likely at first
//! - Listening costs 1 and reports the tiger's side correctly 85% of the time
//! - Opening the door without the tiger pays 10, opening the tiger's door costs 100
//! - After a door is opened the tiger is placed again uniformly at random, and
//!   the observation that follows carries no information
//!
//! ## Known Value
//!
//! With `γ = 0.95` the optimal value at the uniform belief is about 19.37.
//! The optimal policy listens until the evidence is two hears ahead on one
//! side, then opens the other door.

use crate::pomdp::model::{ModelBuilder, ModelError, ModelStore, DEFAULT_HORIZON};

/// Tiger behind the left door.
pub const TIGER_LEFT: usize = 0;
/// Tiger behind the right door.
pub const TIGER_RIGHT: usize = 1;

/// Listen for the tiger.
pub const LISTEN: usize = 0;
/// Open the left door.
pub const OPEN_LEFT: usize = 1;
/// Open the right door.
pub const OPEN_RIGHT: usize = 2;

/// Heard the tiger on the left.
pub const HEAR_LEFT: usize = 0;
/// Heard the tiger on the right.
pub const HEAR_RIGHT: usize = 1;

/// Optimal value at the uniform belief for [`TigerConfig::default`].
pub const OPTIMAL_VALUE: f64 = 19.371368374803893;

/// Parameters of the tiger problem.
#[derive(Debug, Clone)]
pub struct TigerConfig {
    /// Probability that listening reports the correct side.
    pub listen_accuracy: f64,
    /// Reward for listening (negative).
    pub listen_reward: f64,
    /// Reward for opening the door without the tiger.
    pub treasure_reward: f64,
    /// Reward for opening the tiger's door (negative).
    pub tiger_reward: f64,
    /// Discount factor.
    pub gamma: f64,
    /// Planning and rollout horizon.
    pub horizon: usize,
}

impl Default for TigerConfig {
    fn default() -> Self {
        Self {
            listen_accuracy: 0.85,
            listen_reward: -1.0,
            treasure_reward: 10.0,
            tiger_reward: -100.0,
            gamma: 0.95,
            horizon: DEFAULT_HORIZON,
        }
    }
}

/// Build the tiger problem.
pub fn tiger(config: &TigerConfig) -> Result<ModelStore, ModelError> {
    let mut builder = ModelBuilder::new(2, 3, 2);
    builder.gamma(config.gamma).horizon(config.horizon);

    for state in [TIGER_LEFT, TIGER_RIGHT] {
        builder
            .transition(state, LISTEN, state, 1.0)
            .reward(state, LISTEN, config.listen_reward);

        for door in [OPEN_LEFT, OPEN_RIGHT] {
            builder
                .transition(state, door, TIGER_LEFT, 0.5)
                .transition(state, door, TIGER_RIGHT, 0.5);
        }

        let (safe, unsafe_door) = if state == TIGER_LEFT {
            (OPEN_RIGHT, OPEN_LEFT)
        } else {
            (OPEN_LEFT, OPEN_RIGHT)
        };
        builder
            .reward(state, safe, config.treasure_reward)
            .reward(state, unsafe_door, config.tiger_reward);
    }

    let accuracy = config.listen_accuracy;
    builder
        .observation(LISTEN, TIGER_LEFT, HEAR_LEFT, accuracy)
        .observation(LISTEN, TIGER_LEFT, HEAR_RIGHT, 1.0 - accuracy)
        .observation(LISTEN, TIGER_RIGHT, HEAR_LEFT, 1.0 - accuracy)
        .observation(LISTEN, TIGER_RIGHT, HEAR_RIGHT, accuracy);
    for door in [OPEN_LEFT, OPEN_RIGHT] {
        for next in [TIGER_LEFT, TIGER_RIGHT] {
            builder
                .observation(door, next, HEAR_LEFT, 0.5)
                .observation(door, next, HEAR_RIGHT, 0.5);
        }
    }

    builder.build()
}

/// The standard tiger problem.
pub fn standard() -> Result<ModelStore, ModelError> {
    tiger(&TigerConfig::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pomdp::belief::Belief;

    #[test]
    fn test_tiger_dimensions() {
        let model = standard().unwrap();
        assert_eq!(model.num_states(), 2);
        assert_eq!(model.num_actions(), 3);
        assert_eq!(model.num_observations(), 2);
        assert_eq!(model.max_successors(), 2);
        assert_eq!(model.min_reward(), -100.0);
        assert_eq!(model.max_reward(), 10.0);
        assert_eq!(model.initial_belief(), &Belief::uniform(2));
    }

    #[test]
    fn test_tiger_listen_update() {
        let model = standard().unwrap();
        let heard = model
            .belief_update(model.initial_belief(), LISTEN, HEAR_LEFT)
            .unwrap();
        assert!((heard.probability(TIGER_LEFT) - 0.85).abs() < 1e-12);

        // Opening resets the problem whatever is heard.
        let reset = model.belief_update(&heard, OPEN_LEFT, HEAR_RIGHT).unwrap();
        assert!(reset.l1_distance(&Belief::uniform(2)) < 1e-12);
    }

    #[test]
    fn test_tiger_rewards() {
        let model = standard().unwrap();
        assert_eq!(model.reward(TIGER_LEFT, OPEN_RIGHT), 10.0);
        assert_eq!(model.reward(TIGER_LEFT, OPEN_LEFT), -100.0);
        assert_eq!(model.reward(TIGER_RIGHT, OPEN_LEFT), 10.0);
        assert_eq!(model.reward(TIGER_RIGHT, LISTEN), -1.0);
    }

    #[test]
    fn test_invalid_accuracy_rejected() {
        let config = TigerConfig {
            listen_accuracy: 1.5,
            ..Default::default()
        };
        assert!(tiger(&config).unwrap_err().is_malformed());
    }
}
