//! Alpha vectors and the piecewise-linear policy they form.

use std::fs::File;
use std::io::{BufReader, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pomdp::belief::Belief;

/// Errors from building, saving or loading a [`Policy`].
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum PolicyError {
    #[error("alpha vector {index} has {actual} entries, expected {expected}")]
    DimensionMismatch {
        index: usize,
        actual: usize,
        expected: usize,
    },

    #[error("policy I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("policy serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// A dense linear function of the belief, tagged with the action that
/// achieves it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlphaVector {
    /// Action tag.
    pub action: usize,
    /// One value per state.
    pub values: Vec<f64>,
}

impl AlphaVector {
    /// Create a vector.
    pub fn new(action: usize, values: Vec<f64>) -> Self {
        Self { action, values }
    }

    /// Vector with every entry equal to `value`.
    pub fn constant(num_states: usize, value: f64, action: usize) -> Self {
        Self {
            action,
            values: vec![value; num_states],
        }
    }

    /// `α · b`.
    #[inline]
    pub fn dot(&self, belief: &Belief) -> f64 {
        belief.dot(&self.values)
    }

    /// Whether `self` is at least `other` in every state.
    pub fn dominates(&self, other: &AlphaVector) -> bool {
        self.values
            .iter()
            .zip(other.values.iter())
            .all(|(&a, &b)| a >= b)
    }
}

/// A finite set of alpha vectors.
///
/// `V(b) = max_α α·b`; the action is the tag of the maximiser. Ties go to the
/// lowest action index, then to the earliest inserted vector, so the result
/// does not depend on vector order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    num_states: usize,
    vectors: Vec<AlphaVector>,
}

impl Policy {
    /// Empty policy over `num_states` states.
    pub fn new(num_states: usize) -> Self {
        Self {
            num_states,
            vectors: Vec::new(),
        }
    }

    /// Policy from existing vectors, checking their dimensions.
    pub fn from_vectors(num_states: usize, vectors: Vec<AlphaVector>) -> Result<Self, PolicyError> {
        for (index, vector) in vectors.iter().enumerate() {
            if vector.values.len() != num_states {
                return Err(PolicyError::DimensionMismatch {
                    index,
                    actual: vector.values.len(),
                    expected: num_states,
                });
            }
        }
        Ok(Self { num_states, vectors })
    }

    /// Number of states each vector spans.
    pub fn num_states(&self) -> usize {
        self.num_states
    }

    /// The vectors in insertion order.
    pub fn vectors(&self) -> &[AlphaVector] {
        &self.vectors
    }

    /// Number of vectors.
    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    /// Whether the policy has no vectors.
    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// Append a vector.
    pub fn push(&mut self, vector: AlphaVector) {
        debug_assert_eq!(vector.values.len(), self.num_states);
        self.vectors.push(vector);
    }

    /// Index of the maximising vector at `belief` (tie-broken as documented on
    /// [`Policy`]), or `None` for an empty policy.
    pub fn best_index(&self, belief: &Belief) -> Option<usize> {
        let mut best: Option<(usize, f64)> = None;

        for (i, vector) in self.vectors.iter().enumerate() {
            let value = vector.dot(belief);
            best = match best {
                Some((j, v))
                    if value < v || (value == v && vector.action >= self.vectors[j].action) =>
                {
                    Some((j, v))
                }
                _ => Some((i, value)),
            };
        }

        best.map(|(i, _)| i)
    }

    /// Maximising vector at `belief`.
    pub fn best_vector(&self, belief: &Belief) -> Option<&AlphaVector> {
        self.best_index(belief).map(|i| &self.vectors[i])
    }

    /// `(V(b), action)`. An empty policy yields `(-inf, 0)`.
    pub fn value_and_action(&self, belief: &Belief) -> (f64, usize) {
        match self.best_vector(belief) {
            Some(vector) => (vector.dot(belief), vector.action),
            None => (f64::NEG_INFINITY, 0),
        }
    }

    /// `V(b)`.
    pub fn value(&self, belief: &Belief) -> f64 {
        self.value_and_action(belief).0
    }

    /// Greedy action at `b`.
    pub fn action(&self, belief: &Belief) -> usize {
        self.value_and_action(belief).1
    }

    /// Keep only vectors that are the (tie-broken) maximiser at one or more of
    /// `beliefs`. Values at those beliefs are unchanged. Returns how many
    /// vectors were removed. A no-op when `beliefs` is empty.
    pub fn prune_for_beliefs(&mut self, beliefs: &[Belief]) -> usize {
        if beliefs.is_empty() || self.vectors.is_empty() {
            return 0;
        }

        let mut used = vec![false; self.vectors.len()];
        for belief in beliefs {
            if let Some(i) = self.best_index(belief) {
                used[i] = true;
            }
        }

        let before = self.vectors.len();
        let mut flags = used.into_iter();
        self.vectors.retain(|_| flags.next().unwrap_or(false));
        before - self.vectors.len()
    }

    /// Remove vectors that another vector dominates in every state. Of two
    /// identical vectors the earlier one survives. Values are unchanged
    /// everywhere on the simplex. Returns how many vectors were removed.
    pub fn remove_dominated(&mut self) -> usize {
        let count = self.vectors.len();
        let mut keep = vec![true; count];

        for i in 0..count {
            for j in 0..count {
                if i == j || !keep[j] {
                    continue;
                }
                let (vi, vj) = (&self.vectors[i], &self.vectors[j]);
                if vj.dominates(vi) && (!vi.dominates(vj) || j < i) {
                    keep[i] = false;
                    break;
                }
            }
        }

        let mut flags = keep.into_iter();
        self.vectors.retain(|_| flags.next().unwrap_or(true));
        count - self.vectors.len()
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String, PolicyError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse from JSON, checking vector dimensions.
    pub fn from_json(json: &str) -> Result<Self, PolicyError> {
        let policy: Policy = serde_json::from_str(json)?;
        Self::from_vectors(policy.num_states, policy.vectors)
    }

    /// Write the policy as JSON.
    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<(), PolicyError> {
        let json = self.to_json()?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }

    /// Read a policy written by [`Policy::save_json`].
    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self, PolicyError> {
        let reader = BufReader::new(File::open(path)?);
        let policy: Policy = serde_json::from_reader(reader)?;
        Self::from_vectors(policy.num_states, policy.vectors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_policy() -> Policy {
        Policy::from_vectors(
            2,
            vec![
                AlphaVector::new(2, vec![1.0, 0.0]),
                AlphaVector::new(1, vec![0.0, 1.0]),
                AlphaVector::new(0, vec![0.4, 0.4]),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_value_and_action() {
        let policy = sample_policy();
        assert_eq!(policy.value_and_action(&Belief::point(0)), (1.0, 2));
        assert_eq!(policy.value_and_action(&Belief::point(1)), (1.0, 1));

        // The first two vectors tie here; the lower action wins.
        let uniform = Belief::uniform(2);
        assert_eq!(policy.value_and_action(&uniform), (0.5, 1));
    }

    #[test]
    fn test_value_and_action_is_order_independent() {
        let policy = sample_policy();
        let mut reversed = policy.vectors().to_vec();
        reversed.reverse();
        let reversed = Policy::from_vectors(2, reversed).unwrap();

        for p in [0.0, 0.2, 0.5, 0.7, 1.0] {
            let belief = Belief::from_dense(&[p, 1.0 - p]).unwrap();
            assert_eq!(policy.value_and_action(&belief), reversed.value_and_action(&belief));
        }
    }

    #[test]
    fn test_empty_policy() {
        let policy = Policy::new(3);
        assert_eq!(policy.value_and_action(&Belief::uniform(3)), (f64::NEG_INFINITY, 0));
        assert!(policy.best_index(&Belief::uniform(3)).is_none());
    }

    #[test]
    fn test_prune_for_beliefs_keeps_values() {
        let mut policy = sample_policy();
        let beliefs = vec![Belief::point(0), Belief::point(1)];
        let before: Vec<f64> = beliefs.iter().map(|b| policy.value(b)).collect();

        assert_eq!(policy.prune_for_beliefs(&beliefs), 1);
        assert_eq!(policy.len(), 2);

        let after: Vec<f64> = beliefs.iter().map(|b| policy.value(b)).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn test_remove_dominated() {
        let mut policy = Policy::from_vectors(
            2,
            vec![
                AlphaVector::new(0, vec![1.0, 1.0]),
                AlphaVector::new(1, vec![0.5, 1.0]),
                AlphaVector::new(2, vec![1.0, 1.0]),
                AlphaVector::new(1, vec![2.0, -1.0]),
            ],
        )
        .unwrap();

        assert_eq!(policy.remove_dominated(), 2);
        let actions: Vec<usize> = policy.vectors().iter().map(|v| v.action).collect();
        assert_eq!(actions, vec![0, 1]);
    }

    #[test]
    fn test_dimension_mismatch() {
        let err = Policy::from_vectors(3, vec![AlphaVector::new(0, vec![1.0])]).unwrap_err();
        assert!(matches!(err, PolicyError::DimensionMismatch { index: 0, actual: 1, expected: 3 }));
    }

    #[test]
    fn test_json_round_trip_is_exact() {
        let policy = Policy::from_vectors(
            3,
            vec![
                AlphaVector::new(0, vec![0.1, -1.0 / 3.0, 19.371368374803893]),
                AlphaVector::new(2, vec![1e-300, f64::MAX, -2000.0]),
            ],
        )
        .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policy.json");
        policy.save_json(&path).unwrap();
        let loaded = Policy::load_json(&path).unwrap();

        assert_eq!(loaded, policy);
        for (a, b) in loaded.vectors().iter().zip(policy.vectors()) {
            for (x, y) in a.values.iter().zip(&b.values) {
                assert_eq!(x.to_bits(), y.to_bits());
            }
        }
    }
}
