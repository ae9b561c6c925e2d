//! Concept pairs to score

use serde::{Deserialize, Serialize};
use std::fmt;

/// Pair of CURIEs, kept in the order the pair source gave them
///
/// The score is symmetric, so (A, B) and (B, A) name the same output row;
/// use [`ConceptPair::canonical`] when comparing pairs without regard to
/// order. A single concept is represented as the self-pair (A, A).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConceptPair {
    curie_a: String,
    curie_b: String,
}

impl ConceptPair {
    pub fn new(a: impl Into<String>, b: impl Into<String>) -> Self {
        Self {
            curie_a: a.into(),
            curie_b: b.into(),
        }
    }

    /// Self-pair used for single-concept statistics
    pub fn single(curie: impl Into<String>) -> Self {
        let curie = curie.into();
        Self {
            curie_a: curie.clone(),
            curie_b: curie,
        }
    }

    /// Same pair with the CURIEs in lexicographic order
    pub fn canonical(&self) -> Self {
        if self.curie_a <= self.curie_b {
            self.clone()
        } else {
            Self {
                curie_a: self.curie_b.clone(),
                curie_b: self.curie_a.clone(),
            }
        }
    }

    pub fn curie_a(&self) -> &str {
        &self.curie_a
    }

    pub fn curie_b(&self) -> &str {
        &self.curie_b
    }

    pub fn is_self_pair(&self) -> bool {
        self.curie_a == self.curie_b
    }
}

impl fmt::Display for ConceptPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.curie_a, self.curie_b)
    }
}
