//! NGD output rows

use super::ConceptPair;
use serde::{Deserialize, Serialize};

/// Stored value for pairs that never co-occur
///
/// Finite so that the output store never holds an infinity.
pub const MAX_DISTANCE: f64 = f64::MAX;

/// Outcome of scoring a pair
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum NgdScore {
    /// Well-defined, finite distance
    Value(f64),
    /// No shared citations while both concepts have some
    MaxDistance,
    /// A concept has no citations, or the normalizer is too small
    Undefined,
}

impl NgdScore {
    /// Column value in the output store (`NULL` for undefined)
    pub fn to_column(self) -> Option<f64> {
        match self {
            NgdScore::Value(v) => Some(v),
            NgdScore::MaxDistance => Some(MAX_DISTANCE),
            NgdScore::Undefined => None,
        }
    }

    /// Inverse of [`NgdScore::to_column`]
    pub fn from_column(value: Option<f64>) -> Self {
        match value {
            None => NgdScore::Undefined,
            Some(v) if v == MAX_DISTANCE => NgdScore::MaxDistance,
            Some(v) => NgdScore::Value(v),
        }
    }

    /// Short label used in logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            NgdScore::Value(_) => "value",
            NgdScore::MaxDistance => "max_distance",
            NgdScore::Undefined => "undefined",
        }
    }
}

/// One row of the `curie_ngd` table
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NgdRecord {
    pub curie_a: String,
    pub curie_b: String,
    pub ngd: NgdScore,
    pub count_a: u64,
    pub count_b: u64,
    pub intersection: u64,
}

impl NgdRecord {
    pub fn new(pair: &ConceptPair, ngd: NgdScore, count_a: u64, count_b: u64, intersection: u64) -> Self {
        Self {
            curie_a: pair.curie_a().to_string(),
            curie_b: pair.curie_b().to_string(),
            ngd,
            count_a,
            count_b,
            intersection,
        }
    }

    pub fn pair(&self) -> ConceptPair {
        ConceptPair::new(self.curie_a.clone(), self.curie_b.clone())
    }
}
