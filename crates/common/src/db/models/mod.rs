//! Build data models
//!
//! Rows of the snapshot input and the NGD output, plus the pair type that
//! links the two.

mod citation;
mod ngd;
mod pair;

pub use citation::{decode_pmids, CitationEntry, Pmid};
pub use ngd::{NgdRecord, NgdScore, MAX_DISTANCE};
pub use pair::ConceptPair;
