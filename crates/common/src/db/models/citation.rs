//! Snapshot rows: CURIE to PubMed citation identifiers

use crate::errors::{AppError, Result};

/// PubMed identifier
pub type Pmid = u64;

/// Decoded `curie_to_pmids` row
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CitationEntry {
    pub curie: String,
    pub pmids: Vec<Pmid>,
}

/// Strictly decode a serialized citation list
///
/// The only accepted shape is a JSON array of non-negative integers. Anything
/// else (quoted ids, floats, nested lists, trailing garbage) is an error.
pub fn decode_pmids(curie: &str, raw: &str) -> Result<Vec<Pmid>> {
    serde_json::from_str::<Vec<Pmid>>(raw).map_err(|e| AppError::Decode {
        curie: curie.to_string(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_valid_lists() {
        assert_eq!(decode_pmids("CHEBI:1", "[100, 101, 102]").unwrap(), vec![100, 101, 102]);
        assert_eq!(decode_pmids("CHEBI:1", "[]").unwrap(), Vec::<Pmid>::new());
        assert_eq!(decode_pmids("CHEBI:1", " [7] ").unwrap(), vec![7]);
    }

    #[test]
    fn test_decode_rejects_malformed() {
        for raw in ["['PMID:1']", "[1.5]", "[-3]", "[[1]]", "[1, 2", "", "None", "[1] x"] {
            let err = decode_pmids("CHEBI:1", raw).unwrap_err();
            assert!(
                matches!(err, AppError::Decode { ref curie, .. } if curie == "CHEBI:1"),
                "expected decode error for {raw:?}"
            );
        }
    }
}
