//! Knowledge graph query service (PloverDB) client
//!
//! Provides:
//! - The KG2 version check against `/code_version`
//! - Enumeration of the concept pairs to score
//! - KG version string validation

use crate::config::PloverConfig;
use crate::db::models::ConceptPair;
use crate::errors::{AppError, Result};
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use regex_lite::Regex;
use serde::Deserialize;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, info, instrument};

/// Source of the KG version and of the pairs to score
#[async_trait]
pub trait ConceptPairSource: Send + Sync {
    /// KG2 version currently served, `None` if it cannot be determined
    async fn kg_version(&self) -> Result<Option<String>>;

    /// Every pair to score for this build
    async fn concept_pairs(&self) -> Result<Vec<ConceptPair>>;
}

fn version_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\d+\.\d+\.\d+$").expect("static regex is valid"))
}

fn kg2c_description_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"kg2c-(\d+\.\d+\.\d+)").expect("static regex is valid"))
}

/// Check that a KG version looks like X.Y.Z (e.g. 2.10.2)
pub fn validate_kg_version(version: &str) -> Result<()> {
    if version_pattern().is_match(version) {
        Ok(())
    } else {
        Err(AppError::InvalidVersion {
            version: version.to_string(),
        })
    }
}

#[derive(Deserialize)]
struct CodeVersionResponse {
    endpoint_build_nodes: BuildNodes,
}

#[derive(Deserialize)]
struct BuildNodes {
    kg2c: BuildNode,
}

#[derive(Deserialize)]
struct BuildNode {
    description: String,
}

/// Extract the KG2 version from a `/code_version` response body
///
/// The version is embedded in the kg2c build description, e.g.
/// `kg2c-2.10.2-v1.0`.
pub fn parse_code_version(body: &str) -> Result<Option<String>> {
    let response: CodeVersionResponse = serde_json::from_str(body).map_err(|e| AppError::Upstream {
        message: format!("Unexpected JSON structure in Plover response: {}", e),
        transient: false,
    })?;

    Ok(kg2c_description_pattern()
        .captures(&response.endpoint_build_nodes.kg2c.description)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string()))
}

/// Decode a pair enumeration response
///
/// Each element is `[curie_a, curie_b]`, or `[curie]` for single-concept
/// statistics.
pub fn parse_pairs(body: &str) -> Result<Vec<ConceptPair>> {
    let raw: Vec<Vec<String>> = serde_json::from_str(body).map_err(|e| AppError::Upstream {
        message: format!("Malformed pair enumeration response: {}", e),
        transient: false,
    })?;

    raw.into_iter()
        .enumerate()
        .map(|(index, mut element)| match element.len() {
            1 => Ok(ConceptPair::single(element.remove(0))),
            2 => {
                let b = element.remove(1);
                Ok(ConceptPair::new(element.remove(0), b))
            }
            n => Err(AppError::Upstream {
                message: format!("Pair #{} has {} elements, expected 1 or 2", index, n),
                transient: false,
            }),
        })
        .collect()
}

/// HTTP client for PloverDB
pub struct PloverClient {
    client: reqwest::Client,
    base_url: String,
    pairs_path: String,
    retry: RetryPolicy,
}

impl PloverClient {
    pub fn new(config: &PloverConfig, retry: RetryPolicy) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::Configuration {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            pairs_path: config.pairs_path.trim_start_matches('/').to_string(),
            retry,
        })
    }

    async fn get_text(&self, url: &str) -> Result<String> {
        let response = self.client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Upstream {
                message: format!("GET {} returned {}: {}", url, status, body),
                transient: status.is_server_error(),
            });
        }

        Ok(response.text().await?)
    }
}

#[async_trait]
impl ConceptPairSource for PloverClient {
    #[instrument(skip(self), fields(url = %self.base_url))]
    async fn kg_version(&self) -> Result<Option<String>> {
        let url = format!("{}/code_version", self.base_url);
        let body = self.retry.run("GET /code_version", || self.get_text(&url)).await?;
        let version = parse_code_version(&body)?;

        info!(version = ?version, "Fetched KG2 version from Plover");
        Ok(version)
    }

    #[instrument(skip(self), fields(url = %self.base_url))]
    async fn concept_pairs(&self) -> Result<Vec<ConceptPair>> {
        let url = format!("{}/{}", self.base_url, self.pairs_path);
        let body = self.retry.run("GET pairs", || self.get_text(&url)).await?;
        let pairs = parse_pairs(&body)?;

        debug!(count = pairs.len(), "Fetched concept pairs");
        Ok(pairs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_kg_version() {
        assert!(validate_kg_version("2.10.2").is_ok());
        assert!(validate_kg_version("10.0.11").is_ok());
        for bad in ["2.10", "v2.10.2", "2.10.2-rc1", "", "2..1"] {
            assert!(
                matches!(validate_kg_version(bad), Err(AppError::InvalidVersion { .. })),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_parse_code_version() {
        let body = r#"{"endpoint_build_nodes": {"kg2c": {"description": "kg2c-2.10.2-v1.0 built on 2025-01-03"}}}"#;
        assert_eq!(parse_code_version(body).unwrap(), Some("2.10.2".to_string()));

        let body = r#"{"endpoint_build_nodes": {"kg2c": {"description": "unknown build"}}}"#;
        assert_eq!(parse_code_version(body).unwrap(), None);

        let body = r#"{"endpoint_build_nodes": {}}"#;
        let err = parse_code_version(body).unwrap_err();
        assert!(!err.is_transient());
        assert!(err.to_string().contains("Unexpected JSON structure"));
    }

    #[test]
    fn test_parse_pairs() {
        let pairs = parse_pairs(r#"[["MESH:D2", "CHEBI:1"], ["UMLS:C1"]]"#).unwrap();
        assert_eq!(pairs, vec![ConceptPair::new("MESH:D2", "CHEBI:1"), ConceptPair::single("UMLS:C1")]);

        assert!(parse_pairs(r#"[["A:1", "B:2", "C:3"]]"#).is_err());
        assert!(parse_pairs(r#"[[]]"#).is_err());
        assert!(parse_pairs(r#"{"pairs": []}"#).is_err());
        assert!(parse_pairs("[]").unwrap().is_empty());
    }

    #[test]
    fn test_client_normalizes_urls() {
        let config = PloverConfig {
            url: "http://localhost:9990/".to_string(),
            pairs_path: "/pairs".to_string(),
            timeout_secs: 1,
        };
        let client = PloverClient::new(&config, RetryPolicy::none()).unwrap();
        assert_eq!(client.base_url, "http://localhost:9990");
        assert_eq!(client.pairs_path, "pairs");
    }
}
