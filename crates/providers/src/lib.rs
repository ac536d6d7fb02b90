//! Classification oracle abstractions.
//!
//! An oracle receives an ordered batch of `{path, excerpt}` requests and proposes
//! taxonomy fields plus a confidence for each of them. The pipeline never looks
//! inside an oracle; anything that implements [`ClassificationOracle`] can be
//! registered and selected by name.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub mod heuristic;
pub mod openai;

#[derive(Debug, Clone, Error)]
pub enum OracleError {
    #[error("oracle call timed out after {0:?}")]
    Timeout(Duration),
    #[error("oracle rate limited the request")]
    RateLimited { retry_after: Option<Duration> },
    #[error("malformed oracle response: {0}")]
    Malformed(String),
    #[error("request failed: {0}")]
    RequestFailed(String),
    #[error("unknown oracle: {0}")]
    UnknownProvider(String),
}

impl OracleError {
    /// Transient failures worth another attempt. Configuration mistakes are not.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, OracleError::UnknownProvider(_))
    }

    /// Server-provided delay hint, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            OracleError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OracleRequest {
    pub path: String,
    pub excerpt: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OracleResponse {
    /// Position of the request this answers. When absent the response is
    /// matched by its position in the returned list.
    #[serde(default)]
    pub index: Option<usize>,
    #[serde(default, deserialize_with = "scalar_fields")]
    pub fields: BTreeMap<String, String>,
    pub confidence: f32,
    #[serde(default)]
    pub rationale: String,
}

/// Accepts numbers and booleans as field values by stringifying them. Nulls
/// are dropped; nested values are rejected.
fn scalar_fields<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = BTreeMap::<String, serde_json::Value>::deserialize(deserializer)?;
    let mut fields = BTreeMap::new();
    for (key, value) in raw {
        let text = match value {
            serde_json::Value::Null => continue,
            serde_json::Value::String(s) => s,
            serde_json::Value::Number(n) => n.to_string(),
            serde_json::Value::Bool(b) => b.to_string(),
            other => {
                return Err(serde::de::Error::custom(format!(
                    "field `{key}` must be a scalar, got {other}"
                )))
            }
        };
        fields.insert(key, text);
    }
    Ok(fields)
}

#[async_trait::async_trait]
pub trait ClassificationOracle: Send + Sync {
    fn name(&self) -> &str;

    /// Classify a batch. Implementations should answer every request in order;
    /// callers treat missing entries as per-file failures.
    async fn classify(&self, batch: &[OracleRequest]) -> Result<Vec<OracleResponse>, OracleError>;
}

#[derive(Default, Clone)]
pub struct OracleRegistry {
    oracles: HashMap<String, Arc<dyn ClassificationOracle>>,
    pub preferred: Option<String>,
}

impl OracleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_oracle(mut self, name: &str, oracle: Arc<dyn ClassificationOracle>) -> Self {
        self.oracles.insert(name.to_string(), oracle);
        self
    }

    pub fn set_preferred(mut self, name: &str) -> Self {
        self.preferred = Some(name.to_string());
        self
    }

    pub fn oracle(&self, name: Option<&str>) -> Result<Arc<dyn ClassificationOracle>, OracleError> {
        let key = name
            .map(str::to_string)
            .or_else(|| self.preferred.clone())
            .ok_or_else(|| OracleError::UnknownProvider("no oracle configured".into()))?;
        self.oracles
            .get(&key)
            .cloned()
            .ok_or(OracleError::UnknownProvider(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_field_values_are_stringified() {
        let resp: OracleResponse = serde_json::from_str(
            r#"{"fields": {"case_number": 2024, "urgent": true, "client": "acme", "note": null},
                "confidence": 0.9}"#,
        )
        .unwrap();
        assert_eq!(resp.fields["case_number"], "2024");
        assert_eq!(resp.fields["urgent"], "true");
        assert_eq!(resp.fields["client"], "acme");
        assert!(!resp.fields.contains_key("note"));

        let nested = serde_json::from_str::<OracleResponse>(
            r#"{"fields": {"parties": ["a", "b"]}, "confidence": 0.9}"#,
        );
        assert!(nested.is_err());
    }

    #[test]
    fn registry_prefers_configured_oracle() {
        let reg = OracleRegistry::new()
            .with_oracle("heuristic", Arc::new(heuristic::HeuristicOracle::default()))
            .set_preferred("heuristic");
        assert_eq!(reg.oracle(None).unwrap().name(), "heuristic");
        assert!(matches!(
            reg.oracle(Some("missing")),
            Err(OracleError::UnknownProvider(name)) if name == "missing"
        ));
    }

    #[test]
    fn unknown_provider_is_not_retried() {
        assert!(!OracleError::UnknownProvider("x".into()).is_retryable());
        assert!(OracleError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(OracleError::Malformed("bad".into()).is_retryable());
    }

    #[test]
    fn response_index_and_rationale_are_optional() {
        let resp: OracleResponse =
            serde_json::from_str(r#"{"fields":{"category":"finance"},"confidence":0.7}"#).unwrap();
        assert_eq!(resp.index, None);
        assert_eq!(resp.rationale, "");
        assert_eq!(resp.fields.get("category").map(String::as_str), Some("finance"));
    }
}
