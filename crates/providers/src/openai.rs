use crate::{ClassificationOracle, OracleError, OracleRequest, OracleResponse};
use bytes::Bytes;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[derive(Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: String,
    pub chat_model: String,
    /// Field names the model is asked to fill, e.g. `category`, `doc_type`.
    pub fields: Vec<String>,
}

#[derive(Clone)]
pub struct OpenAiOracle {
    client: Client,
    cfg: Arc<OpenAiConfig>,
}

impl OpenAiOracle {
    pub fn new(cfg: OpenAiConfig) -> Self {
        Self {
            client: Client::new(),
            cfg: Arc::new(cfg),
        }
    }

    fn prompt(&self, batch: &[OracleRequest]) -> Result<String, OracleError> {
        #[derive(Serialize)]
        struct Item<'a> {
            index: usize,
            path: &'a str,
            excerpt: &'a str,
        }
        let items: Vec<Item<'_>> = batch
            .iter()
            .enumerate()
            .map(|(index, r)| Item {
                index,
                path: &r.path,
                excerpt: &r.excerpt,
            })
            .collect();
        let listing = serde_json::to_string(&items)
            .map_err(|e| OracleError::RequestFailed(format!("encode batch: {e}")))?;
        Ok(format!(
            "Classify each file below. Answer with a JSON object of the form \
             {{\"results\":[{{\"index\":0,\"fields\":{{...}},\"confidence\":0.0,\"rationale\":\"...\"}}]}}. \
             Fill these fields: {}. Confidence is between 0 and 1. One result per index.\n\nFiles:\n{}",
            self.cfg.fields.join(", "),
            listing
        ))
    }
}

#[derive(Deserialize)]
struct Choice {
    message: ChatMessageResp,
}

#[derive(Deserialize)]
struct ChatMessageResp {
    content: String,
}

#[derive(Deserialize)]
struct ChatApiResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct ResultsEnvelope {
    results: Vec<OracleResponse>,
}

#[async_trait::async_trait]
impl ClassificationOracle for OpenAiOracle {
    fn name(&self) -> &str {
        "openai"
    }

    async fn classify(&self, batch: &[OracleRequest]) -> Result<Vec<OracleResponse>, OracleError> {
        #[derive(Serialize)]
        struct ChatMessage<'a> {
            role: &'static str,
            content: &'a str,
        }
        #[derive(Serialize)]
        struct ResponseFormat {
            #[serde(rename = "type")]
            kind: &'static str,
        }
        #[derive(Serialize)]
        struct ChatRequest<'a> {
            model: &'a str,
            messages: Vec<ChatMessage<'a>>,
            response_format: ResponseFormat,
        }

        if batch.is_empty() {
            return Ok(Vec::new());
        }

        let prompt = self.prompt(batch)?;
        let body = ChatRequest {
            model: &self.cfg.chat_model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: "You file documents into a taxonomy. Reply with JSON only.",
                },
                ChatMessage {
                    role: "user",
                    content: &prompt,
                },
            ],
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };

        let resp = self
            .client
            .post(format!("{}/v1/chat/completions", self.cfg.base_url))
            .bearer_auth(&self.cfg.api_key)
            .json(&body)
            .send()
            .await
            .map_err(map_transport)?;

        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = resp
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(OracleError::RateLimited { retry_after });
        }
        if !status.is_success() {
            let body = resp.bytes().await.unwrap_or(Bytes::from_static(b""));
            return Err(OracleError::RequestFailed(format!(
                "status {} body {:?}",
                status, body
            )));
        }

        let parsed: ChatApiResponse = resp
            .json()
            .await
            .map_err(|e| OracleError::Malformed(e.to_string()))?;
        let content = parsed
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .ok_or_else(|| OracleError::Malformed("no choices in response".into()))?;
        debug!(batch = batch.len(), "oracle replied with {} bytes", content.len());
        parse_results(content)
    }
}

fn map_transport(err: reqwest::Error) -> OracleError {
    if err.is_timeout() {
        OracleError::Timeout(Duration::ZERO)
    } else {
        OracleError::RequestFailed(err.to_string())
    }
}

/// Parses the model's answer. Models like to wrap JSON in code fences.
pub(crate) fn parse_results(content: &str) -> Result<Vec<OracleResponse>, OracleError> {
    let trimmed = content
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();
    let envelope: ResultsEnvelope =
        serde_json::from_str(trimmed).map_err(|e| OracleError::Malformed(e.to_string()))?;
    Ok(envelope.results)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fenced_results() {
        let content = "```json\n{\"results\":[{\"index\":1,\"fields\":{\"category\":\"legal\"},\"confidence\":0.8}]}\n```";
        let out = parse_results(content).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].index, Some(1));
        assert_eq!(out[0].fields["category"], "legal");
    }

    #[test]
    fn garbage_is_malformed() {
        assert!(matches!(
            parse_results("I think it is a contract"),
            Err(OracleError::Malformed(_))
        ));
    }

    #[test]
    fn prompt_lists_every_file_with_its_index() {
        let oracle = OpenAiOracle::new(OpenAiConfig {
            api_key: "k".into(),
            base_url: "http://localhost".into(),
            chat_model: "m".into(),
            fields: vec!["category".into(), "doc_type".into()],
        });
        let prompt = oracle
            .prompt(&[
                OracleRequest {
                    path: "/a.txt".into(),
                    excerpt: "alpha".into(),
                },
                OracleRequest {
                    path: "/b.txt".into(),
                    excerpt: "beta".into(),
                },
            ])
            .unwrap();
        assert!(prompt.contains("\"index\":1"));
        assert!(prompt.contains("/b.txt"));
        assert!(prompt.contains("category, doc_type"));
    }
}
