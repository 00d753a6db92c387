//! LLM summarization.
//!
//! The whole extracted text is wrapped in a fixed instruction and sent as a
//! single `generateContent` request. The summary is the first part of the
//! first candidate. No chunking is done; `max_input_chars` can cap the text
//! that goes into the prompt.

use crate::config::SummarizerConfig;
use crate::error::{Error, Result};
use crate::utils::{endpoint_url, truncate_chars, truncate_for_log};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;
use tracing::{info, instrument, warn};

/// Instruction placed in front of the extracted text.
pub const SUMMARY_INSTRUCTION: &str = "Produce a concise synopsis of the following text:";

/// Anything that can condense text into a summary.
#[async_trait]
pub trait Summarize: Send + Sync {
    async fn summarize(&self, text: &str) -> Result<String>;
}

/// Build the single prompt sent to the provider.
pub fn build_prompt(text: &str, max_input_chars: Option<usize>) -> String {
    let body = match max_input_chars {
        Some(max) => truncate_chars(text, max),
        None => text,
    };
    format!("{SUMMARY_INSTRUCTION}\n\n{body}")
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<RequestContent<'a>>,
}

#[derive(Debug, Serialize)]
struct RequestContent<'a> {
    role: &'static str,
    parts: Vec<RequestPart<'a>>,
}

#[derive(Debug, Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct GenerateResponse {
    candidates: Vec<Candidate>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Candidate {
    content: Option<CandidateContent>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CandidateContent {
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ResponsePart {
    text: Option<String>,
}

/// Pull the first candidate's first part out of a decoded response.
fn first_text(resp: GenerateResponse) -> Result<String> {
    let candidate = resp
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| Error::Provider("response contained no candidates".to_string()))?;

    let finish_reason = candidate.finish_reason.clone();
    let text = candidate
        .content
        .and_then(|c| c.parts.into_iter().next())
        .and_then(|p| p.text)
        .filter(|t| !t.trim().is_empty());

    text.ok_or_else(|| {
        Error::Provider(format!(
            "first candidate has no text (finish reason: {})",
            finish_reason.as_deref().unwrap_or("unknown")
        ))
    })
}

/// Summarizer backed by the Gemini `generateContent` API.
#[derive(Clone)]
pub struct GeminiSummarizer {
    client: reqwest::Client,
    url: String,
    api_key: String,
    max_input_chars: Option<usize>,
}

impl fmt::Debug for GeminiSummarizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeminiSummarizer")
            .field("url", &self.url)
            .field("max_input_chars", &self.max_input_chars)
            .finish()
    }
}

impl GeminiSummarizer {
    /// `api_key` is the already-validated credential.
    pub fn new(client: reqwest::Client, config: &SummarizerConfig, api_key: String) -> Self {
        Self {
            client,
            url: endpoint_url(
                &config.endpoint,
                &format!("models/{}:generateContent", config.model),
            ),
            api_key,
            max_input_chars: config.max_input_chars,
        }
    }

    fn classify_status(status: StatusCode, body: &str) -> Error {
        let detail = format!("status {status}: {}", truncate_for_log(body, 300));
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Error::Auth(detail),
            StatusCode::BAD_REQUEST if body.contains("API_KEY_INVALID") => Error::Auth(detail),
            StatusCode::TOO_MANY_REQUESTS => Error::Quota(detail),
            _ => Error::Provider(detail),
        }
    }
}

#[async_trait]
impl Summarize for GeminiSummarizer {
    #[instrument(level = "info", skip_all, fields(input_bytes = text.len()))]
    async fn summarize(&self, text: &str) -> Result<String> {
        let t0 = Instant::now();
        let prompt = build_prompt(text, self.max_input_chars);
        let body = GenerateRequest {
            contents: vec![RequestContent {
                role: "user",
                parts: vec![RequestPart { text: &prompt }],
            }],
        };

        let resp = self
            .client
            .post(&self.url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(Error::network)?;

        let status = resp.status();
        let raw = resp.text().await.map_err(Error::network)?;
        if !status.is_success() {
            let err = Self::classify_status(status, &raw);
            warn!(%status, error = %err, "Generation request failed");
            return Err(err);
        }

        let decoded: GenerateResponse = serde_json::from_str(&raw)
            .map_err(|e| Error::Provider(format!("undecodable response: {e}")))?;
        let summary = first_text(decoded)?;

        info!(
            summary_bytes = summary.len(),
            elapsed_ms = t0.elapsed().as_millis() as u64,
            preview = %truncate_for_log(&summary, 120),
            "Summarized text"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn summarizer(server: &MockServer, max_input_chars: Option<usize>) -> GeminiSummarizer {
        let config = SummarizerConfig {
            endpoint: server.uri(),
            model: "test-model".to_string(),
            max_input_chars,
            ..SummarizerConfig::default()
        };
        GeminiSummarizer::new(reqwest::Client::new(), &config, "secret".to_string())
    }

    fn candidates(texts: &[&str]) -> serde_json::Value {
        let candidates: Vec<_> = texts
            .iter()
            .map(|t| serde_json::json!({"content": {"role": "model", "parts": [{"text": t}, {"text": "second part"}]}}))
            .collect();
        serde_json::json!({ "candidates": candidates })
    }

    #[test]
    fn test_build_prompt_wraps_text() {
        let prompt = build_prompt("body text", None);
        assert!(prompt.starts_with(SUMMARY_INSTRUCTION));
        assert!(prompt.ends_with("body text"));
    }

    #[test]
    fn test_build_prompt_truncates_on_char_boundary() {
        let prompt = build_prompt("теория графов", Some(6));
        assert!(prompt.ends_with("\n\nтеория"));
    }

    #[tokio::test]
    async fn test_first_candidate_first_part_is_summary() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/test-model:generateContent"))
            .and(header("x-goog-api-key", "secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(candidates(&["first", "other"])))
            .expect(1)
            .mount(&server)
            .await;

        let summary = summarizer(&server, None).summarize("some text").await.unwrap();
        assert_eq!(summary, "first");
    }

    #[tokio::test]
    async fn test_zero_candidates_is_provider_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"candidates": []})))
            .mount(&server)
            .await;

        let err = summarizer(&server, None).summarize("x").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Provider);
    }

    #[tokio::test]
    async fn test_candidate_without_parts_is_provider_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "candidates": [{"finishReason": "SAFETY"}]
            })))
            .mount(&server)
            .await;

        let err = summarizer(&server, None).summarize("x").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Provider);
        assert!(err.to_string().contains("SAFETY"));
    }

    #[tokio::test]
    async fn test_rejected_key_is_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_string("permission denied"))
            .mount(&server)
            .await;

        let err = summarizer(&server, None).summarize("x").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Auth);
    }

    #[tokio::test]
    async fn test_invalid_key_400_is_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": {"code": 400, "status": "INVALID_ARGUMENT",
                          "details": [{"reason": "API_KEY_INVALID"}]}
            })))
            .mount(&server)
            .await;

        let err = summarizer(&server, None).summarize("x").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Auth);
    }

    #[tokio::test]
    async fn test_rate_limited_is_quota_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let err = summarizer(&server, None).summarize("x").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Quota);
    }

    #[tokio::test]
    async fn test_server_error_is_provider_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let err = summarizer(&server, None).summarize("x").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Provider);
    }

    #[tokio::test]
    async fn test_request_carries_truncated_prompt() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(wiremock::matchers::body_json(serde_json::json!({
                "contents": [{"role": "user", "parts": [{"text": format!("{SUMMARY_INSTRUCTION}\n\nabc")}]}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(candidates(&["ok"])))
            .expect(1)
            .mount(&server)
            .await;

        let summary = summarizer(&server, Some(3)).summarize("abcdef").await.unwrap();
        assert_eq!(summary, "ok");
    }
}
