//! Chat-completion client for the character pipeline.
//!
//! All LLM work (name extraction, optional semantic dedup, profile
//! synthesis) goes through the [`ChatModel`] trait so the orchestrator
//! and tests are independent of the provider. The production backend is
//! Gemini's `generateContent` endpoint at temperature 0.
//!
//! # Failure mapping
//!
//! - HTTP 429 → [`LlmError::Quota`] (surfaced immediately; the caller
//!   decides whether the character is skipped or the ingest fails)
//! - `finishReason: SAFETY` → [`LlmError::ContentFiltered`]
//! - 5xx / network errors → retried with exponential backoff, then
//!   [`LlmError::Transport`]
//! - other 4xx → [`LlmError::Transport`] without retry

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;

use crate::config::LlmConfig;
use crate::error::LlmError;

/// A text-in/text-out chat completion endpoint.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Run one completion with a system intent and a user prompt,
    /// returning the raw response text.
    async fn complete(&self, system: &str, user: &str) -> Result<String, LlmError>;
}

/// Gemini `generateContent` client.
///
/// Authentication comes from `GEMINI_API_KEY` (fallback:
/// `GOOGLE_API_KEY`). Temperature is fixed at 0 for reproducible
/// extraction and synthesis.
pub struct GeminiClient {
    model: String,
    api_key: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl GeminiClient {
    pub fn new(config: &LlmConfig) -> anyhow::Result<Self> {
        let api_key = std::env::var("GEMINI_API_KEY")
            .or_else(|_| std::env::var("GOOGLE_API_KEY"))
            .map_err(|_| anyhow::anyhow!("GEMINI_API_KEY environment variable not set"))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            model: config.model.clone(),
            api_key,
            max_retries: config.max_retries,
            client,
        })
    }
}

#[async_trait]
impl ChatModel for GeminiClient {
    async fn complete(&self, system: &str, user: &str) -> Result<String, LlmError> {
        let url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent?key={}",
            self.model, self.api_key
        );

        let body = serde_json::json!({
            "system_instruction": { "parts": [{ "text": system }] },
            "contents": [{ "role": "user", "parts": [{ "text": user }] }],
            "generationConfig": { "temperature": 0.0 },
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self.client.post(&url).json(&body).send().await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response
                            .json()
                            .await
                            .map_err(|e| LlmError::Transport(e.to_string()))?;
                        return parse_response(&json);
                    }

                    if status.as_u16() == 429 {
                        return Err(LlmError::Quota);
                    }

                    if status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err = Some(LlmError::Transport(format!(
                            "LLM API error {}: {}",
                            status, body_text
                        )));
                        continue;
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    return Err(LlmError::Transport(format!(
                        "LLM API error {}: {}",
                        status, body_text
                    )));
                }
                Err(e) => {
                    last_err = Some(LlmError::Transport(e.to_string()));
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| {
            LlmError::Transport("LLM call failed after retries".to_string())
        }))
    }
}

/// Extract the first candidate's text from a `generateContent` response.
fn parse_response(json: &serde_json::Value) -> Result<String, LlmError> {
    let candidate = json
        .get("candidates")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .ok_or_else(|| LlmError::Transport("response has no candidates".to_string()))?;

    if candidate
        .get("finishReason")
        .and_then(|r| r.as_str())
        .is_some_and(|r| r == "SAFETY")
    {
        return Err(LlmError::ContentFiltered);
    }

    let parts = candidate
        .get("content")
        .and_then(|c| c.get("parts"))
        .and_then(|p| p.as_array())
        .ok_or_else(|| LlmError::Transport("response has no content parts".to_string()))?;

    let text: String = parts
        .iter()
        .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
        .collect();

    if text.trim().is_empty() {
        return Err(LlmError::Transport("empty response text".to_string()));
    }

    Ok(text)
}

static CHAT_MODEL: OnceLock<Arc<GeminiClient>> = OnceLock::new();

/// Process-wide chat-model singleton, initialized lazily on first use.
pub fn global_chat_model(config: &LlmConfig) -> anyhow::Result<Arc<dyn ChatModel>> {
    if let Some(existing) = CHAT_MODEL.get() {
        return Ok(existing.clone());
    }
    let created = Arc::new(GeminiClient::new(config)?);
    Ok(CHAT_MODEL.get_or_init(|| created).clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_extracts_candidate_text() {
        let json = serde_json::json!({
            "candidates": [{
                "content": { "parts": [{ "text": "hello " }, { "text": "world" }] },
                "finishReason": "STOP"
            }]
        });
        assert_eq!(parse_response(&json).unwrap(), "hello world");
    }

    #[test]
    fn parse_maps_safety_to_content_filtered() {
        let json = serde_json::json!({
            "candidates": [{ "finishReason": "SAFETY" }]
        });
        assert!(matches!(
            parse_response(&json),
            Err(LlmError::ContentFiltered)
        ));
    }

    #[test]
    fn parse_rejects_empty_payload() {
        let json = serde_json::json!({ "candidates": [] });
        assert!(matches!(parse_response(&json), Err(LlmError::Transport(_))));
    }
}
