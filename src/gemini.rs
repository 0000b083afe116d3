//! Gemini API client used for schedule framing
//!
//! Uses a long-lived reqwest::Client for connection pooling. The client
//! returns raw model text; callers own parsing and validation.

use serde::{Deserialize, Serialize};
use tracing::{error, info};
use reqwest::Client;
use std::time::Duration;
use crate::error::ItineraryError;

const GEMINI_ENDPOINT: &str =
    "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:generateContent";

/// Reusable Gemini client (connection-pooled)
pub struct GeminiClient {
    client: Client,
    api_key: String,
    base_url: String,
}

/// Text returned by the model plus the reason generation stopped
#[derive(Debug, Clone)]
pub struct GeminiReply {
    pub text: String,
    pub finish_reason: Option<String>,
}

impl GeminiReply {
    /// Generation was cut off before the model finished its answer
    pub fn is_truncated(&self) -> bool {
        matches!(self.finish_reason.as_deref(), Some("MAX_TOKENS") | Some("LENGTH"))
    }
}

impl GeminiClient {
    pub fn new(api_key: String, timeout: Duration) -> crate::Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            api_key,
            base_url: GEMINI_ENDPOINT.to_string(),
        })
    }

    /// Point the client at a different endpoint (proxies, tests)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Generate a JSON answer for `prompt` under `system_prompt`
    pub async fn generate_json(
        &self,
        system_prompt: &str,
        prompt: &str,
    ) -> crate::Result<GeminiReply> {

        if self.api_key.is_empty() {
            return Err(ItineraryError::ConfigError(
                "GEMINI_API_KEY not configured".to_string(),
            ));
        }

        let url = format!("{}?key={}", self.base_url, self.api_key);

        let request = GeminiRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: prompt.to_string(),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: 0.4,
                top_p: 0.9,
                top_k: 40,
                max_output_tokens: 8192,
                response_mime_type: "application/json".to_string(),
            },
            system_instruction: SystemInstruction {
                parts: vec![Part {
                    text: system_prompt.to_string(),
                }],
            },
        };

        info!(prompt_chars = prompt.chars().count(), "Calling Gemini API");

        let response = self.client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                error!("Gemini API request failed: {}", e);
                if e.is_timeout() {
                    ItineraryError::UpstreamTimeout(format!("Gemini API: {}", e))
                } else {
                    ItineraryError::UpstreamError(format!("Gemini API error: {}", e))
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            error!(%status, "Gemini API error response: {}", error_text);
            return Err(ItineraryError::UpstreamError(
                format!("Gemini API returned {}: {}", status, error_text)
            ));
        }

        let gemini_response: GeminiResponse = response.json().await.map_err(|e| {
            error!("Failed to parse Gemini response: {}", e);
            ItineraryError::MalformedUpstreamResponse(format!("Gemini parse error: {}", e))
        })?;

        let candidate = gemini_response.candidates.into_iter().next().ok_or_else(|| {
            ItineraryError::MalformedUpstreamResponse("No candidates from Gemini".to_string())
        })?;

        let text = candidate
            .content
            .and_then(|c| c.parts.into_iter().next())
            .map(|p| p.text)
            .unwrap_or_default();

        if let Some(usage) = gemini_response.usage_metadata {
            info!(
                prompt_tokens = usage.prompt_token_count,
                output_tokens = usage.candidates_token_count,
                finish_reason = ?candidate.finish_reason,
                "Gemini response received"
            );
        }

        Ok(GeminiReply {
            text,
            finish_reason: candidate.finish_reason,
        })
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
    system_instruction: SystemInstruction,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    top_k: i32,
    max_output_tokens: i32,
    response_mime_type: String,
}

#[derive(Debug, Serialize)]
struct SystemInstruction {
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: i32,
    #[serde(default)]
    candidates_token_count: i32,
}
