//! Generative model clients used for idea generation
//!
//! Backends: Google Gemini (`generateContent`) and Anthropic Messages. Both
//! report whether the completion stopped on the output-token budget so the
//! orchestrator can retry with a smaller one.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ModelError;
use crate::settings::{LlmBackend, Settings};

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";
const ANTHROPIC_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Per-call generation knobs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationConfig {
    pub temperature: f32,
    pub max_output_tokens: u32,
    /// Ask the backend for a JSON-only response where it supports that.
    pub json_response: bool,
}

/// Text returned by a model plus whether it hit the output budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub text: String,
    pub truncated: bool,
}

/// A prompt-in, text-out model.
pub trait GenerativeModel: Send + Sync {
    fn name(&self) -> &str;

    fn generate(&self, prompt: &str, config: &GenerationConfig) -> Result<Completion, ModelError>;
}

/// Build the configured backend.
pub fn from_settings(settings: &Settings) -> Arc<dyn GenerativeModel> {
    let timeout = Duration::from_secs(settings.llm_timeout_secs.max(1));
    match settings.llm_backend {
        LlmBackend::Gemini => Arc::new(GeminiClient::new(
            settings.gemini_api_key.clone(),
            settings.gemini_model.clone(),
            timeout,
        )),
        LlmBackend::Anthropic => Arc::new(AnthropicClient::new(
            settings.anthropic_api_key.clone(),
            settings.anthropic_model.clone(),
            timeout,
        )),
        LlmBackend::Disabled => Arc::new(DisabledModel),
    }
}

fn http_client(timeout: Duration) -> Result<reqwest::blocking::Client, ModelError> {
    Ok(reqwest::blocking::Client::builder().timeout(timeout).build()?)
}

// ==================== Gemini ====================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest<'a> {
    contents: Vec<GeminiContent<'a>>,
    generation_config: GeminiGenerationConfig,
}

#[derive(Debug, Serialize)]
struct GeminiContent<'a> {
    role: &'static str,
    parts: Vec<GeminiPart<'a>>,
}

#[derive(Debug, Serialize)]
struct GeminiPart<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<&'static str>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    content: Option<GeminiCandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidateContent {
    #[serde(default)]
    parts: Vec<GeminiResponsePart>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponsePart {
    #[serde(default)]
    text: String,
}

/// Google Gemini `generateContent` client.
pub struct GeminiClient {
    api_key: Option<String>,
    model: String,
    timeout: Duration,
}

impl GeminiClient {
    pub fn new(api_key: Option<String>, model: String, timeout: Duration) -> Self {
        Self {
            api_key,
            model,
            timeout,
        }
    }
}

impl GenerativeModel for GeminiClient {
    fn name(&self) -> &str {
        &self.model
    }

    fn generate(&self, prompt: &str, config: &GenerationConfig) -> Result<Completion, ModelError> {
        let api_key = self
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or(ModelError::MissingApiKey("GEMINI_API_KEY"))?;

        let request = GeminiRequest {
            contents: vec![GeminiContent {
                role: "user",
                parts: vec![GeminiPart { text: prompt }],
            }],
            generation_config: GeminiGenerationConfig {
                temperature: config.temperature,
                max_output_tokens: config.max_output_tokens,
                response_mime_type: config.json_response.then_some("application/json"),
            },
        };

        let url = format!("{}/{}:generateContent", GEMINI_BASE_URL, self.model);
        let response = http_client(self.timeout)?
            .post(url)
            .header("x-goog-api-key", api_key)
            .header("content-type", "application/json")
            .json(&request)
            .send()?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().unwrap_or_default();
            return Err(ModelError::Api { status, body });
        }

        let api_response: GeminiResponse = response
            .json()
            .map_err(|e| ModelError::Decode(e.to_string()))?;

        Ok(gemini_completion(api_response))
    }
}

fn gemini_completion(response: GeminiResponse) -> Completion {
    let Some(candidate) = response.candidates.into_iter().next() else {
        return Completion {
            text: String::new(),
            truncated: false,
        };
    };

    let truncated = candidate.finish_reason.as_deref() == Some("MAX_TOKENS");
    let text = candidate
        .content
        .map(|c| c.parts.into_iter().map(|p| p.text).collect::<String>())
        .unwrap_or_default();

    debug!(truncated, chars = text.len(), "gemini completion");
    Completion {
        text: text.trim().to_string(),
        truncated,
    }
}

// ==================== Anthropic ====================

/// Anthropic API message format
#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

/// Anthropic API request format
#[derive(Debug, Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<Message<'a>>,
}

/// Anthropic API response format
#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: String,
}

/// Anthropic Messages API client. JSON output is requested through the prompt.
pub struct AnthropicClient {
    api_key: Option<String>,
    model: String,
    timeout: Duration,
}

impl AnthropicClient {
    pub fn new(api_key: Option<String>, model: String, timeout: Duration) -> Self {
        Self {
            api_key,
            model,
            timeout,
        }
    }
}

impl GenerativeModel for AnthropicClient {
    fn name(&self) -> &str {
        &self.model
    }

    fn generate(&self, prompt: &str, config: &GenerationConfig) -> Result<Completion, ModelError> {
        let api_key = self
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or(ModelError::MissingApiKey("ANTHROPIC_API_KEY"))?;

        let request = AnthropicRequest {
            model: &self.model,
            max_tokens: config.max_output_tokens,
            temperature: config.temperature,
            messages: vec![Message {
                role: "user",
                content: prompt,
            }],
        };

        let response = http_client(self.timeout)?
            .post(ANTHROPIC_URL)
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&request)
            .send()?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().unwrap_or_default();
            return Err(ModelError::Api { status, body });
        }

        let api_response: AnthropicResponse = response
            .json()
            .map_err(|e| ModelError::Decode(e.to_string()))?;

        Ok(anthropic_completion(api_response))
    }
}

fn anthropic_completion(response: AnthropicResponse) -> Completion {
    let truncated = response.stop_reason.as_deref() == Some("max_tokens");
    let text: String = response.content.into_iter().map(|c| c.text).collect();
    debug!(truncated, chars = text.len(), "anthropic completion");
    Completion {
        text: text.trim().to_string(),
        truncated,
    }
}

// ==================== Disabled ====================

/// Backend used when idea generation is switched off; every call fails.
pub struct DisabledModel;

impl GenerativeModel for DisabledModel {
    fn name(&self) -> &str {
        "disabled"
    }

    fn generate(&self, _prompt: &str, _config: &GenerationConfig) -> Result<Completion, ModelError> {
        Err(ModelError::Disabled)
    }
}
