//! Inference backend collaborator
//!
//! Agents delegate reasoning to an external model server. The server returns
//! the completion plus an evidence id that points at its own audit record of
//! the exchange; the agent only passes that id along.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Header some backends use to expose the evidence record id
pub const EVIDENCE_HEADER: &str = "x-evidence-id";

#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("Inference backend not configured")]
    NotConfigured,

    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Backend rejected request: {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Per-call generation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InferenceOptions {
    /// Backend default when `None`
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

impl Default for InferenceOptions {
    fn default() -> Self {
        Self {
            model: None,
            max_tokens: Some(1024),
            temperature: Some(0.2),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InferenceResponse {
    pub content: String,
    pub evidence_id: Option<String>,
}

/// Something that turns a prompt into text
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn infer(&self, prompt: &str, options: &InferenceOptions) -> Result<InferenceResponse, InferenceError>;
}

/// Connection settings for an OpenAI-compatible server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceConfig {
    pub base_url: String,
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    60
}

impl InferenceConfig {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            model: model.into(),
            api_key: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Backend speaking the `/v1/chat/completions` protocol
pub struct HttpInferenceBackend {
    config: InferenceConfig,
    client: reqwest::Client,
}

impl HttpInferenceBackend {
    pub fn new(config: InferenceConfig) -> Result<Self, InferenceError> {
        if config.base_url.trim().is_empty() {
            return Err(InferenceError::NotConfigured);
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| InferenceError::RequestFailed(e.to_string()))?;
        Ok(Self { config, client })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1/chat/completions",
            self.config.base_url.trim_end_matches('/')
        )
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    stream: bool,
}

#[derive(Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    id: Option<String>,
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[async_trait]
impl InferenceBackend for HttpInferenceBackend {
    fn name(&self) -> &'static str {
        "openai-compatible"
    }

    async fn infer(&self, prompt: &str, options: &InferenceOptions) -> Result<InferenceResponse, InferenceError> {
        let model = options.model.as_deref().unwrap_or(&self.config.model);
        let request = ChatRequest {
            model,
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            max_tokens: options.max_tokens,
            temperature: options.temperature,
            stream: false,
        };

        let mut builder = self.client.post(self.endpoint()).json(&request);
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder
            .send()
            .await
            .map_err(|e| InferenceError::RequestFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(InferenceError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        let header_evidence = response
            .headers()
            .get(EVIDENCE_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| InferenceError::InvalidResponse(e.to_string()))?;

        let parsed = parse_completion(body, header_evidence)?;
        debug!(
            backend = self.name(),
            model,
            evidence_id = parsed.evidence_id.as_deref().unwrap_or("-"),
            "Inference completed"
        );
        Ok(parsed)
    }
}

fn parse_completion(
    body: ChatResponse,
    header_evidence: Option<String>,
) -> Result<InferenceResponse, InferenceError> {
    let choice = body
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| InferenceError::InvalidResponse("no choices in response".into()))?;
    Ok(InferenceResponse {
        content: choice.message.content,
        evidence_id: header_evidence.or(body.id),
    })
}
