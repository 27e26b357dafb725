//! Messages-API client the agent loop talks to.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use crate::config::LlmConfig;
use crate::error::{Error, Result};

pub const DEFAULT_MODEL: &str = "glm-4.7";

const API_VERSION: &str = "2023-06-01";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// A text-completion backend the agent can drive.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
        max_tokens: u32,
    ) -> Result<LLMResponse>;
}

/// One completion, flattened to its text blocks.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LLMResponse {
    pub content: String,
    pub model: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: [Turn<'a>; 1],
}

#[derive(Debug, Serialize)]
struct Turn<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesReply {
    #[serde(default)]
    content: Vec<Block>,
    model: Option<String>,
    stop_reason: Option<String>,
    #[serde(default)]
    usage: TokenUsage,
}

#[derive(Debug, Deserialize)]
struct Block {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Default, Deserialize)]
struct TokenUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

/// Error payloads seen in the wild: `{"msg": ..}` and `{"error": {"message": ..}}`.
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    msg: Option<String>,
    error: Option<ApiErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: Option<String>,
}

/// [`LanguageModel`] over an Anthropic-compatible `/v1/messages` endpoint.
pub struct LLMClient {
    http: Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl LLMClient {
    pub fn new(base_url: &str, api_key: &str, model: &str) -> Result<Self> {
        Ok(Self {
            http: Client::builder().timeout(REQUEST_TIMEOUT).build()?,
            endpoint: format!("{}/v1/messages", base_url.trim_end_matches('/')),
            api_key: api_key.to_string(),
            model: model.to_string(),
        })
    }

    /// Build from the `[llm]` section; each unset key falls back to
    /// `LLM_BASE_URL`, `LLM_API_KEY` or `LLM_MODEL`.
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let resolve = |configured: &Option<String>, var: &str| {
            configured
                .clone()
                .or_else(|| std::env::var(var).ok())
                .filter(|v| !v.trim().is_empty())
        };
        let base_url = resolve(&config.base_url, "LLM_BASE_URL")
            .ok_or_else(|| Error::Config("llm.base_url or LLM_BASE_URL is required".into()))?;
        let api_key = resolve(&config.api_key, "LLM_API_KEY")
            .ok_or_else(|| Error::Config("llm.api_key or LLM_API_KEY is required".into()))?;
        let model = resolve(&config.model, "LLM_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string());

        Self::new(&base_url, &api_key, &model)
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn parse_reply(&self, body: &str) -> Result<LLMResponse> {
        let reply: MessagesReply = serde_json::from_str(body)
            .map_err(|e| Error::Llm(format!("malformed LLM response: {}", e)))?;
        if let Some(reason) = &reply.stop_reason {
            debug!(stop_reason = %reason, "LLM stop reason");
        }
        let content: String = reply
            .content
            .into_iter()
            .filter(|block| block.kind == "text")
            .map(|block| block.text)
            .collect();
        Ok(LLMResponse {
            content,
            model: reply.model.unwrap_or_else(|| self.model.clone()),
            input_tokens: reply.usage.input_tokens,
            output_tokens: reply.usage.output_tokens,
        })
    }
}

#[async_trait]
impl LanguageModel for LLMClient {
    async fn complete(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
        max_tokens: u32,
    ) -> Result<LLMResponse> {
        let request = MessagesRequest {
            model: &self.model,
            max_tokens,
            system: system_prompt,
            messages: [Turn {
                role: "user",
                content: prompt,
            }],
        };
        debug!(model = %self.model, prompt_chars = prompt.len(), "LLM request");

        let response = self
            .http
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&request)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(Error::Llm(format!(
                "LLM API error {}: {}",
                status.as_u16(),
                error_message(&body)
            )));
        }

        let parsed = self.parse_reply(&body)?;
        info!(
            model = %parsed.model,
            input_tokens = parsed.input_tokens,
            output_tokens = parsed.output_tokens,
            "LLM completion"
        );
        Ok(parsed)
    }
}

fn error_message(body: &str) -> String {
    match serde_json::from_str::<ApiErrorBody>(body) {
        Ok(err) => err
            .msg
            .or_else(|| err.error.and_then(|e| e.message))
            .unwrap_or_else(|| "unknown error".to_string()),
        Err(_) => body.chars().take(200).collect(),
    }
}
