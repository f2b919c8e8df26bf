//! HTTP backends for the [`ModelGateway`](super::ModelGateway).
//!
//! Each client performs exactly one request per call and maps the outcome to
//! a [`BackendError`] so the gateway's retry policy can classify it.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::api::gateway::{CompletionBackend, CompletionFuture, Prompt};
use crate::config::GatewayConfig;
use crate::error::{BackendError, BackendErrorKind, Error, Result};
use crate::{ANTHROPIC_URL, ANTHROPIC_VERSION, OPENROUTER_URL};

const USER_AGENT: &str = concat!("tome-rs/", env!("CARGO_PKG_VERSION"));

fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .build()
        .map_err(|e| Error::invalid_config(format!("failed to build HTTP client: {e}")))
}

/// Read the body and turn non-2xx responses into classified errors.
async fn read_body(resp: reqwest::Response, provider: &str) -> std::result::Result<String, BackendError> {
    let status = resp.status();
    let text = resp.text().await?;
    debug!("{provider} response: HTTP {status} ({} bytes)", text.len());
    if !status.is_success() {
        return Err(BackendError::from_status(
            status.as_u16(),
            format!("{provider} API HTTP {status}: {text}"),
        ));
    }
    Ok(text)
}

// ── OpenRouter ──────────────────────────────────────────────────────

#[derive(Serialize, Debug)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize, Debug)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize, Debug)]
struct RawChatResponse {
    choices: Option<Vec<RawChoice>>,
    error: Option<RawApiError>,
    usage: Option<UsageInfo>,
}

#[derive(Deserialize, Debug)]
struct RawChoice {
    message: RawMessage,
}

#[derive(Deserialize, Debug)]
struct RawMessage {
    content: Option<String>,
}

#[derive(Deserialize, Debug)]
struct RawApiError {
    message: String,
    #[serde(default)]
    code: Option<serde_json::Value>,
}

#[derive(Deserialize, Debug, Default)]
struct UsageInfo {
    #[serde(default)]
    prompt_tokens: Option<u32>,
    #[serde(default)]
    completion_tokens: Option<u32>,
}

/// Client for the OpenRouter chat completions API.
pub struct OpenRouterClient {
    client: reqwest::Client,
    api_key: String,
    model: String,
    url: String,
    temperature: f32,
}

impl OpenRouterClient {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self> {
        Ok(Self {
            client: http_client(crate::config::DEFAULT_REQUEST_TIMEOUT)?,
            api_key: api_key.into(),
            model: model.into(),
            url: OPENROUTER_URL.to_string(),
            temperature: 0.0,
        })
    }

    pub fn from_config(config: &GatewayConfig) -> Result<Self> {
        Ok(Self {
            client: http_client(config.request_timeout)?,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            url: config
                .base_url
                .clone()
                .unwrap_or_else(|| OPENROUTER_URL.to_string()),
            temperature: config.temperature,
        })
    }

    async fn chat(
        &self,
        prompt: &Prompt,
        max_tokens: u32,
    ) -> std::result::Result<String, BackendError> {
        let mut messages = Vec::with_capacity(2);
        if !prompt.system.is_empty() {
            messages.push(ChatMessage {
                role: "system",
                content: &prompt.system,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: &prompt.user,
        });
        let body = ChatRequest {
            model: &self.model,
            messages,
            max_tokens,
            temperature: self.temperature,
        };
        debug!(
            "LLM request: model={}, max_tokens={}, temp={}",
            self.model, max_tokens, self.temperature
        );
        trace!(
            "Request payload size: {} bytes",
            serde_json::to_string(&body).map_or(0, |s| s.len())
        );

        let start = Instant::now();
        let resp = self
            .client
            .post(&self.url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("X-Title", "tome-rs")
            .json(&body)
            .send()
            .await?;
        let text = read_body(resp, "OpenRouter").await?;
        debug!("OpenRouter call took {:.1}s", start.elapsed().as_secs_f64());

        let parsed: RawChatResponse = serde_json::from_str(&text).map_err(|e| {
            BackendError::new(
                BackendErrorKind::InvalidResponse,
                format!("failed to parse response: {e}"),
            )
        })?;

        if let Some(err) = parsed.error {
            // Errors can arrive inside a 200 body; the code mirrors an HTTP status.
            let status = err
                .code
                .as_ref()
                .and_then(|c| c.as_u64())
                .and_then(|c| u16::try_from(c).ok())
                .unwrap_or(500);
            return Err(BackendError::from_status(
                status,
                format!("OpenRouter API error: {}", err.message),
            ));
        }

        if let Some(usage) = parsed.usage {
            debug!(
                "Token usage: prompt={}, completion={}",
                usage.prompt_tokens.unwrap_or(0),
                usage.completion_tokens.unwrap_or(0),
            );
        }

        parsed
            .choices
            .and_then(|c| c.into_iter().next())
            .and_then(|c| c.message.content)
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| {
                BackendError::new(BackendErrorKind::InvalidResponse, "empty completion")
            })
    }
}

impl CompletionBackend for OpenRouterClient {
    fn name(&self) -> &str {
        "openrouter"
    }

    fn complete<'a>(&'a self, prompt: &'a Prompt, max_output_tokens: u32) -> CompletionFuture<'a> {
        Box::pin(self.chat(prompt, max_output_tokens))
    }
}

// ── Anthropic ───────────────────────────────────────────────────────

#[derive(Serialize, Debug)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "str::is_empty")]
    system: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Deserialize, Debug)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: Option<AnthropicUsage>,
}

#[derive(Deserialize, Debug)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize, Debug)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}

/// Client for the Anthropic messages API.
pub struct AnthropicClient {
    client: reqwest::Client,
    api_key: String,
    model: String,
    url: String,
    temperature: f32,
}

impl AnthropicClient {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self> {
        Ok(Self {
            client: http_client(crate::config::DEFAULT_REQUEST_TIMEOUT)?,
            api_key: api_key.into(),
            model: model.into(),
            url: ANTHROPIC_URL.to_string(),
            temperature: 0.0,
        })
    }

    pub fn from_config(config: &GatewayConfig) -> Result<Self> {
        Ok(Self {
            client: http_client(config.request_timeout)?,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            url: config
                .base_url
                .clone()
                .unwrap_or_else(|| ANTHROPIC_URL.to_string()),
            temperature: config.temperature,
        })
    }

    async fn messages(
        &self,
        prompt: &Prompt,
        max_tokens: u32,
    ) -> std::result::Result<String, BackendError> {
        let body = MessagesRequest {
            model: &self.model,
            max_tokens,
            system: &prompt.system,
            messages: vec![ChatMessage {
                role: "user",
                content: &prompt.user,
            }],
            temperature: self.temperature,
        };
        debug!("LLM request: model={}, max_tokens={}", self.model, max_tokens);

        let start = Instant::now();
        let resp = self
            .client
            .post(&self.url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await?;
        let text = read_body(resp, "Anthropic").await?;
        debug!("Anthropic call took {:.1}s", start.elapsed().as_secs_f64());

        let parsed: MessagesResponse = serde_json::from_str(&text).map_err(|e| {
            BackendError::new(
                BackendErrorKind::InvalidResponse,
                format!("failed to parse response: {e}"),
            )
        })?;

        if let Some(usage) = &parsed.usage {
            debug!(
                "Token usage: input={}, output={}",
                usage.input_tokens, usage.output_tokens
            );
        }

        let text: String = parsed
            .content
            .into_iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join("");
        if text.trim().is_empty() {
            return Err(BackendError::new(
                BackendErrorKind::InvalidResponse,
                "empty completion",
            ));
        }
        Ok(text)
    }
}

impl CompletionBackend for AnthropicClient {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn complete<'a>(&'a self, prompt: &'a Prompt, max_output_tokens: u32) -> CompletionFuture<'a> {
        Box::pin(self.messages(prompt, max_output_tokens))
    }
}
