//! Providers
//!
//! Concrete transports: OpenAI-compatible chat completion and embedding over
//! HTTP, and console input for human peers.

pub mod profile;

use crate::broker::{Backend, Transport};
use crate::error::{LlmuxError, TransportError};
use crate::types::ChatMessage;
use async_trait::async_trait;
use profile::{ApiType, BackendConfig, BackendKind};
use serde::{Deserialize, Serialize};
use std::io::{BufRead, Write};
use tracing::debug;

const OPENAI_API_BASE: &str = "https://api.openai.com/v1";

/// Endpoint and credentials shared by both HTTP transports.
#[derive(Debug, Clone)]
struct Endpoint {
    client: reqwest::Client,
    api_type: ApiType,
    api_base: String,
    api_version: Option<String>,
    api_key: String,
    model: String,
}

impl Endpoint {
    fn from_config(config: &BackendConfig) -> Result<Self, LlmuxError> {
        config.validate().map_err(LlmuxError::ConfigError)?;
        let api_key = config.resolved_api_key().ok_or_else(|| {
            LlmuxError::ConfigError(format!(
                "API key required for {} (set api_key or the provider environment variable)",
                config.model
            ))
        })?;
        Ok(Self {
            client: reqwest::Client::new(),
            api_type: config.api_type,
            api_base: config
                .api_base
                .clone()
                .unwrap_or_else(|| OPENAI_API_BASE.to_string())
                .trim_end_matches('/')
                .to_string(),
            api_version: config.api_version.clone(),
            api_key,
            model: config.model.clone(),
        })
    }

    fn url(&self, operation: &str) -> String {
        match self.api_type {
            ApiType::OpenAI => format!("{}/{}", self.api_base, operation),
            ApiType::Azure => format!(
                "{}/openai/deployments/{}/{}?api-version={}",
                self.api_base,
                self.model,
                operation,
                self.api_version.as_deref().unwrap_or_default()
            ),
        }
    }

    async fn post<B, R>(&self, operation: &str, body: &B) -> Result<R, TransportError>
    where
        B: Serialize + Sync,
        R: for<'de> Deserialize<'de>,
    {
        let request = self.client.post(self.url(operation)).json(body);
        let request = match self.api_type {
            ApiType::OpenAI => request.bearer_auth(&self.api_key),
            ApiType::Azure => request.header("api-key", &self.api_key),
        };
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }
        response
            .json::<R>()
            .await
            .map_err(|e| TransportError::InvalidResponse(e.to_string()))
    }
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: ChatMessage,
}

/// Chat completion transport.
#[derive(Debug, Clone)]
pub struct ChatCompletion {
    endpoint: Endpoint,
    temperature: Option<f32>,
}

impl ChatCompletion {
    pub fn from_config(config: &BackendConfig) -> Result<Self, LlmuxError> {
        Ok(Self {
            endpoint: Endpoint::from_config(config)?,
            temperature: config.temperature,
        })
    }
}

#[async_trait]
impl Transport for ChatCompletion {
    type Payload = Vec<ChatMessage>;
    type Output = String;

    async fn call(&self, messages: Vec<ChatMessage>) -> Result<String, TransportError> {
        let model = match self.endpoint.api_type {
            ApiType::OpenAI => Some(self.endpoint.model.as_str()),
            ApiType::Azure => None,
        };
        let request = CompletionRequest {
            model,
            messages: &messages,
            temperature: self.temperature,
        };
        debug!(model = %self.endpoint.model, messages = messages.len(), "Calling chat completion");
        let response: CompletionResponse = self.endpoint.post("chat/completions", &request).await?;
        response
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| TransportError::InvalidResponse("response has no choices".to_string()))
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    input: [&'a str; 1],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// Text embedding transport.
#[derive(Debug, Clone)]
pub struct Embedding {
    endpoint: Endpoint,
}

impl Embedding {
    pub fn from_config(config: &BackendConfig) -> Result<Self, LlmuxError> {
        Ok(Self {
            endpoint: Endpoint::from_config(config)?,
        })
    }
}

#[async_trait]
impl Transport for Embedding {
    type Payload = String;
    type Output = Vec<f32>;

    async fn call(&self, text: String) -> Result<Vec<f32>, TransportError> {
        let model = match self.endpoint.api_type {
            ApiType::OpenAI => Some(self.endpoint.model.as_str()),
            ApiType::Azure => None,
        };
        let request = EmbeddingRequest {
            model,
            input: [text.as_str()],
        };
        let response: EmbeddingResponse = self.endpoint.post("embeddings", &request).await?;
        response
            .data
            .into_iter()
            .next()
            .map(|data| data.embedding)
            .ok_or_else(|| TransportError::InvalidResponse("response has no embedding".to_string()))
    }
}

/// Prints a prompt and reads one line from stdin. `None` means end of input.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleInput;

#[async_trait]
impl Transport for ConsoleInput {
    type Payload = String;
    type Output = Option<String>;

    async fn call(&self, prompt: String) -> Result<Option<String>, TransportError> {
        tokio::task::spawn_blocking(move || {
            let mut stdout = std::io::stdout();
            write!(stdout, "{}", prompt).and_then(|_| stdout.flush()).map_err(|e| TransportError::Request(e.to_string()))?;
            let mut line = String::new();
            let read = std::io::stdin()
                .lock()
                .read_line(&mut line)
                .map_err(|e| TransportError::Request(e.to_string()))?;
            if read == 0 {
                return Ok(None);
            }
            Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
        })
        .await
        .map_err(|e| TransportError::Request(e.to_string()))?
    }
}

/// Build a chat backend from configuration.
pub fn chat_backend(name: &str, config: &BackendConfig) -> Result<Backend<ChatCompletion>, LlmuxError> {
    if config.kind != BackendKind::Chat {
        return Err(LlmuxError::ConfigError(format!(
            "Backend '{}' is not a chat backend",
            name
        )));
    }
    Ok(Backend::new(name, config.description(), ChatCompletion::from_config(config)?)
        .with_min_interval(config.min_interval())
        .with_discipline(config.discipline))
}

/// Build an embedding backend from configuration.
pub fn embedding_backend(name: &str, config: &BackendConfig) -> Result<Backend<Embedding>, LlmuxError> {
    if config.kind != BackendKind::Embedding {
        return Err(LlmuxError::ConfigError(format!(
            "Backend '{}' is not an embedding backend",
            name
        )));
    }
    Ok(Backend::new(name, config.description(), Embedding::from_config(config)?)
        .with_min_interval(config.min_interval())
        .with_discipline(config.discipline))
}

/// A console backend. Reading a line is never rate limited.
pub fn console_backend() -> Backend<ConsoleInput> {
    Backend::new("command_line_interface", "backend for user keyboard input.", ConsoleInput)
}
