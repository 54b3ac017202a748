//! Completion service boundary.
//!
//! Roles and tools reach the language model only through
//! [`CompletionService::complete`]. The shipped implementation talks to a
//! local Ollama server; tests plug in scripted services.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Default Ollama endpoint.
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
/// Default model tag.
pub const DEFAULT_MODEL: &str = "llama3.2:1b";

/// Sampling and context options sent with every completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationOptions {
    pub temperature: f32,
    /// Maximum tokens to generate.
    pub max_tokens: u32,
    /// Context window size.
    pub context_window: u32,
    pub repeat_penalty: f32,
    pub top_k: u32,
    /// Nucleus sampling probability.
    pub top_p: f32,
    /// Worker threads on the inference host, if it takes the hint.
    pub threads: Option<u32>,
    /// System instruction (the role's behavioral profile).
    pub system: Option<String>,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            temperature: 0.1,
            max_tokens: 512,
            context_window: 4096,
            repeat_penalty: 1.1,
            top_k: 40,
            top_p: 0.9,
            threads: Some(4),
            system: None,
        }
    }
}

impl GenerationOptions {
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_system(mut self, system: &str) -> Self {
        self.system = Some(system.to_string());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// A stateless text-generation capability.
#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<String, ServiceError>;
}

/// Ollama `/api/generate` client.
pub struct OllamaClient {
    base_url: String,
    model: String,
    http: reqwest::Client,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
    num_ctx: u32,
    num_predict: u32,
    repeat_penalty: f32,
    top_k: u32,
    top_p: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_thread: Option<u32>,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

impl OllamaClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: DEFAULT_MODEL.to_string(),
            http: reqwest::Client::new(),
        }
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    /// Bound every request by `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self, ServiceError> {
        self.http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ServiceError::Transport(e.to_string()))?;
        Ok(self)
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// A refused or unreachable server is `Unavailable`; anything else on
    /// the wire is `Transport`.
    fn send_error(&self, e: reqwest::Error) -> ServiceError {
        if e.is_connect() {
            ServiceError::Unavailable(format!("{}: {e}", self.base_url))
        } else {
            ServiceError::Transport(e.to_string())
        }
    }
}

#[async_trait]
impl CompletionService for OllamaClient {
    async fn complete(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<String, ServiceError> {
        let body = GenerateRequest {
            model: &self.model,
            prompt,
            system: options.system.as_deref(),
            stream: false,
            options: OllamaOptions {
                temperature: options.temperature,
                num_ctx: options.context_window,
                num_predict: options.max_tokens,
                repeat_penalty: options.repeat_penalty,
                top_k: options.top_k,
                top_p: options.top_p,
                num_thread: options.threads,
            },
        };

        tracing::debug!(model = %self.model, prompt_len = prompt.len(), "Requesting completion");

        let resp = self
            .http
            .post(format!("{}/api/generate", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| self.send_error(e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ServiceError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed = resp
            .json::<GenerateResponse>()
            .await
            .map_err(|e| ServiceError::Decode(e.to_string()))?;
        if parsed.response.trim().is_empty() {
            return Err(ServiceError::Empty);
        }
        Ok(parsed.response)
    }
}

// ── Errors ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, thiserror::Error)]
pub enum ServiceError {
    #[error("completion request failed: {0}")]
    Transport(String),
    #[error("completion service returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed completion response: {0}")]
    Decode(String),
    #[error("completion service returned an empty response")]
    Empty,
    #[error("completion service unavailable: {0}")]
    Unavailable(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn refused_connection_is_unavailable() {
        let mut client = OllamaClient::new("http://127.0.0.1:1/");
        client.http = reqwest::Client::builder().no_proxy().build().unwrap();
        let err = client
            .complete("hi", &GenerationOptions::default())
            .await
            .unwrap_err();
        assert!(
            matches!(err, ServiceError::Unavailable(ref m) if m.starts_with("http://127.0.0.1:1")),
            "got {err:?}"
        );
    }

    #[test]
    fn defaults_match_local_model_profile() {
        let opts = GenerationOptions::default();
        assert_eq!(opts.context_window, 4096);
        assert_eq!(opts.max_tokens, 512);
        assert_eq!(opts.top_k, 40);
        assert!(opts.system.is_none());
    }

    #[test]
    fn request_body_uses_ollama_option_names() {
        let opts = GenerationOptions::default()
            .with_temperature(0.2)
            .with_system("be brief");
        let body = GenerateRequest {
            model: "m",
            prompt: "p",
            system: opts.system.as_deref(),
            stream: false,
            options: OllamaOptions {
                temperature: opts.temperature,
                num_ctx: opts.context_window,
                num_predict: opts.max_tokens,
                repeat_penalty: opts.repeat_penalty,
                top_k: opts.top_k,
                top_p: opts.top_p,
                num_thread: None,
            },
        };
        let v = serde_json::to_value(&body).unwrap();
        assert_eq!(v["system"], "be brief");
        assert_eq!(v["stream"], false);
        assert_eq!(v["options"]["num_ctx"], 4096);
        assert_eq!(v["options"]["num_predict"], 512);
        assert!(v["options"].get("num_thread").is_none());
    }

    #[test]
    fn trailing_slash_is_trimmed() {
        let client = OllamaClient::new("http://host:11434/").with_model("x");
        assert_eq!(client.base_url, "http://host:11434");
        assert_eq!(client.model(), "x");
    }
}
