//! LLM gateway adapter.
//!
//! The AI-enhanced forecaster only needs `prompt -> text`. [`LlmGateway`] is
//! that seam; [`HttpGateway`] speaks the OpenAI-compatible chat-completions
//! protocol over a blocking `ureq` agent.

use crate::error::{ForecastError, Result};
use regex::Regex;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, warn};

/// Primary credential variable.
pub const API_KEY_VAR: &str = "LEVY_LLM_API_KEY";
/// Credential variable consulted when [`API_KEY_VAR`] is unset.
pub const FALLBACK_API_KEY_VAR: &str = "OPENAI_API_KEY";
pub const BASE_URL_VAR: &str = "LEVY_LLM_BASE_URL";
pub const MODEL_VAR: &str = "LEVY_LLM_MODEL";

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Text-in, text-out language model.
pub trait LlmGateway: Send + Sync {
    /// Generate a completion for `prompt`.
    fn generate(&self, prompt: &str, max_tokens: u32, temperature: f64) -> Result<String>;

    /// Whether the gateway can currently serve requests.
    fn is_available(&self) -> bool {
        true
    }
}

/// Connection settings for [`HttpGateway`].
#[derive(Clone)]
pub struct GatewayConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: String,
    pub max_tokens: u32,
    pub temperature: f64,
    pub timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_key: String::new(),
            max_tokens: 50,
            temperature: 0.0,
            timeout: Duration::from_secs(30),
        }
    }
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &"<redacted>")
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl GatewayConfig {
    /// Default settings with the given credential.
    pub fn with_api_key(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            ..Self::default()
        }
    }

    /// Read configuration from the process environment.
    ///
    /// Returns `None` when no credential is set, which leaves the AI-enhanced
    /// model unavailable.
    pub fn from_env() -> Option<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`GatewayConfig::from_env`] over an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Option<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let api_key = non_empty(API_KEY_VAR).or_else(|| non_empty(FALLBACK_API_KEY_VAR))?;
        let mut config = Self::with_api_key(api_key);
        if let Some(base_url) = non_empty(BASE_URL_VAR) {
            config.base_url = base_url.trim_end_matches('/').to_string();
        }
        if let Some(model) = non_empty(MODEL_VAR) {
            config.model = model;
        }
        Some(config)
    }
}

/// Blocking HTTP client for an OpenAI-compatible chat-completions endpoint.
pub struct HttpGateway {
    config: GatewayConfig,
    agent: ureq::Agent,
}

impl std::fmt::Debug for HttpGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpGateway")
            .field("config", &self.config)
            .finish()
    }
}

impl HttpGateway {
    pub fn new(config: GatewayConfig) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(config.timeout).build();
        Self { config, agent }
    }

    /// Gateway configured from the environment, if a credential is present.
    pub fn from_env() -> Option<Self> {
        GatewayConfig::from_env().map(Self::new)
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url)
    }
}

impl LlmGateway for HttpGateway {
    fn generate(&self, prompt: &str, max_tokens: u32, temperature: f64) -> Result<String> {
        let body = serde_json::json!({
            "model": self.config.model,
            "messages": [{ "role": "user", "content": prompt }],
            "max_tokens": max_tokens,
            "temperature": temperature,
        });

        debug!(model = %self.config.model, max_tokens, "sending completion request");

        let response = self
            .agent
            .post(&self.endpoint())
            .set("Authorization", &format!("Bearer {}", self.config.api_key))
            .set("Content-Type", "application/json")
            .send_json(body)
            .map_err(|e| {
                let message = match e {
                    ureq::Error::Status(code, _) => format!("HTTP status {}", code),
                    ureq::Error::Transport(t) => format!("transport error: {}", t),
                };
                warn!(error = %message, "completion request failed");
                ForecastError::GatewayUnavailable(message)
            })?;

        let json: serde_json::Value = response.into_json().map_err(|e| {
            ForecastError::GatewayUnavailable(format!("invalid response body: {}", e))
        })?;

        extract_content(&json)
    }

    fn is_available(&self) -> bool {
        !self.config.api_key.trim().is_empty()
    }
}

/// First choice's message content from a chat-completions response.
fn extract_content(json: &serde_json::Value) -> Result<String> {
    json.get("choices")
        .and_then(|choices| choices.get(0))
        .and_then(|choice| choice.get("message"))
        .and_then(|message| message.get("content"))
        .and_then(|content| content.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| {
            ForecastError::GatewayUnavailable("response has no message content".to_string())
        })
}

/// First signed decimal number in `text`, e.g. `"about -1.25 per $1000"` → `-1.25`.
pub fn parse_first_float(text: &str) -> Option<f64> {
    static NUMBER: OnceLock<Option<Regex>> = OnceLock::new();
    let pattern = NUMBER
        .get_or_init(|| Regex::new(r"[-+]?(?:\d+(?:\.\d+)?|\.\d+)").ok())
        .as_ref()?;
    pattern.find(text)?.as_str().parse().ok()
}
