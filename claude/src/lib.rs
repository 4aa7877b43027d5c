//! Minimal Anthropic Claude API client.
//!
//! Text in, text out: one non-streaming Messages API call per request,
//! bounded by a request timeout. Used as the default narration backend.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

const API_BASE: &str = "https://api.anthropic.com/v1";
const API_VERSION: &str = "2023-06-01";
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum Error {
    #[error("API key not configured")]
    NoApiKey,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out")]
    Timeout,

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::Timeout
        } else {
            Error::Network(e.to_string())
        }
    }
}

/// Claude API client. Cheap to clone.
#[derive(Clone)]
pub struct Claude {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl std::fmt::Debug for Claude {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Claude")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl Claude {
    pub fn new(api_key: impl Into<String>) -> Result<Self, Error> {
        Self::with_timeout(api_key, DEFAULT_TIMEOUT)
    }

    /// A client whose requests give up after `timeout`.
    pub fn with_timeout(api_key: impl Into<String>, timeout: Duration) -> Result<Self, Error> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(Error::NoApiKey);
        }
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(CONNECT_TIMEOUT.min(timeout))
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            api_key,
            model: DEFAULT_MODEL.to_string(),
            base_url: API_BASE.to_string(),
        })
    }

    /// Read the key from `ANTHROPIC_API_KEY`.
    pub fn from_env() -> Result<Self, Error> {
        Self::new(std::env::var("ANTHROPIC_API_KEY").map_err(|_| Error::NoApiKey)?)
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Point the client at another host, e.g. a proxy.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Send one request and wait for the whole reply.
    pub async fn complete(&self, request: Request) -> Result<Response, Error> {
        let reply = self
            .http
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&self.wire_body(&request))
            .send()
            .await?;

        let status = reply.status();
        if !status.is_success() {
            return Err(Error::Api {
                status: status.as_u16(),
                message: reply.text().await.unwrap_or_default(),
            });
        }

        let body: WireResponse = reply.json().await.map_err(|e| Error::Parse(e.to_string()))?;
        Ok(body.into())
    }

    fn wire_body<'a>(&'a self, request: &'a Request) -> WireRequest<'a> {
        WireRequest {
            model: request.model.as_deref().unwrap_or(&self.model),
            request,
        }
    }
}

// ============================================================================
// Requests
// ============================================================================

/// A completion request. Serializes to the Messages API body minus the
/// model, which the client fills in.
#[derive(Debug, Clone, Serialize)]
pub struct Request {
    #[serde(skip)]
    pub model: Option<String>,
    pub max_tokens: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

impl Request {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            model: None,
            max_tokens: 1024,
            system: None,
            messages,
            temperature: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One plain-text conversation turn.
#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub role: Role,
    #[serde(rename = "content")]
    pub text: String,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
        }
    }
}

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    #[serde(flatten)]
    request: &'a Request,
}

// ============================================================================
// Responses
// ============================================================================

#[derive(Debug, Clone)]
pub struct Response {
    pub id: String,
    pub model: String,
    /// Text blocks joined in order; other block types are dropped.
    pub text: String,
    pub stop_reason: StopReason,
    pub usage: Usage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    #[default]
    EndTurn,
    MaxTokens,
    StopSequence,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Usage {
    pub input_tokens: usize,
    pub output_tokens: usize,
}

#[derive(Deserialize)]
struct WireResponse {
    id: String,
    model: String,
    content: Vec<WireBlock>,
    stop_reason: Option<StopReason>,
    usage: Usage,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireBlock {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

impl From<WireResponse> for Response {
    fn from(wire: WireResponse) -> Self {
        let text = wire
            .content
            .into_iter()
            .filter_map(|block| match block {
                WireBlock::Text { text } => Some(text),
                WireBlock::Other => None,
            })
            .collect();
        Self {
            id: wire.id,
            model: wire.model,
            text,
            stop_reason: wire.stop_reason.unwrap_or_default(),
            usage: wire.usage,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_model() {
        let client = Claude::new("test-key").unwrap();
        assert_eq!(client.model(), DEFAULT_MODEL);
        assert_eq!(client.with_model("claude-3-opus").model(), "claude-3-opus");
    }

    #[test]
    fn test_blank_key_rejected() {
        assert!(matches!(Claude::new("  "), Err(Error::NoApiKey)));
    }

    #[test]
    fn test_debug_hides_api_key() {
        let client = Claude::new("secret-key").unwrap();
        assert!(!format!("{client:?}").contains("secret-key"));
    }

    #[test]
    fn test_wire_body() {
        let client = Claude::new("test-key").unwrap();
        let request = Request::new(vec![Message::user("Hello"), Message::assistant("Hi")])
            .with_system("Narrate.")
            .with_max_tokens(300);
        let json = serde_json::to_value(client.wire_body(&request)).unwrap();

        assert_eq!(json["model"], DEFAULT_MODEL);
        assert_eq!(json["max_tokens"], 300);
        assert_eq!(json["system"], "Narrate.");
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["messages"][1]["content"], "Hi");
        assert!(json.get("temperature").is_none());

        let pinned = request.with_model("claude-3-haiku");
        let json = serde_json::to_value(client.wire_body(&pinned)).unwrap();
        assert_eq!(json["model"], "claude-3-haiku");
    }

    #[test]
    fn test_response_joins_text_blocks() {
        let raw = serde_json::json!({
            "id": "msg_1",
            "model": DEFAULT_MODEL,
            "content": [
                {"type": "text", "text": "The goblin "},
                {"type": "thinking", "thinking": "hidden"},
                {"type": "text", "text": "staggers."}
            ],
            "stop_reason": "max_tokens",
            "usage": {"input_tokens": 10, "output_tokens": 4}
        });
        let response: Response = serde_json::from_value::<WireResponse>(raw).unwrap().into();
        assert_eq!(response.text, "The goblin staggers.");
        assert_eq!(response.stop_reason, StopReason::MaxTokens);
        assert_eq!(response.usage.output_tokens, 4);
    }
}
