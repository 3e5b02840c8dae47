//! Text-generation service client and structured-reply handling.
//!
//! This crate owns the three LLM-facing concerns of the normalize stage:
//! - [`LlmClient`] — synchronous request/response against a messages API
//! - [`prompt`] — the fixed grouping policy and per-chunk user messages
//! - [`parse`] — strict parse-with-validation of the structured reply
//!
//! The reply is never trusted: callers validate the full expected key set
//! and fall back to identity mappings for anything the service omits.

pub mod parse;
pub mod prompt;

use serde::{Deserialize, Serialize};

use tagrail_shared::{Result, TagrailError, clip};

/// Default messages API endpoint.
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";

/// API version header required by the service.
const API_VERSION: &str = "2023-06-01";

/// User-Agent string for LLM requests.
const USER_AGENT: &str = concat!("tagrail/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: [UserMessage<'a>; 1],
}

#[derive(Debug, Serialize)]
struct UserMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: String,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Client for the text-generation service.
#[derive(Debug, Clone)]
pub struct LlmClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
}

impl LlmClient {
    /// Create a client against the production endpoint.
    pub fn new(api_key: String, model: String, max_tokens: u32) -> Result<Self> {
        Self::with_base_url(DEFAULT_BASE_URL, api_key, model, max_tokens)
    }

    /// Create a client against a specific endpoint (tests use a mock server).
    pub fn with_base_url(
        base_url: impl Into<String>,
        api_key: String,
        model: String,
        max_tokens: u32,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .map_err(|e| TagrailError::Network(format!("failed to build HTTP client: {e}")))?;

        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }

        Ok(Self {
            http,
            base_url,
            api_key,
            model,
            max_tokens,
        })
    }

    /// Model id this client sends requests with.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Send one synchronous completion request and return the reply text.
    ///
    /// The reply carries no structural guarantees — see [`parse`] for
    /// validation.
    pub async fn complete(&self, system: &str, user: &str) -> Result<String> {
        let body = MessagesRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            system,
            messages: [UserMessage {
                role: "user",
                content: user,
            }],
        };

        let resp = self
            .http
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| TagrailError::Network(format!("llm request: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(TagrailError::Llm(format!(
                "HTTP {status}: {}",
                clip(&body, 200)
            )));
        }

        let body: MessagesResponse = resp
            .json()
            .await
            .map_err(|e| TagrailError::Llm(format!("response decode: {e}")))?;

        let text: String = body.content.into_iter().map(|b| b.text).collect();
        if text.is_empty() {
            return Err(TagrailError::Llm("empty completion".into()));
        }

        tracing::debug!(model = %self.model, reply_len = text.len(), "completion received");
        Ok(text)
    }
}
