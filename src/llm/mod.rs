pub mod client;

use crate::protocol::BoxFuture;
use std::time::Duration;
use thiserror::Error;

pub use client::HttpTransport;

/// Default model when the settings don't name one
pub const DEFAULT_MODEL: &str = "openai/gpt-4o-mini";
pub const DEFAULT_TEMPERATURE: f32 = 0.3;
pub const DEFAULT_MAX_TOKENS: u32 = 2048;

#[derive(Debug, Clone, PartialEq)]
pub struct ModelParams {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for ModelParams {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }
}

/// Everything one completion call needs.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub system_prompt: String,
    pub user_input: String,
    /// Sent as the sole stop sequence
    pub sentinel: String,
    pub params: ModelParams,
    /// Access token; the transport decides whether it may be sent
    pub bearer: Option<String>,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request failed with status {status}: {body}")]
    RequestFailed { status: u16, body: String },

    #[error("transport error: {0}")]
    Network(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("response had no completion content")]
    MissingContent,

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("no model API key configured for this endpoint")]
    MissingApiKey,
}

pub trait ChatTransport: Send + Sync {
    /// Send one request and return the completion text.
    fn send<'a>(&'a self, request: &'a ChatRequest)
        -> BoxFuture<'a, Result<String, TransportError>>;

    /// Whether a request carrying `bearer` could be authorised at all.
    /// Checked before any text is captured.
    fn check_credentials(&self, _bearer: Option<&str>) -> Result<(), TransportError> {
        Ok(())
    }
}
