use super::{ChatRequest, ChatTransport, TransportError};
use crate::protocol::BoxFuture;
use crate::util::truncate;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// OpenRouter-compatible base URL used when no override is configured
pub const DEFAULT_API_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// Hard ceiling on one completion round trip
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum length for response bodies attached to errors
const MAX_ERROR_CONTENT_LEN: usize = 200;

/// Blank out response bodies that look like they carry credentials.
fn sanitize_api_response(content: &str) -> String {
    const SECRET_PATTERNS: &[&str] = &[
        "api_key",
        "apikey",
        "secret",
        "password",
        "credential",
        "bearer",
        "sk-",
    ];

    let truncated = truncate(content, MAX_ERROR_CONTENT_LEN);
    let lower = truncated.to_lowercase();
    if SECRET_PATTERNS.iter().any(|p| lower.contains(p)) {
        return "(response details redacted - may contain sensitive data)".to_string();
    }
    truncated
}

#[derive(Serialize)]
struct ChatBody<'a> {
    model: &'a str,
    temperature: f32,
    max_tokens: u32,
    stop: Vec<&'a str>,
    messages: Vec<Message<'a>>,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: Option<MessageContent>,
}

#[derive(Deserialize)]
struct MessageContent {
    content: Option<String>,
}

/// Pull `choices[0].message.content` out of a response body.
fn extract_content(text: &str) -> Result<String, TransportError> {
    let parsed: ChatResponse = serde_json::from_str(text).map_err(|e| {
        TransportError::InvalidResponse(format!("{}: {}", e, sanitize_api_response(text)))
    })?;

    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message)
        .and_then(|m| m.content)
        .filter(|c| !c.trim().is_empty())
        .ok_or(TransportError::MissingContent)
}

/// Chat-completions client over `reqwest`.
///
/// Authorisation is the configured API key. The user's access token is
/// only sent when forwarding is switched on, which callers do for the
/// product's own backend and nothing else.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    forward_access_token: bool,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            api_key,
            forward_access_token: false,
            timeout,
        }
    }

    pub fn with_access_token_forwarding(mut self, forward: bool) -> Self {
        self.forward_access_token = forward;
        self
    }

    fn authorization<'a>(&'a self, bearer: Option<&'a str>) -> Result<&'a str, TransportError> {
        match (self.api_key.as_deref(), bearer) {
            (Some(key), _) => Ok(key),
            (None, Some(token)) if self.forward_access_token => Ok(token),
            _ => Err(TransportError::MissingApiKey),
        }
    }

    async fn round_trip(&self, request: &ChatRequest) -> Result<String, TransportError> {
        let body = ChatBody {
            model: &request.params.model,
            temperature: request.params.temperature,
            max_tokens: request.params.max_tokens,
            stop: vec![request.sentinel.as_str()],
            messages: vec![
                Message {
                    role: "system",
                    content: &request.system_prompt,
                },
                Message {
                    role: "user",
                    content: &request.user_input,
                },
            ],
        };

        let bearer = self.authorization(request.bearer.as_deref())?;
        let response = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .header("X-Title", "textpolish")
            .header("Authorization", format!("Bearer {}", bearer))
            .json(&body)
            .send()
            .await
            .map_err(classify_reqwest_error(self.timeout))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(classify_reqwest_error(self.timeout))?;

        if !status.is_success() {
            return Err(TransportError::RequestFailed {
                status: status.as_u16(),
                body: sanitize_api_response(&text),
            });
        }

        extract_content(&text)
    }
}

fn classify_reqwest_error(timeout: Duration) -> impl Fn(reqwest::Error) -> TransportError {
    move |err| {
        if err.is_timeout() {
            TransportError::Timeout(timeout)
        } else {
            TransportError::Network(err.to_string())
        }
    }
}

impl ChatTransport for HttpTransport {
    fn send<'a>(
        &'a self,
        request: &'a ChatRequest,
    ) -> BoxFuture<'a, Result<String, TransportError>> {
        Box::pin(async move {
            let started = Instant::now();
            // On timeout the in-flight future is dropped, which tears down the
            // connection rather than leaving it running in the background.
            let result = match tokio::time::timeout(self.timeout, self.round_trip(request)).await {
                Ok(result) => result,
                Err(_) => Err(TransportError::Timeout(self.timeout)),
            };

            let elapsed_ms = started.elapsed().as_millis() as u64;
            match &result {
                Ok(content) => {
                    debug!(elapsed_ms, chars = content.chars().count(), "completion received")
                }
                Err(err) => warn!(elapsed_ms, error = %err, "completion request failed"),
            }
            result
        })
    }

    fn check_credentials(&self, bearer: Option<&str>) -> Result<(), TransportError> {
        self.authorization(bearer).map(|_| ())
    }
}
