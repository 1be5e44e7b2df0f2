//! Failure taxonomy for one refine invocation.
//!
//! Every variant maps to a fixed, generic user-facing notice. Technical
//! detail (status codes, response bodies, OS errors) only goes to the
//! diagnostic log.

use crate::llm::TransportError;
use crate::protocol::Notice;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RefineError {
    #[error("no input text could be acquired")]
    NoTextAvailable,

    #[error("access check failed")]
    AccessDenied,

    #[error("usage limit reached")]
    UsageLimitReached,

    #[error("input matched an override heuristic")]
    SuspiciousInputBlocked,

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("response echoed hidden prompt content")]
    LeakDetected,

    #[error("delivery failed: {0}")]
    DeliveryFailed(String),
}

impl RefineError {
    /// The notice shown to the user, or `None` when the failure is silent.
    pub fn notice(&self) -> Option<Notice> {
        match self {
            RefineError::NoTextAvailable => Some(
                Notice::error("No text found to refine.")
                    .with_action("Select some text or copy it to the clipboard, then run again."),
            ),
            RefineError::AccessDenied => Some(
                Notice::error("Access token missing or invalid.")
                    .with_action("Run `textpolish setup` to enter your access token."),
            ),
            RefineError::UsageLimitReached => Some(
                Notice::error("Usage limit reached.")
                    .with_action("Upgrade your plan or wait for the limit to reset."),
            ),
            RefineError::SuspiciousInputBlocked => None,
            RefineError::Transport(TransportError::MissingApiKey) => Some(
                Notice::error("No model API key configured.")
                    .with_action("Run `textpolish setup` or set TEXTPOLISH_API_KEY."),
            ),
            RefineError::Transport(_) => Some(Notice::error("Request failed, please try again.")),
            RefineError::LeakDetected => {
                Some(Notice::warning("Response blocked for security reasons."))
            }
            RefineError::DeliveryFailed(_) => {
                Some(Notice::error("Failed to apply the result, please try again."))
            }
        }
    }
}
