//! Interactive token entry with a bounded number of attempts.

use super::store::TokenStore;
use super::GateError;
use crate::protocol::BoxFuture;
use tracing::{info, warn};

/// Attempts before `setup` gives up
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Source of candidate tokens, usually a terminal prompt.
pub trait TokenPrompter {
    /// `None` means the user cancelled.
    fn prompt(&self, attempt: u32, max_attempts: u32) -> Option<String>;

    fn rejected(&self, _remaining: u32) {}
}

pub trait TokenValidator: Send + Sync {
    fn validate<'a>(&'a self, token: &'a str) -> BoxFuture<'a, Result<bool, GateError>>;
}

/// Ask for a token until one validates or `max_attempts` is used up.
/// The first valid token is saved to `store` and returned.
pub async fn acquire_token_interactively(
    prompter: &dyn TokenPrompter,
    validator: &dyn TokenValidator,
    store: &dyn TokenStore,
    max_attempts: u32,
) -> Result<String, GateError> {
    for attempt in 1..=max_attempts {
        let remaining = max_attempts - attempt;
        let Some(candidate) = prompter.prompt(attempt, max_attempts) else {
            return Err(GateError::Cancelled);
        };
        let candidate = candidate.trim();
        if candidate.is_empty() {
            prompter.rejected(remaining);
            continue;
        }

        if validator.validate(candidate).await? {
            store.save(candidate)?;
            info!(attempt, "access token accepted");
            return Ok(candidate.to_string());
        }
        warn!(attempt, remaining, "access token rejected");
        prompter.rejected(remaining);
    }
    Err(GateError::AttemptsExhausted(max_attempts))
}

/// Reads tokens from stdin for `textpolish setup`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdinPrompter;

impl StdinPrompter {
    /// Ask for a model API key. Blank input or EOF skips.
    pub fn prompt_api_key(&self) -> Option<String> {
        use std::io::{self, Write};

        println!("  This endpoint needs its own API key (saved in your system keychain).");
        print!("  Model API key (blank to skip): ");
        io::stdout().flush().ok()?;

        let mut key = String::new();
        io::stdin().read_line(&mut key).ok()?;
        Some(key.trim().to_string()).filter(|k| !k.is_empty())
    }
}

impl TokenPrompter for StdinPrompter {
    fn prompt(&self, attempt: u32, max_attempts: u32) -> Option<String> {
        use std::io::{self, Write};

        if attempt == 1 {
            println!();
            println!("  ┌─────────────────────────────────────────────────────────┐");
            println!("  │  TEXTPOLISH SETUP                                       │");
            println!("  └─────────────────────────────────────────────────────────┘");
            println!();
            println!("  Paste your access token (saved in your system keychain).");
            println!();
        }
        print!("  Access token ({}/{}): ", attempt, max_attempts);
        io::stdout().flush().ok()?;

        let mut token = String::new();
        match io::stdin().read_line(&mut token) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(token),
        }
    }

    fn rejected(&self, remaining: u32) {
        if remaining > 0 {
            println!("  That token was not accepted. {} attempt(s) left.", remaining);
        } else {
            println!("  That token was not accepted.");
        }
    }
}
