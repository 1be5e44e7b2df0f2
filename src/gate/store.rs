//! Where the access token lives between runs.

use super::GateError;
use crate::keyring;
use std::sync::Mutex;

/// Environment override checked before the keychain
pub const TOKEN_ENV_VAR: &str = "TEXTPOLISH_TOKEN";

pub trait TokenStore: Send + Sync {
    fn load(&self) -> Result<Option<String>, GateError>;
    fn save(&self, token: &str) -> Result<(), GateError>;
    fn clear(&self) -> Result<(), GateError>;
}

/// Token from `TEXTPOLISH_TOKEN`, otherwise the OS keychain.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeyringTokenStore;

impl TokenStore for KeyringTokenStore {
    fn load(&self) -> Result<Option<String>, GateError> {
        if let Ok(token) = std::env::var(TOKEN_ENV_VAR) {
            let token = token.trim().to_string();
            if !token.is_empty() {
                return Ok(Some(token));
            }
        }
        keyring::get_access_token().map_err(|e| {
            keyring::warn_keychain_error_once("access token", &e);
            GateError::Store(e)
        })
    }

    fn save(&self, token: &str) -> Result<(), GateError> {
        keyring::set_access_token(token).map_err(GateError::Store)
    }

    fn clear(&self) -> Result<(), GateError> {
        keyring::clear_access_token().map_err(GateError::Store)
    }
}

#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    token: Mutex<Option<String>>,
}

impl MemoryTokenStore {
    pub fn with_token(token: &str) -> Self {
        Self {
            token: Mutex::new(Some(token.to_string())),
        }
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        match self.token.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn load(&self) -> Result<Option<String>, GateError> {
        Ok(self.slot().clone())
    }

    fn save(&self, token: &str) -> Result<(), GateError> {
        *self.slot() = Some(token.to_string());
        Ok(())
    }

    fn clear(&self) -> Result<(), GateError> {
        *self.slot() = None;
        Ok(())
    }
}
