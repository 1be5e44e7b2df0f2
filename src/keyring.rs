//! Keychain storage for textpolish credentials
//!
//! The access token and an optional model API key live together in one
//! keychain entry as JSON, so the OS only prompts once.

use keyring::Entry;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, OnceLock};
use tracing::warn;

const KEYRING_SERVICE: &str = "textpolish-credentials";
const KEYRING_USERNAME: &str = "default";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoredCredentials {
    #[serde(skip_serializing_if = "Option::is_none")]
    access_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    api_key: Option<String>,
}

type KeyringResult<T> = Result<T, String>;

static CREDENTIALS_CACHE: OnceLock<Mutex<Option<StoredCredentials>>> = OnceLock::new();
static KEYRING_ERROR_WARNED: AtomicBool = AtomicBool::new(false);

fn credentials_cache() -> &'static Mutex<Option<StoredCredentials>> {
    CREDENTIALS_CACHE.get_or_init(|| Mutex::new(None))
}

/// Tests never touch the real keychain.
pub fn keyring_disabled() -> bool {
    if cfg!(test) {
        return true;
    }
    matches!(
        std::env::var("TEXTPOLISH_DISABLE_KEYRING")
            .unwrap_or_default()
            .to_lowercase()
            .as_str(),
        "1" | "true" | "yes"
    )
}

fn keyring_entry() -> Result<Entry, keyring::Error> {
    Entry::new(KEYRING_SERVICE, KEYRING_USERNAME)
}

/// Warn about keychain errors only once per process
pub fn warn_keychain_error_once(context: &str, err: &str) {
    if KEYRING_ERROR_WARNED.swap(true, Ordering::Relaxed) {
        return;
    }
    warn!(context, error = err, "couldn't access system keychain");
    eprintln!(
        "  Warning: Couldn't access system keychain for {}: {}",
        context, err
    );
    eprintln!("  Tip: Set TEXTPOLISH_TOKEN and TEXTPOLISH_API_KEY to bypass the keychain.");
}

fn read_credentials_uncached() -> KeyringResult<StoredCredentials> {
    if keyring_disabled() {
        return Ok(StoredCredentials::default());
    }
    let entry = keyring_entry().map_err(|e| e.to_string())?;
    match entry.get_password() {
        Ok(json) => {
            serde_json::from_str(&json).map_err(|e| format!("Failed to parse credentials: {}", e))
        }
        Err(keyring::Error::NoEntry) => Ok(StoredCredentials::default()),
        Err(err) => Err(err.to_string()),
    }
}

fn write_credentials(creds: &StoredCredentials) -> KeyringResult<()> {
    if keyring_disabled() {
        return Ok(());
    }
    let json = serde_json::to_string(creds).map_err(|e| e.to_string())?;
    let entry = keyring_entry().map_err(|e| e.to_string())?;
    entry.set_password(&json).map_err(|e| e.to_string())
}

fn read_credentials_cached() -> KeyringResult<StoredCredentials> {
    let mut guard = match credentials_cache().lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    if let Some(creds) = guard.as_ref() {
        return Ok(creds.clone());
    }
    let creds = read_credentials_uncached()?;
    *guard = Some(creds.clone());
    Ok(creds)
}

fn update_credentials(change: impl FnOnce(&mut StoredCredentials)) -> KeyringResult<()> {
    let mut creds = read_credentials_cached().unwrap_or_default();
    change(&mut creds);
    write_credentials(&creds)?;
    let mut guard = match credentials_cache().lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    *guard = Some(creds);
    Ok(())
}

// ============================================================================
// Public API
// ============================================================================

pub fn get_access_token() -> KeyringResult<Option<String>> {
    Ok(read_credentials_cached()?.access_token)
}

pub fn set_access_token(token: &str) -> KeyringResult<()> {
    let token = token.to_string();
    update_credentials(|creds| creds.access_token = Some(token))
}

pub fn clear_access_token() -> KeyringResult<()> {
    update_credentials(|creds| creds.access_token = None)
}

/// Model API key saved by `setup`, if any
pub fn get_api_key() -> KeyringResult<Option<String>> {
    Ok(read_credentials_cached()?.api_key)
}

pub fn set_api_key(key: &str) -> KeyringResult<()> {
    let key = key.to_string();
    update_credentials(|creds| creds.api_key = Some(key))
}

pub fn clear_api_key() -> KeyringResult<()> {
    update_credentials(|creds| creds.api_key = None)
}
