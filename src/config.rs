//! Configuration management for textpolish
//!
//! Stores settings in ~/.config/textpolish/config.json. Every field has a
//! default, so partial files load fine.

use crate::capture::clipboard::RestorePolicy;
use crate::capture::keystroke::Platform;
use crate::capture::AcquisitionSettings;
use crate::deliver::DeliverySettings;
use crate::gate::{GateSettings, DEFAULT_BACKEND_URL};
use crate::keyring;
use crate::llm::client::{DEFAULT_API_BASE_URL, DEFAULT_REQUEST_TIMEOUT};
use crate::llm::{ModelParams, DEFAULT_MAX_TOKENS, DEFAULT_MODEL, DEFAULT_TEMPERATURE};
use crate::prompt::templates::REFINE_INSTRUCTIONS;
use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// Model API key override
pub const API_KEY_ENV_VAR: &str = "TEXTPOLISH_API_KEY";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Override for the chat-completions base URL
    pub api_base_url: Option<String>,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Free-form guidance placed ahead of the instructions
    pub custom_context: Option<String>,
    /// Replaces the built-in instruction body
    pub instruction_template: Option<String>,
    pub request_timeout_secs: u64,
    pub copy_settle_ms: u64,
    pub paste_settle_ms: u64,
    pub keystroke_timeout_ms: u64,
    pub clipboard_timeout_ms: u64,
    pub restore_clipboard_after_paste: bool,
    pub restore_delay_ms: u64,
    /// Upper bound on how long the CLI keeps serving its clipboard write
    /// on Linux, where content vanishes with the owning process
    pub clipboard_linger_ms: u64,
    pub include_codebase_context: bool,
    pub backend_url: String,
    pub auth_cache_secs: u64,
    pub usage_cache_secs: u64,
    pub codebase_cache_secs: u64,
    /// Tokens exempt from usage limits
    pub premium_tokens: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: None,
            model: DEFAULT_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            custom_context: None,
            instruction_template: None,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT.as_secs(),
            copy_settle_ms: Platform::detect().default_copy_settle().as_millis() as u64,
            paste_settle_ms: 50,
            keystroke_timeout_ms: 2_000,
            clipboard_timeout_ms: 1_000,
            restore_clipboard_after_paste: false,
            restore_delay_ms: 500,
            clipboard_linger_ms: 5_000,
            include_codebase_context: true,
            backend_url: DEFAULT_BACKEND_URL.to_string(),
            auth_cache_secs: 300,
            usage_cache_secs: 60,
            codebase_cache_secs: 300,
            premium_tokens: Vec::new(),
        }
    }
}

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("textpolish"))
    }

    fn config_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("config.json"))
    }

    /// Load config from disk, or return default
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    /// Load from `path`. A file that fails to parse is moved aside and
    /// defaults are used.
    pub fn load_from(path: &Path) -> Self {
        let Ok(content) = fs::read_to_string(path) else {
            return Self::default();
        };
        match serde_json::from_str(&content) {
            Ok(config) => config,
            Err(err) => {
                preserve_corrupt_config(path, &content);
                warn!(
                    path = %path.display(),
                    error = %err,
                    "config file corrupted; using defaults"
                );
                eprintln!(
                    "  Warning: Config file was corrupted ({}). \
                     A backup was saved and defaults were loaded.",
                    err
                );
                Self::default()
            }
        }
    }

    /// Write to the default location. Returns the path written.
    pub fn save(&self) -> anyhow::Result<PathBuf> {
        let path =
            Self::config_path().ok_or_else(|| anyhow!("Could not determine config directory"))?;
        self.save_to(&path)?;
        Ok(path)
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).context("Failed to create config directory")?;

            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                if let Err(e) = fs::set_permissions(dir, fs::Permissions::from_mode(0o700)) {
                    warn!(error = %e, "failed to set config directory permissions");
                }
            }
        }

        let content = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        write_config_atomic(path, &content).context("Failed to write config")
    }

    /// Get the config file location for display
    pub fn config_location() -> String {
        Self::config_path()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "~/.config/textpolish/config.json".to_string())
    }

    // ═══════════════════════════════════════════════════════════════════
    // Derived views
    // ═══════════════════════════════════════════════════════════════════

    pub fn model_params(&self) -> ModelParams {
        ModelParams {
            model: self.model.clone(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }

    /// Base URL for the model endpoint. Invalid overrides fall back to
    /// the default with a warning.
    pub fn api_base_url(&self) -> String {
        let configured = self.api_base_url.as_deref().map(str::trim).filter(|u| !u.is_empty());
        match configured {
            Some(raw) => match url::Url::parse(raw) {
                Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {
                    raw.trim_end_matches('/').to_string()
                }
                _ => {
                    warn!(url = raw, "ignoring invalid api_base_url override");
                    DEFAULT_API_BASE_URL.to_string()
                }
            },
            None => DEFAULT_API_BASE_URL.to_string(),
        }
    }

    pub fn chat_endpoint(&self) -> String {
        format!("{}/chat/completions", self.api_base_url())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn keystroke_timeout(&self) -> Duration {
        Duration::from_millis(self.keystroke_timeout_ms)
    }

    pub fn clipboard_timeout(&self) -> Duration {
        Duration::from_millis(self.clipboard_timeout_ms)
    }

    pub fn clipboard_linger(&self) -> Duration {
        Duration::from_millis(self.clipboard_linger_ms)
    }

    pub fn codebase_cache(&self) -> Duration {
        Duration::from_secs(self.codebase_cache_secs)
    }

    pub fn instructions(&self) -> String {
        self.instruction_template
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or(REFINE_INSTRUCTIONS)
            .to_string()
    }

    pub fn acquisition_settings(&self) -> AcquisitionSettings {
        AcquisitionSettings {
            copy_settle: Duration::from_millis(self.copy_settle_ms),
        }
    }

    pub fn delivery_settings(&self) -> DeliverySettings {
        let restore_policy = if self.restore_clipboard_after_paste {
            RestorePolicy::Restore {
                delay: Duration::from_millis(self.restore_delay_ms),
            }
        } else {
            RestorePolicy::LeaveOutput
        };
        DeliverySettings {
            restore_policy,
            paste_settle: Duration::from_millis(self.paste_settle_ms),
        }
    }

    pub fn gate_settings(&self) -> GateSettings {
        GateSettings {
            backend_url: self.backend_url.clone(),
            auth_cache: Duration::from_secs(self.auth_cache_secs),
            usage_cache: Duration::from_secs(self.usage_cache_secs),
            premium_tokens: self
                .premium_tokens
                .iter()
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect::<HashSet<_>>(),
        }
    }

    /// Whether the model endpoint is served by the product backend, the
    /// only place the access token may be sent.
    pub fn forwards_access_token(&self) -> bool {
        match (url::Url::parse(&self.api_base_url()), url::Url::parse(&self.backend_url)) {
            (Ok(endpoint), Ok(backend)) => endpoint.origin() == backend.origin(),
            _ => false,
        }
    }

    /// Model API key from the environment or the keychain.
    pub fn api_key(&self) -> Option<String> {
        if let Ok(key) = std::env::var(API_KEY_ENV_VAR) {
            if !key.trim().is_empty() {
                return Some(key.trim().to_string());
            }
        }
        match keyring::get_api_key() {
            Ok(key) => key,
            Err(err) => {
                keyring::warn_keychain_error_once("API key", &err);
                None
            }
        }
    }
}

fn preserve_corrupt_config(path: &Path, content: &str) {
    let corrupt_path = path.with_extension("json.corrupt");
    if fs::rename(path, &corrupt_path).is_err() {
        let _ = fs::write(&corrupt_path, content);
    }
}

fn write_config_atomic(path: &Path, content: &str) -> anyhow::Result<()> {
    use std::fs::OpenOptions;
    use std::io::Write;

    let tmp_path = path.with_extension("tmp");
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&tmp_path)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) = file.set_permissions(fs::Permissions::from_mode(0o600)) {
            warn!(error = %e, "failed to set temp config file permissions");
        }
    }

    file.write_all(content.as_bytes())?;
    drop(file);

    if let Err(err) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(err.into());
    }
    Ok(())
}
