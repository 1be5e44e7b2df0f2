//! OS-level copy/paste keystrokes sent to whatever application has focus.
//!
//! Each platform gets exactly one strategy: a single shell-out to the
//! platform's automation utility. Failures are logged and reported as
//! `false`, never raised; the caller always has another fallback.

use crate::protocol::BoxFuture;
use crate::util::run_command_with_timeout;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    Copy,
    Paste,
}

impl KeyAction {
    fn letter(self) -> char {
        match self {
            KeyAction::Copy => 'c',
            KeyAction::Paste => 'v',
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    MacOs,
    Windows,
    LinuxX11,
    LinuxWayland,
    Unsupported,
}

impl Platform {
    /// Detect once at startup.
    pub fn detect() -> Self {
        if cfg!(target_os = "macos") {
            Platform::MacOs
        } else if cfg!(target_os = "windows") {
            Platform::Windows
        } else if cfg!(target_os = "linux") {
            if std::env::var_os("WAYLAND_DISPLAY").is_some() {
                Platform::LinuxWayland
            } else {
                Platform::LinuxX11
            }
        } else {
            Platform::Unsupported
        }
    }

    /// Settle time between a copy keystroke and reading the clipboard.
    ///
    /// Windows pays for a PowerShell start-up on every keystroke.
    pub fn default_copy_settle(self) -> Duration {
        match self {
            Platform::Windows => Duration::from_millis(350),
            _ => Duration::from_millis(150),
        }
    }
}

pub trait KeystrokeSimulator: Send + Sync {
    /// Send `action` to the focused application. Returns whether the
    /// automation utility reported success.
    fn send(&self, action: KeyAction) -> BoxFuture<'_, bool>;
}

/// Program and arguments that send `action` on `platform`, or `None`
/// where there is no automation utility.
pub fn command_for(platform: Platform, action: KeyAction) -> Option<(&'static str, Vec<String>)> {
    let letter = action.letter();
    let command = match platform {
        Platform::MacOs => (
            "osascript",
            vec![
                "-e".to_string(),
                format!(
                    "tell application \"System Events\" to keystroke \"{}\" using command down",
                    letter
                ),
            ],
        ),
        Platform::Windows => (
            "powershell",
            vec![
                "-NoProfile".to_string(),
                "-NonInteractive".to_string(),
                "-Command".to_string(),
                format!(
                    "$wshell = New-Object -ComObject wscript.shell; $wshell.SendKeys('^{}')",
                    letter
                ),
            ],
        ),
        Platform::LinuxX11 => (
            "xdotool",
            vec![
                "key".to_string(),
                "--clearmodifiers".to_string(),
                format!("ctrl+{}", letter),
            ],
        ),
        Platform::LinuxWayland => (
            "wtype",
            vec![
                "-M".to_string(),
                "ctrl".to_string(),
                letter.to_string(),
                "-m".to_string(),
                "ctrl".to_string(),
            ],
        ),
        Platform::Unsupported => return None,
    };
    Some(command)
}

/// Shell-out strategy for a platform that has an automation utility.
#[derive(Debug, Clone)]
pub struct ShellKeystrokes {
    platform: Platform,
    timeout: Duration,
}

impl ShellKeystrokes {
    pub fn new(platform: Platform, timeout: Duration) -> Option<Self> {
        command_for(platform, KeyAction::Copy)?;
        Some(Self { platform, timeout })
    }
}

impl KeystrokeSimulator for ShellKeystrokes {
    fn send(&self, action: KeyAction) -> BoxFuture<'_, bool> {
        Box::pin(async move {
            let Some((program, args)) = command_for(self.platform, action) else {
                return false;
            };
            match run_command_with_timeout(program, &args, self.timeout).await {
                Ok(result) if result.success => {
                    debug!(?action, program, "keystroke sent");
                    true
                }
                Ok(result) if result.timed_out => {
                    warn!(
                        ?action,
                        program,
                        timeout_ms = self.timeout.as_millis() as u64,
                        "keystroke helper timed out"
                    );
                    false
                }
                Ok(result) => {
                    warn!(
                        ?action,
                        program,
                        stderr = %result.stderr.trim(),
                        "keystroke helper failed"
                    );
                    false
                }
                Err(err) => {
                    warn!(?action, program, error = %err, "keystroke helper unavailable");
                    false
                }
            }
        })
    }
}

/// Strategy for platforms with no automation utility.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoKeystrokes;

impl KeystrokeSimulator for NoKeystrokes {
    fn send(&self, action: KeyAction) -> BoxFuture<'_, bool> {
        Box::pin(async move {
            debug!(?action, "keystroke simulation unsupported on this platform");
            false
        })
    }
}

/// Pick the strategy for `platform`.
pub fn keystrokes_for(platform: Platform, timeout: Duration) -> Arc<dyn KeystrokeSimulator> {
    match ShellKeystrokes::new(platform, timeout) {
        Some(shell) => Arc::new(shell),
        None => Arc::new(NoKeystrokes),
    }
}
