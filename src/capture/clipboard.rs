//! Clipboard access plus the snapshot/compare/restore dance around
//! simulated keystrokes.
//!
//! Two asymmetric operations live here:
//! - [`copy_probe`] snapshots the clipboard, sends a copy keystroke and
//!   keeps whatever was freshly copied. The original content is *not*
//!   put back: the copied text is the point of the probe.
//! - [`paste_delivery`] writes the output, sends a paste keystroke and,
//!   only under [`RestorePolicy::Restore`], puts the old content back.
//!   The default leaves the output on the clipboard so the user can
//!   paste it again.

use super::keystroke::{KeyAction, KeystrokeSimulator};
use crate::protocol::BoxFuture;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum ClipboardError {
    #[error("clipboard unavailable: {0}")]
    Unavailable(String),

    #[error("clipboard operation timed out after {0:?}")]
    TimedOut(Duration),
}

pub trait ClipboardBackend: Send + Sync {
    /// Current text content; an empty string when the clipboard holds no text.
    fn read_text(&self) -> BoxFuture<'_, Result<String, ClipboardError>>;

    fn write_text<'a>(&'a self, text: &'a str) -> BoxFuture<'a, Result<(), ClipboardError>>;
}

/// The OS clipboard via `arboard`.
///
/// One handle is kept for the whole session: on X11 and Wayland the
/// owning process has to stay alive for written content to remain
/// available, see [`SystemClipboard::linger`].
pub struct SystemClipboard {
    inner: Arc<Mutex<arboard::Clipboard>>,
    last_written: Mutex<Option<String>>,
    timeout: Duration,
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl SystemClipboard {
    pub fn new(timeout: Duration) -> Result<Self, ClipboardError> {
        let clipboard =
            arboard::Clipboard::new().map_err(|e| ClipboardError::Unavailable(e.to_string()))?;
        Ok(Self {
            inner: Arc::new(Mutex::new(clipboard)),
            last_written: Mutex::new(None),
            timeout,
        })
    }

    /// Before exit: keep serving the last text this handle wrote until
    /// another application takes the clipboard or `max_wait` passes.
    ///
    /// Only Linux needs this. Elsewhere the OS keeps clipboard content
    /// after the writer exits, so it returns at once.
    pub async fn linger(&self, max_wait: Duration) {
        let Some(text) = lock(&self.last_written).take() else {
            return;
        };
        if max_wait.is_zero() || !cfg!(target_os = "linux") {
            return;
        }
        debug!(max_wait_ms = max_wait.as_millis() as u64, "holding clipboard before exit");
        let inner = Arc::clone(&self.inner);
        let task = tokio::task::spawn_blocking(move || hold_until_replaced(&inner, text, max_wait));
        match task.await {
            Ok(Ok(())) => debug!("clipboard handed off"),
            Ok(Err(err)) => warn!(error = %err, "holding clipboard failed"),
            Err(err) => warn!(error = %err, "clipboard hold task failed"),
        }
    }

    async fn run_blocking<T, F>(&self, op: F) -> Result<T, ClipboardError>
    where
        T: Send + 'static,
        F: FnOnce(&mut arboard::Clipboard) -> Result<T, arboard::Error> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let task = tokio::task::spawn_blocking(move || op(&mut lock(inner.as_ref())));
        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(err))) => Err(ClipboardError::Unavailable(err.to_string())),
            Ok(Err(join_err)) => Err(ClipboardError::Unavailable(join_err.to_string())),
            Err(_) => Err(ClipboardError::TimedOut(self.timeout)),
        }
    }
}

impl ClipboardBackend for SystemClipboard {
    fn read_text(&self) -> BoxFuture<'_, Result<String, ClipboardError>> {
        Box::pin(async move {
            self.run_blocking(|cb| match cb.get_text() {
                Ok(text) => Ok(text),
                // Images or an empty clipboard read as "no text"
                Err(arboard::Error::ContentNotAvailable) => Ok(String::new()),
                Err(err) => Err(err),
            })
            .await
        })
    }

    fn write_text<'a>(&'a self, text: &'a str) -> BoxFuture<'a, Result<(), ClipboardError>> {
        let owned = text.to_string();
        Box::pin(async move {
            self.run_blocking(move |cb| cb.set_text(owned)).await?;
            *lock(&self.last_written) = Some(text.to_string());
            Ok(())
        })
    }
}

/// Re-publish `text` and serve requests for it until it is replaced or
/// `max_wait` passes.
#[cfg(target_os = "linux")]
fn hold_until_replaced(
    inner: &Mutex<arboard::Clipboard>,
    text: String,
    max_wait: Duration,
) -> Result<(), arboard::Error> {
    use arboard::SetExtLinux;
    let deadline = std::time::Instant::now() + max_wait;
    let mut clipboard = lock(inner);
    clipboard.set().wait_until(deadline).text(text)
}

#[cfg(not(target_os = "linux"))]
fn hold_until_replaced(
    _inner: &Mutex<arboard::Clipboard>,
    _text: String,
    _max_wait: Duration,
) -> Result<(), arboard::Error> {
    Ok(())
}

/// Clipboard content captured before a keystroke mutates it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClipboardSnapshot {
    pub original_content: String,
    pub captured_at: DateTime<Utc>,
}

impl ClipboardSnapshot {
    pub async fn capture(clipboard: &dyn ClipboardBackend) -> Result<Self, ClipboardError> {
        let original_content = clipboard.read_text().await?;
        Ok(Self {
            original_content,
            captured_at: Utc::now(),
        })
    }
}

/// Outcome of a copy probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The clipboard changed to this text, which has non-whitespace content.
    Copied(String),
    /// Nothing new arrived; the snapshot is handed back for the clipboard fallback.
    Unchanged(ClipboardSnapshot),
    /// The clipboard could not even be read.
    Unavailable,
}

/// Snapshot, send copy, wait `settle`, compare.
///
/// `settle` is a best-effort window, not a synchronisation primitive:
/// a slow clipboard owner can still publish after it has elapsed.
pub async fn copy_probe(
    clipboard: &dyn ClipboardBackend,
    keys: &dyn KeystrokeSimulator,
    settle: Duration,
) -> ProbeOutcome {
    let snapshot = match ClipboardSnapshot::capture(clipboard).await {
        Ok(snapshot) => snapshot,
        Err(err) => {
            warn!(error = %err, "clipboard snapshot failed; skipping copy probe");
            return ProbeOutcome::Unavailable;
        }
    };

    if !keys.send(KeyAction::Copy).await {
        debug!("copy keystroke not delivered");
        return ProbeOutcome::Unchanged(snapshot);
    }

    tokio::time::sleep(settle).await;

    match clipboard.read_text().await {
        Ok(current) if current.trim().is_empty() => {
            // A whitespace-only copy is a failed probe: put the snapshot back
            // so the clipboard fallback still sees the user's text.
            if current != snapshot.original_content {
                debug!("copy probe picked up only whitespace; restoring snapshot");
                if let Err(err) = clipboard.write_text(&snapshot.original_content).await {
                    warn!(error = %err, "restoring clipboard after blank copy failed");
                }
            }
            ProbeOutcome::Unchanged(snapshot)
        }
        Ok(current) if current != snapshot.original_content => {
            debug!(chars = current.chars().count(), "copy probe picked up new text");
            ProbeOutcome::Copied(current)
        }
        Ok(_) => ProbeOutcome::Unchanged(snapshot),
        Err(err) => {
            warn!(error = %err, "clipboard read after copy keystroke failed");
            ProbeOutcome::Unchanged(snapshot)
        }
    }
}

/// What happens to the user's previous clipboard after an auto-paste.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RestorePolicy {
    /// Leave the delivered text on the clipboard.
    #[default]
    LeaveOutput,
    /// Put the previous content back after `delay`.
    Restore { delay: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PasteOutcome {
    pub pasted: bool,
    pub restored: bool,
}

/// Write `text`, then send paste. The write completes before the
/// keystroke is issued.
pub async fn paste_delivery(
    clipboard: &dyn ClipboardBackend,
    keys: &dyn KeystrokeSimulator,
    text: &str,
    policy: RestorePolicy,
    paste_settle: Duration,
) -> Result<PasteOutcome, ClipboardError> {
    let snapshot = match policy {
        RestorePolicy::Restore { .. } => ClipboardSnapshot::capture(clipboard).await.ok(),
        RestorePolicy::LeaveOutput => None,
    };

    clipboard.write_text(text).await?;

    if !paste_settle.is_zero() {
        tokio::time::sleep(paste_settle).await;
    }
    let pasted = keys.send(KeyAction::Paste).await;

    let restored = match (policy, snapshot) {
        (RestorePolicy::Restore { delay }, Some(snapshot)) if pasted => {
            tokio::time::sleep(delay).await;
            match clipboard.write_text(&snapshot.original_content).await {
                Ok(()) => true,
                Err(err) => {
                    warn!(error = %err, "restoring previous clipboard failed");
                    false
                }
            }
        }
        _ => false,
    };

    Ok(PasteOutcome { pasted, restored })
}
