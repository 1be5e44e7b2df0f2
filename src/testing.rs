//! Test doubles for the pipeline's collaborators.

use crate::capture::clipboard::{ClipboardBackend, ClipboardError};
use crate::capture::keystroke::{KeyAction, KeystrokeSimulator};
use crate::gate::AccessGate;
use crate::llm::{ChatRequest, ChatTransport, TransportError};
use crate::protocol::{BoxFuture, Notice, Notifier};
use std::sync::{Arc, Mutex};

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[derive(Debug, Default)]
struct ClipState {
    content: String,
    history: Vec<String>,
    reads: usize,
    broken: bool,
    /// Writes beyond this many fail
    write_limit: Option<usize>,
}

/// Shared in-memory clipboard. Clones see the same content.
#[derive(Debug, Clone, Default)]
pub struct MemoryClipboard {
    state: Arc<Mutex<ClipState>>,
}

impl MemoryClipboard {
    pub fn new(content: &str) -> Self {
        let clipboard = Self::default();
        lock(&clipboard.state).content = content.to_string();
        clipboard
    }

    pub fn broken() -> Self {
        let clipboard = Self::default();
        lock(&clipboard.state).broken = true;
        clipboard
    }

    /// Accept `limit` writes, then fail every later one.
    pub fn failing_writes_after(content: &str, limit: usize) -> Self {
        let clipboard = Self::new(content);
        lock(&clipboard.state).write_limit = Some(limit);
        clipboard
    }

    /// Change content the way another application would.
    pub fn set_external(&self, content: &str) {
        lock(&self.state).content = content.to_string();
    }

    pub fn current(&self) -> String {
        lock(&self.state).content.clone()
    }

    pub fn history(&self) -> Vec<String> {
        lock(&self.state).history.clone()
    }

    pub fn writes(&self) -> usize {
        lock(&self.state).history.len()
    }

    pub fn reads(&self) -> usize {
        lock(&self.state).reads
    }
}

impl ClipboardBackend for MemoryClipboard {
    fn read_text(&self) -> BoxFuture<'_, Result<String, ClipboardError>> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            state.reads += 1;
            if state.broken {
                return Err(ClipboardError::Unavailable("broken test clipboard".to_string()));
            }
            Ok(state.content.clone())
        })
    }

    fn write_text<'a>(&'a self, text: &'a str) -> BoxFuture<'a, Result<(), ClipboardError>> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            if state.broken {
                return Err(ClipboardError::Unavailable("broken test clipboard".to_string()));
            }
            if state.write_limit.is_some_and(|limit| state.history.len() >= limit) {
                return Err(ClipboardError::Unavailable("write refused".to_string()));
            }
            state.history.push(text.to_string());
            state.content = text.to_string();
            Ok(())
        })
    }
}

/// Keystroke double that records what was sent.
#[derive(Debug, Default)]
pub struct ScriptedKeys {
    succeed: bool,
    on_copy: Option<(MemoryClipboard, String)>,
    observe: Option<MemoryClipboard>,
    sent: Mutex<Vec<KeyAction>>,
    seen: Mutex<Vec<String>>,
}

impl ScriptedKeys {
    pub fn succeeding() -> Self {
        Self {
            succeed: true,
            ..Self::default()
        }
    }

    pub fn failing() -> Self {
        Self::default()
    }

    /// A copy keystroke puts `text` on `clipboard`, as a focused chat box would.
    pub fn copying(clipboard: &MemoryClipboard, text: &str) -> Self {
        Self {
            succeed: true,
            on_copy: Some((clipboard.clone(), text.to_string())),
            ..Self::default()
        }
    }

    /// Record the clipboard content at the moment each keystroke is sent.
    pub fn observing(clipboard: &MemoryClipboard) -> Self {
        Self {
            succeed: true,
            observe: Some(clipboard.clone()),
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<KeyAction> {
        lock(&self.sent).clone()
    }

    pub fn clipboard_seen_at_send(&self) -> Vec<String> {
        lock(&self.seen).clone()
    }
}

impl KeystrokeSimulator for ScriptedKeys {
    fn send(&self, action: KeyAction) -> BoxFuture<'_, bool> {
        Box::pin(async move {
            lock(&self.sent).push(action);
            if let Some(clipboard) = &self.observe {
                lock(&self.seen).push(clipboard.current());
            }
            if action == KeyAction::Copy {
                if let Some((clipboard, text)) = &self.on_copy {
                    clipboard.set_external(text);
                }
            }
            self.succeed
        })
    }
}

type Responder = Box<dyn Fn(&ChatRequest) -> Result<String, TransportError> + Send + Sync>;

/// Transport double answering from a closure.
pub struct ScriptedTransport {
    responder: Responder,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedTransport {
    pub fn new(
        responder: impl Fn(&ChatRequest) -> Result<String, TransportError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            responder: Box::new(responder),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn replying(text: &str) -> Self {
        let text = text.to_string();
        Self::new(move |_| Ok(text.clone()))
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        lock(&self.requests).clone()
    }
}

impl ChatTransport for ScriptedTransport {
    fn send<'a>(
        &'a self,
        request: &'a ChatRequest,
    ) -> BoxFuture<'a, Result<String, TransportError>> {
        Box::pin(async move {
            lock(&self.requests).push(request.clone());
            (self.responder)(request)
        })
    }
}

/// Gate double with fixed answers that records call order.
#[derive(Debug)]
pub struct StaticGate {
    pub access: bool,
    pub token: Option<String>,
    pub usage_ok: bool,
    calls: Mutex<Vec<&'static str>>,
}

impl StaticGate {
    pub fn open() -> Self {
        Self {
            access: true,
            token: Some("tp_test_token".to_string()),
            usage_ok: true,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn usage_exhausted() -> Self {
        Self {
            usage_ok: false,
            ..Self::open()
        }
    }

    pub fn without_token() -> Self {
        Self {
            token: None,
            ..Self::open()
        }
    }

    pub fn denied() -> Self {
        Self {
            access: false,
            ..Self::open()
        }
    }

    pub fn calls(&self) -> Vec<&'static str> {
        lock(&self.calls).clone()
    }
}

impl AccessGate for StaticGate {
    fn check_access(&self) -> BoxFuture<'_, bool> {
        Box::pin(async move {
            lock(&self.calls).push("check_access");
            self.access
        })
    }

    fn get_token(&self) -> BoxFuture<'_, Option<String>> {
        Box::pin(async move {
            lock(&self.calls).push("get_token");
            self.token.clone()
        })
    }

    fn check_usage_limit<'a>(&'a self, _token: &'a str) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            lock(&self.calls).push("check_usage_limit");
            self.usage_ok
        })
    }
}

#[derive(Debug, Default)]
pub struct RecordingNotifier {
    notices: Mutex<Vec<Notice>>,
}

impl RecordingNotifier {
    pub fn notices(&self) -> Vec<Notice> {
        lock(&self.notices).clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notice: Notice) {
        lock(&self.notices).push(notice);
    }
}
