//! Shared seam types between the pipeline and its hosts.

use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by the collaborator traits so they stay object-safe.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// A user-facing message produced by one pipeline invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
    /// Optional remediation hint, e.g. the command that fixes an auth problem
    pub action: Option<String>,
}

impl Notice {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Info,
            message: message.into(),
            action: None,
        }
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Success,
            message: message.into(),
            action: None,
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Warning,
            message: message.into(),
            action: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            message: message.into(),
            action: None,
        }
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }
}

/// Where notices end up: a status bar, a toast, or stderr for the CLI.
pub trait Notifier: Send + Sync {
    fn notify(&self, notice: Notice);
}

/// Notifier for the command-line host.
#[derive(Debug, Default, Clone, Copy)]
pub struct StderrNotifier;

impl Notifier for StderrNotifier {
    fn notify(&self, notice: Notice) {
        let marker = match notice.level {
            NoticeLevel::Info => " ",
            NoticeLevel::Success => "+",
            NoticeLevel::Warning => "!",
            NoticeLevel::Error => "x",
        };
        eprintln!("  {} {}", marker, notice.message);
        if let Some(action) = notice.action {
            eprintln!("    Tip: {}", action);
        }
    }
}
