//! Text acquisition
//!
//! Works out which text the user means, trying sources in a fixed order
//! and stopping at the first non-empty one:
//!
//! 1. the host editor's selection
//! 2. a simulated copy in whatever app has focus (chat panels, webviews)
//! 3. text the user already put on the clipboard
//! 4. the whole active document

pub mod clipboard;
pub mod keystroke;

use crate::editor::{EditorSurface, TextRange};
use clipboard::{copy_probe, ClipboardBackend, ProbeOutcome};
use keystroke::KeystrokeSimulator;
use std::time::Duration;
use tracing::{debug, info};

/// Where the input text came from. Decides the delivery route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Editor,
    ChatSurface,
    Clipboard,
    FullDocument,
}

impl SourceKind {
    pub fn label(&self) -> &'static str {
        match self {
            SourceKind::Editor => "editor selection",
            SourceKind::ChatSurface => "focused app selection",
            SourceKind::Clipboard => "clipboard",
            SourceKind::FullDocument => "full document",
        }
    }
}

/// Input text for one invocation. `value` is never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedText {
    value: String,
    source_kind: SourceKind,
    /// Original selection, only for `SourceKind::Editor`
    selection: Option<TextRange>,
}

impl CapturedText {
    fn new(value: String, source_kind: SourceKind, selection: Option<TextRange>) -> Option<Self> {
        if value.trim().is_empty() {
            return None;
        }
        Some(Self {
            value,
            source_kind,
            selection,
        })
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn source_kind(&self) -> SourceKind {
        self.source_kind
    }

    pub fn selection(&self) -> Option<TextRange> {
        self.selection
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AcquisitionSettings {
    /// Wait between the copy keystroke and the clipboard read
    pub copy_settle: Duration,
}

pub struct TextAcquirer<'a> {
    pub editor: Option<&'a dyn EditorSurface>,
    pub clipboard: &'a dyn ClipboardBackend,
    pub keys: &'a dyn KeystrokeSimulator,
    pub settings: AcquisitionSettings,
}

impl TextAcquirer<'_> {
    /// Run the fallback chain. `None` means nothing usable was found.
    pub async fn acquire(&self) -> Option<CapturedText> {
        // 1. Native selection wins outright, even if the clipboard holds
        //    the same text: it keeps the exact range for replacement.
        if let Some(editor) = self.editor {
            if let Some((range, text)) = editor.selection() {
                if let Some(captured) = CapturedText::new(text, SourceKind::Editor, Some(range)) {
                    info!(source = captured.source_kind.label(), "acquired input");
                    return Some(captured);
                }
            }
        }

        // 2 + 3. Copy probe, then whatever was already on the clipboard.
        //        No retry of the probe.
        let probed = match copy_probe(self.clipboard, self.keys, self.settings.copy_settle).await {
            ProbeOutcome::Copied(text) => CapturedText::new(text, SourceKind::ChatSurface, None),
            ProbeOutcome::Unchanged(snapshot) => {
                debug!("copy probe found nothing new; trying existing clipboard");
                CapturedText::new(snapshot.original_content, SourceKind::Clipboard, None)
            }
            ProbeOutcome::Unavailable => None,
        };
        if let Some(captured) = probed {
            info!(source = captured.source_kind.label(), "acquired input");
            return Some(captured);
        }

        // 4. Whole document of an editor that had no selection.
        if let Some(editor) = self.editor {
            if let Some(text) = editor.document_text() {
                if let Some(captured) = CapturedText::new(text, SourceKind::FullDocument, None) {
                    info!(source = captured.source_kind.label(), "acquired input");
                    return Some(captured);
                }
            }
        }

        debug!("no input text available from any source");
        None
    }
}
