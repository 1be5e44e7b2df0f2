//! Host editor surface
//!
//! The pipeline only needs four things from an editor: the current
//! selection, the whole document, an in-place replace, and a way to
//! re-select. Hosts implement [`EditorSurface`]; the CLI uses
//! [`FileEditor`] and tests use [`BufferEditor`].

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

/// Half-open byte range into a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextRange {
    pub start: usize,
    pub end: usize,
}

impl TextRange {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Range covered by `text` once inserted at `start`.
    pub fn inserted(start: usize, text: &str) -> Self {
        Self {
            start,
            end: start + text.len(),
        }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Parse "START:END" as used on the command line.
    pub fn parse(raw: &str) -> Option<Self> {
        let (start, end) = raw.split_once(':')?;
        let start = start.trim().parse().ok()?;
        let end = end.trim().parse().ok()?;
        (start <= end).then_some(Self { start, end })
    }
}

#[derive(Debug, Error)]
pub enum EditorError {
    #[error("range {start}..{end} is outside the document ({len} bytes)")]
    OutOfBounds { start: usize, end: usize, len: usize },

    #[error("range {start}..{end} does not fall on character boundaries")]
    NotCharBoundary { start: usize, end: usize },

    #[error("edit rejected: {0}")]
    Rejected(String),
}

pub trait EditorSurface: Send + Sync {
    /// The active selection, if it is non-empty.
    fn selection(&self) -> Option<(TextRange, String)>;

    /// Full text of the active document.
    fn document_text(&self) -> Option<String>;

    /// Replace `range` with `text`, returning the range the new text occupies.
    fn replace(&self, range: TextRange, text: &str) -> Result<TextRange, EditorError>;

    fn select(&self, range: TextRange) -> Result<(), EditorError>;
}

fn check_range(text: &str, range: TextRange) -> Result<(), EditorError> {
    if range.start > range.end || range.end > text.len() {
        return Err(EditorError::OutOfBounds {
            start: range.start,
            end: range.end,
            len: text.len(),
        });
    }
    if !text.is_char_boundary(range.start) || !text.is_char_boundary(range.end) {
        return Err(EditorError::NotCharBoundary {
            start: range.start,
            end: range.end,
        });
    }
    Ok(())
}

#[derive(Debug)]
struct BufferState {
    text: String,
    selection: Option<TextRange>,
}

/// In-memory document with a single selection.
#[derive(Debug)]
pub struct BufferEditor {
    state: Mutex<BufferState>,
}

impl BufferEditor {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            state: Mutex::new(BufferState {
                text: text.into(),
                selection: None,
            }),
        }
    }

    pub fn with_selection(text: impl Into<String>, range: TextRange) -> Self {
        let editor = Self::new(text);
        if let Ok(mut state) = editor.state.lock() {
            state.selection = Some(range);
        }
        editor
    }

    pub fn text(&self) -> String {
        self.lock().text.clone()
    }

    pub fn selected_range(&self) -> Option<TextRange> {
        self.lock().selection
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BufferState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl EditorSurface for BufferEditor {
    fn selection(&self) -> Option<(TextRange, String)> {
        let state = self.lock();
        let range = state.selection.filter(|r| !r.is_empty())?;
        let selected = state.text.get(range.start..range.end)?;
        Some((range, selected.to_string()))
    }

    fn document_text(&self) -> Option<String> {
        Some(self.lock().text.clone())
    }

    fn replace(&self, range: TextRange, text: &str) -> Result<TextRange, EditorError> {
        let mut state = self.lock();
        check_range(&state.text, range)?;
        state.text.replace_range(range.start..range.end, text);
        state.selection = None;
        Ok(TextRange::inserted(range.start, text))
    }

    fn select(&self, range: TextRange) -> Result<(), EditorError> {
        let mut state = self.lock();
        check_range(&state.text, range)?;
        state.selection = Some(range);
        Ok(())
    }
}

/// A file on disk treated as the active document.
///
/// Edits are written back atomically; the selection only lives in memory.
#[derive(Debug)]
pub struct FileEditor {
    path: PathBuf,
    buffer: BufferEditor,
}

impl FileEditor {
    pub fn open(path: &Path, selection: Option<TextRange>) -> anyhow::Result<Self> {
        let text = fs::read_to_string(path)?;
        let buffer = BufferEditor::new(text);
        if let Some(range) = selection {
            buffer.select(range)?;
        }
        Ok(Self {
            path: path.to_path_buf(),
            buffer,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn selected_range(&self) -> Option<TextRange> {
        self.buffer.selected_range()
    }

    fn persist(&self, content: &str) -> Result<(), EditorError> {
        let tmp_path = self.path.with_extension("textpolish.tmp");
        fs::write(&tmp_path, content).map_err(|e| EditorError::Rejected(e.to_string()))?;
        if let Err(err) = fs::rename(&tmp_path, &self.path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(EditorError::Rejected(err.to_string()));
        }
        Ok(())
    }
}

impl EditorSurface for FileEditor {
    fn selection(&self) -> Option<(TextRange, String)> {
        self.buffer.selection()
    }

    fn document_text(&self) -> Option<String> {
        self.buffer.document_text()
    }

    fn replace(&self, range: TextRange, text: &str) -> Result<TextRange, EditorError> {
        let mut next = self.buffer.text();
        check_range(&next, range)?;
        next.replace_range(range.start..range.end, text);
        // Write first so a failed save leaves the in-memory buffer untouched.
        self.persist(&next)?;
        self.buffer.replace(range, text)
    }

    fn select(&self, range: TextRange) -> Result<(), EditorError> {
        self.buffer.select(range)
    }
}
