//! Result delivery
//!
//! Text that came from an editor selection is replaced in place and
//! re-selected. Everything else goes to the clipboard and is pasted into
//! whatever has focus. Only called after the leak guard has passed.

use crate::capture::clipboard::{paste_delivery, ClipboardBackend, RestorePolicy};
use crate::capture::keystroke::KeystrokeSimulator;
use crate::capture::{CapturedText, SourceKind};
use crate::editor::EditorSurface;
use crate::error::RefineError;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, Default)]
pub struct DeliverySettings {
    pub restore_policy: RestorePolicy,
    /// Wait between the clipboard write and the paste keystroke
    pub paste_settle: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryRoute {
    ReplacedInEditor,
    Pasted,
    /// Paste keystroke failed; the text is still on the clipboard.
    CopiedOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReport {
    pub route: DeliveryRoute,
    pub source: SourceKind,
}

pub struct Deliverer<'a> {
    pub editor: Option<&'a dyn EditorSurface>,
    pub clipboard: &'a dyn ClipboardBackend,
    pub keys: &'a dyn KeystrokeSimulator,
    pub settings: DeliverySettings,
}

impl Deliverer<'_> {
    pub async fn deliver(
        &self,
        captured: &CapturedText,
        response: &str,
    ) -> Result<DeliveryReport, RefineError> {
        let source = captured.source_kind();
        let route = match (source, captured.selection(), self.editor) {
            (SourceKind::Editor, Some(range), Some(editor)) => {
                self.replace_in_editor(editor, range, response).await?
            }
            (SourceKind::Editor, _, _) => {
                return Err(RefineError::DeliveryFailed(
                    "editor selection no longer available".to_string(),
                ));
            }
            _ => self.paste(response).await?,
        };

        info!(source = source.label(), route = ?route, "delivered result");
        Ok(DeliveryReport { route, source })
    }

    async fn replace_in_editor(
        &self,
        editor: &dyn EditorSurface,
        range: crate::editor::TextRange,
        response: &str,
    ) -> Result<DeliveryRoute, RefineError> {
        let inserted = editor
            .replace(range, response)
            .map_err(|e| RefineError::DeliveryFailed(e.to_string()))?;

        // Convenience copy; the edit already landed.
        if let Err(err) = self.clipboard.write_text(response).await {
            warn!(error = %err, "convenience clipboard copy failed");
        }

        if let Err(err) = editor.select(inserted) {
            warn!(error = %err, "re-selecting inserted text failed");
        } else {
            debug!(start = inserted.start, end = inserted.end, "re-selected inserted text");
        }
        Ok(DeliveryRoute::ReplacedInEditor)
    }

    async fn paste(&self, response: &str) -> Result<DeliveryRoute, RefineError> {
        let outcome = paste_delivery(
            self.clipboard,
            self.keys,
            response,
            self.settings.restore_policy,
            self.settings.paste_settle,
        )
        .await
        .map_err(|e| RefineError::DeliveryFailed(e.to_string()))?;

        if outcome.pasted {
            Ok(DeliveryRoute::Pasted)
        } else {
            warn!("paste keystroke failed; result left on clipboard");
            Ok(DeliveryRoute::CopiedOnly)
        }
    }
}
