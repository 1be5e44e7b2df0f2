//! Content checks on both sides of the model call.
//!
//! Inbound: a pluggable classifier for drafts that try to override the
//! instructions. Outbound: the leak guard, which fails closed when a
//! response carries the request sentinel or one of the instruction
//! section headers.
//!
//! The leak guard is a substring heuristic. A model that paraphrases the
//! hidden prompt without copying any marker will not be caught.

use crate::prompt::templates::SECTION_HEADERS;
use crate::prompt::Sentinel;
use regex::Regex;
use std::sync::LazyLock;

#[derive(Debug, Clone)]
pub struct LeakGuard {
    /// Lowercased headers
    headers: Vec<String>,
}

impl Default for LeakGuard {
    fn default() -> Self {
        Self::new(SECTION_HEADERS.iter().copied())
    }
}

impl LeakGuard {
    pub fn new<'a>(headers: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            headers: headers
                .into_iter()
                .map(|h| h.trim().to_lowercase())
                .filter(|h| !h.is_empty())
                .collect(),
        }
    }

    /// Pure function of its inputs: `true` means the response must not be delivered.
    pub fn check(&self, response: &str, sentinel: &Sentinel) -> bool {
        if response.contains(sentinel.as_str()) || response.contains(sentinel.visible()) {
            return true;
        }
        let lower = response.to_lowercase();
        self.headers.iter().any(|h| lower.contains(h.as_str()))
    }
}

/// Decides whether a draft should be dropped before any request is made.
pub trait InputClassifier: Send + Sync {
    fn is_suspicious(&self, text: &str) -> bool;
}

static OVERRIDE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)\b(ignore|disregard|forget|override)\b.{0,20}\b(previous|prior|above|earlier|system|all)\b.{0,20}\b(instructions?|prompts?|rules|directions)\b",
        r"(?i)\b(reveal|show|print|repeat|output|leak)\b.{0,20}\b(your|the)\b.{0,20}\b(system prompt|hidden prompt|instructions)\b",
        r"(?i)\bwhat (is|are) your (system prompt|instructions)\b",
        r"(?i)\byou are now\b.{0,40}\b(unfiltered|jailbroken|dan)\b",
    ]
    .iter()
    .filter_map(|pattern| Regex::new(pattern).ok())
    .collect()
});

/// Keyword regex classifier for instruction-override phrasing.
#[derive(Debug, Default, Clone, Copy)]
pub struct OverridePhraseClassifier;

impl InputClassifier for OverridePhraseClassifier {
    fn is_suspicious(&self, text: &str) -> bool {
        OVERRIDE_PATTERNS.iter().any(|re| re.is_match(text))
    }
}
