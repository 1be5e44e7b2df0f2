//! System prompt assembly
//!
//! Order matters:
//! 1. per-request sentinel (a leak shows up as a prefix match)
//! 2. the user's own context, given primacy
//! 3. the fixed instruction body
//! 4. auto-detected project metadata, lowest priority

pub mod templates;

use crate::context::CodebaseContext;
use templates::{PRIORITY_CONTEXT_HEADER, PROJECT_CONTEXT_HEADER, REFINE_INSTRUCTIONS};
use uuid::Uuid;

const SENTINEL_NAMESPACE: &str = "TPX-";
/// U+2063 INVISIBLE SEPARATOR; does not render if echoed
const SENTINEL_BOUNDARY: char = '\u{2063}';
const SENTINEL_TOKEN_LEN: usize = 16;

/// Cap on dependencies listed in the project block
const MAX_PROMPT_DEPENDENCIES: usize = 15;

/// Random marker unique to one request. Never persisted or reused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sentinel(String);

impl Sentinel {
    pub fn generate() -> Self {
        let id = Uuid::new_v4().simple().to_string();
        let token = &id[..SENTINEL_TOKEN_LEN];
        Self(format!(
            "{b}{ns}{token}{b}",
            b = SENTINEL_BOUNDARY,
            ns = SENTINEL_NAMESPACE,
            token = token
        ))
    }

    /// Full sentinel including the invisible boundaries.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The printable part, for matching partial echoes.
    pub fn visible(&self) -> &str {
        self.0.trim_matches(SENTINEL_BOUNDARY)
    }
}

#[derive(Debug, Clone)]
pub struct BuiltPrompt {
    pub system_prompt: String,
    pub user_input: String,
    pub sentinel: Sentinel,
}

#[derive(Debug, Clone)]
pub struct PromptBuilder {
    instructions: String,
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self::new(REFINE_INSTRUCTIONS)
    }
}

impl PromptBuilder {
    pub fn new(instructions: impl Into<String>) -> Self {
        Self {
            instructions: instructions.into(),
        }
    }

    /// Markdown headers that can appear in a built prompt: the ones in
    /// the instruction body plus the context blocks this builder adds.
    pub fn section_headers(&self) -> Vec<&str> {
        let mut headers = vec![PRIORITY_CONTEXT_HEADER, PROJECT_CONTEXT_HEADER];
        for line in self.instructions.lines().map(str::trim) {
            if is_markdown_header(line) && !headers.contains(&line) {
                headers.push(line);
            }
        }
        headers
    }

    /// Build a fresh prompt. Nothing is cached between calls.
    pub fn build(
        &self,
        input_text: &str,
        user_context: Option<&str>,
        codebase: Option<&CodebaseContext>,
    ) -> BuiltPrompt {
        let sentinel = Sentinel::generate();
        let mut sections = vec![sentinel.as_str().to_string()];

        if let Some(context) = user_context.map(str::trim).filter(|c| !c.is_empty()) {
            sections.push(format!(
                "{}\nThe user provided this context. Weigh it above all other guidance:\n{}",
                PRIORITY_CONTEXT_HEADER, context
            ));
        }

        sections.push(self.instructions.trim().to_string());

        if let Some(block) = codebase.and_then(format_codebase_section) {
            sections.push(block);
        }

        BuiltPrompt {
            system_prompt: sections.join("\n\n"),
            user_input: input_text.to_string(),
            sentinel,
        }
    }
}

/// `# Title` through `###### Title`, with some text after the hashes.
fn is_markdown_header(line: &str) -> bool {
    let hashes = line.chars().take_while(|c| *c == '#').count();
    (1..=6).contains(&hashes)
        && line[hashes..].starts_with(' ')
        && !line[hashes..].trim().is_empty()
}

/// Project metadata block, or `None` when detection found nothing.
fn format_codebase_section(context: &CodebaseContext) -> Option<String> {
    if context.is_unknown() {
        return None;
    }

    let mut lines = vec![PROJECT_CONTEXT_HEADER.to_string()];
    if context.has_project_type() {
        lines.push(format!("Project type: {}", context.project_type));
    }
    if !context.languages.is_empty() {
        lines.push(format!("Languages: {}", context.languages.join(", ")));
    }
    if !context.frameworks.is_empty() {
        lines.push(format!("Frameworks: {}", context.frameworks.join(", ")));
    }
    if !context.dependencies.is_empty() {
        let shown: Vec<&str> = context
            .dependencies
            .iter()
            .take(MAX_PROMPT_DEPENDENCIES)
            .map(String::as_str)
            .collect();
        lines.push(format!("Key dependencies: {}", shown.join(", ")));
    }
    lines.push(
        "Use this only to pick accurate terminology; do not mention it unless the draft does."
            .to_string(),
    );
    Some(lines.join("\n"))
}
