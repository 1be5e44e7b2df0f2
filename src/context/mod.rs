//! Codebase context for prompts
//!
//! Infers what the user is working on from the workspace itself:
//! - languages by file extension
//! - dependencies from the root manifests
//! - well-known frameworks among those dependencies
//! - the overall project type

use crate::cache::{Clock, SystemClock, TimedCache};
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;
use walkdir::WalkDir;

/// Upper bound on files visited per scan
const MAX_SCANNED_FILES: usize = 5_000;
/// Languages reported, most common first
const MAX_LANGUAGES: usize = 5;

const IGNORED_DIRS: &[&str] = &[
    ".git",
    "node_modules",
    "target",
    "dist",
    "build",
    ".venv",
    "venv",
    "__pycache__",
    "vendor",
    ".next",
    ".idea",
    ".vscode",
];

/// Project metadata handed to the prompt builder.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CodebaseContext {
    pub languages: Vec<String>,
    pub frameworks: Vec<String>,
    pub dependencies: Vec<String>,
    pub project_type: String,
}

impl CodebaseContext {
    pub fn has_project_type(&self) -> bool {
        !self.project_type.is_empty() && self.project_type != ProjectType::Unknown.name()
    }

    /// Nothing detected; the prompt omits the block.
    pub fn is_unknown(&self) -> bool {
        self.languages.is_empty()
            && self.frameworks.is_empty()
            && self.dependencies.is_empty()
            && !self.has_project_type()
    }
}

pub trait CodebaseContextProvider: Send + Sync {
    fn get_context(&self) -> CodebaseContext;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    Rust,
    JavaScript,
    TypeScript,
    Python,
    Go,
    Java,
    Kotlin,
    CSharp,
    Ruby,
    Php,
    Swift,
    Cpp,
    C,
    Unknown,
}

impl Language {
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_lowercase().as_str() {
            "rs" => Language::Rust,
            "js" | "jsx" | "mjs" | "cjs" => Language::JavaScript,
            "ts" | "tsx" => Language::TypeScript,
            "py" | "pyi" => Language::Python,
            "go" => Language::Go,
            "java" => Language::Java,
            "kt" | "kts" => Language::Kotlin,
            "cs" => Language::CSharp,
            "rb" => Language::Ruby,
            "php" => Language::Php,
            "swift" => Language::Swift,
            "cc" | "cpp" | "cxx" | "hpp" | "hh" => Language::Cpp,
            "c" | "h" => Language::C,
            _ => Language::Unknown,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Language::Rust => "Rust",
            Language::JavaScript => "JavaScript",
            Language::TypeScript => "TypeScript",
            Language::Python => "Python",
            Language::Go => "Go",
            Language::Java => "Java",
            Language::Kotlin => "Kotlin",
            Language::CSharp => "C#",
            Language::Ruby => "Ruby",
            Language::Php => "PHP",
            Language::Swift => "Swift",
            Language::Cpp => "C++",
            Language::C => "C",
            Language::Unknown => "Unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectType {
    Rust,
    Node,
    Python,
    Go,
    Unknown,
}

impl ProjectType {
    pub fn name(&self) -> &'static str {
        match self {
            ProjectType::Rust => "Rust",
            ProjectType::Node => "Node.js",
            ProjectType::Python => "Python",
            ProjectType::Go => "Go",
            ProjectType::Unknown => "unknown",
        }
    }
}

/// Detect project type from manifest files at the root
pub fn detect_project_type(root: &Path) -> ProjectType {
    if root.join("Cargo.toml").exists() {
        ProjectType::Rust
    } else if root.join("package.json").exists() {
        ProjectType::Node
    } else if root.join("pyproject.toml").exists()
        || root.join("setup.py").exists()
        || root.join("requirements.txt").exists()
    {
        ProjectType::Python
    } else if root.join("go.mod").exists() {
        ProjectType::Go
    } else {
        ProjectType::Unknown
    }
}

/// Dependency name (or Go module prefix) to framework label
const FRAMEWORKS: &[(&str, &str)] = &[
    ("react", "React"),
    ("next", "Next.js"),
    ("vue", "Vue"),
    ("svelte", "Svelte"),
    ("@angular/core", "Angular"),
    ("express", "Express"),
    ("@nestjs/core", "NestJS"),
    ("electron", "Electron"),
    ("django", "Django"),
    ("flask", "Flask"),
    ("fastapi", "FastAPI"),
    ("axum", "axum"),
    ("actix-web", "Actix Web"),
    ("rocket", "Rocket"),
    ("tokio", "Tokio"),
    ("tauri", "Tauri"),
    ("github.com/gin-gonic/gin", "Gin"),
    ("github.com/labstack/echo", "Echo"),
    ("github.com/gofiber/fiber", "Fiber"),
];

fn frameworks_for(dependencies: &[String]) -> Vec<String> {
    let mut found = Vec::new();
    for (dep_name, label) in FRAMEWORKS {
        let hit = dependencies.iter().any(|d| {
            let d = d.to_lowercase();
            d == *dep_name || (dep_name.contains('/') && d.starts_with(dep_name))
        });
        if hit {
            found.push(label.to_string());
        }
    }
    found
}

fn push_unique(out: &mut Vec<String>, name: &str) {
    let name = name.trim();
    if !name.is_empty() && !out.iter().any(|existing| existing == name) {
        out.push(name.to_string());
    }
}

fn cargo_dependencies(content: &str, out: &mut Vec<String>) {
    let Ok(value) = content.parse::<toml::Value>() else {
        return;
    };
    for table in ["dependencies", "dev-dependencies"] {
        if let Some(deps) = value.get(table).and_then(|d| d.as_table()) {
            for name in deps.keys() {
                push_unique(out, name);
            }
        }
    }
    if let Some(deps) = value
        .get("workspace")
        .and_then(|w| w.get("dependencies"))
        .and_then(|d| d.as_table())
    {
        for name in deps.keys() {
            push_unique(out, name);
        }
    }
}

fn npm_dependencies(content: &str, out: &mut Vec<String>) {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(content) else {
        return;
    };
    for field in ["dependencies", "devDependencies"] {
        if let Some(deps) = value.get(field).and_then(|d| d.as_object()) {
            for name in deps.keys() {
                push_unique(out, name);
            }
        }
    }
}

/// Strip version specifiers and extras from a PEP 508 requirement.
fn python_requirement_name(line: &str) -> Option<&str> {
    let line = line.split('#').next()?.trim();
    if line.is_empty() || line.starts_with('-') {
        return None;
    }
    let end = line
        .find(|c: char| "=<>~![;@ ".contains(c))
        .unwrap_or(line.len());
    let name = line[..end].trim();
    (!name.is_empty()).then_some(name)
}

fn requirements_dependencies(content: &str, out: &mut Vec<String>) {
    for line in content.lines() {
        if let Some(name) = python_requirement_name(line) {
            push_unique(out, &name.to_lowercase());
        }
    }
}

fn pyproject_dependencies(content: &str, out: &mut Vec<String>) {
    let Ok(value) = content.parse::<toml::Value>() else {
        return;
    };
    if let Some(deps) = value
        .get("project")
        .and_then(|p| p.get("dependencies"))
        .and_then(|d| d.as_array())
    {
        for dep in deps.iter().filter_map(|d| d.as_str()) {
            if let Some(name) = python_requirement_name(dep) {
                push_unique(out, &name.to_lowercase());
            }
        }
    }
    if let Some(deps) = value
        .get("tool")
        .and_then(|t| t.get("poetry"))
        .and_then(|p| p.get("dependencies"))
        .and_then(|d| d.as_table())
    {
        for name in deps.keys().filter(|k| k.as_str() != "python") {
            push_unique(out, &name.to_lowercase());
        }
    }
}

fn go_dependencies(content: &str, out: &mut Vec<String>) {
    let mut in_block = false;
    for line in content.lines() {
        let line = line.trim();
        if line.starts_with("require (") {
            in_block = true;
            continue;
        }
        if in_block && line == ")" {
            in_block = false;
            continue;
        }
        let entry = if in_block {
            Some(line)
        } else {
            line.strip_prefix("require ")
        };
        if let Some(module) = entry.and_then(|s| s.split_whitespace().next()) {
            if !module.starts_with("//") {
                push_unique(out, module);
            }
        }
    }
}

/// Read root manifests for dependency names.
fn collect_dependencies(root: &Path) -> Vec<String> {
    let mut deps = Vec::new();
    let readers: [(&str, fn(&str, &mut Vec<String>)); 5] = [
        ("Cargo.toml", cargo_dependencies),
        ("package.json", npm_dependencies),
        ("requirements.txt", requirements_dependencies),
        ("pyproject.toml", pyproject_dependencies),
        ("go.mod", go_dependencies),
    ];
    for (file, reader) in readers {
        if let Ok(content) = fs::read_to_string(root.join(file)) {
            reader(&content, &mut deps);
        }
    }
    deps
}

/// Most common source languages under `root`.
fn detect_languages(root: &Path) -> Vec<String> {
    let mut counts: HashMap<Language, usize> = HashMap::new();
    let walker = WalkDir::new(root).into_iter().filter_entry(|entry| {
        !(entry.file_type().is_dir()
            && entry.depth() > 0
            && entry
                .file_name()
                .to_str()
                .is_some_and(|name| IGNORED_DIRS.contains(&name)))
    });

    for entry in walker
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .take(MAX_SCANNED_FILES)
    {
        let language = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .map(Language::from_extension)
            .unwrap_or(Language::Unknown);
        if language != Language::Unknown {
            *counts.entry(language).or_insert(0) += 1;
        }
    }

    let mut ranked: Vec<(Language, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.name().cmp(b.0.name())));
    ranked
        .into_iter()
        .take(MAX_LANGUAGES)
        .map(|(lang, _)| lang.name().to_string())
        .collect()
}

/// Scan a workspace directory for its codebase context.
pub fn scan_workspace(root: &Path) -> CodebaseContext {
    let dependencies = collect_dependencies(root);
    CodebaseContext {
        languages: detect_languages(root),
        frameworks: frameworks_for(&dependencies),
        dependencies,
        project_type: detect_project_type(root).name().to_string(),
    }
}

/// [`CodebaseContextProvider`] over a workspace root, cached for a window.
pub struct WorkspaceScanner {
    root: PathBuf,
    cache: Mutex<TimedCache<(), CodebaseContext>>,
    clock: Arc<dyn Clock>,
}

impl WorkspaceScanner {
    pub fn new(root: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self::with_clock(root, ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(root: impl Into<PathBuf>, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            root: root.into(),
            cache: Mutex::new(TimedCache::new(ttl)),
            clock,
        }
    }
}

impl CodebaseContextProvider for WorkspaceScanner {
    fn get_context(&self) -> CodebaseContext {
        let now = self.clock.now();
        let mut cache = match self.cache.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(cached) = cache.get(&(), now) {
            return cached;
        }

        let context = scan_workspace(&self.root);
        debug!(
            root = %self.root.display(),
            languages = ?context.languages,
            frameworks = ?context.frameworks,
            "scanned workspace"
        );
        cache.put((), context.clone(), now);
        context
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ManualClock;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_rust_workspace() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "Cargo.toml",
            "[package]\nname = \"demo\"\n\n[dependencies]\naxum = \"0.7\"\ntokio = { version = \"1\" }\n",
        );
        write(dir.path(), "src/main.rs", "fn main() {}");
        write(dir.path(), "src/lib.rs", "");
        write(dir.path(), "scripts/gen.py", "");

        let context = scan_workspace(dir.path());
        assert_eq!(context.project_type, "Rust");
        assert_eq!(context.languages, vec!["Rust", "Python"]);
        assert_eq!(context.dependencies, vec!["axum", "tokio"]);
        assert_eq!(context.frameworks, vec!["axum", "Tokio"]);
        assert!(!context.is_unknown());
    }

    #[test]
    fn test_node_workspace_ignores_node_modules() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "package.json",
            r#"{"dependencies": {"react": "^18", "next": "14"}, "devDependencies": {"typescript": "5"}}"#,
        );
        write(dir.path(), "app/page.tsx", "");
        for i in 0..10 {
            write(dir.path(), &format!("node_modules/pkg/f{}.js", i), "");
        }

        let context = scan_workspace(dir.path());
        assert_eq!(context.project_type, "Node.js");
        assert_eq!(context.languages, vec!["TypeScript"]);
        assert_eq!(context.frameworks, vec!["React", "Next.js"]);
        assert!(context.dependencies.contains(&"typescript".to_string()));
    }

    #[test]
    fn test_python_requirements() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "requirements.txt",
            "# web\nDjango>=4.2\nrequests[socks]==2.31 ; python_version > '3.8'\n-r other.txt\n",
        );
        let context = scan_workspace(dir.path());
        assert_eq!(context.project_type, "Python");
        assert_eq!(context.dependencies, vec!["django", "requests"]);
        assert_eq!(context.frameworks, vec!["Django"]);
    }

    #[test]
    fn test_go_modules() {
        let mut deps = Vec::new();
        go_dependencies(
            "module x\n\nrequire (\n\tgithub.com/gin-gonic/gin v1.9.1\n\tgolang.org/x/sync v0.5.0 // indirect\n)\nrequire github.com/google/uuid v1.4.0\n",
            &mut deps,
        );
        assert_eq!(
            deps,
            vec!["github.com/gin-gonic/gin", "golang.org/x/sync", "github.com/google/uuid"]
        );
        assert_eq!(frameworks_for(&deps), vec!["Gin"]);
    }

    #[test]
    fn test_pyproject_dependencies() {
        let mut deps = Vec::new();
        pyproject_dependencies(
            "[project]\ndependencies = [\"FastAPI>=0.100\", \"uvicorn[standard]\"]\n",
            &mut deps,
        );
        assert_eq!(deps, vec!["fastapi", "uvicorn"]);
    }

    #[test]
    fn test_empty_directory_is_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let context = scan_workspace(dir.path());
        assert!(context.is_unknown());
        assert_eq!(context.project_type, "unknown");
    }

    #[test]
    fn test_scanner_caches_within_window() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "main.go", "package main");
        let clock = Arc::new(ManualClock::default());
        let scanner =
            WorkspaceScanner::with_clock(dir.path(), Duration::from_secs(60), clock.clone());

        assert_eq!(scanner.get_context().languages, vec!["Go"]);

        write(dir.path(), "a.rs", "");
        write(dir.path(), "b.rs", "");
        assert_eq!(scanner.get_context().languages, vec!["Go"]);

        clock.advance(Duration::from_secs(61));
        assert_eq!(scanner.get_context().languages, vec!["Rust", "Go"]);
    }
}
