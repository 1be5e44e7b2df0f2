use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use textpolish::capture::clipboard::SystemClipboard;
use textpolish::capture::keystroke::{keystrokes_for, Platform};
use textpolish::config::Config;
use textpolish::context::{scan_workspace, CodebaseContextProvider, WorkspaceScanner};
use textpolish::editor::{EditorSurface, FileEditor, TextRange};
use textpolish::gate::{
    acquire_token_interactively, KeyringTokenStore, RemoteAccessGate, StdinPrompter, TokenStore,
    DEFAULT_MAX_ATTEMPTS,
};
use textpolish::keyring;
use textpolish::llm::HttpTransport;
use textpolish::logging;
use textpolish::prompt::PromptBuilder;
use textpolish::protocol::StderrNotifier;
use textpolish::session::{Collaborators, RefineSession, SessionSettings};
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "textpolish",
    about = "Refine selected text with a language model",
    version
)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Refine the current selection, clipboard, or file
    Refine {
        /// Treat this file as the active editor document
        #[arg(long)]
        file: Option<PathBuf>,

        /// Selected byte range in the file, as START:END
        #[arg(long, requires = "file", value_parser = parse_range)]
        range: Option<TextRange>,
    },
    /// Enter and validate an access token, plus a model API key when needed
    Setup {
        /// Remove stored credentials instead
        #[arg(long)]
        clear: bool,
    },
    /// Show the codebase context that would be sent with prompts
    Context {
        #[arg(default_value = ".")]
        path: PathBuf,
    },
    /// Show config location and effective settings
    Config {
        /// Write the effective settings to the config file
        #[arg(long)]
        write: bool,
    },
}

fn parse_range(raw: &str) -> Result<TextRange, String> {
    TextRange::parse(raw).ok_or_else(|| format!("expected START:END, got '{}'", raw))
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();
    let log_target = logging::init(args.verbose);
    let config = Config::load();
    info!(log = %log_target, "textpolish starting");

    match args.command {
        Command::Refine { file, range } => refine(&config, file, range).await,
        Command::Setup { clear: true } => clear_credentials().map(|_| ExitCode::SUCCESS),
        Command::Setup { clear: false } => setup(&config).await.map(|_| ExitCode::SUCCESS),
        Command::Context { path } => print_context(&path).map(|_| ExitCode::SUCCESS),
        Command::Config { write } => print_config(&config, write).map(|_| ExitCode::SUCCESS),
    }
}

async fn refine(
    config: &Config,
    file: Option<PathBuf>,
    range: Option<TextRange>,
) -> Result<ExitCode> {
    let editor: Option<Arc<dyn EditorSurface>> = match &file {
        Some(path) => {
            let opened = FileEditor::open(path, range)
                .with_context(|| format!("Failed to open {}", path.display()))?;
            Some(Arc::new(opened))
        }
        None => None,
    };

    let clipboard = Arc::new(
        SystemClipboard::new(config.clipboard_timeout())
            .map_err(|e| anyhow!("Clipboard unavailable: {}", e))?,
    );
    let platform = Platform::detect();
    info!(?platform, "keystroke strategy selected");

    let gate = RemoteAccessGate::new(config.gate_settings(), Arc::new(KeyringTokenStore));
    let transport =
        HttpTransport::new(config.chat_endpoint(), config.api_key(), config.request_timeout())
            .with_access_token_forwarding(config.forwards_access_token());

    let settings = SessionSettings {
        acquisition: config.acquisition_settings(),
        delivery: config.delivery_settings(),
        model: config.model_params(),
        custom_context: config.custom_context.clone(),
    };
    let mut session = RefineSession::new(
        Collaborators {
            gate: Arc::new(gate),
            editor,
            clipboard: clipboard.clone(),
            keys: keystrokes_for(platform, config.keystroke_timeout()),
            transport: Arc::new(transport),
            notifier: Arc::new(StderrNotifier),
        },
        settings,
    )
    .with_prompt_builder(PromptBuilder::new(config.instructions()));

    if config.include_codebase_context {
        let root = match file.as_ref().and_then(|f| f.parent()) {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => std::env::current_dir()?,
        };
        let scanner: Arc<dyn CodebaseContextProvider> =
            Arc::new(WorkspaceScanner::new(root, config.codebase_cache()));
        session = session.with_context_provider(scanner);
    }

    let outcome = session.handle_command().await;
    // Whatever was written must outlive this process long enough to paste.
    clipboard.linger(config.clipboard_linger()).await;

    Ok(match outcome {
        Some(_) => ExitCode::SUCCESS,
        None => ExitCode::FAILURE,
    })
}

async fn setup(config: &Config) -> Result<()> {
    let store = Arc::new(KeyringTokenStore);
    let gate = RemoteAccessGate::new(config.gate_settings(), store.clone());

    acquire_token_interactively(&StdinPrompter, &gate, store.as_ref(), DEFAULT_MAX_ATTEMPTS)
        .await
        .map_err(|err| anyhow!("Setup failed: {}", err))?;
    gate.invalidate();
    eprintln!();
    eprintln!("  + Access token saved.");

    if config.forwards_access_token() || config.api_key().is_some() {
        return Ok(());
    }
    // The access token never goes to a third-party model endpoint.
    eprintln!();
    eprintln!("  Model endpoint: {}", config.api_base_url());
    match StdinPrompter.prompt_api_key() {
        Some(key) => {
            keyring::set_api_key(&key).map_err(|e| anyhow!("Failed to save API key: {}", e))?;
            eprintln!("  + API key saved.");
        }
        None => {
            eprintln!("  No API key saved. Set TEXTPOLISH_API_KEY or run setup again.");
        }
    }
    Ok(())
}

fn clear_credentials() -> Result<()> {
    KeyringTokenStore
        .clear()
        .map_err(|e| anyhow!("Failed to clear access token: {}", e))?;
    keyring::clear_api_key().map_err(|e| anyhow!("Failed to clear API key: {}", e))?;
    eprintln!("  + Stored credentials removed.");
    Ok(())
}

fn print_context(path: &std::path::Path) -> Result<()> {
    let root = path
        .canonicalize()
        .with_context(|| format!("Failed to resolve {}", path.display()))?;
    let context = scan_workspace(&root);
    println!("{}", serde_json::to_string_pretty(&context)?);
    Ok(())
}

fn print_config(config: &Config, write: bool) -> Result<()> {
    if write {
        let path = config.save()?;
        eprintln!("  + Wrote {}", path.display());
    }
    eprintln!("  Config file: {}", Config::config_location());
    if let Some(log) = logging::log_path() {
        eprintln!("  Log file:    {}", log.display());
    }
    eprintln!("  Endpoint:    {}", config.chat_endpoint());
    let auth = if config.api_key().is_some() {
        "model API key"
    } else if config.forwards_access_token() {
        "access token"
    } else {
        "none (run `textpolish setup`)"
    };
    eprintln!("  Auth:        {}", auth);
    let mut shown = config.clone();
    shown.premium_tokens = vec!["<redacted>".to_string(); config.premium_tokens.len()];
    println!("{}", serde_json::to_string_pretty(&shown)?);
    Ok(())
}
