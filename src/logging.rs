//! Diagnostic log setup
//!
//! Logs go to `textpolish.log` next to the config file so technical
//! detail never lands in user-facing output. If the file can't be opened
//! we fall back to stderr.

use crate::config::Config;
use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::sync::Mutex;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

pub const LOG_ENV_VAR: &str = "TEXTPOLISH_LOG";
pub const LOG_FILE_NAME: &str = "textpolish.log";

/// Filter from `TEXTPOLISH_LOG`, else `debug` when verbose, else `info`.
fn env_filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| {
        EnvFilter::new(if verbose {
            "textpolish=debug"
        } else {
            "textpolish=info"
        })
    })
}

pub fn log_path() -> Option<PathBuf> {
    Config::config_dir().map(|dir| dir.join(LOG_FILE_NAME))
}

fn open_log_file() -> Option<fs::File> {
    let path = log_path()?;
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).ok()?;
    }
    let mut opts = OpenOptions::new();
    opts.create(true).append(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(0o600);
    }
    opts.open(path).ok()
}

/// Install the global subscriber. Returns where logs are going.
pub fn init(verbose: bool) -> String {
    match open_log_file() {
        Some(file) => {
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(Mutex::new(file))
                .with_target(true)
                .with_ansi(false)
                .with_filter(env_filter(verbose));
            let _ = tracing_subscriber::registry().with(layer).try_init();
            log_path()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| LOG_FILE_NAME.to_string())
        }
        None => {
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_filter(env_filter(verbose));
            let _ = tracing_subscriber::registry().with(layer).try_init();
            "stderr".to_string()
        }
    }
}
