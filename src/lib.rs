//! textpolish library crate
//!
//! Everything the CLI does is available here so editor integrations can
//! drive the same pipeline with their own editor, clipboard and notifier.

pub mod cache;
pub mod capture;
pub mod config;
pub mod context;
pub mod deliver;
pub mod editor;
pub mod error;
pub mod gate;
pub mod guard;
pub mod keyring;
pub mod llm;
pub mod logging;
pub mod prompt;
pub mod protocol;
pub mod session;
pub mod util;

#[cfg(test)]
mod testing;
