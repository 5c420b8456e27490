//! Chat application module for interactive conversations with Spark.
//!
//! This module provides the pieces of the `spark-chat` REPL that are worth
//! testing on their own:
//!
//! - [`config`]: CLI argument parsing and configuration
//! - [`commands`]: Slash command parsing and help text

mod commands;
mod config;

pub use commands::{ChatCommand, help_text, parse_command};
pub use config::{ChatArgs, ChatConfig};
