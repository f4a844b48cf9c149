//! Chat application module for interactive streaming conversations.
//!
//! This module provides the pieces of the `chatterbox-chat` REPL that are
//! worth testing on their own:
//!
//! - [`ChatArgs`]/[`ChatConfig`]: CLI argument parsing and configuration
//! - [`parse_command`]: slash command parsing
//!
//! The session itself lives in [`crate::session`] and the terminal output in
//! [`crate::render`].

mod commands;
mod config;

pub use crate::render::{PlainTextRenderer, SessionObserver};
pub use commands::{ChatCommand, help_text, parse_command};
pub use config::{ChatArgs, ChatConfig};
