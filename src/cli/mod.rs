//! CLI commands and argument parsing.
//!
//! - [`commands`] - clap definitions for the command surface
//! - [`output`] - output formatting and table rendering

pub mod commands;
pub mod output;
