//! Watch-time budget tracker CLI library.
//!
//! This crate provides the CLI interface and the enforcement daemon.

mod cli;
pub mod commands;
mod config;

pub use cli::{Cli, Commands, LimitsAction};
pub use config::Config;
