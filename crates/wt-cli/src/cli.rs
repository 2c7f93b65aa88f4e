//! Command-line argument definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use wt_core::Bucket;

/// Watch-time budget tracker.
///
/// Tracks how long videos in each bucket have been watched today and
/// blocks playback once a bucket's daily budget is spent.
#[derive(Debug, Parser)]
#[command(name = "wt", version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config file.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Show today's watch time per bucket against the limits.
    Status,

    /// Show or edit per-bucket daily limits.
    Limits {
        #[command(subcommand)]
        action: Option<LimitsAction>,
    },

    /// Run the enforcement daemon on a Unix socket.
    Serve,
}

/// Limit editing actions.
#[derive(Debug, Subcommand)]
pub enum LimitsAction {
    /// Print the configured limits.
    Show,

    /// Set a bucket's daily limit in minutes.
    Set {
        /// Bucket name (trash, interesting, curriculum, phd).
        bucket: Bucket,

        /// Daily limit in minutes.
        minutes: i64,
    },

    /// Remove a bucket's limit, leaving it unenforced.
    Clear {
        /// Bucket name (trash, interesting, curriculum, phd).
        bucket: Bucket,
    },
}
