//! Command-line interface definitions using clap
//!
//! 无子命令时启动 HTTP 服务；其余子命令用于 cron 与运维。

use clap::{Parser, Subcommand};

/// postback-tracker - affiliate postback ingestion service
#[derive(Parser, Debug)]
#[command(name = "postback-tracker")]
#[command(version)]
#[command(about = "Affiliate postback ingestion and statistics service", long_about = None)]
pub struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, short = 'c', global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the HTTP server (default)
    Serve,

    /// Process one batch of pending postbacks and exit
    ProcessQueue {
        /// Maximum number of entries to process (default: queue.batch_size)
        #[arg(long, short = 'l')]
        limit: Option<u64>,
    },

    /// Delete finished queue entries past their retention period
    Cleanup,

    /// Import or update partners from a JSON file
    ImportPartners {
        /// JSON file containing an array of partners
        file_path: String,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },
}

/// Configuration management commands
#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Generate example configuration file
    Generate {
        /// Output path (default: config.example.toml)
        output_path: Option<String>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}
