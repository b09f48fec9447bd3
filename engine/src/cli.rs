//! CLI interface for ChatFlow
//!
//! This module provides the command-line interface using clap's derive API.
//! It defines all commands and global flags for running the chat backend.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// ChatFlow chat backend
///
/// Serves the chat HTTP API and bridges each request to an external
/// inference program.
#[derive(Parser, Debug)]
#[command(name = "chatflow")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log: Option<String>,

    /// Specify alternate configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the HTTP API server
    Serve {
        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Send one chat message to the inference program
    Ask {
        /// The message to send
        message: String,
    },

    /// Generate free-form text from a prompt
    Generate {
        /// The prompt to continue
        prompt: String,

        /// Maximum length of the generated text
        #[arg(long)]
        max_length: Option<u32>,

        /// Sampling temperature
        #[arg(long)]
        temperature: Option<f32>,
    },

    /// Show the effective configuration
    Config,

    /// Check that the inference program can be run
    Doctor,
}
