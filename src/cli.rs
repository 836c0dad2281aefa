use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// keypin: keyboard-driven tab pinning, driven from the command line
#[derive(Parser, Debug, Clone)]
#[command(name = "keypin")]
#[command(author = "RidgetopAI")]
#[command(version)]
#[command(about = "Pin browser tabs to keys and jump between them with chords", long_about = None)]
pub struct Cli {
    /// Config file to use instead of the platform default
    #[arg(long, value_name = "FILE", env = "KEYPIN_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory holding state, keysets and options. Overrides the config.
    #[arg(long, value_name = "DIR", env = "KEYPIN_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Browser state for the in-memory host; written back after the command
    #[arg(long, value_name = "FILE")]
    pub snapshot: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error). Overrides the config.
    #[arg(long)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum CliCommand {
    /// Parse and run a chord, e.g. `g2a` or `--key ShiftLeft --key KeyG --key KeyA`
    Combo {
        /// Typed characters
        input: Option<String>,
        /// Physical key codes pressed after the typed input; modifiers are skipped
        #[arg(long = "key", value_name = "CODE")]
        keys: Vec<String>,
    },
    /// Run a request given as JSON, e.g. `{"command":"getState"}`
    Call { json: String },
    /// Write the default config file if none exists
    Init,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
