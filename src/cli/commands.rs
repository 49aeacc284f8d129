use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "godmode")]
#[command(author, version, about = "Per-app view hiding rules and edit mode", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(short, long, global = true, value_enum, default_value = "text")]
    pub output: OutputFormat,

    /// Data directory holding rules, config and session files (default: ./.godmode)
    #[arg(long, global = true, env = "GODMODE_DATA_DIR")]
    pub data_dir: Option<PathBuf>,
}

/// Output format for CLI results.
#[derive(Debug, Clone, Copy, Default, ValueEnum, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize the data directory
    Init,

    /// List target apps with recorded rules
    List,

    /// Show the rules recorded for one app
    Show {
        /// Package name
        package: String,
    },

    /// Merge rules from an exported JSON file
    Import {
        /// Path to the rule file
        file: PathBuf,
    },

    /// Remove an app's rules, or a single rule with --activity and --index
    Remove {
        /// Package name
        package: String,

        /// Activity holding the rule
        #[arg(long, requires = "index")]
        activity: Option<String>,

        /// Position of the rule within the activity
        #[arg(long, requires = "activity")]
        index: Option<usize>,
    },

    /// Delete every recorded rule
    Reset {
        /// Confirm deletion
        #[arg(long)]
        yes: bool,
    },

    /// Show or switch edit mode
    EditMode {
        #[arg(value_enum, default_value = "status")]
        action: ToggleAction,

        /// Override edit mode for a single app
        #[arg(long)]
        app: Option<String>,
    },

    /// Hide or show the launcher presence icon
    Icon {
        #[arg(value_enum, default_value = "status")]
        action: IconAction,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum ToggleAction {
    On,
    Off,
    /// Drop a per-app override (requires --app)
    Inherit,
    Status,
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum IconAction {
    Hide,
    Show,
    Toggle,
    Status,
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Show current configuration
    Show,
    /// Reset to defaults
    Reset,
}
