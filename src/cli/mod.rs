//! Command-line interface definitions.
//!
//! - `Cli`, `Commands`: CLI argument definitions via clap
//! - `Display`: Formatted terminal output with colors and spinners

mod commands;
mod display;

pub use commands::{Cli, Commands, ConfigAction, IconAction, OutputFormat, ToggleAction};
pub use display::Display;
