use std::path::PathBuf;

use clap::Parser;

#[derive(Parser)]
#[command(about, long_about = None)]
pub struct Cli {
    /// Path to a TOML configuration file. Falls back to `./grp.toml`
    /// if present, then to built-in defaults.
    #[arg(short = 'f', long = "config", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Print the version and exit.
    #[arg(short = 'v', long, action = clap::ArgAction::SetTrue)]
    pub version: bool,
}
