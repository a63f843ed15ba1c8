use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "pgcdc")]
#[command(about = "Stream PostgreSQL logical replication changes to a pluggable handler")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a starter pgcdc.toml in the current directory
    Init,
    /// Start the replication session and stream changes until stopped
    Run {
        #[arg(short, long, default_value = "pgcdc.toml")]
        config: PathBuf,
    },
}
