//! CLI argument parsing for the fleetplan-worker binary.

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "fleetplan-worker", about = "Fleet route planning and plan editing worker")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the worker server (default if no subcommand given)
    Serve,
}
