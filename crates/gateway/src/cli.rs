use clap::{Parser, Subcommand};

/// AgentsLeak — runtime security monitoring for AI coding agents.
#[derive(Debug, Parser)]
#[command(name = "agentsleak", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the monitor server (default when no subcommand is given).
    Serve,
    /// Print version information.
    Version,
}
