use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// myfab manages farms of replicated MySQL servers: role changes,
/// sharding and failure handling.
#[derive(Parser, Debug)]
#[command(name = "myfab", version)]
pub struct Cli {
    /// Path to the configuration file. Default: "myfab.toml"
    #[arg(short, long, default_value = "myfab.toml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Start the daemon.
    Run,

    /// Create the state-store schema and tables.
    Setup,

    /// Drop the state-store schema.
    Teardown,

    /// Check the configuration file for errors.
    Configcheck,
}
