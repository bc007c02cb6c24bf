//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// clientmux - request/response and update fan-out over one receive loop
#[derive(Parser)]
#[command(
    name = "clientmux",
    about = "Multiplex many logical clients over one transport connection",
    version
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Drive clients over an in-memory echo transport and report the results
    Demo {
        /// Number of clients sharing the receive loop
        #[arg(long, default_value = "2")]
        clients: usize,

        /// Concurrent requests per client
        #[arg(short, long, default_value = "10")]
        requests: usize,

        /// Listeners per client
        #[arg(long, default_value = "1")]
        listeners: usize,
    },

    /// Print the resolved configuration as YAML
    Config,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_demo_defaults() {
        let cli = Cli::try_parse_from(["clientmux", "demo"]).unwrap();
        match cli.command {
            Some(Command::Demo {
                clients,
                requests,
                listeners,
            }) => {
                assert_eq!(clients, 2);
                assert_eq!(requests, 10);
                assert_eq!(listeners, 1);
            }
            other => panic!("Expected Demo, got {:?}", other),
        }
    }

    #[test]
    fn test_global_flags() {
        let cli = Cli::try_parse_from(["clientmux", "config", "--log-level", "debug"]).unwrap();
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        assert!(matches!(cli.command, Some(Command::Config)));
    }
}
