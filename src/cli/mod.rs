//! Command-line interface for edgeplane.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Edgeplane - control plane of a geographically distributed edge caching network.
#[derive(Parser)]
#[command(name = "edgeplane")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "EDGEPLANE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, env = "EDGEPLANE_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Start the coordinator
    Server {
        /// Bind address for the API (overrides the config file)
        #[arg(long)]
        bind_addr: Option<String>,

        /// Area served by this coordinator
        #[arg(long, env = "EDGEPLANE_AREA")]
        area: Option<String>,
    },

    /// Submit content for caching
    Cache {
        /// Root CID of the content
        cid: String,

        /// Reliability target (0 lets candidate nodes take the root)
        #[arg(short, long, default_value_t = 1)]
        reliability: u32,

        /// Coordinator address
        #[arg(short, long, default_value = "127.0.0.1:3456")]
        addr: String,
    },

    /// Show a cache job
    Job {
        /// Root CID of the content
        cid: String,

        /// Job id (defaults to the latest job)
        #[arg(short, long)]
        job_id: Option<String>,

        /// Coordinator address
        #[arg(short, long, default_value = "127.0.0.1:3456")]
        addr: String,
    },

    /// Run a validator election now
    Elect {
        /// Coordinator address
        #[arg(short, long, default_value = "127.0.0.1:3456")]
        addr: String,
    },

    /// Run a spot-check cycle now
    SpotCheck {
        /// Coordinator address
        #[arg(short, long, default_value = "127.0.0.1:3456")]
        addr: String,
    },

    /// Access point management
    AccessPoint {
        #[command(subcommand)]
        command: AccessPointCommands,
    },

    /// Show fleet status
    Status {
        /// Coordinator address
        #[arg(short, long, default_value = "127.0.0.1:3456")]
        addr: String,
    },

    /// Show version information
    Version,
}

/// Access point subcommands.
#[derive(Subcommand)]
pub enum AccessPointCommands {
    /// Publish a scheduler endpoint for an area
    Add {
        area_id: String,
        url: String,

        #[arg(short, long, default_value_t = 1)]
        weight: u32,

        #[arg(short, long, default_value = "")]
        token: String,

        /// Coordinator address
        #[arg(short, long, default_value = "127.0.0.1:3456")]
        addr: String,
    },

    /// Remove an area
    Remove {
        area_id: String,

        /// Coordinator address
        #[arg(short, long, default_value = "127.0.0.1:3456")]
        addr: String,
    },

    /// List areas
    List {
        /// Coordinator address
        #[arg(short, long, default_value = "127.0.0.1:3456")]
        addr: String,
    },

    /// Show every endpoint of an area
    Show {
        area_id: String,

        /// Coordinator address
        #[arg(short, long, default_value = "127.0.0.1:3456")]
        addr: String,
    },

    /// Online endpoint URLs of an area, best first
    Get {
        area_id: String,

        /// Coordinator address
        #[arg(short, long, default_value = "127.0.0.1:3456")]
        addr: String,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cache_command() {
        let cli = Cli::try_parse_from(["edgeplane", "cache", "bafyroot", "-r", "0"]).unwrap();
        match cli.command {
            Commands::Cache { cid, reliability, addr } => {
                assert_eq!(cid, "bafyroot");
                assert_eq!(reliability, 0);
                assert_eq!(addr, "127.0.0.1:3456");
            }
            _ => panic!("expected cache command"),
        }
    }

    #[test]
    fn test_parse_access_point_add() {
        let cli = Cli::try_parse_from([
            "edgeplane",
            "access-point",
            "add",
            "asia-china",
            "https://sched.example",
            "--weight",
            "5",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Commands::AccessPoint {
                command: AccessPointCommands::Add { weight: 5, .. }
            }
        ));
    }
}
