//! Command-line argument parsing.
//!
//! CLI options override the configuration file; anything not given on
//! the command line comes from the file (or its defaults).

use clap::Parser;
use std::path::PathBuf;

/// Command-line arguments for the Meridian game server.
#[derive(Parser, Debug)]
#[command(author, version, about = "Self-hosted GpBinaryV16 game server", long_about = None)]
pub struct Args {
    /// Configuration file path
    ///
    /// If the file doesn't exist, a default configuration is written
    /// there on first start.
    #[arg(short, long, default_value = "meridian.toml")]
    pub config: PathBuf,

    /// Override the listen address, "IP:PORT"
    #[arg(short, long)]
    pub listen: Option<String>,

    /// Override the maximum concurrent connection count
    #[arg(long)]
    pub max_connections: Option<usize>,

    /// Set the log level to debug
    #[arg(short, long)]
    pub debug: bool,

    /// Output logs in JSON format
    #[arg(long)]
    pub json_logs: bool,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            config: PathBuf::from("meridian.toml"),
            listen: None,
            max_connections: None,
            debug: false,
            json_logs: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_point_at_the_standard_config_file() {
        let args = Args::default();
        assert_eq!(args.config, PathBuf::from("meridian.toml"));
        assert!(args.listen.is_none());
        assert!(args.max_connections.is_none());
        assert!(!args.debug);
        assert!(!args.json_logs);
    }

    #[test]
    fn listen_override_parses() {
        let args = Args::parse_from(["meridian", "--listen", "127.0.0.1:7777", "--debug"]);
        assert_eq!(args.listen.as_deref(), Some("127.0.0.1:7777"));
        assert!(args.debug);
    }
}
