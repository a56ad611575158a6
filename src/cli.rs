//! Command-line interface definitions for modelgate.
//!
//! Uses clap's derive API for type-safe argument parsing.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Security gateway between developer tools and upstream LLM providers.
///
/// modelgate intercepts traffic from IDE assistants and CLI copilots,
/// redacts credentials and PII before anything reaches a provider, restores
/// them transparently in the response stream, and routes each request to a
/// configured backend model via workspace muxing rules.
#[derive(Parser, Debug)]
#[command(name = "modelgate")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to run (defaults to `serve`).
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path to additional config file.
    ///
    /// Merged on top of the system and user configs, giving it the highest
    /// priority except for CLI flags.
    #[arg(short = 'c', long = "config", value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Listen address (host:port).
    #[arg(long = "listen", value_name = "ADDR")]
    pub listen: Option<String>,

    /// Directory for CA and domain certificate PEM files.
    #[arg(long = "cert-dir", value_name = "PATH")]
    pub cert_dir: Option<PathBuf>,

    /// Increase log verbosity.
    ///
    /// Can be specified multiple times:
    /// -v    = info level
    /// -vv   = debug level
    /// -vvv  = trace level
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Subcommands for modelgate.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the gateway (the default when no subcommand is given).
    Serve,

    /// Bootstrap the CA and the gateway's server certificate, then exit.
    ///
    /// Idempotent: existing valid material is left alone; missing or invalid
    /// material is regenerated. Prints the CA certificate path so it can be
    /// installed into client trust stores.
    GenerateCerts,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_defaults() {
        let cli = Cli::parse_from(["modelgate"]);
        assert!(cli.command.is_none());
        assert!(cli.config.is_none());
        assert!(cli.listen.is_none());
        assert_eq!(cli.verbose, 0);
    }

    #[test]
    fn test_cli_parse_serve_with_options() {
        let cli = Cli::parse_from([
            "modelgate",
            "-vv",
            "--listen",
            "127.0.0.1:9000",
            "--cert-dir",
            "/tmp/certs",
            "serve",
        ]);

        assert!(matches!(cli.command, Some(Commands::Serve)));
        assert_eq!(cli.listen.as_deref(), Some("127.0.0.1:9000"));
        assert_eq!(cli.cert_dir, Some(PathBuf::from("/tmp/certs")));
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn test_cli_parse_generate_certs() {
        let cli = Cli::parse_from(["modelgate", "generate-certs"]);
        assert!(matches!(cli.command, Some(Commands::GenerateCerts)));
    }

    #[test]
    fn test_cli_parse_config_flag() {
        let cli = Cli::parse_from(["modelgate", "-c", "/etc/custom.toml"]);
        assert_eq!(cli.config, Some(PathBuf::from("/etc/custom.toml")));
    }
}
