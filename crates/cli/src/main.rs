//! Strata CLI: the `strata` binary.
//!
//! Commands:
//! - `serve`   Start the feature serving API
//! - `config`  Show, validate, or initialise configuration

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use strata_config::StrataConfig;

mod commands;

#[derive(Parser)]
#[command(
    name = "strata",
    about = "Strata: feature serving and context assembly for LLM applications",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (defaults to ~/.strata/config.toml)
    #[arg(short, long, global = true, env = "STRATA_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP serving API
    Serve {
        /// Override the bind host
        #[arg(long)]
        host: Option<String>,

        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Validate the configuration file
    Validate,
    /// Print the config file location
    Path,
    /// Write a default config file if none exists
    Init,
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<StrataConfig> {
    let mut config = match path {
        Some(path) => StrataConfig::load_from(path)?,
        None => return StrataConfig::load().context("failed to load config"),
    };
    config.apply_env(|name| std::env::var(name).ok())?;
    config.validate()?;
    Ok(config)
}

fn config_path(cli_path: Option<&PathBuf>) -> PathBuf {
    cli_path
        .cloned()
        .unwrap_or_else(|| StrataConfig::config_dir().join("config.toml"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { host, port } => {
            let mut config = load_config(cli.config.as_ref())?;
            strata_telemetry::init_tracing(cli.verbose, config.telemetry.json_logs)?;
            if let Some(host) = host {
                config.serving.host = host;
            }
            if let Some(port) = port {
                config.serving.port = port;
            }
            commands::serve::run(config).await?;
        }
        Commands::Config { action } => {
            strata_telemetry::init_tracing(cli.verbose, false)?;
            let path = config_path(cli.config.as_ref());
            match action {
                ConfigAction::Show => commands::config_cmd::show(&load_config(cli.config.as_ref())?)?,
                ConfigAction::Validate => commands::config_cmd::validate(&path)?,
                ConfigAction::Path => println!("{}", path.display()),
                ConfigAction::Init => commands::config_cmd::init(&path)?,
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_serve_overrides() {
        let cli = Cli::try_parse_from(["strata", "serve", "--port", "9001", "-v"]).unwrap();
        assert!(cli.verbose);
        match cli.command {
            Commands::Serve { host, port } => {
                assert_eq!(host, None);
                assert_eq!(port, Some(9001));
            }
            _ => panic!("expected serve"),
        }
    }

    #[test]
    fn parses_config_actions() {
        let cli = Cli::try_parse_from(["strata", "--config", "/tmp/s.toml", "config", "validate"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/s.toml")));
        assert!(matches!(
            cli.command,
            Commands::Config {
                action: ConfigAction::Validate
            }
        ));
    }

    #[test]
    fn rejects_removed_commands() {
        assert!(Cli::try_parse_from(["strata", "deploy"]).is_err());
    }

    #[test]
    fn explicit_config_file_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("strata.toml");
        std::fs::write(&path, "[serving]\nport = 9300\n[audit]\nbackend = \"none\"\n").unwrap();
        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.audit.backend, "none");
    }
}
