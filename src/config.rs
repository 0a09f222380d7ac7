//! Configuration for the `echo_server` demo binary.
//!
//! Supports both command-line arguments and an optional TOML configuration
//! file. CLI arguments take precedence over config file values. The
//! library crate itself takes no configuration of this kind — per §6 of
//! the core's contract, it consults no environment variables and exposes
//! no config surface beyond the arguments already in its API (buffer sizes
//! come from the page allocator's fixed page size, backlog is an explicit
//! `listen()` argument). This module exists only to drive the demo.

use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;

/// Command-line arguments for the echo server demo.
#[derive(Parser, Debug)]
#[command(name = "echo_server")]
#[command(author = "arrowhead_core authors")]
#[command(version = "0.1.0")]
#[command(about = "A loopback TCP echo server demonstrating arrowhead_core's reactor and transport layer", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 127.0.0.1:7000)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Number of OS threads to run, each with its own independent event
    /// loop (per §5, loops never share state across threads)
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// TOML configuration file structure.
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration.
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to.
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Number of independent worker threads, each running its own loop.
    pub workers: Option<usize>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            workers: None,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_listen() -> String {
    "127.0.0.1:7000".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: String,
    pub workers: usize,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file. CLI
    /// arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();
        Self::resolve(cli)
    }

    fn resolve(cli: CliArgs) -> Result<Self, ConfigError> {
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents).map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Ok(Config {
            listen: cli.listen.unwrap_or(toml_config.server.listen),
            workers: cli
                .workers
                .or(toml_config.server.workers)
                .unwrap_or(1),
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        })
    }
}

/// Configuration loading errors.
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileRead(path, e) => {
                write!(f, "failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::TomlParse(path, e) => {
                write!(f, "failed to parse config file '{}': {}", path.display(), e)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = TomlConfig::default();
        assert_eq!(config.server.listen, "127.0.0.1:7000");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn toml_parsing() {
        let toml_str = r#"
            [server]
            listen = "0.0.0.0:7000"
            workers = 4

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.listen, "0.0.0.0:7000");
        assert_eq!(config.server.workers, Some(4));
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn cli_overrides_toml() {
        let cli = CliArgs {
            config: None,
            listen: Some("127.0.0.1:9999".to_string()),
            workers: None,
            log_level: "info".to_string(),
        };
        let resolved = Config::resolve(cli).unwrap();
        assert_eq!(resolved.listen, "127.0.0.1:9999");
        assert_eq!(resolved.workers, 1);
    }
}
