//! Configuration for the tcp-acceptor binary.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Example protocol served by the binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolType {
    Echo,
    Counter,
}

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "tcp-acceptor")]
#[command(version)]
#[command(about = "A TCP server with pooled acceptors and graceful shutdown", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 127.0.0.1:7070)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Number of acceptor workers (defaults to number of CPU cores)
    #[arg(short = 'a', long)]
    pub acceptors: Option<usize>,

    /// Idle timeout per connection in seconds (0 = disabled)
    #[arg(short = 't', long)]
    pub idle_timeout: Option<u64>,

    /// Seconds to wait for sessions to drain on shutdown
    #[arg(short = 'd', long)]
    pub drain_timeout: Option<u64>,

    /// Protocol to serve
    #[arg(short, long, value_enum)]
    pub protocol: Option<ProtocolType>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerSection {
    /// Address to bind to
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Number of acceptor workers
    pub acceptors: Option<usize>,
    /// Idle timeout in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout: u64,
    /// Drain timeout in seconds
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout: u64,
    #[serde(default = "default_protocol")]
    pub protocol: ProtocolType,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            acceptors: None,
            idle_timeout: default_idle_timeout(),
            drain_timeout: default_drain_timeout(),
            protocol: default_protocol(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingSection {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_listen() -> String {
    "127.0.0.1:7070".to_string()
}

fn default_idle_timeout() -> u64 {
    30
}

fn default_drain_timeout() -> u64 {
    10
}

fn default_protocol() -> ProtocolType {
    ProtocolType::Echo
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: String,
    /// `None` selects the host parallelism.
    pub acceptors: Option<usize>,
    pub idle_timeout: Duration,
    pub drain_timeout: Duration,
    pub protocol: ProtocolType,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_args(CliArgs::parse())
    }

    /// Merge parsed CLI args over the TOML file they point at, if any.
    pub fn from_args(cli: CliArgs) -> Result<Self, ConfigError> {
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|source| ConfigError::FileRead {
                    path: config_path.clone(),
                    source,
                })?;
            toml::from_str(&contents)
                .map_err(|source| ConfigError::TomlParse {
                    path: config_path.clone(),
                    source,
                })?
        } else {
            TomlConfig::default()
        };

        Ok(Self::merge(cli, toml_config))
    }

    fn merge(cli: CliArgs, toml_config: TomlConfig) -> Self {
        let server = toml_config.server;
        Config {
            listen: cli.listen.unwrap_or(server.listen),
            acceptors: cli.acceptors.or(server.acceptors).filter(|n| *n > 0),
            idle_timeout: Duration::from_secs(cli.idle_timeout.unwrap_or(server.idle_timeout)),
            drain_timeout: Duration::from_secs(cli.drain_timeout.unwrap_or(server.drain_timeout)),
            protocol: cli.protocol.unwrap_or(server.protocol),
            log_level: cli.log_level.unwrap_or(toml_config.logging.level),
        }
    }
}

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {source}", path.display())]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file '{}': {source}", path.display())]
    TomlParse {
        path: PathBuf,
        source: toml::de::Error,
    },
}
