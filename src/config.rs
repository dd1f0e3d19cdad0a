//! Server configuration.
//!
//! Values come from command-line arguments, an optional TOML file, and
//! built-in defaults, in that order of precedence.

use crate::state::DEFAULT_HISTORY_CAPACITY;
use crate::transport::framing::{CHAT_MAX_MESSAGE_LEN, TODO_MAX_MESSAGE_LEN};
use crate::transport::pool::{Backpressure, PoolConfig, PoolError};
use clap::Args;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Which server to run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    Chat,
    Todo,
}

impl Variant {
    pub fn name(&self) -> &'static str {
        match self {
            Variant::Chat => "chat",
            Variant::Todo => "todo",
        }
    }

    pub fn default_max_frame_len(&self) -> usize {
        match self {
            Variant::Chat => CHAT_MAX_MESSAGE_LEN,
            Variant::Todo => TODO_MAX_MESSAGE_LEN,
        }
    }
}

/// Command-line options shared by both server variants
#[derive(Args, Debug, Default, Clone)]
pub struct ServerArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 0.0.0.0:5555)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Largest accepted message, in bytes
    #[arg(long)]
    pub max_frame: Option<usize>,

    /// Seconds a connection may stay silent before it is closed
    #[arg(long)]
    pub idle_timeout: Option<u64>,

    /// Resident worker count
    #[arg(long)]
    pub min_workers: Option<usize>,

    /// Maximum concurrent connections being served
    #[arg(long)]
    pub max_workers: Option<usize>,

    /// Connections allowed to wait for a free worker
    #[arg(long)]
    pub queue_capacity: Option<usize>,

    /// What to do with a connection when workers and queue are full
    #[arg(long, value_enum)]
    pub backpressure: Option<Backpressure>,

    /// Seconds in-flight connections get to finish during shutdown
    #[arg(long)]
    pub grace: Option<u64>,

    /// Chat history length replayed to new clients
    #[arg(long)]
    pub history: Option<usize>,

    /// Address for the admin HTTP endpoint (metrics, health)
    #[arg(long)]
    pub admin: Option<String>,

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
    pub pool: PoolSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

#[derive(Debug, Deserialize, Default)]
pub struct ServerSection {
    pub listen: Option<String>,
    pub max_frame_len: Option<usize>,
    pub idle_timeout_secs: Option<u64>,
    pub grace_secs: Option<u64>,
    pub history_capacity: Option<usize>,
    pub admin: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PoolSection {
    pub min_workers: Option<usize>,
    pub max_workers: Option<usize>,
    pub queue_capacity: Option<usize>,
    pub keep_alive_secs: Option<u64>,
    pub backpressure: Option<Backpressure>,
}

#[derive(Debug, Deserialize, Default)]
pub struct LoggingSection {
    pub level: Option<String>,
}

fn default_listen() -> String {
    "0.0.0.0:5555".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub variant: Variant,
    pub listen: String,
    pub max_frame_len: usize,
    pub idle_timeout: Duration,
    pub grace: Duration,
    pub history_capacity: usize,
    pub pool: PoolConfig,
    pub admin: Option<String>,
    pub log_level: String,
}

impl ServerSettings {
    /// Merge CLI args with the TOML file they point at
    pub fn load(variant: Variant, cli: ServerArgs) -> Result<Self, ConfigError> {
        let file = match cli.config {
            Some(ref path) => TomlConfig::from_path(path)?,
            None => TomlConfig::default(),
        };
        Self::resolve(variant, cli, file)
    }

    pub fn resolve(
        variant: Variant,
        cli: ServerArgs,
        file: TomlConfig,
    ) -> Result<Self, ConfigError> {
        let pool_defaults = PoolConfig::default();
        let pool = PoolConfig {
            min_workers: cli
                .min_workers
                .or(file.pool.min_workers)
                .unwrap_or(pool_defaults.min_workers),
            max_workers: cli
                .max_workers
                .or(file.pool.max_workers)
                .unwrap_or(pool_defaults.max_workers),
            queue_capacity: cli
                .queue_capacity
                .or(file.pool.queue_capacity)
                .unwrap_or(pool_defaults.queue_capacity),
            keep_alive: file
                .pool
                .keep_alive_secs
                .map(Duration::from_secs)
                .unwrap_or(pool_defaults.keep_alive),
            policy: cli
                .backpressure
                .or(file.pool.backpressure)
                .unwrap_or(pool_defaults.policy),
        };
        pool.validate()?;

        let max_frame_len = cli
            .max_frame
            .or(file.server.max_frame_len)
            .unwrap_or_else(|| variant.default_max_frame_len());
        if max_frame_len > i32::MAX as usize {
            return Err(ConfigError::Invalid(format!(
                "max frame length {} does not fit a 32-bit prefix",
                max_frame_len
            )));
        }

        let idle_timeout = cli
            .idle_timeout
            .or(file.server.idle_timeout_secs)
            .unwrap_or(60);
        if idle_timeout == 0 {
            return Err(ConfigError::Invalid("idle timeout must be positive".into()));
        }

        Ok(ServerSettings {
            variant,
            listen: cli
                .listen
                .or(file.server.listen)
                .unwrap_or_else(default_listen),
            max_frame_len,
            idle_timeout: Duration::from_secs(idle_timeout),
            grace: Duration::from_secs(cli.grace.or(file.server.grace_secs).unwrap_or(60)),
            history_capacity: cli
                .history
                .or(file.server.history_capacity)
                .unwrap_or(DEFAULT_HISTORY_CAPACITY),
            pool,
            admin: cli.admin.or(file.server.admin),
            log_level: cli
                .log_level
                .or(file.logging.level)
                .unwrap_or_else(default_log_level),
        })
    }
}

impl TomlConfig {
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::FileRead(path.to_path_buf(), e))?;
        toml::from_str(&contents).map_err(|e| ConfigError::TomlParse(path.to_path_buf(), e))
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {err}", path = .0.display(), err = .1)]
    FileRead(PathBuf, std::io::Error),

    #[error("Failed to parse config file '{path}': {err}", path = .0.display(), err = .1)]
    TomlParse(PathBuf, toml::de::Error),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
