//! Configuration for the forest server
//!
//! Values resolve once at startup: CLI args > env vars (handled by clap) >
//! config file (`~/.forest/config.toml` or `--config`) > defaults.

use clap::Parser;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::chat::provider::AuthStyle;
use crate::chat::relay::TurnPolicy;
use crate::error::{ForestError, Result};

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-3.5-turbo-0613";
const DEFAULT_KEEP_ALIVE_SECS: u64 = 15;
const DEFAULT_RELAY_BUFFER: usize = 64;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, Default, Parser)]
#[command(name = "forest")]
#[command(about = "Text adventure relay: commands in, streamed narration out")]
pub struct Args {
    /// Config file (defaults to ~/.forest/config.toml)
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// Address to bind
    #[arg(long, env = "FOREST_HOST")]
    pub host: Option<String>,

    /// Port to bind
    #[arg(long, env = "FOREST_PORT")]
    pub port: Option<u16>,

    /// Completion API key
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Completion API base URL (an Azure deployment URL also works)
    #[arg(long, env = "OPENAI_BASE_URL")]
    pub base_url: Option<String>,

    /// Model name
    #[arg(long, env = "FOREST_MODEL")]
    pub model: Option<String>,

    /// `api-version` query parameter (Azure)
    #[arg(long, env = "OPENAI_API_VERSION")]
    pub api_version: Option<String>,

    /// How to send the API key
    #[arg(long, value_enum)]
    pub auth: Option<AuthStyle>,

    /// File with replacement game rules
    #[arg(long)]
    pub system_prompt: Option<PathBuf>,

    /// Close each stream connection after one turn
    #[arg(long)]
    pub close_after_turn: bool,
}

/// Contents of the optional TOML config file
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub api_version: Option<String>,
    pub auth: Option<AuthStyle>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub system_prompt_file: Option<PathBuf>,
    pub close_after_turn: Option<bool>,
    pub keep_alive_secs: Option<u64>,
    pub relay_buffer: Option<usize>,
    pub request_timeout_secs: Option<u64>,
}

impl FileConfig {
    /// Load the config file.
    ///
    /// A missing file at the default location is fine; a missing file the
    /// user named explicitly is an error, as is any file that fails to parse.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let (path, required) = match explicit {
            Some(path) => (path.to_path_buf(), true),
            None => (config_path(), false),
        };

        if !path.exists() {
            if required {
                return Err(ForestError::Config(format!(
                    "config file {} not found",
                    path.display()
                )));
            }
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)?;
        let config = toml::from_str(&content)?;
        tracing::debug!("Loaded config from {}", path.display());
        Ok(config)
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub keep_alive: Duration,
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: String,
    pub auth: AuthStyle,
    pub api_version: Option<String>,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub policy: TurnPolicy,
    /// Chunks buffered per connection before the relay waits on the client
    pub buffer: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            policy: TurnPolicy::KeepOpen,
            buffer: DEFAULT_RELAY_BUFFER,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompletionConfig {
    pub system_prompt_file: Option<PathBuf>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

/// Fully resolved configuration
#[derive(Debug, Clone)]
pub struct ForestConfig {
    pub server: ServerConfig,
    pub provider: ProviderConfig,
    pub completion: CompletionConfig,
    pub relay: RelayConfig,
}

impl ForestConfig {
    /// Merge CLI/env values over the file config and defaults
    pub fn resolve(args: Args, file: FileConfig) -> Result<Self> {
        let api_key = args
            .api_key
            .or(file.api_key)
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| {
                ForestError::Config(
                    "OPENAI_API_KEY required (set via --api-key, env var, or ~/.forest/config.toml)"
                        .into(),
                )
            })?;

        let policy = if args.close_after_turn || file.close_after_turn.unwrap_or(false) {
            TurnPolicy::CloseAfterTurn
        } else {
            TurnPolicy::KeepOpen
        };

        Ok(Self {
            server: ServerConfig {
                host: args.host.or(file.host).unwrap_or_else(|| DEFAULT_HOST.to_string()),
                port: args.port.or(file.port).unwrap_or(DEFAULT_PORT),
                keep_alive: Duration::from_secs(
                    file.keep_alive_secs.unwrap_or(DEFAULT_KEEP_ALIVE_SECS).max(1),
                ),
            },
            provider: ProviderConfig {
                base_url: args
                    .base_url
                    .or(file.base_url)
                    .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
                model: args.model.or(file.model).unwrap_or_else(|| DEFAULT_MODEL.to_string()),
                api_key,
                auth: args.auth.or(file.auth).unwrap_or_default(),
                api_version: args.api_version.or(file.api_version),
                request_timeout: Duration::from_secs(
                    file.request_timeout_secs.unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
                ),
            },
            completion: CompletionConfig {
                system_prompt_file: args.system_prompt.or(file.system_prompt_file),
                max_tokens: file.max_tokens,
                temperature: file.temperature,
            },
            relay: RelayConfig {
                policy,
                buffer: file.relay_buffer.unwrap_or(DEFAULT_RELAY_BUFFER).max(1),
            },
        })
    }
}

/// Directory holding `.env` and `config.toml`
pub fn config_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_default().join(".forest")
}

/// Get the default config file path
pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

/// Load `.env` from ~/.forest, falling back to the current directory
pub fn load_dotenv() {
    let env_path = Some(config_dir().join(".env")).filter(|p| p.exists());
    if let Some(path) = env_path {
        let _ = dotenvy::from_path(&path);
    } else {
        let _ = dotenvy::dotenv();
    }
}
