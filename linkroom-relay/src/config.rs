//! Configuration for the linkroom relay server.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/linkroom-relay/config.toml`)
//! 4. Compiled defaults

use std::path::PathBuf;

use linkroom_proto::event::UserProfile;
use linkroom_proto::message::UserId;
use linkroom_proto::room::SelfChatPolicy;

use crate::history::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};

/// Errors that can occur when loading relay configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure for the relay.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct RelayConfigFile {
    server: ServerFileConfig,
    history: HistoryFileConfig,
    policy: PolicyFileConfig,
    storage: StorageFileConfig,
    users: Vec<UserFileConfig>,
}

/// `[server]` section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerFileConfig {
    bind_addr: Option<String>,
    max_payload_size: Option<usize>,
}

/// `[history]` section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct HistoryFileConfig {
    default_page_size: Option<usize>,
    max_page_size: Option<usize>,
}

/// `[policy]` section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct PolicyFileConfig {
    allow_self_chat: Option<bool>,
}

/// `[storage]` section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct StorageFileConfig {
    data_file: Option<PathBuf>,
    media_dir: Option<PathBuf>,
}

/// One `[[users]]` entry seeding the user directory.
#[derive(Debug, serde::Deserialize)]
struct UserFileConfig {
    id: String,
    display_name: String,
    #[serde(default)]
    avatar_ref: Option<String>,
}

// ---------------------------------------------------------------------------
// CLI arguments
// ---------------------------------------------------------------------------

/// CLI arguments for the relay server.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "linkroom messaging relay")]
pub struct RelayCliArgs {
    /// Address to bind the relay server to.
    #[arg(short, long, env = "LINKROOM_ADDR")]
    pub bind: Option<String>,

    /// Path to config file (default: `~/.config/linkroom-relay/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Maximum inbound frame size in bytes.
    #[arg(long)]
    pub max_payload_size: Option<usize>,

    /// Append-only message log. Messages are kept in memory only when unset.
    #[arg(long)]
    pub data_file: Option<PathBuf>,

    /// Directory uploaded media is written to.
    #[arg(long)]
    pub media_dir: Option<PathBuf>,

    /// Allow users to open a direct room with themselves.
    #[arg(long)]
    pub allow_self_chat: bool,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "LINKROOM_LOG")]
    pub log_level: String,
}

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

/// Fully resolved relay server configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address to bind the server to (e.g., `0.0.0.0:9000`).
    pub bind_addr: String,
    /// Maximum inbound frame size in bytes.
    pub max_payload_size: usize,
    /// Page size when a history request names none.
    pub default_page_size: usize,
    /// Upper bound on requested page sizes.
    pub max_page_size: usize,
    /// Whether direct self-rooms are allowed.
    pub self_chat: SelfChatPolicy,
    /// Message log path; in-memory storage when `None`.
    pub data_file: Option<PathBuf>,
    /// Upload directory.
    pub media_dir: PathBuf,
    /// Profiles seeding the user directory.
    pub users: Vec<UserProfile>,
    /// Log level filter string.
    pub log_level: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:9000".to_string(),
            max_payload_size: 64 * 1024,
            default_page_size: DEFAULT_PAGE_SIZE,
            max_page_size: MAX_PAGE_SIZE,
            self_chat: SelfChatPolicy::Reject,
            data_file: None,
            media_dir: PathBuf::from("uploads"),
            users: Vec::new(),
            log_level: "info".to_string(),
        }
    }
}

impl RelayConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// If `--config` is given and the file does not exist, returns an error.
    /// If no `--config` is given, the default path is tried and missing file
    /// is treated as empty config.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the explicit config file cannot be read
    /// or parsed.
    pub fn load(cli: &RelayCliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Ok(Self::resolve(cli, file))
    }

    /// Resolve a `RelayConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default.
    fn resolve(cli: &RelayCliArgs, file: RelayConfigFile) -> Self {
        let defaults = Self::default();

        let allow_self_chat = cli.allow_self_chat || file.policy.allow_self_chat.unwrap_or(false);

        Self {
            bind_addr: cli
                .bind
                .clone()
                .or(file.server.bind_addr)
                .unwrap_or(defaults.bind_addr),
            max_payload_size: cli
                .max_payload_size
                .or(file.server.max_payload_size)
                .unwrap_or(defaults.max_payload_size),
            default_page_size: file
                .history
                .default_page_size
                .unwrap_or(defaults.default_page_size),
            max_page_size: file
                .history
                .max_page_size
                .unwrap_or(defaults.max_page_size),
            self_chat: SelfChatPolicy::from_allow(allow_self_chat),
            data_file: cli.data_file.clone().or(file.storage.data_file),
            media_dir: cli
                .media_dir
                .clone()
                .or(file.storage.media_dir)
                .unwrap_or(defaults.media_dir),
            users: file
                .users
                .into_iter()
                .map(|user| UserProfile {
                    id: UserId::new(user.id),
                    display_name: user.display_name,
                    avatar_ref: user.avatar_ref,
                })
                .collect(),
            log_level: cli.log_level.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Load and parse a TOML config file for the relay.
fn load_config_file(
    explicit_path: Option<&std::path::Path>,
) -> Result<RelayConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(RelayConfigFile::default());
        };
        config_dir.join("linkroom-relay").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(RelayConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
