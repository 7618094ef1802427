//! # Configuration
//!
//! Settings for logging, status retention, replay pacing, task teardown and
//! the external editor. Later sources win: built-in defaults, then
//! `~/.sheetdeck/config.toml`, then env vars, then CLI flags.
//!
//! A missing config file is created on first run with every option present
//! but commented out.

use log::{LevelFilter, debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

// ============================================================================
// File layout (every field optional)
// ============================================================================

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct SheetdeckConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub status: StatusConfig,
    #[serde(default)]
    pub replay: ReplayConfig,
    #[serde(default)]
    pub tasks: TasksConfig,
    #[serde(default)]
    pub editor: EditorConfig,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct GeneralConfig {
    pub log_file: Option<String>,
    pub log_level: Option<String>,
    /// Treat the first line of delimited files as column names.
    pub csv_header: Option<bool>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct StatusConfig {
    pub history: Option<usize>,
    pub error_retention: Option<usize>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ReplayConfig {
    pub delay_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct TasksConfig {
    pub abandon_after_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct EditorConfig {
    pub command: Option<String>,
}

// ============================================================================
// Defaults
// ============================================================================

pub const DEFAULT_LOG_FILE: &str = "sheetdeck.log";
pub const DEFAULT_STATUS_HISTORY: usize = 100;
pub const DEFAULT_ERROR_RETENTION: usize = 5;
pub const DEFAULT_ABANDON_AFTER_MS: u64 = 5000;
pub const DEFAULT_EDITOR: &str = "vi";

// ============================================================================
// Effective settings
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConfig {
    pub log_file: PathBuf,
    pub log_level: LevelFilter,
    pub csv_header: bool,
    pub status_history: usize,
    pub error_retention: usize,
    pub replay_delay: Duration,
    pub abandon_after: Duration,
    pub editor: String,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        resolve_with(&SheetdeckConfig::default(), None, |_| None)
    }
}

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "config I/O error: {e}"),
            ConfigError::Parse(e) => write!(f, "config parse error: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

// ============================================================================
// Loading
// ============================================================================

/// Returns the path to `~/.sheetdeck/config.toml`.
pub fn config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".sheetdeck").join("config.toml"))
}

/// Load config from `~/.sheetdeck/config.toml`.
///
/// A missing file yields `SheetdeckConfig::default()` after writing the
/// template. A malformed file is a `ConfigError::Parse`.
pub fn load_config() -> Result<SheetdeckConfig, ConfigError> {
    let path = match config_path() {
        Some(p) => p,
        None => {
            warn!("Could not determine home directory, using default config");
            return Ok(SheetdeckConfig::default());
        }
    };

    if !path.exists() {
        info!("No config file found, generating default at {}", path.display());
        generate_default_config(&path);
        return Ok(SheetdeckConfig::default());
    }

    load_config_from(&path)
}

pub fn load_config_from(path: &Path) -> Result<SheetdeckConfig, ConfigError> {
    let contents = fs::read_to_string(path).map_err(ConfigError::Io)?;
    let config: SheetdeckConfig = toml::from_str(&contents).map_err(ConfigError::Parse)?;
    info!("Loaded config from {}", path.display());
    debug!("Config: {:?}", config);
    Ok(config)
}

/// Writes the commented template to `path`.
fn generate_default_config(path: &Path) {
    let default_content = r#"# Sheetdeck Configuration
# All settings are optional. Defaults are used for anything not specified.
# Values here are overridden by env vars and CLI flags.

# [general]
# log_file = "sheetdeck.log"        # Relative to the working directory
# log_level = "debug"               # "error", "warn", "info", "debug", "trace", "off"
# csv_header = true                 # First line of .csv/.tsv files names the columns

# [status]
# history = 100                     # Messages kept for the status history sheet (Ctrl+P)
# error_retention = 5               # An error stays visible until this many newer messages

# [replay]
# delay_ms = 0                      # Or SHEETDECK_REPLAY_DELAY / --replay-delay

# [tasks]
# abandon_after_ms = 5000           # Grace period before a closing sheet detaches stuck tasks

# [editor]
# command = "vi"                    # Or set VISUAL / EDITOR
"#;

    if let Some(parent) = path.parent()
        && let Err(e) = fs::create_dir_all(parent)
    {
        warn!("Failed to create config directory: {}", e);
        return;
    }
    if let Err(e) = fs::write(path, default_content) {
        warn!("Failed to write default config: {}", e);
    }
}

// ============================================================================
// Resolution
// ============================================================================

/// Collapses defaults, file values, env vars and CLI flags into one `ResolvedConfig`.
///
/// `cli_replay_delay_ms` is the `--replay-delay` flag (None = not specified).
pub fn resolve(config: &SheetdeckConfig, cli_replay_delay_ms: Option<u64>) -> ResolvedConfig {
    resolve_with(config, cli_replay_delay_ms, |key| std::env::var(key).ok())
}

fn resolve_with(
    config: &SheetdeckConfig,
    cli_replay_delay_ms: Option<u64>,
    env: impl Fn(&str) -> Option<String>,
) -> ResolvedConfig {
    let log_level = config
        .general
        .log_level
        .as_deref()
        .and_then(|level| match level.parse::<LevelFilter>() {
            Ok(filter) => Some(filter),
            Err(_) => {
                warn!("Unknown log level '{}', using debug", level);
                None
            }
        })
        .unwrap_or(LevelFilter::Debug);

    // Replay delay: CLI → env → config → default
    let replay_delay_ms = cli_replay_delay_ms
        .or_else(|| env("SHEETDECK_REPLAY_DELAY").and_then(|v| v.trim().parse().ok()))
        .or(config.replay.delay_ms)
        .unwrap_or(0);

    // Editor: env → config → default
    let editor = env("VISUAL")
        .or_else(|| env("EDITOR"))
        .filter(|e| !e.trim().is_empty())
        .or_else(|| config.editor.command.clone())
        .unwrap_or_else(|| DEFAULT_EDITOR.to_string());

    ResolvedConfig {
        log_file: PathBuf::from(
            config
                .general
                .log_file
                .as_deref()
                .unwrap_or(DEFAULT_LOG_FILE),
        ),
        log_level,
        csv_header: config.general.csv_header.unwrap_or(true),
        status_history: config.status.history.unwrap_or(DEFAULT_STATUS_HISTORY),
        error_retention: config
            .status
            .error_retention
            .unwrap_or(DEFAULT_ERROR_RETENTION),
        replay_delay: Duration::from_millis(replay_delay_ms),
        abandon_after: Duration::from_millis(
            config
                .tasks
                .abandon_after_ms
                .unwrap_or(DEFAULT_ABANDON_AFTER_MS),
        ),
        editor,
    }
}
