use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::rules::RuleOverrides;

/// Top-level configuration loaded from `hindsight.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HindsightConfig {
    /// Path to the index database (supports `~` expansion). The bookmark
    /// database lives beside it with a `.bookmarks` suffix.
    pub db: String,
    /// Default log level when `RUST_LOG` is not set.
    pub log_level: String,

    pub discovery: DiscoverySettings,
    pub sqlite: SqliteConfig,
    /// Per-provider system-message regex overrides. A present provider key
    /// replaces that provider's built-in rules; an empty list disables them.
    pub rules: RuleOverrides,
}

impl Default for HindsightConfig {
    fn default() -> Self {
        Self {
            db: "~/.hindsight/hindsight.db".to_string(),
            log_level: "info".to_string(),
            discovery: DiscoverySettings::default(),
            sqlite: SqliteConfig::default(),
            rules: RuleOverrides::new(),
        }
    }
}

impl HindsightConfig {
    /// Resolve the index database path, expanding `~`.
    pub fn resolved_db_path(&self) -> PathBuf {
        expand_tilde(&self.db)
    }

    pub fn resolved_log_level(&self) -> &str {
        &self.log_level
    }

    pub fn discovery_config(&self) -> DiscoveryConfig {
        DiscoveryConfig {
            claude_root: expand_tilde(&self.discovery.claude_root),
            codex_root: expand_tilde(&self.discovery.codex_root),
            gemini_root: expand_tilde(&self.discovery.gemini_root),
            gemini_history_root: expand_tilde(&self.discovery.gemini_history_root),
        }
    }
}

/// Provider roots as written in the config file (unexpanded).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DiscoverySettings {
    pub claude_root: String,
    pub codex_root: String,
    pub gemini_root: String,
    pub gemini_history_root: String,
    /// Informational: where the Gemini CLI keeps per-project state. Surfaced
    /// in settings info, not walked by discovery.
    pub gemini_projects_path: String,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            claude_root: "~/.claude/projects".to_string(),
            codex_root: "~/.codex/sessions".to_string(),
            gemini_root: "~/.gemini/tmp".to_string(),
            gemini_history_root: "~/.gemini/history".to_string(),
            gemini_projects_path: "~/.gemini/projects".to_string(),
        }
    }
}

/// Resolved provider roots handed to discovery.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    pub claude_root: PathBuf,
    pub codex_root: PathBuf,
    pub gemini_root: PathBuf,
    pub gemini_history_root: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SqliteConfig {
    pub cache_size_mb: u32,
    pub mmap_size_mb: u32,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            cache_size_mb: 64,
            mmap_size_mb: 256,
        }
    }
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}

/// Returns the user data directory: `~/.hindsight`.
pub fn user_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".hindsight")
}

/// Returns the default config file path: `~/.hindsight/hindsight.toml`.
pub fn default_config_path() -> PathBuf {
    user_data_dir().join("hindsight.toml")
}

/// Load configuration from a TOML file.
///
/// - If `path` is `Some`, reads that file (errors if missing or invalid).
/// - If `path` is `None`, tries the default path; returns defaults if the file doesn't exist.
pub fn load_config(path: Option<&Path>) -> Result<HindsightConfig> {
    let config_path = match path {
        Some(p) => p.to_path_buf(),
        None => default_config_path(),
    };

    if !config_path.exists() {
        if path.is_some() {
            anyhow::bail!("config file not found: {}", config_path.display());
        }
        return Ok(HindsightConfig::default());
    }

    let contents = std::fs::read_to_string(&config_path)
        .with_context(|| format!("failed to read config file: {}", config_path.display()))?;

    let config: HindsightConfig = toml::from_str(&contents)
        .with_context(|| format!("failed to parse config file: {}", config_path.display()))?;

    Ok(config)
}
