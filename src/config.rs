//! Configuration for maestro.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (MAESTRO_HOME, MAESTRO_CONFIG)
//! 2. Config file (.maestro/config.yaml)
//! 3. Defaults (~/.maestro)
//!
//! Config file discovery:
//! - MAESTRO_CONFIG names the file explicitly
//! - Otherwise searches current directory and parents for .maestro/config.yaml
//! - `paths.home` in the config file is relative to the .maestro/ directory

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::adapters::fabric::DEFAULT_PATTERN;
use crate::core::store::DEFAULT_CLAIM_LEASE_SECS;
use crate::core::{CadencePolicy, RetryPolicy};
use crate::domain::{Platform, PrivilegeLevel};

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub cadence: CadencePolicy,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub sweep: SweepConfig,
    #[serde(default)]
    pub reviewers: HashMap<String, PrivilegeLevel>,
    #[serde(default)]
    pub platforms: HashMap<Platform, PlatformEndpoint>,
    #[serde(default)]
    pub fabric: Option<FabricConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// State directory (relative to .maestro/)
    pub home: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SweepConfig {
    pub interval_seconds: Option<u64>,
    pub workers: Option<usize>,
    pub publish_timeout_seconds: Option<u64>,
    pub review_reminder_hours: Option<i64>,
    pub claim_lease_seconds: Option<i64>,
}

/// Where and how to post for one platform
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PlatformEndpoint {
    pub endpoint: String,
    /// Environment variable holding the bearer token
    pub token_env: Option<String>,
}

impl PlatformEndpoint {
    /// Read the token from the environment, if one is configured and set
    pub fn token(&self) -> Option<String> {
        self.token_env
            .as_ref()
            .and_then(|name| std::env::var(name).ok())
            .filter(|t| !t.is_empty())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FabricConfig {
    pub binary: Option<String>,
    pub pattern: Option<String>,
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Absolute path to maestro home (journal lives here)
    pub home: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    pub cadence: CadencePolicy,
    pub retry: RetryPolicy,
    pub sweep: SweepSettings,
    pub reviewers: HashMap<String, PrivilegeLevel>,
    pub platforms: HashMap<Platform, PlatformEndpoint>,
    pub fabric: FabricSettings,
}

#[derive(Debug, Clone)]
pub struct SweepSettings {
    pub interval_seconds: u64,
    pub workers: usize,
    pub publish_timeout_seconds: u64,
    pub review_reminder_hours: i64,
    /// How long a dispatch lease holds off other processes
    pub claim_lease_seconds: i64,
}

impl Default for SweepSettings {
    fn default() -> Self {
        Self {
            interval_seconds: 3600,
            workers: 4,
            publish_timeout_seconds: 30,
            review_reminder_hours: 4,
            claim_lease_seconds: DEFAULT_CLAIM_LEASE_SECS,
        }
    }
}

impl SweepSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds.max(1))
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_secs(self.publish_timeout_seconds.max(1))
    }

    pub fn reminder_after(&self) -> chrono::Duration {
        chrono::Duration::hours(self.review_reminder_hours)
    }

    /// Never shorter than the publish timeout, or a slow call would outlive it
    pub fn claim_lease(&self) -> chrono::Duration {
        let floor = self.publish_timeout_seconds.max(1) as i64 * 2;
        chrono::Duration::seconds(self.claim_lease_seconds.max(floor))
    }
}

#[derive(Debug, Clone)]
pub struct FabricSettings {
    pub binary: String,
    pub pattern: String,
}

impl Default for FabricSettings {
    fn default() -> Self {
        Self {
            binary: "fabric".to_string(),
            pattern: DEFAULT_PATTERN.to_string(),
        }
    }
}

impl ResolvedConfig {
    /// Path to the content journal ($MAESTRO_HOME/content.jsonl)
    pub fn journal_path(&self) -> PathBuf {
        self.home.join("content.jsonl")
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    if let Ok(explicit) = std::env::var("MAESTRO_CONFIG") {
        return Some(PathBuf::from(explicit));
    }

    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".maestro").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content).with_context(|| format!("Invalid config file: {}", path.display()))
}

/// Parse and validate config text
fn parse_config(content: &str) -> Result<ConfigFile> {
    let config: ConfigFile = serde_yaml::from_str(content).context("Failed to parse YAML")?;
    config.cadence.validate()?;
    if config.retry.max_attempts == 0 {
        anyhow::bail!("retry.max_attempts must be at least 1");
    }
    Ok(config)
}

/// Resolve a path that may be relative to the config file's parent
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Merge a parsed file into resolved settings
fn resolve(config: ConfigFile, config_path: &Path, default_home: PathBuf) -> ResolvedConfig {
    let home = if let Ok(env_home) = std::env::var("MAESTRO_HOME") {
        PathBuf::from(env_home)
    } else if let Some(ref home_path) = config.paths.home {
        let maestro_dir = config_path.parent().unwrap_or(Path::new("."));
        resolve_path(maestro_dir, home_path)
    } else {
        default_home
    };

    let defaults = SweepSettings::default();
    let sweep = SweepSettings {
        interval_seconds: config.sweep.interval_seconds.unwrap_or(defaults.interval_seconds),
        workers: config.sweep.workers.unwrap_or(defaults.workers),
        publish_timeout_seconds: config
            .sweep
            .publish_timeout_seconds
            .unwrap_or(defaults.publish_timeout_seconds),
        review_reminder_hours: config
            .sweep
            .review_reminder_hours
            .unwrap_or(defaults.review_reminder_hours),
        claim_lease_seconds: config
            .sweep
            .claim_lease_seconds
            .unwrap_or(defaults.claim_lease_seconds),
    };

    let fabric = match config.fabric {
        Some(f) => {
            let defaults = FabricSettings::default();
            FabricSettings {
                binary: f.binary.unwrap_or(defaults.binary),
                pattern: f.pattern.unwrap_or(defaults.pattern),
            }
        }
        None => FabricSettings::default(),
    };

    ResolvedConfig {
        home,
        config_file: Some(config_path.to_path_buf()),
        cadence: config.cadence,
        retry: config.retry,
        sweep,
        reviewers: config.reviewers,
        platforms: config.platforms,
        fabric,
    }
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    // Default home directory
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(".maestro");

    if let Some(config_path) = find_config_file() {
        let config = load_config_file(&config_path)?;
        return Ok(resolve(config, &config_path, default_home));
    }

    // No config file - use env vars or defaults
    let home = std::env::var("MAESTRO_HOME")
        .map(PathBuf::from)
        .unwrap_or(default_home);

    Ok(ResolvedConfig {
        home,
        config_file: None,
        cadence: CadencePolicy::default(),
        retry: RetryPolicy::default(),
        sweep: SweepSettings::default(),
        reviewers: HashMap::new(),
        platforms: HashMap::new(),
        fabric: FabricSettings::default(),
    })
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| format!("{:#}", e)));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

/// Force reload configuration (useful for testing)
pub fn reload_config() -> Result<ResolvedConfig> {
    load_config()
}

/// Get the maestro home directory
pub fn maestro_home() -> Result<PathBuf> {
    Ok(config()?.home.clone())
}
