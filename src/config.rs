//! Assistant configuration loading and validation.
//!
//! Reads `config/assistant.yaml` and resolves environment variables. Every
//! section has defaults, so a missing file or an empty section yields a
//! working local (SQLite, rule-classifier) setup.

use std::borrow::Cow;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde::Deserialize;
use thiserror::Error;

use crate::tasks::EmptyStepPolicy;
use crate::upstream::{RefreshJob, RetryWindow};

/// Env var holding an explicit config file path.
pub const CONFIG_ENV: &str = "IE_ASSISTANT_CONFIG";

const CONFIG_RELATIVE: &str = "config/assistant.yaml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not find {CONFIG_RELATIVE} above {start}")]
    NotFound { start: String },

    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {reason}")]
    Parse { reason: String },

    #[error("invalid config: {reason}")]
    Invalid { reason: String },
}

// ─── Public Types ────────────────────────────────────────────────────────────

/// Which client backs the store or the upstream source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    /// Supabase-style REST API (store) or SQL-over-HTTP gateway (upstream).
    Rest,
    /// Local SQLite file.
    #[default]
    Sqlite,
}

/// Connection settings shared by the store and the upstream source.
#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    #[serde(default)]
    pub backend: Backend,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    /// SQLite file. Defaults to a file in the data directory.
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            url: None,
            api_key: None,
            path: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl BackendConfig {
    /// SQLite file for this section: the configured `path` with a leading
    /// `~` resolved against the home directory, else `data_dir/fallback`.
    pub fn sqlite_file(&self, data_dir: &Path, fallback: &str) -> PathBuf {
        let Some(path) = self.path.as_deref().filter(|p| !p.is_empty()) else {
            return data_dir.join(fallback);
        };
        let path = Path::new(path);
        match (path.strip_prefix("~"), dirs::home_dir()) {
            (Ok(rest), Some(home)) => home.join(rest),
            _ => path.to_path_buf(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    #[default]
    Rules,
    Semantic,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClassifierConfig {
    #[serde(default)]
    pub strategy: Strategy,
    /// OpenAI-style `/embeddings` base URL. When absent the semantic
    /// strategy uses the built-in hashing embedder.
    #[serde(default)]
    pub embedding_endpoint: Option<String>,
    #[serde(default = "default_confidence_floor")]
    pub confidence_floor: f32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::default(),
            embedding_endpoint: None,
            confidence_floor: default_confidence_floor(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorConfig {
    /// Upper bound for one user turn, refreshes included.
    #[serde(default = "default_turn_timeout_secs")]
    pub turn_timeout_secs: u64,
    /// Concurrently running blocking store/upstream calls.
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
    #[serde(default)]
    pub on_empty_step: EmptyStepPolicy,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            turn_timeout_secs: default_turn_timeout_secs(),
            worker_threads: default_worker_threads(),
            on_empty_step: EmptyStepPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    #[serde(default)]
    pub filter: Option<String>,
}

/// Top-level configuration (mirrors `config/assistant.yaml`).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AssistantConfig {
    #[serde(default)]
    pub store: BackendConfig,
    #[serde(default)]
    pub upstream: BackendConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    /// Per-job retry-window overrides.
    #[serde(default)]
    pub windows: HashMap<RefreshJob, RetryWindow>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_timeout_secs() -> u64 {
    30
}
fn default_confidence_floor() -> f32 {
    0.7
}
fn default_turn_timeout_secs() -> u64 {
    300
}
fn default_worker_threads() -> usize {
    2
}

impl AssistantConfig {
    /// Reject settings that would only fail later, mid-turn.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: String| Err(ConfigError::Invalid { reason });
        if self.orchestrator.worker_threads == 0 {
            return invalid("orchestrator.worker_threads must be at least 1".into());
        }
        if !(self.classifier.confidence_floor > 0.0 && self.classifier.confidence_floor <= 1.0) {
            return invalid(format!(
                "classifier.confidence_floor must be in (0, 1], got {}",
                self.classifier.confidence_floor
            ));
        }
        for (section, backend) in [("store", &self.store), ("upstream", &self.upstream)] {
            if backend.backend == Backend::Rest && backend.url.as_deref().map_or(true, str::is_empty)
            {
                return invalid(format!("{section}.url is required for the rest backend"));
            }
        }
        for (job, window) in &self.windows {
            if window.period_months == 0 || window.max_attempts == 0 {
                return invalid(format!(
                    "windows.{}: period_months and max_attempts must be positive",
                    job.name()
                ));
            }
        }
        Ok(())
    }
}

// ─── Loading ─────────────────────────────────────────────────────────────────

/// Locate the config file.
///
/// `IE_ASSISTANT_CONFIG` wins when it names an existing file; otherwise the
/// search walks upward from `start` for `config/assistant.yaml`.
pub fn find_config_path(start: &Path) -> Result<PathBuf, ConfigError> {
    if let Ok(path) = std::env::var(CONFIG_ENV) {
        let candidate = PathBuf::from(path);
        if candidate.is_file() {
            return Ok(candidate);
        }
    }

    let mut dir = start.to_path_buf();
    loop {
        let candidate = dir.join(CONFIG_RELATIVE);
        if candidate.exists() {
            return Ok(candidate);
        }
        if !dir.pop() {
            break;
        }
    }

    Err(ConfigError::NotFound {
        start: start.display().to_string(),
    })
}

/// Load, interpolate and validate a config file.
pub fn load_config(path: &Path) -> Result<AssistantConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    parse_config(&raw)
}

/// Parse config text. Empty text yields the defaults.
pub fn parse_config(raw: &str) -> Result<AssistantConfig, ConfigError> {
    let interpolated = resolve_env(raw);
    let config: AssistantConfig = if interpolated.trim().is_empty() {
        AssistantConfig::default()
    } else {
        serde_yaml::from_str(&interpolated).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })?
    };
    config.validate()?;
    Ok(config)
}

/// Find and load the config, falling back to defaults when no file exists.
pub fn load_or_default(start: &Path) -> Result<(AssistantConfig, Option<PathBuf>), ConfigError> {
    match find_config_path(start) {
        Ok(path) => load_config(&path).map(|c| (c, Some(path))),
        Err(ConfigError::NotFound { .. }) => Ok((AssistantConfig::default(), None)),
        Err(e) => Err(e),
    }
}

// ─── Env-var interpolation ───────────────────────────────────────────────────

fn placeholder() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\$\{([^}:]+)(?::-([^}]*))?\}").expect("placeholder regex is valid")
    })
}

/// Substitute `${VAR}` and `${VAR:-default}` from the environment. An unset
/// variable without a default becomes the empty string.
fn resolve_env(raw: &str) -> Cow<'_, str> {
    placeholder().replace_all(raw, |caps: &Captures| {
        std::env::var(&caps[1])
            .ok()
            .or_else(|| caps.get(2).map(|d| d.as_str().to_string()))
            .unwrap_or_default()
    })
}

// ─── Tests ───────────────────────────────────────────────────────────────────
