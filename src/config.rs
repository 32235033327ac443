use crate::api::{ErrorPatterns, DEFAULT_PERMISSION_PATTERNS, DEFAULT_SESSION_EXPIRED_PATTERNS};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// A validation error in the configuration
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]: {}", self.field, self.message)
    }
}

/// Backend connection settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_base_url() -> String {
    "http://localhost:5000".to_string()
}

fn default_timeout_ms() -> u64 {
    30_000
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Where the session is persisted
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct SessionConfig {
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

/// Message patterns for classifying backend failures
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ErrorsConfig {
    #[serde(default = "default_session_expired_patterns")]
    pub session_expired_patterns: Vec<String>,
    #[serde(default = "default_permission_patterns")]
    pub permission_patterns: Vec<String>,
}

fn default_session_expired_patterns() -> Vec<String> {
    DEFAULT_SESSION_EXPIRED_PATTERNS
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_permission_patterns() -> Vec<String> {
    DEFAULT_PERMISSION_PATTERNS
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for ErrorsConfig {
    fn default() -> Self {
        Self {
            session_expired_patterns: default_session_expired_patterns(),
            permission_patterns: default_permission_patterns(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct LoggingConfig {
    /// tracing-subscriber filter directive, e.g. "attend=debug"
    #[serde(default)]
    pub filter: Option<String>,
}

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub errors: ErrorsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// A config file as written on disk: every field optional so a layer only
/// overrides what it sets
#[derive(Debug, Clone, Deserialize, Default)]
struct ConfigLayer {
    #[serde(default)]
    api: ApiLayer,
    #[serde(default)]
    session: SessionConfig,
    #[serde(default)]
    errors: ErrorsLayer,
    #[serde(default)]
    logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct ApiLayer {
    base_url: Option<String>,
    timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct ErrorsLayer {
    session_expired_patterns: Option<Vec<String>>,
    permission_patterns: Option<Vec<String>>,
}

impl Config {
    /// Load configuration from default paths
    /// Priority: local (.attend/config.local.toml) > project (.attend/config.toml) > user (~/.attend/config.toml)
    pub fn load() -> Result<Self> {
        let mut config = Self::default();

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".attend").join("config.toml");
            if user_config.exists() {
                config.merge_file(&user_config)?;
            }
        }

        let project_config = Path::new(".attend").join("config.toml");
        if project_config.exists() {
            config.merge_file(&project_config)?;
        }

        // Local overrides, should be gitignored
        let local_config = Path::new(".attend").join("config.local.toml");
        if local_config.exists() {
            config.merge_file(&local_config)?;
        }

        Ok(config)
    }

    /// Load configuration from a specific path on top of the defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = Self::default();
        config.merge_file(path)?;
        Ok(config)
    }

    fn merge_file(&mut self, path: &Path) -> Result<()> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let layer: ConfigLayer = toml::from_str(&content)
            .with_context(|| format!("invalid config {}", path.display()))?;
        self.merge(layer);
        Ok(())
    }

    /// Merge another layer into this one (the layer takes priority where set)
    fn merge(&mut self, other: ConfigLayer) {
        if let Some(base_url) = other.api.base_url {
            self.api.base_url = base_url;
        }
        if let Some(timeout_ms) = other.api.timeout_ms {
            self.api.timeout_ms = timeout_ms;
        }

        if other.session.dir.is_some() {
            self.session.dir = other.session.dir;
        }

        if let Some(patterns) = other.errors.session_expired_patterns {
            self.errors.session_expired_patterns = patterns;
        }
        if let Some(patterns) = other.errors.permission_patterns {
            self.errors.permission_patterns = patterns;
        }

        if other.logging.filter.is_some() {
            self.logging.filter = other.logging.filter;
        }
    }

    /// Directory holding the persisted session
    /// Falls back to ~/.attend/session, then .attend/session
    pub fn session_dir(&self) -> PathBuf {
        if let Some(dir) = &self.session.dir {
            return expand_home(dir);
        }
        match dirs::home_dir() {
            Some(home) => home.join(".attend").join("session"),
            None => Path::new(".attend").join("session"),
        }
    }

    pub fn error_patterns(&self) -> Result<ErrorPatterns> {
        ErrorPatterns::new(
            &self.errors.session_expired_patterns,
            &self.errors.permission_patterns,
        )
        .context("invalid error pattern")
    }

    /// Validate configuration and return any errors found
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        let base_url = self.api.base_url.trim();
        if base_url.is_empty() {
            errors.push(ValidationError {
                field: "api.base_url".to_string(),
                message: "Must not be empty".to_string(),
            });
        } else if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            errors.push(ValidationError {
                field: "api.base_url".to_string(),
                message: format!("Expected an http(s) URL, got '{}'", base_url),
            });
        }

        if self.api.timeout_ms == 0 {
            errors.push(ValidationError {
                field: "api.timeout_ms".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        let pattern_sets = [
            ("errors.session_expired_patterns", &self.errors.session_expired_patterns),
            ("errors.permission_patterns", &self.errors.permission_patterns),
        ];
        for (field, patterns) in pattern_sets {
            for (i, pattern) in patterns.iter().enumerate() {
                if regex::Regex::new(pattern).is_err() {
                    errors.push(ValidationError {
                        field: format!("{}[{}]", field, i),
                        message: format!("Invalid regex pattern '{}'", pattern),
                    });
                }
            }
        }

        if let Some(filter) = &self.logging.filter {
            if tracing_subscriber::EnvFilter::try_new(filter).is_err() {
                errors.push(ValidationError {
                    field: "logging.filter".to_string(),
                    message: format!("Invalid filter directive '{}'", filter),
                });
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

fn expand_home(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}
