//! Configuration management for newshound
//!
//! Handles loading, saving, and validating configuration from TOML files.

mod defaults;

pub use defaults::*;

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Page fetching (static and rendered)
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Language model used for selector inference
    #[serde(default)]
    pub llm: LlmConfig,

    /// Per-site scheduling
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Selector validation thresholds
    #[serde(default)]
    pub validation: ValidationConfig,

    /// URL discovery behaviour
    #[serde(default)]
    pub discovery: DiscoveryConfig,

    /// Paths configuration (internal, not user-editable)
    #[serde(skip)]
    pub paths: PathsConfig,
}

/// Fetch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// User agent sent with static and rendered requests
    #[serde(default = "default_fetch_user_agent")]
    pub user_agent: String,

    /// Static request timeout in seconds
    #[serde(default = "default_fetch_timeout")]
    pub timeout_secs: u64,

    /// Navigation timeout for rendered fetches (milliseconds)
    #[serde(default = "default_navigation_timeout")]
    pub navigation_timeout_ms: u64,

    /// How long to wait for a wait-for-selector before giving up softly (milliseconds)
    #[serde(default = "default_selector_wait")]
    pub selector_wait_ms: u64,

    /// Extra settle time after navigation (milliseconds)
    #[serde(default = "default_render_wait")]
    pub render_wait_ms: u64,

    #[serde(default = "default_viewport_width")]
    pub viewport_width: u32,

    #[serde(default = "default_viewport_height")]
    pub viewport_height: u32,

    /// Run browser in headless mode
    #[serde(default = "default_headless")]
    pub headless: bool,

    /// Disable the Chrome sandbox (Docker/CI)
    #[serde(default)]
    pub no_sandbox: bool,

    /// Requests per second per host for static fetches
    #[serde(default = "default_fetch_rate_limit")]
    pub rate_limit_per_host: f64,
}

/// LLM configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Base URL of an OpenAI-compatible API
    #[serde(default = "default_llm_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_llm_model")]
    pub model: String,

    /// Environment variable name holding the API key
    #[serde(default = "default_llm_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_llm_temperature")]
    pub temperature: f32,

    #[serde(default = "default_llm_max_tokens")]
    pub max_tokens: u32,

    /// Request timeout in seconds
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_llm_requests_per_minute")]
    pub requests_per_minute: u32,

    /// Overall budget for one onboarding attempt, fetch through validation (seconds)
    #[serde(default = "default_onboard_timeout")]
    pub onboard_timeout_secs: u64,
}

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Frequency applied to imported sites that do not declare one
    #[serde(default = "default_frequency_minutes")]
    pub default_frequency_minutes: u32,

    /// Overall budget for one discovery run (seconds)
    #[serde(default = "default_run_timeout")]
    pub run_timeout_secs: u64,

    /// How often `serve` picks up sites changed by other processes (seconds)
    #[serde(default = "default_sync_interval")]
    pub sync_interval_secs: u64,
}

/// Validation thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    #[serde(default = "default_min_listing_urls")]
    pub min_listing_urls: usize,

    #[serde(default = "default_min_title_chars")]
    pub min_title_chars: usize,

    #[serde(default = "default_min_content_chars")]
    pub min_content_chars: usize,

    #[serde(default = "default_max_selector_depth")]
    pub max_selector_depth: usize,
}

/// Discovery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Whether newly tracked URLs may be re-extracted later
    #[serde(default = "default_reextract_allowed")]
    pub reextract_allowed: bool,

    /// Cooldown applied to imported sites that do not declare one (days)
    #[serde(default = "default_reextract_cooldown_days")]
    pub reextract_cooldown_days: u32,

    /// How many URLs to keep on each run log for debugging
    #[serde(default = "default_sample_urls")]
    pub sample_urls: usize,
}

/// Internal paths configuration
#[derive(Debug, Clone, Default)]
pub struct PathsConfig {
    /// Base directory for newshound data
    pub base_dir: PathBuf,

    /// Path to config file
    pub config_file: PathBuf,

    /// Path to SQLite database
    pub db_file: PathBuf,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: default_fetch_user_agent(),
            timeout_secs: default_fetch_timeout(),
            navigation_timeout_ms: default_navigation_timeout(),
            selector_wait_ms: default_selector_wait(),
            render_wait_ms: default_render_wait(),
            viewport_width: default_viewport_width(),
            viewport_height: default_viewport_height(),
            headless: default_headless(),
            no_sandbox: false,
            rate_limit_per_host: default_fetch_rate_limit(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: default_llm_endpoint(),
            model: default_llm_model(),
            api_key_env: default_llm_api_key_env(),
            temperature: default_llm_temperature(),
            max_tokens: default_llm_max_tokens(),
            timeout_secs: default_llm_timeout(),
            requests_per_minute: default_llm_requests_per_minute(),
            onboard_timeout_secs: default_onboard_timeout(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            default_frequency_minutes: default_frequency_minutes(),
            run_timeout_secs: default_run_timeout(),
            sync_interval_secs: default_sync_interval(),
        }
    }
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            min_listing_urls: default_min_listing_urls(),
            min_title_chars: default_min_title_chars(),
            min_content_chars: default_min_content_chars(),
            max_selector_depth: default_max_selector_depth(),
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            reextract_allowed: default_reextract_allowed(),
            reextract_cooldown_days: default_reextract_cooldown_days(),
            sample_urls: default_sample_urls(),
        }
    }
}

impl SchedulerConfig {
    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }
}

impl LlmConfig {
    /// Get the API key from the configured environment variable
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
    }

    pub fn onboard_timeout(&self) -> Duration {
        Duration::from_secs(self.onboard_timeout_secs)
    }
}

impl Config {
    /// Get the default base directory for newshound (~/.newshound)
    pub fn default_base_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".newshound")
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        Self::default_base_dir().join("config.toml")
    }

    /// Initialize paths configuration
    pub fn init_paths(&mut self, base_dir: Option<PathBuf>) {
        let base = base_dir.unwrap_or_else(Self::default_base_dir);
        self.paths = PathsConfig {
            config_file: base.join("config.toml"),
            db_file: base.join("newshound.db"),
            base_dir: base,
        };
    }

    /// Load configuration from a specific file path
    pub fn load(config_path: &Path) -> Result<Self> {
        debug!("Loading config from {:?}", config_path);

        if !config_path.exists() {
            return Err(Error::Config(format!(
                "Config file not found: {}",
                config_path.display()
            )));
        }

        let content = std::fs::read_to_string(config_path)?;
        let mut config: Config = toml::from_str(&content)?;

        // Set up paths based on config file location
        let base = config_path.parent().unwrap_or(Path::new(".")).to_path_buf();
        config.paths = PathsConfig {
            config_file: config_path.to_path_buf(),
            db_file: base.join("newshound.db"),
            base_dir: base,
        };

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific base directory
    pub fn load_from(base_dir: Option<PathBuf>) -> Result<Self> {
        let mut config = Config::default();
        config.init_paths(base_dir);

        if config.paths.config_file.exists() {
            debug!("Loading config from {:?}", config.paths.config_file);
            let content = std::fs::read_to_string(&config.paths.config_file)?;
            let mut loaded: Config = toml::from_str(&content)?;
            loaded.paths = config.paths;
            config = loaded;
        } else {
            debug!("No config file found, using defaults");
        }

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.paths.config_file.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(&self.paths.config_file, content)?;
        info!("Saved config to {:?}", self.paths.config_file);
        Ok(())
    }

    /// Check if newshound is initialized (config and DB exist)
    pub fn is_initialized(&self) -> bool {
        self.paths.config_file.exists() && self.paths.db_file.exists()
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.fetch.rate_limit_per_host <= 0.0 {
            return Err(Error::Config(
                "fetch.rate_limit_per_host must be positive".to_string(),
            ));
        }

        if self.fetch.navigation_timeout_ms == 0 || self.fetch.timeout_secs == 0 {
            return Err(Error::Config("fetch timeouts must be non-zero".to_string()));
        }

        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(Error::Config(
                "llm.temperature must be between 0.0 and 2.0".to_string(),
            ));
        }

        if self.llm.max_tokens == 0 {
            return Err(Error::Config("llm.max_tokens must be positive".to_string()));
        }

        if self.scheduler.default_frequency_minutes == 0 {
            return Err(Error::Config(
                "scheduler.default_frequency_minutes must be positive".to_string(),
            ));
        }

        if self.scheduler.run_timeout_secs == 0
            || self.scheduler.sync_interval_secs == 0
            || self.llm.onboard_timeout_secs == 0
        {
            return Err(Error::Config(
                "scheduler and onboarding timeouts must be non-zero".to_string(),
            ));
        }

        if self.validation.min_listing_urls == 0
            || self.validation.min_title_chars == 0
            || self.validation.min_content_chars == 0
        {
            return Err(Error::Config(
                "validation thresholds must be positive".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.validation.min_listing_urls, 3);
        assert_eq!(config.validation.min_title_chars, 5);
        assert_eq!(config.validation.min_content_chars, 50);
        assert_eq!(config.fetch.navigation_timeout_ms, 30000);
        assert_eq!(config.fetch.selector_wait_ms, 5000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_save_load() {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.init_paths(Some(tmp.path().to_path_buf()));
        config.llm.model = "local-model".to_string();

        config.save().unwrap();
        assert!(config.paths.config_file.exists());

        let loaded = Config::load_from(Some(tmp.path().to_path_buf())).unwrap();
        assert_eq!(loaded.llm.model, "local-model");
        assert_eq!(loaded.paths.db_file, tmp.path().join("newshound.db"));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str("[scheduler]\ndefault_frequency_minutes = 15\n").unwrap();
        assert_eq!(config.scheduler.default_frequency_minutes, 15);
        assert_eq!(config.scheduler.run_timeout_secs, 120);
        assert_eq!(config.scheduler.sync_interval_secs, 30);
        assert_eq!(config.llm.onboard_timeout_secs, 180);
        assert_eq!(config.validation.max_selector_depth, 5);
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();

        config.llm.temperature = 3.0;
        assert!(config.validate().is_err());
        config.llm.temperature = 0.0;
        assert!(config.validate().is_ok());

        config.fetch.rate_limit_per_host = 0.0;
        assert!(config.validate().is_err());
    }
}
