//! Application configuration for tagrail.
//!
//! User config lives at `~/.tagrail/tagrail.toml`. The file stores env var
//! *names* for credentials, never the credentials themselves. CLI flags
//! override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, TagrailError};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "tagrail.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".tagrail";

// ---------------------------------------------------------------------------
// Config structs (matching tagrail.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Record store settings.
    #[serde(default)]
    pub store: StoreConfig,

    /// LLM service settings.
    #[serde(default)]
    pub llm: LlmConfig,

    /// Normalization tuning.
    #[serde(default)]
    pub normalize: NormalizeConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Directory for inventory/mapping/progress documents.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

fn default_data_dir() -> String {
    "data".into()
}

/// `[store]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Name of the env var holding the store endpoint URL.
    #[serde(default = "default_store_url_env")]
    pub url_env: String,

    /// Name of the env var holding the store API key (optional for local).
    #[serde(default = "default_store_api_key_env")]
    pub api_key_env: String,

    /// Records per scroll page.
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url_env: default_store_url_env(),
            api_key_env: default_store_api_key_env(),
            page_size: default_page_size(),
        }
    }
}

fn default_store_url_env() -> String {
    "QDRANT_URL".into()
}
fn default_store_api_key_env() -> String {
    "QDRANT_API_KEY".into()
}
fn default_page_size() -> u32 {
    256
}

/// `[llm]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_llm_api_key_env")]
    pub api_key_env: String,

    /// Default model for the normalize stage.
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Max output tokens per normalization request.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_llm_api_key_env(),
            default_model: default_model(),
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_llm_api_key_env() -> String {
    "ANTHROPIC_API_KEY".into()
}
fn default_model() -> String {
    "claude-sonnet-4-20250514".into()
}
fn default_max_tokens() -> u32 {
    4096
}

/// `[normalize]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizeConfig {
    /// Maximum inventory entries per LLM request chunk.
    #[serde(default = "default_chunk_size")]
    pub max_values_per_chunk: usize,

    /// Attempt budget for remote calls (LLM and store patch).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,

    /// Backoff schedule in seconds; the last entry repeats.
    #[serde(default = "default_backoff_secs")]
    pub backoff_secs: Vec<u64>,
}

impl Default for NormalizeConfig {
    fn default() -> Self {
        Self {
            max_values_per_chunk: default_chunk_size(),
            max_attempts: default_max_attempts(),
            backoff_secs: default_backoff_secs(),
        }
    }
}

fn default_chunk_size() -> usize {
    150
}
fn default_max_attempts() -> usize {
    5
}
fn default_backoff_secs() -> Vec<u64> {
    vec![1, 2, 5, 10, 30]
}

impl AppConfig {
    /// Reject values a run cannot operate with. Called at load so a bad
    /// config file fails before any stage starts.
    pub fn validate(&self) -> Result<()> {
        if self.store.page_size == 0 {
            return Err(TagrailError::config("store.page_size must be at least 1"));
        }
        if self.normalize.max_values_per_chunk == 0 {
            return Err(TagrailError::config(
                "normalize.max_values_per_chunk must be at least 1",
            ));
        }
        if self.normalize.max_attempts == 0 {
            return Err(TagrailError::config(
                "normalize.max_attempts must be at least 1",
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.tagrail/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| TagrailError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.tagrail/tagrail.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| TagrailError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content)
        .map_err(|e| TagrailError::config(format!("failed to parse {}: {e}", path.display())))?;
    config.validate()?;
    Ok(config)
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| TagrailError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| TagrailError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| TagrailError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

// ---------------------------------------------------------------------------
// Credential resolution
// ---------------------------------------------------------------------------

/// Resolved store endpoint, read from the env vars named in config.
#[derive(Debug, Clone)]
pub struct StoreEndpoint {
    pub url: String,
    pub api_key: Option<String>,
}

/// Resolve the store endpoint from the environment. The URL is required;
/// the API key is optional (local instances run without auth).
pub fn resolve_store_endpoint(config: &AppConfig) -> Result<StoreEndpoint> {
    let url_var = &config.store.url_env;
    let url = match std::env::var(url_var) {
        Ok(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => {
            return Err(TagrailError::config(format!(
                "store endpoint not found. Set the {url_var} environment variable."
            )));
        }
    };

    let api_key = std::env::var(&config.store.api_key_env)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());

    Ok(StoreEndpoint { url, api_key })
}

/// Check that the LLM API key env var is set and non-empty.
pub fn resolve_llm_api_key(config: &AppConfig) -> Result<String> {
    let var_name = &config.llm.api_key_env;
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(val),
        _ => Err(TagrailError::config(format!(
            "LLM API key not found. Set the {var_name} environment variable."
        ))),
    }
}
