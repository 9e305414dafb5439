//! Application configuration for Prospector.
//!
//! User config lives at `~/.prospector/prospector.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ProspectorError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "prospector.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".prospector";

/// Smallest and largest batch sizes the orchestrator accepts.
pub const MIN_BATCH_SIZE: usize = 5;
pub const MAX_BATCH_SIZE: usize = 15;

// ---------------------------------------------------------------------------
// Config structs (matching prospector.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Registry provider endpoints.
    #[serde(default)]
    pub providers: ProvidersConfig,

    /// Web search provider settings.
    #[serde(default)]
    pub search: SearchConfig,

    /// Resolution cache settings.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Batch orchestrator settings.
    #[serde(default)]
    pub pipeline: PipelineSection,

    /// Client-side controller and import settings.
    #[serde(default)]
    pub client: ClientConfig,
}

/// `[server]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Socket address the HTTP server binds to.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

fn default_listen_addr() -> String {
    "127.0.0.1:8787".into()
}

/// `[providers]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvidersConfig {
    /// Base URL of the primary registry provider (BrasilAPI-compatible).
    #[serde(default = "default_primary_base_url")]
    pub primary_base_url: String,

    /// Base URL of the fallback registry provider (ReceitaWS-compatible).
    #[serde(default = "default_secondary_base_url")]
    pub secondary_base_url: String,

    /// Per-provider request timeout, in seconds.
    #[serde(default = "default_provider_timeout")]
    pub timeout_secs: u64,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            primary_base_url: default_primary_base_url(),
            secondary_base_url: default_secondary_base_url(),
            timeout_secs: default_provider_timeout(),
        }
    }
}

fn default_primary_base_url() -> String {
    "https://brasilapi.com.br".into()
}
fn default_secondary_base_url() -> String {
    "https://receitaws.com.br".into()
}
fn default_provider_timeout() -> u64 {
    5
}

/// `[search]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Backend: "serper" (JSON API, needs a key) or "html" (scrapes an HTML results page).
    #[serde(default = "default_search_provider")]
    pub provider: String,

    /// Search API endpoint (Serper-compatible JSON POST).
    #[serde(default = "default_search_endpoint")]
    pub endpoint: String,

    /// HTML results endpoint used by the "html" backend (DuckDuckGo-compatible).
    #[serde(default = "default_html_endpoint")]
    pub html_endpoint: String,

    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_search_key_env")]
    pub api_key_env: String,

    /// Results requested per query.
    #[serde(default = "default_results_per_query")]
    pub results_per_query: u32,

    /// Country code passed to the search API.
    #[serde(default = "default_country")]
    pub country: String,

    /// Language passed to the search API.
    #[serde(default = "default_language")]
    pub language: String,

    /// Request timeout in seconds.
    #[serde(default = "default_search_timeout")]
    pub timeout_secs: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            provider: default_search_provider(),
            endpoint: default_search_endpoint(),
            html_endpoint: default_html_endpoint(),
            api_key_env: default_search_key_env(),
            results_per_query: default_results_per_query(),
            country: default_country(),
            language: default_language(),
            timeout_secs: default_search_timeout(),
        }
    }
}

fn default_search_provider() -> String {
    "serper".into()
}
fn default_html_endpoint() -> String {
    "https://html.duckduckgo.com/html/".into()
}
fn default_search_endpoint() -> String {
    "https://google.serper.dev/search".into()
}
fn default_search_key_env() -> String {
    "SERPER_API_KEY".into()
}
fn default_results_per_query() -> u32 {
    20
}
fn default_country() -> String {
    "br".into()
}
fn default_language() -> String {
    "pt-br".into()
}
fn default_search_timeout() -> u64 {
    15
}

/// `[cache]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Path to the libSQL cache database. `~` expands to the home directory.
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Lifetime of an entry whose entity is active.
    #[serde(default = "default_active_ttl")]
    pub active_ttl_hours: u64,

    /// Lifetime of an entry whose entity is inactive. Must exceed the active TTL.
    #[serde(default = "default_inactive_ttl")]
    pub inactive_ttl_hours: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            active_ttl_hours: default_active_ttl(),
            inactive_ttl_hours: default_inactive_ttl(),
        }
    }
}

fn default_db_path() -> String {
    "~/.prospector/cache.db".into()
}
fn default_active_ttl() -> u64 {
    7 * 24
}
fn default_inactive_ttl() -> u64 {
    30 * 24
}

/// `[pipeline]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSection {
    /// Candidates resolved concurrently per batch (clamped to 5..=15).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Result limit applied when a request does not carry one.
    #[serde(default = "default_limit")]
    pub default_limit: usize,

    /// Upper bound on any requested result limit.
    #[serde(default = "default_max_limit")]
    pub max_limit: usize,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            default_limit: default_limit(),
            max_limit: default_max_limit(),
        }
    }
}

fn default_batch_size() -> usize {
    10
}
fn default_limit() -> usize {
    20
}
fn default_max_limit() -> usize {
    200
}

/// `[client]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the Prospector server.
    #[serde(default = "default_server_url")]
    pub server_url: String,

    /// How long a finished run's matches stay reusable on the client.
    #[serde(default = "default_result_cache_ttl")]
    pub result_cache_ttl_secs: u64,

    /// Maximum number of filter sets kept in the client result cache.
    #[serde(default = "default_result_cache_capacity")]
    pub result_cache_capacity: usize,

    /// Delay between sequential lookups during a file import.
    #[serde(default = "default_import_delay")]
    pub import_delay_ms: u64,

    /// Maximum identifiers taken from one imported file.
    #[serde(default = "default_import_max")]
    pub import_max_candidates: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            result_cache_ttl_secs: default_result_cache_ttl(),
            result_cache_capacity: default_result_cache_capacity(),
            import_delay_ms: default_import_delay(),
            import_max_candidates: default_import_max(),
        }
    }
}

fn default_server_url() -> String {
    "http://127.0.0.1:8787".into()
}
fn default_result_cache_ttl() -> u64 {
    5 * 60
}
fn default_result_cache_capacity() -> usize {
    10
}
fn default_import_delay() -> u64 {
    500
}
fn default_import_max() -> usize {
    100
}

// ---------------------------------------------------------------------------
// Runtime configs (merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime resolver configuration.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Timeout budget for each provider call.
    pub provider_timeout: Duration,
    /// Cache lifetime for active entities.
    pub active_ttl: Duration,
    /// Cache lifetime for inactive entities.
    pub inactive_ttl: Duration,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for ResolverConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            provider_timeout: Duration::from_secs(config.providers.timeout_secs),
            active_ttl: Duration::from_secs(config.cache.active_ttl_hours.saturating_mul(3600)),
            inactive_ttl: Duration::from_secs(config.cache.inactive_ttl_hours.saturating_mul(3600)),
        }
    }
}

/// Runtime orchestrator configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Batch size, already clamped to the accepted range.
    pub batch_size: usize,
    pub default_limit: usize,
    pub max_limit: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for PipelineConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            batch_size: config
                .pipeline
                .batch_size
                .clamp(MIN_BATCH_SIZE, MAX_BATCH_SIZE),
            default_limit: config.pipeline.default_limit,
            max_limit: config.pipeline.max_limit,
        }
    }
}

/// Runtime configuration for the client-side background task controller.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub server_url: String,
    pub result_cache_ttl: Duration,
    pub result_cache_capacity: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for ControllerConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            server_url: config.client.server_url.clone(),
            result_cache_ttl: Duration::from_secs(config.client.result_cache_ttl_secs),
            result_cache_capacity: config.client.result_cache_capacity,
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.prospector/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| ProspectorError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.prospector/prospector.toml`).
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
    let content = std::fs::read_to_string(path).map_err(|e| ProspectorError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content).map_err(|e| {
        ProspectorError::config(format!("failed to parse {}: {e}", path.display()))
    })?;
    validate_config(&config)?;
    Ok(config)
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| ProspectorError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| ProspectorError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| ProspectorError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Reject configs whose values break pipeline invariants.
pub fn validate_config(config: &AppConfig) -> Result<()> {
    if config.cache.inactive_ttl_hours <= config.cache.active_ttl_hours {
        return Err(ProspectorError::config(
            "cache.inactive_ttl_hours must be greater than cache.active_ttl_hours",
        ));
    }
    if config.providers.timeout_secs == 0 {
        return Err(ProspectorError::config(
            "providers.timeout_secs must be at least 1",
        ));
    }
    Ok(())
}

/// Read the search API key from the env var named in the config.
pub fn search_api_key(config: &AppConfig) -> Result<String> {
    let var_name = &config.search.api_key_env;
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(val),
        _ => Err(ProspectorError::SearchUnavailable(format!(
            "search API key not found. Set the {var_name} environment variable."
        ))),
    }
}

/// Resolve the configured cache database path, expanding a leading `~`.
pub fn cache_db_path(config: &AppConfig) -> Result<PathBuf> {
    let raw = &config.cache.db_path;
    match raw.strip_prefix("~/") {
        Some(rest) => {
            let home = dirs::home_dir()
                .ok_or_else(|| ProspectorError::config("could not determine home directory"))?;
            Ok(home.join(rest))
        }
        None => Ok(PathBuf::from(raw)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("primary_base_url"));
        assert!(toml_str.contains("SERPER_API_KEY"));
    }

    #[test]
    fn partial_config_fills_defaults() {
        let toml_str = r#"
[pipeline]
batch_size = 40

[cache]
db_path = "/tmp/prospector-cache.db"
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.cache.db_path, "/tmp/prospector-cache.db");
        assert_eq!(config.cache.active_ttl_hours, 168);
        assert_eq!(config.providers.timeout_secs, 5);

        // Out-of-range batch sizes are clamped at runtime.
        let pipeline = PipelineConfig::from(&config);
        assert_eq!(pipeline.batch_size, MAX_BATCH_SIZE);
    }

    #[test]
    fn resolver_config_from_app_config() {
        let resolver = ResolverConfig::from(&AppConfig::default());
        assert_eq!(resolver.provider_timeout, Duration::from_secs(5));
        assert!(resolver.inactive_ttl > resolver.active_ttl);
    }

    #[test]
    fn huge_ttl_hours_saturate() {
        let mut config = AppConfig::default();
        config.cache.active_ttl_hours = u64::MAX / 2;
        config.cache.inactive_ttl_hours = u64::MAX;
        let resolver = ResolverConfig::from(&config);
        assert_eq!(resolver.active_ttl, Duration::from_secs(u64::MAX));
        assert_eq!(resolver.inactive_ttl, Duration::from_secs(u64::MAX));
    }

    #[test]
    fn rejects_inverted_ttls() {
        let mut config = AppConfig::default();
        config.cache.inactive_ttl_hours = 1;
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("inactive_ttl_hours"));
    }

    #[test]
    fn tilde_expands_in_db_path() {
        let config = AppConfig::default();
        let path = cache_db_path(&config).expect("path");
        assert!(path.ends_with(".prospector/cache.db"));
        assert!(!path.to_string_lossy().starts_with('~'));
    }

    #[test]
    fn search_key_validation() {
        let mut config = AppConfig::default();
        config.search.api_key_env = "PROSPECTOR_TEST_NONEXISTENT_KEY_12345".into();
        let result = search_api_key(&config);
        assert!(matches!(result, Err(ProspectorError::SearchUnavailable(_))));
    }
}
