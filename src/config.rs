use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::error::{Error, Result};

pub const ENV_CACHE_DIR: &str = "AGENTIC_CACHE_DIR";
pub const ENV_CACHE_SIZE_LIMIT: &str = "AGENTIC_CACHE_SIZE_LIMIT_BYTES";
pub const ENV_CACHE_EXPIRE: &str = "AGENTIC_CACHE_EXPIRE_SECS";
pub const ENV_FETCH_LIMIT: &str = "AGENTIC_TOOL_FETCH_LIMIT";

const DEFAULT_FETCH_LIMIT: usize = 50;

/// Sandbox configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Persistent tool-call cache
    #[serde(default)]
    pub cache: CacheConfig,

    /// Tool behaviour shared by every backend
    #[serde(default)]
    pub tools: ToolsConfig,

    /// Per-service rate limits, keyed by service name (pubchem, chembl, cellosaurus)
    #[serde(default)]
    pub rate_limits: HashMap<String, RateLimitConfig>,

    /// Language model endpoint
    #[serde(default)]
    pub llm: LlmConfig,

    /// Agent loop settings
    #[serde(default)]
    pub agent: AgentConfig,

    /// DepMap PRISM input/output locations (optional)
    #[serde(default)]
    pub data: Option<DataConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub root: Option<PathBuf>,
    pub size_limit_bytes: Option<u64>,
    pub expire_secs: Option<f64>,
    #[serde(default)]
    pub offline_only: bool,
    #[serde(default = "default_cache_version")]
    pub version: String,
    pub tag: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolsConfig {
    pub fetch_limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    #[serde(default = "default_time_window")]
    pub time_window_secs: f64,
    /// Directory holding the shared state file (defaults to the OS temp dir)
    pub state_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub model: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_max_iters")]
    pub max_iters: usize,
    #[serde(default = "default_output_unit")]
    pub output_unit: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    /// Directory containing the PRISM secondary screen release
    pub depmap_prism: Option<PathBuf>,
    /// File name of the cell line metadata inside `depmap_prism`
    pub cell_line_info: Option<String>,
    /// File name of the dose-response parameters inside `depmap_prism`
    pub dose_response: Option<String>,
    /// Where the deduplicated drug/cell/IC50 table is written
    #[serde(default = "default_processed_path")]
    pub processed: PathBuf,
}

fn default_cache_version() -> String {
    "1".to_string()
}

fn default_time_window() -> f64 {
    1.0
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_max_iters() -> usize {
    8
}

fn default_output_unit() -> String {
    "uM".to_string()
}

fn default_processed_path() -> PathBuf {
    PathBuf::from("data/processed/processed_depmap_prism_ic50.csv")
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            root: None,
            size_limit_bytes: None,
            expire_secs: None,
            offline_only: false,
            version: default_cache_version(),
            tag: None,
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: None,
            model: None,
            max_tokens: default_max_tokens(),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iters: default_max_iters(),
            output_unit: default_output_unit(),
        }
    }
}

impl RateLimitConfig {
    pub fn new(max_requests: u32, time_window_secs: f64) -> Self {
        Self {
            max_requests,
            time_window_secs,
            state_dir: None,
        }
    }

    pub fn time_window(&self) -> Result<Duration> {
        Duration::try_from_secs_f64(self.time_window_secs).map_err(|e| {
            Error::Config(format!(
                "rate limit time_window_secs {} is out of range: {}",
                self.time_window_secs, e
            ))
        })
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Config = toml::from_str(&content)?;
        info!(path = %path.as_ref().display(), "configuration loaded");
        Ok(config)
    }

    /// Rate limit for a service; falls back to the polite per-API defaults.
    pub fn rate_limit(&self, service: &str) -> RateLimitConfig {
        if let Some(rl) = self.rate_limits.get(service) {
            return rl.clone();
        }
        match service {
            "pubchem" => RateLimitConfig::new(2, 1.0),
            "chembl" => RateLimitConfig::new(4, 1.0),
            "cellosaurus" => RateLimitConfig::new(5, 1.0),
            _ => RateLimitConfig::new(3, 1.0),
        }
    }

    /// Effective cache root: config, then `AGENTIC_CACHE_DIR`, then `~/.cache/agentic_tools`.
    pub fn cache_root(&self) -> PathBuf {
        resolve_cache_root(self.cache.root.as_deref(), env_var(ENV_CACHE_DIR))
    }

    /// Effective cache size limit in bytes (unlimited when nothing is set).
    pub fn cache_size_limit(&self) -> u64 {
        resolve_size_limit(self.cache.size_limit_bytes, env_var(ENV_CACHE_SIZE_LIMIT))
    }

    /// Effective TTL for new cache entries; `None` means never expire.
    pub fn cache_expire(&self) -> Result<Option<Duration>> {
        resolve_expire(self.cache.expire_secs, env_var(ENV_CACHE_EXPIRE))
    }

    /// Canonical number of records requested from each API.
    pub fn fetch_limit(&self) -> usize {
        resolve_fetch_limit(self.tools.fetch_limit, env_var(ENV_FETCH_LIMIT))
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn resolve_cache_root(configured: Option<&Path>, env: Option<String>) -> PathBuf {
    if let Some(root) = configured {
        return root.to_path_buf();
    }
    if let Some(env) = env {
        return PathBuf::from(env);
    }
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".cache")
        .join("agentic_tools")
}

fn resolve_size_limit(configured: Option<u64>, env: Option<String>) -> u64 {
    configured
        .or_else(|| env.and_then(|v| v.trim().parse::<u64>().ok()))
        .unwrap_or(u64::MAX)
}

fn resolve_expire(configured: Option<f64>, env: Option<String>) -> Result<Option<Duration>> {
    let Some(secs) = configured
        .or_else(|| env.and_then(|v| v.trim().parse::<f64>().ok()))
        .filter(|secs| *secs > 0.0)
    else {
        return Ok(None);
    };
    Duration::try_from_secs_f64(secs)
        .map(Some)
        .map_err(|e| Error::Config(format!("cache expire_secs {} is out of range: {}", secs, e)))
}

fn resolve_fetch_limit(configured: Option<usize>, env: Option<String>) -> usize {
    configured
        .filter(|n| *n > 0)
        .or_else(|| {
            env.and_then(|v| v.trim().parse::<usize>().ok())
                .filter(|n| *n > 0)
        })
        .unwrap_or(DEFAULT_FETCH_LIMIT)
}

impl DataConfig {
    /// Resolve the three PRISM inputs, collecting every problem before failing.
    ///
    /// Returns `(depmap_prism_dir, cell_line_info_file, dose_response_file)`.
    pub fn validate(&self) -> Result<(PathBuf, PathBuf, PathBuf)> {
        let mut errors = Vec::new();

        let root = match &self.depmap_prism {
            Some(dir) => {
                if !dir.exists() {
                    errors.push(format!(
                        "Path for 'depmap_prism' does not exist: {}",
                        dir.display()
                    ));
                }
                Some(dir.clone())
            }
            None => {
                errors.push("Config key 'depmap_prism' is missing".to_string());
                None
            }
        };

        let mut resolve = |key: &str, value: &Option<String>| -> Option<PathBuf> {
            let Some(file) = value else {
                errors.push(format!("Config key '{}' is missing", key));
                return None;
            };
            let path = root.as_deref().unwrap_or(Path::new("")).join(file);
            if !path.exists() {
                errors.push(format!(
                    "Path for '{}' does not exist: {}",
                    key,
                    path.display()
                ));
            }
            Some(path)
        };

        let cell_line_info = resolve("cell_line_info", &self.cell_line_info);
        let dose_response = resolve("dose_response", &self.dose_response);

        match (root, cell_line_info, dose_response) {
            (Some(root), Some(cells), Some(dose)) if errors.is_empty() => Ok((root, cells, dose)),
            _ => Err(Error::Config(format!(
                "Config validation failed:\n{}",
                errors
                    .iter()
                    .map(|e| format!("- {}", e))
                    .collect::<Vec<_>>()
                    .join("\n")
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
            [cache]
            root = "/data/cache"
            size_limit_bytes = 1048576
            expire_secs = 3600.0
            version = "2"

            [tools]
            fetch_limit = 25

            [rate_limits.pubchem]
            max_requests = 1
            time_window_secs = 2.0

            [llm]
            base_url = "https://llm.example.com"
            model = "test-model"

            [agent]
            max_iters = 4

            [data]
            depmap_prism = "/data/prism"
            cell_line_info = "secondary-screen-cell-line-info.csv"
            dose_response = "secondary-screen-dose-response-curve-parameters.csv"
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.cache_root(), PathBuf::from("/data/cache"));
        assert_eq!(config.cache_size_limit(), 1_048_576);
        assert_eq!(config.cache_expire().unwrap(), Some(Duration::from_secs(3600)));
        assert_eq!(config.cache.version, "2");
        assert_eq!(config.fetch_limit(), 25);
        assert_eq!(config.rate_limit("pubchem").max_requests, 1);
        assert_eq!(config.rate_limit("chembl").max_requests, 4);
        assert_eq!(config.agent.max_iters, 4);
        assert_eq!(config.agent.output_unit, "uM");
        assert_eq!(config.llm.max_tokens, 4096);
        assert!(config.data.is_some());
    }

    #[test]
    fn test_empty_config_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.rate_limit("cellosaurus").max_requests, 5);
        assert_eq!(
            config.rate_limit("pubchem").time_window().unwrap(),
            Duration::from_secs(1)
        );
        assert!(!config.cache.offline_only);
        assert!(config.data.is_none());
    }

    #[test]
    fn test_resolve_cache_root_precedence() {
        let configured = PathBuf::from("/explicit");
        assert_eq!(
            resolve_cache_root(Some(&configured), Some("/env".into())),
            configured
        );
        assert_eq!(
            resolve_cache_root(None, Some("/env".into())),
            PathBuf::from("/env")
        );
        assert!(resolve_cache_root(None, None).ends_with(".cache/agentic_tools"));
    }

    #[test]
    fn test_resolve_size_limit_and_expire() {
        assert_eq!(resolve_size_limit(None, None), u64::MAX);
        assert_eq!(resolve_size_limit(None, Some("1000".into())), 1000);
        assert_eq!(resolve_size_limit(None, Some("lots".into())), u64::MAX);
        assert_eq!(resolve_size_limit(Some(5), Some("1000".into())), 5);

        assert_eq!(resolve_expire(None, None).unwrap(), None);
        assert_eq!(
            resolve_expire(None, Some("1.5".into())).unwrap(),
            Some(Duration::from_millis(1500))
        );
        assert_eq!(resolve_expire(None, Some("soon".into())).unwrap(), None);
        assert_eq!(resolve_expire(Some(-5.0), None).unwrap(), None);
    }

    #[test]
    fn test_out_of_range_durations_are_config_errors() {
        assert!(matches!(
            resolve_expire(None, Some("1e30".into())),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            resolve_expire(Some(f64::INFINITY), None),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            RateLimitConfig::new(2, 1e30).time_window(),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_resolve_fetch_limit() {
        assert_eq!(resolve_fetch_limit(None, None), 50);
        assert_eq!(resolve_fetch_limit(None, Some("10".into())), 10);
        assert_eq!(resolve_fetch_limit(None, Some("0".into())), 50);
        assert_eq!(resolve_fetch_limit(None, Some("-3".into())), 50);
        assert_eq!(resolve_fetch_limit(Some(7), Some("10".into())), 7);
    }

    #[test]
    fn test_data_config_validate_ok() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("cells.csv"), "x").unwrap();
        std::fs::write(dir.path().join("dose.csv"), "x").unwrap();
        let data = DataConfig {
            depmap_prism: Some(dir.path().to_path_buf()),
            cell_line_info: Some("cells.csv".into()),
            dose_response: Some("dose.csv".into()),
            processed: default_processed_path(),
        };
        let (root, cells, dose) = data.validate().unwrap();
        assert_eq!(root, dir.path());
        assert!(cells.ends_with("cells.csv"));
        assert!(dose.ends_with("dose.csv"));
    }

    #[test]
    fn test_data_config_validate_collects_errors() {
        let dir = tempdir().unwrap();
        let data = DataConfig {
            depmap_prism: Some(dir.path().to_path_buf()),
            cell_line_info: None,
            dose_response: Some("missing.csv".into()),
            processed: default_processed_path(),
        };
        let err = data.validate().unwrap_err().to_string();
        assert!(err.contains("'cell_line_info' is missing"));
        assert!(err.contains("'dose_response' does not exist"));
    }
}
