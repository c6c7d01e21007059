/// `load_config` module: Loads a static YAML config and injects secrets from the environment.
///
/// This module is the only place where untrusted YAML is parsed and mapped to typed structs.
///
/// # Responsibilities
/// - Parse the YAML file into [`CliConfig`], filling defaults for omitted sections
/// - Resolve relative `cache_dir` and `source_dir` paths against the config file's directory
/// - Read the API token and root page id from the environment (`NOTION_API_KEY`,
///   `NOTION_ROOT_PAGE_ID`); these never live in the YAML file
/// - Turn the `retry` section into the engine's [`RetryPolicy`]
///
/// # Errors
/// All errors use `anyhow::Error` and are surfaced at the CLI boundary.
///
/// Accepted YAML:
/// ```yaml
/// cache_dir: .cache
/// concurrency: 4
/// remote:
///   api_base_url: https://api.notion.com/v1
///   api_version: "2025-09-03"
///   requests_per_second: 3
/// retry:
///   max_attempts: 5
///   base_delay_ms: 500
/// collections:
///   - name: Story
///     source_dir: content/story
/// ```
use anyhow::Result;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info};
use tree_sync_core::retry::RetryPolicy;

pub const API_KEY_ENV: &str = "NOTION_API_KEY";
pub const ROOT_PAGE_ENV: &str = "NOTION_ROOT_PAGE_ID";

#[derive(Debug, Deserialize)]
pub struct CliConfig {
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default)]
    pub remote: RemoteSection,
    #[serde(default)]
    pub retry: RetrySection,
    #[serde(default)]
    pub collections: Vec<CollectionSection>,
    #[serde(skip)]
    pub secrets: Secrets,
}

#[derive(Debug, Deserialize)]
pub struct RemoteSection {
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    /// Zero disables throttling.
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: f64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for RemoteSection {
    fn default() -> Self {
        RemoteSection {
            api_base_url: default_api_base_url(),
            api_version: default_api_version(),
            requests_per_second: default_requests_per_second(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_total_wait_ms: u64,
    pub jitter: bool,
}

impl Default for RetrySection {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        RetrySection {
            max_attempts: policy.max_attempts,
            base_delay_ms: policy.base_delay.as_millis() as u64,
            max_delay_ms: policy.max_delay.as_millis() as u64,
            max_total_wait_ms: policy.max_total_wait.as_millis() as u64,
            jitter: policy.jitter,
        }
    }
}

impl RetrySection {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            max_total_wait: Duration::from_millis(self.max_total_wait_ms),
            jitter: self.jitter,
            ..RetryPolicy::default()
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CollectionSection {
    pub name: String,
    pub source_dir: PathBuf,
}

#[derive(Debug, Default)]
pub struct Secrets {
    pub api_key: String,
    pub root_page_id: String,
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from(".cache")
}

fn default_concurrency() -> usize {
    4
}

fn default_api_base_url() -> String {
    "https://api.notion.com/v1".to_string()
}

fn default_api_version() -> String {
    "2025-09-03".to_string()
}

fn default_requests_per_second() -> f64 {
    3.0
}

fn default_timeout_secs() -> u64 {
    60
}

fn required_env(name: &str) -> Result<String> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value.trim().to_string()),
        Ok(_) | Err(_) => {
            error!(env = name, "Required environment variable missing");
            Err(anyhow::anyhow!(
                "Missing required environment variable {name}"
            ))
        }
    }
}

/// Loads a static YAML config file (no secrets) and injects required env vars for secrets.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<CliConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let config_content = match fs::read_to_string(path_ref) {
        Ok(content) => content,
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
            return Err(anyhow::anyhow!(
                "Failed to read config file {:?}: {}",
                path_ref,
                e
            ));
        }
    };

    let mut config: CliConfig = match serde_yaml::from_str(&config_content) {
        Ok(conf) => {
            info!(config_path = ?path_ref, "Parsed config YAML successfully");
            conf
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
            return Err(anyhow::anyhow!("Failed to parse config YAML: {e}"));
        }
    };

    let mut names = std::collections::HashSet::new();
    for collection in &config.collections {
        if !names.insert(collection.name.as_str()) {
            return Err(anyhow::anyhow!(
                "Collection '{}' is configured twice",
                collection.name
            ));
        }
    }
    if config.concurrency == 0 {
        return Err(anyhow::anyhow!("concurrency must be at least 1"));
    }

    let base = path_ref.parent().unwrap_or_else(|| Path::new(""));
    config.cache_dir = base.join(&config.cache_dir);
    for collection in &mut config.collections {
        collection.source_dir = base.join(&collection.source_dir);
    }

    config.secrets = Secrets {
        api_key: required_env(API_KEY_ENV)?,
        root_page_id: required_env(ROOT_PAGE_ENV)?,
    };
    info!(
        collections = config.collections.len(),
        cache_dir = %config.cache_dir.display(),
        "Configuration loaded"
    );
    Ok(config)
}
