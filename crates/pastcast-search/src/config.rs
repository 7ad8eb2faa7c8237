//! Harness configuration and search tool factory.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use pastcast_core::{EnvironmentConfig, SearchTool, SourceCatalog};

use crate::mock::MockSearchTool;
use crate::perplexity::PerplexitySearch;
use crate::{MOCK_GOOGLE, MOCK_PERPLEXITY, PERPLEXITY_SEARCH};

/// Settings for the Perplexity search API.
///
/// Note: Custom Debug impl masks the API key to prevent accidental exposure in logs.
#[derive(Clone, Serialize, Deserialize)]
pub struct PerplexityConfig {
    /// Register `perplexity_search` at install time.
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_perplexity_url")]
    pub base_url: String,
    /// Results requested per query.
    #[serde(default = "default_max_results")]
    pub max_results: u32,
    /// HTTP request timeout.
    #[serde(default = "default_request_timeout")]
    pub timeout_secs: u64,
    /// Drop results dated after the testing time even though the API
    /// already filters by date.
    #[serde(default = "default_true")]
    pub post_filter: bool,
}

impl std::fmt::Debug for PerplexityConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PerplexityConfig")
            .field("enabled", &self.enabled)
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("base_url", &self.base_url)
            .field("max_results", &self.max_results)
            .field("timeout_secs", &self.timeout_secs)
            .field("post_filter", &self.post_filter)
            .finish()
    }
}

fn default_true() -> bool {
    true
}
fn default_perplexity_url() -> String {
    "https://api.perplexity.ai".to_string()
}
fn default_max_results() -> u32 {
    10
}
fn default_request_timeout() -> u64 {
    60
}

impl Default for PerplexityConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_key: None,
            base_url: default_perplexity_url(),
            max_results: default_max_results(),
            timeout_secs: default_request_timeout(),
            post_filter: true,
        }
    }
}

/// Which search tools to install and how to reach them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Register `mock_google` and `mock_perplexity`.
    #[serde(default = "default_true")]
    pub mock_tools: bool,
    #[serde(default)]
    pub perplexity: PerplexityConfig,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            mock_tools: true,
            perplexity: PerplexityConfig::default(),
        }
    }
}

/// Top-level pastcast configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PastcastConfig {
    /// Path to the raw problem database (JSON).
    #[serde(default)]
    pub database: Option<PathBuf>,
    /// Recognized data and market sources.
    #[serde(default)]
    pub sources: SourceCatalog,
    /// Session defaults.
    #[serde(default)]
    pub environment: EnvironmentConfig,
    #[serde(default)]
    pub search: SearchConfig,
}

/// Resolve environment variable references like `${VAR_NAME}` in a string.
///
/// Substituted values are not rescanned. Unknown variables become empty.
pub fn resolve_env_vars(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(start) = rest.find("${") {
        let Some(end) = rest[start..].find('}') else {
            break;
        };
        result.push_str(&rest[..start]);
        let var_name = &rest[start + 2..start + end];
        result.push_str(&std::env::var(var_name).unwrap_or_default());
        rest = &rest[start + end + 1..];
    }
    result.push_str(rest);
    result
}

/// Load configuration from well-known paths.
///
/// Search order:
/// 1. `pastcast.toml` in the current directory
/// 2. `~/.config/pastcast/config.toml`
///
/// Environment variable overrides: `PASTCAST_DATABASE`, `PPLX_API_KEY`.
pub fn load_config() -> Result<PastcastConfig> {
    load_config_from(None)
}

/// Load config from an explicit path, or search the default locations.
pub fn load_config_from(path: Option<&Path>) -> Result<PastcastConfig> {
    let config_path = if let Some(p) = path {
        if p.exists() {
            Some(p.to_path_buf())
        } else {
            anyhow::bail!("config file not found: {}", p.display());
        }
    } else {
        let local = PathBuf::from("pastcast.toml");
        if local.exists() {
            Some(local)
        } else {
            dirs_path()
                .map(|home| home.join("config.toml"))
                .filter(|global| global.exists())
        }
    };

    let mut config = match config_path {
        Some(path) => {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read config: {}", path.display()))?;
            tracing::debug!(path = %path.display(), "loaded config");
            toml::from_str::<PastcastConfig>(&content)
                .with_context(|| format!("failed to parse config: {}", path.display()))?
        }
        None => PastcastConfig::default(),
    };

    // Apply env var overrides
    if let Ok(database) = std::env::var("PASTCAST_DATABASE") {
        config.database = Some(PathBuf::from(database));
    }
    if let Ok(key) = std::env::var("PPLX_API_KEY") {
        config.search.perplexity.api_key = Some(key);
    }

    config.database = config
        .database
        .map(|p| PathBuf::from(resolve_env_vars(&p.to_string_lossy())));
    let perplexity = &mut config.search.perplexity;
    perplexity.api_key = perplexity
        .api_key
        .as_deref()
        .map(resolve_env_vars)
        .filter(|k| !k.is_empty());
    perplexity.base_url = resolve_env_vars(&perplexity.base_url);

    Ok(config)
}

fn dirs_path() -> Option<PathBuf> {
    std::env::var("HOME")
        .ok()
        .map(|h| PathBuf::from(h).join(".config").join("pastcast"))
}

/// Create a built-in search tool by name.
pub fn create_tool(name: &str, config: &SearchConfig) -> Result<Arc<dyn SearchTool>> {
    match name {
        MOCK_GOOGLE => Ok(Arc::new(MockSearchTool::google())),
        MOCK_PERPLEXITY => Ok(Arc::new(MockSearchTool::perplexity())),
        PERPLEXITY_SEARCH => Ok(Arc::new(PerplexitySearch::new(&config.perplexity)?)),
        other => anyhow::bail!("unknown search tool: {other}"),
    }
}
