//! pastcast-search: time-bounded search tools.
//!
//! Implements the `SearchTool` trait for mock backends and the Perplexity
//! Search API, and installs them into the process-wide search registry.

pub mod config;
pub mod error;
pub mod mock;
pub mod perplexity;

use std::sync::{Arc, OnceLock};

use pastcast_core::registry::{self, SearchRegistry};
use pastcast_core::{PastcastError, SearchTool};

pub use config::{
    create_tool, load_config, load_config_from, PastcastConfig, PerplexityConfig, SearchConfig,
};
pub use error::SearchError;
pub use mock::MockSearchTool;
pub use perplexity::PerplexitySearch;

pub const MOCK_GOOGLE: &str = "mock_google";
pub const MOCK_PERPLEXITY: &str = "mock_perplexity";
pub const PERPLEXITY_SEARCH: &str = "perplexity_search";

/// Register the tools enabled in `config` into `registry`.
///
/// Nothing is registered if any of the names is already taken.
pub fn register_builtin_tools(
    registry: &SearchRegistry,
    config: &SearchConfig,
) -> Result<(), PastcastError> {
    let mut tools: Vec<(&str, Arc<dyn SearchTool>)> = Vec::new();
    if config.mock_tools {
        tools.push((MOCK_GOOGLE, Arc::new(MockSearchTool::google()) as Arc<dyn SearchTool>));
        tools.push((MOCK_PERPLEXITY, Arc::new(MockSearchTool::perplexity()) as Arc<dyn SearchTool>));
    }
    if config.perplexity.enabled {
        if config.perplexity.api_key.is_none() {
            tracing::warn!("perplexity_search registered without an API key; calls will fail");
        }
        let tool = PerplexitySearch::new(&config.perplexity)
            .map_err(|e| PastcastError::Configuration(e.to_string()))?;
        tools.push((PERPLEXITY_SEARCH, Arc::new(tool) as Arc<dyn SearchTool>));
    }

    let taken: Vec<&str> = tools
        .iter()
        .map(|(name, _)| *name)
        .filter(|name| registry.contains(name))
        .collect();
    if !taken.is_empty() {
        return Err(PastcastError::Configuration(format!(
            "search tools already registered: {}",
            taken.join(", ")
        )));
    }

    for (name, tool) in tools {
        registry.register(name, tool)?;
    }
    Ok(())
}

/// Install the built-in tools into the process-wide registry.
///
/// Only the first call registers anything. Every call returns the outcome
/// of that first call; the `config` of later calls is ignored.
pub fn install(config: &SearchConfig) -> Result<(), PastcastError> {
    static INSTALLED: OnceLock<Result<(), String>> = OnceLock::new();
    let mut first = false;
    let outcome = INSTALLED.get_or_init(|| {
        first = true;
        let tools = registry::search_tools();
        let outcome = register_builtin_tools(&tools, config).map_err(|e| e.to_string());
        if outcome.is_ok() {
            tracing::info!(tools = ?tools.names(), "installed search tools");
        }
        outcome
    });
    if !first {
        tracing::debug!("search tools already installed; ignoring config");
    }
    outcome
        .clone()
        .map_err(|msg| PastcastError::Configuration(format!("search tool install failed: {msg}")))
}
