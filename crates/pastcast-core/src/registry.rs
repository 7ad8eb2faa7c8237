//! Name-keyed registries for loader strategies, search tools, and metrics.
//!
//! Each kind has its own process-wide table, built on first access with the
//! built-in implementations already registered. Tables are written during
//! startup and read concurrently afterwards.

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use crate::error::{PastcastError, Result};
use crate::traits::{LoaderStrategy, Metric, SearchTool};

/// A write-once-per-name table of implementations.
pub struct Registry<T: ?Sized> {
    kind: &'static str,
    entries: RwLock<BTreeMap<String, Arc<T>>>,
}

impl<T: ?Sized> Registry<T> {
    /// Create an empty registry. `kind` names the entries in error messages.
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    /// Bind `name` to `implementation`. Rebinding an existing name fails.
    pub fn register(&self, name: impl Into<String>, implementation: Arc<T>) -> Result<()> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(PastcastError::Configuration(format!(
                "{} name must not be empty",
                self.kind
            )));
        }

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if entries.contains_key(&name) {
            return Err(PastcastError::Configuration(format!(
                "{} '{name}' is already registered",
                self.kind
            )));
        }
        tracing::debug!(kind = self.kind, %name, "registered");
        entries.insert(name, implementation);
        Ok(())
    }

    /// Look up the implementation bound to `name`.
    pub fn get(&self, name: &str) -> Result<Arc<T>> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        match entries.get(name) {
            Some(implementation) => Ok(Arc::clone(implementation)),
            None => Err(PastcastError::not_found(
                self.kind,
                name,
                entries.keys().cloned().collect(),
            )),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: ?Sized> std::fmt::Debug for Registry<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("kind", &self.kind)
            .field("names", &self.names())
            .finish()
    }
}

pub type LoaderRegistry = Registry<dyn LoaderStrategy>;
pub type SearchRegistry = Registry<dyn SearchTool>;
pub type MetricRegistry = Registry<dyn Metric>;

// ---------------------------------------------------------------------------
// Process-wide tables
// ---------------------------------------------------------------------------

static LOADERS: OnceLock<Arc<LoaderRegistry>> = OnceLock::new();
static SEARCH_TOOLS: OnceLock<Arc<SearchRegistry>> = OnceLock::new();
static METRICS: OnceLock<Arc<MetricRegistry>> = OnceLock::new();

fn builtin_loaders() -> LoaderRegistry {
    let registry = Registry::new("loader strategy");
    if let Err(e) = crate::strategies::register_builtin(&registry) {
        tracing::error!("failed to register built-in loader strategies: {e}");
    }
    registry
}

fn builtin_metrics() -> MetricRegistry {
    let registry = Registry::new("metric");
    if let Err(e) = crate::metrics::register_builtin(&registry) {
        tracing::error!("failed to register built-in metrics: {e}");
    }
    registry
}

/// The process-wide loader strategy table.
pub fn loader_strategies() -> Arc<LoaderRegistry> {
    Arc::clone(LOADERS.get_or_init(|| Arc::new(builtin_loaders())))
}

/// The process-wide search tool table. Empty until tools are installed.
pub fn search_tools() -> Arc<SearchRegistry> {
    Arc::clone(SEARCH_TOOLS.get_or_init(|| Arc::new(Registry::new("search tool"))))
}

/// The process-wide metric table.
pub fn metrics() -> Arc<MetricRegistry> {
    Arc::clone(METRICS.get_or_init(|| Arc::new(builtin_metrics())))
}

/// The three tables an environment reads from.
#[derive(Debug, Clone)]
pub struct Registries {
    pub loaders: Arc<LoaderRegistry>,
    pub search_tools: Arc<SearchRegistry>,
    pub metrics: Arc<MetricRegistry>,
}

impl Registries {
    /// The process-wide tables.
    pub fn global() -> Self {
        Self {
            loaders: loader_strategies(),
            search_tools: search_tools(),
            metrics: metrics(),
        }
    }

    /// Fresh tables holding only the built-in loaders and metrics. Useful
    /// when a caller needs its own search tools without touching global
    /// state.
    pub fn isolated() -> Self {
        Self {
            loaders: Arc::new(builtin_loaders()),
            search_tools: Arc::new(Registry::new("search tool")),
            metrics: Arc::new(builtin_metrics()),
        }
    }
}

impl Default for Registries {
    fn default() -> Self {
        Self::global()
    }
}
