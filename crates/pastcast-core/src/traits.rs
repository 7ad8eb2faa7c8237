//! Core trait definitions for loader strategies, search tools, and metrics.
//!
//! Implementations are bound to names in a [`Registry`](crate::registry::Registry)
//! during startup and looked up by name afterwards.

use async_trait::async_trait;

use crate::database::RawDatabase;
use crate::error::Result;
use crate::loader::LoadParams;
use crate::model::{ProblemSet, SourceCatalog};

// ---------------------------------------------------------------------------
// Loader strategy
// ---------------------------------------------------------------------------

/// Everything a loader strategy reads besides its parameters.
#[derive(Debug, Clone, Copy)]
pub struct LoadContext<'a> {
    /// The raw problem database.
    pub raw: &'a RawDatabase,
    /// Recognized sources and their kinds.
    pub catalog: &'a SourceCatalog,
}

/// Turns the raw database into a standardized problem set.
pub trait LoaderStrategy: Send + Sync {
    fn load(&self, ctx: &LoadContext<'_>, params: &LoadParams) -> Result<ProblemSet>;
}

impl<F> LoaderStrategy for F
where
    F: Fn(&LoadContext<'_>, &LoadParams) -> Result<ProblemSet> + Send + Sync,
{
    fn load(&self, ctx: &LoadContext<'_>, params: &LoadParams) -> Result<ProblemSet> {
        self(ctx, params)
    }
}

// ---------------------------------------------------------------------------
// Search tool
// ---------------------------------------------------------------------------

/// An information source an agent can query during a session.
///
/// Implementations must only return information that existed before
/// `testing_time`. The environment passes the cutoff but does not inspect
/// the result.
#[async_trait]
pub trait SearchTool: Send + Sync {
    /// Run `query` as of `testing_time` (ISO-8601).
    async fn search(&self, query: &str, testing_time: &str) -> anyhow::Result<serde_json::Value>;
}

// ---------------------------------------------------------------------------
// Metric
// ---------------------------------------------------------------------------

/// Scores parallel sequences of predictions and binary outcomes.
pub trait Metric: Send + Sync {
    fn score(&self, predictions: &[f64], outcomes: &[f64]) -> Result<f64>;
}

impl<F> Metric for F
where
    F: Fn(&[f64], &[f64]) -> Result<f64> + Send + Sync,
{
    fn score(&self, predictions: &[f64], outcomes: &[f64]) -> Result<f64> {
        self(predictions, outcomes)
    }
}
