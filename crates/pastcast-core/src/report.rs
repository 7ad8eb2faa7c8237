//! Benchmark report types with JSON persistence and baseline comparison.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::EvalStrategy;

/// Scores for one evaluation session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkReport {
    /// Unique report identifier.
    pub id: Uuid,
    /// When the report was created.
    pub created_at: DateTime<Utc>,
    /// Strategy the session's problems were loaded with.
    pub loader_strategy: String,
    /// How the counted submission was picked per problem.
    pub eval_strategy: EvalStrategy,
    /// Problems that contributed to the scores.
    pub count: usize,
    /// Metric name to score over all counted problems.
    pub metrics: BTreeMap<String, f64>,
    /// The same scores broken down by source.
    pub per_source: BTreeMap<String, SourceBreakdown>,
    /// Problems in the session.
    pub problems_loaded: usize,
    /// Resolved problems in the session.
    pub problems_resolved: usize,
    /// Total predictions submitted, including superseded ones.
    pub submissions_received: usize,
}

/// Scores restricted to one source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceBreakdown {
    pub count: usize,
    pub metrics: BTreeMap<String, f64>,
}

impl BenchmarkReport {
    /// Score for `metric`, if it was computed.
    pub fn metric(&self, metric: &str) -> Option<f64> {
        self.metrics.get(metric).copied()
    }

    /// Save the report as JSON to a file.
    pub fn save_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("failed to serialize report")?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, json)
            .with_context(|| format!("failed to write report to {}", path.display()))?;
        Ok(())
    }

    /// Load a report from a JSON file.
    pub fn load_json(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read report from {}", path.display()))?;
        let report: BenchmarkReport =
            serde_json::from_str(&content).context("failed to parse report JSON")?;
        Ok(report)
    }

    /// Metric deltas against a baseline report (`self - baseline`).
    ///
    /// Only metrics present in both reports are compared.
    pub fn compare(&self, baseline: &BenchmarkReport) -> BTreeMap<String, MetricDelta> {
        self.metrics
            .iter()
            .filter_map(|(name, &current)| {
                baseline.metrics.get(name).map(|&base| {
                    (
                        name.clone(),
                        MetricDelta {
                            baseline: base,
                            current,
                            delta: current - base,
                        },
                    )
                })
            })
            .collect()
    }
}

/// Change in one metric between two reports.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricDelta {
    pub baseline: f64,
    pub current: f64,
    pub delta: f64,
}
