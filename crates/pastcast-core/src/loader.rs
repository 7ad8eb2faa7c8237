//! Problem loading.
//!
//! [`ProblemLoader`] looks up a named strategy and runs it over the raw
//! database. Strategies share [`base_process`], which maps a raw record onto
//! the [`Problem`] schema and derives the testing time and horizon.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::instrument;

use crate::database::{value_text, RawDatabase, RawRecord};
use crate::error::{PastcastError, Result};
use crate::model::{HorizonGroup, Problem, ProblemMetadata, ProblemSet, SourceCatalog};
use crate::registry::{self, LoaderRegistry};
use crate::traits::LoadContext;

const START_KEYS: [&str; 5] = [
    "time_start",
    "start_date",
    "forecast_due_date",
    "market_info_open_datetime",
    "publish_date",
];
const END_KEYS: [&str; 5] = [
    "time_end",
    "end_date",
    "resolution_date",
    "market_info_close_datetime",
    "close_date",
];
const METADATA_KEYS: [&str; 8] = [
    "source",
    "dataset",
    "original_id",
    "question_set",
    "choices",
    "background",
    "resolution_criteria",
    "url",
];
/// Top-level fields consumed by normalization and therefore not copied into
/// `metadata.extra`.
const CONSUMED_KEYS: [&str; 14] = [
    "problem_id",
    "id",
    "question",
    "title",
    "metadata",
    "resolved_flag",
    "resolution_status",
    "resolved",
    "resolved_to",
    "freeze_datetime",
    "time_now",
    "time_testing",
    "horizon",
    "horizon_days",
];

fn default_max_quest() -> usize {
    200
}

fn default_seed() -> u64 {
    42
}

/// Parameters of a load call.
///
/// Each strategy reads the subset it needs. `sources` and `horizons` of
/// `None` (or containing `"all"`) select everything.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadParams {
    /// Target sample size for sampling strategies.
    #[serde(default = "default_max_quest")]
    pub max_quest: usize,
    /// Determinism key for sampling strategies.
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default)]
    pub sources: Option<Vec<String>>,
    #[serde(default)]
    pub horizons: Option<Vec<String>>,
    /// Sample size for `load_random`.
    #[serde(default)]
    pub count: Option<usize>,
    /// Source for `load_by_source`.
    #[serde(default)]
    pub source: Option<String>,
    /// Testing time applied to every problem (still clamped to `time_end`).
    #[serde(default)]
    pub time_testing: Option<String>,
    /// Pin the load timestamp; filled with the wall clock when absent.
    #[serde(default)]
    pub time_now: Option<String>,
}

impl Default for LoadParams {
    fn default() -> Self {
        Self {
            max_quest: default_max_quest(),
            seed: default_seed(),
            sources: None,
            horizons: None,
            count: None,
            source: None,
            time_testing: None,
            time_now: None,
        }
    }
}

impl LoadParams {
    pub fn with_max_quest(mut self, max_quest: usize) -> Self {
        self.max_quest = max_quest;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_sources<S: Into<String>>(mut self, sources: impl IntoIterator<Item = S>) -> Self {
        self.sources = Some(sources.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_horizons<S: Into<String>>(mut self, horizons: impl IntoIterator<Item = S>) -> Self {
        self.horizons = Some(horizons.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_time_now(mut self, time_now: impl Into<String>) -> Self {
        self.time_now = Some(time_now.into());
        self
    }

    /// Selected sources, validated against `catalog`, sorted and deduplicated.
    pub fn selected_sources(&self, catalog: &SourceCatalog) -> Result<Vec<String>> {
        match &self.sources {
            Some(list) if !selects_all(list) => {
                catalog.validate(list)?;
                let unique: BTreeSet<String> = list.iter().cloned().collect();
                Ok(unique.into_iter().collect())
            }
            _ => Ok(catalog.all()),
        }
    }

    /// Requested horizon groups, or `None` for all.
    pub fn horizon_filter(&self) -> Result<Option<BTreeSet<HorizonGroup>>> {
        match &self.horizons {
            Some(list) if !selects_all(list) => list
                .iter()
                .map(|label| label.parse::<HorizonGroup>().map_err(PastcastError::Validation))
                .collect::<Result<BTreeSet<_>>>()
                .map(Some),
            _ => Ok(None),
        }
    }

    fn time_now_or_wall_clock(&self) -> String {
        self.time_now
            .clone()
            .unwrap_or_else(|| Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true))
    }
}

fn selects_all(list: &[String]) -> bool {
    list.iter().any(|s| s.eq_ignore_ascii_case("all"))
}

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

/// Runs named loader strategies over a raw database.
#[derive(Debug, Clone)]
pub struct ProblemLoader {
    db: Arc<RawDatabase>,
    catalog: SourceCatalog,
    strategies: Arc<LoaderRegistry>,
}

impl ProblemLoader {
    /// A loader over `db` using the ForecastBench catalog and the
    /// process-wide strategy table.
    pub fn new(db: Arc<RawDatabase>) -> Self {
        Self {
            db,
            catalog: SourceCatalog::default(),
            strategies: registry::loader_strategies(),
        }
    }

    /// Read the database from a JSON file.
    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        Ok(Self::new(Arc::new(RawDatabase::from_path(path)?)))
    }

    pub fn with_catalog(mut self, catalog: SourceCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn with_strategies(mut self, strategies: Arc<LoaderRegistry>) -> Self {
        self.strategies = strategies;
        self
    }

    pub fn catalog(&self) -> &SourceCatalog {
        &self.catalog
    }

    pub fn database(&self) -> &RawDatabase {
        &self.db
    }

    pub fn available_strategies(&self) -> Vec<String> {
        self.strategies.names()
    }

    /// Run `strategy` with `params`. The load timestamp is resolved once so
    /// every problem in the result shares it.
    #[instrument(skip(self, params), fields(max_quest = params.max_quest, seed = params.seed))]
    pub fn load(&self, strategy: &str, params: &LoadParams) -> Result<ProblemSet> {
        let implementation = self.strategies.get(strategy)?;

        let mut params = params.clone();
        params.time_now = Some(params.time_now_or_wall_clock());

        let ctx = LoadContext {
            raw: &self.db,
            catalog: &self.catalog,
        };
        let problems = implementation.load(&ctx, &params)?;
        tracing::info!(strategy, count = problems.len(), "loaded problems");
        Ok(problems)
    }
}

// ---------------------------------------------------------------------------
// Base problem processing
// ---------------------------------------------------------------------------

/// Parse an ISO-8601 timestamp or a `YYYY-MM-DD` date (optionally followed
/// by a time). Returns `None` for anything else.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if s.is_empty() || s.eq_ignore_ascii_case("n/a") {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(naive.and_utc());
        }
    }
    let date_part = s.split(['T', ' ']).next().unwrap_or(s);
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Whole calendar days from `start` to `end`, or `None` when either is
/// missing or unparseable.
pub fn horizon_days(start: Option<&str>, end: Option<&str>) -> Option<i64> {
    let start = parse_timestamp(start?)?;
    let end = parse_timestamp(end?)?;
    Some((end.date_naive() - start.date_naive()).num_days())
}

/// Testing time for a problem: explicit override, then the record's freeze
/// time, then `time_start`, then `time_end`; never later than `time_end`.
///
/// Candidates that do not parse as a timestamp are skipped.
pub fn derive_time_testing(
    override_time: Option<&str>,
    freeze: Option<&str>,
    time_start: Option<&str>,
    time_end: Option<&str>,
) -> Option<String> {
    let (candidate, candidate_dt) = [override_time, freeze, time_start, time_end]
        .into_iter()
        .flatten()
        .find_map(|c| parse_timestamp(c).map(|dt| (c, dt)))?;

    match time_end.and_then(|e| parse_timestamp(e).map(|dt| (e, dt))) {
        Some((end, end_dt)) if candidate_dt > end_dt => Some(end.to_string()),
        _ => Some(candidate.to_string()),
    }
}

/// A field from the top level, falling back to the nested metadata object.
fn lookup(record: &RawRecord, key: &str) -> Option<String> {
    record.text(key).or_else(|| {
        record
            .metadata()
            .and_then(|m| m.get(key))
            .and_then(value_text)
    })
}

fn lookup_value<'a>(record: &'a RawRecord, key: &str) -> Option<&'a Value> {
    record
        .get(key)
        .filter(|v| !v.is_null())
        .or_else(|| record.metadata().and_then(|m| m.get(key)))
        .filter(|v| !v.is_null())
}

fn resolution_of(record: &RawRecord, problem_id: &str) -> Option<f64> {
    let explicitly_open = ["resolved", "resolved_flag"]
        .iter()
        .any(|k| record.get(k).and_then(Value::as_bool) == Some(false));
    if explicitly_open {
        return None;
    }

    let value = ["resolution_status", "resolved_to"]
        .iter()
        .find_map(|k| record.get(k).filter(|v| !v.is_null()))?;
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };

    match number {
        Some(v) if v == 0.0 || v == 1.0 => Some(v),
        other => {
            tracing::warn!(
                problem_id,
                value = ?other,
                "non-binary resolution treated as unresolved"
            );
            None
        }
    }
}

fn choices_of(record: &RawRecord) -> Option<Vec<String>> {
    match lookup_value(record, "choices")? {
        Value::Array(items) => Some(
            items
                .iter()
                .map(|v| value_text(v).unwrap_or_else(|| v.to_string()))
                .collect(),
        ),
        other => value_text(other).map(|s| vec![s]),
    }
}

fn extra_fields(record: &RawRecord) -> BTreeMap<String, Value> {
    let mut extra = BTreeMap::new();
    let skip = |key: &str| {
        CONSUMED_KEYS.contains(&key)
            || METADATA_KEYS.contains(&key)
            || START_KEYS.contains(&key)
            || END_KEYS.contains(&key)
    };
    if let Some(meta) = record.metadata() {
        for (key, value) in meta {
            if !skip(key) && !value.is_null() {
                extra.insert(key.clone(), value.clone());
            }
        }
    }
    for (key, value) in &record.0 {
        if !skip(key) && !value.is_null() {
            extra.entry(key.clone()).or_insert_with(|| value.clone());
        }
    }
    extra
}

/// Normalize one raw record into a [`Problem`].
///
/// Fails with a validation error when the record has no usable id, question,
/// or time from which to derive a testing time.
pub fn base_process(record: &RawRecord, params: &LoadParams) -> Result<Problem> {
    let source = record.source().unwrap_or_else(|| "unknown".into());

    let problem_id = match (record.text("problem_id"), record.text("id")) {
        (Some(pid), _) => pid,
        (None, Some(id)) => format!("{source}_{id}"),
        (None, None) => {
            return Err(PastcastError::Validation(
                "record has no problem_id or id".into(),
            ))
        }
    };

    let question = record
        .first_text(&["question", "title"])
        .ok_or_else(|| PastcastError::Validation(format!("record '{problem_id}' has no question")))?;

    let time_start = START_KEYS.iter().find_map(|k| lookup(record, k));
    let time_end = END_KEYS.iter().find_map(|k| lookup(record, k));
    let freeze = record.text("freeze_datetime");

    let time_testing = derive_time_testing(
        params.time_testing.as_deref(),
        freeze.as_deref(),
        time_start.as_deref(),
        time_end.as_deref(),
    )
    .ok_or_else(|| {
        PastcastError::Validation(format!(
            "record '{problem_id}' has no date to derive a testing time from"
        ))
    })?;

    let days = horizon_days(time_start.as_deref(), time_end.as_deref());
    let metadata = ProblemMetadata {
        source,
        dataset: lookup(record, "dataset"),
        original_id: lookup(record, "original_id").or_else(|| record.text("id")),
        question_set: lookup(record, "question_set"),
        choices: choices_of(record),
        background: lookup(record, "background"),
        resolution_criteria: lookup(record, "resolution_criteria"),
        url: lookup(record, "url"),
        horizon: HorizonGroup::from_horizon(days),
        horizon_days: days,
        extra: extra_fields(record),
    };

    let resolution = resolution_of(record, &problem_id);

    Problem::new(
        problem_id,
        question,
        time_testing,
        params.time_now_or_wall_clock(),
    )
    .with_window(time_start, time_end)
    .with_metadata(metadata)
    .with_resolution(resolution)
}

/// Normalize every record, skipping invalid ones and keeping the first of
/// any duplicated problem id. Database order is preserved.
pub fn normalize_all(raw: &RawDatabase, params: &LoadParams) -> Vec<Problem> {
    let mut seen = HashSet::new();
    let mut problems = Vec::with_capacity(raw.len());
    for record in raw.records() {
        match base_process(record, params) {
            Ok(problem) => {
                if seen.insert(problem.problem_id.clone()) {
                    problems.push(problem);
                } else {
                    tracing::warn!(
                        problem_id = %problem.problem_id,
                        "duplicate problem id, keeping first occurrence"
                    );
                }
            }
            Err(e) => tracing::warn!("skipping raw record: {e}"),
        }
    }
    problems
}

// ---------------------------------------------------------------------------
// Summaries
// ---------------------------------------------------------------------------

/// Problem counts per source and horizon group.
pub fn horizon_summary<'a>(
    problems: impl IntoIterator<Item = &'a Problem>,
) -> BTreeMap<String, BTreeMap<HorizonGroup, usize>> {
    let mut summary: BTreeMap<String, BTreeMap<HorizonGroup, usize>> = BTreeMap::new();
    for problem in problems {
        *summary
            .entry(problem.metadata.source.clone())
            .or_default()
            .entry(problem.metadata.horizon)
            .or_insert(0) += 1;
    }
    summary
}

/// Every recognized source name, sorted.
pub fn sources_list(catalog: &SourceCatalog) -> Vec<String> {
    catalog.all()
}

/// Labels of the tiled horizon groups, in order.
pub fn horizons_list() -> Vec<&'static str> {
    HorizonGroup::TILED.iter().map(|g| g.label()).collect()
}
