//! Core data model types for pastcast.
//!
//! Problems, their agent-facing projection, horizon groups, the source
//! catalog, and submissions.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{PastcastError, Result};

/// Problems keyed by `problem_id`. Ordered so that iteration and
/// serialization are reproducible.
pub type ProblemSet = BTreeMap<String, Problem>;

/// A single forecasting question as held internally by a session.
///
/// Resolution data is private: `resolved_flag` is derived from
/// `resolution_status` when it is set, so the two can never disagree.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Problem {
    /// Unique identifier.
    pub problem_id: String,
    /// Natural-language question text.
    pub question: String,
    /// When the question opened (ISO-8601).
    pub time_start: Option<String>,
    /// When the question resolves (ISO-8601).
    pub time_end: Option<String>,
    /// Wall-clock instant of the load call.
    pub time_now: String,
    /// Simulated present exposed to the agent.
    pub time_testing: String,
    resolved_flag: bool,
    resolution_status: Option<f64>,
    /// Source-specific descriptive fields.
    pub metadata: ProblemMetadata,
}

impl Problem {
    /// Create an unresolved problem.
    pub fn new(
        problem_id: impl Into<String>,
        question: impl Into<String>,
        time_testing: impl Into<String>,
        time_now: impl Into<String>,
    ) -> Self {
        Self {
            problem_id: problem_id.into(),
            question: question.into(),
            time_start: None,
            time_end: None,
            time_now: time_now.into(),
            time_testing: time_testing.into(),
            resolved_flag: false,
            resolution_status: None,
            metadata: ProblemMetadata::default(),
        }
    }

    /// Set the validity window.
    pub fn with_window(mut self, time_start: Option<String>, time_end: Option<String>) -> Self {
        self.time_start = time_start;
        self.time_end = time_end;
        self
    }

    /// Set the descriptive metadata.
    pub fn with_metadata(mut self, metadata: ProblemMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Attach the ground truth. Only `0.0` and `1.0` are accepted.
    pub fn with_resolution(mut self, status: Option<f64>) -> Result<Self> {
        if let Some(value) = status {
            if value != 0.0 && value != 1.0 {
                return Err(PastcastError::Validation(format!(
                    "resolution status for '{}' must be 0.0 or 1.0, got {value}",
                    self.problem_id
                )));
            }
        }
        self.resolution_status = status;
        self.resolved_flag = status.is_some();
        Ok(self)
    }

    /// Whether a ground truth exists.
    pub fn resolved_flag(&self) -> bool {
        self.resolved_flag
    }

    /// The ground truth, if known.
    pub fn resolution_status(&self) -> Option<f64> {
        self.resolution_status
    }

    /// Source label from metadata.
    pub fn source(&self) -> &str {
        &self.metadata.source
    }

    /// Agent-facing projection without resolution data.
    pub fn view(&self) -> ProblemView {
        ProblemView {
            problem_id: self.problem_id.clone(),
            question: self.question.clone(),
            time_start: self.time_start.clone(),
            time_end: self.time_end.clone(),
            time_now: self.time_now.clone(),
            time_testing: self.time_testing.clone(),
            metadata: self.metadata.clone(),
        }
    }
}

/// What an agent is allowed to see of a problem.
///
/// This type has no resolution fields; it is the only problem shape the
/// environment hands out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProblemView {
    pub problem_id: String,
    pub question: String,
    pub time_start: Option<String>,
    pub time_end: Option<String>,
    pub time_now: String,
    pub time_testing: String,
    pub metadata: ProblemMetadata,
}

/// Descriptive problem metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProblemMetadata {
    /// Source label (e.g. "fred", "metaculus").
    #[serde(default)]
    pub source: String,
    /// Dataset the record came from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataset: Option<String>,
    /// Identifier within the source dataset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_id: Option<String>,
    /// Question set the record was published in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question_set: Option<String>,
    /// Options for multiple-choice questions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub choices: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution_criteria: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Horizon group derived from the validity window.
    #[serde(default)]
    pub horizon: HorizonGroup,
    /// Whole days between `time_start` and `time_end`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub horizon_days: Option<i64>,
    /// Raw fields with no dedicated slot.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

// ---------------------------------------------------------------------------
// Horizon groups
// ---------------------------------------------------------------------------

/// Buckets of the day axis between a question's opening and its resolution.
///
/// The first six variants tile `[0, ∞)` in order; `Unknown` collects
/// problems whose horizon could not be computed.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum HorizonGroup {
    ShortTerm,
    NearTerm,
    MediumTerm,
    LongTerm,
    VeryLongTerm,
    Extended,
    #[default]
    Unknown,
}

impl HorizonGroup {
    /// Groups that partition the non-negative day axis, in order.
    pub const TILED: [HorizonGroup; 6] = [
        HorizonGroup::ShortTerm,
        HorizonGroup::NearTerm,
        HorizonGroup::MediumTerm,
        HorizonGroup::LongTerm,
        HorizonGroup::VeryLongTerm,
        HorizonGroup::Extended,
    ];

    /// `[low, high)` day range; `high == None` means unbounded.
    /// `Unknown` has no range.
    pub fn day_range(self) -> Option<(u32, Option<u32>)> {
        match self {
            HorizonGroup::ShortTerm => Some((0, Some(7))),
            HorizonGroup::NearTerm => Some((7, Some(30))),
            HorizonGroup::MediumTerm => Some((30, Some(90))),
            HorizonGroup::LongTerm => Some((90, Some(180))),
            HorizonGroup::VeryLongTerm => Some((180, Some(365))),
            HorizonGroup::Extended => Some((365, None)),
            HorizonGroup::Unknown => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            HorizonGroup::ShortTerm => "short_term",
            HorizonGroup::NearTerm => "near_term",
            HorizonGroup::MediumTerm => "medium_term",
            HorizonGroup::LongTerm => "long_term",
            HorizonGroup::VeryLongTerm => "very_long_term",
            HorizonGroup::Extended => "extended",
            HorizonGroup::Unknown => "unknown",
        }
    }

    /// Classify a horizon in days. Negative horizons are `Unknown`.
    pub fn from_days(days: i64) -> Self {
        if days < 0 {
            return HorizonGroup::Unknown;
        }
        Self::TILED
            .into_iter()
            .find(|group| match group.day_range() {
                Some((low, high)) => {
                    days >= i64::from(low) && high.map_or(true, |h| days < i64::from(h))
                }
                None => false,
            })
            .unwrap_or(HorizonGroup::Unknown)
    }

    /// Classify an optional horizon; missing horizons are `Unknown`.
    pub fn from_horizon(days: Option<i64>) -> Self {
        days.map_or(HorizonGroup::Unknown, Self::from_days)
    }
}

impl fmt::Display for HorizonGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for HorizonGroup {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "short_term" | "short" => Ok(HorizonGroup::ShortTerm),
            "near_term" | "near" => Ok(HorizonGroup::NearTerm),
            "medium_term" | "medium" => Ok(HorizonGroup::MediumTerm),
            "long_term" | "long" => Ok(HorizonGroup::LongTerm),
            "very_long_term" | "very_long" => Ok(HorizonGroup::VeryLongTerm),
            "extended" => Ok(HorizonGroup::Extended),
            "unknown" => Ok(HorizonGroup::Unknown),
            other => Err(format!("unknown horizon group: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

/// Whether a source resolves on a schedule or on real-world events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Deterministic resolution dates (economic series, wiki edits, ...).
    Data,
    /// Prediction markets; scheduled resolution dates are often missing.
    Market,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Data => write!(f, "data"),
            SourceKind::Market => write!(f, "market"),
        }
    }
}

/// The recognized sources, split into two disjoint sets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "SourceLists", into = "SourceLists")]
pub struct SourceCatalog {
    data: BTreeSet<String>,
    market: BTreeSet<String>,
}

/// Serialized form of a [`SourceCatalog`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceLists {
    #[serde(default)]
    pub data: Vec<String>,
    #[serde(default)]
    pub market: Vec<String>,
}

impl TryFrom<SourceLists> for SourceCatalog {
    type Error = PastcastError;

    fn try_from(lists: SourceLists) -> Result<Self> {
        SourceCatalog::new(lists.data, lists.market)
    }
}

impl From<SourceCatalog> for SourceLists {
    fn from(catalog: SourceCatalog) -> Self {
        SourceLists {
            data: catalog.data.into_iter().collect(),
            market: catalog.market.into_iter().collect(),
        }
    }
}

pub const FORECASTBENCH_DATA_SOURCES: [&str; 5] =
    ["acled", "dbnomics", "fred", "wikipedia", "yfinance"];
pub const FORECASTBENCH_MARKET_SOURCES: [&str; 4] = ["infer", "manifold", "metaculus", "polymarket"];

impl SourceCatalog {
    /// Build a catalog, rejecting empty names and any source listed as both
    /// data and market.
    pub fn new<D, M, S>(data: D, market: M) -> Result<Self>
    where
        D: IntoIterator<Item = S>,
        M: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let data: BTreeSet<String> = data.into_iter().map(Into::into).collect();
        let market: BTreeSet<String> = market.into_iter().map(Into::into).collect();

        if data.iter().chain(market.iter()).any(|s| s.trim().is_empty()) {
            return Err(PastcastError::Configuration(
                "source names must not be empty".into(),
            ));
        }

        let overlap: Vec<&str> = data.intersection(&market).map(String::as_str).collect();
        if !overlap.is_empty() {
            return Err(PastcastError::Configuration(format!(
                "sources listed as both data and market: {}",
                overlap.join(", ")
            )));
        }

        Ok(Self { data, market })
    }

    /// The ForecastBench source split.
    pub fn forecastbench() -> Self {
        Self {
            data: FORECASTBENCH_DATA_SOURCES.iter().map(|s| s.to_string()).collect(),
            market: FORECASTBENCH_MARKET_SOURCES
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }

    pub fn kind(&self, source: &str) -> Option<SourceKind> {
        if self.data.contains(source) {
            Some(SourceKind::Data)
        } else if self.market.contains(source) {
            Some(SourceKind::Market)
        } else {
            None
        }
    }

    pub fn contains(&self, source: &str) -> bool {
        self.kind(source).is_some()
    }

    pub fn data_sources(&self) -> &BTreeSet<String> {
        &self.data
    }

    pub fn market_sources(&self) -> &BTreeSet<String> {
        &self.market
    }

    /// Every recognized source, sorted.
    pub fn all(&self) -> Vec<String> {
        self.data.union(&self.market).cloned().collect()
    }

    /// Fail with a validation error naming the first unrecognized source.
    pub fn validate(&self, sources: &[String]) -> Result<()> {
        match sources.iter().find(|s| !self.contains(s)) {
            Some(unknown) => Err(PastcastError::Validation(format!(
                "unknown source '{unknown}' (recognized: {})",
                self.all().join(", ")
            ))),
            None => Ok(()),
        }
    }
}

impl Default for SourceCatalog {
    fn default() -> Self {
        Self::forecastbench()
    }
}

// ---------------------------------------------------------------------------
// Submissions
// ---------------------------------------------------------------------------

/// One prediction recorded for a problem. Never mutated once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub problem_id: String,
    pub timestamp: DateTime<Utc>,
    /// Probability in `[0.0, 1.0]`.
    pub value: f64,
    /// Session-wide arrival order, used to break timestamp ties.
    pub sequence: u64,
}

/// How the counted prediction is picked among several submissions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvalStrategy {
    /// The latest submission counts.
    #[default]
    Recent,
    /// The submission closest to the outcome counts. Oracle upper bound for
    /// calibration studies; not something a real agent can use.
    Best,
}

impl fmt::Display for EvalStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvalStrategy::Recent => write!(f, "recent"),
            EvalStrategy::Best => write!(f, "best"),
        }
    }
}

impl FromStr for EvalStrategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "recent" | "latest" => Ok(EvalStrategy::Recent),
            "best" => Ok(EvalStrategy::Best),
            other => Err(format!("unknown evaluation strategy: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn horizon_ranges_tile_the_axis() {
        let mut expected_low = 0;
        for (i, group) in HorizonGroup::TILED.iter().enumerate() {
            let (low, high) = group.day_range().unwrap();
            assert_eq!(low, expected_low, "gap or overlap before {group}");
            match high {
                Some(h) => {
                    assert!(h > low);
                    expected_low = h;
                }
                None => assert_eq!(i, HorizonGroup::TILED.len() - 1),
            }
        }
        assert!(HorizonGroup::Unknown.day_range().is_none());
    }

    #[test]
    fn every_day_maps_to_exactly_one_group() {
        for days in 0..2000i64 {
            let matching: Vec<_> = HorizonGroup::TILED
                .iter()
                .filter(|g| {
                    let (low, high) = g.day_range().unwrap();
                    days >= i64::from(low) && high.map_or(true, |h| days < i64::from(h))
                })
                .collect();
            assert_eq!(matching.len(), 1, "day {days}");
            assert_eq!(*matching[0], HorizonGroup::from_days(days));
        }
    }

    #[test]
    fn horizon_from_days_boundaries() {
        let cases = [
            (0, HorizonGroup::ShortTerm),
            (3, HorizonGroup::ShortTerm),
            (7, HorizonGroup::NearTerm),
            (29, HorizonGroup::NearTerm),
            (30, HorizonGroup::MediumTerm),
            (90, HorizonGroup::LongTerm),
            (180, HorizonGroup::VeryLongTerm),
            (364, HorizonGroup::VeryLongTerm),
            (365, HorizonGroup::Extended),
            (10_000, HorizonGroup::Extended),
            (-1, HorizonGroup::Unknown),
        ];
        for (days, expected) in cases {
            assert_eq!(HorizonGroup::from_days(days), expected, "days = {days}");
        }
        assert_eq!(HorizonGroup::from_horizon(None), HorizonGroup::Unknown);
    }

    #[test]
    fn horizon_labels_unique_and_parse_back() {
        let mut all = HorizonGroup::TILED.to_vec();
        all.push(HorizonGroup::Unknown);
        let labels: BTreeSet<_> = all.iter().map(|g| g.label()).collect();
        assert_eq!(labels.len(), all.len());
        for group in all {
            assert_eq!(group.label().parse::<HorizonGroup>().unwrap(), group);
        }
        assert!("fortnight".parse::<HorizonGroup>().is_err());
    }

    #[test]
    fn forecastbench_sources_disjoint_and_complete() {
        let catalog = SourceCatalog::forecastbench();
        assert!(catalog
            .data_sources()
            .is_disjoint(catalog.market_sources()));
        let union: BTreeSet<String> = catalog
            .data_sources()
            .union(catalog.market_sources())
            .cloned()
            .collect();
        assert_eq!(union, catalog.all().into_iter().collect::<BTreeSet<String>>());
        assert_eq!(catalog.all().len(), 9);
        assert_eq!(catalog.kind("fred"), Some(SourceKind::Data));
        assert_eq!(catalog.kind("metaculus"), Some(SourceKind::Market));
        assert_eq!(catalog.kind("twitter"), None);
    }

    #[test]
    fn overlapping_catalog_is_rejected() {
        let err = SourceCatalog::new(["fred", "manifold"], ["manifold"]).unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("manifold"));
    }

    #[test]
    fn catalog_validate_names_unknown_source() {
        let catalog = SourceCatalog::forecastbench();
        assert!(catalog.validate(&["fred".into(), "infer".into()]).is_ok());
        let err = catalog.validate(&["fred".into(), "kalshi".into()]).unwrap_err();
        assert!(err.is_validation());
        assert!(err.to_string().contains("kalshi"));
    }

    #[test]
    fn catalog_deserializes_and_checks_overlap() {
        let ok: SourceCatalog =
            serde_json::from_str(r#"{"data": ["fred"], "market": ["manifold"]}"#).unwrap();
        assert_eq!(ok.all(), vec!["fred", "manifold"]);
        let bad = serde_json::from_str::<SourceCatalog>(r#"{"data": ["x"], "market": ["x"]}"#);
        assert!(bad.is_err());
    }

    #[test]
    fn resolution_invariant_holds() {
        let open = Problem::new("p", "q?", "2024-01-01", "2024-06-01");
        assert!(!open.resolved_flag());
        assert_eq!(open.resolution_status(), None);

        let resolved = open.clone().with_resolution(Some(1.0)).unwrap();
        assert!(resolved.resolved_flag());
        assert_eq!(resolved.resolution_status(), Some(1.0));

        assert!(open.with_resolution(Some(0.4)).unwrap_err().is_validation());
    }

    #[test]
    fn view_has_no_resolution_keys() {
        let problem = Problem::new("p", "q?", "2024-01-01", "2024-06-01")
            .with_resolution(Some(0.0))
            .unwrap();
        let json = serde_json::to_value(problem.view()).unwrap();
        let obj = json.as_object().unwrap();
        assert!(!obj.contains_key("resolved_flag"));
        assert!(!obj.contains_key("resolution_status"));
        let keys: BTreeSet<&str> = obj.keys().map(String::as_str).collect();
        assert_eq!(
            keys,
            BTreeSet::from([
                "problem_id",
                "question",
                "time_start",
                "time_end",
                "time_now",
                "time_testing",
                "metadata"
            ])
        );
    }

    #[test]
    fn eval_strategy_display_and_parse() {
        assert_eq!(EvalStrategy::Recent.to_string(), "recent");
        assert_eq!("best".parse::<EvalStrategy>().unwrap(), EvalStrategy::Best);
        assert_eq!("Latest".parse::<EvalStrategy>().unwrap(), EvalStrategy::Recent);
        assert!("median".parse::<EvalStrategy>().is_err());
    }
}
