//! Evaluation session orchestration.
//!
//! An [`EnvironmentManager`] owns one loaded problem set for the lifetime of
//! a session. Agents only ever see [`ProblemView`]s; searches are pinned to
//! the problem's testing time; predictions are recorded and scored against
//! the hidden ground truth when the report is requested.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::instrument;
use uuid::Uuid;

use crate::database::RawDatabase;
use crate::error::{PastcastError, Result};
use crate::loader::{LoadParams, ProblemLoader};
use crate::model::{EvalStrategy, Problem, ProblemSet, ProblemView, Submission};
use crate::registry::Registries;
use crate::report::{BenchmarkReport, SourceBreakdown};
use crate::strategies::EXTENSIVE;
use crate::traits::Metric;

pub const DEFAULT_SEARCH_TIMEOUT_SECS: u64 = 60;

fn default_loader_strategy() -> String {
    EXTENSIVE.to_string()
}

fn default_search_timeout_secs() -> u64 {
    DEFAULT_SEARCH_TIMEOUT_SECS
}

/// Settings for one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    /// Name of the loader strategy to run at construction.
    #[serde(default = "default_loader_strategy")]
    pub loader_strategy: String,
    /// Which submission counts when a problem has several.
    #[serde(default)]
    pub eval_strategy: EvalStrategy,
    /// Parameters passed to the loader strategy.
    #[serde(default)]
    pub params: LoadParams,
    /// Upper bound on a single search call.
    #[serde(default = "default_search_timeout_secs")]
    pub search_timeout_secs: u64,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            loader_strategy: default_loader_strategy(),
            eval_strategy: EvalStrategy::default(),
            params: LoadParams::default(),
            search_timeout_secs: DEFAULT_SEARCH_TIMEOUT_SECS,
        }
    }
}

/// A timestamped entry in the session log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEvent {
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

/// One evaluation session: problems, search dispatch, submissions, scoring.
pub struct EnvironmentManager {
    config: EnvironmentConfig,
    loader: ProblemLoader,
    registries: Registries,
    problems: ProblemSet,
    submissions: BTreeMap<String, Vec<Submission>>,
    next_sequence: u64,
    events: Mutex<Vec<SessionEvent>>,
}

impl std::fmt::Debug for EnvironmentManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvironmentManager")
            .field("config", &self.config)
            .field("problems", &self.problems.len())
            .field("submissions", &self.submission_count())
            .finish()
    }
}

impl EnvironmentManager {
    /// Load problems with `config.loader_strategy` and open a session.
    ///
    /// The loader resolves strategy names through `registries.loaders`.
    pub fn new(
        loader: ProblemLoader,
        registries: Registries,
        config: EnvironmentConfig,
    ) -> Result<Self> {
        let loader = loader.with_strategies(Arc::clone(&registries.loaders));
        let problems = loader.load(&config.loader_strategy, &config.params)?;
        let submissions = problems.keys().map(|id| (id.clone(), Vec::new())).collect();

        let manager = Self {
            config,
            loader,
            registries,
            problems,
            submissions,
            next_sequence: 0,
            events: Mutex::new(Vec::new()),
        };
        manager.log_event(format!(
            "loaded {} problems with strategy '{}' (eval strategy: {})",
            manager.problems.len(),
            manager.config.loader_strategy,
            manager.config.eval_strategy
        ));
        Ok(manager)
    }

    /// Open a session over `db` with the process-wide registries.
    pub fn from_database(db: Arc<RawDatabase>, config: EnvironmentConfig) -> Result<Self> {
        Self::new(ProblemLoader::new(db), Registries::global(), config)
    }

    pub fn config(&self) -> &EnvironmentConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.problems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.problems.is_empty()
    }

    /// Agent-facing views of every loaded problem. Resolution data is never
    /// included.
    pub fn get_problems(&self) -> BTreeMap<String, ProblemView> {
        self.problems
            .iter()
            .map(|(id, problem)| (id.clone(), problem.view()))
            .collect()
    }

    pub fn get_problem(&self, problem_id: &str) -> Result<ProblemView> {
        self.problem(problem_id).map(Problem::view)
    }

    /// Sorted problem ids.
    pub fn problem_ids(&self) -> Vec<String> {
        self.problems.keys().cloned().collect()
    }

    fn problem(&self, problem_id: &str) -> Result<&Problem> {
        self.problems.get(problem_id).ok_or_else(|| {
            PastcastError::not_found(
                "problem",
                problem_id,
                self.problems.keys().take(10).cloned().collect(),
            )
        })
    }

    /// Run `query` through search tool `tool` as of the problem's testing
    /// time. The tool's output is returned unchanged.
    #[instrument(skip(self, query), fields(timeout_secs = self.config.search_timeout_secs))]
    pub async fn search(
        &self,
        tool: &str,
        problem_id: &str,
        query: &str,
    ) -> Result<serde_json::Value> {
        let problem = self.problem(problem_id)?;
        let search_tool = self.registries.search_tools.get(tool)?;
        let testing_time = problem.time_testing.as_str();

        self.log_event(format!(
            "search '{tool}' for {problem_id} as of {testing_time}: {query}"
        ));

        let secs = self.config.search_timeout_secs;
        match tokio::time::timeout(
            Duration::from_secs(secs),
            search_tool.search(query, testing_time),
        )
        .await
        {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(source)) => {
                tracing::warn!(tool, problem_id, "search failed: {source:#}");
                Err(PastcastError::SearchFailed {
                    tool: tool.to_string(),
                    source,
                })
            }
            Err(_) => {
                tracing::warn!(tool, problem_id, secs, "search timed out");
                Err(PastcastError::SearchTimeout {
                    tool: tool.to_string(),
                    secs,
                })
            }
        }
    }

    /// Record a probability for `problem_id` stamped with the current time.
    pub fn submit_prediction(&mut self, problem_id: &str, value: f64) -> Result<()> {
        self.submit_prediction_at(problem_id, value, Utc::now())
    }

    /// Record a probability with an explicit timestamp, e.g. when replaying
    /// a saved transcript.
    pub fn submit_prediction_at(
        &mut self,
        problem_id: &str,
        value: f64,
        timestamp: DateTime<Utc>,
    ) -> Result<()> {
        self.problem(problem_id)?;
        if !(0.0..=1.0).contains(&value) {
            return Err(PastcastError::Validation(format!(
                "prediction for '{problem_id}' must be within [0, 1], got {value}"
            )));
        }

        let sequence = self.next_sequence;
        self.next_sequence += 1;
        let log = self.submissions.entry(problem_id.to_string()).or_default();
        if !log.is_empty() {
            tracing::warn!(
                problem_id,
                previous = log.len(),
                "multiple submissions for problem"
            );
        }
        log.push(Submission {
            problem_id: problem_id.to_string(),
            timestamp,
            value,
            sequence,
        });
        self.log_event(format!("submitted {value} for {problem_id}"));
        Ok(())
    }

    /// Every submission recorded for `problem_id`, in arrival order.
    pub fn submissions(&self, problem_id: &str) -> Result<&[Submission]> {
        self.problem(problem_id)?;
        Ok(self
            .submissions
            .get(problem_id)
            .map(Vec::as_slice)
            .unwrap_or_default())
    }

    fn submission_count(&self) -> usize {
        self.submissions.values().map(Vec::len).sum()
    }

    /// Score the session.
    ///
    /// Only resolved problems with at least one submission count. `metrics`
    /// of `None` uses every registered metric.
    #[instrument(skip(self))]
    pub fn report(&self, metrics: Option<&[&str]>) -> Result<BenchmarkReport> {
        let names: Vec<String> = match metrics {
            Some(list) => list.iter().map(|s| s.to_string()).collect(),
            None => self.registries.metrics.names(),
        };
        let scorers = names
            .iter()
            .map(|name| Ok((name.clone(), self.registries.metrics.get(name)?)))
            .collect::<Result<Vec<(String, Arc<dyn Metric>)>>>()?;

        let strategy = self.config.eval_strategy;
        let mut predictions = Vec::new();
        let mut outcomes = Vec::new();
        let mut by_source: BTreeMap<String, (Vec<f64>, Vec<f64>)> = BTreeMap::new();
        let mut resolved = 0usize;

        for (id, problem) in &self.problems {
            let Some(outcome) = problem.resolution_status() else {
                continue;
            };
            resolved += 1;
            let submissions = self.submissions.get(id).map(Vec::as_slice).unwrap_or_default();
            let Some(chosen) = select_submission(submissions, outcome, strategy) else {
                continue;
            };
            predictions.push(chosen.value);
            outcomes.push(outcome);
            let entry = by_source.entry(problem.source().to_string()).or_default();
            entry.0.push(chosen.value);
            entry.1.push(outcome);
        }

        let count = predictions.len();
        if count == 0 {
            tracing::warn!(resolved, "no resolved problem has a submission; scores default to 0.0");
        }

        let per_source = by_source
            .into_iter()
            .map(|(source, (p, o))| {
                Ok((
                    source,
                    SourceBreakdown {
                        count: p.len(),
                        metrics: score_all(&scorers, &p, &o)?,
                    },
                ))
            })
            .collect::<Result<BTreeMap<_, _>>>()?;

        let report = BenchmarkReport {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            loader_strategy: self.config.loader_strategy.clone(),
            eval_strategy: strategy,
            count,
            metrics: score_all(&scorers, &predictions, &outcomes)?,
            per_source,
            problems_loaded: self.problems.len(),
            problems_resolved: resolved,
            submissions_received: self.submission_count(),
        };

        for (name, value) in &report.metrics {
            tracing::info!(metric = %name, value, count, "score");
        }
        self.log_event(format!(
            "report over {count} problems: {}",
            report
                .metrics
                .iter()
                .map(|(k, v)| format!("{k}={v:.4}"))
                .collect::<Vec<_>>()
                .join(", ")
        ));
        Ok(report)
    }

    pub fn available_search_functions(&self) -> Vec<String> {
        self.registries.search_tools.names()
    }

    pub fn available_loader_strategies(&self) -> Vec<String> {
        self.loader.available_strategies()
    }

    pub fn available_metrics(&self) -> Vec<String> {
        self.registries.metrics.names()
    }

    /// A copy of the session log.
    pub fn events(&self) -> Vec<SessionEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn log_event(&self, message: String) {
        tracing::info!("{message}");
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(SessionEvent {
                timestamp: Utc::now(),
                message,
            });
    }
}

fn score_all(
    scorers: &[(String, Arc<dyn Metric>)],
    predictions: &[f64],
    outcomes: &[f64],
) -> Result<BTreeMap<String, f64>> {
    scorers
        .iter()
        .map(|(name, metric)| {
            let value = if predictions.is_empty() {
                0.0
            } else {
                metric.score(predictions, outcomes)?
            };
            Ok((name.clone(), value))
        })
        .collect()
}

/// Pick the submission that counts for a problem with ground truth
/// `outcome`.
///
/// `Recent` takes the latest by `(timestamp, sequence)`. `Best` takes the
/// one with the smallest absolute error, the earliest on ties.
pub fn select_submission(
    submissions: &[Submission],
    outcome: f64,
    strategy: EvalStrategy,
) -> Option<&Submission> {
    let order = |s: &Submission| (s.timestamp, s.sequence);
    match strategy {
        EvalStrategy::Recent => submissions.iter().max_by_key(|s| order(*s)),
        EvalStrategy::Best => submissions.iter().min_by(|a, b| {
            (a.value - outcome)
                .abs()
                .total_cmp(&(b.value - outcome).abs())
                .then_with(|| order(*a).cmp(&order(*b)))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::RawRecord;
    use crate::registry::Registries;
    use crate::traits::SearchTool;
    use async_trait::async_trait;
    use serde_json::json;

    fn fixture() -> Arc<RawDatabase> {
        let records = [
            json!({
                "problem_id": "P001",
                "question": "Will Bitcoin exceed $100,000 by end of 2024?",
                "time_start": "2024-01-01T00:00:00Z",
                "time_end": "2024-12-31T23:59:59Z",
                "resolved_flag": false,
                "resolution_status": null,
                "metadata": {"source": "polymarket"}
            }),
            json!({
                "problem_id": "P002",
                "question": "Will the Fed cut rates in March 2024?",
                "time_start": "2024-01-15T00:00:00Z",
                "time_end": "2024-03-20T00:00:00Z",
                "resolved_flag": true,
                "resolution_status": 0,
                "metadata": {"source": "fred"}
            }),
            json!({
                "problem_id": "P003",
                "question": "Will ACLED record more than 100 events?",
                "time_start": "2024-02-01",
                "time_end": "2024-02-05",
                "resolved_to": 1,
                "metadata": {"source": "acled"}
            }),
        ];
        Arc::new(RawDatabase::new(
            records
                .iter()
                .map(|v| RawRecord(v.as_object().unwrap().clone()))
                .collect(),
        ))
    }

    fn config(strategy: EvalStrategy) -> EnvironmentConfig {
        EnvironmentConfig {
            loader_strategy: "load_all".into(),
            eval_strategy: strategy,
            params: LoadParams::default().with_time_now("2024-06-01T00:00:00Z"),
            search_timeout_secs: 1,
        }
    }

    fn manager(strategy: EvalStrategy) -> EnvironmentManager {
        EnvironmentManager::new(
            ProblemLoader::new(fixture()),
            Registries::isolated(),
            config(strategy),
        )
        .unwrap()
    }

    struct Echo;

    #[async_trait]
    impl SearchTool for Echo {
        async fn search(&self, query: &str, testing_time: &str) -> anyhow::Result<serde_json::Value> {
            Ok(json!({"query": query, "testing_time": testing_time}))
        }
    }

    struct Slow;

    #[async_trait]
    impl SearchTool for Slow {
        async fn search(&self, _: &str, _: &str) -> anyhow::Result<serde_json::Value> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(json!({}))
        }
    }

    struct Broken;

    #[async_trait]
    impl SearchTool for Broken {
        async fn search(&self, _: &str, _: &str) -> anyhow::Result<serde_json::Value> {
            anyhow::bail!("upstream returned 503")
        }
    }

    #[test]
    fn views_hide_resolution() {
        let env = manager(EvalStrategy::Recent);
        assert_eq!(env.len(), 3);
        for view in env.get_problems().values() {
            let json = serde_json::to_value(view).unwrap();
            assert!(json.get("resolved_flag").is_none());
            assert!(json.get("resolution_status").is_none());
        }
        assert_eq!(
            env.get_problem("P002").unwrap().time_testing,
            "2024-01-15T00:00:00Z"
        );
    }

    #[test]
    fn submit_validates() {
        let mut env = manager(EvalStrategy::Recent);
        assert!(env.submit_prediction("P002", 1.5).unwrap_err().is_validation());
        assert!(env.submit_prediction("P002", -0.1).unwrap_err().is_validation());
        assert!(env.submit_prediction("P002", f64::NAN).unwrap_err().is_validation());
        assert!(env.submit_prediction("P999", 0.5).unwrap_err().is_not_found());
        env.submit_prediction("P002", 0.0).unwrap();
        env.submit_prediction("P002", 1.0).unwrap();
        assert_eq!(env.submissions("P002").unwrap().len(), 2);
    }

    #[test]
    fn recent_strategy_uses_latest_submission() {
        let mut env = manager(EvalStrategy::Recent);
        env.submit_prediction("P002", 0.8).unwrap();
        env.submit_prediction("P002", 0.2).unwrap();
        let report = env.report(None).unwrap();
        assert_eq!(report.count, 1);
        assert!((report.metric("brier_score").unwrap() - 0.04).abs() < 1e-9);
    }

    #[test]
    fn best_strategy_uses_closest_submission() {
        let mut env = manager(EvalStrategy::Best);
        env.submit_prediction("P002", 0.1).unwrap();
        env.submit_prediction("P002", 0.9).unwrap();
        let report = env.report(Some(&["brier_score"])).unwrap();
        assert!((report.metric("brier_score").unwrap() - 0.01).abs() < 1e-9);
        assert_eq!(report.metrics.len(), 1);
    }

    #[test]
    fn recent_breaks_timestamp_ties_by_arrival() {
        let mut env = manager(EvalStrategy::Recent);
        let t = Utc::now();
        env.submit_prediction_at("P002", 0.9, t).unwrap();
        env.submit_prediction_at("P002", 0.3, t).unwrap();
        let chosen =
            select_submission(env.submissions("P002").unwrap(), 0.0, EvalStrategy::Recent).unwrap();
        assert_eq!(chosen.value, 0.3);
    }

    #[test]
    fn unsubmitted_and_unresolved_problems_are_excluded() {
        let mut env = manager(EvalStrategy::Recent);
        env.submit_prediction("P001", 0.7).unwrap();
        env.submit_prediction("P003", 1.0).unwrap();
        let report = env.report(None).unwrap();
        assert_eq!(report.count, 1);
        assert_eq!(report.problems_resolved, 2);
        assert_eq!(report.submissions_received, 2);
        assert_eq!(report.metric("accuracy"), Some(1.0));
        assert_eq!(report.per_source["acled"].count, 1);
        assert!(!report.per_source.contains_key("fred"));
    }

    #[test]
    fn empty_report_scores_zero() {
        let env = manager(EvalStrategy::Recent);
        let report = env.report(None).unwrap();
        assert_eq!(report.count, 0);
        assert_eq!(report.metric("brier_score"), Some(0.0));
        assert!(report.per_source.is_empty());
    }

    #[test]
    fn unknown_metric_is_not_found() {
        let env = manager(EvalStrategy::Recent);
        assert!(env.report(Some(&["log_loss"])).unwrap_err().is_not_found());
    }

    #[test]
    fn unknown_loader_strategy_fails_construction() {
        let mut cfg = config(EvalStrategy::Recent);
        cfg.loader_strategy = "bogus".into();
        let err = EnvironmentManager::new(ProblemLoader::new(fixture()), Registries::isolated(), cfg)
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn capability_discovery() {
        let registries = Registries::isolated();
        registries.search_tools.register("echo", Arc::new(Echo)).unwrap();
        let env = EnvironmentManager::new(
            ProblemLoader::new(fixture()),
            registries,
            config(EvalStrategy::Recent),
        )
        .unwrap();
        assert_eq!(env.available_search_functions(), vec!["echo"]);
        assert!(env.available_loader_strategies().contains(&"stratified".to_string()));
        assert_eq!(env.available_metrics(), vec!["accuracy", "brier_score"]);
    }

    #[tokio::test]
    async fn search_injects_testing_time() {
        let registries = Registries::isolated();
        registries.search_tools.register("echo", Arc::new(Echo)).unwrap();
        let env = EnvironmentManager::new(
            ProblemLoader::new(fixture()),
            registries,
            config(EvalStrategy::Recent),
        )
        .unwrap();
        let result = env.search("echo", "P002", "fed rates").await.unwrap();
        assert_eq!(result["testing_time"], "2024-01-15T00:00:00Z");
        assert_eq!(result["query"], "fed rates");

        assert!(env.search("echo", "P999", "x").await.unwrap_err().is_not_found());
        assert!(env.search("bing", "P002", "x").await.unwrap_err().is_not_found());
        assert!(env.events().iter().any(|e| e.message.contains("fed rates")));
    }

    #[tokio::test(start_paused = true)]
    async fn search_times_out() {
        let registries = Registries::isolated();
        registries.search_tools.register("slow", Arc::new(Slow)).unwrap();
        let env = EnvironmentManager::new(
            ProblemLoader::new(fixture()),
            registries,
            config(EvalStrategy::Recent),
        )
        .unwrap();
        let err = env.search("slow", "P002", "x").await.unwrap_err();
        assert!(matches!(err, PastcastError::SearchTimeout { secs: 1, .. }));
    }

    #[tokio::test]
    async fn search_failure_is_wrapped() {
        let registries = Registries::isolated();
        registries.search_tools.register("broken", Arc::new(Broken)).unwrap();
        let env = EnvironmentManager::new(
            ProblemLoader::new(fixture()),
            registries,
            config(EvalStrategy::Recent),
        )
        .unwrap();
        let err = env.search("broken", "P001", "x").await.unwrap_err();
        assert!(matches!(err, PastcastError::SearchFailed { .. }));
        assert!(err.to_string().contains("503"));
    }

    #[test]
    fn best_ties_go_to_earliest() {
        let t = Utc::now();
        let later = t + chrono::Duration::seconds(1);
        let subs = vec![
            Submission { problem_id: "p".into(), timestamp: later, value: 0.7, sequence: 0 },
            Submission { problem_id: "p".into(), timestamp: t, value: 0.7, sequence: 1 },
            Submission { problem_id: "p".into(), timestamp: t, value: 0.2, sequence: 2 },
        ];
        let chosen = select_submission(&subs, 1.0, EvalStrategy::Best).unwrap();
        assert_eq!(chosen.sequence, 1);
        assert!(select_submission(&[], 1.0, EvalStrategy::Best).is_none());
    }
}
