//! Raw problem database loading.
//!
//! The database is a JSON document read once at startup. Record schemas vary
//! by source, so records are kept as open JSON objects and normalized later
//! by the loader.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::model::SourceCatalog;

/// One raw record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawRecord(pub Map<String, Value>);

impl RawRecord {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// A field as text. Strings that are blank or `"N/A"` count as missing;
    /// numbers and booleans are rendered.
    pub fn text(&self, key: &str) -> Option<String> {
        self.get(key).and_then(value_text)
    }

    /// The first present field among `keys`.
    pub fn first_text(&self, keys: &[&str]) -> Option<String> {
        keys.iter().find_map(|k| self.text(k))
    }

    /// The nested `metadata` object, if any.
    pub fn metadata(&self) -> Option<&Map<String, Value>> {
        self.get("metadata").and_then(Value::as_object)
    }

    /// Source label from the top level or from `metadata.source`.
    pub fn source(&self) -> Option<String> {
        self.text("source").or_else(|| {
            self.metadata()
                .and_then(|m| m.get("source"))
                .and_then(value_text)
        })
    }

    /// Identifier from `problem_id`, falling back to `id`.
    pub fn identifier(&self) -> Option<String> {
        self.first_text(&["problem_id", "id"])
    }
}

pub(crate) fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("n/a") {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// The raw problem database.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawDatabase {
    records: Vec<RawRecord>,
}

impl RawDatabase {
    pub fn new(records: Vec<RawRecord>) -> Self {
        Self { records }
    }

    /// Read a database file.
    pub fn from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read problem database: {}", path.display()))?;
        Self::from_json_str(&content)
            .with_context(|| format!("failed to parse problem database: {}", path.display()))
    }

    /// Parse a database document.
    ///
    /// Accepts a top-level array of records, or an object holding the array
    /// under `problems` or `questions`. Entries that are not objects are
    /// skipped.
    pub fn from_json_str(content: &str) -> Result<Self> {
        let document: Value = serde_json::from_str(content).context("invalid JSON")?;
        Ok(Self::new(records_from(document)?))
    }

    /// Read a ForecastBench question file and its resolution file and join
    /// them into one database.
    pub fn from_forecastbench(questions: &Path, resolutions: &Path) -> Result<Self> {
        let read = |path: &Path| -> Result<Value> {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("failed to parse {}", path.display()))
        };
        Self::join_forecastbench(read(questions)?, read(resolutions)?)
    }

    /// Join ForecastBench questions with resolutions on `(question_set, id)`.
    ///
    /// Resolution fields are copied onto the question without overwriting
    /// fields the question already has. Joined records get a
    /// `fbv1_{source}_{id}` problem id.
    pub fn join_forecastbench(questions: Value, resolutions: Value) -> Result<Self> {
        let questions = inherit_file_fields(&questions, records_from(questions.clone())?);
        let resolutions = match &resolutions {
            Value::Object(obj) => match obj.get("resolutions") {
                Some(list) => inherit_file_fields(&resolutions, records_from(list.clone())?),
                None => Vec::new(),
            },
            other => records_from(other.clone())?,
        };

        let mut lookup: HashMap<(Option<String>, String), RawRecord> = HashMap::new();
        for resolution in resolutions {
            if let Some(id) = resolution.text("id") {
                lookup.insert((resolution.text("question_set"), id), resolution);
            }
        }

        let mut joined = Vec::with_capacity(questions.len());
        for mut question in questions {
            let Some(id) = question.text("id") else {
                tracing::warn!("skipping ForecastBench question without id");
                continue;
            };
            let key = (question.text("question_set"), id.clone());
            if let Some(resolution) = lookup.get(&key) {
                for field in ["resolved_to", "resolution_date", "resolved"] {
                    if let Some(value) = resolution.get(field) {
                        question
                            .0
                            .entry(field.to_string())
                            .or_insert_with(|| value.clone());
                    }
                }
            }
            if question.text("problem_id").is_none() {
                let source = question.source().unwrap_or_else(|| "unknown".into());
                question.0.insert(
                    "problem_id".into(),
                    Value::String(format!("fbv1_{source}_{id}")),
                );
            }
            joined.push(question);
        }

        tracing::info!(records = joined.len(), "joined ForecastBench questions");
        Ok(Self::new(joined))
    }

    pub fn records(&self) -> &[RawRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Record count per source label.
    pub fn source_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for record in &self.records {
            let source = record.source().unwrap_or_else(|| "unknown".into());
            *counts.entry(source).or_insert(0) += 1;
        }
        counts
    }
}

/// Copy file-level `question_set` / `forecast_due_date` onto records that
/// lack them.
fn inherit_file_fields(document: &Value, mut records: Vec<RawRecord>) -> Vec<RawRecord> {
    for field in ["question_set", "forecast_due_date"] {
        if let Some(value) = document.get(field).filter(|v| !v.is_null()) {
            for record in &mut records {
                record
                    .0
                    .entry(field.to_string())
                    .or_insert_with(|| value.clone());
            }
        }
    }
    records
}

fn records_from(document: Value) -> Result<Vec<RawRecord>> {
    let list = match document {
        Value::Array(list) => list,
        Value::Object(mut obj) => match obj
            .remove("problems")
            .or_else(|| obj.remove("questions"))
        {
            Some(Value::Array(list)) => list,
            _ => anyhow::bail!("expected an array of records, or an object with a 'problems' or 'questions' array"),
        },
        _ => anyhow::bail!("expected an array of records"),
    };

    let total = list.len();
    let records: Vec<RawRecord> = list
        .into_iter()
        .filter_map(|v| match v {
            Value::Object(map) => Some(RawRecord(map)),
            _ => None,
        })
        .collect();
    if records.len() < total {
        tracing::warn!(
            skipped = total - records.len(),
            "skipping database entries that are not objects"
        );
    }
    Ok(records)
}

/// A warning from database validation.
#[derive(Debug, Clone)]
pub struct ValidationWarning {
    /// Identifier of the offending record, if it has one.
    pub record_id: Option<String>,
    pub message: String,
}

/// Check a database for records the loader will skip or mis-sample.
pub fn validate_database(db: &RawDatabase, catalog: &SourceCatalog) -> Vec<ValidationWarning> {
    let mut warnings = Vec::new();
    let mut seen = HashSet::new();

    for (index, record) in db.records().iter().enumerate() {
        let id = record.identifier();
        let label = id.clone().unwrap_or_else(|| format!("#{index}"));

        match &id {
            Some(id) if !seen.insert(id.clone()) => warnings.push(ValidationWarning {
                record_id: Some(id.clone()),
                message: format!("duplicate record id: {id}"),
            }),
            Some(_) => {}
            None => warnings.push(ValidationWarning {
                record_id: None,
                message: format!("record {label} has no problem_id or id"),
            }),
        }

        if record.first_text(&["question", "title"]).is_none() {
            warnings.push(ValidationWarning {
                record_id: id.clone(),
                message: format!("record {label} has no question text"),
            });
        }

        match record.source() {
            Some(source) if !catalog.contains(&source) => warnings.push(ValidationWarning {
                record_id: id.clone(),
                message: format!("record {label} has unrecognized source '{source}'"),
            }),
            Some(_) => {}
            None => warnings.push(ValidationWarning {
                record_id: id.clone(),
                message: format!("record {label} has no source"),
            }),
        }
    }

    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SAMPLE: &str = r#"[
        {
            "problem_id": "P001",
            "question": "Will SpaceX land on Mars by 2030?",
            "time_start": "2024-01-01T00:00:00Z",
            "time_end": "2030-12-31T00:00:00Z",
            "resolved_flag": false,
            "resolution_status": null,
            "metadata": {"source": "metaculus"}
        },
        {
            "problem_id": "P002",
            "question": "Will the Fed cut rates in March 2024?",
            "time_start": "2024-01-15T00:00:00Z",
            "time_end": "2024-03-20T00:00:00Z",
            "resolved_flag": true,
            "resolution_status": 0,
            "metadata": {"source": "fred"}
        }
    ]"#;

    #[test]
    fn parse_array_document() {
        let db = RawDatabase::from_json_str(SAMPLE).unwrap();
        assert_eq!(db.len(), 2);
        assert_eq!(db.records()[0].identifier().as_deref(), Some("P001"));
        assert_eq!(db.records()[1].source().as_deref(), Some("fred"));
    }

    #[test]
    fn parse_wrapped_document() {
        let db = RawDatabase::from_json_str(r#"{"questions": [{"id": 7}, 3]}"#).unwrap();
        assert_eq!(db.len(), 1);
        assert_eq!(db.records()[0].identifier().as_deref(), Some("7"));
    }

    #[test]
    fn parse_rejects_scalar_document() {
        assert!(RawDatabase::from_json_str("42").is_err());
        assert!(RawDatabase::from_json_str(r#"{"rows": []}"#).is_err());
        assert!(RawDatabase::from_json_str("not json").is_err());
    }

    #[test]
    fn text_treats_na_as_missing() {
        let record = RawRecord(
            json!({"start_date": "N/A", "end_date": " ", "forecast_due_date": "2024-05-01"})
                .as_object()
                .unwrap()
                .clone(),
        );
        assert_eq!(record.text("start_date"), None);
        assert_eq!(record.text("end_date"), None);
        assert_eq!(
            record
                .first_text(&["start_date", "forecast_due_date"])
                .as_deref(),
            Some("2024-05-01")
        );
    }

    #[test]
    fn join_forecastbench_matches_on_question_set_and_id() {
        let questions = json!({"questions": [
            {"id": "q1", "question_set": "2024-07-21-llm.json", "source": "fred", "question": "A?"},
            {"id": "q1", "question_set": "2024-08-04-llm.json", "source": "fred", "question": "B?"},
            {"id": "q2", "question_set": "2024-07-21-llm.json", "source": "manifold", "question": "C?"}
        ]});
        let resolutions = json!({"resolutions": [
            {"id": "q1", "question_set": "2024-07-21-llm.json", "resolved_to": 1.0, "resolution_date": "2024-08-01", "resolved": true},
            {"id": "q2", "question_set": "2024-07-21-llm.json", "resolved_to": 0.0, "resolution_date": "2024-09-01", "resolved": true}
        ]});

        let db = RawDatabase::join_forecastbench(questions, resolutions).unwrap();
        assert_eq!(db.len(), 3);

        let first = &db.records()[0];
        assert_eq!(first.text("problem_id").as_deref(), Some("fbv1_fred_q1"));
        assert_eq!(first.get("resolved_to"), Some(&json!(1.0)));

        // Same id, different question set: no resolution attached.
        assert!(db.records()[1].get("resolved_to").is_none());
        assert_eq!(
            db.records()[2].text("resolution_date").as_deref(),
            Some("2024-09-01")
        );
    }

    #[test]
    fn from_path_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("problems.json");
        std::fs::write(&path, SAMPLE).unwrap();
        let db = RawDatabase::from_path(&path).unwrap();
        assert_eq!(db.len(), 2);
        assert!(RawDatabase::from_path(&dir.path().join("missing.json")).is_err());
    }

    #[test]
    fn source_counts_group_records() {
        let db = RawDatabase::from_json_str(SAMPLE).unwrap();
        let counts = db.source_counts();
        assert_eq!(counts.get("fred"), Some(&1));
        assert_eq!(counts.get("metaculus"), Some(&1));
    }

    #[test]
    fn validate_flags_duplicates_and_unknown_sources() {
        let db = RawDatabase::from_json_str(
            r#"[
                {"problem_id": "a", "question": "?", "source": "fred"},
                {"problem_id": "a", "question": "?", "source": "fred"},
                {"problem_id": "b", "source": "tiktok"},
                {"question": "orphan"}
            ]"#,
        )
        .unwrap();
        let warnings = validate_database(&db, &SourceCatalog::forecastbench());
        assert!(warnings.iter().any(|w| w.message.contains("duplicate")));
        assert!(warnings.iter().any(|w| w.message.contains("tiktok")));
        assert!(warnings.iter().any(|w| w.message.contains("no question")));
        assert!(warnings.iter().any(|w| w.message.contains("no problem_id")));
        assert!(warnings.iter().any(|w| w.message.contains("no source")));
    }
}
