//! Mock search tools for testing sessions without network access.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use serde_json::{json, Value};

use pastcast_core::SearchTool;

/// Response shape a mock imitates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockStyle {
    /// A list of `{title, snippet, date}` hits.
    Google,
    /// An `{answer, sources}` summary.
    Perplexity,
}

/// A search tool that answers every query with canned text mentioning the
/// cutoff it was given, so tests can check the cutoff was passed through.
pub struct MockSearchTool {
    style: MockStyle,
    /// Number of calls made.
    call_count: AtomicU32,
    /// Last `(query, testing_time)` received.
    last_call: Mutex<Option<(String, String)>>,
}

impl MockSearchTool {
    pub fn new(style: MockStyle) -> Self {
        Self {
            style,
            call_count: AtomicU32::new(0),
            last_call: Mutex::new(None),
        }
    }

    pub fn google() -> Self {
        Self::new(MockStyle::Google)
    }

    pub fn perplexity() -> Self {
        Self::new(MockStyle::Perplexity)
    }

    /// Get the number of calls made to this tool.
    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::Relaxed)
    }

    /// Get the last `(query, testing_time)` pair received.
    pub fn last_call(&self) -> Option<(String, String)> {
        self.last_call
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl SearchTool for MockSearchTool {
    async fn search(&self, query: &str, testing_time: &str) -> anyhow::Result<Value> {
        self.call_count.fetch_add(1, Ordering::Relaxed);
        *self.last_call.lock().unwrap_or_else(PoisonError::into_inner) =
            Some((query.to_string(), testing_time.to_string()));

        Ok(match self.style {
            MockStyle::Google => json!([{
                "title": format!("Result for {query}"),
                "snippet": format!("This info was available before {testing_time}"),
                "date": testing_time,
            }]),
            MockStyle::Perplexity => json!({
                "answer": format!(
                    "Simulated answer for '{query}' restricted to data before {testing_time}"
                ),
                "sources": ["source1", "source2"],
            }),
        })
    }
}
