//! Perplexity Search API tool.
//!
//! Requests results published before the testing date, then drops anything
//! the API still returns with a later date. Only the surviving results reach
//! the caller; the counts before and after the filter are reported so leakage
//! can be measured, and the dropped entries go to the debug log.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::instrument;

use pastcast_core::loader::parse_timestamp;
use pastcast_core::SearchTool;

use crate::config::PerplexityConfig;
use crate::error::SearchError;

const API_KEY_VAR: &str = "PPLX_API_KEY";
const DATE_FIELDS: [&str; 3] = ["date", "last_updated", "published_date"];
const LINK_FIELDS: [&str; 3] = ["url", "link", "href"];

/// Perplexity search tool.
pub struct PerplexitySearch {
    api_key: Option<String>,
    base_url: String,
    max_results: u32,
    timeout_secs: u64,
    post_filter: bool,
    client: reqwest::Client,
}

impl PerplexitySearch {
    pub fn new(config: &PerplexityConfig) -> Result<Self, SearchError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| SearchError::NetworkError(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            max_results: config.max_results,
            timeout_secs: config.timeout_secs,
            post_filter: config.post_filter,
            client,
        })
    }
}

#[derive(Serialize)]
struct SearchRequest<'a> {
    query: &'a str,
    max_results: u32,
    search_before_date: String,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<Value>,
}

/// Tool output: results dated no later than the cutoff plus filter statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilteredResults {
    pub results: Vec<Value>,
    pub links: Vec<String>,
    pub requested_k: u32,
    pub returned_before_filter: usize,
    pub returned_after_filter: usize,
    /// Results whose date field could not be parsed (kept).
    pub date_parse_failures: usize,
    /// Results without any date field (kept).
    pub no_date_count: usize,
}

fn links(results: &[Value]) -> Vec<String> {
    results
        .iter()
        .filter_map(|r| {
            LINK_FIELDS
                .iter()
                .find_map(|k| r.get(k).and_then(Value::as_str))
                .map(str::to_string)
        })
        .collect()
}

/// Keep the entries of `results` dated no later than `cutoff`, along with
/// undated and unparseable ones.
pub fn filter_results(
    results: Vec<Value>,
    cutoff: DateTime<Utc>,
    requested_k: u32,
    enabled: bool,
) -> FilteredResults {
    let returned_before_filter = results.len();
    let mut kept = Vec::with_capacity(results.len());
    let mut date_parse_failures = 0;
    let mut no_date_count = 0;

    for result in results {
        let date = DATE_FIELDS
            .iter()
            .find_map(|k| result.get(k).and_then(Value::as_str))
            .filter(|s| !s.trim().is_empty());
        match date {
            None => no_date_count += 1,
            Some(raw) => match parse_timestamp(raw) {
                None => date_parse_failures += 1,
                Some(published) if enabled && published > cutoff => {
                    tracing::debug!(
                        published = %published,
                        %cutoff,
                        dropped = %result,
                        "dropping result after cutoff"
                    );
                    continue;
                }
                Some(_) => {}
            },
        }
        kept.push(result);
    }

    FilteredResults {
        returned_before_filter,
        returned_after_filter: kept.len(),
        links: links(&kept),
        results: kept,
        requested_k,
        date_parse_failures,
        no_date_count,
    }
}

#[async_trait]
impl SearchTool for PerplexitySearch {
    #[instrument(skip(self, query), fields(k = self.max_results))]
    async fn search(&self, query: &str, testing_time: &str) -> anyhow::Result<Value> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(SearchError::MissingApiKey(API_KEY_VAR))?;
        let cutoff = parse_timestamp(testing_time)
            .ok_or_else(|| SearchError::InvalidTestingTime(testing_time.to_string()))?;

        let body = SearchRequest {
            query,
            max_results: self.max_results,
            search_before_date: cutoff.format("%m/%d/%Y").to_string(),
        };

        let response = self
            .client
            .post(format!("{}/search", self.base_url))
            .bearer_auth(api_key)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SearchError::Timeout(self.timeout_secs)
                } else {
                    SearchError::NetworkError(e.to_string())
                }
            })?;

        let status = response.status().as_u16();
        if status == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(5)
                * 1000;
            return Err(SearchError::RateLimited {
                retry_after_ms: retry_after,
            }
            .into());
        }
        if status == 401 {
            let body = response.text().await.unwrap_or_default();
            return Err(SearchError::AuthenticationFailed(body).into());
        }
        if status >= 400 {
            let message = response.text().await.unwrap_or_default();
            return Err(SearchError::ApiError { status, message }.into());
        }

        let api_response: SearchResponse =
            response.json().await.map_err(|e| SearchError::ApiError {
                status: 0,
                message: format!("failed to parse response: {e}"),
            })?;

        let filtered = filter_results(
            api_response.results,
            cutoff,
            self.max_results,
            self.post_filter,
        );
        if filtered.returned_after_filter < filtered.returned_before_filter {
            tracing::warn!(
                dropped = filtered.returned_before_filter - filtered.returned_after_filter,
                "search returned results dated after the testing time"
            );
        }
        Ok(serde_json::to_value(filtered)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn tool(base_url: String, api_key: Option<&str>) -> PerplexitySearch {
        PerplexitySearch::new(&PerplexityConfig {
            api_key: api_key.map(str::to_string),
            base_url,
            max_results: 3,
            ..Default::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn sends_cutoff_and_filters_late_results() {
        let server = MockServer::start().await;

        let response_body = json!({
            "results": [
                {"title": "old", "url": "https://a.example", "date": "2024-01-10"},
                {"title": "leak", "url": "https://b.example", "date": "2024-03-01"},
                {"title": "undated", "url": "https://c.example"},
                {"title": "garbled", "url": "https://d.example", "date": "last week"}
            ]
        });

        Mock::given(method("POST"))
            .and(path("/search"))
            .and(header("authorization", "Bearer pplx-test"))
            .and(body_partial_json(json!({
                "query": "fed rates",
                "max_results": 3,
                "search_before_date": "01/15/2024"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(&response_body))
            .mount(&server)
            .await;

        let result = tool(server.uri(), Some("pplx-test"))
            .search("fed rates", "2024-01-15T00:00:00Z")
            .await
            .unwrap();
        let parsed: FilteredResults = serde_json::from_value(result).unwrap();
        assert_eq!(parsed.returned_before_filter, 4);
        assert_eq!(parsed.returned_after_filter, 3);
        assert_eq!(parsed.no_date_count, 1);
        assert_eq!(parsed.date_parse_failures, 1);
        assert!(!parsed.links.contains(&"https://b.example".to_string()));
        assert_eq!(parsed.requested_k, 3);
    }

    #[tokio::test]
    async fn output_never_contains_post_cutoff_results() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [
                    {"title": "FUTURE: Fed cut confirmed", "url": "https://leak.example", "date": "2024-03-21"},
                    {"title": "Fed holds", "url": "https://ok.example", "date": "2024-01-14"}
                ]
            })))
            .mount(&server)
            .await;

        let output = tool(server.uri(), Some("k"))
            .search("fed", "2024-01-15")
            .await
            .unwrap();
        let text = output.to_string();
        assert!(!text.contains("FUTURE"));
        assert!(!text.contains("leak.example"));
        assert!(!text.contains("2024-03-21"));
        assert_eq!(output["returned_before_filter"], 2);
        assert_eq!(output["returned_after_filter"], 1);
        assert_eq!(output["links"], json!(["https://ok.example"]));
    }

    #[tokio::test]
    async fn missing_api_key() {
        let err = tool("http://127.0.0.1:9".into(), None)
            .search("q", "2024-01-01")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("PPLX_API_KEY"));
    }

    #[tokio::test]
    async fn invalid_testing_time() {
        let err = tool("http://127.0.0.1:9".into(), Some("k"))
            .search("q", "sometime")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("invalid testing time"));
    }

    #[tokio::test]
    async fn authentication_failure() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(401).set_body_string("unauthorized"))
            .mount(&server)
            .await;

        let err = tool(server.uri(), Some("bad-key"))
            .search("q", "2024-01-01")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("authentication"));
    }

    #[tokio::test]
    async fn rate_limiting() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "5"))
            .mount(&server)
            .await;

        let err = tool(server.uri(), Some("k"))
            .search("q", "2024-01-01")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("rate limited"));
    }

    #[test]
    fn filter_disabled_keeps_everything() {
        let cutoff = parse_timestamp("2024-01-01").unwrap();
        let results = vec![json!({"date": "2025-01-01", "link": "https://x.example"})];
        let filtered = filter_results(results, cutoff, 10, false);
        assert_eq!(filtered.returned_after_filter, 1);
        assert_eq!(filtered.links, vec!["https://x.example"]);
    }
}
