use async_trait::async_trait;
use futures::future::join_all;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use super::{ProviderAdapter, QueryContext};
use crate::config::{SearchSourceConfig, DEFAULT_SEARCH_MAX_RESULTS};
use crate::errors::{FailureReason, ProviderFailure};
use crate::types::{ProviderKind, ProviderResult, Query, Secret};

const PROVIDER_NAME: &str = "remote-search";

/// Response shape expected from every search source
#[derive(Deserialize, Debug)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchCandidate>,
}

/// One candidate returned by a search source. `relevance` is on a 0-100 scale.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct SearchCandidate {
    pub title: String,
    #[serde(default)]
    pub snippet: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub relevance: f64,
}

impl SearchCandidate {
    /// Relevance rounded and clamped into a confidence score
    pub fn confidence(&self) -> u8 {
        if self.relevance.is_nan() {
            return 0;
        }
        self.relevance.round().clamp(0.0, 100.0) as u8
    }

    fn into_result(self, source: &str) -> ProviderResult {
        let confidence = self.confidence();
        let result = ProviderResult::new(
            ProviderKind::RemoteSearch,
            format!("{}:{}", PROVIDER_NAME, source),
            self.title,
            self.snippet,
            confidence,
        );
        match self.url {
            Some(url) => result.with_source_url(url),
            None => result,
        }
    }
}

#[derive(Debug, Clone)]
struct SearchSource {
    name: String,
    endpoint: String,
    api_key: Option<Secret>,
    max_results: usize,
}

/// Fans a query out to one or more JSON search sources
#[derive(Debug, Clone)]
pub struct RemoteSearchProvider {
    http_client: Client,
    sources: Vec<SearchSource>,
}

impl RemoteSearchProvider {
    pub fn new(sources: &[SearchSourceConfig], timeout: Duration) -> Result<Self, ProviderFailure> {
        if sources.is_empty() {
            return Err(ProviderFailure::transport(
                PROVIDER_NAME,
                "At least one search source is required",
            ));
        }

        let http_client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(10)))
            .build()
            .map_err(|e| ProviderFailure::from_reqwest(PROVIDER_NAME, &e))?;

        let sources = sources
            .iter()
            .map(|s| SearchSource {
                name: s.name.clone(),
                endpoint: s.endpoint.clone(),
                api_key: s.api_key.clone().filter(|k| !k.is_empty()),
                max_results: s.max_results.unwrap_or(DEFAULT_SEARCH_MAX_RESULTS),
            })
            .collect();

        Ok(Self {
            http_client,
            sources,
        })
    }

    async fn search_source(
        &self,
        source: &SearchSource,
        text: &str,
    ) -> Result<Vec<ProviderResult>, ProviderFailure> {
        let failure_name = format!("{}:{}", PROVIDER_NAME, source.name);

        let limit = source.max_results.to_string();
        let mut request = self
            .http_client
            .get(&source.endpoint)
            .query(&[("q", text), ("limit", limit.as_str())]);
        if let Some(key) = &source.api_key {
            request = request.bearer_auth(key.expose());
        }

        let response = request
            .send()
            .await
            .map_err(|e| ProviderFailure::from_reqwest(failure_name.clone(), &e))?;

        let status = response.status();
        if !status.is_success() {
            let reason = if status.as_u16() == 429 {
                FailureReason::Quota
            } else {
                FailureReason::Transport
            };
            return Err(ProviderFailure::new(
                failure_name,
                reason,
                format!("Search request failed with status {}", status),
            ));
        }

        let body: SearchResponse = response
            .json()
            .await
            .map_err(|e| ProviderFailure::transport(failure_name, format!("Failed to parse response: {}", e)))?;

        Ok(body
            .results
            .into_iter()
            .take(source.max_results)
            .map(|c| c.into_result(&source.name))
            .collect())
    }
}

/// Combines per-source outcomes. Succeeds if any source succeeded; otherwise
/// reports one failure, preferring a timeout so callers can decide on retry.
fn combine_outcomes(
    outcomes: Vec<Result<Vec<ProviderResult>, ProviderFailure>>,
) -> Result<Vec<ProviderResult>, ProviderFailure> {
    let mut results = Vec::new();
    let mut failures = Vec::new();
    let mut any_success = false;

    for outcome in outcomes {
        match outcome {
            Ok(mut found) => {
                any_success = true;
                results.append(&mut found);
            }
            Err(failure) => failures.push(failure),
        }
    }

    if any_success {
        for failure in &failures {
            warn!(error = %failure, "Search source failed, using remaining sources");
        }
        return Ok(results);
    }

    let summary = failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ");
    let reason = failures
        .iter()
        .map(|f| f.reason)
        .find(|r| *r == FailureReason::Timeout)
        .or_else(|| failures.first().map(|f| f.reason))
        .unwrap_or(FailureReason::Transport);

    Err(ProviderFailure::new(PROVIDER_NAME, reason, summary))
}

#[async_trait]
impl ProviderAdapter for RemoteSearchProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::RemoteSearch
    }

    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    async fn answer(
        &self,
        query: &Query,
        _context: &QueryContext,
    ) -> Result<Vec<ProviderResult>, ProviderFailure> {
        debug!(sources = self.sources.len(), "Searching external sources");

        let searches = self
            .sources
            .iter()
            .map(|source| self.search_source(source, query.text()));
        let outcomes = join_all(searches).await;

        let results = combine_outcomes(outcomes)?;
        debug!(count = results.len(), "Search candidates collected");
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(relevance: f64) -> SearchCandidate {
        SearchCandidate {
            title: "Diabetes - Health KB".to_string(),
            snippet: "Overview".to_string(),
            url: Some("https://kb.example.org/diabetes".to_string()),
            relevance,
        }
    }

    #[test]
    fn test_relevance_to_confidence() {
        assert_eq!(candidate(87.6).confidence(), 88);
        assert_eq!(candidate(140.0).confidence(), 100);
        assert_eq!(candidate(-3.0).confidence(), 0);
        assert_eq!(candidate(f64::NAN).confidence(), 0);
    }

    #[test]
    fn test_candidate_wrapping() {
        let result = candidate(70.0).into_result("kb");
        assert_eq!(result.provider_kind(), ProviderKind::RemoteSearch);
        assert_eq!(result.provider_name(), "remote-search:kb");
        assert_eq!(result.confidence_score(), 70);
        assert_eq!(result.source_url(), Some("https://kb.example.org/diabetes"));
    }

    #[test]
    fn test_response_parsing_tolerates_missing_fields() {
        let body = r#"{"results":[{"title":"Fever","relevance":91},{"title":"Cold"}]}"#;
        let parsed: SearchResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.results.len(), 2);
        assert_eq!(parsed.results[1].confidence(), 0);
        assert!(parsed.results[1].url.is_none());
    }

    #[test]
    fn test_partial_source_failure_still_succeeds() {
        let outcomes = vec![
            Err(ProviderFailure::transport("remote-search:a", "down")),
            Ok(vec![candidate(60.0).into_result("b")]),
        ];
        let results = combine_outcomes(outcomes).unwrap();
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn test_all_sources_failing_prefers_timeout() {
        let outcomes = vec![
            Err(ProviderFailure::transport("remote-search:a", "down")),
            Err(ProviderFailure::timeout("remote-search:b", "slow")),
        ];
        let failure = combine_outcomes(outcomes).unwrap_err();
        assert_eq!(failure.reason, FailureReason::Timeout);
        assert_eq!(failure.provider, PROVIDER_NAME);
    }

    #[test]
    fn test_requires_a_source() {
        assert!(RemoteSearchProvider::new(&[], Duration::from_secs(5)).is_err());
    }

    mod over_http {
        use super::*;
        use crate::providers::test_server::serve;
        use crate::types::Feature;
        use axum::extract::{Query as QueryParams, State};
        use axum::routing::get;
        use axum::{Json, Router};
        use serde_json::{json, Value};
        use std::collections::HashMap;
        use std::sync::{Arc, Mutex};

        type Captured = Arc<Mutex<Vec<(HashMap<String, String>, Option<String>)>>>;

        async fn knowledge_base(
            State(captured): State<Captured>,
            QueryParams(params): QueryParams<HashMap<String, String>>,
            headers: axum::http::HeaderMap,
        ) -> Json<Value> {
            let auth = headers
                .get(axum::http::header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            captured.lock().unwrap().push((params, auth));
            Json(json!({
                "results": [
                    {"title": "Type 2 diabetes", "snippet": "Diet and exercise", "url": "https://kb.example.org/t2d", "relevance": 91.4},
                    {"title": "Prediabetes", "snippet": "Early signs", "relevance": 72},
                    {"title": "Gestational diabetes", "snippet": "During pregnancy", "relevance": 55}
                ]
            }))
        }

        fn fixed_reply(status: u16, body: &'static str) -> String {
            let status = axum::http::StatusCode::from_u16(status).unwrap();
            let base = serve(Router::new().route("/search", get(move || async move { (status, body) })));
            format!("{}/search", base)
        }

        fn source(name: &str, endpoint: String, api_key: Option<&str>) -> SearchSourceConfig {
            SearchSourceConfig {
                name: name.to_string(),
                endpoint,
                api_key: api_key.map(Secret::new),
                max_results: Some(2),
            }
        }

        async fn search(
            sources: &[SearchSourceConfig],
            timeout: Duration,
        ) -> Result<Vec<ProviderResult>, ProviderFailure> {
            let provider = RemoteSearchProvider::new(sources, timeout).unwrap();
            let query = Query::new("s", "diabetes diet");
            provider
                .answer(&query, &QueryContext::new(Feature::MedicalAdvisor, Vec::new()))
                .await
        }

        #[tokio::test]
        async fn test_search_sends_query_and_caps_results() {
            let captured: Captured = Arc::default();
            let app = Router::new()
                .route("/search", get(knowledge_base))
                .with_state(captured.clone());
            let endpoint = format!("{}/search", serve(app));

            let results = search(&[source("kb", endpoint, Some("kb-token"))], Duration::from_secs(5))
                .await
                .unwrap();
            assert_eq!(results.len(), 2);
            assert_eq!(results[0].title(), "Type 2 diabetes");
            assert_eq!(results[0].body(), "Diet and exercise");
            assert_eq!(results[0].provider_name(), "remote-search:kb");
            assert_eq!(results[0].confidence_score(), 91);
            assert_eq!(results[0].source_url(), Some("https://kb.example.org/t2d"));
            assert_eq!(results[1].source_url(), None);

            let requests = captured.lock().unwrap();
            assert_eq!(requests.len(), 1);
            let (params, auth) = &requests[0];
            assert_eq!(params.get("q").map(String::as_str), Some("diabetes diet"));
            assert_eq!(params.get("limit").map(String::as_str), Some("2"));
            assert_eq!(auth.as_deref(), Some("Bearer kb-token"));
        }

        #[tokio::test]
        async fn test_source_without_key_sends_no_authorization() {
            let captured: Captured = Arc::default();
            let app = Router::new()
                .route("/search", get(knowledge_base))
                .with_state(captured.clone());
            let endpoint = format!("{}/search", serve(app));

            search(&[source("kb", endpoint, None)], Duration::from_secs(5))
                .await
                .unwrap();
            assert_eq!(captured.lock().unwrap()[0].1, None);
        }

        #[tokio::test]
        async fn test_source_errors_map_to_reasons() {
            let cases = [
                (429, "busy", FailureReason::Quota),
                (500, "boom", FailureReason::Transport),
                (200, "not json", FailureReason::Transport),
            ];
            for (status, body, expected) in cases {
                let sources = [source("kb", fixed_reply(status, body), None)];
                let failure = search(&sources, Duration::from_secs(5)).await.unwrap_err();
                assert_eq!(failure.reason, expected, "status {}", status);
                assert_eq!(failure.provider, PROVIDER_NAME);
            }
        }

        #[tokio::test]
        async fn test_slow_source_times_out() {
            let app = Router::new().route(
                "/search",
                get(|| async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Json(json!({"results": []}))
                }),
            );
            let endpoint = format!("{}/search", serve(app));
            let failure = search(&[source("slow", endpoint, None)], Duration::from_millis(200))
                .await
                .unwrap_err();
            assert_eq!(failure.reason, FailureReason::Timeout);
        }

        #[tokio::test]
        async fn test_healthy_source_outlives_failing_one() {
            let captured: Captured = Arc::default();
            let app = Router::new()
                .route("/search", get(knowledge_base))
                .with_state(captured);
            let healthy = format!("{}/search", serve(app));

            let sources = [
                source("down", fixed_reply(503, "maintenance"), None),
                source("kb", healthy, None),
            ];
            let results = search(&sources, Duration::from_secs(5)).await.unwrap();
            assert_eq!(results.len(), 2);
            assert!(results.iter().all(|r| r.provider_name() == "remote-search:kb"));
        }
    }
}
