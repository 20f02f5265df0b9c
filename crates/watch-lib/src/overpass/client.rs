//! HTTP client for the Overpass API
//!
//! Sends the place query as a form-encoded POST and retries transient
//! failures (timeouts, 429, 5xx) with exponential backoff.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use super::query::{build_query, PlaceFilter, SearchArea};
use super::{async_trait, PlaceSource};
use crate::error::{Result, WatchError};
use crate::models::{ElementKind, Place, PlaceId};

/// Name used for places without a `name` tag
const UNKNOWN_NAME: &str = "Unknown";

/// Remark prefix Overpass uses when a query was cut short
const RUNTIME_ERROR_REMARK: &str = "runtime error";

/// Configuration for the Overpass client
#[derive(Debug, Clone)]
pub struct OverpassConfig {
    /// Interpreter endpoint
    pub endpoint: String,
    /// HTTP request timeout
    pub request_timeout: Duration,
    /// Server-side query timeout passed in the query header
    pub query_timeout_secs: u64,
    /// Retries after the first attempt for transient failures
    pub max_retries: u32,
    /// Initial backoff between retries
    pub initial_backoff: Duration,
    /// Maximum backoff between retries
    pub max_backoff: Duration,
}

impl Default for OverpassConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://overpass-api.de/api/interpreter".to_string(),
            request_timeout: Duration::from_secs(30),
            query_timeout_secs: 25,
            max_retries: 2,
            initial_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(60),
        }
    }
}

/// Raw Overpass JSON response
#[derive(Debug, Clone, Deserialize)]
pub struct OverpassResponse {
    #[serde(default)]
    pub elements: Vec<OverpassElement>,
    /// Set by the server when the query hit a timeout or memory limit
    #[serde(default)]
    pub remark: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OverpassElement {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: i64,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    /// Present for ways and relations with `out center`
    pub center: Option<Center>,
    #[serde(default)]
    pub tags: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Center {
    pub lat: f64,
    pub lon: f64,
}

impl OverpassResponse {
    /// Convert elements into places, keeping the last element seen per id
    pub fn into_places(self) -> Vec<Place> {
        let mut unique: BTreeMap<PlaceId, Place> = BTreeMap::new();

        for element in self.elements {
            let kind = match element.kind.as_str() {
                "node" => ElementKind::Node,
                "way" => ElementKind::Way,
                "relation" => ElementKind::Relation,
                other => {
                    debug!(kind = %other, id = element.id, "Skipping unsupported element");
                    continue;
                }
            };

            let id = PlaceId::new(kind, element.id);
            let (latitude, longitude) = match (element.lat, element.lon, element.center) {
                (Some(lat), Some(lon), _) => (Some(lat), Some(lon)),
                (_, _, Some(center)) => (Some(center.lat), Some(center.lon)),
                _ => (None, None),
            };
            let name = element
                .tags
                .get("name")
                .cloned()
                .unwrap_or_else(|| UNKNOWN_NAME.to_string());

            unique.insert(
                id,
                Place {
                    id,
                    latitude,
                    longitude,
                    name,
                },
            );
        }

        unique.into_values().collect()
    }
}

/// Overpass API client for a fixed search area and filter
pub struct OverpassClient {
    client: Client,
    endpoint: Url,
    query: String,
    config: OverpassConfig,
}

impl OverpassClient {
    /// Create a new client; the query is built once up front
    pub fn new(config: OverpassConfig, area: SearchArea, filter: PlaceFilter) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("pizza-watch/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let endpoint = Url::parse(&config.endpoint)?;
        let query = build_query(&area, &filter, config.query_timeout_secs);

        Ok(Self {
            client,
            endpoint,
            query,
            config,
        })
    }

    /// Create a client with default configuration
    pub fn with_defaults(area: SearchArea, filter: PlaceFilter) -> Result<Self> {
        Self::new(OverpassConfig::default(), area, filter)
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    /// Run the query once without retrying
    async fn request_once(&self) -> Result<Vec<Place>> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .form(&[("data", self.query.as_str())])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(WatchError::Status {
                service: "Overpass API",
                status: status.as_u16(),
                body,
            });
        }

        let body = response.text().await?;
        let parsed: OverpassResponse = serde_json::from_str(&body)?;

        // Elements are partial or missing when the query was aborted
        if let Some(remark) = parsed
            .remark
            .as_deref()
            .filter(|r| r.trim_start().starts_with(RUNTIME_ERROR_REMARK))
        {
            return Err(WatchError::Remark(remark.to_string()));
        }

        Ok(parsed.into_places())
    }
}

#[async_trait]
impl PlaceSource for OverpassClient {
    async fn fetch_places(&self) -> Result<Vec<Place>> {
        let mut backoff = self.config.initial_backoff;
        let mut attempt = 0u32;

        loop {
            match self.request_once().await {
                Ok(places) => {
                    debug!(places = places.len(), attempt, "Overpass query succeeded");
                    return Ok(places);
                }
                Err(e) if e.is_transient() && attempt < self.config.max_retries => {
                    attempt += 1;
                    warn!(
                        error = %e,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        "Overpass request failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = next_backoff(backoff, self.config.max_backoff);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn next_backoff(current: Duration, max: Duration) -> Duration {
    std::cmp::min(current * 2, max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    const BODY: &str = r#"{
        "version": 0.6,
        "elements": [
            {"type": "node", "id": 1, "lat": 38.87, "lon": -77.05, "tags": {"name": "Pizza One", "cuisine": "pizza"}},
            {"type": "node", "id": 1, "lat": 38.87, "lon": -77.05, "tags": {"name": "Pizza One", "cuisine": "pizza"}},
            {"type": "way", "id": 1, "center": {"lat": 38.88, "lon": -77.06}, "tags": {"cuisine": "pizza"}},
            {"type": "area", "id": 9}
        ]
    }"#;

    fn test_config(endpoint: String) -> OverpassConfig {
        OverpassConfig {
            endpoint,
            request_timeout: Duration::from_secs(5),
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
            ..Default::default()
        }
    }

    #[test]
    fn test_into_places_dedups_by_kind_and_id() {
        let response: OverpassResponse = serde_json::from_str(BODY).unwrap();
        let places = response.into_places();

        assert_eq!(places.len(), 2);
        assert_eq!(places[0].id.to_string(), "node/1");
        assert_eq!(places[0].name, "Pizza One");
        assert_eq!(places[1].id.to_string(), "way/1");
        assert_eq!(places[1].name, UNKNOWN_NAME);
        assert_eq!(places[1].latitude, Some(38.88));
    }

    #[test]
    fn test_empty_response() {
        let response: OverpassResponse = serde_json::from_str("{}").unwrap();
        assert!(response.into_places().is_empty());
    }

    #[test]
    fn test_next_backoff_is_capped() {
        let max = Duration::from_secs(60);
        assert_eq!(next_backoff(Duration::from_secs(2), max), Duration::from_secs(4));
        assert_eq!(next_backoff(Duration::from_secs(40), max), max);
    }

    #[test]
    fn test_invalid_endpoint() {
        let config = test_config("not a url".to_string());
        let result = OverpassClient::new(config, SearchArea::default(), PlaceFilter::default());
        assert!(matches!(result, Err(WatchError::InvalidUrl(_))));
    }

    #[tokio::test]
    async fn test_fetch_places_posts_query() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/interpreter")
            .match_header("content-type", "application/x-www-form-urlencoded")
            .match_body(Matcher::Regex("^data=".to_string()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(BODY)
            .create_async()
            .await;

        let client = OverpassClient::new(
            test_config(format!("{}/api/interpreter", server.url())),
            SearchArea::default(),
            PlaceFilter::default(),
        )
        .unwrap();

        let places = client.fetch_places().await.unwrap();
        assert_eq!(places.len(), 2);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_fetch_places_retries_rate_limit() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/interpreter")
            .with_status(429)
            .with_body("rate limited")
            .expect(3)
            .create_async()
            .await;

        let client = OverpassClient::new(
            test_config(format!("{}/api/interpreter", server.url())),
            SearchArea::default(),
            PlaceFilter::default(),
        )
        .unwrap();

        let err = client.fetch_places().await.unwrap_err();
        assert!(matches!(err, WatchError::Status { status: 429, .. }));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_fetch_places_does_not_retry_bad_request() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/interpreter")
            .with_status(400)
            .with_body("parse error")
            .expect(1)
            .create_async()
            .await;

        let client = OverpassClient::new(
            test_config(format!("{}/api/interpreter", server.url())),
            SearchArea::default(),
            PlaceFilter::default(),
        )
        .unwrap();

        let err = client.fetch_places().await.unwrap_err();
        assert!(matches!(err, WatchError::Status { status: 400, .. }));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_fetch_places_recovers_after_server_error() {
        let mut server = mockito::Server::new_async().await;
        let unavailable = server
            .mock("POST", "/api/interpreter")
            .with_status(503)
            .with_body("dispatcher busy")
            .expect(1)
            .create_async()
            .await;
        let ok = server
            .mock("POST", "/api/interpreter")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(BODY)
            .expect(1)
            .create_async()
            .await;

        let client = OverpassClient::new(
            test_config(format!("{}/api/interpreter", server.url())),
            SearchArea::default(),
            PlaceFilter::default(),
        )
        .unwrap();

        let places = client.fetch_places().await.unwrap();
        assert_eq!(places.len(), 2);
        unavailable.assert_async().await;
        ok.assert_async().await;
    }

    #[tokio::test]
    async fn test_fetch_places_retries_connection_errors() {
        // Nothing listens on port 1
        let client = OverpassClient::new(
            test_config("http://127.0.0.1:1/api/interpreter".to_string()),
            SearchArea::default(),
            PlaceFilter::default(),
        )
        .unwrap();

        let err = client.fetch_places().await.unwrap_err();
        assert!(matches!(err, WatchError::Http(_)));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_fetch_places_treats_runtime_remark_as_failure() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/interpreter")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"elements": [], "remark": "runtime error: Query timed out in \"query\" at line 3 after 26 seconds."}"#,
            )
            .expect(3)
            .create_async()
            .await;

        let client = OverpassClient::new(
            test_config(format!("{}/api/interpreter", server.url())),
            SearchArea::default(),
            PlaceFilter::default(),
        )
        .unwrap();

        let err = client.fetch_places().await.unwrap_err();
        match err {
            WatchError::Remark(remark) => assert!(remark.contains("timed out")),
            other => panic!("expected a remark error, got {other:?}"),
        }
        mock.assert_async().await;
    }

    #[test]
    fn test_other_remarks_keep_elements() {
        let response: OverpassResponse = serde_json::from_str(
            r#"{"elements": [{"type": "node", "id": 5, "lat": 1.0, "lon": 2.0}], "remark": "note: results truncated"}"#,
        )
        .unwrap();
        assert_eq!(response.remark.as_deref(), Some("note: results truncated"));
        assert_eq!(response.into_places().len(), 1);
    }

    #[tokio::test]
    async fn test_fetch_places_rejects_malformed_json() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/interpreter")
            .with_status(200)
            .with_body("<html>busy</html>")
            .create_async()
            .await;

        let client = OverpassClient::new(
            test_config(format!("{}/api/interpreter", server.url())),
            SearchArea::default(),
            PlaceFilter::default(),
        )
        .unwrap();

        let err = client.fetch_places().await.unwrap_err();
        assert!(matches!(err, WatchError::Decode(_)));
    }
}
