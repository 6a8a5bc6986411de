use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;
use thiserror::Error;
use url::Url;

use super::model::{CatalogPage, RawResponse, Video};
use crate::util::validate_base_url;

/// Fixed page size for every paginated catalog request.
pub const PAGE_SIZE: u32 = 10;

/// Public endpoint of the video catalog.
pub const DEFAULT_BASE_URL: &str = "https://pixabay.com/api/videos/";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Request timed out after {0}s")]
    Timeout(u64),
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    #[error("Malformed catalog response: {0}")]
    Decode(String),
    #[error("Video {0} not found")]
    NotFound(String),
    #[error("Invalid query: {0}")]
    InvalidQuery(&'static str),
    #[error("Invalid catalog base URL: {0}")]
    InvalidBaseUrl(String),
}

/// Client for the public video catalog.
///
/// Every call is a single request: no retry, no backoff. Failures come back
/// as `Err` and the client never panics past its boundary.
///
/// Cloning is cheap (the underlying `reqwest::Client` is reference-counted).
#[derive(Clone)]
pub struct CatalogClient {
    http: reqwest::Client,
    base_url: Url,
    api_key: SecretString,
    timeout: Duration,
}

impl std::fmt::Debug for CatalogClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogClient")
            .field("base_url", &self.base_url.as_str())
            .field("api_key", &"[REDACTED]")
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl CatalogClient {
    /// Create a client for the catalog at `base_url`.
    ///
    /// The base URL must be HTTPS; plain HTTP is accepted for loopback hosts only.
    pub fn new(
        http: reqwest::Client,
        base_url: &str,
        api_key: SecretString,
    ) -> Result<Self, CatalogError> {
        let base_url =
            validate_base_url(base_url).map_err(|e| CatalogError::InvalidBaseUrl(e.to_string()))?;
        Ok(Self {
            http,
            base_url,
            api_key,
            timeout: DEFAULT_TIMEOUT,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Page `page` (1-based) of the catalog ordered by popularity.
    pub async fn fetch_popular(&self, page: u32) -> Result<CatalogPage, CatalogError> {
        check_page(page)?;
        let raw = self
            .request(&[
                ("order", "popular".to_string()),
                ("per_page", PAGE_SIZE.to_string()),
                ("page", page.to_string()),
            ])
            .await?;
        Ok(into_page(page, raw))
    }

    /// Page `page` (1-based) of videos matching a free-text query.
    pub async fn search(&self, query: &str, page: u32) -> Result<CatalogPage, CatalogError> {
        check_page(page)?;
        let query = query.trim();
        if query.is_empty() {
            return Err(CatalogError::InvalidQuery("search query is empty"));
        }
        // The catalog rejects queries over 100 characters
        if query.chars().count() > 100 {
            return Err(CatalogError::InvalidQuery("search query exceeds 100 characters"));
        }
        let raw = self
            .request(&[
                ("q", query.to_string()),
                ("per_page", PAGE_SIZE.to_string()),
                ("page", page.to_string()),
            ])
            .await?;
        Ok(into_page(page, raw))
    }

    /// The single video with identifier `id`.
    pub async fn get_by_id(&self, id: &str) -> Result<Video, CatalogError> {
        let id = id.trim();
        if id.is_empty() || !id.bytes().all(|b| b.is_ascii_digit()) {
            return Err(CatalogError::InvalidQuery("video id must be numeric"));
        }
        let raw = self.request(&[("id", id.to_string())]).await?;
        raw.hits
            .into_iter()
            .next()
            .map(Video::from)
            .ok_or_else(|| CatalogError::NotFound(id.to_string()))
    }

    /// Popular videos to suggest next to `exclude_id`, which is left out.
    pub async fn suggestions(&self, exclude_id: &str) -> Result<Vec<Video>, CatalogError> {
        let page = self.fetch_popular(1).await?;
        Ok(page
            .videos
            .into_iter()
            .filter(|v| v.id != exclude_id)
            .collect())
    }

    async fn request(&self, params: &[(&str, String)]) -> Result<RawResponse, CatalogError> {
        tracing::debug!(params = ?params, "Catalog request");

        let request = self
            .http
            .get(self.base_url.clone())
            .query(&[("key", self.api_key.expose_secret())])
            .query(params);

        let response = tokio::time::timeout(self.timeout, request.send())
            .await
            .map_err(|_| CatalogError::Timeout(self.timeout.as_secs()))?
            .map_err(CatalogError::Network)?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(status = status.as_u16(), "Catalog request failed");
            return Err(CatalogError::HttpStatus(status.as_u16()));
        }

        let body = tokio::time::timeout(self.timeout, response.bytes())
            .await
            .map_err(|_| CatalogError::Timeout(self.timeout.as_secs()))?
            .map_err(CatalogError::Network)?;

        serde_json::from_slice(&body).map_err(|e| CatalogError::Decode(e.to_string()))
    }
}

fn check_page(page: u32) -> Result<(), CatalogError> {
    if page == 0 {
        return Err(CatalogError::InvalidQuery("pages start at 1"));
    }
    Ok(())
}

fn into_page(page: u32, raw: RawResponse) -> CatalogPage {
    let videos: Vec<Video> = raw.hits.into_iter().map(Video::from).collect();
    tracing::debug!(page = page, count = videos.len(), "Catalog page received");
    CatalogPage {
        page,
        total_hits: raw.total_hits,
        videos,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn hit(id: u64, tags: &str) -> serde_json::Value {
        json!({
            "id": id,
            "tags": tags,
            "user": "someone",
            "userImageURL": "",
            "views": 10,
            "likes": 1,
            "videos": { "tiny": { "url": format!("https://cdn.example.com/{id}.mp4"), "thumbnail": "" } }
        })
    }

    async fn client_for(server: &MockServer) -> CatalogClient {
        CatalogClient::new(
            reqwest::Client::new(),
            &server.uri(),
            SecretString::from("test-key"),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_fetch_popular_sends_fixed_page_size() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("key", "test-key"))
            .and(query_param("order", "popular"))
            .and(query_param("per_page", "10"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "total": 500, "totalHits": 500,
                "hits": [hit(1, "nature, lake"), hit(2, "city")]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let page = client_for(&server).await.fetch_popular(2).await.unwrap();
        assert_eq!(page.page, 2);
        assert_eq!(page.total_hits, 500);
        let ids: Vec<_> = page.videos.iter().map(|v| v.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2"]);
        assert_eq!(page.videos[0].category, "Nature");
    }

    #[tokio::test]
    async fn test_search_sends_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("q", "red fox"))
            .and(query_param("page", "1"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"totalHits": 1, "hits": [hit(9, "fox, animals")]})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let page = client_for(&server).await.search("  red fox ", 1).await.unwrap();
        assert_eq!(page.videos.len(), 1);
        assert_eq!(page.videos[0].category, "Animals");
    }

    #[tokio::test]
    async fn test_invalid_inputs_never_hit_network() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        assert!(matches!(
            client.fetch_popular(0).await,
            Err(CatalogError::InvalidQuery(_))
        ));
        assert!(matches!(
            client.search("   ", 1).await,
            Err(CatalogError::InvalidQuery(_))
        ));
        assert!(matches!(
            client.search(&"x".repeat(101), 1).await,
            Err(CatalogError::InvalidQuery(_))
        ));
        assert!(matches!(
            client.get_by_id("12; drop").await,
            Err(CatalogError::InvalidQuery(_))
        ));
    }

    #[tokio::test]
    async fn test_get_by_id_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("id", "42"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"totalHits": 1, "hits": [hit(42, "music")]})),
            )
            .mount(&server)
            .await;

        let video = client_for(&server).await.get_by_id("42").await.unwrap();
        assert_eq!(video.id, "42");
        assert_eq!(video.category, "Music");
    }

    #[tokio::test]
    async fn test_get_by_id_empty_hits_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"totalHits": 0, "hits": []})))
            .mount(&server)
            .await;

        let result = client_for(&server).await.get_by_id("404").await;
        assert!(matches!(result, Err(CatalogError::NotFound(id)) if id == "404"));
    }

    #[tokio::test]
    async fn test_http_error_maps_to_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429))
            .expect(1)
            .mount(&server)
            .await;

        // single attempt, no retry
        let result = client_for(&server).await.fetch_popular(1).await;
        assert!(matches!(result, Err(CatalogError::HttpStatus(429))));
    }

    #[tokio::test]
    async fn test_malformed_body_maps_to_decode() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        let result = client_for(&server).await.fetch_popular(1).await;
        assert!(matches!(result, Err(CatalogError::Decode(_))));
    }

    #[tokio::test]
    async fn test_slow_response_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"hits": []}))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let client = client_for(&server)
            .await
            .with_timeout(Duration::from_millis(50));
        assert!(matches!(
            client.fetch_popular(1).await,
            Err(CatalogError::Timeout(_))
        ));
    }

    #[tokio::test]
    async fn test_suggestions_exclude_current_video() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("order", "popular"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "hits": [hit(1, "a"), hit(2, "b"), hit(3, "c")]
            })))
            .mount(&server)
            .await;

        let suggestions = client_for(&server).await.suggestions("2").await.unwrap();
        let ids: Vec<_> = suggestions.iter().map(|v| v.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "3"]);
    }

    #[test]
    fn test_insecure_base_url_rejected() {
        let result = CatalogClient::new(
            reqwest::Client::new(),
            "http://pixabay.com/api/videos/",
            SecretString::from("k"),
        );
        assert!(matches!(result, Err(CatalogError::InvalidBaseUrl(_))));
    }

    #[test]
    fn test_debug_redacts_key() {
        let client = CatalogClient::new(
            reqwest::Client::new(),
            DEFAULT_BASE_URL,
            SecretString::from("very-secret"),
        )
        .unwrap();
        let out = format!("{:?}", client);
        assert!(!out.contains("very-secret"));
    }
}
