//! HTTP client for watch pages and player scripts

use crate::error::ResolveError;
use async_trait::async_trait;
use reqwest::{Client, ClientBuilder};
use std::time::Duration;
use tracing::{debug, warn};

const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64; rv:109.0) Gecko/20100101 Firefox/115.0";

/// Body and status of a completed request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fetched {
    pub status: u16,
    pub body: String,
}

impl Fetched {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Check for a 2xx status
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Source of page and script text.
///
/// Transport errors are returned as `Err`; HTTP error statuses come back as
/// a `Fetched` for the caller to judge.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Fetched, ResolveError>;
}

/// HTTP client configuration
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Request timeout
    pub timeout: Duration,
    /// User agent string
    pub user_agent: Option<String>,
    /// Proxy URL
    pub proxy_url: Option<String>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: None,
            proxy_url: None,
        }
    }
}

/// reqwest-backed fetcher
#[derive(Debug, Clone)]
pub struct VideoClient {
    client: Client,
    config: HttpClientConfig,
}

impl VideoClient {
    /// Create a new client with default configuration
    pub fn new() -> Result<Self, ResolveError> {
        Self::with_config(HttpClientConfig::default())
    }

    /// Create a new client with custom configuration
    pub fn with_config(config: HttpClientConfig) -> Result<Self, ResolveError> {
        let mut builder = ClientBuilder::new()
            .timeout(config.timeout)
            .gzip(true)
            .brotli(true)
            .user_agent(config.user_agent.as_deref().unwrap_or(DEFAULT_USER_AGENT));

        if let Some(proxy_url) = &config.proxy_url {
            match reqwest::Proxy::all(proxy_url) {
                Ok(proxy) => builder = builder.proxy(proxy),
                Err(e) => warn!("Ignoring invalid proxy {}: {}", proxy_url, e),
            }
        }

        Ok(Self {
            client: builder.build()?,
            config,
        })
    }

    /// Get the underlying HTTP client
    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn config(&self) -> &HttpClientConfig {
        &self.config
    }

    /// Create a GET request with browser-like headers
    pub fn create_request(&self, url: &str) -> reqwest::RequestBuilder {
        self.client
            .get(url)
            .header("Accept", "*/*")
            .header("Accept-Language", "en-US,en;q=0.9")
            .header("Connection", "keep-alive")
            .header("Cache-Control", "no-cache")
    }
}

#[async_trait]
impl Fetcher for VideoClient {
    async fn fetch(&self, url: &str) -> Result<Fetched, ResolveError> {
        debug!("GET {}", url);
        let response = self.create_request(url).send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        debug!("GET {} -> {} ({} bytes)", url, status, body.len());
        Ok(Fetched { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_client_config_default() {
        let config = HttpClientConfig::default();
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert!(config.user_agent.is_none());
        assert!(config.proxy_url.is_none());
    }

    #[test]
    fn test_client_with_config() {
        let config = HttpClientConfig {
            timeout: Duration::from_secs(60),
            user_agent: Some("Custom Agent".to_string()),
            proxy_url: None,
        };

        let client = VideoClient::with_config(config).unwrap();
        assert_eq!(client.config().timeout, Duration::from_secs(60));
        assert_eq!(client.config().user_agent, Some("Custom Agent".to_string()));
    }

    #[test]
    fn test_client_ignores_invalid_proxy() {
        let config = HttpClientConfig {
            proxy_url: Some("::not a proxy::".to_string()),
            ..HttpClientConfig::default()
        };
        assert!(VideoClient::with_config(config).is_ok());
    }

    #[test]
    fn test_fetched_is_success() {
        assert!(Fetched::new(200, "").is_success());
        assert!(Fetched::new(204, "").is_success());
        assert!(!Fetched::new(404, "").is_success());
        assert!(!Fetched::new(503, "").is_success());
    }

    #[tokio::test]
    async fn test_fetch_returns_body_and_status() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/watch")
            .match_query(mockito::Matcher::UrlEncoded("v".into(), "abc".into()))
            .with_status(200)
            .with_body("<html>page</html>")
            .create_async()
            .await;

        let client = VideoClient::new().unwrap();
        let fetched = client
            .fetch(&format!("{}/watch?v=abc", server.url()))
            .await
            .unwrap();

        mock.assert_async().await;
        assert!(fetched.is_success());
        assert_eq!(fetched.body, "<html>page</html>");
    }

    #[tokio::test]
    async fn test_fetch_error_status_is_not_err() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/missing.js")
            .with_status(404)
            .with_body("not found")
            .create_async()
            .await;

        let client = VideoClient::new().unwrap();
        let fetched = client
            .fetch(&format!("{}/missing.js", server.url()))
            .await
            .unwrap();

        assert_eq!(fetched.status, 404);
        assert!(!fetched.is_success());
    }

    #[tokio::test]
    async fn test_fetch_sends_user_agent() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/ua")
            .match_header("user-agent", "tuberesolve-test")
            .with_status(200)
            .create_async()
            .await;

        let client = VideoClient::with_config(HttpClientConfig {
            user_agent: Some("tuberesolve-test".to_string()),
            ..HttpClientConfig::default()
        })
        .unwrap();
        client.fetch(&format!("{}/ua", server.url())).await.unwrap();

        mock.assert_async().await;
    }
}
