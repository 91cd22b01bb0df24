//! Page retrieval for listing and article pages
//!
//! This module provides:
//! - The `PageFetcher` seam used by discovery, validation and onboarding
//! - Static fetches over plain HTTP with per-host pacing
//! - Rendered fetches through a shared headless browser session

mod rate_limit;
mod renderer;

pub use rate_limit::*;
pub use renderer::*;

use crate::config::FetchConfig;
use crate::error::{Error, Result};
use crate::meta::{FetchStrategy, SiteConfig};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use url::Url;

/// Browser window size used for rendered fetches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

/// Per-call fetch options
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Element a rendered fetch waits for; absence is tolerated
    pub wait_for_selector: Option<String>,
    /// Static request timeout
    pub timeout: Duration,
    pub navigation_timeout: Duration,
    pub selector_wait: Duration,
    /// Settle time after navigation for late scripts
    pub render_wait: Duration,
    pub user_agent: String,
    pub viewport: Viewport,
}

impl FetchOptions {
    pub fn from_config(config: &FetchConfig) -> Self {
        Self {
            wait_for_selector: None,
            timeout: Duration::from_secs(config.timeout_secs),
            navigation_timeout: Duration::from_millis(config.navigation_timeout_ms),
            selector_wait: Duration::from_millis(config.selector_wait_ms),
            render_wait: Duration::from_millis(config.render_wait_ms),
            user_agent: config.user_agent.clone(),
            viewport: Viewport {
                width: config.viewport_width,
                height: config.viewport_height,
            },
        }
    }

    /// Options for a site's listing page
    pub fn for_site(config: &FetchConfig, site: &SiteConfig) -> Self {
        Self::from_config(config).with_wait_for(site.wait_for_selector.clone())
    }

    pub fn with_wait_for(mut self, selector: Option<String>) -> Self {
        self.wait_for_selector = selector.filter(|s| !s.trim().is_empty());
        self
    }
}

/// HTML plus fetch metadata
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// URL that was requested
    pub url: String,
    /// URL after redirects
    pub final_url: String,
    pub html: String,
    /// HTTP status; rendered fetches do not observe one
    pub status: Option<u16>,
    pub elapsed_ms: u64,
    /// Method actually used, which may differ from the requested strategy
    pub method: FetchStrategy,
}

/// Source of page HTML
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch_static(&self, url: &str, opts: &FetchOptions) -> Result<FetchedPage>;

    async fn fetch_rendered(&self, url: &str, opts: &FetchOptions) -> Result<FetchedPage>;

    async fn fetch(&self, url: &str, strategy: FetchStrategy, opts: &FetchOptions) -> Result<FetchedPage> {
        match strategy {
            FetchStrategy::Static => self.fetch_static(url, opts).await,
            FetchStrategy::Rendered => self.fetch_rendered(url, opts).await,
        }
    }
}

/// Production fetcher: reqwest for static pages, a shared browser for rendered ones
pub struct HttpFetcher {
    client: Client,
    hosts: HostRateLimiters,
    browser: BrowserSession,
}

impl HttpFetcher {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_secs))
            .gzip(true)
            .brotli(true)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            hosts: HostRateLimiters::new(config.rate_limit_per_host),
            browser: BrowserSession::new(SessionSettings::from_config(config)),
        })
    }

    /// Shut down the shared browser session, if one was launched
    pub async fn close(&self) -> Result<()> {
        self.browser.close().await
    }
}

fn parse_target(url: &str) -> Result<Url> {
    let parsed = Url::parse(url)?;
    match parsed.scheme() {
        "http" | "https" => {}
        other => {
            return Err(Error::Network(format!(
                "Unsupported scheme '{}' for {}",
                other, url
            )))
        }
    }
    if parsed.host_str().is_none() {
        return Err(Error::Network(format!("URL has no host: {}", url)));
    }
    Ok(parsed)
}

/// Bot-protection pages served with 403
fn looks_like_challenge(body: &str) -> bool {
    let lower = body.to_lowercase();
    ["captcha", "cf-chl", "challenge-platform", "are you a robot", "access denied"]
        .iter()
        .any(|marker| lower.contains(marker))
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch_static(&self, url: &str, opts: &FetchOptions) -> Result<FetchedPage> {
        let target = parse_target(url)?;
        if let Some(host) = target.host_str() {
            self.hosts.wait(host).await;
        }

        debug!("Fetching (static): {}", url);
        let start = Instant::now();

        let response = self
            .client
            .get(target)
            .header(reqwest::header::USER_AGENT, &opts.user_agent)
            .timeout(opts.timeout)
            .send()
            .await?;

        let status = response.status();
        let final_url = response.url().to_string();

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(Error::RateLimited(format!("HTTP {}: {}", status, url)));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if status == StatusCode::FORBIDDEN && looks_like_challenge(&body) {
                return Err(Error::RateLimited(format!(
                    "HTTP {} bot challenge: {}",
                    status, url
                )));
            }
            return Err(Error::Network(format!("HTTP {}: {}", status, url)));
        }

        let html = response.text().await?;
        let elapsed_ms = start.elapsed().as_millis() as u64;
        debug!("Fetched {} bytes from {} in {}ms", html.len(), url, elapsed_ms);

        Ok(FetchedPage {
            url: url.to_string(),
            final_url,
            html,
            status: Some(status.as_u16()),
            elapsed_ms,
            method: FetchStrategy::Static,
        })
    }

    async fn fetch_rendered(&self, url: &str, opts: &FetchOptions) -> Result<FetchedPage> {
        parse_target(url)?;

        if !is_js_rendering_available() {
            warn!(
                "JS rendering not compiled in, using static content for {}",
                url
            );
            return self.fetch_static(url, opts).await;
        }

        let start = Instant::now();
        let rendered = self.browser.render(url, opts).await?;

        Ok(FetchedPage {
            url: url.to_string(),
            final_url: rendered.url,
            html: rendered.html,
            status: None,
            elapsed_ms: start.elapsed().as_millis() as u64,
            method: FetchStrategy::Rendered,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_config() -> FetchConfig {
        let mut config = FetchConfig::default();
        config.rate_limit_per_host = 1000.0;
        config.timeout_secs = 5;
        config
    }

    #[tokio::test]
    async fn test_static_fetch_returns_html_and_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/news"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(b"<html><body>hi</body></html>".to_vec(), "text/html"),
            )
            .mount(&server)
            .await;

        let config = fast_config();
        let fetcher = HttpFetcher::new(&config).unwrap();
        let url = format!("{}/news", server.uri());

        let page = fetcher
            .fetch(&url, FetchStrategy::Static, &FetchOptions::from_config(&config))
            .await
            .unwrap();

        assert_eq!(page.status, Some(200));
        assert_eq!(page.method, FetchStrategy::Static);
        assert!(page.html.contains("hi"));
    }

    #[tokio::test]
    async fn test_static_fetch_maps_status_codes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/throttled"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/challenge"))
            .respond_with(
                ResponseTemplate::new(403)
                    .set_body_raw(b"<div class=\"captcha\">verify</div>".to_vec(), "text/html"),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/gone"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let config = fast_config();
        let fetcher = HttpFetcher::new(&config).unwrap();
        let opts = FetchOptions::from_config(&config);

        let err = fetcher
            .fetch_static(&format!("{}/throttled", server.uri()), &opts)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RateLimited(_)));

        let err = fetcher
            .fetch_static(&format!("{}/challenge", server.uri()), &opts)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RateLimited(_)));

        let err = fetcher
            .fetch_static(&format!("{}/gone", server.uri()), &opts)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Network(_)));
    }

    #[tokio::test]
    async fn test_static_fetch_timeout_is_typed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/slow"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
            .mount(&server)
            .await;

        let config = fast_config();
        let fetcher = HttpFetcher::new(&config).unwrap();
        let mut opts = FetchOptions::from_config(&config);
        opts.timeout = Duration::from_millis(200);

        let err = fetcher
            .fetch_static(&format!("{}/slow", server.uri()), &opts)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_rejects_non_http_schemes() {
        let config = fast_config();
        let fetcher = HttpFetcher::new(&config).unwrap();
        let opts = FetchOptions::from_config(&config);

        assert!(fetcher.fetch_static("ftp://example.com/file", &opts).await.is_err());
        assert!(fetcher.fetch_rendered("mailto:someone@example.com", &opts).await.is_err());
    }

    #[cfg(not(feature = "js-rendering"))]
    #[tokio::test]
    async fn test_rendered_falls_back_to_static_without_browser() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/spa"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(b"<div id=\"app\"></div>".to_vec(), "text/html"),
            )
            .mount(&server)
            .await;

        let config = fast_config();
        let fetcher = HttpFetcher::new(&config).unwrap();
        let page = fetcher
            .fetch_rendered(&format!("{}/spa", server.uri()), &FetchOptions::from_config(&config))
            .await
            .unwrap();

        assert_eq!(page.method, FetchStrategy::Static);
        assert!(page.html.contains("app"));
    }

    #[test]
    fn test_blank_wait_selector_is_ignored() {
        let opts = FetchOptions::from_config(&FetchConfig::default()).with_wait_for(Some("  ".to_string()));
        assert!(opts.wait_for_selector.is_none());
    }
}
