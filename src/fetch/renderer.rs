//! Shared headless browser session for rendered fetches
//!
//! One browser process is launched lazily and reused by every rendered
//! fetch. Each fetch opens its own tab on the shared session, so only the
//! (re)launch is serialized. Before a session is handed out it is checked
//! for liveness and relaunched if the process or its event loop died.

use super::FetchOptions;
use crate::config::FetchConfig;
use crate::error::{Error, Result};

/// Settings fixed for the lifetime of a browser process
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub headless: bool,
    pub sandbox: bool,
    /// Budget for a single DevTools request
    pub request_timeout_ms: u64,
}

impl SessionSettings {
    pub fn from_config(config: &FetchConfig) -> Self {
        Self {
            headless: config.headless,
            sandbox: !config.no_sandbox,
            request_timeout_ms: config.navigation_timeout_ms,
        }
    }
}

/// DOM snapshot taken from a rendered tab
#[derive(Debug, Clone)]
pub struct RenderedPage {
    /// Final URL after any redirects
    pub url: String,
    pub html: String,
    pub render_time_ms: u64,
}

#[cfg(feature = "js-rendering")]
mod browser_impl {
    use super::*;
    use chromiumoxide::browser::{Browser, BrowserConfig};
    use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
    use chromiumoxide::Page;
    use futures::StreamExt;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::Mutex;
    use tokio::task::JoinHandle;
    use tokio::time::{timeout, Instant};
    use tracing::{debug, info, warn};

    const PING_TIMEOUT: Duration = Duration::from_secs(3);
    const SELECTOR_POLL: Duration = Duration::from_millis(250);

    struct LiveBrowser {
        browser: Arc<Browser>,
        handler: JoinHandle<()>,
    }

    /// Reconnect-aware handle to one headless browser process
    pub struct BrowserSession {
        settings: SessionSettings,
        state: Mutex<Option<LiveBrowser>>,
    }

    impl BrowserSession {
        pub fn new(settings: SessionSettings) -> Self {
            Self {
                settings,
                state: Mutex::new(None),
            }
        }

        async fn is_alive(live: &LiveBrowser) -> bool {
            if live.handler.is_finished() {
                return false;
            }
            matches!(timeout(PING_TIMEOUT, live.browser.version()).await, Ok(Ok(_)))
        }

        async fn launch(&self) -> Result<LiveBrowser> {
            info!("Launching headless browser");

            let mut builder = BrowserConfig::builder()
                .request_timeout(Duration::from_millis(self.settings.request_timeout_ms));

            if !self.settings.headless {
                builder = builder.with_head();
            }
            if !self.settings.sandbox {
                builder = builder.no_sandbox();
            }

            builder = builder
                .arg("--disable-gpu")
                .arg("--disable-dev-shm-usage")
                .arg("--no-first-run")
                .arg("--disable-extensions");

            let config = builder
                .build()
                .map_err(|e| Error::Rendering(format!("Invalid browser config: {}", e)))?;

            let (browser, mut handler) = Browser::launch(config)
                .await
                .map_err(|e| Error::Rendering(format!("Failed to launch browser: {}", e)))?;

            let handler = tokio::spawn(async move {
                while let Some(event) = handler.next().await {
                    if event.is_err() {
                        break;
                    }
                }
            });

            Ok(LiveBrowser {
                browser: Arc::new(browser),
                handler,
            })
        }

        /// Hand out the shared browser, relaunching it if it died
        async fn acquire(&self) -> Result<Arc<Browser>> {
            let mut state = self.state.lock().await;

            if let Some(live) = state.as_ref() {
                if Self::is_alive(live).await {
                    return Ok(live.browser.clone());
                }
                warn!("Browser session is no longer responding, relaunching");
                if let Some(dead) = state.take() {
                    dead.handler.abort();
                }
            }

            let live = self.launch().await?;
            let browser = live.browser.clone();
            *state = Some(live);
            Ok(browser)
        }

        async fn wait_for_selector(page: &Page, selector: &str, budget: Duration) {
            let found = timeout(budget, async {
                loop {
                    if page.find_element(selector).await.is_ok() {
                        return;
                    }
                    tokio::time::sleep(SELECTOR_POLL).await;
                }
            })
            .await;

            match found {
                Ok(()) => debug!("Found wait-for selector {}", selector),
                Err(_) => warn!(
                    "Selector {} did not appear within {:?}, continuing with current DOM",
                    selector, budget
                ),
            }
        }

        async fn snapshot(page: &Page, url: &str, opts: &FetchOptions) -> Result<RenderedPage> {
            let start = Instant::now();

            page.set_user_agent(opts.user_agent.as_str())
                .await
                .map_err(|e| Error::Rendering(format!("Failed to set user agent: {}", e)))?;
            page.execute(SetDeviceMetricsOverrideParams::new(
                i64::from(opts.viewport.width),
                i64::from(opts.viewport.height),
                1.0,
                false,
            ))
            .await
            .map_err(|e| Error::Rendering(format!("Failed to set viewport: {}", e)))?;

            timeout(opts.navigation_timeout, page.goto(url))
                .await
                .map_err(|_| {
                    Error::Timeout(format!(
                        "Navigation to {} exceeded {:?}",
                        url, opts.navigation_timeout
                    ))
                })?
                .map_err(|e| Error::Network(format!("Navigation to {} failed: {}", url, e)))?;

            if !opts.render_wait.is_zero() {
                tokio::time::sleep(opts.render_wait).await;
            }

            if let Some(selector) = &opts.wait_for_selector {
                Self::wait_for_selector(page, selector, opts.selector_wait).await;
            }

            let final_url = page
                .url()
                .await
                .map_err(|e| Error::Rendering(format!("Failed to read page URL: {}", e)))?
                .map(|u| u.to_string())
                .unwrap_or_else(|| url.to_string());

            let html = page
                .content()
                .await
                .map_err(|e| Error::Rendering(format!("Failed to read DOM: {}", e)))?;

            Ok(RenderedPage {
                url: final_url,
                html,
                render_time_ms: start.elapsed().as_millis() as u64,
            })
        }

        /// Render a URL in a fresh tab of the shared session
        pub async fn render(&self, url: &str, opts: &FetchOptions) -> Result<RenderedPage> {
            let browser = self.acquire().await?;
            debug!("Rendering {}", url);

            let page = browser
                .new_page("about:blank")
                .await
                .map_err(|e| Error::Rendering(format!("Failed to open tab: {}", e)))?;

            let result = Self::snapshot(&page, url, opts).await;

            if let Err(e) = page.close().await {
                warn!("Failed to close tab: {}", e);
            }

            if let Ok(rendered) = &result {
                debug!(
                    "Rendered {} in {}ms ({} bytes)",
                    url,
                    rendered.render_time_ms,
                    rendered.html.len()
                );
            }
            result
        }

        /// Shut the browser down; the next render relaunches it
        pub async fn close(&self) -> Result<()> {
            let mut state = self.state.lock().await;
            if let Some(live) = state.take() {
                match Arc::try_unwrap(live.browser) {
                    Ok(mut browser) => {
                        browser
                            .close()
                            .await
                            .map_err(|e| Error::Rendering(format!("Failed to close browser: {}", e)))?;
                    }
                    Err(_) => warn!("Tabs still open at shutdown, dropping browser handle"),
                }
                live.handler.abort();
            }
            Ok(())
        }
    }
}

#[cfg(feature = "js-rendering")]
pub use browser_impl::BrowserSession;

/// Placeholder session when the js-rendering feature is disabled
#[cfg(not(feature = "js-rendering"))]
pub struct BrowserSession {
    _settings: SessionSettings,
}

#[cfg(not(feature = "js-rendering"))]
impl BrowserSession {
    pub fn new(settings: SessionSettings) -> Self {
        Self { _settings: settings }
    }

    pub async fn render(&self, url: &str, _opts: &FetchOptions) -> Result<RenderedPage> {
        Err(Error::Rendering(format!(
            "JavaScript rendering not available for {}. \
             Compile with --features js-rendering to enable headless browser support.",
            url
        )))
    }

    pub async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Check if JS rendering feature is available
pub fn is_js_rendering_available() -> bool {
    cfg!(feature = "js-rendering")
}
