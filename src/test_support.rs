//! In-memory fakes shared by unit tests

use crate::error::{Error, Result};
use crate::fetch::{FetchOptions, FetchedPage, PageFetcher};
use crate::infer::{CompletionClient, CompletionRequest};
use crate::meta::FetchStrategy;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Clone)]
enum Canned {
    Html(String),
    Network(String),
    Timeout,
}

/// `PageFetcher` serving fixed HTML per URL
pub struct StaticPages {
    pages: Mutex<HashMap<String, Canned>>,
    delay: Duration,
    fetches: AtomicUsize,
}

impl StaticPages {
    pub fn new() -> Self {
        Self {
            pages: Mutex::new(HashMap::new()),
            delay: Duration::ZERO,
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn with_page(self, url: &str, html: &str) -> Self {
        self.set_page(url, html);
        self
    }

    pub fn with_network_error(self, url: &str, message: &str) -> Self {
        self.pages
            .lock()
            .unwrap()
            .insert(url.to_string(), Canned::Network(message.to_string()));
        self
    }

    pub fn with_timeout(self, url: &str) -> Self {
        self.pages.lock().unwrap().insert(url.to_string(), Canned::Timeout);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn set_page(&self, url: &str, html: &str) {
        self.pages
            .lock()
            .unwrap()
            .insert(url.to_string(), Canned::Html(html.to_string()));
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    async fn serve(&self, url: &str, method: FetchStrategy) -> Result<FetchedPage> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let canned = self.pages.lock().unwrap().get(url).cloned();
        match canned {
            Some(Canned::Html(html)) => Ok(FetchedPage {
                url: url.to_string(),
                final_url: url.to_string(),
                html,
                status: Some(200),
                elapsed_ms: 1,
                method,
            }),
            Some(Canned::Network(message)) => Err(Error::Network(message)),
            Some(Canned::Timeout) => Err(Error::Timeout(format!("navigation to {} timed out", url))),
            None => Err(Error::Network(format!("HTTP 404 Not Found: {}", url))),
        }
    }
}

#[async_trait]
impl PageFetcher for StaticPages {
    async fn fetch_static(&self, url: &str, _opts: &FetchOptions) -> Result<FetchedPage> {
        self.serve(url, FetchStrategy::Static).await
    }

    async fn fetch_rendered(&self, url: &str, _opts: &FetchOptions) -> Result<FetchedPage> {
        self.serve(url, FetchStrategy::Rendered).await
    }
}

/// Completion client returning one canned answer and recording prompts
pub struct CannedClient {
    answer: std::result::Result<String, String>,
    pub prompts: Mutex<Vec<CompletionRequest>>,
}

impl CannedClient {
    pub fn answering(answer: &str) -> Self {
        Self {
            answer: Ok(answer.to_string()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            answer: Err(message.to_string()),
            prompts: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl CompletionClient for CannedClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        self.prompts.lock().unwrap().push(request.clone());
        self.answer.clone().map_err(Error::ModelOutput)
    }

    fn model_name(&self) -> &str {
        "canned"
    }
}

/// Listing with eight article links inside a div and one nav link outside
pub fn eight_article_listing() -> String {
    let articles: String = (1..=8)
        .map(|i| format!("<article><a href=\"/a{}\">Story number {}</a></article>", i, i))
        .collect();
    format!(
        "<html><body><nav><a href=\"/about\">About</a></nav><div class=\"list\">{}</div></body></html>",
        articles
    )
}
