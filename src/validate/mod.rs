//! Live validation of proposed selectors
//!
//! Order of checks:
//! 1. Syntax, before any network call
//! 2. Execution against a rendered fetch of the target page
//! 3. Yield thresholds (listing URLs, title and body length)
//!
//! Only a passing check produces a `ValidatedListingSelector` or
//! `ValidatedContentSelectors`, the sole inputs the metadata store accepts
//! for selector write-back.

mod specificity;

pub use specificity::specificity_score;

use crate::config::ValidationConfig;
use crate::discovery::{canonicalize_url, element_text, extract_listing_links, resolve_href};
use crate::error::Result;
use crate::fetch::{FetchOptions, PageFetcher};
use crate::meta::{ContentSelectors, ListingSelectors};
use scraper::{Html, Selector};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

/// Characters that have no business in a CSS selector
const FORBIDDEN_CHARS: &[char] = &['<', '{', '}', ';', '`', '\0'];

/// Syntax check run before anything touches the network
pub fn check_syntax(selector: &str) -> std::result::Result<Selector, String> {
    let trimmed = selector.trim();
    if trimmed.is_empty() {
        return Err("selector is empty".to_string());
    }
    if let Some(c) = trimmed.chars().find(|c| FORBIDDEN_CHARS.contains(c)) {
        return Err(format!("selector contains forbidden character {:?}", c));
    }
    let lower = trimmed.to_ascii_lowercase();
    if lower.contains("javascript:") || lower.contains("expression(") {
        return Err("selector contains script content".to_string());
    }

    let first = trimmed.chars().next().unwrap_or(' ');
    if !(first.is_ascii_alphabetic() || matches!(first, '#' | '.' | '[' | '*' | ':' | '_')) {
        return Err(format!(
            "selector must start with a tag, id, class, attribute or pseudo-class, found {:?}",
            first
        ));
    }

    Selector::parse(trimmed).map_err(|e| format!("invalid selector: {}", e))
}

/// A listing selector that met the yield threshold on a live page
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidatedListingSelector {
    selector: String,
    count: usize,
    specificity: u8,
}

impl ValidatedListingSelector {
    pub fn selector(&self) -> &str {
        &self.selector
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn specificity(&self) -> u8 {
        self.specificity
    }
}

/// Content selectors that extracted a long enough title and body
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidatedContentSelectors {
    selectors: ContentSelectors,
}

impl ValidatedContentSelectors {
    pub fn selectors(&self) -> &ContentSelectors {
        &self.selectors
    }
}

/// Result of validating a listing selector
#[derive(Debug, Clone, Serialize)]
pub struct ListingValidation {
    pub valid: bool,
    pub urls: Vec<String>,
    pub count: usize,
    pub message: String,
    pub specificity_score: u8,
    #[serde(skip)]
    validated: Option<ValidatedListingSelector>,
}

impl ListingValidation {
    pub fn validated(&self) -> Option<&ValidatedListingSelector> {
        self.validated.as_ref()
    }

    pub fn into_validated(self) -> Option<ValidatedListingSelector> {
        self.validated
    }
}

/// Values a content selector set pulled out of an article
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExtractedData {
    pub title: Option<String>,
    pub content: Option<String>,
    pub image: Option<String>,
    pub date: Option<String>,
    pub author: Option<String>,
    pub category: Option<String>,
    pub tags: Vec<String>,
}

/// Result of validating content selectors
#[derive(Debug, Clone, Serialize)]
pub struct ContentValidation {
    pub valid: bool,
    pub extracted: ExtractedData,
    pub message: String,
    #[serde(skip)]
    validated: Option<ValidatedContentSelectors>,
}

impl ContentValidation {
    pub fn validated(&self) -> Option<&ValidatedContentSelectors> {
        self.validated.as_ref()
    }

    pub fn into_validated(self) -> Option<ValidatedContentSelectors> {
        self.validated
    }
}

fn listing_rejected(message: String, specificity_score: u8) -> ListingValidation {
    ListingValidation {
        valid: false,
        urls: Vec::new(),
        count: 0,
        message,
        specificity_score,
        validated: None,
    }
}

/// Apply a listing selector to fetched HTML and enforce the URL threshold
pub fn evaluate_listing(html: &str, page_url: &Url, selector: &str, thresholds: &ValidationConfig) -> ListingValidation {
    let specificity = specificity_score(selector, thresholds.max_selector_depth);

    if let Err(reason) = check_syntax(selector) {
        return listing_rejected(format!("Syntax check failed: {}", reason), specificity);
    }

    let selectors = ListingSelectors {
        link: selector.trim().to_string(),
        ..ListingSelectors::default()
    };
    let extract = match extract_listing_links(html, &selectors) {
        Ok(extract) => extract,
        Err(e) => return listing_rejected(format!("Syntax check failed: {}", e), specificity),
    };

    if extract.matched == 0 {
        return listing_rejected(format!("Selector '{}' matched no elements", selector), specificity);
    }

    let mut urls: Vec<String> = Vec::new();
    for href in extract.links.iter().filter_map(|l| l.href.as_deref()) {
        match resolve_href(page_url, href) {
            Ok(url) => {
                let canonical = canonicalize_url(&url);
                if !urls.contains(&canonical) {
                    urls.push(canonical);
                }
            }
            Err(e) => debug!("Unusable href '{}': {}", href, e),
        }
    }

    let count = urls.len();
    if count < thresholds.min_listing_urls {
        return ListingValidation {
            valid: false,
            message: format!(
                "Yield check failed: selector matched {} element(s) but only {} resolvable URL(s); at least {} required",
                extract.matched, count, thresholds.min_listing_urls
            ),
            urls,
            count,
            specificity_score: specificity,
            validated: None,
        };
    }

    ListingValidation {
        valid: true,
        message: format!("Selector matched {} article URLs", count),
        validated: Some(ValidatedListingSelector {
            selector: selector.trim().to_string(),
            count,
            specificity,
        }),
        urls,
        count,
        specificity_score: specificity,
    }
}

fn first_text(document: &Html, selector: &Selector) -> Option<String> {
    document.select(selector).find_map(element_text)
}

fn joined_text(document: &Html, selector: &Selector) -> Option<String> {
    let parts: Vec<String> = document.select(selector).filter_map(element_text).collect();
    (!parts.is_empty()).then(|| parts.join("\n\n"))
}

/// Best-effort extraction for an optional field; failures yield `None`
fn optional_field<T>(
    document: &Html,
    selector: Option<&str>,
    field: &str,
    read: impl Fn(&Html, &Selector) -> Option<T>,
) -> (Option<T>, Option<String>) {
    let Some(raw) = selector.map(str::trim).filter(|s| !s.is_empty()) else {
        return (None, None);
    };
    match check_syntax(raw) {
        Ok(parsed) => (read(document, &parsed), Some(raw.to_string())),
        Err(reason) => {
            debug!("Dropping {} selector '{}': {}", field, raw, reason);
            (None, None)
        }
    }
}

fn image_value(document: &Html, selector: &Selector) -> Option<String> {
    document.select(selector).find_map(|el| {
        ["src", "data-src", "content"]
            .iter()
            .find_map(|attr| el.value().attr(attr))
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    })
}

fn date_value(document: &Html, selector: &Selector) -> Option<String> {
    document.select(selector).find_map(|el| {
        el.value()
            .attr("datetime")
            .or_else(|| el.value().attr("content"))
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .or_else(|| element_text(el))
    })
}

fn tag_values(document: &Html, selector: &Selector) -> Option<Vec<String>> {
    let tags: Vec<String> = document.select(selector).filter_map(element_text).collect();
    (!tags.is_empty()).then_some(tags)
}

fn content_rejected(message: String, extracted: ExtractedData) -> ContentValidation {
    ContentValidation {
        valid: false,
        extracted,
        message,
        validated: None,
    }
}

/// Apply content selectors to fetched HTML and enforce the length thresholds
pub fn evaluate_content(html: &str, selectors: &ContentSelectors, thresholds: &ValidationConfig) -> ContentValidation {
    let document = Html::parse_document(html);
    let mut extracted = ExtractedData::default();

    let title_raw = selectors.title.as_deref().map(str::trim).unwrap_or_default();
    let body_raw = selectors.body.as_deref().map(str::trim).unwrap_or_default();

    let title_selector = match check_syntax(title_raw) {
        Ok(sel) => sel,
        Err(reason) => return content_rejected(format!("Title selector rejected: {}", reason), extracted),
    };
    let body_selector = match check_syntax(body_raw) {
        Ok(sel) => sel,
        Err(reason) => return content_rejected(format!("Body selector rejected: {}", reason), extracted),
    };

    extracted.title = first_text(&document, &title_selector);
    extracted.content = joined_text(&document, &body_selector);

    let (image, image_sel) = optional_field(&document, selectors.image.as_deref(), "image", image_value);
    let (date, date_sel) = optional_field(&document, selectors.date.as_deref(), "date", date_value);
    let (author, author_sel) = optional_field(&document, selectors.author.as_deref(), "author", first_text);
    let (category, category_sel) =
        optional_field(&document, selectors.category.as_deref(), "category", first_text);
    let (tags, tags_sel) = optional_field(&document, selectors.tags.as_deref(), "tags", tag_values);

    extracted.image = image;
    extracted.date = date;
    extracted.author = author;
    extracted.category = category;
    extracted.tags = tags.unwrap_or_default();

    let title_len = extracted.title.as_deref().map(|t| t.chars().count()).unwrap_or(0);
    if title_len < thresholds.min_title_chars {
        let message = match &extracted.title {
            None => format!("Title check failed: '{}' matched nothing", title_raw),
            Some(_) => format!(
                "Title check failed: {} character(s), at least {} required",
                title_len, thresholds.min_title_chars
            ),
        };
        return content_rejected(message, extracted);
    }

    let body_len = extracted.content.as_deref().map(|t| t.chars().count()).unwrap_or(0);
    if body_len < thresholds.min_content_chars {
        let message = match &extracted.content {
            None => format!("Content check failed: '{}' matched nothing", body_raw),
            Some(_) => format!(
                "Content check failed: {} character(s), at least {} required",
                body_len, thresholds.min_content_chars
            ),
        };
        return content_rejected(message, extracted);
    }

    let validated = ValidatedContentSelectors {
        selectors: ContentSelectors {
            title: Some(title_raw.to_string()),
            body: Some(body_raw.to_string()),
            image: image_sel,
            date: date_sel,
            author: author_sel,
            category: category_sel,
            tags: tags_sel,
        },
    };

    ContentValidation {
        valid: true,
        message: format!(
            "Extracted title ({} chars) and content ({} chars)",
            title_len, body_len
        ),
        extracted,
        validated: Some(validated),
    }
}

/// Runs proposed selectors against live pages
#[derive(Clone)]
pub struct SelectorValidator {
    fetcher: Arc<dyn PageFetcher>,
    options: FetchOptions,
    thresholds: ValidationConfig,
}

impl SelectorValidator {
    pub fn new(fetcher: Arc<dyn PageFetcher>, options: FetchOptions, thresholds: ValidationConfig) -> Self {
        Self {
            fetcher,
            options,
            thresholds,
        }
    }

    /// Network and fetch failures propagate as errors; failed checks do not
    pub async fn validate_listing_selector(&self, url: &str, selector: &str) -> Result<ListingValidation> {
        if let Err(reason) = check_syntax(selector) {
            return Ok(listing_rejected(
                format!("Syntax check failed: {}", reason),
                specificity_score(selector, self.thresholds.max_selector_depth),
            ));
        }

        let page = self.fetcher.fetch_rendered(url, &self.options).await?;
        let page_url = Url::parse(&page.final_url).or_else(|_| Url::parse(url))?;

        let result = evaluate_listing(&page.html, &page_url, selector, &self.thresholds);
        info!(
            "Listing selector '{}' on {}: valid={} count={} specificity={}",
            selector, url, result.valid, result.count, result.specificity_score
        );
        Ok(result)
    }

    pub async fn validate_content_selectors(&self, url: &str, selectors: &ContentSelectors) -> Result<ContentValidation> {
        for (field, raw) in [("Title", &selectors.title), ("Body", &selectors.body)] {
            if let Err(reason) = check_syntax(raw.as_deref().unwrap_or_default()) {
                return Ok(content_rejected(
                    format!("{} selector rejected: {}", field, reason),
                    ExtractedData::default(),
                ));
            }
        }

        let page = self.fetcher.fetch_rendered(url, &self.options).await?;
        let result = evaluate_content(&page.html, selectors, &self.thresholds);
        info!("Content selectors on {}: valid={} ({})", url, result.valid, result.message);
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FetchConfig;
    use crate::test_support::{eight_article_listing, StaticPages};

    const LISTING_URL: &str = "https://daily.example/news";

    fn validator(pages: StaticPages) -> (SelectorValidator, Arc<StaticPages>) {
        let pages = Arc::new(pages);
        let validator = SelectorValidator::new(
            pages.clone(),
            FetchOptions::from_config(&FetchConfig::default()),
            ValidationConfig::default(),
        );
        (validator, pages)
    }

    #[test]
    fn test_syntax_check() {
        assert!(check_syntax("article a").is_ok());
        assert!(check_syntax("#main > .story").is_ok());
        assert!(check_syntax("[data-role=item] a").is_ok());
        assert!(check_syntax("").is_err());
        assert!(check_syntax("   ").is_err());
        assert!(check_syntax("a; drop table").is_err());
        assert!(check_syntax("<script>").is_err());
        assert!(check_syntax("a[href^='javascript:']").is_err());
        assert!(check_syntax("> a").is_err());
        assert!(check_syntax("article[").is_err());
    }

    #[tokio::test]
    async fn test_article_selector_end_to_end() {
        let (validator, _) = validator(StaticPages::new().with_page(LISTING_URL, &eight_article_listing()));

        let semantic = validator.validate_listing_selector(LISTING_URL, "article a").await.unwrap();
        assert!(semantic.valid, "{}", semantic.message);
        assert_eq!(semantic.count, 8);
        assert!(semantic.urls.contains(&"https://daily.example/a1".to_string()));
        assert!(!semantic.urls.iter().any(|u| u.ends_with("/about")));

        let generic = validator.validate_listing_selector(LISTING_URL, "div a").await.unwrap();
        assert!(generic.valid);
        assert_eq!(generic.count, 8);
        assert!(semantic.specificity_score > generic.specificity_score);

        let validated = semantic.into_validated().unwrap();
        assert_eq!(validated.selector(), "article a");
        assert_eq!(validated.count(), 8);
    }

    #[test]
    fn test_listing_threshold_boundary() {
        let page_url = Url::parse(LISTING_URL).unwrap();
        let thresholds = ValidationConfig::default();
        let listing = |n: usize| {
            let items: String = (0..n).map(|i| format!("<li><a href=\"/s{}\">s</a></li>", i)).collect();
            format!("<ul class=\"latest\">{}</ul>", items)
        };

        let two = evaluate_listing(&listing(2), &page_url, "ul.latest a", &thresholds);
        assert!(!two.valid);
        assert_eq!(two.count, 2);
        assert!(two.message.contains("at least 3"));
        assert!(two.validated().is_none());

        let three = evaluate_listing(&listing(3), &page_url, "ul.latest a", &thresholds);
        assert!(three.valid);
        assert_eq!(three.count, 3);
    }

    #[test]
    fn test_unresolvable_links_do_not_count() {
        let page_url = Url::parse(LISTING_URL).unwrap();
        let html = r##"<div class="x"><a href="/a1">1</a><a href="javascript:void(0)">2</a>
            <a href="#top">3</a><a href="/a1#c">dup</a><a href="/a2">4</a></div>"##;

        let result = evaluate_listing(html, &page_url, ".x a", &ValidationConfig::default());
        assert!(!result.valid);
        assert_eq!(result.count, 2);
    }

    #[tokio::test]
    async fn test_syntax_failure_skips_network() {
        let (validator, pages) = validator(StaticPages::new());

        let result = validator.validate_listing_selector(LISTING_URL, "a{color:red}").await.unwrap();
        assert!(!result.valid);
        assert!(result.message.starts_with("Syntax check failed"));
        assert_eq!(pages.fetch_count(), 0);
    }

    #[tokio::test]
    async fn test_fetch_errors_propagate() {
        let (validator, _) = validator(StaticPages::new());
        assert!(validator.validate_listing_selector(LISTING_URL, "article a").await.is_err());
    }

    fn article_page() -> &'static str {
        r#"<html><body><article>
            <h1 class="headline">Council approves new budget</h1>
            <time datetime="2026-10-18T09:00:00Z">Yesterday</time>
            <amp-img src="/img/b-425.jpg" width="425"></amp-img>
            <amp-img src="/img/b-960.jpg" width="960"></amp-img>
            <div class="body">
                <p>The city council voted on Tuesday to approve the new budget.</p>
                <p>Spending on transport rises by four percent next year.</p>
            </div>
        </article></body></html>"#
    }

    #[test]
    fn test_content_selectors_pass_with_optional_failures_swallowed() {
        let selectors = ContentSelectors {
            title: Some("h1.headline".to_string()),
            body: Some("article .body".to_string()),
            image: Some("amp-img[width=\"960\"]".to_string()),
            date: Some("time".to_string()),
            author: Some(".byline".to_string()),
            category: Some("{broken".to_string()),
            tags: None,
        };

        let result = evaluate_content(article_page(), &selectors, &ValidationConfig::default());
        assert!(result.valid, "{}", result.message);
        assert_eq!(result.extracted.title.as_deref(), Some("Council approves new budget"));
        assert_eq!(result.extracted.image.as_deref(), Some("/img/b-960.jpg"));
        assert_eq!(result.extracted.date.as_deref(), Some("2026-10-18T09:00:00Z"));
        assert!(result.extracted.author.is_none());
        assert!(result.extracted.category.is_none());

        let validated = result.into_validated().unwrap();
        assert!(validated.selectors().category.is_none());
        assert_eq!(validated.selectors().author.as_deref(), Some(".byline"));
    }

    #[test]
    fn test_content_thresholds() {
        let thresholds = ValidationConfig::default();
        let selectors = ContentSelectors {
            title: Some("h1".to_string()),
            body: Some(".body".to_string()),
            ..ContentSelectors::default()
        };

        let tiny_title = format!("<h1>Hi</h1><div class=\"body\">{}</div>", "word ".repeat(20));
        let result = evaluate_content(&tiny_title, &selectors, &thresholds);
        assert!(!result.valid);
        assert!(result.message.starts_with("Title check failed"));

        let short_body = "<h1>Long enough title</h1><div class=\"body\">too short</div>";
        let result = evaluate_content(short_body, &selectors, &thresholds);
        assert!(!result.valid);
        assert!(result.message.starts_with("Content check failed"));

        let no_body = ContentSelectors {
            body: None,
            ..selectors
        };
        let result = evaluate_content(short_body, &no_body, &thresholds);
        assert!(!result.valid);
        assert!(result.message.starts_with("Body selector rejected"));
    }

    #[tokio::test]
    async fn test_validate_content_uses_live_page() {
        let url = "https://daily.example/a1";
        let (validator, pages) = validator(StaticPages::new().with_page(url, article_page()));
        let selectors = ContentSelectors {
            title: Some("h1".to_string()),
            body: Some(".body".to_string()),
            ..ContentSelectors::default()
        };

        let result = validator.validate_content_selectors(url, &selectors).await.unwrap();
        assert!(result.valid);
        assert_eq!(pages.fetch_count(), 1);
    }
}
