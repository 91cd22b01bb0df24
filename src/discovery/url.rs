//! Link extraction, URL canonicalization and hashing

use crate::error::{Error, Result};
use crate::meta::ListingSelectors;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;
use url::Url;

/// One element matched by a listing's link selector
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListingLink {
    /// Raw href, `None` when neither the element nor a descendant carries one
    pub href: Option<String>,
    pub title: Option<String>,
    pub image: Option<String>,
}

/// Everything the link selector matched on a listing page
#[derive(Debug, Clone, Default)]
pub struct ListingExtract {
    pub matched: usize,
    pub links: Vec<ListingLink>,
}

/// Parse a selector, mapping failures to `Error::Selector`
pub fn parse_selector(selector: &str) -> Result<Selector> {
    Selector::parse(selector)
        .map_err(|e| Error::Selector(format!("Invalid selector '{}': {}", selector, e)))
}

fn optional_selector(selector: Option<&str>) -> Option<Selector> {
    let selector = selector?.trim();
    if selector.is_empty() {
        return None;
    }
    match Selector::parse(selector) {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            debug!("Ignoring invalid sub-selector '{}': {}", selector, e);
            None
        }
    }
}

/// Collapsed text of an element, `None` when blank
pub fn element_text(element: ElementRef<'_>) -> Option<String> {
    let text = element.text().collect::<Vec<_>>().join(" ");
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    (!collapsed.is_empty()).then_some(collapsed)
}

/// The element's own href, or the first descendant link's
pub fn link_href(element: ElementRef<'_>, anchor: &Selector) -> Option<String> {
    if let Some(href) = element.value().attr("href") {
        return Some(href.to_string());
    }
    element
        .select(anchor)
        .next()
        .and_then(|a| a.value().attr("href"))
        .map(|h| h.to_string())
}

fn image_src(element: ElementRef<'_>) -> Option<String> {
    ["src", "data-src"]
        .iter()
        .find_map(|attr| element.value().attr(attr))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Apply a sub-selector within the matched element, then within its parent
fn scoped_first<'a>(element: ElementRef<'a>, selector: &Selector) -> Option<ElementRef<'a>> {
    if let Some(found) = element.select(selector).next() {
        return Some(found);
    }
    element
        .parent()
        .and_then(ElementRef::wrap)
        .and_then(|parent| parent.select(selector).next())
}

/// Run a listing's selectors over a page
pub fn extract_listing_links(html: &str, selectors: &ListingSelectors) -> Result<ListingExtract> {
    let link_selector = parse_selector(selectors.link.trim())?;
    let anchor = parse_selector("a[href]")?;
    let title_selector = optional_selector(selectors.title.as_deref());
    let image_selector = optional_selector(selectors.image.as_deref());

    let document = Html::parse_document(html);
    let mut extract = ListingExtract::default();

    for element in document.select(&link_selector) {
        extract.matched += 1;

        let title = match &title_selector {
            Some(sel) => scoped_first(element, sel).and_then(element_text),
            None => element_text(element),
        };
        let image = image_selector
            .as_ref()
            .and_then(|sel| scoped_first(element, sel))
            .and_then(image_src);

        extract.links.push(ListingLink {
            href: link_href(element, &anchor),
            title,
            image,
        });
    }

    Ok(extract)
}

/// Resolve an href against a base URL, keeping only http(s) targets
pub fn resolve_href(base: &Url, href: &str) -> Result<Url> {
    let trimmed = href.trim();
    if trimmed.is_empty() {
        return Err(Error::Parsing("empty href".to_string()));
    }
    if trimmed.starts_with('#') {
        return Err(Error::Parsing(format!("fragment-only href '{}'", trimmed)));
    }

    let resolved = base.join(trimmed)?;
    match resolved.scheme() {
        "http" | "https" => {}
        other => {
            return Err(Error::Parsing(format!(
                "unsupported scheme '{}' in href '{}'",
                other, trimmed
            )))
        }
    }
    if resolved.host_str().is_none() {
        return Err(Error::Parsing(format!("href '{}' has no host", trimmed)));
    }
    Ok(resolved)
}

/// Canonical string form used as a URL's identity.
///
/// Scheme and host are lowercased and default ports dropped by the parser;
/// the fragment is removed and query pairs are sorted.
pub fn canonicalize_url(url: &Url) -> String {
    let mut canonical = url.clone();
    canonical.set_fragment(None);

    if canonical.query().is_some() {
        let mut pairs: Vec<(String, String)> = canonical.query_pairs().into_owned().collect();
        if pairs.is_empty() {
            canonical.set_query(None);
        } else {
            pairs.sort();
            canonical.query_pairs_mut().clear().extend_pairs(pairs);
        }
    }

    canonical.to_string()
}

/// Content-addressable identity of a canonical URL
pub fn url_hash(canonical: &str) -> String {
    blake3::hash(canonical.as_bytes()).to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn base() -> Url {
        Url::parse("https://daily.example/").unwrap()
    }

    #[test]
    fn test_canonicalization_is_stable() {
        let variants = [
            "HTTPS://Daily.Example:443/world/a1?b=2&a=1#comments",
            "https://daily.example/world/a1?a=1&b=2",
            "https://daily.example:443/world/a1?a=1&b=2#top",
        ];
        let canonical: HashSet<String> = variants
            .iter()
            .map(|v| canonicalize_url(&Url::parse(v).unwrap()))
            .collect();

        assert_eq!(canonical.len(), 1);
        assert!(canonical.contains("https://daily.example/world/a1?a=1&b=2"));
    }

    #[test]
    fn test_hash_identity_and_distinctness() {
        assert_eq!(url_hash("https://daily.example/a1"), url_hash("https://daily.example/a1"));

        let hashes: HashSet<String> = (0..20_000)
            .map(|i| url_hash(&format!("https://daily.example/story/{}", i)))
            .collect();
        assert_eq!(hashes.len(), 20_000);
        assert!(hashes.iter().all(|h| h.len() == 64));
    }

    #[test]
    fn test_resolve_href_filters_schemes() {
        assert_eq!(
            resolve_href(&base(), "/world/a1").unwrap().as_str(),
            "https://daily.example/world/a1"
        );
        assert!(resolve_href(&base(), "https://other.example/x").is_ok());
        assert!(resolve_href(&base(), "javascript:void(0)").is_err());
        assert!(resolve_href(&base(), "mailto:desk@daily.example").is_err());
        assert!(resolve_href(&base(), "#top").is_err());
        assert!(resolve_href(&base(), "   ").is_err());
    }

    #[test]
    fn test_extract_uses_own_or_descendant_href() {
        let html = r#"<main>
            <article><a href="/a1">First story</a></article>
            <article class="card"><h2>Second</h2><a href="/a2">Read</a></article>
            <article class="card"><h2>No link</h2></article>
        </main>"#;

        let selectors = ListingSelectors {
            link: "article".to_string(),
            ..ListingSelectors::default()
        };
        let extract = extract_listing_links(html, &selectors).unwrap();

        assert_eq!(extract.matched, 3);
        assert_eq!(extract.links[0].href.as_deref(), Some("/a1"));
        assert_eq!(extract.links[1].href.as_deref(), Some("/a2"));
        assert!(extract.links[2].href.is_none());
    }

    #[test]
    fn test_extract_captures_title_and_image() {
        let html = r#"<div class="teaser">
            <img data-src="/img/a1.jpg">
            <a href="/a1"><span class="hl">Budget vote tonight</span></a>
        </div>"#;

        let selectors = ListingSelectors {
            link: ".teaser a".to_string(),
            title: Some(".hl".to_string()),
            image: Some("img".to_string()),
            ..ListingSelectors::default()
        };
        let extract = extract_listing_links(html, &selectors).unwrap();

        assert_eq!(extract.links[0].title.as_deref(), Some("Budget vote tonight"));
        assert_eq!(extract.links[0].image.as_deref(), Some("/img/a1.jpg"));
    }

    #[test]
    fn test_invalid_link_selector_is_selector_error() {
        let selectors = ListingSelectors {
            link: "article[".to_string(),
            ..ListingSelectors::default()
        };
        assert!(matches!(
            extract_listing_links("<p></p>", &selectors),
            Err(Error::Selector(_))
        ));
    }
}
