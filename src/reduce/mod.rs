//! HTML reduction ahead of selector inference
//!
//! Strips scripts, styles, comments, inline handlers and presentation-only
//! attributes while keeping the structure and every attribute a selector
//! could anchor on. `width`/`height` survive so responsive image variants
//! can be told apart later. Content is never truncated.

mod fallback;

pub use fallback::regex_compress;

use crate::error::{Error, Result};
use scraper::node::Node;
use scraper::{ElementRef, Html};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Elements dropped together with their subtree
const DROPPED_ELEMENTS: &[&str] = &["script", "style"];

/// Presentation-only attributes
const DROPPED_ATTRIBUTES: &[&str] = &["style", "srcset", "sizes", "loading"];

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

/// Nesting beyond this is treated as malformed and handed to the regex path
const MAX_DEPTH: usize = 256;

/// Characters per token for cost estimates
const CHARS_PER_TOKEN: usize = 4;

/// Size accounting for one reduction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReductionStats {
    pub original_size: usize,
    pub reduced_size: usize,
    pub reduction_percentage: f64,
    pub estimated_token_count: usize,
}

/// Reduced markup plus its stats
#[derive(Debug, Clone)]
pub struct ReducedHtml {
    pub html: String,
    pub stats: ReductionStats,
}

/// Reduce a page for the language model
pub fn reduce(html: &str) -> ReducedHtml {
    let reduced = match reduce_tree(html) {
        Ok(out) if !out.is_empty() || html.trim().is_empty() => out,
        Ok(_) => {
            warn!("Tree reduction produced no output, using regex compression");
            regex_compress(html)
        }
        Err(e) => {
            warn!("Tree reduction failed ({}), using regex compression", e);
            regex_compress(html)
        }
    };

    let stats = compute_stats(html, &reduced);
    debug!(
        "Reduced HTML {} -> {} chars ({:.1}%), ~{} tokens",
        stats.original_size, stats.reduced_size, stats.reduction_percentage, stats.estimated_token_count
    );

    ReducedHtml { html: reduced, stats }
}

/// Size statistics; tokens are estimated at a fixed chars-per-token ratio
pub fn compute_stats(original: &str, reduced: &str) -> ReductionStats {
    let original_size = original.chars().count();
    let reduced_size = reduced.chars().count();
    let reduction_percentage = if original_size == 0 {
        0.0
    } else {
        let ratio = 1.0 - reduced_size as f64 / original_size as f64;
        (ratio * 1000.0).round() / 10.0
    };

    ReductionStats {
        original_size,
        reduced_size,
        reduction_percentage,
        estimated_token_count: reduced_size.div_ceil(CHARS_PER_TOKEN),
    }
}

fn reduce_tree(html: &str) -> Result<String> {
    let document = Html::parse_document(html);
    let mut out = String::with_capacity(html.len() / 2);
    write_element(document.root_element(), &mut out, 0)?;
    Ok(out.trim().to_string())
}

fn keep_attribute(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    if lower.starts_with("data-") || lower.starts_with("aria-") {
        return true;
    }
    if lower.len() > 2 && lower.starts_with("on") {
        return false;
    }
    !DROPPED_ATTRIBUTES.contains(&lower.as_str())
}

fn write_element(element: ElementRef<'_>, out: &mut String, depth: usize) -> Result<()> {
    if depth > MAX_DEPTH {
        return Err(Error::Parsing(format!("markup nested deeper than {}", MAX_DEPTH)));
    }

    let name = element.value().name();
    if DROPPED_ELEMENTS.contains(&name) {
        return Ok(());
    }

    out.push('<');
    out.push_str(name);
    for (attr, value) in element.value().attrs() {
        if !keep_attribute(attr) {
            continue;
        }
        out.push(' ');
        out.push_str(attr);
        out.push_str("=\"");
        escape_attribute(value, out);
        out.push('"');
    }
    out.push('>');

    if VOID_ELEMENTS.contains(&name) {
        return Ok(());
    }

    for child in element.children() {
        match child.value() {
            Node::Text(text) => {
                let collapsed = collapse_whitespace(text);
                if !collapsed.trim().is_empty() {
                    escape_text(&collapsed, out);
                }
            }
            Node::Element(_) => {
                if let Some(child) = ElementRef::wrap(child) {
                    write_element(child, out, depth + 1)?;
                }
            }
            // Comments and processing instructions carry no selector signal
            _ => {}
        }
    }

    out.push_str("</");
    out.push_str(name);
    out.push('>');
    Ok(())
}

fn collapse_whitespace(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut in_space = false;
    for c in text.chars() {
        if c.is_whitespace() {
            if !in_space {
                result.push(' ');
                in_space = true;
            }
        } else {
            result.push(c);
            in_space = false;
        }
    }
    result
}

fn escape_text(text: &str, out: &mut String) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
}

fn escape_attribute(value: &str, out: &mut String) {
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reduce_keeps_image_widths() {
        let html = r#"<html><body><figure class="hero">
            <amp-img src="/img/cat-425.jpg" width="425" height="240" layout="responsive"></amp-img>
            <amp-img src="/img/cat-960.jpg" width="960" height="540" layout="responsive"></amp-img>
        </figure></body></html>"#;

        let reduced = reduce(html);
        assert!(reduced.html.contains(r#"width="425""#));
        assert!(reduced.html.contains(r#"width="960""#));
        assert!(reduced.html.contains(r#"height="540""#));
    }

    #[test]
    fn test_reduce_strips_scripts_styles_and_comments() {
        let html = r#"<html><head><style>.x{color:red}</style><script>track()</script></head>
            <body><!-- ad slot --><div class="story">Hello</div><script src="/a.js"></script></body></html>"#;

        let reduced = reduce(html);
        assert!(!reduced.html.contains("track()"));
        assert!(!reduced.html.contains("color:red"));
        assert!(!reduced.html.contains("ad slot"));
        assert!(!reduced.html.contains("<script"));
        assert!(reduced.html.contains(r#"<div class="story">Hello</div>"#));
    }

    #[test]
    fn test_reduce_attribute_policy() {
        let html = r#"<body><img src="a.jpg" srcset="a2.jpg 2x" sizes="100vw" loading="lazy"
            onload="x()" style="border:0" data-src="hd.jpg" aria-label="Photo" alt="A" width="300"></body>"#;

        let reduced = reduce(html);
        for dropped in ["srcset", "sizes", "loading", "onload", "style"] {
            assert!(!reduced.html.contains(dropped), "{} should be dropped", dropped);
        }
        for kept in [r#"data-src="hd.jpg""#, r#"aria-label="Photo""#, r#"alt="A""#, r#"width="300""#] {
            assert!(reduced.html.contains(kept), "{} should be kept", kept);
        }
    }

    #[test]
    fn test_reduce_collapses_whitespace_without_truncating() {
        let paragraph = "word ".repeat(5000);
        let html = format!("<body>\n\n   <p>   {}   </p>\n\n</body>", paragraph);

        let reduced = reduce(&html);
        assert!(!reduced.html.contains("  "));
        assert_eq!(reduced.html.matches("word").count(), 5000);
    }

    #[test]
    fn test_stats_use_four_chars_per_token() {
        let stats = compute_stats("0123456789", "0123456");
        assert_eq!(stats.original_size, 10);
        assert_eq!(stats.reduced_size, 7);
        assert_eq!(stats.estimated_token_count, 2);
        assert!((stats.reduction_percentage - 30.0).abs() < f64::EPSILON);

        let empty = compute_stats("", "");
        assert_eq!(empty.reduction_percentage, 0.0);
        assert_eq!(empty.estimated_token_count, 0);
    }

    #[test]
    fn test_deep_nesting_falls_back_to_regex() {
        let depth = MAX_DEPTH + 50;
        let html = format!(
            "<body>{}<span>deep text</span><script>bad()</script>{}</body>",
            "<div>".repeat(depth),
            "</div>".repeat(depth)
        );

        let reduced = reduce(&html);
        assert!(reduced.html.contains("deep text"));
        assert!(!reduced.html.contains("bad()"));
    }

    #[test]
    fn test_text_is_escaped() {
        let reduced = reduce("<body><p>Fish &amp; chips &lt;3</p><a title='say \"hi\"'>x</a></body>");
        assert!(reduced.html.contains("Fish &amp; chips &lt;3"));
        assert!(reduced.html.contains(r#"title="say &quot;hi&quot;""#));
    }
}
