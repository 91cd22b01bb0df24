//! System prompts and output schemas for selector inference

use serde_json::{json, Value};

pub const LISTING_SYSTEM_PROMPT: &str = "\
You are an expert at reverse-engineering news website markup. You receive the \
reduced HTML of a listing page (a page enumerating links to individual articles) \
and must return ONE CSS selector that matches the link elements of the articles.

Heuristics:
- Prefer a selector that matches 5 or more repeated list items; a selector matching \
one or two elements is almost certainly wrong.
- Target the article links themselves (or the element carrying the href), not \
navigation, footer, pagination, social or category links.
- Prefer stable hooks: semantic tags (article, main, section), ids, descriptive \
class names and data- attributes. Avoid auto-generated class names and deep \
positional chains such as nth-child sequences.
- Keep the selector short; more than five chained levels is fragile.

Respond only with JSON matching the schema. If a field has no value use an empty string.";

pub const CONTENT_SYSTEM_PROMPT: &str = "\
You are an expert at reverse-engineering news article markup. You receive the \
reduced HTML of a single article page and must return CSS selectors for its parts.

Heuristics:
- title_selector must match the article headline, usually the main h1.
- content_selector must match the article body. When the body spans several \
paragraphs, select the outer container that holds all of them rather than a \
single paragraph.
- For images, pages often carry several resolutions of the same asset (for example \
amp-img or img elements that differ only by width). Select the single \
highest-resolution variant using a width attribute predicate such as \
[width=\"960\"] instead of a selector that matches every variant.
- date_selector, author_selector and category_selector are optional; return an \
empty string when the page has no such element.
- Prefer stable hooks: semantic tags, ids, descriptive class names, itemprop and \
data- attributes.

Respond only with JSON matching the schema. If a field has no value use an empty string.";

pub fn listing_user_prompt(url: &str, reduced_html: &str) -> String {
    format!(
        "Listing page URL: {}\n\nReduced HTML:\n{}\n\nReturn the article link selector.",
        url, reduced_html
    )
}

pub fn content_user_prompt(url: &str, reduced_html: &str) -> String {
    format!(
        "Article URL: {}\n\nReduced HTML:\n{}\n\nReturn the content selectors.",
        url, reduced_html
    )
}

/// Strict schema for a listing proposal
pub fn listing_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "selector": { "type": "string" },
            "confidence": { "type": "number" },
            "rationale": { "type": "string" }
        },
        "required": ["selector", "confidence", "rationale"],
        "additionalProperties": false
    })
}

/// Strict schema for a content proposal; every field is required
pub fn content_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "title_selector": { "type": "string" },
            "content_selector": { "type": "string" },
            "image_selector": { "type": "string" },
            "date_selector": { "type": "string" },
            "author_selector": { "type": "string" },
            "category_selector": { "type": "string" },
            "confidence": { "type": "number" },
            "rationale": { "type": "string" }
        },
        "required": [
            "title_selector",
            "content_selector",
            "image_selector",
            "date_selector",
            "author_selector",
            "category_selector",
            "confidence",
            "rationale"
        ],
        "additionalProperties": false
    })
}
