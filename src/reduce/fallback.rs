//! Regex compression for markup the tree walk gives up on

use regex::Regex;
use std::sync::LazyLock;

#[allow(clippy::expect_used)]
static SCRIPT_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<script\b[^>]*>.*?</script\s*>").expect("valid regex"));

#[allow(clippy::expect_used)]
static STYLE_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<style\b[^>]*>.*?</style\s*>").expect("valid regex"));

#[allow(clippy::expect_used)]
static COMMENT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").expect("valid regex"));

/// Handlers, inline styles and presentation-only attributes, quoted or bare
#[allow(clippy::expect_used)]
static STRIPPED_ATTR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\s(?:on[a-z]+|style|srcset|sizes|loading)\s*=\s*(?:"[^"]*"|'[^']*'|[^\s>]+)"#)
        .expect("valid regex")
});

#[allow(clippy::expect_used)]
static BETWEEN_TAGS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r">\s+<").expect("valid regex"));

#[allow(clippy::expect_used)]
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Conservative textual reduction; never fails and never drops text content
pub fn regex_compress(html: &str) -> String {
    let out = SCRIPT_BLOCK.replace_all(html, "");
    let out = STYLE_BLOCK.replace_all(&out, "");
    let out = COMMENT.replace_all(&out, "");
    let out = STRIPPED_ATTR.replace_all(&out, "");
    let out = BETWEEN_TAGS.replace_all(&out, "><");
    let out = WHITESPACE.replace_all(&out, " ");
    out.trim().to_string()
}
