//! Helpers for the editor's HTML markup.

use once_cell::sync::Lazy;
use regex::Regex;

static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>?").unwrap());
static BLOCK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)</?(?:p|div|li|ul|ol|h[1-6]|blockquote|pre|tr)\b[^>]*>|<br\s*/?>").unwrap()
});
static SCRIPT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<script\b[^>]*>.*?</script\s*>").unwrap());
static QUOTED_HANDLER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)\son\w+\s*=\s*("[^"]*"|'[^']*')"#).unwrap());
static BARE_HANDLER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\son\w+\s*=\s*[^\s>]*").unwrap());
static JS_HREF_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)href\s*=\s*["']\s*javascript:[^"']*["']"#).unwrap());
static JS_SRC_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)src\s*=\s*["']\s*javascript:[^"']*["']"#).unwrap());

/// Remove every tag, leaving the text content. Block boundaries and `<br>`
/// become line breaks so words on either side stay apart.
pub fn strip_tags(html: &str) -> String {
    let broken = BLOCK_RE.replace_all(html, "\n");
    TAG_RE.replace_all(&broken, "").into_owned()
}

/// Plain text with the common entities decoded. Runs of spaces collapse to
/// one, and each block ends up on its own line.
pub fn plain_text(html: &str) -> String {
    let decoded = strip_tags(html)
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");
    decoded
        .lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// True when the markup has no visible text (`""`, `<p></p>`, `<p> </p>`...).
pub fn is_effectively_empty(html: &str) -> bool {
    plain_text(html).trim().is_empty()
}

pub fn word_count(html: &str) -> usize {
    plain_text(html).split_whitespace().count()
}

/// Drop scripts, inline event handlers and `javascript:` URLs before display.
pub fn sanitize_html(html: &str) -> String {
    let out = SCRIPT_RE.replace_all(html, "");
    let out = QUOTED_HANDLER_RE.replace_all(&out, "");
    let out = BARE_HANDLER_RE.replace_all(&out, "");
    let out = JS_HREF_RE.replace_all(&out, "href=\"#\"");
    JS_SRC_RE.replace_all(&out, "src=\"\"").into_owned()
}

/// Wrap plain text as a single paragraph, newlines becoming `<br>`.
pub fn plain_to_html(text: &str) -> String {
    let escaped = text
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;");
    format!("<p>{}</p>", escaped.trim_end().replace('\n', "<br>"))
}
