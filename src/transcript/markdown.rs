//! Markdown rendering and sanitation for transcript messages.
//!
//! Input is untrusted (it may originate from a remote model), so the output
//! contract is: no executable script survives. Raw HTML embedded in the
//! markdown is escaped rather than passed through, and a pattern strip runs
//! over the rendered output regardless of which path produced it.
//!
//! Rendering never fails; on anything unexpected it degrades to escaped
//! plain text with newlines as `<br>`.

use std::sync::LazyLock;

use pulldown_cmark::{Event, Options, Parser, html};
use regex::Regex;

static SCRIPT_BLOCK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<script\b[^>]*>.*?</script\s*>").expect("valid regex"));

static SCRIPT_TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)</?script\b[^>]*>").expect("valid regex"));

static EVENT_HANDLER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\son\w+\s*=\s*(?:"[^"]*"|'[^']*'|[^\s>]+)"#).expect("valid regex")
});

static JS_URI_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)javascript\s*:").expect("valid regex")
});

/// Render untrusted markdown to sanitized HTML, with the plain-text escape
/// fallback applied on failure.
#[must_use]
pub fn render_markdown(text: &str) -> String {
    try_render(text).unwrap_or_else(|| escape_with_breaks(text))
}

/// Render untrusted markdown to sanitized HTML.
///
/// Soft newlines become hard breaks, matching the chat convention where a
/// single `\n` in model output is a visible line break. Returns `None` when
/// rendering degenerates (non-empty input, empty output) so the caller can
/// surface the failure and fall back to escaped text.
#[must_use]
pub fn try_render(text: &str) -> Option<String> {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_SMART_PUNCTUATION);

    let parser = Parser::new_ext(text, options).map(|event| match event {
        // Raw HTML in model output is treated as text, not markup.
        Event::Html(raw) | Event::InlineHtml(raw) => Event::Text(raw),
        Event::SoftBreak => Event::HardBreak,
        other => other,
    });

    let mut out = String::with_capacity(text.len() * 2);
    html::push_html(&mut out, parser);

    let sanitized = sanitize(&out);

    if sanitized.trim().is_empty() && !text.trim().is_empty() {
        tracing::warn!(input_length = text.len(), "markdown produced no output, escaping input");
        return None;
    }

    Some(sanitized)
}

/// Strip executable constructs from rendered HTML.
///
/// This runs on every rendered message even though the primary path already
/// escapes raw HTML: script elements, inline event-handler attributes, and
/// `javascript:` URIs are removed.
#[must_use]
pub fn sanitize(html: &str) -> String {
    let out = SCRIPT_BLOCK_RE.replace_all(html, "");
    let out = SCRIPT_TAG_RE.replace_all(&out, "");
    let out = EVENT_HANDLER_RE.replace_all(&out, "");
    let out = JS_URI_RE.replace_all(&out, "");
    out.into_owned()
}

/// Escape all markup-significant characters.
#[must_use]
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Escape markup and convert raw newlines to line breaks.
#[must_use]
pub fn escape_with_breaks(text: &str) -> String {
    escape_html(text).replace('\n', "<br>")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_renders_heading_and_paragraph() {
        let out = render_markdown("# Title\n\nBody text");
        assert!(out.contains("<h1>Title</h1>"));
        assert!(out.contains("<p>Body text</p>"));
    }

    #[test]
    fn test_renders_code_span_and_block() {
        let out = render_markdown("use `foo()` like:\n\n```\nfoo();\n```");
        assert!(out.contains("<code>foo()</code>"));
        assert!(out.contains("<pre><code>foo();\n</code></pre>"));
    }

    #[test]
    fn test_soft_newline_becomes_break() {
        let out = render_markdown("Line1\nLine2");
        assert!(out.contains("<br"));
    }

    #[test]
    fn test_raw_html_is_escaped() {
        let out = render_markdown("hello <b>there</b>");
        assert!(!out.contains("<b>"));
        assert!(out.contains("&lt;b&gt;"));
    }

    #[test]
    fn test_script_block_stripped() {
        let out = sanitize("<p>hi</p><script>alert('x')</script><p>bye</p>");
        assert!(!out.to_lowercase().contains("<script"));
        assert!(!out.contains("alert"));
        assert!(out.contains("<p>hi</p>"));
        assert!(out.contains("<p>bye</p>"));
    }

    #[test]
    fn test_event_handler_stripped() {
        let out = sanitize(r#"<img src="x" onerror="alert(1)">"#);
        assert!(!out.to_lowercase().contains("onerror"));
    }

    #[test]
    fn test_javascript_uri_stripped() {
        let out = sanitize(r#"<a href="javascript:alert(1)">click</a>"#);
        assert!(!out.to_lowercase().contains("javascript:"));
    }

    #[test]
    fn test_rendered_markdown_never_contains_script() {
        let out = render_markdown("evil <script>alert('xss')</script> payload");
        assert!(!out.to_lowercase().contains("<script"));
    }

    #[test]
    fn test_escape_with_breaks() {
        let out = escape_with_breaks("a<b\nc&d");
        assert_eq!(out, "a&lt;b<br>c&amp;d");
    }

    #[test]
    fn test_rendering_is_deterministic() {
        let text = "**Hello** world\n\n- one\n- two";
        assert_eq!(render_markdown(text), render_markdown(text));
    }
}
