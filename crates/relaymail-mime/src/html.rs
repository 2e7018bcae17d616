//! HTML helpers: escaping and the plain-text fallback.

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::{Captures, Regex};

static LINE_BREAK: LazyLock<Regex> = LazyLock::new(|| compile(r"(?i)<br\s*/?\s*>"));
static PARAGRAPH_END: LazyLock<Regex> = LazyLock::new(|| compile(r"(?i)</p\s*>"));
static TAG: LazyLock<Regex> = LazyLock::new(|| compile(r"<[^>]*>"));
static ENTITY: LazyLock<Regex> =
    LazyLock::new(|| compile(r"&(#[0-9]{1,7}|#[xX][0-9a-fA-F]{1,6}|[a-zA-Z][a-zA-Z0-9]{1,31});"));

#[allow(clippy::expect_used)]
fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).expect("static pattern")
}

/// Derives a plain-text rendition of `html`.
///
/// 1. `<br>`, `<br/>`, `<br />` become a newline
/// 2. `</p>` becomes a blank line
/// 3. every other tag is removed
/// 4. entities are decoded
/// 5. leading and trailing whitespace is trimmed
///
/// Lossy by nature; no layout is attempted.
#[must_use]
pub fn html_to_text(html: &str) -> String {
    let text = LINE_BREAK.replace_all(html, "\n");
    let text = PARAGRAPH_END.replace_all(&text, "\n\n");
    let text = TAG.replace_all(&text, "");
    let text = decode_entities(&text);
    text.trim().to_string()
}

/// Decodes named and numeric character references.
///
/// Unknown entities are left verbatim.
#[must_use]
pub fn decode_entities(text: &str) -> Cow<'_, str> {
    ENTITY.replace_all(text, |caps: &Captures<'_>| {
        decode_entity(&caps[1]).map_or_else(|| caps[0].to_string(), String::from)
    })
}

fn decode_entity(entity: &str) -> Option<char> {
    if let Some(numeric) = entity.strip_prefix('#') {
        let code = match numeric.strip_prefix(['x', 'X']) {
            Some(hex) => u32::from_str_radix(hex, 16).ok()?,
            None => numeric.parse().ok()?,
        };
        return char::from_u32(code);
    }

    let ch = match entity {
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        "nbsp" => '\u{a0}',
        "copy" => '©',
        "reg" => '®',
        "hellip" => '…',
        "mdash" => '—',
        "ndash" => '–',
        "lsquo" => '‘',
        "rsquo" => '’',
        "ldquo" => '“',
        "rdquo" => '”',
        _ => return None,
    };
    Some(ch)
}

/// Escapes text for inclusion in HTML element content or attribute values.
#[must_use]
pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paragraphs_and_breaks() {
        let html = "<p>Hello <b>Ann</b>,</p><p>Line one<br>Line two<BR />Line three</p>";
        assert_eq!(
            html_to_text(html),
            "Hello Ann,\n\nLine one\nLine two\nLine three"
        );
    }

    #[test]
    fn test_full_document() {
        let html = "<html><head><title>T</title></head>\n<body>\n  <h1>Welcome</h1>\n  <p>Thanks &amp; regards</p>\n</body></html>\n";
        assert_eq!(html_to_text(html), "T\n\n  Welcome\n  Thanks & regards");
    }

    #[test]
    fn test_entities_decoded_after_tags_removed() {
        assert_eq!(html_to_text("<p>&lt;b&gt; is bold</p>"), "<b> is bold");
        assert_eq!(html_to_text("5 &gt; 3 &#38; 2 &#x3C; 4"), "5 > 3 & 2 < 4");
        assert_eq!(html_to_text("caf&eacute;"), "caf&eacute;");
        assert_eq!(html_to_text("&quot;hi&quot;&nbsp;there"), "\"hi\"\u{a0}there");
    }

    #[test]
    fn test_trims_whitespace() {
        assert_eq!(html_to_text("  \n<div> spaced </div>\n  "), "spaced");
        assert_eq!(html_to_text(""), "");
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(
            escape_html("<a href=\"x\">Tom & Jerry's</a>"),
            "&lt;a href=&quot;x&quot;&gt;Tom &amp; Jerry&#39;s&lt;/a&gt;"
        );
    }
}
