//! MIME header handling.

use crate::encoding::{decode_rfc2047, encode_rfc2047};
use crate::error::{Error, Result};
use std::fmt;

/// Charset used for every encoded-word this crate produces.
pub const HEADER_CHARSET: &str = "UTF-8";

/// Recommended header line limit (RFC 5322 section 2.1.1).
pub const MAX_HEADER_LINE_LENGTH: usize = 78;

/// Ordered collection of email headers.
///
/// Insertion order is kept for serialisation; lookups ignore case.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    /// Creates a new empty header collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a header value.
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// Sets a header value, replacing any existing values.
    ///
    /// The first existing occurrence keeps its position.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self
            .entries
            .iter()
            .position(|(n, _)| n.eq_ignore_ascii_case(&name))
        {
            Some(idx) => {
                self.entries[idx].1 = value;
                let mut seen = 0usize;
                self.entries.retain(|(n, _)| {
                    if n.eq_ignore_ascii_case(&name) {
                        seen += 1;
                        seen == 1
                    } else {
                        true
                    }
                });
            }
            None => self.entries.push((name, value)),
        }
    }

    /// Gets the first value for a header.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Gets all values for a header.
    #[must_use]
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }

    /// Removes all values for a header.
    pub fn remove(&mut self, name: &str) {
        self.entries.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
    }

    /// Returns an iterator over all headers in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Number of header lines.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if there are no headers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Parses headers from raw text.
    ///
    /// Headers are in the format:
    /// ```text
    /// Header-Name: value
    ///  continuation
    /// ```
    /// Folded lines are unfolded with a single space. Parsing stops at the
    /// first empty line.
    ///
    /// # Errors
    ///
    /// Returns an error if a line is neither a header nor a continuation.
    pub fn parse(text: &str) -> Result<Self> {
        let mut headers = Self::new();
        let mut current: Option<(String, String)> = None;

        for line in text.lines() {
            if line.is_empty() {
                break;
            }

            if line.starts_with(' ') || line.starts_with('\t') {
                if let Some((_, value)) = current.as_mut() {
                    value.push(' ');
                    value.push_str(line.trim());
                }
                continue;
            }

            if let Some((name, value)) = current.take() {
                headers.add(name, value.trim().to_string());
            }

            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| Error::InvalidHeader(line.to_string()))?;
            current = Some((name.trim().to_string(), value.trim().to_string()));
        }

        if let Some((name, value)) = current {
            headers.add(name, value.trim().to_string());
        }

        Ok(headers)
    }

    /// Encodes a header value using RFC 2047 if needed.
    #[must_use]
    pub fn encode_value(value: &str) -> String {
        encode_rfc2047(value, HEADER_CHARSET)
    }

    /// Decodes a header value from RFC 2047 if encoded.
    ///
    /// # Errors
    ///
    /// Returns an error if decoding fails.
    pub fn decode_value(value: &str) -> Result<String> {
        decode_rfc2047(value)
    }
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.entries {
            write!(f, "{name}: ")?;
            if is_structured(name) {
                write_folded(f, name.len() + 2, value)?;
            } else {
                f.write_str(value)?;
            }
            f.write_str("\r\n")?;
        }
        Ok(())
    }
}

/// Headers whose values are `type; param=value` lists.
fn is_structured(name: &str) -> bool {
    name.eq_ignore_ascii_case("Content-Type") || name.eq_ignore_ascii_case("Content-Disposition")
}

/// Writes `value`, folding at `; ` parameter separators once the line
/// would pass [`MAX_HEADER_LINE_LENGTH`].
///
/// Unfolding restores the original text, so a separator followed by more
/// whitespace is never a fold point.
fn write_folded(f: &mut fmt::Formatter<'_>, start: usize, value: &str) -> fmt::Result {
    if value.contains("\r\n") || start + value.len() <= MAX_HEADER_LINE_LENGTH {
        return f.write_str(value);
    }

    let mut segments = value.split("; ");
    let first = segments.next().unwrap_or_default();
    f.write_str(first)?;
    let mut line = start + first.len();
    for segment in segments {
        let foldable = !segment.starts_with([' ', '\t']);
        if foldable && line + 2 + segment.len() > MAX_HEADER_LINE_LENGTH {
            write!(f, ";\r\n {segment}")?;
            line = 1 + segment.len();
        } else {
            write!(f, "; {segment}")?;
            line += 2 + segment.len();
        }
    }
    Ok(())
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    #[test]
    fn test_headers_new() {
        let headers = Headers::new();
        assert!(headers.is_empty());
    }

    #[test]
    fn test_headers_add_get() {
        let mut headers = Headers::new();
        headers.add("Content-Type", "text/plain");
        assert_eq!(headers.get("Content-Type"), Some("text/plain"));
        assert_eq!(headers.get("content-type"), Some("text/plain")); // Case insensitive
    }

    #[test]
    fn test_headers_set() {
        let mut headers = Headers::new();
        headers.add("To", "alice@example.com");
        headers.add("Subject", "Hi");
        headers.add("To", "bob@example.com");
        assert_eq!(headers.get_all("To").len(), 2);

        headers.set("to", "charlie@example.com");
        assert_eq!(headers.get_all("To"), vec!["charlie@example.com"]);
        let names: Vec<&str> = headers.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["To", "Subject"]);
    }

    #[test]
    fn test_headers_remove() {
        let mut headers = Headers::new();
        headers.add("Subject", "Test");
        assert!(headers.get("Subject").is_some());

        headers.remove("subject");
        assert!(headers.get("Subject").is_none());
    }

    #[test]
    fn test_headers_parse() {
        let text = concat!(
            "From: sender@example.com\r\n",
            "To: recipient@example.com\r\n",
            "Subject: Test Message\r\n",
            "Content-Type: text/plain;\r\n",
            " charset=utf-8\r\n",
            "\r\n",
            "Body: not a header\r\n"
        );

        let headers = Headers::parse(text).unwrap();
        assert_eq!(headers.len(), 4);
        assert_eq!(headers.get("From"), Some("sender@example.com"));
        assert_eq!(headers.get("To"), Some("recipient@example.com"));
        assert_eq!(headers.get("Subject"), Some("Test Message"));
        assert_eq!(
            headers.get("Content-Type"),
            Some("text/plain; charset=utf-8")
        );
    }

    #[test]
    fn test_headers_parse_rejects_garbage() {
        assert!(Headers::parse("not a header line\r\n").is_err());
    }

    #[test]
    fn test_headers_display_keeps_order() {
        let mut headers = Headers::new();
        headers.add("From", "sender@example.com");
        headers.add("To", "recipient@example.com");
        headers.add("MIME-Version", "1.0");

        assert_eq!(
            headers.to_string(),
            "From: sender@example.com\r\nTo: recipient@example.com\r\nMIME-Version: 1.0\r\n"
        );
    }

    #[test]
    fn test_long_parameter_lists_are_folded() {
        let boundary = format!("=_{}", "0123456789abcdef".repeat(2));
        let value = format!("multipart/alternative; boundary=\"{boundary}\"");
        let mut headers = Headers::new();
        headers.add("Content-Type", value.as_str());
        headers.add("MIME-Version", "1.0");

        let text = headers.to_string();
        assert_eq!(
            text,
            format!(
                "Content-Type: multipart/alternative;\r\n boundary=\"{boundary}\"\r\nMIME-Version: 1.0\r\n"
            )
        );
        assert!(
            text.split("\r\n")
                .all(|line| line.len() <= MAX_HEADER_LINE_LENGTH)
        );
        assert_eq!(Headers::parse(&text).unwrap().get("Content-Type"), Some(value.as_str()));
    }

    #[test]
    fn test_short_and_unstructured_values_are_untouched() {
        let subject = "a; ".repeat(40);
        let mut headers = Headers::new();
        headers.add("Content-Type", "text/plain; charset=utf-8");
        headers.add("Subject", subject.as_str());
        assert_eq!(
            headers.to_string(),
            format!("Content-Type: text/plain; charset=utf-8\r\nSubject: {subject}\r\n")
        );
    }

    #[test]
    fn test_fold_keeps_extra_whitespace_inline() {
        let value = format!("attachment; filename=\"{};   b.pdf\"", "a".repeat(70));
        let mut headers = Headers::new();
        headers.add("Content-Disposition", value.as_str());

        let text = headers.to_string();
        assert!(text.starts_with("Content-Disposition: attachment;\r\n filename="));
        assert!(text.contains(";   b.pdf"));
        assert_eq!(
            Headers::parse(&text).unwrap().get("Content-Disposition"),
            Some(value.as_str())
        );
    }

    #[test]
    fn test_encode_value_round_trip() {
        assert_eq!(Headers::encode_value("Weekly report"), "Weekly report");

        let encoded = Headers::encode_value("Grüße aus Köln");
        assert!(encoded.starts_with("=?UTF-8?B?"));
        assert_eq!(Headers::decode_value(&encoded).unwrap(), "Grüße aus Köln");
    }
}
