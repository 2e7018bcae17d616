//! Parsed MIME message structure.
//!
//! The parser understands nested multiparts and the transfer encodings this
//! crate produces. It is what callers (and the tests) use to check that a
//! rendered message reads back as intended.

use crate::content_type::ContentType;
use crate::encoding::{decode_base64, decode_quoted_printable_bytes, decode_rfc2047};
use crate::error::{Error, Result};
use crate::header::Headers;
use std::fmt;

/// Transfer encoding types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferEncoding {
    /// 7-bit ASCII.
    SevenBit,
    /// 8-bit binary.
    EightBit,
    /// Base64 encoding.
    Base64,
    /// Quoted-Printable encoding.
    QuotedPrintable,
    /// Binary (no encoding).
    Binary,
}

impl TransferEncoding {
    /// Parses transfer encoding from string.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "8bit" => Self::EightBit,
            "base64" => Self::Base64,
            "quoted-printable" => Self::QuotedPrintable,
            "binary" => Self::Binary,
            _ => Self::SevenBit, // Default (includes "7bit")
        }
    }

    /// Decodes `body` according to this encoding.
    ///
    /// # Errors
    ///
    /// Returns an error if the body is not valid for the encoding.
    pub fn decode(self, body: &[u8]) -> Result<Vec<u8>> {
        match self {
            Self::Base64 => decode_base64(&String::from_utf8_lossy(body)),
            Self::QuotedPrintable => decode_quoted_printable_bytes(body),
            Self::SevenBit | Self::EightBit | Self::Binary => Ok(body.to_vec()),
        }
    }
}

impl fmt::Display for TransferEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SevenBit => write!(f, "7bit"),
            Self::EightBit => write!(f, "8bit"),
            Self::Base64 => write!(f, "base64"),
            Self::QuotedPrintable => write!(f, "quoted-printable"),
            Self::Binary => write!(f, "binary"),
        }
    }
}

/// MIME message part.
#[derive(Debug, Clone)]
pub struct Part {
    /// Part headers.
    pub headers: Headers,
    /// Part body (raw, still transfer-encoded). Empty for multipart parts.
    pub body: Vec<u8>,
    /// Child parts when this part is itself a multipart.
    pub parts: Vec<Part>,
}

impl Part {
    /// Creates a new leaf part.
    #[must_use]
    pub const fn new(headers: Headers, body: Vec<u8>) -> Self {
        Self {
            headers,
            body,
            parts: Vec::new(),
        }
    }

    /// Parses a part (headers, blank line, body).
    ///
    /// # Errors
    ///
    /// Returns an error if headers or a nested multipart are malformed.
    pub fn parse(raw: &str) -> Result<Self> {
        let (header_text, body) = split_head(raw);
        let headers = Headers::parse(header_text)?;
        let mut part = Self::new(headers, Vec::new());

        let content_type = part.content_type()?;
        if content_type.is_multipart() {
            let boundary = content_type.boundary().ok_or(Error::MissingBoundary)?;
            part.parts = split_multipart(body, boundary)?
                .into_iter()
                .map(Self::parse)
                .collect::<Result<_>>()?;
        } else {
            part.body = body.as_bytes().to_vec();
        }

        Ok(part)
    }

    /// Gets the content type.
    ///
    /// # Errors
    ///
    /// Returns an error if content type header is invalid.
    pub fn content_type(&self) -> Result<ContentType> {
        self.headers
            .get("content-type")
            .map_or_else(|| Ok(ContentType::text_plain()), ContentType::parse)
    }

    /// Gets the transfer encoding.
    #[must_use]
    pub fn transfer_encoding(&self) -> TransferEncoding {
        self.headers
            .get("content-transfer-encoding")
            .map_or(TransferEncoding::SevenBit, TransferEncoding::parse)
    }

    /// Decodes the body according to the transfer encoding.
    ///
    /// # Errors
    ///
    /// Returns an error if decoding fails.
    pub fn decode_body(&self) -> Result<Vec<u8>> {
        self.transfer_encoding().decode(&self.body)
    }

    /// Gets the decoded body as a string.
    ///
    /// # Errors
    ///
    /// Returns an error if decoding or UTF-8 conversion fails.
    pub fn body_text(&self) -> Result<String> {
        let decoded = self.decode_body()?;
        String::from_utf8(decoded).map_err(Into::into)
    }

    /// Returns true if `Content-Disposition` is `attachment`.
    #[must_use]
    pub fn is_attachment(&self) -> bool {
        self.headers
            .get("content-disposition")
            .and_then(|d| d.split(';').next())
            .is_some_and(|d| d.trim().eq_ignore_ascii_case("attachment"))
    }

    /// Filename from `Content-Disposition`, falling back to the `name`
    /// parameter of `Content-Type`. Encoded-words are decoded.
    ///
    /// # Errors
    ///
    /// Returns an error if a header is malformed.
    pub fn filename(&self) -> Result<Option<String>> {
        let from_disposition = match self.headers.get("content-disposition") {
            // Reuse the parameter parser; the disposition type stands in for type/subtype.
            Some(d) => ContentType::parse(&format!("x/{d}"))?
                .parameter("filename")
                .map(ToString::to_string),
            None => None,
        };
        let name = match from_disposition {
            Some(name) => Some(name),
            None => self.content_type()?.parameter("name").map(ToString::to_string),
        };
        name.map(|n| decode_rfc2047(&n)).transpose()
    }

    /// Depth-first walk over this part and all descendants.
    fn walk<'a>(&'a self, out: &mut Vec<&'a Self>) {
        out.push(self);
        for child in &self.parts {
            child.walk(out);
        }
    }
}

/// MIME message.
#[derive(Debug, Clone)]
pub struct Message {
    /// Message headers.
    pub headers: Headers,
    /// Message parts (empty for single-part messages).
    pub parts: Vec<Part>,
    /// Body for single-part messages.
    pub body: Option<Vec<u8>>,
}

impl Message {
    /// Creates a new message.
    #[must_use]
    pub const fn new(headers: Headers) -> Self {
        Self {
            headers,
            parts: Vec::new(),
            body: None,
        }
    }

    /// Creates a single-part message.
    #[must_use]
    pub const fn single_part(headers: Headers, body: Vec<u8>) -> Self {
        Self {
            headers,
            parts: Vec::new(),
            body: Some(body),
        }
    }

    /// Creates a multipart message.
    #[must_use]
    pub const fn multipart(headers: Headers, parts: Vec<Part>) -> Self {
        Self {
            headers,
            parts,
            body: None,
        }
    }

    /// Parses a raw message.
    ///
    /// # Errors
    ///
    /// Returns an error if headers, content types or multipart framing are
    /// malformed.
    pub fn parse(raw: &str) -> Result<Self> {
        let part = Part::parse(raw)?;
        let message = if part.content_type()?.is_multipart() {
            Self::multipart(part.headers, part.parts)
        } else {
            Self::single_part(part.headers, part.body)
        };
        Ok(message)
    }

    /// Gets the content type.
    ///
    /// # Errors
    ///
    /// Returns an error if content type header is invalid.
    pub fn content_type(&self) -> Result<ContentType> {
        self.headers
            .get("content-type")
            .map_or_else(|| Ok(ContentType::text_plain()), ContentType::parse)
    }

    /// Checks if this is a multipart message.
    ///
    /// # Errors
    ///
    /// Returns an error if content type cannot be determined.
    pub fn is_multipart(&self) -> Result<bool> {
        Ok(self.content_type()?.is_multipart())
    }

    /// Gets the From header.
    #[must_use]
    pub fn from(&self) -> Option<&str> {
        self.headers.get("from")
    }

    /// Gets the To header.
    #[must_use]
    pub fn to(&self) -> Option<&str> {
        self.headers.get("to")
    }

    /// Gets the raw (possibly encoded) Subject header.
    #[must_use]
    pub fn subject(&self) -> Option<&str> {
        self.headers.get("subject")
    }

    /// Gets the Subject header with encoded-words decoded.
    ///
    /// # Errors
    ///
    /// Returns an error if an encoded-word is malformed.
    pub fn decoded_subject(&self) -> Result<Option<String>> {
        self.subject().map(decode_rfc2047).transpose()
    }

    /// Gets the body as text for single-part messages.
    ///
    /// # Errors
    ///
    /// Returns an error if this is a multipart message or decoding fails.
    pub fn body_text(&self) -> Result<String> {
        if !self.parts.is_empty() {
            return Err(Error::InvalidMultipart(
                "Use parts for multipart messages".to_string(),
            ));
        }

        let body = self
            .body
            .as_ref()
            .ok_or_else(|| Error::InvalidMultipart("No body".to_string()))?;

        let transfer_encoding = self
            .headers
            .get("content-transfer-encoding")
            .map_or(TransferEncoding::SevenBit, TransferEncoding::parse);

        String::from_utf8(transfer_encoding.decode(body)?).map_err(Into::into)
    }

    /// All parts at any depth, depth-first, in document order.
    #[must_use]
    pub fn all_parts(&self) -> Vec<&Part> {
        let mut out = Vec::new();
        for part in &self.parts {
            part.walk(&mut out);
        }
        out
    }

    /// Finds the first text/plain part at any depth.
    ///
    /// # Errors
    ///
    /// Returns an error if no text part is found or decoding fails.
    pub fn text_part(&self) -> Result<String> {
        self.find_text("plain")
    }

    /// Finds the first text/html part at any depth.
    ///
    /// # Errors
    ///
    /// Returns an error if no HTML part is found or decoding fails.
    pub fn html_part(&self) -> Result<String> {
        self.find_text("html")
    }

    fn find_text(&self, sub_type: &str) -> Result<String> {
        for part in self.all_parts() {
            if part.content_type()?.is("text", sub_type) && !part.is_attachment() {
                return part.body_text();
            }
        }

        Err(Error::InvalidMultipart(format!("No text/{sub_type} part found")))
    }

    /// Attachment parts in document order.
    #[must_use]
    pub fn attachments(&self) -> Vec<&Part> {
        self.all_parts()
            .into_iter()
            .filter(|p| p.is_attachment())
            .collect()
    }
}

/// Splits raw text at the first blank line.
fn split_head(raw: &str) -> (&str, &str) {
    if let Some(rest) = raw.strip_prefix("\r\n") {
        return ("", rest);
    }
    if let Some(idx) = raw.find("\r\n\r\n") {
        return (&raw[..idx], &raw[idx + 4..]);
    }
    if let Some(idx) = raw.find("\n\n") {
        return (&raw[..idx], &raw[idx + 2..]);
    }
    (raw, "")
}

/// Returns the body parts between `--boundary` delimiter lines (RFC 2046 §5.1.1).
///
/// The line break in front of a delimiter belongs to the delimiter, so each
/// returned slice is exactly what was written between them. Preamble and
/// epilogue are dropped.
fn split_multipart<'a>(body: &'a str, boundary: &str) -> Result<Vec<&'a str>> {
    let delimiter = format!("--{boundary}");
    let mut parts = Vec::new();

    let Some((mut start, _)) = find_delimiter(body, 0, &delimiter) else {
        return Err(Error::InvalidMultipart(format!(
            "No opening boundary {boundary}"
        )));
    };

    loop {
        let after = start + delimiter.len();
        if body[after..].starts_with("--") {
            return Ok(parts);
        }

        let content_start = body[after..]
            .find('\n')
            .map(|i| after + i + 1)
            .ok_or_else(|| Error::InvalidMultipart("Truncated part".to_string()))?;

        let Some((next, content_end)) = find_delimiter(body, content_start, &delimiter) else {
            return Err(Error::InvalidMultipart(format!(
                "Missing closing boundary {boundary}"
            )));
        };
        parts.push(&body[content_start..content_end.max(content_start)]);
        start = next;
    }
}

/// Finds the next delimiter line at or after `from`.
///
/// Returns the delimiter's position and the end of the content before it.
fn find_delimiter(body: &str, from: usize, delimiter: &str) -> Option<(usize, usize)> {
    let mut search = from;
    while let Some(offset) = body[search..].find(delimiter) {
        let idx = search + offset;
        let tail = &body[idx + delimiter.len()..];
        let terminated = tail.is_empty()
            || tail.starts_with("--")
            || tail.starts_with(['\r', '\n', ' ', '\t']);

        if terminated {
            let head = &body[..idx];
            if idx == 0 {
                return Some((0, 0));
            }
            if head.ends_with("\r\n") {
                return Some((idx, idx - 2));
            }
            if head.ends_with('\n') {
                return Some((idx, idx - 1));
            }
        }
        search = idx + delimiter.len();
    }
    None
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
    fn test_transfer_encoding_parse() {
        assert_eq!(TransferEncoding::parse("7bit"), TransferEncoding::SevenBit);
        assert_eq!(TransferEncoding::parse("base64"), TransferEncoding::Base64);
        assert_eq!(
            TransferEncoding::parse("Quoted-Printable"),
            TransferEncoding::QuotedPrintable
        );
    }

    #[test]
    fn test_part_body_text() {
        let mut headers = Headers::new();
        headers.add("content-type", "text/plain; charset=utf-8");
        headers.add("content-transfer-encoding", "quoted-printable");
        let part = Part::new(headers, b"H=C3=A9llo".to_vec());

        assert_eq!(part.body_text().unwrap(), "Héllo");
    }

    #[test]
    fn test_message_single_part() {
        let raw = concat!(
            "From: sender@example.com\r\n",
            "To: recipient@example.com\r\n",
            "Subject: =?UTF-8?B?SMOpbGxv?=\r\n",
            "\r\n",
            "Hello, World!"
        );
        let message = Message::parse(raw).unwrap();

        assert_eq!(message.from(), Some("sender@example.com"));
        assert_eq!(message.to(), Some("recipient@example.com"));
        assert_eq!(message.decoded_subject().unwrap().as_deref(), Some("Héllo"));
        assert!(!message.is_multipart().unwrap());
        assert_eq!(message.body_text().unwrap(), "Hello, World!");
    }

    #[test]
    fn test_message_nested_multipart() {
        let raw = concat!(
            "Content-Type: multipart/mixed; boundary=\"outer\"\r\n",
            "\r\n",
            "preamble\r\n",
            "--outer\r\n",
            "Content-Type: multipart/alternative; boundary=\"inner\"\r\n",
            "\r\n",
            "--inner\r\n",
            "Content-Type: text/plain\r\n",
            "\r\n",
            "plain\r\n",
            "--inner\r\n",
            "Content-Type: text/html\r\n",
            "\r\n",
            "<b>html</b>\r\n",
            "--inner--\r\n",
            "--outer\r\n",
            "Content-Type: application/pdf; name=\"a.pdf\"\r\n",
            "Content-Disposition: attachment; filename=\"a.pdf\"\r\n",
            "Content-Transfer-Encoding: base64\r\n",
            "\r\n",
            "JVBERg==\r\n",
            "--outer--\r\n",
            "epilogue\r\n",
        );
        let message = Message::parse(raw).unwrap();

        assert!(message.is_multipart().unwrap());
        assert_eq!(message.parts.len(), 2);
        assert_eq!(message.parts[0].parts.len(), 2);
        assert_eq!(message.text_part().unwrap(), "plain");
        assert_eq!(message.html_part().unwrap(), "<b>html</b>");

        let attachments = message.attachments();
        assert_eq!(attachments.len(), 1);
        assert_eq!(attachments[0].filename().unwrap().as_deref(), Some("a.pdf"));
        assert_eq!(attachments[0].decode_body().unwrap(), b"%PDF");
    }

    #[test]
    fn test_boundary_prefix_is_not_a_delimiter() {
        let raw = concat!(
            "Content-Type: multipart/alternative; boundary=\"ab\"\r\n",
            "\r\n",
            "--ab\r\n",
            "\r\n",
            "--abc is just text\r\n",
            "--ab--\r\n",
        );
        let message = Message::parse(raw).unwrap();
        assert_eq!(message.parts.len(), 1);
        assert_eq!(message.parts[0].body, b"--abc is just text");
    }

    #[test]
    fn test_empty_part_body() {
        let raw = concat!(
            "Content-Type: multipart/alternative; boundary=\"b\"\r\n",
            "\r\n",
            "--b\r\n",
            "Content-Type: text/plain\r\n",
            "\r\n",
            "\r\n",
            "--b--\r\n",
        );
        let message = Message::parse(raw).unwrap();
        assert_eq!(message.text_part().unwrap(), "");
    }

    #[test]
    fn test_missing_closing_boundary() {
        let raw = "Content-Type: multipart/mixed; boundary=\"b\"\r\n\r\n--b\r\n\r\nbody";
        assert!(matches!(Message::parse(raw), Err(Error::InvalidMultipart(_))));
    }

    #[test]
    fn test_missing_boundary_parameter() {
        let raw = "Content-Type: multipart/mixed\r\n\r\n--b\r\n\r\nbody\r\n--b--";
        assert!(matches!(Message::parse(raw), Err(Error::MissingBoundary)));
    }
}
