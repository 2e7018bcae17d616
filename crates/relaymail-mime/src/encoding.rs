//! MIME encoding and decoding utilities.
//!
//! Supports Base64 (with RFC 2045 line wrapping), Quoted-Printable and
//! RFC 2047 encoded-words for header values.

use crate::error::{Error, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::fmt::Write as _;

/// Maximum encoded line length for body transfer encodings.
pub const MAX_LINE_LENGTH: usize = 76;

/// Maximum length of a single RFC 2047 encoded-word.
pub const MAX_ENCODED_WORD_LENGTH: usize = 75;

/// Encodes data as Base64.
#[must_use]
pub fn encode_base64(data: &[u8]) -> String {
    STANDARD.encode(data)
}

/// Encodes data as Base64 split into CRLF-terminated lines of at most
/// `width` characters. The last line carries no trailing CRLF.
#[must_use]
pub fn encode_base64_wrapped(data: &[u8], width: usize) -> String {
    let encoded = STANDARD.encode(data);
    let width = width.max(4);
    let mut result = String::with_capacity(encoded.len() + 2 * (encoded.len() / width + 1));

    let mut start = 0;
    while start < encoded.len() {
        let end = (start + width).min(encoded.len());
        if start > 0 {
            result.push_str("\r\n");
        }
        // Base64 output is ASCII, so every index is a char boundary.
        result.push_str(&encoded[start..end]);
        start = end;
    }

    result
}

/// Decodes Base64 data. Line breaks and other whitespace are ignored.
///
/// # Errors
///
/// Returns an error if the input is not valid Base64.
pub fn decode_base64(data: &str) -> Result<Vec<u8>> {
    if data.contains(char::is_whitespace) {
        let cleaned: String = data.chars().filter(|c| !c.is_whitespace()).collect();
        return STANDARD.decode(cleaned).map_err(Into::into);
    }
    STANDARD.decode(data).map_err(Into::into)
}

/// Encodes text using Quoted-Printable encoding (RFC 2045).
///
/// CRLF pairs become hard line breaks. Lone CR or LF bytes, `=`, bytes
/// outside printable ASCII and whitespace in front of a line break are
/// escaped, so decoding returns the input byte for byte.
#[must_use]
pub fn encode_quoted_printable(text: &str) -> String {
    let bytes = text.as_bytes();
    let mut result = String::with_capacity(bytes.len() + bytes.len() / 4);
    let mut line_length = 0;
    let mut i = 0;

    while i < bytes.len() {
        let byte = bytes[i];

        if byte == b'\r' && bytes.get(i + 1) == Some(&b'\n') {
            result.push_str("\r\n");
            line_length = 0;
            i += 2;
            continue;
        }

        let before_break = match bytes.get(i + 1) {
            None => true,
            Some(b'\r') => bytes.get(i + 2) == Some(&b'\n'),
            Some(_) => false,
        };

        let literal = match byte {
            b'!'..=b'<' | b'>'..=b'~' => true,
            b' ' | b'\t' => !before_break,
            _ => false,
        };
        let width = if literal { 1 } else { 3 };

        // Leave room for the trailing "=" of a soft line break.
        if line_length + width > MAX_LINE_LENGTH - 1 {
            result.push_str("=\r\n");
            line_length = 0;
        }

        if literal {
            result.push(char::from(byte));
        } else {
            let _ = write!(result, "={byte:02X}");
        }
        line_length += width;
        i += 1;
    }

    result
}

/// Decodes Quoted-Printable text (RFC 2045) into raw bytes.
///
/// # Errors
///
/// Returns an error if the input contains invalid escape sequences.
pub fn decode_quoted_printable_bytes(data: &[u8]) -> Result<Vec<u8>> {
    let mut result = Vec::with_capacity(data.len());
    let mut i = 0;

    while i < data.len() {
        if data[i] != b'=' {
            result.push(data[i]);
            i += 1;
            continue;
        }

        // Soft line break
        if data.get(i + 1..i + 3) == Some(b"\r\n".as_slice()) {
            i += 3;
            continue;
        }
        if data.get(i + 1) == Some(&b'\n') {
            i += 2;
            continue;
        }

        let (Some(&high), Some(&low)) = (data.get(i + 1), data.get(i + 2)) else {
            return Err(Error::InvalidEncoding(
                "Incomplete escape sequence".to_string(),
            ));
        };
        match (hex_value(high), hex_value(low)) {
            (Some(high), Some(low)) => result.push((high << 4) | low),
            _ => {
                return Err(Error::InvalidEncoding(format!(
                    "Invalid hex: {}{}",
                    char::from(high),
                    char::from(low)
                )));
            }
        }
        i += 3;
    }

    Ok(result)
}

/// Decodes Quoted-Printable text (RFC 2045).
///
/// # Errors
///
/// Returns an error if the input contains invalid escape sequences or the
/// decoded bytes are not UTF-8.
pub fn decode_quoted_printable(text: &str) -> Result<String> {
    let decoded = decode_quoted_printable_bytes(text.as_bytes())?;
    String::from_utf8(decoded).map_err(Into::into)
}

const fn hex_value(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        _ => None,
    }
}

/// Returns true if a header value must be carried as encoded-words.
///
/// Printable ASCII, space and tab pass through; any other byte (8-bit
/// data, CR, LF and other controls) requires encoding. So does `=?`, or a
/// reader would decode literal text that looks like an encoded-word.
#[must_use]
pub fn needs_encoding(value: &str) -> bool {
    value.contains("=?")
        || value
            .bytes()
            .any(|b| !matches!(b, b' ' | b'\t' | b'!'..=b'~'))
}

/// Splits `text` into B-encoded words of at most
/// [`MAX_ENCODED_WORD_LENGTH`] characters each, never splitting a character.
#[must_use]
pub fn encoded_words(text: &str, charset: &str) -> Vec<String> {
    // "=?" charset "?B?" payload "?="
    let overhead = charset.len() + 7;
    let payload = MAX_ENCODED_WORD_LENGTH.saturating_sub(overhead).max(4);
    let max_bytes = (payload / 4 * 3).max(4);

    let mut words = Vec::new();
    let mut chunk_start = 0;
    let mut chunk_len = 0;

    for (idx, ch) in text.char_indices() {
        if chunk_len + ch.len_utf8() > max_bytes && chunk_len > 0 {
            words.push(encoded_word(&text[chunk_start..idx], charset));
            chunk_start = idx;
            chunk_len = 0;
        }
        chunk_len += ch.len_utf8();
    }
    if chunk_len > 0 || words.is_empty() {
        words.push(encoded_word(&text[chunk_start..], charset));
    }

    words
}

fn encoded_word(text: &str, charset: &str) -> String {
    format!("=?{charset}?B?{}?=", encode_base64(text.as_bytes()))
}

/// Encodes a header value using RFC 2047 encoding when needed.
///
/// Format: `=?charset?B?encoded-text?=`. Values that do not fit into one
/// encoded-word are split into several, folded with `CRLF SP`. Values that
/// do not need encoding are returned unchanged.
#[must_use]
pub fn encode_rfc2047(text: &str, charset: &str) -> String {
    if !needs_encoding(text) {
        return text.to_string();
    }
    encoded_words(text, charset).join("\r\n ")
}

/// Decodes RFC 2047 encoded-words anywhere in a header value.
///
/// Whitespace between adjacent encoded-words is dropped; text outside
/// encoded-words is kept verbatim.
///
/// # Errors
///
/// Returns an error if an encoded-word carries an unknown encoding,
/// an unsupported charset or malformed payload.
pub fn decode_rfc2047(text: &str) -> Result<String> {
    let mut result = String::with_capacity(text.len());
    let mut rest = text;
    let mut after_word = false;

    while let Some(start) = rest.find("=?") {
        let (before, candidate) = rest.split_at(start);
        if let Some((decoded, consumed)) = parse_encoded_word(candidate)? {
            if !(after_word && before.trim().is_empty()) {
                result.push_str(before);
            }
            result.push_str(&decoded);
            rest = &candidate[consumed..];
            after_word = true;
        } else {
            result.push_str(before);
            result.push_str("=?");
            rest = &candidate[2..];
            after_word = false;
        }
    }
    result.push_str(rest);

    Ok(result)
}

/// Parses one encoded-word at the start of `text`.
///
/// Returns `None` when the text merely looks like one.
fn parse_encoded_word(text: &str) -> Result<Option<(String, usize)>> {
    let inner = &text[2..];
    let mut fields = inner.splitn(3, '?');
    let (Some(charset), Some(encoding), Some(remainder)) =
        (fields.next(), fields.next(), fields.next())
    else {
        return Ok(None);
    };
    let Some(end) = remainder.find("?=") else {
        return Ok(None);
    };
    let payload = &remainder[..end];
    if charset.is_empty()
        || charset.contains(char::is_whitespace)
        || encoding.len() != 1
        || payload.contains(char::is_whitespace)
    {
        return Ok(None);
    }
    let consumed = 2 + charset.len() + 1 + encoding.len() + 1 + end + 2;

    let bytes = match encoding {
        "B" | "b" => decode_base64(payload)?,
        "Q" | "q" => decode_quoted_printable_bytes(payload.replace('_', " ").as_bytes())?,
        _ => {
            return Err(Error::InvalidEncoding(format!(
                "Unknown encoding: {encoding}"
            )));
        }
    };

    // RFC 2231 language suffix: charset*lang
    let charset = charset.split('*').next().unwrap_or(charset);
    let decoded = match charset.to_ascii_lowercase().as_str() {
        "utf-8" | "utf8" | "us-ascii" => String::from_utf8(bytes)?,
        "iso-8859-1" | "latin1" => bytes.iter().map(|&b| char::from(b)).collect(),
        other => {
            return Err(Error::InvalidEncoding(format!(
                "Unsupported charset: {other}"
            )));
        }
    };

    Ok(Some((decoded, consumed)))
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
    fn test_base64_encode_decode() {
        let data = b"Hello, World!";
        let encoded = encode_base64(data);
        assert_eq!(encoded, "SGVsbG8sIFdvcmxkIQ==");

        let decoded = decode_base64(&encoded).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn test_base64_wrapped_line_length() {
        let data = vec![0xABu8; 300];
        let encoded = encode_base64_wrapped(&data, MAX_LINE_LENGTH);
        let lines: Vec<&str> = encoded.split("\r\n").collect();
        assert!(lines.len() > 1);
        assert!(lines.iter().all(|l| l.len() <= MAX_LINE_LENGTH));
        assert_eq!(lines[0].len(), MAX_LINE_LENGTH);
        assert!(!encoded.ends_with("\r\n"));
        assert_eq!(decode_base64(&encoded).unwrap(), data);
    }

    #[test]
    fn test_base64_wrapped_empty() {
        assert_eq!(encode_base64_wrapped(b"", MAX_LINE_LENGTH), "");
    }

    #[test]
    fn test_quoted_printable_encode() {
        let text = "Hello, World!";
        let encoded = encode_quoted_printable(text);
        assert_eq!(encoded, "Hello, World!");

        let text = "Héllo, Wørld!";
        let encoded = encode_quoted_printable(text);
        assert_eq!(encoded, "H=C3=A9llo, W=C3=B8rld!");
    }

    #[test]
    fn test_quoted_printable_line_breaks() {
        assert_eq!(encode_quoted_printable("a\r\nb"), "a\r\nb");
        assert_eq!(encode_quoted_printable("a\nb"), "a=0Ab");
        assert_eq!(encode_quoted_printable("a \r\nb"), "a=20\r\nb");
        assert_eq!(encode_quoted_printable("tail\t"), "tail=09");
        assert_eq!(encode_quoted_printable("1+1=2"), "1+1=3D2");
    }

    #[test]
    fn test_quoted_printable_soft_breaks_keep_lines_short() {
        let text = "x".repeat(200);
        let encoded = encode_quoted_printable(&text);
        assert!(encoded.split("\r\n").all(|l| l.len() <= MAX_LINE_LENGTH));
        assert_eq!(decode_quoted_printable(&encoded).unwrap(), text);
    }

    #[test]
    fn test_quoted_printable_escape_not_split() {
        let text = format!("{}é", "y".repeat(74));
        let encoded = encode_quoted_printable(&text);
        for line in encoded.split("\r\n") {
            assert!(line.len() <= MAX_LINE_LENGTH);
        }
        assert_eq!(decode_quoted_printable(&encoded).unwrap(), text);
    }

    #[test]
    fn test_quoted_printable_decode() {
        let encoded = "Hello, World!";
        let decoded = decode_quoted_printable(encoded).unwrap();
        assert_eq!(decoded, "Hello, World!");

        let encoded = "H=C3=A9llo";
        let decoded = decode_quoted_printable(encoded).unwrap();
        assert_eq!(decoded, "Héllo");
    }

    #[test]
    fn test_quoted_printable_soft_line_break() {
        let encoded = "Hello=\r\nWorld";
        let decoded = decode_quoted_printable(encoded).unwrap();
        assert_eq!(decoded, "HelloWorld");

        assert_eq!(decode_quoted_printable("Hello=\nWorld").unwrap(), "HelloWorld");
    }

    #[test]
    fn test_quoted_printable_invalid_escape() {
        assert!(decode_quoted_printable("bad=ZZ").is_err());
        assert!(decode_quoted_printable("short=4").is_err());
    }

    #[test]
    fn test_needs_encoding() {
        assert!(!needs_encoding("Plain subject: 100% ok?"));
        assert!(needs_encoding("Héllo"));
        assert!(needs_encoding("line\r\nBcc: evil@example.com"));
        assert!(needs_encoding("=?UTF-8?B?SGk=?="));
        assert!(!needs_encoding("a = b? yes"));
    }

    #[test]
    fn test_rfc2047_encode() {
        let text = "Hello";
        let encoded = encode_rfc2047(text, "UTF-8");
        assert_eq!(encoded, "Hello"); // No encoding needed

        let text = "Héllo";
        let encoded = encode_rfc2047(text, "UTF-8");
        assert_eq!(encoded, "=?UTF-8?B?SMOpbGxv?=");
    }

    #[test]
    fn test_rfc2047_long_value_is_folded() {
        let text = "Überweisung ".repeat(12);
        let encoded = encode_rfc2047(&text, "UTF-8");
        let words: Vec<&str> = encoded.split("\r\n ").collect();
        assert!(words.len() > 1);
        for word in &words {
            assert!(word.len() <= MAX_ENCODED_WORD_LENGTH);
            assert!(word.starts_with("=?UTF-8?B?") && word.ends_with("?="));
        }
        assert_eq!(decode_rfc2047(&encoded).unwrap(), text);
    }

    #[test]
    fn test_rfc2047_decode() {
        let encoded = "Hello";
        let decoded = decode_rfc2047(encoded).unwrap();
        assert_eq!(decoded, "Hello");

        let encoded = "=?utf-8?B?SMOpbGxv?=";
        let decoded = decode_rfc2047(encoded).unwrap();
        assert_eq!(decoded, "Héllo");
    }

    #[test]
    fn test_rfc2047_quoted_printable() {
        let encoded = "=?utf-8?Q?H=C3=A9llo_there?=";
        let decoded = decode_rfc2047(encoded).unwrap();
        assert_eq!(decoded, "Héllo there");
    }

    #[test]
    fn test_rfc2047_mixed_text() {
        let decoded = decode_rfc2047("Re: =?UTF-8?B?SMOpbGxv?= world").unwrap();
        assert_eq!(decoded, "Re: Héllo world");

        let decoded = decode_rfc2047("=?UTF-8?B?SMOp?= =?UTF-8?B?bGxv?=").unwrap();
        assert_eq!(decoded, "Héllo");

        assert_eq!(decode_rfc2047("a =? b").unwrap(), "a =? b");
    }
}
