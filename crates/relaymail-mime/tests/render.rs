//! Integration tests for message rendering.
//!
//! Every rendered message is read back with [`Message::parse`] to check
//! that it decodes to what was put in.

#![allow(clippy::unwrap_used)]

use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

use proptest::prelude::*;
use relaymail_mime::{Error, Headers, MAX_HEADER_LINE_LENGTH, Message, OutboundMessage, encoding};

const PNG: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR\0\0\0\x01\0\0\0\x01\x08\x06\0\0\0";
const JPEG: &[u8] = b"\xff\xd8\xff\xe0\0\x10JFIF\0\x01\x01\0\0\x01\0\x01\0\0";

fn base_message() -> OutboundMessage {
    let mut message = OutboundMessage::new();
    message
        .set_sender("a@x.com")
        .unwrap()
        .set_recipient("b@y.com")
        .unwrap()
        .set_subject("Hi");
    message
}

fn fixture(dir: &tempfile::TempDir, name: &str, content: &[u8]) -> PathBuf {
    let path = dir.path().join(name);
    File::create(&path).unwrap().write_all(content).unwrap();
    path
}

fn pdf(pages: usize) -> Vec<u8> {
    let mut data = b"%PDF-1.4\n".to_vec();
    for page in 0..pages {
        data.extend_from_slice(format!("{page} 0 obj << /Type /Page >> endobj\n").as_bytes());
    }
    data.extend_from_slice(b"%%EOF\n");
    data
}

#[test]
fn test_minimal_message_reads_back() {
    let mut message = base_message();
    message.set_text_body("hello");
    let raw = message.render().unwrap().to_string();

    let parsed = Message::parse(&raw).unwrap();
    assert_eq!(parsed.from(), Some("a@x.com"));
    assert_eq!(parsed.to(), Some("b@y.com"));
    assert_eq!(parsed.subject(), Some("Hi"));
    assert!(parsed.content_type().unwrap().is("multipart", "alternative"));
    assert_eq!(parsed.text_part().unwrap(), "hello");
    assert_eq!(parsed.html_part().unwrap(), "");
    assert!(parsed.attachments().is_empty());
}

#[test]
fn test_attachments_in_call_order() {
    let dir = tempfile::tempdir().unwrap();
    let report = pdf(400);
    let paths = [
        fixture(&dir, "report.pdf", &report),
        fixture(&dir, "photo.jpg", JPEG),
        fixture(&dir, "logo.png", PNG),
    ];

    let mut message = base_message();
    message.set_text_body("see attached").set_html_body("<p>see attached</p>");
    for path in &paths {
        message.add_attachment(path).unwrap();
    }

    let rendered = message.render().unwrap();
    assert_ne!(rendered.boundary(), rendered.alternative_boundary());

    let parsed = Message::parse(&rendered.to_string()).unwrap();
    assert!(parsed.content_type().unwrap().is("multipart", "mixed"));
    assert_eq!(parsed.text_part().unwrap(), "see attached");
    assert_eq!(parsed.html_part().unwrap(), "<p>see attached</p>");

    let attachments = parsed.attachments();
    let summary: Vec<(String, String)> = attachments
        .iter()
        .map(|p| {
            (
                p.filename().unwrap().unwrap(),
                p.content_type().unwrap().essence(),
            )
        })
        .collect();
    assert_eq!(
        summary,
        [
            ("report.pdf".to_string(), "application/pdf".to_string()),
            ("photo.jpg".to_string(), "image/jpeg".to_string()),
            ("logo.png".to_string(), "image/png".to_string()),
        ]
    );
    assert_eq!(attachments[0].decode_body().unwrap(), report);
    assert_eq!(attachments[1].decode_body().unwrap(), JPEG);
    assert_eq!(attachments[2].decode_body().unwrap(), PNG);
}

#[test]
fn test_attachment_lines_are_wrapped() {
    let dir = tempfile::tempdir().unwrap();
    let path = fixture(&dir, "report.pdf", &pdf(200));

    let mut message = base_message();
    message.set_text_body("x").add_attachment(&path).unwrap();
    let rendered = message.render().unwrap();
    let raw = rendered.to_string();

    // Header lines, including the nested multipart/alternative header with
    // its 34-character boundary, stay within the RFC 5322 limit.
    assert!(
        raw.split("\r\n")
            .all(|line| line.len() <= MAX_HEADER_LINE_LENGTH)
    );

    let marker = "Content-Transfer-Encoding: base64\r\n\r\n";
    let start = raw.find(marker).unwrap() + marker.len();
    let end = start + raw[start..].find("\r\n--").unwrap();
    let payload: Vec<&str> = raw[start..end].split("\r\n").collect();
    assert!(payload.len() > 1);
    assert!(payload.iter().all(|line| line.len() <= encoding::MAX_LINE_LENGTH));
    assert_eq!(payload[0].len(), encoding::MAX_LINE_LENGTH);
}

#[test]
fn test_attachment_part_headers() {
    let dir = tempfile::tempdir().unwrap();
    let path = fixture(&dir, "logo.png", PNG);

    let mut message = base_message();
    message.set_text_body("x").add_attachment(&path).unwrap();
    let body = message.render().unwrap().body().to_string();

    assert!(body.contains(concat!(
        "Content-Type: image/png; name=\"logo.png\"\r\n",
        "Content-Disposition: attachment; filename=\"logo.png\"\r\n",
        "Content-Transfer-Encoding: base64\r\n",
    )));
}

#[test]
fn test_non_ascii_filename() {
    let dir = tempfile::tempdir().unwrap();
    let path = fixture(&dir, "Übersicht.png", PNG);

    let mut message = base_message();
    message.set_text_body("x").add_attachment(&path).unwrap();
    let parsed = Message::parse(&message.render().unwrap().to_string()).unwrap();

    let attachments = parsed.attachments();
    assert_eq!(
        attachments[0].filename().unwrap().as_deref(),
        Some("Übersicht.png")
    );
}

#[test]
fn test_literal_encoded_word_text_is_kept() {
    let literal = "=?UTF-8?B?SGk=?=";
    let mut message = base_message();
    message
        .set_subject(literal)
        .set_sender_name("=?UTF-8?Q?Admin?=")
        .set_text_body("x");
    let raw = message.render().unwrap().to_string();
    assert!(!raw.contains(&format!("Subject: {literal}\r\n")));

    let parsed = Message::parse(&raw).unwrap();
    assert_eq!(parsed.decoded_subject().unwrap().as_deref(), Some(literal));
    assert_eq!(
        Headers::decode_value(parsed.from().unwrap()).unwrap(),
        "=?UTF-8?Q?Admin?= <a@x.com>"
    );
}

#[test]
fn test_attachment_removed_before_render() {
    let dir = tempfile::tempdir().unwrap();
    let path = fixture(&dir, "logo.png", PNG);

    let mut message = base_message();
    message.set_text_body("x").add_attachment(&path).unwrap();
    std::fs::remove_file(&path).unwrap();

    assert!(matches!(message.render(), Err(Error::AttachmentNotFound(p)) if p == path));
}

#[test]
fn test_rejected_attachment_leaves_list_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let good = fixture(&dir, "logo.png", PNG);
    let bad = fixture(&dir, "notes.txt", b"plain text");

    let mut message = base_message();
    message.add_attachment(&good).unwrap();
    assert!(message.add_attachment(&bad).is_err());
    assert_eq!(message.attachments().len(), 1);
}

#[test]
fn test_two_renders_differ_only_in_boundaries() {
    let dir = tempfile::tempdir().unwrap();
    let path = fixture(&dir, "logo.png", PNG);

    let mut message = base_message();
    message
        .set_sender_name("Ödön")
        .set_text_body("hello")
        .set_html_body("<p>hello</p>")
        .add_attachment(&path)
        .unwrap();

    let first = message.render().unwrap();
    let second = message.render().unwrap();
    assert_ne!(first.boundary(), second.boundary());
    assert_ne!(first.alternative_boundary(), second.alternative_boundary());

    let normalize = |rendered: &relaymail_mime::RenderedMessage| {
        rendered
            .to_string()
            .replace(rendered.boundary(), "OUTER")
            .replace(rendered.alternative_boundary(), "INNER")
    };
    assert_eq!(normalize(&first), normalize(&second));
}

proptest! {
    #[test]
    fn prop_bodies_round_trip(text in any::<String>(), html in any::<String>()) {
        prop_assume!(!text.is_empty() || !html.is_empty());

        let mut message = base_message();
        message.set_text_body(text.clone()).set_html_body(html.clone());
        let raw = message.render().unwrap().to_string();

        let parsed = Message::parse(&raw).unwrap();
        prop_assert_eq!(parsed.text_part().unwrap(), text);
        prop_assert_eq!(parsed.html_part().unwrap(), html);
    }

    #[test]
    fn prop_ascii_header_values_pass_through(value in "[ -~]{1,120}") {
        prop_assume!(!value.contains("=?"));
        prop_assert_eq!(Headers::encode_value(&value), value);
    }

    #[test]
    fn prop_non_ascii_header_values_round_trip(
        prefix in "[ -~]{0,40}",
        wide in "[\u{80}-\u{10ffff}]{1,40}",
    ) {
        let value = format!("{prefix}{wide}");
        let encoded = Headers::encode_value(&value);
        prop_assert!(encoded.starts_with("=?UTF-8?B?"));
        prop_assert!(encoded.ends_with("?="));
        prop_assert!(encoded.is_ascii());
        prop_assert_eq!(Headers::decode_value(&encoded).unwrap(), value);
    }

    #[test]
    fn prop_subject_round_trips_through_parser(
        subject in "[^\\s\\p{C}]([^\\p{C}]{0,80}[^\\s\\p{C}])?",
    ) {
        let mut message = base_message();
        message.set_subject(subject.clone()).set_text_body("x");
        let parsed = Message::parse(&message.render().unwrap().to_string()).unwrap();
        prop_assert_eq!(parsed.decoded_subject().unwrap(), Some(subject));
    }
}
