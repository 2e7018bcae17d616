//! Rendered messages read back with an independent MIME parser.
//!
//! `mailparse` shares no code with this crate, so these tests catch
//! encoding mistakes that a matching encoder and decoder would hide.

#![allow(clippy::unwrap_used)]

use std::fs::File;
use std::io::Write;

use mailparse::{DispositionType, MailHeaderMap, ParsedMail, parse_mail};
use proptest::prelude::*;
use relaymail_mime::{Headers, OutboundMessage};

const PNG: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR\0\0\0\x01\0\0\0\x01\x08\x06\0\0\0";

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

/// Parameter values may come back still encoded; decoding twice is harmless.
fn filename(part: &ParsedMail<'_>) -> String {
    let disposition = part.get_content_disposition();
    assert_eq!(disposition.disposition, DispositionType::Attachment);
    Headers::decode_value(&disposition.params["filename"]).unwrap()
}

#[test]
fn test_alternative_structure() {
    let mut message = base_message();
    message.set_text_body("hello\r\nworld").set_html_body("<p>hello</p>");
    let raw = message.render().unwrap().to_string();

    let parsed = parse_mail(raw.as_bytes()).unwrap();
    assert_eq!(parsed.ctype.mimetype, "multipart/alternative");
    assert_eq!(parsed.headers.get_first_value("Subject").as_deref(), Some("Hi"));
    assert_eq!(parsed.headers.get_first_value("To").as_deref(), Some("b@y.com"));
    assert_eq!(parsed.subparts.len(), 2);
    assert_eq!(parsed.subparts[0].ctype.mimetype, "text/plain");
    assert_eq!(parsed.subparts[0].get_body().unwrap(), "hello\r\nworld");
    assert_eq!(parsed.subparts[1].ctype.mimetype, "text/html");
    assert_eq!(parsed.subparts[1].get_body().unwrap(), "<p>hello</p>");
}

#[test]
fn test_non_ascii_filename() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("Übersicht.png");
    File::create(&path).unwrap().write_all(PNG).unwrap();

    let mut message = base_message();
    message.set_text_body("x").add_attachment(&path).unwrap();
    let raw = message.render().unwrap().to_string();

    let parsed = parse_mail(raw.as_bytes()).unwrap();
    assert_eq!(parsed.ctype.mimetype, "multipart/mixed");
    assert_eq!(parsed.subparts.len(), 2);
    assert_eq!(parsed.subparts[0].ctype.mimetype, "multipart/alternative");
    assert_eq!(parsed.subparts[0].subparts[0].get_body().unwrap(), "x");

    let attachment = &parsed.subparts[1];
    assert_eq!(attachment.ctype.mimetype, "image/png");
    assert_eq!(filename(attachment), "Übersicht.png");
    assert_eq!(
        Headers::decode_value(&attachment.ctype.params["name"]).unwrap(),
        "Übersicht.png"
    );
    assert_eq!(attachment.get_body_raw().unwrap(), PNG);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(400))]

    #[test]
    fn prop_bodies_round_trip(
        text in any::<String>(),
        html in any::<String>(),
        subject in "[^\\s\\p{C}]([^\\p{C}]{0,80}[^\\s\\p{C}])?",
        name in "\\p{L}{1,20}",
    ) {
        prop_assume!(!text.is_empty() || !html.is_empty());
        // A leading byte order mark is stripped by charset decoding.
        prop_assume!(!text.starts_with('\u{feff}') && !html.starts_with('\u{feff}'));

        let mut message = base_message();
        message
            .set_subject(subject.clone())
            .set_sender_name(name.clone())
            .set_text_body(text.clone())
            .set_html_body(html.clone());
        let raw = message.render().unwrap().to_string();

        let parsed = parse_mail(raw.as_bytes()).unwrap();
        prop_assert_eq!(parsed.headers.get_first_value("Subject"), Some(subject));

        let from = mailparse::addrparse_header(parsed.headers.get_first_header("From").unwrap())
            .unwrap()
            .extract_single_info()
            .unwrap();
        prop_assert_eq!(from.display_name, Some(name));
        prop_assert_eq!(from.addr, "a@x.com");

        prop_assert_eq!(parsed.subparts.len(), 2);
        prop_assert_eq!(parsed.subparts[0].get_body().unwrap(), text);
        prop_assert_eq!(parsed.subparts[1].get_body().unwrap(), html);
    }
}
