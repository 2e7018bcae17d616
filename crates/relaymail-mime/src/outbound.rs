//! Outbound message composition and multipart rendering.
//!
//! An [`OutboundMessage`] collects validated fields and renders them into an
//! RFC 2045/2046 message:
//!
//! ```text
//! multipart/alternative                 (no attachments)
//! ├── text/plain; charset=UTF-8         quoted-printable
//! └── text/html; charset=UTF-8          quoted-printable
//!
//! multipart/mixed                       (with attachments)
//! ├── multipart/alternative
//! │   ├── text/plain
//! │   └── text/html
//! ├── <attachment 1>                    base64
//! └── <attachment n>                    base64
//! ```

use std::fmt::{self, Write as _};
use std::path::Path;

use crate::address::{Address, Mailbox};
use crate::attachment::{Attachment, AttachmentPolicy};
use crate::boundary::{BoundarySource, RandomBoundary};
use crate::content_type::{ContentType, quote};
use crate::encoding::{
    MAX_LINE_LENGTH, encode_base64_wrapped, encode_quoted_printable, encoded_words,
    needs_encoding,
};
use crate::error::{Error, Result};
use crate::header::{HEADER_CHARSET, Headers};
use crate::message::TransferEncoding;

/// Fields checked before rendering, in the order they are checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    /// Sender address.
    Sender,
    /// Recipient address.
    Recipient,
    /// Subject line.
    Subject,
    /// Text or HTML body.
    Body,
}

impl Field {
    /// Field name used in error messages.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sender => "sender address",
            Self::Recipient => "recipient address",
            Self::Subject => "subject",
            Self::Body => "body",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single email under construction.
///
/// Setters validate eagerly; a rejected call leaves the message unchanged.
#[derive(Debug, Clone, Default)]
pub struct OutboundMessage {
    sender: Option<Address>,
    sender_name: Option<String>,
    recipient: Option<Address>,
    bcc: Option<Address>,
    return_path: Option<Address>,
    subject: String,
    text_body: String,
    html_body: String,
    attachments: Vec<Attachment>,
    policy: AttachmentPolicy,
}

impl OutboundMessage {
    /// Creates an empty message with the default attachment policy.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty message with a custom attachment policy.
    #[must_use]
    pub fn with_policy(policy: AttachmentPolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    /// Sets the sender address.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidAddress`] if `addr` is not a valid address.
    pub fn set_sender(&mut self, addr: &str) -> Result<&mut Self> {
        Ok(self.set_sender_address(Address::new(addr)?))
    }

    /// Sets an already validated sender address.
    pub fn set_sender_address(&mut self, addr: Address) -> &mut Self {
        self.sender = Some(addr);
        self
    }

    /// Sets the sender display name, stored verbatim.
    pub fn set_sender_name(&mut self, name: impl Into<String>) -> &mut Self {
        self.sender_name = Some(name.into());
        self
    }

    /// Sets the recipient address.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidAddress`] if `addr` is not a valid address.
    pub fn set_recipient(&mut self, addr: &str) -> Result<&mut Self> {
        Ok(self.set_recipient_address(Address::new(addr)?))
    }

    /// Sets an already validated recipient address.
    pub fn set_recipient_address(&mut self, addr: Address) -> &mut Self {
        self.recipient = Some(addr);
        self
    }

    /// Sets the blind-copy address.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidAddress`] if `addr` is not a valid address.
    pub fn set_bcc(&mut self, addr: &str) -> Result<&mut Self> {
        Ok(self.set_bcc_address(Address::new(addr)?))
    }

    /// Sets an already validated blind-copy address.
    pub fn set_bcc_address(&mut self, addr: Address) -> &mut Self {
        self.bcc = Some(addr);
        self
    }

    /// Sets the bounce (return-path) address handed to the transport.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidAddress`] if `addr` is not a valid address.
    pub fn set_return_path(&mut self, addr: &str) -> Result<&mut Self> {
        Ok(self.set_return_path_address(Address::new(addr)?))
    }

    /// Sets an already validated return-path address.
    pub fn set_return_path_address(&mut self, addr: Address) -> &mut Self {
        self.return_path = Some(addr);
        self
    }

    /// Sets the subject, stored verbatim and encoded at render time.
    pub fn set_subject(&mut self, subject: impl Into<String>) -> &mut Self {
        self.subject = subject.into();
        self
    }

    /// Sets the plain-text body.
    pub fn set_text_body(&mut self, text: impl Into<String>) -> &mut Self {
        self.text_body = text.into();
        self
    }

    /// Sets the HTML body.
    pub fn set_html_body(&mut self, html: impl Into<String>) -> &mut Self {
        self.html_body = html.into();
        self
    }

    /// Validates and appends an attachment.
    ///
    /// # Errors
    ///
    /// See [`Attachment::from_path`].
    pub fn add_attachment(&mut self, path: impl AsRef<Path>) -> Result<&mut Self> {
        let attachment = Attachment::from_path(path, &self.policy)?;
        self.attachments.push(attachment);
        Ok(self)
    }

    /// Removes all attachments.
    pub fn clear_attachments(&mut self) -> &mut Self {
        self.attachments.clear();
        self
    }

    /// Sender address, if set.
    #[must_use]
    pub const fn sender(&self) -> Option<&Address> {
        self.sender.as_ref()
    }

    /// Sender display name, if set.
    #[must_use]
    pub fn sender_name(&self) -> Option<&str> {
        self.sender_name.as_deref()
    }

    /// Recipient address, if set.
    #[must_use]
    pub const fn recipient(&self) -> Option<&Address> {
        self.recipient.as_ref()
    }

    /// Blind-copy address, if set.
    #[must_use]
    pub const fn bcc(&self) -> Option<&Address> {
        self.bcc.as_ref()
    }

    /// Return-path address, if set.
    #[must_use]
    pub const fn return_path(&self) -> Option<&Address> {
        self.return_path.as_ref()
    }

    /// Subject as given.
    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Plain-text body.
    #[must_use]
    pub fn text_body(&self) -> &str {
        &self.text_body
    }

    /// HTML body.
    #[must_use]
    pub fn html_body(&self) -> &str {
        &self.html_body
    }

    /// Accepted attachments in insertion order.
    #[must_use]
    pub fn attachments(&self) -> &[Attachment] {
        &self.attachments
    }

    /// Attachment policy in force.
    #[must_use]
    pub const fn policy(&self) -> &AttachmentPolicy {
        &self.policy
    }

    /// Checks that the message can be rendered.
    ///
    /// The order is fixed: sender, recipient, subject, body. Only the first
    /// violation is reported.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingField`] naming the first missing field.
    pub fn validate(&self) -> Result<()> {
        self.required().map(|_| ())
    }

    /// Runs the completeness checks and returns sender and recipient.
    fn required(&self) -> Result<(&Address, &Address)> {
        let sender = self
            .sender
            .as_ref()
            .ok_or(Error::MissingField(Field::Sender))?;
        let recipient = self
            .recipient
            .as_ref()
            .ok_or(Error::MissingField(Field::Recipient))?;
        if self.subject.is_empty() {
            return Err(Error::MissingField(Field::Subject));
        }
        if self.text_body.is_empty() && self.html_body.is_empty() {
            return Err(Error::MissingField(Field::Body));
        }
        Ok((sender, recipient))
    }

    /// Renders the message with random boundaries.
    ///
    /// # Errors
    ///
    /// Returns a validation error, or an attachment read error.
    pub fn render(&self) -> Result<RenderedMessage> {
        self.render_with(&RandomBoundary)
    }

    /// Renders the message drawing boundaries from `boundaries`.
    ///
    /// Attachment files are read here, synchronously.
    ///
    /// # Errors
    ///
    /// Returns a validation error, or an attachment read error.
    pub fn render_with(&self, boundaries: &dyn BoundarySource) -> Result<RenderedMessage> {
        let (sender, recipient) = self.required()?;
        let mut headers = self.envelope_headers(sender, recipient);

        let alternative_boundary = boundaries.next_boundary();
        let alternative = self.alternative_body(&alternative_boundary);

        let (content_type, body, outer_boundary) = if self.attachments.is_empty() {
            (
                ContentType::multipart_alternative(alternative_boundary.as_str()),
                alternative,
                alternative_boundary.clone(),
            )
        } else {
            let mixed_boundary = boundaries.next_boundary();
            let body = self.mixed_body(&mixed_boundary, &alternative_boundary, &alternative)?;
            (
                ContentType::multipart_mixed(mixed_boundary.as_str()),
                body,
                mixed_boundary,
            )
        };
        headers.add("Content-Type", content_type.to_string());

        tracing::debug!(
            attachments = self.attachments.len(),
            bytes = body.len(),
            "Rendered message"
        );

        Ok(RenderedMessage {
            headers,
            body,
            boundary: outer_boundary,
            alternative_boundary,
        })
    }

    /// Builds everything up to `MIME-Version`.
    fn envelope_headers(&self, sender: &Address, recipient: &Address) -> Headers {
        let from = Mailbox {
            name: self.sender_name.clone(),
            address: sender.clone(),
        }
        .to_string();

        let mut headers = Headers::new();
        headers.add("From", from.clone());
        headers.add("Reply-To", from);
        headers.add("To", recipient.as_str());
        if let Some(bcc) = &self.bcc {
            headers.add("Bcc", bcc.as_str());
        }
        headers.add("Subject", Headers::encode_value(&self.subject));
        headers.add("MIME-Version", "1.0");
        headers
    }

    fn alternative_body(&self, boundary: &str) -> String {
        let mut body = String::with_capacity(self.text_body.len() + self.html_body.len() + 256);
        write_part(
            &mut body,
            boundary,
            &text_part_headers(ContentType::text_plain()),
            &encode_quoted_printable(&self.text_body),
        );
        write_part(
            &mut body,
            boundary,
            &text_part_headers(ContentType::text_html()),
            &encode_quoted_printable(&self.html_body),
        );
        write_close(&mut body, boundary);
        body
    }

    fn mixed_body(
        &self,
        mixed_boundary: &str,
        alternative_boundary: &str,
        alternative: &str,
    ) -> Result<String> {
        let mut body = String::with_capacity(alternative.len() + 1024);

        let mut nested = Headers::new();
        nested.add(
            "Content-Type",
            ContentType::multipart_alternative(alternative_boundary).to_string(),
        );
        write_part(
            &mut body,
            mixed_boundary,
            &nested,
            alternative.trim_end_matches("\r\n"),
        );

        for attachment in &self.attachments {
            let data = attachment.read()?;
            write_part(
                &mut body,
                mixed_boundary,
                &attachment_headers(attachment),
                &encode_base64_wrapped(&data, MAX_LINE_LENGTH),
            );
        }

        write_close(&mut body, mixed_boundary);
        Ok(body)
    }
}

fn text_part_headers(content_type: ContentType) -> Headers {
    let mut headers = Headers::new();
    headers.add("Content-Type", content_type.to_string());
    headers.add(
        "Content-Transfer-Encoding",
        TransferEncoding::QuotedPrintable.to_string(),
    );
    headers
}

fn attachment_headers(attachment: &Attachment) -> Headers {
    let filename = attachment.filename();
    let filename = if needs_encoding(&filename) {
        encoded_words(&filename, HEADER_CHARSET).join(" ")
    } else {
        filename
    };

    let content_type = ContentType::parse(attachment.mime_type())
        .unwrap_or_else(|_| ContentType::new("application", "octet-stream"))
        .with_parameter("name", filename.as_str());

    let mut headers = Headers::new();
    headers.add("Content-Type", content_type.to_string());
    headers.add(
        "Content-Disposition",
        format!("attachment; filename={}", quote(&filename)),
    );
    headers.add(
        "Content-Transfer-Encoding",
        TransferEncoding::Base64.to_string(),
    );
    headers
}

/// Writes `--boundary`, the part headers, a blank line and the content.
///
/// The CRLF after the content belongs to the next delimiter.
fn write_part(out: &mut String, boundary: &str, headers: &Headers, content: &str) {
    let _ = write!(out, "--{boundary}\r\n{headers}\r\n{content}\r\n");
}

fn write_close(out: &mut String, boundary: &str) {
    let _ = write!(out, "--{boundary}--\r\n");
}

/// A rendered message: ordered headers plus the encoded body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMessage {
    headers: Headers,
    body: String,
    boundary: String,
    alternative_boundary: String,
}

impl RenderedMessage {
    /// Top-level headers, `Content-Type` last.
    #[must_use]
    pub const fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Encoded body (everything after the blank line).
    #[must_use]
    pub fn body(&self) -> &str {
        &self.body
    }

    /// Boundary of the outermost multipart.
    #[must_use]
    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// Boundary of the `multipart/alternative` section.
    ///
    /// Equal to [`Self::boundary`] when there are no attachments.
    #[must_use]
    pub fn alternative_boundary(&self) -> &str {
        &self.alternative_boundary
    }

    /// Raw message bytes: headers, blank line, body.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }
}

impl fmt::Display for RenderedMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\r\n{}", self.headers, self.body)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Hands out `=_b0`, `=_b1`, ...
    #[derive(Default)]
    struct Sequential(AtomicUsize);

    impl BoundarySource for Sequential {
        fn next_boundary(&self) -> String {
            format!("=_b{}", self.0.fetch_add(1, Ordering::Relaxed))
        }
    }

    fn minimal() -> OutboundMessage {
        let mut message = OutboundMessage::new();
        message
            .set_sender("a@x.com")
            .unwrap()
            .set_recipient("b@y.com")
            .unwrap()
            .set_subject("Hi")
            .set_text_body("hello");
        message
    }

    #[test]
    fn test_missing_fields_in_fixed_order() {
        let mut message = OutboundMessage::new();
        assert!(matches!(message.validate(), Err(Error::MissingField(Field::Sender))));

        message.set_recipient("b@y.com").unwrap();
        assert!(matches!(message.validate(), Err(Error::MissingField(Field::Sender))));

        message.set_sender("a@x.com").unwrap();
        assert!(matches!(message.validate(), Err(Error::MissingField(Field::Subject))));

        message.set_subject("Hi");
        assert!(matches!(message.validate(), Err(Error::MissingField(Field::Body))));

        message.set_html_body("<p>hi</p>");
        assert!(message.validate().is_ok());
    }

    #[test]
    fn test_rejected_setter_keeps_previous_value() {
        let mut message = minimal();
        assert!(message.set_sender("not an address").is_err());
        assert_eq!(message.sender().unwrap().as_str(), "a@x.com");
    }

    #[test]
    fn test_alternative_layout_is_exact() {
        let mut message = minimal();
        message.set_html_body("<p>hello</p>");
        let rendered = message.render_with(&Sequential::default()).unwrap();

        assert_eq!(
            rendered.headers().to_string(),
            concat!(
                "From: a@x.com\r\n",
                "Reply-To: a@x.com\r\n",
                "To: b@y.com\r\n",
                "Subject: Hi\r\n",
                "MIME-Version: 1.0\r\n",
                "Content-Type: multipart/alternative; boundary=\"=_b0\"\r\n",
            )
        );
        assert_eq!(
            rendered.body(),
            concat!(
                "--=_b0\r\n",
                "Content-Type: text/plain; charset=UTF-8\r\n",
                "Content-Transfer-Encoding: quoted-printable\r\n",
                "\r\n",
                "hello\r\n",
                "--=_b0\r\n",
                "Content-Type: text/html; charset=UTF-8\r\n",
                "Content-Transfer-Encoding: quoted-printable\r\n",
                "\r\n",
                "<p>hello</p>\r\n",
                "--=_b0--\r\n",
            )
        );
        assert_eq!(rendered.boundary(), "=_b0");
        assert_eq!(rendered.alternative_boundary(), "=_b0");
    }

    #[test]
    fn test_display_name_bcc_and_encoded_subject() {
        let mut message = minimal();
        message
            .set_sender_name("Zoë")
            .set_subject("Résumé")
            .set_bcc("audit@x.com")
            .unwrap();
        let rendered = message.render().unwrap();
        let headers = rendered.headers();

        assert_eq!(headers.get("From"), Some("=?UTF-8?B?Wm/Dqw==?= <a@x.com>"));
        assert_eq!(headers.get("Reply-To"), headers.get("From"));
        assert_eq!(headers.get("Bcc"), Some("audit@x.com"));
        assert_eq!(
            Headers::decode_value(headers.get("Subject").unwrap()).unwrap(),
            "Résumé"
        );
        let names: Vec<&str> = headers.iter().map(|(n, _)| n).collect();
        assert_eq!(
            names,
            ["From", "Reply-To", "To", "Bcc", "Subject", "MIME-Version", "Content-Type"]
        );
    }

    #[test]
    fn test_no_bcc_header_without_bcc() {
        let rendered = minimal().render().unwrap();
        assert!(rendered.headers().get("Bcc").is_none());
    }

    #[test]
    fn test_raw_message_has_blank_line() {
        let rendered = minimal().render_with(&Sequential::default()).unwrap();
        let raw = rendered.to_string();
        assert!(raw.contains("Content-Type: multipart/alternative; boundary=\"=_b0\"\r\n\r\n--=_b0\r\n"));
        assert_eq!(rendered.to_bytes(), raw.into_bytes());
    }

    #[test]
    fn test_render_fails_validation_first() {
        let mut message = minimal();
        message.set_subject("");
        assert!(matches!(message.render(), Err(Error::MissingField(Field::Subject))));
    }
}
