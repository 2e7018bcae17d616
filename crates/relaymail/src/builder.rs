//! Message composition and send orchestration.
//!
//! A [`Mailer`] holds the configuration and the collaborators and hands out
//! one [`MessageBuilder`] per email:
//!
//! ```ignore
//! let mailer = Mailer::new(MailerConfig::default(), Arc::new(provider))
//!     .with_rate_limiter(Arc::new(TokenBucketLimiter::default()));
//!
//! let mut email = mailer.compose()?;
//! email
//!     .set_sender("shop@example.com")?
//!     .set_recipient("customer@example.org")?
//!     .set_subject("Your order");
//! email.set_template("order", &variables)?;
//! let receipt = email.send()?;
//! ```
//!
//! Sending runs, in order: rate limit check, completeness validation,
//! render, transport, one log event for the outcome.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use relaymail_mime::{
    Address, BoundarySource, OutboundMessage, RandomBoundary, RenderedMessage, html_to_text,
};
use tracing::Instrument;

use crate::config::MailerConfig;
use crate::error::{Error, Result};
use crate::log::{Context, Logger, TracingLogger};
use crate::mx::MxResolver;
use crate::rate_limit::{RateLimiter, TokenBucketLimiter};
use crate::template::{TemplateEngine, Variables};
use crate::transport::{BoxError, RawEmail, SendReceipt, Transport};

const SENT_MESSAGE: &str = "Email sent to {recipient} (message id {message_id})";
const FAILED_MESSAGE: &str = "Email to {recipient} failed: {error}";

/// Configuration plus collaborators, shared by the builders it creates.
///
/// Cloning is cheap: collaborators are reference counted.
#[derive(Clone)]
pub struct Mailer {
    config: Arc<MailerConfig>,
    transport: Arc<dyn Transport>,
    rate_limiter: Option<Arc<dyn RateLimiter>>,
    templates: Option<Arc<dyn TemplateEngine>>,
    logger: Arc<dyn Logger>,
    mx_resolver: Option<Arc<dyn MxResolver>>,
    boundaries: Arc<dyn BoundarySource>,
}

impl Mailer {
    /// Creates a mailer that delivers through `transport`.
    ///
    /// A token bucket limiter is installed when the configuration has a
    /// `rate_limit` section. Logging goes to `tracing`.
    #[must_use]
    pub fn new(config: MailerConfig, transport: Arc<dyn Transport>) -> Self {
        let rate_limiter = config
            .rate_limit
            .map(|rate| Arc::new(TokenBucketLimiter::new(rate)) as Arc<dyn RateLimiter>);
        Self {
            config: Arc::new(config),
            transport,
            rate_limiter,
            templates: None,
            logger: Arc::new(TracingLogger),
            mx_resolver: None,
            boundaries: Arc::new(RandomBoundary),
        }
    }

    /// Sets the rate limiter, replacing any configured one.
    #[must_use]
    pub fn with_rate_limiter(mut self, limiter: Arc<dyn RateLimiter>) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    /// Sets the template engine used by [`MessageBuilder::set_template`].
    #[must_use]
    pub fn with_templates(mut self, templates: Arc<dyn TemplateEngine>) -> Self {
        self.templates = Some(templates);
        self
    }

    /// Sets the logger that receives send outcomes.
    #[must_use]
    pub fn with_logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = logger;
        self
    }

    /// Sets the resolver used when `verify_mx` is enabled, typically a
    /// [`crate::DnsMxResolver`].
    #[must_use]
    pub fn with_mx_resolver(mut self, resolver: Arc<dyn MxResolver>) -> Self {
        self.mx_resolver = Some(resolver);
        self
    }

    /// Sets the source of multipart boundaries.
    #[must_use]
    pub fn with_boundary_source(mut self, boundaries: Arc<dyn BoundarySource>) -> Self {
        self.boundaries = boundaries;
        self
    }

    /// Configuration in force.
    #[must_use]
    pub fn config(&self) -> &MailerConfig {
        &self.config
    }

    /// Starts a new message.
    ///
    /// The configured default sender and sender name are applied.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the configuration is inconsistent, for
    /// example `verify_mx` without an MX resolver, and
    /// [`relaymail_mime::Error::InvalidAddress`] if the default sender is
    /// rejected.
    pub fn compose(&self) -> Result<MessageBuilder> {
        self.config.validate()?;
        if self.config.verify_mx && self.mx_resolver.is_none() {
            return Err(Error::Config(
                "verify_mx is enabled but no MX resolver is configured".into(),
            ));
        }

        let mut builder = MessageBuilder {
            mailer: self.clone(),
            message: OutboundMessage::with_policy(self.config.attachment_policy()),
        };
        if let Some(sender) = &self.config.default_sender {
            builder.set_sender(sender)?;
        }
        if let Some(name) = &self.config.default_sender_name {
            builder.set_sender_name(name.as_str());
        }
        Ok(builder)
    }
}

impl fmt::Debug for Mailer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mailer")
            .field("config", &self.config)
            .field("rate_limiter", &self.rate_limiter.is_some())
            .field("templates", &self.templates.is_some())
            .field("mx_resolver", &self.mx_resolver.is_some())
            .finish_non_exhaustive()
    }
}

/// Fluent builder for one email.
///
/// Setters validate eagerly and leave the builder untouched on error, so a
/// failed call can be corrected and retried.
#[derive(Debug, Clone)]
pub struct MessageBuilder {
    mailer: Mailer,
    message: OutboundMessage,
}

impl MessageBuilder {
    /// Sets the sender address.
    ///
    /// # Errors
    ///
    /// Returns `InvalidAddress` for a malformed address, or for a domain
    /// without MX record when `verify_mx` is enabled.
    pub fn set_sender(&mut self, addr: &str) -> Result<&mut Self> {
        let address = self.checked_address(addr)?;
        self.message.set_sender_address(address);
        Ok(self)
    }

    /// Sets the sender display name.
    pub fn set_sender_name(&mut self, name: impl Into<String>) -> &mut Self {
        self.message.set_sender_name(name);
        self
    }

    /// Sets the recipient address.
    ///
    /// # Errors
    ///
    /// See [`Self::set_sender`].
    pub fn set_recipient(&mut self, addr: &str) -> Result<&mut Self> {
        let address = self.checked_address(addr)?;
        self.message.set_recipient_address(address);
        Ok(self)
    }

    /// Sets the blind-copy address.
    ///
    /// # Errors
    ///
    /// See [`Self::set_sender`].
    pub fn set_bcc(&mut self, addr: &str) -> Result<&mut Self> {
        let address = self.checked_address(addr)?;
        self.message.set_bcc_address(address);
        Ok(self)
    }

    /// Sets the bounce address handed to the transport.
    ///
    /// # Errors
    ///
    /// See [`Self::set_sender`].
    pub fn set_return_path(&mut self, addr: &str) -> Result<&mut Self> {
        let address = self.checked_address(addr)?;
        self.message.set_return_path_address(address);
        Ok(self)
    }

    /// Sets the subject.
    pub fn set_subject(&mut self, subject: impl Into<String>) -> &mut Self {
        self.message.set_subject(subject);
        self
    }

    /// Sets the plain-text body.
    pub fn set_text_body(&mut self, text: impl Into<String>) -> &mut Self {
        self.message.set_text_body(text);
        self
    }

    /// Sets the HTML body.
    pub fn set_html_body(&mut self, html: impl Into<String>) -> &mut Self {
        self.message.set_html_body(html);
        self
    }

    /// Renders a template into the HTML body and derives the text body
    /// from it.
    ///
    /// Both bodies are overwritten. Call [`Self::set_text_body`] afterwards
    /// to supply a hand-written text version.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TemplateEngineNotConfigured`] without an engine, or
    /// [`Error::TemplateRender`] if loading or rendering fails. Neither body
    /// changes on error.
    pub fn set_template(&mut self, name: &str, variables: &Variables) -> Result<&mut Self> {
        let engine = self
            .mailer
            .templates
            .as_ref()
            .ok_or(Error::TemplateEngineNotConfigured)?;
        let html = engine.load(name)?.render(variables)?;
        let text = html_to_text(&html);

        tracing::debug!(template = name, bytes = html.len(), "Rendered template");
        self.message.set_text_body(text).set_html_body(html);
        Ok(self)
    }

    /// Adds an attachment.
    ///
    /// # Errors
    ///
    /// Returns `AttachmentNotFound`, `AttachmentTooLarge` or
    /// `AttachmentTypeNotAllowed`.
    pub fn add_attachment(&mut self, path: impl AsRef<Path>) -> Result<&mut Self> {
        self.message.add_attachment(path)?;
        Ok(self)
    }

    /// Removes all attachments.
    pub fn clear_attachments(&mut self) -> &mut Self {
        self.message.clear_attachments();
        self
    }

    /// The message being built.
    #[must_use]
    pub const fn message(&self) -> &OutboundMessage {
        &self.message
    }

    /// Consumes the builder, returning the message.
    #[must_use]
    pub fn into_message(self) -> OutboundMessage {
        self.message
    }

    /// Renders without sending.
    ///
    /// # Errors
    ///
    /// Returns a validation or attachment error.
    pub fn render(&self) -> Result<RenderedMessage> {
        Ok(self.message.render_with(self.mailer.boundaries.as_ref())?)
    }

    /// Sends the message, blocking until the transport answers.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Throttled`], a validation or render error, or
    /// [`Error::Transport`] holding the provider's error unchanged.
    pub fn send(&self) -> Result<SendReceipt> {
        let span = self.span();
        let _enter = span.enter();

        let email = self.prepare()?;
        let outcome = self.mailer.transport.send_raw(&email);
        self.report(outcome)
    }

    /// Sends the message asynchronously.
    ///
    /// # Errors
    ///
    /// Same as [`Self::send`].
    pub async fn send_async(&self) -> Result<SendReceipt> {
        let span = self.span();
        async {
            let email = self.prepare()?;
            let outcome = self.mailer.transport.send_raw_async(email).await;
            self.report(outcome)
        }
        .instrument(span)
        .await
    }

    fn span(&self) -> tracing::Span {
        tracing::info_span!(
            "send_email",
            recipient = self.message.recipient().map(Address::as_str)
        )
    }

    fn checked_address(&self, addr: &str) -> Result<Address> {
        let address = Address::new(addr)?;
        if self.mailer.config.verify_mx
            && let Some(resolver) = &self.mailer.mx_resolver
            && !resolver.has_mx(address.domain())
        {
            tracing::debug!(domain = address.domain(), "No MX record");
            return Err(relaymail_mime::Error::InvalidAddress(addr.to_string()).into());
        }
        Ok(address)
    }

    /// Rate limit, validation and render.
    fn prepare(&self) -> Result<RawEmail> {
        let sender = self.message.sender().map_or("", Address::as_str);
        let scope = &self.mailer.config.scope_key;
        if let Some(limiter) = &self.mailer.rate_limiter
            && !limiter.allow(scope, sender)
        {
            tracing::warn!(scope = %scope, identifier = sender, "Send throttled");
            return Err(Error::Throttled {
                scope: scope.clone(),
                identifier: sender.to_string(),
            });
        }

        self.message.validate()?;
        let rendered = self.message.render_with(self.mailer.boundaries.as_ref())?;

        Ok(RawEmail {
            data: rendered.to_bytes(),
            source: sender.to_string(),
            return_path: self.message.return_path().map(ToString::to_string),
            bcc: self.message.bcc().map(ToString::to_string).into_iter().collect(),
        })
    }

    /// Logs the transport outcome and maps it to the crate's result.
    fn report(&self, outcome: std::result::Result<SendReceipt, BoxError>) -> Result<SendReceipt> {
        let mut context = Context::new();
        context.insert(
            "recipient".to_string(),
            self.message
                .recipient()
                .map_or_else(String::new, ToString::to_string),
        );

        match outcome {
            Ok(receipt) => {
                context.insert("message_id".to_string(), receipt.message_id.clone());
                self.mailer.logger.info(SENT_MESSAGE, &context);
                Ok(receipt)
            }
            Err(err) => {
                context.insert("error".to_string(), err.to_string());
                self.mailer.logger.error(FAILED_MESSAGE, &context);
                Err(Error::Transport(err))
            }
        }
    }
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
    use crate::mx::StaticMx;
    use crate::template::{MemoryTemplates, Value};
    use crate::transport::WriterTransport;

    fn mailer(config: MailerConfig) -> Mailer {
        Mailer::new(config, Arc::new(WriterTransport::new(Vec::new())))
    }

    #[test]
    fn test_compose_applies_defaults() {
        let mailer = mailer(
            MailerConfig::new()
                .with_default_sender("noreply@shop.example")
                .with_default_sender_name("Shop"),
        );
        let builder = mailer.compose().unwrap();
        assert_eq!(
            builder.message().sender().unwrap().as_str(),
            "noreply@shop.example"
        );
        assert_eq!(builder.message().sender_name(), Some("Shop"));
    }

    #[test]
    fn test_compose_rejects_bad_default_sender() {
        let mailer = mailer(MailerConfig::new().with_default_sender("nope"));
        assert!(matches!(
            mailer.compose(),
            Err(Error::Message(relaymail_mime::Error::InvalidAddress(a))) if a == "nope"
        ));
    }

    #[test]
    fn test_verify_mx_requires_resolver() {
        let mailer = mailer(MailerConfig::new().with_verify_mx(true));
        assert!(matches!(mailer.compose(), Err(Error::Config(_))));
    }

    #[test]
    fn test_verify_mx() {
        let mailer = mailer(MailerConfig::new().with_verify_mx(true))
            .with_mx_resolver(Arc::new(StaticMx::new(["x.com"])));
        let mut builder = mailer.compose().unwrap();

        builder.set_sender("a@x.com").unwrap();
        let err = builder.set_recipient("b@nomx.invalid").unwrap_err();
        assert!(matches!(
            err,
            Error::Message(relaymail_mime::Error::InvalidAddress(a)) if a == "b@nomx.invalid"
        ));
        assert!(builder.message().recipient().is_none());
    }

    #[test]
    fn test_mx_ignored_when_disabled() {
        let mailer = mailer(MailerConfig::new()).with_mx_resolver(Arc::new(|_: &str| false));
        let mut builder = mailer.compose().unwrap();
        assert!(builder.set_recipient("b@nomx.invalid").is_ok());
    }

    #[test]
    fn test_set_template_overwrites_both_bodies() {
        let templates = MemoryTemplates::new().with_template(
            "welcome",
            "<h1>Hi {{ name }}</h1><p>Thanks for joining.<br>See you soon.</p>",
        )
        .unwrap();
        let mailer = mailer(MailerConfig::new()).with_templates(Arc::new(templates));
        let mut builder = mailer.compose().unwrap();
        builder.set_text_body("old text").set_html_body("<p>old</p>");

        let mut variables = Variables::new();
        variables.insert("name".to_string(), Value::from("Ann & Bo"));
        builder.set_template("welcome", &variables).unwrap();

        assert_eq!(
            builder.message().html_body(),
            "<h1>Hi Ann &amp; Bo</h1><p>Thanks for joining.<br>See you soon.</p>"
        );
        assert_eq!(
            builder.message().text_body(),
            "Hi Ann & BoThanks for joining.\nSee you soon."
        );
    }

    #[test]
    fn test_set_template_failure_keeps_bodies() {
        let templates = MemoryTemplates::new()
            .with_template("t", "{{ missing }}")
            .unwrap();
        let mailer = mailer(MailerConfig::new()).with_templates(Arc::new(templates));
        let mut builder = mailer.compose().unwrap();
        builder.set_text_body("keep").set_html_body("<p>keep</p>");

        assert!(matches!(
            builder.set_template("t", &Variables::new()),
            Err(Error::TemplateRender(_))
        ));
        assert!(matches!(
            builder.set_template("absent", &Variables::new()),
            Err(Error::TemplateRender(_))
        ));
        assert_eq!(builder.message().text_body(), "keep");
        assert_eq!(builder.message().html_body(), "<p>keep</p>");
    }

    #[test]
    fn test_set_template_without_engine() {
        let mut builder = mailer(MailerConfig::new()).compose().unwrap();
        assert!(matches!(
            builder.set_template("welcome", &Variables::new()),
            Err(Error::TemplateEngineNotConfigured)
        ));
    }

    #[test]
    fn test_attachment_policy_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "hello").unwrap();

        let mut strict = mailer(MailerConfig::new()).compose().unwrap();
        assert!(matches!(
            strict.add_attachment(&path),
            Err(Error::Message(relaymail_mime::Error::AttachmentTypeNotAllowed { .. }))
        ));

        let mut relaxed = mailer(MailerConfig::new().with_allowed_attachment_types(["text/plain"]))
            .compose()
            .unwrap();
        relaxed.add_attachment(&path).unwrap();
        assert_eq!(relaxed.message().attachments().len(), 1);
    }

    #[test]
    fn test_rate_limit_from_config() {
        let mailer = mailer(MailerConfig::new().with_rate_limit(crate::RateLimitConfig {
            messages_per_second: 0.0,
            burst_size: 1,
            ..crate::RateLimitConfig::default()
        }));
        let mut builder = mailer.compose().unwrap();
        builder
            .set_sender("a@x.com")
            .unwrap()
            .set_recipient("b@y.com")
            .unwrap()
            .set_subject("Hi")
            .set_text_body("hello");

        assert!(builder.send().is_ok());
        assert!(matches!(builder.send(), Err(Error::Throttled { .. })));
    }
}
