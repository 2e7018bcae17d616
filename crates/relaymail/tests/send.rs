//! End-to-end send tests with recording collaborators.

#![allow(clippy::unwrap_used)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use relaymail::mime::{Field, Message};
use relaymail::{
    BoundarySource, BoxError, Context, Error, Level, Logger, Mailer, MailerConfig,
    MemoryTemplates, MessageBuilder, RateLimiter, RawEmail, SendReceipt, Transport, Value,
    Variables,
};

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
#[error("provider unavailable ({code})")]
struct ProviderError {
    code: u16,
}

#[derive(Default)]
struct RecordingTransport {
    sent: Mutex<Vec<RawEmail>>,
    async_sends: AtomicUsize,
    fail_with: Option<u16>,
}

impl RecordingTransport {
    fn failing(code: u16) -> Self {
        Self {
            fail_with: Some(code),
            ..Self::default()
        }
    }

    fn sent(&self) -> Vec<RawEmail> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    fn send_raw(&self, email: &RawEmail) -> Result<SendReceipt, BoxError> {
        let mut sent = self.sent.lock().unwrap();
        sent.push(email.clone());
        if let Some(code) = self.fail_with {
            return Err(Box::new(ProviderError { code }));
        }
        Ok(SendReceipt::new(format!("msg-{}", sent.len())))
    }

    async fn send_raw_async(&self, email: RawEmail) -> Result<SendReceipt, BoxError> {
        self.async_sends.fetch_add(1, Ordering::SeqCst);
        self.send_raw(&email)
    }
}

struct RecordingLimiter {
    allow: bool,
    calls: Mutex<Vec<(String, String)>>,
}

impl RecordingLimiter {
    fn new(allow: bool) -> Self {
        Self {
            allow,
            calls: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

impl RateLimiter for RecordingLimiter {
    fn allow(&self, scope: &str, identifier: &str) -> bool {
        self.calls
            .lock()
            .unwrap()
            .push((scope.to_string(), identifier.to_string()));
        self.allow
    }
}

#[derive(Default)]
struct RecordingLogger {
    events: Mutex<Vec<(Level, String)>>,
}

impl RecordingLogger {
    fn events(&self) -> Vec<(Level, String)> {
        self.events.lock().unwrap().clone()
    }
}

impl Logger for RecordingLogger {
    fn log(&self, level: Level, message: &str, context: &Context) {
        self.events
            .lock()
            .unwrap()
            .push((level, relaymail::log::interpolate(message, context).into_owned()));
    }
}

#[derive(Default)]
struct Sequential(AtomicUsize);

impl BoundarySource for Sequential {
    fn next_boundary(&self) -> String {
        format!("=_b{}", self.0.fetch_add(1, Ordering::SeqCst))
    }
}

struct Harness {
    transport: Arc<RecordingTransport>,
    limiter: Arc<RecordingLimiter>,
    logger: Arc<RecordingLogger>,
    mailer: Mailer,
}

impl Harness {
    fn new(transport: RecordingTransport, allow: bool) -> Self {
        let transport = Arc::new(transport);
        let limiter = Arc::new(RecordingLimiter::new(allow));
        let logger = Arc::new(RecordingLogger::default());
        let mailer = Mailer::new(MailerConfig::default(), transport.clone())
            .with_rate_limiter(limiter.clone())
            .with_logger(logger.clone())
            .with_boundary_source(Arc::new(Sequential::default()));
        Self {
            transport,
            limiter,
            logger,
            mailer,
        }
    }

    fn scenario(&self) -> MessageBuilder {
        let mut email = self.mailer.compose().unwrap();
        email
            .set_sender("a@x.com")
            .unwrap()
            .set_recipient("b@y.com")
            .unwrap()
            .set_subject("Hi")
            .set_text_body("hello");
        email
    }
}

fn raw_text(email: &RawEmail) -> String {
    String::from_utf8(email.data.clone()).unwrap()
}

#[test]
fn test_send_scenario() {
    let harness = Harness::new(RecordingTransport::default(), true);
    let receipt = harness.scenario().send().unwrap();
    assert_eq!(receipt.message_id, "msg-1");

    assert_eq!(
        harness.limiter.calls(),
        [("email".to_string(), "a@x.com".to_string())]
    );

    let sent = harness.transport.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].source, "a@x.com");
    assert_eq!(sent[0].return_path, None);
    assert!(sent[0].bcc.is_empty());

    let raw = raw_text(&sent[0]);
    assert!(raw.starts_with("From: a@x.com\r\n"));
    assert!(raw.contains("\r\nTo: b@y.com\r\n"));
    assert!(raw.contains("\r\nSubject: Hi\r\n"));
    assert!(raw.contains("\r\nContent-Type: multipart/alternative; boundary=\"=_b0\"\r\n\r\n"));

    let parsed = Message::parse(&raw).unwrap();
    assert!(parsed.content_type().unwrap().is("multipart", "alternative"));
    assert_eq!(parsed.text_part().unwrap(), "hello");

    assert_eq!(
        harness.logger.events(),
        [(
            Level::Info,
            "Email sent to b@y.com (message id msg-1)".to_string()
        )]
    );
}

#[test]
fn test_throttled_send_never_reaches_transport() {
    let harness = Harness::new(RecordingTransport::default(), false);
    let err = harness.scenario().send().unwrap_err();

    assert!(matches!(
        err,
        Error::Throttled { ref scope, ref identifier } if scope == "email" && identifier == "a@x.com"
    ));
    assert_eq!(harness.limiter.calls().len(), 1);
    assert!(harness.transport.sent().is_empty());
    assert!(harness.logger.events().is_empty());
}

#[test]
fn test_rate_limit_checked_before_validation() {
    let harness = Harness::new(RecordingTransport::default(), true);
    let email = harness.mailer.compose().unwrap();

    let err = email.send().unwrap_err();
    assert!(matches!(
        err,
        Error::Message(relaymail::mime::Error::MissingField(Field::Sender))
    ));
    assert_eq!(
        harness.limiter.calls(),
        [("email".to_string(), String::new())]
    );
    assert!(harness.transport.sent().is_empty());
}

#[test]
fn test_validation_failure_is_not_logged() {
    let harness = Harness::new(RecordingTransport::default(), true);
    let mut email = harness.scenario();
    email.set_text_body("");

    assert!(matches!(
        email.send(),
        Err(Error::Message(relaymail::mime::Error::MissingField(Field::Body)))
    ));
    assert!(harness.transport.sent().is_empty());
    assert!(harness.logger.events().is_empty());
}

#[test]
fn test_transport_error_passes_through() {
    let harness = Harness::new(RecordingTransport::failing(503), true);
    let err = harness.scenario().send().unwrap_err();

    let Error::Transport(source) = err else {
        panic!("expected transport error");
    };
    assert_eq!(
        source.downcast_ref::<ProviderError>(),
        Some(&ProviderError { code: 503 })
    );
    assert_eq!(source.to_string(), "provider unavailable (503)");

    assert_eq!(
        harness.logger.events(),
        [(
            Level::Error,
            "Email to b@y.com failed: provider unavailable (503)".to_string()
        )]
    );
}

#[test]
fn test_envelope_carries_bcc_and_return_path() {
    let harness = Harness::new(RecordingTransport::default(), true);
    let mut email = harness.scenario();
    email
        .set_bcc("audit@x.com")
        .unwrap()
        .set_return_path("bounces@x.com")
        .unwrap()
        .set_sender_name("Shop");
    email.send().unwrap();

    let sent = harness.transport.sent();
    assert_eq!(sent[0].source, "a@x.com");
    assert_eq!(sent[0].bcc, ["audit@x.com"]);
    assert_eq!(sent[0].return_path.as_deref(), Some("bounces@x.com"));

    let parsed = Message::parse(&raw_text(&sent[0])).unwrap();
    assert_eq!(parsed.from(), Some("Shop <a@x.com>"));
    assert_eq!(parsed.headers.get("Bcc"), Some("audit@x.com"));
}

#[test]
fn test_template_bodies_are_sent() {
    let templates = MemoryTemplates::new().with_template(
        "shipped",
        "<p>Order <b>{{ order.id }}</b> has shipped.</p><p>{{ order.carrier }}</p>",
    )
    .unwrap();
    let harness = Harness::new(RecordingTransport::default(), true);
    let mailer = harness.mailer.clone().with_templates(Arc::new(templates));

    let variables: Variables =
        serde_json::from_str(r#"{"order": {"id": 1042, "carrier": "Post & Co"}}"#).unwrap();
    assert_eq!(
        variables["order"],
        Value::Map(
            [
                ("carrier".to_string(), Value::from("Post & Co")),
                ("id".to_string(), Value::Int(1042)),
            ]
            .into_iter()
            .collect()
        )
    );

    let mut email = mailer.compose().unwrap();
    email
        .set_sender("a@x.com")
        .unwrap()
        .set_recipient("b@y.com")
        .unwrap()
        .set_subject("Shipped")
        .set_template("shipped", &variables)
        .unwrap();
    email.send().unwrap();

    let parsed = Message::parse(&raw_text(&harness.transport.sent()[0])).unwrap();
    assert_eq!(
        parsed.html_part().unwrap(),
        "<p>Order <b>1042</b> has shipped.</p><p>Post &amp; Co</p>"
    );
    assert_eq!(
        parsed.text_part().unwrap(),
        "Order 1042 has shipped.\n\nPost & Co"
    );
}

#[test]
fn test_template_engine_not_configured() {
    let harness = Harness::new(RecordingTransport::default(), true);
    let mut email = harness.scenario();
    assert!(matches!(
        email.set_template("shipped", &Variables::new()),
        Err(Error::TemplateEngineNotConfigured)
    ));
    assert_eq!(email.message().text_body(), "hello");
}

#[test]
fn test_builder_can_send_twice() {
    let harness = Harness::new(RecordingTransport::default(), true);
    let email = harness.scenario();
    email.send().unwrap();
    email.send().unwrap();

    let sent = harness.transport.sent();
    assert_eq!(sent.len(), 2);
    assert!(raw_text(&sent[0]).contains("boundary=\"=_b0\""));
    assert!(raw_text(&sent[1]).contains("boundary=\"=_b1\""));
}

#[tokio::test]
async fn test_send_async_scenario() {
    let harness = Harness::new(RecordingTransport::default(), true);
    let receipt = harness.scenario().send_async().await.unwrap();
    assert_eq!(receipt, SendReceipt::new("msg-1"));

    assert_eq!(harness.transport.async_sends.load(Ordering::SeqCst), 1);
    assert_eq!(harness.limiter.calls().len(), 1);
    let parsed = Message::parse(&raw_text(&harness.transport.sent()[0])).unwrap();
    assert_eq!(parsed.text_part().unwrap(), "hello");
    assert_eq!(harness.logger.events().len(), 1);
}

#[tokio::test]
async fn test_send_async_throttled() {
    let harness = Harness::new(RecordingTransport::default(), false);
    let err = harness.scenario().send_async().await.unwrap_err();
    assert!(matches!(err, Error::Throttled { .. }));
    assert_eq!(harness.transport.async_sends.load(Ordering::SeqCst), 0);
}
