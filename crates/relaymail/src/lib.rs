//! # relaymail
//!
//! Transactional email client: compose a message, check it against a rate
//! limit, render it to MIME and hand it to a delivery provider.
//!
//! ## Features
//!
//! - **Fluent builder**: eager address and attachment validation, optional
//!   MX verification, template-driven bodies
//! - **Pluggable collaborators**: [`Transport`], [`RateLimiter`],
//!   [`TemplateEngine`], [`Logger`], [`MxResolver`]
//! - **Bundled implementations**: token bucket limiter, in-memory and
//!   directory `minijinja` templates, `tracing` and file loggers, a DNS
//!   MX resolver (`dns` feature, on by default)
//! - **Sync and async sends** with one log event per attempt
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use relaymail::{Mailer, MailerConfig};
//!
//! let mailer = Mailer::new(MailerConfig::from_file("mailer.json")?, Arc::new(provider));
//!
//! let mut email = mailer.compose()?;
//! email
//!     .set_sender("shop@example.com")?
//!     .set_recipient("customer@example.org")?
//!     .set_subject("Your receipt")
//!     .set_html_body("<p>Thanks for your order.</p>")
//!     .add_attachment("receipt.pdf")?;
//!
//! let receipt = email.send_async().await?;
//! println!("queued as {}", receipt.message_id);
//! ```
//!
//! MIME composition lives in [`relaymail_mime`], re-exported as [`mime`].

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod builder;
mod config;
mod error;

#[cfg(feature = "dns")]
pub mod dns;
pub mod log;
pub mod mx;
pub mod rate_limit;
pub mod template;
pub mod transport;

pub use relaymail_mime as mime;

pub use builder::{Mailer, MessageBuilder};
pub use config::MailerConfig;
#[cfg(feature = "dns")]
pub use dns::{DnsConfig, DnsMxResolver};
pub use error::{Error, Result};
pub use log::{Context, FileLogger, Level, Logger, NoopLogger, TracingLogger};
pub use mx::{MxResolver, StaticMx};
pub use rate_limit::{RateLimitConfig, RateLimiter, TokenBucketLimiter};
pub use relaymail_mime::{Address, BoundarySource, RandomBoundary, RenderedMessage};
pub use template::{
    DirectoryTemplates, JinjaTemplate, MemoryTemplates, Template, TemplateEngine,
    TemplateError, Value, Variables,
};
pub use transport::{BoxError, RawEmail, SendReceipt, Transport, WriterTransport};
