//! Error types for the mail client.

use thiserror::Error;

use crate::template::TemplateError;
use crate::transport::BoxError;

/// Errors that can occur while composing or sending a message.
#[derive(Debug, Error)]
pub enum Error {
    /// Field validation, attachment or render failure.
    #[error(transparent)]
    Message(#[from] relaymail_mime::Error),

    /// `set_template` was called without a template engine.
    #[error("No template engine configured")]
    TemplateEngineNotConfigured,

    /// The template engine failed to load or render.
    #[error("Template error: {0}")]
    TemplateRender(#[from] TemplateError),

    /// The rate limiter refused the send.
    #[error("Rate limit exceeded for {scope}: {identifier}")]
    Throttled {
        /// Scope key passed to the limiter.
        scope: String,
        /// Sender address passed to the limiter.
        identifier: String,
    },

    /// The transport failed; the provider's error is kept as is.
    #[error(transparent)]
    Transport(BoxError),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// The DNS resolver could not be set up.
    #[cfg(feature = "dns")]
    #[error("DNS resolver error: {0}")]
    Dns(#[from] hickory_resolver::ResolveError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
