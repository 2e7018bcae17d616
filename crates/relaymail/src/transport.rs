//! Delivery transport abstraction.
//!
//! A [`Transport`] hands a fully rendered message to a delivery provider.
//! The library never interprets provider errors: they travel back to the
//! caller boxed, and can be downcast to the provider's own type.

use std::io::Write;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Provider error as returned by a transport.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A rendered message plus its envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEmail {
    /// Raw RFC 5322 bytes: headers, blank line, body.
    pub data: Vec<u8>,
    /// Envelope sender address.
    pub source: String,
    /// Bounce address, if one was set.
    pub return_path: Option<String>,
    /// Blind-copy recipients.
    pub bcc: Vec<String>,
}

/// What the provider returned for a successful send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendReceipt {
    /// Message identifier assigned by the provider.
    pub message_id: String,
}

impl SendReceipt {
    /// Creates a receipt.
    #[must_use]
    pub fn new(message_id: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
        }
    }
}

/// Trait for delivery providers.
///
/// # Example
///
/// ```ignore
/// struct Provider { /* API client */ }
///
/// #[async_trait]
/// impl Transport for Provider {
///     fn send_raw(&self, email: &RawEmail) -> Result<SendReceipt, BoxError> {
///         let id = self.client.send_raw_email(&email.data, &email.source)?;
///         Ok(SendReceipt::new(id))
///     }
/// }
/// ```
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends a message, blocking until the provider answers.
    ///
    /// # Errors
    ///
    /// Returns the provider's error unchanged.
    fn send_raw(&self, email: &RawEmail) -> Result<SendReceipt, BoxError>;

    /// Sends a message asynchronously.
    ///
    /// Defaults to [`Self::send_raw`]; providers with an async client
    /// override this.
    ///
    /// # Errors
    ///
    /// Returns the provider's error unchanged.
    async fn send_raw_async(&self, email: RawEmail) -> Result<SendReceipt, BoxError> {
        self.send_raw(&email)
    }
}

/// Writes each message to a byte sink instead of delivering it.
///
/// Messages are separated by a blank line. Receipts are numbered
/// `local-1`, `local-2`, ...
#[derive(Debug)]
pub struct WriterTransport<W> {
    writer: Mutex<W>,
    sent: AtomicU64,
}

impl<W: Write + Send> WriterTransport<W> {
    /// Wraps a writer.
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
            sent: AtomicU64::new(0),
        }
    }

    /// Returns the inner writer.
    pub fn into_inner(self) -> W {
        self.writer
            .into_inner()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl<W: Write + Send> Transport for WriterTransport<W> {
    fn send_raw(&self, email: &RawEmail) -> Result<SendReceipt, BoxError> {
        let mut writer = self
            .writer
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        writer.write_all(&email.data)?;
        writer.write_all(b"\r\n")?;
        writer.flush()?;
        drop(writer);

        let n = self.sent.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::debug!(bytes = email.data.len(), source = %email.source, "Wrote message");
        Ok(SendReceipt::new(format!("local-{n}")))
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

    fn raw(data: &str) -> RawEmail {
        RawEmail {
            data: data.as_bytes().to_vec(),
            source: "a@x.com".to_string(),
            return_path: None,
            bcc: Vec::new(),
        }
    }

    #[test]
    fn test_writer_transport_numbers_receipts() {
        let transport = WriterTransport::new(Vec::new());
        assert_eq!(transport.send_raw(&raw("one")).unwrap().message_id, "local-1");
        assert_eq!(transport.send_raw(&raw("two")).unwrap().message_id, "local-2");
        assert_eq!(transport.into_inner(), b"one\r\ntwo\r\n");
    }

    #[test]
    fn test_async_defaults_to_blocking_send() {
        let transport = WriterTransport::new(Vec::new());
        let receipt = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
            .block_on(transport.send_raw_async(raw("x")))
            .unwrap();
        assert_eq!(receipt, SendReceipt::new("local-1"));
    }
}
