//! Mailer configuration.

use std::path::Path;

use relaymail_mime::{AttachmentPolicy, DEFAULT_ALLOWED_TYPES, MAX_ATTACHMENT_SIZE};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::rate_limit::RateLimitConfig;

/// Settings shared by every message a [`crate::Mailer`] composes.
///
/// Every field has a default, so a partial JSON document is enough:
///
/// ```json
/// { "default_sender": "noreply@example.com", "verify_mx": true }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MailerConfig {
    /// Scope passed to the rate limiter.
    pub scope_key: String,
    /// Require an MX record for every address. Needs an MX resolver.
    pub verify_mx: bool,
    /// Largest accepted attachment, in bytes.
    pub max_attachment_bytes: u64,
    /// MIME types accepted as attachments.
    pub allowed_attachment_types: Vec<String>,
    /// Sender applied to every new message.
    pub default_sender: Option<String>,
    /// Sender display name applied to every new message.
    pub default_sender_name: Option<String>,
    /// Builds a token bucket limiter when set.
    pub rate_limit: Option<RateLimitConfig>,
}

impl Default for MailerConfig {
    fn default() -> Self {
        Self {
            scope_key: "email".to_string(),
            verify_mx: false,
            max_attachment_bytes: MAX_ATTACHMENT_SIZE,
            allowed_attachment_types: DEFAULT_ALLOWED_TYPES.iter().map(ToString::to_string).collect(),
            default_sender: None,
            default_sender_name: None,
            rate_limit: None,
        }
    }
}

impl MailerConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a JSON document.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Serde`] on malformed JSON, or [`Error::Config`] if
    /// the values are inconsistent.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be read, otherwise as
    /// [`Self::from_json_str`].
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Checks values that serde cannot.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.scope_key.is_empty() {
            return Err(Error::Config("scope_key must not be empty".into()));
        }
        if self.max_attachment_bytes == 0 {
            return Err(Error::Config("max_attachment_bytes must be positive".into()));
        }
        if let Some(rate) = &self.rate_limit
            && !(rate.messages_per_second.is_finite() && rate.messages_per_second >= 0.0)
        {
            return Err(Error::Config(
                "rate_limit.messages_per_second must be a non-negative number".into(),
            ));
        }
        Ok(())
    }

    /// Sets the rate limiter scope.
    #[must_use]
    pub fn with_scope_key(mut self, scope_key: impl Into<String>) -> Self {
        self.scope_key = scope_key.into();
        self
    }

    /// Enables or disables MX verification.
    #[must_use]
    pub const fn with_verify_mx(mut self, verify_mx: bool) -> Self {
        self.verify_mx = verify_mx;
        self
    }

    /// Sets the attachment size limit.
    #[must_use]
    pub const fn with_max_attachment_bytes(mut self, bytes: u64) -> Self {
        self.max_attachment_bytes = bytes;
        self
    }

    /// Replaces the attachment type allow-list.
    #[must_use]
    pub fn with_allowed_attachment_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_attachment_types = types.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the default sender address.
    #[must_use]
    pub fn with_default_sender(mut self, sender: impl Into<String>) -> Self {
        self.default_sender = Some(sender.into());
        self
    }

    /// Sets the default sender display name.
    #[must_use]
    pub fn with_default_sender_name(mut self, name: impl Into<String>) -> Self {
        self.default_sender_name = Some(name.into());
        self
    }

    /// Enables the bundled token bucket limiter.
    #[must_use]
    pub const fn with_rate_limit(mut self, rate_limit: RateLimitConfig) -> Self {
        self.rate_limit = Some(rate_limit);
        self
    }

    /// Attachment checks derived from this configuration.
    #[must_use]
    pub fn attachment_policy(&self) -> AttachmentPolicy {
        AttachmentPolicy {
            max_size: self.max_attachment_bytes,
            allowed_types: self.allowed_attachment_types.clone(),
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

    #[test]
    fn test_defaults() {
        let config = MailerConfig::default();
        assert_eq!(config.scope_key, "email");
        assert!(!config.verify_mx);
        assert_eq!(config.max_attachment_bytes, 10 * 1024 * 1024);
        assert_eq!(
            config.allowed_attachment_types,
            ["application/pdf", "image/jpeg", "image/png"]
        );
        assert!(config.default_sender.is_none());
        assert!(config.rate_limit.is_none());
    }

    #[test]
    fn test_partial_json() {
        let config = MailerConfig::from_json_str(
            r#"{"default_sender": "noreply@example.com", "rate_limit": {"burst_size": 2}}"#,
        )
        .unwrap();
        assert_eq!(config.default_sender.as_deref(), Some("noreply@example.com"));
        assert_eq!(config.scope_key, "email");
        assert_eq!(config.rate_limit.unwrap().burst_size, 2);
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(
            MailerConfig::from_json_str("{\"verify_mx\": \"yes\"}"),
            Err(Error::Serde(_))
        ));
        assert!(matches!(
            MailerConfig::from_json_str("{\"max_attachment_bytes\": 0}"),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            MailerConfig::from_json_str("{\"scope_key\": \"\"}"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mailer.json");
        std::fs::write(&path, r#"{"scope_key": "newsletter", "verify_mx": true}"#).unwrap();

        let config = MailerConfig::from_file(&path).unwrap();
        assert_eq!(config.scope_key, "newsletter");
        assert!(config.verify_mx);

        assert!(matches!(
            MailerConfig::from_file(dir.path().join("missing.json")),
            Err(Error::Io(_))
        ));
    }

    #[test]
    fn test_builder_and_policy() {
        let config = MailerConfig::new()
            .with_max_attachment_bytes(1024)
            .with_allowed_attachment_types(["text/plain"])
            .with_default_sender_name("Shop");
        let policy = config.attachment_policy();
        assert_eq!(policy.max_size, 1024);
        assert!(policy.allows("text/plain"));
        assert!(!policy.allows("application/pdf"));
        assert_eq!(config.default_sender_name.as_deref(), Some("Shop"));
    }

    #[test]
    fn test_json_round_trip() {
        let config = MailerConfig::new().with_default_sender("a@x.com");
        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(MailerConfig::from_json_str(&json).unwrap(), config);
    }
}
