//! Send outcome logging.
//!
//! The builder reports each send through a [`Logger`]. Messages carry
//! `{key}` placeholders filled from a [`Context`].

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::str::FromStr;
use std::sync::{LazyLock, Mutex, PoisonError};

use chrono::{SecondsFormat, Utc};
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

/// Placeholder values for a log message.
pub type Context = BTreeMap<String, String>;

/// Severity, from most to least severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    /// System is unusable.
    Emergency,
    /// Action must be taken immediately.
    Alert,
    /// Critical conditions.
    Critical,
    /// Runtime errors.
    Error,
    /// Exceptional occurrences that are not errors.
    Warning,
    /// Normal but significant events.
    Notice,
    /// Interesting events.
    Info,
    /// Detailed debug information.
    Debug,
}

impl Level {
    /// All levels, most severe first.
    pub const ALL: [Self; 8] = [
        Self::Emergency,
        Self::Alert,
        Self::Critical,
        Self::Error,
        Self::Warning,
        Self::Notice,
        Self::Info,
        Self::Debug,
    ];

    /// Upper-case name used in log lines.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Emergency => "EMERGENCY",
            Self::Alert => "ALERT",
            Self::Critical => "CRITICAL",
            Self::Error => "ERROR",
            Self::Warning => "WARNING",
            Self::Notice => "NOTICE",
            Self::Info => "INFO",
            Self::Debug => "DEBUG",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Level {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|level| level.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown log level: {s}"))
    }
}

#[allow(clippy::expect_used)]
static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([A-Za-z0-9_.]+)\}").expect("static pattern"));

/// Replaces `{key}` with `context[key]`; unknown keys stay verbatim.
#[must_use]
pub fn interpolate<'a>(message: &'a str, context: &Context) -> Cow<'a, str> {
    if context.is_empty() {
        return Cow::Borrowed(message);
    }
    PLACEHOLDER.replace_all(message, |caps: &Captures<'_>| {
        context
            .get(&caps[1])
            .map_or_else(|| caps[0].to_string(), Clone::clone)
    })
}

/// Receives log events from the builder.
pub trait Logger: Send + Sync {
    /// Logs `message` at `level`.
    fn log(&self, level: Level, message: &str, context: &Context);

    /// Logs at [`Level::Emergency`].
    fn emergency(&self, message: &str, context: &Context) {
        self.log(Level::Emergency, message, context);
    }

    /// Logs at [`Level::Alert`].
    fn alert(&self, message: &str, context: &Context) {
        self.log(Level::Alert, message, context);
    }

    /// Logs at [`Level::Critical`].
    fn critical(&self, message: &str, context: &Context) {
        self.log(Level::Critical, message, context);
    }

    /// Logs at [`Level::Error`].
    fn error(&self, message: &str, context: &Context) {
        self.log(Level::Error, message, context);
    }

    /// Logs at [`Level::Warning`].
    fn warning(&self, message: &str, context: &Context) {
        self.log(Level::Warning, message, context);
    }

    /// Logs at [`Level::Notice`].
    fn notice(&self, message: &str, context: &Context) {
        self.log(Level::Notice, message, context);
    }

    /// Logs at [`Level::Info`].
    fn info(&self, message: &str, context: &Context) {
        self.log(Level::Info, message, context);
    }

    /// Logs at [`Level::Debug`].
    fn debug(&self, message: &str, context: &Context) {
        self.log(Level::Debug, message, context);
    }
}

/// Forwards to `tracing` events. The default logger.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn log(&self, level: Level, message: &str, context: &Context) {
        let message = interpolate(message, context);
        match level {
            Level::Emergency | Level::Alert | Level::Critical | Level::Error => {
                tracing::error!(level = level.as_str(), "{message}");
            }
            Level::Warning => tracing::warn!("{message}"),
            Level::Notice => tracing::info!(level = level.as_str(), "{message}"),
            Level::Info => tracing::info!("{message}"),
            Level::Debug => tracing::debug!("{message}"),
        }
    }
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLogger;

impl Logger for NoopLogger {
    fn log(&self, _level: Level, _message: &str, _context: &Context) {}
}

/// Appends `[timestamp] LEVEL: message` lines to a file.
#[derive(Debug)]
pub struct FileLogger {
    file: Mutex<File>,
    min_level: Level,
}

impl FileLogger {
    /// Opens `path` for appending, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
            min_level: Level::Debug,
        })
    }

    /// Drops events less severe than `level`.
    #[must_use]
    pub const fn with_min_level(mut self, level: Level) -> Self {
        self.min_level = level;
        self
    }
}

impl Logger for FileLogger {
    fn log(&self, level: Level, message: &str, context: &Context) {
        if level > self.min_level {
            return;
        }
        let line = format!(
            "[{}] {}: {}\n",
            Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            level,
            interpolate(message, context)
        );
        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = file.write_all(line.as_bytes()) {
            tracing::warn!(error = %e, "Failed to write log line");
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

    fn context(pairs: &[(&str, &str)]) -> Context {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_interpolate() {
        let ctx = context(&[("recipient", "b@y.com"), ("message_id", "m-1")]);
        assert_eq!(
            interpolate("Email sent to {recipient} (message id {message_id})", &ctx),
            "Email sent to b@y.com (message id m-1)"
        );
        assert_eq!(interpolate("{unknown} and {recipient}", &ctx), "{unknown} and b@y.com");
        assert_eq!(interpolate("no {placeholders", &ctx), "no {placeholders");
    }

    #[test]
    fn test_level_order_and_names() {
        assert!(Level::Emergency < Level::Debug);
        assert_eq!(Level::Warning.to_string(), "WARNING");
        assert_eq!("notice".parse::<Level>().unwrap(), Level::Notice);
        assert!("verbose".parse::<Level>().is_err());
    }

    #[test]
    fn test_file_logger_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mail.log");
        let logger = FileLogger::open(&path).unwrap();
        logger.info("Email sent to {recipient}", &context(&[("recipient", "b@y.com")]));
        logger.error("boom", &Context::new());

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);

        let (stamp, rest) = lines[0].strip_prefix('[').unwrap().split_once("] ").unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(stamp).is_ok());
        assert_eq!(rest, "INFO: Email sent to b@y.com");
        assert!(lines[1].ends_with("] ERROR: boom"));
    }

    #[test]
    fn test_file_logger_min_level() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mail.log");
        let logger = FileLogger::open(&path).unwrap().with_min_level(Level::Warning);
        logger.info("skipped", &Context::new());
        logger.critical("kept", &Context::new());

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 1);
        assert!(content.contains("CRITICAL: kept"));
    }
}
