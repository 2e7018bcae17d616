//! Error types for MIME operations.

use std::path::PathBuf;
use std::string::FromUtf8Error;

use crate::outbound::Field;

/// Result type alias for MIME operations.
pub type Result<T> = std::result::Result<T, Error>;

/// MIME error types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Address does not match the addr-spec grammar (or has no MX in strict mode).
    #[error("Invalid email address: {0}")]
    InvalidAddress(String),

    /// A field required for sending is missing or empty.
    #[error("Missing required field: {0}")]
    MissingField(Field),

    /// Attachment path does not exist or is not a regular file.
    #[error("Attachment not found: {}", .0.display())]
    AttachmentNotFound(PathBuf),

    /// Attachment exceeds the size limit.
    #[error("Attachment {} is {size} bytes, limit is {limit}", .path.display())]
    AttachmentTooLarge {
        /// Offending file.
        path: PathBuf,
        /// Size on disk.
        size: u64,
        /// Configured limit.
        limit: u64,
    },

    /// Attachment content type is not in the allow-list.
    #[error("Attachment {} has disallowed type {detected}", .path.display())]
    AttachmentTypeNotAllowed {
        /// Offending file.
        path: PathBuf,
        /// Sniffed MIME type.
        detected: String,
    },

    /// I/O error while reading an attachment.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid MIME header.
    #[error("Invalid MIME header: {0}")]
    InvalidHeader(String),

    /// Invalid content type.
    #[error("Invalid content type: {0}")]
    InvalidContentType(String),

    /// Invalid encoding.
    #[error("Invalid encoding: {0}")]
    InvalidEncoding(String),

    /// Base64 decode error.
    #[error("Base64 decode error: {0}")]
    Base64Decode(#[from] base64::DecodeError),

    /// UTF-8 decode error.
    #[error("UTF-8 decode error: {0}")]
    Utf8Decode(#[from] FromUtf8Error),

    /// Missing boundary in multipart message.
    #[error("Missing boundary in multipart message")]
    MissingBoundary,

    /// Invalid multipart structure.
    #[error("Invalid multipart structure: {0}")]
    InvalidMultipart(String),
}
