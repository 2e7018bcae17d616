//! Validated file attachments.

use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Default attachment size limit (10 MiB).
pub const MAX_ATTACHMENT_SIZE: u64 = 10 * 1024 * 1024;

/// Content types accepted by the default policy.
pub const DEFAULT_ALLOWED_TYPES: [&str; 3] = ["application/pdf", "image/jpeg", "image/png"];

/// Bytes inspected when sniffing a file's type.
const SNIFF_LEN: u64 = 8192;

/// Limits applied to every attachment at insertion time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentPolicy {
    /// Largest accepted file, in bytes.
    pub max_size: u64,
    /// Accepted sniffed content types.
    pub allowed_types: Vec<String>,
}

impl Default for AttachmentPolicy {
    fn default() -> Self {
        Self {
            max_size: MAX_ATTACHMENT_SIZE,
            allowed_types: DEFAULT_ALLOWED_TYPES.iter().map(ToString::to_string).collect(),
        }
    }
}

impl AttachmentPolicy {
    /// Returns true if `mime_type` is in the allow-list.
    #[must_use]
    pub fn allows(&self, mime_type: &str) -> bool {
        self.allowed_types
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(mime_type))
    }
}

/// A file accepted for attachment.
///
/// Only metadata is held; the content is read when the message is rendered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    path: PathBuf,
    mime_type: String,
    size: u64,
}

impl Attachment {
    /// Validates `path` against `policy`.
    ///
    /// Checks run in order: existence, size, sniffed type.
    ///
    /// # Errors
    ///
    /// - [`Error::AttachmentNotFound`] if the path is missing or not a file
    /// - [`Error::AttachmentTooLarge`] if it exceeds `policy.max_size`
    /// - [`Error::AttachmentTypeNotAllowed`] if the sniffed type is not allowed
    /// - [`Error::Io`] for other filesystem failures
    pub fn from_path(path: impl AsRef<Path>, policy: &AttachmentPolicy) -> Result<Self> {
        let path = path.as_ref();
        let metadata = match std::fs::metadata(path) {
            Ok(metadata) if metadata.is_file() => metadata,
            Ok(_) => return Err(Error::AttachmentNotFound(path.to_path_buf())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(Error::AttachmentNotFound(path.to_path_buf()));
            }
            Err(e) => return Err(e.into()),
        };

        let size = metadata.len();
        if size > policy.max_size {
            return Err(Error::AttachmentTooLarge {
                path: path.to_path_buf(),
                size,
                limit: policy.max_size,
            });
        }

        let mime_type = sniff_mime_type(path)?;
        if !policy.allows(&mime_type) {
            return Err(Error::AttachmentTypeNotAllowed {
                path: path.to_path_buf(),
                detected: mime_type,
            });
        }

        tracing::debug!(path = %path.display(), %mime_type, size, "Attachment accepted");

        Ok(Self {
            path: path.to_path_buf(),
            mime_type,
            size,
        })
    }

    /// Path the attachment is read from.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sniffed content type.
    #[must_use]
    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    /// Size on disk at validation time.
    #[must_use]
    pub const fn size(&self) -> u64 {
        self.size
    }

    /// Final path component, used as the attachment filename.
    #[must_use]
    pub fn filename(&self) -> String {
        self.path
            .file_name()
            .map_or_else(|| "attachment".to_string(), |n| n.to_string_lossy().into_owned())
    }

    /// Reads the file content.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AttachmentNotFound`] if the file disappeared since
    /// validation, [`Error::Io`] for other read failures.
    pub fn read(&self) -> Result<Vec<u8>> {
        std::fs::read(&self.path).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                Error::AttachmentNotFound(self.path.clone())
            } else {
                e.into()
            }
        })
    }
}

/// Detects a file's content type from its leading bytes.
///
/// Known binary signatures win; otherwise UTF-8 content is `text/plain`
/// and anything else `application/octet-stream`.
///
/// # Errors
///
/// Returns an I/O error if the file cannot be read.
pub fn sniff_mime_type(path: &Path) -> Result<String> {
    let mut head = Vec::new();
    File::open(path)?.take(SNIFF_LEN).read_to_end(&mut head)?;
    Ok(sniff_bytes(&head).to_string())
}

fn sniff_bytes(head: &[u8]) -> &'static str {
    if let Some(kind) = infer::get(head) {
        return kind.mime_type();
    }
    match std::str::from_utf8(head) {
        Ok(_) => "text/plain",
        // A multi-byte sequence cut off by the sniff window is still text.
        Err(e) if e.error_len().is_none() => "text/plain",
        Err(_) => "application/octet-stream",
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::io::Write;

    const PNG_HEADER: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";
    const PDF_HEADER: &[u8] = b"%PDF-1.7\n%\xe2\xe3\xcf\xd3\n";

    fn write_file(dir: &tempfile::TempDir, name: &str, content: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        File::create(&path).unwrap().write_all(content).unwrap();
        path
    }

    #[test]
    fn test_sniff_bytes() {
        assert_eq!(sniff_bytes(PNG_HEADER), "image/png");
        assert_eq!(sniff_bytes(PDF_HEADER), "application/pdf");
        assert_eq!(sniff_bytes(b"\xff\xd8\xff\xe0\0\x10JFIF"), "image/jpeg");
        assert_eq!(sniff_bytes(b"just some notes"), "text/plain");
        assert_eq!(sniff_bytes(b"caf\xc3"), "text/plain");
        assert_eq!(sniff_bytes(b"\x00\xfe\x01\xff\x80"), "application/octet-stream");
    }

    #[test]
    fn test_accepts_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "logo.png", PNG_HEADER);
        let attachment = Attachment::from_path(&path, &AttachmentPolicy::default()).unwrap();
        assert_eq!(attachment.mime_type(), "image/png");
        assert_eq!(attachment.filename(), "logo.png");
        assert_eq!(attachment.size(), PNG_HEADER.len() as u64);
        assert_eq!(attachment.read().unwrap(), PNG_HEADER);
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.pdf");
        let err = Attachment::from_path(&path, &AttachmentPolicy::default()).unwrap_err();
        assert!(matches!(err, Error::AttachmentNotFound(p) if p == path));
    }

    #[test]
    fn test_directory_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = Attachment::from_path(dir.path(), &AttachmentPolicy::default()).unwrap_err();
        assert!(matches!(err, Error::AttachmentNotFound(_)));
    }

    #[test]
    fn test_too_large() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("huge.pdf");
        let file = File::create(&path).unwrap();
        file.set_len(11 * 1024 * 1024).unwrap();

        let err = Attachment::from_path(&path, &AttachmentPolicy::default()).unwrap_err();
        match err {
            Error::AttachmentTooLarge { size, limit, .. } => {
                assert_eq!(size, 11 * 1024 * 1024);
                assert_eq!(limit, MAX_ATTACHMENT_SIZE);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_exactly_at_limit_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "doc.pdf", PDF_HEADER);
        let policy = AttachmentPolicy {
            max_size: PDF_HEADER.len() as u64,
            ..AttachmentPolicy::default()
        };
        assert!(Attachment::from_path(&path, &policy).is_ok());
    }

    #[test]
    fn test_text_file_rejected_with_detected_type() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "notes.txt", b"remember the milk\n");
        let err = Attachment::from_path(&path, &AttachmentPolicy::default()).unwrap_err();
        match err {
            Error::AttachmentTypeNotAllowed { detected, .. } => assert_eq!(detected, "text/plain"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_extension_does_not_matter() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "disguised.pdf", b"plain words");
        assert!(matches!(
            Attachment::from_path(&path, &AttachmentPolicy::default()),
            Err(Error::AttachmentTypeNotAllowed { .. })
        ));
    }

    #[test]
    fn test_read_after_delete() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "logo.png", PNG_HEADER);
        let attachment = Attachment::from_path(&path, &AttachmentPolicy::default()).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert!(matches!(attachment.read(), Err(Error::AttachmentNotFound(_))));
    }
}
