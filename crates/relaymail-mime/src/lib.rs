//! # relaymail-mime
//!
//! MIME composition for transactional email.
//!
//! ## Features
//!
//! - **Validated fields**: addresses are checked against the RFC 5322
//!   addr-spec grammar when set; attachments are checked for existence,
//!   size and sniffed content type when added
//! - **Multipart rendering**: `multipart/alternative` for text + HTML,
//!   wrapped in `multipart/mixed` when attachments are present
//! - **Encoding**: Quoted-Printable bodies, Base64 attachments wrapped at
//!   76 columns, RFC 2047 encoded-words for non-ASCII header text
//! - **Parsing**: a multipart parser to read rendered messages back
//!
//! ## Quick Start
//!
//! ```ignore
//! use relaymail_mime::OutboundMessage;
//!
//! let mut message = OutboundMessage::new();
//! message
//!     .set_sender("sender@example.com")?
//!     .set_recipient("recipient@example.com")?
//!     .set_subject("Test Message")
//!     .set_text_body("Hello, World!")
//!     .set_html_body("<p>Hello, World!</p>");
//!
//! let rendered = message.render()?;
//! println!("{rendered}");
//! ```
//!
//! ### Attachments
//!
//! ```ignore
//! message.add_attachment("invoice.pdf")?;
//! let rendered = message.render()?; // multipart/mixed
//! ```
//!
//! ### Reading a message back
//!
//! ```ignore
//! use relaymail_mime::Message;
//!
//! let parsed = Message::parse(&rendered.to_string())?;
//! assert_eq!(parsed.text_part()?, "Hello, World!");
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod address;
mod attachment;
mod boundary;
mod content_type;
mod error;
mod header;
mod message;
mod outbound;

pub mod encoding;
pub mod html;

pub use address::{Address, Mailbox};
pub use attachment::{
    Attachment, AttachmentPolicy, DEFAULT_ALLOWED_TYPES, MAX_ATTACHMENT_SIZE, sniff_mime_type,
};
pub use boundary::{BoundarySource, RandomBoundary};
pub use content_type::ContentType;
pub use error::{Error, Result};
pub use header::{Headers, MAX_HEADER_LINE_LENGTH};
pub use html::html_to_text;
pub use message::{Message, Part, TransferEncoding};
pub use outbound::{Field, OutboundMessage, RenderedMessage};
