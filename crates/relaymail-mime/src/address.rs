//! Email address types.

use std::fmt;

use email_address::{EmailAddress, Options};

use crate::content_type::quote;
use crate::encoding::needs_encoding;
use crate::error::{Error, Result};
use crate::header::Headers;

/// RFC 5322 `specials` that force a display name into a quoted-string.
const PHRASE_SPECIALS: &str = "()<>[]:;@\\,.\"";

/// A syntactically valid bare email address (`local@domain`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address(String);

impl Address {
    /// Creates a new address from a string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidAddress`] carrying the input if it is not a
    /// valid addr-spec. Display-name forms such as `Name <a@b.c>` are
    /// rejected; use [`Mailbox`] for those.
    pub fn new(addr: impl Into<String>) -> Result<Self> {
        let addr = addr.into();
        let options = Options::default().without_display_text();
        match EmailAddress::parse_with_options(&addr, options) {
            Ok(_) => Ok(Self(addr)),
            Err(_) => Err(Error::InvalidAddress(addr)),
        }
    }

    /// Returns the address as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the part after the last `@`.
    #[must_use]
    pub fn domain(&self) -> &str {
        self.0.rsplit_once('@').map_or("", |(_, domain)| domain)
    }

    /// Returns the part before the last `@`.
    #[must_use]
    pub fn local_part(&self) -> &str {
        self.0.rsplit_once('@').map_or(self.0.as_str(), |(local, _)| local)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Address {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<&str> for Address {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self> {
        Self::new(value)
    }
}

/// Mailbox (optional display name + address) as written in `From`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mailbox {
    /// Display name (optional).
    pub name: Option<String>,
    /// Email address.
    pub address: Address,
}

impl Mailbox {
    /// Creates a mailbox with just an address.
    #[must_use]
    pub const fn new(address: Address) -> Self {
        Self {
            name: None,
            address,
        }
    }

    /// Creates a mailbox with a display name and address.
    #[must_use]
    pub fn with_name(name: impl Into<String>, address: Address) -> Self {
        Self {
            name: Some(name.into()),
            address,
        }
    }
}

impl fmt::Display for Mailbox {
    /// Writes `phrase <address>` when a non-empty name is set, else the bare address.
    ///
    /// Non-ASCII names become encoded-words; ASCII names containing specials
    /// become quoted-strings.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name.as_deref().filter(|n| !n.is_empty()) {
            None => write!(f, "{}", self.address),
            Some(name) => {
                let phrase = if needs_encoding(name) {
                    Headers::encode_value(name)
                } else if name.contains(|c| PHRASE_SPECIALS.contains(c)) {
                    quote(name)
                } else {
                    name.to_string()
                };
                write!(f, "{phrase} <{}>", self.address)
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_address() {
        let addr = Address::new("user@example.com").unwrap();
        assert_eq!(addr.as_str(), "user@example.com");
        assert_eq!(addr.domain(), "example.com");
        assert_eq!(addr.local_part(), "user");

        assert!(Address::new("first.last+tag@sub.example.co.uk").is_ok());
    }

    #[test]
    fn test_invalid_addresses_carry_value() {
        for bad in ["", "userexample.com", "@example.com", "user@", "a@b@c.com", "Name <a@b.com>"] {
            match Address::new(bad) {
                Err(Error::InvalidAddress(value)) => assert_eq!(value, bad),
                other => panic!("expected InvalidAddress for {bad:?}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_header_injection_rejected() {
        assert!(Address::new("a@x.com\r\nBcc: victim@y.com").is_err());
    }

    #[test]
    fn test_mailbox_bare() {
        let mailbox = Mailbox::new(Address::new("a@x.com").unwrap());
        assert_eq!(mailbox.to_string(), "a@x.com");

        let mailbox = Mailbox::with_name("", Address::new("a@x.com").unwrap());
        assert_eq!(mailbox.to_string(), "a@x.com");
    }

    #[test]
    fn test_mailbox_with_name() {
        let mailbox = Mailbox::with_name("John Doe", Address::new("john@example.com").unwrap());
        assert_eq!(mailbox.to_string(), "John Doe <john@example.com>");
    }

    #[test]
    fn test_mailbox_quotes_specials() {
        let mailbox = Mailbox::with_name("Doe, John", Address::new("john@example.com").unwrap());
        assert_eq!(mailbox.to_string(), "\"Doe, John\" <john@example.com>");
    }

    #[test]
    fn test_mailbox_encodes_non_ascii() {
        let mailbox = Mailbox::with_name("Zoë", Address::new("zoe@example.com").unwrap());
        assert_eq!(mailbox.to_string(), "=?UTF-8?B?Wm/Dqw==?= <zoe@example.com>");
    }
}
