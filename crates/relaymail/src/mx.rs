//! MX record lookup used by strict address validation.

use std::collections::HashSet;

/// Answers whether a domain publishes at least one MX record.
///
/// Only consulted when `verify_mx` is enabled. With the `dns` feature,
/// [`crate::DnsMxResolver`] queries real DNS; [`StaticMx`] and closures
/// `Fn(&str) -> bool` suit tests and allow-lists.
pub trait MxResolver: Send + Sync {
    /// Returns `true` if `domain` has an MX record.
    fn has_mx(&self, domain: &str) -> bool;
}

impl<F> MxResolver for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn has_mx(&self, domain: &str) -> bool {
        self(domain)
    }
}

/// A fixed set of domains known to accept mail.
///
/// Lookups are ASCII case-insensitive.
#[derive(Debug, Clone, Default)]
pub struct StaticMx {
    domains: HashSet<String>,
}

impl StaticMx {
    /// Creates a resolver that knows `domains`.
    pub fn new<I, S>(domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            domains: domains
                .into_iter()
                .map(|d| d.as_ref().to_ascii_lowercase())
                .collect(),
        }
    }
}

impl MxResolver for StaticMx {
    fn has_mx(&self, domain: &str) -> bool {
        self.domains.contains(&domain.to_ascii_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_mx() {
        let mx = StaticMx::new(["example.com", "Mail.Example.org"]);
        assert!(mx.has_mx("example.com"));
        assert!(mx.has_mx("EXAMPLE.COM"));
        assert!(mx.has_mx("mail.example.org"));
        assert!(!mx.has_mx("nowhere.invalid"));
    }

    #[test]
    fn test_closure_resolver() {
        let mx = |domain: &str| domain.ends_with(".com");
        assert!(mx.has_mx("x.com"));
        assert!(!mx.has_mx("x.invalid"));
    }
}
