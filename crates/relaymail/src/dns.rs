//! MX lookups over DNS with `hickory-resolver`.
//!
//! [`DnsMxResolver`] answers [`MxResolver::has_mx`] from a small cache keyed
//! by lowercased domain. Cache lifetimes follow the record TTL, bounded by
//! [`DnsConfig`]. Negative answers (NXDOMAIN, no MX records, a null MX) are
//! cached for the minimum lifetime. Lookup failures are not cached and
//! count as "no MX", so strict validation fails closed.
//!
//! The trait is synchronous while the resolver is async. Queries run on a
//! private one-worker runtime and the caller blocks on a channel, which is
//! safe from inside another runtime as well.

use std::sync::mpsc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use hickory_resolver::{
    TokioResolver,
    config::{ResolverConfig, ResolverOpts},
    name_server::TokioConnectionProvider,
};
use serde::{Deserialize, Serialize};
use tokio::runtime::{Builder, Runtime};
use tracing::{debug, warn};

use crate::error::Result;
use crate::mx::MxResolver;

/// TTL assumed when an answer carries no records.
const DEFAULT_TTL_SECS: u32 = 300;

/// Resolver settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DnsConfig {
    /// Query timeout in seconds.
    pub timeout_secs: u64,
    /// Lower bound for cached answers, also used for negative answers.
    pub min_cache_ttl_secs: u64,
    /// Upper bound for cached answers.
    pub max_cache_ttl_secs: u64,
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 5,
            min_cache_ttl_secs: 60,
            max_cache_ttl_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct CachedAnswer {
    has_mx: bool,
    expires_at: Instant,
}

/// [`MxResolver`] backed by the system's DNS servers.
#[derive(Debug)]
pub struct DnsMxResolver {
    resolver: TokioResolver,
    runtime: Option<Runtime>,
    cache: DashMap<String, CachedAnswer>,
    config: DnsConfig,
}

impl DnsMxResolver {
    /// Creates a resolver from the system configuration (`/etc/resolv.conf`
    /// on Unix).
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Dns`] if the system configuration cannot be
    /// read, [`crate::Error::Io`] if the lookup runtime cannot start.
    pub fn new(config: DnsConfig) -> Result<Self> {
        let runtime = lookup_runtime()?;
        let resolver = {
            let _guard = runtime.enter();
            TokioResolver::builder(TokioConnectionProvider::default())?
                .with_options(options(&config))
                .build()
        };
        Ok(Self::from_parts(resolver, runtime, config))
    }

    /// Creates a resolver that queries the given name servers.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Io`] if the lookup runtime cannot start.
    pub fn with_resolver_config(resolver_config: ResolverConfig, config: DnsConfig) -> Result<Self> {
        let runtime = lookup_runtime()?;
        let resolver = {
            let _guard = runtime.enter();
            TokioResolver::builder_with_config(resolver_config, TokioConnectionProvider::default())
                .with_options(options(&config))
                .build()
        };
        Ok(Self::from_parts(resolver, runtime, config))
    }

    fn from_parts(resolver: TokioResolver, runtime: Runtime, config: DnsConfig) -> Self {
        Self {
            resolver,
            runtime: Some(runtime),
            cache: DashMap::new(),
            config,
        }
    }

    /// Settings in force.
    #[must_use]
    pub const fn config(&self) -> &DnsConfig {
        &self.config
    }

    /// Forgets every cached answer.
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    fn cached(&self, domain: &str, now: Instant) -> Option<bool> {
        self.cache
            .get(domain)
            .filter(|hit| hit.expires_at > now)
            .map(|hit| hit.has_mx)
    }

    fn remember(&self, domain: String, has_mx: bool, ttl_secs: u32) {
        let ttl = u64::from(ttl_secs).clamp(
            self.config.min_cache_ttl_secs,
            self.config.max_cache_ttl_secs.max(self.config.min_cache_ttl_secs),
        );
        self.cache.insert(
            domain,
            CachedAnswer {
                has_mx,
                expires_at: Instant::now() + Duration::from_secs(ttl),
            },
        );
    }

    /// Runs the MX query; `None` when the lookup itself failed.
    fn query(&self, domain: &str) -> Option<(bool, u32)> {
        let runtime = self.runtime.as_ref()?;
        let resolver = self.resolver.clone();
        let name = domain.to_string();
        let (tx, rx) = mpsc::sync_channel(1);
        runtime.spawn(async move {
            let answer = resolver.mx_lookup(name.as_str()).await;
            let _ = tx.send(answer);
        });

        match rx.recv().ok()? {
            Ok(lookup) => {
                let ttl = lookup
                    .as_lookup()
                    .records()
                    .iter()
                    .map(hickory_resolver::proto::rr::Record::ttl)
                    .min()
                    .unwrap_or(DEFAULT_TTL_SECS);
                // "MX 0 ." declares that the domain accepts no mail.
                let has_mx = lookup.iter().any(|mx| !mx.exchange().is_root());
                debug!(domain, has_mx, ttl, "MX lookup");
                Some((has_mx, ttl))
            }
            Err(err) if err.is_no_records_found() || err.is_nx_domain() => {
                debug!(domain, "No MX records");
                let ttl = u32::try_from(self.config.min_cache_ttl_secs).unwrap_or(u32::MAX);
                Some((false, ttl))
            }
            Err(err) => {
                warn!(domain, error = %err, "MX lookup failed");
                None
            }
        }
    }
}

impl MxResolver for DnsMxResolver {
    fn has_mx(&self, domain: &str) -> bool {
        let domain = domain.trim_end_matches('.').to_ascii_lowercase();
        if let Some(has_mx) = self.cached(&domain, Instant::now()) {
            return has_mx;
        }

        match self.query(&domain) {
            Some((has_mx, ttl)) => {
                self.remember(domain, has_mx, ttl);
                has_mx
            }
            None => false,
        }
    }
}

impl Drop for DnsMxResolver {
    fn drop(&mut self) {
        // Dropping a runtime blocks, which panics inside async code.
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

fn lookup_runtime() -> std::io::Result<Runtime> {
    Builder::new_multi_thread()
        .worker_threads(1)
        .thread_name("relaymail-dns")
        .enable_all()
        .build()
}

fn options(config: &DnsConfig) -> ResolverOpts {
    let mut opts = ResolverOpts::default();
    opts.timeout = Duration::from_secs(config.timeout_secs);
    opts.attempts = 1;
    opts
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
    use hickory_resolver::config::NameServerConfigGroup;

    fn offline() -> DnsMxResolver {
        let no_servers = ResolverConfig::from_parts(None, vec![], NameServerConfigGroup::new());
        let config = DnsConfig {
            timeout_secs: 1,
            ..DnsConfig::default()
        };
        DnsMxResolver::with_resolver_config(no_servers, config).unwrap()
    }

    #[test]
    fn test_config_defaults_from_json() {
        let config: DnsConfig = serde_json::from_str(r#"{"timeout_secs": 2}"#).unwrap();
        assert_eq!(config.timeout_secs, 2);
        assert_eq!(config.min_cache_ttl_secs, 60);
        assert_eq!(config.max_cache_ttl_secs, 3600);
    }

    #[test]
    fn test_failed_lookup_is_not_mx_and_not_cached() {
        let resolver = offline();
        assert!(!resolver.has_mx("example.com"));
        assert!(resolver.cache.is_empty());
    }

    #[test]
    fn test_cached_answers_are_used_until_expiry() {
        let resolver = offline();
        resolver.remember("cached.example".to_string(), true, 600);
        assert!(resolver.has_mx("cached.example"));
        assert!(resolver.has_mx("Cached.Example."));

        resolver.cache.insert(
            "stale.example".to_string(),
            CachedAnswer {
                has_mx: true,
                expires_at: Instant::now(),
            },
        );
        assert!(!resolver.has_mx("stale.example"));

        resolver.clear_cache();
        assert!(!resolver.has_mx("cached.example"));
    }

    #[test]
    fn test_ttl_is_bounded() {
        let resolver = offline();
        let now = Instant::now();
        resolver.remember("short.example".to_string(), true, 1);
        resolver.remember("long.example".to_string(), true, u32::MAX);

        let short = resolver.cache.get("short.example").unwrap().expires_at;
        let long = resolver.cache.get("long.example").unwrap().expires_at;
        assert!(short >= now + Duration::from_secs(60));
        assert!(long <= Instant::now() + Duration::from_secs(3600));
    }

    #[tokio::test]
    async fn test_usable_inside_async_code() {
        let resolver = offline();
        resolver.remember("cached.example".to_string(), true, 600);
        assert!(resolver.has_mx("cached.example"));
        assert!(!resolver.has_mx("example.com"));
        drop(resolver);
    }

    #[test]
    fn test_strict_mailer_validation() {
        use crate::{Error, Mailer, MailerConfig, WriterTransport};
        use std::sync::Arc;

        let resolver = offline();
        resolver.remember("x.com".to_string(), true, 600);
        resolver.remember("nullmx.example".to_string(), false, 600);
        let mailer = Mailer::new(
            MailerConfig::new().with_verify_mx(true),
            Arc::new(WriterTransport::new(Vec::new())),
        )
        .with_mx_resolver(Arc::new(resolver));

        let mut builder = mailer.compose().unwrap();
        builder.set_sender("a@x.com").unwrap();
        for rejected in ["b@nullmx.example", "b@unreachable.example"] {
            assert!(matches!(
                builder.set_recipient(rejected),
                Err(Error::Message(relaymail_mime::Error::InvalidAddress(ref a))) if a == rejected
            ));
        }
        assert!(builder.message().recipient().is_none());
    }

    #[test]
    #[ignore = "Requires network access"]
    fn test_mx_lookup_gmail() {
        let resolver = DnsMxResolver::new(DnsConfig::default()).unwrap();
        assert!(resolver.has_mx("gmail.com"));
        assert!(!resolver.has_mx("nonexistent.invalid"));
    }
}
