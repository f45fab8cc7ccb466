//! DNS-based hostname canonicalization
// (c) 2024 Ross Younger

use dns_lookup::AddrInfoHints;
use tracing::{debug, trace};

use crate::config::CanonicalizeHostname;
use crate::errors::{Error, Result};
use crate::pattern::match_pattern_list;
use crate::setter::Setter;

/// Resolves candidate fully-qualified names during canonicalization.
///
/// Sits behind a trait so tests and offline runs can short-circuit the
/// lookup; the system implementation blocks on `getaddrinfo` with no
/// timeout, exactly as `ssh(1)` does.
pub trait DnsResolver: Send + Sync + std::fmt::Debug {
    /// Looks up `fqdn`. `Ok(None)` when it does not resolve; otherwise the
    /// canonical name the resolver reported (the fqdn itself when there is
    /// no CNAME involved).
    fn canonical_name(&self, fqdn: &str) -> Result<Option<String>>;
}

/// The default resolver, backed by the platform's `getaddrinfo`.
#[derive(Copy, Clone, Debug, Default)]
pub struct SystemDns;

// AI_CANONNAME; the same value on every platform we build for.
const CANONNAME_FLAG: i32 = 2;

impl DnsResolver for SystemDns {
    fn canonical_name(&self, fqdn: &str) -> Result<Option<String>> {
        let hints = AddrInfoHints {
            flags: CANONNAME_FLAG,
            ..AddrInfoHints::default()
        };
        let Ok(entries) = dns_lookup::getaddrinfo(Some(fqdn), None, Some(hints)) else {
            return Ok(None);
        };
        for entry in entries.flatten() {
            return Ok(Some(entry.canonname.unwrap_or_else(|| fqdn.to_string())));
        }
        Ok(None)
    }
}

impl Setter<'_> {
    /// Rewrites the target host to a fully-qualified name, following the
    /// `Canonicalize*` directives.
    ///
    /// A no-op unless `CanonicalizeHostname` is `yes` (with no proxy in
    /// play) or `always`. On success the new name is stored in the config's
    /// `host` and [`Setter::host_changed`] reports whether it changed.
    pub fn canonicalize_hostname(&mut self) -> Result<()> {
        let mode = self
            .config
            .canonicalize_hostname
            .unwrap_or(CanonicalizeHostname::No);
        let applies = match mode {
            CanonicalizeHostname::No => false,
            CanonicalizeHostname::Yes => !self.config.uses_proxy(),
            CanonicalizeHostname::Always => true,
        };
        if !applies {
            return Ok(());
        }

        let host = self.config.host.clone().unwrap_or_default();
        if host.is_empty() || host.ends_with('.') {
            return Ok(());
        }
        let max_dots = self.config.canonicalize_max_dots.unwrap_or(1) as usize;
        if host.matches('.').count() > max_dots {
            trace!("not canonicalizing {host}: too many dots");
            return Ok(());
        }

        let domains: Vec<String> = self
            .config
            .canonical_domains
            .iter()
            .filter(|d| *d != "none")
            .cloned()
            .collect();
        for domain in &domains {
            let fqdn = format!("{host}.{}", domain.trim_end_matches('.'));
            let canonical = match self.dns.canonical_name(&fqdn)? {
                Some(name) => name,
                None => {
                    trace!("{fqdn} did not resolve");
                    continue;
                }
            };
            if canonical != fqdn && !canonical.is_empty() {
                // only follow the CNAME if a rule permits it
                for rule in &self.config.canonicalize_permitted_cnames {
                    if match_pattern_list(&rule.from, &fqdn)
                        && match_pattern_list(&rule.to, &canonical)
                    {
                        debug!("canonicalized {host} to {canonical} (CNAME of {fqdn})");
                        self.rewrite_host(canonical);
                        return Ok(());
                    }
                }
            }
            debug!("canonicalized {host} to {fqdn}");
            self.rewrite_host(fqdn);
            return Ok(());
        }

        if self.config.canonicalize_fallback_local.unwrap_or(true) {
            debug!("canonicalization of {host} found nothing, using it as-is");
            Ok(())
        } else {
            Err(Error::CanonicalizationFailed(host))
        }
    }

    fn rewrite_host(&mut self, new: String) {
        if self.config.host.as_deref() != Some(new.as_str()) {
            self.config.host = Some(new);
            self.host_changed = true;
        }
    }
}

///////////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod test {
    use super::DnsResolver;
    use crate::config::{CanonicalizeHostname, Config, PermittedCname};
    use crate::errors::Result;
    use crate::setter::Setter;
    use assertables::assert_contains;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    /// name -> canonical name; absent means NXDOMAIN
    #[derive(Debug, Default)]
    struct FakeDns(BTreeMap<String, String>);

    impl FakeDns {
        fn with(entries: &[(&str, &str)]) -> Arc<Self> {
            Arc::new(Self(
                entries
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            ))
        }
    }

    impl DnsResolver for FakeDns {
        fn canonical_name(&self, fqdn: &str) -> Result<Option<String>> {
            Ok(self.0.get(fqdn).cloned())
        }
    }

    fn canonicalizing_config(host: &str) -> Config {
        let mut c = Config::default();
        c.host = Some(host.into());
        c.canonicalize_hostname = Some(CanonicalizeHostname::Always);
        c.canonical_domains = vec!["example.com".into(), "example.net".into()];
        c
    }

    #[test]
    fn appends_first_resolving_domain() {
        let mut config = canonicalizing_config("db");
        let mut s = Setter::new(&mut config);
        s.dns = FakeDns::with(&[("db.example.net", "db.example.net")]);
        s.canonicalize_hostname().unwrap();
        assert_eq!(config.host.as_deref(), Some("db.example.net"));
    }

    #[test]
    fn host_changed_flag() {
        let mut config = canonicalizing_config("db");
        let mut s = Setter::new(&mut config);
        s.dns = FakeDns::with(&[("db.example.com", "db.example.com")]);
        assert!(!s.host_changed());
        s.canonicalize_hostname().unwrap();
        assert!(s.host_changed());
    }

    #[test]
    fn cname_followed_only_when_permitted() {
        // without a permitted rule the fqdn wins over the CNAME
        let mut config = canonicalizing_config("web");
        let mut s = Setter::new(&mut config);
        s.dns = FakeDns::with(&[("web.example.com", "real.backend.example.com")]);
        s.canonicalize_hostname().unwrap();
        assert_eq!(config.host.as_deref(), Some("web.example.com"));

        let mut config = canonicalizing_config("web");
        config.canonicalize_permitted_cnames = vec![PermittedCname {
            from: "*.example.com".into(),
            to: "*.backend.example.com".into(),
        }];
        let mut s = Setter::new(&mut config);
        s.dns = FakeDns::with(&[("web.example.com", "real.backend.example.com")]);
        s.canonicalize_hostname().unwrap();
        assert_eq!(config.host.as_deref(), Some("real.backend.example.com"));
    }

    #[test]
    fn max_dots_limits_candidates() {
        let mut config = canonicalizing_config("a.b.c");
        let mut s = Setter::new(&mut config);
        s.dns = FakeDns::with(&[("a.b.c.example.com", "a.b.c.example.com")]);
        s.canonicalize_hostname().unwrap();
        // two dots beats the default CanonicalizeMaxDots of 1
        assert_eq!(config.host.as_deref(), Some("a.b.c"));

        config.canonicalize_max_dots = Some(2);
        let mut s = Setter::new(&mut config);
        s.dns = FakeDns::with(&[("a.b.c.example.com", "a.b.c.example.com")]);
        s.canonicalize_hostname().unwrap();
        assert_eq!(config.host.as_deref(), Some("a.b.c.example.com"));
    }

    #[test]
    fn fallback_local_controls_failure() {
        let mut config = canonicalizing_config("ghost");
        let mut s = Setter::new(&mut config);
        s.dns = FakeDns::with(&[]);
        s.canonicalize_hostname().unwrap();
        assert_eq!(config.host.as_deref(), Some("ghost"));

        let mut config = canonicalizing_config("ghost");
        config.canonicalize_fallback_local = Some(false);
        let mut s = Setter::new(&mut config);
        s.dns = FakeDns::with(&[]);
        let err = s.canonicalize_hostname().unwrap_err();
        assert_contains!(err.to_string(), "canonicalization failed");
    }

    #[test]
    fn proxies_suppress_yes_but_not_always() {
        let mut config = canonicalizing_config("db");
        config.canonicalize_hostname = Some(CanonicalizeHostname::Yes);
        config.proxy_jump = Some("bastion".into());
        let mut s = Setter::new(&mut config);
        s.dns = FakeDns::with(&[("db.example.com", "db.example.com")]);
        s.canonicalize_hostname().unwrap();
        assert_eq!(config.host.as_deref(), Some("db"));

        config.canonicalize_hostname = Some(CanonicalizeHostname::Always);
        let mut s = Setter::new(&mut config);
        s.dns = FakeDns::with(&[("db.example.com", "db.example.com")]);
        s.canonicalize_hostname().unwrap();
        assert_eq!(config.host.as_deref(), Some("db.example.com"));
    }
}
