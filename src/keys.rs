//! The directive registry: canonical names, aliases, and per-key expansion rules
// (c) 2024 Ross Younger

use std::collections::BTreeMap;

use lazy_static::lazy_static;

/// Which `%X` tokens a field's value may carry.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum TokenPolicy {
    /// No token expansion for this field
    None,
    /// `%%` and `%h` only (`Hostname`)
    HostnameOnly,
    /// `%%`, `%h`, `%n`, `%p`, `%r` (`ProxyCommand`, `ProxyJump`)
    Proxy,
    /// The common file-path token set
    Set1,
    /// Set1 plus the connection-time tokens `%f %H %I %K %t`
    KnownHostsCommand,
    /// Every defined token (`LocalCommand`)
    All,
}

/// Per-directive metadata.
#[derive(Copy, Clone, Debug)]
pub(crate) struct KeyInfo {
    /// Canonical (lowercase) keyword
    pub canonical: &'static str,
    /// Token whitelist applied during finalization
    pub tokens: TokenPolicy,
    /// Whether `$VAR` / `${VAR}` expansion applies
    pub env: bool,
    /// Whether a leading `~/` is rewritten to the home directory
    pub tilde: bool,
    /// Whether `#` is part of the value rather than a comment
    pub keep_comment: bool,
}

const fn plain(canonical: &'static str) -> KeyInfo {
    KeyInfo {
        canonical,
        tokens: TokenPolicy::None,
        env: false,
        tilde: false,
        keep_comment: false,
    }
}

const fn pathish(canonical: &'static str) -> KeyInfo {
    KeyInfo {
        canonical,
        tokens: TokenPolicy::Set1,
        env: true,
        tilde: true,
        keep_comment: false,
    }
}

/// The result of looking a keyword up in the registry.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum KeyLookup {
    /// A live directive; the canonical keyword is attached
    Known(&'static str),
    /// Accepted for compatibility but dropped
    Deprecated,
    /// A server-only or long-removed option; dropped with a warning
    Unsupported,
    /// Not in the registry at all
    Unknown,
}

lazy_static! {
    static ref REGISTRY: BTreeMap<&'static str, KeyInfo> = {
        let mut m = BTreeMap::new();
        let entries = [
            plain("host"),
            plain("match"),
            plain("include"),
            KeyInfo { tokens: TokenPolicy::HostnameOnly, ..plain("hostname") },
            plain("user"),
            plain("port"),
            plain("hostkeyalias"),
            plain("bindaddress"),
            plain("bindinterface"),
            KeyInfo { tokens: TokenPolicy::Proxy, keep_comment: true, ..plain("proxycommand") },
            KeyInfo { tokens: TokenPolicy::Proxy, ..plain("proxyjump") },
            KeyInfo { tokens: TokenPolicy::Set1, keep_comment: true, ..plain("remotecommand") },
            KeyInfo { tokens: TokenPolicy::All, keep_comment: true, ..plain("localcommand") },
            KeyInfo { env: true, ..pathish("controlpath") },
            pathish("identityagent"),
            pathish("identityfile"),
            pathish("certificatefile"),
            KeyInfo { tokens: TokenPolicy::KnownHostsCommand, keep_comment: true, tilde: false, env: true, canonical: "knownhostscommand" },
            pathish("userknownhostsfile"),
            KeyInfo { tilde: true, ..plain("globalknownhostsfile") },
            KeyInfo { tokens: TokenPolicy::Set1, tilde: true, ..plain("revokedhostkeys") },
            plain("pkcs11provider"),
            plain("securitykeyprovider"),
            KeyInfo { tilde: true, ..plain("xauthlocation") },
            plain("tag"),
            plain("tunneldevice"),
            plain("ignoreunknown"),
            plain("connectionattempts"),
            plain("numberofpasswordprompts"),
            plain("serveralivecountmax"),
            plain("canonicalizemaxdots"),
            plain("requiredrsasize"),
            plain("streamlocalbindmask"),
            plain("connecttimeout"),
            plain("forwardx11timeout"),
            plain("serveraliveinterval"),
            plain("channeltimeout"),
            plain("rekeylimit"),
            plain("controlpersist"),
            plain("obscurekeystroketiming"),
            plain("forwardagent"),
            plain("forwardx11"),
            plain("forwardx11trusted"),
            plain("passwordauthentication"),
            plain("kbdinteractiveauthentication"),
            plain("hostbasedauthentication"),
            plain("gssapiauthentication"),
            plain("gssapidelegatecredentials"),
            plain("batchmode"),
            plain("checkhostip"),
            plain("clearallforwardings"),
            plain("compression"),
            plain("enablesshkeysign"),
            plain("enableescapecommandline"),
            plain("exitonforwardfailure"),
            plain("forkafterauthentication"),
            plain("gatewayports"),
            plain("hashknownhosts"),
            plain("identitiesonly"),
            plain("nohostauthenticationforlocalhost"),
            plain("permitlocalcommand"),
            plain("proxyusefdpass"),
            plain("stdinnull"),
            plain("streamlocalbindunlink"),
            plain("tcpkeepalive"),
            plain("visualhostkey"),
            plain("canonicalizefallbacklocal"),
            plain("addressfamily"),
            plain("loglevel"),
            plain("syslogfacility"),
            plain("sessiontype"),
            plain("fingerprinthash"),
            plain("stricthostkeychecking"),
            plain("controlmaster"),
            plain("requesttty"),
            plain("tunnel"),
            plain("canonicalizehostname"),
            plain("updatehostkeys"),
            plain("verifyhostkeydns"),
            plain("pubkeyauthentication"),
            plain("addkeystoagent"),
            plain("escapechar"),
            plain("ipqos"),
            plain("canonicaldomains"),
            plain("preferredauthentications"),
            plain("kbdinteractivedevices"),
            plain("logverbose"),
            plain("canonicalizepermittedcnames"),
            plain("permitremoteopen"),
            plain("ciphers"),
            plain("macs"),
            plain("kexalgorithms"),
            plain("hostkeyalgorithms"),
            plain("pubkeyacceptedalgorithms"),
            plain("hostbasedacceptedalgorithms"),
            plain("casignaturealgorithms"),
            plain("dynamicforward"),
            KeyInfo { tokens: TokenPolicy::Set1, env: true, ..plain("localforward") },
            KeyInfo { tokens: TokenPolicy::Set1, env: true, ..plain("remoteforward") },
            plain("sendenv"),
            plain("setenv"),
        ];
        for e in entries {
            let _ = m.insert(e.canonical, e);
        }
        m
    };

    /// Historical names that map onto a live directive.
    static ref ALIASES: BTreeMap<&'static str, &'static str> = BTreeMap::from([
        ("pubkeyacceptedkeytypes", "pubkeyacceptedalgorithms"),
        ("hostbasedkeytypes", "hostbasedacceptedalgorithms"),
        ("challengeresponseauthentication", "kbdinteractiveauthentication"),
        ("skeyauthentication", "kbdinteractiveauthentication"),
        ("tisauthentication", "kbdinteractiveauthentication"),
        ("dsaauthentication", "pubkeyauthentication"),
        ("gssapidelegatecreds", "gssapidelegatecredentials"),
    ]);
}

/// Keys that went away; their directives parse and are dropped.
const DEPRECATED: &[&str] = &[
    "protocol",
    "cipher",
    "compressionlevel",
    "fallbacktorsh",
    "globalknownhostsfile2",
    "rhostsauthentication",
    "rhostsrsaauthentication",
    "rsaauthentication",
    "smartcarddevice",
    "useprivilegedport",
    "userknownhostsfile2",
    "usersh",
    "useroaming",
];

/// Server-side or never-implemented keys we refuse to pretend to honor.
const UNSUPPORTED: &[&str] = &["afstokenpassing", "kerberosauthentication", "kerberostgtpassing"];

/// Looks up a (lowercased) keyword, resolving aliases.
pub(crate) fn lookup(keyword: &str) -> KeyLookup {
    let keyword = ALIASES.get(keyword).copied().unwrap_or(keyword);
    if let Some(info) = REGISTRY.get(keyword) {
        return KeyLookup::Known(info.canonical);
    }
    if DEPRECATED.contains(&keyword) {
        return KeyLookup::Deprecated;
    }
    if UNSUPPORTED.contains(&keyword) {
        return KeyLookup::Unsupported;
    }
    KeyLookup::Unknown
}

/// Fetches the metadata for a canonical keyword.
pub(crate) fn info(canonical: &str) -> Option<&'static KeyInfo> {
    REGISTRY.get(canonical)
}

/// Whether `#` is value data for this keyword (the command-valued keys).
pub(crate) fn keeps_comment(keyword: &str) -> bool {
    let keyword = ALIASES.get(keyword).copied().unwrap_or(keyword);
    REGISTRY.get(keyword).is_some_and(|i| i.keep_comment)
}

///////////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod test {
    use super::{info, keeps_comment, lookup, KeyLookup, TokenPolicy};

    #[test]
    fn lookups() {
        assert_eq!(lookup("port"), KeyLookup::Known("port"));
        assert_eq!(
            lookup("pubkeyacceptedkeytypes"),
            KeyLookup::Known("pubkeyacceptedalgorithms")
        );
        assert_eq!(lookup("protocol"), KeyLookup::Deprecated);
        assert_eq!(lookup("kerberosauthentication"), KeyLookup::Unsupported);
        assert_eq!(lookup("frobnicate"), KeyLookup::Unknown);
    }

    #[test]
    fn comment_keys() {
        for k in ["proxycommand", "localcommand", "remotecommand", "knownhostscommand"] {
            assert!(keeps_comment(k), "{k}");
        }
        assert!(!keeps_comment("identityfile"));
        assert!(!keeps_comment("nonsense"));
    }

    #[test]
    fn token_policies() {
        assert_eq!(info("hostname").unwrap().tokens, TokenPolicy::HostnameOnly);
        assert_eq!(info("proxycommand").unwrap().tokens, TokenPolicy::Proxy);
        assert_eq!(info("identityfile").unwrap().tokens, TokenPolicy::Set1);
        assert_eq!(info("localcommand").unwrap().tokens, TokenPolicy::All);
        assert!(info("identityfile").unwrap().tilde);
        assert!(info("identityfile").unwrap().env);
        assert!(!info("port").unwrap().env);
    }
}
