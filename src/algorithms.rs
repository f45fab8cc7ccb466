//! Algorithm list defaults and modifier application
// (c) 2024 Ross Younger
//!
//! The `+`, `-` and `^` prefixes on algorithm-valued keys operate against
//! the default set for that key. Defaults are taken from the local OpenSSH
//! installation (`ssh -Q <key>`) when one is available, falling back to
//! baked-in tables; either way the answer is memoised process-wide.

use std::collections::BTreeMap;
use std::process::Command;
use std::sync::Mutex;

use lazy_static::lazy_static;
use tracing::{debug, trace};

use crate::errors::{Error, Result};
use crate::pattern::match_pattern;

/// The algorithm-valued keys.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub(crate) enum Family {
    Ciphers,
    Macs,
    Kex,
    HostKey,
    PubkeyAccepted,
    HostbasedAccepted,
    CaSignature,
}

impl Family {
    /// The query name understood by `ssh -Q` (OpenSSH accepts option names).
    fn query(self) -> &'static str {
        match self {
            Self::Ciphers => "ciphers",
            Self::Macs => "macs",
            Self::Kex => "kexalgorithms",
            Self::HostKey => "hostkeyalgorithms",
            Self::PubkeyAccepted => "pubkeyacceptedalgorithms",
            Self::HostbasedAccepted => "hostbasedacceptedalgorithms",
            Self::CaSignature => "casignaturealgorithms",
        }
    }

    /// Baked-in defaults, used when no ssh binary answers.
    fn baked(self) -> &'static str {
        match self {
            Self::Ciphers => {
                "chacha20-poly1305@openssh.com,aes128-ctr,aes192-ctr,aes256-ctr,\
                 aes128-gcm@openssh.com,aes256-gcm@openssh.com"
            }
            Self::Macs => {
                "umac-64-etm@openssh.com,umac-128-etm@openssh.com,\
                 hmac-sha2-256-etm@openssh.com,hmac-sha2-512-etm@openssh.com,\
                 hmac-sha1-etm@openssh.com,umac-64@openssh.com,umac-128@openssh.com,\
                 hmac-sha2-256,hmac-sha2-512,hmac-sha1"
            }
            Self::Kex => {
                "sntrup761x25519-sha512@openssh.com,curve25519-sha256,\
                 curve25519-sha256@libssh.org,ecdh-sha2-nistp256,ecdh-sha2-nistp384,\
                 ecdh-sha2-nistp521,diffie-hellman-group-exchange-sha256,\
                 diffie-hellman-group16-sha512,diffie-hellman-group18-sha512,\
                 diffie-hellman-group14-sha256"
            }
            Self::HostKey | Self::PubkeyAccepted | Self::HostbasedAccepted => {
                "ssh-ed25519-cert-v01@openssh.com,ecdsa-sha2-nistp256-cert-v01@openssh.com,\
                 ecdsa-sha2-nistp384-cert-v01@openssh.com,ecdsa-sha2-nistp521-cert-v01@openssh.com,\
                 sk-ssh-ed25519-cert-v01@openssh.com,sk-ecdsa-sha2-nistp256-cert-v01@openssh.com,\
                 rsa-sha2-512-cert-v01@openssh.com,rsa-sha2-256-cert-v01@openssh.com,\
                 ssh-ed25519,ecdsa-sha2-nistp256,ecdsa-sha2-nistp384,ecdsa-sha2-nistp521,\
                 sk-ssh-ed25519@openssh.com,sk-ecdsa-sha2-nistp256@openssh.com,\
                 rsa-sha2-512,rsa-sha2-256"
            }
            Self::CaSignature => {
                "ssh-ed25519,ecdsa-sha2-nistp256,ecdsa-sha2-nistp384,ecdsa-sha2-nistp521,\
                 sk-ssh-ed25519@openssh.com,sk-ecdsa-sha2-nistp256@openssh.com,\
                 rsa-sha2-512,rsa-sha2-256"
            }
        }
    }
}

lazy_static! {
    static ref DEFAULTS_CACHE: Mutex<BTreeMap<&'static str, Vec<String>>> =
        Mutex::new(BTreeMap::new());
}

fn query_ssh(family: Family) -> Option<Vec<String>> {
    let output = Command::new("ssh").arg("-Q").arg(family.query()).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let stdout = String::from_utf8(output.stdout).ok()?;
    let list: Vec<String> = stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(ToString::to_string)
        .collect();
    if list.is_empty() {
        None
    } else {
        Some(list)
    }
}

/// The default algorithm list for a family, memoised.
pub(crate) fn defaults(family: Family) -> Vec<String> {
    let mut cache = DEFAULTS_CACHE
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    if let Some(hit) = cache.get(family.query()) {
        return hit.clone();
    }
    let list = query_ssh(family).unwrap_or_else(|| {
        debug!("no local ssh answered -Q {}, using baked-in defaults", family.query());
        family.baked().split(',').map(ToString::to_string).collect()
    });
    trace!("defaults for {}: {} entries", family.query(), list.len());
    let _ = cache.insert(family.query(), list.clone());
    list
}

/// Splits an algorithm value and applies its modifier prefix against the
/// family's default set.
pub(crate) fn apply_modifiers(key: &str, family: Family, value: &str) -> Result<Vec<String>> {
    let (modifier, rest) = match value.chars().next() {
        Some(m @ ('+' | '-' | '^')) => (Some(m), &value[1..]),
        Some(_) => (None, value),
        None => return Err(Error::invalid(key, "empty algorithm list")),
    };
    let items: Vec<String> = rest
        .split(',')
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect();
    if items.is_empty() {
        return Err(Error::invalid(key, "empty algorithm list"));
    }

    Ok(match modifier {
        None => items,
        Some('+') => {
            let mut out = defaults(family);
            for item in items {
                if !out.contains(&item) {
                    out.push(item);
                }
            }
            out
        }
        Some('^') => {
            let mut out = Vec::new();
            for item in items {
                if !out.contains(&item) {
                    out.push(item);
                }
            }
            for d in defaults(family) {
                if !out.contains(&d) {
                    out.push(d);
                }
            }
            out
        }
        Some('-') => defaults(family)
            .into_iter()
            .filter(|d| !items.iter().any(|pat| match_pattern(pat, d)))
            .collect(),
        Some(_) => unreachable!(),
    })
}

///////////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod test {
    use super::{apply_modifiers, defaults, Family};
    use assertables::{assert_contains, assert_not_contains};

    #[test]
    fn plain_list() {
        let got = apply_modifiers("ciphers", Family::Ciphers, "aes256-ctr,aes128-ctr").unwrap();
        assert_eq!(got, vec!["aes256-ctr", "aes128-ctr"]);
    }

    #[test]
    fn removal() {
        let base = defaults(Family::Ciphers);
        let got = apply_modifiers("ciphers", Family::Ciphers, "-aes128-ctr").unwrap();
        assert!(got.len() <= base.len());
        assert_not_contains!(got, &"aes128-ctr".to_string());
        // removal accepts wildcards
        let none_aes = apply_modifiers("ciphers", Family::Ciphers, "-aes*").unwrap();
        assert!(none_aes.iter().all(|c| !c.starts_with("aes")));
    }

    #[test]
    fn append_skips_duplicates() {
        let base = defaults(Family::Macs);
        let got = apply_modifiers("macs", Family::Macs, &format!("+{},novel-mac", base[0])).unwrap();
        assert_eq!(got.len(), base.len() + 1);
        assert_eq!(got[..base.len()], base[..]);
        assert_contains!(got, &"novel-mac".to_string());
    }

    #[test]
    fn prepend_reorders() {
        let base = defaults(Family::Kex);
        let last = base.last().unwrap().clone();
        let got = apply_modifiers("kexalgorithms", Family::Kex, &format!("^{last}")).unwrap();
        assert_eq!(got[0], last);
        assert_eq!(got.len(), base.len());
    }

    #[test]
    fn empty_is_an_error() {
        assert!(apply_modifiers("ciphers", Family::Ciphers, "").is_err());
        assert!(apply_modifiers("ciphers", Family::Ciphers, "+").is_err());
    }
}
