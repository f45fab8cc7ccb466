//! `%X` token, environment variable, and tilde expansion
// (c) 2024 Ross Younger

use sha1::{Digest, Sha1};

use crate::config::Config;
use crate::errors::{Error, Result};
use crate::keys::TokenPolicy;

/// Everything the `%X` tokens can resolve to, captured from the setter at
/// finalization time.
#[derive(Debug, Clone)]
pub(crate) struct TokenValues {
    /// `%u`: local user name
    pub local_user: String,
    /// `%d`: local user's home directory
    pub home: String,
    /// `%h`: remote host name (`Hostname` if set, else the target)
    pub host: String,
    /// `%p`: port, defaulted to 22
    pub port: String,
    /// `%n`: the original target host, frozen at apply time
    pub original_host: String,
    /// `%r`: remote user (falls back to the local user)
    pub remote_user: String,
    /// `%k`/`%H`: host key alias, else hostname, else host
    pub host_key_ref: String,
    /// `%j`: the jump host, or empty
    pub jump: String,
    /// `%L`/`%l`: the short local host name
    pub local_host: String,
    /// `%i`: the local numeric uid
    pub uid: String,
}

impl TokenValues {
    /// Captures the token table for a resolved (or partially resolved) config.
    pub(crate) fn capture(
        config: &Config,
        original_host: &str,
        home: &str,
        local_user: String,
    ) -> Self {
        Self {
            local_user: local_user.clone(),
            home: home.to_string(),
            host: config.effective_hostname().to_string(),
            port: config.effective_port().to_string(),
            original_host: original_host.to_string(),
            remote_user: config.user.clone().unwrap_or(local_user),
            host_key_ref: config
                .host_key_alias
                .clone()
                .unwrap_or_else(|| config.effective_hostname().to_string()),
            jump: config.proxy_jump.clone().unwrap_or_default(),
            local_host: local_hostname(),
            uid: local_uid(),
        }
    }

    /// `%C`: SHA-1 over the concatenation `%l%h%p%r%j`, lowercase hex.
    fn connection_hash(&self) -> String {
        let mut hasher = Sha1::new();
        hasher.update(self.local_host.as_bytes());
        hasher.update(self.host.as_bytes());
        hasher.update(self.port.as_bytes());
        hasher.update(self.remote_user.as_bytes());
        hasher.update(self.jump.as_bytes());
        hasher
            .finalize()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect()
    }
}

/// The local login name, from the environment.
pub(crate) fn local_user() -> String {
    for var in ["USER", "LOGNAME", "USERNAME"] {
        if let Ok(u) = std::env::var(var) {
            if !u.is_empty() {
                return u;
            }
        }
    }
    "unknown".into()
}

/// The short local host name (up to the first dot).
pub(crate) fn local_hostname() -> String {
    let name = gethostname::gethostname().to_string_lossy().to_string();
    name.split('.').next().unwrap_or(&name).to_string()
}

#[cfg(unix)]
fn local_uid() -> String {
    nix::unistd::getuid().as_raw().to_string()
}

#[cfg(not(unix))]
fn local_uid() -> String {
    String::new()
}

/// Tokens that are only known once connected; they survive expansion
/// verbatim where the whitelist admits them.
const CONNECTION_TIME: &[char] = &['f', 'I', 'K', 't', 'T'];

fn allowed(policy: TokenPolicy, token: char) -> bool {
    match policy {
        TokenPolicy::None => false,
        TokenPolicy::HostnameOnly => matches!(token, '%' | 'h'),
        TokenPolicy::Proxy => matches!(token, '%' | 'h' | 'n' | 'p' | 'r'),
        TokenPolicy::Set1 => matches!(
            token,
            '%' | 'C' | 'd' | 'h' | 'i' | 'j' | 'k' | 'L' | 'l' | 'n' | 'p' | 'r' | 'u'
        ),
        TokenPolicy::KnownHostsCommand => {
            allowed(TokenPolicy::Set1, token) || matches!(token, 'H' | 'f' | 'I' | 'K' | 't')
        }
        TokenPolicy::All => {
            allowed(TokenPolicy::KnownHostsCommand, token) || matches!(token, 'T')
        }
    }
}

/// Replaces every `%X` occurrence permitted by `policy`.
///
/// A token outside the whitelist is an error; a whitelisted token whose
/// value only exists once connected passes through unchanged.
pub(crate) fn expand_tokens(
    key: &str,
    input: &str,
    policy: TokenPolicy,
    values: &TokenValues,
) -> Result<String> {
    if !input.contains('%') {
        return Ok(input.to_string());
    }
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars();
    while let Some(ch) = chars.next() {
        if ch != '%' {
            out.push(ch);
            continue;
        }
        let Some(token) = chars.next() else {
            return Err(Error::expand(key, "trailing % in value"));
        };
        if !allowed(policy, token) {
            return Err(Error::expand(key, format!("token %{token} not permitted here")));
        }
        if CONNECTION_TIME.contains(&token) {
            out.push('%');
            out.push(token);
            continue;
        }
        match token {
            '%' => out.push('%'),
            'u' => out.push_str(&values.local_user),
            'd' => out.push_str(&values.home),
            'h' => out.push_str(&values.host),
            'p' => out.push_str(&values.port),
            'n' => out.push_str(&values.original_host),
            'r' => out.push_str(&values.remote_user),
            'H' | 'k' => out.push_str(&values.host_key_ref),
            'j' => out.push_str(&values.jump),
            'L' | 'l' => out.push_str(&values.local_host),
            'i' => out.push_str(&values.uid),
            'C' => out.push_str(&values.connection_hash()),
            _ => return Err(Error::expand(key, format!("token %{token} not implemented"))),
        }
    }
    Ok(out)
}

fn is_ident(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Substitutes `${NAME}` and `$NAME` environment references.
///
/// An unset variable is an error, as it is for `ssh(1)`.
pub(crate) fn expand_env<F>(key: &str, input: &str, lookup: F) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    if !input.contains('$') {
        return Ok(input.to_string());
    }
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len());
    let mut i = 0;
    while i < chars.len() {
        if chars[i] != '$' {
            out.push(chars[i]);
            i += 1;
            continue;
        }
        if chars.get(i + 1) == Some(&'{') {
            let Some(close) = (i + 2..chars.len()).find(|&j| chars[j] == '}') else {
                return Err(Error::expand(key, "unclosed ${ in value"));
            };
            let name: String = chars[i + 2..close].iter().collect();
            let value = lookup(&name)
                .ok_or_else(|| Error::expand(key, format!("environment variable {name} not set")))?;
            out.push_str(&value);
            i = close + 1;
            continue;
        }
        // shell style: $NAME, stopping at the first non-identifier character
        let mut j = i + 1;
        while j < chars.len() && is_ident(chars[j]) {
            j += 1;
        }
        if j == i + 1 {
            out.push('$'); // a lone $ is literal
            i += 1;
            continue;
        }
        let name: String = chars[i + 1..j].iter().collect();
        let value = lookup(&name)
            .ok_or_else(|| Error::expand(key, format!("environment variable {name} not set")))?;
        out.push_str(&value);
        i = j;
    }
    Ok(out)
}

/// Rewrites a leading `~/` (or a bare `~`) to the given home directory.
///
/// If the home directory is Windows-styled, separators in the result are
/// normalised to `/`.
pub(crate) fn expand_tilde(input: &str, home: &str) -> String {
    let expanded = if input == "~" {
        home.to_string()
    } else if let Some(rest) = input.strip_prefix("~/") {
        format!("{}/{rest}", home.trim_end_matches(['/', '\\']))
    } else {
        return input.to_string();
    };
    if home.contains('\\') {
        expanded.replace('\\', "/")
    } else {
        expanded
    }
}

///////////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod test {
    use super::{expand_env, expand_tilde, expand_tokens, TokenValues};
    use crate::keys::TokenPolicy;
    use assertables::assert_contains;

    fn values() -> TokenValues {
        TokenValues {
            local_user: "fred".into(),
            home: "/home/fred".into(),
            host: "server.example.com".into(),
            port: "2222".into(),
            original_host: "server".into(),
            remote_user: "admin".into(),
            host_key_ref: "server.example.com".into(),
            jump: String::new(),
            local_host: "workstation".into(),
            uid: "1000".into(),
        }
    }

    #[test]
    fn token_substitution() {
        let v = values();
        assert_eq!(
            expand_tokens("identityfile", "%d/.ssh/%r@%h:%p", TokenPolicy::Set1, &v).unwrap(),
            "/home/fred/.ssh/admin@server.example.com:2222"
        );
        assert_eq!(
            expand_tokens("hostname", "%h.internal", TokenPolicy::HostnameOnly, &v).unwrap(),
            "server.example.com.internal"
        );
        assert_eq!(
            expand_tokens("proxycommand", "nc %h %p %% %n", TokenPolicy::Proxy, &v).unwrap(),
            "nc server.example.com 2222 % server"
        );
    }

    #[test]
    fn whitelists_enforced() {
        let v = values();
        // %p is fine for proxies but not for Hostname
        assert!(expand_tokens("hostname", "%p", TokenPolicy::HostnameOnly, &v).is_err());
        // %C is not in the proxy set
        assert!(expand_tokens("proxycommand", "%C", TokenPolicy::Proxy, &v).is_err());
        let err = expand_tokens("controlpath", "%Z", TokenPolicy::Set1, &v).unwrap_err();
        assert_contains!(err.to_string(), "%Z");
        assert!(expand_tokens("controlpath", "50%", TokenPolicy::Set1, &v).is_err());
    }

    #[test]
    fn connection_hash_is_hex() {
        let v = values();
        let c = expand_tokens("controlpath", "%C", TokenPolicy::Set1, &v).unwrap();
        assert_eq!(c.len(), 40);
        assert!(c.chars().all(|ch| ch.is_ascii_hexdigit()));
        // stable for stable inputs
        let c2 = expand_tokens("controlpath", "%C", TokenPolicy::Set1, &v).unwrap();
        assert_eq!(c, c2);
    }

    #[test]
    fn connection_time_tokens_pass_through() {
        let v = values();
        assert_eq!(
            expand_tokens(
                "knownhostscommand",
                "helper %H %K %t",
                TokenPolicy::KnownHostsCommand,
                &v
            )
            .unwrap(),
            "helper server.example.com %K %t"
        );
    }

    #[test]
    fn environment() {
        let lookup = |name: &str| match name {
            "HOME" => Some("/home/fred".to_string()),
            "EMPTY" => Some(String::new()),
            _ => None,
        };
        assert_eq!(
            expand_env("k", "${HOME}/.ssh", lookup).unwrap(),
            "/home/fred/.ssh"
        );
        assert_eq!(expand_env("k", "$HOME/.ssh", lookup).unwrap(), "/home/fred/.ssh");
        assert_eq!(expand_env("k", "x$EMPTY!", lookup).unwrap(), "x!");
        assert_eq!(expand_env("k", "just $ alone", lookup).unwrap(), "just $ alone");
        assert!(expand_env("k", "${MISSING}", lookup).is_err());
        assert!(expand_env("k", "${UNCLOSED", lookup).is_err());
    }

    #[test]
    fn tilde() {
        assert_eq!(expand_tilde("~/keys", "/home/fred"), "/home/fred/keys");
        assert_eq!(expand_tilde("~", "/home/fred"), "/home/fred");
        assert_eq!(expand_tilde("/abs/path", "/home/fred"), "/abs/path");
        assert_eq!(expand_tilde("not~this", "/home/fred"), "not~this");
        assert_eq!(
            expand_tilde(r"~/keys\sub", r"C:\Users\fred"),
            "C:/Users/fred/keys/sub"
        );
    }
}
