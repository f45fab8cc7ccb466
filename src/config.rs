//! The resolved configuration record and its field types
// (c) 2024 Ross Younger

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Which IP protocol family to use
#[derive(Copy, Clone, Debug, Eq, PartialEq, strum::Display, strum::EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum AddressFamily {
    /// Either family, whichever resolves
    Any,
    /// IPv4 only
    Inet,
    /// IPv6 only
    Inet6,
}

/// Client logging verbosity
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, strum::Display, strum::EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
#[serde(rename_all = "UPPERCASE")]
#[allow(missing_docs)]
pub enum LogLevel {
    Quiet,
    Fatal,
    Error,
    Info,
    Verbose,
    Debug,
    Debug1,
    Debug2,
    Debug3,
}

/// Syslog facility for logging
#[derive(Copy, Clone, Debug, Eq, PartialEq, strum::Display, strum::EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
#[serde(rename_all = "UPPERCASE")]
#[allow(missing_docs)]
pub enum SyslogFacility {
    Daemon,
    User,
    Auth,
    Local0,
    Local1,
    Local2,
    Local3,
    Local4,
    Local5,
    Local6,
    Local7,
}

/// What kind of session to request
#[derive(Copy, Clone, Debug, Eq, PartialEq, strum::Display, strum::EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum SessionType {
    /// No remote command (like `ssh -N`)
    None,
    /// Invoke a subsystem
    Subsystem,
    /// A shell or the configured command
    Default,
}

/// Hash algorithm used when displaying key fingerprints
#[derive(Copy, Clone, Debug, Eq, PartialEq, strum::Display, strum::EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
#[allow(missing_docs)]
pub enum FingerprintHash {
    Md5,
    Sha256,
}

/// `StrictHostKeyChecking` states
#[derive(Copy, Clone, Debug, Eq, PartialEq, strum::Display, strum::EnumString, Serialize, Deserialize)]
#[strum(ascii_case_insensitive)]
#[serde(rename_all = "kebab-case")]
pub enum StrictHostKeyChecking {
    /// Always require a known host key
    #[strum(to_string = "yes", serialize = "true")]
    Yes,
    /// Add new keys without asking
    #[strum(to_string = "no", serialize = "false", serialize = "off")]
    No,
    /// Prompt before adding new keys
    #[strum(to_string = "ask")]
    Ask,
    /// Accept keys for new hosts, refuse changed keys
    #[strum(to_string = "accept-new")]
    AcceptNew,
}

/// `ControlMaster` states
#[derive(Copy, Clone, Debug, Eq, PartialEq, strum::Display, strum::EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum ControlMaster {
    /// This session is a master
    #[strum(to_string = "yes", serialize = "true")]
    Yes,
    /// This session is a client
    #[strum(to_string = "no", serialize = "false")]
    No,
    /// Master, but confirm slave connections
    Ask,
    /// Reuse a master if present, else become one
    Auto,
    /// `auto` plus confirmation
    AutoAsk,
}

/// Whether to allocate a TTY
#[derive(Copy, Clone, Debug, Eq, PartialEq, strum::Display, strum::EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
#[allow(missing_docs)]
pub enum RequestTty {
    No,
    Yes,
    Force,
    Auto,
}

/// `Tunnel` device forwarding modes
#[derive(Copy, Clone, Debug, Eq, PartialEq, strum::Display, strum::EnumString, Serialize, Deserialize)]
#[strum(ascii_case_insensitive)]
#[serde(rename_all = "kebab-case")]
pub enum TunnelMode {
    /// No tunnel device
    #[strum(to_string = "no", serialize = "false")]
    No,
    /// Layer 3 (same as point-to-point)
    #[strum(to_string = "yes", serialize = "true")]
    Yes,
    /// Layer 3 tun device
    #[strum(to_string = "point-to-point")]
    PointToPoint,
    /// Layer 2 tap device
    #[strum(to_string = "ethernet")]
    Ethernet,
}

/// `CanonicalizeHostname` states
#[derive(Copy, Clone, Debug, Eq, PartialEq, strum::Display, strum::EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum CanonicalizeHostname {
    /// Never canonicalize
    #[strum(to_string = "no", serialize = "false")]
    No,
    /// Canonicalize unless a proxy is in use
    #[strum(to_string = "yes", serialize = "true")]
    Yes,
    /// Canonicalize even through a proxy
    Always,
}

/// Three-state yes/no/ask used by several keys
#[derive(Copy, Clone, Debug, Eq, PartialEq, strum::Display, strum::EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
#[allow(missing_docs)]
pub enum YesNoAsk {
    #[strum(to_string = "yes", serialize = "true")]
    Yes,
    #[strum(to_string = "no", serialize = "false")]
    No,
    Ask,
}

/// `PubkeyAuthentication` states
#[derive(Copy, Clone, Debug, Eq, PartialEq, strum::Display, strum::EnumString, Serialize, Deserialize)]
#[strum(ascii_case_insensitive)]
#[serde(rename_all = "kebab-case")]
pub enum PubkeyAuthentication {
    /// Disabled
    #[strum(to_string = "no", serialize = "false")]
    No,
    /// Enabled
    #[strum(to_string = "yes", serialize = "true")]
    Yes,
    /// Enabled, signatures not bound to the session
    #[strum(to_string = "unbound")]
    Unbound,
    /// Enabled, host-bound signature variant
    #[strum(to_string = "host-bound")]
    HostBound,
}

/// `AddKeysToAgent` modes (the optional lifetime rides alongside)
#[derive(Copy, Clone, Debug, Eq, PartialEq, strum::Display, strum::EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
#[allow(missing_docs)]
pub enum AddKeysMode {
    No,
    Yes,
    Ask,
    Confirm,
}

/// The parsed `AddKeysToAgent` value
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct AddKeysToAgent {
    /// Basic mode
    pub mode: AddKeysMode,
    /// Key lifetime, for `confirm <interval>` or a bare interval
    pub interval: Option<Duration>,
}

/// `ControlPersist`: no, yes (indefinite), or an idle timeout
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlPersist {
    /// Master closes with the last client
    No,
    /// Master persists indefinitely
    Yes,
    /// Master persists for this long after the last client exits
    Time(Duration),
}

impl fmt::Display for ControlPersist {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::No => write!(f, "no"),
            Self::Yes => write!(f, "yes"),
            Self::Time(d) => write!(f, "{}", d.as_secs()),
        }
    }
}

/// `ObscureKeystrokeTiming`: on, off, or an explicit interval in milliseconds
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObscureKeystrokeTiming {
    /// Obscure with the default interval
    Yes,
    /// Do not obscure
    No,
    /// Obscure with a given interval (ms, 1-1000)
    Interval(u32),
}

impl fmt::Display for ObscureKeystrokeTiming {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Yes => write!(f, "yes"),
            Self::No => write!(f, "no"),
            Self::Interval(ms) => write!(f, "interval:{ms}"),
        }
    }
}

/// The session escape character
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EscapeChar {
    /// Escape processing disabled
    None,
    /// A literal character
    Char(char),
    /// A control character, written `^X`
    Ctrl(char),
}

impl fmt::Display for EscapeChar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Char(c) => write!(f, "{c}"),
            Self::Ctrl(c) => write!(f, "^{c}"),
        }
    }
}

impl FromStr for EscapeChar {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("none") {
            return Ok(Self::None);
        }
        let mut chars = s.chars();
        match (chars.next(), chars.next(), chars.next()) {
            (Some(c), None, _) => Ok(Self::Char(c)),
            (Some('^'), Some(c), None) if c.is_ascii_alphabetic() || c == '@' || c == '[' => {
                Ok(Self::Ctrl(c.to_ascii_uppercase()))
            }
            _ => Err(format!("bad escape character {s:?}")),
        }
    }
}

/// One port forwarding: a listen spec and a target spec
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Forward {
    /// Where to listen (`[bind:]port` or a Unix socket path)
    pub listen: String,
    /// Where to connect (`host:port` or a Unix socket path)
    pub target: String,
}

/// A `CanonicalizePermittedCNAMEs` rule: source patterns and target patterns
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct PermittedCname {
    /// Pattern-list the looked-up fqdn must match
    pub from: String,
    /// Pattern-list the CNAME target must match
    pub to: String,
}

impl fmt::Display for PermittedCname {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.from, self.to)
    }
}

/// `RekeyLimit`: a data volume plus an optional time limit
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct RekeyLimit {
    /// Rekey after this many bytes
    pub max_data: u64,
    /// Rekey after this much time, if set
    pub max_time: Option<Duration>,
}

/// `IPQoS`: a class for interactive traffic and optionally one for bulk
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct IpQos {
    /// QoS for interactive sessions
    pub interactive: String,
    /// QoS for non-interactive sessions; defaults to the interactive class
    pub bulk: Option<String>,
}

///////////////////////////////////////////////////////////////////////////////////////

/// The effective connection parameters for one target host.
///
/// Every scalar is optional: `None` means no source set it. List fields are
/// empty until a source appends to them; a list holding exactly `"none"`
/// means "explicitly disabled" and is collapsed to empty by finalization.
///
/// Values are exactly as resolved: first write wins for scalars, the
/// accumulating fields (identities, certificates, forwards, environment)
/// grow in source order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[allow(clippy::struct_excessive_bools)]
pub struct Config {
    /// The target host, as given by the caller; canonicalization may rewrite it
    pub host: Option<String>,
    /// The real host name to connect to (`Hostname` directive)
    pub hostname: Option<String>,
    /// Remote user name
    pub user: Option<String>,
    /// Port to connect to (signed, as `ssh(1)` stores it; always 1-65535)
    pub port: Option<i32>,

    /// Alias used for host key lookup instead of the real name
    pub host_key_alias: Option<String>,
    /// Local address to bind outgoing connections to
    pub bind_address: Option<String>,
    /// Local interface whose address to bind to
    pub bind_interface: Option<String>,
    /// Command used to connect to the server
    pub proxy_command: Option<String>,
    /// Jump host specification (`-J`)
    pub proxy_jump: Option<String>,
    /// Command to execute on the remote host instead of a shell
    pub remote_command: Option<String>,
    /// Command to execute locally after connecting
    pub local_command: Option<String>,
    /// Path to the control socket for connection sharing
    pub control_path: Option<String>,
    /// Socket of the agent used for authentication
    pub identity_agent: Option<String>,
    /// PKCS#11 shared library
    pub pkcs11_provider: Option<String>,
    /// FIDO authenticator middleware library
    pub security_key_provider: Option<String>,
    /// Location of the xauth program
    pub xauth_location: Option<String>,
    /// Command producing known_hosts lines on demand
    pub known_hosts_command: Option<String>,
    /// File of revoked host keys
    pub revoked_host_keys: Option<String>,
    /// Configuration tag, tested by `Match tagged`
    pub tag: Option<String>,
    /// tun/tap device specification (`any`, or `local[:remote]`)
    pub tunnel_device: Option<String>,
    /// Pattern-list of unknown keys to tolerate in strict mode
    pub ignore_unknown: Option<String>,

    /// Number of attempts before giving up
    pub connection_attempts: Option<u32>,
    /// Password prompt budget
    pub number_of_password_prompts: Option<u32>,
    /// Allowed missed keepalives before disconnecting
    pub server_alive_count_max: Option<u32>,
    /// Dots permitted in a hostname before canonicalization is skipped
    pub canonicalize_max_dots: Option<u32>,
    /// Minimum acceptable RSA key size (signed, like the port)
    pub required_rsa_size: Option<i32>,
    /// umask for Unix-domain forwarding sockets (octal)
    pub stream_local_bind_mask: Option<u32>,

    /// Timeout for connection establishment
    pub connect_timeout: Option<Duration>,
    /// Lifetime of untrusted X11 forwardings
    pub forward_x11_timeout: Option<Duration>,
    /// Keepalive interval; zero disables
    pub server_alive_interval: Option<Duration>,
    /// Inactivity timeouts per channel type
    pub channel_timeout: BTreeMap<String, Duration>,
    /// Rekeying thresholds
    pub rekey_limit: Option<RekeyLimit>,
    /// Connection-sharing master persistence
    pub control_persist: Option<ControlPersist>,
    /// Keystroke timing obfuscation
    pub obscure_keystroke_timing: Option<ObscureKeystrokeTiming>,

    /// Forward the authentication agent
    pub forward_agent: Option<bool>,
    /// Forward X11 connections
    pub forward_x11: Option<bool>,
    /// Trusted X11 forwarding
    pub forward_x11_trusted: Option<bool>,
    /// Allow password authentication
    pub password_authentication: Option<bool>,
    /// Allow keyboard-interactive authentication
    pub kbd_interactive_authentication: Option<bool>,
    /// Allow host-based authentication
    pub hostbased_authentication: Option<bool>,
    /// Allow GSSAPI authentication
    pub gssapi_authentication: Option<bool>,
    /// Forward GSSAPI credentials
    pub gssapi_delegate_credentials: Option<bool>,
    /// Never prompt; fail instead
    pub batch_mode: Option<bool>,
    /// Also check the host IP in known_hosts
    pub check_host_ip: Option<bool>,
    /// Drop all forwardings from the configuration
    pub clear_all_forwardings: Option<bool>,
    /// Compress the connection
    pub compression: Option<bool>,
    /// Permit ssh-keysign for host-based authentication
    pub enable_ssh_keysign: Option<bool>,
    /// Permit the `~C` escape command line
    pub enable_escape_commandline: Option<bool>,
    /// Fail outright when a requested forwarding cannot be set up
    pub exit_on_forward_failure: Option<bool>,
    /// Background after authentication
    pub fork_after_authentication: Option<bool>,
    /// Let remote hosts connect to forwarded ports
    pub gateway_ports: Option<bool>,
    /// Hash host names written to known_hosts
    pub hash_known_hosts: Option<bool>,
    /// Use only the configured identities
    pub identities_only: Option<bool>,
    /// Skip host key checks for localhost
    pub no_host_authentication_for_localhost: Option<bool>,
    /// Allow `LocalCommand`
    pub permit_local_command: Option<bool>,
    /// Pass a connected descriptor back from `ProxyCommand`
    pub proxy_use_fdpass: Option<bool>,
    /// Redirect stdin from /dev/null
    pub stdin_null: Option<bool>,
    /// Unlink stale Unix-domain forwarding sockets
    pub stream_local_bind_unlink: Option<bool>,
    /// TCP keepalives
    pub tcp_keep_alive: Option<bool>,
    /// ASCII-art host key on login
    pub visual_host_key: Option<bool>,
    /// Use the unqualified name if canonicalization fails
    pub canonicalize_fallback_local: Option<bool>,

    /// IP protocol family
    pub address_family: Option<AddressFamily>,
    /// Logging verbosity
    pub log_level: Option<LogLevel>,
    /// Syslog facility
    pub syslog_facility: Option<SyslogFacility>,
    /// Kind of remote session to request
    pub session_type: Option<SessionType>,
    /// Fingerprint display hash
    pub fingerprint_hash: Option<FingerprintHash>,
    /// Host key checking policy
    pub strict_host_key_checking: Option<StrictHostKeyChecking>,
    /// Connection sharing mode
    pub control_master: Option<ControlMaster>,
    /// TTY allocation policy
    pub request_tty: Option<RequestTty>,
    /// tun/tap forwarding mode
    pub tunnel: Option<TunnelMode>,
    /// Hostname canonicalization policy
    pub canonicalize_hostname: Option<CanonicalizeHostname>,
    /// Fetch updated host keys from the server
    pub update_host_keys: Option<YesNoAsk>,
    /// Trust SSHFP DNS records
    pub verify_host_key_dns: Option<YesNoAsk>,
    /// Public key authentication policy
    pub pubkey_authentication: Option<PubkeyAuthentication>,
    /// Add used keys to the agent
    pub add_keys_to_agent: Option<AddKeysToAgent>,
    /// Session escape character
    pub escape_char: Option<EscapeChar>,
    /// QoS classes for interactive and bulk traffic
    pub ip_qos: Option<IpQos>,

    /// Domain suffixes to try when canonicalizing
    pub canonical_domains: Vec<String>,
    /// System-wide known_hosts files
    pub global_known_hosts_file: Vec<String>,
    /// Per-user known_hosts files
    pub user_known_hosts_file: Vec<String>,
    /// Authentication methods, in preference order
    pub preferred_authentications: Vec<String>,
    /// Keyboard-interactive device list
    pub kbd_interactive_devices: Vec<String>,
    /// Extra debug detail selectors
    pub log_verbose: Vec<String>,
    /// CNAMEs canonicalization may follow
    pub canonicalize_permitted_cnames: Vec<PermittedCname>,
    /// `host:port` destinations a remote forward may request
    pub permit_remote_open: Vec<String>,

    /// Cipher preference list
    pub ciphers: Vec<String>,
    /// MAC preference list
    pub macs: Vec<String>,
    /// Key exchange preference list
    pub kex_algorithms: Vec<String>,
    /// Host key algorithm preference list
    pub host_key_algorithms: Vec<String>,
    /// Signature algorithms accepted for public key authentication
    pub pubkey_accepted_algorithms: Vec<String>,
    /// Signature algorithms accepted for host-based authentication
    pub hostbased_accepted_algorithms: Vec<String>,
    /// Signature algorithms accepted for CA keys
    pub ca_signature_algorithms: Vec<String>,

    /// Private key files, tried in order
    pub identity_file: Vec<String>,
    /// Certificate files paired with identities
    pub certificate_file: Vec<String>,
    /// SOCKS forwarding listen specs
    pub dynamic_forward: Vec<String>,
    /// Local-to-remote forwardings
    pub local_forward: Vec<Forward>,
    /// Remote-to-local forwardings
    pub remote_forward: Vec<Forward>,
    /// Environment variable patterns to send
    pub send_env: Vec<String>,
    /// Environment variables to set on the remote
    pub set_env: BTreeMap<String, String>,
}

impl Config {
    /// The host name to use when matching and expanding: the `Hostname`
    /// directive if one applied, else the target host.
    #[must_use]
    pub fn effective_hostname(&self) -> &str {
        self.hostname
            .as_deref()
            .or(self.host.as_deref())
            .unwrap_or_default()
    }

    /// The port, defaulting to 22.
    #[must_use]
    pub fn effective_port(&self) -> i32 {
        self.port.unwrap_or(22)
    }

    /// True if either proxy mechanism is configured.
    #[must_use]
    pub fn uses_proxy(&self) -> bool {
        self.proxy_command.is_some() || self.proxy_jump.is_some()
    }
}

/// True when a list field holds the single sticky marker value `none`.
pub(crate) fn is_none_marker<S: AsRef<str>>(list: &[S]) -> bool {
    list.len() == 1 && list[0].as_ref() == "none"
}

///////////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod test {
    use super::{
        is_none_marker, ControlMaster, EscapeChar, LogLevel, StrictHostKeyChecking, TunnelMode,
    };
    use std::str::FromStr;

    #[test]
    fn enum_round_trips() {
        assert_eq!(
            StrictHostKeyChecking::from_str("accept-new").unwrap(),
            StrictHostKeyChecking::AcceptNew
        );
        assert_eq!(
            StrictHostKeyChecking::from_str("off").unwrap(),
            StrictHostKeyChecking::No
        );
        assert_eq!(StrictHostKeyChecking::No.to_string(), "no");
        assert_eq!(ControlMaster::from_str("autoask").unwrap(), ControlMaster::AutoAsk);
        assert_eq!(ControlMaster::AutoAsk.to_string(), "autoask");
        assert_eq!(LogLevel::from_str("info").unwrap(), LogLevel::Info);
        assert_eq!(LogLevel::Debug2.to_string(), "DEBUG2");
        assert_eq!(
            TunnelMode::from_str("point-to-point").unwrap(),
            TunnelMode::PointToPoint
        );
        assert!(LogLevel::from_str("chatty").is_err());
    }

    #[test]
    fn escape_chars() {
        assert_eq!(EscapeChar::from_str("none").unwrap(), EscapeChar::None);
        assert_eq!(EscapeChar::from_str("~").unwrap(), EscapeChar::Char('~'));
        assert_eq!(EscapeChar::from_str("^x").unwrap(), EscapeChar::Ctrl('X'));
        assert!(EscapeChar::from_str("^!").is_err());
        assert!(EscapeChar::from_str("ab").is_err());
        assert_eq!(EscapeChar::Ctrl('C').to_string(), "^C");
    }

    #[test]
    fn none_marker() {
        assert!(is_none_marker(&["none"]));
        assert!(!is_none_marker(&["none", "x"]));
        assert!(!is_none_marker::<&str>(&[]));
    }
}
