//! The setter: typed, precedence-aware field assignment
// (c) 2024 Ross Younger
//!
//! Every directive funnels through [`Setter::set`], which resolves the
//! keyword to a set-function, validates the value against the field's type,
//! and applies the first-write-wins rule (with the documented exceptions
//! for accumulating lists, environment sets and forwardings).

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::algorithms::{self, Family};
use crate::canonicalize::{DnsResolver, SystemDns};
use crate::config::{
    is_none_marker, AddKeysMode, AddKeysToAgent, AddressFamily, CanonicalizeHostname, Config,
    ControlMaster, ControlPersist, EscapeChar, FingerprintHash, Forward, IpQos, LogLevel,
    ObscureKeystrokeTiming, PermittedCname, PubkeyAuthentication, RekeyLimit, RequestTty,
    SessionType, StrictHostKeyChecking, SyslogFacility, TunnelMode, YesNoAsk,
};
use crate::errors::{Error, Result};
use crate::expand::{self, TokenValues};
use crate::keys::{self, KeyLookup, TokenPolicy};
use crate::matching::{Executor, SystemExecutor};
use crate::pattern::match_pattern;
use crate::values;

/// Which traversal the setter is currently serving.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum Phase {
    /// The first pass over the tree
    Regular,
    /// Visiting a directive from the built-in defaults source
    Defaults,
    /// The second pass, after canonicalization / `Match final`
    Final,
}

/// Channel types accepted by `ChannelTimeout`.
const CHANNEL_TYPES: &[&str] = &[
    "agent-connection",
    "direct-tcpip",
    "direct-streamlocal@openssh.com",
    "forwarded-tcpip",
    "forwarded-streamlocal@openssh.com",
    "session",
    "tun-connection",
    "x11-connection",
];

/// Applies tokenized directives to a [`Config`] with ssh_config semantics.
///
/// The resolver drives one of these across the tree; callers may also
/// create one directly to feed hand-built directives through the same
/// validation pipeline.
pub struct Setter<'a> {
    pub(crate) config: &'a mut Config,
    /// The target host as given by the caller, frozen at creation
    pub(crate) original_host: String,
    pub(crate) phase: Phase,
    /// A `Match canonical`/`final` block asked for a second pass
    pub(crate) want_final: bool,
    /// Canonicalization rewrote the host
    pub(crate) host_changed: bool,
    /// Home directory used for `~` and `%d`
    pub(crate) home: String,
    pub(crate) executor: Arc<dyn Executor>,
    pub(crate) dns: Arc<dyn DnsResolver>,
    /// Overrides the process environment for `$VAR` expansion when set
    pub(crate) environment: Option<BTreeMap<String, String>>,
}

impl std::fmt::Debug for Setter<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Setter")
            .field("original_host", &self.original_host)
            .field("phase", &self.phase)
            .field("want_final", &self.want_final)
            .field("host_changed", &self.host_changed)
            .finish_non_exhaustive()
    }
}

fn set_scalar<T>(slot: &mut Option<T>, value: T) {
    if slot.is_none() {
        *slot = Some(value);
    }
}

fn one<'v>(key: &str, values: &'v [String]) -> Result<&'v str> {
    match values {
        [v] => Ok(v.as_str()),
        _ => Err(Error::invalid(
            key,
            format!("expected exactly one value, found {}", values.len()),
        )),
    }
}

fn at_least_one(key: &str, values: &[String]) -> Result<()> {
    if values.is_empty() {
        return Err(Error::invalid(key, "expected at least one value"));
    }
    Ok(())
}

fn parse_enum<T: FromStr>(key: &str, value: &str) -> Result<T> {
    T::from_str(value).map_err(|_| Error::invalid(key, format!("unknown state {value:?}")))
}

impl<'a> Setter<'a> {
    /// Creates a setter over a caller-owned config, with system defaults
    /// for the executor, DNS and home directory.
    ///
    /// The original host is frozen from `config.host` as it stands now.
    #[must_use]
    pub fn new(config: &'a mut Config) -> Self {
        let original_host = config.host.clone().unwrap_or_default();
        Self {
            config,
            original_host,
            phase: Phase::Regular,
            want_final: false,
            host_changed: false,
            home: dirs::home_dir()
                .map(|p| p.to_string_lossy().to_string())
                .unwrap_or_default(),
            executor: Arc::new(SystemExecutor),
            dns: Arc::new(SystemDns),
            environment: None,
        }
    }

    /// True once canonicalization has rewritten the target host.
    #[must_use]
    pub fn host_changed(&self) -> bool {
        self.host_changed
    }

    pub(crate) fn env_value(&self, name: &str) -> Option<String> {
        match &self.environment {
            Some(map) => map.get(name).cloned(),
            None => std::env::var(name).ok(),
        }
    }

    /// The local login name, honoring any environment override.
    pub(crate) fn local_user(&self) -> String {
        for var in ["USER", "LOGNAME", "USERNAME"] {
            if let Some(v) = self.env_value(var) {
                if !v.is_empty() {
                    return v;
                }
            }
        }
        expand::local_user()
    }

    pub(crate) fn token_values(&self) -> TokenValues {
        TokenValues::capture(self.config, &self.original_host, &self.home, self.local_user())
    }

    /// Validates and applies one directive.
    ///
    /// Unknown keywords yield [`Error::UnknownKey`]; deprecated and
    /// unsupported keywords are dropped here with a log line.
    pub fn set<I, S>(&mut self, keyword: &str, values: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let values: Vec<String> = values.into_iter().map(|s| s.as_ref().to_string()).collect();
        let keyword = keyword.to_ascii_lowercase();
        match keys::lookup(&keyword) {
            KeyLookup::Deprecated => {
                debug!("dropping deprecated keyword {keyword}");
                Ok(())
            }
            KeyLookup::Unsupported => {
                warn!("dropping unsupported keyword {keyword}");
                Ok(())
            }
            KeyLookup::Unknown => Err(Error::UnknownKey(keyword)),
            KeyLookup::Known(canonical) => self.dispatch(canonical, &values),
        }
    }

    /// Clears a field back to its unset state. A testing primitive.
    pub fn reset(&mut self, keyword: &str) -> Result<()> {
        let keyword = keyword.to_ascii_lowercase();
        let KeyLookup::Known(canonical) = keys::lookup(&keyword) else {
            return Err(Error::UnknownKey(keyword));
        };
        if let Some(slot) = self.bool_slot(canonical) {
            *slot = None;
            return Ok(());
        }
        if let Some(slot) = self.string_slot(canonical) {
            *slot = None;
            return Ok(());
        }
        if let Some(slot) = self.u32_slot(canonical) {
            *slot = None;
            return Ok(());
        }
        if let Some(slot) = self.duration_slot(canonical) {
            *slot = None;
            return Ok(());
        }
        if let Some(slot) = self.string_list_slot(canonical) {
            slot.clear();
            return Ok(());
        }
        let c = &mut *self.config;
        match canonical {
            "host" => c.host = None,
            "port" => c.port = None,
            "requiredrsasize" => c.required_rsa_size = None,
            "streamlocalbindmask" => c.stream_local_bind_mask = None,
            "channeltimeout" => c.channel_timeout.clear(),
            "rekeylimit" => c.rekey_limit = None,
            "controlpersist" => c.control_persist = None,
            "obscurekeystroketiming" => c.obscure_keystroke_timing = None,
            "addressfamily" => c.address_family = None,
            "loglevel" => c.log_level = None,
            "syslogfacility" => c.syslog_facility = None,
            "sessiontype" => c.session_type = None,
            "fingerprinthash" => c.fingerprint_hash = None,
            "stricthostkeychecking" => c.strict_host_key_checking = None,
            "controlmaster" => c.control_master = None,
            "requesttty" => c.request_tty = None,
            "tunnel" => c.tunnel = None,
            "canonicalizehostname" => c.canonicalize_hostname = None,
            "updatehostkeys" => c.update_host_keys = None,
            "verifyhostkeydns" => c.verify_host_key_dns = None,
            "pubkeyauthentication" => c.pubkey_authentication = None,
            "addkeystoagent" => c.add_keys_to_agent = None,
            "escapechar" => c.escape_char = None,
            "ipqos" => c.ip_qos = None,
            "canonicalizepermittedcnames" => c.canonicalize_permitted_cnames.clear(),
            "localforward" => c.local_forward.clear(),
            "remoteforward" => c.remote_forward.clear(),
            "setenv" => c.set_env.clear(),
            _ => return Err(Error::UnknownKey(keyword)),
        }
        Ok(())
    }

    #[allow(clippy::too_many_lines)]
    fn dispatch(&mut self, key: &'static str, values: &[String]) -> Result<()> {
        // The shared shapes first: booleans, strings, integers, durations.
        if self.bool_slot(key).is_some() {
            let v = values::parse_bool(key, one(key, values)?)?;
            if let Some(slot) = self.bool_slot(key) {
                set_scalar(slot, v);
            }
            return Ok(());
        }
        if self.string_slot(key).is_some() {
            let v = one(key, values)?.to_string();
            if let Some(slot) = self.string_slot(key) {
                set_scalar(slot, v);
            }
            return Ok(());
        }
        if self.u32_slot(key).is_some() {
            let v = values::parse_u32(key, one(key, values)?)?;
            if let Some(slot) = self.u32_slot(key) {
                set_scalar(slot, v);
            }
            return Ok(());
        }
        if self.duration_slot(key).is_some() {
            let v = values::parse_duration(key, one(key, values)?)?;
            if let Some(slot) = self.duration_slot(key) {
                set_scalar(slot, v);
            }
            return Ok(());
        }

        let phase = self.phase;
        let c = &mut *self.config;
        match key {
            "host" | "match" | "include" => {
                return Err(Error::invalid(key, "structural directive not valid here"));
            }

            "port" => set_scalar(&mut c.port, values::parse_port(key, one(key, values)?)?),
            "requiredrsasize" => {
                set_scalar(&mut c.required_rsa_size, values::parse_i32(key, one(key, values)?)?);
            }
            "streamlocalbindmask" => {
                let v = one(key, values)?;
                let mask = u32::from_str_radix(v, 8)
                    .map_err(|_| Error::invalid(key, format!("not an octal mask: {v:?}")))?;
                set_scalar(&mut c.stream_local_bind_mask, mask);
            }

            // command-valued keys: the remaining arguments are the command
            "proxycommand" => {
                at_least_one(key, values)?;
                set_scalar(&mut c.proxy_command, values.join(" "));
            }
            "remotecommand" => {
                at_least_one(key, values)?;
                set_scalar(&mut c.remote_command, values.join(" "));
            }
            "localcommand" => {
                at_least_one(key, values)?;
                set_scalar(&mut c.local_command, values.join(" "));
            }
            "knownhostscommand" => {
                at_least_one(key, values)?;
                set_scalar(&mut c.known_hosts_command, values.join(" "));
            }

            // closed-set enums
            "addressfamily" => {
                set_scalar(&mut c.address_family, parse_enum::<AddressFamily>(key, one(key, values)?)?);
            }
            "loglevel" => {
                set_scalar(&mut c.log_level, parse_enum::<LogLevel>(key, one(key, values)?)?);
            }
            "syslogfacility" => {
                set_scalar(&mut c.syslog_facility, parse_enum::<SyslogFacility>(key, one(key, values)?)?);
            }
            "sessiontype" => {
                set_scalar(&mut c.session_type, parse_enum::<SessionType>(key, one(key, values)?)?);
            }
            "fingerprinthash" => {
                set_scalar(&mut c.fingerprint_hash, parse_enum::<FingerprintHash>(key, one(key, values)?)?);
            }
            "stricthostkeychecking" => {
                set_scalar(
                    &mut c.strict_host_key_checking,
                    parse_enum::<StrictHostKeyChecking>(key, one(key, values)?)?,
                );
            }
            "controlmaster" => {
                set_scalar(&mut c.control_master, parse_enum::<ControlMaster>(key, one(key, values)?)?);
            }
            "requesttty" => {
                set_scalar(&mut c.request_tty, parse_enum::<RequestTty>(key, one(key, values)?)?);
            }
            "tunnel" => {
                set_scalar(&mut c.tunnel, parse_enum::<TunnelMode>(key, one(key, values)?)?);
            }
            "canonicalizehostname" => {
                set_scalar(
                    &mut c.canonicalize_hostname,
                    parse_enum::<CanonicalizeHostname>(key, one(key, values)?)?,
                );
            }
            "updatehostkeys" => {
                set_scalar(&mut c.update_host_keys, parse_enum::<YesNoAsk>(key, one(key, values)?)?);
            }
            "verifyhostkeydns" => {
                set_scalar(&mut c.verify_host_key_dns, parse_enum::<YesNoAsk>(key, one(key, values)?)?);
            }
            "pubkeyauthentication" => {
                set_scalar(
                    &mut c.pubkey_authentication,
                    parse_enum::<PubkeyAuthentication>(key, one(key, values)?)?,
                );
            }

            "escapechar" => {
                let v = one(key, values)?;
                let parsed = EscapeChar::from_str(v).map_err(|e| Error::invalid(key, e))?;
                set_scalar(&mut c.escape_char, parsed);
            }
            "controlpersist" => {
                let v = one(key, values)?;
                let parsed = match v.to_ascii_lowercase().as_str() {
                    "no" | "false" => ControlPersist::No,
                    "yes" | "true" => ControlPersist::Yes,
                    _ => ControlPersist::Time(values::parse_duration(key, v)?),
                };
                set_scalar(&mut c.control_persist, parsed);
            }
            "obscurekeystroketiming" => {
                let v = one(key, values)?;
                let parsed = match v.to_ascii_lowercase().as_str() {
                    "yes" | "true" => ObscureKeystrokeTiming::Yes,
                    "no" | "false" => ObscureKeystrokeTiming::No,
                    other => {
                        let ms = other
                            .strip_prefix("interval:")
                            .and_then(|n| n.parse::<u32>().ok())
                            .filter(|ms| (1..=1000).contains(ms))
                            .ok_or_else(|| {
                                Error::invalid(key, format!("bad interval {v:?}"))
                            })?;
                        ObscureKeystrokeTiming::Interval(ms)
                    }
                };
                set_scalar(&mut c.obscure_keystroke_timing, parsed);
            }
            "addkeystoagent" => {
                if values.is_empty() || values.len() > 2 {
                    return Err(Error::invalid(key, "expected one or two values"));
                }
                let parsed = match AddKeysMode::from_str(&values[0]) {
                    Ok(mode) => {
                        let interval = match values.get(1) {
                            None => None,
                            Some(t) if mode == AddKeysMode::Confirm => {
                                Some(values::parse_duration(key, t)?)
                            }
                            Some(_) => {
                                return Err(Error::invalid(
                                    key,
                                    "a lifetime is only valid after confirm",
                                ))
                            }
                        };
                        AddKeysToAgent { mode, interval }
                    }
                    // a bare interval means "yes, with a lifetime"
                    Err(_) => AddKeysToAgent {
                        mode: AddKeysMode::Yes,
                        interval: Some(values::parse_duration(key, one(key, values)?)?),
                    },
                };
                set_scalar(&mut c.add_keys_to_agent, parsed);
            }
            "rekeylimit" => {
                if values.is_empty() || values.len() > 2 {
                    return Err(Error::invalid(key, "expected one or two values"));
                }
                let max_data = if values[0].eq_ignore_ascii_case("default") {
                    0
                } else {
                    values::parse_size(key, &values[0])?
                };
                let max_time = match values.get(1) {
                    None => None,
                    Some(t) => Some(values::parse_duration(key, t)?),
                };
                set_scalar(&mut c.rekey_limit, RekeyLimit { max_data, max_time });
            }
            "ipqos" => {
                if values.is_empty() || values.len() > 2 {
                    return Err(Error::invalid(key, "expected one or two values"));
                }
                let interactive = values::parse_qos_token(key, &values[0])?;
                let bulk = match values.get(1) {
                    None => None,
                    Some(v) => Some(values::parse_qos_token(key, v)?),
                };
                set_scalar(&mut c.ip_qos, IpQos { interactive, bulk });
            }
            "channeltimeout" => {
                at_least_one(key, values)?;
                if !c.channel_timeout.is_empty() {
                    return Ok(());
                }
                let mut map = BTreeMap::new();
                for v in values {
                    let Some((kind, time)) = v.split_once('=') else {
                        return Err(Error::invalid(key, format!("expected type=interval, found {v:?}")));
                    };
                    if !CHANNEL_TYPES.contains(&kind) {
                        return Err(Error::invalid(key, format!("unknown channel type {kind:?}")));
                    }
                    let _ = map.insert(kind.to_string(), values::parse_duration(key, time)?);
                }
                c.channel_timeout = map;
            }

            // plain lists: first write wins
            "canonicaldomains" => {
                at_least_one(key, values)?;
                set_string_list(&mut c.canonical_domains, values.to_vec());
            }
            "globalknownhostsfile" => {
                at_least_one(key, values)?;
                set_string_list(
                    &mut c.global_known_hosts_file,
                    values.iter().map(|v| normalise_path(v)).collect(),
                );
            }
            "userknownhostsfile" => {
                at_least_one(key, values)?;
                set_string_list(
                    &mut c.user_known_hosts_file,
                    values.iter().map(|v| normalise_path(v)).collect(),
                );
            }
            "preferredauthentications" => {
                set_string_list(&mut c.preferred_authentications, split_csv(one(key, values)?));
            }
            "kbdinteractivedevices" => {
                set_string_list(&mut c.kbd_interactive_devices, split_csv(one(key, values)?));
            }
            "logverbose" => {
                set_string_list(&mut c.log_verbose, split_csv(one(key, values)?));
            }
            "canonicalizepermittedcnames" => {
                at_least_one(key, values)?;
                if !c.canonicalize_permitted_cnames.is_empty() {
                    return Ok(());
                }
                if is_none_marker(values) {
                    c.canonicalize_permitted_cnames = vec![PermittedCname {
                        from: "none".into(),
                        to: String::new(),
                    }];
                    return Ok(());
                }
                let mut rules = Vec::new();
                for v in values {
                    if v == "none" {
                        return Err(Error::invalid(key, "none must be the only value"));
                    }
                    let Some((from, to)) = split_single_colon(v) else {
                        return Err(Error::invalid(
                            key,
                            format!("expected source:target, found {v:?}"),
                        ));
                    };
                    rules.push(PermittedCname {
                        from: from.to_string(),
                        to: to.to_string(),
                    });
                }
                c.canonicalize_permitted_cnames = rules;
            }
            "permitremoteopen" => {
                at_least_one(key, values)?;
                if !c.permit_remote_open.is_empty() {
                    return Ok(());
                }
                if is_none_marker(values) || (values.len() == 1 && values[0] == "any") {
                    c.permit_remote_open = vec![values[0].clone()];
                    return Ok(());
                }
                for v in values {
                    if v == "none" || v == "any" {
                        return Err(Error::invalid(key, format!("{v} must be the only value")));
                    }
                    if split_single_colon(v).is_none() {
                        return Err(Error::invalid(key, format!("expected host:port, found {v:?}")));
                    }
                }
                c.permit_remote_open = values.to_vec();
            }

            // algorithm lists, with modifier prefixes
            "ciphers" => set_algorithms(key, Family::Ciphers, &mut c.ciphers, values)?,
            "macs" => set_algorithms(key, Family::Macs, &mut c.macs, values)?,
            "kexalgorithms" => set_algorithms(key, Family::Kex, &mut c.kex_algorithms, values)?,
            "hostkeyalgorithms" => {
                set_algorithms(key, Family::HostKey, &mut c.host_key_algorithms, values)?;
            }
            "pubkeyacceptedalgorithms" => set_algorithms(
                key,
                Family::PubkeyAccepted,
                &mut c.pubkey_accepted_algorithms,
                values,
            )?,
            "hostbasedacceptedalgorithms" => set_algorithms(
                key,
                Family::HostbasedAccepted,
                &mut c.hostbased_accepted_algorithms,
                values,
            )?,
            "casignaturealgorithms" => set_algorithms(
                key,
                Family::CaSignature,
                &mut c.ca_signature_algorithms,
                values,
            )?,

            // accumulating lists
            "identityfile" => {
                at_least_one(key, values)?;
                append_list(
                    key,
                    phase,
                    &mut c.identity_file,
                    values.iter().map(|v| normalise_path(v)).collect(),
                )?;
            }
            "certificatefile" => {
                at_least_one(key, values)?;
                append_list(
                    key,
                    phase,
                    &mut c.certificate_file,
                    values.iter().map(|v| normalise_path(v)).collect(),
                )?;
            }
            "dynamicforward" => {
                at_least_one(key, values)?;
                append_list(key, phase, &mut c.dynamic_forward, values.to_vec())?;
            }
            "sendenv" => {
                at_least_one(key, values)?;
                if phase == Phase::Defaults && !c.send_env.is_empty() {
                    return Ok(());
                }
                for v in values {
                    if let Some(pat) = v.strip_prefix('-') {
                        c.send_env.retain(|e| !match_pattern(pat, e));
                    } else if !c.send_env.contains(v) {
                        c.send_env.push(v.clone());
                    }
                }
            }
            "setenv" => {
                at_least_one(key, values)?;
                if !c.set_env.is_empty() {
                    return Ok(());
                }
                let mut map = BTreeMap::new();
                for v in values {
                    let Some((name, value)) = v.split_once('=') else {
                        return Err(Error::invalid(key, format!("expected NAME=value, found {v:?}")));
                    };
                    let _ = map.insert(name.to_string(), value.to_string());
                }
                c.set_env = map;
            }

            // forwardings always append, even across passes
            "localforward" => c.local_forward.push(parse_forward(key, values)?),
            "remoteforward" => c.remote_forward.push(parse_forward(key, values)?),

            other => return Err(Error::UnknownKey(other.to_string())),
        }
        Ok(())
    }

    fn bool_slot(&mut self, key: &str) -> Option<&mut Option<bool>> {
        let c = &mut *self.config;
        Some(match key {
            "forwardagent" => &mut c.forward_agent,
            "forwardx11" => &mut c.forward_x11,
            "forwardx11trusted" => &mut c.forward_x11_trusted,
            "passwordauthentication" => &mut c.password_authentication,
            "kbdinteractiveauthentication" => &mut c.kbd_interactive_authentication,
            "hostbasedauthentication" => &mut c.hostbased_authentication,
            "gssapiauthentication" => &mut c.gssapi_authentication,
            "gssapidelegatecredentials" => &mut c.gssapi_delegate_credentials,
            "batchmode" => &mut c.batch_mode,
            "checkhostip" => &mut c.check_host_ip,
            "clearallforwardings" => &mut c.clear_all_forwardings,
            "compression" => &mut c.compression,
            "enablesshkeysign" => &mut c.enable_ssh_keysign,
            "enableescapecommandline" => &mut c.enable_escape_commandline,
            "exitonforwardfailure" => &mut c.exit_on_forward_failure,
            "forkafterauthentication" => &mut c.fork_after_authentication,
            "gatewayports" => &mut c.gateway_ports,
            "hashknownhosts" => &mut c.hash_known_hosts,
            "identitiesonly" => &mut c.identities_only,
            "nohostauthenticationforlocalhost" => &mut c.no_host_authentication_for_localhost,
            "permitlocalcommand" => &mut c.permit_local_command,
            "proxyusefdpass" => &mut c.proxy_use_fdpass,
            "stdinnull" => &mut c.stdin_null,
            "streamlocalbindunlink" => &mut c.stream_local_bind_unlink,
            "tcpkeepalive" => &mut c.tcp_keep_alive,
            "visualhostkey" => &mut c.visual_host_key,
            "canonicalizefallbacklocal" => &mut c.canonicalize_fallback_local,
            _ => return None,
        })
    }

    fn string_slot(&mut self, key: &str) -> Option<&mut Option<String>> {
        let c = &mut *self.config;
        Some(match key {
            "hostname" => &mut c.hostname,
            "user" => &mut c.user,
            "hostkeyalias" => &mut c.host_key_alias,
            "bindaddress" => &mut c.bind_address,
            "bindinterface" => &mut c.bind_interface,
            "proxyjump" => &mut c.proxy_jump,
            "controlpath" => &mut c.control_path,
            "identityagent" => &mut c.identity_agent,
            "pkcs11provider" => &mut c.pkcs11_provider,
            "securitykeyprovider" => &mut c.security_key_provider,
            "xauthlocation" => &mut c.xauth_location,
            "revokedhostkeys" => &mut c.revoked_host_keys,
            "tag" => &mut c.tag,
            "tunneldevice" => &mut c.tunnel_device,
            "ignoreunknown" => &mut c.ignore_unknown,
            _ => return None,
        })
    }

    fn u32_slot(&mut self, key: &str) -> Option<&mut Option<u32>> {
        let c = &mut *self.config;
        Some(match key {
            "connectionattempts" => &mut c.connection_attempts,
            "numberofpasswordprompts" => &mut c.number_of_password_prompts,
            "serveralivecountmax" => &mut c.server_alive_count_max,
            "canonicalizemaxdots" => &mut c.canonicalize_max_dots,
            _ => return None,
        })
    }

    fn duration_slot(&mut self, key: &str) -> Option<&mut Option<Duration>> {
        let c = &mut *self.config;
        Some(match key {
            "connecttimeout" => &mut c.connect_timeout,
            "forwardx11timeout" => &mut c.forward_x11_timeout,
            "serveraliveinterval" => &mut c.server_alive_interval,
            _ => return None,
        })
    }

    fn string_list_slot(&mut self, key: &str) -> Option<&mut Vec<String>> {
        let c = &mut *self.config;
        Some(match key {
            "canonicaldomains" => &mut c.canonical_domains,
            "globalknownhostsfile" => &mut c.global_known_hosts_file,
            "userknownhostsfile" => &mut c.user_known_hosts_file,
            "preferredauthentications" => &mut c.preferred_authentications,
            "kbdinteractivedevices" => &mut c.kbd_interactive_devices,
            "logverbose" => &mut c.log_verbose,
            "permitremoteopen" => &mut c.permit_remote_open,
            "ciphers" => &mut c.ciphers,
            "macs" => &mut c.macs,
            "kexalgorithms" => &mut c.kex_algorithms,
            "hostkeyalgorithms" => &mut c.host_key_algorithms,
            "pubkeyacceptedalgorithms" => &mut c.pubkey_accepted_algorithms,
            "hostbasedacceptedalgorithms" => &mut c.hostbased_accepted_algorithms,
            "casignaturealgorithms" => &mut c.ca_signature_algorithms,
            "identityfile" => &mut c.identity_file,
            "certificatefile" => &mut c.certificate_file,
            "dynamicforward" => &mut c.dynamic_forward,
            "sendenv" => &mut c.send_env,
            _ => return None,
        })
    }
}

fn set_string_list(slot: &mut Vec<String>, items: Vec<String>) {
    if slot.is_empty() {
        *slot = items;
    }
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}

/// Splits on `:` only when the value contains exactly one.
fn split_single_colon(value: &str) -> Option<(&str, &str)> {
    if value.matches(':').count() != 1 {
        return None;
    }
    value.split_once(':')
}

fn set_algorithms(
    key: &str,
    family: Family,
    slot: &mut Vec<String>,
    values: &[String],
) -> Result<()> {
    let value = one(key, values)?;
    if !slot.is_empty() {
        return Ok(());
    }
    *slot = algorithms::apply_modifiers(key, family, value)?;
    Ok(())
}

/// The accumulating-list rule: append in source order; during the defaults
/// phase a non-empty list is left alone; `none` as the sole value erases the
/// list and sticks. Appends deduplicate, which keeps the final pass (a
/// second traversal of the same tree) from doubling every entry.
fn append_list(key: &str, phase: Phase, slot: &mut Vec<String>, items: Vec<String>) -> Result<()> {
    if phase == Phase::Defaults && !slot.is_empty() {
        return Ok(());
    }
    if is_none_marker(slot) {
        return Ok(());
    }
    if is_none_marker(&items) {
        *slot = vec!["none".into()];
        return Ok(());
    }
    if items.iter().any(|v| v == "none") {
        return Err(Error::invalid(key, "none must be the only value"));
    }
    for item in items {
        if !slot.contains(&item) {
            slot.push(item);
        }
    }
    Ok(())
}

fn parse_forward(key: &str, values: &[String]) -> Result<Forward> {
    match values {
        [listen, target] => Ok(Forward {
            listen: listen.clone(),
            target: target.clone(),
        }),
        _ => Err(Error::invalid(
            key,
            format!("expected listen and target, found {} values", values.len()),
        )),
    }
}

/// Light path normalisation: strip redundant `.` segments and expand the
/// `__PROGRAMDATA__` placeholder on Windows hosts.
fn normalise_path(value: &str) -> String {
    let mut out = expand_programdata(value).replace("/./", "/");
    while let Some(stripped) = out.strip_prefix("./") {
        out = stripped.to_string();
    }
    out
}

#[cfg(windows)]
fn expand_programdata(value: &str) -> String {
    value.replace(
        "__PROGRAMDATA__",
        &std::env::var("ProgramData").unwrap_or_else(|_| "C:/ProgramData".into()),
    )
}

#[cfg(not(windows))]
fn expand_programdata(value: &str) -> String {
    value.to_string()
}

///////////////////////////////////////////////////////////////////////////////////////
// Finalization

impl Setter<'_> {
    /// Expands a single string-valued field in place, honoring its token,
    /// environment, and tilde policies.
    pub fn expand_string(&mut self, keyword: &str) -> Result<()> {
        let keyword = keyword.to_ascii_lowercase();
        let KeyLookup::Known(canonical) = keys::lookup(&keyword) else {
            return Err(Error::UnknownKey(keyword));
        };
        let info = keys::info(canonical).ok_or_else(|| Error::UnknownKey(keyword.clone()))?;
        let (tokens, env, tilde) = (info.tokens, info.env, info.tilde);
        let mut tv = self.token_values();
        if canonical == "hostname" {
            // %h inside Hostname refers to the target host, not to itself
            tv.host = self.config.host.clone().unwrap_or_default();
        }
        let environment = self.environment.clone();
        let home = self.home.clone();
        let Some(slot) = self.string_slot(canonical) else {
            return Err(Error::invalid(canonical, "not a string-valued field"));
        };
        if let Some(current) = slot.take() {
            *slot = Some(expand_value(
                canonical,
                &current,
                tokens,
                env,
                tilde,
                &tv,
                environment.as_ref(),
                &home,
            )?);
        }
        Ok(())
    }

    /// Expands every element of a list-valued field in place.
    pub fn expand_slice(&mut self, keyword: &str) -> Result<()> {
        let keyword = keyword.to_ascii_lowercase();
        let KeyLookup::Known(canonical) = keys::lookup(&keyword) else {
            return Err(Error::UnknownKey(keyword));
        };
        let info = keys::info(canonical).ok_or_else(|| Error::UnknownKey(keyword.clone()))?;
        let (tokens, env, tilde) = (info.tokens, info.env, info.tilde);
        let tv = self.token_values();
        let environment = self.environment.clone();
        let home = self.home.clone();
        let Some(slot) = self.string_list_slot(canonical) else {
            return Err(Error::invalid(canonical, "not a list-valued field"));
        };
        if is_none_marker(slot) {
            return Ok(());
        }
        let current = std::mem::take(slot);
        let mut expanded = Vec::with_capacity(current.len());
        for element in &current {
            expanded.push(expand_value(
                canonical,
                element,
                tokens,
                env,
                tilde,
                &tv,
                environment.as_ref(),
                &home,
            )?);
        }
        if let Some(slot) = self.string_list_slot(canonical) {
            *slot = expanded;
        }
        Ok(())
    }

    /// The final sanitisation pass: expand tokens, environment references
    /// and tildes everywhere they are permitted, then collapse explicit
    /// `none` markers to empty values.
    pub fn finalize(&mut self) -> Result<()> {
        // hostname first: later expansions read the result through %h
        self.expand_string("hostname")?;

        for key in [
            "proxycommand",
            "proxyjump",
            "remotecommand",
            "localcommand",
            "controlpath",
            "identityagent",
            "knownhostscommand",
            "revokedhostkeys",
            "xauthlocation",
        ] {
            self.expand_string(key)?;
        }
        for key in [
            "identityfile",
            "certificatefile",
            "userknownhostsfile",
            "globalknownhostsfile",
        ] {
            self.expand_slice(key)?;
        }

        // forward endpoints may name Unix sockets, which take tokens and env
        let tv = self.token_values();
        let environment = self.environment.clone();
        let expand_one = |key: &str, v: &str| -> Result<String> {
            let with_tokens = expand::expand_tokens(key, v, TokenPolicy::Set1, &tv)?;
            expand::expand_env(key, &with_tokens, |name| match environment.as_ref() {
                Some(map) => map.get(name).cloned(),
                None => std::env::var(name).ok(),
            })
        };
        let mut locals = std::mem::take(&mut self.config.local_forward);
        for fwd in &mut locals {
            fwd.listen = expand_one("localforward", &fwd.listen)?;
            fwd.target = expand_one("localforward", &fwd.target)?;
        }
        self.config.local_forward = locals;
        let mut remotes = std::mem::take(&mut self.config.remote_forward);
        for fwd in &mut remotes {
            fwd.listen = expand_one("remoteforward", &fwd.listen)?;
            fwd.target = expand_one("remoteforward", &fwd.target)?;
        }
        self.config.remote_forward = remotes;

        // explicit "none" collapses to empty
        for field in [
            "canonicaldomains",
            "globalknownhostsfile",
            "userknownhostsfile",
            "preferredauthentications",
            "kbdinteractivedevices",
            "logverbose",
            "identityfile",
            "certificatefile",
            "dynamicforward",
            "sendenv",
            "permitremoteopen",
        ] {
            if let Some(slot) = self.string_list_slot(field) {
                if is_none_marker(slot) {
                    slot.clear();
                }
            }
        }
        if self
            .config
            .canonicalize_permitted_cnames
            .first()
            .is_some_and(|r| r.from == "none" && r.to.is_empty())
        {
            self.config.canonicalize_permitted_cnames.clear();
        }
        Ok(())
    }
}

#[allow(clippy::too_many_arguments)]
fn expand_value(
    key: &str,
    value: &str,
    tokens: TokenPolicy,
    env: bool,
    tilde: bool,
    tv: &TokenValues,
    environment: Option<&BTreeMap<String, String>>,
    home: &str,
) -> Result<String> {
    let mut out = if tilde {
        expand::expand_tilde(value, home)
    } else {
        value.to_string()
    };
    if tokens != TokenPolicy::None {
        out = expand::expand_tokens(key, &out, tokens, tv)?;
    }
    if env {
        out = expand::expand_env(key, &out, |name| match environment {
            Some(map) => map.get(name).cloned(),
            None => std::env::var(name).ok(),
        })?;
    }
    Ok(out)
}

///////////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod test {
    use super::{Phase, Setter};
    use crate::config::{AddKeysMode, Config, ControlPersist, EscapeChar, StrictHostKeyChecking};
    use assertables::assert_contains;
    use std::time::Duration;

    fn setter(config: &mut Config) -> Setter<'_> {
        let mut s = Setter::new(config);
        s.home = "/home/test".into();
        s.environment = Some(
            [("USER".to_string(), "tester".to_string())]
                .into_iter()
                .collect(),
        );
        s
    }

    #[test]
    fn first_write_wins() {
        let mut config = Config::default();
        let mut s = setter(&mut config);
        s.set("Port", ["2222"]).unwrap();
        s.set("Port", ["22"]).unwrap();
        s.set("User", ["alice"]).unwrap();
        s.set("user", ["bob"]).unwrap();
        assert_eq!(config.port, Some(2222));
        assert_eq!(config.user.as_deref(), Some("alice"));
    }

    #[test]
    fn accumulating_lists_append() {
        let mut config = Config::default();
        let mut s = setter(&mut config);
        s.set("IdentityFile", ["~/.ssh/one"]).unwrap();
        s.set("IdentityFile", ["~/.ssh/two"]).unwrap();
        assert_eq!(config.identity_file, vec!["~/.ssh/one", "~/.ssh/two"]);
    }

    #[test]
    fn none_is_sticky() {
        let mut config = Config::default();
        let mut s = setter(&mut config);
        s.set("IdentityFile", ["none"]).unwrap();
        s.set("IdentityFile", ["~/.ssh/late"]).unwrap();
        assert_eq!(s.config.identity_file, vec!["none"]);
        let err = s.set("CertificateFile", ["none", "extra"]).unwrap_err();
        assert_contains!(err.to_string(), "only value");
    }

    #[test]
    fn defaults_phase_never_overwrites() {
        let mut config = Config::default();
        let mut s = setter(&mut config);
        s.set("IdentityFile", ["~/.ssh/mine"]).unwrap();
        s.phase = Phase::Defaults;
        s.set("IdentityFile", ["~/.ssh/default"]).unwrap();
        s.set("Port", ["22"]).unwrap();
        s.phase = Phase::Regular;
        assert_eq!(config.identity_file, vec!["~/.ssh/mine"]);
        assert_eq!(config.port, Some(22)); // scalars: nothing had set it yet
    }

    #[test]
    fn enum_states() {
        let mut config = Config::default();
        let mut s = setter(&mut config);
        s.set("StrictHostKeyChecking", ["accept-new"]).unwrap();
        s.set("EscapeChar", ["^X"]).unwrap();
        s.set("ControlPersist", ["30m"]).unwrap();
        s.set("AddKeysToAgent", ["confirm", "1h"]).unwrap();
        assert_eq!(
            config.strict_host_key_checking,
            Some(StrictHostKeyChecking::AcceptNew)
        );
        assert_eq!(config.escape_char, Some(EscapeChar::Ctrl('X')));
        assert_eq!(
            config.control_persist,
            Some(ControlPersist::Time(Duration::from_secs(1800)))
        );
        let aka = config.add_keys_to_agent.unwrap();
        assert_eq!(aka.mode, AddKeysMode::Confirm);
        assert_eq!(aka.interval, Some(Duration::from_secs(3600)));
    }

    #[test]
    fn bare_interval_means_yes() {
        let mut config = Config::default();
        let mut s = setter(&mut config);
        s.set("AddKeysToAgent", ["300"]).unwrap();
        let aka = config.add_keys_to_agent.unwrap();
        assert_eq!(aka.mode, AddKeysMode::Yes);
        assert_eq!(aka.interval, Some(Duration::from_secs(300)));
    }

    #[test]
    fn setenv_and_sendenv() {
        let mut config = Config::default();
        let mut s = setter(&mut config);
        s.set("SetEnv", ["FOO=bar", "BAZ=qux"]).unwrap();
        // first block won; later calls are ignored
        s.set("SetEnv", ["FOO=changed"]).unwrap();
        assert_eq!(config.set_env.get("FOO").unwrap(), "bar");
        assert_eq!(config.set_env.len(), 2);

        let mut config = Config::default();
        let mut s = setter(&mut config);
        s.set("SendEnv", ["LANG", "LC_*"]).unwrap();
        s.set("SendEnv", ["-LC_*"]).unwrap();
        assert_eq!(config.send_env, vec!["LANG"]);
    }

    #[test]
    fn forwards_always_append() {
        let mut config = Config::default();
        let mut s = setter(&mut config);
        s.set("LocalForward", ["8080", "localhost:80"]).unwrap();
        s.set("LocalForward", ["8443", "localhost:443"]).unwrap();
        assert_eq!(s.config.local_forward.len(), 2);
        let err = s.set("LocalForward", ["8080"]).unwrap_err();
        assert_contains!(err.to_string(), "listen and target");
    }

    #[test]
    fn channel_timeouts() {
        let mut config = Config::default();
        let mut s = setter(&mut config);
        s.set("ChannelTimeout", ["session=30m", "direct-tcpip=10"]).unwrap();
        assert_eq!(
            config.channel_timeout.get("session"),
            Some(&Duration::from_secs(1800))
        );
        assert_eq!(
            config.channel_timeout.get("direct-tcpip"),
            Some(&Duration::from_secs(10))
        );
        let mut config = Config::default();
        let mut s = setter(&mut config);
        let err = s.set("ChannelTimeout", ["bogus=30"]).unwrap_err();
        assert_contains!(err.to_string(), "channel type");
    }

    #[test]
    fn unknown_and_deprecated() {
        let mut config = Config::default();
        let mut s = setter(&mut config);
        assert!(s.set("NoSuchThing", ["x"]).is_err());
        // deprecated keys are silently dropped
        s.set("Protocol", ["2"]).unwrap();
        s.set("Cipher", ["blowfish"]).unwrap();
        assert!(config.ciphers.is_empty());
    }

    #[test]
    fn reset_clears() {
        let mut config = Config::default();
        let mut s = setter(&mut config);
        s.set("Port", ["2222"]).unwrap();
        s.set("IdentityFile", ["~/.ssh/id"]).unwrap();
        s.reset("port").unwrap();
        s.reset("identityfile").unwrap();
        assert_eq!(config.port, None);
        assert!(config.identity_file.is_empty());
    }

    #[test]
    fn finalize_expands_and_collapses() {
        let mut config = Config::default();
        config.host = Some("server".into());
        let mut s = setter(&mut config);
        s.set("Hostname", ["%h.example.com"]).unwrap();
        s.set("IdentityFile", ["~/.ssh/id_%r"]).unwrap();
        s.set("User", ["admin"]).unwrap();
        s.set("PreferredAuthentications", ["none"]).unwrap();
        s.finalize().unwrap();
        assert_eq!(config.hostname.as_deref(), Some("server.example.com"));
        assert_eq!(config.identity_file, vec!["/home/test/.ssh/id_admin"]);
        assert!(config.preferred_authentications.is_empty());
    }

    #[test]
    fn finalize_rejects_disallowed_tokens() {
        let mut config = Config::default();
        config.host = Some("server".into());
        let mut s = setter(&mut config);
        s.set("Hostname", ["%p.example.com"]).unwrap();
        let err = s.finalize().unwrap_err();
        assert_contains!(err.to_string(), "%p");
    }
}
