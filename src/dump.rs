//! Renders a resolved configuration back to ssh_config text
// (c) 2024 Ross Younger
//!
//! The output is parseable by this crate (and by `ssh -F`): lowercase
//! keywords, space-joined values, one forwarding per line. Handy for
//! diagnostics and for round-trip testing, much like `ssh -G`.

use std::fmt::Write as _;
use std::time::Duration;

use crate::config::{AddKeysMode, Config, Forward};

fn quote(value: &str) -> String {
    if value.is_empty()
        || value
            .chars()
            .any(|c| c == ' ' || c == '\t' || c == '"' || c == '\'')
    {
        format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        value.to_string()
    }
}

fn line(out: &mut String, key: &str, values: &[String]) {
    let _ = write!(out, "{key}");
    for v in values {
        let _ = write!(out, " {}", quote(v));
    }
    out.push('\n');
}

fn one(out: &mut String, key: &str, value: &str) {
    let _ = writeln!(out, "{key} {}", quote(value));
}

fn opt_str(out: &mut String, key: &str, value: Option<&String>) {
    if let Some(v) = value {
        one(out, key, v);
    }
}

fn opt_display<T: std::fmt::Display>(out: &mut String, key: &str, value: Option<&T>) {
    if let Some(v) = value {
        one(out, key, &v.to_string());
    }
}

fn opt_bool(out: &mut String, key: &str, value: Option<bool>) {
    if let Some(v) = value {
        one(out, key, if v { "yes" } else { "no" });
    }
}

fn opt_duration(out: &mut String, key: &str, value: Option<Duration>) {
    if let Some(v) = value {
        one(out, key, &v.as_secs().to_string());
    }
}

fn list(out: &mut String, key: &str, values: &[String]) {
    if !values.is_empty() {
        line(out, key, values);
    }
}

fn csv(out: &mut String, key: &str, values: &[String]) {
    if !values.is_empty() {
        one(out, key, &values.join(","));
    }
}

fn each(out: &mut String, key: &str, values: &[String]) {
    for v in values {
        one(out, key, v);
    }
}

fn forwards(out: &mut String, key: &str, values: &[Forward]) {
    for f in values {
        line(out, key, &[f.listen.clone(), f.target.clone()]);
    }
}

/// Emits an ssh_config-formatted rendering of a resolved [`Config`].
///
/// Only fields a source actually set appear. The target host itself is
/// omitted, since it is the resolver's input rather than a directive.
#[must_use]
#[allow(clippy::too_many_lines)]
pub fn dump(config: &Config) -> String {
    let mut out = String::new();
    let o = &mut out;
    let c = config;

    opt_str(o, "hostname", c.hostname.as_ref());
    opt_str(o, "user", c.user.as_ref());
    opt_display(o, "port", c.port.as_ref());
    opt_str(o, "hostkeyalias", c.host_key_alias.as_ref());
    opt_str(o, "bindaddress", c.bind_address.as_ref());
    opt_str(o, "bindinterface", c.bind_interface.as_ref());
    opt_str(o, "proxycommand", c.proxy_command.as_ref());
    opt_str(o, "proxyjump", c.proxy_jump.as_ref());
    opt_str(o, "remotecommand", c.remote_command.as_ref());
    opt_str(o, "localcommand", c.local_command.as_ref());
    opt_str(o, "controlpath", c.control_path.as_ref());
    opt_str(o, "identityagent", c.identity_agent.as_ref());
    opt_str(o, "pkcs11provider", c.pkcs11_provider.as_ref());
    opt_str(o, "securitykeyprovider", c.security_key_provider.as_ref());
    opt_str(o, "xauthlocation", c.xauth_location.as_ref());
    opt_str(o, "knownhostscommand", c.known_hosts_command.as_ref());
    opt_str(o, "revokedhostkeys", c.revoked_host_keys.as_ref());
    opt_str(o, "tag", c.tag.as_ref());
    opt_str(o, "tunneldevice", c.tunnel_device.as_ref());
    opt_str(o, "ignoreunknown", c.ignore_unknown.as_ref());

    opt_display(o, "connectionattempts", c.connection_attempts.as_ref());
    opt_display(o, "numberofpasswordprompts", c.number_of_password_prompts.as_ref());
    opt_display(o, "serveralivecountmax", c.server_alive_count_max.as_ref());
    opt_display(o, "canonicalizemaxdots", c.canonicalize_max_dots.as_ref());
    opt_display(o, "requiredrsasize", c.required_rsa_size.as_ref());
    if let Some(mask) = c.stream_local_bind_mask {
        one(o, "streamlocalbindmask", &format!("0{mask:o}"));
    }

    opt_duration(o, "connecttimeout", c.connect_timeout);
    opt_duration(o, "forwardx11timeout", c.forward_x11_timeout);
    opt_duration(o, "serveraliveinterval", c.server_alive_interval);
    if !c.channel_timeout.is_empty() {
        let entries: Vec<String> = c
            .channel_timeout
            .iter()
            .map(|(kind, d)| format!("{kind}={}", d.as_secs()))
            .collect();
        line(o, "channeltimeout", &entries);
    }
    if let Some(limit) = &c.rekey_limit {
        let mut vals = vec![limit.max_data.to_string()];
        if let Some(t) = limit.max_time {
            vals.push(t.as_secs().to_string());
        }
        line(o, "rekeylimit", &vals);
    }
    opt_display(o, "controlpersist", c.control_persist.as_ref());
    opt_display(o, "obscurekeystroketiming", c.obscure_keystroke_timing.as_ref());

    opt_bool(o, "forwardagent", c.forward_agent);
    opt_bool(o, "forwardx11", c.forward_x11);
    opt_bool(o, "forwardx11trusted", c.forward_x11_trusted);
    opt_bool(o, "passwordauthentication", c.password_authentication);
    opt_bool(o, "kbdinteractiveauthentication", c.kbd_interactive_authentication);
    opt_bool(o, "hostbasedauthentication", c.hostbased_authentication);
    opt_bool(o, "gssapiauthentication", c.gssapi_authentication);
    opt_bool(o, "gssapidelegatecredentials", c.gssapi_delegate_credentials);
    opt_bool(o, "batchmode", c.batch_mode);
    opt_bool(o, "checkhostip", c.check_host_ip);
    opt_bool(o, "clearallforwardings", c.clear_all_forwardings);
    opt_bool(o, "compression", c.compression);
    opt_bool(o, "enablesshkeysign", c.enable_ssh_keysign);
    opt_bool(o, "enableescapecommandline", c.enable_escape_commandline);
    opt_bool(o, "exitonforwardfailure", c.exit_on_forward_failure);
    opt_bool(o, "forkafterauthentication", c.fork_after_authentication);
    opt_bool(o, "gatewayports", c.gateway_ports);
    opt_bool(o, "hashknownhosts", c.hash_known_hosts);
    opt_bool(o, "identitiesonly", c.identities_only);
    opt_bool(o, "nohostauthenticationforlocalhost", c.no_host_authentication_for_localhost);
    opt_bool(o, "permitlocalcommand", c.permit_local_command);
    opt_bool(o, "proxyusefdpass", c.proxy_use_fdpass);
    opt_bool(o, "stdinnull", c.stdin_null);
    opt_bool(o, "streamlocalbindunlink", c.stream_local_bind_unlink);
    opt_bool(o, "tcpkeepalive", c.tcp_keep_alive);
    opt_bool(o, "visualhostkey", c.visual_host_key);
    opt_bool(o, "canonicalizefallbacklocal", c.canonicalize_fallback_local);

    opt_display(o, "addressfamily", c.address_family.as_ref());
    opt_display(o, "loglevel", c.log_level.as_ref());
    opt_display(o, "syslogfacility", c.syslog_facility.as_ref());
    opt_display(o, "sessiontype", c.session_type.as_ref());
    opt_display(o, "fingerprinthash", c.fingerprint_hash.as_ref());
    opt_display(o, "stricthostkeychecking", c.strict_host_key_checking.as_ref());
    opt_display(o, "controlmaster", c.control_master.as_ref());
    opt_display(o, "requesttty", c.request_tty.as_ref());
    opt_display(o, "tunnel", c.tunnel.as_ref());
    opt_display(o, "canonicalizehostname", c.canonicalize_hostname.as_ref());
    opt_display(o, "updatehostkeys", c.update_host_keys.as_ref());
    opt_display(o, "verifyhostkeydns", c.verify_host_key_dns.as_ref());
    opt_display(o, "pubkeyauthentication", c.pubkey_authentication.as_ref());
    if let Some(aka) = &c.add_keys_to_agent {
        let mut vals = Vec::new();
        match (aka.mode, aka.interval) {
            // a bare interval reads back as the same bare interval
            (AddKeysMode::Yes, Some(t)) => vals.push(t.as_secs().to_string()),
            (mode, None) => vals.push(mode.to_string()),
            (mode, Some(t)) => {
                vals.push(mode.to_string());
                vals.push(t.as_secs().to_string());
            }
        }
        line(o, "addkeystoagent", &vals);
    }
    opt_display(o, "escapechar", c.escape_char.as_ref());
    if let Some(qos) = &c.ip_qos {
        let mut vals = vec![qos.interactive.clone()];
        if let Some(bulk) = &qos.bulk {
            vals.push(bulk.clone());
        }
        line(o, "ipqos", &vals);
    }

    list(o, "canonicaldomains", &c.canonical_domains);
    list(o, "globalknownhostsfile", &c.global_known_hosts_file);
    list(o, "userknownhostsfile", &c.user_known_hosts_file);
    csv(o, "preferredauthentications", &c.preferred_authentications);
    csv(o, "kbdinteractivedevices", &c.kbd_interactive_devices);
    csv(o, "logverbose", &c.log_verbose);
    if !c.canonicalize_permitted_cnames.is_empty() {
        let entries: Vec<String> = c
            .canonicalize_permitted_cnames
            .iter()
            .map(ToString::to_string)
            .collect();
        line(o, "canonicalizepermittedcnames", &entries);
    }
    list(o, "permitremoteopen", &c.permit_remote_open);

    csv(o, "ciphers", &c.ciphers);
    csv(o, "macs", &c.macs);
    csv(o, "kexalgorithms", &c.kex_algorithms);
    csv(o, "hostkeyalgorithms", &c.host_key_algorithms);
    csv(o, "pubkeyacceptedalgorithms", &c.pubkey_accepted_algorithms);
    csv(o, "hostbasedacceptedalgorithms", &c.hostbased_accepted_algorithms);
    csv(o, "casignaturealgorithms", &c.ca_signature_algorithms);

    each(o, "identityfile", &c.identity_file);
    each(o, "certificatefile", &c.certificate_file);
    each(o, "dynamicforward", &c.dynamic_forward);
    forwards(o, "localforward", &c.local_forward);
    forwards(o, "remoteforward", &c.remote_forward);
    list(o, "sendenv", &c.send_env);
    if !c.set_env.is_empty() {
        let entries: Vec<String> = c.set_env.iter().map(|(k, v)| format!("{k}={v}")).collect();
        line(o, "setenv", &entries);
    }

    out
}

///////////////////////////////////////////////////////////////////////////////////////
