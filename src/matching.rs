//! `Match` block condition evaluation
// (c) 2024 Ross Younger

use std::net::IpAddr;
use std::str::FromStr;

use tracing::debug;

use crate::errors::{Error, Result};
use crate::pattern::match_pattern_list;
use crate::setter::{Phase, Setter};
use crate::tokenize::split_args;

/// Runs the command behind `Match exec`.
///
/// The resolver expands tokens over the command, shell-splits it, and hands
/// the argument vector here; exit status zero means the criterion holds.
pub trait Executor: Send + Sync + std::fmt::Debug {
    /// Runs a command to completion; `Ok(true)` iff it exited zero.
    fn run(&self, argv: &[String]) -> Result<bool>;
}

/// The default executor: spawn the process and wait.
#[derive(Copy, Clone, Debug, Default)]
pub struct SystemExecutor;

impl Executor for SystemExecutor {
    fn run(&self, argv: &[String]) -> Result<bool> {
        let Some((program, args)) = argv.split_first() else {
            return Ok(false);
        };
        let status = std::process::Command::new(program).args(args).status()?;
        Ok(status.success())
    }
}

///////////////////////////////////////////////////////////////////////////////////////

/// An address block in CIDR notation, for `Match localnetwork`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) struct Cidr {
    addr: IpAddr,
    prefix: u8,
}

impl FromStr for Cidr {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (addr, prefix) = match s.split_once('/') {
            Some((a, p)) => {
                let prefix: u8 = p.parse().map_err(|_| format!("bad prefix length in {s:?}"))?;
                (a, Some(prefix))
            }
            None => (s, None), // a bare address is a host route
        };
        let addr: IpAddr = addr.parse().map_err(|_| format!("bad address in {s:?}"))?;
        let max = match addr {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        let prefix = prefix.unwrap_or(max);
        if prefix > max {
            return Err(format!("prefix length out of range in {s:?}"));
        }
        Ok(Self { addr, prefix })
    }
}

impl Cidr {
    pub(crate) fn contains(&self, candidate: IpAddr) -> bool {
        match (self.addr, candidate) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                let mask = if self.prefix == 0 {
                    0
                } else {
                    u32::MAX << (32 - u32::from(self.prefix))
                };
                (u32::from(net) & mask) == (u32::from(ip) & mask)
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                let mask = if self.prefix == 0 {
                    0
                } else {
                    u128::MAX << (128 - u32::from(self.prefix))
                };
                (u128::from(net) & mask) == (u128::from(ip) & mask)
            }
            _ => false,
        }
    }
}

#[cfg(unix)]
fn local_addresses() -> Vec<IpAddr> {
    use nix::ifaddrs::getifaddrs;
    let Ok(addrs) = getifaddrs() else {
        return Vec::new();
    };
    let mut out = Vec::new();
    for ifa in addrs {
        let Some(address) = ifa.address else { continue };
        if let Some(sin) = address.as_sockaddr_in() {
            out.push(IpAddr::V4(sin.ip()));
        } else if let Some(sin6) = address.as_sockaddr_in6() {
            out.push(IpAddr::V6(sin6.ip()));
        }
    }
    out
}

#[cfg(not(unix))]
fn local_addresses() -> Vec<IpAddr> {
    tracing::warn!("localnetwork matching is not supported on this platform");
    Vec::new()
}

fn local_network_matches(key: &str, list: &str) -> Result<bool> {
    let mut networks = Vec::new();
    for element in list.split(',') {
        let cidr = Cidr::from_str(element.trim()).map_err(|e| Error::invalid(key, e))?;
        networks.push(cidr);
    }
    let addresses = local_addresses();
    Ok(addresses
        .iter()
        .any(|addr| networks.iter().any(|net| net.contains(*addr))))
}

///////////////////////////////////////////////////////////////////////////////////////

/// Evaluates a `Match` directive's criteria against the setter's state.
///
/// All criteria must hold (conjunction). `canonical` and `final` seen
/// outside the final pass flag that a second pass is wanted and fail the
/// block for now, unless negated.
pub(crate) fn evaluate_match(setter: &mut Setter<'_>, args: &[String]) -> Result<bool> {
    if args.is_empty() {
        return Err(Error::invalid("match", "missing criteria"));
    }
    let mut result = true;
    let mut i = 0;
    while i < args.len() {
        let raw = args[i].as_str();
        i += 1;
        let (negated, raw) = match raw.strip_prefix('!') {
            Some(rest) => (true, rest),
            None => (false, raw),
        };
        let (word, inline) = match raw.split_once('=') {
            Some((w, v)) => (w.to_ascii_lowercase(), Some(v.to_string())),
            None => (raw.to_ascii_lowercase(), None),
        };
        // criteria that take an argument find it inline or in the next token
        let mut take_value = || -> Result<String> {
            if let Some(v) = &inline {
                return Ok(v.clone());
            }
            let Some(next) = args.get(i) else {
                return Err(Error::invalid("match", format!("{word} requires an argument")));
            };
            i += 1;
            Ok(next.clone())
        };

        let criterion = match word.as_str() {
            "all" => true,
            "canonical" | "final" => {
                if setter.phase == Phase::Final {
                    true
                } else {
                    setter.want_final = true;
                    false
                }
            }
            "exec" => {
                let command = take_value()?;
                // no point running the command if the block already failed
                if result {
                    run_exec(setter, &command)?
                } else {
                    false
                }
            }
            "localnetwork" => {
                let list = take_value()?;
                local_network_matches("match localnetwork", &list)?
            }
            "host" => {
                let list = take_value()?;
                match_pattern_list(&list, setter.config.effective_hostname())
            }
            "originalhost" => {
                let list = take_value()?;
                match_pattern_list(&list, &setter.original_host)
            }
            "user" => {
                let list = take_value()?;
                let user = setter
                    .config
                    .user
                    .clone()
                    .unwrap_or_else(|| setter.local_user());
                match_pattern_list(&list, &user)
            }
            "localuser" => {
                let list = take_value()?;
                match_pattern_list(&list, &setter.local_user())
            }
            "tagged" => {
                let list = take_value()?;
                let tag = setter.config.tag.clone().unwrap_or_default();
                match_pattern_list(&list, &tag)
            }
            "address" => return Err(Error::NotImplemented("address")),
            "localaddress" => return Err(Error::NotImplemented("localaddress")),
            "localport" => return Err(Error::NotImplemented("localport")),
            "rdomain" => return Err(Error::NotImplemented("rdomain")),
            other => {
                return Err(Error::invalid("match", format!("unknown criterion {other:?}")));
            }
        };
        let criterion = if negated { !criterion } else { criterion };
        result = result && criterion;
    }
    Ok(result)
}

/// Expands and runs a `Match exec` command through the configured executor.
fn run_exec(setter: &Setter<'_>, command: &str) -> Result<bool> {
    let tv = setter.token_values();
    let expanded = crate::expand::expand_tokens(
        "match exec",
        command,
        crate::keys::TokenPolicy::Set1,
        &tv,
    )?;
    let argv = split_args(&expanded, true)
        .map_err(|e| Error::invalid("match exec", e))?;
    debug!("match exec: {argv:?}");
    setter.executor.run(&argv)
}

///////////////////////////////////////////////////////////////////////////////////////
