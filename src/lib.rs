//! Resolves effective OpenSSH client configuration, the way `ssh(1)` does.
// (c) 2024 Ross Younger
//!
//! Given a target host alias, this crate reads the user configuration
//! (`~/.ssh/config`), the system-wide configuration (`/etc/ssh/ssh_config`),
//! anything they `Include`, and the stock client defaults, and computes the
//! complete set of connection parameters the OpenSSH client would use:
//!
//! ```no_run
//! let config = sshcfg::resolve("my-server", sshcfg::Options::new())?;
//! println!("connecting to {}:{}",
//!     config.effective_hostname(), config.effective_port());
//! # Ok::<(), sshcfg::Error>(())
//! ```
//!
//! ## What is implemented
//!
//! * `Host` and `Match` blocks, including `canonical`/`final` two-pass
//!   evaluation, `exec`, `localnetwork`, `tagged`, and negation.
//! * `Include` with globbing, `~` expansion, lexical ordering and
//!   circular-include detection.
//! * The per-key value types: first-write-wins scalars, accumulating lists
//!   with the sticky `none` marker, algorithm lists with `+`/`-`/`^`
//!   modifiers applied against the local OpenSSH defaults, durations,
//!   octal masks, forwardings, environment sets.
//! * DNS-based hostname canonicalization (`CanonicalizeHostname` and
//!   friends), behind a [`DnsResolver`] trait so it can be stubbed.
//! * `%X` token, `${VAR}` environment and `~` expansion with the per-key
//!   whitelists from `ssh_config(5)`.
//!
//! Criteria that need a live connection (`Match address`, `localaddress`,
//! `localport`, `rdomain`) are reported as [`Error::NotImplemented`], and
//! tokens whose value only exists once connected (such as `%K`) pass
//! through unexpanded.
//!
//! ## Reuse
//!
//! A [`Parser`] parses the sources once and can resolve any number of
//! aliases; [`resolve`] is the one-shot convenience. A [`Setter`] over a
//! [`Config`] is the lower-level entry point, accepting individual
//! directives through the same validation pipeline.

mod algorithms;
mod canonicalize;
mod config;
mod defaults;
mod dump;
mod errors;
mod expand;
mod includes;
mod keys;
mod matching;
mod pattern;
mod resolver;
mod setter;
mod tokenize;
mod tree;
mod values;

pub use canonicalize::{DnsResolver, SystemDns};
pub use config::{
    AddKeysMode, AddKeysToAgent, AddressFamily, CanonicalizeHostname, Config, ControlMaster,
    ControlPersist, EscapeChar, FingerprintHash, Forward, IpQos, LogLevel,
    ObscureKeystrokeTiming, PermittedCname, PubkeyAuthentication, RekeyLimit, RequestTty,
    SessionType, StrictHostKeyChecking, SyslogFacility, TunnelMode, YesNoAsk,
};
pub use dump::dump;
pub use errors::{Error, Result};
pub use matching::{Executor, SystemExecutor};
pub use resolver::{resolve, Options, Parser};
pub use setter::Setter;
