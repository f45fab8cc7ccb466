//! The pass controller: drives the tree against a target host
// (c) 2024 Ross Younger

use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, trace};

use crate::canonicalize::{DnsResolver, SystemDns};
use crate::config::Config;
use crate::defaults::DEFAULT_CONFIG;
use crate::errors::Result;
use crate::matching::{self, Executor, SystemExecutor};
use crate::pattern::match_patterns;
use crate::setter::{Phase, Setter};
use crate::tree::{Source, Tree, TreeBuilder, TreeCursor, DEFAULTS_PATH};

/// Where the user configuration lives by default.
fn default_user_config_path() -> Option<PathBuf> {
    let mut p = dirs::home_dir()?;
    p.push(".ssh");
    p.push("config");
    Some(p)
}

/// Where the global configuration lives by default.
#[cfg(not(windows))]
fn default_global_config_path() -> Option<PathBuf> {
    Some(PathBuf::from("/etc/ssh/ssh_config"))
}

#[cfg(windows)]
fn default_global_config_path() -> Option<PathBuf> {
    let base = std::env::var("ProgramData").ok()?;
    Some(PathBuf::from(base).join("ssh").join("ssh_config"))
}

/// Resolution options, builder style.
#[derive(Debug, Clone)]
pub struct Options {
    pub(crate) strict: bool,
    pub(crate) no_finalize: bool,
    pub(crate) user_config_path: Option<PathBuf>,
    pub(crate) global_config_path: Option<PathBuf>,
    /// Replaces both file sources when set
    pub(crate) source: Option<String>,
    /// Replaces the user file source when set
    pub(crate) user_source: Option<String>,
    /// Replaces the global file source when set
    pub(crate) global_source: Option<String>,
    pub(crate) executor: Arc<dyn Executor>,
    pub(crate) dns: Arc<dyn DnsResolver>,
    pub(crate) user_home: Option<String>,
    pub(crate) environment: Option<BTreeMap<String, String>>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            strict: false,
            no_finalize: false,
            user_config_path: None,
            global_config_path: None,
            source: None,
            user_source: None,
            global_source: None,
            executor: Arc::new(SystemExecutor),
            dns: Arc::new(SystemDns),
            user_home: None,
            environment: None,
        }
    }
}

impl Options {
    /// Fresh options with every default.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Unknown keys become errors unless matched by `IgnoreUnknown`.
    #[must_use]
    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }

    /// Skip the token/environment/tilde expansion pass at the end of apply.
    #[must_use]
    pub fn no_finalize(mut self) -> Self {
        self.no_finalize = true;
        self
    }

    /// Override `~/.ssh/config`.
    #[must_use]
    pub fn user_config_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.user_config_path = Some(path.into());
        self
    }

    /// Override the system-wide configuration file path.
    #[must_use]
    pub fn global_config_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.global_config_path = Some(path.into());
        self
    }

    /// Use a single in-memory configuration instead of the two files.
    #[must_use]
    pub fn config_str<S: Into<String>>(mut self, text: S) -> Self {
        self.source = Some(text.into());
        self
    }

    /// Use a single reader instead of the two files.
    pub fn config_reader<R: Read>(self, mut reader: R) -> Result<Self> {
        let mut text = String::new();
        let _ = reader.read_to_string(&mut text)?;
        Ok(self.config_str(text))
    }

    /// Replace the user configuration file with in-memory content.
    #[must_use]
    pub fn user_config_str<S: Into<String>>(mut self, text: S) -> Self {
        self.user_source = Some(text.into());
        self
    }

    /// Replace the user configuration file with a reader.
    pub fn user_config_reader<R: Read>(self, mut reader: R) -> Result<Self> {
        let mut text = String::new();
        let _ = reader.read_to_string(&mut text)?;
        Ok(self.user_config_str(text))
    }

    /// Replace the global configuration file with in-memory content.
    #[must_use]
    pub fn global_config_str<S: Into<String>>(mut self, text: S) -> Self {
        self.global_source = Some(text.into());
        self
    }

    /// Replace the global configuration file with a reader.
    pub fn global_config_reader<R: Read>(self, mut reader: R) -> Result<Self> {
        let mut text = String::new();
        let _ = reader.read_to_string(&mut text)?;
        Ok(self.global_config_str(text))
    }

    /// Replace the shell-out used by `Match exec`.
    #[must_use]
    pub fn executor<E: Executor + 'static>(mut self, executor: E) -> Self {
        self.executor = Arc::new(executor);
        self
    }

    /// Replace the DNS lookup used by canonicalization.
    #[must_use]
    pub fn dns<D: DnsResolver + 'static>(mut self, dns: D) -> Self {
        self.dns = Arc::new(dns);
        self
    }

    /// Explicit home directory for `~` and `%d` expansion.
    #[must_use]
    pub fn user_home<S: Into<String>>(mut self, home: S) -> Self {
        self.user_home = Some(home.into());
        self
    }

    /// Override the process environment for `$VAR` expansion (and the
    /// `USER` lookups). Useful for tests.
    #[must_use]
    pub fn environment(mut self, env: BTreeMap<String, String>) -> Self {
        self.environment = Some(env);
        self
    }
}

///////////////////////////////////////////////////////////////////////////////////////

/// A reusable, host-independent view of the configuration sources.
///
/// Building one parses every source (and its includes) exactly once; the
/// tree can then be applied to any number of target hosts. Applications are
/// serialised behind a mutex, so a shared `Parser` is safe but never
/// concurrent.
#[derive(Debug)]
pub struct Parser {
    tree: Tree,
    options: Options,
    /// Serialises apply() so a shared tree is never walked concurrently.
    guard: Mutex<()>,
}

impl Parser {
    /// Reads and parses all configured sources into a tree.
    pub fn new(options: Options) -> Result<Self> {
        let mut sources = Vec::new();
        if let Some(text) = &options.source {
            sources.push(Source {
                text: text.clone(),
                path: "<config>".into(),
                is_user: true,
                dir: None,
            });
        } else {
            if let Some(source) = Self::user_source(&options)? {
                sources.push(source);
            }
            if let Some(source) = Self::global_source(&options)? {
                sources.push(source);
            }
        }
        sources.push(Source {
            text: DEFAULT_CONFIG.into(),
            path: DEFAULTS_PATH.into(),
            is_user: false,
            dir: None,
        });
        let tree = TreeBuilder::new().build(sources)?;
        Ok(Self {
            tree,
            options,
            guard: Mutex::new(()),
        })
    }

    fn user_source(options: &Options) -> Result<Option<Source>> {
        if let Some(text) = &options.user_source {
            return Ok(Some(Source {
                text: text.clone(),
                path: "<user>".into(),
                is_user: true,
                dir: None,
            }));
        }
        let Some(path) = options.user_config_path.clone().or_else(default_user_config_path)
        else {
            return Ok(None);
        };
        Self::file_source(&path, true)
    }

    fn global_source(options: &Options) -> Result<Option<Source>> {
        if let Some(text) = &options.global_source {
            return Ok(Some(Source {
                text: text.clone(),
                path: "<global>".into(),
                is_user: false,
                dir: None,
            }));
        }
        let Some(path) = options
            .global_config_path
            .clone()
            .or_else(default_global_config_path)
        else {
            return Ok(None);
        };
        Self::file_source(&path, false)
    }

    fn file_source(path: &Path, is_user: bool) -> Result<Option<Source>> {
        if !path.exists() {
            trace!("configuration file {} not present", path.display());
            return Ok(None);
        }
        let text = std::fs::read_to_string(path)?;
        Ok(Some(Source {
            text,
            path: path.to_string_lossy().to_string(),
            is_user,
            dir: path.parent().map(Path::to_path_buf),
        }))
    }

    /// Resolves the effective configuration for `host_alias` into `config`.
    ///
    /// The caller's config object is mutated in place; fields it already
    /// holds are honored by the first-write-wins rule, which is how
    /// command-line overrides slot in above the files.
    pub fn apply(&self, config: &mut Config, host_alias: &str) -> Result<()> {
        let _serialised = self.guard.lock().unwrap_or_else(PoisonError::into_inner);

        config.host = Some(host_alias.to_string());
        let mut setter = Setter::new(config);
        setter.original_host = host_alias.to_string();
        setter.executor = Arc::clone(&self.options.executor);
        setter.dns = Arc::clone(&self.options.dns);
        setter.environment = self.options.environment.clone();
        if let Some(home) = &self.options.user_home {
            setter.home = home.clone();
        }

        self.run_pass(&mut setter, Phase::Regular)?;
        setter.canonicalize_hostname()?;
        if setter.host_changed() || setter.want_final {
            self.run_pass(&mut setter, Phase::Final)?;
        }
        if !self.options.no_finalize {
            setter.finalize()?;
        }
        Ok(())
    }

    /// Rewinds any in-progress traversal. Idempotent; `apply` rewinds
    /// implicitly, so this only matters for callers that abandoned one.
    pub fn reset(&self) {
        let _serialised = self.guard.lock().unwrap_or_else(PoisonError::into_inner);
    }

    fn run_pass(&self, setter: &mut Setter<'_>, phase: Phase) -> Result<()> {
        setter.phase = phase;
        let mut cursor = TreeCursor::new(&self.tree);
        while let Some(node) = cursor.next() {
            match node.key.as_str() {
                // the include node is a container; its children follow
                "include" => {}
                "host" => {
                    let target = setter.config.host.clone().unwrap_or_default();
                    if !match_patterns(&node.values, &target) {
                        cursor.skip_subtree();
                    }
                }
                "match" => {
                    if !matching::evaluate_match(setter, &node.values)? {
                        cursor.skip_subtree();
                    }
                }
                _ => {
                    let restore = setter.phase;
                    if node.path == DEFAULTS_PATH {
                        setter.phase = Phase::Defaults;
                    }
                    let outcome = setter.set(&node.key, &node.values);
                    setter.phase = restore;
                    self.absorb_set_error(setter, &node.key, outcome)?;
                }
            }
        }
        Ok(())
    }

    /// Unknown-key errors are tolerated outside strict mode, and inside it
    /// when `IgnoreUnknown` (as set so far) covers the keyword.
    fn absorb_set_error(
        &self,
        setter: &Setter<'_>,
        keyword: &str,
        outcome: Result<()>,
    ) -> Result<()> {
        let Err(e) = outcome else { return Ok(()) };
        if !e.is_unknown_key() {
            return Err(e);
        }
        if !self.options.strict {
            debug!("ignoring unknown keyword {keyword}");
            return Ok(());
        }
        if let Some(patterns) = &setter.config.ignore_unknown {
            if crate::pattern::match_pattern_list(patterns, keyword) {
                debug!("IgnoreUnknown covers {keyword}");
                return Ok(());
            }
        }
        Err(e)
    }
}

/// One-shot resolution: build a [`Parser`] and apply it to a fresh config.
pub fn resolve(host_alias: &str, options: Options) -> Result<Config> {
    let parser = Parser::new(options)?;
    let mut config = Config::default();
    parser.apply(&mut config, host_alias)?;
    Ok(config)
}

///////////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod test {
    use super::{resolve, Options, Parser};
    use crate::canonicalize::DnsResolver;
    use crate::config::Config;
    use crate::errors::Result;
    use crate::matching::Executor;
    use assertables::assert_contains;
    use std::collections::BTreeMap;

    fn test_env() -> BTreeMap<String, String> {
        [
            ("USER".to_string(), "tester".to_string()),
            ("HOME".to_string(), "/tmp".to_string()),
        ]
        .into_iter()
        .collect()
    }

    fn opts(source: &str) -> Options {
        Options::new()
            .config_str(source)
            .user_home("/tmp")
            .environment(test_env())
    }

    #[test]
    fn host_and_match_precedence() {
        let source = r#"Host example.com
  IdentityFile ~/.ssh/id_example
  Port 23
Host *.example.net
  IdentityFile ~/.ssh/id_net
  Port 2222
Match host="some.random.example,specific.example.net"
  IdentityFile ~/.ssh/id_specific
  Port 2200
Host *
  IdentityFile ~/.ssh/id_default
  Port 22
"#;
        let config = resolve("specific.example.net", opts(source)).unwrap();
        assert_eq!(
            config.identity_file,
            vec![
                "/tmp/.ssh/id_net",
                "/tmp/.ssh/id_specific",
                "/tmp/.ssh/id_default"
            ]
        );
        assert_eq!(config.port, Some(2222));
    }

    #[test]
    fn negated_patterns() {
        let source = "Host !forbidden.example.com\n\
             Port 99\n\
             Host *.example.com\n\
             Port 23\n";
        let config = resolve("forbidden.example.com", opts(source)).unwrap();
        // the negated standalone line is not a positive match, so only the
        // wildcard block applies
        assert_eq!(config.port, Some(23));
        let config = resolve("allowed.example.com", opts(source)).unwrap();
        assert_eq!(config.port, Some(23));
    }

    #[derive(Debug)]
    struct FakeExec(&'static str);
    impl Executor for FakeExec {
        fn run(&self, argv: &[String]) -> Result<bool> {
            Ok(argv.join(" ") == self.0)
        }
    }

    #[test]
    fn match_exec() {
        let source = "Match host=example.net exec=\"test -f /some/file\"\n\
             Port 23\n\
             Host *\n\
             Port 22\n";
        let config = resolve(
            "example.net",
            opts(source).executor(FakeExec("test -f /some/file")),
        )
        .unwrap();
        assert_eq!(config.port, Some(23));

        let config = resolve(
            "example.org",
            opts(source).executor(FakeExec("test -f /some/file")),
        )
        .unwrap();
        assert_eq!(config.port, Some(22));

        let config = resolve("example.net", opts(source).executor(FakeExec("other"))).unwrap();
        assert_eq!(config.port, Some(22));
    }

    #[test]
    fn include_with_relative_paths() {
        let tempdir = tempfile::tempdir().unwrap();
        let sub = tempdir.path().join("user_config.d");
        std::fs::create_dir(&sub).unwrap();
        std::fs::write(
            sub.join("config1"),
            "Host user\nUserKnownHostsFile /user/known\n",
        )
        .unwrap();
        let main = tempdir.path().join("config");
        std::fs::write(&main, "Include user_config.d/*\n").unwrap();

        let options = Options::new()
            .user_config_path(&main)
            .global_config_str("")
            .user_home("/tmp")
            .environment(test_env());
        let config = resolve("user", options).unwrap();
        assert_eq!(config.user_known_hosts_file, vec!["/user/known"]);
    }

    /// name -> canonical name; absent means NXDOMAIN
    #[derive(Debug)]
    struct FakeDns(BTreeMap<String, String>);
    impl DnsResolver for FakeDns {
        fn canonical_name(&self, fqdn: &str) -> Result<Option<String>> {
            Ok(self.0.get(fqdn).cloned())
        }
    }

    #[test]
    fn canonicalization_runs_a_second_pass() {
        let source = "CanonicalizeHostname always\n\
             CanonicalDomains example.com\n\
             Match host=host.example.com\n\
             SendEnv CANON_FLAG\n\
             Host *\n\
             Port 22\n";
        let dns = FakeDns(
            [("host.example.com".to_string(), "host.example.com".to_string())]
                .into_iter()
                .collect(),
        );
        let config = resolve("host", opts(source).dns(dns)).unwrap();
        assert_eq!(config.host.as_deref(), Some("host.example.com"));
        // the match block only applied on the second pass
        assert_eq!(config.send_env, vec!["CANON_FLAG"]);
        // scalars set on the first pass keep their values
        assert_eq!(config.port, Some(22));
    }

    #[test]
    fn match_final_requests_second_pass() {
        let source = "Match final host=*\n\
             Hostname late.example.com\n\
             Host *\n\
             Port 22\n";
        let config = resolve("anything", opts(source)).unwrap();
        assert_eq!(config.hostname.as_deref(), Some("late.example.com"));
        assert_eq!(config.port, Some(22));
    }

    #[test]
    fn hostname_changes_later_match_host() {
        let source = "Host alias\n\
             Hostname real.example.com\n\
             Match host=real.example.com\n\
             Port 1234\n";
        let config = resolve("alias", opts(source)).unwrap();
        assert_eq!(config.hostname.as_deref(), Some("real.example.com"));
        assert_eq!(config.port, Some(1234));
    }

    #[test]
    fn defaults_never_overwrite() {
        let source = "Host *\nPort 2222\nStrictHostKeyChecking no\n";
        let config = resolve("x", opts(source)).unwrap();
        assert_eq!(config.port, Some(2222));
        assert_eq!(
            config.strict_host_key_checking,
            Some(crate::config::StrictHostKeyChecking::No)
        );
        // and where nothing was set, the defaults show through
        assert_eq!(config.connection_attempts, Some(1));
        assert_eq!(config.number_of_password_prompts, Some(3));
    }

    #[test]
    fn strict_mode_and_ignore_unknown() {
        let source = "FancyFutureOption maybe\nPort 2222\n";
        // lax mode shrugs
        let config = resolve("x", opts(source)).unwrap();
        assert_eq!(config.port, Some(2222));
        // strict mode objects
        let err = resolve("x", opts(source).strict()).unwrap_err();
        assert_contains!(err.to_string(), "fancyfutureoption");
        // unless IgnoreUnknown covers the (lowercased) key first
        let source = "IgnoreUnknown fancy*\nFancyFutureOption maybe\nPort 2222\n";
        let config = resolve("x", opts(source).strict()).unwrap();
        assert_eq!(config.port, Some(2222));
    }

    #[test]
    fn parser_reuse_across_hosts() {
        let source = "Host a\nPort 1001\nHost b\nPort 1002\n";
        let parser = Parser::new(opts(source)).unwrap();
        let mut ca = Config::default();
        parser.apply(&mut ca, "a").unwrap();
        parser.reset();
        let mut cb = Config::default();
        parser.apply(&mut cb, "b").unwrap();
        assert_eq!(ca.port, Some(1001));
        assert_eq!(cb.port, Some(1002));
    }

    #[test]
    fn caller_presets_take_precedence() {
        let source = "Host *\nPort 2222\nUser fromfile\n";
        let parser = Parser::new(opts(source)).unwrap();
        let mut config = Config::default();
        config.user = Some("cli-override".into());
        parser.apply(&mut config, "x").unwrap();
        assert_eq!(config.user.as_deref(), Some("cli-override"));
        assert_eq!(config.port, Some(2222));
    }

    #[test]
    fn no_finalize_leaves_raw_values() {
        let source = "Host *\nIdentityFile ~/.ssh/id_x\n";
        let config = resolve("x", opts(source).no_finalize()).unwrap();
        assert_eq!(config.identity_file, vec!["~/.ssh/id_x"]);
    }

    #[test]
    fn sticky_none_survives_resolution() {
        let source = "Host *\nIdentityFile none\n";
        let config = resolve("x", opts(source)).unwrap();
        // explicit none erases the list, including the built-in defaults
        assert!(config.identity_file.is_empty());
    }

    #[test]
    fn algorithm_modifiers_end_to_end() {
        let source = "Host *\nCiphers -aes128-ctr\nCiphers +foo\n";
        let config = resolve("x", opts(source)).unwrap();
        assert!(!config.ciphers.is_empty());
        assert!(!config.ciphers.contains(&"aes128-ctr".to_string()));
        // the second directive lost first-write-wins
        assert!(!config.ciphers.contains(&"foo".to_string()));
    }

    #[test]
    fn user_and_global_source_order() {
        let options = Options::new()
            .user_config_str("Host *\nPort 1111\n")
            .global_config_str("Host *\nPort 2222\nCompression yes\n")
            .user_home("/tmp")
            .environment(test_env());
        let config = resolve("x", options).unwrap();
        assert_eq!(config.port, Some(1111)); // user config wins
        assert_eq!(config.compression, Some(true)); // global fills gaps
    }

    #[test]
    fn syntax_errors_abort() {
        let err = resolve("x", opts("Port \"unclosed\n")).unwrap_err();
        assert_contains!(err.to_string(), "unterminated quote");
        let err = resolve("x", opts("Port\n")).unwrap_err();
        assert_contains!(err.to_string(), "missing argument");
    }
}
