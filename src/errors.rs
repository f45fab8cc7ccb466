//! Error types for configuration resolution
// (c) 2024 Ross Younger

/// Convenience alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong while parsing or resolving a configuration
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The file (or string) being parsed was not valid ssh_config syntax
    #[error("{path} line {line}: {message}")]
    Syntax {
        /// Origin file (`<string>` for in-memory sources)
        path: String,
        /// Origin line number, 1-based
        line: usize,
        /// What went wrong
        message: String,
    },
    /// A directive's value failed type validation
    #[error("invalid value for {key}: {message}")]
    InvalidValue {
        /// The canonical keyword
        key: String,
        /// What went wrong
        message: String,
    },
    /// A directive named a key the target configuration does not know about.
    ///
    /// Outside strict mode the resolver suppresses this; in strict mode it is
    /// suppressed only when the key matches an `IgnoreUnknown` pattern.
    #[error("unknown configuration key: {0}")]
    UnknownKey(String),
    /// Token or environment expansion failed during finalization
    #[error("expanding {key}: {message}")]
    Expand {
        /// The canonical keyword
        key: String,
        /// What went wrong
        message: String,
    },
    /// Hostname canonicalization was required but did not succeed
    #[error("hostname canonicalization failed for {0}")]
    CanonicalizationFailed(String),
    /// The configuration uses a `Match` criterion that needs a live connection
    #[error("match criterion {0:?} requires a live connection")]
    NotImplemented(&'static str),
    /// An I/O error reading a configuration source
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn syntax<P, M>(path: P, line: usize, message: M) -> Self
    where
        P: Into<String>,
        M: Into<String>,
    {
        Self::Syntax {
            path: path.into(),
            line,
            message: message.into(),
        }
    }

    pub(crate) fn invalid<K, M>(key: K, message: M) -> Self
    where
        K: Into<String>,
        M: Into<String>,
    {
        Self::InvalidValue {
            key: key.into(),
            message: message.into(),
        }
    }

    pub(crate) fn expand<K, M>(key: K, message: M) -> Self
    where
        K: Into<String>,
        M: Into<String>,
    {
        Self::Expand {
            key: key.into(),
            message: message.into(),
        }
    }

    /// True for the error kinds that non-strict resolution swallows
    pub(crate) fn is_unknown_key(&self) -> bool {
        matches!(self, Self::UnknownKey(_))
    }
}

///////////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod test {
    use super::Error;
    use assertables::assert_contains;

    #[test]
    fn display_forms() {
        assert_contains!(
            Error::syntax("~/.ssh/config", 3, "unterminated quote").to_string(),
            "line 3"
        );
        assert_contains!(
            Error::invalid("port", "out of range").to_string(),
            "invalid value for port"
        );
        assert_contains!(
            Error::UnknownKey("frobnicate".into()).to_string(),
            "frobnicate"
        );
    }
}
