//! `Include` directive path resolution
// (c) 2024 Ross Younger

use std::path::{Component, Path, PathBuf};

use glob::{glob_with, MatchOptions};
use tracing::warn;

use crate::errors::{Error, Result};

/// Where relative include paths land when the including file's own
/// directory is unknown (reader-supplied sources).
fn default_base(is_user: bool) -> Option<PathBuf> {
    if is_user {
        let mut home = dirs::home_dir()?;
        home.push(".ssh");
        Some(home)
    } else {
        Some(PathBuf::from("/etc/ssh"))
    }
}

/// Expands one `Include` argument into the ordered list of files to read.
///
/// Tilde and glob expansion apply; relative paths resolve against the
/// including file's directory, falling back to the user or global include
/// directory. Paths containing a `..` segment are refused outright.
pub(crate) fn find_include_files(
    arg: &str,
    is_user: bool,
    including_dir: Option<&Path>,
    origin: &str,
    row: usize,
) -> Result<Vec<PathBuf>> {
    if PathBuf::from(arg).components().any(|c| c == Component::ParentDir) {
        return Err(Error::syntax(
            origin,
            row,
            format!("include path {arg:?} contains a parent-directory segment"),
        ));
    }

    let mut path = if arg.starts_with('~') {
        if !is_user {
            return Err(Error::syntax(
                origin,
                row,
                "include paths may not start with ~ in the global configuration",
            ));
        }
        expanduser::expanduser(arg).map_err(|e| {
            Error::syntax(origin, row, format!("expanding include expression {arg}: {e}"))
        })?
    } else {
        PathBuf::from(arg)
    };
    if !path.is_absolute() {
        let Some(base) = including_dir.map(Path::to_path_buf).or_else(|| default_base(is_user))
        else {
            return Err(Error::syntax(origin, row, "could not determine include directory"));
        };
        path = base.join(path);
    }

    let options = MatchOptions {
        case_sensitive: true,
        require_literal_leading_dot: true,
        require_literal_separator: true,
    };
    let pattern = path.to_string_lossy();
    let mut result: Vec<PathBuf> = Vec::new();
    let walker = glob_with(pattern.as_ref(), options)
        .map_err(|e| Error::syntax(origin, row, format!("bad include pattern {arg:?}: {e}")))?;
    for entry in walker {
        match entry {
            Ok(p) => result.push(p),
            Err(e) => warn!("skipping unreadable include match: {e}"),
        }
    }
    result.sort();
    Ok(result)
}

///////////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod test {
    use super::find_include_files;
    use assertables::assert_contains;

    #[test]
    fn parent_segments_rejected() {
        let err = find_include_files("../sneaky", true, None, "<t>", 4).unwrap_err();
        assert_contains!(err.to_string(), "parent-directory");
        let err = find_include_files("a/../b", true, None, "<t>", 4).unwrap_err();
        assert_contains!(err.to_string(), "parent-directory");
    }

    #[test]
    fn tilde_refused_in_global_scope() {
        let err = find_include_files("~/extra", false, None, "<t>", 1).unwrap_err();
        assert_contains!(err.to_string(), "global configuration");
    }

    #[test]
    fn globs_expand_sorted() {
        let tempdir = tempfile::tempdir().unwrap();
        for name in ["20-second", "10-first", "unrelated"] {
            std::fs::write(tempdir.path().join(name), "# empty").unwrap();
        }
        let found =
            find_include_files("?0-*", true, Some(tempdir.path()), "<t>", 1).unwrap();
        let names: Vec<_> = found
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["10-first", "20-second"]);
    }

    #[test]
    fn no_match_is_not_an_error() {
        let tempdir = tempfile::tempdir().unwrap();
        let found =
            find_include_files("missing-*", true, Some(tempdir.path()), "<t>", 1).unwrap();
        assert!(found.is_empty());
    }
}
