//! Glob-style pattern and pattern-list matching
// (c) 2024 Ross Younger

use wildmatch::WildMatch;

/// Matches a single `*`/`?` glob pattern against `text`.
///
/// Equality fast-path when the pattern carries no wildcards.
pub(crate) fn match_pattern(pattern: &str, text: &str) -> bool {
    if !pattern.contains(['*', '?']) {
        return pattern == text;
    }
    if pattern == "*" {
        return true;
    }
    WildMatch::new(pattern).matches(text)
}

/// Evaluates a negation-aware group of patterns.
///
/// A negated (`!`-prefixed) match wins immediately and the whole group is
/// false. Otherwise the group is true iff at least one positive pattern
/// matched.
pub(crate) fn match_patterns<S: AsRef<str>>(patterns: &[S], text: &str) -> bool {
    let mut positive = false;
    for p in patterns {
        let p = p.as_ref();
        if let Some(negated) = p.strip_prefix('!') {
            if match_pattern(negated, text) {
                return false;
            }
        } else if match_pattern(p, text) {
            positive = true;
        }
    }
    positive
}

/// Evaluates a comma-separated pattern-list (the `Match` criterion form).
pub(crate) fn match_pattern_list(list: &str, text: &str) -> bool {
    let elements: Vec<&str> = list.split(',').collect();
    match_patterns(&elements, text)
}

///////////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod test {
    use super::{match_pattern, match_pattern_list, match_patterns};
    use anyhow::{anyhow, Context, Result};
    use assertables::assert_eq_as_result;

    #[test]
    fn single_patterns() -> Result<()> {
        for (pattern, text, result) in [
            ("foo", "foo", true),
            ("foo", "fo", false),
            ("", "foo", false),
            ("*", "anything at all", true),
            ("f?o", "foo", true),
            ("f?o", "fooo", false),
            ("f*", "foo", true),
            ("*of", "oof", true),
            ("192.168.?.42", "192.168.1.42", true),
            ("192.168.?.42", "192.168.10.42", false),
            ("*.example.com", "a.example.com", true),
            ("*.example.com", "example.com", false),
        ] {
            assert_eq_as_result!(match_pattern(pattern, text), result)
                .map_err(|e| anyhow!(e))
                .with_context(|| format!("pattern {pattern}, text {text}"))?;
        }
        Ok(())
    }

    #[test]
    fn negation_latch() -> Result<()> {
        for (list, text, result) in [
            ("foo,bar", "bar", true),
            ("foo,bar", "baz", false),
            ("*,!bad", "good", true),
            ("*,!bad", "bad", false),
            // a negated non-match does not count as a positive
            ("!forbidden.example.com", "allowed.example.com", false),
            ("!forbidden.example.com,*.example.com", "x.example.com", true),
            ("!forbidden.example.com,*.example.com", "forbidden.example.com", false),
            // negation wins regardless of position
            ("!bad,*", "bad", false),
        ] {
            assert_eq_as_result!(match_pattern_list(list, text), result)
                .map_err(|e| anyhow!(e))
                .with_context(|| format!("list {list}, text {text}"))?;
        }
        Ok(())
    }

    #[test]
    fn whitespace_separated_group() {
        // Host blocks carry their patterns as separate arguments
        assert!(match_patterns(&["foo", "bar"], "bar"));
        assert!(!match_patterns(&["!foo", "*"], "foo"));
        assert!(match_patterns(&["!foo", "*"], "fred"));
    }
}
