//! Physical line tokenization
// (c) 2024 Ross Younger

use crate::errors::{Error, Result};

/// One tokenized directive: a lowercased keyword plus its argument vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Directive {
    pub keyword: String,
    pub values: Vec<String>,
}

/// Splits a physical line into its keyword and the unparsed remainder.
///
/// The keyword may be delimited by whitespace (`Key Value`) or equals
/// (`Key=Value`); after the keyword we consume any run of whitespace plus at
/// most one `=`. Returns `None` for blank lines and comments.
pub(crate) fn split_keyword(line: &str) -> Option<(String, &str)> {
    let line = line.trim_start();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let end = line
        .find(|c: char| c == '=' || c.is_ascii_whitespace())
        .unwrap_or(line.len());
    let keyword = line[..end].to_ascii_lowercase();
    let mut rest = &line[end..];
    rest = rest.trim_start();
    if let Some(stripped) = rest.strip_prefix('=') {
        rest = stripped.trim_start();
    }
    Some((keyword, rest))
}

/// Splits a directive's remainder into a list of arguments.
///
/// Arguments are delimited by whitespace, subject to quoting (single or
/// double quotes) and simple escapes (`\\`, `\"`, `\'`, and `\ ` outside
/// quotes). An unquoted `#` at the start of a token begins a comment unless
/// `keep_comment` is set (command-valued keys treat the rest of the line as
/// data).
pub(crate) fn split_args(input: &str, keep_comment: bool) -> std::result::Result<Vec<String>, String> {
    let input: Vec<char> = input.chars().collect();
    let mut i = 0;
    let mut output = Vec::<String>::new();
    while i < input.len() {
        if input[i] == ' ' || input[i] == '\t' {
            i += 1;
            continue;
        }
        if input[i] == '#' && !keep_comment {
            break;
        }

        let mut current_arg = String::new();
        let mut quote_state: char = '\0';

        while i < input.len() {
            let ch = input[i];
            match (ch, quote_state) {
                ('\\', _) => {
                    let next = input.get(i + 1);
                    match next {
                        Some(nn @ ('\'' | '\"' | '\\')) => {
                            current_arg.push(*nn);
                            i += 1;
                        }
                        Some(' ') if quote_state == '\0' => {
                            current_arg.push(' ');
                            i += 1;
                        }
                        Some(_) | None => current_arg.push(ch), // unrecognised escape is literal
                    }
                }
                (' ' | '\t', '\0') => break, // end of token
                (q @ ('\'' | '\"'), '\0') => quote_state = q,
                (q1, q2) if q1 == q2 => quote_state = '\0',
                (c, _) => current_arg.push(c),
            }
            i += 1;
        }

        if quote_state != '\0' {
            return Err("unterminated quote".into());
        }
        output.push(current_arg);
        i += 1;
    }
    Ok(output)
}

/// Tokenizes one physical line into a [`Directive`].
///
/// Returns `Ok(None)` for blank lines and comments. An empty value list is a
/// syntax error, except for the `canonicaldomains` emission of `ssh -G`
/// which is mapped to the single value `none`.
pub(crate) fn parse_line(line: &str, path: &str, row: usize) -> Result<Option<Directive>> {
    let Some((keyword, rest)) = split_keyword(line) else {
        return Ok(None);
    };
    let keep_comment = crate::keys::keeps_comment(&keyword);
    let mut values = split_args(rest, keep_comment).map_err(|e| Error::syntax(path, row, e))?;
    if values.is_empty() {
        if keyword == "canonicaldomains" {
            values.push("none".into());
        } else {
            return Err(Error::syntax(
                path,
                row,
                format!("missing argument for {keyword}"),
            ));
        }
    }
    Ok(Some(Directive { keyword, values }))
}

///////////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod test {
    use super::{parse_line, split_args, split_keyword, Directive};
    use anyhow::{anyhow, Context, Result};
    use assertables::{assert_contains, assert_contains_as_result, assert_eq_as_result};

    #[test]
    fn arg_splitting() -> Result<()> {
        for (input, expected) in [
            ("", vec![]),
            ("a", vec!["a"]),
            ("   a    b   ", vec!["a", "b"]),
            (" a b # c d", vec!["a", "b"]),
            (r"a\ b", vec!["a b"]),
            (r#"a\' \"b"#, vec!["a'", "\"b"]),
            (r#""a b" 'c d'"#, vec!["a b", "c d"]),
            (r#""a \"b" '\'c d'"#, vec!["a \"b", "'c d"]),
            (r"C:\Users\fred", vec![r"C:\Users\fred"]),
        ] {
            let msg = || format!("input \"{input}\" failed");
            assert_eq_as_result!(split_args(input, false).map_err(|e| anyhow!(e))?, expected)
                .map_err(|e| anyhow!(e))
                .with_context(msg)?;
        }
        for input in ["aaa\"bbb", "'"] {
            let err = split_args(input, false).unwrap_err();
            assert_contains_as_result!(err, "unterminated quote")
                .map_err(|e| anyhow!(e))
                .with_context(|| format!("input \"{input}\" failed"))?;
        }
        Ok(())
    }

    #[test]
    fn comment_retained_for_command_keys() {
        let args = split_args("some command # with a hash", true).unwrap();
        assert_eq!(args, vec!["some", "command", "#", "with", "a", "hash"]);
    }

    #[test]
    fn keyword_splitting() {
        for (input, expected) in [
            ("Port 22", Some(("port", "22"))),
            ("Port=22", Some(("port", "22"))),
            ("Port = 22", Some(("port", "22"))),
            ("  PORT\t22", Some(("port", "22"))),
            ("# comment", None),
            ("   ", None),
        ] {
            let got = split_keyword(input);
            match expected {
                None => assert!(got.is_none(), "input {input:?}"),
                Some((kw, rest)) => {
                    let (k, r) = got.unwrap();
                    assert_eq!((k.as_str(), r), (kw, rest), "input {input:?}");
                }
            }
        }
    }

    #[test]
    fn whole_lines() {
        let d = parse_line("HostName example.com", "<t>", 1).unwrap().unwrap();
        assert_eq!(
            d,
            Directive {
                keyword: "hostname".into(),
                values: vec!["example.com".into()],
            }
        );
        assert!(parse_line(" # nothing", "<t>", 1).unwrap().is_none());

        // the rest of the line belongs to the command for command-valued keys
        let d = parse_line("ProxyCommand nc %h %p # lucky", "<t>", 1)
            .unwrap()
            .unwrap();
        assert_eq!(d.values, vec!["nc", "%h", "%p", "#", "lucky"]);

        let err = parse_line("Port", "<t>", 7).unwrap_err();
        assert_contains!(err.to_string(), "line 7");

        // ssh -G emits a bare "canonicaldomains" when none are set
        let d = parse_line("canonicaldomains", "<t>", 1).unwrap().unwrap();
        assert_eq!(d.values, vec!["none"]);
    }
}
