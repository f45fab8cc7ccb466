//! The parsed configuration tree and its traversal
// (c) 2024 Ross Younger

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::trace;

use crate::errors::{Error, Result};
use crate::includes::find_include_files;
use crate::tokenize::parse_line;

/// Origin recorded on directives from the built-in defaults source.
pub(crate) const DEFAULTS_PATH: &str = "__default__";

/// One parsed directive or structural block.
///
/// Structural nodes (`host`, `match`, `include`) carry the directives scoped
/// to them as children; plain directives are leaves. Nodes are never mutated
/// once the tree is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Node {
    /// Lowercased keyword
    pub key: String,
    /// Arguments as tokenized
    pub values: Vec<String>,
    /// Origin file (or `__default__`, or `<string>`)
    pub path: String,
    /// Origin line, 1-based
    pub row: usize,
    /// Scoped directives, in source order
    pub children: Vec<Node>,
}

impl Node {
    fn block(key: &str) -> Self {
        Self {
            key: key.into(),
            values: Vec::new(),
            path: String::new(),
            row: 0,
            children: Vec::new(),
        }
    }

    /// True for the block kinds that scope their children.
    pub(crate) fn is_structural(&self) -> bool {
        matches!(self.key.as_str(), "host" | "match")
    }
}

/// An immutable, ordered tree of configuration sources.
///
/// The root's children hold every source's nodes in precedence order:
/// user configuration, global configuration, then built-in defaults.
#[derive(Debug, Clone)]
pub(crate) struct Tree {
    pub root: Node,
}

/// One input stream for the tree builder.
#[derive(Debug, Clone)]
pub(crate) struct Source {
    /// The configuration text
    pub text: String,
    /// Where it came from, for diagnostics
    pub path: String,
    /// Whether user-scope include rules apply
    pub is_user: bool,
    /// Base directory for relative includes (the file's parent), if known
    pub dir: Option<PathBuf>,
}

/// Reads sources into a [`Tree`], inlining `Include`s as it goes.
#[derive(Debug, Default)]
pub(crate) struct TreeBuilder {
    /// Absolute paths of every file opened so far; a second visit is a cycle.
    opened: HashSet<PathBuf>,
}

impl TreeBuilder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Parses all sources, in order, into a single tree.
    pub(crate) fn build(mut self, sources: Vec<Source>) -> Result<Tree> {
        let mut root = Node::block("");
        for source in sources {
            self.parse_source(
                &source.text,
                &source.path,
                source.is_user,
                source.dir.as_deref(),
                &mut root.children,
            )?;
        }
        // Fallback remote user, overridable by everything above it.
        root.children.push(Node {
            key: "user".into(),
            values: vec![crate::expand::local_user()],
            path: DEFAULTS_PATH.into(),
            row: 0,
            children: Vec::new(),
        });
        Ok(Tree { root })
    }

    /// Parses one source's text, appending its nodes to `out`.
    ///
    /// `dir` is the directory of the file the text came from, used as the
    /// base for relative includes; `None` for in-memory sources.
    fn parse_source(
        &mut self,
        text: &str,
        path: &str,
        is_user: bool,
        dir: Option<&Path>,
        out: &mut Vec<Node>,
    ) -> Result<()> {
        // Directives before any Host/Match block attach directly to `out`;
        // a structural directive opens a block that collects what follows.
        let mut block: Option<Node> = None;
        for (idx, line) in text.lines().enumerate() {
            let row = idx + 1;
            let Some(directive) = parse_line(line, path, row)? else {
                continue;
            };
            let node = Node {
                key: directive.keyword,
                values: directive.values,
                path: path.into(),
                row,
                children: Vec::new(),
            };
            if node.is_structural() {
                if let Some(prev) = block.take() {
                    out.push(prev);
                }
                block = Some(node);
                continue;
            }
            let sink = match block.as_mut() {
                Some(b) => &mut b.children,
                None => &mut *out,
            };
            if node.key == "include" {
                let mut include = node;
                self.resolve_include(&mut include, is_user, dir)?;
                sink.push(include);
            } else {
                sink.push(node);
            }
        }
        if let Some(prev) = block.take() {
            out.push(prev);
        }
        Ok(())
    }

    /// Expands an `include` node's arguments, parsing each matched file into
    /// the node's children.
    fn resolve_include(&mut self, node: &mut Node, is_user: bool, dir: Option<&Path>) -> Result<()> {
        let args = node.values.clone();
        for arg in &args {
            let files = find_include_files(arg, is_user, dir, &node.path, node.row)?;
            for file in files {
                let canonical = file.canonicalize().unwrap_or_else(|_| file.clone());
                if !self.opened.insert(canonical) {
                    return Err(Error::syntax(
                        node.path.clone(),
                        node.row,
                        format!("circular include of {}", file.display()),
                    ));
                }
                trace!("including {}", file.display());
                let text = std::fs::read_to_string(&file).map_err(|e| {
                    Error::syntax(
                        node.path.clone(),
                        node.row,
                        format!("reading include {}: {e}", file.display()),
                    )
                })?;
                let file_str = file.to_string_lossy().to_string();
                self.parse_source(
                    &text,
                    &file_str,
                    is_user,
                    file.parent(),
                    &mut node.children,
                )?;
            }
        }
        Ok(())
    }
}

///////////////////////////////////////////////////////////////////////////////////////

/// Pre-order traversal with a way to skip the current node's subtree.
///
/// Each `next` descends into the returned node's children; calling
/// `skip_subtree` immediately afterwards abandons them instead, which is
/// how non-matching `Host`/`Match` blocks are passed over.
pub(crate) struct TreeCursor<'a> {
    stack: Vec<(&'a Node, usize)>,
}

impl<'a> TreeCursor<'a> {
    pub(crate) fn new(tree: &'a Tree) -> Self {
        Self {
            stack: vec![(&tree.root, 0)],
        }
    }

    pub(crate) fn next(&mut self) -> Option<&'a Node> {
        loop {
            let (node, idx) = self.stack.last_mut()?;
            if *idx < node.children.len() {
                let child = &node.children[*idx];
                *idx += 1;
                self.stack.push((child, 0));
                return Some(child);
            }
            let _ = self.stack.pop();
        }
    }

    /// Abandons the children of the most recently returned node.
    pub(crate) fn skip_subtree(&mut self) {
        let _ = self.stack.pop();
    }
}

///////////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod test {
    use super::{Source, Tree, TreeBuilder, TreeCursor};
    use assertables::assert_contains;

    fn build(text: &str) -> Tree {
        TreeBuilder::new()
            .build(vec![Source {
                text: text.into(),
                path: "<test>".into(),
                is_user: true,
                dir: None,
            }])
            .unwrap()
    }

    fn keys_in_order(tree: &Tree) -> Vec<String> {
        let mut cursor = TreeCursor::new(tree);
        let mut out = Vec::new();
        while let Some(n) = cursor.next() {
            out.push(n.key.clone());
        }
        out
    }

    #[test]
    fn bucketing() {
        let tree = build(
            "Compression yes\n\
             Host alpha\n\
             Port 1\n\
             User one\n\
             Host beta\n\
             Port 2\n",
        );
        let top: Vec<_> = tree.root.children.iter().map(|n| n.key.clone()).collect();
        // trailing synthetic user fallback is always present
        assert_eq!(top, vec!["compression", "host", "host", "user"]);
        let alpha = &tree.root.children[1];
        assert_eq!(alpha.values, vec!["alpha"]);
        let kids: Vec<_> = alpha.children.iter().map(|n| n.key.clone()).collect();
        assert_eq!(kids, vec!["port", "user"]);
    }

    #[test]
    fn preorder_and_skip() {
        let tree = build(
            "Host alpha\n\
             Port 1\n\
             Host beta\n\
             Port 2\n",
        );
        assert_eq!(keys_in_order(&tree), vec!["host", "port", "host", "port", "user"]);

        // skipping a block's subtree hides its directives
        let mut cursor = TreeCursor::new(&tree);
        let mut seen = Vec::new();
        while let Some(n) = cursor.next() {
            if n.key == "host" && n.values == vec!["alpha"] {
                cursor.skip_subtree();
                continue;
            }
            seen.push((n.key.clone(), n.values.clone()));
        }
        assert_eq!(
            seen,
            vec![
                ("host".into(), vec!["beta".to_string()]),
                ("port".into(), vec!["2".to_string()]),
                ("user".into(), vec![crate::expand::local_user()]),
            ]
        );
    }

    #[test]
    fn include_files_are_inlined() {
        let tempdir = tempfile::tempdir().unwrap();
        let sub = tempdir.path().join("extra.conf");
        std::fs::write(&sub, "Port 2200\n").unwrap();
        let main = tempdir.path().join("config");
        std::fs::write(&main, "Host web\nInclude extra.conf\nUser admin\n").unwrap();

        let text = std::fs::read_to_string(&main).unwrap();
        let mut builder = TreeBuilder::new();
        let mut out = Vec::new();
        builder
            .parse_source(&text, "config", true, Some(tempdir.path()), &mut out)
            .unwrap();
        assert_eq!(out.len(), 1);
        let host = &out[0];
        assert_eq!(host.key, "host");
        assert_eq!(host.children[0].key, "include");
        assert_eq!(host.children[0].children[0].key, "port");
        assert_eq!(host.children[1].key, "user");
    }

    #[test]
    fn circular_include_detected() {
        let tempdir = tempfile::tempdir().unwrap();
        let a = tempdir.path().join("a.conf");
        let b = tempdir.path().join("b.conf");
        std::fs::write(&a, "Include b.conf\n").unwrap();
        std::fs::write(&b, "Include a.conf\n").unwrap();

        let mut builder = TreeBuilder::new();
        let mut out = Vec::new();
        let err = builder
            .parse_source(
                "Include a.conf\n",
                "<test>",
                true,
                Some(tempdir.path()),
                &mut out,
            )
            .unwrap_err();
        assert_contains!(err.to_string(), "circular include");
    }

    #[test]
    fn self_include_detected() {
        let tempdir = tempfile::tempdir().unwrap();
        let a = tempdir.path().join("selfie.conf");
        std::fs::write(&a, "Include selfie.conf\n").unwrap();
        let mut builder = TreeBuilder::new();
        let mut out = Vec::new();
        let err = builder
            .parse_source(
                "Include selfie.conf\n",
                "<test>",
                true,
                Some(tempdir.path()),
                &mut out,
            )
            .unwrap_err();
        assert_contains!(err.to_string(), "circular include");
    }
}
