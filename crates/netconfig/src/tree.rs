//! Immutable configuration tree.
//!
//! Both the target configuration and the live configuration read back from a
//! device are held as a [`ConfigTree`]. Directives are pure functions from
//! one tree to the next; [`ConfigTree::apply`] never mutates its input.

use crate::directive::{Directive, DirectiveKind, Payload};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors raised while building or editing a tree.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeError {
    /// Create on a node that already exists
    #[error("node already exists: {0}")]
    AlreadyExists(String),

    /// Delete or lookup on a node that does not exist
    #[error("node not found: {0}")]
    NotFound(String),

    /// Unparseable path or configuration text
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// A set-field directive without a value
    #[error("missing payload for {0}")]
    MissingPayload(String),
}

/// One node: a container, a keyed list entry, a leaf or a presence flag.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Node {
    /// Element name
    pub name: String,
    /// List key, for keyed entries
    pub key: Option<String>,
    /// Leaf value
    pub text: Option<String>,
    /// Child nodes in insertion order
    pub children: Vec<Node>,
}

impl Node {
    /// Empty container or presence node.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Leaf with a value.
    pub fn leaf(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            text: Some(text.into()),
            ..Default::default()
        }
    }

    /// Path segment addressing this node under its parent.
    pub fn segment(&self) -> PathSegment {
        PathSegment {
            name: self.name.clone(),
            key: self.key.clone(),
        }
    }

    fn matches(&self, segment: &PathSegment) -> bool {
        self.name == segment.name && self.key == segment.key
    }

    fn is_empty(&self) -> bool {
        self.text.is_none() && self.children.is_empty()
    }
}

/// One step of a [`TreePath`]: `name` or `name[key]`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PathSegment {
    /// Element name
    pub name: String,
    /// List key
    pub key: Option<String>,
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.key {
            Some(key) => write!(f, "{}[{}]", self.name, key),
            None => write!(f, "{}", self.name),
        }
    }
}

/// Address of a node, e.g. `interfaces/interface[swp1]/unit[100]/vlan-id`.
///
/// Keys may contain `/` (prefixes, interface names like `ge-0/0/1`).
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TreePath(Vec<PathSegment>);

impl TreePath {
    /// Path from segments.
    pub fn new(segments: Vec<PathSegment>) -> Self {
        Self(segments)
    }

    /// Parse `a/b[key]/c`.
    pub fn parse(text: &str) -> Result<Self, TreeError> {
        let invalid = || TreeError::InvalidPath(text.to_string());
        let mut segments = Vec::new();
        let mut name = String::new();
        let mut chars = text.chars();

        while let Some(c) = chars.next() {
            match c {
                '/' => {
                    if name.is_empty() {
                        return Err(invalid());
                    }
                    segments.push(PathSegment {
                        name: std::mem::take(&mut name),
                        key: None,
                    });
                }
                '[' => {
                    if name.is_empty() {
                        return Err(invalid());
                    }
                    let mut key = String::new();
                    loop {
                        match chars.next() {
                            Some(']') => break,
                            Some(k) => key.push(k),
                            None => return Err(invalid()),
                        }
                    }
                    segments.push(PathSegment {
                        name: std::mem::take(&mut name),
                        key: Some(key),
                    });
                    match chars.next() {
                        None | Some('/') => {}
                        Some(_) => return Err(invalid()),
                    }
                }
                ']' => return Err(invalid()),
                c => name.push(c),
            }
        }

        if !name.is_empty() {
            segments.push(PathSegment { name, key: None });
        } else if text.ends_with('/') || segments.is_empty() {
            return Err(invalid());
        }
        Ok(Self(segments))
    }

    /// Append an unkeyed segment.
    #[must_use]
    pub fn child(&self, name: &str) -> Self {
        let mut segments = self.0.clone();
        segments.push(PathSegment {
            name: name.to_string(),
            key: None,
        });
        Self(segments)
    }

    /// Append a keyed segment.
    #[must_use]
    pub fn keyed(&self, name: &str, key: impl fmt::Display) -> Self {
        let mut segments = self.0.clone();
        segments.push(PathSegment {
            name: name.to_string(),
            key: Some(key.to_string()),
        });
        Self(segments)
    }

    /// Append every segment of a relative path.
    #[must_use]
    pub fn join(&self, relative: &TreePath) -> Self {
        let mut segments = self.0.clone();
        segments.extend(relative.0.iter().cloned());
        Self(segments)
    }

    /// Segments.
    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }

    /// Last segment.
    pub fn last(&self) -> Option<&PathSegment> {
        self.0.last()
    }

    /// Enclosing path.
    pub fn parent(&self) -> Option<TreePath> {
        match self.0.split_last() {
            Some((_, rest)) if !rest.is_empty() => Some(Self(rest.to_vec())),
            _ => None,
        }
    }

    /// Whether `self` equals `ancestor` or lies below it.
    pub fn starts_with(&self, ancestor: &TreePath) -> bool {
        self.0.starts_with(&ancestor.0)
    }

    /// Number of segments.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the path has no segment.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for TreePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "/")?;
            }
            write!(f, "{segment}")?;
        }
        Ok(())
    }
}

impl FromStr for TreePath {
    type Err = TreeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// A whole configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigTree {
    nodes: Vec<Node>,
}

impl ConfigTree {
    /// Tree from top-level nodes.
    pub fn from_nodes(nodes: Vec<Node>) -> Self {
        Self { nodes }
    }

    /// Top-level nodes.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Consume into top-level nodes.
    pub fn into_nodes(self) -> Vec<Node> {
        self.nodes
    }

    /// Whether the tree holds no configuration.
    pub fn is_empty(&self) -> bool {
        self.nodes.iter().all(Node::is_empty)
    }

    /// Node at `path`.
    pub fn get(&self, path: &TreePath) -> Option<&Node> {
        let (first, rest) = path.segments().split_first()?;
        let mut node = self.nodes.iter().find(|n| n.matches(first))?;
        for segment in rest {
            node = node.children.iter().find(|n| n.matches(segment))?;
        }
        Some(node)
    }

    /// Whether a node exists at `path`.
    pub fn contains(&self, path: &TreePath) -> bool {
        self.get(path).is_some()
    }

    /// Leaf value at `path`.
    pub fn text(&self, path: &TreePath) -> Option<&str> {
        self.get(path).and_then(|n| n.text.as_deref())
    }

    /// Set a leaf (or presence node when `text` is `None`), creating
    /// intermediate containers.
    pub fn set(&mut self, path: &TreePath, text: Option<String>) {
        if let Some(node) = ensure(&mut self.nodes, path.segments())
            && text.is_some()
        {
            node.text = text;
        }
    }

    /// Builder form of [`ConfigTree::set`].
    #[must_use]
    pub fn with(mut self, path: &TreePath, text: impl Into<String>) -> Self {
        self.set(path, Some(text.into()));
        self
    }

    /// Return a new tree with `directive` applied.
    pub fn apply(&self, directive: &Directive) -> Result<ConfigTree, TreeError> {
        let mut next = self.clone();
        next.apply_in_place(directive)?;
        Ok(next)
    }

    /// Return a new tree with every directive applied in order.
    pub fn apply_all<'a>(
        &self,
        directives: impl IntoIterator<Item = &'a Directive>,
    ) -> Result<ConfigTree, TreeError> {
        let mut next = self.clone();
        for directive in directives {
            next.apply_in_place(directive)?;
        }
        Ok(next)
    }

    fn apply_in_place(&mut self, directive: &Directive) -> Result<(), TreeError> {
        let path = &directive.path;
        if path.is_empty() {
            return Err(TreeError::InvalidPath(String::new()));
        }

        match directive.kind {
            DirectiveKind::SetField => match &directive.payload {
                Payload::Text(text) => {
                    self.set(path, Some(text.clone()));
                    Ok(())
                }
                _ => Err(TreeError::MissingPayload(path.to_string())),
            },
            DirectiveKind::CreateSubtree => {
                if self.contains(path) {
                    return Err(TreeError::AlreadyExists(path.to_string()));
                }
                let Some(node) = ensure(&mut self.nodes, path.segments()) else {
                    return Err(TreeError::InvalidPath(path.to_string()));
                };
                match &directive.payload {
                    Payload::None => {}
                    Payload::Text(text) => node.text = Some(text.clone()),
                    Payload::Subtree(children) => node.children.clone_from(children),
                }
                Ok(())
            }
            DirectiveKind::DeleteSubtree => {
                if remove(&mut self.nodes, path.segments()) {
                    Ok(())
                } else {
                    Err(TreeError::NotFound(path.to_string()))
                }
            }
        }
    }

    /// Flatten into sorted `path = value` lines (presence nodes without a
    /// value), for display and textual diffs.
    pub fn lines(&self) -> Vec<String> {
        let mut out = Vec::new();
        for node in &self.nodes {
            collect_lines(node, &TreePath::default(), &mut out);
        }
        out.sort();
        out
    }
}

fn collect_lines(node: &Node, parent: &TreePath, out: &mut Vec<String>) {
    let path = TreePath::new(
        parent
            .segments()
            .iter()
            .cloned()
            .chain(std::iter::once(node.segment()))
            .collect(),
    );
    match (&node.text, node.children.is_empty()) {
        (Some(text), _) => out.push(format!("{path} = {text}")),
        (None, true) => out.push(path.to_string()),
        (None, false) => {}
    }
    for child in &node.children {
        collect_lines(child, &path, out);
    }
}

fn ensure<'a>(nodes: &'a mut Vec<Node>, segments: &[PathSegment]) -> Option<&'a mut Node> {
    let (first, rest) = segments.split_first()?;
    let index = match nodes.iter().position(|n| n.matches(first)) {
        Some(index) => index,
        None => {
            nodes.push(Node {
                name: first.name.clone(),
                key: first.key.clone(),
                ..Default::default()
            });
            nodes.len() - 1
        }
    };
    if rest.is_empty() {
        Some(&mut nodes[index])
    } else {
        ensure(&mut nodes[index].children, rest)
    }
}

fn remove(nodes: &mut Vec<Node>, segments: &[PathSegment]) -> bool {
    let Some((first, rest)) = segments.split_first() else {
        return false;
    };
    let Some(index) = nodes.iter().position(|n| n.matches(first)) else {
        return false;
    };
    if rest.is_empty() {
        nodes.remove(index);
        true
    } else {
        remove(&mut nodes[index].children, rest)
    }
}
