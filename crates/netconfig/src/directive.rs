//! Vendor-neutral configuration directives.
//!
//! A [`Directive`] is one change instruction against the configuration tree.
//! The compiler emits them grouped into a [`DirectiveBatch`], which fixes
//! their emission order: every directive carries a [`Stage`], and stages are
//! ranked differently for additions and removals so that a shared container
//! never precedes the members that depend on it.

use crate::model::{Operation, ServiceType};
use crate::tree::{Node, TreePath};
use std::fmt;

/// What a directive does at its path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DirectiveKind {
    /// Set one leaf value, creating intermediates
    SetField,
    /// Create a subtree that must not exist yet
    CreateSubtree,
    /// Delete a subtree that must exist
    DeleteSubtree,
}

/// Directive payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Nothing (deletes, presence nodes)
    None,
    /// Leaf value
    Text(String),
    /// Children of a created subtree
    Subtree(Vec<Node>),
}

/// Ordering class of a directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    /// Node base template and variables
    Base,
    /// LAG bond interface
    Bond,
    /// LAG membership of a physical port
    BondMember,
    /// Shared containers: interface tagging, VLAN, VNI, routing instance
    Container,
    /// Per-member bindings: units and routing-instance interfaces
    Member,
    /// BGP neighbours and VRRP groups
    RoutingProtocol,
    /// Static routes
    StaticRoute,
    /// Class of service
    Qos,
    /// Packet filters and their bindings
    Filter,
}

impl Stage {
    /// Position of this stage in a batch for `operation`.
    pub fn rank(&self, operation: Operation) -> u8 {
        match operation {
            Operation::Merge | Operation::Replace => match self {
                Stage::Base => 0,
                Stage::Bond => 1,
                Stage::BondMember => 2,
                Stage::Container => 3,
                Stage::Member => 4,
                Stage::RoutingProtocol => 5,
                Stage::StaticRoute => 6,
                Stage::Qos => 7,
                Stage::Filter => 8,
            },
            Operation::Delete => match self {
                Stage::Filter => 0,
                Stage::Member => 1,
                Stage::BondMember => 2,
                Stage::Container => 3,
                Stage::Bond => 4,
                Stage::RoutingProtocol => 5,
                Stage::StaticRoute => 6,
                Stage::Qos => 7,
                Stage::Base => 8,
            },
        }
    }
}

/// One configuration change instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    /// Target node
    pub path: TreePath,
    /// Kind
    pub kind: DirectiveKind,
    /// Payload
    pub payload: Payload,
    /// Ordering class
    pub stage: Stage,
}

impl Directive {
    /// Set a leaf.
    pub fn set(stage: Stage, path: TreePath, value: impl Into<String>) -> Self {
        Self {
            path,
            kind: DirectiveKind::SetField,
            payload: Payload::Text(value.into()),
            stage,
        }
    }

    /// Create a subtree with the given children.
    pub fn create(stage: Stage, path: TreePath, children: Vec<Node>) -> Self {
        let payload = if children.is_empty() {
            Payload::None
        } else {
            Payload::Subtree(children)
        };
        Self {
            path,
            kind: DirectiveKind::CreateSubtree,
            payload,
            stage,
        }
    }

    /// Delete a subtree.
    pub fn delete(stage: Stage, path: TreePath) -> Self {
        Self {
            path,
            kind: DirectiveKind::DeleteSubtree,
            payload: Payload::None,
            stage,
        }
    }

    /// Whether this directive only touches a leaf value.
    pub fn is_leaf_update(&self) -> bool {
        self.kind == DirectiveKind::SetField
    }
}

impl fmt::Display for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.kind, &self.payload) {
            (DirectiveKind::SetField, Payload::Text(value)) => write!(f, "set {} = {}", self.path, value),
            (DirectiveKind::SetField, _) => write!(f, "set {}", self.path),
            (DirectiveKind::CreateSubtree, Payload::Subtree(children)) => {
                write!(f, "create {} ({} children)", self.path, children.len())
            }
            (DirectiveKind::CreateSubtree, _) => write!(f, "create {}", self.path),
            (DirectiveKind::DeleteSubtree, _) => write!(f, "delete {}", self.path),
        }
    }
}

/// Ordered directives of one service and operation, sent as one edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectiveBatch {
    /// Service type the batch belongs to
    pub service: ServiceType,
    /// Request operation
    pub operation: Operation,
    /// Directives in emission order
    pub directives: Vec<Directive>,
}

impl DirectiveBatch {
    /// Order directives by stage and drop redundant ones.
    ///
    /// Ordering is stable, so directives of the same stage keep the order the
    /// compiler emitted them in. A delete that lies under an earlier delete
    /// is dropped, as are exact duplicates.
    pub fn new(service: ServiceType, operation: Operation, mut directives: Vec<Directive>) -> Self {
        directives.sort_by_key(|d| d.stage.rank(operation));

        let mut kept: Vec<Directive> = Vec::with_capacity(directives.len());
        for directive in directives {
            if kept.contains(&directive) {
                continue;
            }
            let covered = directive.kind == DirectiveKind::DeleteSubtree
                && kept.iter().any(|k| {
                    k.kind == DirectiveKind::DeleteSubtree && directive.path.starts_with(&k.path)
                });
            if covered {
                log::trace!("Pruned {directive}: covered by an earlier delete");
                continue;
            }
            kept.push(directive);
        }

        Self {
            service,
            operation,
            directives: kept,
        }
    }

    /// Whether the batch changes nothing.
    pub fn is_empty(&self) -> bool {
        self.directives.is_empty()
    }

    /// Number of directives.
    pub fn len(&self) -> usize {
        self.directives.len()
    }

    /// Iterate directives in order.
    pub fn iter(&self) -> std::slice::Iter<'_, Directive> {
        self.directives.iter()
    }
}

impl<'a> IntoIterator for &'a DirectiveBatch {
    type Item = &'a Directive;
    type IntoIter = std::slice::Iter<'a, Directive>;

    fn into_iter(self) -> Self::IntoIter {
        self.directives.iter()
    }
}
