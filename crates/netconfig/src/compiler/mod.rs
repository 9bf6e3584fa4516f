//! Directive compiler.
//!
//! [`compile`] is a pure function of a desired change, the device's persisted
//! state and the request operation. It either returns every directive the
//! change needs, ordered by stage, or fails without producing any.
//!
//! Each service type has a [`Strategy`]: a fixed template (node services
//! only), a variable compiler and a validator. Shared containers go through
//! the [`GroupLedger`] so they are created on their first member and removed
//! with their last.
//!
//! Delete-capable compilers run in two passes. The first counts every member
//! the request removes, [`GroupLedger::settle`] turns the counts into drain
//! verdicts, and the second pass emits directives.

mod acl;
mod fabric;
mod lag;
mod qos;
mod route;
mod slice;

use crate::directive::{Directive, DirectiveBatch, Stage};
use crate::error::CompileError;
use crate::group::{GroupDecision, GroupLedger};
use crate::model::{DesiredChange, Operation, PersistedState, ServiceType};
use crate::tree::{ConfigTree, Node, TreePath};

/// Result type of the compiler.
pub type CompileResult<T> = std::result::Result<T, CompileError>;

/// Compiler output.
#[derive(Debug, Clone)]
pub struct Compiled {
    /// Ordered directives
    pub batch: DirectiveBatch,
    /// Group verdicts behind the container directives
    pub groups: Vec<GroupDecision>,
}

/// Per-service compilation entry.
#[derive(Clone, Copy)]
pub struct Strategy {
    /// Leaves every node of this service carries regardless of variables
    pub fixed_template: fn() -> Vec<(TreePath, &'static str)>,
    /// Emit directives for a change
    pub compile: fn(&mut Emitter<'_>, &DesiredChange) -> CompileResult<()>,
    /// Reject changes the service cannot express
    pub validate: fn(&DesiredChange, &PersistedState, Operation) -> CompileResult<()>,
}

fn no_template() -> Vec<(TreePath, &'static str)> {
    Vec::new()
}

impl ServiceType {
    /// Compilation strategy of this service type.
    pub fn strategy(&self) -> Strategy {
        match self {
            ServiceType::Spine => Strategy {
                fixed_template: fabric::spine_template,
                compile: fabric::compile_node,
                validate: fabric::validate_node,
            },
            ServiceType::Leaf => Strategy {
                fixed_template: fabric::leaf_template,
                compile: fabric::compile_node,
                validate: fabric::validate_node,
            },
            ServiceType::InternalLink => Strategy {
                fixed_template: no_template,
                compile: fabric::compile_internal_links,
                validate: fabric::validate_internal_links,
            },
            ServiceType::CeLag => Strategy {
                fixed_template: no_template,
                compile: lag::compile_ce_lag,
                validate: lag::validate_ce_lag,
            },
            ServiceType::L2Slice | ServiceType::L3Slice => Strategy {
                fixed_template: no_template,
                compile: slice::compile_slice,
                validate: slice::validate_slice,
            },
            ServiceType::Acl => Strategy {
                fixed_template: no_template,
                compile: acl::compile_acl,
                validate: acl::validate_acl,
            },
        }
    }
}

/// Compile `change` against `state` for `operation`.
pub fn compile(change: &DesiredChange, state: &PersistedState, operation: Operation) -> CompileResult<Compiled> {
    let strategy = change.service.strategy();
    (strategy.validate)(change, state, operation)?;

    let mut emitter = Emitter::new(state, operation, (strategy.fixed_template)());
    (strategy.compile)(&mut emitter, change)?;

    let batch = DirectiveBatch::new(change.service, operation, emitter.directives);
    log::debug!(
        "Compiled {} {} for {}: {} directives",
        operation,
        change.service,
        change.device,
        batch.len()
    );
    Ok(Compiled {
        batch,
        groups: emitter.ledger.into_decisions(),
    })
}

/// Directive sink shared by the service compilers.
pub struct Emitter<'a> {
    pub(crate) state: &'a PersistedState,
    pub(crate) operation: Operation,
    pub(crate) template: Vec<(TreePath, &'static str)>,
    pub(crate) ledger: GroupLedger,
    directives: Vec<Directive>,
}

impl<'a> Emitter<'a> {
    fn new(state: &'a PersistedState, operation: Operation, template: Vec<(TreePath, &'static str)>) -> Self {
        Self {
            state,
            operation,
            template,
            ledger: GroupLedger::from_state(state),
            directives: Vec::new(),
        }
    }

    pub(crate) fn set(&mut self, stage: Stage, path: TreePath, value: impl Into<String>) {
        self.directives.push(Directive::set(stage, path, value));
    }

    pub(crate) fn create(&mut self, stage: Stage, path: TreePath, leaves: Vec<(TreePath, Option<String>)>) {
        self.directives.push(Directive::create(stage, path, subtree(leaves)));
    }

    pub(crate) fn delete(&mut self, stage: Stage, path: TreePath) {
        self.directives.push(Directive::delete(stage, path));
    }
}

/// Children built from relative leaf paths. `None` marks a presence node.
pub(crate) fn subtree(leaves: Vec<(TreePath, Option<String>)>) -> Vec<Node> {
    let mut tree = ConfigTree::default();
    for (path, value) in leaves {
        tree.set(&path, value);
    }
    tree.into_nodes()
}

pub(crate) fn insufficient(message: impl Into<String>) -> CompileError {
    CompileError::InsufficientData(message.into())
}

pub(crate) fn unsupported(message: impl Into<String>) -> CompileError {
    CompileError::UnsupportedOperation(message.into())
}

#[cfg(test)]
mod tests;
