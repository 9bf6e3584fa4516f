//! Packet filters and their unit bindings.

use super::{CompileResult, Emitter, insufficient, unsupported};
use crate::directive::Stage;
use crate::model::{AclSpec, AclTerm, DesiredChange, Operation, PersistedState, effective};
use crate::paths;
use crate::tree::TreePath;

fn term_leaves(term: &AclTerm) -> Vec<(TreePath, Option<String>)> {
    let base = paths::of(&[]).keyed("term", &term.name);
    let mut leaves = Vec::new();
    if let Some(source) = &term.source {
        leaves.push((base.child("source-address"), Some(source.clone())));
    }
    if let Some(destination) = &term.destination {
        leaves.push((base.child("destination-address"), Some(destination.clone())));
    }
    if let Some(protocol) = &term.protocol {
        leaves.push((base.child("protocol"), Some(protocol.clone())));
    }
    leaves.push((base.child("action"), Some(term.action.clone())));
    leaves
}

/// Emit filter directives. Shared by the ACL service and node recovery.
pub(crate) fn emit(em: &mut Emitter<'_>, acls: &[AclSpec]) -> CompileResult<()> {
    let state = em.state;

    for spec in acls {
        let existing = state.acls.iter().find(|a| a.filter_name == spec.filter_name);
        match (effective(spec.operation, em.operation), existing) {
            (Operation::Delete, None) => {
                return Err(insufficient(format!("filter {} does not exist", spec.filter_name)));
            }
            (Operation::Delete, Some(record)) => {
                if let (Some(if_name), Some(vlan_id)) = (&record.if_name, record.vlan_id) {
                    em.delete(Stage::Filter, paths::filter_binding(if_name, vlan_id));
                }
                em.delete(Stage::Filter, paths::filter(&spec.filter_name));
            }
            (Operation::Replace, _) => {
                return Err(unsupported("replace is not supported for filters"));
            }
            (Operation::Merge, None) => {
                if spec.terms.is_empty() {
                    return Err(insufficient(format!("filter {} has no terms", spec.filter_name)));
                }
                let leaves = spec.terms.iter().flat_map(term_leaves).collect();
                em.create(Stage::Filter, paths::filter(&spec.filter_name), leaves);
            }
            (Operation::Merge, Some(_)) => {
                for term in &spec.terms {
                    for (relative, value) in term_leaves(term) {
                        if let Some(value) = value {
                            em.set(Stage::Filter, paths::filter(&spec.filter_name).join(&relative), value);
                        }
                    }
                }
            }
        }

        if effective(spec.operation, em.operation) == Operation::Merge
            && let (Some(if_name), Some(vlan_id)) = (&spec.if_name, spec.vlan_id)
        {
            em.set(Stage::Filter, paths::filter_binding(if_name, vlan_id), &spec.filter_name);
        }
    }
    Ok(())
}

pub(crate) fn validate_acl(change: &DesiredChange, _state: &PersistedState, op: Operation) -> CompileResult<()> {
    if change.acls.is_empty() {
        return Err(insufficient("acl change without filters"));
    }
    if op == Operation::Replace {
        return Err(unsupported("replace is not supported for filters"));
    }
    for spec in &change.acls {
        if spec.if_name.is_some() != spec.vlan_id.is_some() {
            return Err(insufficient(format!(
                "filter {} binding needs both if_name and vlan_id",
                spec.filter_name
            )));
        }
    }
    Ok(())
}

pub(crate) fn compile_acl(em: &mut Emitter<'_>, change: &DesiredChange) -> CompileResult<()> {
    emit(em, &change.acls)
}
