//! LAG bonds: customer-edge LAG service and LAGs declared inline by slices
//! and fabric links.
//!
//! A bond is a shared container whose group members are its member ports.

use super::{CompileResult, Emitter, insufficient, unsupported};
use crate::directive::Stage;
use crate::group::{GroupKey, Verdict};
use crate::model::{DesiredChange, LagSpec, Operation, PersistedState, effective, nested_op};
use crate::paths;
use std::collections::BTreeSet;

/// One bond touched by a request, with resolved member operations.
#[derive(Debug, Clone)]
pub(crate) struct LagRequest {
    pub name: String,
    pub op: Operation,
    pub minimum_links: Option<u32>,
    pub link_speed: Option<String>,
    pub members: Vec<(String, Operation)>,
}

impl LagRequest {
    /// Resolve a LAG element. A delete without members removes every
    /// persisted member.
    pub fn from_spec(spec: &LagSpec, request: Operation, state: &PersistedState) -> Self {
        let op = effective(spec.operation, request);
        let members = if op == Operation::Delete && spec.members.is_empty() {
            state
                .lag(&spec.lag_name)
                .map(|lag| {
                    lag.members
                        .iter()
                        .map(|m| (m.clone(), Operation::Delete))
                        .collect()
                })
                .unwrap_or_default()
        } else {
            spec.members
                .iter()
                .map(|m| (m.if_name.clone(), nested_op(op, request, m.operation)))
                .collect()
        };
        Self {
            name: spec.lag_name.clone(),
            op,
            minimum_links: spec.minimum_links,
            link_speed: spec.link_speed.clone(),
            members,
        }
    }

    fn removed(&self) -> impl Iterator<Item = &str> {
        self.members
            .iter()
            .filter(|(_, op)| *op == Operation::Delete)
            .map(|(m, _)| m.as_str())
    }

    fn added(&self) -> impl Iterator<Item = &str> {
        self.members
            .iter()
            .filter(|(_, op)| *op != Operation::Delete)
            .map(|(m, _)| m.as_str())
    }
}

/// First pass: count member removals and announce new members.
pub(crate) fn count_members(em: &mut Emitter<'_>, lags: &[LagRequest]) -> CompileResult<()> {
    let state = em.state;
    for lag in lags {
        let record = state.lag(&lag.name);
        for member in lag.added() {
            if record.is_none_or(|r| !r.members.iter().any(|m| m == member)) {
                em.ledger.expect(GroupKey::Bond(lag.name.clone()));
            }
        }

        let removing = lag.removed().count() > 0 || lag.op == Operation::Delete;
        if !removing {
            continue;
        }
        let Some(record) = record else {
            return Err(insufficient(format!("lag {} does not exist", lag.name)));
        };
        for member in lag.removed() {
            if !record.members.iter().any(|m| m == member) {
                return Err(insufficient(format!("{member} is not a member of {}", lag.name)));
            }
            em.ledger.remove(GroupKey::Bond(lag.name.clone()));
        }
    }
    Ok(())
}

/// Second pass: emit bond and membership directives.
///
/// `in_use` lists interfaces that still carry connection points once the
/// request is applied; a bond among them cannot be drained.
pub(crate) fn emit(em: &mut Emitter<'_>, lags: &[LagRequest], in_use: &BTreeSet<String>) -> CompileResult<()> {
    let state = em.state;
    for lag in lags {
        let record = state.lag(&lag.name);
        let key = GroupKey::Bond(lag.name.clone());

        for member in lag.removed() {
            em.delete(Stage::BondMember, paths::bond_membership(member));
        }
        if em.ledger.is_drained(&key) {
            if em.operation == Operation::Replace {
                return Err(unsupported(format!(
                    "replace cannot remove every member of {}; delete the lag instead",
                    lag.name
                )));
            }
            if in_use.contains(&lag.name) {
                return Err(unsupported(format!(
                    "lag {} still carries connection points",
                    lag.name
                )));
            }
            log::debug!("Bond {} drained, removing it", lag.name);
            em.delete(Stage::Bond, paths::interface(&lag.name));
            continue;
        }
        if lag.op == Operation::Delete {
            continue;
        }

        match record {
            None if em.operation == Operation::Replace => {
                return Err(insufficient(format!("lag {} does not exist", lag.name)));
            }
            None if lag.added().next().is_none() => {
                return Err(insufficient(format!("lag {} has no members", lag.name)));
            }
            Some(_) => {
                if let Some(links) = lag.minimum_links {
                    em.set(
                        Stage::Bond,
                        paths::bond_options(&lag.name).child("minimum-links"),
                        links.to_string(),
                    );
                }
                if let Some(speed) = &lag.link_speed {
                    em.set(Stage::Bond, paths::bond_options(&lag.name).child("link-speed"), speed);
                }
            }
            None => {}
        }

        let existing: BTreeSet<&str> = record
            .map(|r| r.members.iter().map(String::as_str).collect())
            .unwrap_or_default();
        for member in lag.added() {
            if existing.contains(member) {
                continue;
            }
            if em.ledger.join(key.clone()) == Verdict::FirstOfGroup {
                let mut leaves = vec![(paths::of(&["lacp", "active"]), None)];
                if let Some(links) = lag.minimum_links {
                    leaves.push((paths::of(&["minimum-links"]), Some(links.to_string())));
                }
                if let Some(speed) = &lag.link_speed {
                    leaves.push((paths::of(&["link-speed"]), Some(speed.clone())));
                }
                em.create(Stage::Bond, paths::bond_options(&lag.name), leaves);
            }
            em.create(
                Stage::BondMember,
                paths::bond_membership(member),
                vec![(paths::of(&["bundle"]), Some(lag.name.clone()))],
            );
        }
    }
    Ok(())
}

/// Interfaces carrying connection points in persisted state.
pub(crate) fn interfaces_in_use(state: &PersistedState) -> BTreeSet<String> {
    state.vlan_ifs.iter().map(|v| v.if_name.clone()).collect()
}

pub(crate) fn validate_ce_lag(change: &DesiredChange, _state: &PersistedState, _op: Operation) -> CompileResult<()> {
    if change.lags.is_empty() {
        return Err(insufficient("ce_lag change without lags"));
    }
    if !change.cps.is_empty() || change.equipment.is_some() || !change.internal_links.is_empty() {
        return Err(unsupported("ce_lag changes carry lags only"));
    }
    Ok(())
}

pub(crate) fn compile_ce_lag(em: &mut Emitter<'_>, change: &DesiredChange) -> CompileResult<()> {
    let requests: Vec<LagRequest> = change
        .lags
        .iter()
        .map(|spec| LagRequest::from_spec(spec, em.operation, em.state))
        .collect();

    count_members(em, &requests)?;
    em.ledger.settle()?;
    let in_use = interfaces_in_use(em.state);
    emit(em, &requests, &in_use)
}
