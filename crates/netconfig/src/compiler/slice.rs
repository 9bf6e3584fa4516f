//! L2 and L3 slice connection points.
//!
//! A connection point joins several shared groups at once: its interface
//! (tagging container), and either its VLAN/VNI containers (L2) or the
//! slice's routing instance (L3). L3 connection points also carry BGP
//! neighbours, static routes and a VRRP group.

use super::lag::{self, LagRequest};
use super::{CompileResult, Emitter, insufficient, qos, route, unsupported};
use crate::directive::Stage;
use crate::group::{GroupKey, Verdict};
use crate::model::{
    CpSpec, DesiredChange, Operation, PersistedState, PortMode, ServiceType, StaticRouteRecord, VlanIfRecord,
    VrfSpec, effective, nested_op,
};
use crate::paths;
use crate::tree::TreePath;
use std::collections::BTreeSet;

/// A connection point resolved against persisted state.
struct CpPlan<'c, 's> {
    spec: &'c CpSpec,
    op: Operation,
    record: Option<&'s VlanIfRecord>,
    removed_routes: Vec<StaticRouteRecord>,
}

/// Container groups an L2 or L3 binding belongs to, besides its interface.
fn container_keys(record: &VlanIfRecord) -> Vec<GroupKey> {
    if record.is_l3() {
        return vec![GroupKey::Vrf(record.slice_name.clone())];
    }
    let mut keys = vec![GroupKey::Vlan(record.vlan_id)];
    if let Some(vni) = record.vni {
        keys.push(GroupKey::VniVlan {
            vni,
            vlan: record.vlan_id,
        });
        keys.push(GroupKey::Vni(vni));
    }
    keys
}

/// Groups a new binding joins.
fn binding_keys(change: &DesiredChange, cp: &CpSpec) -> Vec<GroupKey> {
    let mut keys = vec![GroupKey::Interface(cp.if_name.clone())];
    if change.service == ServiceType::L3Slice {
        keys.push(GroupKey::Vrf(change.slice().to_string()));
    } else {
        keys.push(GroupKey::Vlan(cp.vlan_id));
        if let Some(vni) = cp.vni {
            keys.push(GroupKey::VniVlan { vni, vlan: cp.vlan_id });
            keys.push(GroupKey::Vni(vni));
        }
    }
    keys
}

fn vrf_name(state: &PersistedState, change: &DesiredChange) -> CompileResult<String> {
    change
        .vrf
        .as_ref()
        .map(|v| v.vrf_name.clone())
        .or_else(|| state.vrf(change.slice()).map(|v| v.vrf_name.clone()))
        .ok_or_else(|| insufficient(format!("slice {} has no routing instance", change.slice())))
}

fn vrf_leaves(spec: &VrfSpec) -> Vec<(TreePath, Option<String>)> {
    let mut leaves = vec![
        (paths::of(&["instance-type"]), Some("vrf".to_string())),
        (paths::of(&["route-distinguisher"]), Some(spec.rd.clone())),
        (paths::of(&["vrf-target"]), Some(spec.rt.clone())),
    ];
    if let Some(vni) = spec.l3_vni {
        leaves.push((
            paths::of(&["protocols", "evpn", "ip-prefix-routes", "vni"]),
            Some(vni.to_string()),
        ));
    }
    leaves
}

pub(crate) fn validate_slice(change: &DesiredChange, _state: &PersistedState, op: Operation) -> CompileResult<()> {
    if change.slice().is_empty() {
        return Err(insufficient("slice_name"));
    }
    if change.equipment.is_some() || !change.internal_links.is_empty() || !change.acls.is_empty() {
        return Err(unsupported("slice changes carry connection points and lags only"));
    }

    let l2 = change.service == ServiceType::L2Slice;
    if l2 && change.vrf.is_some() {
        return Err(unsupported("an L2 slice has no routing instance"));
    }
    for cp in &change.cps {
        let l3_only = cp.ipv4.is_some()
            || cp.ipv6.is_some()
            || !cp.bgp.is_empty()
            || !cp.static_routes.is_empty()
            || cp.vrrp.is_some();
        if l2 && l3_only {
            return Err(unsupported(format!(
                "{}.{}: L3 settings on an L2 slice",
                cp.if_name, cp.vlan_id
            )));
        }
        if op == Operation::Replace
            && (l3_only || cp.mtu.is_some() || cp.vni.is_some() || cp.port_mode.is_some())
        {
            return Err(unsupported(format!(
                "{}.{}: replace only changes QoS and lag membership",
                cp.if_name, cp.vlan_id
            )));
        }
    }
    Ok(())
}

pub(crate) fn compile_slice(em: &mut Emitter<'_>, change: &DesiredChange) -> CompileResult<()> {
    let state = em.state;
    let request = em.operation;
    let slice = change.slice();

    let lags: Vec<LagRequest> = change
        .lags
        .iter()
        .map(|spec| LagRequest::from_spec(spec, request, state))
        .collect();

    let mut plans = Vec::with_capacity(change.cps.len());
    for cp in &change.cps {
        let op = effective(cp.operation, request);
        let record = state.vlan_if(&cp.if_name, cp.vlan_id);

        if let Some(record) = record {
            if record.slice_name != slice {
                return Err(unsupported(format!(
                    "{} belongs to slice {}",
                    record.unit_name(),
                    record.slice_name
                )));
            }
            if record.service != change.service {
                return Err(unsupported(format!(
                    "{} is a {} binding",
                    record.unit_name(),
                    record.service
                )));
            }
        }

        let mut removed_routes = Vec::new();
        match (op, record) {
            (Operation::Delete, None) => {
                return Err(insufficient(format!(
                    "connection point {}.{} does not exist",
                    cp.if_name, cp.vlan_id
                )));
            }
            (Operation::Delete, Some(record)) => {
                em.ledger.remove(GroupKey::Interface(record.if_name.clone()));
                for key in container_keys(record) {
                    em.ledger.remove(key);
                }
                for attachment in state
                    .static_routes
                    .iter()
                    .filter(|r| r.if_name == record.if_name && r.vlan_id == record.vlan_id)
                {
                    route::count_removal(em, attachment);
                    removed_routes.push(attachment.clone());
                }
            }
            (_, None) if request != Operation::Merge => {
                return Err(insufficient(format!(
                    "connection point {}.{} does not exist",
                    cp.if_name, cp.vlan_id
                )));
            }
            (_, record) => {
                if op == Operation::Merge && record.is_none() {
                    for key in binding_keys(change, cp) {
                        em.ledger.expect(key);
                    }
                }
                for spec in &cp.static_routes {
                    if nested_op(op, request, spec.operation) != Operation::Delete {
                        if change.service == ServiceType::L3Slice {
                            route::count_addition(em, slice, cp, spec);
                        }
                        continue;
                    }
                    let Some(record) = record else {
                        return Err(insufficient(format!(
                            "connection point {}.{} has no static routes",
                            cp.if_name, cp.vlan_id
                        )));
                    };
                    let attachment = route::resolve(&state.static_routes, record, spec)?;
                    if !removed_routes.contains(attachment) {
                        route::count_removal(em, attachment);
                        removed_routes.push(attachment.clone());
                    }
                }
            }
        }

        plans.push(CpPlan {
            spec: cp,
            op,
            record,
            removed_routes,
        });
    }

    lag::count_members(em, &lags)?;
    em.ledger.settle()?;

    let deleted = |v: &VlanIfRecord| {
        plans
            .iter()
            .any(|p| p.op == Operation::Delete && p.spec.if_name == v.if_name && p.spec.vlan_id == v.vlan_id)
    };
    let mut in_use: BTreeSet<String> = state
        .vlan_ifs
        .iter()
        .filter(|v| !deleted(v))
        .map(|v| v.if_name.clone())
        .collect();
    in_use.extend(
        plans
            .iter()
            .filter(|p| p.op != Operation::Delete)
            .map(|p| p.spec.if_name.clone()),
    );
    lag::emit(em, &lags, &in_use)?;

    for plan in &plans {
        match plan.op {
            Operation::Delete => emit_removal(em, change, plan)?,
            Operation::Replace => emit_replace(em, plan)?,
            Operation::Merge => emit_merge(em, change, plan)?,
        }
    }

    if request == Operation::Merge {
        emit_vrf_update(em, change)?;
    }
    Ok(())
}

fn emit_removal(em: &mut Emitter<'_>, change: &DesiredChange, plan: &CpPlan<'_, '_>) -> CompileResult<()> {
    let Some(record) = plan.record else {
        return Ok(());
    };
    let state = em.state;
    let slice = change.slice();

    em.delete(Stage::Member, paths::unit(&record.if_name, record.vlan_id));
    let interface_drained = em
        .ledger
        .is_drained(&GroupKey::Interface(record.if_name.clone()));
    if interface_drained {
        em.delete(Stage::Container, paths::vlan_tagging(&record.if_name));
    }

    if record.is_l3() {
        let vrf = vrf_name(state, change)?;
        if em.ledger.is_drained(&GroupKey::Vrf(slice.to_string())) {
            em.delete(Stage::Container, paths::instance(&vrf));
        } else {
            em.delete(Stage::Member, paths::instance_interface(&vrf, &record.unit_name()));
        }
        for peer in state
            .bgp_peers
            .iter()
            .filter(|b| b.if_name == record.if_name && b.vlan_id == record.vlan_id)
        {
            em.delete(Stage::RoutingProtocol, paths::bgp_neighbor(&vrf, slice, &peer.remote_ip));
        }
        for attachment in &plan.removed_routes {
            route::emit_removal(em, &vrf, attachment);
        }
    } else {
        for key in container_keys(record) {
            if !em.ledger.is_drained(&key) {
                continue;
            }
            let path = match key {
                GroupKey::Vlan(vlan) => paths::vlan(vlan),
                GroupKey::VniVlan { vlan, .. } => paths::vlan_vxlan(vlan),
                GroupKey::Vni(vni) => paths::evpn_vni(vni),
                _ => continue,
            };
            em.delete(Stage::Container, path);
        }
    }

    qos::emit_removal(em, record, interface_drained);
    Ok(())
}

fn emit_replace(em: &mut Emitter<'_>, plan: &CpPlan<'_, '_>) -> CompileResult<()> {
    let Some(record) = plan.record else {
        return Err(insufficient(format!(
            "connection point {}.{} does not exist",
            plan.spec.if_name, plan.spec.vlan_id
        )));
    };
    if let Some(spec) = &plan.spec.qos {
        qos::emit_replace(em, record, spec)?;
    }
    Ok(())
}

fn emit_merge(em: &mut Emitter<'_>, change: &DesiredChange, plan: &CpPlan<'_, '_>) -> CompileResult<()> {
    // Merge-tagged CPs inside a delete request keep their binding
    if em.operation != Operation::Delete {
        match plan.record {
            None => emit_new_binding(em, change, plan.spec)?,
            Some(record) => emit_binding_update(em, change, plan.spec, record)?,
        }
    }
    if change.service == ServiceType::L3Slice {
        emit_l3_details(em, change, plan)?;
    }
    Ok(())
}

fn emit_new_binding(em: &mut Emitter<'_>, change: &DesiredChange, cp: &CpSpec) -> CompileResult<()> {
    let unit = paths::unit(&cp.if_name, cp.vlan_id);
    let unit_name = format!("{}.{}", cp.if_name, cp.vlan_id);

    if em.ledger.join(GroupKey::Interface(cp.if_name.clone())) == Verdict::FirstOfGroup {
        em.create(Stage::Container, paths::vlan_tagging(&cp.if_name), Vec::new());
    }

    let mut leaves = vec![(paths::of(&["vlan-id"]), Some(cp.vlan_id.to_string()))];
    if change.service == ServiceType::L3Slice {
        if cp.ipv4.is_none() && cp.ipv6.is_none() {
            return Err(insufficient(format!("{unit_name}: L3 binding needs an address")));
        }
        let vrf = vrf_name(em.state, change)?;
        if em.ledger.join(GroupKey::Vrf(change.slice().to_string())) == Verdict::FirstOfGroup {
            let Some(spec) = &change.vrf else {
                return Err(insufficient(format!("slice {} needs a vrf", change.slice())));
            };
            em.create(Stage::Container, paths::instance(&vrf), vrf_leaves(spec));
        }
        if let Some(address) = &cp.ipv4 {
            leaves.push((paths::of(&["family", "inet", "address"]), Some(address.to_string())));
        }
        if let Some(address) = &cp.ipv6 {
            leaves.push((paths::of(&["family", "inet6", "address"]), Some(address.to_string())));
        }
        if let Some(mtu) = cp.mtu {
            leaves.push((paths::of(&["mtu"]), Some(mtu.to_string())));
        }
        em.create(Stage::Member, unit, leaves);
        em.create(Stage::Member, paths::instance_interface(&vrf, &unit_name), Vec::new());
    } else {
        if em.ledger.join(GroupKey::Vlan(cp.vlan_id)) == Verdict::FirstOfGroup {
            em.create(
                Stage::Container,
                paths::vlan(cp.vlan_id),
                vec![(paths::of(&["vlan-id"]), Some(cp.vlan_id.to_string()))],
            );
        }
        if let Some(vni) = cp.vni {
            if em.ledger.join(GroupKey::VniVlan { vni, vlan: cp.vlan_id }) == Verdict::FirstOfGroup {
                em.create(
                    Stage::Container,
                    paths::vlan_vxlan(cp.vlan_id),
                    vec![(paths::of(&["vni"]), Some(vni.to_string()))],
                );
            }
            if em.ledger.join(GroupKey::Vni(vni)) == Verdict::FirstOfGroup {
                em.create(Stage::Container, paths::evpn_vni(vni), Vec::new());
            }
        }
        let mode = cp.port_mode.unwrap_or_default();
        leaves.push((
            paths::of(&["family", "ethernet-switching", "interface-mode"]),
            Some(mode.as_str().to_string()),
        ));
        leaves.push((
            paths::of(&["family", "ethernet-switching", "vlan-members"]),
            Some(cp.vlan_id.to_string()),
        ));
        if let Some(mtu) = cp.mtu {
            leaves.push((paths::of(&["mtu"]), Some(mtu.to_string())));
        }
        em.create(Stage::Member, unit, leaves);
    }

    if let Some(spec) = &cp.qos {
        qos::emit_new(em, &cp.if_name, cp.vlan_id, &spec.settings);
    }
    Ok(())
}

fn emit_binding_update(
    em: &mut Emitter<'_>,
    change: &DesiredChange,
    cp: &CpSpec,
    record: &VlanIfRecord,
) -> CompileResult<()> {
    // Already a member of every group; recorded so callers see the verdicts
    em.ledger.join(GroupKey::Interface(record.if_name.clone()));
    for key in container_keys(record) {
        em.ledger.join(key);
    }

    if cp.vni.is_some() && cp.vni != record.vni {
        return Err(unsupported(format!(
            "{}: changing the vni needs a delete and a new binding",
            record.unit_name()
        )));
    }

    let unit = paths::unit(&record.if_name, record.vlan_id);
    em.set(Stage::Member, unit.child("vlan-id"), record.vlan_id.to_string());
    if change.service == ServiceType::L3Slice {
        if let Some(address) = &cp.ipv4 {
            em.set(Stage::Member, unit.join(&paths::of(&["family", "inet", "address"])), address.to_string());
        }
        if let Some(address) = &cp.ipv6 {
            em.set(Stage::Member, unit.join(&paths::of(&["family", "inet6", "address"])), address.to_string());
        }
    } else if let Some(mode) = cp.port_mode {
        em.set(
            Stage::Member,
            unit.join(&paths::of(&["family", "ethernet-switching", "interface-mode"])),
            PortMode::as_str(&mode),
        );
    }
    if let Some(mtu) = cp.mtu {
        em.set(Stage::Member, unit.child("mtu"), mtu.to_string());
    }
    if let Some(spec) = &cp.qos {
        qos::emit_update(em, &record.if_name, record.vlan_id, &spec.settings);
    }
    Ok(())
}

fn emit_l3_details(em: &mut Emitter<'_>, change: &DesiredChange, plan: &CpPlan<'_, '_>) -> CompileResult<()> {
    let cp = plan.spec;
    let state = em.state;
    let request = em.operation;
    let slice = change.slice();
    let unit_name = format!("{}.{}", cp.if_name, cp.vlan_id);

    if cp.bgp.is_empty() && cp.static_routes.is_empty() && cp.vrrp.is_none() {
        return Ok(());
    }
    let vrf = vrf_name(state, change)?;

    for bgp in &cp.bgp {
        let path = paths::bgp_neighbor(&vrf, slice, &bgp.remote_ip);
        let existing = state
            .bgp_peers
            .iter()
            .find(|b| b.if_name == cp.if_name && b.vlan_id == cp.vlan_id && b.remote_ip == bgp.remote_ip);

        match (nested_op(plan.op, request, bgp.operation), existing) {
            (Operation::Delete, None) => {
                return Err(insufficient(format!(
                    "{unit_name} has no bgp neighbour {}",
                    bgp.remote_ip
                )));
            }
            (Operation::Delete, Some(_)) => em.delete(Stage::RoutingProtocol, path),
            (_, Some(_)) => {
                if let Some(remote_as) = bgp.remote_as {
                    em.set(Stage::RoutingProtocol, path.child("peer-as"), remote_as.to_string());
                }
                if let Some(local_ip) = &bgp.local_ip {
                    em.set(Stage::RoutingProtocol, path.child("local-address"), local_ip);
                }
            }
            (_, None) => {
                let Some(remote_as) = bgp.remote_as else {
                    return Err(insufficient(format!("bgp neighbour {} needs remote_as", bgp.remote_ip)));
                };
                let mut leaves = vec![(paths::of(&["peer-as"]), Some(remote_as.to_string()))];
                if let Some(local_ip) = &bgp.local_ip {
                    leaves.push((paths::of(&["local-address"]), Some(local_ip.clone())));
                }
                em.create(Stage::RoutingProtocol, path, leaves);
            }
        }
    }

    for spec in &cp.static_routes {
        if nested_op(plan.op, request, spec.operation) != Operation::Delete {
            route::emit_addition(em, &vrf, slice, &cp.if_name, cp.vlan_id, spec)?;
        }
    }
    for attachment in &plan.removed_routes {
        route::emit_removal(em, &vrf, attachment);
    }

    if let Some(vrrp) = &cp.vrrp {
        let path = paths::vrrp_group(&cp.if_name, cp.vlan_id, vrrp.group_id);
        let existing = state.vrrp_groups.iter().find(|v| {
            v.if_name == cp.if_name && v.vlan_id == cp.vlan_id && v.group_id == vrrp.group_id
        });
        match (nested_op(plan.op, request, vrrp.operation), existing) {
            (Operation::Delete, None) => {
                return Err(insufficient(format!(
                    "{unit_name} has no vrrp group {}",
                    vrrp.group_id
                )));
            }
            (Operation::Delete, Some(_)) => em.delete(Stage::RoutingProtocol, path),
            (_, Some(_)) => {
                if let Some(address) = &vrrp.virtual_address {
                    em.set(Stage::RoutingProtocol, path.child("virtual-address"), address);
                }
                if let Some(priority) = vrrp.priority {
                    em.set(Stage::RoutingProtocol, path.child("priority"), priority.to_string());
                }
            }
            (_, None) => {
                let Some(address) = &vrrp.virtual_address else {
                    return Err(insufficient(format!("vrrp group {} needs a virtual address", vrrp.group_id)));
                };
                let mut leaves = vec![(paths::of(&["virtual-address"]), Some(address.clone()))];
                if let Some(priority) = vrrp.priority {
                    leaves.push((paths::of(&["priority"]), Some(priority.to_string())));
                }
                em.create(Stage::RoutingProtocol, path, leaves);
            }
        }
    }
    Ok(())
}

fn emit_vrf_update(em: &mut Emitter<'_>, change: &DesiredChange) -> CompileResult<()> {
    let (Some(spec), Some(existing)) = (&change.vrf, em.state.vrf(change.slice())) else {
        return Ok(());
    };
    if spec.vrf_name != existing.vrf_name {
        return Err(unsupported(format!(
            "slice {} already uses routing instance {}",
            change.slice(),
            existing.vrf_name
        )));
    }
    let instance = paths::instance(&spec.vrf_name);
    em.set(Stage::Container, instance.child("route-distinguisher"), &spec.rd);
    em.set(Stage::Container, instance.child("vrf-target"), &spec.rt);
    if let Some(vni) = spec.l3_vni {
        em.set(
            Stage::Container,
            instance.join(&paths::of(&["protocols", "evpn", "ip-prefix-routes", "vni"])),
            vni.to_string(),
        );
    }
    Ok(())
}
