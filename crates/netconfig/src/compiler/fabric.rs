//! Node base configuration (spine/leaf) and fabric links.

use super::lag::{self, LagRequest};
use super::{CompileResult, Emitter, acl, insufficient, unsupported};
use crate::directive::Stage;
use crate::model::{
    DesiredChange, EquipmentSpec, InternalLinkSpec, LinkRecord, Operation, PersistedState, ServiceType,
    effective,
};
use crate::paths;
use crate::tree::TreePath;

fn common_template() -> Vec<(TreePath, &'static str)> {
    vec![
        (paths::of(&["system", "services", "netconf", "ssh", "port"]), "830"),
        (paths::of(&["protocols", "lldp", "port-scope"]), "all"),
        (paths::underlay_group().child("type"), "external"),
        (paths::underlay_group().child("multipath"), "multiple-as"),
    ]
}

pub(crate) fn spine_template() -> Vec<(TreePath, &'static str)> {
    common_template()
}

pub(crate) fn leaf_template() -> Vec<(TreePath, &'static str)> {
    let mut template = common_template();
    template.push((paths::of(&["protocols", "evpn", "encapsulation"]), "vxlan"));
    template.push((paths::of(&["switch-options", "vtep-source-interface"]), "lo0.0"));
    template
}

pub(crate) fn validate_node(change: &DesiredChange, state: &PersistedState, op: Operation) -> CompileResult<()> {
    if !change.cps.is_empty() || change.vrf.is_some() {
        return Err(unsupported("connection points belong to slice services"));
    }
    if let Some(existing) = &state.equipment
        && existing.role != change.service
    {
        return Err(unsupported(format!(
            "device is provisioned as {}, not {}",
            existing.role, change.service
        )));
    }

    match op {
        Operation::Replace => Err(unsupported("replace is not supported for node services")),
        Operation::Delete => {
            if state.equipment.is_none() {
                return Err(insufficient("node is not provisioned"));
            }
            if !state.vlan_ifs.is_empty() {
                return Err(unsupported(format!(
                    "node still carries {} connection points",
                    state.vlan_ifs.len()
                )));
            }
            Ok(())
        }
        Operation::Merge => {
            let Some(spec) = &change.equipment else {
                return Err(insufficient("equipment"));
            };
            if spec.hostname.is_empty() {
                return Err(insufficient("hostname"));
            }
            if change.service == ServiceType::Spine && spec.multi_homing.is_some() {
                return Err(unsupported("multi-homing is a leaf feature"));
            }
            if state.equipment.is_none() {
                for (field, missing) in [
                    ("loopback", spec.loopback.is_none()),
                    ("router_id", spec.router_id.is_none()),
                    ("as_number", spec.as_number.is_none()),
                ] {
                    if missing {
                        return Err(insufficient(field));
                    }
                }
            }
            Ok(())
        }
    }
}

fn emit_equipment(em: &mut Emitter<'_>, spec: &EquipmentSpec) {
    for (path, value) in std::mem::take(&mut em.template) {
        em.set(Stage::Base, path, value);
    }

    em.set(Stage::Base, paths::host_name(), &spec.hostname);
    if let Some(loopback) = &spec.loopback {
        em.set(Stage::Base, paths::loopback_address(), loopback.to_string());
    }
    if let Some(router_id) = &spec.router_id {
        em.set(Stage::Base, paths::router_id(), router_id);
    }
    if let Some(asn) = spec.as_number {
        em.set(Stage::Base, paths::autonomous_system(), asn.to_string());
    }
    if let Some(community) = &spec.snmp_community {
        em.set(Stage::Base, paths::snmp_community(community).child("authorization"), "read-only");
    }
    for server in &spec.ntp_servers {
        em.set(Stage::Base, paths::ntp_server(server).child("version"), "4");
    }
    if let Some(mh) = &spec.multi_homing {
        let base = paths::multi_homing();
        em.set(Stage::Base, base.child("anycast-address"), &mh.anycast_address);
        em.set(Stage::Base, base.child("peer-address"), &mh.peer_address);
        em.set(Stage::Base, base.child("system-mac"), &mh.system_mac);
    }
    for port in &spec.physical_ifs {
        if let Some(speed) = &port.speed {
            em.set(Stage::Base, paths::port_speed(&port.if_name), speed);
        }
    }
}

fn emit_decommission(em: &mut Emitter<'_>) {
    let state = em.state;
    let Some(equipment) = &state.equipment else {
        return;
    };

    em.delete(Stage::Base, paths::host_name());
    if equipment.loopback.is_some() {
        em.delete(Stage::Base, paths::loopback_interface());
    }
    if equipment.router_id.is_some() || equipment.as_number.is_some() {
        em.delete(Stage::Base, paths::of(&["routing-options"]));
    }
    if equipment.snmp_community.is_some() {
        em.delete(Stage::Base, paths::of(&["snmp"]));
    }
    if !equipment.ntp_servers.is_empty() {
        em.delete(Stage::Base, paths::of(&["system", "ntp"]));
    }
    em.delete(Stage::Base, paths::of(&["protocols", "lldp"]));
    em.delete(Stage::Base, paths::underlay_group());
    if equipment.role == ServiceType::Leaf {
        em.delete(Stage::Base, paths::of(&["protocols", "evpn"]));
        em.delete(Stage::Base, paths::of(&["switch-options"]));
    }
    for port in &state.physical_ifs {
        if port.speed.is_some() {
            em.delete(Stage::Base, paths::port_speed(&port.if_name));
        }
    }
}

/// Spine and leaf: base template, variables, links, LAGs and filters.
pub(crate) fn compile_node(em: &mut Emitter<'_>, change: &DesiredChange) -> CompileResult<()> {
    let lags: Vec<LagRequest> = change
        .lags
        .iter()
        .map(|spec| LagRequest::from_spec(spec, em.operation, em.state))
        .collect();

    lag::count_members(em, &lags)?;
    let links = count_link_removals(em, &change.internal_links)?;
    em.ledger.settle()?;

    match em.operation {
        Operation::Delete => emit_decommission(em),
        Operation::Merge | Operation::Replace => {
            if let Some(spec) = &change.equipment {
                emit_equipment(em, spec);
            }
        }
    }

    emit_links(em, &links)?;
    let in_use = lag::interfaces_in_use(em.state);
    lag::emit(em, &lags, &in_use)?;
    acl::emit(em, &change.acls)
}

/// A fabric link resolved against persisted state.
struct LinkPlan<'c> {
    spec: &'c InternalLinkSpec,
    op: Operation,
    is_lag: bool,
    existing: Option<LinkRecord>,
    lag: Option<LagRequest>,
}

fn existing_link(state: &PersistedState, if_name: &str) -> Option<LinkRecord> {
    state
        .physical_ifs
        .iter()
        .find(|p| p.if_name == if_name)
        .and_then(|p| p.link.clone())
        .or_else(|| state.lag(if_name).and_then(|l| l.link.clone()))
}

fn count_link_removals<'c>(
    em: &mut Emitter<'_>,
    specs: &'c [InternalLinkSpec],
) -> CompileResult<Vec<LinkPlan<'c>>> {
    let state = em.state;
    let mut plans = Vec::with_capacity(specs.len());

    for spec in specs {
        let op = effective(spec.operation, em.operation);
        let is_lag = !spec.members.is_empty() || state.lag(&spec.if_name).is_some();
        let existing = existing_link(state, &spec.if_name);

        if op == Operation::Delete && existing.is_none() {
            return Err(insufficient(format!("link {} does not exist", spec.if_name)));
        }

        let lag = is_lag.then(|| {
            let members = if op == Operation::Delete {
                state
                    .lag(&spec.if_name)
                    .map(|l| l.members.iter().map(|m| (m.clone(), Operation::Delete)).collect())
                    .unwrap_or_default()
            } else {
                spec.members.iter().map(|m| (m.clone(), Operation::Merge)).collect()
            };
            LagRequest {
                name: spec.if_name.clone(),
                op,
                minimum_links: spec.minimum_links,
                link_speed: None,
                members,
            }
        });
        if let Some(request) = &lag {
            lag::count_members(em, std::slice::from_ref(request))?;
        }

        plans.push(LinkPlan {
            spec,
            op,
            is_lag,
            existing,
            lag,
        });
    }
    Ok(plans)
}

fn emit_links(em: &mut Emitter<'_>, plans: &[LinkPlan<'_>]) -> CompileResult<()> {
    let in_use = lag::interfaces_in_use(em.state);

    for plan in plans {
        let spec = plan.spec;
        match (plan.op, &plan.existing) {
            (Operation::Delete, Some(link)) => {
                em.delete(Stage::Member, paths::link_unit(&spec.if_name));
                em.delete(Stage::RoutingProtocol, paths::underlay_neighbor(&link.peer_address));
            }
            (Operation::Delete, None) => {}
            (_, existing) => {
                if let Some(request) = &plan.lag {
                    lag::emit(em, std::slice::from_ref(request), &in_use)?;
                }
                match existing {
                    Some(link) => {
                        if let Some(address) = &spec.address {
                            em.set(Stage::Member, paths::link_address(&spec.if_name), address.to_string());
                        }
                        let peer = spec.peer_address.as_deref().unwrap_or(&link.peer_address);
                        if peer != link.peer_address {
                            return Err(unsupported(format!(
                                "link {} changes its peer; delete and recreate it",
                                spec.if_name
                            )));
                        }
                        if let Some(peer_as) = spec.peer_as {
                            em.set(
                                Stage::RoutingProtocol,
                                paths::underlay_neighbor(peer).child("peer-as"),
                                peer_as.to_string(),
                            );
                        }
                    }
                    None => {
                        let (Some(address), Some(peer), Some(peer_as)) =
                            (&spec.address, &spec.peer_address, spec.peer_as)
                        else {
                            return Err(insufficient(format!(
                                "link {} needs address, peer_address and peer_as",
                                spec.if_name
                            )));
                        };
                        em.create(
                            Stage::Member,
                            paths::link_unit(&spec.if_name),
                            vec![(paths::of(&["family", "inet", "address"]), Some(address.to_string()))],
                        );
                        em.create(
                            Stage::RoutingProtocol,
                            paths::underlay_neighbor(peer),
                            vec![(paths::of(&["peer-as"]), Some(peer_as.to_string()))],
                        );
                    }
                }
            }
        }

        if plan.op == Operation::Delete
            && let Some(request) = &plan.lag
        {
            lag::emit(em, std::slice::from_ref(request), &in_use)?;
        }
        log::trace!("Link {} ({}) planned, lag: {}", spec.if_name, plan.op, plan.is_lag);
    }
    Ok(())
}

pub(crate) fn validate_internal_links(
    change: &DesiredChange,
    _state: &PersistedState,
    op: Operation,
) -> CompileResult<()> {
    if change.internal_links.is_empty() {
        return Err(insufficient("internal_link change without links"));
    }
    if op == Operation::Replace {
        return Err(unsupported("replace is not supported for internal links"));
    }
    if !change.cps.is_empty() || change.equipment.is_some() {
        return Err(unsupported("internal_link changes carry links only"));
    }
    Ok(())
}

pub(crate) fn compile_internal_links(em: &mut Emitter<'_>, change: &DesiredChange) -> CompileResult<()> {
    let plans = count_link_removals(em, &change.internal_links)?;
    em.ledger.settle()?;
    emit_links(em, &plans)
}
