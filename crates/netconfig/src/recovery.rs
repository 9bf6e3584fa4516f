//! Rebuild change requests from persisted state.
//!
//! Recovery turns a snapshot of a device's persisted state into merge
//! requests that, compiled against an empty device, reproduce the same
//! configuration. Interface names go through a rename map so a device can
//! be rebuilt on different hardware.
//!
//! Node recovery yields one change for the base service. Slice recovery
//! yields one change per slice; a slice that cannot be rebuilt is reported
//! and does not stop the others.

use crate::error::{Error, ReconstructError, Result};
use crate::model::{
    AclSpec, BgpSpec, CpSpec, DesiredChange, EquipmentSpec, InternalLinkSpec, LagMemberSpec, LagRecord, LagSpec,
    MultiHomingSpec, PersistedState, PhysicalIfSpec, QosField, QosSettings, QosSpec, ServiceType, StaticRouteSpec,
    VlanIfRecord, VrfSpec, VrrpSpec,
};
use serde::{Deserialize, Serialize};
use statestore::WriteRequest;
use std::collections::BTreeMap;

/// What to rebuild.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecoveryKind {
    /// Base service: equipment, links, LAGs and filters
    Node,
    /// Tenant slices
    Slices,
}

/// QoS values to use instead of the persisted ones for one connection point.
///
/// Interface names are the names after renaming.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QosOverride {
    /// Interface
    pub if_name: String,
    /// VLAN
    pub vlan_id: u16,
    /// Override values; fields listed in `remove` keep their persisted value
    #[serde(flatten)]
    pub qos: QosSpec,
}

/// A recovery request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryRequest {
    /// Device to rebuild
    pub device: String,
    /// Node or slices
    pub kind: RecoveryKind,
    /// Old interface name to new; empty keeps every name
    #[serde(default)]
    pub rename: BTreeMap<String, String>,
    /// Per connection point QoS overrides
    #[serde(default)]
    pub qos_overrides: Vec<QosOverride>,
    /// Slices to rebuild; empty means all
    #[serde(default)]
    pub slices: Vec<String>,
}

impl RecoveryRequest {
    /// Request without renames or overrides.
    pub fn new(device: impl Into<String>, kind: RecoveryKind) -> Self {
        Self {
            device: device.into(),
            kind,
            rename: BTreeMap::new(),
            qos_overrides: Vec::new(),
            slices: Vec::new(),
        }
    }
}

/// One rebuilt change with the store update that goes with it.
#[derive(Debug, Clone)]
pub struct RecoveredChange {
    /// Merge request reproducing the configuration
    pub change: DesiredChange,
    /// Persisted state after recovery
    pub state: PersistedState,
    /// Store writes turning the snapshot into `state`
    pub writes: Vec<WriteRequest>,
}

/// Outcome of a slice recovery.
#[derive(Debug, Default)]
pub struct RecoveryReport {
    /// Rebuilt slices, by slice name order
    pub recovered: Vec<RecoveredChange>,
    /// Slices that could not be rebuilt
    pub failed: Vec<(String, Error)>,
}

/// Rebuild the base service of a device.
pub fn recover_node(request: &RecoveryRequest, snapshot: &PersistedState) -> Result<RecoveredChange> {
    let old = snapshot.node_part();
    let state = old.rename_interfaces(&request.rename)?;
    let Some(eq) = &state.equipment else {
        return Err(ReconstructError::InsufficientData(format!("{} has no equipment record", request.device)).into());
    };

    let mut change = DesiredChange::new(&request.device, eq.role);
    change.equipment = Some(EquipmentSpec {
        hostname: eq.hostname.clone(),
        loopback: eq.loopback.clone(),
        router_id: eq.router_id.clone(),
        as_number: eq.as_number,
        snmp_community: eq.snmp_community.clone(),
        ntp_servers: eq.ntp_servers.clone(),
        physical_ifs: state
            .physical_ifs
            .iter()
            .filter(|p| p.speed.is_some())
            .map(|p| PhysicalIfSpec {
                if_name: p.if_name.clone(),
                speed: p.speed.clone(),
            })
            .collect(),
        multi_homing: state.multi_homing.as_ref().map(|mh| MultiHomingSpec {
            anycast_address: mh.anycast_address.clone(),
            peer_address: mh.peer_address.clone(),
            system_mac: mh.system_mac.clone(),
        }),
    });

    for port in &state.physical_ifs {
        if let Some(link) = &port.link {
            change.internal_links.push(InternalLinkSpec {
                if_name: port.if_name.clone(),
                address: Some(link.address.clone()),
                peer_address: Some(link.peer_address.clone()),
                peer_as: Some(link.peer_as),
                ..Default::default()
            });
        }
    }
    for lag in &state.lags {
        match &lag.link {
            Some(link) => change.internal_links.push(InternalLinkSpec {
                if_name: lag.lag_name.clone(),
                members: lag.members.clone(),
                minimum_links: lag.minimum_links,
                address: Some(link.address.clone()),
                peer_address: Some(link.peer_address.clone()),
                peer_as: Some(link.peer_as),
                ..Default::default()
            }),
            None => change.lags.push(LagSpec {
                operation: None,
                lag_name: lag.lag_name.clone(),
                minimum_links: lag.minimum_links,
                link_speed: lag.link_speed.clone(),
                members: lag.members.iter().map(LagMemberSpec::new).collect(),
            }),
        }
    }
    change.acls = state
        .acls
        .iter()
        .map(|acl| AclSpec {
            operation: None,
            filter_name: acl.filter_name.clone(),
            terms: acl.terms.clone(),
            if_name: acl.if_name.clone(),
            vlan_id: acl.vlan_id,
        })
        .collect();

    let writes = PersistedState::write_requests_from(&old, &state)?;
    log::info!(
        "Recovered {} base of {}: {} links, {} lags, {} filters",
        change.service,
        request.device,
        change.internal_links.len(),
        change.lags.len(),
        change.acls.len()
    );
    Ok(RecoveredChange { change, state, writes })
}

/// Rebuild every requested slice of a device.
pub fn recover_slices(request: &RecoveryRequest, snapshot: &PersistedState) -> RecoveryReport {
    let names: Vec<String> = if request.slices.is_empty() {
        snapshot.slice_names().into_iter().collect()
    } else {
        request.slices.clone()
    };

    let mut report = RecoveryReport::default();
    for name in names {
        match recover_slice(request, snapshot, &name) {
            Ok(recovered) => report.recovered.push(recovered),
            Err(err) => {
                log::error!("{}: slice {name} not recovered: {err}", request.device);
                report.failed.push((name, err));
            }
        }
    }
    report
}

/// Slice records renamed; LAG names resolve against the whole device.
fn renamed_slice(snapshot: &PersistedState, slice_name: &str, rename: &BTreeMap<String, String>) -> Result<PersistedState> {
    let mut scoped = snapshot.slice(slice_name);
    scoped.lags = snapshot
        .lags
        .iter()
        .map(|lag| LagRecord {
            members: Vec::new(),
            ..lag.clone()
        })
        .collect();
    let mut renamed = scoped.rename_interfaces(rename)?;
    renamed.lags.clear();
    Ok(renamed)
}

fn qos_for(record: &VlanIfRecord, overrides: &[QosOverride]) -> QosSettings {
    let mut qos = record.qos.clone();
    let found = overrides
        .iter()
        .find(|o| o.if_name == record.if_name && o.vlan_id == record.vlan_id);
    if let Some(o) = found {
        for field in QosField::ALL {
            if o.qos.remove.contains(&field) {
                continue;
            }
            if let Some(value) = o.qos.settings.get(field) {
                qos.set(field, Some(value.to_string()));
            }
        }
    }
    qos
}

fn recover_slice(request: &RecoveryRequest, snapshot: &PersistedState, slice_name: &str) -> Result<RecoveredChange> {
    let old = snapshot.slice(slice_name);
    if old.is_empty() {
        return Err(ReconstructError::InsufficientData(format!("slice {slice_name} has no records")).into());
    }
    let mut state = renamed_slice(snapshot, slice_name, &request.rename)?;

    let service = match state.vlan_ifs.first() {
        Some(first) => first.service,
        None => {
            return Err(ReconstructError::InsufficientData(format!(
                "slice {slice_name} has no connection points"
            ))
            .into());
        }
    };
    if state.vlan_ifs.iter().any(|v| v.service != service) {
        return Err(ReconstructError::InsufficientData(format!("slice {slice_name} mixes L2 and L3 bindings")).into());
    }

    let mut change = DesiredChange::new(&request.device, service).with_slice(slice_name);
    if service == ServiceType::L3Slice {
        let Some(vrf) = state.vrf(slice_name) else {
            return Err(ReconstructError::InsufficientData(format!("slice {slice_name} has no vrf record")).into());
        };
        change.vrf = Some(VrfSpec {
            vrf_name: vrf.vrf_name.clone(),
            rd: vrf.rd.clone(),
            rt: vrf.rt.clone(),
            l3_vni: vrf.l3_vni,
        });
    }

    for record in &mut state.vlan_ifs {
        record.qos = qos_for(record, &request.qos_overrides);
    }

    for record in &state.vlan_ifs {
        let on_cp = |if_name: &str, vlan_id: u16| if_name == record.if_name && vlan_id == record.vlan_id;

        let mut vrrp = state.vrrp_groups.iter().filter(|v| on_cp(&v.if_name, v.vlan_id));
        let first_vrrp = vrrp.next();
        if vrrp.next().is_some() {
            return Err(ReconstructError::InsufficientData(format!(
                "{} carries more than one vrrp group",
                record.unit_name()
            ))
            .into());
        }

        change.cps.push(CpSpec {
            operation: None,
            if_name: record.if_name.clone(),
            vlan_id: record.vlan_id,
            vni: record.vni,
            port_mode: (service == ServiceType::L2Slice).then_some(record.port_mode),
            ipv4: record.ipv4.clone(),
            ipv6: record.ipv6.clone(),
            mtu: record.mtu,
            qos: (!record.qos.is_empty()).then(|| QosSpec {
                settings: record.qos.clone(),
                remove: Default::default(),
            }),
            bgp: state
                .bgp_peers
                .iter()
                .filter(|b| on_cp(&b.if_name, b.vlan_id))
                .map(|b| BgpSpec {
                    operation: None,
                    remote_ip: b.remote_ip.clone(),
                    remote_as: Some(b.remote_as),
                    local_ip: b.local_ip.clone(),
                })
                .collect(),
            static_routes: state
                .static_routes
                .iter()
                .filter(|r| on_cp(&r.if_name, r.vlan_id))
                .map(|r| StaticRouteSpec::new(&r.prefix, &r.next_hop))
                .collect(),
            vrrp: first_vrrp.map(|v| VrrpSpec {
                operation: None,
                group_id: v.group_id,
                virtual_address: Some(v.virtual_address.clone()),
                priority: v.priority,
            }),
        });
    }

    state.normalize();
    let writes = PersistedState::write_requests_from(&old, &state)?;
    log::info!(
        "Recovered slice {slice_name} of {}: {} connection points",
        request.device,
        change.cps.len()
    );
    Ok(RecoveredChange { change, state, writes })
}

/// Run a recovery request: node recovery gives a single change.
pub fn recover(request: &RecoveryRequest, snapshot: &PersistedState) -> RecoveryReport {
    match request.kind {
        RecoveryKind::Node => match recover_node(request, snapshot) {
            Ok(recovered) => RecoveryReport {
                recovered: vec![recovered],
                failed: Vec::new(),
            },
            Err(err) => {
                log::error!("{}: node not recovered: {err}", request.device);
                RecoveryReport {
                    recovered: Vec::new(),
                    failed: vec![(request.device.clone(), err)],
                }
            }
        },
        RecoveryKind::Slices => recover_slices(request, snapshot),
    }
}
