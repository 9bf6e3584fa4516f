//! Post-commit convergence check.
//!
//! Persisted state is projected into a list of [`Expectation`]s, each one
//! naming a configuration node by its stable keys and what the live
//! configuration must hold there. The walk stops at the first expectation
//! the live tree does not meet: the result says whether the device
//! converged, not everything that differs.
//!
//! A persisted value becomes [`Expect::Text`]; an entity without a value
//! (a VLAN container, a static next hop) becomes [`Expect::Present`]; an
//! optional field left unset becomes [`Expect::Absent`].

use crate::model::{PersistedState, QosField, QosSettings, ServiceType, VlanIfRecord};
use crate::paths;
use crate::tree::{ConfigTree, TreePath};
use std::fmt;

/// Part of the persisted state to check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    /// Every record of the device
    Device,
    /// Records of one slice
    Slice(String),
}

/// What a node must look like.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expect {
    /// Node exists with exactly this text
    Text(String),
    /// Node exists
    Present,
    /// Node does not exist
    Absent,
}

impl Expect {
    fn observe(live: &ConfigTree, path: &TreePath) -> Expect {
        match live.get(path) {
            Some(node) => match &node.text {
                Some(text) => Expect::Text(text.trim().to_string()),
                None => Expect::Present,
            },
            None => Expect::Absent,
        }
    }

    fn is_met_by(&self, observed: &Expect) -> bool {
        match self {
            Expect::Text(_) => self == observed,
            Expect::Present => *observed != Expect::Absent,
            Expect::Absent => *observed == Expect::Absent,
        }
    }
}

/// One checked node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expectation {
    /// Node address
    pub path: TreePath,
    /// Required shape
    pub expect: Expect,
}

fn render(path: &TreePath, shape: &Expect) -> String {
    match shape {
        Expect::Text(text) => format!("{path} = {text}"),
        Expect::Present => path.to_string(),
        Expect::Absent => format!("{path} (absent)"),
    }
}

impl fmt::Display for Expectation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", render(&self.path, &self.expect))
    }
}

/// First expectation the live configuration did not meet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mismatch {
    /// Node address
    pub path: TreePath,
    /// Required shape
    pub expected: Expect,
    /// What the live configuration holds
    pub found: Expect,
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "expected {}, found {}",
            render(&self.path, &self.expected),
            render(&self.path, &self.found)
        )
    }
}

/// Result of a comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comparison {
    /// Whether every expectation was met
    pub matched: bool,
    /// The first unmet expectation
    pub mismatch: Option<Mismatch>,
}

impl Comparison {
    fn matched() -> Self {
        Self {
            matched: true,
            mismatch: None,
        }
    }
}

struct Projection<'a> {
    state: &'a PersistedState,
    out: Vec<Expectation>,
}

impl Projection<'_> {
    fn text(&mut self, path: TreePath, text: impl ToString) {
        self.out.push(Expectation {
            path,
            expect: Expect::Text(text.to_string()),
        });
    }

    fn present(&mut self, path: TreePath) {
        self.out.push(Expectation {
            path,
            expect: Expect::Present,
        });
    }

    fn optional<T: ToString>(&mut self, path: TreePath, value: Option<T>) {
        let expect = match value {
            Some(value) => Expect::Text(value.to_string()),
            None => Expect::Absent,
        };
        self.out.push(Expectation { path, expect });
    }

    fn node(&mut self) {
        let state = self.state;
        if let Some(eq) = &state.equipment {
            self.text(paths::host_name(), &eq.hostname);
            self.optional(paths::loopback_address(), eq.loopback.as_ref());
            self.optional(paths::router_id(), eq.router_id.as_ref());
            self.optional(paths::autonomous_system(), eq.as_number);
            if let Some(community) = &eq.snmp_community {
                self.present(paths::snmp_community(community));
            }
            for server in &eq.ntp_servers {
                self.present(paths::ntp_server(server));
            }
            match &state.multi_homing {
                Some(mh) => {
                    let base = paths::multi_homing();
                    self.text(base.child("anycast-address"), &mh.anycast_address);
                    self.text(base.child("peer-address"), &mh.peer_address);
                    self.text(base.child("system-mac"), &mh.system_mac);
                }
                None if eq.role == ServiceType::Leaf => self.out.push(Expectation {
                    path: paths::multi_homing(),
                    expect: Expect::Absent,
                }),
                None => {}
            }
        }

        for port in &state.physical_ifs {
            if state.equipment.is_some() {
                self.optional(paths::port_speed(&port.if_name), port.speed.as_ref());
            }
            if let Some(link) = &port.link {
                self.text(paths::link_address(&port.if_name), &link.address);
                self.text(paths::underlay_neighbor(&link.peer_address).child("peer-as"), link.peer_as);
            }
        }

        for lag in &state.lags {
            let options = paths::bond_options(&lag.lag_name);
            self.present(options.clone());
            self.optional(options.child("minimum-links"), lag.minimum_links);
            self.optional(options.child("link-speed"), lag.link_speed.as_ref());
            for member in &lag.members {
                self.text(paths::bond_membership(member).child("bundle"), &lag.lag_name);
            }
            if let Some(link) = &lag.link {
                self.text(paths::link_address(&lag.lag_name), &link.address);
                self.text(paths::underlay_neighbor(&link.peer_address).child("peer-as"), link.peer_as);
            }
        }

        for acl in &state.acls {
            let filter = paths::filter(&acl.filter_name);
            self.present(filter.clone());
            for term in &acl.terms {
                let base = paths::filter_term(&acl.filter_name, &term.name);
                self.optional(base.child("source-address"), term.source.as_ref());
                self.optional(base.child("destination-address"), term.destination.as_ref());
                self.optional(base.child("protocol"), term.protocol.as_ref());
                self.text(base.child("action"), &term.action);
            }
            if let (Some(if_name), Some(vlan_id)) = (&acl.if_name, acl.vlan_id) {
                self.text(paths::filter_binding(if_name, vlan_id), &acl.filter_name);
            }
        }
    }

    fn qos(&mut self, record: &VlanIfRecord, qos: &QosSettings) {
        let base = paths::cos_unit(&record.if_name, record.vlan_id);
        for field in QosField::ALL {
            self.optional(base.child(paths::qos_leaf(field)), qos.get(field));
        }
    }

    fn slice(&mut self, slice_name: &str) {
        let state = self.state;
        let vrf = state.vrf(slice_name);

        if let Some(vrf) = vrf {
            let instance = paths::instance(&vrf.vrf_name);
            self.text(instance.child("instance-type"), "vrf");
            self.text(instance.child("route-distinguisher"), &vrf.rd);
            self.text(instance.child("vrf-target"), &vrf.rt);
            self.optional(
                instance.join(&paths::of(&["protocols", "evpn", "ip-prefix-routes", "vni"])),
                vrf.l3_vni,
            );
        }

        for record in state.vlan_ifs.iter().filter(|r| r.slice_name == slice_name) {
            let unit = paths::unit(&record.if_name, record.vlan_id);
            self.present(paths::vlan_tagging(&record.if_name));
            self.text(unit.child("vlan-id"), record.vlan_id);
            self.optional(unit.child("mtu"), record.mtu);

            if record.is_l3() {
                self.optional(
                    unit.join(&paths::of(&["family", "inet", "address"])),
                    record.ipv4.as_ref(),
                );
                self.optional(
                    unit.join(&paths::of(&["family", "inet6", "address"])),
                    record.ipv6.as_ref(),
                );
                if let Some(vrf) = vrf {
                    self.present(paths::instance_interface(&vrf.vrf_name, &record.unit_name()));
                }
            } else {
                self.present(paths::vlan(record.vlan_id));
                self.text(
                    unit.join(&paths::of(&["family", "ethernet-switching", "interface-mode"])),
                    record.port_mode.as_str(),
                );
                self.text(
                    unit.join(&paths::of(&["family", "ethernet-switching", "vlan-members"])),
                    record.vlan_id,
                );
                if let Some(vni) = record.vni {
                    self.text(paths::vlan_vxlan(record.vlan_id).child("vni"), vni);
                    self.present(paths::evpn_vni(vni));
                }
            }
            self.qos(record, &record.qos);
        }

        let Some(vrf) = vrf else {
            return;
        };
        for bgp in state.bgp_peers.iter().filter(|r| r.slice_name == slice_name) {
            let path = paths::bgp_neighbor(&vrf.vrf_name, slice_name, &bgp.remote_ip);
            self.text(path.child("peer-as"), bgp.remote_as);
            self.optional(path.child("local-address"), bgp.local_ip.as_ref());
        }
        for route in state.static_routes.iter().filter(|r| r.slice_name == slice_name) {
            self.present(paths::static_next_hop(&vrf.vrf_name, &route.prefix, &route.next_hop));
        }
        for vrrp in state.vrrp_groups.iter().filter(|r| r.slice_name == slice_name) {
            let path = paths::vrrp_group(&vrrp.if_name, vrrp.vlan_id, vrrp.group_id);
            self.text(path.child("virtual-address"), &vrrp.virtual_address);
            self.optional(path.child("priority"), vrrp.priority);
        }
    }
}

/// Expectations derived from the persisted state in `scope`.
pub fn expectations(state: &PersistedState, scope: &Scope) -> Vec<Expectation> {
    let mut projection = Projection {
        state,
        out: Vec::new(),
    };
    match scope {
        Scope::Device => {
            projection.node();
            for slice_name in state.slice_names() {
                projection.slice(&slice_name);
            }
        }
        Scope::Slice(slice_name) => projection.slice(slice_name),
    }
    projection.out
}

/// Check the live configuration against the persisted state in `scope`.
pub fn compare(live: &ConfigTree, state: &PersistedState, scope: &Scope) -> Comparison {
    if let Scope::Slice(slice_name) = scope
        && live.is_empty()
        && state.slice(slice_name).is_empty()
    {
        log::debug!("{}: slice {slice_name} is empty on both sides", state.device);
        return Comparison::matched();
    }

    for expectation in expectations(state, scope) {
        let found = Expect::observe(live, &expectation.path);
        if !expectation.expect.is_met_by(&found) {
            let mismatch = Mismatch {
                path: expectation.path,
                expected: expectation.expect,
                found,
            };
            log::debug!("{}: {mismatch}", state.device);
            return Comparison {
                matched: false,
                mismatch: Some(mismatch),
            };
        }
    }
    Comparison::matched()
}

/// Expected and observed renderings of every expectation, one line each,
/// in the same order. Lines differ exactly where an expectation is unmet.
pub fn side_by_side(live: &ConfigTree, state: &PersistedState, scope: &Scope) -> (String, String) {
    let mut expected = String::new();
    let mut observed = String::new();
    for expectation in expectations(state, scope) {
        let found = Expect::observe(live, &expectation.path);
        let shown = if expectation.expect.is_met_by(&found) {
            expectation.expect.clone()
        } else {
            found
        };
        expected.push_str(&expectation.to_string());
        expected.push('\n');
        observed.push_str(&render(&expectation.path, &shown));
        observed.push('\n');
    }
    (expected, observed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile;
    use crate::model::{Address, CpSpec, DesiredChange, Operation, VrfSpec};
    use proptest::prelude::*;

    fn provision(state: &PersistedState, change: &DesiredChange) -> (ConfigTree, PersistedState) {
        let compiled = compile(change, state, Operation::Merge).unwrap();
        let live = ConfigTree::default().apply_all(&compiled.batch).unwrap();
        (live, state.apply_change(change, Operation::Merge))
    }

    fn l2_change(slice: &str, cps: &[(&str, u16)]) -> DesiredChange {
        let mut change = DesiredChange::new("leaf1", ServiceType::L2Slice).with_slice(slice);
        for (if_name, vlan) in cps {
            let mut cp = CpSpec::new(*if_name, *vlan);
            cp.vni = Some(10000 + u32::from(*vlan));
            change.cps.push(cp);
        }
        change
    }

    fn l3_change() -> DesiredChange {
        let mut change = DesiredChange::new("leaf1", ServiceType::L3Slice).with_slice("red");
        change.vrf = Some(VrfSpec {
            vrf_name: "vrf-red".into(),
            rd: "65000:10".into(),
            rt: "target:65000:10".into(),
            l3_vni: Some(50010),
        });
        let mut cp = CpSpec::new("swp5", 300);
        cp.ipv4 = Some(Address::new("10.10.0.1", 24));
        cp.mtu = Some(9000);
        change.cps.push(cp);
        change
    }

    #[test]
    fn test_empty_slice_matches_empty_config() {
        let state = PersistedState::empty("leaf1");
        let result = compare(&ConfigTree::default(), &state, &Scope::Slice("blue".into()));
        assert!(result.matched);
        assert_eq!(result.mismatch, None);
    }

    #[test]
    fn test_provisioned_slice_matches() {
        let (live, state) = provision(&PersistedState::empty("leaf1"), &l2_change("blue", &[("swp1", 100)]));
        assert!(compare(&live, &state, &Scope::Slice("blue".into())).matched);
        assert!(compare(&live, &state, &Scope::Device).matched);

        let (live, state) = provision(&PersistedState::empty("leaf1"), &l3_change());
        assert!(compare(&live, &state, &Scope::Slice("red".into())).matched);
    }

    #[test]
    fn test_changed_leaf_is_reported() {
        let (live, state) = provision(&PersistedState::empty("leaf1"), &l3_change());
        let path = paths::unit("swp5", 300).child("mtu");
        let mut live = live;
        live.set(&path, Some("1500".into()));

        let result = compare(&live, &state, &Scope::Slice("red".into()));
        assert!(!result.matched);
        let mismatch = result.mismatch.unwrap();
        assert_eq!(mismatch.path, path);
        assert_eq!(mismatch.expected, Expect::Text("9000".into()));
        assert_eq!(mismatch.found, Expect::Text("1500".into()));
    }

    #[test]
    fn test_unset_field_must_be_absent() {
        let (live, state) = provision(&PersistedState::empty("leaf1"), &l2_change("blue", &[("swp1", 100)]));
        let mut live = live;
        live.set(&paths::unit("swp1", 100).child("mtu"), Some("9216".into()));

        let result = compare(&live, &state, &Scope::Slice("blue".into()));
        assert_eq!(result.mismatch.map(|m| m.expected), Some(Expect::Absent));
    }

    #[test]
    fn test_missing_slice_on_device() {
        let (_, state) = provision(&PersistedState::empty("leaf1"), &l2_change("blue", &[("swp1", 100)]));
        let result = compare(&ConfigTree::default(), &state, &Scope::Slice("blue".into()));
        assert!(!result.matched);
        assert_eq!(result.mismatch.map(|m| m.found), Some(Expect::Absent));
    }

    #[test]
    fn test_other_slice_is_ignored() {
        let (live, state) = provision(&PersistedState::empty("leaf1"), &l2_change("blue", &[("swp1", 100)]));
        let (_, with_green) = provision(&state, &l2_change("green", &[("swp2", 200)]));
        // green is persisted but was never pushed; blue still converges
        assert!(compare(&live, &with_green, &Scope::Slice("blue".into())).matched);
        assert!(!compare(&live, &with_green, &Scope::Device).matched);
    }

    #[test]
    fn test_side_by_side_differs_only_at_mismatch() {
        let (live, state) = provision(&PersistedState::empty("leaf1"), &l3_change());
        let mut live = live;
        live.set(&paths::unit("swp5", 300).child("mtu"), Some("1500".into()));

        let (expected, observed) = side_by_side(&live, &state, &Scope::Slice("red".into()));
        let differing: Vec<(&str, &str)> = expected
            .lines()
            .zip(observed.lines())
            .filter(|(a, b)| a != b)
            .collect();
        assert_eq!(
            differing,
            vec![(
                "interfaces/interface[swp5]/unit[300]/mtu = 9000",
                "interfaces/interface[swp5]/unit[300]/mtu = 1500"
            )]
        );
    }

    proptest! {
        #[test]
        fn test_any_provisioned_l2_slice_converges(vlans in prop::collection::btree_set(2u16..4000, 1..6)) {
            let cps: Vec<(&str, u16)> = vlans.iter().map(|v| ("swp1", *v)).collect();
            let (live, state) = provision(&PersistedState::empty("leaf1"), &l2_change("blue", &cps));
            prop_assert!(compare(&live, &state, &Scope::Slice("blue".into())).matched);
        }
    }
}
