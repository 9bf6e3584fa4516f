//! Configuration tree paths shared by the compiler and the comparator.
//!
//! Keeping one builder per entity means a directive and the expectation that
//! later verifies it always address the same node.

use crate::model::QosField;
use crate::tree::{PathSegment, TreePath};

/// Path of unkeyed segments.
pub fn of(names: &[&str]) -> TreePath {
    TreePath::new(
        names
            .iter()
            .map(|name| PathSegment {
                name: (*name).to_string(),
                key: None,
            })
            .collect(),
    )
}

/// Physical or logical interface.
pub fn interface(if_name: &str) -> TreePath {
    of(&["interfaces"]).keyed("interface", if_name)
}

/// VLAN tagging flag of an interface; the per-interface container.
pub fn vlan_tagging(if_name: &str) -> TreePath {
    interface(if_name).child("vlan-tagging")
}

/// Logical unit of an interface.
pub fn unit(if_name: &str, vlan_id: u16) -> TreePath {
    interface(if_name).keyed("unit", vlan_id)
}

/// Port speed leaf.
pub fn port_speed(if_name: &str) -> TreePath {
    interface(if_name).child("speed")
}

/// LAG bond options.
pub fn bond_options(lag_name: &str) -> TreePath {
    interface(lag_name).child("aggregated-ether-options")
}

/// LAG membership of a physical port.
pub fn bond_membership(member: &str) -> TreePath {
    interface(member).child("ether-options").child("ieee-802.3ad")
}

/// Shared VLAN container.
pub fn vlan(vlan_id: u16) -> TreePath {
    of(&["vlans"]).keyed("vlan", vlan_id)
}

/// VXLAN mapping of a VLAN.
pub fn vlan_vxlan(vlan_id: u16) -> TreePath {
    vlan(vlan_id).child("vxlan")
}

/// EVPN VNI container.
pub fn evpn_vni(vni: u32) -> TreePath {
    of(&["protocols", "evpn"]).keyed("vni", vni)
}

/// Routing instance.
pub fn instance(vrf_name: &str) -> TreePath {
    of(&["routing-instances"]).keyed("instance", vrf_name)
}

/// Unit bound to a routing instance.
pub fn instance_interface(vrf_name: &str, unit_name: &str) -> TreePath {
    instance(vrf_name).keyed("interface", unit_name)
}

/// BGP neighbour of a slice inside its routing instance.
pub fn bgp_neighbor(vrf_name: &str, slice_name: &str, remote_ip: &str) -> TreePath {
    instance(vrf_name)
        .child("protocols")
        .child("bgp")
        .keyed("group", slice_name)
        .keyed("neighbor", remote_ip)
}

fn is_ipv6(prefix: &str) -> bool {
    prefix.contains(':')
}

/// Static route container of a prefix. IPv6 prefixes live in the
/// instance's inet6 table.
pub fn static_route(vrf_name: &str, prefix: &str) -> TreePath {
    let options = instance(vrf_name).child("routing-options");
    let table = if is_ipv6(prefix) {
        options.keyed("rib", format!("{vrf_name}.inet6.0"))
    } else {
        options
    };
    table.child("static").keyed("route", prefix)
}

/// One next hop of a static route.
pub fn static_next_hop(vrf_name: &str, prefix: &str, next_hop: &str) -> TreePath {
    static_route(vrf_name, prefix).keyed("next-hop", next_hop)
}

/// VRRP group of a unit.
pub fn vrrp_group(if_name: &str, vlan_id: u16, group_id: u8) -> TreePath {
    unit(if_name, vlan_id)
        .child("family")
        .child("inet")
        .keyed("vrrp-group", group_id)
}

/// Class-of-service settings of an interface.
pub fn cos_interface(if_name: &str) -> TreePath {
    of(&["class-of-service", "interfaces"]).keyed("interface", if_name)
}

/// Class-of-service settings of a unit.
pub fn cos_unit(if_name: &str, vlan_id: u16) -> TreePath {
    cos_interface(if_name).keyed("unit", vlan_id)
}

/// Leaf name of a QoS field.
pub fn qos_leaf(field: QosField) -> &'static str {
    match field {
        QosField::InflowRate => "input-policer",
        QosField::OutflowRate => "shaping-rate",
        QosField::RemarkMenu => "rewrite-rules",
        QosField::EgressMenu => "scheduler-map",
    }
}

/// Packet filter.
pub fn filter(filter_name: &str) -> TreePath {
    of(&["firewall"]).keyed("filter", filter_name)
}

/// Term of a packet filter.
pub fn filter_term(filter_name: &str, term: &str) -> TreePath {
    filter(filter_name).keyed("term", term)
}

/// Input filter binding of a unit.
pub fn filter_binding(if_name: &str, vlan_id: u16) -> TreePath {
    unit(if_name, vlan_id)
        .child("family")
        .child("inet")
        .child("input-filter")
}

/// Underlay BGP group.
pub fn underlay_group() -> TreePath {
    of(&["protocols", "bgp"]).keyed("group", "underlay")
}

/// Underlay BGP neighbour.
pub fn underlay_neighbor(peer_address: &str) -> TreePath {
    underlay_group().keyed("neighbor", peer_address)
}

/// Fabric link address unit.
pub fn link_unit(if_name: &str) -> TreePath {
    interface(if_name).keyed("unit", 0)
}

/// Fabric link address leaf.
pub fn link_address(if_name: &str) -> TreePath {
    link_unit(if_name).child("family").child("inet").child("address")
}

/// Host name leaf.
pub fn host_name() -> TreePath {
    of(&["system", "host-name"])
}

/// Loopback interface.
pub fn loopback_interface() -> TreePath {
    interface("lo0")
}

/// Loopback address leaf.
pub fn loopback_address() -> TreePath {
    link_unit("lo0").child("family").child("inet").child("address")
}

/// Router id leaf.
pub fn router_id() -> TreePath {
    of(&["routing-options", "router-id"])
}

/// AS number leaf.
pub fn autonomous_system() -> TreePath {
    of(&["routing-options", "autonomous-system"])
}

/// SNMP community.
pub fn snmp_community(community: &str) -> TreePath {
    of(&["snmp"]).keyed("community", community)
}

/// NTP server.
pub fn ntp_server(address: &str) -> TreePath {
    of(&["system", "ntp"]).keyed("server", address)
}

/// EVPN multi-homing settings.
pub fn multi_homing() -> TreePath {
    of(&["protocols", "evpn", "multi-homing"])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_route_tables() {
        assert_eq!(
            static_next_hop("vrf-a", "10.0.0.0/24", "10.1.1.1").to_string(),
            "routing-instances/instance[vrf-a]/routing-options/static/route[10.0.0.0/24]/next-hop[10.1.1.1]"
        );
        assert_eq!(
            static_route("vrf-a", "2001:db8::/64").to_string(),
            "routing-instances/instance[vrf-a]/routing-options/rib[vrf-a.inet6.0]/static/route[2001:db8::/64]"
        );
    }

    #[test]
    fn test_paths_round_trip_through_parser() {
        for path in [
            unit("ge-0/0/1", 100),
            bgp_neighbor("vrf-a", "tenant-a", "10.0.0.2"),
            vrrp_group("swp1", 100, 1),
            cos_unit("bond0", 200),
        ] {
            assert_eq!(TreePath::parse(&path.to_string()).unwrap(), path);
        }
    }
}
