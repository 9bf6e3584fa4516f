//! Desired-state change requests.
//!
//! A [`DesiredChange`] describes the target configuration of one service on
//! one device. Sub-elements may carry their own [`Operation`] tag; an
//! untagged element inherits the operation of the request (or of the
//! element that contains it).

use super::{Address, Operation, PortMode, QosField, QosSettings, ServiceType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Desired configuration of one service on one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesiredChange {
    /// Target device
    pub device: String,
    /// Service type
    pub service: ServiceType,
    /// Slice name (slice services only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slice_name: Option<String>,
    /// Node base configuration (spine/leaf)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub equipment: Option<EquipmentSpec>,
    /// Fabric links
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub internal_links: Vec<InternalLinkSpec>,
    /// LAG bundles
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub lags: Vec<LagSpec>,
    /// Connection points
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cps: Vec<CpSpec>,
    /// Routing instance of an L3 slice
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vrf: Option<VrfSpec>,
    /// Packet filters
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub acls: Vec<AclSpec>,
}

impl DesiredChange {
    /// Empty change for a device and service.
    pub fn new(device: impl Into<String>, service: ServiceType) -> Self {
        Self {
            device: device.into(),
            service,
            slice_name: None,
            equipment: None,
            internal_links: Vec::new(),
            lags: Vec::new(),
            cps: Vec::new(),
            vrf: None,
            acls: Vec::new(),
        }
    }

    /// Set the slice name.
    #[must_use]
    pub fn with_slice(mut self, slice_name: impl Into<String>) -> Self {
        self.slice_name = Some(slice_name.into());
        self
    }

    /// Slice name, or an empty string for non-slice services.
    pub fn slice(&self) -> &str {
        self.slice_name.as_deref().unwrap_or("")
    }
}

/// Operation of a top-level element (CP, LAG, link, filter).
pub(crate) fn effective(tag: Option<Operation>, request: Operation) -> Operation {
    tag.unwrap_or(request)
}

/// Operation of an element nested inside a parent element.
///
/// Everything inside a deleted parent goes with it. Otherwise an untagged
/// child follows the request: removed in a delete request (the parent was
/// tagged `merge` to keep it), added in any other.
pub(crate) fn nested_op(parent: Operation, request: Operation, tag: Option<Operation>) -> Operation {
    if parent == Operation::Delete {
        return Operation::Delete;
    }
    tag.unwrap_or(match request {
        Operation::Delete => Operation::Delete,
        Operation::Merge | Operation::Replace => Operation::Merge,
    })
}

/// Node base configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EquipmentSpec {
    /// Host name
    pub hostname: String,
    /// Loopback address
    pub loopback: Option<Address>,
    /// BGP router id
    pub router_id: Option<String>,
    /// Autonomous system number
    pub as_number: Option<u32>,
    /// SNMP read community
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snmp_community: Option<String>,
    /// NTP servers
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ntp_servers: Vec<String>,
    /// Physical ports
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub physical_ifs: Vec<PhysicalIfSpec>,
    /// EVPN multi-homing (leaf only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multi_homing: Option<MultiHomingSpec>,
}

/// Physical port settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhysicalIfSpec {
    /// Interface name
    pub if_name: String,
    /// Port speed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<String>,
}

/// EVPN multi-homing pair settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiHomingSpec {
    /// Shared anycast VTEP address
    pub anycast_address: String,
    /// Peer leaf address
    pub peer_address: String,
    /// Shared system MAC
    pub system_mac: String,
}

/// Fabric link. A non-empty member list makes it a LAG link.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InternalLinkSpec {
    /// Operation tag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<Operation>,
    /// Physical interface or LAG name
    pub if_name: String,
    /// LAG members
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub members: Vec<String>,
    /// LAG minimum links
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum_links: Option<u32>,
    /// Local link address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<Address>,
    /// Underlay BGP peer address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer_address: Option<String>,
    /// Underlay BGP peer AS
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer_as: Option<u32>,
}

/// LAG bundle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LagSpec {
    /// Operation tag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<Operation>,
    /// Bond interface name
    pub lag_name: String,
    /// Minimum active links
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum_links: Option<u32>,
    /// Member link speed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_speed: Option<String>,
    /// Members; empty in a delete means every persisted member
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub members: Vec<LagMemberSpec>,
}

/// LAG member.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LagMemberSpec {
    /// Operation tag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<Operation>,
    /// Member interface name
    pub if_name: String,
}

impl LagMemberSpec {
    /// Untagged member.
    pub fn new(if_name: impl Into<String>) -> Self {
        Self {
            operation: None,
            if_name: if_name.into(),
        }
    }
}

/// Connection point: a slice attachment on interface + VLAN.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpSpec {
    /// Operation tag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<Operation>,
    /// Physical interface or LAG name
    pub if_name: String,
    /// VLAN id
    pub vlan_id: u16,
    /// VXLAN network identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vni: Option<u32>,
    /// Tagging mode
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port_mode: Option<PortMode>,
    /// IPv4 address (L3 only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv4: Option<Address>,
    /// IPv6 address (L3 only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv6: Option<Address>,
    /// MTU
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtu: Option<u32>,
    /// Rate limits and menus
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qos: Option<QosSpec>,
    /// BGP peers (L3 only)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bgp: Vec<BgpSpec>,
    /// Static routes (L3 only)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub static_routes: Vec<StaticRouteSpec>,
    /// VRRP group (L3 only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vrrp: Option<VrrpSpec>,
}

impl CpSpec {
    /// Untagged connection point.
    pub fn new(if_name: impl Into<String>, vlan_id: u16) -> Self {
        Self {
            if_name: if_name.into(),
            vlan_id,
            ..Default::default()
        }
    }
}

/// QoS settings of a connection point, with fields to remove.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QosSpec {
    /// Fields to set
    #[serde(flatten)]
    pub settings: QosSettings,
    /// Fields to remove (replace only)
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub remove: BTreeSet<QosField>,
}

/// BGP peer of an L3 connection point.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BgpSpec {
    /// Operation tag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<Operation>,
    /// Peer address
    pub remote_ip: String,
    /// Peer AS
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_as: Option<u32>,
    /// Local address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_ip: Option<String>,
}

/// Static route attached to an L3 connection point.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticRouteSpec {
    /// Operation tag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<Operation>,
    /// Destination prefix
    pub prefix: String,
    /// Next hop; may be omitted in a delete when unambiguous
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_hop: Option<String>,
}

impl StaticRouteSpec {
    /// Untagged route.
    pub fn new(prefix: impl Into<String>, next_hop: impl Into<String>) -> Self {
        Self {
            operation: None,
            prefix: prefix.into(),
            next_hop: Some(next_hop.into()),
        }
    }
}

/// VRRP group of an L3 connection point.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VrrpSpec {
    /// Operation tag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<Operation>,
    /// Group id
    pub group_id: u8,
    /// Virtual address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub virtual_address: Option<String>,
    /// Priority
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u8>,
}

/// Routing instance of an L3 slice.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VrfSpec {
    /// Instance name
    pub vrf_name: String,
    /// Route distinguisher
    pub rd: String,
    /// Route target
    pub rt: String,
    /// Symmetric IRB VNI
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub l3_vni: Option<u32>,
}

/// Packet filter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclSpec {
    /// Operation tag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<Operation>,
    /// Filter name
    pub filter_name: String,
    /// Ordered terms
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub terms: Vec<AclTerm>,
    /// Bound interface
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub if_name: Option<String>,
    /// Bound VLAN unit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vlan_id: Option<u16>,
}

/// One filter term.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AclTerm {
    /// Term name
    pub name: String,
    /// Source prefix
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Destination prefix
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    /// IP protocol
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    /// accept / discard
    pub action: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_operation() {
        assert_eq!(effective(None, Operation::Merge), Operation::Merge);
        assert_eq!(effective(Some(Operation::Delete), Operation::Merge), Operation::Delete);
        assert_eq!(effective(Some(Operation::Merge), Operation::Delete), Operation::Merge);
    }

    #[test]
    fn test_nested_operation() {
        // Deleted parent takes its children along
        assert_eq!(nested_op(Operation::Delete, Operation::Delete, Some(Operation::Merge)), Operation::Delete);
        // Parent kept in a delete request: untagged children are removed
        assert_eq!(nested_op(Operation::Merge, Operation::Delete, None), Operation::Delete);
        assert_eq!(nested_op(Operation::Merge, Operation::Merge, None), Operation::Merge);
        assert_eq!(nested_op(Operation::Merge, Operation::Merge, Some(Operation::Delete)), Operation::Delete);
        assert_eq!(nested_op(Operation::Replace, Operation::Replace, None), Operation::Merge);
    }

    #[test]
    fn test_change_from_json() {
        let json = r#"{
            "device": "leaf1",
            "service": "l3_slice",
            "slice_name": "tenant-a",
            "cps": [{
                "if_name": "swp1",
                "vlan_id": 100,
                "ipv4": {"ip": "10.0.0.1", "prefix": 24},
                "qos": {"inflow_rate": "100m", "remove": ["egress_menu"]},
                "static_routes": [{"prefix": "192.168.0.0/24", "next_hop": "10.0.0.254"}]
            }]
        }"#;
        let change: DesiredChange = serde_json::from_str(json).unwrap();
        assert_eq!(change.service, ServiceType::L3Slice);
        assert_eq!(change.slice(), "tenant-a");
        let cp = &change.cps[0];
        assert_eq!(cp.ipv4.as_ref().unwrap().to_string(), "10.0.0.1/24");
        let qos = cp.qos.as_ref().unwrap();
        assert_eq!(qos.settings.inflow_rate.as_deref(), Some("100m"));
        assert!(qos.remove.contains(&QosField::EgressMenu));
        assert_eq!(cp.static_routes[0].next_hop.as_deref(), Some("10.0.0.254"));
    }
}
