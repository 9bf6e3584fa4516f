//! Canonical data model: desired changes and persisted device state.

mod change;
mod state;

pub(crate) use change::{effective, nested_op};
pub use change::{
    AclSpec, AclTerm, BgpSpec, CpSpec, DesiredChange, EquipmentSpec, InternalLinkSpec, LagMemberSpec,
    LagSpec, MultiHomingSpec, PhysicalIfSpec, QosSpec, StaticRouteSpec, VrfSpec, VrrpSpec,
};
pub use state::{
    AclRecord, BgpRecord, Category, EquipmentRecord, LagRecord, LinkRecord, MultiHomingRecord,
    PersistedState, PhysicalIfRecord, StaticRouteRecord, VlanIfRecord, VrfRecord, VrrpRecord,
};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Operation requested on a change or on one of its elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// Create or update
    Merge,
    /// Remove
    Delete,
    /// Mutate existing leaf fields only
    Replace,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Merge => "merge",
            Self::Delete => "delete",
            Self::Replace => "replace",
        };
        write!(f, "{text}")
    }
}

/// Closed set of services this engine provisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceType {
    /// Spine switch base configuration
    Spine,
    /// Leaf switch base configuration
    Leaf,
    /// Fabric link between a leaf and a spine
    InternalLink,
    /// Customer-edge LAG
    CeLag,
    /// Layer-2 tenant slice
    L2Slice,
    /// Layer-3 tenant slice
    L3Slice,
    /// Packet filters
    Acl,
}

impl ServiceType {
    /// All service types.
    pub const ALL: [ServiceType; 7] = [
        Self::Spine,
        Self::Leaf,
        Self::InternalLink,
        Self::CeLag,
        Self::L2Slice,
        Self::L3Slice,
        Self::Acl,
    ];

    /// Wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Spine => "spine",
            Self::Leaf => "leaf",
            Self::InternalLink => "internal_link",
            Self::CeLag => "ce_lag",
            Self::L2Slice => "l2_slice",
            Self::L3Slice => "l3_slice",
            Self::Acl => "acl",
        }
    }

    /// Whether this is a tenant slice service.
    pub fn is_slice(&self) -> bool {
        matches!(self, Self::L2Slice | Self::L3Slice)
    }

    /// Whether this is a node-level base service.
    pub fn is_node(&self) -> bool {
        matches!(self, Self::Spine | Self::Leaf)
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ServiceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s.replace('-', "_"))
            .ok_or_else(|| format!("unknown service type: {s}"))
    }
}

/// IP address with prefix length.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Address {
    /// Address
    pub ip: String,
    /// Prefix length
    pub prefix: u8,
}

impl Address {
    /// Create an address.
    pub fn new(ip: impl Into<String>, prefix: u8) -> Self {
        Self {
            ip: ip.into(),
            prefix,
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.ip, self.prefix)
    }
}

/// VLAN tagging mode of a connection point.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortMode {
    /// Untagged
    Access,
    /// Tagged
    #[default]
    Trunk,
}

impl PortMode {
    /// Configuration keyword.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Access => "access",
            Self::Trunk => "trunk",
        }
    }
}

/// Rate limits and class-of-service menus of a connection point.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QosSettings {
    /// Ingress policer rate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inflow_rate: Option<String>,
    /// Egress shaping rate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outflow_rate: Option<String>,
    /// Remark (rewrite rule) menu
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remark_menu: Option<String>,
    /// Egress scheduler menu
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub egress_menu: Option<String>,
}

/// One QoS field, used to mark fields for removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QosField {
    /// Ingress policer rate
    InflowRate,
    /// Egress shaping rate
    OutflowRate,
    /// Remark menu
    RemarkMenu,
    /// Egress menu
    EgressMenu,
}

impl QosField {
    /// All fields in emission order.
    pub const ALL: [QosField; 4] = [
        Self::InflowRate,
        Self::OutflowRate,
        Self::RemarkMenu,
        Self::EgressMenu,
    ];
}

impl QosSettings {
    /// Value of one field.
    pub fn get(&self, field: QosField) -> Option<&str> {
        match field {
            QosField::InflowRate => self.inflow_rate.as_deref(),
            QosField::OutflowRate => self.outflow_rate.as_deref(),
            QosField::RemarkMenu => self.remark_menu.as_deref(),
            QosField::EgressMenu => self.egress_menu.as_deref(),
        }
    }

    /// Set or clear one field.
    pub fn set(&mut self, field: QosField, value: Option<String>) {
        let slot = match field {
            QosField::InflowRate => &mut self.inflow_rate,
            QosField::OutflowRate => &mut self.outflow_rate,
            QosField::RemarkMenu => &mut self.remark_menu,
            QosField::EgressMenu => &mut self.egress_menu,
        };
        *slot = value;
    }

    /// Whether no field is set.
    pub fn is_empty(&self) -> bool {
        QosField::ALL.iter().all(|f| self.get(*f).is_none())
    }

    /// Overlay the fields set in `other`.
    pub fn overlay(&mut self, other: &QosSettings) {
        for field in QosField::ALL {
            if let Some(value) = other.get(field) {
                self.set(field, Some(value.to_string()));
            }
        }
    }
}
