//! Persisted per-device state.
//!
//! The canonical record set of one device, partitioned into categories. It is
//! the source of truth between requests: loaded before compiling a change,
//! projected forward with [`PersistedState::apply_change`] after a commit and
//! written back as one atomic batch.

use super::change::{effective, nested_op};
use super::{AclTerm, Address, CpSpec, DesiredChange, Operation, PortMode, QosSettings, ServiceType};
use crate::error::{ReconstructError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use statestore::{RecordKey, StateStore, WriteRequest};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Record categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Category {
    /// Node base settings
    Equipment,
    /// Physical ports and physical fabric links
    PhysicalIf,
    /// LAG bundles
    LagIf,
    /// Connection points
    VlanIf,
    /// Slice routing instances
    Vrf,
    /// BGP peers of L3 connection points
    BgpDetail,
    /// Static routes of L3 connection points
    StaticDetail,
    /// VRRP groups of L3 connection points
    VrrpDetail,
    /// EVPN multi-homing
    MultiHoming,
    /// Packet filters
    Acl,
}

impl Category {
    /// All categories.
    pub const ALL: [Category; 10] = [
        Self::Equipment,
        Self::PhysicalIf,
        Self::LagIf,
        Self::VlanIf,
        Self::Vrf,
        Self::BgpDetail,
        Self::StaticDetail,
        Self::VrrpDetail,
        Self::MultiHoming,
        Self::Acl,
    ];

    /// Store category name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Equipment => "equipment",
            Self::PhysicalIf => "physical_if",
            Self::LagIf => "lag_if",
            Self::VlanIf => "vlan_if",
            Self::Vrf => "vrf",
            Self::BgpDetail => "bgp_detail",
            Self::StaticDetail => "static_detail",
            Self::VrrpDetail => "vrrp_detail",
            Self::MultiHoming => "multi_homing",
            Self::Acl => "acl",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A persisted record with a category and a natural key.
trait Record: Serialize + DeserializeOwned + Clone + PartialEq {
    const CATEGORY: Category;

    fn key(&self) -> RecordKey;
}

/// Node base settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EquipmentRecord {
    /// Spine or leaf
    pub role: ServiceType,
    /// Host name
    pub hostname: String,
    /// Loopback address
    pub loopback: Option<Address>,
    /// Router id
    pub router_id: Option<String>,
    /// AS number
    pub as_number: Option<u32>,
    /// SNMP community
    #[serde(default)]
    pub snmp_community: Option<String>,
    /// NTP servers
    #[serde(default)]
    pub ntp_servers: Vec<String>,
}

impl Record for EquipmentRecord {
    const CATEGORY: Category = Category::Equipment;

    fn key(&self) -> RecordKey {
        RecordKey::new()
    }
}

/// Underlay settings of a fabric link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkRecord {
    /// Local address
    pub address: Address,
    /// Peer address
    pub peer_address: String,
    /// Peer AS
    pub peer_as: u32,
}

/// Physical port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhysicalIfRecord {
    /// Interface name
    pub if_name: String,
    /// Port speed
    #[serde(default)]
    pub speed: Option<String>,
    /// Fabric link settings when the port is an internal link
    #[serde(default)]
    pub link: Option<LinkRecord>,
}

impl Record for PhysicalIfRecord {
    const CATEGORY: Category = Category::PhysicalIf;

    fn key(&self) -> RecordKey {
        RecordKey::new().with("if_name", &self.if_name)
    }
}

/// LAG bundle with its members.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LagRecord {
    /// Bond name
    pub lag_name: String,
    /// Minimum links
    #[serde(default)]
    pub minimum_links: Option<u32>,
    /// Link speed
    #[serde(default)]
    pub link_speed: Option<String>,
    /// Member interfaces, sorted
    pub members: Vec<String>,
    /// Fabric link settings when the bundle is an internal link
    #[serde(default)]
    pub link: Option<LinkRecord>,
}

impl Record for LagRecord {
    const CATEGORY: Category = Category::LagIf;

    fn key(&self) -> RecordKey {
        RecordKey::new().with("lag_name", &self.lag_name)
    }
}

/// Connection point binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VlanIfRecord {
    /// Owning slice
    pub slice_name: String,
    /// L2 or L3 slice
    pub service: ServiceType,
    /// Interface name
    pub if_name: String,
    /// VLAN id
    pub vlan_id: u16,
    /// VNI
    #[serde(default)]
    pub vni: Option<u32>,
    /// Tagging mode
    #[serde(default)]
    pub port_mode: PortMode,
    /// IPv4 address
    #[serde(default)]
    pub ipv4: Option<Address>,
    /// IPv6 address
    #[serde(default)]
    pub ipv6: Option<Address>,
    /// MTU
    #[serde(default)]
    pub mtu: Option<u32>,
    /// QoS
    #[serde(default)]
    pub qos: QosSettings,
}

impl VlanIfRecord {
    /// Unit name used by routing instances (`swp1.100`).
    pub fn unit_name(&self) -> String {
        format!("{}.{}", self.if_name, self.vlan_id)
    }

    /// Whether this binding belongs to an L3 slice.
    pub fn is_l3(&self) -> bool {
        self.service == ServiceType::L3Slice
    }
}

impl Record for VlanIfRecord {
    const CATEGORY: Category = Category::VlanIf;

    fn key(&self) -> RecordKey {
        RecordKey::new()
            .with("if_name", &self.if_name)
            .with("vlan_id", self.vlan_id)
    }
}

/// Slice routing instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VrfRecord {
    /// Owning slice
    pub slice_name: String,
    /// Instance name
    pub vrf_name: String,
    /// Route distinguisher
    pub rd: String,
    /// Route target
    pub rt: String,
    /// L3 VNI
    #[serde(default)]
    pub l3_vni: Option<u32>,
}

impl Record for VrfRecord {
    const CATEGORY: Category = Category::Vrf;

    fn key(&self) -> RecordKey {
        RecordKey::new().with("slice_name", &self.slice_name)
    }
}

/// BGP peer of an L3 connection point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BgpRecord {
    /// Owning slice
    pub slice_name: String,
    /// Interface
    pub if_name: String,
    /// VLAN
    pub vlan_id: u16,
    /// Peer address
    pub remote_ip: String,
    /// Peer AS
    pub remote_as: u32,
    /// Local address
    #[serde(default)]
    pub local_ip: Option<String>,
}

impl Record for BgpRecord {
    const CATEGORY: Category = Category::BgpDetail;

    fn key(&self) -> RecordKey {
        RecordKey::new()
            .with("if_name", &self.if_name)
            .with("vlan_id", self.vlan_id)
            .with("remote_ip", &self.remote_ip)
    }
}

/// Static route attachment: one (prefix, next hop) on one connection point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticRouteRecord {
    /// Owning slice
    pub slice_name: String,
    /// Interface
    pub if_name: String,
    /// VLAN
    pub vlan_id: u16,
    /// Destination prefix
    pub prefix: String,
    /// Next hop
    pub next_hop: String,
}

impl Record for StaticRouteRecord {
    const CATEGORY: Category = Category::StaticDetail;

    fn key(&self) -> RecordKey {
        RecordKey::new()
            .with("if_name", &self.if_name)
            .with("vlan_id", self.vlan_id)
            .with("prefix", &self.prefix)
            .with("next_hop", &self.next_hop)
    }
}

/// VRRP group of an L3 connection point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VrrpRecord {
    /// Owning slice
    pub slice_name: String,
    /// Interface
    pub if_name: String,
    /// VLAN
    pub vlan_id: u16,
    /// Group id
    pub group_id: u8,
    /// Virtual address
    pub virtual_address: String,
    /// Priority
    #[serde(default)]
    pub priority: Option<u8>,
}

impl Record for VrrpRecord {
    const CATEGORY: Category = Category::VrrpDetail;

    fn key(&self) -> RecordKey {
        RecordKey::new()
            .with("if_name", &self.if_name)
            .with("vlan_id", self.vlan_id)
            .with("group_id", self.group_id)
    }
}

/// EVPN multi-homing pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiHomingRecord {
    /// Anycast VTEP address
    pub anycast_address: String,
    /// Peer leaf address
    pub peer_address: String,
    /// System MAC
    pub system_mac: String,
}

impl Record for MultiHomingRecord {
    const CATEGORY: Category = Category::MultiHoming;

    fn key(&self) -> RecordKey {
        RecordKey::new()
    }
}

/// Packet filter and its binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclRecord {
    /// Filter name
    pub filter_name: String,
    /// Terms
    pub terms: Vec<AclTerm>,
    /// Bound interface
    #[serde(default)]
    pub if_name: Option<String>,
    /// Bound VLAN unit
    #[serde(default)]
    pub vlan_id: Option<u16>,
}

impl Record for AclRecord {
    const CATEGORY: Category = Category::Acl;

    fn key(&self) -> RecordKey {
        RecordKey::new().with("filter_name", &self.filter_name)
    }
}

/// Canonical record set of one device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedState {
    /// Device name
    pub device: String,
    /// Node base settings
    pub equipment: Option<EquipmentRecord>,
    /// Physical ports
    pub physical_ifs: Vec<PhysicalIfRecord>,
    /// LAG bundles
    pub lags: Vec<LagRecord>,
    /// Connection points
    pub vlan_ifs: Vec<VlanIfRecord>,
    /// Routing instances
    pub vrfs: Vec<VrfRecord>,
    /// BGP peers
    pub bgp_peers: Vec<BgpRecord>,
    /// Static route attachments
    pub static_routes: Vec<StaticRouteRecord>,
    /// VRRP groups
    pub vrrp_groups: Vec<VrrpRecord>,
    /// Multi-homing
    pub multi_homing: Option<MultiHomingRecord>,
    /// Packet filters
    pub acls: Vec<AclRecord>,
}

fn read_category<R: Record>(store: &dyn StateStore, device: &str) -> Result<Vec<R>> {
    store
        .read(device, R::CATEGORY.as_str())?
        .into_iter()
        .map(|record| Ok(serde_json::from_value(record.data)?))
        .collect()
}

fn diff_category<R: Record>(device: &str, old: &[R], new: &[R], out: &mut Vec<WriteRequest>) -> Result<()> {
    let before: BTreeMap<RecordKey, &R> = old.iter().map(|r| (r.key(), r)).collect();
    let after: BTreeMap<RecordKey, &R> = new.iter().map(|r| (r.key(), r)).collect();

    for key in before.keys() {
        if !after.contains_key(key) {
            out.push(WriteRequest::delete(device, R::CATEGORY.as_str(), key.clone()));
        }
    }
    for (key, record) in &after {
        if before.get(key) != Some(record) {
            out.push(WriteRequest::upsert(
                device,
                R::CATEGORY.as_str(),
                key.clone(),
                serde_json::to_value(record)?,
            ));
        }
    }
    Ok(())
}

fn sort_records<R: Record>(records: &mut Vec<R>) {
    records.sort_by_cached_key(|r| r.key().encode());
    records.dedup_by(|a, b| a.key() == b.key());
}

impl PersistedState {
    /// Empty state for a device.
    pub fn empty(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            ..Default::default()
        }
    }

    /// Load every category of a device from the store.
    pub fn load(store: &dyn StateStore, device: &str) -> Result<Self> {
        let mut state = Self {
            device: device.to_string(),
            equipment: read_category::<EquipmentRecord>(store, device)?.into_iter().next(),
            physical_ifs: read_category(store, device)?,
            lags: read_category(store, device)?,
            vlan_ifs: read_category(store, device)?,
            vrfs: read_category(store, device)?,
            bgp_peers: read_category(store, device)?,
            static_routes: read_category(store, device)?,
            vrrp_groups: read_category(store, device)?,
            multi_homing: read_category::<MultiHomingRecord>(store, device)?.into_iter().next(),
            acls: read_category(store, device)?,
        };
        state.normalize();
        log::debug!(
            "Loaded state for {device}: {} connection points, {} lags",
            state.vlan_ifs.len(),
            state.lags.len()
        );
        Ok(state)
    }

    /// Store writes that turn `old` into `new`.
    ///
    /// Meant to be applied with one `write_all` so a multi-category update
    /// commits or rolls back as a whole.
    pub fn write_requests_from(old: &PersistedState, new: &PersistedState) -> Result<Vec<WriteRequest>> {
        let device = new.device.as_str();
        let mut out = Vec::new();
        diff_category(device, old.equipment.as_slice(), new.equipment.as_slice(), &mut out)?;
        diff_category(device, &old.physical_ifs, &new.physical_ifs, &mut out)?;
        diff_category(device, &old.lags, &new.lags, &mut out)?;
        diff_category(device, &old.vlan_ifs, &new.vlan_ifs, &mut out)?;
        diff_category(device, &old.vrfs, &new.vrfs, &mut out)?;
        diff_category(device, &old.bgp_peers, &new.bgp_peers, &mut out)?;
        diff_category(device, &old.static_routes, &new.static_routes, &mut out)?;
        diff_category(device, &old.vrrp_groups, &new.vrrp_groups, &mut out)?;
        diff_category(device, old.multi_homing.as_slice(), new.multi_homing.as_slice(), &mut out)?;
        diff_category(device, &old.acls, &new.acls, &mut out)?;
        Ok(out)
    }

    /// Whether no record exists.
    pub fn is_empty(&self) -> bool {
        self.equipment.is_none()
            && self.physical_ifs.is_empty()
            && self.lags.is_empty()
            && self.vlan_ifs.is_empty()
            && self.vrfs.is_empty()
            && self.bgp_peers.is_empty()
            && self.static_routes.is_empty()
            && self.vrrp_groups.is_empty()
            && self.multi_homing.is_none()
            && self.acls.is_empty()
    }

    /// Sort every category by natural key and drop duplicate keys.
    pub fn normalize(&mut self) {
        sort_records(&mut self.physical_ifs);
        for lag in &mut self.lags {
            lag.members.sort();
            lag.members.dedup();
        }
        sort_records(&mut self.lags);
        sort_records(&mut self.vlan_ifs);
        sort_records(&mut self.vrfs);
        sort_records(&mut self.bgp_peers);
        sort_records(&mut self.static_routes);
        sort_records(&mut self.vrrp_groups);
        sort_records(&mut self.acls);
    }

    /// Connection point on interface + VLAN.
    pub fn vlan_if(&self, if_name: &str, vlan_id: u16) -> Option<&VlanIfRecord> {
        self.vlan_ifs
            .iter()
            .find(|v| v.if_name == if_name && v.vlan_id == vlan_id)
    }

    /// LAG by name.
    pub fn lag(&self, lag_name: &str) -> Option<&LagRecord> {
        self.lags.iter().find(|l| l.lag_name == lag_name)
    }

    /// Routing instance of a slice.
    pub fn vrf(&self, slice_name: &str) -> Option<&VrfRecord> {
        self.vrfs.iter().find(|v| v.slice_name == slice_name)
    }

    /// Names of every slice with at least one record.
    pub fn slice_names(&self) -> BTreeSet<String> {
        self.vlan_ifs
            .iter()
            .map(|v| v.slice_name.clone())
            .chain(self.vrfs.iter().map(|v| v.slice_name.clone()))
            .collect()
    }

    /// Records of one slice only.
    pub fn slice(&self, slice_name: &str) -> PersistedState {
        PersistedState {
            device: self.device.clone(),
            vlan_ifs: self.vlan_ifs.iter().filter(|r| r.slice_name == slice_name).cloned().collect(),
            vrfs: self.vrfs.iter().filter(|r| r.slice_name == slice_name).cloned().collect(),
            bgp_peers: self.bgp_peers.iter().filter(|r| r.slice_name == slice_name).cloned().collect(),
            static_routes: self
                .static_routes
                .iter()
                .filter(|r| r.slice_name == slice_name)
                .cloned()
                .collect(),
            vrrp_groups: self
                .vrrp_groups
                .iter()
                .filter(|r| r.slice_name == slice_name)
                .cloned()
                .collect(),
            ..PersistedState::empty(&self.device)
        }
    }

    /// Everything except the records of one slice.
    pub fn without_slice(&self, slice_name: &str) -> PersistedState {
        let mut rest = self.clone();
        rest.vlan_ifs.retain(|r| r.slice_name != slice_name);
        rest.vrfs.retain(|r| r.slice_name != slice_name);
        rest.bgp_peers.retain(|r| r.slice_name != slice_name);
        rest.static_routes.retain(|r| r.slice_name != slice_name);
        rest.vrrp_groups.retain(|r| r.slice_name != slice_name);
        rest
    }

    /// Node-level records: equipment, ports, LAGs, multi-homing and filters.
    pub fn node_part(&self) -> PersistedState {
        PersistedState {
            device: self.device.clone(),
            equipment: self.equipment.clone(),
            physical_ifs: self.physical_ifs.clone(),
            lags: self.lags.clone(),
            multi_homing: self.multi_homing.clone(),
            acls: self.acls.clone(),
            ..PersistedState::empty(&self.device)
        }
    }

    /// Everything except the node-level records.
    pub fn without_node(&self) -> PersistedState {
        PersistedState {
            equipment: None,
            physical_ifs: Vec::new(),
            lags: Vec::new(),
            multi_homing: None,
            acls: Vec::new(),
            ..self.clone()
        }
    }

    /// Copy with every interface name passed through `map`.
    ///
    /// An empty map keeps all names. LAG bundles are logical interfaces and
    /// keep their name unless the map lists them; any other name missing
    /// from a non-empty map is an error.
    pub fn rename_interfaces(
        &self,
        map: &BTreeMap<String, String>,
    ) -> std::result::Result<PersistedState, ReconstructError> {
        if map.is_empty() {
            return Ok(self.clone());
        }

        let lag_names: BTreeSet<&str> = self.lags.iter().map(|l| l.lag_name.as_str()).collect();
        let rename = |name: &str| -> std::result::Result<String, ReconstructError> {
            if let Some(new) = map.get(name) {
                Ok(new.clone())
            } else if lag_names.contains(name) {
                Ok(name.to_string())
            } else {
                Err(ReconstructError::UnmappedInterface(name.to_string()))
            }
        };

        let mut out = self.clone();
        for r in &mut out.physical_ifs {
            r.if_name = rename(&r.if_name)?;
        }
        for r in &mut out.lags {
            r.lag_name = rename(&r.lag_name)?;
            for m in &mut r.members {
                *m = rename(m)?;
            }
        }
        for r in &mut out.vlan_ifs {
            r.if_name = rename(&r.if_name)?;
        }
        for r in &mut out.bgp_peers {
            r.if_name = rename(&r.if_name)?;
        }
        for r in &mut out.static_routes {
            r.if_name = rename(&r.if_name)?;
        }
        for r in &mut out.vrrp_groups {
            r.if_name = rename(&r.if_name)?;
        }
        for r in &mut out.acls {
            if let Some(name) = &r.if_name {
                r.if_name = Some(rename(name)?);
            }
        }
        out.normalize();
        Ok(out)
    }

    /// Project a committed change onto this state.
    ///
    /// Pure: the compiler has already rejected anything inconsistent, so
    /// references to missing records are ignored here.
    pub fn apply_change(&self, change: &DesiredChange, op: Operation) -> PersistedState {
        let mut next = self.clone();
        next.apply_equipment(change, op);
        next.apply_internal_links(change, op);
        next.apply_lags(change, op);
        next.apply_cps(change, op);
        next.apply_vrf(change, op);
        next.apply_acls(change, op);
        next.normalize();
        next
    }

    fn apply_equipment(&mut self, change: &DesiredChange, op: Operation) {
        let Some(spec) = &change.equipment else {
            return;
        };

        match op {
            Operation::Delete => {
                self.equipment = None;
                self.multi_homing = None;
                self.physical_ifs.retain(|p| p.link.is_some());
                for port in &mut self.physical_ifs {
                    port.speed = None;
                }
            }
            Operation::Merge | Operation::Replace => {
                let role = if change.service.is_node() {
                    change.service
                } else {
                    self.equipment.as_ref().map_or(ServiceType::Leaf, |e| e.role)
                };
                let existing = self.equipment.take();
                self.equipment = Some(EquipmentRecord {
                    role,
                    hostname: spec.hostname.clone(),
                    loopback: spec
                        .loopback
                        .clone()
                        .or_else(|| existing.as_ref().and_then(|e| e.loopback.clone())),
                    router_id: spec
                        .router_id
                        .clone()
                        .or_else(|| existing.as_ref().and_then(|e| e.router_id.clone())),
                    as_number: spec.as_number.or_else(|| existing.as_ref().and_then(|e| e.as_number)),
                    snmp_community: spec
                        .snmp_community
                        .clone()
                        .or_else(|| existing.as_ref().and_then(|e| e.snmp_community.clone())),
                    ntp_servers: if spec.ntp_servers.is_empty() {
                        existing.map(|e| e.ntp_servers).unwrap_or_default()
                    } else {
                        spec.ntp_servers.clone()
                    },
                });

                for port in &spec.physical_ifs {
                    match self.physical_ifs.iter_mut().find(|p| p.if_name == port.if_name) {
                        Some(existing) => {
                            if port.speed.is_some() {
                                existing.speed.clone_from(&port.speed);
                            }
                        }
                        None => self.physical_ifs.push(PhysicalIfRecord {
                            if_name: port.if_name.clone(),
                            speed: port.speed.clone(),
                            link: None,
                        }),
                    }
                }

                if let Some(mh) = &spec.multi_homing {
                    self.multi_homing = Some(MultiHomingRecord {
                        anycast_address: mh.anycast_address.clone(),
                        peer_address: mh.peer_address.clone(),
                        system_mac: mh.system_mac.clone(),
                    });
                }
            }
        }
    }

    fn apply_internal_links(&mut self, change: &DesiredChange, op: Operation) {
        for spec in &change.internal_links {
            let link_op = effective(spec.operation, op);
            let link = match (&spec.address, &spec.peer_address, spec.peer_as) {
                (Some(address), Some(peer_address), Some(peer_as)) => Some(LinkRecord {
                    address: address.clone(),
                    peer_address: peer_address.clone(),
                    peer_as,
                }),
                _ => None,
            };
            let is_lag = !spec.members.is_empty() || self.lag(&spec.if_name).is_some();

            match (link_op, is_lag) {
                (Operation::Delete, true) => self.lags.retain(|l| l.lag_name != spec.if_name),
                (Operation::Delete, false) => {
                    for port in &mut self.physical_ifs {
                        if port.if_name == spec.if_name {
                            port.link = None;
                        }
                    }
                    self.physical_ifs
                        .retain(|p| p.link.is_some() || p.speed.is_some());
                }
                (_, true) => match self.lags.iter_mut().find(|l| l.lag_name == spec.if_name) {
                    Some(lag) => {
                        if !spec.members.is_empty() {
                            lag.members.clone_from(&spec.members);
                        }
                        if spec.minimum_links.is_some() {
                            lag.minimum_links = spec.minimum_links;
                        }
                        if link.is_some() {
                            lag.link = link;
                        }
                    }
                    None => self.lags.push(LagRecord {
                        lag_name: spec.if_name.clone(),
                        minimum_links: spec.minimum_links,
                        link_speed: None,
                        members: spec.members.clone(),
                        link,
                    }),
                },
                (_, false) => match self.physical_ifs.iter_mut().find(|p| p.if_name == spec.if_name) {
                    Some(port) => {
                        if link.is_some() {
                            port.link = link;
                        }
                    }
                    None => self.physical_ifs.push(PhysicalIfRecord {
                        if_name: spec.if_name.clone(),
                        speed: None,
                        link,
                    }),
                },
            }
        }
    }

    fn apply_lags(&mut self, change: &DesiredChange, op: Operation) {
        for spec in &change.lags {
            let lag_op = effective(spec.operation, op);

            if lag_op == Operation::Delete {
                if spec.members.is_empty() {
                    self.lags.retain(|l| l.lag_name != spec.lag_name);
                    continue;
                }
                if let Some(lag) = self.lags.iter_mut().find(|l| l.lag_name == spec.lag_name) {
                    lag.members
                        .retain(|m| !spec.members.iter().any(|s| &s.if_name == m));
                }
                self.lags
                    .retain(|l| l.lag_name != spec.lag_name || !l.members.is_empty());
                continue;
            }

            let index = match self.lags.iter().position(|l| l.lag_name == spec.lag_name) {
                Some(index) => index,
                None => {
                    self.lags.push(LagRecord {
                        lag_name: spec.lag_name.clone(),
                        minimum_links: None,
                        link_speed: None,
                        members: Vec::new(),
                        link: None,
                    });
                    self.lags.len() - 1
                }
            };
            let lag = &mut self.lags[index];
            if spec.minimum_links.is_some() {
                lag.minimum_links = spec.minimum_links;
            }
            if spec.link_speed.is_some() {
                lag.link_speed.clone_from(&spec.link_speed);
            }
            for member in &spec.members {
                match nested_op(lag_op, op, member.operation) {
                    Operation::Delete => lag.members.retain(|m| m != &member.if_name),
                    Operation::Merge | Operation::Replace => {
                        if !lag.members.contains(&member.if_name) {
                            lag.members.push(member.if_name.clone());
                        }
                    }
                }
            }
        }
    }

    fn remove_cp_details(&mut self, if_name: &str, vlan_id: u16) {
        self.bgp_peers
            .retain(|r| r.if_name != if_name || r.vlan_id != vlan_id);
        self.static_routes
            .retain(|r| r.if_name != if_name || r.vlan_id != vlan_id);
        self.vrrp_groups
            .retain(|r| r.if_name != if_name || r.vlan_id != vlan_id);
    }

    fn apply_cps(&mut self, change: &DesiredChange, op: Operation) {
        let slice = change.slice().to_string();

        for cp in &change.cps {
            let cp_op = effective(cp.operation, op);

            match cp_op {
                Operation::Delete => {
                    self.vlan_ifs
                        .retain(|v| v.if_name != cp.if_name || v.vlan_id != cp.vlan_id);
                    self.remove_cp_details(&cp.if_name, cp.vlan_id);
                    continue;
                }
                Operation::Replace => {
                    if let (Some(qos), Some(record)) = (
                        &cp.qos,
                        self.vlan_ifs
                            .iter_mut()
                            .find(|v| v.if_name == cp.if_name && v.vlan_id == cp.vlan_id),
                    ) {
                        record.qos.overlay(&qos.settings);
                        for field in &qos.remove {
                            record.qos.set(*field, None);
                        }
                    }
                    continue;
                }
                Operation::Merge => {}
            }

            // A merge-tagged CP inside a delete request is kept as is
            if op != Operation::Delete {
                self.upsert_cp(change.service, &slice, cp);
            }

            for bgp in &cp.bgp {
                let key_matches =
                    |r: &BgpRecord| r.if_name == cp.if_name && r.vlan_id == cp.vlan_id && r.remote_ip == bgp.remote_ip;
                match nested_op(cp_op, op, bgp.operation) {
                    Operation::Delete => self.bgp_peers.retain(|r| !key_matches(r)),
                    Operation::Merge | Operation::Replace => {
                        let existing = self.bgp_peers.iter().position(|r| key_matches(r));
                        let record = BgpRecord {
                            slice_name: slice.clone(),
                            if_name: cp.if_name.clone(),
                            vlan_id: cp.vlan_id,
                            remote_ip: bgp.remote_ip.clone(),
                            remote_as: bgp
                                .remote_as
                                .or_else(|| existing.map(|i| self.bgp_peers[i].remote_as))
                                .unwrap_or_default(),
                            local_ip: bgp
                                .local_ip
                                .clone()
                                .or_else(|| existing.and_then(|i| self.bgp_peers[i].local_ip.clone())),
                        };
                        match existing {
                            Some(i) => self.bgp_peers[i] = record,
                            None => self.bgp_peers.push(record),
                        }
                    }
                }
            }

            for route in &cp.static_routes {
                let matches = |r: &StaticRouteRecord| {
                    r.if_name == cp.if_name
                        && r.vlan_id == cp.vlan_id
                        && r.prefix == route.prefix
                        && route.next_hop.as_ref().is_none_or(|nh| &r.next_hop == nh)
                };
                match nested_op(cp_op, op, route.operation) {
                    Operation::Delete => self.static_routes.retain(|r| !matches(r)),
                    Operation::Merge | Operation::Replace => {
                        if let Some(next_hop) = &route.next_hop
                            && !self.static_routes.iter().any(|r| matches(r))
                        {
                            self.static_routes.push(StaticRouteRecord {
                                slice_name: slice.clone(),
                                if_name: cp.if_name.clone(),
                                vlan_id: cp.vlan_id,
                                prefix: route.prefix.clone(),
                                next_hop: next_hop.clone(),
                            });
                        }
                    }
                }
            }

            if let Some(vrrp) = &cp.vrrp {
                let key_matches = |r: &VrrpRecord| {
                    r.if_name == cp.if_name && r.vlan_id == cp.vlan_id && r.group_id == vrrp.group_id
                };
                match nested_op(cp_op, op, vrrp.operation) {
                    Operation::Delete => self.vrrp_groups.retain(|r| !key_matches(r)),
                    Operation::Merge | Operation::Replace => {
                        let existing = self.vrrp_groups.iter().position(|r| key_matches(r));
                        let record = VrrpRecord {
                            slice_name: slice.clone(),
                            if_name: cp.if_name.clone(),
                            vlan_id: cp.vlan_id,
                            group_id: vrrp.group_id,
                            virtual_address: vrrp
                                .virtual_address
                                .clone()
                                .or_else(|| existing.map(|i| self.vrrp_groups[i].virtual_address.clone()))
                                .unwrap_or_default(),
                            priority: vrrp.priority.or_else(|| existing.and_then(|i| self.vrrp_groups[i].priority)),
                        };
                        match existing {
                            Some(i) => self.vrrp_groups[i] = record,
                            None => self.vrrp_groups.push(record),
                        }
                    }
                }
            }
        }

        // A routing instance lives as long as its slice has an L3 binding here
        if change.service == ServiceType::L3Slice {
            let still_used = self
                .vlan_ifs
                .iter()
                .any(|v| v.slice_name == slice && v.is_l3());
            if !still_used {
                self.vrfs.retain(|v| v.slice_name != slice);
            }
        }
    }

    fn upsert_cp(&mut self, service: ServiceType, slice: &str, cp: &CpSpec) {
        match self
            .vlan_ifs
            .iter_mut()
            .find(|v| v.if_name == cp.if_name && v.vlan_id == cp.vlan_id)
        {
            Some(record) => {
                if cp.vni.is_some() {
                    record.vni = cp.vni;
                }
                if let Some(mode) = cp.port_mode {
                    record.port_mode = mode;
                }
                if cp.ipv4.is_some() {
                    record.ipv4.clone_from(&cp.ipv4);
                }
                if cp.ipv6.is_some() {
                    record.ipv6.clone_from(&cp.ipv6);
                }
                if cp.mtu.is_some() {
                    record.mtu = cp.mtu;
                }
                if let Some(qos) = &cp.qos {
                    record.qos.overlay(&qos.settings);
                }
            }
            None => self.vlan_ifs.push(VlanIfRecord {
                slice_name: slice.to_string(),
                service,
                if_name: cp.if_name.clone(),
                vlan_id: cp.vlan_id,
                vni: cp.vni,
                port_mode: cp.port_mode.unwrap_or_default(),
                ipv4: cp.ipv4.clone(),
                ipv6: cp.ipv6.clone(),
                mtu: cp.mtu,
                qos: cp.qos.as_ref().map(|q| q.settings.clone()).unwrap_or_default(),
            }),
        }
    }

    fn apply_vrf(&mut self, change: &DesiredChange, op: Operation) {
        let (Some(spec), Operation::Merge) = (&change.vrf, op) else {
            return;
        };
        let slice = change.slice();
        let has_l3 = self
            .vlan_ifs
            .iter()
            .any(|v| v.slice_name == slice && v.is_l3());
        if !has_l3 {
            return;
        }
        let record = VrfRecord {
            slice_name: slice.to_string(),
            vrf_name: spec.vrf_name.clone(),
            rd: spec.rd.clone(),
            rt: spec.rt.clone(),
            l3_vni: spec.l3_vni,
        };
        self.vrfs.retain(|v| v.slice_name != slice);
        self.vrfs.push(record);
    }

    fn apply_acls(&mut self, change: &DesiredChange, op: Operation) {
        for spec in &change.acls {
            match effective(spec.operation, op) {
                Operation::Delete => self.acls.retain(|a| a.filter_name != spec.filter_name),
                Operation::Merge | Operation::Replace => {
                    let existing = self.acls.iter().position(|a| a.filter_name == spec.filter_name);
                    let mut record = existing.map_or_else(
                        || AclRecord {
                            filter_name: spec.filter_name.clone(),
                            terms: Vec::new(),
                            if_name: None,
                            vlan_id: None,
                        },
                        |i| self.acls[i].clone(),
                    );
                    if !spec.terms.is_empty() {
                        record.terms.clone_from(&spec.terms);
                    }
                    if spec.if_name.is_some() {
                        record.if_name.clone_from(&spec.if_name);
                        record.vlan_id = spec.vlan_id;
                    }
                    match existing {
                        Some(i) => self.acls[i] = record,
                        None => self.acls.push(record),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{LagMemberSpec, LagSpec, QosField, QosSpec, StaticRouteSpec, VrfSpec};
    use statestore::{SqliteStore, WriteOp};

    fn l3_cp(if_name: &str, vlan: u16) -> CpSpec {
        CpSpec {
            ipv4: Some(Address::new("10.0.0.1", 24)),
            ..CpSpec::new(if_name, vlan)
        }
    }

    fn l3_change() -> DesiredChange {
        let mut change = DesiredChange::new("leaf1", ServiceType::L3Slice).with_slice("tenant-a");
        let mut cp = l3_cp("swp1", 100);
        cp.static_routes.push(StaticRouteSpec::new("192.168.0.0/24", "10.0.0.254"));
        change.cps.push(cp);
        change.vrf = Some(VrfSpec {
            vrf_name: "vrf-a".into(),
            rd: "65000:1".into(),
            rt: "target:65000:1".into(),
            l3_vni: None,
        });
        change
    }

    #[test]
    fn test_merge_then_delete_cp() {
        let state = PersistedState::empty("leaf1").apply_change(&l3_change(), Operation::Merge);
        assert_eq!(state.vlan_ifs.len(), 1);
        assert_eq!(state.static_routes.len(), 1);
        assert_eq!(state.vrf("tenant-a").unwrap().vrf_name, "vrf-a");

        let mut delete = DesiredChange::new("leaf1", ServiceType::L3Slice).with_slice("tenant-a");
        delete.cps.push(CpSpec::new("swp1", 100));
        let state = state.apply_change(&delete, Operation::Delete);
        // Last L3 binding gone takes the routing instance with it
        assert!(state.is_empty());
    }

    #[test]
    fn test_merge_tagged_cp_in_delete_keeps_binding() {
        let state = PersistedState::empty("leaf1").apply_change(&l3_change(), Operation::Merge);

        let mut delete = DesiredChange::new("leaf1", ServiceType::L3Slice).with_slice("tenant-a");
        let mut cp = CpSpec::new("swp1", 100);
        cp.operation = Some(Operation::Merge);
        cp.static_routes.push(StaticRouteSpec::new("192.168.0.0/24", "10.0.0.254"));
        delete.cps.push(cp);

        let state = state.apply_change(&delete, Operation::Delete);
        assert_eq!(state.vlan_ifs.len(), 1);
        assert!(state.static_routes.is_empty());
        assert!(state.vrf("tenant-a").is_some());
    }

    #[test]
    fn test_replace_qos() {
        let mut change = DesiredChange::new("leaf1", ServiceType::L2Slice).with_slice("s");
        change.cps.push(CpSpec {
            qos: Some(QosSpec {
                settings: QosSettings {
                    inflow_rate: Some("100m".into()),
                    egress_menu: Some("gold".into()),
                    ..Default::default()
                },
                ..Default::default()
            }),
            ..CpSpec::new("swp1", 10)
        });
        let state = PersistedState::empty("leaf1").apply_change(&change, Operation::Merge);

        let mut replace = DesiredChange::new("leaf1", ServiceType::L2Slice).with_slice("s");
        replace.cps.push(CpSpec {
            qos: Some(QosSpec {
                settings: QosSettings {
                    inflow_rate: Some("200m".into()),
                    ..Default::default()
                },
                remove: [QosField::EgressMenu].into_iter().collect(),
            }),
            ..CpSpec::new("swp1", 10)
        });
        let state = state.apply_change(&replace, Operation::Replace);
        let qos = &state.vlan_if("swp1", 10).unwrap().qos;
        assert_eq!(qos.inflow_rate.as_deref(), Some("200m"));
        assert_eq!(qos.egress_menu, None);
    }

    #[test]
    fn test_lag_member_removal_drains_record() {
        let mut change = DesiredChange::new("leaf1", ServiceType::CeLag);
        change.lags.push(LagSpec {
            lag_name: "bond0".into(),
            members: vec![LagMemberSpec::new("swp1"), LagMemberSpec::new("swp2")],
            ..Default::default()
        });
        let state = PersistedState::empty("leaf1").apply_change(&change, Operation::Merge);
        assert_eq!(state.lag("bond0").unwrap().members, vec!["swp1", "swp2"]);

        let mut delete = DesiredChange::new("leaf1", ServiceType::CeLag);
        delete.lags.push(LagSpec {
            lag_name: "bond0".into(),
            members: vec![LagMemberSpec::new("swp1")],
            ..Default::default()
        });
        let partial = state.apply_change(&delete, Operation::Delete);
        assert_eq!(partial.lag("bond0").unwrap().members, vec!["swp2"]);

        delete.lags[0].members.clear();
        assert!(state.apply_change(&delete, Operation::Delete).lags.is_empty());
    }

    #[test]
    fn test_rename_interfaces() {
        let state = PersistedState::empty("leaf1").apply_change(&l3_change(), Operation::Merge);
        let map: BTreeMap<String, String> = [("swp1".to_string(), "swp9".to_string())].into_iter().collect();
        let renamed = state.rename_interfaces(&map).unwrap();
        assert_eq!(renamed.vlan_ifs[0].if_name, "swp9");
        assert_eq!(renamed.static_routes[0].if_name, "swp9");

        let map: BTreeMap<String, String> = [("swp2".to_string(), "swp9".to_string())].into_iter().collect();
        assert_eq!(
            state.rename_interfaces(&map).unwrap_err(),
            ReconstructError::UnmappedInterface("swp1".into())
        );
    }

    #[test]
    fn test_write_requests_and_load() {
        let store = SqliteStore::open_in_memory().unwrap();
        let empty = PersistedState::empty("leaf1");
        let state = empty.apply_change(&l3_change(), Operation::Merge);

        let writes = PersistedState::write_requests_from(&empty, &state).unwrap();
        assert!(writes.iter().all(|w| w.op == WriteOp::Upsert));
        store.write_all(&writes).unwrap();

        let loaded = PersistedState::load(&store, "leaf1").unwrap();
        assert_eq!(loaded, state);

        // Nothing to write when nothing changed
        assert!(PersistedState::write_requests_from(&loaded, &state).unwrap().is_empty());

        let writes = PersistedState::write_requests_from(&state, &empty).unwrap();
        assert!(writes.iter().all(|w| w.op == WriteOp::Delete));
        store.write_all(&writes).unwrap();
        assert!(PersistedState::load(&store, "leaf1").unwrap().is_empty());
    }

    #[test]
    fn test_slice_partition() {
        let mut state = PersistedState::empty("leaf1").apply_change(&l3_change(), Operation::Merge);
        let mut other = DesiredChange::new("leaf1", ServiceType::L2Slice).with_slice("tenant-b");
        other.cps.push(CpSpec::new("swp2", 200));
        state = state.apply_change(&other, Operation::Merge);

        assert_eq!(
            state.slice_names().into_iter().collect::<Vec<_>>(),
            vec!["tenant-a", "tenant-b"]
        );
        let b = state.slice("tenant-b");
        assert_eq!(b.vlan_ifs.len(), 1);
        assert!(b.vrfs.is_empty());
        assert_eq!(state.without_slice("tenant-b").vlan_ifs.len(), 1);
    }
}
