//! Resource-group reconciliation.
//!
//! Shared containers (interface tagging, VLAN, VNI, LAG bond, routing
//! instance, route prefix) exist once per group of referencing members. The
//! [`GroupLedger`] counts how many members each [`GroupKey`] has in persisted
//! state and how many a request adds or removes, and turns the counts into a
//! [`Verdict`]:
//!
//! - merge: the first member added to an empty group is `FirstOfGroup` and
//!   creates the container; every later one `Joined`.
//! - delete: a group left with no members once the request is applied is
//!   `FullyDrained` and its container goes; otherwise `PartiallyDrained`.
//!   Members the request adds to the same group count against the drain, so
//!   a request that swaps one member for another keeps the container.

use crate::error::CompileError;
use crate::model::PersistedState;
use std::collections::BTreeMap;
use std::fmt;

/// Key of a shared resource group.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum GroupKey {
    /// Connection points on one interface
    Interface(String),
    /// L2 connection points on one VLAN
    Vlan(u16),
    /// L2 connection points on one VNI
    Vni(u32),
    /// L2 connection points on one (VNI, VLAN) pair
    VniVlan {
        /// VNI
        vni: u32,
        /// VLAN
        vlan: u16,
    },
    /// Members of one LAG bond
    Bond(String),
    /// L3 connection points of one slice
    Vrf(String),
    /// Static attachments of one prefix within a slice
    RoutePrefix {
        /// Slice
        slice: String,
        /// Prefix
        prefix: String,
    },
    /// Static attachments of one (prefix, next hop) within a slice
    RouteNextHop {
        /// Slice
        slice: String,
        /// Prefix
        prefix: String,
        /// Next hop
        next_hop: String,
    },
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupKey::Interface(name) => write!(f, "interface {name}"),
            GroupKey::Vlan(vlan) => write!(f, "vlan {vlan}"),
            GroupKey::Vni(vni) => write!(f, "vni {vni}"),
            GroupKey::VniVlan { vni, vlan } => write!(f, "vni {vni} on vlan {vlan}"),
            GroupKey::Bond(name) => write!(f, "bond {name}"),
            GroupKey::Vrf(slice) => write!(f, "vrf of {slice}"),
            GroupKey::RoutePrefix { slice, prefix } => write!(f, "route {prefix} in {slice}"),
            GroupKey::RouteNextHop {
                slice,
                prefix,
                next_hop,
            } => write!(f, "route {prefix} via {next_hop} in {slice}"),
        }
    }
}

/// What happens to a group's container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Container must be created
    FirstOfGroup,
    /// Container exists (or is created earlier in this request)
    Joined,
    /// Last member removed; container goes
    FullyDrained,
    /// Members remain; container stays
    PartiallyDrained,
}

/// Outcome for one group, kept for callers and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupDecision {
    /// Group
    pub key: GroupKey,
    /// Members in persisted state
    pub present: usize,
    /// Members added or removed by the request
    pub delta: usize,
    /// Verdict
    pub verdict: Verdict,
}

/// Occurrence count per group key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Occurrences(BTreeMap<GroupKey, usize>);

impl Occurrences {
    /// Count one more occurrence of `key`.
    pub fn add(&mut self, key: GroupKey) {
        *self.0.entry(key).or_default() += 1;
    }

    /// Occurrences of `key`.
    pub fn count(&self, key: &GroupKey) -> usize {
        self.0.get(key).copied().unwrap_or(0)
    }

    /// Iterate keys and counts.
    pub fn iter(&self) -> impl Iterator<Item = (&GroupKey, usize)> {
        self.0.iter().map(|(k, v)| (k, *v))
    }

    /// Count every group of a device's persisted state.
    ///
    /// Interface, VLAN and VNI groups are device wide; routing instance and
    /// route groups are scoped to their slice.
    pub fn from_state(state: &PersistedState) -> Self {
        let mut occ = Self::default();
        for cp in &state.vlan_ifs {
            occ.add(GroupKey::Interface(cp.if_name.clone()));
            if cp.is_l3() {
                occ.add(GroupKey::Vrf(cp.slice_name.clone()));
            } else {
                occ.add(GroupKey::Vlan(cp.vlan_id));
                if let Some(vni) = cp.vni {
                    occ.add(GroupKey::Vni(vni));
                    occ.add(GroupKey::VniVlan { vni, vlan: cp.vlan_id });
                }
            }
        }
        for lag in &state.lags {
            for _ in &lag.members {
                occ.add(GroupKey::Bond(lag.lag_name.clone()));
            }
        }
        for route in &state.static_routes {
            occ.add(GroupKey::RoutePrefix {
                slice: route.slice_name.clone(),
                prefix: route.prefix.clone(),
            });
            occ.add(GroupKey::RouteNextHop {
                slice: route.slice_name.clone(),
                prefix: route.prefix.clone(),
                next_hop: route.next_hop.clone(),
            });
        }
        occ
    }
}

/// Per-request group bookkeeping.
#[derive(Debug, Clone, Default)]
pub struct GroupLedger {
    present: Occurrences,
    added: Occurrences,
    incoming: Occurrences,
    removed: Occurrences,
    decisions: Vec<GroupDecision>,
}

impl GroupLedger {
    /// Ledger over the groups present in persisted state.
    pub fn new(present: Occurrences) -> Self {
        Self {
            present,
            ..Default::default()
        }
    }

    /// Ledger over a device's persisted state.
    pub fn from_state(state: &PersistedState) -> Self {
        Self::new(Occurrences::from_state(state))
    }

    /// Members of `key` in persisted state.
    pub fn present(&self, key: &GroupKey) -> usize {
        self.present.count(key)
    }

    /// Record a member joining `key`; returns the verdict.
    ///
    /// Only the first member of a group that is empty in persisted state is
    /// `FirstOfGroup`.
    pub fn join(&mut self, key: GroupKey) -> Verdict {
        let present = self.present.count(&key);
        let already_added = self.added.count(&key);
        self.added.add(key.clone());

        let verdict = if present == 0 && already_added == 0 {
            Verdict::FirstOfGroup
        } else {
            Verdict::Joined
        };
        match self.decisions.iter_mut().find(|d| d.key == key) {
            Some(decision) => decision.delta += 1,
            None => self.decisions.push(GroupDecision {
                key,
                present,
                delta: 1,
                verdict,
            }),
        }
        verdict
    }

    /// Announce a member the request will add to `key`, before
    /// [`GroupLedger::settle`]. The matching [`GroupLedger::join`] comes later,
    /// when the member is emitted.
    pub fn expect(&mut self, key: GroupKey) {
        self.incoming.add(key);
    }

    /// Record a member leaving `key`. Verdicts are settled by [`GroupLedger::settle`]
    /// once every removal is known.
    pub fn remove(&mut self, key: GroupKey) {
        self.removed.add(key);
    }

    /// Turn removal counts into drain verdicts.
    ///
    /// A group drains when `present + incoming - removed` reaches zero.
    /// Removing more members than persisted state holds means the request
    /// references entities that do not exist.
    pub fn settle(&mut self) -> Result<(), CompileError> {
        for (key, removed) in self.removed.iter() {
            let present = self.present.count(key);
            if removed > present {
                return Err(CompileError::InsufficientData(format!(
                    "{key}: removing {removed} members but only {present} exist"
                )));
            }
            let after = present - removed + self.incoming.count(key);
            let verdict = if after == 0 {
                Verdict::FullyDrained
            } else {
                Verdict::PartiallyDrained
            };
            self.decisions.retain(|d| &d.key != key);
            self.decisions.push(GroupDecision {
                key: key.clone(),
                present,
                delta: removed,
                verdict,
            });
        }
        Ok(())
    }

    /// Whether the settled group lost its last member.
    pub fn is_drained(&self, key: &GroupKey) -> bool {
        self.verdict(key) == Some(Verdict::FullyDrained)
    }

    /// Verdict recorded for `key`.
    pub fn verdict(&self, key: &GroupKey) -> Option<Verdict> {
        self.decisions.iter().find(|d| &d.key == key).map(|d| d.verdict)
    }

    /// Every decision, in the order groups were first touched.
    pub fn decisions(&self) -> &[GroupDecision] {
        &self.decisions
    }

    /// Consume into decisions.
    pub fn into_decisions(self) -> Vec<GroupDecision> {
        self.decisions
    }
}
