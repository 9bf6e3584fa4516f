use super::*;
use crate::directive::DirectiveKind;
use crate::group::{GroupKey, Verdict};
use crate::model::{
    Address, BgpSpec, CpSpec, EquipmentSpec, LagMemberSpec, LagSpec, QosField, QosSettings, QosSpec,
    StaticRouteSpec, VrfSpec,
};
use crate::paths;
use proptest::prelude::*;
use proptest::strategy::Strategy;

const DEVICE: &str = "leaf1";
const PREFIX: &str = "198.51.100.0/24";

fn kinds_and_paths(compiled: &Compiled) -> Vec<(DirectiveKind, TreePath)> {
    compiled.batch.iter().map(|d| (d.kind, d.path.clone())).collect()
}

fn commit(state: &PersistedState, change: &DesiredChange, op: Operation) -> PersistedState {
    compile(change, state, op).unwrap();
    state.apply_change(change, op)
}

fn bond0_with_cp() -> DesiredChange {
    let mut change = DesiredChange::new(DEVICE, ServiceType::L2Slice).with_slice("blue");
    change.lags.push(LagSpec {
        lag_name: "bond0".into(),
        minimum_links: Some(1),
        members: vec![LagMemberSpec::new("swp1"), LagMemberSpec::new("swp2")],
        ..Default::default()
    });
    change.cps.push(CpSpec::new("bond0", 100));
    change
}

fn l2_slice(units: &[(&str, u16)]) -> DesiredChange {
    let mut change = DesiredChange::new(DEVICE, ServiceType::L2Slice).with_slice("blue");
    for (if_name, vlan_id) in units {
        change.cps.push(CpSpec::new(*if_name, *vlan_id));
    }
    change
}

fn l3_cp(if_name: &str, vlan_id: u16) -> CpSpec {
    CpSpec {
        ipv4: Some(Address::new(format!("10.{}.{}.1", if_name.len(), vlan_id), 24)),
        ..CpSpec::new(if_name, vlan_id)
    }
}

fn red_vrf() -> VrfSpec {
    VrfSpec {
        vrf_name: "vrf-red".into(),
        rd: "65000:10".into(),
        rt: "target:65000:10".into(),
        l3_vni: None,
    }
}

fn l3_slice(cps: Vec<CpSpec>) -> DesiredChange {
    let mut change = DesiredChange::new(DEVICE, ServiceType::L3Slice).with_slice("red");
    change.vrf = Some(red_vrf());
    change.cps = cps;
    change
}

fn l3_delete(units: &[(String, u16)]) -> DesiredChange {
    let mut change = DesiredChange::new(DEVICE, ServiceType::L3Slice).with_slice("red");
    for (if_name, vlan_id) in units {
        change.cps.push(CpSpec::new(if_name.clone(), *vlan_id));
    }
    change
}

#[test]
fn test_lag_and_cp_merge_order() {
    let compiled = compile(&bond0_with_cp(), &PersistedState::empty(DEVICE), Operation::Merge).unwrap();

    assert_eq!(
        kinds_and_paths(&compiled),
        vec![
            (DirectiveKind::CreateSubtree, paths::bond_options("bond0")),
            (DirectiveKind::CreateSubtree, paths::bond_membership("swp1")),
            (DirectiveKind::CreateSubtree, paths::bond_membership("swp2")),
            (DirectiveKind::CreateSubtree, paths::vlan_tagging("bond0")),
            (DirectiveKind::CreateSubtree, paths::vlan(100)),
            (DirectiveKind::CreateSubtree, paths::unit("bond0", 100)),
        ]
    );
    let stages: Vec<Stage> = compiled.batch.iter().map(|d| d.stage).collect();
    assert_eq!(
        stages,
        vec![
            Stage::Bond,
            Stage::BondMember,
            Stage::BondMember,
            Stage::Container,
            Stage::Container,
            Stage::Member
        ]
    );
}

#[test]
fn test_merge_batch_builds_tree() {
    let compiled = compile(&bond0_with_cp(), &PersistedState::empty(DEVICE), Operation::Merge).unwrap();
    let tree = ConfigTree::default().apply_all(&compiled.batch).unwrap();

    assert_eq!(tree.text(&paths::unit("bond0", 100).child("vlan-id")), Some("100"));
    assert_eq!(
        tree.text(&paths::bond_membership("swp2").child("bundle")),
        Some("bond0")
    );
    assert!(tree.contains(&paths::bond_options("bond0").child("lacp").child("active")));
    assert_eq!(tree.text(&paths::vlan(100).child("vlan-id")), Some("100"));
}

#[test]
fn test_delete_one_of_two_units_on_interface() {
    let merge = l2_slice(&[("swp1", 100), ("swp1", 200)]);
    let empty = PersistedState::empty(DEVICE);
    let merged = compile(&merge, &empty, Operation::Merge).unwrap();
    let state = empty.apply_change(&merge, Operation::Merge);

    let delete = l2_slice(&[("swp1", 100)]);
    let compiled = compile(&delete, &state, Operation::Delete).unwrap();
    assert_eq!(
        kinds_and_paths(&compiled),
        vec![
            (DirectiveKind::DeleteSubtree, paths::unit("swp1", 100)),
            (DirectiveKind::DeleteSubtree, paths::vlan(100)),
        ]
    );
    assert_eq!(
        compiled.groups.iter().find(|g| g.key == GroupKey::Interface("swp1".into())).map(|g| g.verdict),
        Some(Verdict::PartiallyDrained)
    );

    let tree = ConfigTree::default()
        .apply_all(&merged.batch)
        .and_then(|t| t.apply_all(&compiled.batch))
        .unwrap();
    assert!(tree.contains(&paths::vlan_tagging("swp1")));
    assert!(tree.contains(&paths::unit("swp1", 200)));
    assert!(!tree.contains(&paths::vlan(100)));
}

#[test]
fn test_delete_missing_cp() {
    let err = compile(&l2_slice(&[("swp1", 100)]), &PersistedState::empty(DEVICE), Operation::Delete).unwrap_err();
    assert!(matches!(err, CompileError::InsufficientData(_)));
}

#[test]
fn test_vrf_group_lifecycle() {
    let empty = PersistedState::empty(DEVICE);

    let first = l3_slice(vec![l3_cp("swp1", 10)]);
    let compiled = compile(&first, &empty, Operation::Merge).unwrap();
    assert!(compiled.batch.iter().any(|d| d.kind == DirectiveKind::CreateSubtree
        && d.path == paths::instance("vrf-red")));
    let state = empty.apply_change(&first, Operation::Merge);

    let second = l3_slice(vec![l3_cp("swp2", 20)]);
    let compiled = compile(&second, &state, Operation::Merge).unwrap();
    assert!(!compiled.batch.iter().any(|d| d.path == paths::instance("vrf-red")));
    assert!(compiled.batch.iter().any(|d| d.path == paths::instance_interface("vrf-red", "swp2.20")));
    assert_eq!(
        compiled.groups.iter().find(|g| g.key == GroupKey::Vrf("red".into())).map(|g| g.verdict),
        Some(Verdict::Joined)
    );
    let state = state.apply_change(&second, Operation::Merge);

    let compiled = compile(&l3_delete(&[("swp1".into(), 10)]), &state, Operation::Delete).unwrap();
    assert!(!compiled.batch.iter().any(|d| d.path == paths::instance("vrf-red")));
    assert!(compiled.batch.iter().any(|d| d.kind == DirectiveKind::DeleteSubtree
        && d.path == paths::instance_interface("vrf-red", "swp1.10")));
    let state = state.apply_change(&l3_delete(&[("swp1".into(), 10)]), Operation::Delete);
    assert!(state.vrf("red").is_some());

    let compiled = compile(&l3_delete(&[("swp2".into(), 20)]), &state, Operation::Delete).unwrap();
    assert!(compiled.batch.iter().any(|d| d.kind == DirectiveKind::DeleteSubtree
        && d.path == paths::instance("vrf-red")));
    assert!(!compiled.batch.iter().any(|d| d.path == paths::instance_interface("vrf-red", "swp2.20")));
    let state = state.apply_change(&l3_delete(&[("swp2".into(), 20)]), Operation::Delete);
    assert!(state.vrf("red").is_none());
}

#[test]
fn test_first_l3_cp_needs_vrf() {
    let mut change = l3_slice(vec![l3_cp("swp1", 10)]);
    change.vrf = None;
    let err = compile(&change, &PersistedState::empty(DEVICE), Operation::Merge).unwrap_err();
    assert!(matches!(err, CompileError::InsufficientData(_)));
}

#[test]
fn test_l3_settings_on_l2_slice() {
    let mut change = l2_slice(&[]);
    change.cps.push(l3_cp("swp1", 10));
    let err = compile(&change, &PersistedState::empty(DEVICE), Operation::Merge).unwrap_err();
    assert!(matches!(err, CompileError::UnsupportedOperation(_)));
}

fn routed_cp(if_name: &str, vlan_id: u16, next_hop: &str) -> CpSpec {
    CpSpec {
        static_routes: vec![StaticRouteSpec::new(PREFIX, next_hop)],
        ..l3_cp(if_name, vlan_id)
    }
}

#[test]
fn test_ambiguous_route_reference() {
    let mut cp = routed_cp("swp1", 10, "192.0.2.1");
    cp.static_routes.push(StaticRouteSpec::new(PREFIX, "192.0.2.2"));
    let merge = l3_slice(vec![cp]);
    let state = commit(&PersistedState::empty(DEVICE), &merge, Operation::Merge);
    assert_eq!(state.static_routes.len(), 2);

    let mut delete = l3_delete(&[]);
    delete.cps.push(CpSpec {
        operation: Some(Operation::Merge),
        static_routes: vec![StaticRouteSpec {
            prefix: PREFIX.into(),
            ..Default::default()
        }],
        ..CpSpec::new("swp1", 10)
    });
    let err = compile(&delete, &state, Operation::Delete).unwrap_err();
    assert!(matches!(err, CompileError::AmbiguousReference(_)));

    // Naming the next hop resolves it; the other next hop keeps the route
    delete.cps[0].static_routes[0].next_hop = Some("192.0.2.2".into());
    let compiled = compile(&delete, &state, Operation::Delete).unwrap();
    assert_eq!(
        kinds_and_paths(&compiled),
        vec![(
            DirectiveKind::DeleteSubtree,
            paths::static_next_hop("vrf-red", PREFIX, "192.0.2.2")
        )]
    );
}

#[test]
fn test_cp_delete_removes_bgp_and_routes_with_unit() {
    let cp = CpSpec {
        bgp: vec![BgpSpec {
            remote_ip: "10.4.10.2".into(),
            remote_as: Some(65010),
            ..Default::default()
        }],
        ..routed_cp("swp1", 10, "10.4.10.254")
    };
    let merge = l3_slice(vec![cp, l3_cp("swp2", 20)]);
    let compiled = compile(&merge, &PersistedState::empty(DEVICE), Operation::Merge).unwrap();
    assert!(compiled.batch.iter().any(|d| d.kind == DirectiveKind::CreateSubtree
        && d.path == paths::bgp_neighbor("vrf-red", "red", "10.4.10.2")));
    let state = PersistedState::empty(DEVICE).apply_change(&merge, Operation::Merge);

    let compiled = compile(&l3_delete(&[("swp1".into(), 10)]), &state, Operation::Delete).unwrap();
    let deleted: Vec<TreePath> = compiled.batch.iter().map(|d| d.path.clone()).collect();
    assert!(deleted.contains(&paths::bgp_neighbor("vrf-red", "red", "10.4.10.2")));
    assert!(deleted.contains(&paths::static_route("vrf-red", PREFIX)));
    assert!(deleted.contains(&paths::unit("swp1", 10)));
    assert!(compiled.batch.iter().all(|d| d.kind == DirectiveKind::DeleteSubtree));
}

#[test]
fn test_replace_qos() {
    let mut merge = l2_slice(&[]);
    merge.cps.push(CpSpec {
        qos: Some(QosSpec {
            settings: QosSettings {
                inflow_rate: Some("100m".into()),
                outflow_rate: Some("100m".into()),
                ..Default::default()
            },
            ..Default::default()
        }),
        ..CpSpec::new("swp1", 100)
    });
    let state = commit(&PersistedState::empty(DEVICE), &merge, Operation::Merge);

    let mut replace = l2_slice(&[]);
    replace.cps.push(CpSpec {
        qos: Some(QosSpec {
            settings: QosSettings {
                outflow_rate: Some("1g".into()),
                ..Default::default()
            },
            remove: [QosField::InflowRate].into(),
        }),
        ..CpSpec::new("swp1", 100)
    });
    let compiled = compile(&replace, &state, Operation::Replace).unwrap();
    let unit = paths::cos_unit("swp1", 100);
    assert_eq!(
        kinds_and_paths(&compiled),
        vec![
            (DirectiveKind::SetField, unit.child("shaping-rate")),
            (DirectiveKind::DeleteSubtree, unit.child("input-policer")),
        ]
    );

    let after = state.apply_change(&replace, Operation::Replace);
    let record = after.vlan_if("swp1", 100).unwrap();
    assert_eq!(record.qos.outflow_rate.as_deref(), Some("1g"));
    assert_eq!(record.qos.inflow_rate, None);

    if let Some(qos) = replace.cps[0].qos.as_mut() {
        qos.remove = [QosField::RemarkMenu].into();
    }
    let err = compile(&replace, &state, Operation::Replace).unwrap_err();
    assert!(matches!(err, CompileError::InsufficientData(_)));
}

#[test]
fn test_replace_rejects_structural_fields() {
    let state = commit(
        &PersistedState::empty(DEVICE),
        &l2_slice(&[("swp1", 100)]),
        Operation::Merge,
    );
    let mut replace = l2_slice(&[]);
    replace.cps.push(CpSpec {
        mtu: Some(9000),
        ..CpSpec::new("swp1", 100)
    });
    let err = compile(&replace, &state, Operation::Replace).unwrap_err();
    assert!(matches!(err, CompileError::UnsupportedOperation(_)));
}

#[test]
fn test_unit_swap_keeps_shared_vlan() {
    let first = l2_slice(&[("swp1", 100)]);
    let empty = PersistedState::empty(DEVICE);
    let merged = compile(&first, &empty, Operation::Merge).unwrap();
    let state = empty.apply_change(&first, Operation::Merge);

    let mut swap = l2_slice(&[("swp1", 100), ("swp2", 100)]);
    swap.cps[0].operation = Some(Operation::Delete);
    let compiled = compile(&swap, &state, Operation::Merge).unwrap();

    let pairs = kinds_and_paths(&compiled);
    assert!(pairs.contains(&(DirectiveKind::DeleteSubtree, paths::unit("swp1", 100))));
    assert!(!pairs.contains(&(DirectiveKind::DeleteSubtree, paths::vlan(100))));
    assert_ne!(
        compiled.groups.iter().find(|g| g.key == GroupKey::Vlan(100)).map(|g| g.verdict),
        Some(Verdict::FullyDrained)
    );

    let tree = ConfigTree::default()
        .apply_all(&merged.batch)
        .and_then(|t| t.apply_all(&compiled.batch))
        .unwrap();
    assert!(tree.contains(&paths::vlan(100)));
    assert!(tree.contains(&paths::unit("swp2", 100)));
    assert!(!tree.contains(&paths::unit("swp1", 100)));
    assert!(state.apply_change(&swap, Operation::Merge).vlan_if("swp2", 100).is_some());
}

#[test]
fn test_lag_member_swap_keeps_bond() {
    let mut create = DesiredChange::new(DEVICE, ServiceType::CeLag);
    create.lags.push(LagSpec {
        lag_name: "bond1".into(),
        minimum_links: Some(1),
        members: vec![LagMemberSpec::new("swp5")],
        ..Default::default()
    });
    let state = commit(&PersistedState::empty(DEVICE), &create, Operation::Merge);

    let mut swap = create.clone();
    swap.lags[0].members = vec![
        LagMemberSpec {
            operation: Some(Operation::Delete),
            ..LagMemberSpec::new("swp5")
        },
        LagMemberSpec::new("swp6"),
    ];
    let compiled = compile(&swap, &state, Operation::Merge).unwrap();

    let pairs = kinds_and_paths(&compiled);
    assert!(pairs.contains(&(DirectiveKind::DeleteSubtree, paths::bond_membership("swp5"))));
    assert!(!pairs.contains(&(DirectiveKind::DeleteSubtree, paths::interface("bond1"))));
    assert_ne!(
        compiled.groups.iter().find(|g| g.key == GroupKey::Bond("bond1".into())).map(|g| g.verdict),
        Some(Verdict::FullyDrained)
    );
}

#[test]
fn test_lag_in_use_cannot_be_drained() {
    let state = commit(&PersistedState::empty(DEVICE), &bond0_with_cp(), Operation::Merge);

    let mut delete = DesiredChange::new(DEVICE, ServiceType::CeLag);
    delete.lags.push(LagSpec {
        lag_name: "bond0".into(),
        ..Default::default()
    });
    let err = compile(&delete, &state, Operation::Delete).unwrap_err();
    assert!(matches!(err, CompileError::UnsupportedOperation(_)));

    // Removing one member keeps the bond
    delete.lags[0].members.push(LagMemberSpec::new("swp2"));
    let compiled = compile(&delete, &state, Operation::Delete).unwrap();
    assert_eq!(
        kinds_and_paths(&compiled),
        vec![(DirectiveKind::DeleteSubtree, paths::bond_membership("swp2"))]
    );
}

fn leaf_change() -> DesiredChange {
    let mut change = DesiredChange::new(DEVICE, ServiceType::Leaf);
    change.equipment = Some(EquipmentSpec {
        hostname: "leaf1".into(),
        loopback: Some(Address::new("10.255.0.1", 32)),
        router_id: Some("10.255.0.1".into()),
        as_number: Some(65101),
        ..Default::default()
    });
    change
}

#[test]
fn test_leaf_provisioning() {
    let compiled = compile(&leaf_change(), &PersistedState::empty(DEVICE), Operation::Merge).unwrap();
    assert!(compiled.batch.iter().all(|d| d.stage == Stage::Base && d.is_leaf_update()));

    let tree = ConfigTree::default().apply_all(&compiled.batch).unwrap();
    assert_eq!(tree.text(&paths::host_name()), Some("leaf1"));
    assert_eq!(tree.text(&paths::autonomous_system()), Some("65101"));
    assert_eq!(
        tree.text(&paths::of(&["protocols", "evpn", "encapsulation"])),
        Some("vxlan")
    );

    let mut incomplete = leaf_change();
    if let Some(equipment) = incomplete.equipment.as_mut() {
        equipment.as_number = None;
    }
    let err = compile(&incomplete, &PersistedState::empty(DEVICE), Operation::Merge).unwrap_err();
    assert!(matches!(err, CompileError::InsufficientData(_)));
}

#[test]
fn test_node_delete_with_cps() {
    let state = commit(&PersistedState::empty(DEVICE), &leaf_change(), Operation::Merge);
    let state = commit(&state, &l2_slice(&[("swp1", 100)]), Operation::Merge);

    let delete = DesiredChange::new(DEVICE, ServiceType::Leaf);
    let err = compile(&delete, &state, Operation::Delete).unwrap_err();
    assert!(matches!(err, CompileError::UnsupportedOperation(_)));
}

#[test]
fn test_spine_rejects_leaf_state() {
    let state = commit(&PersistedState::empty(DEVICE), &leaf_change(), Operation::Merge);
    let mut spine = leaf_change();
    spine.service = ServiceType::Spine;
    let err = compile(&spine, &state, Operation::Merge).unwrap_err();
    assert!(matches!(err, CompileError::UnsupportedOperation(_)));
}

fn slice_change() -> impl Strategy<Value = DesiredChange> {
    (
        any::<bool>(),
        prop::collection::btree_set((1u8..4, 2u16..50), 1..5),
        any::<bool>(),
        any::<bool>(),
    )
        .prop_map(|(l3, units, with_qos, with_routes)| {
            let mut change = if l3 { l3_slice(Vec::new()) } else { l2_slice(&[]) };
            for (port, vlan) in units {
                let if_name = format!("swp{port}");
                let mut cp = CpSpec::new(if_name, vlan);
                if l3 {
                    cp.ipv4 = Some(Address::new(format!("10.{port}.{vlan}.1"), 24));
                    cp.bgp.push(BgpSpec {
                        remote_ip: format!("10.{port}.{vlan}.2"),
                        remote_as: Some(65000),
                        ..Default::default()
                    });
                    if with_routes {
                        cp.static_routes
                            .push(StaticRouteSpec::new(PREFIX, format!("10.{port}.{vlan}.254")));
                    }
                } else {
                    cp.vni = Some(10_000 + u32::from(vlan));
                }
                if with_qos {
                    cp.qos = Some(QosSpec {
                        settings: QosSettings {
                            inflow_rate: Some("100m".into()),
                            ..Default::default()
                        },
                        ..Default::default()
                    });
                }
                change.cps.push(cp);
            }
            change
        })
}

/// Route-carrying CPs `swp{i}.{100 + i}` plus an anchor CP that keeps the
/// routing instance alive. Even CPs share one next hop.
fn routed_slice(count: usize) -> (Vec<(String, u16)>, PersistedState) {
    let mut cps = vec![l3_cp("swp9", 900)];
    let mut units = Vec::new();
    for i in 0..count {
        let if_name = format!("swp{i}");
        let vlan_id = 100 + i as u16;
        cps.push(routed_cp(&if_name, vlan_id, &next_hop_of(i)));
        units.push((if_name, vlan_id));
    }
    let state = commit(&PersistedState::empty(DEVICE), &l3_slice(cps), Operation::Merge);
    (units, state)
}

fn next_hop_of(i: usize) -> String {
    if i % 2 == 0 {
        "192.0.2.1".to_string()
    } else {
        format!("192.0.2.{}", 10 + i)
    }
}

proptest! {
    #[test]
    fn test_second_merge_only_updates_leaves(change in slice_change()) {
        let empty = PersistedState::empty(DEVICE);
        let first = compile(&change, &empty, Operation::Merge).unwrap();
        prop_assert!(first.batch.iter().any(|d| d.kind == DirectiveKind::CreateSubtree));

        let state = empty.apply_change(&change, Operation::Merge);
        let second = compile(&change, &state, Operation::Merge).unwrap();
        prop_assert!(second.batch.iter().all(Directive::is_leaf_update));
        prop_assert!(second.groups.iter().all(|g| g.verdict != Verdict::FirstOfGroup));
    }

    #[test]
    fn test_shared_prefix_survives_partial_delete(count in 2usize..6, mask in any::<u8>()) {
        let removed: Vec<usize> = (0..count).filter(|i| mask & (1 << i) != 0).collect();
        prop_assume!(!removed.is_empty() && removed.len() < count);

        let (units, state) = routed_slice(count);
        let delete = l3_delete(&removed.iter().map(|i| units[*i].clone()).collect::<Vec<_>>());
        let compiled = compile(&delete, &state, Operation::Delete).unwrap();

        let route = paths::static_route("vrf-red", PREFIX);
        prop_assert!(!compiled.batch.iter().any(|d| d.path == route));

        for i in 0..count {
            let next_hop = next_hop_of(i);
            let users: Vec<usize> = (0..count).filter(|j| next_hop_of(*j) == next_hop).collect();
            let drained = users.iter().all(|j| removed.contains(j));
            let deleted = compiled
                .batch
                .iter()
                .any(|d| d.path == paths::static_next_hop("vrf-red", PREFIX, &next_hop));
            prop_assert_eq!(deleted, drained);
        }
    }

    #[test]
    fn test_last_attachment_deletes_prefix_once(count in 1usize..6) {
        let (units, state) = routed_slice(count);
        let compiled = compile(&l3_delete(&units), &state, Operation::Delete).unwrap();

        let route = paths::static_route("vrf-red", PREFIX);
        let deletes = compiled
            .batch
            .iter()
            .filter(|d| d.kind == DirectiveKind::DeleteSubtree && d.path == route)
            .count();
        prop_assert_eq!(deletes, 1);
        prop_assert!(!compiled.batch.iter().any(|d| d.path.starts_with(&route) && d.path != route));
        prop_assert!(!compiled.batch.iter().any(|d| d.path == paths::instance("vrf-red")));
    }
}
