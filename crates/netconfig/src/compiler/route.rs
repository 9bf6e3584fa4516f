//! Static routes with reference-counted prefixes.
//!
//! Several connection points of one slice may attach the same prefix, with
//! the same or different next hops. On the device a prefix is one route
//! container holding one entry per next hop, so both are shared groups:
//!
//! - the prefix goes only when every attachment of it is removed;
//! - otherwise a next hop goes only when every attachment using it is
//!   removed, and the route stays.
//!
//! The rule is the same for IPv4 and IPv6 prefixes.

use super::{CompileResult, Emitter, insufficient};
use crate::directive::Stage;
use crate::error::CompileError;
use crate::group::{GroupKey, Verdict};
use crate::model::{CpSpec, StaticRouteRecord, StaticRouteSpec, VlanIfRecord};
use crate::paths;

fn prefix_key(record: &StaticRouteRecord) -> GroupKey {
    GroupKey::RoutePrefix {
        slice: record.slice_name.clone(),
        prefix: record.prefix.clone(),
    }
}

fn next_hop_key(record: &StaticRouteRecord) -> GroupKey {
    GroupKey::RouteNextHop {
        slice: record.slice_name.clone(),
        prefix: record.prefix.clone(),
        next_hop: record.next_hop.clone(),
    }
}

/// Persisted attachment a route element refers to on one connection point.
///
/// Without a next hop the prefix alone must identify exactly one attachment.
pub(crate) fn resolve<'s>(
    attachments: &'s [StaticRouteRecord],
    cp: &VlanIfRecord,
    route: &StaticRouteSpec,
) -> CompileResult<&'s StaticRouteRecord> {
    let mut matches = attachments.iter().filter(|r| {
        r.if_name == cp.if_name
            && r.vlan_id == cp.vlan_id
            && r.prefix == route.prefix
            && route.next_hop.as_ref().is_none_or(|nh| &r.next_hop == nh)
    });
    let first = matches.next().ok_or_else(|| {
        insufficient(format!(
            "no static route {} via {} on {}",
            route.prefix,
            route.next_hop.as_deref().unwrap_or("any next hop"),
            cp.unit_name()
        ))
    })?;
    if matches.next().is_some() {
        return Err(CompileError::AmbiguousReference(format!(
            "static route {} on {} has several next hops",
            route.prefix,
            cp.unit_name()
        )));
    }
    Ok(first)
}

/// First pass: count one removed attachment.
pub(crate) fn count_removal(em: &mut Emitter<'_>, record: &StaticRouteRecord) {
    em.ledger.remove(prefix_key(record));
    em.ledger.remove(next_hop_key(record));
}

/// First pass: announce an attachment the request adds, so a prefix or
/// next hop that gains a member while losing another is not drained.
pub(crate) fn count_addition(em: &mut Emitter<'_>, slice_name: &str, cp: &CpSpec, route: &StaticRouteSpec) {
    let Some(next_hop) = &route.next_hop else {
        return;
    };
    let record = StaticRouteRecord {
        slice_name: slice_name.to_string(),
        if_name: cp.if_name.clone(),
        vlan_id: cp.vlan_id,
        prefix: route.prefix.clone(),
        next_hop: next_hop.clone(),
    };
    if em.state.static_routes.contains(&record) {
        return;
    }
    em.ledger.expect(prefix_key(&record));
    em.ledger.expect(next_hop_key(&record));
}

/// Second pass: emit the delete a removed attachment calls for, if any.
pub(crate) fn emit_removal(em: &mut Emitter<'_>, vrf_name: &str, record: &StaticRouteRecord) {
    if em.ledger.is_drained(&prefix_key(record)) {
        em.delete(Stage::StaticRoute, paths::static_route(vrf_name, &record.prefix));
    } else if em.ledger.is_drained(&next_hop_key(record)) {
        em.delete(
            Stage::StaticRoute,
            paths::static_next_hop(vrf_name, &record.prefix, &record.next_hop),
        );
    } else {
        log::trace!(
            "Static route {} via {} still referenced, keeping it",
            record.prefix,
            record.next_hop
        );
    }
}

/// Emit an added attachment. Already persisted attachments emit nothing.
pub(crate) fn emit_addition(
    em: &mut Emitter<'_>,
    vrf_name: &str,
    slice_name: &str,
    if_name: &str,
    vlan_id: u16,
    route: &StaticRouteSpec,
) -> CompileResult<()> {
    let Some(next_hop) = &route.next_hop else {
        return Err(insufficient(format!("static route {} needs a next hop", route.prefix)));
    };
    let record = StaticRouteRecord {
        slice_name: slice_name.to_string(),
        if_name: if_name.to_string(),
        vlan_id,
        prefix: route.prefix.clone(),
        next_hop: next_hop.clone(),
    };
    if em.state.static_routes.contains(&record) {
        return Ok(());
    }

    if em.ledger.join(prefix_key(&record)) == Verdict::FirstOfGroup {
        em.create(Stage::StaticRoute, paths::static_route(vrf_name, &record.prefix), Vec::new());
    }
    if em.ledger.join(next_hop_key(&record)) == Verdict::FirstOfGroup {
        em.create(
            Stage::StaticRoute,
            paths::static_next_hop(vrf_name, &record.prefix, &record.next_hop),
            Vec::new(),
        );
    }
    Ok(())
}
