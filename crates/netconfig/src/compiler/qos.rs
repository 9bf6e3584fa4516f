//! Class-of-service settings of connection points.

use super::{CompileResult, Emitter, insufficient};
use crate::directive::Stage;
use crate::model::{QosField, QosSettings, QosSpec, VlanIfRecord};
use crate::paths;

/// New connection point: one subtree with every set field.
pub(crate) fn emit_new(em: &mut Emitter<'_>, if_name: &str, vlan_id: u16, settings: &QosSettings) {
    if settings.is_empty() {
        return;
    }
    let leaves = QosField::ALL
        .into_iter()
        .filter_map(|field| {
            settings
                .get(field)
                .map(|value| (paths::of(&[paths::qos_leaf(field)]), Some(value.to_string())))
        })
        .collect();
    em.create(Stage::Qos, paths::cos_unit(if_name, vlan_id), leaves);
}

/// Existing connection point: leaf updates for every set field.
pub(crate) fn emit_update(em: &mut Emitter<'_>, if_name: &str, vlan_id: u16, settings: &QosSettings) {
    for field in QosField::ALL {
        if let Some(value) = settings.get(field) {
            em.set(
                Stage::Qos,
                paths::cos_unit(if_name, vlan_id).child(paths::qos_leaf(field)),
                value,
            );
        }
    }
}

/// Replace: set the given fields and remove the marked ones. Only fields
/// present in persisted state can be removed.
pub(crate) fn emit_replace(em: &mut Emitter<'_>, record: &VlanIfRecord, spec: &QosSpec) -> CompileResult<()> {
    emit_update(em, &record.if_name, record.vlan_id, &spec.settings);
    for field in &spec.remove {
        if spec.settings.get(*field).is_some() {
            continue;
        }
        if record.qos.get(*field).is_none() {
            return Err(insufficient(format!(
                "{} on {}.{} has no {} to remove",
                record.slice_name,
                record.if_name,
                record.vlan_id,
                paths::qos_leaf(*field)
            )));
        }
        em.delete(
            Stage::Qos,
            paths::cos_unit(&record.if_name, record.vlan_id).child(paths::qos_leaf(*field)),
        );
    }
    Ok(())
}

/// Removed connection point. The whole interface entry goes once its last
/// connection point is gone.
pub(crate) fn emit_removal(em: &mut Emitter<'_>, record: &VlanIfRecord, interface_drained: bool) {
    if record.qos.is_empty() {
        return;
    }
    let path = if interface_drained {
        paths::cos_interface(&record.if_name)
    } else {
        paths::cos_unit(&record.if_name, record.vlan_id)
    };
    em.delete(Stage::Qos, path);
}
