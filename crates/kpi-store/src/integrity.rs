use std::collections::BTreeSet;

use kpi_types::{KpiDefinition, SdInstance, SdInstanceId, SdType, validate_definition};

use crate::error::{ForeignKeyError, StoreResult};

/// Checks a definition against the device registry before it is persisted.
///
/// Returns the ids of the selected instances. `lookup_instance` resolves an instance UID.
pub(crate) fn check_definition(
    definition: &KpiDefinition,
    sd_type: Option<&SdType>,
    mut lookup_instance: impl FnMut(&str) -> StoreResult<Option<SdInstance>>,
) -> StoreResult<BTreeSet<SdInstanceId>> {
    validate_definition(definition)?;

    let type_ref = &definition.sd_type;
    let sd_type = sd_type.ok_or(ForeignKeyError::UnknownSdType(type_ref.id))?;
    if sd_type.denotation != type_ref.specification {
        return Err(ForeignKeyError::SdTypeSpecificationMismatch {
            id: sd_type.id,
            expected: type_ref.specification.clone(),
            actual: sd_type.denotation.clone(),
        }
        .into());
    }

    for atom in definition.root.atoms() {
        let reference = atom.parameter();
        let parameter =
            sd_type
                .parameter(reference.id)
                .ok_or_else(|| ForeignKeyError::UnknownParameter {
                    sd_type: sd_type.id,
                    parameter: reference.id,
                    name: reference.name.clone(),
                })?;
        if parameter.name != reference.name {
            return Err(ForeignKeyError::ParameterNameMismatch {
                parameter: parameter.id,
                expected: reference.name.clone(),
                actual: parameter.name.clone(),
            }
            .into());
        }
        let expected = atom.comparator().domain();
        if parameter.domain != expected {
            return Err(ForeignKeyError::ParameterDomainMismatch {
                name: parameter.name.clone(),
                comparator: atom.comparator(),
                expected,
                actual: parameter.domain,
            }
            .into());
        }
    }

    let mut selected = BTreeSet::new();
    for uid in &definition.selected_instance_uids {
        let instance = lookup_instance(uid)?
            .ok_or_else(|| ForeignKeyError::UnknownInstanceUid(uid.clone()))?;
        if instance.sd_type_id != sd_type.id {
            return Err(ForeignKeyError::InstanceOfOtherType {
                uid: uid.clone(),
                expected: sd_type.id,
                actual: instance.sd_type_id,
            }
            .into());
        }
        selected.insert(instance.id);
    }
    Ok(selected)
}
