use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

use kpi_types::{
    DefinitionId, FulfillmentResult, InstanceSelectionMode, KpiDefinition, LogicalOperator,
    NodeId, ParameterId, SdInstance, SdInstanceId, SdParameter, SdType, SdTypeId, SdTypeRef,
    ValidationError,
};

use crate::codec::{self, AtomRow, LogicalOperationRow, NodeRow};
use crate::error::{ForeignKeyError, StoreError, StoreResult};
use crate::integrity::check_definition;
use crate::{DefinitionUpdate, KpiStore, NewSdType};

#[derive(Debug, Clone)]
struct DefinitionRecord {
    sd_type_id: SdTypeId,
    user_identifier: String,
    root_id: NodeId,
    instance_mode: InstanceSelectionMode,
    selected: BTreeSet<SdInstanceId>,
}

#[derive(Debug, Clone, Default)]
struct State {
    sd_types: BTreeMap<SdTypeId, SdType>,
    instances: BTreeMap<SdInstanceId, SdInstance>,
    definitions: BTreeMap<DefinitionId, DefinitionRecord>,
    nodes: BTreeMap<NodeId, Option<NodeId>>,
    logical: BTreeMap<NodeId, LogicalOperator>,
    atoms: BTreeMap<NodeId, AtomRow>,
    results: BTreeMap<(DefinitionId, SdInstanceId), bool>,
    last_sd_type_id: SdTypeId,
    last_parameter_id: ParameterId,
    last_instance_id: SdInstanceId,
    last_definition_id: DefinitionId,
    last_node_id: NodeId,
}

/// In-memory store. Mutations run against a copy of the state that replaces the original only
/// on success.
#[derive(Debug, Clone, Default)]
pub struct MemStore {
    state: Arc<Mutex<State>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read<T>(&self, f: impl FnOnce(&State) -> StoreResult<T>) -> StoreResult<T> {
        let guard = self
            .state
            .lock()
            .map_err(|_| StoreError::Poisoned("memory store"))?;
        f(&guard)
    }

    /// Mutates the live state. `f` must check everything before its first write.
    fn write<T>(&self, f: impl FnOnce(&mut State) -> StoreResult<T>) -> StoreResult<T> {
        let mut guard = self
            .state
            .lock()
            .map_err(|_| StoreError::Poisoned("memory store"))?;
        f(&mut guard)
    }

    fn transact<T>(&self, f: impl FnOnce(&mut State) -> StoreResult<T>) -> StoreResult<T> {
        let mut guard = self
            .state
            .lock()
            .map_err(|_| StoreError::Poisoned("memory store"))?;
        let mut draft = guard.clone();
        let out = f(&mut draft)?;
        *guard = draft;
        Ok(out)
    }
}

impl State {
    fn instance_by_uid(&self, uid: &str) -> Option<&SdInstance> {
        self.instances.values().find(|instance| instance.uid == uid)
    }

    fn node_rows(&self) -> Vec<NodeRow> {
        self.nodes
            .iter()
            .map(|(id, parent_id)| NodeRow {
                id: *id,
                parent_id: *parent_id,
            })
            .collect()
    }

    /// Validates `definition` and writes its tree; returns the new root id and selected ids.
    fn insert_tree(
        &mut self,
        definition: &KpiDefinition,
    ) -> StoreResult<(NodeId, BTreeSet<SdInstanceId>)> {
        let selected = check_definition(
            definition,
            self.sd_types.get(&definition.sd_type.id),
            |uid| Ok(self.instance_by_uid(uid).cloned()),
        )?;

        let mut last = self.last_node_id;
        let flat = codec::flatten(&definition.root, || {
            last += 1;
            last
        });
        self.last_node_id = last;
        let root_id = flat
            .root_id()
            .ok_or_else(|| codec::corrupt(0, "flattened tree has no root"))?;
        for row in &flat.nodes {
            self.nodes.insert(row.id, row.parent_id);
        }
        for row in &flat.logical {
            self.logical.insert(row.node_id, row.operator);
        }
        for row in flat.atoms {
            self.atoms.insert(row.node_id, row);
        }
        Ok((root_id, selected))
    }

    fn remove_nodes(&mut self, ids: &[NodeId]) {
        for id in ids.iter().rev() {
            self.logical.remove(id);
            self.atoms.remove(id);
            self.nodes.remove(id);
        }
    }

    fn materialize(&self, id: DefinitionId, record: &DefinitionRecord) -> StoreResult<KpiDefinition> {
        let nodes = self.node_rows();
        let reachable = codec::reachable_from(record.root_id, &nodes);
        let logical: Vec<_> = reachable
            .iter()
            .filter_map(|node_id| {
                self.logical.get(node_id).map(|operator| LogicalOperationRow {
                    node_id: *node_id,
                    operator: *operator,
                })
            })
            .collect();
        let atoms: Vec<_> = reachable
            .iter()
            .filter_map(|node_id| self.atoms.get(node_id).cloned())
            .collect();
        let root = codec::reconstruct(record.root_id, &nodes, &logical, &atoms)?;

        let specification = self
            .sd_types
            .get(&record.sd_type_id)
            .map(|sd_type| sd_type.denotation.clone())
            .ok_or(ForeignKeyError::UnknownSdType(record.sd_type_id))?;
        let mut selected_instance_uids = BTreeSet::new();
        for instance_id in &record.selected {
            let instance = self
                .instances
                .get(instance_id)
                .ok_or(ForeignKeyError::UnknownInstanceId(*instance_id))?;
            selected_instance_uids.insert(instance.uid.clone());
        }
        Ok(KpiDefinition {
            id: Some(id),
            sd_type: SdTypeRef::new(record.sd_type_id, specification),
            user_identifier: record.user_identifier.clone(),
            root,
            instance_mode: record.instance_mode,
            selected_instance_uids,
        })
    }

    fn record(&self, id: DefinitionId) -> StoreResult<&DefinitionRecord> {
        self.definitions
            .get(&id)
            .ok_or(StoreError::DefinitionNotFound(id))
    }
}

impl KpiStore for MemStore {
    fn register_sd_type(&self, sd_type: &NewSdType) -> StoreResult<SdType> {
        if sd_type.denotation.trim().is_empty() {
            return Err(ValidationError::EmptySdTypeSpecification.into());
        }
        if sd_type.parameters.iter().any(|p| p.name.is_empty()) {
            return Err(ValidationError::EmptyParameterName.into());
        }
        self.transact(|state| {
            if state
                .sd_types
                .values()
                .any(|existing| existing.denotation == sd_type.denotation)
            {
                return Err(StoreError::Duplicate {
                    entity: "SD type",
                    key: sd_type.denotation.clone(),
                });
            }
            state.last_sd_type_id += 1;
            let mut parameters = Vec::with_capacity(sd_type.parameters.len());
            for parameter in &sd_type.parameters {
                if parameters.iter().any(|p: &SdParameter| p.name == parameter.name) {
                    return Err(StoreError::Duplicate {
                        entity: "SD parameter",
                        key: parameter.name.clone(),
                    });
                }
                state.last_parameter_id += 1;
                parameters.push(SdParameter {
                    id: state.last_parameter_id,
                    name: parameter.name.clone(),
                    domain: parameter.domain,
                });
            }
            let registered = SdType {
                id: state.last_sd_type_id,
                denotation: sd_type.denotation.clone(),
                parameters,
            };
            state.sd_types.insert(registered.id, registered.clone());
            Ok(registered)
        })
    }

    fn sd_type(&self, id: SdTypeId) -> StoreResult<Option<SdType>> {
        self.read(|state| Ok(state.sd_types.get(&id).cloned()))
    }

    fn sd_types(&self) -> StoreResult<Vec<SdType>> {
        self.read(|state| Ok(state.sd_types.values().cloned().collect()))
    }

    fn register_sd_instance(&self, uid: &str, sd_type_id: SdTypeId) -> StoreResult<SdInstance> {
        if uid.is_empty() {
            return Err(ValidationError::EmptyInstanceUid.into());
        }
        self.transact(|state| {
            if !state.sd_types.contains_key(&sd_type_id) {
                return Err(ForeignKeyError::UnknownSdType(sd_type_id).into());
            }
            if state.instance_by_uid(uid).is_some() {
                return Err(StoreError::Duplicate {
                    entity: "SD instance",
                    key: uid.to_owned(),
                });
            }
            state.last_instance_id += 1;
            let instance = SdInstance {
                id: state.last_instance_id,
                uid: uid.to_owned(),
                sd_type_id,
            };
            state.instances.insert(instance.id, instance.clone());
            Ok(instance)
        })
    }

    fn sd_instance_by_uid(&self, uid: &str) -> StoreResult<Option<SdInstance>> {
        self.read(|state| Ok(state.instance_by_uid(uid).cloned()))
    }

    fn create_definition(&self, definition: &KpiDefinition) -> StoreResult<KpiDefinition> {
        self.transact(|state| {
            let (root_id, selected) = state.insert_tree(definition)?;
            state.last_definition_id += 1;
            let id = state.last_definition_id;
            let record = DefinitionRecord {
                sd_type_id: definition.sd_type.id,
                user_identifier: definition.user_identifier.clone(),
                root_id,
                instance_mode: definition.instance_mode,
                selected,
            };
            let stored = state.materialize(id, &record)?;
            state.definitions.insert(id, record);
            Ok(stored)
        })
    }

    fn update_definition(
        &self,
        id: DefinitionId,
        definition: &KpiDefinition,
    ) -> StoreResult<DefinitionUpdate> {
        self.transact(|state| {
            let old_root = state.record(id)?.root_id;
            let old_nodes = codec::reachable_from(old_root, &state.node_rows());

            let (root_id, selected) = state.insert_tree(definition)?;
            let new_nodes: BTreeSet<NodeId> =
                codec::reachable_from(root_id, &state.node_rows()).into_iter().collect();
            let reclaimed: Vec<NodeId> = old_nodes
                .into_iter()
                .filter(|node| !new_nodes.contains(node))
                .collect();
            state.remove_nodes(&reclaimed);

            let record = DefinitionRecord {
                sd_type_id: definition.sd_type.id,
                user_identifier: definition.user_identifier.clone(),
                root_id,
                instance_mode: definition.instance_mode,
                selected,
            };
            let stored = state.materialize(id, &record)?;
            state.definitions.insert(id, record);
            Ok(DefinitionUpdate {
                definition: stored,
                reclaimed_nodes: reclaimed.into_iter().collect(),
            })
        })
    }

    fn delete_definition(&self, id: DefinitionId) -> StoreResult<BTreeSet<NodeId>> {
        self.transact(|state| {
            let root_id = state.record(id)?.root_id;
            let reachable = codec::reachable_from(root_id, &state.node_rows());
            state.results.retain(|(definition_id, _), _| *definition_id != id);
            state.definitions.remove(&id);
            state.remove_nodes(&reachable);
            Ok(reachable.into_iter().collect())
        })
    }

    fn load_definition(&self, id: DefinitionId) -> StoreResult<Option<KpiDefinition>> {
        self.read(|state| match state.definitions.get(&id) {
            Some(record) => state.materialize(id, record).map(Some),
            None => Ok(None),
        })
    }

    fn load_definitions(&self) -> StoreResult<Vec<KpiDefinition>> {
        self.read(|state| {
            state
                .definitions
                .iter()
                .map(|(id, record)| state.materialize(*id, record))
                .collect()
        })
    }

    fn definition_node_ids(&self, id: DefinitionId) -> StoreResult<BTreeSet<NodeId>> {
        self.read(|state| {
            let root_id = state.record(id)?.root_id;
            Ok(codec::reachable_from(root_id, &state.node_rows())
                .into_iter()
                .collect())
        })
    }

    fn node_ids(&self) -> StoreResult<BTreeSet<NodeId>> {
        self.read(|state| Ok(state.nodes.keys().copied().collect()))
    }

    fn upsert_result(&self, result: FulfillmentResult) -> StoreResult<()> {
        self.write(|state| {
            state.record(result.definition_id)?;
            if !state.instances.contains_key(&result.instance_id) {
                return Err(ForeignKeyError::UnknownInstanceId(result.instance_id).into());
            }
            state
                .results
                .insert((result.definition_id, result.instance_id), result.fulfilled);
            Ok(())
        })
    }

    fn load_result(
        &self,
        definition_id: DefinitionId,
        instance_id: SdInstanceId,
    ) -> StoreResult<Option<FulfillmentResult>> {
        self.read(|state| {
            Ok(state
                .results
                .get(&(definition_id, instance_id))
                .map(|fulfilled| FulfillmentResult {
                    definition_id,
                    instance_id,
                    fulfilled: *fulfilled,
                }))
        })
    }

    fn load_results(&self) -> StoreResult<Vec<FulfillmentResult>> {
        self.read(|state| {
            Ok(state
                .results
                .iter()
                .map(|((definition_id, instance_id), fulfilled)| FulfillmentResult {
                    definition_id: *definition_id,
                    instance_id: *instance_id,
                    fulfilled: *fulfilled,
                })
                .collect())
        })
    }
}
