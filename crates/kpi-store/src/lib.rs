//! Relational persistence of KPI definitions: the tree codec, the store abstraction with
//! in-memory and SQLite backends, and the fulfillment result reconciler.

pub mod codec;
mod error;
mod integrity;
mod mem_store;
mod reconciler;
mod sqlite_store;

pub use codec::{AtomRow, FlatTree, LogicalOperationRow, NodeRow, flatten, reachable_from, reconstruct};
pub use error::{ForeignKeyError, StoreError, StoreResult};
pub use mem_store::MemStore;
pub use reconciler::ResultReconciler;
pub use sqlite_store::{SqliteStore, SqliteStoreConfig};

use std::collections::BTreeSet;
use std::sync::Arc;

use kpi_types::{
    DefinitionId, FulfillmentResult, KpiDefinition, NodeId, SdInstance, SdInstanceId, SdType,
    SdTypeId, ValueDomain,
};
use serde::{Deserialize, Serialize};

pub type DynKpiStore = Arc<dyn KpiStore>;

/// Parameter of an SD type being registered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSdParameter {
    pub name: String,
    #[serde(rename = "type")]
    pub domain: ValueDomain,
}

/// SD type being registered; ids are assigned by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSdType {
    pub denotation: String,
    #[serde(default)]
    pub parameters: Vec<NewSdParameter>,
}

/// Outcome of replacing a definition's tree.
#[derive(Debug, Clone, PartialEq)]
pub struct DefinitionUpdate {
    pub definition: KpiDefinition,
    /// Node ids of the previous tree that were deleted.
    pub reclaimed_nodes: BTreeSet<NodeId>,
}

/// Storage of the device registry, KPI definitions and fulfillment results.
///
/// Every mutating call is atomic: on error the store is left exactly as it was.
pub trait KpiStore: Send + Sync {
    fn register_sd_type(&self, sd_type: &NewSdType) -> StoreResult<SdType>;
    fn sd_type(&self, id: SdTypeId) -> StoreResult<Option<SdType>>;
    fn sd_types(&self) -> StoreResult<Vec<SdType>>;
    fn register_sd_instance(&self, uid: &str, sd_type_id: SdTypeId) -> StoreResult<SdInstance>;
    fn sd_instance_by_uid(&self, uid: &str) -> StoreResult<Option<SdInstance>>;

    /// Persists a new definition and its tree; returns it with its assigned id.
    fn create_definition(&self, definition: &KpiDefinition) -> StoreResult<KpiDefinition>;
    /// Replaces definition `id` wholesale and reclaims the nodes of the previous tree.
    fn update_definition(
        &self,
        id: DefinitionId,
        definition: &KpiDefinition,
    ) -> StoreResult<DefinitionUpdate>;
    /// Deletes the definition, every node reachable from its root and its results. Returns the
    /// deleted node ids.
    fn delete_definition(&self, id: DefinitionId) -> StoreResult<BTreeSet<NodeId>>;
    fn load_definition(&self, id: DefinitionId) -> StoreResult<Option<KpiDefinition>>;
    /// All definitions ordered by id.
    fn load_definitions(&self) -> StoreResult<Vec<KpiDefinition>>;
    /// Node ids reachable from the definition's root.
    fn definition_node_ids(&self, id: DefinitionId) -> StoreResult<BTreeSet<NodeId>>;
    /// Every stored node id, whichever tree it belongs to.
    fn node_ids(&self) -> StoreResult<BTreeSet<NodeId>>;

    /// Inserts or overwrites the result for `(definition_id, instance_id)`.
    fn upsert_result(&self, result: FulfillmentResult) -> StoreResult<()>;
    fn load_result(
        &self,
        definition_id: DefinitionId,
        instance_id: SdInstanceId,
    ) -> StoreResult<Option<FulfillmentResult>>;
    fn load_results(&self) -> StoreResult<Vec<FulfillmentResult>>;
}
