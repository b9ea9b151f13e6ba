use std::sync::Arc;

use kpi_types::{DefinitionId, FulfillmentCheckResult, FulfillmentResult, SdInstanceId};

use crate::KpiStore;
use crate::error::{StoreError, StoreResult};

/// Persists fulfillment results coming back from processing units.
#[derive(Debug)]
pub struct ResultReconciler<S: ?Sized> {
    store: Arc<S>,
}

impl<S: ?Sized> Clone for ResultReconciler<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: KpiStore + ?Sized> ResultReconciler<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Resolves the instance UID of a result message and upserts the result.
    pub fn apply(&self, message: &FulfillmentCheckResult) -> StoreResult<FulfillmentResult> {
        let instance = self
            .store
            .sd_instance_by_uid(&message.instance_uid)?
            .ok_or_else(|| StoreError::UnknownInstance(message.instance_uid.clone()))?;
        self.upsert(message.definition_id, instance.id, message.fulfilled)
    }

    /// Overwrites the stored result for the pair, inserting it when absent.
    pub fn upsert(
        &self,
        definition_id: DefinitionId,
        instance_id: SdInstanceId,
        fulfilled: bool,
    ) -> StoreResult<FulfillmentResult> {
        let result = FulfillmentResult {
            definition_id,
            instance_id,
            fulfilled,
        };
        self.store.upsert_result(result)?;
        tracing::debug!(definition_id, instance_id, fulfilled, "fulfillment result stored");
        Ok(result)
    }

    pub fn list_results(&self) -> StoreResult<Vec<FulfillmentResult>> {
        self.store.load_results()
    }
}
