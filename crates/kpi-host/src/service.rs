use std::collections::BTreeSet;
use std::sync::Arc;

use kpi_store::{DefinitionUpdate, KpiStore, StoreResult};
use kpi_types::transport::build_configuration_update;
use kpi_types::{DefinitionId, KpiConfigurationUpdate, KpiDefinition, NodeId};

use crate::bus::ConfigurationExchange;
use crate::error::HostResult;

/// Owning-side management of KPI definitions. Every successful change is followed by a fresh
/// configuration update on the exchange.
pub struct DefinitionService<S: ?Sized> {
    store: Arc<S>,
    exchange: ConfigurationExchange,
}

impl<S: KpiStore + ?Sized + 'static> DefinitionService<S> {
    pub fn new(store: Arc<S>, exchange: ConfigurationExchange) -> Self {
        Self { store, exchange }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    async fn blocking<T, F>(&self, f: F) -> HostResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&S) -> StoreResult<T> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        Ok(tokio::task::spawn_blocking(move || f(&store)).await??)
    }

    pub async fn create(&self, definition: KpiDefinition) -> HostResult<KpiDefinition> {
        let stored = self
            .blocking(move |store| store.create_definition(&definition))
            .await?;
        tracing::info!(
            definition_id = stored.id,
            sd_type = %stored.sd_type.specification,
            nodes = stored.root.node_count(),
            "KPI definition created"
        );
        self.publish_current_configuration().await?;
        Ok(stored)
    }

    pub async fn update(
        &self,
        id: DefinitionId,
        definition: KpiDefinition,
    ) -> HostResult<DefinitionUpdate> {
        let update = self
            .blocking(move |store| store.update_definition(id, &definition))
            .await?;
        tracing::info!(
            definition_id = id,
            reclaimed = update.reclaimed_nodes.len(),
            "KPI definition updated"
        );
        self.publish_current_configuration().await?;
        Ok(update)
    }

    pub async fn delete(&self, id: DefinitionId) -> HostResult<BTreeSet<NodeId>> {
        let removed = self
            .blocking(move |store| store.delete_definition(id))
            .await?;
        tracing::info!(definition_id = id, nodes = removed.len(), "KPI definition deleted");
        self.publish_current_configuration().await?;
        Ok(removed)
    }

    pub async fn get(&self, id: DefinitionId) -> HostResult<Option<KpiDefinition>> {
        self.blocking(move |store| store.load_definition(id)).await
    }

    pub async fn list(&self) -> HostResult<Vec<KpiDefinition>> {
        self.blocking(|store| store.load_definitions()).await
    }

    /// Builds the configuration update from every stored definition and broadcasts it. Also
    /// answers a processing unit that has just connected.
    pub async fn publish_current_configuration(&self) -> HostResult<Arc<KpiConfigurationUpdate>> {
        let definitions = self.list().await?;
        let update = Arc::new(build_configuration_update(&definitions)?);
        let receivers = self.exchange.publish(Arc::clone(&update));
        tracing::debug!(
            sd_types = update.len(),
            definitions = definitions.len(),
            receivers,
            "configuration update published"
        );
        Ok(update)
    }
}
