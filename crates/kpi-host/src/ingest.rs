use kpi_store::{KpiStore, ResultReconciler};
use kpi_types::FulfillmentCheckResult;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub stored: usize,
    pub dropped: usize,
}

/// Persists results from `results` until the queue closes. Results that cannot be stored (for
/// example for an unknown instance UID) are logged and dropped.
pub async fn run_result_ingest<S>(
    reconciler: ResultReconciler<S>,
    mut results: mpsc::Receiver<FulfillmentCheckResult>,
) -> IngestSummary
where
    S: KpiStore + ?Sized + 'static,
{
    let mut summary = IngestSummary::default();
    while let Some(message) = results.recv().await {
        let reconciler = reconciler.clone();
        let instance_uid = message.instance_uid.clone();
        let definition_id = message.definition_id;
        match tokio::task::spawn_blocking(move || reconciler.apply(&message)).await {
            Ok(Ok(_)) => summary.stored += 1,
            Ok(Err(err)) => {
                summary.dropped += 1;
                tracing::warn!(definition_id, instance_uid = %instance_uid, error = %err, "fulfillment result dropped");
            }
            Err(err) => {
                summary.dropped += 1;
                tracing::warn!(definition_id, instance_uid = %instance_uid, error = %err, "result ingestion task failed");
            }
        }
    }
    summary
}
