use std::sync::Arc;
use std::time::Duration;

use kpi_eval::{ParameterMap, evaluate_definition, parameters_from_json};
use kpi_types::{DefinitionId, FulfillmentCheckRequest, FulfillmentCheckResult, KpiDefinition};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;

use crate::bus::ResultPublisher;
use crate::config::UnitConfig;
use crate::error::{HostError, HostResult};
use crate::registry::DefinitionRegistry;

/// Outcome of dispatching one check request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    /// Definitions that applied to the request's instance.
    pub considered: usize,
    pub published: usize,
    pub failed: usize,
}

/// Evaluates every applicable definition of a request concurrently and publishes each result as
/// soon as it is ready.
pub struct Dispatcher<P: ?Sized> {
    registry: Arc<DefinitionRegistry>,
    publisher: Arc<P>,
    permits: Arc<Semaphore>,
    evaluation_timeout: Duration,
    max_in_flight_requests: usize,
}

impl<P: ResultPublisher + ?Sized + 'static> Dispatcher<P> {
    pub fn new(registry: Arc<DefinitionRegistry>, publisher: Arc<P>, config: &UnitConfig) -> Self {
        Self {
            registry,
            publisher,
            permits: Arc::new(Semaphore::new(config.max_concurrent_evaluations)),
            evaluation_timeout: config.evaluation_timeout,
            max_in_flight_requests: config.max_concurrent_evaluations,
        }
    }

    pub fn registry(&self) -> &Arc<DefinitionRegistry> {
        &self.registry
    }

    /// Check requests a processing unit may have in flight before it stops taking new ones.
    pub fn max_in_flight_requests(&self) -> usize {
        self.max_in_flight_requests
    }

    /// Returns once every evaluation task of this request has finished.
    pub async fn dispatch(&self, request: FulfillmentCheckRequest) -> BatchSummary {
        let snapshot = self.registry.snapshot();
        let definitions: Vec<Arc<KpiDefinition>> = snapshot
            .definitions_for(&request.sd_type_specification)
            .iter()
            .filter(|definition| definition.applies_to(&request.instance_uid))
            .cloned()
            .collect();
        let mut summary = BatchSummary {
            considered: definitions.len(),
            ..BatchSummary::default()
        };
        if definitions.is_empty() {
            tracing::debug!(
                instance_uid = %request.instance_uid,
                sd_type = %request.sd_type_specification,
                generation = snapshot.generation(),
                "no applicable KPI definitions"
            );
            return summary;
        }

        let parameters = Arc::new(parameters_from_json(request.parameters));
        let instance_uid: Arc<str> = Arc::from(request.instance_uid);
        let sd_type: Arc<str> = Arc::from(request.sd_type_specification);
        let mut tasks = JoinSet::new();
        for definition in definitions {
            let Some(definition_id) = definition.id else {
                summary.failed += 1;
                tracing::warn!(
                    instance_uid = %instance_uid,
                    sd_type = %sd_type,
                    user_identifier = %definition.user_identifier,
                    "KPI definition without id skipped"
                );
                continue;
            };
            let Ok(permit) = Arc::clone(&self.permits).acquire_owned().await else {
                tracing::error!("evaluation semaphore closed");
                break;
            };
            let publisher = Arc::clone(&self.publisher);
            let parameters = Arc::clone(&parameters);
            let instance_uid = Arc::clone(&instance_uid);
            let limit = self.evaluation_timeout;
            tasks.spawn(async move {
                let fulfilled =
                    evaluate_bounded(definition_id, definition, parameters, limit, permit)
                        .await
                        .map_err(|err| (definition_id, err))?;
                publisher
                    .publish(FulfillmentCheckResult {
                        instance_uid: instance_uid.to_string(),
                        definition_id,
                        fulfilled,
                    })
                    .await
                    .map_err(|err| (definition_id, err))
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(())) => summary.published += 1,
                Ok(Err((definition_id, err))) => {
                    summary.failed += 1;
                    tracing::warn!(
                        definition_id,
                        instance_uid = %instance_uid,
                        sd_type = %sd_type,
                        error = %err,
                        "KPI evaluation skipped"
                    );
                }
                Err(err) => {
                    summary.failed += 1;
                    tracing::warn!(instance_uid = %instance_uid, error = %err, "KPI evaluation task failed");
                }
            }
        }
        tracing::debug!(
            instance_uid = %instance_uid,
            considered = summary.considered,
            published = summary.published,
            failed = summary.failed,
            "check request processed"
        );
        summary
    }
}

/// Runs one evaluation on the blocking pool. The permit is held by the blocking closure, so an
/// evaluation that outlives its timeout keeps counting against the concurrency limit.
async fn evaluate_bounded(
    definition_id: DefinitionId,
    definition: Arc<KpiDefinition>,
    parameters: Arc<ParameterMap>,
    limit: Duration,
    permit: OwnedSemaphorePermit,
) -> HostResult<bool> {
    let task = tokio::task::spawn_blocking(move || {
        let _permit = permit;
        evaluate_definition(&definition, &parameters)
    });
    match tokio::time::timeout(limit, task).await {
        Ok(joined) => Ok(joined??),
        Err(_) => Err(HostError::EvaluationTimeout {
            definition_id,
            timeout: limit,
        }),
    }
}
