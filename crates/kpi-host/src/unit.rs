use std::sync::Arc;

use kpi_types::{FulfillmentCheckRequest, KpiConfigurationUpdate};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tokio::task::{JoinError, JoinSet};

use crate::bus::ResultPublisher;
use crate::dispatcher::{BatchSummary, Dispatcher};

/// Totals reported when a processing unit stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnitSummary {
    pub requests: usize,
    pub configuration_updates: usize,
    pub published: usize,
    pub failed: usize,
}

impl UnitSummary {
    fn absorb(&mut self, joined: Result<BatchSummary, JoinError>) {
        match joined {
            Ok(batch) => {
                self.published += batch.published;
                self.failed += batch.failed;
            }
            Err(err) => tracing::warn!(error = %err, "check request task failed"),
        }
    }
}

/// Consumes configuration updates and check requests until its request queue closes or a
/// shutdown signal arrives.
pub struct ProcessingUnit<P: ?Sized> {
    dispatcher: Arc<Dispatcher<P>>,
    configuration_rx: broadcast::Receiver<Arc<KpiConfigurationUpdate>>,
    requests_rx: mpsc::Receiver<FulfillmentCheckRequest>,
}

impl<P: ResultPublisher + ?Sized + 'static> ProcessingUnit<P> {
    pub fn new(
        dispatcher: Arc<Dispatcher<P>>,
        configuration_rx: broadcast::Receiver<Arc<KpiConfigurationUpdate>>,
        requests_rx: mpsc::Receiver<FulfillmentCheckRequest>,
    ) -> Self {
        Self {
            dispatcher,
            configuration_rx,
            requests_rx,
        }
    }

    /// Runs the unit's main loop.
    ///
    /// Each request is dispatched on its own task so a slow batch does not hold up requests of
    /// other instances. At most [`Dispatcher::max_in_flight_requests`] batches run at once.
    /// In-flight batches are drained before returning.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) -> UnitSummary {
        tracing::info!("processing unit started");
        let mut summary = UnitSummary::default();
        let mut in_flight: JoinSet<BatchSummary> = JoinSet::new();
        let mut configuration_open = true;
        let mut shutdown_open = true;
        let max_in_flight = self.dispatcher.max_in_flight_requests();

        loop {
            tokio::select! {
                biased;

                signal = shutdown.recv(), if shutdown_open => match signal {
                    Ok(()) | Err(RecvError::Lagged(_)) => {
                        tracing::info!("shutdown signal received");
                        break;
                    }
                    Err(RecvError::Closed) => shutdown_open = false,
                },

                update = self.configuration_rx.recv(), if configuration_open => match update {
                    Ok(update) => {
                        summary.configuration_updates += 1;
                        self.apply_configuration(&update);
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "configuration updates lagged; applying the newest");
                    }
                    Err(RecvError::Closed) => {
                        tracing::debug!("configuration exchange closed");
                        configuration_open = false;
                    }
                },

                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    summary.absorb(joined);
                }

                // Leaving requests queued once the limit is reached makes senders wait.
                request = self.requests_rx.recv(), if in_flight.len() < max_in_flight => match request {
                    Some(request) => {
                        summary.requests += 1;
                        let dispatcher = Arc::clone(&self.dispatcher);
                        in_flight.spawn(async move { dispatcher.dispatch(request).await });
                    }
                    None => {
                        tracing::info!("request queue closed");
                        break;
                    }
                },
            }
        }

        while let Some(joined) = in_flight.join_next().await {
            summary.absorb(joined);
        }
        tracing::info!(
            requests = summary.requests,
            published = summary.published,
            failed = summary.failed,
            "processing unit stopped"
        );
        summary
    }

    fn apply_configuration(&self, update: &KpiConfigurationUpdate) {
        if let Err(err) = self.dispatcher.registry().apply_update(update) {
            tracing::error!(error = %err, "rejected configuration update; keeping previous definitions");
        }
    }
}
