//! In-process stand-in for the message broker: a broadcast exchange for configuration updates
//! and bounded queues for check requests and results.

use std::sync::Arc;

use async_trait::async_trait;
use kpi_types::{FulfillmentCheckRequest, FulfillmentCheckResult, KpiConfigurationUpdate};
use tokio::sync::{broadcast, mpsc};

use crate::error::{HostError, HostResult};

/// Destination of fulfillment results produced by a dispatcher.
#[async_trait]
pub trait ResultPublisher: Send + Sync {
    async fn publish(&self, result: FulfillmentCheckResult) -> HostResult<()>;
}

#[derive(Debug, Clone)]
pub struct ChannelPublisher {
    tx: mpsc::Sender<FulfillmentCheckResult>,
}

impl ChannelPublisher {
    pub fn new(tx: mpsc::Sender<FulfillmentCheckResult>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl ResultPublisher for ChannelPublisher {
    async fn publish(&self, result: FulfillmentCheckResult) -> HostResult<()> {
        self.tx
            .send(result)
            .await
            .map_err(|_| HostError::ChannelClosed("result"))
    }
}

/// Fan-out exchange delivering every configuration update to every subscribed unit.
#[derive(Debug, Clone)]
pub struct ConfigurationExchange {
    tx: broadcast::Sender<Arc<KpiConfigurationUpdate>>,
}

impl ConfigurationExchange {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<KpiConfigurationUpdate>> {
        self.tx.subscribe()
    }

    /// Returns the number of units that received the update. Having none is not an error: a
    /// unit that connects later asks for the current configuration.
    pub fn publish(&self, update: Arc<KpiConfigurationUpdate>) -> usize {
        self.tx.send(update).unwrap_or(0)
    }
}

/// Queues and exchanges connecting one owning service with its processing units.
#[derive(Debug)]
pub struct MessageBus {
    pub configuration: ConfigurationExchange,
    pub requests_tx: mpsc::Sender<FulfillmentCheckRequest>,
    pub requests_rx: mpsc::Receiver<FulfillmentCheckRequest>,
    pub results_tx: mpsc::Sender<FulfillmentCheckResult>,
    pub results_rx: mpsc::Receiver<FulfillmentCheckResult>,
}

impl MessageBus {
    pub fn new(capacity: usize) -> Self {
        let (requests_tx, requests_rx) = mpsc::channel(capacity);
        let (results_tx, results_rx) = mpsc::channel(capacity);
        Self {
            configuration: ConfigurationExchange::new(capacity),
            requests_tx,
            requests_rx,
            results_tx,
            results_rx,
        }
    }

    pub fn result_publisher(&self) -> ChannelPublisher {
        ChannelPublisher::new(self.results_tx.clone())
    }
}
