//! Processing-unit runtime: the definition registry refreshed by configuration updates, the
//! fan-out dispatcher evaluating check requests, the owning-side definition service and result
//! ingestion, wired through an in-process message bus.

pub mod bus;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod ingest;
pub mod registry;
pub mod service;
pub mod unit;

pub use bus::{ChannelPublisher, ConfigurationExchange, MessageBus, ResultPublisher};
pub use config::UnitConfig;
pub use dispatcher::{BatchSummary, Dispatcher};
pub use error::{HostError, HostResult};
pub use ingest::{IngestSummary, run_result_ingest};
pub use registry::{DefinitionRegistry, RegistrySnapshot};
pub use service::DefinitionService;
pub use unit::{ProcessingUnit, UnitSummary};
