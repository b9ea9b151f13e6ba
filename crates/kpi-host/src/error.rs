use std::time::Duration;

use kpi_eval::EvalError;
use kpi_store::StoreError;
use kpi_types::{DefinitionId, TransportError};
use thiserror::Error;

pub type HostResult<T> = Result<T, HostError>;

#[derive(Debug, Error)]
pub enum HostError {
    #[error(transparent)]
    Eval(#[from] EvalError),
    #[error("evaluation of definition {definition_id} exceeded {timeout:?}")]
    EvaluationTimeout {
        definition_id: DefinitionId,
        timeout: Duration,
    },
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("invalid configuration {key}={value}: {reason}")]
    Config {
        key: &'static str,
        value: String,
        reason: String,
    },
    #[error("{0} channel closed")]
    ChannelClosed(&'static str),
    #[error("task failed: {0}")]
    Join(String),
}

impl From<tokio::task::JoinError> for HostError {
    fn from(err: tokio::task::JoinError) -> Self {
        HostError::Join(err.to_string())
    }
}
