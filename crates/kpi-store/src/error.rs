use kpi_types::{
    Comparator, DefinitionId, NodeId, ParameterId, SdInstanceId, SdTypeId, ValidationError,
    ValueDomain,
};
use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("foreign key violation: {0}")]
    ForeignKey(#[from] ForeignKeyError),
    #[error("corrupt KPI tree at node {node}: {reason}")]
    CorruptTree { node: NodeId, reason: &'static str },
    #[error("corrupt {table} row: {reason}")]
    CorruptRow {
        table: &'static str,
        reason: String,
    },
    #[error("KPI definition {0} does not exist")]
    DefinitionNotFound(DefinitionId),
    #[error("SD instance with UID '{0}' is unknown")]
    UnknownInstance(String),
    #[error("{entity} '{key}' already exists")]
    Duplicate { entity: &'static str, key: String },
    #[error("{0} lock poisoned")]
    Poisoned(&'static str),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// A definition or result refers to a device type, parameter or instance that is not registered
/// (or not registered the way it is referenced).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ForeignKeyError {
    #[error("SD type {0} does not exist")]
    UnknownSdType(SdTypeId),
    #[error("SD type {id} is '{actual}', not '{expected}'")]
    SdTypeSpecificationMismatch {
        id: SdTypeId,
        expected: String,
        actual: String,
    },
    #[error("parameter {parameter} ('{name}') does not belong to SD type {sd_type}")]
    UnknownParameter {
        sd_type: SdTypeId,
        parameter: ParameterId,
        name: String,
    },
    #[error("parameter {parameter} is named '{actual}', not '{expected}'")]
    ParameterNameMismatch {
        parameter: ParameterId,
        expected: String,
        actual: String,
    },
    #[error("parameter '{name}' holds {actual} values but comparator {comparator} needs {expected}")]
    ParameterDomainMismatch {
        name: String,
        comparator: Comparator,
        expected: ValueDomain,
        actual: ValueDomain,
    },
    #[error("SD instance '{0}' does not exist")]
    UnknownInstanceUid(String),
    #[error("SD instance {0} does not exist")]
    UnknownInstanceId(SdInstanceId),
    #[error("SD instance '{uid}' is of SD type {actual}, not {expected}")]
    InstanceOfOtherType {
        uid: String,
        expected: SdTypeId,
        actual: SdTypeId,
    },
}
