//! KPI definition data model: predicate trees, definitions, fulfillment results and the
//! cross-process transport format.

mod model;
pub mod transport;
pub mod validate;

pub use model::*;
pub use transport::{
    FulfillmentCheckRequest, FulfillmentCheckResult, KpiConfigurationUpdate, KpiDefinitionTf,
    KpiNodeTf, KpiNodeTfType, TransportError,
};
pub use validate::{ValidationError, validate_definition};

