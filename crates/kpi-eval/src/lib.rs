//! KPI fulfillment interpreter plus the dynamically-typed parameter value model.

mod eval;
mod value;

pub use eval::{EvalError, EvalResult, evaluate, evaluate_definition};
pub use value::{ParameterMap, Value, parameters_from_json};
