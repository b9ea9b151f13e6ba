use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

/// Telemetry parameters of one SD instance keyed by parameter name.
pub type ParameterMap = IndexMap<String, Value>;

/// Runtime value of a telemetry parameter. Snapshots come from untyped JSON, so any shape can
/// show up; atoms decide at evaluation time whether it fits.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
    List(Vec<Value>),
    Record(IndexMap<String, Value>),
}

impl Value {
    /// Human-readable kind string used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::Text(_) => "text",
            Value::List(_) => "list",
            Value::Record(_) => "record",
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Number(value as f64)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<JsonValue> for Value {
    fn from(value: JsonValue) -> Self {
        match value {
            JsonValue::Null => Value::Null,
            JsonValue::Bool(flag) => Value::Bool(flag),
            // Integers beyond 2^53 lose precision, like every other JSON number consumer.
            JsonValue::Number(number) => number.as_f64().map_or(Value::Null, Value::Number),
            JsonValue::String(text) => Value::Text(text),
            JsonValue::Array(items) => Value::List(items.into_iter().map(Value::from).collect()),
            JsonValue::Object(fields) => Value::Record(
                fields
                    .into_iter()
                    .map(|(key, value)| (key, Value::from(value)))
                    .collect(),
            ),
        }
    }
}

/// Converts the `parameters` object of a fulfillment-check request.
pub fn parameters_from_json(parameters: Map<String, JsonValue>) -> ParameterMap {
    parameters
        .into_iter()
        .map(|(name, value)| (name, Value::from(value)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn converts_json_snapshot() {
        let JsonValue::Object(raw) = json!({
            "temp": 22,
            "source": "WS_in",
            "relay": { "on": true },
            "missing": null
        }) else {
            unreachable!()
        };
        let params = parameters_from_json(raw);
        assert_eq!(params["temp"], Value::Number(22.0));
        assert_eq!(params["source"], Value::Text("WS_in".into()));
        assert_eq!(params["relay"].kind(), "record");
        assert_eq!(params["missing"], Value::Null);
    }
}
