use schemars::{schema_for, JsonSchema};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

/// A flat record the model fills in under `json_schema` strict mode.
///
/// Strict mode rejects `$ref`, so fields are limited to scalars, options of
/// scalars and arrays of scalars. Implemented for any `JsonSchema + DeserializeOwned`.
pub trait StructuredOutput: JsonSchema + DeserializeOwned {
    /// Root schema with the draft marker dropped and the object sealed.
    fn openai_schema() -> Value {
        let mut value = serde_json::to_value(schema_for!(Self)).unwrap_or_default();
        if let Value::Object(root) = &mut value {
            root.remove("$schema");
            seal(root);
        }
        value
    }

    fn type_name() -> String {
        <Self as JsonSchema>::schema_name()
    }
}

impl<T: JsonSchema + DeserializeOwned> StructuredOutput for T {}

/// Strict mode wants every property listed as required, nullable ones
/// included, and no extras.
fn seal(object: &mut Map<String, Value>) {
    let names: Vec<Value> = object
        .get("properties")
        .and_then(Value::as_object)
        .map(|props| props.keys().cloned().map(Value::String).collect())
        .unwrap_or_default();
    object.insert("required".to_string(), Value::Array(names));
    object.insert("additionalProperties".to_string(), Value::Bool(false));
}
