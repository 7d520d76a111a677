use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// A callable tool as presented to the model: name, description used by the
/// model to decide when to call it, and a JSON-schema-like parameter shape.
///
/// The catalog is flat and append-only, built once at startup. Definitions
/// never change at runtime.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub parameters: ParameterSchema,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterSchema {
    #[serde(default)]
    pub properties: BTreeMap<String, PropertySchema>,
    #[serde(default)]
    pub required: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PropertySchema {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ParameterSchema {
    /// Renders the schema in the JSON-schema object form providers expect.
    pub fn to_json_schema(&self) -> Value {
        let properties: serde_json::Map<String, Value> = self
            .properties
            .iter()
            .map(|(name, property)| {
                let mut spec = serde_json::Map::new();
                spec.insert("type".to_string(), json!(property.kind));
                if let Some(description) = &property.description {
                    spec.insert("description".to_string(), json!(description));
                }
                (name.clone(), Value::Object(spec))
            })
            .collect();

        json!({
            "type": "object",
            "properties": properties,
            "required": self.required,
        })
    }
}

/// Returns the tools whose names appear in `allowed_names`, in the order of
/// `allowed_names`. Unknown names are dropped: an agent referencing a
/// retired tool degrades instead of failing at load time.
pub fn filter_tools(all: &[ToolDefinition], allowed_names: &[String]) -> Vec<ToolDefinition> {
    allowed_names
        .iter()
        .filter_map(|name| all.iter().find(|tool| &tool.name == name))
        .cloned()
        .collect()
}
