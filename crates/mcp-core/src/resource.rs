//! Resource and action descriptors.
//!
//! A [`Resource`] groups the [`ActionSchema`]s a capability exposes. Both are
//! immutable once handed to the registry; replacing one means unregistering
//! and registering again.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Category of a registered resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceType {
    /// Curated reference knowledge.
    KnowledgeBase,
    /// Read/write access to stored records.
    DataSource,
    /// Operational or computational service.
    Service,
    /// Model inference or simulation.
    Model,
    /// Gateway-internal capability.
    System,
}

impl ResourceType {
    /// Wire representation (`KNOWLEDGE_BASE`, ...).
    pub fn as_str(self) -> &'static str {
        match self {
            Self::KnowledgeBase => "KNOWLEDGE_BASE",
            Self::DataSource => "DATA_SOURCE",
            Self::Service => "SERVICE",
            Self::Model => "MODEL",
            Self::System => "SYSTEM",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declared type of an action parameter.
///
/// Only the primitive JSON types are checked at runtime. Any other declared
/// type name is carried through as [`ParamType::Other`] and never rejected.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ParamType {
    /// JSON string.
    String,
    /// JSON number (integer or float).
    Number,
    /// JSON boolean.
    Boolean,
    /// JSON object.
    Object,
    /// JSON array.
    Array,
    /// Accepts any value.
    Any,
    /// Non-primitive type name, not checked.
    Other(String),
}

impl ParamType {
    /// The declared type name.
    pub fn name(&self) -> &str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Object => "object",
            Self::Array => "array",
            Self::Any => "any",
            Self::Other(name) => name,
        }
    }

    /// Whether `value` satisfies this type.
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Object => value.is_object(),
            Self::Array => value.is_array(),
            Self::Any | Self::Other(_) => true,
        }
    }
}

impl From<String> for ParamType {
    fn from(s: String) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "string" => Self::String,
            "number" => Self::Number,
            "boolean" => Self::Boolean,
            "object" => Self::Object,
            "array" => Self::Array,
            "any" => Self::Any,
            _ => Self::Other(s),
        }
    }
}

impl From<&str> for ParamType {
    fn from(s: &str) -> Self {
        Self::from(s.to_owned())
    }
}

impl From<ParamType> for String {
    fn from(t: ParamType) -> Self {
        t.name().to_owned()
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Schema for a single action parameter.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParamSpec {
    /// Declared type.
    #[serde(rename = "type")]
    pub param_type: ParamType,
    /// Whether the parameter must be present and non-null.
    #[serde(default)]
    pub required: bool,
    /// Value used when an optional parameter is omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    /// Human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ParamSpec {
    /// A required parameter of the given type.
    pub fn required(param_type: impl Into<ParamType>) -> Self {
        Self {
            param_type: param_type.into(),
            required: true,
            default: None,
            description: None,
        }
    }

    /// An optional parameter of the given type.
    pub fn optional(param_type: impl Into<ParamType>) -> Self {
        Self {
            param_type: param_type.into(),
            required: false,
            default: None,
            description: None,
        }
    }

    /// Set the default value.
    #[must_use]
    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    /// Set the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// An operation exposed by a resource.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionSchema {
    /// Action identifier, unique within its resource.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
    /// Parameter schemas keyed by parameter name.
    #[serde(default)]
    pub param_specs: HashMap<String, ParamSpec>,
    /// Free-form description of the result shape.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_spec: Option<Value>,
}

impl ActionSchema {
    /// Create an action with no parameters.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            param_specs: HashMap::new(),
            return_spec: None,
        }
    }

    /// Set the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Declare a parameter.
    #[must_use]
    pub fn with_param(mut self, name: impl Into<String>, spec: ParamSpec) -> Self {
        let _ = self.param_specs.insert(name.into(), spec);
        self
    }

    /// Describe the result shape.
    #[must_use]
    pub fn with_return_spec(mut self, spec: Value) -> Self {
        self.return_spec = Some(spec);
        self
    }
}

/// A named capability grouping one or more actions.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    /// Unique resource identifier.
    pub id: String,
    /// Resource category.
    #[serde(rename = "type")]
    pub resource_type: ResourceType,
    /// Display name.
    pub name: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
    /// Descriptor version.
    #[serde(default = "default_version")]
    pub version: String,
    /// Actions keyed by action ID.
    #[serde(default)]
    pub actions: HashMap<String, ActionSchema>,
}

fn default_version() -> String {
    "1.0.0".to_owned()
}

impl Resource {
    /// Create a resource with no actions.
    pub fn new(id: impl Into<String>, resource_type: ResourceType, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            resource_type,
            name: name.into(),
            description: String::new(),
            version: default_version(),
            actions: HashMap::new(),
        }
    }

    /// Set the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the version.
    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Add an action, keyed by its ID.
    #[must_use]
    pub fn with_action(mut self, action: ActionSchema) -> Self {
        let _ = self.actions.insert(action.id.clone(), action);
        self
    }

    /// Look up an action by ID.
    pub fn action(&self, action_id: &str) -> Option<&ActionSchema> {
        self.actions.get(action_id)
    }

    /// Discovery projection of this resource.
    pub fn summary(&self) -> ResourceSummary {
        ResourceSummary {
            id: self.id.clone(),
            resource_type: self.resource_type,
            name: self.name.clone(),
            description: self.description.clone(),
        }
    }
}

/// The fields of a resource listed by discovery.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResourceSummary {
    /// Resource identifier.
    pub id: String,
    /// Resource category.
    #[serde(rename = "type")]
    pub resource_type: ResourceType,
    /// Display name.
    pub name: String,
    /// Human-readable description.
    pub description: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn health_data() -> Resource {
        Resource::new("health-data", ResourceType::DataSource, "Health Data")
            .with_description("Per-user health records")
            .with_action(
                ActionSchema::new("get-data", "Get data")
                    .with_param("userId", ParamSpec::required("string"))
                    .with_param("limit", ParamSpec::optional("number").with_default(json!(10))),
            )
    }

    #[test]
    fn resource_type_wire_names() {
        let json = serde_json::to_string(&ResourceType::KnowledgeBase).unwrap();
        assert_eq!(json, "\"KNOWLEDGE_BASE\"");
        let back: ResourceType = serde_json::from_str("\"DATA_SOURCE\"").unwrap();
        assert_eq!(back, ResourceType::DataSource);
        assert_eq!(ResourceType::System.to_string(), "SYSTEM");
    }

    #[test]
    fn param_type_parses_primitives_case_insensitively() {
        assert_eq!(ParamType::from("String"), ParamType::String);
        assert_eq!(ParamType::from("ARRAY"), ParamType::Array);
        assert_eq!(ParamType::from("date"), ParamType::Other("date".into()));
    }

    #[test]
    fn param_type_matches() {
        assert!(ParamType::String.matches(&json!("x")));
        assert!(!ParamType::String.matches(&json!(1)));
        assert!(ParamType::Number.matches(&json!(1.5)));
        assert!(ParamType::Boolean.matches(&json!(false)));
        assert!(ParamType::Object.matches(&json!({})));
        assert!(ParamType::Array.matches(&json!([])));
        assert!(ParamType::Any.matches(&json!(null)));
        assert!(ParamType::Other("date".into()).matches(&json!(42)));
    }

    #[test]
    fn param_type_serializes_as_name() {
        let spec = ParamSpec::required("number");
        let v = serde_json::to_value(&spec).unwrap();
        assert_eq!(v["type"], "number");
        assert_eq!(v["required"], true);
        assert!(v.get("default").is_none());
    }

    #[test]
    fn builder_keys_actions_by_id() {
        let res = health_data();
        assert_eq!(res.version, "1.0.0");
        let action = res.action("get-data").unwrap();
        assert!(action.param_specs["userId"].required);
        assert_eq!(action.param_specs["limit"].default, Some(json!(10)));
        assert!(res.action("missing").is_none());
    }

    #[test]
    fn resource_deserializes_from_descriptor_json() {
        let res: Resource = serde_json::from_value(json!({
            "id": "tcm-kb",
            "type": "KNOWLEDGE_BASE",
            "name": "TCM",
            "actions": {
                "lookup": {
                    "id": "lookup",
                    "name": "Lookup",
                    "paramSpecs": {"term": {"type": "string", "required": true}}
                }
            }
        }))
        .unwrap();
        assert_eq!(res.resource_type, ResourceType::KnowledgeBase);
        assert_eq!(res.version, "1.0.0");
        assert_eq!(res.actions["lookup"].param_specs["term"].param_type, ParamType::String);
    }

    #[test]
    fn summary_wire_shape() {
        let v = serde_json::to_value(health_data().summary()).unwrap();
        assert_eq!(
            v,
            json!({
                "id": "health-data",
                "type": "DATA_SOURCE",
                "name": "Health Data",
                "description": "Per-user health records"
            })
        );
    }
}
