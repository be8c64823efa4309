//! Typed block configuration, one variant per block kind.
//!
//! Raw block configs are decoded once when a workflow is compiled. Values that
//! may carry `{{ }}` references stay as JSON and are resolved per execution.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use super::types::BlockKind;

/// Decoded configuration of a block.
#[derive(Debug, Clone, PartialEq)]
pub enum BlockConfig {
    Intake(IntakeConfig),
    DatastoreQuery(DatastoreQueryConfig),
    OutboundCall(OutboundCallConfig),
    Conditional(ConditionalConfig),
    Transform(TransformConfig),
    Respond(RespondConfig),
}

impl BlockConfig {
    /// Decode a raw config for a block of `kind`. A null config decodes as `{}`.
    pub fn decode(kind: BlockKind, raw: &Value) -> Result<Self, String> {
        let raw = if raw.is_null() {
            Value::Object(Default::default())
        } else {
            raw.clone()
        };
        let config = match kind {
            BlockKind::Intake => BlockConfig::Intake(from_value(raw)?),
            BlockKind::DatastoreQuery => {
                let config: DatastoreQueryConfig = from_value(raw)?;
                config.check()?;
                BlockConfig::DatastoreQuery(config)
            }
            BlockKind::OutboundCall => {
                let config: OutboundCallConfig = from_value(raw)?;
                if config.url.trim().is_empty() {
                    return Err("'url' must not be empty".to_string());
                }
                BlockConfig::OutboundCall(config)
            }
            BlockKind::Conditional => BlockConfig::Conditional(from_value(raw)?),
            BlockKind::Transform => BlockConfig::Transform(from_value(raw)?),
            BlockKind::Respond => {
                let config: RespondConfig = from_value(raw)?;
                config.check()?;
                BlockConfig::Respond(config)
            }
        };
        Ok(config)
    }

    pub fn kind(&self) -> BlockKind {
        match self {
            BlockConfig::Intake(_) => BlockKind::Intake,
            BlockConfig::DatastoreQuery(_) => BlockKind::DatastoreQuery,
            BlockConfig::OutboundCall(_) => BlockKind::OutboundCall,
            BlockConfig::Conditional(_) => BlockKind::Conditional,
            BlockConfig::Transform(_) => BlockKind::Transform,
            BlockConfig::Respond(_) => BlockKind::Respond,
        }
    }
}

fn from_value<T: for<'de> Deserialize<'de>>(raw: Value) -> Result<T, String> {
    serde_json::from_value(raw).map_err(|e| e.to_string())
}

fn empty_object() -> Value {
    Value::Object(Default::default())
}

// =============================================================================
// intake
// =============================================================================

/// Request payload schema.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntakeConfig {
    #[serde(default, deserialize_with = "deserialize_schema")]
    pub schema: Vec<FieldSpec>,
}

/// One declared payload field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,

    #[serde(rename = "type")]
    pub field_type: FieldType,

    #[serde(default = "default_required")]
    pub required: bool,

    /// Applied when the field is absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

fn default_required() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Number,
    Boolean,
    Array,
    Object,
}

impl FieldType {
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            FieldType::String => value.is_string(),
            FieldType::Number => value.is_number(),
            FieldType::Boolean => value.is_boolean(),
            FieldType::Array => value.is_array(),
            FieldType::Object => value.is_object(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Number => "number",
            FieldType::Boolean => "boolean",
            FieldType::Array => "array",
            FieldType::Object => "object",
        }
    }
}

/// Schema as an ordered list, or the legacy `{field: type}` mapping where
/// every entry is required.
fn deserialize_schema<'de, D>(deserializer: D) -> Result<Vec<FieldSpec>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum SchemaRepr {
        List(Vec<FieldSpec>),
        Map(serde_json::Map<String, Value>),
    }

    match Option::<SchemaRepr>::deserialize(deserializer)? {
        None => Ok(Vec::new()),
        Some(SchemaRepr::List(fields)) => Ok(fields),
        Some(SchemaRepr::Map(map)) => map
            .into_iter()
            .map(|(name, ty)| {
                let field_type: FieldType =
                    serde_json::from_value(ty).map_err(serde::de::Error::custom)?;
                Ok(FieldSpec {
                    name,
                    field_type,
                    required: true,
                    default: None,
                })
            })
            .collect(),
    }
}

// =============================================================================
// datastore_query
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatastoreQueryConfig {
    pub collection: String,

    #[serde(default)]
    pub operation: DatastoreOperation,

    /// Filter document; may contain references
    #[serde(default = "empty_object")]
    pub query: Value,

    /// Document for insert, changes for update
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    /// `find` limit; the configured default applies when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl DatastoreQueryConfig {
    fn check(&self) -> Result<(), String> {
        if self.collection.trim().is_empty() {
            return Err("'collection' must not be empty".to_string());
        }
        if matches!(
            self.operation,
            DatastoreOperation::Insert | DatastoreOperation::Update
        ) && self.data.is_none()
        {
            return Err(format!("'{}' requires 'data'", self.operation));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatastoreOperation {
    #[default]
    Find,
    FindOne,
    Insert,
    Update,
    Delete,
}

impl DatastoreOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatastoreOperation::Find => "find",
            DatastoreOperation::FindOne => "find_one",
            DatastoreOperation::Insert => "insert",
            DatastoreOperation::Update => "update",
            DatastoreOperation::Delete => "delete",
        }
    }
}

impl fmt::Display for DatastoreOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// outbound_call
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundCallConfig {
    /// Target URL; may contain references
    pub url: String,

    #[serde(default)]
    pub method: HttpMethod,

    #[serde(default = "empty_object")]
    pub headers: Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,

    /// Request timeout (seconds)
    #[serde(
        default,
        alias = "timeout_seconds",
        skip_serializing_if = "Option::is_none"
    )]
    pub timeout: Option<u64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Head => "HEAD",
        }
    }

    /// Methods whose body is sent as JSON.
    pub fn sends_json_body(&self) -> bool {
        matches!(
            self,
            HttpMethod::Post | HttpMethod::Put | HttpMethod::Patch | HttpMethod::Delete
        )
    }
}

impl FromStr for HttpMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "PATCH" => Ok(HttpMethod::Patch),
            "DELETE" => Ok(HttpMethod::Delete),
            "HEAD" => Ok(HttpMethod::Head),
            other => Err(format!("unsupported HTTP method '{}'", other)),
        }
    }
}

impl TryFrom<String> for HttpMethod {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<HttpMethod> for String {
    fn from(m: HttpMethod) -> Self {
        m.as_str().to_string()
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// conditional
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionalConfig {
    /// `<left> <op> <right>`, or bare `true`/`false`
    pub condition: String,

    #[serde(default = "default_true_value")]
    pub true_value: Value,

    #[serde(default = "default_false_value")]
    pub false_value: Value,
}

fn default_true_value() -> Value {
    Value::Bool(true)
}

fn default_false_value() -> Value {
    Value::Bool(false)
}

// =============================================================================
// transform
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransformConfig {
    #[serde(default)]
    pub operations: Vec<TransformOp>,

    /// Reference to the data to transform; the request payload when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_ref: Option<String>,
}

/// One transform step, applied in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransformOp {
    Rename {
        from: String,
        to: String,
    },
    Pick {
        fields: Vec<String>,
    },
    Set {
        field: String,
        #[serde(default)]
        value: Value,
    },
    Delete {
        field: String,
    },
    Merge {
        with: Value,
    },
    FilterArray {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        field: Option<String>,
        predicate: String,
    },
    Template {
        field: String,
        value: String,
    },
}

impl TransformOp {
    pub fn name(&self) -> &'static str {
        match self {
            TransformOp::Rename { .. } => "rename",
            TransformOp::Pick { .. } => "pick",
            TransformOp::Set { .. } => "set",
            TransformOp::Delete { .. } => "delete",
            TransformOp::Merge { .. } => "merge",
            TransformOp::FilterArray { .. } => "filter_array",
            TransformOp::Template { .. } => "template",
        }
    }
}

// =============================================================================
// respond
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RespondConfig {
    #[serde(default = "default_status_code")]
    pub status_code: u16,

    #[serde(default = "empty_object")]
    pub body: Value,

    #[serde(default = "empty_object")]
    pub headers: Value,
}

fn default_status_code() -> u16 {
    200
}

impl RespondConfig {
    fn check(&self) -> Result<(), String> {
        if !(100..=599).contains(&self.status_code) {
            return Err(format!(
                "'status_code' {} is outside 100..=599",
                self.status_code
            ));
        }
        if !self.headers.is_object() {
            return Err("'headers' must be an object".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_intake_schema_list_and_map() {
        let list = BlockConfig::decode(
            BlockKind::Intake,
            &json!({"schema": [
                {"name": "email", "type": "string"},
                {"name": "age", "type": "number", "required": false, "default": 18}
            ]}),
        )
        .unwrap();
        let BlockConfig::Intake(list) = list else {
            panic!("expected intake");
        };
        assert_eq!(list.schema.len(), 2);
        assert!(list.schema[0].required);
        assert_eq!(list.schema[1].default, Some(json!(18)));

        let map = BlockConfig::decode(BlockKind::Intake, &json!({"schema": {"name": "string"}}))
            .unwrap();
        let BlockConfig::Intake(map) = map else {
            panic!("expected intake");
        };
        assert_eq!(map.schema[0].name, "name");
        assert_eq!(map.schema[0].field_type, FieldType::String);
        assert!(map.schema[0].required);
    }

    #[test]
    fn test_intake_unknown_type_rejected() {
        let err = BlockConfig::decode(
            BlockKind::Intake,
            &json!({"schema": [{"name": "x", "type": "date"}]}),
        );
        assert!(err.is_err());
    }

    #[test]
    fn test_null_config_is_empty_object() {
        let config = BlockConfig::decode(BlockKind::Respond, &Value::Null).unwrap();
        let BlockConfig::Respond(respond) = config else {
            panic!("expected respond");
        };
        assert_eq!(respond.status_code, 200);
        assert_eq!(respond.body, json!({}));
    }

    #[test]
    fn test_datastore_defaults_and_checks() {
        let config = BlockConfig::decode(
            BlockKind::DatastoreQuery,
            &json!({"collection": "users", "query": {"active": true}}),
        )
        .unwrap();
        let BlockConfig::DatastoreQuery(config) = config else {
            panic!("expected datastore_query");
        };
        assert_eq!(config.operation, DatastoreOperation::Find);
        assert_eq!(config.limit, None);

        assert!(BlockConfig::decode(
            BlockKind::DatastoreQuery,
            &json!({"collection": "users", "operation": "insert"})
        )
        .is_err());
        assert!(BlockConfig::decode(
            BlockKind::DatastoreQuery,
            &json!({"collection": "users", "operation": "upsert"})
        )
        .is_err());
        assert!(BlockConfig::decode(BlockKind::DatastoreQuery, &json!({})).is_err());
    }

    #[test]
    fn test_http_method_case_insensitive() {
        let config = BlockConfig::decode(
            BlockKind::OutboundCall,
            &json!({"url": "https://api.example.com", "method": "post", "timeout_seconds": 5}),
        )
        .unwrap();
        let BlockConfig::OutboundCall(config) = config else {
            panic!("expected outbound_call");
        };
        assert_eq!(config.method, HttpMethod::Post);
        assert_eq!(config.timeout, Some(5));

        assert!(BlockConfig::decode(
            BlockKind::OutboundCall,
            &json!({"url": "https://x", "method": "TRACE"})
        )
        .is_err());
    }

    #[test]
    fn test_transform_ops() {
        let config = BlockConfig::decode(
            BlockKind::Transform,
            &json!({"operations": [
                {"type": "rename", "from": "a", "to": "b"},
                {"type": "filter_array", "field": "items", "predicate": "{{item.n}} > 1"},
                {"type": "template", "field": "greeting", "value": "Hi {{request_data.name}}"}
            ]}),
        )
        .unwrap();
        let BlockConfig::Transform(config) = config else {
            panic!("expected transform");
        };
        assert_eq!(config.operations.len(), 3);
        assert_eq!(config.operations[1].name(), "filter_array");

        assert!(BlockConfig::decode(
            BlockKind::Transform,
            &json!({"operations": [{"type": "explode"}]})
        )
        .is_err());
    }

    #[test]
    fn test_respond_status_range() {
        assert!(BlockConfig::decode(BlockKind::Respond, &json!({"status_code": 99})).is_err());
        assert!(BlockConfig::decode(BlockKind::Respond, &json!({"status_code": 600})).is_err());
        assert!(BlockConfig::decode(BlockKind::Respond, &json!({"status_code": 201})).is_ok());
        assert!(BlockConfig::decode(BlockKind::Respond, &json!({"headers": []})).is_err());
    }

    #[test]
    fn test_conditional_requires_condition() {
        assert!(BlockConfig::decode(BlockKind::Conditional, &json!({})).is_err());
        let config =
            BlockConfig::decode(BlockKind::Conditional, &json!({"condition": "true"})).unwrap();
        let BlockConfig::Conditional(config) = config else {
            panic!("expected conditional");
        };
        assert_eq!(config.true_value, json!(true));
        assert_eq!(config.false_value, json!(false));
    }
}
