use std::collections::BTreeMap;
use std::time::Duration;

use coco_core::config::EndpointConfig;
use coco_core::CocoError;
use coco_forwarder::{parse_timeout, Method};
use serde_json::Value;

/// One step of a `before`/`after` chain: the sibling endpoint to invoke,
/// and whether its fan-out must satisfy an identical-reply check.
#[derive(Debug, Clone)]
pub struct ChainStep {
    pub name: String,
    pub identical: bool,
}

/// Per-field expected JSON type, declared by an endpoint's `values` entry.
#[derive(Debug, Clone, Default)]
pub struct ValuesSchema {
    pub fields: BTreeMap<String, String>,
}

impl ValuesSchema {
    pub fn parse(value: &Value) -> Result<Self, CocoError> {
        let object = value.as_object().ok_or_else(|| {
            CocoError::ConfigError("'values' must be a mapping of field name to type".into())
        })?;
        let mut fields = BTreeMap::new();
        for (field, ty) in object {
            let ty = ty.as_str().ok_or_else(|| {
                CocoError::ConfigError(format!("'values.{field}' must name a type string"))
            })?;
            fields.insert(field.clone(), ty.to_string());
        }
        Ok(Self { fields })
    }

    /// Validate `body` against this schema: every declared field must be
    /// present and match its declared type.
    pub fn validate(&self, body: &Value) -> Result<(), CocoError> {
        for (field, expected_type) in &self.fields {
            let actual = body.get(field);
            if !type_matches(actual, expected_type) {
                return Err(CocoError::InvalidUsage(format!(
                    "field '{field}' is required and must be of type '{expected_type}'"
                )));
            }
        }
        Ok(())
    }

    /// Project `body` down to only the declared fields, for `save_state`.
    pub fn filter(&self, body: &Value) -> Value {
        let mut out = serde_json::Map::new();
        for field in self.fields.keys() {
            if let Some(v) = body.get(field) {
                out.insert(field.clone(), v.clone());
            }
        }
        Value::Object(out)
    }
}

fn type_matches(value: Option<&Value>, expected: &str) -> bool {
    match (value, expected) {
        (None, _) => false,
        (Some(Value::String(_)), "string") => true,
        (Some(Value::Number(_)), "number") => true,
        (Some(Value::Number(n)), "int" | "integer") => n.is_i64() || n.is_u64(),
        (Some(Value::Bool(_)), "bool") => true,
        (Some(Value::Array(_)), "array") => true,
        (Some(Value::Object(_)), "object") => true,
        (Some(Value::Null), "null") => true,
        _ => false,
    }
}

/// A fully-validated, statically-typed endpoint descriptor, built once at
/// startup from an [`EndpointConfig`].
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub name: String,
    pub method: Method,
    pub forward_groups: Vec<String>,
    pub before: Vec<ChainStep>,
    pub after: Vec<ChainStep>,
    pub forward_to_coco: Vec<String>,
    pub values: Option<ValuesSchema>,
    pub save_state: Vec<String>,
    pub get_state: Option<String>,
    pub schedule_period: Option<Duration>,
    pub call_on_start: bool,
    pub checks: Vec<Value>,
    pub set_state: BTreeMap<String, Value>,
    pub on_failure: u16,
    pub continue_on_fail: bool,
}

impl Endpoint {
    pub fn from_config(conf: &EndpointConfig) -> Result<Self, CocoError> {
        let method = match conf.method.to_ascii_uppercase().as_str() {
            "GET" => Method::Get,
            "POST" => Method::Post,
            other => {
                return Err(CocoError::ConfigError(format!(
                    "endpoint '{}' has unknown type '{other}', expected GET or POST",
                    conf.name
                )))
            }
        };

        let values = conf.values.as_ref().map(ValuesSchema::parse).transpose()?;

        let forward_groups = conf
            .call
            .as_ref()
            .and_then(|c| c.forward.clone())
            .unwrap_or_else(|| conf.group.clone().into_iter().collect());

        let schedule_period = conf
            .schedule
            .as_ref()
            .map(|s| parse_timeout(&s.period))
            .transpose()?;

        Ok(Self {
            name: conf.name.clone(),
            method,
            forward_groups,
            before: conf
                .before
                .iter()
                .map(|e| ChainStep { name: e.name.clone(), identical: e.identical })
                .collect(),
            after: conf
                .after
                .iter()
                .map(|e| ChainStep { name: e.name.clone(), identical: e.identical })
                .collect(),
            forward_to_coco: conf.forward_to_coco.clone(),
            values,
            save_state: conf.save_state.clone(),
            get_state: conf.get_state.clone(),
            schedule_period,
            call_on_start: conf.call_on_start,
            checks: conf.checks.clone(),
            set_state: conf.set_state.clone().into_iter().collect(),
            on_failure: conf.on_failure,
            continue_on_fail: conf.continue_on_fail,
        })
    }

    pub fn has_external_forwards(&self) -> bool {
        !self.forward_groups.is_empty()
    }
}
