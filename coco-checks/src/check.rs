use std::collections::BTreeMap;

use async_trait::async_trait;
use coco_core::{CocoError, State};
use coco_forwarder::Reply;
use serde::Deserialize;
use serde_json::Value;

/// The result of evaluating one [`ReplyCheck`]: whether it held, plus a
/// per-host diagnostic message for whichever hosts failed it.
#[derive(Debug, Clone, Default)]
pub struct CheckOutcome {
    pub ok: bool,
    pub diagnostics: BTreeMap<String, String>,
}

impl CheckOutcome {
    fn pass() -> Self {
        Self { ok: true, diagnostics: BTreeMap::new() }
    }

    fn fail(diagnostics: BTreeMap<String, String>) -> Self {
        Self { ok: false, diagnostics }
    }
}

/// A declarative predicate over the per-host replies of one forward.
/// Implementations never panic on a malformed reply body; a body that
/// can't satisfy the check's shape is itself a failing diagnostic.
#[async_trait]
pub trait ReplyCheck: Send + Sync {
    fn name(&self) -> &'static str;

    async fn evaluate(&self, reply: &Reply, state: &State) -> Result<CheckOutcome, CocoError>;
}

/// All non-blocklisted hosts returned byte-for-byte equal JSON bodies.
pub struct IdenticalReplyCheck;

#[async_trait]
impl ReplyCheck for IdenticalReplyCheck {
    fn name(&self) -> &'static str {
        "identical"
    }

    async fn evaluate(&self, reply: &Reply, _state: &State) -> Result<CheckOutcome, CocoError> {
        let mut bodies = reply.by_host.iter();
        let Some((_, first)) = bodies.next() else {
            return Ok(CheckOutcome::pass());
        };
        let mut diagnostics = BTreeMap::new();
        for (host, other) in bodies {
            if other.body != first.body {
                diagnostics.insert(host.clone(), "body differs from first host".to_string());
            }
        }
        if diagnostics.is_empty() {
            Ok(CheckOutcome::pass())
        } else {
            Ok(CheckOutcome::fail(diagnostics))
        }
    }
}

/// Each body matches a declared per-field JSON type (`"string"`, `"number"`,
/// `"int"`/`"integer"`, `"bool"`, `"array"`, `"object"`, `"null"`).
pub struct TypeReplyCheck {
    pub schema: BTreeMap<String, String>,
}

#[async_trait]
impl ReplyCheck for TypeReplyCheck {
    fn name(&self) -> &'static str {
        "type"
    }

    async fn evaluate(&self, reply: &Reply, _state: &State) -> Result<CheckOutcome, CocoError> {
        let mut diagnostics = BTreeMap::new();
        for (host, host_reply) in &reply.by_host {
            for (field, expected_type) in &self.schema {
                let actual = host_reply.body.get(field);
                if !matches_type(actual, expected_type) {
                    diagnostics.insert(
                        host.clone(),
                        format!("field '{field}' expected type '{expected_type}', got {actual:?}"),
                    );
                }
            }
        }
        if diagnostics.is_empty() {
            Ok(CheckOutcome::pass())
        } else {
            Ok(CheckOutcome::fail(diagnostics))
        }
    }
}

fn matches_type(value: Option<&Value>, expected: &str) -> bool {
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

/// Named fields in each body equal declared constants.
pub struct ValueReplyCheck {
    pub fields: BTreeMap<String, Value>,
}

#[async_trait]
impl ReplyCheck for ValueReplyCheck {
    fn name(&self) -> &'static str {
        "value"
    }

    async fn evaluate(&self, reply: &Reply, _state: &State) -> Result<CheckOutcome, CocoError> {
        let mut diagnostics = BTreeMap::new();
        for (host, host_reply) in &reply.by_host {
            for (field, expected) in &self.fields {
                let actual = host_reply.body.get(field);
                if actual != Some(expected) {
                    diagnostics.insert(
                        host.clone(),
                        format!("field '{field}' expected {expected}, got {actual:?}"),
                    );
                }
            }
        }
        if diagnostics.is_empty() {
            Ok(CheckOutcome::pass())
        } else {
            Ok(CheckOutcome::fail(diagnostics))
        }
    }
}

/// Each body equals the controller state at a declared path.
pub struct StateReplyCheck {
    pub path: String,
}

#[async_trait]
impl ReplyCheck for StateReplyCheck {
    fn name(&self) -> &'static str {
        "state"
    }

    async fn evaluate(&self, reply: &Reply, state: &State) -> Result<CheckOutcome, CocoError> {
        let expected = state.read(&self.path)?;
        let mut diagnostics = BTreeMap::new();
        for (host, host_reply) in &reply.by_host {
            if host_reply.body != expected {
                diagnostics.insert(host.clone(), format!("body does not match state at '{}'", self.path));
            }
        }
        if diagnostics.is_empty() {
            Ok(CheckOutcome::pass())
        } else {
            Ok(CheckOutcome::fail(diagnostics))
        }
    }
}

/// The canonical hash of each body equals the hash of the state at a
/// declared path.
pub struct StateHashReplyCheck {
    pub path: String,
}

#[async_trait]
impl ReplyCheck for StateHashReplyCheck {
    fn name(&self) -> &'static str {
        "state_hash"
    }

    async fn evaluate(&self, reply: &Reply, state: &State) -> Result<CheckOutcome, CocoError> {
        let expected_hash = state.hash(Some(&self.path))?;
        let mut diagnostics = BTreeMap::new();
        for (host, host_reply) in &reply.by_host {
            let actual_hash = State::hash_value(&host_reply.body);
            if actual_hash != expected_hash {
                diagnostics.insert(
                    host.clone(),
                    format!("hash mismatch against state at '{}'", self.path),
                );
            }
        }
        if diagnostics.is_empty() {
            Ok(CheckOutcome::pass())
        } else {
            Ok(CheckOutcome::fail(diagnostics))
        }
    }
}

/// The `{type, ...}`-tagged configuration form a check is declared with in
/// an endpoint's `checks` list.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CheckSpec {
    Identical,
    Type { schema: BTreeMap<String, String> },
    Value { fields: BTreeMap<String, Value> },
    State { path: String },
    StateHash { path: String },
}

impl CheckSpec {
    /// Build the corresponding [`ReplyCheck`] implementation.
    pub fn build(&self) -> Box<dyn ReplyCheck> {
        match self.clone() {
            CheckSpec::Identical => Box::new(IdenticalReplyCheck),
            CheckSpec::Type { schema } => Box::new(TypeReplyCheck { schema }),
            CheckSpec::Value { fields } => Box::new(ValueReplyCheck { fields }),
            CheckSpec::State { path } => Box::new(StateReplyCheck { path }),
            CheckSpec::StateHash { path } => Box::new(StateHashReplyCheck { path }),
        }
    }
}

/// Parse a list of raw JSON check declarations and evaluate each against
/// `reply`, returning one outcome per check in declaration order.
pub async fn evaluate_all(
    specs: &[Value],
    reply: &Reply,
    state: &State,
) -> Result<Vec<CheckOutcome>, CocoError> {
    let mut outcomes = Vec::with_capacity(specs.len());
    for raw in specs {
        let spec: CheckSpec = serde_json::from_value(raw.clone())
            .map_err(|e| CocoError::ConfigError(format!("bad check declaration: {e}")))?;
        let check = spec.build();
        outcomes.push(check.evaluate(reply, state).await?);
    }
    Ok(outcomes)
}
