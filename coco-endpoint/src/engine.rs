use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use coco_checks::{evaluate_all, IdenticalReplyCheck, ReplyCheck};
use coco_core::{Blocklist, CocoError, State, COCO_HOST};
use coco_forwarder::{ReplyShape, RequestForwarder};
use serde_json::{json, Value};
use tracing::debug;

use crate::descriptor::{ChainStep, Endpoint};
use crate::registry::EndpointRegistry;

/// Runs the before → external-forward → forward-to-coco → state-effects →
/// after → get-state chain described for an [`Endpoint`].
///
/// Recursion (an endpoint's `before`/`after`/`forward_to_coco` entries name
/// sibling endpoints, themselves run through this same engine) is modelled
/// with boxed futures since `async fn` cannot recurse directly.
pub struct EndpointEngine {
    registry: Arc<EndpointRegistry>,
    forwarder: Arc<RequestForwarder>,
    blocklist: Arc<Blocklist>,
    state: Arc<State>,
    timeout: Duration,
}

type ExecuteFuture<'a> = Pin<Box<dyn Future<Output = Result<(u16, Value), CocoError>> + Send + 'a>>;

impl EndpointEngine {
    pub fn new(
        registry: Arc<EndpointRegistry>,
        forwarder: Arc<RequestForwarder>,
        blocklist: Arc<Blocklist>,
        state: Arc<State>,
        timeout: Duration,
    ) -> Self {
        Self { registry, forwarder, blocklist, state, timeout }
    }

    /// Look up `name` in the registry and execute it with `body`. Builtin
    /// names (blocklist and state-snapshot management) are dispatched
    /// directly against the state store and blocklist this engine owns,
    /// rather than through a declared [`Endpoint`] — they run on the same
    /// serial worker as every other invocation, so they never race the
    /// engine's own state/blocklist mutations.
    pub fn execute_by_name<'a>(&'a self, name: &'a str, body: Value) -> ExecuteFuture<'a> {
        Box::pin(async move {
            if let Some(result) = self.execute_builtin(name, &body)? {
                return Ok(result);
            }
            let endpoint = self
                .registry
                .get(name)
                .ok_or_else(|| CocoError::UnknownEndpoint(name.to_string()))?;
            self.execute(&endpoint, body).await
        })
    }

    /// Current number of blocklisted hosts, used by the worker to refresh
    /// the blocklist-size gauge after a successful `update-blocklist` call.
    pub fn blocklist_len(&self) -> i64 {
        self.blocklist.hosts().len() as i64
    }

    fn execute_builtin(&self, name: &str, body: &Value) -> Result<Option<(u16, Value)>, CocoError> {
        match name {
            "blocklist" => {
                let hosts: Vec<String> = self.blocklist.hosts().iter().map(|h| h.to_string()).collect();
                Ok(Some((200, json!({ "blocklist_hosts": hosts }))))
            }
            "update-blocklist" => {
                let command = body.get("command").and_then(Value::as_str).unwrap_or("");
                let hosts: Option<Vec<String>> = body.get("hosts").and_then(|v| v.as_array()).map(|arr| {
                    arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect()
                });
                self.blocklist.dispatch_command(command, hosts)?;
                Ok(Some((200, json!({ "reply": "ok" }))))
            }
            "saved-states" => {
                let names = self.state.list_saved()?;
                Ok(Some((200, json!({ "saved_states": names }))))
            }
            "reset-state" => {
                self.state.reset()?;
                Ok(Some((200, json!({ "reply": "ok" }))))
            }
            "save-state" => {
                let snapshot_name = body.get("name").and_then(Value::as_str).unwrap_or_default();
                self.state.save(snapshot_name)?;
                Ok(Some((200, json!({ "reply": "ok" }))))
            }
            "load-state" => {
                let snapshot_name = body.get("name").and_then(Value::as_str).unwrap_or_default();
                self.state.load(snapshot_name)?;
                Ok(Some((200, json!({ "reply": "ok" }))))
            }
            _ => Ok(None),
        }
    }

    /// Run the full seven-step chain for `endpoint` against `body`.
    pub fn execute<'a>(&'a self, endpoint: &'a Endpoint, body: Value) -> ExecuteFuture<'a> {
        Box::pin(async move {
            if let Some(schema) = &endpoint.values {
                schema.validate(&body)?;
            }

            if let Some(short_circuit) = self.run_chain(&endpoint.before, &body).await? {
                return Ok(short_circuit);
            }

            let mut aggregate = BTreeMap::new();

            if endpoint.has_external_forwards() {
                let hosts: Vec<_> = self
                    .registry
                    .resolve_forward_hosts(endpoint)
                    .into_iter()
                    .filter(|h| !self.blocklist.contains(h))
                    .collect();

                debug!(endpoint = %endpoint.name, n_hosts = hosts.len(), "forwarding");
                let reply = self
                    .forwarder
                    .forward_hosts(
                        &hosts,
                        endpoint.method,
                        &format!("/{}", endpoint.name),
                        body.clone(),
                        self.timeout,
                    )
                    .await;

                if !endpoint.checks.is_empty() {
                    let outcomes = evaluate_all(&endpoint.checks, &reply, &self.state).await?;
                    let failed: Vec<_> = outcomes.into_iter().filter(|o| !o.ok).collect();
                    if !failed.is_empty() && !endpoint.continue_on_fail {
                        let diagnostics: BTreeMap<String, String> = failed
                            .into_iter()
                            .flat_map(|o| o.diagnostics.into_iter())
                            .collect();
                        return Ok((
                            endpoint.on_failure,
                            serde_json::json!({ "reply": "check failed", "diagnostics": diagnostics }),
                        ));
                    }
                }

                aggregate.insert(endpoint.name.clone(), reply.render(ReplyShape::Full));
            }

            for coco_name in &endpoint.forward_to_coco {
                let (status, coco_body) = self.execute_by_name(coco_name, body.clone()).await?;
                aggregate.insert(
                    coco_name.clone(),
                    serde_json::json!({ COCO_HOST: { "status": status, "body": coco_body } }),
                );
            }

            for path in &endpoint.save_state {
                let filtered = endpoint
                    .values
                    .as_ref()
                    .map(|schema| schema.filter(&body))
                    .unwrap_or_else(|| body.clone());
                self.ensure_parent(path)?;
                self.state.write(path, filtered)?;
            }

            for (path, value) in &endpoint.set_state {
                self.ensure_parent(path)?;
                self.state.write(path, value.clone())?;
            }

            if let Some(short_circuit) = self.run_chain(&endpoint.after, &body).await? {
                return Ok(short_circuit);
            }

            if let Some(path) = &endpoint.get_state {
                aggregate.insert("state".to_string(), self.state.extract(path)?);
            }

            Ok((200, serde_json::to_value(aggregate).unwrap_or_default()))
        })
    }

    /// Run a `before`/`after` chain, short-circuiting on the first failing
    /// step. Steps flagged `identical` are checked directly against their
    /// external-forward fan-out rather than their full execution result.
    async fn run_chain(
        &self,
        steps: &[ChainStep],
        body: &Value,
    ) -> Result<Option<(u16, Value)>, CocoError> {
        for step in steps {
            let endpoint = self
                .registry
                .get(&step.name)
                .ok_or_else(|| CocoError::UnknownEndpoint(step.name.clone()))?;

            if step.identical && endpoint.has_external_forwards() {
                let hosts: Vec<_> = self
                    .registry
                    .resolve_forward_hosts(&endpoint)
                    .into_iter()
                    .filter(|h| !self.blocklist.contains(h))
                    .collect();
                let reply = self
                    .forwarder
                    .forward_hosts(
                        &hosts,
                        endpoint.method,
                        &format!("/{}", endpoint.name),
                        body.clone(),
                        self.timeout,
                    )
                    .await;
                let outcome = IdenticalReplyCheck.evaluate(&reply, &self.state).await?;
                if !outcome.ok {
                    return Ok(Some((
                        endpoint.on_failure,
                        serde_json::json!({ "reply": "identical check failed", "diagnostics": outcome.diagnostics }),
                    )));
                }
            } else {
                let (status, _) = self.execute(&endpoint, body.clone()).await?;
                if status >= 400 && !endpoint.continue_on_fail {
                    return Ok(Some((
                        status,
                        serde_json::json!({ "reply": format!("chain step '{}' failed", step.name) }),
                    )));
                }
            }
        }
        Ok(None)
    }

    fn ensure_parent(&self, path: &str) -> Result<(), CocoError> {
        let parent = path.rsplit_once('/').map(|(p, _)| p).unwrap_or("");
        self.state.find_or_create(parent)?;
        Ok(())
    }
}
