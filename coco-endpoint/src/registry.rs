use std::collections::HashMap;
use std::sync::Arc;

use coco_core::{CocoConfig, CocoError, Group, Host};

use crate::descriptor::Endpoint;

/// Local (non-forwarding) endpoints the controller always exposes. They
/// never appear in the declared-endpoint map, only here, so a config can't
/// shadow them. [`EndpointEngine`] dispatches the first six directly against
/// the state store and blocklist it owns, on the same worker that runs every
/// other invocation, instead of going through the chain described by
/// [`crate::descriptor::Endpoint`]. `wait` is the exception: it touches no
/// shared state, so the frontend answers it immediately without going
/// through the queue at all.
///
/// [`EndpointEngine`]: crate::engine::EndpointEngine
pub const BUILTIN_ENDPOINTS: &[&str] = &[
    "blocklist",
    "update-blocklist",
    "saved-states",
    "reset-state",
    "save-state",
    "load-state",
    "wait",
];

/// The set of configured endpoints and host groups, validated at startup.
pub struct EndpointRegistry {
    endpoints: HashMap<String, Arc<Endpoint>>,
    groups: HashMap<String, Group>,
}

impl EndpointRegistry {
    pub fn from_config(config: &CocoConfig) -> Result<Self, CocoError> {
        let mut groups = HashMap::new();
        for (name, hosts) in &config.groups {
            let parsed: Vec<Host> = hosts.iter().map(|h| Host::parse(h)).collect();
            groups.insert(name.clone(), Group::new(name.clone(), parsed));
        }

        let mut endpoints = HashMap::new();
        for conf in &config.endpoints {
            if BUILTIN_ENDPOINTS.contains(&conf.name.as_str()) {
                return Err(CocoError::ConfigError(format!(
                    "endpoint name '{}' collides with a builtin endpoint",
                    conf.name
                )));
            }
            let endpoint = Endpoint::from_config(conf)?;

            for group_name in &endpoint.forward_groups {
                if !groups.contains_key(group_name) {
                    if endpoint.has_external_forwards() {
                        return Err(CocoError::ConfigError(format!(
                            "host group '{group_name}' used by endpoint '{}' unknown",
                            endpoint.name
                        )));
                    }
                }
            }

            endpoints.insert(endpoint.name.clone(), Arc::new(endpoint));
        }

        Ok(Self { endpoints, groups })
    }

    pub fn get(&self, name: &str) -> Option<Arc<Endpoint>> {
        self.endpoints.get(name).cloned()
    }

    pub fn group(&self, name: &str) -> Option<&Group> {
        self.groups.get(name)
    }

    /// Resolve an endpoint's forward target hosts: the union of its
    /// declared forward groups' members.
    pub fn resolve_forward_hosts(&self, endpoint: &Endpoint) -> Vec<Host> {
        let mut hosts = Vec::new();
        for group_name in &endpoint.forward_groups {
            if let Some(group) = self.groups.get(group_name) {
                hosts.extend(group.hosts.iter().cloned());
            }
        }
        hosts
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.endpoints.keys().map(String::as_str)
    }

    pub fn call_on_start_endpoints(&self) -> Vec<Arc<Endpoint>> {
        self.endpoints
            .values()
            .filter(|e| e.call_on_start)
            .cloned()
            .collect()
    }

    pub fn scheduled_endpoints(&self) -> Vec<Arc<Endpoint>> {
        self.endpoints
            .values()
            .filter(|e| e.schedule_period.is_some())
            .cloned()
            .collect()
    }
}
