//! The dynamic host blocklist: a persisted set of hosts excluded from
//! forwarding, validated against the set of hosts known from configured
//! groups.

use crate::error::CocoError;
use crate::host::Host;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

#[derive(Debug, Serialize, Deserialize)]
struct PersistedBlocklist {
    blocklist_hosts: Vec<String>,
}

/// Hold the state of the node blocklist. Can fetch, update and persist the
/// blocklist to/from disk.
pub struct Blocklist {
    path: PathBuf,
    known_by_hostname: HashMap<String, HashSet<Host>>,
    blocked: RwLock<HashSet<Host>>,
}

impl Blocklist {
    /// Load (or initialise) the blocklist at `path`, validated against `known_hosts`.
    pub fn new(known_hosts: Vec<Host>, path: impl Into<PathBuf>) -> Result<Self, CocoError> {
        let path = path.into();

        let mut known_by_hostname: HashMap<String, HashSet<Host>> = HashMap::new();
        for host in known_hosts {
            known_by_hostname
                .entry(host.hostname.clone())
                .or_default()
                .insert(host);
        }

        let persisted = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            serde_json::from_str::<PersistedBlocklist>(&content)
                .unwrap_or(PersistedBlocklist { blocklist_hosts: vec![] })
        } else {
            PersistedBlocklist { blocklist_hosts: vec![] }
        };

        let blocked = persisted
            .blocklist_hosts
            .iter()
            .map(|s| Host::parse(s))
            .collect();

        let this = Self {
            path,
            known_by_hostname,
            blocked: RwLock::new(blocked),
        };
        this.persist()?;
        Ok(this)
    }

    /// Currently blocklisted hosts.
    pub fn hosts(&self) -> Vec<Host> {
        self.blocked.read().unwrap().iter().cloned().collect()
    }

    /// Whether `host` is currently blocklisted.
    pub fn contains(&self, host: &Host) -> bool {
        self.blocked.read().unwrap().contains(host)
    }

    /// Dispatch the `{command, hosts}` body of `POST /update-blocklist`.
    pub fn dispatch_command(
        &self,
        command: &str,
        hosts: Option<Vec<String>>,
    ) -> Result<bool, CocoError> {
        match command {
            "add" => self.add_hosts(&hosts.unwrap_or_default()),
            "remove" => self.remove_hosts(&hosts.unwrap_or_default()),
            "clear" => self.clear_hosts(),
            other => Err(CocoError::InvalidUsage(format!(
                "unknown blocklist command '{other}', supported commands are add, remove, clear"
            ))),
        }
    }

    /// Add hosts to the blocklist. All-or-nothing: if any host is unknown,
    /// the whole request is rejected and the blocklist is left unchanged.
    pub fn add_hosts(&self, hosts: &[String]) -> Result<bool, CocoError> {
        let resolved = self.resolve_all(hosts)?;
        if resolved.is_empty() {
            return Ok(true);
        }
        let mut blocked = self.blocked.write().unwrap();
        blocked.extend(resolved);
        drop(blocked);
        self.persist()?;
        Ok(true)
    }

    /// Remove hosts from the blocklist. All-or-nothing, same as [`add_hosts`](Self::add_hosts).
    pub fn remove_hosts(&self, hosts: &[String]) -> Result<bool, CocoError> {
        let resolved = self.resolve_all(hosts)?;
        if resolved.is_empty() {
            return Ok(true);
        }
        let mut blocked = self.blocked.write().unwrap();
        for host in &resolved {
            blocked.remove(host);
        }
        drop(blocked);
        self.persist()?;
        Ok(true)
    }

    /// Remove every host from the blocklist.
    pub fn clear_hosts(&self) -> Result<bool, CocoError> {
        self.blocked.write().unwrap().clear();
        self.persist()?;
        Ok(true)
    }

    /// Resolve every requested host string against the known-hosts table.
    /// A bare hostname resolves only if exactly one known host matches it.
    /// Any unresolvable entry rejects the whole batch.
    fn resolve_all(&self, hosts: &[String]) -> Result<Vec<Host>, CocoError> {
        if hosts.is_empty() {
            return Ok(vec![]);
        }
        let mut resolved = Vec::with_capacity(hosts.len());
        let mut bad = Vec::new();
        for raw in hosts {
            match self.resolve_one(raw) {
                Some(host) => resolved.push(host),
                None => bad.push(raw.clone()),
            }
        }
        if !bad.is_empty() {
            return Err(CocoError::InvalidUsage(format!(
                "could not update blocklist, requested hosts {bad:?} unknown"
            )));
        }
        Ok(resolved)
    }

    fn resolve_one(&self, raw: &str) -> Option<Host> {
        let probe = Host::parse(raw);
        let candidates = self.known_by_hostname.get(&probe.hostname)?;
        match probe.port {
            Some(_) => candidates.iter().find(|h| **h == probe).cloned(),
            None => {
                if candidates.len() == 1 {
                    candidates.iter().next().cloned()
                } else {
                    None
                }
            }
        }
    }

    fn persist(&self) -> Result<(), CocoError> {
        let blocked = self.blocked.read().unwrap();
        let mut hosts: Vec<String> = blocked.iter().map(|h| h.to_string()).collect();
        hosts.sort();
        let persisted = PersistedBlocklist { blocklist_hosts: hosts };
        drop(blocked);

        let serialized = serde_json::to_string_pretty(&persisted)?;
        atomic_write(&self.path, &serialized)
    }
}

fn atomic_write(path: &Path, content: &str) -> Result<(), CocoError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, content)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}
