use figment::providers::{Env, Format, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::error::CocoError;

/// Top-level configuration for Coco, loaded from a YAML document with
/// `COCO_`-prefixed environment overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CocoConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    #[serde(default = "default_n_workers")]
    pub n_workers: usize,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    pub storage_path: PathBuf,

    pub blocklist_path: PathBuf,

    #[serde(default)]
    pub queue_length: usize,

    #[serde(default = "default_timeout")]
    pub timeout: String,

    #[serde(default = "default_frontend_timeout")]
    pub frontend_timeout: String,

    #[serde(default = "default_session_limit")]
    pub session_limit: usize,

    #[serde(default)]
    pub debug_connections: bool,

    #[serde(default)]
    pub load_state: HashMap<String, PathBuf>,

    #[serde(default)]
    pub exclude_from_reset: Vec<String>,

    #[serde(default)]
    pub groups: HashMap<String, Vec<String>>,

    #[serde(default)]
    pub endpoints: Vec<EndpointConfig>,

    #[serde(default)]
    pub slack_token: Option<String>,

    #[serde(default)]
    pub slack_rules: Vec<SlackRuleConfig>,

    #[serde(default)]
    pub comet_broker: CometBrokerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CometBrokerConfig {
    #[serde(default)]
    pub enabled: bool,
    pub host: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlackRuleConfig {
    pub logger: String,
    pub channel: String,
    #[serde(default = "default_slack_level")]
    pub level: String,
}

/// A single declarative endpoint, as written in the `endpoints` list of the
/// config document. Validated into the stronger-typed descriptor used by
/// `coco-endpoint` at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub name: String,

    #[serde(rename = "type", default = "default_endpoint_type")]
    pub method: String,

    pub group: Option<String>,

    #[serde(default)]
    pub before: Vec<ChainEntry>,

    #[serde(default)]
    pub after: Vec<ChainEntry>,

    #[serde(default)]
    pub forward_to_coco: Vec<String>,

    pub call: Option<CallConfig>,

    #[serde(default)]
    pub values: Option<serde_json::Value>,

    #[serde(default)]
    pub save_state: Vec<String>,

    pub get_state: Option<String>,

    pub schedule: Option<ScheduleConfig>,

    #[serde(default)]
    pub call_on_start: bool,

    #[serde(default)]
    pub checks: Vec<serde_json::Value>,

    #[serde(default)]
    pub set_state: HashMap<String, serde_json::Value>,

    #[serde(default = "default_on_failure")]
    pub on_failure: u16,

    #[serde(default)]
    pub continue_on_fail: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallConfig {
    pub forward: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    pub period: String,
}

/// One entry of a `before`/`after` chain: either a bare endpoint name, or a
/// single-key mapping `{name: {identical: true}}` flagging that its fan-out
/// must satisfy an identical-reply check.
#[derive(Debug, Clone, Serialize)]
pub struct ChainEntry {
    pub name: String,
    pub identical: bool,
}

impl ChainEntry {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<'de> Deserialize<'de> for ChainEntry {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Name(String),
            Tagged(HashMap<String, ChainFlags>),
        }
        #[derive(Deserialize, Default)]
        struct ChainFlags {
            #[serde(default)]
            identical: bool,
        }

        match Repr::deserialize(deserializer)? {
            Repr::Name(name) => Ok(ChainEntry { name, identical: false }),
            Repr::Tagged(map) => {
                let (name, flags) = map.into_iter().next().ok_or_else(|| {
                    serde::de::Error::custom("chain entry mapping must have exactly one key")
                })?;
                Ok(ChainEntry { name, identical: flags.identical })
            }
        }
    }
}

impl CocoConfig {
    /// Load configuration from a YAML file plus environment overrides, and
    /// validate it into a structurally sound document. Returns `ConfigError`
    /// on any failure; the caller (`coco-server`) treats this as fatal.
    pub fn load(config_path: &std::path::Path) -> Result<Self, CocoError> {
        let figment = Figment::new()
            .merge(Yaml::file(config_path))
            .merge(Env::prefixed("COCO_").split("__"));

        let config: Self = figment
            .extract()
            .map_err(|e| CocoError::ConfigError(format!("failed to parse config: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Structural validation beyond what serde/figment can express:
    /// absolute paths, dangling endpoint references, and the ambiguous
    /// dual use of an endpoint name as both a forward target and a
    /// coco-forward entry.
    pub fn validate(&self) -> Result<(), CocoError> {
        if !self.storage_path.is_absolute() {
            return Err(CocoError::ConfigError(format!(
                "storage path \"{}\" must be absolute",
                self.storage_path.display()
            )));
        }
        if !self.blocklist_path.is_absolute() {
            return Err(CocoError::ConfigError(format!(
                "blocklist path \"{}\" must be absolute",
                self.blocklist_path.display()
            )));
        }

        let known_names: std::collections::HashSet<&str> =
            self.endpoints.iter().map(|e| e.name.as_str()).collect();

        for endpoint in &self.endpoints {
            let chain_refs = endpoint
                .before
                .iter()
                .map(ChainEntry::name)
                .chain(endpoint.after.iter().map(ChainEntry::name))
                .chain(endpoint.forward_to_coco.iter().map(String::as_str));
            for referenced in chain_refs {
                if !known_names.contains(referenced) {
                    return Err(CocoError::ConfigError(format!(
                        "endpoint '{}' references unknown endpoint '{referenced}'",
                        endpoint.name
                    )));
                }
            }

            let forward_targets: std::collections::HashSet<&str> = endpoint
                .call
                .as_ref()
                .and_then(|c| c.forward.as_ref())
                .map(|v| v.iter().map(|s| s.as_str()).collect())
                .unwrap_or_default();
            for coco_name in &endpoint.forward_to_coco {
                if forward_targets.contains(coco_name.as_str()) {
                    return Err(CocoError::ConfigError(format!(
                        "endpoint '{}': '{coco_name}' is used both as a forward target and a \
                         coco-forward entry, which is ambiguous",
                        endpoint.name
                    )));
                }
            }

            if !endpoint.save_state.is_empty() && endpoint.values.is_none() {
                return Err(CocoError::ConfigError(format!(
                    "endpoint '{}' declares save_state but no values schema",
                    endpoint.name
                )));
            }
        }

        if let Some(enabled) = Some(self.comet_broker.enabled).filter(|e| *e) {
            if enabled && (self.comet_broker.host.is_none() || self.comet_broker.port.is_none()) {
                return Err(CocoError::ConfigError(
                    "comet_broker.enabled is true but host/port are missing".to_string(),
                ));
            }
        }

        Ok(())
    }
}

fn default_port() -> u16 {
    4242
}
fn default_metrics_port() -> u16 {
    9090
}
fn default_n_workers() -> usize {
    4
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_timeout() -> String {
    "30s".to_string()
}
fn default_frontend_timeout() -> String {
    "60s".to_string()
}
fn default_session_limit() -> usize {
    50
}
fn default_endpoint_type() -> String {
    "GET".to_string()
}
fn default_on_failure() -> u16 {
    503
}
fn default_slack_level() -> String {
    "warning".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    fn write_config(dir: &std::path::Path, yaml: &str) -> PathBuf {
        let path = dir.join("coco.yaml");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(yaml.as_bytes()).unwrap();
        path
    }

    #[test]
    fn load_applies_defaults() {
        let dir = tempdir().unwrap();
        let path = write_config(
            &dir.path(),
            &format!(
                "storage_path: {}\nblocklist_path: {}\n",
                dir.path().join("storage").display(),
                dir.path().join("blocklist.json").display(),
            ),
        );
        let config = CocoConfig::load(&path).unwrap();
        assert_eq!(config.port, 4242);
        assert_eq!(config.n_workers, 4);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn relative_storage_path_is_rejected() {
        let dir = tempdir().unwrap();
        let path = write_config(
            &dir.path(),
            &format!(
                "storage_path: relative/dir\nblocklist_path: {}\n",
                dir.path().join("blocklist.json").display(),
            ),
        );
        let err = CocoConfig::load(&path).unwrap_err();
        assert!(matches!(err, CocoError::ConfigError(_)));
    }

    #[test]
    fn dangling_before_reference_is_rejected() {
        let dir = tempdir().unwrap();
        let path = write_config(
            &dir.path(),
            &format!(
                "storage_path: {}\nblocklist_path: {}\nendpoints:\n  - name: a\n    before: [ghost]\n",
                dir.path().join("storage").display(),
                dir.path().join("blocklist.json").display(),
            ),
        );
        let err = CocoConfig::load(&path).unwrap_err();
        assert!(matches!(err, CocoError::ConfigError(_)));
    }

    #[test]
    fn ambiguous_forward_and_coco_forward_is_rejected() {
        let dir = tempdir().unwrap();
        let path = write_config(
            &dir.path(),
            &format!(
                "storage_path: {}\nblocklist_path: {}\nendpoints:\n  - name: a\n  - name: b\n    call:\n      forward: [a]\n    forward_to_coco: [a]\n",
                dir.path().join("storage").display(),
                dir.path().join("blocklist.json").display(),
            ),
        );
        let err = CocoConfig::load(&path).unwrap_err();
        assert!(matches!(err, CocoError::ConfigError(_)));
    }

    #[test]
    fn save_state_without_values_is_rejected() {
        let dir = tempdir().unwrap();
        let path = write_config(
            &dir.path(),
            &format!(
                "storage_path: {}\nblocklist_path: {}\nendpoints:\n  - name: a\n    save_state: [foo]\n",
                dir.path().join("storage").display(),
                dir.path().join("blocklist.json").display(),
            ),
        );
        let err = CocoConfig::load(&path).unwrap_err();
        assert!(matches!(err, CocoError::ConfigError(_)));
    }

    #[test]
    fn env_override_replaces_scalar() {
        let dir = tempdir().unwrap();
        let path = write_config(
            &dir.path(),
            &format!(
                "storage_path: {}\nblocklist_path: {}\nport: 1111\n",
                dir.path().join("storage").display(),
                dir.path().join("blocklist.json").display(),
            ),
        );
        std::env::set_var("COCO_PORT", "2222");
        let config = CocoConfig::load(&path).unwrap();
        std::env::remove_var("COCO_PORT");
        assert_eq!(config.port, 2222);
    }
}
