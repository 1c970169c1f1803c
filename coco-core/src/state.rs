//! The hierarchical state store.
//!
//! A path-addressed tree of JSON-shaped nested maps, persisted to a single
//! file under `storage_path` after every mutation (temp-file + rename, the
//! same pattern `ando-admin::persist` uses for route/upstream state).

use crate::error::CocoError;
use md5::{Digest, Md5};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

const STATE_FILE: &str = "state.json";
const SAVED_DIR: &str = "saved";

/// Representation of the complete state the controller tracks.
pub struct State {
    storage_path: PathBuf,
    initial_state_files: HashMap<String, PathBuf>,
    exclude_from_reset: Vec<String>,
    tree: RwLock<Value>,
}

fn split_path(path: &str) -> Vec<&str> {
    path.split('/').filter(|p| !p.is_empty()).collect()
}

fn is_root(path: &str) -> bool {
    path.is_empty() || path == "/"
}

/// Convert a YAML value into JSON, coercing all mapping keys to strings so
/// that state paths remain uniformly string-typed regardless of whether the
/// YAML author wrote `1:` or `"1":`.
fn yaml_to_json(value: serde_yaml::Value) -> Value {
    match value {
        serde_yaml::Value::Null => Value::Null,
        serde_yaml::Value::Bool(b) => Value::Bool(b),
        serde_yaml::Value::Number(n) => {
            serde_json::to_value(n).unwrap_or(Value::Null)
        }
        serde_yaml::Value::String(s) => Value::String(s),
        serde_yaml::Value::Sequence(seq) => {
            Value::Array(seq.into_iter().map(yaml_to_json).collect())
        }
        serde_yaml::Value::Mapping(map) => {
            let mut out = Map::new();
            for (k, v) in map {
                let key = yaml_key_to_string(&k);
                out.insert(key, yaml_to_json(v));
            }
            Value::Object(out)
        }
        serde_yaml::Value::Tagged(tagged) => yaml_to_json(tagged.value),
    }
}

fn yaml_key_to_string(key: &serde_yaml::Value) -> String {
    match key {
        serde_yaml::Value::String(s) => s.clone(),
        serde_yaml::Value::Number(n) => n.to_string(),
        serde_yaml::Value::Bool(b) => b.to_string(),
        other => serde_yaml::to_string(other).unwrap_or_default().trim().to_string(),
    }
}

impl State {
    /// Construct the state, restoring from `storage_path/state.json` if it
    /// exists and decodes; otherwise hydrating from `initial_state_files`.
    pub fn new(
        storage_path: impl Into<PathBuf>,
        initial_state_files: HashMap<String, PathBuf>,
        exclude_from_reset: Vec<String>,
    ) -> Result<Self, CocoError> {
        let storage_path = storage_path.into();
        std::fs::create_dir_all(&storage_path)?;
        std::fs::create_dir_all(storage_path.join(SAVED_DIR))?;

        let state_file = storage_path.join(STATE_FILE);
        let restored = if state_file.exists() {
            std::fs::read_to_string(&state_file)
                .ok()
                .and_then(|s| serde_json::from_str::<Value>(&s).ok())
        } else {
            None
        };

        let this = Self {
            storage_path,
            initial_state_files,
            exclude_from_reset,
            tree: RwLock::new(restored.unwrap_or_else(|| Value::Object(Map::new()))),
        };

        if this.is_empty() {
            this.load_initial_state()?;
        }

        Ok(this)
    }

    pub fn is_empty(&self) -> bool {
        match &*self.tree.read().unwrap() {
            Value::Object(m) => m.is_empty(),
            _ => false,
        }
    }

    fn load_initial_state(&self) -> Result<(), CocoError> {
        for (path, file) in self.initial_state_files.clone() {
            self.read_from_file(&path, &file)?;
        }
        Ok(())
    }

    /// Read a value at `path`. The root (`""` or `"/"`) returns the whole tree.
    pub fn read(&self, path: &str) -> Result<Value, CocoError> {
        let tree = self.tree.read().unwrap();
        if is_root(path) {
            return Ok(tree.clone());
        }
        let mut node = &*tree;
        for part in split_path(path) {
            node = node.get(part).ok_or_else(|| {
                CocoError::Internal(format!("state path '{path}' does not exist"))
            })?;
        }
        Ok(node.clone())
    }

    /// Write (overwrite) a value at `path`. The parent of `path` must already
    /// exist; use [`find_or_create`](Self::find_or_create) first if it might not.
    pub fn write(&self, path: &str, value: Value) -> Result<(), CocoError> {
        if is_root(path) {
            return Err(CocoError::Internal("cannot overwrite state root".into()));
        }
        let parts = split_path(path);
        let (last, parents) = parts.split_last().expect("non-root path is non-empty");

        let mut tree = self.tree.write().unwrap();
        let mut node = &mut *tree;
        for part in parents {
            node = node
                .get_mut(*part)
                .ok_or_else(|| CocoError::Internal(format!("state path '{path}' parent missing")))?;
        }
        let obj = node.as_object_mut().ok_or_else(|| {
            CocoError::Internal(format!("state path '{path}' parent is not a mapping"))
        })?;
        obj.insert((*last).to_string(), value);
        drop(tree);
        self.persist()
    }

    /// Find or create every mapping node along `path`, returning the node itself.
    /// Fails if a non-mapping node is traversed.
    pub fn find_or_create(&self, path: &str) -> Result<Value, CocoError> {
        let mut tree = self.tree.write().unwrap();
        if is_root(path) {
            return Ok(tree.clone());
        }
        let mut node = &mut *tree;
        for (i, part) in split_path(path).into_iter().enumerate() {
            if !node.is_object() {
                return Err(CocoError::Internal(format!(
                    "state: part {i} of path '{path}' is not a mapping, can't create a sub-state there"
                )));
            }
            let obj = node.as_object_mut().unwrap();
            node = obj
                .entry(part.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
        }
        let result = node.clone();
        drop(tree);
        self.persist()?;
        Ok(result)
    }

    /// Extract the subtree containing only `path`, nested under its full prefix.
    pub fn extract(&self, path: &str) -> Result<Value, CocoError> {
        let value = self.read(path)?;
        let parts = split_path(path);
        Ok(pack(&parts, value))
    }

    /// Load a YAML document at `file` into the state at `path`.
    pub fn read_from_file(&self, path: &str, file: &Path) -> Result<(), CocoError> {
        let content = std::fs::read_to_string(file)?;
        let yaml: serde_yaml::Value = serde_yaml::from_str(&content)
            .map_err(|e| CocoError::ConfigError(format!("failed reading YAML file {file:?}: {e}")))?;
        let json = yaml_to_json(yaml);

        if is_root(path) {
            let mut tree = self.tree.write().unwrap();
            *tree = json;
            drop(tree);
            return self.persist();
        }

        let parts = split_path(path);
        let (last, parents) = parts.split_last().expect("non-root path is non-empty");
        let mut tree = self.tree.write().unwrap();
        let mut node = &mut *tree;
        for part in parents {
            if !node.is_object() {
                return Err(CocoError::Internal(format!(
                    "state: can't load file into path '{path}', a parent is not a mapping"
                )));
            }
            node = node
                .as_object_mut()
                .unwrap()
                .entry((*part).to_string())
                .or_insert_with(|| Value::Object(Map::new()));
        }
        node.as_object_mut()
            .ok_or_else(|| CocoError::Internal(format!("state: parent of '{path}' is not a mapping")))?
            .insert((*last).to_string(), json);
        drop(tree);
        self.persist()
    }

    /// Hash of the subtree at `path` (whole tree if `None`): md5 over the
    /// canonical (sorted-key, compact-separator) JSON serialisation.
    pub fn hash(&self, path: Option<&str>) -> Result<String, CocoError> {
        let value = self.read(path.unwrap_or(""))?;
        Ok(Self::hash_value(&value))
    }

    pub fn hash_value(value: &Value) -> String {
        // serde_json::Map is backed by a BTreeMap by default, so keys are
        // already sorted; `to_string` uses compact, comma/colon separators.
        let serialized = serde_json::to_string(value).unwrap_or_default();
        let mut hasher = Md5::new();
        hasher.update(serialized.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Save a named, immutable snapshot of the current tree.
    pub fn save(&self, name: &str) -> Result<(), CocoError> {
        let snapshot = self.tree.read().unwrap().clone();
        let serialized = serde_json::to_string_pretty(&snapshot)?;
        atomic_write(&self.saved_path(name), &serialized)
    }

    /// Restore a previously saved snapshot by name.
    pub fn load(&self, name: &str) -> Result<(), CocoError> {
        let path = self.saved_path(name);
        let content = std::fs::read_to_string(&path).map_err(|e| {
            CocoError::InvalidUsage(format!("no saved state named '{name}': {e}"))
        })?;
        let value: Value = serde_json::from_str(&content)?;
        let mut tree = self.tree.write().unwrap();
        *tree = value;
        drop(tree);
        self.persist()
    }

    /// Discard the current tree and re-hydrate from `initial_state_files`,
    /// preserving any path listed in `exclude_from_reset`.
    pub fn reset(&self) -> Result<(), CocoError> {
        let mut preserved = Vec::new();
        for path in &self.exclude_from_reset {
            if let Ok(v) = self.read(path) {
                preserved.push((path.clone(), v));
            }
        }

        {
            let mut tree = self.tree.write().unwrap();
            *tree = Value::Object(Map::new());
        }
        self.load_initial_state()?;

        for (path, value) in preserved {
            self.find_or_create(parent_path(&path).as_deref().unwrap_or(""))?;
            self.write(&path, value)?;
        }
        Ok(())
    }

    /// List the names of all saved snapshots.
    pub fn list_saved(&self) -> Result<Vec<String>, CocoError> {
        let dir = self.storage_path.join(SAVED_DIR);
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            if let Some(stem) = entry.path().file_stem() {
                names.push(stem.to_string_lossy().to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    fn saved_path(&self, name: &str) -> PathBuf {
        self.storage_path.join(SAVED_DIR).join(format!("{name}.json"))
    }

    fn persist(&self) -> Result<(), CocoError> {
        let snapshot = self.tree.read().unwrap().clone();
        let serialized = serde_json::to_string_pretty(&snapshot)?;
        atomic_write(&self.storage_path.join(STATE_FILE), &serialized)
    }
}

fn parent_path(path: &str) -> Option<String> {
    let parts = split_path(path);
    if parts.len() <= 1 {
        return None;
    }
    Some(parts[..parts.len() - 1].join("/"))
}

fn pack(parts: &[&str], value: Value) -> Value {
    match parts.split_first() {
        None => value,
        Some((head, rest)) => {
            let mut m = Map::new();
            m.insert((*head).to_string(), pack(rest, value));
            Value::Object(m)
        }
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

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn empty_state() -> (tempfile::TempDir, State) {
        let dir = tempdir().unwrap();
        let state = State::new(dir.path(), HashMap::new(), Vec::new()).unwrap();
        (dir, state)
    }

    #[test]
    fn write_then_read_round_trips() {
        let (_dir, state) = empty_state();
        state.find_or_create("test").unwrap();
        state.write("test/1", json!({"val": 5})).unwrap();
        assert_eq!(state.read("test/1").unwrap(), json!({"val": 5}));
    }

    #[test]
    fn persisted_file_decodes_to_in_memory_tree() {
        let dir = tempdir().unwrap();
        let state = State::new(dir.path(), HashMap::new(), Vec::new()).unwrap();
        state.find_or_create("a/b").unwrap();
        state.write("a/b/c", json!(42)).unwrap();

        let on_disk: Value =
            serde_json::from_str(&std::fs::read_to_string(dir.path().join(STATE_FILE)).unwrap())
                .unwrap();
        assert_eq!(on_disk, state.read("").unwrap());
    }

    #[test]
    fn find_or_create_fails_on_non_mapping_node() {
        let (_dir, state) = empty_state();
        state.find_or_create("a").unwrap();
        state.write("a/leaf", json!(1)).unwrap();
        let err = state.find_or_create("a/leaf/sub").unwrap_err();
        assert!(matches!(err, CocoError::Internal(_)));
    }

    #[test]
    fn extract_nests_under_full_prefix() {
        let (_dir, state) = empty_state();
        state.find_or_create("test").unwrap();
        state.write("test/1", json!({"val": 5})).unwrap();
        let extracted = state.extract("test/1").unwrap();
        assert_eq!(extracted, json!({"test": {"1": {"val": 5}}}));
    }

    #[test]
    fn hash_is_stable_across_key_insertion_order() {
        let v1 = json!({"a": 1, "b": 2});
        let v2: Value = serde_json::from_str(r#"{"b": 2, "a": 1}"#).unwrap();
        assert_eq!(State::hash_value(&v1), State::hash_value(&v2));
    }

    #[test]
    fn save_and_load_round_trip() {
        let (_dir, state) = empty_state();
        state.find_or_create("x").unwrap();
        state.write("x/y", json!("hello")).unwrap();
        state.save("snap1").unwrap();

        state.write("x/y", json!("changed")).unwrap();
        assert_eq!(state.read("x/y").unwrap(), json!("changed"));

        state.load("snap1").unwrap();
        assert_eq!(state.read("x/y").unwrap(), json!("hello"));
    }

    #[test]
    fn list_saved_returns_snapshot_names() {
        let (_dir, state) = empty_state();
        state.save("one").unwrap();
        state.save("two").unwrap();
        let mut names = state.list_saved().unwrap();
        names.sort();
        assert_eq!(names, vec!["one".to_string(), "two".to_string()]);
    }

    #[test]
    fn reset_rehydrates_from_initial_files() {
        let dir = tempdir().unwrap();
        let yaml_path = dir.path().join("init.yaml");
        std::fs::write(&yaml_path, "1:\n  name: seeded\n").unwrap();

        let mut initial = HashMap::new();
        initial.insert("seed".to_string(), yaml_path);

        let state = State::new(dir.path().join("storage"), initial, Vec::new()).unwrap();
        assert_eq!(state.read("seed/1/name").unwrap(), json!("seeded"));

        state.find_or_create("scratch").unwrap();
        state.write("scratch/x", json!(1)).unwrap();
        assert!(state.read("scratch/x").is_ok());

        state.reset().unwrap();
        assert_eq!(state.read("seed/1/name").unwrap(), json!("seeded"));
        assert!(state.read("scratch/x").is_err());
    }

    #[test]
    fn integer_yaml_keys_are_coerced_to_strings() {
        let dir = tempdir().unwrap();
        let yaml_path = dir.path().join("nums.yaml");
        std::fs::write(&yaml_path, "1: one\n2: two\n").unwrap();

        let (_dir2, state) = empty_state();
        state.read_from_file("nums", &yaml_path).unwrap();
        let v = state.read("nums").unwrap();
        assert_eq!(v, json!({"1": "one", "2": "two"}));
    }
}
