// Parameter store
//
// Keys are path-like ("pid/left/P"). The store is the durable owner of every
// configuration value; the bridge only mirrors what it needs.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{PoisonError, RwLock};

use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::error::ConfigError;

/// External key/value configuration store
pub trait ParamStore: Send + Sync {
    /// True for an exact key or for any key nested below it
    fn has(&self, key: &str) -> bool;

    fn get(&self, key: &str) -> Result<Value, ConfigError>;

    fn set(&self, key: &str, value: Value) -> Result<(), ConfigError>;
}

/// Typed accessors on top of any store
pub trait ParamStoreExt: ParamStore {
    fn get_f64(&self, key: &str) -> Result<f64, ConfigError> {
        self.get(key)?.as_f64().ok_or_else(|| ConfigError::Type {
            key: key.to_string(),
            expected: "number",
        })
    }

    fn get_f32(&self, key: &str) -> Result<f32, ConfigError> {
        Ok(self.get_f64(key)? as f32)
    }

    fn get_i64(&self, key: &str) -> Result<i64, ConfigError> {
        let value = self.get(key)?;
        value
            .as_i64()
            .or_else(|| value.as_f64().filter(|v| v.fract() == 0.0).map(|v| v as i64))
            .ok_or_else(|| ConfigError::Type {
                key: key.to_string(),
                expected: "integer",
            })
    }

    fn get_string(&self, key: &str) -> Result<String, ConfigError> {
        match self.get(key)? {
            Value::String(s) => Ok(s),
            _ => Err(ConfigError::Type {
                key: key.to_string(),
                expected: "string",
            }),
        }
    }

    /// Number at `key`, or `default` when it is absent
    fn get_f64_or(&self, key: &str, default: f64) -> Result<f64, ConfigError> {
        if self.has(key) {
            self.get_f64(key)
        } else {
            Ok(default)
        }
    }

    fn set_f32(&self, key: &str, value: f32) -> Result<(), ConfigError> {
        self.set(key, Value::from(f64::from(value)))
    }

    fn set_i64(&self, key: &str, value: i64) -> Result<(), ConfigError> {
        self.set(key, Value::from(value))
    }

    /// Write `value` only if nothing is stored at `key`. Returns whether it wrote.
    fn set_default(&self, key: &str, value: Value) -> Result<bool, ConfigError> {
        if self.has(key) {
            return Ok(false);
        }
        self.set(key, value)?;
        Ok(true)
    }
}

impl<S: ParamStore + ?Sized> ParamStoreExt for S {}

/// In-process store backed by a JSON document
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: RwLock<BTreeMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from a nested JSON object; nested objects become path keys
    pub fn from_json(document: &Value) -> Self {
        let mut values = BTreeMap::new();
        if let Value::Object(map) = document {
            flatten("", map, &mut values);
        }
        Self {
            values: RwLock::new(values),
        }
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let document: Value = serde_json::from_str(&text)?;
        let store = Self::from_json(&document);
        info!(
            "Loaded {} parameters from {}",
            store.keys().len(),
            path.display()
        );
        Ok(store)
    }

    /// Nested JSON view of every key
    pub fn to_json(&self) -> Value {
        let values = self.values.read().unwrap_or_else(PoisonError::into_inner);
        let mut root = Map::new();
        for (key, value) in values.iter() {
            insert_nested(&mut root, key, value.clone());
        }
        Value::Object(root)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let text = serde_json::to_string_pretty(&self.to_json())?;
        std::fs::write(path, text)?;
        info!("Saved parameters to {}", path.display());
        Ok(())
    }

    pub fn keys(&self) -> Vec<String> {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }
}

impl ParamStore for MemoryStore {
    fn has(&self, key: &str) -> bool {
        let values = self.values.read().unwrap_or_else(PoisonError::into_inner);
        if values.contains_key(key) {
            return true;
        }
        let prefix = format!("{key}/");
        values
            .range(prefix.clone()..)
            .next()
            .is_some_and(|(k, _)| k.starts_with(&prefix))
    }

    fn get(&self, key: &str) -> Result<Value, ConfigError> {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
            .ok_or_else(|| ConfigError::Missing {
                key: key.to_string(),
            })
    }

    fn set(&self, key: &str, value: Value) -> Result<(), ConfigError> {
        if key.is_empty() || key.starts_with('/') || key.ends_with('/') {
            return Err(ConfigError::Invalid {
                key: key.to_string(),
                reason: "keys are non-empty paths without leading or trailing '/'".to_string(),
            });
        }
        debug!("set {} = {}", key, value);
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value);
        Ok(())
    }
}

fn flatten(prefix: &str, map: &Map<String, Value>, out: &mut BTreeMap<String, Value>) {
    for (name, value) in map {
        let key = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{prefix}/{name}")
        };
        match value {
            Value::Object(inner) => flatten(&key, inner, out),
            other => {
                out.insert(key, other.clone());
            }
        }
    }
}

fn insert_nested(root: &mut Map<String, Value>, key: &str, value: Value) {
    let mut parts = key.split('/').peekable();
    let mut node = root;
    while let Some(part) = parts.next() {
        if parts.peek().is_none() {
            node.insert(part.to_string(), value);
            return;
        }
        let entry = node
            .entry(part.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        // A leaf that also has children is overwritten by the subtree
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        let Some(map) = entry.as_object_mut() else {
            return;
        };
        node = map;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_has_matches_nested_keys() {
        let store = MemoryStore::new();
        store.set("pid/left/P", json!(1.0)).unwrap();
        store.set("pid/left-extra", json!(2.0)).unwrap();

        assert!(store.has("pid/left/P"));
        assert!(store.has("pid/left"));
        assert!(store.has("pid"));
        assert!(!store.has("pid/right"));
        assert!(!store.has("pid/lef"));
    }

    #[test]
    fn test_typed_getters() {
        let store = MemoryStore::new();
        store.set("structure/wheelbase", json!(0.5)).unwrap();
        store.set("process/length", json!(3.0)).unwrap();
        store.set("tf/odom", json!("odom")).unwrap();

        assert_eq!(store.get_f64("structure/wheelbase").unwrap(), 0.5);
        assert_eq!(store.get_i64("process/length").unwrap(), 3);
        assert_eq!(store.get_string("tf/odom").unwrap(), "odom");
        assert!(matches!(
            store.get_f64("tf/odom"),
            Err(ConfigError::Type { .. })
        ));
        assert!(matches!(
            store.get_f64("missing"),
            Err(ConfigError::Missing { .. })
        ));
        assert_eq!(store.get_f64_or("timer/rate", 1.0).unwrap(), 1.0);
    }

    #[test]
    fn test_set_default_keeps_existing() {
        let store = MemoryStore::new();
        store.set("timer/rate", json!(5.0)).unwrap();
        assert!(!store.set_default("timer/rate", json!(1.0)).unwrap());
        assert!(store.set_default("timer/alive", json!(1.0)).unwrap());
        assert_eq!(store.get_f64("timer/rate").unwrap(), 5.0);
    }

    #[test]
    fn test_rejects_malformed_keys() {
        let store = MemoryStore::new();
        assert!(store.set("", json!(1)).is_err());
        assert!(store.set("/pid", json!(1)).is_err());
    }

    #[test]
    fn test_json_document_round_trip() {
        let document = json!({
            "pid": {"left": {"P": 1.5, "I": 0.5, "D": 0.0}},
            "structure": {"wheelbase": 0.5, "radius": {"left": 0.1, "right": 0.1}},
            "tf": {"odom": "odom"}
        });
        let store = MemoryStore::from_json(&document);
        assert_eq!(store.get_f64("structure/radius/left").unwrap(), 0.1);
        assert_eq!(store.to_json(), document);
    }

    #[test]
    fn test_save_and_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("params.json");

        let store = MemoryStore::new();
        store.set("emergency/timeout", json!(0.5)).unwrap();
        store.set("process/0", json!("control")).unwrap();
        store.save(&path).unwrap();

        let loaded = MemoryStore::load(&path).unwrap();
        assert_eq!(loaded.get_f64("emergency/timeout").unwrap(), 0.5);
        assert_eq!(loaded.get_string("process/0").unwrap(), "control");
    }
}
