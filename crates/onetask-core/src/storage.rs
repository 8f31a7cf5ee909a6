use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};

use anyhow::{Context, anyhow};
use serde_json::Value;
use tempfile::NamedTempFile;
use tracing::{debug, info};

pub const STORE_FILE_NAME: &str = "storage.json";

/// A committed write to one key.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageChange {
    pub key: String,
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
}

/// Flat key-value namespace holding whole JSON values per key.
///
/// There are no partial updates: callers read a value, change it in memory
/// and `set` the whole value back.
pub trait StorageArea {
    fn get(&self, keys: &[&str]) -> anyhow::Result<BTreeMap<String, Value>>;

    fn set(&mut self, key: &str, value: Value) -> anyhow::Result<()>;

    fn remove(&mut self, key: &str) -> anyhow::Result<()>;

    /// Every later `set`/`remove` is delivered to the returned receiver,
    /// including writes made through the subscriber's own handle.
    fn subscribe(&mut self) -> Receiver<StorageChange>;
}

#[derive(Debug, Default)]
struct ChangeHub {
    listeners: Vec<Sender<StorageChange>>,
}

impl ChangeHub {
    fn subscribe(&mut self) -> Receiver<StorageChange> {
        let (tx, rx) = mpsc::channel();
        self.listeners.push(tx);
        rx
    }

    fn notify(&mut self, change: StorageChange) {
        self.listeners
            .retain(|listener| listener.send(change.clone()).is_ok());
        debug!(
            key = %change.key,
            listeners = self.listeners.len(),
            "storage change delivered"
        );
    }
}

#[derive(Debug, Default)]
pub struct MemoryStorage {
    values: BTreeMap<String, Value>,
    hub: ChangeHub,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageArea for MemoryStorage {
    fn get(&self, keys: &[&str]) -> anyhow::Result<BTreeMap<String, Value>> {
        Ok(pick(&self.values, keys))
    }

    fn set(&mut self, key: &str, value: Value) -> anyhow::Result<()> {
        let old_value = self.values.insert(key.to_string(), value.clone());
        self.hub.notify(StorageChange {
            key: key.to_string(),
            old_value,
            new_value: Some(value),
        });
        Ok(())
    }

    fn remove(&mut self, key: &str) -> anyhow::Result<()> {
        if let Some(old) = self.values.remove(key) {
            self.hub.notify(StorageChange {
                key: key.to_string(),
                old_value: Some(old),
                new_value: None,
            });
        }
        Ok(())
    }

    fn subscribe(&mut self) -> Receiver<StorageChange> {
        self.hub.subscribe()
    }
}

/// Stores every key in one JSON object file.
///
/// Reads always go to disk so that writes from other processes are seen.
#[derive(Debug)]
pub struct FileStorage {
    pub data_dir: PathBuf,
    pub path: PathBuf,
    hub: ChangeHub,
}

impl FileStorage {
    #[tracing::instrument(skip(data_dir))]
    pub fn open(data_dir: &Path) -> anyhow::Result<Self> {
        let data_dir = data_dir.to_path_buf();
        fs::create_dir_all(&data_dir)
            .with_context(|| format!("failed to create {}", data_dir.display()))?;

        let path = data_dir.join(STORE_FILE_NAME);
        if !path.exists() {
            fs::write(&path, "{}")
                .with_context(|| format!("failed to create {}", path.display()))?;
        }

        info!(
            data_dir = %data_dir.display(),
            store = %path.display(),
            "opened storage"
        );

        Ok(Self {
            data_dir,
            path,
            hub: ChangeHub::default(),
        })
    }

    fn load(&self) -> anyhow::Result<BTreeMap<String, Value>> {
        load_object(&self.path).with_context(|| format!("failed to load {}", self.path.display()))
    }
}

impl StorageArea for FileStorage {
    #[tracing::instrument(skip(self))]
    fn get(&self, keys: &[&str]) -> anyhow::Result<BTreeMap<String, Value>> {
        let values = self.load()?;
        Ok(pick(&values, keys))
    }

    #[tracing::instrument(skip(self, value))]
    fn set(&mut self, key: &str, value: Value) -> anyhow::Result<()> {
        let mut values = self.load()?;
        let old_value = values.insert(key.to_string(), value.clone());
        save_object_atomic(&self.path, &values)
            .with_context(|| format!("failed to save {}", self.path.display()))?;
        self.hub.notify(StorageChange {
            key: key.to_string(),
            old_value,
            new_value: Some(value),
        });
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    fn remove(&mut self, key: &str) -> anyhow::Result<()> {
        let mut values = self.load()?;
        let Some(old) = values.remove(key) else {
            return Ok(());
        };
        save_object_atomic(&self.path, &values)
            .with_context(|| format!("failed to save {}", self.path.display()))?;
        self.hub.notify(StorageChange {
            key: key.to_string(),
            old_value: Some(old),
            new_value: None,
        });
        Ok(())
    }

    fn subscribe(&mut self) -> Receiver<StorageChange> {
        self.hub.subscribe()
    }
}

fn pick(values: &BTreeMap<String, Value>, keys: &[&str]) -> BTreeMap<String, Value> {
    keys.iter()
        .filter_map(|key| values.get(*key).map(|v| (key.to_string(), v.clone())))
        .collect()
}

fn load_object(path: &Path) -> anyhow::Result<BTreeMap<String, Value>> {
    debug!(file = %path.display(), "loading store");
    let raw = fs::read_to_string(path)?;
    if raw.trim().is_empty() {
        return Ok(BTreeMap::new());
    }
    match serde_json::from_str::<Value>(&raw)? {
        Value::Object(map) => Ok(map.into_iter().collect()),
        other => Err(anyhow!(
            "expected a JSON object at top level, found {}",
            kind_of(&other)
        )),
    }
}

fn save_object_atomic(path: &Path, values: &BTreeMap<String, Value>) -> anyhow::Result<()> {
    debug!(file = %path.display(), keys = values.len(), "saving store atomically");

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(dir)?;
    serde_json::to_writer_pretty(&mut temp, values)?;
    writeln!(temp)?;
    temp.flush()?;

    temp.persist(path)
        .map_err(|err| anyhow!("failed to persist {}: {}", path.display(), err))?;

    Ok(())
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::tempdir;

    use super::{FileStorage, MemoryStorage, StorageArea};

    #[test]
    fn memory_get_skips_missing_keys() {
        let mut store = MemoryStorage::new();
        store.set("tasks", json!([])).unwrap();

        let got = store.get(&["tasks", "today"]).unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got["tasks"], json!([]));
    }

    #[test]
    fn subscribers_see_own_writes() {
        let mut store = MemoryStorage::new();
        let rx = store.subscribe();

        store.set("today", json!([1])).unwrap();
        store.set("today", json!([1, 2])).unwrap();
        store.remove("today").unwrap();
        store.remove("today").unwrap();

        let changes: Vec<_> = rx.try_iter().collect();
        assert_eq!(changes.len(), 3);
        assert_eq!(changes[1].old_value, Some(json!([1])));
        assert_eq!(changes[1].new_value, Some(json!([1, 2])));
        assert_eq!(changes[2].new_value, None);
    }

    #[test]
    fn dropped_receivers_are_pruned() {
        let mut store = MemoryStorage::new();
        drop(store.subscribe());
        let rx = store.subscribe();
        store.set("tasks", json!([])).unwrap();
        assert_eq!(rx.try_iter().count(), 1);
        assert_eq!(store.hub.listeners.len(), 1);
    }

    #[test]
    fn file_store_persists_across_handles() {
        let temp = tempdir().expect("tempdir");
        let mut first = FileStorage::open(temp.path()).expect("open store");
        first.set("oneTask", json!({"text": "x"})).expect("set");

        let second = FileStorage::open(temp.path()).expect("reopen store");
        let got = second.get(&["oneTask", "subtasks"]).expect("get");
        assert_eq!(got["oneTask"], json!({"text": "x"}));
        assert!(!got.contains_key("subtasks"));
    }

    #[test]
    fn file_store_rejects_non_object() {
        let temp = tempdir().expect("tempdir");
        let store = FileStorage::open(temp.path()).expect("open store");
        std::fs::write(&store.path, "[1,2]").expect("write");
        assert!(store.get(&["tasks"]).is_err());
    }
}
