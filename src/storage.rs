//! Namespaced key/value persistence.
//!
//! Values are JSON documents. The file store keeps one file per key under
//! `<root>/<namespace>/<key>.json`; the memory store backs tests and
//! `--no-restore` runs.

use crate::error::{LedError, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub trait KvStore: Send + Sync {
    /// Raw JSON text for `namespace/key`, `None` if absent.
    fn get(&self, namespace: &str, key: &str) -> Result<Option<String>>;
    fn set(&self, namespace: &str, key: &str, value: &str) -> Result<()>;
    /// Erasing a missing key is not an error.
    fn erase(&self, namespace: &str, key: &str) -> Result<()>;
}

pub fn get_json<T: DeserializeOwned>(store: &dyn KvStore, namespace: &str, key: &str) -> Result<Option<T>> {
    match store.get(namespace, key)? {
        Some(text) => Ok(Some(serde_json::from_str(&text)?)),
        None => Ok(None),
    }
}

pub fn set_json<T: Serialize>(store: &dyn KvStore, namespace: &str, key: &str, value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value)?;
    store.set(namespace, key, &text)
}

/// Accept a single path-safe name: ASCII alphanumerics, `_` and `-`.
pub(crate) fn check_name(what: &str, segment: &str) -> Result<()> {
    let ok = !segment.is_empty()
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if ok {
        Ok(())
    } else {
        Err(LedError::invalid_arg(format!("invalid {what} {segment:?}")))
    }
}

fn check_segment(segment: &str) -> Result<()> {
    check_name("storage key", segment)
}

// ── File store ───────────────────────────────────────────────────────

pub struct FileKvStore {
    root: PathBuf,
}

impl FileKvStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, namespace: &str, key: &str) -> Result<PathBuf> {
        check_segment(namespace)?;
        check_segment(key)?;
        Ok(self.root.join(namespace).join(format!("{key}.json")))
    }
}

impl KvStore for FileKvStore {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<String>> {
        let path = self.path(namespace, key)?;
        match fs::read_to_string(&path) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, namespace: &str, key: &str, value: &str) -> Result<()> {
        let path = self.path(namespace, key)?;
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        // write-then-rename so a crash never leaves a torn record
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, value)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn erase(&self, namespace: &str, key: &str) -> Result<()> {
        let path = self.path(namespace, key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

// ── Memory store ─────────────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryKvStore {
    entries: Mutex<HashMap<(String, String), String>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KvStore for MemoryKvStore {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<String>> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        Ok(entries.get(&(namespace.to_string(), key.to_string())).cloned())
    }

    fn set(&self, namespace: &str, key: &str, value: &str) -> Result<()> {
        check_segment(namespace)?;
        check_segment(key)?;
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert((namespace.to_string(), key.to_string()), value.to_string());
        Ok(())
    }

    fn erase(&self, namespace: &str, key: &str) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.remove(&(namespace.to_string(), key.to_string()));
        Ok(())
    }
}
