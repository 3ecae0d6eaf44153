use crate::dictionary::types::DictionaryDocument;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("store serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Durable backing for the phrase dictionary. Only `PhraseDictionary` talks to it.
pub trait DictionaryStore: Send {
    /// A missing document is not an error: it loads as an empty document.
    fn load(&self) -> Result<DictionaryDocument, StoreError>;
    fn save(&self, doc: &DictionaryDocument) -> Result<(), StoreError>;
}

/// JSON file store. Writes go through a sibling temp file and a rename so a
/// crash mid-write never leaves a half-written document behind.
pub struct FileDictionaryStore {
    path: PathBuf,
}

impl FileDictionaryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DictionaryStore for FileDictionaryStore {
    fn load(&self) -> Result<DictionaryDocument, StoreError> {
        if !self.path.exists() {
            return Ok(DictionaryDocument::default());
        }
        let content = fs::read_to_string(&self.path)?;
        let doc = serde_json::from_str(&content)?;
        Ok(doc)
    }

    fn save(&self, doc: &DictionaryDocument) -> Result<(), StoreError> {
        write_json_atomic(&self.path, doc)
    }
}

pub(crate) fn write_json_atomic<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let json = serde_json::to_string_pretty(value)?;
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, json)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// In-memory store. Clones share the same document, so a test can keep a
/// handle and inspect what the dictionary persisted.
#[derive(Clone, Default)]
pub struct InMemoryDictionaryStore {
    inner: Arc<Mutex<MemoryInner>>,
}

#[derive(Default)]
struct MemoryInner {
    doc: Option<DictionaryDocument>,
    saves: u64,
    fail_writes: bool,
}

impl InMemoryDictionaryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_document(doc: DictionaryDocument) -> Self {
        let store = Self::default();
        if let Ok(mut inner) = store.inner.lock() {
            inner.doc = Some(doc);
        }
        store
    }

    /// Make every subsequent `save` fail.
    pub fn set_fail_writes(&self, fail: bool) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.fail_writes = fail;
        }
    }

    pub fn saved(&self) -> Option<DictionaryDocument> {
        self.inner.lock().ok().and_then(|inner| inner.doc.clone())
    }

    pub fn save_count(&self) -> u64 {
        self.inner.lock().map(|inner| inner.saves).unwrap_or(0)
    }
}

impl DictionaryStore for InMemoryDictionaryStore {
    fn load(&self) -> Result<DictionaryDocument, StoreError> {
        let inner = self
            .inner
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store poisoned".into()))?;
        Ok(inner.doc.clone().unwrap_or_default())
    }

    fn save(&self, doc: &DictionaryDocument) -> Result<(), StoreError> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store poisoned".into()))?;
        if inner.fail_writes {
            return Err(StoreError::Unavailable("writes disabled".into()));
        }
        inner.doc = Some(doc.clone());
        inner.saves += 1;
        Ok(())
    }
}
