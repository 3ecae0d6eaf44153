use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use super::session::TrainingSession;
use crate::dictionary::store::write_json_atomic;
use crate::dictionary::StoreError;

/// Persistence for the single in-progress training session.
pub trait DraftStore: Send {
    fn load(&self) -> Result<Option<TrainingSession>, StoreError>;
    fn save(&self, session: &TrainingSession) -> Result<(), StoreError>;
    fn clear(&self) -> Result<(), StoreError>;
}

pub struct FileDraftStore {
    path: PathBuf,
}

impl FileDraftStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DraftStore for FileDraftStore {
    fn load(&self) -> Result<Option<TrainingSession>, StoreError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&self.path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    fn save(&self, session: &TrainingSession) -> Result<(), StoreError> {
        write_json_atomic(&self.path, session)
    }

    fn clear(&self) -> Result<(), StoreError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Shared in-memory draft slot. Clones see the same draft.
#[derive(Clone, Default)]
pub struct InMemoryDraftStore {
    slot: Arc<Mutex<Option<TrainingSession>>>,
}

impl InMemoryDraftStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_draft(session: TrainingSession) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Some(session))),
        }
    }

    pub fn current(&self) -> Option<TrainingSession> {
        self.slot.lock().ok().and_then(|s| s.clone())
    }
}

impl DraftStore for InMemoryDraftStore {
    fn load(&self) -> Result<Option<TrainingSession>, StoreError> {
        let slot = self
            .slot
            .lock()
            .map_err(|_| StoreError::Unavailable("draft lock poisoned".into()))?;
        Ok(slot.clone())
    }

    fn save(&self, session: &TrainingSession) -> Result<(), StoreError> {
        let mut slot = self
            .slot
            .lock()
            .map_err(|_| StoreError::Unavailable("draft lock poisoned".into()))?;
        *slot = Some(session.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        let mut slot = self
            .slot
            .lock()
            .map_err(|_| StoreError::Unavailable("draft lock poisoned".into()))?;
        *slot = None;
        Ok(())
    }
}
