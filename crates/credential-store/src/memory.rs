//! In-memory backend.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::{CredentialStore, PersistedRecord, StorageError, StorageResult};

/// Process-local store. Can be told to fail writes so callers can exercise
/// their persistence-failure paths.
#[derive(Default)]
pub struct MemoryCredentialStore {
    record: Mutex<Option<PersistedRecord>>,
    fail_saves: AtomicBool,
    save_count: AtomicUsize,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_record(record: PersistedRecord) -> Self {
        Self {
            record: Mutex::new(Some(record)),
            ..Self::default()
        }
    }

    /// Make every subsequent `save` fail (or succeed again).
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    /// Number of successful saves.
    pub fn save_count(&self) -> usize {
        self.save_count.load(Ordering::SeqCst)
    }

    /// Current record without going through `load`.
    pub fn snapshot(&self) -> Option<PersistedRecord> {
        self.record.lock().ok().and_then(|r| r.clone())
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&self) -> StorageResult<Option<PersistedRecord>> {
        let record = self
            .record
            .lock()
            .map_err(|_| StorageError::Backend("memory store poisoned".to_string()))?;
        Ok(record.clone())
    }

    fn save(&self, record: &PersistedRecord) -> StorageResult<()> {
        record.validate()?;

        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(StorageError::Backend("simulated write failure".to_string()));
        }

        let mut current = self
            .record
            .lock()
            .map_err(|_| StorageError::Backend("memory store poisoned".to_string()))?;
        *current = Some(record.clone());
        self.save_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
