//! Storage trait definitions.

use crate::{PersistedRecord, StorageResult};

/// Trait for credential storage backends.
///
/// `load` never fails on missing or unreadable state; callers treat `None` as
/// "no session". `save` must either replace the whole record or leave the
/// previous one intact.
pub trait CredentialStore: Send + Sync {
    /// Read the persisted record, if any.
    fn load(&self) -> StorageResult<Option<PersistedRecord>>;

    /// Replace the persisted record.
    fn save(&self, record: &PersistedRecord) -> StorageResult<()>;

    /// Drop the token while keeping the client identifier.
    fn clear_token(&self, client_id: &str) -> StorageResult<()> {
        self.save(&PersistedRecord::new(client_id))
    }
}
