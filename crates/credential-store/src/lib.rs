//! Durable storage for ecocli credentials.
//!
//! The store holds a single [`PersistedRecord`]: the client identifier the
//! session was issued to, plus the current [`Token`] (or none). Backends:
//! - **File**: JSON on disk, replaced atomically on every save
//! - **Memory**: process-local, used by tests and dry runs

mod file;
mod memory;
mod record;
mod traits;

pub use file::FileCredentialStore;
pub use memory::MemoryCredentialStore;
pub use record::{PersistedRecord, Token};
pub use traits::CredentialStore;

use thiserror::Error;

/// Error type for storage operations.
#[derive(Error, Debug)]
pub enum StorageError {
    /// The record carried a token with empty fields
    #[error("Refusing to persist incomplete token: missing {0}")]
    IncompleteToken(&'static str),

    /// Encoding/decoding error
    #[error("Encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    /// Backend refused the write
    #[error("Storage backend error: {0}")]
    Backend(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
