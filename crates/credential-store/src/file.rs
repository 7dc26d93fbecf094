//! JSON file backend.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::{CredentialStore, PersistedRecord, StorageError, StorageResult};

/// Stores the record as pretty JSON at a fixed path.
///
/// Saves go through a uniquely named temp file in the same directory which is
/// synced and renamed over the target, so a crash or failed write leaves the
/// previous record untouched. Writers within the process are serialised.
pub struct FileCredentialStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_atomic(&self, contents: &str) -> io::Result<()> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir)?;

        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "credentials.json".to_string());
        let tmp_path = dir.join(format!("{}.tmp.{}", file_name, Uuid::new_v4()));

        let write_result = (|| -> io::Result<()> {
            let mut options = fs::OpenOptions::new();
            options.write(true).create_new(true);
            #[cfg(unix)]
            {
                use std::os::unix::fs::OpenOptionsExt;
                options.mode(0o600);
            }

            let mut file = options.open(&tmp_path)?;
            file.write_all(contents.as_bytes())?;
            file.write_all(b"\n")?;
            file.sync_all()?;

            fs::rename(&tmp_path, &self.path)?;

            if let Ok(parent_dir) = fs::File::open(dir) {
                let _ = parent_dir.sync_all();
            }

            Ok(())
        })();

        if write_result.is_err() {
            let _ = fs::remove_file(&tmp_path);
        }

        write_result
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self) -> StorageResult<Option<PersistedRecord>> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No credential file");
                return Ok(None);
            }
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Credential file unreadable, treating as absent"
                );
                return Ok(None);
            }
        };

        let record: PersistedRecord = match serde_json::from_str(&contents) {
            Ok(record) => record,
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Credential file corrupt, treating as absent"
                );
                return Ok(None);
            }
        };

        if let Err(e) = record.validate() {
            warn!(
                path = %self.path.display(),
                error = %e,
                "Credential file holds an incomplete token, treating as absent"
            );
            return Ok(None);
        }

        Ok(Some(record))
    }

    fn save(&self, record: &PersistedRecord) -> StorageResult<()> {
        record.validate()?;
        let contents = serde_json::to_string_pretty(record)?;

        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| StorageError::Backend("credential write lock poisoned".to_string()))?;

        self.write_atomic(&contents)?;

        debug!(
            path = %self.path.display(),
            has_token = record.token.is_some(),
            "Credentials saved"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Token;
    use chrono::{TimeZone, Utc};
    use tempfile::tempdir;

    fn sample_record() -> PersistedRecord {
        PersistedRecord::with_token(
            "client-abc",
            Token {
                access_token: "AT1".to_string(),
                refresh_token: "RT1".to_string(),
                token_type: "Bearer".to_string(),
                expires_at: Utc.with_ymd_and_hms(2030, 6, 1, 8, 30, 0).unwrap(),
                scope: ["smartWrite".to_string()].into_iter().collect(),
            },
        )
    }

    #[test]
    fn test_load_missing_file_is_none() {
        let dir = tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path().join("credentials.json"));
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path().join("nested").join("credentials.json"));

        store.save(&sample_record()).unwrap();
        assert_eq!(store.load().unwrap(), Some(sample_record()));
    }

    #[test]
    fn test_save_of_loaded_record_is_idempotent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        let store = FileCredentialStore::new(&path);
        store.save(&sample_record()).unwrap();

        let first = store.load().unwrap().unwrap();
        let bytes_before = fs::read(&path).unwrap();
        store.save(&first).unwrap();
        let second = store.load().unwrap().unwrap();

        assert_eq!(first, second);
        assert_eq!(bytes_before, fs::read(&path).unwrap());
    }

    #[test]
    fn test_corrupt_file_is_treated_as_absent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        fs::write(&path, "{ not json").unwrap();

        let store = FileCredentialStore::new(&path);
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_incomplete_token_on_disk_is_treated_as_absent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        fs::write(
            &path,
            r#"{"client_id":"c","token":{"access_token":"","refresh_token":"RT","token_type":"Bearer","expires_at":0}}"#,
        )
        .unwrap();

        let store = FileCredentialStore::new(&path);
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_incomplete_token_is_not_written() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        let store = FileCredentialStore::new(&path);
        store.save(&sample_record()).unwrap();

        let mut record = sample_record();
        if let Some(token) = record.token.as_mut() {
            token.access_token.clear();
        }

        assert!(matches!(
            store.save(&record),
            Err(StorageError::IncompleteToken("access_token"))
        ));
        assert_eq!(store.load().unwrap(), Some(sample_record()));
    }

    #[test]
    fn test_failed_save_keeps_previous_record() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        let store = FileCredentialStore::new(&path);
        store.save(&sample_record()).unwrap();

        // A directory at the target path makes the rename fail.
        let blocked = FileCredentialStore::new(dir.path());
        assert!(blocked.save(&sample_record()).is_err());

        assert_eq!(store.load().unwrap(), Some(sample_record()));
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp."))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_clear_token_keeps_client_id() {
        let dir = tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path().join("credentials.json"));
        store.save(&sample_record()).unwrap();

        store.clear_token("client-abc").unwrap();

        assert_eq!(
            store.load().unwrap(),
            Some(PersistedRecord::new("client-abc"))
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_credentials_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        FileCredentialStore::new(&path)
            .save(&sample_record())
            .unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
