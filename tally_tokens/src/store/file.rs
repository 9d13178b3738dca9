//! A file-backed token storage backend

use std::{
    collections::{BTreeMap, HashMap},
    io,
    path::PathBuf,
    sync::{Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tally_clock::{Clock, System, UnixTime};
use tokio::fs::OpenOptions;

use super::{Expiry, StorageError, StorageKey, TokenStorage};

#[derive(Debug, Serialize, Deserialize)]
struct FileEntry {
    value: String,
    expires: UnixTime,
}

type FileEntries = BTreeMap<StorageKey, FileEntry>;

/// Token storage persisted to a local JSON file
///
/// Values with an explicit expiry survive restarts. Session-scoped values are
/// held in memory only and never reach the disk.
#[derive(Debug)]
pub struct FileStorage<C = System> {
    path: PathBuf,
    session: Mutex<HashMap<StorageKey, String>>,
    file_lock: tokio::sync::Mutex<()>,
    clock: C,
}

impl FileStorage {
    /// Constructs a new file storage at `path`
    ///
    /// The file is created on first write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            session: Mutex::new(HashMap::new()),
            file_lock: tokio::sync::Mutex::new(()),
            clock: System,
        }
    }
}

impl<C> FileStorage<C> {
    /// Sets a custom clock to be used for evaluating expiry
    ///
    /// Useful for testing purposes
    pub fn with_clock<D>(self, clock: D) -> FileStorage<D> {
        FileStorage {
            path: self.path,
            session: self.session,
            file_lock: self.file_lock,
            clock,
        }
    }

    fn session(&self) -> MutexGuard<'_, HashMap<StorageKey, String>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn read_entries(&self) -> Result<FileEntries, StorageError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(data) if data.trim().is_empty() => Ok(FileEntries::new()),
            Ok(data) => Ok(serde_json::from_str(&data)?),
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(FileEntries::new()),
            Err(error) => Err(error.into()),
        }
    }

    async fn write_entries(&self, entries: &FileEntries) -> Result<(), StorageError> {
        use tokio::io::AsyncWriteExt;

        let mut file_opts = OpenOptions::new();

        file_opts.create(true).truncate(true).write(true);

        #[cfg(unix)]
        file_opts.mode(0o600);

        let mut file = file_opts.open(&self.path).await?;
        let data = serde_json::to_string_pretty(entries)?;
        file.write_all(data.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl<C: Clock + std::fmt::Debug + Send + Sync> TokenStorage for FileStorage<C> {
    async fn get(&self, key: StorageKey) -> Result<Option<String>, StorageError> {
        let session_value = self.session().get(&key).cloned();
        if session_value.is_some() {
            return Ok(session_value);
        }

        let _guard = self.file_lock.lock().await;
        let entries = self.read_entries().await?;
        let now = self.clock.now();
        Ok(entries
            .get(&key)
            .filter(|e| Expiry::At(e.expires).is_live_at(now))
            .map(|e| e.value.clone()))
    }

    async fn set(&self, key: StorageKey, value: &str, expiry: Expiry) -> Result<(), StorageError> {
        let _guard = self.file_lock.lock().await;
        let mut entries = self.read_entries().await?;
        let now = self.clock.now();
        entries.retain(|_, e| Expiry::At(e.expires).is_live_at(now));

        match expiry {
            Expiry::At(expires) => {
                self.session().remove(&key);
                entries.insert(
                    key,
                    FileEntry {
                        value: value.to_owned(),
                        expires,
                    },
                );
            }
            Expiry::Session => {
                self.session().insert(key, value.to_owned());
                entries.remove(&key);
            }
        }

        self.write_entries(&entries).await?;
        tracing::trace!(%key, path = %self.path.display(), "persisted token storage");
        Ok(())
    }

    async fn remove(&self, keys: &[StorageKey]) -> Result<(), StorageError> {
        let _guard = self.file_lock.lock().await;
        let mut entries = self.read_entries().await?;
        {
            let mut session = self.session();
            for key in keys {
                session.remove(key);
                entries.remove(key);
            }
        }
        self.write_entries(&entries).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use color_eyre::Result;
    use tally_clock::{DurationSecs, TestClock};

    use super::*;

    const NOW: UnixTime = UnixTime(1_700_000_000);

    fn temp_path() -> PathBuf {
        static COUNTER: AtomicUsize = AtomicUsize::new(0);
        std::env::temp_dir().join(format!(
            "tally-tokens-{}-{}.json",
            std::process::id(),
            COUNTER.fetch_add(1, Ordering::Relaxed)
        ))
    }

    #[tokio::test]
    async fn persists_values_across_instances() -> Result<()> {
        let path = temp_path();
        let storage = FileStorage::new(&path).with_clock(TestClock::new(NOW));
        storage
            .set(
                StorageKey::RefreshToken,
                "refresh",
                Expiry::At(NOW + DurationSecs(60)),
            )
            .await?;

        let reopened = FileStorage::new(&path).with_clock(TestClock::new(NOW));
        assert_eq!(
            reopened.get(StorageKey::RefreshToken).await?.as_deref(),
            Some("refresh")
        );

        tokio::fs::remove_file(&path).await?;
        Ok(())
    }

    #[tokio::test]
    async fn session_values_never_reach_the_disk() -> Result<()> {
        let path = temp_path();
        let storage = FileStorage::new(&path);
        storage
            .set(StorageKey::UserUuid, "uuid", Expiry::Session)
            .await?;

        assert_eq!(
            storage.get(StorageKey::UserUuid).await?.as_deref(),
            Some("uuid")
        );
        let on_disk = tokio::fs::read_to_string(&path).await?;
        assert!(!on_disk.contains("uuid\""));

        tokio::fs::remove_file(&path).await?;
        Ok(())
    }

    #[tokio::test]
    async fn expired_values_are_absent() -> Result<()> {
        let path = temp_path();
        let storage = FileStorage::new(&path).with_clock(TestClock::new(NOW));
        storage
            .set(StorageKey::AccessToken, "token", Expiry::At(NOW))
            .await?;

        assert_eq!(storage.get(StorageKey::AccessToken).await?, None);

        tokio::fs::remove_file(&path).await?;
        Ok(())
    }

    #[tokio::test]
    async fn remove_clears_both_disk_and_session_values() -> Result<()> {
        let path = temp_path();
        let storage = FileStorage::new(&path).with_clock(TestClock::new(NOW));
        storage
            .set(
                StorageKey::RefreshToken,
                "refresh",
                Expiry::At(NOW + DurationSecs(60)),
            )
            .await?;
        storage
            .set(StorageKey::UserEmail, "admin@example.com", Expiry::Session)
            .await?;

        storage.remove(&StorageKey::ALL).await?;

        for key in StorageKey::ALL {
            assert_eq!(storage.get(key).await?, None, "{} should be removed", key);
        }

        tokio::fs::remove_file(&path).await?;
        Ok(())
    }

    #[tokio::test]
    async fn missing_file_reads_as_empty() -> Result<()> {
        let storage = FileStorage::new(temp_path());
        assert_eq!(storage.get(StorageKey::AccessToken).await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn corrupt_file_is_reported() -> Result<()> {
        let path = temp_path();
        tokio::fs::write(&path, "{ not json").await?;
        let storage = FileStorage::new(&path);

        let result = storage.get(StorageKey::AccessToken).await;
        assert!(matches!(result, Err(StorageError::Corrupt(_))));

        tokio::fs::remove_file(&path).await?;
        Ok(())
    }
}
