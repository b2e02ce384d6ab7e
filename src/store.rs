//! Durable key/value persistence for session credentials.
//!
//! The credential record (access token, its expiry, the opaque session
//! identifier and the cached user profile) survives process restarts
//! through a [`CredentialStore`]. The store is deliberately dumb: it
//! enforces no invariants (those belong to the session state and the
//! refresh coordinator) and fails only on storage-layer faults, which
//! callers log and degrade to "value absent".
//!
//! Two implementations are provided:
//! * [`FileStore`]: a JSON document on disk, rewritten atomically through
//!   a temp-file rename. The production store.
//! * [`MemoryStore`]: a plain map, for tests and ephemeral sessions.

use std::{collections::HashMap, path::PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::{Error, Result};

/// Logical keys backing the credential record.
///
/// Each key is independently settable and clearable; `clear` removes all of
/// them plus any other cached preference state that may share the store.
pub mod keys {
    /// Serialized [`UserRecord`](crate::protocol::UserRecord) of the
    /// signed-in user.
    pub const CURRENT_USER: &str = "currentUser";

    /// Bearer credential for API calls.
    pub const ACCESS_TOKEN: &str = "accessToken";

    /// Epoch milliseconds after which the access token counts as stale.
    pub const ACCESS_TOKEN_EXPIRES_AT: &str = "accessTokenExpiresAt";

    /// Opaque identifier of the server-side session.
    pub const SESSION_ID: &str = "sessionId";
}

/// Asynchronous key/value persistence for credentials.
///
/// All operations are fallible only on storage faults. No caching, no
/// retries, no invariants; callers own all of that.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Reads a value, `None` if the key was never written or was removed.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Writes a value, replacing any previous one.
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Removes a single key; removing an absent key is not an error.
    async fn remove(&self, key: &str) -> Result<()>;

    /// Removes every key in the store.
    async fn clear(&self) -> Result<()>;
}

/// File-backed credential store.
///
/// The whole record is one JSON object rewritten on every mutation. Writes
/// go to a sibling temp file first and are renamed into place, so a crash
/// mid-write never leaves a truncated document behind.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: Mutex<HashMap<String, String>>,
}

impl FileStore {
    /// Upper bound on the credential file size.
    ///
    /// The record is a handful of short strings; anything larger is
    /// corrupt or not ours to read.
    const MAX_FILE_SIZE: u64 = 64 * 1024;

    /// Opens a store at `path`, loading the existing record if one exists.
    ///
    /// A missing file starts an empty store. A file that is oversized or
    /// not valid JSON is an error: refusing to guess beats silently
    /// discarding credentials.
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read or parsed.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        let entries = match tokio::fs::metadata(&path).await {
            Ok(attributes) => {
                if attributes.len() > Self::MAX_FILE_SIZE {
                    return Err(Error::out_of_range(format!(
                        "credential file {} is too large",
                        path.display()
                    )));
                }

                let contents = tokio::fs::read_to_string(&path).await?;
                serde_json::from_str(&contents)?
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    /// Serializes `entries` and renames it into place.
    ///
    /// Called with the entry mutex held so concurrent mutations cannot
    /// interleave their write-backs.
    async fn persist(&self, entries: &HashMap<String, String>) -> Result<()> {
        let contents = serde_json::to_string_pretty(entries)?;
        let tmp = self.path.with_extension("tmp");

        tokio::fs::write(&tmp, contents).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        Ok(())
    }
}

#[async_trait]
impl CredentialStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries.lock().await;
        Ok(entries.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.entries.lock().await;
        entries.insert(key.to_string(), value.to_string());
        self.persist(&entries).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.lock().await;
        entries.remove(key);
        self.persist(&entries).await
    }

    async fn clear(&self) -> Result<()> {
        let mut entries = self.entries.lock().await;
        entries.clear();
        self.persist(&entries).await
    }
}

/// In-memory credential store.
///
/// Nothing survives the process. Used by tests and by one-shot invocations
/// that must not leave credentials on disk.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries.lock().await;
        Ok(entries.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.entries.lock().await;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.lock().await;
        entries.remove(key);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        let mut entries = self.entries.lock().await;
        entries.clear();
        Ok(())
    }
}
