//! In-memory session state with durable write-through.
//!
//! [`SessionState`] is the single in-process source of truth for "who is
//! signed in" and "what bearer token do we hold". It is hydrated from the
//! [`CredentialStore`](crate::store::CredentialStore) exactly once, at
//! construction; there is no separate "ready" signal to await, because an
//! unready state is unrepresentable: if you hold a `SessionState`, it is
//! loaded.
//!
//! # Consistency
//!
//! * Both fields live in one watched snapshot, so observers always see
//!   whole state transitions. A clear is one transition, never a half.
//! * Every mutation runs under one internal lock and awaits its durable
//!   write *before* touching the snapshot, so memory never runs ahead of
//!   storage.
//! * Storage faults are logged and degraded: toward "absent" on load,
//!   toward memory-only on write. A broken disk must not crash the session
//!   or fabricate a signed-in user.
//!
//! # Login state
//!
//! `is_logged_in` is a function of the cached user record only. An absent
//! or expired access token does NOT mean logged out; only the absence of
//! the user record (or a confirmed-invalid session) does.

use std::{sync::Arc, time::Duration};

use tokio::{
    sync::{watch, Mutex},
    time::Instant,
};
use veil::Redact;

use crate::{
    error::Result,
    protocol::{Role, UserRecord},
    store::{keys, CredentialStore},
};

/// Token lifetime assumed when the server omits `expiresIn`.
pub const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(300);

/// Margin subtracted from every token lifetime.
///
/// "Due for refresh" triggers this long before hard expiry, so a token is
/// renewed while it still works. Tuned for the standard 300-second token:
/// the refresh window opens at 260 seconds.
pub const REFRESH_SAFETY_BUFFER: Duration = Duration::from_secs(40);

/// A bearer token together with the instant it becomes due for refresh.
///
/// The safety buffer is already folded into `refresh_at`; past that instant
/// the token may still be accepted by the server for up to the buffer
/// length, which is what lets a request proceed on a stale token when a
/// refresh fails transiently.
#[derive(Clone, Eq, PartialEq, Redact)]
pub struct AccessToken {
    /// The bearer credential itself.
    #[redact]
    pub token: String,

    /// When the proactive-refresh window opens.
    pub refresh_at: Instant,
}

impl AccessToken {
    /// Whether the proactive-refresh window has opened.
    #[must_use]
    pub fn is_due(&self) -> bool {
        Instant::now() >= self.refresh_at
    }
}

/// One observable state transition's worth of session data.
#[derive(Clone, Default, Redact)]
pub struct Snapshot {
    /// Profile of the signed-in user, if any.
    pub user: Option<UserRecord>,

    /// Cached bearer token, if any.
    #[redact]
    pub token: Option<AccessToken>,
}

struct Inner {
    store: Arc<dyn CredentialStore>,
    snapshot: watch::Sender<Snapshot>,
    /// Serializes all mutations: durable write, then snapshot update.
    /// Without it a `set_user` racing a `clear_all_data` could interleave
    /// its store write between the other's write and memory update.
    write_lock: Mutex<()>,
}

/// Cheaply cloneable handle to the process-wide session state.
#[derive(Clone)]
pub struct SessionState {
    inner: Arc<Inner>,
}

impl SessionState {
    /// Loads the session state from the credential store.
    ///
    /// This is the only constructor. The user record and the token columns
    /// are read concurrently; a malformed stored user record is treated as
    /// absent (fail safe to logged-out, never to a malformed signed-in
    /// state), and a token whose expiry column is missing or unparseable is
    /// kept but immediately due for refresh.
    ///
    /// # Errors
    ///
    /// Never fails on storage faults (those degrade to an empty state);
    /// reserved for future construction-time failures.
    pub async fn initialize(store: Arc<dyn CredentialStore>) -> Result<Self> {
        let (user, token, expires_at) = tokio::join!(
            store.get(keys::CURRENT_USER),
            store.get(keys::ACCESS_TOKEN),
            store.get(keys::ACCESS_TOKEN_EXPIRES_AT),
        );

        let user = read_or_absent(user, keys::CURRENT_USER).and_then(|json| {
            match serde_json::from_str::<UserRecord>(&json) {
                Ok(user) => Some(user),
                Err(e) => {
                    warn!("stored user record is malformed, treating as signed out: {e}");
                    None
                }
            }
        });

        let token = read_or_absent(token, keys::ACCESS_TOKEN).map(|token| {
            let refresh_at = read_or_absent(expires_at, keys::ACCESS_TOKEN_EXPIRES_AT)
                .and_then(|millis| match millis.parse::<i128>() {
                    Ok(millis) => Some(millis),
                    Err(e) => {
                        warn!("stored token expiry is malformed: {e}");
                        None
                    }
                })
                .map_or_else(Instant::now, |stored| {
                    let remaining = stored.saturating_sub(now_epoch_millis());
                    let remaining =
                        Duration::from_millis(u64::try_from(remaining).unwrap_or_default());
                    Instant::now() + remaining
                });

            AccessToken {
                token,
                refresh_at,
            }
        });

        let (snapshot, _) = watch::channel(Snapshot { user, token });

        Ok(Self {
            inner: Arc::new(Inner {
                store,
                snapshot,
                write_lock: Mutex::new(()),
            }),
        })
    }

    /// Subscribes to state transitions.
    ///
    /// Every received value is a complete snapshot; a clear arrives as one
    /// transition with both fields empty.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.inner.snapshot.subscribe()
    }

    /// Profile of the signed-in user, if any.
    #[must_use]
    pub fn user(&self) -> Option<UserRecord> {
        self.inner.snapshot.borrow().user.clone()
    }

    /// Whether a user is signed in.
    ///
    /// Deliberately not a function of token validity.
    #[must_use]
    pub fn is_logged_in(&self) -> bool {
        self.inner.snapshot.borrow().user.is_some()
    }

    /// Access level of the signed-in user, if any.
    #[must_use]
    pub fn role(&self) -> Option<Role> {
        self.inner.snapshot.borrow().user.as_ref().map(|user| user.role)
    }

    /// The cached bearer token, if any.
    #[must_use]
    pub fn access_token(&self) -> Option<AccessToken> {
        self.inner.snapshot.borrow().token.clone()
    }

    /// The bearer credential string, if any, stale or not.
    #[must_use]
    pub fn bearer_token(&self) -> Option<String> {
        self.inner
            .snapshot
            .borrow()
            .token
            .as_ref()
            .map(|token| token.token.clone())
    }

    /// Whether the cached token is present and due for proactive refresh.
    ///
    /// `false` both for a fresh token and for no token at all; the resume
    /// validation distinguishes the latter itself.
    #[must_use]
    pub fn should_refresh_token(&self) -> bool {
        self.inner
            .snapshot
            .borrow()
            .token
            .as_ref()
            .is_some_and(AccessToken::is_due)
    }

    /// Replaces the cached user record, write-through.
    pub async fn set_user(&self, user: UserRecord) {
        let _guard = self.inner.write_lock.lock().await;

        match serde_json::to_string(&user) {
            Ok(json) => {
                write_or_log(
                    self.inner.store.set(keys::CURRENT_USER, &json).await,
                    keys::CURRENT_USER,
                );
            }
            Err(e) => warn!("could not serialize user record: {e}"),
        }

        self.inner
            .snapshot
            .send_modify(|snapshot| snapshot.user = Some(user));
    }

    /// Replaces the cached access token, write-through.
    ///
    /// The refresh deadline is `now + (expires_in - safety buffer)`; the
    /// durable expiry column stores the same deadline in epoch
    /// milliseconds. Token and expiry are always written together.
    pub async fn set_access_token(&self, token: &str, expires_in: Option<Duration>) {
        let expires_in = expires_in.unwrap_or(DEFAULT_TOKEN_LIFETIME);
        let usable = expires_in.saturating_sub(REFRESH_SAFETY_BUFFER);
        let refresh_at = Instant::now() + usable;
        let stored_deadline =
            now_epoch_millis() + i128::try_from(usable.as_millis()).unwrap_or(i128::MAX);

        let _guard = self.inner.write_lock.lock().await;

        write_or_log(
            self.inner.store.set(keys::ACCESS_TOKEN, token).await,
            keys::ACCESS_TOKEN,
        );
        write_or_log(
            self.inner
                .store
                .set(keys::ACCESS_TOKEN_EXPIRES_AT, &stored_deadline.to_string())
                .await,
            keys::ACCESS_TOKEN_EXPIRES_AT,
        );

        self.inner.snapshot.send_modify(|snapshot| {
            snapshot.token = Some(AccessToken {
                token: token.to_string(),
                refresh_at,
            });
        });
    }

    /// Persists the server-side session identifier.
    ///
    /// Durable only; the session id is never mirrored in memory. The
    /// refresh coordinator re-reads it from the store at refresh time, so a
    /// rotated id updates without touching the reactive cells that drive
    /// consumers.
    pub async fn set_session_id(&self, session_id: &str) {
        let _guard = self.inner.write_lock.lock().await;

        write_or_log(
            self.inner.store.set(keys::SESSION_ID, session_id).await,
            keys::SESSION_ID,
        );
    }

    /// Clears durable and in-memory state.
    ///
    /// Idempotent. Observers see exactly one transition to the empty
    /// snapshot (or none, if already empty).
    pub async fn clear_all_data(&self) {
        let _guard = self.inner.write_lock.lock().await;

        write_or_log(self.inner.store.clear().await, "clear");

        self.inner.snapshot.send_modify(|snapshot| {
            snapshot.user = None;
            snapshot.token = None;
        });
    }

    /// The backing credential store.
    #[must_use]
    pub fn store(&self) -> Arc<dyn CredentialStore> {
        Arc::clone(&self.inner.store)
    }
}

/// Degrades a storage read fault to "absent", logging it.
fn read_or_absent(result: Result<Option<String>>, key: &str) -> Option<String> {
    match result {
        Ok(value) => value,
        Err(e) => {
            warn!("could not read {key} from credential store: {e}");
            None
        }
    }
}

/// Logs a storage write fault; the in-memory update proceeds regardless.
fn write_or_log(result: Result<()>, what: &str) {
    if let Err(e) = result {
        warn!("credential store write failed ({what}): {e}");
    }
}

/// Current wall-clock time in epoch milliseconds.
fn now_epoch_millis() -> i128 {
    time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn alice() -> UserRecord {
        UserRecord {
            username: "alice".to_string(),
            role: Role::User,
            name: None,
            email: None,
            gender: None,
            dark_mode: None,
        }
    }

    #[tokio::test]
    async fn initialize_with_empty_store_is_signed_out() {
        let store = Arc::new(MemoryStore::new());
        let state = SessionState::initialize(store).await.unwrap();

        assert!(!state.is_logged_in());
        assert!(state.access_token().is_none());
        assert!(!state.should_refresh_token());
    }

    #[tokio::test]
    async fn malformed_user_record_degrades_to_signed_out() {
        let store = Arc::new(MemoryStore::new());
        store.set(keys::CURRENT_USER, "{not json").await.unwrap();

        let state = SessionState::initialize(store).await.unwrap();
        assert!(!state.is_logged_in());
    }

    #[tokio::test]
    async fn token_without_expiry_column_is_immediately_due() {
        let store = Arc::new(MemoryStore::new());
        store.set(keys::ACCESS_TOKEN, "tok1").await.unwrap();

        let state = SessionState::initialize(store).await.unwrap();
        assert_eq!(state.bearer_token().as_deref(), Some("tok1"));
        assert!(state.should_refresh_token());
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_window_opens_buffer_before_expiry() {
        let store = Arc::new(MemoryStore::new());
        let state = SessionState::initialize(store).await.unwrap();

        state
            .set_access_token("t", Some(Duration::from_secs(300)))
            .await;
        assert!(!state.should_refresh_token());

        // One second shy of the 260-second boundary.
        tokio::time::advance(Duration::from_secs(259)).await;
        assert!(!state.should_refresh_token());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(state.should_refresh_token());
    }

    #[tokio::test]
    async fn set_user_is_write_through() {
        let store = Arc::new(MemoryStore::new());
        let state = SessionState::initialize(Arc::clone(&store) as _).await.unwrap();

        state.set_user(alice()).await;

        assert!(state.is_logged_in());
        assert_eq!(state.role(), Some(Role::User));

        let stored = store.get(keys::CURRENT_USER).await.unwrap().unwrap();
        let stored: UserRecord = serde_json::from_str(&stored).unwrap();
        assert_eq!(stored.username, "alice");
    }

    #[tokio::test]
    async fn clear_empties_store_and_memory_twice_over() {
        let store = Arc::new(MemoryStore::new());
        let state = SessionState::initialize(Arc::clone(&store) as _).await.unwrap();

        state.set_user(alice()).await;
        state.set_access_token("tok1", None).await;
        state.set_session_id("sess1").await;

        state.clear_all_data().await;
        assert!(!state.is_logged_in());
        assert!(state.access_token().is_none());
        assert_eq!(store.get(keys::SESSION_ID).await.unwrap(), None);

        // Idempotent.
        state.clear_all_data().await;
        assert!(!state.is_logged_in());
        assert_eq!(store.get(keys::CURRENT_USER).await.unwrap(), None);
    }

    #[tokio::test]
    async fn observers_see_clear_as_one_transition() {
        let store = Arc::new(MemoryStore::new());
        let state = SessionState::initialize(store).await.unwrap();

        state.set_user(alice()).await;
        state.set_access_token("tok1", None).await;

        let mut observer = state.subscribe();
        observer.mark_unchanged();

        state.clear_all_data().await;

        observer.changed().await.unwrap();
        {
            let snapshot = observer.borrow_and_update();
            assert!(snapshot.user.is_none());
            assert!(snapshot.token.is_none());
        }
        // No further transition is pending: the clear was one batch.
        assert!(!observer.has_changed().unwrap());
    }
}
