//! Shared test helpers — available to all `#[cfg(test)]` modules in the crate.

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;

use crate::{
    error::{Error, Result},
    lifecycle::{Navigator, Screen, SessionEvent, SessionManager},
    protocol::{RefreshResponse, Role, UserRecord},
    refresh::AuthConnector,
    state::SessionState,
    store::{keys, CredentialStore, MemoryStore},
};

/// A plain signed-in user.
pub fn alice() -> UserRecord {
    UserRecord {
        username: "alice".to_string(),
        role: Role::User,
        name: Some("Alice".to_string()),
        email: None,
        gender: None,
        dark_mode: None,
    }
}

/// One scripted outcome for a refresh call.
#[derive(Clone, Copy, Debug)]
pub enum RefreshScript {
    /// 2xx with a fresh token.
    Grant {
        token: &'static str,
        expires_in: Option<Duration>,
    },
    /// 2xx whose body carries no token at all.
    NoToken,
    /// HTTP error status with an optional `message` body.
    Status(http::StatusCode, Option<&'static str>),
    /// Transport-level failure.
    Network,
}

/// Scripted [`AuthConnector`] with call counting.
///
/// Each refresh call consumes the next script in FIFO order; with the
/// queue empty, refreshes fail like an unreachable network. An optional
/// per-call delay keeps a refresh observable mid-flight under paused time.
#[derive(Default)]
pub struct ScriptedConnector {
    scripts: Mutex<VecDeque<RefreshScript>>,
    delay: Mutex<Option<Duration>>,
    refresh_calls: AtomicUsize,
    logout_calls: AtomicUsize,
    logout_fails: AtomicBool,
}

impl ScriptedConnector {
    /// Queues the next refresh outcome.
    pub fn script(&self, script: RefreshScript) {
        self.scripts.lock().unwrap().push_back(script);
    }

    /// Makes every refresh call take this long before resolving.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    /// Makes server-side logout fail.
    pub fn fail_logout(&self) {
        self.logout_fails.store(true, Ordering::SeqCst);
    }

    /// Number of refresh calls that reached the network seam.
    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    /// Number of logout calls that reached the network seam.
    pub fn logout_calls(&self) -> usize {
        self.logout_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AuthConnector for ScriptedConnector {
    async fn refresh(&self, _session_id: &str) -> Result<RefreshResponse> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let script = self.scripts.lock().unwrap().pop_front();
        match script {
            Some(RefreshScript::Grant { token, expires_in }) => Ok(RefreshResponse {
                access_token: Some(token.to_string()),
                expires_in,
                session_id: None,
            }),
            Some(RefreshScript::NoToken) => Ok(RefreshResponse {
                access_token: None,
                expires_in: None,
                session_id: None,
            }),
            Some(RefreshScript::Status(status, message)) => {
                Err(Error::from_http_status(status, message.map(String::from)))
            }
            Some(RefreshScript::Network) | None => {
                Err(Error::unavailable("scripted network failure"))
            }
        }
    }

    async fn logout(&self, _session_id: &str) -> Result<()> {
        self.logout_calls.fetch_add(1, Ordering::SeqCst);

        if self.logout_fails.load(Ordering::SeqCst) {
            return Err(Error::unavailable("scripted network failure"));
        }
        Ok(())
    }
}

/// Builds a manager over an empty in-memory store.
pub async fn empty_manager(
    connector: Arc<ScriptedConnector>,
    screen: Screen,
) -> (
    SessionManager,
    tokio::sync::mpsc::UnboundedReceiver<SessionEvent>,
    Arc<MemoryStore>,
) {
    let store = Arc::new(MemoryStore::new());
    let state = SessionState::initialize(Arc::clone(&store) as Arc<dyn CredentialStore>)
        .await
        .unwrap();
    let (navigator, events) = Navigator::new(screen);
    let manager = SessionManager::new(state, connector, navigator);

    (manager, events, store)
}

/// Builds a manager with a persisted user and session id but no token:
/// the state of an app reopened long after its token expired.
pub async fn signed_in_manager(
    connector: Arc<ScriptedConnector>,
    screen: Screen,
) -> (
    SessionManager,
    tokio::sync::mpsc::UnboundedReceiver<SessionEvent>,
    Arc<MemoryStore>,
) {
    let store = Arc::new(MemoryStore::new());
    store
        .set(
            keys::CURRENT_USER,
            &serde_json::to_string(&alice()).unwrap(),
        )
        .await
        .unwrap();
    store.set(keys::SESSION_ID, "sess1").await.unwrap();

    let state = SessionState::initialize(Arc::clone(&store) as Arc<dyn CredentialStore>)
        .await
        .unwrap();
    let (navigator, events) = Navigator::new(screen);
    let manager = SessionManager::new(state, connector, navigator);

    (manager, events, store)
}
