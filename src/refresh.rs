//! Single-flight access-token refresh.
//!
//! Multiple concurrent API calls can discover an expired token at the same
//! moment; each of them asks for a refresh, but only one network call may
//! ever be in flight. The [`RefreshCoordinator`] hands every concurrent
//! caller the same pending outcome, and clears its in-flight ticket on
//! every exit path so the next request starts fresh.
//!
//! # Outcome contract
//!
//! `refresh_access_token` resolves to a plain `bool` and never propagates
//! an error past its boundary:
//! * `true`: a new token was acquired and persisted.
//! * `false`: no new token. This does NOT imply the session is invalid.
//!   Transient failures (network errors, timeouts, 5xx, ambiguous
//!   responses) resolve `false` while leaving all session data intact.
//!   Only an explicit server rejection clears the session, and that side
//!   effect has already happened by the time `false` is returned.
//!
//! Callers must tolerate `false` without assuming invalidity; the one
//! thing a single failed refresh must never do is log out a user whose
//! session is actually still valid.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{
    future::{BoxFuture, Shared},
    FutureExt,
};
use tokio::sync::Mutex;

use crate::{
    error::Result,
    lifecycle::Navigator,
    protocol::RefreshResponse,
    state::SessionState,
    store::keys,
};

/// Network seam for the session endpoints.
///
/// The coordinator and the lifecycle hooks talk to the auth API through
/// this trait so tests can substitute scripted fakes for the HTTP
/// transport.
#[async_trait]
pub trait AuthConnector: Send + Sync {
    /// Exchanges the session identifier for a fresh access token.
    ///
    /// Transport and HTTP-status failures surface as errors; a 2xx
    /// response parses into [`RefreshResponse`] even when it carries no
    /// token.
    async fn refresh(&self, session_id: &str) -> Result<RefreshResponse>;

    /// Tells the server to end the session. Best effort.
    async fn logout(&self, session_id: &str) -> Result<()>;
}

/// A shared in-flight refresh outcome.
type Ticket = Shared<BoxFuture<'static, bool>>;

struct Inner {
    state: SessionState,
    connector: Arc<dyn AuthConnector>,
    navigator: Navigator,
    /// The single-flight ticket. `Some` exactly while a refresh is in
    /// flight; all concurrent callers clone and await the same future.
    in_flight: Mutex<Option<Ticket>>,
}

/// Cheaply cloneable handle to the process-wide refresh coordinator.
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

impl RefreshCoordinator {
    /// Creates a coordinator over the given state, connector and navigator.
    #[must_use]
    pub fn new(
        state: SessionState,
        connector: Arc<dyn AuthConnector>,
        navigator: Navigator,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                state,
                connector,
                navigator,
                in_flight: Mutex::new(None),
            }),
        }
    }

    /// Acquires a fresh access token, joining any refresh already in
    /// flight.
    ///
    /// See the module docs for the outcome contract. Possible side effects
    /// on `false`: when the server explicitly rejected the session (or the
    /// stored session id vanished underneath a cached user), all session
    /// data has been cleared and a redirect to the login screen emitted,
    /// unless the user is already on an auth-adjacent screen.
    pub async fn refresh_access_token(&self) -> bool {
        let ticket = {
            let mut slot = self.inner.in_flight.lock().await;
            if let Some(ticket) = slot.as_ref() {
                debug!("token refresh already in flight, joining");
                ticket.clone()
            } else {
                let inner = Arc::clone(&self.inner);
                let ticket = async move {
                    let outcome = inner.run_refresh().await;
                    // Finally-semantics: the ticket is cleared on every
                    // exit path of the refresh, success or failure.
                    inner.in_flight.lock().await.take();
                    outcome
                }
                .boxed()
                .shared();
                *slot = Some(ticket.clone());
                ticket
            }
        };

        ticket.await
    }
}

impl Inner {
    /// One actual refresh attempt. Runs at most once concurrently.
    async fn run_refresh(&self) -> bool {
        // The session id is re-read from the store on every attempt; it is
        // never cached in memory, so a rotation persisted by a previous
        // refresh is picked up here.
        let session_id = match self.state.store().get(keys::SESSION_ID).await {
            Ok(session_id) => session_id,
            Err(e) => {
                warn!("could not read session id from credential store: {e}");
                None
            }
        };

        let Some(session_id) = session_id else {
            if self.state.is_logged_in() {
                // User data survived but the session id did not. The
                // half-record is unusable; drop it and start over.
                warn!("cached user without a session id, signing out");
                self.state.clear_all_data().await;
                self.navigator.go_to_login();
            } else {
                debug!("no session to refresh");
            }
            return false;
        };

        match self.connector.refresh(&session_id).await {
            Ok(response) => {
                let Some(access_token) = response.access_token else {
                    // The endpoint answered but gave nothing usable. That
                    // is ambiguous, not proof of invalidity.
                    warn!("refresh response carried no access token, keeping session");
                    return false;
                };

                self.state
                    .set_access_token(&access_token, response.expires_in)
                    .await;

                let session_id = response.session_id.unwrap_or(session_id);
                self.state.set_session_id(&session_id).await;

                debug!("access token refreshed");
                true
            }
            Err(e) => {
                if e.is_session_invalid() {
                    info!("session rejected by server, signing out: {e}");
                    self.state.clear_all_data().await;
                    self.navigator.go_to_login();
                } else {
                    warn!("token refresh failed transiently, keeping session: {e}");
                }
                false
            }
        }
    }
}
