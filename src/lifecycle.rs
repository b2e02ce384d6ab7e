//! Session lifecycle: navigation, startup and resume validation, logout.
//!
//! The access token can silently expire while the app is closed or
//! backgrounded, so the session is validated at startup and on every
//! return to the foreground. Validation is deliberately biased toward
//! availability: a flaky network on resume must never force a re-login;
//! only an explicit rejection from the server ends a session.
//!
//! Navigation is not performed here; the [`Navigator`] tracks the current
//! screen and emits [`SessionEvent`]s that the embedding shell (the CLI
//! binary, a UI layer) turns into actual screen changes.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use crate::{
    protocol::AuthGrant,
    refresh::{AuthConnector, RefreshCoordinator},
    state::SessionState,
    store::keys,
};

/// Screens of the embedding application, as far as the session layer
/// cares about them.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Screen {
    /// Sign-in form.
    Login,
    /// First-run introduction.
    Onboarding,
    /// Account registration.
    Signup,
    /// Out-of-band email verification.
    Verification,
    /// Wardrobe item listing, the main screen.
    Wardrobe,
    /// Outfit composition.
    Outfits,
    /// Profile and preferences.
    Profile,
    /// Account browsing (admin only).
    Admin,
}

impl Screen {
    /// Whether this screen belongs to the authentication flow.
    ///
    /// A session invalidation discovered while the user is already signing
    /// in, signing up or verifying must not bounce them to the login
    /// screen; that is how redirect loops start.
    #[must_use]
    pub fn is_auth_adjacent(self) -> bool {
        matches!(
            self,
            Self::Login | Self::Onboarding | Self::Signup | Self::Verification
        )
    }
}

/// Events emitted by the session layer for the embedding shell.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum SessionEvent {
    /// The session ended (sign-out or confirmed invalidation); the shell
    /// must show the login screen.
    RedirectToLogin,
}

struct NavigatorInner {
    screen: watch::Sender<Screen>,
    events: mpsc::UnboundedSender<SessionEvent>,
}

/// Tracks the current screen and emits navigation events.
///
/// Cheaply cloneable; all clones share one screen and one event stream.
#[derive(Clone)]
pub struct Navigator {
    inner: Arc<NavigatorInner>,
}

impl Navigator {
    /// Creates a navigator on the given screen, returning the event stream
    /// the embedding shell must drain.
    #[must_use]
    pub fn new(initial: Screen) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let (screen, _) = watch::channel(initial);

        (
            Self {
                inner: Arc::new(NavigatorInner { screen, events }),
            },
            receiver,
        )
    }

    /// The screen the user is currently on.
    #[must_use]
    pub fn current(&self) -> Screen {
        *self.inner.screen.borrow()
    }

    /// Subscribes to screen changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Screen> {
        self.inner.screen.subscribe()
    }

    /// Records that the embedding shell has navigated.
    pub fn set_screen(&self, screen: Screen) {
        self.inner.screen.send_replace(screen);
    }

    /// Sends the user to the login screen, at most once.
    ///
    /// Suppressed entirely while on an auth-adjacent screen, and the
    /// check-and-switch is atomic, so two concurrent invalidations produce
    /// exactly one [`SessionEvent::RedirectToLogin`].
    pub fn go_to_login(&self) {
        let mut redirected = false;
        self.inner.screen.send_if_modified(|screen| {
            if screen.is_auth_adjacent() {
                return false;
            }
            *screen = Screen::Login;
            redirected = true;
            true
        });

        if redirected {
            debug!("redirecting to the login screen");
            if self.inner.events.send(SessionEvent::RedirectToLogin).is_err() {
                trace!("no event consumer, dropping redirect event");
            }
        } else {
            debug!("already on an auth screen, not redirecting");
        }
    }
}

/// Owns the session lifecycle end to end.
///
/// Composes the state, the refresh coordinator, the auth connector and the
/// navigator; the embedding shell constructs one of these at startup and
/// drives it from its lifecycle hooks.
pub struct SessionManager {
    state: SessionState,
    coordinator: RefreshCoordinator,
    connector: Arc<dyn AuthConnector>,
    navigator: Navigator,
}

impl SessionManager {
    /// Assembles a manager from its parts.
    #[must_use]
    pub fn new(
        state: SessionState,
        connector: Arc<dyn AuthConnector>,
        navigator: Navigator,
    ) -> Self {
        let coordinator =
            RefreshCoordinator::new(state.clone(), Arc::clone(&connector), navigator.clone());

        Self {
            state,
            coordinator,
            connector,
            navigator,
        }
    }

    /// The session state handle.
    #[must_use]
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// The refresh coordinator handle.
    #[must_use]
    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.coordinator
    }

    /// The navigator handle.
    #[must_use]
    pub fn navigator(&self) -> &Navigator {
        &self.navigator
    }

    /// Persists a finished authentication grant.
    ///
    /// Token and session id are stored before the user record, so by the
    /// time observers see `is_logged_in` flip, the credentials backing it
    /// are already in place.
    pub async fn complete_authentication(&self, grant: AuthGrant) {
        self.state
            .set_access_token(&grant.access_token, grant.expires_in)
            .await;
        self.state.set_session_id(&grant.session_id).await;
        self.state.set_user(grant.user).await;

        info!("signed in");
    }

    /// Startup hook: validates the session when a cached user exists.
    ///
    /// The access token may have silently expired while the app was
    /// closed; a signed-out state needs no validation at all.
    pub async fn validate_on_startup(&self) {
        if self.state.is_logged_in() {
            let valid = self.validate_session_on_resume().await;
            debug!("startup session validation: valid={valid}");
        }
    }

    /// Foreground hook: validates the session on return to foreground.
    ///
    /// Suppressed entirely on the verification screen: validation could
    /// otherwise disrupt an in-progress out-of-band email check.
    pub async fn validate_on_foreground(&self) -> bool {
        if self.navigator.current() == Screen::Verification {
            debug!("on the verification screen, skipping session validation");
            return true;
        }

        self.validate_session_on_resume().await
    }

    /// Decides whether the persisted session is usable.
    ///
    /// Returns `false` only for a *confirmed* dead session (and has then
    /// already cleared local state and redirected). Every ambiguous
    /// failure reports the session valid and leaves it alone: availability
    /// over strictness.
    pub async fn validate_session_on_resume(&self) -> bool {
        let session_id = match self.state.store().get(keys::SESSION_ID).await {
            Ok(session_id) => session_id,
            Err(e) => {
                warn!("could not read session id from credential store: {e}");
                None
            }
        };

        if !self.state.is_logged_in() && session_id.is_none() {
            // Nothing usable survived; make sure nothing half-stale does
            // either.
            self.state.clear_all_data().await;
            self.navigator.go_to_login();
            return false;
        }

        match self.state.access_token() {
            None => self.refresh_and_report().await,
            Some(token) if token.is_due() => self.refresh_and_report().await,
            Some(_) => {
                trace!("access token still fresh, no validation call needed");
                true
            }
        }
    }

    /// Refreshes and maps the outcome to "is the session usable".
    ///
    /// A `false` refresh outcome only means "no new token". The session
    /// counts as dead solely when the coordinator has actually signed the
    /// user out (confirmed invalidity); otherwise the session is reported
    /// usable on the optimistic assumption that the failure was transient.
    async fn refresh_and_report(&self) -> bool {
        if self.coordinator.refresh_access_token().await {
            return true;
        }

        let still_signed_in = self.state.is_logged_in();
        if still_signed_in {
            debug!("refresh failed transiently, keeping the session");
        }
        still_signed_in
    }

    /// Signs out.
    ///
    /// The server-side teardown is best effort; its failure is logged and
    /// never blocks the local cleanup, which is unconditional.
    pub async fn logout(&self) {
        let session_id = match self.state.store().get(keys::SESSION_ID).await {
            Ok(session_id) => session_id,
            Err(e) => {
                warn!("could not read session id from credential store: {e}");
                None
            }
        };

        if let Some(session_id) = session_id {
            if let Err(e) = self.connector.logout(&session_id).await {
                warn!("server-side logout failed, clearing local state anyway: {e}");
            }
        }

        self.state.clear_all_data().await;
        self.navigator.go_to_login();

        info!("signed out");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::CredentialStore;
    use crate::testutil::{self, ScriptedConnector};

    #[tokio::test]
    async fn redirect_is_suppressed_on_auth_screens() {
        let (navigator, mut events) = Navigator::new(Screen::Signup);

        navigator.go_to_login();
        assert_eq!(navigator.current(), Screen::Signup);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn concurrent_redirects_emit_one_event() {
        let (navigator, mut events) = Navigator::new(Screen::Wardrobe);

        navigator.go_to_login();
        navigator.go_to_login();

        assert_eq!(navigator.current(), Screen::Login);
        assert_eq!(events.try_recv().unwrap(), SessionEvent::RedirectToLogin);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn foreground_validation_skipped_during_verification() {
        let connector = Arc::new(ScriptedConnector::default());
        let (manager, _events, _store) =
            testutil::signed_in_manager(Arc::clone(&connector), Screen::Verification).await;

        // Token is absent, which would normally force a refresh call.
        assert!(manager.validate_on_foreground().await);
        assert_eq!(connector.refresh_calls(), 0);
    }

    #[tokio::test]
    async fn resume_refreshes_when_no_token_is_cached() {
        let connector = Arc::new(ScriptedConnector::default());
        connector.script(testutil::RefreshScript::Grant {
            token: "tok1",
            expires_in: None,
        });
        let (manager, _events, _store) =
            testutil::signed_in_manager(Arc::clone(&connector), Screen::Wardrobe).await;

        assert!(manager.validate_session_on_resume().await);
        assert_eq!(connector.refresh_calls(), 1);
        assert_eq!(manager.state().bearer_token().as_deref(), Some("tok1"));
    }

    #[tokio::test]
    async fn resume_keeps_session_on_transient_failure() {
        let connector = Arc::new(ScriptedConnector::default());
        connector.script(testutil::RefreshScript::Network);
        let (manager, mut events, _store) =
            testutil::signed_in_manager(Arc::clone(&connector), Screen::Wardrobe).await;

        // A flaky network on resume must not force a re-login.
        assert!(manager.validate_session_on_resume().await);
        assert!(manager.state().is_logged_in());
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn resume_signs_out_on_confirmed_invalidity() {
        let connector = Arc::new(ScriptedConnector::default());
        connector.script(testutil::RefreshScript::Status(
            http::StatusCode::UNAUTHORIZED,
            None,
        ));
        let (manager, mut events, _store) =
            testutil::signed_in_manager(Arc::clone(&connector), Screen::Wardrobe).await;

        assert!(!manager.validate_session_on_resume().await);
        assert!(!manager.state().is_logged_in());
        assert_eq!(events.try_recv().unwrap(), SessionEvent::RedirectToLogin);
    }

    #[tokio::test(start_paused = true)]
    async fn resume_is_silent_while_the_token_is_fresh() {
        let connector = Arc::new(ScriptedConnector::default());
        let (manager, _events, _store) =
            testutil::signed_in_manager(Arc::clone(&connector), Screen::Wardrobe).await;
        manager
            .state()
            .set_access_token("tok1", Some(std::time::Duration::from_secs(300)))
            .await;

        assert!(manager.validate_session_on_resume().await);
        assert_eq!(connector.refresh_calls(), 0, "no network call needed");
    }

    #[tokio::test]
    async fn resume_with_nothing_persisted_reports_invalid() {
        let connector = Arc::new(ScriptedConnector::default());
        let (manager, mut events, _store) =
            testutil::empty_manager(Arc::clone(&connector), Screen::Wardrobe).await;

        assert!(!manager.validate_session_on_resume().await);
        assert_eq!(events.try_recv().unwrap(), SessionEvent::RedirectToLogin);
        assert_eq!(connector.refresh_calls(), 0);
    }

    #[tokio::test]
    async fn logout_clears_locally_even_when_server_fails() {
        let connector = Arc::new(ScriptedConnector::default());
        connector.fail_logout();
        let (manager, mut events, store) =
            testutil::signed_in_manager(Arc::clone(&connector), Screen::Wardrobe).await;

        manager.logout().await;

        assert!(!manager.state().is_logged_in());
        assert_eq!(
            store.get(keys::SESSION_ID).await.unwrap(),
            None,
            "durable session id must be gone"
        );
        assert_eq!(connector.logout_calls(), 1);
        assert_eq!(events.try_recv().unwrap(), SessionEvent::RedirectToLogin);
    }
}
