//! Typed client for the Cloz API with credential handling built in.
//!
//! Every outbound call flows through one guarded request path that:
//! 1. Leaves the token-refresh endpoint alone (its credential is the
//!    session-id header, and it must never recursively trigger a refresh
//!    of its own); excluded explicitly by URL path.
//! 2. Proactively refreshes the access token when its expiry window has
//!    opened, *before* sending. A failed proactive refresh does not block
//!    the request: it proceeds on whatever token is cached, possibly
//!    stale, and fails naturally rather than stalling the caller.
//! 3. Attaches the cached token as a bearer credential.
//! 4. On a 401, refreshes once and re-issues the original request exactly
//!    once. The retry's own 401, if any, surfaces unchanged; a failed
//!    reactive refresh surfaces the *original* 401, so the caller sees the
//!    real failure and not the refresh attempt's.
//!
//! The typed endpoint methods below are thin wrappers over that path.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{
    header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE},
    Method, StatusCode, Url,
};
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::{
    config::Config,
    error::{Error, Result},
    http::Client as HttpClient,
    protocol::{
        user::ProfileUpdate, Ack, AuthGrant, ErrorMessage, LoginRequest, LoginResponse, NewOutfit,
        NewWardrobeItem, Outfit, RefreshResponse, SignupRequest, UserRecord, VerifyRequest,
        WardrobeItem,
    },
    refresh::{AuthConnector, RefreshCoordinator},
    state::SessionState,
};

/// Header carrying the opaque session identifier.
///
/// The session id travels as a header rather than a cookie: the client may
/// run outside any browser cookie jar.
pub const SESSION_ID_HEADER: &str = "X-Session-Id";

/// Header identifying this device/installation to the auth endpoints.
pub const DEVICE_ID_HEADER: &str = "X-Device-Id";

/// The `Content-Type` for all request bodies.
const JSON_CONTENT: HeaderValue = HeaderValue::from_static("application/json");

/// Typed Cloz API client.
pub struct Gateway {
    http_client: Arc<HttpClient>,
    state: SessionState,
    coordinator: RefreshCoordinator,
    api_url: Url,
    device_id: Uuid,
}

impl Gateway {
    /// Token refresh; excluded from the guarded request path.
    pub const REFRESH_PATH: &'static str = "auth/refresh";
    /// Server-side session teardown.
    pub const LOGOUT_PATH: &'static str = "auth/logout";

    const LOGIN_PATH: &'static str = "auth/login";
    const SIGNUP_PATH: &'static str = "auth/signup";
    const VERIFY_PATH: &'static str = "auth/verify";
    const PROFILE_PATH: &'static str = "users/me";
    const ADMIN_USERS_PATH: &'static str = "admin/users";
    const ITEMS_PATH: &'static str = "wardrobe/items";
    const OUTFITS_PATH: &'static str = "outfits";

    /// Creates a gateway over an existing transport.
    #[must_use]
    pub fn new(
        http_client: Arc<HttpClient>,
        config: &Config,
        state: SessionState,
        coordinator: RefreshCoordinator,
    ) -> Self {
        Self {
            http_client,
            state,
            coordinator,
            api_url: config.api_url.clone(),
            device_id: config.device_id,
        }
    }

    /// The guarded request path. See the module docs for the four steps.
    async fn send(&self, method: Method, path: &str, body: Option<String>) -> Result<reqwest::Response> {
        let url = self.api_url.join(path)?;
        let is_refresh = path == Self::REFRESH_PATH;

        if !is_refresh && self.state.should_refresh_token() {
            // Outcome deliberately ignored: on failure the request runs on
            // the cached token and fails naturally.
            self.coordinator.refresh_access_token().await;
        }

        let token = if is_refresh { None } else { self.state.bearer_token() };
        let response = self
            .dispatch(method.clone(), url.clone(), body.clone(), token.as_deref())
            .await?;

        if is_refresh || response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        debug!("{method} {path} was rejected with 401, attempting refresh");
        if self.coordinator.refresh_access_token().await {
            let token = self.state.bearer_token();
            // At most one retry; this response surfaces as-is, 401 or not.
            return self.dispatch(method, url, body, token.as_deref()).await;
        }

        // Refresh failed: the original rejection is the caller's error.
        Ok(response)
    }

    /// Builds and executes one HTTP exchange.
    async fn dispatch(
        &self,
        method: Method,
        url: Url,
        body: Option<String>,
        bearer: Option<&str>,
    ) -> Result<reqwest::Response> {
        let mut request = self
            .http_client
            .request(method, url, body.unwrap_or_default());

        let headers = request.headers_mut();
        headers.try_insert(CONTENT_TYPE, JSON_CONTENT)?;
        headers.try_insert(
            DEVICE_ID_HEADER,
            HeaderValue::from_str(&self.device_id.to_string())?,
        )?;
        if let Some(bearer) = bearer {
            headers.try_insert(AUTHORIZATION, HeaderValue::from_str(&format!("Bearer {bearer}"))?)?;
        }

        self.http_client.execute(request).await
    }

    /// Guarded request returning a decoded JSON body.
    async fn request_json<T>(&self, method: Method, path: &str, body: Option<String>) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let response = self.send(method, path, body).await?;
        decode(response).await
    }

    /// Signs in with a username and password.
    ///
    /// A response may be a finished grant or an MFA challenge; completing
    /// authentication (persisting credentials) is the session manager's
    /// job, not the gateway's.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the request fails or the credentials are
    /// rejected.
    pub async fn login(&self, username: &str, password: &str) -> Result<LoginResponse> {
        let body = serde_json::to_string(&LoginRequest {
            username: username.to_string(),
            password: password.to_string(),
        })?;
        self.request_json(Method::POST, Self::LOGIN_PATH, Some(body))
            .await
    }

    /// Registers a new account. Verification completes out of band.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the request fails or the account already
    /// exists.
    pub async fn signup(&self, request: &SignupRequest) -> Result<Ack> {
        let body = serde_json::to_string(request)?;
        self.request_json(Method::POST, Self::SIGNUP_PATH, Some(body))
            .await
    }

    /// Submits an MFA verification code, completing authentication.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the request fails or the code is rejected.
    pub async fn verify(&self, username: &str, code: &str) -> Result<AuthGrant> {
        let body = serde_json::to_string(&VerifyRequest {
            username: username.to_string(),
            code: code.to_string(),
        })?;
        self.request_json(Method::POST, Self::VERIFY_PATH, Some(body))
            .await
    }

    /// Fetches the signed-in user's profile.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the request fails.
    pub async fn profile(&self) -> Result<UserRecord> {
        self.request_json(Method::GET, Self::PROFILE_PATH, None).await
    }

    /// Applies a partial profile update and returns the updated record.
    ///
    /// The caller is responsible for feeding the returned record back into
    /// the session state so the cached profile stays current.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the request fails.
    pub async fn update_profile(&self, update: &ProfileUpdate) -> Result<UserRecord> {
        let body = serde_json::to_string(update)?;
        self.request_json(Method::PUT, Self::PROFILE_PATH, Some(body))
            .await
    }

    /// Lists the wardrobe.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the request fails.
    pub async fn list_items(&self) -> Result<Vec<WardrobeItem>> {
        self.request_json(Method::GET, Self::ITEMS_PATH, None).await
    }

    /// Catalogues a new wardrobe item.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the request fails.
    pub async fn add_item(&self, item: &NewWardrobeItem) -> Result<WardrobeItem> {
        let body = serde_json::to_string(item)?;
        self.request_json(Method::POST, Self::ITEMS_PATH, Some(body))
            .await
    }

    /// Replaces an existing wardrobe item.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the request fails or the item does not exist.
    pub async fn update_item(&self, id: u64, item: &NewWardrobeItem) -> Result<WardrobeItem> {
        let body = serde_json::to_string(item)?;
        self.request_json(Method::PUT, &format!("{}/{id}", Self::ITEMS_PATH), Some(body))
            .await
    }

    /// Removes a wardrobe item.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the request fails or the item does not exist.
    pub async fn delete_item(&self, id: u64) -> Result<Ack> {
        self.request_json(Method::DELETE, &format!("{}/{id}", Self::ITEMS_PATH), None)
            .await
    }

    /// Lists composed outfits.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the request fails.
    pub async fn list_outfits(&self) -> Result<Vec<Outfit>> {
        self.request_json(Method::GET, Self::OUTFITS_PATH, None).await
    }

    /// Composes a new outfit from catalogued items.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the request fails or an item id is unknown.
    pub async fn compose_outfit(&self, outfit: &NewOutfit) -> Result<Outfit> {
        let body = serde_json::to_string(outfit)?;
        self.request_json(Method::POST, Self::OUTFITS_PATH, Some(body))
            .await
    }

    /// Removes a composed outfit.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the request fails or the outfit does not exist.
    pub async fn delete_outfit(&self, id: u64) -> Result<Ack> {
        self.request_json(Method::DELETE, &format!("{}/{id}", Self::OUTFITS_PATH), None)
            .await
    }

    /// Browses all user accounts. Admin only.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the signed-in user is not an admin or the
    /// request fails.
    pub async fn list_users(&self) -> Result<Vec<UserRecord>> {
        if self.state.role() != Some(crate::protocol::Role::Admin) {
            return Err(Error::permission_denied(
                "account browsing requires the admin role",
            ));
        }

        self.request_json(Method::GET, Self::ADMIN_USERS_PATH, None)
            .await
    }
}

/// Decodes a response body, turning non-2xx statuses into typed errors.
///
/// The optional `{ "message": … }` body of a failure becomes the error
/// detail, which is what the session-invalid classification reads.
async fn decode<T>(response: reqwest::Response) -> Result<T>
where
    T: DeserializeOwned,
{
    let status = response.status();
    if status.is_success() {
        return response.json::<T>().await.map_err(Into::into);
    }

    let message = response
        .json::<ErrorMessage>()
        .await
        .ok()
        .and_then(|body| body.message);
    Err(Error::from_http_status(status, message))
}

/// [`AuthConnector`] over HTTP.
///
/// Talks to the refresh and logout endpoints directly on the transport,
/// below the guarded request path, so a refresh can never recurse into
/// another refresh.
pub struct HttpAuthConnector {
    http_client: Arc<HttpClient>,
    api_url: Url,
    device_id: Uuid,
}

impl HttpAuthConnector {
    /// Creates a connector over an existing transport.
    #[must_use]
    pub fn new(http_client: Arc<HttpClient>, config: &Config) -> Self {
        Self {
            http_client,
            api_url: config.api_url.clone(),
            device_id: config.device_id,
        }
    }

    /// POSTs an empty body to a session endpoint with the id header set.
    async fn post_session(&self, path: &str, session_id: &str) -> Result<reqwest::Response> {
        let url = self.api_url.join(path)?;
        let mut request = self.http_client.post(url, "");

        let headers = request.headers_mut();
        headers.try_insert(SESSION_ID_HEADER, HeaderValue::from_str(session_id)?)?;
        headers.try_insert(
            DEVICE_ID_HEADER,
            HeaderValue::from_str(&self.device_id.to_string())?,
        )?;

        self.http_client.execute(request).await
    }
}

#[async_trait]
impl AuthConnector for HttpAuthConnector {
    async fn refresh(&self, session_id: &str) -> Result<RefreshResponse> {
        let response = self.post_session(Gateway::REFRESH_PATH, session_id).await?;
        decode(response).await
    }

    async fn logout(&self, session_id: &str) -> Result<()> {
        let response = self.post_session(Gateway::LOGOUT_PATH, session_id).await?;

        // The response body is ignored beyond error reporting.
        let status = response.status();
        if !status.is_success() {
            let message = response
                .json::<ErrorMessage>()
                .await
                .ok()
                .and_then(|body| body.message);
            return Err(Error::from_http_status(status, message));
        }
        Ok(())
    }
}
