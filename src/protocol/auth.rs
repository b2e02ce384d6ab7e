//! Authentication request and response types.
//!
//! This module contains the bodies exchanged with the `/auth` endpoints:
//! * Credential submission (login, signup, MFA verification)
//! * Token issuance and refresh
//!
//! # Example Response
//!
//! ```json
//! {
//!     "accessToken": "secret_token",
//!     "expiresIn": 300,
//!     "sessionId": "5f2c...",
//!     "user": { "username": "alice", "role": "user" }
//! }
//! ```
//!
//! # Note
//!
//! Older deployments of the service returned the access token under the
//! legacy `token` key; both spellings are accepted. `expiresIn` may be
//! absent, in which case callers fall back to the standard 300-second token
//! lifetime.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_with::{formats::Flexible, serde_as, DurationSeconds};
use veil::Redact;

use super::user::UserRecord;

/// Login credentials for password authentication.
#[derive(Clone, Eq, PartialEq, Serialize, Redact)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    /// Account name to sign in as.
    pub username: String,

    /// Account password.
    #[redact]
    pub password: String,
}

/// New-account registration data.
#[derive(Clone, Eq, PartialEq, Serialize, Redact)]
#[serde(rename_all = "camelCase")]
pub struct SignupRequest {
    /// Desired account name.
    pub username: String,

    /// Account password.
    #[redact]
    pub password: String,

    /// Contact address; receives the verification code.
    pub email: String,

    /// Optional display name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Out-of-band verification code submission.
#[derive(Clone, Eq, PartialEq, Serialize, Redact)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    /// Account being verified.
    pub username: String,

    /// Code received out of band (email).
    #[redact]
    pub code: String,
}

/// Credentials issued when authentication completes.
///
/// Produced by a successful login without MFA, or by MFA verification.
/// Contains everything the session lifecycle persists: the bearer token,
/// its lifetime, the server-side session handle and the user profile.
#[serde_as]
#[derive(Clone, Eq, PartialEq, Deserialize, Redact)]
#[serde(rename_all = "camelCase")]
pub struct AuthGrant {
    /// Bearer credential for API calls.
    #[serde(alias = "token")]
    #[redact]
    pub access_token: String,

    /// How long the token remains valid; defaults to 300 seconds if absent.
    #[serde_as(as = "Option<DurationSeconds<u64, Flexible>>")]
    #[serde(default)]
    pub expires_in: Option<Duration>,

    /// Opaque handle to the server-side session.
    #[redact]
    pub session_id: String,

    /// Profile of the authenticated account.
    pub user: UserRecord,
}

/// Response to a login attempt.
///
/// Either a finished grant, or an MFA challenge that must be answered with
/// a [`VerifyRequest`] before credentials are issued.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    /// Whether a verification code was sent instead of credentials.
    #[serde(default)]
    pub mfa_required: bool,

    /// Issued credentials, present when no MFA round-trip is needed.
    #[serde(flatten)]
    pub grant: Option<AuthGrant>,
}

/// Response from the token refresh endpoint.
///
/// A well-formed success carries a fresh access token; a response without
/// one is treated as ambiguous by the refresh coordinator (the endpoint
/// responded but gave nothing usable), never as proof of invalidity.
#[serde_as]
#[derive(Clone, Eq, PartialEq, Deserialize, Redact)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    /// Replacement bearer credential, if the refresh succeeded.
    #[serde(default, alias = "token")]
    #[redact]
    pub access_token: Option<String>,

    /// Lifetime of the new token; defaults to 300 seconds if absent.
    #[serde_as(as = "Option<DurationSeconds<u64, Flexible>>")]
    #[serde(default)]
    pub expires_in: Option<Duration>,

    /// Rotated session handle. Almost always absent; when present it
    /// replaces the stored one.
    #[serde(default)]
    #[redact]
    pub session_id: Option<String>,
}
