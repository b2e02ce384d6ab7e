//! User account types shared across the API surface.
//!
//! # Wire Format
//!
//! ```json
//! {
//!     "username": "alice",
//!     "role": "user",
//!     "name": "Alice",
//!     "email": "alice@example.com",
//!     "gender": "female",
//!     "darkMode": true
//! }
//! ```

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Access level of a user account.
///
/// Admin accounts may browse all user accounts through the admin surface;
/// everything else requires no particular role.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Account administration and user browsing.
    Admin,
    /// Regular wardrobe owner.
    User,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Admin => write!(f, "admin"),
            Self::User => write!(f, "user"),
        }
    }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Self::Admin),
            "user" => Ok(Self::User),
            other => Err(Error::invalid_argument(format!("unknown role: {other}"))),
        }
    }
}

/// Cached profile of the signed-in user.
///
/// This record is what decides "logged in": its presence in durable storage
/// is the sole source of that state. Token validity never is.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    /// Unique account name, the primary identifier.
    pub username: String,

    /// Access level of the account.
    pub role: Role,

    /// Display name, if set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Contact address, if set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// Free-form gender field, if set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,

    /// Dark-mode UI preference, if set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dark_mode: Option<bool>,
}

impl UserRecord {
    /// Whether this account may use the admin surface.
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Partial profile update sent to the server.
///
/// Only the populated fields are transmitted; absent fields are left
/// untouched server-side.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    /// New display name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// New contact address.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// New gender field.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,

    /// New dark-mode preference.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dark_mode: Option<bool>,
}
