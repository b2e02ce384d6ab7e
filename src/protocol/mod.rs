//! Wire types for the Cloz REST API.
//!
//! This module provides type-safe request and response bodies for the
//! endpoints the client consumes:
//! * Authentication and session management ([`auth`])
//! * User accounts and profiles ([`user`])
//! * Wardrobe items and outfits ([`wardrobe`])
//!
//! # Conventions
//!
//! The API speaks JSON with camelCase field names. All numeric identifiers
//! are kept as 64-bit integers because the JSON protocol doesn't distinguish
//! between number sizes. Credential-bearing types redact their secrets from
//! `Debug` output.
//!
//! Failure responses carry a standard HTTP error status and an optional
//! body of the shape `{ "message": "..." }`, modeled by [`ErrorMessage`].

pub mod auth;
pub mod user;
pub mod wardrobe;

pub use auth::{AuthGrant, LoginRequest, LoginResponse, RefreshResponse, SignupRequest, VerifyRequest};
pub use user::{Role, UserRecord};
pub use wardrobe::{Category, NewOutfit, NewWardrobeItem, Outfit, WardrobeItem};

use serde::Deserialize;

/// Error body attached to non-2xx API responses.
///
/// The message is free-form text and may be absent entirely; callers must
/// not rely on its wording except through the single session-invalid
/// predicate in the error module.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize)]
pub struct ErrorMessage {
    /// Human-readable failure description, if the server provided one.
    pub message: Option<String>,
}

/// Acknowledgement body for endpoints that return no data.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize)]
pub struct Ack {
    /// Optional server-side status text; informational only.
    #[serde(default)]
    pub message: Option<String>,
}
