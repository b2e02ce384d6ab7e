//! Headless client for the Cloz wardrobe service.
//!
//! Owns the authenticated-session lifecycle against the Cloz API:
//! durable credential storage, reactive session state, single-flight token
//! refresh, a guarded request pipeline with proactive and reactive refresh,
//! and startup/resume validation, plus typed endpoints for the wardrobe,
//! outfit and account surfaces built on top of it.
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

#[macro_use]
extern crate log;

pub mod config;
pub mod error;
pub mod gateway;
pub mod http;
pub mod lifecycle;
pub mod protocol;
pub mod refresh;
pub mod state;
pub mod store;

#[cfg(test)]
pub(crate) mod testutil;
