//! Client configuration and connection settings.
//!
//! [`Config`] carries the application identity (name, version, user agent),
//! a stable per-device identifier, and the API endpoint. [`Connection`] is
//! the on-disk TOML file that overrides the endpoint and points at the
//! credential file; it is small by definition and rejected when oversized.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use url::Url;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Production endpoint of the Cloz API.
pub const DEFAULT_API_URL: &str = "https://api.cloz.app/v1/";

/// Default location of the durable credential record.
pub const DEFAULT_CREDENTIALS_FILE: &str = "cloz-credentials.json";

/// Application identity and endpoint configuration.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct Config {
    pub app_name: String,
    pub app_version: String,
    pub app_lang: String,

    /// Stable identifier of this device/installation.
    ///
    /// Sessions are per-device server-side; the id travels with the auth
    /// endpoints so the server can tie the session to this installation.
    pub device_id: Uuid,

    pub user_agent: String,

    /// Base URL of the API; all endpoint paths are joined onto it.
    pub api_url: Url,
}

impl Config {
    /// Builds a configuration against the given API endpoint.
    ///
    /// The device id is derived from the machine id so it is stable across
    /// restarts; when no machine id is available a random one is used for
    /// this run.
    ///
    /// # Panics
    ///
    /// Panics when the compiled-in application name, version or language
    /// cannot form a valid `User-Agent` string.
    #[must_use]
    pub fn new(api_url: Url) -> Self {
        let app_name = env!("CARGO_PKG_NAME").to_owned();
        let app_version = env!("CARGO_PKG_VERSION").to_owned();
        let app_lang = "en".to_owned();

        let device_id = match machine_uid::get() {
            Ok(machine_id) => {
                let namespace = Uuid::new_v5(&Uuid::NAMESPACE_DNS, b"cloz.app");
                Uuid::new_v5(&namespace, machine_id.as_bytes())
            }
            Err(e) => {
                warn!("could not get machine id, using random device id: {e}");
                Uuid::new_v4()
            }
        };
        trace!("device uuid: {device_id}");

        // Additional `User-Agent` string checks on top of `reqwest::HeaderValue`.
        let illegal_chars = |chr| chr == '/' || chr == ';';
        if app_name.is_empty()
            || app_name.contains(illegal_chars)
            || app_version.is_empty()
            || app_version.contains(illegal_chars)
            || app_lang.chars().count() != 2
            || app_lang.contains(illegal_chars)
        {
            panic!(
                "application name, version and/or language invalid (\"{app_name}\"; \"{app_version}\"; \"{app_lang}\")"
            );
        }

        let os_name = match std::env::consts::OS {
            "macos" => "osx",
            other => other,
        };
        let os_version = sysinfo::System::os_version().unwrap_or_else(|| String::from("0"));
        if os_name.is_empty()
            || os_name.contains(illegal_chars)
            || os_version.is_empty()
            || os_version.contains(illegal_chars)
        {
            panic!("os name and/or version invalid (\"{os_name}\"; \"{os_version}\")");
        }

        let user_agent =
            format!("{app_name}/{app_version} (Rust; {os_name}/{os_version}; Headless; {app_lang})");
        trace!("user agent: {user_agent}");

        Self {
            app_name,
            app_version,
            app_lang,

            device_id,

            user_agent,

            api_url,
        }
    }
}

/// On-disk connection settings, all optional.
///
/// ```toml
/// api_url = "https://api.cloz.app/v1/"
/// credentials_file = "/home/alice/.config/cloz/credentials.json"
/// ```
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct Connection {
    /// Endpoint override; the production endpoint when absent.
    pub api_url: Option<Url>,

    /// Credential record location; [`DEFAULT_CREDENTIALS_FILE`] when absent.
    pub credentials_file: Option<PathBuf>,
}

impl Connection {
    /// Upper bound on the connection file size.
    ///
    /// Prevents an out-of-memory condition: the file holds two short
    /// values.
    const MAX_FILE_SIZE: u64 = 1024;

    /// Loads connection settings, or defaults when the file is absent.
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but is oversized, unreadable or
    /// not valid TOML.
    pub fn load(path: &Path) -> Result<Self> {
        let attributes = match std::fs::metadata(path) {
            Ok(attributes) => attributes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("no connection file at {}, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(e) => return Err(e.into()),
        };

        if attributes.len() > Self::MAX_FILE_SIZE {
            return Err(Error::out_of_range(format!(
                "connection file {} is too large",
                path.display()
            )));
        }

        let contents = std::fs::read_to_string(path)?;
        toml::from_str(&contents).map_err(Into::into)
    }

    /// The configured endpoint, or the production default.
    ///
    /// # Panics
    ///
    /// Panics if the compiled-in default URL is invalid.
    #[must_use]
    pub fn api_url(&self) -> Url {
        self.api_url.clone().unwrap_or_else(|| {
            Url::parse(DEFAULT_API_URL).expect("invalid default API URL")
        })
    }

    /// The configured credential file, or the default location.
    #[must_use]
    pub fn credentials_file(&self) -> PathBuf {
        self.credentials_file
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CREDENTIALS_FILE))
    }
}
