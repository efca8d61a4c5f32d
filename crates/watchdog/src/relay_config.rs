// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Relay connection strings and the sources they are loaded from.
//!
//! A connection string is a `;`-separated list of `Key=Value` pairs:
//!
//! ```text
//! Endpoint=sb://ns.servicebus.windows.net/;SharedAccessKeyName=listen;SharedAccessKey=abc=;EntityPath=hc1
//! ```
//!
//! The parsed [`RelayConfig`] is immutable. Rotating credentials means loading
//! a new one and building a new connection from it.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use reqwest::Url;

use crate::error::ConfigError;

const ENDPOINT: &str = "Endpoint";
const ENTITY_PATH: &str = "EntityPath";
const KEY_NAME: &str = "SharedAccessKeyName";
const KEY: &str = "SharedAccessKey";
const SIGNATURE: &str = "SharedAccessSignature";

/// Credentials carried by a connection string.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    /// Named shared access key; tokens are signed locally.
    SharedKey { key_name: String, key: String },
    /// A pre-issued shared access signature, used verbatim.
    Signature(String),
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SharedKey { key_name, .. } => {
                f.debug_struct("SharedKey").field("key_name", key_name).finish_non_exhaustive()
            }
            Self::Signature(_) => f.write_str("Signature(..)"),
        }
    }
}

/// Parsed relay connection configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    pub endpoint: Url,
    pub entity_path: String,
    pub credential: Credential,
}

impl RelayConfig {
    /// Host with an explicit port when the endpoint carries one.
    fn authority(&self) -> String {
        let host = self.endpoint.host_str().unwrap_or_default();
        match self.endpoint.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_owned(),
        }
    }

    fn is_plaintext(&self) -> bool {
        matches!(self.endpoint.scheme(), "ws" | "http")
    }

    /// Audience used when signing tokens.
    pub fn resource_uri(&self) -> String {
        format!("http://{}/{}", self.authority(), self.entity_path)
    }

    /// WebSocket address a listener connects to (without its token).
    pub fn listen_url(&self) -> String {
        let scheme = if self.is_plaintext() { "ws" } else { "wss" };
        format!("{scheme}://{}/$hc/{}?sb-hc-action=listen", self.authority(), self.entity_path)
    }

    /// HTTP address senders post requests to.
    pub fn http_url(&self) -> String {
        let scheme = if self.is_plaintext() { "http" } else { "https" };
        format!("{scheme}://{}/{}", self.authority(), self.entity_path)
    }
}

impl FromStr for RelayConfig {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            return Err(ConfigError::Empty);
        }

        let mut endpoint = None;
        let mut entity_path = None;
        let mut key_name = None;
        let mut key = None;
        let mut signature = None;

        for segment in s.split(';') {
            let segment = segment.trim();
            if segment.is_empty() {
                continue;
            }
            let (name, value) = segment
                .split_once('=')
                .ok_or_else(|| ConfigError::MalformedSegment(segment.to_owned()))?;
            let value = value.trim().to_owned();
            let slot = match name.trim() {
                n if n.eq_ignore_ascii_case(ENDPOINT) => &mut endpoint,
                n if n.eq_ignore_ascii_case(ENTITY_PATH) => &mut entity_path,
                n if n.eq_ignore_ascii_case(KEY_NAME) => &mut key_name,
                n if n.eq_ignore_ascii_case(KEY) => &mut key,
                n if n.eq_ignore_ascii_case(SIGNATURE) => &mut signature,
                other => return Err(ConfigError::UnknownKey(other.to_owned())),
            };
            *slot = Some(value).filter(|v| !v.is_empty());
        }

        let endpoint = parse_endpoint(endpoint.ok_or(ConfigError::MissingField(ENDPOINT))?)?;
        let entity_path = entity_path
            .map(|p| p.trim_matches('/').to_owned())
            .filter(|p| !p.is_empty())
            .ok_or(ConfigError::MissingField(ENTITY_PATH))?;

        let credential = match (key_name, key, signature) {
            (Some(key_name), Some(key), _) => Credential::SharedKey { key_name, key },
            (Some(_), None, None) => return Err(ConfigError::MissingField(KEY)),
            (None, Some(_), None) => return Err(ConfigError::MissingField(KEY_NAME)),
            (_, _, Some(token)) => Credential::Signature(token),
            (None, None, None) => return Err(ConfigError::MissingCredentials),
        };

        Ok(Self { endpoint, entity_path, credential })
    }
}

fn parse_endpoint(raw: String) -> Result<Url, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidEndpoint { endpoint: raw.clone(), reason };
    let url = Url::parse(&raw).map_err(|e| invalid(e.to_string()))?;
    if !matches!(url.scheme(), "sb" | "ws" | "wss" | "http" | "https") {
        return Err(invalid(format!("unsupported scheme {:?}", url.scheme())));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(invalid("missing host".to_owned()));
    }
    Ok(url)
}

/// Where connection strings come from. Consulted once per connection build.
pub trait ConfigSource: Send + Sync + 'static {
    fn load(&self) -> Result<RelayConfig, ConfigError>;

    /// Human-readable origin for log lines.
    fn describe(&self) -> String;
}

/// Reads the connection string from a text file on every load.
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ConfigSource for FileSource {
    fn load(&self) -> Result<RelayConfig, ConfigError> {
        let contents = std::fs::read_to_string(&self.path)
            .map_err(|source| ConfigError::Read { path: self.path.clone(), source })?;
        // Lines are segments too, so one Key=Value per line parses. Lines that
        // already end in `;` only add empty segments, which the parser skips.
        let joined = contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join(";");
        joined.parse()
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// A fixed in-memory connection string.
pub struct StaticSource {
    raw: String,
}

impl StaticSource {
    pub fn new(raw: impl Into<String>) -> Self {
        Self { raw: raw.into() }
    }
}

impl ConfigSource for StaticSource {
    fn load(&self) -> Result<RelayConfig, ConfigError> {
        self.raw.parse()
    }

    fn describe(&self) -> String {
        "inline connection string".to_owned()
    }
}

#[cfg(test)]
#[path = "relay_config_tests.rs"]
mod tests;
