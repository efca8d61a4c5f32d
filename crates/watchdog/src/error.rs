// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error taxonomy for configuration, connection building, and lifecycle calls.
//!
//! None of these are fatal to the supervisor: every variant is logged and the
//! poll loop carries on.

use std::path::PathBuf;

use thiserror::Error;

/// Malformed or missing connection configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read connection string from {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("connection string is empty")]
    Empty,

    #[error("malformed segment {0:?}: expected Key=Value")]
    MalformedSegment(String),

    #[error("unknown connection string key {0:?}")]
    UnknownKey(String),

    #[error("missing required field {0}")]
    MissingField(&'static str),

    #[error("no credentials: set SharedAccessKeyName and SharedAccessKey, or SharedAccessSignature")]
    MissingCredentials,

    #[error("invalid endpoint {endpoint:?}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },
}

/// Failure to construct a connection from configuration.
#[derive(Debug, Error)]
pub enum BuildError {
    /// For factories that parse extra settings out of the configuration
    /// themselves. [`crate::connection::RelayConnectionFactory`] only works
    /// from an already parsed [`crate::relay_config::RelayConfig`].
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("invalid relay address {uri:?}: {reason}")]
    InvalidUri { uri: String, reason: String },
}

/// Failure to open (or reopen) a connection.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("cannot open a connection that has already been closed")]
    Closed,

    #[error("relay handshake failed: {0}")]
    Handshake(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("open timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("{0}")]
    Other(String),
}

/// Failure to close a connection. Always logged and ignored.
#[derive(Debug, Error)]
pub enum CloseError {
    #[error("connection already closed")]
    AlreadyClosed,

    #[error("close handshake failed: {0}")]
    Transport(String),
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
