// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use tokio_tungstenite::tungstenite::http::Uri;

use crate::connection::ws::{WsConnection, DEFAULT_KEEPALIVE};
use crate::connection::{Connection, ConnectionHooks};
use crate::error::BuildError;
use crate::relay_config::RelayConfig;
use crate::token::TokenProvider;

/// Builds a fresh connection for every (re)build.
///
/// Implementations are stateless: the same configuration always yields an
/// independent connection with the hooks already wired. A failed build
/// produces nothing the caller needs to clean up.
pub trait ConnectionFactory: Send + Sync + 'static {
    fn build(
        &self,
        config: &RelayConfig,
        hooks: &ConnectionHooks,
    ) -> Result<Box<dyn Connection>, BuildError>;
}

/// Builds [`WsConnection`]s bound to `endpoint + entity path`.
#[derive(Debug, Clone, Copy)]
pub struct RelayConnectionFactory {
    keepalive: Option<Duration>,
}

impl RelayConnectionFactory {
    /// `keepalive` is the ping period for every built connection (`None` disables it).
    pub fn new(keepalive: Option<Duration>) -> Self {
        Self { keepalive }
    }

    pub fn keepalive(&self) -> Option<Duration> {
        self.keepalive
    }
}

impl Default for RelayConnectionFactory {
    fn default() -> Self {
        Self::new(Some(DEFAULT_KEEPALIVE))
    }
}

impl ConnectionFactory for RelayConnectionFactory {
    fn build(
        &self,
        config: &RelayConfig,
        hooks: &ConnectionHooks,
    ) -> Result<Box<dyn Connection>, BuildError> {
        let listen_url = config.listen_url();
        if let Err(e) = listen_url.parse::<Uri>() {
            return Err(BuildError::InvalidUri { uri: listen_url, reason: e.to_string() });
        }
        let tokens = TokenProvider::new(config.credential.clone());
        let conn = WsConnection::new(listen_url.clone(), config.resource_uri(), tokens)
            .with_keepalive(self.keepalive);
        hooks.wire(&conn);
        tracing::debug!(conn = %conn.id(), url = %listen_url, "built relay connection");
        Ok(Box::new(conn))
    }
}

#[cfg(test)]
#[path = "factory_tests.rs"]
mod tests;
