// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The opaque relay connection capability and the factory that builds it.

pub mod factory;
pub mod ws;

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use uuid::Uuid;

use crate::error::{CloseError, ConnectError};

pub use factory::{ConnectionFactory, RelayConnectionFactory};

/// Called when the connection notices it went offline. Carries a reason when known.
pub type OfflineHandler = Arc<dyn Fn(Option<String>) + Send + Sync>;

/// Called when the connection comes online.
pub type OnlineHandler = Arc<dyn Fn() + Send + Sync>;

/// Answers one inbound request.
pub type RequestHandler = Arc<dyn Fn(&RelayRequest) -> RelayResponse + Send + Sync>;

/// Stateful connection to a relay endpoint.
///
/// Only liveness and the registered handlers are observable. Handler delivery
/// is best effort: implementations may go offline without ever firing the
/// offline handler, so callers must poll [`Connection::is_online`].
///
/// Object-safe for use as `Box<dyn Connection>`.
pub trait Connection: Send + Sync + 'static {
    /// Identifier used to correlate log lines.
    fn id(&self) -> Uuid;

    fn open(&self) -> Pin<Box<dyn Future<Output = Result<(), ConnectError>> + Send + '_>>;

    fn close(&self) -> Pin<Box<dyn Future<Output = Result<(), CloseError>> + Send + '_>>;

    fn is_online(&self) -> bool;

    fn set_offline_handler(&self, handler: OfflineHandler);

    fn set_online_handler(&self, handler: OnlineHandler);

    fn set_request_handler(&self, handler: RequestHandler);
}

/// The three handlers a factory wires onto every connection it builds.
#[derive(Clone)]
pub struct ConnectionHooks {
    pub on_offline: OfflineHandler,
    pub on_online: OnlineHandler,
    pub on_request: RequestHandler,
}

impl ConnectionHooks {
    /// Hooks that only log; the supervisor supplies its own offline hook.
    pub fn logging() -> Self {
        Self {
            on_offline: Arc::new(|reason| {
                tracing::info!(reason = reason.as_deref().unwrap_or("unknown"), "connection offline");
            }),
            on_online: Arc::new(|| tracing::info!("connection online")),
            on_request: Arc::new(handle_request),
        }
    }

    pub fn wire(&self, conn: &dyn Connection) {
        conn.set_offline_handler(Arc::clone(&self.on_offline));
        conn.set_online_handler(Arc::clone(&self.on_online));
        conn.set_request_handler(Arc::clone(&self.on_request));
    }
}

/// An inbound request delivered through the relay.
#[derive(Debug, Clone, Default)]
pub struct RelayRequest {
    pub tracking_id: String,
    pub method: String,
    pub target: String,
    pub headers: HashMap<String, String>,
}

/// Reply to a [`RelayRequest`]. Returning it completes (closes) the response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayResponse {
    pub status_code: u16,
    pub status_description: String,
    pub body: Bytes,
}

impl RelayResponse {
    pub fn ok() -> Self {
        Self { status_code: 200, status_description: "OK".to_owned(), body: Bytes::new() }
    }
}

/// Liveness-proof endpoint: acknowledges every request with an empty 200.
pub fn handle_request(request: &RelayRequest) -> RelayResponse {
    tracing::info!(
        tracking_id = %request.tracking_id,
        method = %request.method,
        target = %request.target,
        "handling request"
    );
    RelayResponse::ok()
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
