// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket binding to a relay listener endpoint.
//!
//! The relay pushes each inbound HTTP request as a JSON control frame and
//! expects a response frame back on the same socket. Only that control
//! exchange is handled here; request bodies and rendezvous upgrades are not.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::connection::{
    Connection, OfflineHandler, OnlineHandler, RelayRequest, RequestHandler,
};
use crate::error::{CloseError, ConnectError};
use crate::token::TokenProvider;

/// Ping period used unless the builder overrides it.
pub const DEFAULT_KEEPALIVE: Duration = Duration::from_secs(10);

/// Ping periods that may pass without any inbound frame before the link is
/// treated as dead.
pub const KEEPALIVE_MISSES: u32 = 3;

#[derive(Default)]
struct Handlers {
    offline: Option<OfflineHandler>,
    online: Option<OnlineHandler>,
    request: Option<RequestHandler>,
}

enum Link {
    Idle,
    Open { cancel: CancellationToken, pump: JoinHandle<Result<(), String>> },
    Closed,
}

/// Relay listener connection over a single WebSocket.
///
/// Once closed it cannot be reopened; build a new one instead.
pub struct WsConnection {
    id: Uuid,
    listen_url: String,
    audience: String,
    tokens: TokenProvider,
    keepalive: Option<Duration>,
    handlers: Arc<RwLock<Handlers>>,
    link: Mutex<Link>,
    online: Arc<AtomicBool>,
}

impl WsConnection {
    pub fn new(listen_url: String, audience: String, tokens: TokenProvider) -> Self {
        Self {
            id: Uuid::new_v4(),
            listen_url,
            audience,
            tokens,
            keepalive: Some(DEFAULT_KEEPALIVE),
            handlers: Arc::new(RwLock::new(Handlers::default())),
            link: Mutex::new(Link::Idle),
            online: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Ping the relay every `period`; `None` turns keepalive off, leaving a
    /// silent relay reported online until the socket itself fails.
    pub fn with_keepalive(mut self, period: Option<Duration>) -> Self {
        self.keepalive = period;
        self
    }

    fn connect_url(&self) -> String {
        let token = self.tokens.token(&self.audience);
        format!("{}&sb-hc-token={}", self.listen_url, urlencoding::encode(&token))
    }

    async fn open_inner(&self) -> Result<(), ConnectError> {
        {
            let link = self.link.lock();
            match *link {
                Link::Closed => return Err(ConnectError::Closed),
                Link::Open { .. } if self.online.load(Ordering::Acquire) => return Ok(()),
                _ => {}
            }
        }

        let (stream, _) = tokio_tungstenite::connect_async(self.connect_url()).await?;

        let cancel = CancellationToken::new();
        {
            let mut link = self.link.lock();
            if matches!(*link, Link::Closed) {
                // Closed while the handshake was in flight.
                return Err(ConnectError::Closed);
            }
            self.online.store(true, Ordering::Release);
            let pump = tokio::spawn(pump(
                stream,
                cancel.clone(),
                Arc::clone(&self.handlers),
                Arc::clone(&self.online),
                self.keepalive,
                self.id,
            ));
            if let Link::Open { cancel: stale, .. } =
                std::mem::replace(&mut *link, Link::Open { cancel, pump })
            {
                stale.cancel();
            }
        }

        tracing::debug!(conn = %self.id, "relay listener connected");
        let on_online = self.handlers.read().online.clone();
        if let Some(handler) = on_online {
            handler();
        }
        Ok(())
    }

    async fn close_inner(&self) -> Result<(), CloseError> {
        let previous = std::mem::replace(&mut *self.link.lock(), Link::Closed);
        self.online.store(false, Ordering::Release);
        match previous {
            Link::Idle => Ok(()),
            Link::Closed => {
                tracing::debug!(conn = %self.id, "close on already closed connection");
                Ok(())
            }
            Link::Open { cancel, pump } => {
                cancel.cancel();
                match pump.await {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(e)) => Err(CloseError::Transport(e)),
                    Err(e) => Err(CloseError::Transport(e.to_string())),
                }
            }
        }
    }
}

impl Connection for WsConnection {
    fn id(&self) -> Uuid {
        self.id
    }

    fn open(&self) -> Pin<Box<dyn Future<Output = Result<(), ConnectError>> + Send + '_>> {
        Box::pin(self.open_inner())
    }

    fn close(&self) -> Pin<Box<dyn Future<Output = Result<(), CloseError>> + Send + '_>> {
        Box::pin(self.close_inner())
    }

    fn is_online(&self) -> bool {
        self.online.load(Ordering::Acquire)
    }

    fn set_offline_handler(&self, handler: OfflineHandler) {
        self.handlers.write().offline = Some(handler);
    }

    fn set_online_handler(&self, handler: OnlineHandler) {
        self.handlers.write().online = Some(handler);
    }

    fn set_request_handler(&self, handler: RequestHandler) {
        self.handlers.write().request = Some(handler);
    }
}

/// Read control frames until the socket ends, the keepalive lapses, or
/// `cancel` fires.
///
/// Returns the outcome of the close handshake when cancelled.
async fn pump<S>(
    stream: WebSocketStream<S>,
    cancel: CancellationToken,
    handlers: Arc<RwLock<Handlers>>,
    online: Arc<AtomicBool>,
    keepalive: Option<Duration>,
    id: Uuid,
) -> Result<(), String>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let (mut write, mut read) = stream.split();
    let mut ticker = keepalive.map(|period| {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    });
    let mut last_seen = Instant::now();

    let reason = loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                online.store(false, Ordering::Release);
                return write.send(Message::Close(None)).await.map_err(|e| e.to_string());
            }
            _ = next_tick(ticker.as_mut()) => {
                let Some(period) = keepalive else { continue };
                let deadline = period * KEEPALIVE_MISSES;
                if last_seen.elapsed() >= deadline {
                    break format!("keepalive timed out: no frames from relay in {deadline:?}");
                }
                tracing::trace!(conn = %id, "keepalive ping");
                if let Err(e) = write.send(Message::Ping(Bytes::new())).await {
                    break e.to_string();
                }
            }
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    last_seen = Instant::now();
                    let handler = handlers.read().request.clone();
                    let Some((frame, body)) = answer(text.as_str(), handler.as_ref()) else {
                        continue;
                    };
                    if let Err(e) = write.send(Message::Text(frame.into())).await {
                        break e.to_string();
                    }
                    if !body.is_empty() {
                        if let Err(e) = write.send(Message::Binary(body)).await {
                            break e.to_string();
                        }
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    break frame
                        .map(|f| f.reason.as_str().to_owned())
                        .unwrap_or_else(|| "closed by relay".to_owned());
                }
                Some(Ok(_)) => last_seen = Instant::now(),
                Some(Err(e)) => break e.to_string(),
                None => break "stream ended".to_owned(),
            }
        }
    };

    online.store(false, Ordering::Release);
    tracing::debug!(conn = %id, reason = %reason, "relay listener dropped");
    let on_offline = handlers.read().offline.clone();
    if let Some(handler) = on_offline {
        handler(Some(reason));
    }
    Ok(())
}

async fn next_tick(ticker: Option<&mut Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[derive(Deserialize)]
struct RequestEnvelope {
    request: Option<RequestFrame>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RequestFrame {
    id: String,
    #[serde(default)]
    method: String,
    #[serde(default)]
    request_target: String,
    #[serde(default)]
    request_headers: HashMap<String, String>,
}

#[derive(Serialize)]
struct ResponseEnvelope<'a> {
    response: ResponseFrame<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ResponseFrame<'a> {
    request_id: &'a str,
    status_code: u16,
    status_description: &'a str,
    response_headers: HashMap<String, String>,
    body: bool,
}

/// Turn one control frame into the reply frame (plus body bytes, if any).
///
/// Frames that are not requests, or arrive with no handler installed, get no reply.
fn answer(text: &str, handler: Option<&RequestHandler>) -> Option<(String, Bytes)> {
    let frame = serde_json::from_str::<RequestEnvelope>(text).ok()?.request?;
    let handler = handler?;

    let request = RelayRequest {
        tracking_id: frame.id,
        method: frame.method,
        target: frame.request_target,
        headers: frame.request_headers,
    };
    let response = handler(&request);
    let envelope = ResponseEnvelope {
        response: ResponseFrame {
            request_id: &request.tracking_id,
            status_code: response.status_code,
            status_description: &response.status_description,
            response_headers: HashMap::new(),
            body: !response.body.is_empty(),
        },
    };
    let text = serde_json::to_string(&envelope).ok()?;
    Some((text, response.body))
}

#[cfg(test)]
#[path = "ws_tests.rs"]
mod tests;
