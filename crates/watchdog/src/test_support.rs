// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test infrastructure: a scriptable fake connection and factory, plus
//! an in-process stub relay for tests that drive real sockets.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::WebSocketStream;
use uuid::Uuid;

use crate::connection::{
    Connection, ConnectionFactory, ConnectionHooks, OfflineHandler, OnlineHandler, RelayRequest,
    RelayResponse, RequestHandler,
};
use crate::error::{BuildError, CloseError, ConfigError, ConnectError};
use crate::relay_config::{ConfigSource, RelayConfig};

/// A valid connection string pointing at a local relay.
pub const TEST_CONNECTION_STRING: &str =
    "Endpoint=ws://127.0.0.1:1/;SharedAccessKeyName=test;SharedAccessKey=dGVzdA==;EntityPath=hc1";

/// Connection string for a relay listening on `127.0.0.1:port`.
pub fn local_connection_string(port: u16) -> String {
    format!(
        "Endpoint=ws://127.0.0.1:{port}/;SharedAccessKeyName=test;SharedAccessKey=dGVzdA==;EntityPath=hc1"
    )
}

/// Counts connections that were opened and not yet closed.
#[derive(Debug, Default)]
pub struct LiveTracker {
    live: AtomicUsize,
    max_live: AtomicUsize,
}

impl LiveTracker {
    fn opened(&self) {
        let now = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_live.fetch_max(now, Ordering::SeqCst);
    }

    fn closed(&self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }

    /// Connections currently open and unclosed.
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously live connections ever observed.
    pub fn max_live(&self) -> usize {
        self.max_live.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
struct FakeHandlers {
    offline: Option<OfflineHandler>,
    online: Option<OnlineHandler>,
    request: Option<RequestHandler>,
}

#[derive(Default)]
struct FakeInner {
    id: Uuid,
    online: AtomicBool,
    /// Opened successfully and not closed since.
    live: AtomicBool,
    closed: AtomicBool,
    fail_open: AtomicBool,
    hang_open: AtomicBool,
    /// Refuse to reopen once the link has dropped, like the relay SDK does.
    reject_reopen: AtomicBool,
    dropped: AtomicBool,
    opens: AtomicU32,
    open_attempts: AtomicU32,
    closes: AtomicU32,
    handlers: Mutex<FakeHandlers>,
    tracker: Option<Arc<LiveTracker>>,
}

/// In-memory [`Connection`] whose liveness and callbacks are driven by tests.
#[derive(Clone)]
pub struct FakeConnection {
    inner: Arc<FakeInner>,
}

impl Default for FakeConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeConnection {
    pub fn new() -> Self {
        Self::with_tracker(None)
    }

    fn with_tracker(tracker: Option<Arc<LiveTracker>>) -> Self {
        Self { inner: Arc::new(FakeInner { id: Uuid::new_v4(), tracker, ..Default::default() }) }
    }

    /// Simulate the link dropping (or coming back) without any callback.
    pub fn set_online(&self, online: bool) {
        if !online {
            self.inner.dropped.store(true, Ordering::SeqCst);
        }
        self.inner.online.store(online, Ordering::SeqCst);
    }

    pub fn fail_open(&self, fail: bool) {
        self.inner.fail_open.store(fail, Ordering::SeqCst);
    }

    pub fn hang_open(&self, hang: bool) {
        self.inner.hang_open.store(hang, Ordering::SeqCst);
    }

    pub fn reject_reopen(&self, reject: bool) {
        self.inner.reject_reopen.store(reject, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Successful opens.
    pub fn opens(&self) -> u32 {
        self.inner.opens.load(Ordering::SeqCst)
    }

    /// All calls to `open`, including failed ones.
    pub fn open_attempts(&self) -> u32 {
        self.inner.open_attempts.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> u32 {
        self.inner.closes.load(Ordering::SeqCst)
    }

    /// Invoke the offline handler as the SDK would. Returns false when none is set.
    pub fn fire_offline(&self, reason: Option<String>) -> bool {
        let handler = self.inner.handlers.lock().offline.clone();
        match handler {
            Some(handler) => {
                handler(reason);
                true
            }
            None => false,
        }
    }

    pub fn fire_online(&self) -> bool {
        let handler = self.inner.handlers.lock().online.clone();
        match handler {
            Some(handler) => {
                handler();
                true
            }
            None => false,
        }
    }

    /// Push a request through the installed request handler.
    pub fn deliver_request(&self, request: RelayRequest) -> Option<RelayResponse> {
        let handler = self.inner.handlers.lock().request.clone();
        handler.map(|handler| handler(&request))
    }

    async fn open_inner(&self) -> Result<(), ConnectError> {
        let inner = &self.inner;
        inner.open_attempts.fetch_add(1, Ordering::SeqCst);
        if inner.closed.load(Ordering::SeqCst) {
            return Err(ConnectError::Closed);
        }
        if inner.hang_open.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if inner.fail_open.load(Ordering::SeqCst) {
            return Err(ConnectError::Other("injected open failure".to_owned()));
        }
        if inner.dropped.load(Ordering::SeqCst) && inner.reject_reopen.load(Ordering::SeqCst) {
            return Err(ConnectError::Other("link dropped, reopen refused".to_owned()));
        }

        inner.dropped.store(false, Ordering::SeqCst);
        inner.online.store(true, Ordering::SeqCst);
        inner.opens.fetch_add(1, Ordering::SeqCst);
        if !inner.live.swap(true, Ordering::SeqCst) {
            if let Some(tracker) = &inner.tracker {
                tracker.opened();
            }
        }
        Ok(())
    }

    async fn close_inner(&self) -> Result<(), CloseError> {
        let inner = &self.inner;
        inner.closes.fetch_add(1, Ordering::SeqCst);
        if inner.closed.swap(true, Ordering::SeqCst) {
            return Err(CloseError::AlreadyClosed);
        }
        inner.online.store(false, Ordering::SeqCst);
        if inner.live.swap(false, Ordering::SeqCst) {
            if let Some(tracker) = &inner.tracker {
                tracker.closed();
            }
        }
        Ok(())
    }
}

impl Connection for FakeConnection {
    fn id(&self) -> Uuid {
        self.inner.id
    }

    fn open(&self) -> Pin<Box<dyn Future<Output = Result<(), ConnectError>> + Send + '_>> {
        Box::pin(self.open_inner())
    }

    fn close(&self) -> Pin<Box<dyn Future<Output = Result<(), CloseError>> + Send + '_>> {
        Box::pin(self.close_inner())
    }

    fn is_online(&self) -> bool {
        self.inner.online.load(Ordering::SeqCst)
    }

    fn set_offline_handler(&self, handler: OfflineHandler) {
        self.inner.handlers.lock().offline = Some(handler);
    }

    fn set_online_handler(&self, handler: OnlineHandler) {
        self.inner.handlers.lock().online = Some(handler);
    }

    fn set_request_handler(&self, handler: RequestHandler) {
        self.inner.handlers.lock().request = Some(handler);
    }
}

/// Factory that hands out [`FakeConnection`]s and remembers every one of them.
#[derive(Default)]
pub struct FakeFactory {
    built: Mutex<Vec<FakeConnection>>,
    configs: Mutex<Vec<RelayConfig>>,
    tracker: Arc<LiveTracker>,
    fail_builds: AtomicU32,
    fail_opens: AtomicU32,
    hang_opens: AtomicU32,
    reject_reopen: AtomicBool,
}

impl FakeFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make the next `n` builds fail with an invalid address.
    pub fn fail_next_builds(&self, n: u32) {
        self.fail_builds.store(n, Ordering::SeqCst);
    }

    /// Make the connections from the next `n` builds fail to open.
    pub fn fail_next_opens(&self, n: u32) {
        self.fail_opens.store(n, Ordering::SeqCst);
    }

    /// Make the connections from the next `n` builds hang forever in `open`.
    pub fn hang_next_opens(&self, n: u32) {
        self.hang_opens.store(n, Ordering::SeqCst);
    }

    /// Built connections refuse to reopen after dropping.
    pub fn reject_reopen(&self, reject: bool) {
        self.reject_reopen.store(reject, Ordering::SeqCst);
    }

    pub fn built(&self) -> Vec<FakeConnection> {
        self.built.lock().clone()
    }

    pub fn build_count(&self) -> usize {
        self.built.lock().len()
    }

    /// The most recently built connection.
    pub fn latest(&self) -> Option<FakeConnection> {
        self.built.lock().last().cloned()
    }

    /// Configurations passed to each build, in order.
    pub fn configs(&self) -> Vec<RelayConfig> {
        self.configs.lock().clone()
    }

    pub fn tracker(&self) -> &LiveTracker {
        &self.tracker
    }
}

fn take_one(counter: &AtomicU32) -> bool {
    counter.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)).is_ok()
}

impl ConnectionFactory for FakeFactory {
    fn build(
        &self,
        config: &RelayConfig,
        hooks: &ConnectionHooks,
    ) -> Result<Box<dyn Connection>, BuildError> {
        if take_one(&self.fail_builds) {
            return Err(BuildError::InvalidUri {
                uri: config.listen_url(),
                reason: "injected build failure".to_owned(),
            });
        }
        let conn = FakeConnection::with_tracker(Some(Arc::clone(&self.tracker)));
        conn.fail_open(take_one(&self.fail_opens));
        conn.hang_open(take_one(&self.hang_opens));
        conn.reject_reopen(self.reject_reopen.load(Ordering::SeqCst));
        hooks.wire(&conn);
        self.built.lock().push(conn.clone());
        self.configs.lock().push(config.clone());
        Ok(Box::new(conn))
    }
}

/// Config source whose connection string can be swapped mid-test.
pub struct MemorySource {
    raw: Mutex<String>,
}

impl MemorySource {
    pub fn new(raw: impl Into<String>) -> Arc<Self> {
        Arc::new(Self { raw: Mutex::new(raw.into()) })
    }

    pub fn set(&self, raw: impl Into<String>) {
        *self.raw.lock() = raw.into();
    }
}

impl ConfigSource for MemorySource {
    fn load(&self) -> Result<RelayConfig, ConfigError> {
        self.raw.lock().parse()
    }

    fn describe(&self) -> String {
        "memory".to_owned()
    }
}

/// Accepts listener WebSockets on a loopback port and hands them to the test
/// in arrival order.
///
/// Sockets are only driven while the test polls them: one that is held but
/// never read answers no pings, like a relay whose network went away.
pub struct StubRelay {
    port: u16,
    sockets: mpsc::UnboundedReceiver<WebSocketStream<TcpStream>>,
    uris: Arc<Mutex<Vec<String>>>,
}

impl StubRelay {
    pub async fn start() -> anyhow::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        let (tx, sockets) = mpsc::unbounded_channel();
        let uris = Arc::new(Mutex::new(Vec::new()));

        let seen = Arc::clone(&uris);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let seen = Arc::clone(&seen);
                let record = move |req: &Request, resp: Response| {
                    seen.lock().push(req.uri().to_string());
                    Ok::<_, ErrorResponse>(resp)
                };
                if let Ok(ws) = tokio_tungstenite::accept_hdr_async(stream, record).await {
                    if tx.send(ws).is_err() {
                        break;
                    }
                }
            }
        });

        Ok(Self { port, sockets, uris })
    }

    pub fn connection_string(&self) -> String {
        local_connection_string(self.port)
    }

    /// Request URIs of every accepted listener handshake.
    pub fn uris(&self) -> Vec<String> {
        self.uris.lock().clone()
    }

    /// Wait for the next listener socket.
    pub async fn accept(
        &mut self,
        timeout: Duration,
    ) -> anyhow::Result<WebSocketStream<TcpStream>> {
        tokio::time::timeout(timeout, self.sockets.recv())
            .await
            .map_err(|_| anyhow::anyhow!("no listener connected within {timeout:?}"))?
            .ok_or_else(|| anyhow::anyhow!("stub relay stopped accepting"))
    }
}

/// Convert any `Result<T, E: Display>` into `anyhow::Result<T>`.
pub trait AnyhowExt<T> {
    fn anyhow(self) -> anyhow::Result<T>;
}

impl<T, E: std::fmt::Display> AnyhowExt<T> for Result<T, E> {
    fn anyhow(self) -> anyhow::Result<T> {
        self.map_err(|e| anyhow::anyhow!("{e}"))
    }
}

/// Assert that an expression evaluates to `Err` whose Display output
/// contains the given substring.
#[macro_export]
macro_rules! assert_err_contains {
    ($expr:expr, $substr:expr) => {{
        let result = $expr;
        let err = result.expect_err(concat!("expected Err for: ", stringify!($expr)));
        let msg = err.to_string();
        assert!(msg.contains($substr), "expected error containing {:?}, got: {msg:?}", $substr);
    }};
}
