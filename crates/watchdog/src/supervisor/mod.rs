// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Liveness supervisor: owns at most one relay connection and keeps it alive.
//!
//! Polling is the source of truth. The connection's own offline callback only
//! triggers an opportunistic reopen of the same object; if that does not
//! bring it back, the next poll rebuilds it from fresh configuration.

pub mod state;

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::connection::{handle_request, Connection, ConnectionFactory, ConnectionHooks};
use crate::error::ConnectError;
use crate::relay_config::ConfigSource;

pub use state::{Snapshot, SupervisorEvent, SupervisorState};

/// Timing knobs for the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorSettings {
    /// Delay between liveness checks.
    pub poll_interval: Duration,
    /// How long an offline connection gets to recover on its own before a rebuild.
    pub grace_interval: Duration,
    /// Upper bound on a single `open()`. `None` waits forever.
    pub open_timeout: Option<Duration>,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            grace_interval: Duration::from_secs(2),
            open_timeout: Some(Duration::from_secs(30)),
        }
    }
}

struct Held {
    generation: u64,
    conn: Box<dyn Connection>,
}

/// Everything guarded by the supervisor's single lock.
struct Slot {
    state: SupervisorState,
    held: Option<Held>,
    generation: u64,
    rebuilds: u64,
}

struct Shared {
    slot: Mutex<Slot>,
    factory: Arc<dyn ConnectionFactory>,
    source: Arc<dyn ConfigSource>,
    settings: SupervisorSettings,
    events: broadcast::Sender<SupervisorEvent>,
    snapshot: watch::Sender<Snapshot>,
}

/// Handle to a supervisor. Clones share the same connection and state.
#[derive(Clone)]
pub struct LivenessSupervisor {
    shared: Arc<Shared>,
}

impl LivenessSupervisor {
    pub fn new(
        factory: Arc<dyn ConnectionFactory>,
        source: Arc<dyn ConfigSource>,
        settings: SupervisorSettings,
    ) -> Self {
        let (events, _) = broadcast::channel(64);
        let (snapshot, _) = watch::channel(Snapshot::default());
        let shared = Shared {
            slot: Mutex::new(Slot {
                state: SupervisorState::Unstarted,
                held: None,
                generation: 0,
                rebuilds: 0,
            }),
            factory,
            source,
            settings,
            events,
            snapshot,
        };
        Self { shared: Arc::new(shared) }
    }

    pub fn settings(&self) -> SupervisorSettings {
        self.shared.settings
    }

    pub fn state(&self) -> SupervisorState {
        self.shared.snapshot.borrow().state
    }

    pub fn snapshot(&self) -> Snapshot {
        self.shared.snapshot.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<Snapshot> {
        self.shared.snapshot.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SupervisorEvent> {
        self.shared.events.subscribe()
    }

    /// Run one liveness check and react to it.
    ///
    /// An offline observation waits one grace interval (without holding the
    /// lock) and rebuilds only if the same connection is still offline.
    pub async fn tick(&self) {
        let shared = &self.shared;
        let (generation, conn_id) = {
            let mut slot = shared.slot.lock().await;
            let observed = slot
                .held
                .as_ref()
                .map(|h| (h.generation, h.conn.id(), h.conn.is_online()));
            match observed {
                None => {
                    info!("connection not started, starting");
                    shared.rebuild(&mut slot).await;
                    return;
                }
                Some((generation, conn_id, true)) => {
                    debug!(conn = %conn_id, generation, "connection is online");
                    shared.transition(&mut slot, SupervisorState::Online);
                    return;
                }
                Some((generation, conn_id, false)) => {
                    info!(conn = %conn_id, generation, "connection went offline");
                    shared.transition(&mut slot, SupervisorState::Offline);
                    (generation, conn_id)
                }
            }
        };

        // Give the connection a chance to reconnect by itself.
        tokio::time::sleep(shared.settings.grace_interval).await;

        let mut slot = shared.slot.lock().await;
        let observed = slot.held.as_ref().map(|h| (h.generation, h.conn.is_online()));
        match observed {
            Some((current, false)) if current == generation => {
                warn!(conn = %conn_id, generation, "still offline after grace interval, rebuilding");
                shared.rebuild(&mut slot).await;
            }
            Some((current, true)) if current == generation => {
                info!(conn = %conn_id, generation, "connection recovered during grace interval");
                shared.transition(&mut slot, SupervisorState::Online);
            }
            _ => debug!(generation, "connection replaced during grace interval"),
        }
    }

    /// Rebuild from freshly loaded configuration, regardless of liveness.
    ///
    /// This is how rotated credentials take effect: connections have no way to
    /// swap their token provider in place.
    pub async fn rotate(&self) {
        let mut slot = self.shared.slot.lock().await;
        info!(generation = slot.generation, "rotating credentials, rebuilding connection");
        self.shared.rebuild(&mut slot).await;
    }

    /// Close the held connection (if any) and return to `Unstarted`.
    pub async fn stop(&self) {
        let mut slot = self.shared.slot.lock().await;
        self.shared.discard(&mut slot).await;
        self.shared.transition(&mut slot, SupervisorState::Unstarted);
    }

    /// Poll until `shutdown` fires, then close the connection.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut timer = tokio::time::interval(self.shared.settings.poll_interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = timer.tick() => {}
            }
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = self.tick() => {}
            }
        }

        info!("supervisor shutting down");
        self.stop().await;
    }

    /// Spawn [`Self::run`] on a background task.
    pub fn spawn(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        let supervisor = self.clone();
        tokio::spawn(async move { supervisor.run(shutdown).await })
    }
}

impl Shared {
    fn transition(&self, slot: &mut Slot, to: SupervisorState) {
        let from = std::mem::replace(&mut slot.state, to);
        if from != to {
            debug!(%from, %to, generation = slot.generation, "supervisor state changed");
            let _ = self.events.send(SupervisorEvent::Transition {
                from,
                to,
                generation: slot.generation,
            });
        }
        self.snapshot.send_replace(Snapshot {
            state: slot.state,
            generation: slot.generation,
            rebuilds: slot.rebuilds,
            connection_id: slot.held.as_ref().map(|h| h.conn.id().to_string()),
        });
    }

    /// Close (best effort) and drop the held connection.
    async fn discard(&self, slot: &mut Slot) {
        let Some(held) = slot.held.take() else {
            return;
        };
        self.transition(slot, SupervisorState::Closing);
        info!(conn = %held.conn.id(), generation = held.generation, "closing connection");
        if let Err(e) = held.conn.close().await {
            warn!(conn = %held.conn.id(), err = %e, "failed to close connection");
        }
    }

    /// Replace whatever is held with a connection built from current configuration.
    async fn rebuild(self: &Arc<Self>, slot: &mut Slot) {
        let replacing = slot.held.is_some();
        self.discard(slot).await;

        let config = match self.source.load() {
            Ok(config) => config,
            Err(e) => {
                error!(source = %self.source.describe(), err = %e, "failed to load relay configuration");
                self.transition(slot, SupervisorState::Unstarted);
                return;
            }
        };

        let generation = slot.generation + 1;
        let conn = match self.factory.build(&config, &self.hooks(generation)) {
            Ok(conn) => conn,
            Err(e) => {
                error!(err = %e, "failed to build connection");
                self.transition(slot, SupervisorState::Unstarted);
                return;
            }
        };

        slot.generation = generation;
        if replacing {
            slot.rebuilds += 1;
            let _ = self.events.send(SupervisorEvent::Rebuilt { generation });
        }
        info!(conn = %conn.id(), generation, entity = %config.entity_path, "opening connection");
        slot.held = Some(Held { generation, conn });
        self.transition(slot, SupervisorState::Starting);

        let Some(held) = slot.held.as_ref() else {
            return;
        };
        match self.open(held.conn.as_ref()).await {
            Ok(()) => {
                let online = held.conn.is_online();
                let to = if online { SupervisorState::Online } else { SupervisorState::Offline };
                self.transition(slot, to);
            }
            Err(e) => {
                error!(conn = %held.conn.id(), generation, err = %e, "failed to open connection");
                self.discard(slot).await;
                self.transition(slot, SupervisorState::Unstarted);
            }
        }
    }

    async fn open(&self, conn: &dyn Connection) -> Result<(), ConnectError> {
        match self.settings.open_timeout {
            Some(limit) => tokio::time::timeout(limit, conn.open())
                .await
                .unwrap_or_else(|_| Err(ConnectError::Timeout(limit))),
            None => conn.open().await,
        }
    }

    /// Push path: reopen the same connection object after its offline callback.
    async fn reopen(&self, generation: u64) {
        let mut slot = self.slot.lock().await;
        let observed = slot.held.as_ref().map(|h| (h.generation, h.conn.is_online()));
        match observed {
            Some((current, false)) if current == generation => {}
            Some((current, true)) if current == generation => {
                debug!(generation, "offline callback raced a recovery, nothing to do");
                return;
            }
            _ => {
                debug!(generation, "ignoring offline callback from a replaced connection");
                return;
            }
        }
        self.transition(&mut slot, SupervisorState::Offline);

        let Some(held) = slot.held.as_ref() else {
            return;
        };
        let online = match self.open(held.conn.as_ref()).await {
            Ok(()) => held.conn.is_online(),
            Err(e) => {
                warn!(conn = %held.conn.id(), generation, err = %e, "reopen failed, leaving recovery to the poll loop");
                false
            }
        };
        let _ = self.events.send(SupervisorEvent::Reopened { generation, online });
        if online {
            self.transition(&mut slot, SupervisorState::Online);
        }
    }

    fn hooks(self: &Arc<Self>, generation: u64) -> ConnectionHooks {
        let weak: Weak<Self> = Arc::downgrade(self);
        // Callbacks may arrive on threads outside the runtime.
        let runtime = tokio::runtime::Handle::try_current().ok();

        ConnectionHooks {
            on_offline: Arc::new(move |reason| {
                info!(
                    generation,
                    reason = reason.as_deref().unwrap_or("unknown"),
                    "offline handler triggered, trying to reopen"
                );
                let Some(runtime) = runtime.as_ref() else {
                    return;
                };
                let weak = Weak::clone(&weak);
                runtime.spawn(async move {
                    if let Some(shared) = weak.upgrade() {
                        shared.reopen(generation).await;
                    }
                });
            }),
            on_online: Arc::new(move || info!(generation, "connection is online")),
            on_request: Arc::new(handle_request),
        }
    }
}

#[cfg(test)]
#[path = "supervisor_tests.rs"]
mod tests;
