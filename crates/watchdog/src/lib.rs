// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Relaywatch: keeps a relay listener connection alive.

pub mod config;
pub mod connection;
pub mod error;
pub mod relay_config;
pub mod status;
pub mod supervisor;
pub mod test_support;
pub mod token;

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::connection::RelayConnectionFactory;
use crate::supervisor::LivenessSupervisor;

/// Supervise the relay connection (and serve status, if enabled) until
/// `shutdown` fires.
pub async fn run(config: Config, shutdown: CancellationToken) -> anyhow::Result<()> {
    let source = config.source();
    info!(
        source = %source.describe(),
        poll_ms = config.poll_ms,
        grace_ms = config.grace_interval().as_millis() as u64,
        "relaywatch starting"
    );

    let supervisor = LivenessSupervisor::new(
        Arc::new(RelayConnectionFactory::new(config.keepalive())),
        source,
        config.settings(),
    );
    let task = supervisor.spawn(shutdown.clone());
    spawn_rotate_on_hangup(supervisor.clone(), shutdown.clone());

    if let Some(port) = config.status_port {
        let addr = format!("{}:{}", config.status_host, port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(listener) => listener,
            Err(e) => {
                shutdown.cancel();
                let _ = task.await;
                return Err(anyhow::anyhow!("bind status endpoint on {addr}: {e}"));
            }
        };
        info!("status endpoint listening on {addr}");
        let router = status::build_router(supervisor.clone());
        axum::serve(listener, router).with_graceful_shutdown(shutdown.clone().cancelled_owned()).await?;
    }

    task.await?;
    Ok(())
}

/// Rebuild from the (possibly rewritten) connection string on every SIGHUP.
fn spawn_rotate_on_hangup(supervisor: LivenessSupervisor, shutdown: CancellationToken) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sighup = match signal(SignalKind::hangup()) {
        Ok(s) => s,
        Err(e) => {
            warn!(err = %e, "cannot listen for SIGHUP, credential rotation disabled");
            return;
        }
    };
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                received = sighup.recv() => {
                    if received.is_none() {
                        break;
                    }
                    info!("received SIGHUP, rotating");
                    supervisor.rotate().await;
                }
            }
        }
    });
}
