// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use crate::relay_config::{ConfigSource, FileSource, StaticSource};
use crate::supervisor::SupervisorSettings;

/// Keeps a relay listener connection alive, rebuilding it when it drops.
#[derive(Debug, Clone, Parser)]
#[command(name = "relaywatch", version, about)]
pub struct Config {
    /// File holding the relay connection string. Re-read on every rebuild.
    #[arg(long, env = "RELAYWATCH_CONNECTION_STRING_FILE", default_value = "connectionString.txt")]
    pub connection_string_file: PathBuf,

    /// Inline connection string. Takes precedence over the file.
    #[arg(long, env = "RELAYWATCH_CONNECTION_STRING", hide_env_values = true)]
    pub connection_string: Option<String>,

    /// Liveness poll interval in milliseconds.
    #[arg(long, default_value_t = 2000, env = "RELAYWATCH_POLL_MS")]
    pub poll_ms: u64,

    /// Grace period before rebuilding an offline connection, in milliseconds.
    /// Defaults to the poll interval.
    #[arg(long, env = "RELAYWATCH_GRACE_MS")]
    pub grace_ms: Option<u64>,

    /// Upper bound on a single open in milliseconds (0 = wait forever).
    #[arg(long, default_value_t = 30_000, env = "RELAYWATCH_OPEN_TIMEOUT_MS")]
    pub open_timeout_ms: u64,

    /// Ping period on the relay link in milliseconds (0 = no keepalive).
    /// The link counts as dropped after three periods without a frame.
    #[arg(long, default_value_t = 10_000, env = "RELAYWATCH_KEEPALIVE_MS")]
    pub keepalive_ms: u64,

    /// Host to bind the status endpoint on.
    #[arg(long, default_value = "127.0.0.1", env = "RELAYWATCH_STATUS_HOST")]
    pub status_host: String,

    /// Port for the status endpoint. Disabled when unset.
    #[arg(long, env = "RELAYWATCH_STATUS_PORT")]
    pub status_port: Option<u16>,

    /// Log format (json or text).
    #[arg(long, env = "RELAYWATCH_LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "RELAYWATCH_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Config {
    /// Validate the configuration after parsing.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.poll_ms == 0 {
            anyhow::bail!("--poll-ms must be greater than zero");
        }
        if self.grace_ms == Some(0) {
            anyhow::bail!("--grace-ms must be greater than zero");
        }
        match &self.connection_string {
            Some(raw) if raw.trim().is_empty() => {
                anyhow::bail!("--connection-string is set but empty")
            }
            Some(_) => {}
            None if self.connection_string_file.as_os_str().is_empty() => {
                anyhow::bail!("either --connection-string or --connection-string-file must be specified")
            }
            None => {}
        }
        match self.log_format.as_str() {
            "json" | "text" => {}
            other => anyhow::bail!("invalid log format: {other} (expected json or text)"),
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_ms)
    }

    pub fn grace_interval(&self) -> Duration {
        Duration::from_millis(self.grace_ms.unwrap_or(self.poll_ms))
    }

    pub fn open_timeout(&self) -> Option<Duration> {
        (self.open_timeout_ms > 0).then(|| Duration::from_millis(self.open_timeout_ms))
    }

    pub fn keepalive(&self) -> Option<Duration> {
        (self.keepalive_ms > 0).then(|| Duration::from_millis(self.keepalive_ms))
    }

    pub fn settings(&self) -> SupervisorSettings {
        SupervisorSettings {
            poll_interval: self.poll_interval(),
            grace_interval: self.grace_interval(),
            open_timeout: self.open_timeout(),
        }
    }

    /// Where connection strings come from: inline if given, else the file.
    pub fn source(&self) -> Arc<dyn ConfigSource> {
        match &self.connection_string {
            Some(raw) => Arc::new(StaticSource::new(raw.clone())),
            None => Arc::new(FileSource::new(self.connection_string_file.clone())),
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
