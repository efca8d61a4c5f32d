// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for end-to-end binary smoke tests.
//!
//! Spawns the real `relaywatch` and `relaysend` binaries as subprocesses
//! against the in-process [`StubRelay`].

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Output, Stdio};
use std::sync::Once;
use std::time::Duration;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use parking_lot::Mutex;

pub use relaywatch::test_support::{local_connection_string as connection_string, StubRelay};

static CRYPTO_INIT: Once = Once::new();

/// Serializes on-demand builds so parallel tests don't race cargo.
static BUILD_LOCK: Mutex<()> = Mutex::new(());

/// Install the ring crypto provider for reqwest/rustls.
pub fn ensure_crypto() {
    CRYPTO_INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

fn workspace_root() -> &'static Path {
    let manifest = Path::new(env!("CARGO_MANIFEST_DIR"));
    // tests/specs → tests → workspace root
    manifest.parent().and_then(|p| p.parent()).unwrap_or(manifest)
}

/// Resolve the path to a compiled workspace binary.
pub fn workspace_binary(name: &str) -> PathBuf {
    workspace_root().join("target").join("debug").join(name)
}

/// Path to binary `name` of `package`, building it first when it is missing.
///
/// `cargo test` only builds binaries for their own package's integration
/// tests, so a bin from another package may not exist yet.
pub fn ensure_binary(package: &str, name: &str) -> anyhow::Result<PathBuf> {
    let binary = workspace_binary(name);
    let _guard = BUILD_LOCK.lock();
    if !binary.exists() {
        let status = Command::new(env!("CARGO"))
            .args(["build", "--package", package, "--bin", name])
            .current_dir(workspace_root())
            .stdout(Stdio::null())
            .status()?;
        anyhow::ensure!(status.success(), "cargo build --package {package} failed: {status}");
    }
    anyhow::ensure!(binary.exists(), "{name} binary not found at {}", binary.display());
    Ok(binary)
}

/// Find a free TCP port by binding to :0 then releasing.
pub fn free_port() -> anyhow::Result<u16> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

/// Where the spawned watchdog reads its connection string from.
enum Source {
    Inline(String),
    File(PathBuf),
}

/// Builder for a [`WatchProcess`].
pub struct WatchBuilder {
    source: Source,
    poll_ms: u64,
}

impl WatchBuilder {
    /// Pass the connection string on the command line.
    pub fn inline(connection_string: impl Into<String>) -> Self {
        Self { source: Source::Inline(connection_string.into()), poll_ms: 200 }
    }

    /// Read the connection string from `path` (which may not exist yet).
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self { source: Source::File(path.into()), poll_ms: 200 }
    }

    pub fn poll_ms(mut self, ms: u64) -> Self {
        self.poll_ms = ms;
        self
    }

    pub fn spawn(self) -> anyhow::Result<WatchProcess> {
        ensure_crypto();
        let binary = ensure_binary("relaywatch", "relaywatch")?;

        let status_port = free_port()?;
        let mut args: Vec<String> = vec![
            "--status-port".into(),
            status_port.to_string(),
            "--poll-ms".into(),
            self.poll_ms.to_string(),
            "--open-timeout-ms".into(),
            "5000".into(),
            "--log-level".into(),
            "warn".into(),
        ];
        match self.source {
            Source::Inline(raw) => args.extend(["--connection-string".into(), raw]),
            Source::File(path) => args.extend([
                "--connection-string-file".into(),
                path.to_string_lossy().into_owned(),
            ]),
        }

        let child = Command::new(&binary)
            .args(&args)
            .env_remove("RELAYWATCH_CONNECTION_STRING")
            .env_remove("RELAYWATCH_CONNECTION_STRING_FILE")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;

        Ok(WatchProcess { child, status_port })
    }
}

/// A running `relaywatch` process that is killed on drop.
pub struct WatchProcess {
    child: Child,
    status_port: u16,
}

impl WatchProcess {
    pub fn status_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.status_port)
    }

    /// Current `/api/v1/health` body.
    pub async fn health(&self) -> anyhow::Result<serde_json::Value> {
        let url = format!("{}/api/v1/health", self.status_url());
        Ok(reqwest::get(url).await?.json().await?)
    }

    /// Poll health until the supervisor reports `state`.
    pub async fn wait_state(
        &self,
        state: &str,
        timeout: Duration,
    ) -> anyhow::Result<serde_json::Value> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut last = None;
        loop {
            if tokio::time::Instant::now() > deadline {
                anyhow::bail!("relaywatch did not reach {state} within {timeout:?} (last: {last:?})");
            }
            if let Ok(body) = self.health().await {
                if body["state"] == state {
                    return Ok(body);
                }
                last = Some(body);
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    pub fn signal(&self, signal: Signal) -> anyhow::Result<()> {
        let pid = i32::try_from(self.child.id())?;
        kill(Pid::from_raw(pid), signal)?;
        Ok(())
    }

    /// Wait for the process to exit within `timeout`.
    pub async fn wait_exit(&mut self, timeout: Duration) -> anyhow::Result<std::process::ExitStatus> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if tokio::time::Instant::now() > deadline {
                anyhow::bail!("relaywatch did not exit within {timeout:?}");
            }
            if let Some(status) = self.child.try_wait()? {
                return Ok(status);
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

impl Drop for WatchProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Run `relaysend` to completion, feeding it `stdin`.
pub fn run_sender(connection_string: &str, stdin: &str) -> anyhow::Result<Output> {
    let binary = ensure_binary("relaysend", "relaysend")?;

    let mut child = Command::new(&binary)
        .args(["--connection-string", connection_string])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()?;
    if let Some(mut input) = child.stdin.take() {
        input.write_all(stdin.as_bytes())?;
    }
    Ok(child.wait_with_output()?)
}

/// Run `relaywatch` with `args` and wait for it to exit.
pub fn run_watch(args: &[&str]) -> anyhow::Result<Output> {
    let binary = ensure_binary("relaywatch", "relaywatch")?;
    Ok(Command::new(&binary).args(args).stdout(Stdio::null()).stderr(Stdio::piped()).output()?)
}
