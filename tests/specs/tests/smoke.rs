// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end smoke tests that spawn the real `relaywatch` and `relaysend`
//! binaries against a stub relay.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use nix::sys::signal::Signal;
use tokio_tungstenite::tungstenite::Message;

use relaywatch_specs::{connection_string, free_port, run_sender, run_watch, StubRelay, WatchBuilder};

const TIMEOUT: Duration = Duration::from_secs(10);

// -- Watchdog -----------------------------------------------------------------

#[tokio::test]
async fn comes_online_and_reports_health() -> anyhow::Result<()> {
    let mut relay = StubRelay::start().await?;
    let watch = WatchBuilder::inline(relay.connection_string()).spawn()?;

    let _socket = relay.accept(TIMEOUT).await?;
    let health = watch.wait_state("online", TIMEOUT).await?;

    assert_eq!(health["status"], "running");
    assert_eq!(health["generation"], 1);
    assert_eq!(health["rebuilds"], 0);
    assert!(health["connection_id"].is_string());

    let uris = relay.uris();
    assert!(uris[0].starts_with("/$hc/hc1?sb-hc-action=listen"), "{uris:?}");

    let ready = reqwest::get(format!("{}/api/v1/ready", watch.status_url())).await?;
    assert_eq!(ready.status().as_u16(), 200);
    Ok(())
}

#[tokio::test]
async fn answers_relayed_requests() -> anyhow::Result<()> {
    let mut relay = StubRelay::start().await?;
    let _watch = WatchBuilder::inline(relay.connection_string()).spawn()?;
    let mut socket = relay.accept(TIMEOUT).await?;

    let frame = r#"{"request":{"id":"smoke_G1","method":"GET","requestTarget":"/hc1","requestHeaders":{}}}"#;
    socket.send(Message::Text(frame.to_owned().into())).await?;

    let reply = loop {
        match tokio::time::timeout(TIMEOUT, socket.next()).await? {
            Some(Ok(Message::Text(text))) => break text.as_str().to_owned(),
            Some(Ok(_)) => continue,
            other => anyhow::bail!("unexpected frame: {other:?}"),
        }
    };
    let reply: serde_json::Value = serde_json::from_str(&reply)?;
    assert_eq!(reply["response"]["requestId"], "smoke_G1");
    assert_eq!(reply["response"]["statusCode"], 200);
    Ok(())
}

#[tokio::test]
async fn reconnects_after_relay_drops_link() -> anyhow::Result<()> {
    let mut relay = StubRelay::start().await?;
    let watch = WatchBuilder::inline(relay.connection_string()).spawn()?;
    let mut first = relay.accept(TIMEOUT).await?;
    let before = watch.wait_state("online", TIMEOUT).await?;

    first.close(None).await?;
    drop(first);

    let _second = relay.accept(TIMEOUT).await?;
    let after = watch.wait_state("online", TIMEOUT).await?;
    assert!(after["generation"].as_u64() >= before["generation"].as_u64());
    assert_eq!(relay.uris().len(), 2);
    Ok(())
}

#[tokio::test]
async fn sigterm_closes_link_and_exits() -> anyhow::Result<()> {
    let mut relay = StubRelay::start().await?;
    let mut watch = WatchBuilder::inline(relay.connection_string()).spawn()?;
    let mut socket = relay.accept(TIMEOUT).await?;
    watch.wait_state("online", TIMEOUT).await?;

    watch.signal(Signal::SIGTERM)?;

    let status = watch.wait_exit(TIMEOUT).await?;
    assert!(status.success(), "{status:?}");
    let last = tokio::time::timeout(TIMEOUT, socket.next()).await?;
    assert!(matches!(last, Some(Ok(Message::Close(_))) | None | Some(Err(_))));
    Ok(())
}

#[tokio::test]
async fn waits_for_connection_string_file_then_rotates_on_sighup() -> anyhow::Result<()> {
    let mut relay = StubRelay::start().await?;
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("connectionString.txt");
    let watch = WatchBuilder::file(&path).poll_ms(60_000).spawn()?;

    let health = watch.wait_state("unstarted", TIMEOUT).await?;
    assert!(health["connection_id"].is_null());

    std::fs::write(&path, format!("{}\n", relay.connection_string()))?;
    watch.signal(Signal::SIGHUP)?;

    let _socket = relay.accept(TIMEOUT).await?;
    watch.wait_state("online", TIMEOUT).await?;
    Ok(())
}

#[test]
fn invalid_arguments_exit_with_2() -> anyhow::Result<()> {
    let output = run_watch(&["--poll-ms", "0", "--connection-string", &connection_string(1)])?;
    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("--poll-ms"));
    Ok(())
}

// -- Sender -------------------------------------------------------------------

#[test]
fn sender_quits_without_sending() -> anyhow::Result<()> {
    let output = run_sender(&connection_string(free_port()?), "Q\n")?;
    assert_eq!(output.status.code(), Some(0));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(!stdout.contains("status code"), "{stdout}");
    Ok(())
}

#[test]
fn sender_reports_unreachable_listener() -> anyhow::Result<()> {
    let output = run_sender(&connection_string(free_port()?), "hello\n")?;
    assert_eq!(output.status.code(), Some(1));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("The listener is offline or could not be reached."), "{stdout}");
    Ok(())
}
