// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use super::Config;

fn parse(args: &[&str]) -> Config {
    Config::parse_from(args)
}

#[test]
fn defaults_match_documented_values() -> anyhow::Result<()> {
    let config = parse(&["relaywatch"]);
    config.validate()?;
    assert_eq!(config.connection_string_file.to_str(), Some("connectionString.txt"));
    assert_eq!(config.poll_interval(), Duration::from_secs(2));
    assert_eq!(config.grace_interval(), Duration::from_secs(2));
    assert_eq!(config.open_timeout(), Some(Duration::from_secs(30)));
    assert_eq!(config.keepalive(), Some(Duration::from_secs(10)));
    assert_eq!(config.status_port, None);
    assert_eq!(config.log_format, "text");
    assert_eq!(config.log_level, "info");
    Ok(())
}

#[test]
fn grace_follows_poll_unless_set() {
    let config = parse(&["relaywatch", "--poll-ms", "500"]);
    assert_eq!(config.grace_interval(), Duration::from_millis(500));

    let config = parse(&["relaywatch", "--poll-ms", "500", "--grace-ms", "1500"]);
    assert_eq!(config.grace_interval(), Duration::from_millis(1500));
}

#[test]
fn zero_open_timeout_disables_it() {
    let config = parse(&["relaywatch", "--open-timeout-ms", "0"]);
    assert_eq!(config.open_timeout(), None);
    assert_eq!(config.settings().open_timeout, None);
}

#[test]
fn zero_keepalive_disables_it() {
    assert_eq!(parse(&["relaywatch", "--keepalive-ms", "0"]).keepalive(), None);
    assert_eq!(
        parse(&["relaywatch", "--keepalive-ms", "250"]).keepalive(),
        Some(Duration::from_millis(250))
    );
}

#[test]
fn settings_carry_all_intervals() {
    let config =
        parse(&["relaywatch", "--poll-ms", "100", "--grace-ms", "300", "--open-timeout-ms", "50"]);
    let settings = config.settings();
    assert_eq!(settings.poll_interval, Duration::from_millis(100));
    assert_eq!(settings.grace_interval, Duration::from_millis(300));
    assert_eq!(settings.open_timeout, Some(Duration::from_millis(50)));
}

#[test]
fn inline_connection_string_wins_over_file() -> anyhow::Result<()> {
    let config = parse(&[
        "relaywatch",
        "--connection-string-file",
        "/nonexistent/connectionString.txt",
        "--connection-string",
        crate::test_support::TEST_CONNECTION_STRING,
    ]);
    let source = config.source();
    assert_eq!(source.describe(), "inline connection string");
    assert_eq!(source.load()?.entity_path, "hc1");
    Ok(())
}

#[test]
fn file_source_is_used_by_default() {
    let config = parse(&["relaywatch", "--connection-string-file", "/etc/relay/conn.txt"]);
    assert_eq!(config.source().describe(), "/etc/relay/conn.txt");
}

#[yare::parameterized(
    zero_poll    = { &["relaywatch", "--poll-ms", "0"], "--poll-ms" },
    zero_grace   = { &["relaywatch", "--grace-ms", "0"], "--grace-ms" },
    blank_inline = { &["relaywatch", "--connection-string", "  "], "empty" },
    bad_format   = { &["relaywatch", "--log-format", "xml"], "invalid log format" },
)]
fn invalid_config(args: &[&str], expected_substr: &str) {
    let config = parse(args);
    crate::assert_err_contains!(config.validate(), expected_substr);
}

#[test]
fn missing_source_is_rejected() {
    let mut config = parse(&["relaywatch"]);
    config.connection_string_file = PathBuf::new();
    crate::assert_err_contains!(config.validate(), "must be specified");
}
