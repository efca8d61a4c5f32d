// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `relaysend`: push HTTP requests through a relay to a listening watchdog.
//!
//! Reads one message per line from stdin. An empty line is sent as `GET`,
//! anything else as a `POST` carrying the line as its body.

use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing::debug;

use relaywatch::relay_config::{ConfigSource, FileSource, RelayConfig, StaticSource};
use relaywatch::token::TokenProvider;

const PROMPT: &str =
    "Please enter the message you want to send over http, \"quit\" or \"q\" to terminate:";
pub const OFFLINE: &str = "The listener is offline or could not be reached.";

/// Header the relay reads the sender's token from.
pub const AUTH_HEADER: &str = "ServiceBusAuthorization";

/// Send HTTP requests to a relay listener, one line at a time.
#[derive(Debug, Parser)]
#[command(name = "relaysend", version, about)]
pub struct SenderConfig {
    /// File holding the relay connection string.
    #[arg(long, env = "RELAYWATCH_CONNECTION_STRING_FILE", default_value = "connectionString.txt")]
    pub connection_string_file: PathBuf,

    /// Inline connection string. Takes precedence over the file.
    #[arg(long, env = "RELAYWATCH_CONNECTION_STRING", hide_env_values = true)]
    pub connection_string: Option<String>,

    /// Log level for diagnostics on stderr.
    #[arg(long, env = "RELAYSEND_LOG_LEVEL", default_value = "warn")]
    pub log_level: String,
}

impl SenderConfig {
    pub fn load(&self) -> anyhow::Result<RelayConfig> {
        let config = match &self.connection_string {
            Some(raw) => StaticSource::new(raw.clone()).load()?,
            None => FileSource::new(self.connection_string_file.clone()).load()?,
        };
        Ok(config)
    }
}

/// What a single input line asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Quit,
    Get,
    Post(String),
}

impl Input {
    pub fn classify(line: &str) -> Self {
        if line.eq_ignore_ascii_case("quit") || line.eq_ignore_ascii_case("q") {
            Self::Quit
        } else if line.is_empty() {
            Self::Get
        } else {
            Self::Post(line.to_owned())
        }
    }
}

/// Status and body of the listener's answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub status: u16,
    pub body: String,
}

/// Blocking HTTP client bound to one relay entity and one token.
pub struct Sender {
    client: reqwest::blocking::Client,
    url: String,
    token: String,
}

impl Sender {
    /// Target the entity's HTTP address with a token valid for one hour.
    pub fn new(config: &RelayConfig) -> anyhow::Result<Self> {
        let url = config.http_url();
        let token = TokenProvider::new(config.credential.clone()).token(&url);
        Self::with_target(url, token)
    }

    pub fn with_target(url: impl Into<String>, token: impl Into<String>) -> anyhow::Result<Self> {
        let client = reqwest::blocking::Client::builder().timeout(Duration::from_secs(60)).build()?;
        Ok(Self { client, url: url.into(), token: token.into() })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Send one request. `Input::Quit` is not a request and yields `None`.
    pub fn send(&self, input: &Input) -> Option<Result<Reply, reqwest::Error>> {
        let request = match input {
            Input::Quit => return None,
            Input::Get => self.client.get(&self.url),
            Input::Post(body) => self.client.post(&self.url).body(body.clone()),
        };
        debug!(url = %self.url, ?input, "sending request");
        let result = request.header(AUTH_HEADER, &self.token).send().and_then(|resp| {
            let status = resp.status().as_u16();
            let text = resp.text()?;
            Ok(Reply { status, body: text.lines().collect() })
        });
        Some(result)
    }
}

/// Prompt, read, send, print until quit or end of input. Returns the exit code.
pub fn run_loop<R: BufRead, W: Write>(sender: &Sender, input: R, out: &mut W) -> anyhow::Result<i32> {
    let mut lines = input.lines();
    loop {
        writeln!(out, "{PROMPT}")?;
        out.flush()?;
        let Some(line) = lines.next() else {
            return Ok(0);
        };
        let input = Input::classify(&line?);
        let Some(result) = sender.send(&input) else {
            return Ok(0);
        };
        match result {
            Ok(reply) => {
                writeln!(out, "status code: {}", reply.status)?;
                writeln!(out, "received back {}", reply.body)?;
            }
            Err(e) => {
                debug!(err = %e, "request failed");
                writeln!(out, "{OFFLINE}")?;
                return Ok(1);
            }
        }
    }
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
