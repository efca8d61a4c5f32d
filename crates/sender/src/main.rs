// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;

use relaysend::{run_loop, Sender, SenderConfig};

fn main() {
    let _ = rustls::crypto::ring::default_provider().install_default();

    let config = SenderConfig::parse();

    let filter = tracing_subscriber::EnvFilter::try_new(&config.log_level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let code = match config.load().and_then(|relay| Sender::new(&relay)) {
        Ok(sender) => {
            let stdin = std::io::stdin();
            let mut stdout = std::io::stdout();
            run_loop(&sender, stdin.lock(), &mut stdout).unwrap_or_else(|e| {
                eprintln!("error: {e:#}");
                1
            })
        }
        Err(e) => {
            eprintln!("error: {e:#}");
            2
        }
    };
    std::process::exit(code);
}
