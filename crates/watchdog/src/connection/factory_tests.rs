// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn builds_offline_connection_with_fresh_id() -> anyhow::Result<()> {
    let config: RelayConfig =
        "Endpoint=sb://ns.example.net/;SharedAccessKeyName=k;SharedAccessKey=v;EntityPath=hc1"
            .parse()?;
    let hooks = ConnectionHooks::logging();
    let factory = RelayConnectionFactory::default();
    let first = factory.build(&config, &hooks)?;
    let second = factory.build(&config, &hooks)?;

    assert!(!first.is_online());
    assert_ne!(first.id(), second.id());
    Ok(())
}

#[test]
fn invalid_listen_address_is_a_build_error() -> anyhow::Result<()> {
    let config: RelayConfig =
        "Endpoint=sb://ns.example.net/;SharedAccessKeyName=k;SharedAccessKey=v;EntityPath=my hub"
            .parse()?;
    match RelayConnectionFactory::default().build(&config, &ConnectionHooks::logging()) {
        Err(BuildError::InvalidUri { uri, .. }) => assert!(uri.contains("my hub")),
        Err(other) => anyhow::bail!("unexpected error: {other}"),
        Ok(_) => anyhow::bail!("expected build to fail"),
    }
    Ok(())
}

#[test]
fn default_keepalive_is_on() {
    assert_eq!(RelayConnectionFactory::default().keepalive(), Some(DEFAULT_KEEPALIVE));
    assert_eq!(RelayConnectionFactory::new(None).keepalive(), None);
}
