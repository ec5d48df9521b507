//! Live board (`linewatch watch`).

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use linewatch::Identity;
use linewatch::client::RealtimeClient;
use linewatch::config::LinewatchConfig;
use linewatch::fetch::BackendClient;
use linewatch::session::DisplaySession;
use linewatch::store::ReconciliationStore;
use linewatch::view::BoardPrinter;

pub async fn cmd_watch(config: &LinewatchConfig, identity: Identity, idle: bool) -> Result<()> {
    let toml = &config.toml;
    let backend = BackendClient::new(toml.backend_config()).context("Invalid backend configuration")?;
    let session_config = toml.session_config(idle);
    let store = ReconciliationStore::new(session_config.store_config());

    let client = RealtimeClient::new(toml.connection_config());
    let connection = client.spawn();

    let session = DisplaySession::start(&client, &store, Arc::new(backend), identity, session_config)
        .context("Failed to start display session")?;
    info!(identity = %session.identity(), "watching");

    let mut printer = BoardPrinter::new(toml.display.thousands_separator.clone());
    let mut state_rx = session.watch();
    let mut highlight_rx = session.highlights().watch();

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        let state = state_rx.borrow_and_update().clone();
        let highlights = highlight_rx.borrow_and_update().clone();
        printer.draw(&state, &highlights);

        tokio::select! {
            _ = &mut ctrl_c => break,
            changed = state_rx.changed() => if changed.is_err() { break },
            changed = highlight_rx.changed() => if changed.is_err() { break },
        }
    }

    drop(printer);
    session.teardown().await;
    client.shutdown();
    let _ = connection.await;
    Ok(())
}
