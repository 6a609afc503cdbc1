//! Example: Chat echo server
//!
//! Accepts TCP and WebSocket clients on one port (or UDP clients with
//! `REALTIME_PROTOCOL_TRANSPORT=udp`), echoes `chat.chatHandler.send` requests
//! back to the sender and pushes every message to all connected sessions.
//!
//! Run with: `cargo run --example echo_server [config.toml]`

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use realtime_protocol::config::NetworkConfig;
use realtime_protocol::service::{Connector, HandlerRegistry, SessionEvent};
use realtime_protocol::transport::ConnectionId;
use realtime_protocol::utils::logging::init_logging;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut config = match std::env::args().nth(1) {
        Some(path) => NetworkConfig::from_file(path)?,
        None => NetworkConfig::default(),
    };
    config.apply_env(|name| std::env::var(name).ok())?;
    init_logging(&config.logging);

    let (broadcast_tx, mut broadcast_rx) = mpsc::unbounded_channel();
    let registry = Arc::new(HandlerRegistry::new());
    registry.register("chat.chatHandler.send", move |call| {
        let broadcast_tx = broadcast_tx.clone();
        async move {
            let message = json!({ "from": call.connection_id.0, "msg": call.body });
            let _ = broadcast_tx.send(message.clone());
            Ok(Some(json!({ "code": 200, "echo": message })))
        }
    })?;
    registry.register("connector.entryHandler.entry", |call| async move {
        Ok(Some(json!({ "code": 200, "uid": call.connection_id.0 })))
    })?;

    let (connector, mut events) = Connector::builder(config).handlers(registry)?.build()?;
    let addr = connector.start().await?;
    info!(%addr, "Echo server listening");

    let sessions: Arc<Mutex<HashSet<ConnectionId>>> = Arc::default();

    let tracked = Arc::clone(&sessions);
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                SessionEvent::Handshake { id, request } => {
                    info!(%id, client = ?request.client_type(), "Session started");
                    tracked.lock().unwrap_or_else(|e| e.into_inner()).insert(id);
                }
                SessionEvent::Disconnect { id, reason } => {
                    info!(%id, ?reason, "Session ended");
                    tracked.lock().unwrap_or_else(|e| e.into_inner()).remove(&id);
                }
                _ => {}
            }
        }
    });

    let pusher = Arc::clone(&connector);
    let targets = Arc::clone(&sessions);
    tokio::spawn(async move {
        while let Some(message) = broadcast_rx.recv().await {
            let ids: Vec<ConnectionId> = targets
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .iter()
                .copied()
                .collect();
            for id in ids {
                if let Err(e) = pusher.push(id, "onChat", &message).await {
                    warn!(%id, error = %e, "Push failed");
                }
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    connector.shutdown().await;
    Ok(())
}
