//! `relayq start`: run a queue manager until Ctrl+C.

use crate::cli::StartArgs;
use crate::ui;

use relayq_node::{load_config, ChannelConsumer, Node};
use relayq_types::{BackoffCeiling, Message, NodeConfig, RelayResult};
use relayq_wire::{QueueServer, ServerConfig, ServerCredentials};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub fn cmd_start(config_path: Option<PathBuf>, args: StartArgs) {
    let mut config = match load_config(config_path.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            ui::error_with_fix("Failed to load configuration", &e.to_string());
            std::process::exit(1);
        }
    };
    if let Err(e) = apply_overrides(&mut config, &args) {
        ui::error_with_fix("Invalid command-line option", &e);
        std::process::exit(1);
    }
    if config.node_id.is_empty() {
        config.node_id = uuid::Uuid::new_v4().to_string();
    }
    if let Err(e) = config.validate() {
        ui::error_with_fix("Configuration is invalid", &e.to_string());
        std::process::exit(1);
    }

    let server_tls = match (&args.cert_file, &args.server_key_file) {
        (Some(cert), Some(key)) => match ServerCredentials::from_pem_files(cert, key) {
            Ok(creds) => Some(creds),
            Err(e) => {
                ui::error_with_fix("Failed to load server certificate", &e.to_string());
                std::process::exit(1);
            }
        },
        _ => None,
    };

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            ui::error(&format!("Failed to start async runtime: {e}"));
            std::process::exit(1);
        }
    };

    rt.block_on(async move {
        let listen_addr = config.listen_addr;
        let (node, deliveries) = match start_node(config) {
            Ok(started) => started,
            Err(e) => {
                ui::error(&format!("Failed to start queue manager: {e}"));
                std::process::exit(1);
            }
        };

        let server_config = ServerConfig {
            listen_addr,
            tls: server_tls,
        };
        let inbound_tls = server_config.tls.is_some();
        let (server, accept) =
            match QueueServer::start(server_config, node.clone(), node.subscribe_shutdown()).await
            {
                Ok(started) => started,
                Err(e) => {
                    ui::error(&format!("Failed to listen on {listen_addr}: {e}"));
                    node.shutdown().await;
                    std::process::exit(1);
                }
            };

        ui::banner();
        ui::blank();
        ui::success("Queue manager started");
        ui::kv("Node", node.node_id());
        ui::kv("Listening", &server.local_addr().to_string());
        ui::kv("Inbound TLS", if inbound_tls { "on" } else { "off" });
        ui::kv("Outbound TLS", if node.config().tls_enabled { "on" } else { "off" });
        ui::blank();
        ui::hint("Press Ctrl+C to stop");

        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Could not listen for Ctrl+C, stopping");
        }

        node.shutdown().await;
        if let Err(e) = accept.await {
            warn!(error = %e, "Listener task failed");
        }
        let delivered = deliveries.await.unwrap_or_else(|e| {
            warn!(error = %e, "Delivery task failed");
            0
        });
        ui::blank();
        println!("  Queue manager stopped ({delivered} messages delivered locally).");
    });
}

/// Start the node in push mode with a task that logs each message
/// addressed to it. The task ends, returning its count, once the node's
/// deliver worker stops.
///
/// Must be called from within a Tokio runtime.
fn start_node(config: NodeConfig) -> RelayResult<(Arc<Node>, JoinHandle<u64>)> {
    let (consumer, rx) = ChannelConsumer::channel(config.delivery_buffer_capacity);
    let node = Node::builder(config)
        .consumer(Arc::new(consumer))
        .start()?;
    let deliveries = tokio::spawn(surface_deliveries(rx));
    Ok((node, deliveries))
}

async fn surface_deliveries(mut rx: mpsc::Receiver<Message>) -> u64 {
    let mut delivered = 0u64;
    while let Some(message) = rx.recv().await {
        delivered += 1;
        info!(
            destination = %message.destination_id,
            payload = %String::from_utf8_lossy(&message.payload),
            "Message delivered"
        );
    }
    delivered
}

/// Apply command-line flags on top of the loaded configuration.
pub fn apply_overrides(config: &mut NodeConfig, args: &StartArgs) -> Result<(), String> {
    if let Some(id) = &args.node_id {
        config.node_id = id.clone();
    }
    if let Some(addr) = args.listen {
        config.listen_addr = addr;
    }
    if let Some(port) = args.port {
        config.listen_addr = SocketAddr::new(config.listen_addr.ip(), port);
    }
    if let Some(n) = args.send_capacity {
        config.send_buffer_capacity = n;
    }
    if let Some(n) = args.deliver_capacity {
        config.delivery_buffer_capacity = n;
    }
    if let Some(ms) = args.max_backoff_ms {
        config.maximum_backoff_ms = ms;
    }
    if let Some(ms) = args.dial_timeout_ms {
        config.dial_timeout_ms = ms;
    }
    if args.unbounded_backoff {
        config.backoff_ceiling = BackoffCeiling::Unbounded;
    }
    if args.tls {
        config.tls_enabled = true;
    }
    if let Some(path) = &args.key_file {
        config.key_file_path = Some(path.clone());
    }
    for peer in &args.peers {
        let (identity, address) = parse_peer(peer)?;
        config.peers.insert(identity, address);
    }
    Ok(())
}

/// Split `IDENTITY=HOST:PORT`.
fn parse_peer(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((identity, address)) if !identity.is_empty() && !address.is_empty() => {
            Ok((identity.to_string(), address.to_string()))
        }
        _ => Err(format!("expected IDENTITY=HOST:PORT, got '{s}'")),
    }
}
