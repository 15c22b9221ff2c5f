//! `relayq send` and `relayq ping`: talk to a running queue manager.

use crate::cli::{PeerArgs, SendArgs};
use crate::ui;

use relayq_types::Message;
use relayq_wire::{ClientCredentials, Endpoint, PeerConnection, TcpConnection, TcpTransport, WireError};
use std::time::Duration;
use tracing::{info, warn};

pub fn cmd_send(args: SendArgs) {
    run(async move {
        let timeout = Duration::from_secs(args.peer.timeout_secs);
        let (transport, endpoint) = transport_for(&args.peer);
        let message = Message::new(args.payload.into_bytes(), args.destination);
        let interval = Duration::from_millis(args.interval_ms);

        let mut conn: Option<TcpConnection> = None;
        let mut sent = 0u64;
        loop {
            if args.count.is_some_and(|n| sent >= n) {
                break;
            }
            sent += 1;

            if conn.is_none() {
                match transport.dial(&endpoint, timeout).await {
                    Ok(c) => conn = Some(c),
                    Err(e) => warn!(endpoint = %endpoint, error = %e, "Unable to connect to queue manager"),
                }
            }
            if let Some(c) = conn.as_mut() {
                match c.queue_message(&message, timeout).await {
                    Ok(()) => info!(destination = %message.destination_id, "Successfully sent message"),
                    Err(WireError::Capacity(e)) => warn!(error = %e, "Queue manager is full"),
                    Err(e) => {
                        warn!(error = %e, "Error while queueing message");
                        // Reconnect on the next round.
                        conn = None;
                    }
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = tokio::signal::ctrl_c() => break,
            }
        }
    });
}

pub fn cmd_ping(args: PeerArgs) {
    run(async move {
        let timeout = Duration::from_secs(args.timeout_secs);
        let (transport, endpoint) = transport_for(&args);
        let result = async {
            let mut conn = transport.dial(&endpoint, timeout).await?;
            conn.ping(timeout).await
        }
        .await;
        match result {
            Ok(node_id) => {
                ui::success(&format!("{endpoint} is up"));
                ui::kv("Node", &node_id);
            }
            Err(e) => {
                ui::error(&format!("{endpoint} did not answer: {e}"));
                std::process::exit(1);
            }
        }
    });
}

fn transport_for(args: &PeerArgs) -> (TcpTransport, Endpoint) {
    let endpoint = match Endpoint::parse(&args.to) {
        Ok(e) => e,
        Err(e) => {
            ui::error_with_fix(&e.to_string(), "pass --to HOST:PORT");
            std::process::exit(1);
        }
    };
    let transport = match &args.ca_file {
        Some(path) => match ClientCredentials::from_pem_file(path) {
            Ok(creds) => TcpTransport::secure(creds, args.domain.clone()),
            Err(e) => {
                ui::error_with_fix(
                    &format!("Failed to load {}", path.display()),
                    &e.to_string(),
                );
                std::process::exit(1);
            }
        },
        None => TcpTransport::insecure(),
    };
    (transport, endpoint)
}

fn run<F: std::future::Future<Output = ()>>(fut: F) {
    match tokio::runtime::Runtime::new() {
        Ok(rt) => rt.block_on(fut),
        Err(e) => {
            ui::error(&format!("Failed to start async runtime: {e}"));
            std::process::exit(1);
        }
    }
}
