//! Clap CLI definitions for relayq.

use clap::{Args, Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

pub const AFTER_HELP: &str = "\
\x1b[1;36mExamples:\x1b[0m
  relayq start --node-id node-a                    Run a queue manager on port 10000
  relayq start --config relayq.toml --port 10001   Run with a config file and a port override
  relayq send --destination node-b                 Send \"Ping\" to node-b every 5 seconds
  relayq ping --to 10.0.0.6:10000                  Check that a queue manager answers";

/// relayq: peer-to-peer store-and-forward message relay.
#[derive(Parser, Debug)]
#[command(name = "relayq", version, about, after_help = AFTER_HELP)]
pub struct Cli {
    /// Path to config file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a queue manager node until Ctrl+C.
    Start(StartArgs),
    /// Queue messages on a running queue manager in a loop.
    Send(SendArgs),
    /// Check that a queue manager is reachable and print its identity.
    Ping(PeerArgs),
}

/// Overrides applied on top of the config file.
#[derive(Args, Debug, Default)]
pub struct StartArgs {
    /// Identity of this node (a random UUID if neither flag nor config sets one).
    #[arg(long)]
    pub node_id: Option<String>,

    /// Address the listener binds to.
    #[arg(long, conflicts_with = "port")]
    pub listen: Option<SocketAddr>,

    /// Port the listener binds to, keeping the configured address.
    #[arg(long)]
    pub port: Option<u16>,

    /// Capacity of the send buffer.
    #[arg(long)]
    pub send_capacity: Option<usize>,

    /// Capacity of the deliver buffer.
    #[arg(long)]
    pub deliver_capacity: Option<usize>,

    /// How long one transfer may keep retrying, in milliseconds.
    #[arg(long)]
    pub max_backoff_ms: Option<u64>,

    /// Bound on establishing a connection to a peer, in milliseconds.
    #[arg(long)]
    pub dial_timeout_ms: Option<u64>,

    /// Keep retrying a transfer until it succeeds or the node stops.
    #[arg(long)]
    pub unbounded_backoff: bool,

    /// Dial peers over TLS.
    #[arg(long)]
    pub tls: bool,

    /// PEM file with the certificate(s) trusted when dialing peers.
    #[arg(long)]
    pub key_file: Option<PathBuf>,

    /// Certificate chain (PEM) presented to inbound connections.
    #[arg(long, requires = "server_key_file")]
    pub cert_file: Option<PathBuf>,

    /// PKCS#8 private key (PEM) for `--cert-file`.
    #[arg(long, requires = "cert_file")]
    pub server_key_file: Option<PathBuf>,

    /// Explicit route to a peer, as IDENTITY=HOST:PORT. Repeatable.
    #[arg(long = "peer", value_name = "IDENTITY=HOST:PORT")]
    pub peers: Vec<String>,
}

/// How to reach a running queue manager.
#[derive(Args, Debug)]
pub struct PeerArgs {
    /// Queue manager address.
    #[arg(long, default_value = "localhost:10000")]
    pub to: String,

    /// Dial over TLS, trusting the certificate(s) in this PEM file.
    #[arg(long)]
    pub ca_file: Option<PathBuf>,

    /// Server name to verify instead of the host in `--to`.
    #[arg(long, requires = "ca_file")]
    pub domain: Option<String>,

    /// Bound on connecting and on each request, in seconds.
    #[arg(long, default_value_t = 100)]
    pub timeout_secs: u64,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    #[command(flatten)]
    pub peer: PeerArgs,

    /// Identity of the node the messages are for.
    #[arg(long)]
    pub destination: String,

    /// Message payload.
    #[arg(long, default_value = "Ping")]
    pub payload: String,

    /// Pause between messages, in milliseconds.
    #[arg(long, default_value_t = 5000)]
    pub interval_ms: u64,

    /// Stop after this many messages (default: run until Ctrl+C).
    #[arg(long)]
    pub count: Option<u64>,
}
