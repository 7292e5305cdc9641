//! Gamewire Server Binary
//!
//! Chat-style relay: every `Cmd::Do` message is tagged with the sender's id
//! and forwarded to all other connected clients.

use std::time::Duration;

use clap::Parser;
use gamewire::{Delivery, LogSink, Message, MessageCodec, Server, ServerConfig, ServerHandler};
use gamewire::{Session, TransportError};
use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt, EnvFilter};

/// Message header shared with `gamewire-cli`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
enum Cmd {
    Do,
    Te,
}

#[derive(Debug, Serialize, Deserialize)]
struct NetBody {
    name: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct NetBody2 {
    age: u32,
}

type Codec = MessageCodec<Cmd>;

/// Gamewire Server
#[derive(Parser, Debug)]
#[command(name = "gamewire-server")]
#[command(about = "Relay server for the gamewire transport")]
#[command(version)]
struct Args {
    /// Listen port
    #[arg(short, long, default_value = "3000")]
    port: u16,

    /// Listen backlog
    #[arg(short, long, default_value = "10")]
    backlog: u32,

    /// Maximum concurrent clients
    #[arg(long, default_value = "100")]
    pool: usize,

    /// Deliver events from a tick loop instead of the I/O tasks
    #[arg(long)]
    deferred: bool,

    /// Tick interval in milliseconds (deferred mode)
    #[arg(long, default_value = "66")]
    tick_ms: u64,
}

struct Relay;

impl ServerHandler<Codec> for Relay {
    fn on_client_connected(&self, session: &Session<Codec>) {
        tracing::info!(
            "Client [{}] joined from {:?} ({} online)",
            session.id(),
            session.peer_addr(),
            session.client_count()
        );
    }

    fn on_client_disconnected(&self, id: u64) {
        tracing::info!("Client [{}] left", id);
    }

    fn on_message(&self, session: &Session<Codec>, mut message: Message<Cmd>) {
        match message.header {
            Cmd::Do => {
                let mut body: NetBody = match message.body_as() {
                    Ok(body) => body,
                    Err(e) => {
                        tracing::warn!("Client [{}] sent a bad body: {}", session.id(), e);
                        return;
                    }
                };
                tracing::info!("[{}] {}", session.id(), body.name);

                body.name.push_str(&format!(" from [{}]", session.id()));
                if let Err(e) = message.set_body(&body) {
                    tracing::error!("Failed to re-encode body: {}", e);
                    return;
                }
                session.send_all_except_self(&message);
            }
            Cmd::Te => match message.body_as::<NetBody2>() {
                Ok(body) => tracing::info!("[{}] age {}", session.id(), body.age),
                Err(e) => tracing::warn!("Client [{}] sent a bad body: {}", session.id(), e),
            },
        }
    }

    fn on_error(&self, error: &TransportError) {
        tracing::warn!("Transport error: {}", error);
    }
}

#[tokio::main]
async fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,gamewire=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    tracing::info!("Gamewire Server v{}", gamewire::VERSION);

    let delivery = if args.deferred {
        Delivery::Deferred
    } else {
        Delivery::Immediate
    };
    let config = ServerConfig::builder()
        .port(args.port)
        .backlog(args.backlog)
        .pool_capacity(args.pool)
        .delivery(delivery)
        .log(LogSink::tracing())
        .build();

    let server = match Server::new(config, Codec::new(), Relay) {
        Ok(server) => server,
        Err(e) => {
            tracing::error!("Failed to create server: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = server.start() {
        tracing::error!("Failed to start server: {}", e);
        std::process::exit(1);
    }

    let mut ticker = tokio::time::interval(Duration::from_millis(args.tick_ms.max(1)));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            _ = ticker.tick(), if args.deferred => {
                server.tick();
            }
            result = &mut ctrl_c => {
                if let Err(e) = result {
                    tracing::error!("Failed to listen for Ctrl+C: {}", e);
                }
                tracing::info!("Received Ctrl+C, initiating shutdown...");
                break;
            }
        }
    }

    server.shutdown();
    tracing::info!("Server stopped");
}
