//! Gamewire CLI Client
//!
//! Sends each stdin line to the relay server and prints what other clients
//! say. Typing `del` closes the connection.

use clap::Parser;
use gamewire::{Client, ClientConfig, ClientHandler, ClientSession, LogSink, Message, MessageCodec};
use gamewire::TransportError;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::{fmt, EnvFilter};

/// Message header shared with `gamewire-server`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
enum Cmd {
    Do,
    Te,
}

#[derive(Debug, Serialize, Deserialize)]
struct NetBody {
    name: String,
}

type Codec = MessageCodec<Cmd>;

/// Gamewire CLI
#[derive(Parser, Debug)]
#[command(name = "gamewire-cli")]
#[command(about = "Interactive client for the gamewire relay server")]
struct Args {
    /// Server address
    #[arg(short, long, default_value = "127.0.0.1:3000")]
    server: String,
}

/// Lifecycle notifications forwarded to the main task
enum Status {
    Up,
    Down,
}

struct Printer {
    status: mpsc::UnboundedSender<Status>,
}

impl ClientHandler<Codec> for Printer {
    fn on_connected(&self, _session: &ClientSession<Codec>) {
        println!("connected");
        let _ = self.status.send(Status::Up);
    }

    fn on_connection_failed(&self) {
        println!("connection refused");
        let _ = self.status.send(Status::Down);
    }

    fn on_disconnected(&self) {
        println!("disconnected");
        let _ = self.status.send(Status::Down);
    }

    fn on_message(&self, _session: &ClientSession<Codec>, message: Message<Cmd>) {
        match message.body_as::<NetBody>() {
            Ok(body) => println!("{}", body.name),
            Err(_) => println!("<{:?}> {} bytes", message.header, message.body.len()),
        }
    }

    fn on_error(&self, error: &TransportError) {
        eprintln!("error: {}", error);
        let _ = self.status.send(Status::Down);
    }
}

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    fmt().with_env_filter(filter).with_target(false).init();

    let args = Args::parse();

    let (status_tx, mut status_rx) = mpsc::unbounded_channel();
    let config = ClientConfig::builder()
        .server_addr(&args.server)
        .log(LogSink::tracing())
        .build();

    let client = match Client::new(config, Codec::new(), Printer { status: status_tx }) {
        Ok(client) => client,
        Err(e) => {
            eprintln!("Failed to create client: {}", e);
            std::process::exit(1);
        }
    };
    client.connect();

    match status_rx.recv().await {
        Some(Status::Up) => {}
        _ => std::process::exit(1),
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if line == "del" {
                        client.close();
                        continue;
                    }
                    if line.is_empty() {
                        continue;
                    }
                    let body = NetBody { name: line.to_string() };
                    match Message::with_body(Cmd::Do, &body) {
                        Ok(message) => {
                            client.send(&message);
                        }
                        Err(e) => eprintln!("Failed to encode: {}", e),
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    eprintln!("stdin: {}", e);
                    break;
                }
            },
            status = status_rx.recv() => match status {
                Some(Status::Up) => {}
                Some(Status::Down) | None => break,
            },
        }
    }

    client.close();
}
