//! Network Module
//!
//! TCP transport built on pooled, reusable connections.
//!
//! ## Architecture
//! - `Connection`: one socket, receive reassembly, serialized send queue,
//!   half-close state machine
//! - `ConnectionPool`: fixed set of reusable connections
//! - `Server`: semaphore-gated accept loop, session table, broadcast helpers
//! - `Client`: single outbound connection
//!
//! Notifications reach the application either on the I/O task
//! (`Delivery::Immediate`) or from `tick()` (`Delivery::Deferred`).

mod client;
mod connection;
mod delivery;
mod pool;
mod server;

pub use client::{Client, ClientHandler, ClientSession, CLIENT_CONNECTION_ID};
pub use connection::{Connection, ConnectionEvents, ConnectionSettings, ConnectionState};
pub use pool::ConnectionPool;
pub use server::{Server, ServerHandler, Session};
