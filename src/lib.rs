//! # Gamewire
//!
//! Pooled TCP transport for game servers:
//! - Length-prefixed framing with reassembly of partial reads
//! - Pluggable codecs (bincode, optionally LZ4-compressed)
//! - Half-close connection lifecycle with ordered, serialized sends
//! - Bounded admission backed by a fixed connection pool
//! - Immediate or tick-driven (deferred) event delivery
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────┐        ┌──────────────────────────┐
//! │          Server          │        │          Client          │
//! │  accept loop + sessions  │        │  single connection       │
//! └────────────┬─────────────┘        └────────────┬─────────────┘
//!              │                                   │
//!   ┌──────────▼──────────┐                        │
//!   │   ConnectionPool    │                        │
//!   └──────────┬──────────┘                        │
//!              │                                   │
//!   ┌──────────▼───────────────────────────────────▼──────────┐
//!   │                       Connection                        │
//!   │    read loop ─▶ FrameBuffer ─▶ Codec ─▶ handler         │
//!   │    send ─▶ outbound FIFO ─▶ write loop ─▶ socket        │
//!   └─────────────────────────────────────────────────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;
pub mod log;

pub mod network;
pub mod protocol;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use config::{ClientConfig, Delivery, ServerConfig};
pub use error::{CodecError, Direction, GamewireError, Result, TransportError};
pub use log::LogSink;
pub use network::{
    Client, ClientHandler, ClientSession, ConnectionState, Server, ServerHandler, Session,
};
pub use protocol::{BincodeCodec, Codec, Lz4Codec, Message, MessageCodec};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of Gamewire
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
