//! Protocol Module
//!
//! Defines messages, the pluggable codec contract, and the wire framing.
//!
//! ## Frame Format
//! ```text
//! ┌───────────────────┬──────────────────────────────┐
//! │ Len (4, u32 LE)   │  Codec output (Len bytes)    │
//! └───────────────────┴──────────────────────────────┘
//! ```
//!
//! ### Layers
//! - `Message<H>`: application header + opaque body
//! - `Codec`: item <-> payload bytes (bincode, optionally LZ4)
//! - framing: payload <-> length-prefixed frame, reassembly of partial reads

mod codec;
mod frame;
mod message;

pub use codec::{BincodeCodec, Codec, Lz4Codec};
pub use frame::{frame_payload, pack, peek_frame, try_unpack, FrameBuffer, LEN_PREFIX_SIZE};
pub use message::Message;

/// Codec for `Message<H>` with a bincode-encoded envelope
pub type MessageCodec<H> = BincodeCodec<Message<H>>;
