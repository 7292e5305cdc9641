//! Message codecs
//!
//! The codec turns one item into the payload bytes of one frame and back.
//! It knows nothing about framing; see `frame.rs` for the length prefix.
//!
//! Stock codecs:
//! - [`BincodeCodec`]: any serde type, bincode encoding
//! - [`Lz4Codec`]: wraps another codec with LZ4 block compression

use std::fmt;
use std::marker::PhantomData;

use lz4_flex::{compress_prepend_size, decompress_size_prepended};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::CodecError;

/// Encode/decode contract for frame payloads
///
/// `decode(encode(x)) == x` must hold for every representable item.
pub trait Codec: Send + Sync + 'static {
    /// The type carried by each frame
    type Item: Send + 'static;

    fn encode(&self, item: &Self::Item) -> Result<Vec<u8>, CodecError>;

    fn decode(&self, bytes: &[u8]) -> Result<Self::Item, CodecError>;
}

// =============================================================================
// Bincode
// =============================================================================

/// Bincode codec for any serde type
pub struct BincodeCodec<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> BincodeCodec<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for BincodeCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for BincodeCodec<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for BincodeCodec<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BincodeCodec")
    }
}

impl<T> Codec for BincodeCodec<T>
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    type Item = T;

    fn encode(&self, item: &T) -> Result<Vec<u8>, CodecError> {
        bincode::serialize(item).map_err(|e| CodecError::Encode(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<T, CodecError> {
        bincode::deserialize(bytes).map_err(|e| CodecError::Decode(e.to_string()))
    }
}

// =============================================================================
// LZ4
// =============================================================================

/// Compresses the output of an inner codec with LZ4
///
/// Payload layout: uncompressed size (u32 LE) followed by the LZ4 block.
#[derive(Debug, Clone, Default)]
pub struct Lz4Codec<C> {
    inner: C,
}

impl<C> Lz4Codec<C> {
    pub fn new(inner: C) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }
}

impl<C: Codec> Codec for Lz4Codec<C> {
    type Item = C::Item;

    fn encode(&self, item: &C::Item) -> Result<Vec<u8>, CodecError> {
        let raw = self.inner.encode(item)?;
        Ok(compress_prepend_size(&raw))
    }

    fn decode(&self, bytes: &[u8]) -> Result<C::Item, CodecError> {
        let raw = decompress_size_prepended(bytes)
            .map_err(|e| CodecError::Compression(e.to_string()))?;
        self.inner.decode(&raw)
    }
}
