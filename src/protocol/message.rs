//! Message definitions
//!
//! A message is an application header plus an opaque body.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::CodecError;

/// A typed header with an opaque body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message<H> {
    /// Application-defined header
    pub header: H,

    /// Serialized body payload
    pub body: Vec<u8>,
}

impl<H> Message<H> {
    /// Create a message with an empty body
    pub fn new(header: H) -> Self {
        Self {
            header,
            body: Vec::new(),
        }
    }

    /// Create a message whose body is `body` serialized with bincode
    pub fn with_body<T: Serialize>(header: H, body: &T) -> Result<Self, CodecError> {
        let mut message = Self::new(header);
        message.set_body(body)?;
        Ok(message)
    }

    /// Replace the body with `body` serialized with bincode
    pub fn set_body<T: Serialize>(&mut self, body: &T) -> Result<(), CodecError> {
        self.body = bincode::serialize(body).map_err(|e| CodecError::Encode(e.to_string()))?;
        Ok(())
    }

    /// Deserialize the body as `T`
    pub fn body_as<T: DeserializeOwned>(&self) -> Result<T, CodecError> {
        bincode::deserialize(&self.body).map_err(|e| CodecError::Decode(e.to_string()))
    }
}
