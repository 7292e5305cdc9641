//! Connection Pool
//!
//! Pre-allocates a fixed number of reusable connections.

use std::sync::Arc;

use parking_lot::Mutex;

use super::connection::{Connection, ConnectionSettings, ConnectionState};
use crate::error::{GamewireError, Result};
use crate::protocol::Codec;

/// Fixed-size stack of idle connections
pub struct ConnectionPool<C: Codec> {
    capacity: usize,
    free: Mutex<Vec<Arc<Connection<C>>>>,
}

impl<C: Codec> ConnectionPool<C> {
    /// Eagerly build `capacity` connections in state `None`
    pub fn new(capacity: usize, codec: Arc<C>, settings: ConnectionSettings) -> Self {
        let free = (0..capacity)
            .map(|_| Arc::new(Connection::new(Arc::clone(&codec), settings.clone())))
            .collect();
        Self {
            capacity,
            free: Mutex::new(free),
        }
    }

    /// Take an idle connection
    pub fn pop(&self) -> Result<Arc<Connection<C>>> {
        self.free.lock().pop().ok_or(GamewireError::PoolExhausted)
    }

    /// Reset `connection` and return it to the free list
    ///
    /// Live connections and pushes beyond capacity are refused.
    pub fn push(&self, connection: Arc<Connection<C>>) -> bool {
        let mut free = self.free.lock();
        if free.len() >= self.capacity {
            return false;
        }
        if !connection.reset() {
            return false;
        }
        debug_assert_eq!(connection.state(), ConnectionState::None);
        free.push(connection);
        true
    }

    /// Idle connections
    pub fn available(&self) -> usize {
        self.free.lock().len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
