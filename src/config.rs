//! Configuration for gamewire
//!
//! Centralized server and client configuration with sensible defaults.

use crate::error::{GamewireError, Result};
use crate::log::LogSink;

/// Default bytes requested per socket read
pub const DEFAULT_READ_BUFFER_SIZE: usize = 2048;

/// Default maximum frame payload (16 MB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// How notifications reach the application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Delivery {
    /// Handler runs on the I/O task that completed the operation
    #[default]
    Immediate,

    /// Events are queued and delivered by `tick()` on the caller's thread
    Deferred,
}

/// Configuration for a listening server
#[derive(Debug, Clone)]
pub struct ServerConfig {
    // -------------------------------------------------------------------------
    // Listener Configuration
    // -------------------------------------------------------------------------
    /// TCP listen address (host:port). Port 0 picks an ephemeral port.
    pub listen_addr: String,

    /// Pending-connection queue depth passed to listen(2)
    pub backlog: u32,

    /// Bind and start accepting inside `Server::new`
    pub start_immediately: bool,

    // -------------------------------------------------------------------------
    // Connection Configuration
    // -------------------------------------------------------------------------
    /// Number of pooled connections, which is also the admission limit
    pub pool_capacity: usize,

    /// Bytes requested per socket read
    pub read_buffer_size: usize,

    /// Largest accepted frame payload
    pub max_frame_size: usize,

    // -------------------------------------------------------------------------
    // Delivery / Logging
    // -------------------------------------------------------------------------
    pub delivery: Delivery,

    pub log: LogSink,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:3000".to_string(),
            backlog: 10,
            start_immediately: false,
            pool_capacity: 100,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            delivery: Delivery::Immediate,
            log: LogSink::tracing(),
        }
    }
}

impl ServerConfig {
    /// Create a new config builder
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.pool_capacity == 0 {
            return Err(GamewireError::Config("pool_capacity must be at least 1".into()));
        }
        if self.backlog == 0 {
            return Err(GamewireError::Config("backlog must be at least 1".into()));
        }
        if self.read_buffer_size == 0 {
            return Err(GamewireError::Config("read_buffer_size must be at least 1".into()));
        }
        Ok(())
    }
}

/// Builder for ServerConfig
#[derive(Default)]
pub struct ServerConfigBuilder {
    config: ServerConfig,
}

impl ServerConfigBuilder {
    /// Set the TCP listen address
    pub fn listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.listen_addr = addr.into();
        self
    }

    /// Listen on all interfaces at the given port
    pub fn port(mut self, port: u16) -> Self {
        self.config.listen_addr = format!("0.0.0.0:{}", port);
        self
    }

    pub fn backlog(mut self, backlog: u32) -> Self {
        self.config.backlog = backlog;
        self
    }

    /// Set the pool size (maximum concurrent connections)
    pub fn pool_capacity(mut self, capacity: usize) -> Self {
        self.config.pool_capacity = capacity;
        self
    }

    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.config.read_buffer_size = size;
        self
    }

    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.config.max_frame_size = size;
        self
    }

    pub fn delivery(mut self, delivery: Delivery) -> Self {
        self.config.delivery = delivery;
        self
    }

    pub fn start_immediately(mut self, yes: bool) -> Self {
        self.config.start_immediately = yes;
        self
    }

    pub fn log(mut self, log: LogSink) -> Self {
        self.config.log = log;
        self
    }

    pub fn build(self) -> ServerConfig {
        self.config
    }
}

/// Configuration for an outbound client
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server address (host:port)
    pub server_addr: String,

    /// Issue `connect()` inside `Client::new`
    pub connect_immediately: bool,

    pub read_buffer_size: usize,

    pub max_frame_size: usize,

    pub delivery: Delivery,

    pub log: LogSink,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:3000".to_string(),
            connect_immediately: false,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            delivery: Delivery::Immediate,
            log: LogSink::tracing(),
        }
    }
}

impl ClientConfig {
    /// Create a new config builder
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }
}

/// Builder for ClientConfig
#[derive(Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    /// Set the server address to connect to
    pub fn server_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.server_addr = addr.into();
        self
    }

    pub fn connect_immediately(mut self, yes: bool) -> Self {
        self.config.connect_immediately = yes;
        self
    }

    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.config.read_buffer_size = size;
        self
    }

    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.config.max_frame_size = size;
        self
    }

    pub fn delivery(mut self, delivery: Delivery) -> Self {
        self.config.delivery = delivery;
        self
    }

    pub fn log(mut self, log: LogSink) -> Self {
        self.config.log = log;
        self
    }

    pub fn build(self) -> ClientConfig {
        self.config
    }
}
