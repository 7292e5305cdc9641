//! TCP Client
//!
//! Owns a single outbound `Connection`, created directly rather than taken
//! from a pool. The same instance is reused across reconnects.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use tokio::net::TcpStream;
use tokio::runtime::Handle;

use super::connection::{Connection, ConnectionEvents, ConnectionSettings, ConnectionState};
use super::delivery::Dispatcher;
use crate::config::{ClientConfig, Delivery};
use crate::error::{Direction, GamewireError, Result, TransportError};
use crate::log::LogSink;
use crate::protocol::Codec;

/// Connection id used for the client's single connection
pub const CLIENT_CONNECTION_ID: u64 = 1;

/// Application callbacks for a client
///
/// Every method defaults to a no-op. One connect attempt ends in exactly one
/// of `on_connected`, `on_connection_failed` or `on_error`.
pub trait ClientHandler<C: Codec>: Send + Sync + 'static {
    fn on_connected(&self, _session: &ClientSession<C>) {}

    /// The peer actively refused the connection
    fn on_connection_failed(&self) {}

    fn on_disconnected(&self) {}

    fn on_message(&self, _session: &ClientSession<C>, _message: C::Item) {}

    fn on_error(&self, _error: &TransportError) {}
}

enum ClientEvent<T> {
    Connected,
    ConnectionFailed,
    Disconnected,
    Message(T),
    Error(TransportError),
}

struct ClientCore<C: Codec> {
    config: ClientConfig,
    connection: Arc<Connection<C>>,
    handler: Arc<dyn ClientHandler<C>>,
    dispatcher: Dispatcher<ClientEvent<C::Item>>,
    runtime: Handle,
    connecting: AtomicBool,
}

struct ClientLink<C: Codec> {
    core: Weak<ClientCore<C>>,
}

impl<C: Codec> ConnectionEvents<C::Item> for ClientLink<C> {
    fn on_message(&self, _id: u64, item: C::Item) {
        if let Some(core) = self.core.upgrade() {
            core.notify(ClientEvent::Message(item));
        }
    }

    fn on_error(&self, _id: u64, error: TransportError) {
        if let Some(core) = self.core.upgrade() {
            core.notify(ClientEvent::Error(error));
        }
    }

    fn on_disconnected(&self, _id: u64) {
        if let Some(core) = self.core.upgrade() {
            core.notify(ClientEvent::Disconnected);
        }
    }
}

impl<C: Codec> ClientCore<C> {
    fn log(&self) -> &LogSink {
        &self.config.log
    }

    async fn run_connect(self: Arc<Self>) {
        let addr = self.config.server_addr.as_str();
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                let link: Arc<dyn ConnectionEvents<C::Item>> = Arc::new(ClientLink {
                    core: Arc::downgrade(&self),
                });
                let attached =
                    self.connection
                        .attach(stream, CLIENT_CONNECTION_ID, link, &self.runtime);
                self.connecting.store(false, Ordering::SeqCst);

                match attached {
                    Ok(()) => {
                        self.log().info(format_args!("Connected to {}", addr));
                        self.notify(ClientEvent::Connected);
                        self.connection.start_receiving();
                    }
                    Err(e) => {
                        self.log().error(format_args!("[Connect] {}: {}", addr, e));
                        let source = match e {
                            GamewireError::Io(e) => e,
                            other => io::Error::new(io::ErrorKind::Other, other.to_string()),
                        };
                        self.notify(ClientEvent::Error(TransportError::new(Direction::Connect, source)));
                    }
                }
            }
            Err(e) if e.kind() == io::ErrorKind::ConnectionRefused => {
                self.connecting.store(false, Ordering::SeqCst);
                self.log().warn(format_args!("Connection to {} refused", addr));
                self.notify(ClientEvent::ConnectionFailed);
            }
            Err(e) => {
                self.connecting.store(false, Ordering::SeqCst);
                self.log().error(format_args!("[Connect] {}: {}", addr, e));
                self.notify(ClientEvent::Error(TransportError::new(Direction::Connect, e)));
            }
        }
    }

    fn notify(self: &Arc<Self>, event: ClientEvent<C::Item>) {
        self.dispatcher.deliver(event, |event| self.dispatch(event));
    }

    fn dispatch(self: &Arc<Self>, event: ClientEvent<C::Item>) {
        match event {
            ClientEvent::Connected => self.handler.on_connected(&ClientSession::new(Arc::clone(self))),
            ClientEvent::ConnectionFailed => self.handler.on_connection_failed(),
            ClientEvent::Disconnected => self.handler.on_disconnected(),
            ClientEvent::Message(item) => {
                self.handler.on_message(&ClientSession::new(Arc::clone(self)), item)
            }
            ClientEvent::Error(error) => self.handler.on_error(&error),
        }
    }
}

/// TCP client with a single connection
///
/// Dropping the client half-closes its connection.
pub struct Client<C: Codec> {
    core: Arc<ClientCore<C>>,
}

impl<C: Codec> Client<C> {
    /// Create a client on the ambient tokio runtime
    pub fn new<H: ClientHandler<C>>(config: ClientConfig, codec: C, handler: H) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|_| GamewireError::NoRuntime)?;
        Self::with_runtime(config, codec, handler, runtime)
    }

    /// Create a client whose I/O runs on `runtime`
    pub fn with_runtime<H: ClientHandler<C>>(
        config: ClientConfig,
        codec: C,
        handler: H,
        runtime: Handle,
    ) -> Result<Self> {
        if config.read_buffer_size == 0 {
            return Err(GamewireError::Config("read_buffer_size must be at least 1".into()));
        }

        let settings = ConnectionSettings {
            read_buffer_size: config.read_buffer_size,
            max_frame_size: config.max_frame_size,
            log: config.log.clone(),
        };
        let core = Arc::new(ClientCore {
            connection: Arc::new(Connection::new(Arc::new(codec), settings)),
            handler: Arc::new(handler),
            dispatcher: Dispatcher::new(config.delivery),
            connecting: AtomicBool::new(false),
            runtime,
            config,
        });

        let client = Self { core };
        if client.core.config.connect_immediately {
            client.connect();
        }
        Ok(client)
    }

    /// Start an asynchronous connect attempt
    ///
    /// Returns false when already connected or connecting.
    pub fn connect(&self) -> bool {
        let state = self.core.connection.state();
        if state.is_live() {
            self.core
                .log()
                .warn(format_args!("Client is already connected"));
            return false;
        }
        if self.core.connecting.swap(true, Ordering::SeqCst) {
            return false;
        }
        if state == ConnectionState::Disconnected {
            self.core.connection.reset();
        }

        self.core
            .runtime
            .spawn(Arc::clone(&self.core).run_connect());
        true
    }

    /// Request a local half-close
    pub fn close(&self) -> bool {
        self.core.connection.close()
    }

    pub fn send(&self, message: &C::Item) -> bool {
        self.core.connection.send(message)
    }

    /// Send bytes that are already framed
    pub fn send_bytes(&self, frame: impl Into<Bytes>) -> bool {
        self.core.connection.send_bytes(frame)
    }

    /// Deliver queued notifications (deferred mode); returns how many ran
    pub fn tick(&self) -> usize {
        self.core.dispatcher.drain(|event| self.core.dispatch(event))
    }

    pub fn state(&self) -> ConnectionState {
        self.core.connection.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn session(&self) -> ClientSession<C> {
        ClientSession::new(Arc::clone(&self.core))
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.core.connection.peer_addr()
    }

    pub fn pending_events(&self) -> usize {
        self.core.dispatcher.pending()
    }

    pub fn delivery(&self) -> Delivery {
        self.core.dispatcher.mode()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.core.config
    }
}

impl<C: Codec> Drop for Client<C> {
    fn drop(&mut self) {
        self.core.connection.close();
    }
}

/// Handle to the client's connection passed to callbacks
pub struct ClientSession<C: Codec> {
    core: Arc<ClientCore<C>>,
}

impl<C: Codec> ClientSession<C> {
    fn new(core: Arc<ClientCore<C>>) -> Self {
        Self { core }
    }

    pub fn id(&self) -> u64 {
        CLIENT_CONNECTION_ID
    }

    pub fn send(&self, message: &C::Item) -> bool {
        self.core.connection.send(message)
    }

    pub fn send_bytes(&self, frame: impl Into<Bytes>) -> bool {
        self.core.connection.send_bytes(frame)
    }

    pub fn close(&self) -> bool {
        self.core.connection.close()
    }

    pub fn is_connected(&self) -> bool {
        self.core.connection.state() == ConnectionState::Connected
    }
}

impl<C: Codec> Clone for ClientSession<C> {
    fn clone(&self) -> Self {
        Self::new(Arc::clone(&self.core))
    }
}

impl<C: Codec> PartialEq for ClientSession<C> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.core, &other.core)
    }
}

impl<C: Codec> Eq for ClientSession<C> {}

impl<C: Codec> fmt::Debug for ClientSession<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientSession")
            .field("id", &CLIENT_CONNECTION_ID)
            .field("state", &self.core.connection.state())
            .finish()
    }
}
