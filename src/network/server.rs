//! TCP Server
//!
//! Accepts connections into pooled `Connection`s and tracks them in a
//! session table keyed by connection id.
//!
//! ## Admission
//! A semaphore sized to the pool gates the accept loop: a permit is taken
//! before each accept and given back only when a disconnected connection has
//! been returned to the pool. Connection attempts beyond capacity wait in the
//! listen backlog.

use std::collections::HashMap;
use std::fmt;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::runtime::Handle;
use tokio::sync::{watch, Semaphore};

use super::connection::{Connection, ConnectionEvents, ConnectionSettings};
use super::delivery::Dispatcher;
use super::pool::ConnectionPool;
use crate::config::{Delivery, ServerConfig};
use crate::error::{Direction, GamewireError, Result, TransportError};
use crate::log::LogSink;
use crate::protocol::{pack, Codec};

/// Ids handed out start after this value
const FIRST_ID_BASE: u64 = 100;

/// Application callbacks for a server
///
/// Every method defaults to a no-op. With [`Delivery::Immediate`] they run on
/// runtime worker threads; with [`Delivery::Deferred`] they run inside
/// [`Server::tick`].
pub trait ServerHandler<C: Codec>: Send + Sync + 'static {
    fn on_client_connected(&self, _session: &Session<C>) {}

    fn on_client_disconnected(&self, _id: u64) {}

    fn on_message(&self, _session: &Session<C>, _message: C::Item) {}

    fn on_error(&self, _error: &TransportError) {}
}

enum ServerEvent<T> {
    ClientConnected(u64),
    ClientDisconnected(u64),
    Message(u64, T),
    Error(TransportError),
}

struct ServerCore<C: Codec> {
    config: ServerConfig,
    codec: Arc<C>,
    pool: ConnectionPool<C>,
    sessions: RwLock<HashMap<u64, Arc<Connection<C>>>>,
    admission: Arc<Semaphore>,
    last_id: AtomicU64,
    handler: Arc<dyn ServerHandler<C>>,
    dispatcher: Dispatcher<ServerEvent<C::Item>>,
    runtime: Handle,
    local_addr: Mutex<Option<SocketAddr>>,
    started: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
}

/// Forwards connection notifications to the server without owning it
struct ServerLink<C: Codec> {
    core: Weak<ServerCore<C>>,
}

impl<C: Codec> ConnectionEvents<C::Item> for ServerLink<C> {
    fn on_message(&self, id: u64, item: C::Item) {
        if let Some(core) = self.core.upgrade() {
            core.notify(ServerEvent::Message(id, item));
        }
    }

    fn on_error(&self, _id: u64, error: TransportError) {
        if let Some(core) = self.core.upgrade() {
            core.notify(ServerEvent::Error(error));
        }
    }

    fn on_disconnected(&self, id: u64) {
        if let Some(core) = self.core.upgrade() {
            core.on_disconnected(id);
        }
    }
}

impl<C: Codec> ServerCore<C> {
    fn log(&self) -> &LogSink {
        &self.config.log
    }

    // =========================================================================
    // Accept path
    // =========================================================================

    async fn accept_loop(
        self: Arc<Self>,
        listener: TcpListener,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            // Only arm the next accept once a pooled connection is free
            let permit = tokio::select! {
                permit = Arc::clone(&self.admission).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                _ = shutdown_rx.changed() => continue,
            };

            let accepted = tokio::select! {
                result = listener.accept() => result,
                _ = shutdown_rx.changed() => continue,
            };

            match accepted {
                Ok((stream, peer_addr)) => {
                    permit.forget();
                    let core = Arc::clone(&self);
                    self.runtime.spawn(async move { core.admit(stream, peer_addr) });
                }
                Err(e) => {
                    drop(permit);
                    self.log().error(format_args!("[Accept] {}", e));
                    self.notify(ServerEvent::Error(TransportError::new(Direction::Accept, e)));
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            }
        }

        tracing::debug!("Accept loop stopped");
    }

    fn admit(self: &Arc<Self>, stream: TcpStream, peer_addr: SocketAddr) {
        let conn = match self.pool.pop() {
            Ok(conn) => conn,
            Err(e) => {
                self.log().error(format_args!("Rejecting {}: {}", peer_addr, e));
                self.admission.add_permits(1);
                return;
            }
        };

        let id = self.last_id.fetch_add(1, Ordering::Relaxed) + 1;
        let link: Arc<dyn ConnectionEvents<C::Item>> = Arc::new(ServerLink {
            core: Arc::downgrade(self),
        });
        if let Err(e) = conn.attach(stream, id, link, &self.runtime) {
            self.pool.push(conn);
            self.admission.add_permits(1);
            self.log()
                .error(format_args!("Failed to set up connection from {}: {}", peer_addr, e));
            return;
        }

        // Published only once attached, so senders never see a bare connection
        self.sessions.write().insert(id, Arc::clone(&conn));
        self.log().info(format_args!(
            "New connection {} as client [{}], {} clients",
            peer_addr,
            id,
            self.sessions.read().len()
        ));
        self.notify(ServerEvent::ClientConnected(id));
        conn.start_receiving();
    }

    // =========================================================================
    // Disconnect path
    // =========================================================================

    fn on_disconnected(self: &Arc<Self>, id: u64) {
        let removed = self.sessions.write().remove(&id);
        match removed {
            Some(conn) => {
                if !self.pool.push(conn) {
                    self.log()
                        .error(format_args!("Connection [{}] could not be returned to the pool", id));
                }
                self.admission.add_permits(1);
                self.log().info(format_args!(
                    "Client [{}] disconnected, {} clients",
                    id,
                    self.sessions.read().len()
                ));
                self.notify(ServerEvent::ClientDisconnected(id));
            }
            None => self
                .log()
                .warn(format_args!("Remove client [{}] not found", id)),
        }
    }

    // =========================================================================
    // Delivery
    // =========================================================================

    fn notify(self: &Arc<Self>, event: ServerEvent<C::Item>) {
        self.dispatcher.deliver(event, |event| self.dispatch(event));
    }

    fn dispatch(self: &Arc<Self>, event: ServerEvent<C::Item>) {
        match event {
            ServerEvent::ClientConnected(id) => {
                self.handler.on_client_connected(&Session::new(id, Arc::clone(self)))
            }
            ServerEvent::ClientDisconnected(id) => self.handler.on_client_disconnected(id),
            ServerEvent::Message(id, item) => {
                self.handler.on_message(&Session::new(id, Arc::clone(self)), item)
            }
            ServerEvent::Error(error) => self.handler.on_error(&error),
        }
    }

    // =========================================================================
    // Send helpers
    // =========================================================================

    fn connection(&self, id: u64) -> Option<Arc<Connection<C>>> {
        self.sessions.read().get(&id).cloned()
    }

    fn send_to(&self, id: u64, item: &C::Item) -> bool {
        match self.connection(id) {
            Some(conn) => conn.send(item),
            None => false,
        }
    }

    fn send_bytes_to(&self, id: u64, frame: Bytes) -> bool {
        match self.connection(id) {
            Some(conn) => conn.send_bytes(frame),
            None => false,
        }
    }

    fn broadcast(&self, item: &C::Item, except: Option<u64>) -> usize {
        match pack(&*self.codec, item) {
            Ok(frame) => self.broadcast_bytes(frame, except),
            Err(e) => {
                self.log()
                    .error(format_args!("Failed to encode broadcast message: {}", e));
                0
            }
        }
    }

    fn broadcast_bytes(&self, frame: Bytes, except: Option<u64>) -> usize {
        let targets: Vec<Arc<Connection<C>>> = self
            .sessions
            .read()
            .iter()
            .filter(|(id, _)| Some(**id) != except)
            .map(|(_, conn)| Arc::clone(conn))
            .collect();

        targets
            .iter()
            .filter(|conn| conn.send_bytes(frame.clone()))
            .count()
    }

    fn disconnect(&self, id: u64) -> bool {
        match self.connection(id) {
            Some(conn) => conn.close(),
            None => false,
        }
    }

    fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
        let live: Vec<Arc<Connection<C>>> = self.sessions.read().values().cloned().collect();
        for conn in live {
            conn.close();
        }
    }
}

/// Pooled, admission-bounded TCP server
///
/// Dropping the server stops the accept loop and half-closes every session.
pub struct Server<C: Codec> {
    core: Arc<ServerCore<C>>,
}

impl<C: Codec> Server<C> {
    /// Create a server on the ambient tokio runtime
    pub fn new<H: ServerHandler<C>>(config: ServerConfig, codec: C, handler: H) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|_| GamewireError::NoRuntime)?;
        Self::with_runtime(config, codec, handler, runtime)
    }

    /// Create a server whose I/O runs on `runtime`
    pub fn with_runtime<H: ServerHandler<C>>(
        config: ServerConfig,
        codec: C,
        handler: H,
        runtime: Handle,
    ) -> Result<Self> {
        config.validate()?;

        let codec = Arc::new(codec);
        let settings = ConnectionSettings {
            read_buffer_size: config.read_buffer_size,
            max_frame_size: config.max_frame_size,
            log: config.log.clone(),
        };
        let (shutdown_tx, _) = watch::channel(false);

        let core = Arc::new(ServerCore {
            pool: ConnectionPool::new(config.pool_capacity, Arc::clone(&codec), settings),
            admission: Arc::new(Semaphore::new(config.pool_capacity)),
            sessions: RwLock::new(HashMap::with_capacity(config.pool_capacity)),
            last_id: AtomicU64::new(FIRST_ID_BASE),
            handler: Arc::new(handler),
            dispatcher: Dispatcher::new(config.delivery),
            local_addr: Mutex::new(None),
            started: AtomicBool::new(false),
            codec,
            runtime,
            shutdown_tx,
            config,
        });

        let server = Self { core };
        if server.core.config.start_immediately {
            server.start()?;
        }
        Ok(server)
    }

    /// Bind, listen with the configured backlog and start accepting
    ///
    /// Returns the bound address.
    pub fn start(&self) -> Result<SocketAddr> {
        if self.core.started.swap(true, Ordering::SeqCst) {
            return Err(GamewireError::Config("server already started".into()));
        }

        let listener = match self.listen() {
            Ok(listener) => listener,
            Err(e) => {
                self.core.started.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };

        let local_addr = listener.local_addr()?;
        *self.core.local_addr.lock() = Some(local_addr);
        self.core
            .log()
            .info(format_args!("Server start at {}", local_addr));

        let shutdown_rx = self.core.shutdown_tx.subscribe();
        self.core
            .runtime
            .spawn(Arc::clone(&self.core).accept_loop(listener, shutdown_rx));
        Ok(local_addr)
    }

    fn listen(&self) -> Result<TcpListener> {
        let config = &self.core.config;
        let addr = config
            .listen_addr
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| {
                GamewireError::Config(format!("cannot resolve {}", config.listen_addr))
            })?;

        let _guard = self.core.runtime.enter();
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_reuseaddr(true)?;
        socket.bind(addr)?;
        Ok(socket.listen(config.backlog)?)
    }

    /// Stop accepting and half-close every live session
    pub fn shutdown(&self) {
        self.core.log().info(format_args!("Server shutting down"));
        self.core.shutdown();
    }

    /// Begin a local close of one session; unknown ids are ignored
    pub fn disconnect(&self, id: u64) -> bool {
        self.core.disconnect(id)
    }

    pub fn send_to(&self, id: u64, message: &C::Item) -> bool {
        self.core.send_to(id, message)
    }

    /// Send already-framed bytes to one session
    pub fn send_bytes_to(&self, id: u64, frame: impl Into<Bytes>) -> bool {
        self.core.send_bytes_to(id, frame.into())
    }

    /// Returns the number of sessions the message was queued on
    pub fn send_all(&self, message: &C::Item) -> usize {
        self.core.broadcast(message, None)
    }

    pub fn send_all_except(&self, message: &C::Item, except: u64) -> usize {
        self.core.broadcast(message, Some(except))
    }

    pub fn send_all_bytes(&self, frame: impl Into<Bytes>) -> usize {
        self.core.broadcast_bytes(frame.into(), None)
    }

    pub fn send_all_bytes_except(&self, frame: impl Into<Bytes>, except: u64) -> usize {
        self.core.broadcast_bytes(frame.into(), Some(except))
    }

    /// Deliver queued notifications (deferred mode); returns how many ran
    pub fn tick(&self) -> usize {
        self.core.dispatcher.drain(|event| self.core.dispatch(event))
    }

    /// Handle for a live session
    pub fn session(&self, id: u64) -> Option<Session<C>> {
        if self.is_connected(id) {
            Some(Session::new(id, Arc::clone(&self.core)))
        } else {
            None
        }
    }

    pub fn client_count(&self) -> usize {
        self.core.sessions.read().len()
    }

    /// Live session ids in ascending order
    pub fn client_ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.core.sessions.read().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn is_connected(&self, id: u64) -> bool {
        self.core.sessions.read().contains_key(&id)
    }

    /// Idle pooled connections
    pub fn pool_available(&self) -> usize {
        self.core.pool.available()
    }

    /// Events waiting for `tick()`
    pub fn pending_events(&self) -> usize {
        self.core.dispatcher.pending()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.core.local_addr.lock()
    }

    pub fn delivery(&self) -> Delivery {
        self.core.dispatcher.mode()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.core.config
    }
}

impl<C: Codec> Drop for Server<C> {
    fn drop(&mut self) {
        self.core.shutdown();
    }
}

/// Reference to one server-side connection, resolved through the session
/// table on every call
///
/// Operations on a session whose id has left the table are no-ops.
pub struct Session<C: Codec> {
    id: u64,
    core: Arc<ServerCore<C>>,
}

impl<C: Codec> Session<C> {
    fn new(id: u64, core: Arc<ServerCore<C>>) -> Self {
        Self { id, core }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_alive(&self) -> bool {
        self.core.sessions.read().contains_key(&self.id)
    }

    pub fn send(&self, message: &C::Item) -> bool {
        self.core.send_to(self.id, message)
    }

    pub fn send_bytes(&self, frame: impl Into<Bytes>) -> bool {
        self.core.send_bytes_to(self.id, frame.into())
    }

    pub fn send_to(&self, id: u64, message: &C::Item) -> bool {
        self.core.send_to(id, message)
    }

    pub fn send_all(&self, message: &C::Item) -> usize {
        self.core.broadcast(message, None)
    }

    /// Send to every session except this one
    pub fn send_all_except_self(&self, message: &C::Item) -> usize {
        self.core.broadcast(message, Some(self.id))
    }

    pub fn send_all_except(&self, message: &C::Item, except: u64) -> usize {
        self.core.broadcast(message, Some(except))
    }

    pub fn disconnect(&self) -> bool {
        self.core.disconnect(self.id)
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.core.connection(self.id).and_then(|conn| conn.peer_addr())
    }

    /// Live session count on the owning server
    pub fn client_count(&self) -> usize {
        self.core.sessions.read().len()
    }
}

impl<C: Codec> Clone for Session<C> {
    fn clone(&self) -> Self {
        Self::new(self.id, Arc::clone(&self.core))
    }
}

impl<C: Codec> PartialEq for Session<C> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && Arc::ptr_eq(&self.core, &other.core)
    }
}

impl<C: Codec> Eq for Session<C> {}

impl<C: Codec> fmt::Debug for Session<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session").field("id", &self.id).finish()
    }
}
