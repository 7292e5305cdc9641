//! Connection
//!
//! Owns one live socket for the duration of a lease and drives its state
//! machine:
//!
//! ```text
//!   None ──attach──▶ Connected ──close()──▶ HalfClosed
//!                        │                       │
//!                        │ EOF / reset / error   │ EOF / reset / error
//!                        ▼                       ▼
//!                   Disconnected ◀───────────────┘
//!                        │
//!                      reset ──▶ None
//! ```
//!
//! ## I/O model
//! - One read task per lease keeps exactly one read outstanding, feeds the
//!   reassembly buffer and dispatches every complete frame before reading
//!   again.
//! - Writes go through a FIFO. The first `send` on an idle connection spawns
//!   a drain task that takes the write half and writes frames one at a time
//!   until the queue is empty, then hands the write half back.
//! - `close()` queues a shutdown marker behind pending frames, so everything
//!   sent before `close()` reaches the wire before the FIN.
//! - Final teardown runs once per lease, from whichever task observes the
//!   end of the stream first.

use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::Notify;

use crate::error::{Direction, GamewireError, Result, TransportError};
use crate::log::LogSink;
use crate::protocol::{pack, Codec, FrameBuffer, LEN_PREFIX_SIZE};

/// Lifecycle state of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Pooled or unused
    None,
    Connected,
    /// Local side has shut down sending, still receiving
    HalfClosed,
    Disconnected,
}

impl ConnectionState {
    /// Connected or HalfClosed
    pub fn is_live(self) -> bool {
        matches!(self, ConnectionState::Connected | ConnectionState::HalfClosed)
    }
}

/// Notifications a connection delivers to its owner
pub trait ConnectionEvents<T>: Send + Sync {
    fn on_message(&self, id: u64, item: T);

    fn on_error(&self, id: u64, error: TransportError);

    fn on_disconnected(&self, id: u64);
}

/// Per-connection tuning shared by every lease
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub read_buffer_size: usize,
    pub max_frame_size: usize,
    pub log: LogSink,
}

enum Outbound {
    Frame(Bytes),
    Shutdown,
}

enum CloseCause {
    Eof,
    Failed(TransportError),
    Protocol(GamewireError),
    Disposed,
}

struct Lease<T> {
    id: u64,
    epoch: u64,
    state: ConnectionState,
    peer_addr: Option<SocketAddr>,
    reader: Option<OwnedReadHalf>,
    writer: Option<OwnedWriteHalf>,
    writing: bool,
    outbound: VecDeque<Outbound>,
    inbound: FrameBuffer,
    events: Option<Arc<dyn ConnectionEvents<T>>>,
    runtime: Option<Handle>,
    disposed: Arc<Notify>,
}

/// A reusable connection
pub struct Connection<C: Codec> {
    codec: Arc<C>,
    settings: ConnectionSettings,
    lease: Mutex<Lease<C::Item>>,
}

impl<C: Codec> Connection<C> {
    /// Create an unleased connection in state `None`
    pub fn new(codec: Arc<C>, settings: ConnectionSettings) -> Self {
        let inbound = FrameBuffer::with_capacity(settings.read_buffer_size, settings.max_frame_size);
        Self {
            codec,
            settings,
            lease: Mutex::new(Lease {
                id: 0,
                epoch: 0,
                state: ConnectionState::None,
                peer_addr: None,
                reader: None,
                writer: None,
                writing: false,
                outbound: VecDeque::new(),
                inbound,
                events: None,
                runtime: None,
                disposed: Arc::new(Notify::new()),
            }),
        }
    }

    // =========================================================================
    // Lease lifecycle
    // =========================================================================

    /// Wrap a freshly connected socket and start receiving
    pub fn init(
        self: &Arc<Self>,
        stream: TcpStream,
        id: u64,
        events: Arc<dyn ConnectionEvents<C::Item>>,
        runtime: &Handle,
    ) -> Result<()> {
        self.attach(stream, id, events, runtime)?;
        self.start_receiving();
        Ok(())
    }

    /// Take ownership of `stream` without arming the first read
    ///
    /// Owners that must publish the connection before any message can be
    /// delivered call this, then `start_receiving`.
    pub fn attach(
        &self,
        stream: TcpStream,
        id: u64,
        events: Arc<dyn ConnectionEvents<C::Item>>,
        runtime: &Handle,
    ) -> Result<()> {
        // Disable Nagle's algorithm for low latency
        stream.set_nodelay(true)?;
        let peer_addr = stream.peer_addr().ok();
        let (reader, writer) = stream.into_split();

        let mut lease = self.lease.lock();
        if lease.state != ConnectionState::None {
            return Err(GamewireError::ConnectionBusy);
        }

        lease.id = id;
        lease.epoch += 1;
        lease.state = ConnectionState::Connected;
        lease.peer_addr = peer_addr;
        lease.reader = Some(reader);
        lease.writer = Some(writer);
        lease.writing = false;
        lease.outbound.clear();
        lease.inbound.clear();
        lease.events = Some(events);
        lease.runtime = Some(runtime.clone());
        lease.disposed = Arc::new(Notify::new());

        tracing::debug!("Connection [{}] attached to {:?}", id, peer_addr);
        Ok(())
    }

    /// Arm the read loop for the current lease
    pub fn start_receiving(self: &Arc<Self>) {
        let mut lease = self.lease.lock();
        let reader = match lease.reader.take() {
            Some(reader) => reader,
            None => return,
        };
        let runtime = match lease.runtime.clone() {
            Some(runtime) => runtime,
            None => return,
        };
        let epoch = lease.epoch;
        let disposed = Arc::clone(&lease.disposed);
        drop(lease);

        runtime.spawn(Arc::clone(self).read_loop(reader, epoch, disposed));
    }

    /// Clear every per-lease field and return to `None`
    ///
    /// Refused while the connection is live.
    pub fn reset(&self) -> bool {
        let mut lease = self.lease.lock();
        if lease.state.is_live() {
            return false;
        }

        lease.id = 0;
        lease.state = ConnectionState::None;
        lease.peer_addr = None;
        lease.reader = None;
        lease.writer = None;
        lease.writing = false;
        lease.outbound.clear();
        lease.inbound.clear();
        lease.events = None;
        lease.runtime = None;
        true
    }

    // =========================================================================
    // Send path
    // =========================================================================

    /// Encode, frame and queue `item`
    pub fn send(self: &Arc<Self>, item: &C::Item) -> bool {
        match pack(&*self.codec, item) {
            Ok(frame) => self.send_bytes(frame),
            Err(e) => {
                let id = self.id();
                self.settings
                    .log
                    .error(format_args!("Connection [{}] failed to encode message: {}", id, e));
                false
            }
        }
    }

    /// Queue bytes that are already framed
    pub fn send_bytes(self: &Arc<Self>, frame: impl Into<Bytes>) -> bool {
        let frame = frame.into();
        if frame.len() > LEN_PREFIX_SIZE + self.settings.max_frame_size {
            self.settings.log.warn(format_args!(
                "Connection [{}] dropped outgoing frame of {} bytes (max {})",
                self.id(),
                frame.len(),
                self.settings.max_frame_size
            ));
            return false;
        }

        let mut lease = self.lease.lock();
        if lease.state != ConnectionState::Connected {
            let id = lease.id;
            drop(lease);
            self.settings
                .log
                .warn(format_args!("Connection [{}] is not connected, cannot send message", id));
            return false;
        }

        lease.outbound.push_back(Outbound::Frame(frame));
        self.kick_writer(&mut lease);
        true
    }

    /// Start the drain task unless one already owns the write half
    fn kick_writer(self: &Arc<Self>, lease: &mut Lease<C::Item>) {
        if lease.writing {
            return;
        }
        let runtime = match lease.runtime.clone() {
            Some(runtime) => runtime,
            None => return,
        };
        if let Some(writer) = lease.writer.take() {
            lease.writing = true;
            runtime.spawn(Arc::clone(self).write_loop(writer, lease.epoch));
        }
    }

    async fn write_loop(self: Arc<Self>, mut writer: OwnedWriteHalf, epoch: u64) {
        loop {
            let next = {
                let mut lease = self.lease.lock();
                if lease.epoch != epoch || !lease.state.is_live() {
                    return;
                }
                match lease.outbound.pop_front() {
                    Some(next) => next,
                    None => {
                        lease.writer = Some(writer);
                        lease.writing = false;
                        return;
                    }
                }
            };

            match next {
                Outbound::Frame(frame) => {
                    if let Err(e) = writer.write_all(&frame).await {
                        drop(writer);
                        let cause = CloseCause::Failed(TransportError::new(Direction::Write, e));
                        self.end_close(epoch, cause).await;
                        return;
                    }
                    tracing::trace!("Connection wrote {} bytes", frame.len());
                }
                Outbound::Shutdown => {
                    if let Err(e) = writer.shutdown().await {
                        tracing::debug!("Send shutdown failed: {}", e);
                    }
                }
            }
        }
    }

    // =========================================================================
    // Receive path
    // =========================================================================

    async fn read_loop(self: Arc<Self>, mut reader: OwnedReadHalf, epoch: u64, disposed: Arc<Notify>) {
        let mut buf = vec![0u8; self.settings.read_buffer_size];

        let cause = loop {
            tokio::select! {
                result = reader.read(&mut buf) => match result {
                    Ok(0) => break CloseCause::Eof,
                    Ok(n) => {
                        if let Err(e) = self.on_read(&buf[..n], epoch) {
                            break CloseCause::Protocol(e);
                        }
                    }
                    Err(e) => break CloseCause::Failed(TransportError::new(Direction::Read, e)),
                },
                _ = disposed.notified() => break CloseCause::Disposed,
            }
        };

        drop(reader);
        self.end_close(epoch, cause).await;
    }

    /// Append `data`, then deliver every complete frame in arrival order
    ///
    /// Frames completed ahead of a framing violation are still delivered
    /// before the violation is returned.
    fn on_read(&self, data: &[u8], epoch: u64) -> Result<()> {
        let mut payloads = Vec::new();
        let (id, events, violation) = {
            let mut lease = self.lease.lock();
            if lease.epoch != epoch || !lease.state.is_live() {
                return Ok(());
            }
            lease.inbound.extend(data);
            let violation = loop {
                match lease.inbound.next_frame() {
                    Ok(Some(payload)) => payloads.push(payload),
                    Ok(None) => break None,
                    Err(e) => break Some(e),
                }
            };
            (lease.id, lease.events.clone(), violation)
        };

        tracing::trace!("Connection [{}] read {} bytes, {} frames", id, data.len(), payloads.len());

        for payload in payloads {
            match self.codec.decode(&payload) {
                Ok(item) => {
                    if let Some(events) = &events {
                        events.on_message(id, item);
                    }
                }
                Err(e) => self.settings.log.error(format_args!(
                    "[Read] Connection [{}] dropped undecodable frame of {} bytes: {}",
                    id,
                    payload.len(),
                    e
                )),
            }
        }

        match violation {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    // =========================================================================
    // Close path
    // =========================================================================

    /// Begin a local close: shut down sending once queued frames are written
    ///
    /// Reading continues until the peer closes its side.
    pub fn close(self: &Arc<Self>) -> bool {
        let mut lease = self.lease.lock();
        if lease.state != ConnectionState::Connected {
            return false;
        }

        lease.state = ConnectionState::HalfClosed;
        lease.outbound.push_back(Outbound::Shutdown);
        self.kick_writer(&mut lease);
        let id = lease.id;
        drop(lease);

        self.settings.log.info(format_args!("Shutdown socket [{}]", id));
        true
    }

    /// Tear the lease down exactly once and notify the owner
    async fn end_close(&self, epoch: u64, cause: CloseCause) {
        let (id, previous, writer, events) = {
            let mut lease = self.lease.lock();
            if lease.epoch != epoch || !lease.state.is_live() {
                return;
            }
            let previous = lease.state;
            lease.state = ConnectionState::Disconnected;
            lease.outbound.clear();
            lease.inbound.clear();
            lease.reader = None;
            lease.disposed.notify_one();
            (lease.id, previous, lease.writer.take(), lease.events.clone())
        };

        match cause {
            CloseCause::Eof => tracing::debug!("Connection [{}] closed by peer", id),
            CloseCause::Disposed => {}
            CloseCause::Failed(error) => {
                self.settings.log.error(format_args!("Connection [{}] {}", id, error));
                if let Some(events) = &events {
                    events.on_error(id, error);
                }
            }
            CloseCause::Protocol(e) => {
                self.settings
                    .log
                    .error(format_args!("[Read] Connection [{}] protocol violation: {}", id, e));
                if let Some(events) = &events {
                    let source = io::Error::new(io::ErrorKind::InvalidData, e.to_string());
                    events.on_error(id, TransportError::new(Direction::Read, source));
                }
            }
        }

        // Peer closed first: answer with our own FIN before disposing
        if let Some(mut writer) = writer {
            if previous == ConnectionState::Connected {
                if let Err(e) = writer.shutdown().await {
                    tracing::debug!("Connection [{}] shutdown failed: {}", id, e);
                }
            }
        }

        self.settings.log.info(format_args!("Close socket [{}]", id));

        if let Some(events) = events {
            events.on_disconnected(id);
        }
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    pub fn id(&self) -> u64 {
        self.lease.lock().id
    }

    pub fn state(&self) -> ConnectionState {
        self.lease.lock().state
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.lease.lock().peer_addr
    }

    /// Bytes buffered waiting for the rest of a frame
    pub fn inbound_len(&self) -> usize {
        self.lease.lock().inbound.len()
    }

    /// Frames queued but not yet handed to the socket
    pub fn outbound_len(&self) -> usize {
        self.lease.lock().outbound.len()
    }

    pub fn has_events(&self) -> bool {
        self.lease.lock().events.is_some()
    }

    pub fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }
}

impl<C: Codec> fmt::Debug for Connection<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lease = self.lease.lock();
        f.debug_struct("Connection")
            .field("id", &lease.id)
            .field("state", &lease.state)
            .field("peer_addr", &lease.peer_addr)
            .field("outbound", &lease.outbound.len())
            .field("inbound", &lease.inbound.len())
            .finish()
    }
}
