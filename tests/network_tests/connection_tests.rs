//! Connection Tests
//!
//! Drives a single `Connection` against a raw tokio socket peer.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use gamewire::network::{Connection, ConnectionEvents, ConnectionSettings, ConnectionState};
use gamewire::protocol::{frame_payload, pack, Codec as _, FrameBuffer, Message, MessageCodec};
use gamewire::{Direction, GamewireError, LogSink, TransportError};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::time::timeout;

type Codec = MessageCodec<u8>;

const WAIT: Duration = Duration::from_secs(5);

// =============================================================================
// Helpers
// =============================================================================

#[derive(Debug)]
enum Event {
    Message(u64, Message<u8>),
    Error(u64, Direction, io::ErrorKind),
    Disconnected(u64),
}

struct Recorder {
    tx: mpsc::UnboundedSender<Event>,
}

impl ConnectionEvents<Message<u8>> for Recorder {
    fn on_message(&self, id: u64, item: Message<u8>) {
        let _ = self.tx.send(Event::Message(id, item));
    }

    fn on_error(&self, id: u64, error: TransportError) {
        let _ = self.tx.send(Event::Error(id, error.direction, error.kind()));
    }

    fn on_disconnected(&self, id: u64) {
        let _ = self.tx.send(Event::Disconnected(id));
    }
}

fn recorder() -> (Arc<dyn ConnectionEvents<Message<u8>>>, mpsc::UnboundedReceiver<Event>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Arc::new(Recorder { tx }), rx)
}

fn connection(max_frame_size: usize) -> Arc<Connection<Codec>> {
    let settings = ConnectionSettings {
        read_buffer_size: 64,
        max_frame_size,
        log: LogSink::silent(),
    };
    Arc::new(Connection::new(Arc::new(Codec::new()), settings))
}

/// Returns (our side, raw peer side)
async fn socket_pair() -> (TcpStream, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (ours, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
    (ours.unwrap(), accepted.unwrap().0)
}

async fn next(rx: &mut mpsc::UnboundedReceiver<Event>) -> Event {
    timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

fn frame(header: u8, body: &[u8]) -> Vec<u8> {
    let msg = Message {
        header,
        body: body.to_vec(),
    };
    pack(&Codec::new(), &msg).unwrap().to_vec()
}

async fn read_messages(peer: &mut TcpStream, count: usize) -> Vec<Message<u8>> {
    let codec = Codec::new();
    let mut frames = FrameBuffer::new(1024 * 1024);
    let mut out = Vec::new();
    let mut buf = [0u8; 512];
    while out.len() < count {
        let n = timeout(WAIT, peer.read(&mut buf)).await.unwrap().unwrap();
        assert!(n > 0, "peer saw EOF after {} messages", out.len());
        frames.extend(&buf[..n]);
        while let Some(payload) = frames.next_frame().unwrap() {
            out.push(codec.decode(&payload).unwrap());
        }
    }
    out
}

async fn expect_eof(peer: &mut TcpStream) {
    let mut buf = [0u8; 64];
    let n = timeout(WAIT, peer.read(&mut buf)).await.unwrap().unwrap();
    assert_eq!(n, 0);
}

// =============================================================================
// Receive Tests
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_split_writes_are_reassembled_in_order() {
    let conn = connection(1024);
    let (ours, mut peer) = socket_pair().await;
    let (events, mut rx) = recorder();
    conn.init(ours, 7, events, &Handle::current()).unwrap();

    let mut wire = frame(1, b"first");
    wire.extend(frame(2, &[9u8; 200]));
    wire.extend(frame(3, b""));
    for chunk in wire.chunks(5) {
        peer.write_all(chunk).await.unwrap();
        peer.flush().await.unwrap();
    }

    for expected in 1..=3u8 {
        match next(&mut rx).await {
            Event::Message(id, msg) => {
                assert_eq!(id, 7);
                assert_eq!(msg.header, expected);
            }
            other => panic!("unexpected {:?}", other),
        }
    }
    assert_eq!(conn.inbound_len(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_undecodable_frame_is_dropped() {
    let conn = connection(1024);
    let (ours, mut peer) = socket_pair().await;
    let (events, mut rx) = recorder();
    conn.init(ours, 1, events, &Handle::current()).unwrap();

    let mut wire = frame_payload(&[1]).unwrap().to_vec();
    wire.extend(frame(5, b"ok"));
    peer.write_all(&wire).await.unwrap();

    match next(&mut rx).await {
        Event::Message(_, msg) => assert_eq!(msg.header, 5),
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(conn.state(), ConnectionState::Connected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_oversized_frame_tears_down() {
    let conn = connection(16);
    let (ours, mut peer) = socket_pair().await;
    let (events, mut rx) = recorder();
    conn.init(ours, 3, events, &Handle::current()).unwrap();

    peer.write_all(&100u32.to_le_bytes()).await.unwrap();

    match next(&mut rx).await {
        Event::Error(id, direction, kind) => {
            assert_eq!(id, 3);
            assert_eq!(direction, Direction::Read);
            assert_eq!(kind, io::ErrorKind::InvalidData);
        }
        other => panic!("unexpected {:?}", other),
    }
    assert!(matches!(next(&mut rx).await, Event::Disconnected(3)));
    assert_eq!(conn.state(), ConnectionState::Disconnected);
    expect_eof(&mut peer).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_frame_ahead_of_violation_is_delivered() {
    let conn = connection(64);
    let (ours, mut peer) = socket_pair().await;
    let (events, mut rx) = recorder();
    conn.init(ours, 9, events, &Handle::current()).unwrap();

    let mut wire = frame(7, b"");
    wire.extend_from_slice(&10_000u32.to_le_bytes());
    peer.write_all(&wire).await.unwrap();

    match next(&mut rx).await {
        Event::Message(9, msg) => assert_eq!(msg.header, 7),
        other => panic!("unexpected {:?}", other),
    }
    assert!(matches!(
        next(&mut rx).await,
        Event::Error(9, Direction::Read, io::ErrorKind::InvalidData)
    ));
    assert!(matches!(next(&mut rx).await, Event::Disconnected(9)));
}

// =============================================================================
// Send Tests
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_sends_arrive_in_call_order() {
    let conn = connection(1024);
    let (ours, mut peer) = socket_pair().await;
    let (events, _rx) = recorder();
    conn.init(ours, 1, events, &Handle::current()).unwrap();

    for i in 0..200u32 {
        assert!(conn.send(&Message {
            header: (i % 256) as u8,
            body: i.to_le_bytes().to_vec(),
        }));
    }

    let got = read_messages(&mut peer, 200).await;
    for (i, msg) in got.iter().enumerate() {
        assert_eq!(msg.body, (i as u32).to_le_bytes().to_vec());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_senders_keep_per_thread_order() {
    const THREADS: u8 = 4;
    const PER_THREAD: u32 = 200;

    let conn = connection(1024);
    let (ours, mut peer) = socket_pair().await;
    let (events, _rx) = recorder();
    conn.init(ours, 1, events, &Handle::current()).unwrap();

    let senders: Vec<_> = (0..THREADS)
        .map(|thread| {
            let conn = Arc::clone(&conn);
            std::thread::spawn(move || {
                for seq in 0..PER_THREAD {
                    assert!(conn.send(&Message {
                        header: thread,
                        body: seq.to_le_bytes().to_vec(),
                    }));
                }
            })
        })
        .collect();
    for sender in senders {
        sender.join().unwrap();
    }

    let got = read_messages(&mut peer, THREADS as usize * PER_THREAD as usize).await;
    let mut expected = vec![0u32; THREADS as usize];
    for msg in got {
        let seq = u32::from_le_bytes(msg.body[..4].try_into().unwrap());
        assert_eq!(seq, expected[msg.header as usize], "thread {} out of order", msg.header);
        expected[msg.header as usize] += 1;
    }
    assert!(expected.iter().all(|&n| n == PER_THREAD));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_oversized_send_is_refused() {
    let conn = connection(16);
    let (ours, _peer) = socket_pair().await;
    let (events, _rx) = recorder();
    conn.init(ours, 1, events, &Handle::current()).unwrap();

    let big = Message {
        header: 1,
        body: vec![0u8; 64],
    };
    assert!(!conn.send(&big));
    assert_eq!(conn.state(), ConnectionState::Connected);
}

// =============================================================================
// Close Tests
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_local_close_flushes_then_half_closes() {
    let conn = connection(1024);
    let (ours, mut peer) = socket_pair().await;
    let (events, mut rx) = recorder();
    conn.init(ours, 4, events, &Handle::current()).unwrap();

    assert!(conn.send(&Message::new(42)));
    assert!(conn.close());
    assert_eq!(conn.state(), ConnectionState::HalfClosed);
    assert!(!conn.send(&Message::new(43)));
    assert!(!conn.close());

    let got = read_messages(&mut peer, 1).await;
    assert_eq!(got[0].header, 42);
    expect_eof(&mut peer).await;

    // Still receiving while half-closed
    peer.write_all(&frame(8, b"late")).await.unwrap();
    match next(&mut rx).await {
        Event::Message(4, msg) => assert_eq!(msg.header, 8),
        other => panic!("unexpected {:?}", other),
    }

    drop(peer);
    assert!(matches!(next(&mut rx).await, Event::Disconnected(4)));
    assert_eq!(conn.state(), ConnectionState::Disconnected);
    assert!(timeout(Duration::from_millis(200), rx.recv()).await.is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_peer_close_is_answered_with_fin() {
    let conn = connection(1024);
    let (ours, mut peer) = socket_pair().await;
    let (events, mut rx) = recorder();
    conn.init(ours, 5, events, &Handle::current()).unwrap();

    peer.shutdown().await.unwrap();

    assert!(matches!(next(&mut rx).await, Event::Disconnected(5)));
    expect_eof(&mut peer).await;
    assert_eq!(conn.state(), ConnectionState::Disconnected);
}

// =============================================================================
// Lease Tests
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_attach_while_live_is_busy() {
    let conn = connection(1024);
    let (first, _peer1) = socket_pair().await;
    let (second, _peer2) = socket_pair().await;
    let (events, _rx) = recorder();

    conn.init(first, 1, Arc::clone(&events), &Handle::current()).unwrap();
    let result = conn.attach(second, 2, events, &Handle::current());
    assert!(matches!(result, Err(GamewireError::ConnectionBusy)));
    assert_eq!(conn.id(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_reset_then_reuse() {
    let conn = connection(1024);
    let (first, peer1) = socket_pair().await;
    let (events, mut rx) = recorder();
    conn.init(first, 1, Arc::clone(&events), &Handle::current()).unwrap();

    assert!(!conn.reset(), "reset must be refused while live");

    drop(peer1);
    assert!(matches!(next(&mut rx).await, Event::Disconnected(1)));
    assert!(conn.reset());
    assert_eq!(conn.id(), 0);
    assert_eq!(conn.state(), ConnectionState::None);
    assert!(!conn.has_events());

    let (second, mut peer2) = socket_pair().await;
    conn.init(second, 2, events, &Handle::current()).unwrap();
    peer2.write_all(&frame(6, b"again")).await.unwrap();

    match next(&mut rx).await {
        Event::Message(id, msg) => {
            assert_eq!(id, 2);
            assert_eq!(msg.header, 6);
        }
        other => panic!("unexpected {:?}", other),
    }
}
