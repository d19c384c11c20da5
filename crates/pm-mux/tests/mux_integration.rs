//! Multiplexer integration tests
//!
//! Runs multiplexers over in-memory duplex pipes. Tests that need to see or
//! forge individual frames drive one end of the pipe with a bare
//! `FrameCodec` instead of a second multiplexer.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::io::DuplexStream;
use tokio_util::codec::Framed;

use pm_core::config::MuxConfig;
use pm_core::{MuxError, Role, Stream, StreamError, StreamState};
use pm_mux::{IncomingStreams, Multiplexer, MuxStream};
use pm_protocol::{Frame, FrameCodec, FrameType, Headers, StreamId};

const TEST_TIMEOUT: Duration = Duration::from_secs(5);

type RawPeer = Framed<DuplexStream, FrameCodec>;

async fn within<F: Future>(fut: F) -> F::Output {
    tokio::time::timeout(TEST_TIMEOUT, fut)
        .await
        .expect("test step timed out")
}

/// Two multiplexers talking to each other
fn mux_pair() -> (
    (Multiplexer, IncomingStreams),
    (Multiplexer, IncomingStreams),
) {
    let (a, b) = tokio::io::duplex(64 * 1024);
    let client = Multiplexer::new(a, Role::Client, MuxConfig::default());
    let server = Multiplexer::new(b, Role::Server, MuxConfig::default());
    (client, server)
}

/// A multiplexer plus the raw frame stream of its peer
fn mux_with_raw_peer(role: Role, config: MuxConfig) -> (Multiplexer, IncomingStreams, RawPeer) {
    let (a, b) = tokio::io::duplex(64 * 1024);
    let (mux, incoming) = Multiplexer::new(a, role, config);
    (mux, incoming, Framed::new(b, FrameCodec::new()))
}

async fn next_frame(raw: &mut RawPeer) -> Frame {
    within(raw.next())
        .await
        .expect("transport closed")
        .expect("invalid frame")
}

async fn read_to_end(stream: &MuxStream) -> Result<Vec<u8>, StreamError> {
    let mut out = Vec::new();
    let mut buf = [0u8; 1024];
    loop {
        let n = within(stream.read(&mut buf)).await?;
        if n == 0 {
            return Ok(out);
        }
        out.extend_from_slice(&buf[..n]);
    }
}

async fn wait_for_buffered(stream: &MuxStream, expected: usize) {
    within(async {
        while stream.buffered() < expected {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
}

fn port_headers(port: &str) -> Headers {
    Headers::new().with("port", port)
}

#[tokio::test]
async fn test_open_and_exchange() {
    let ((client, _client_incoming), (_server, mut server_incoming)) = mux_pair();

    let local = client.open_stream(port_headers("8080")).await.unwrap();
    assert_eq!(local.id(), StreamId::new(1));

    let remote = within(server_incoming.accept()).await.unwrap();
    assert_eq!(remote.id(), StreamId::new(1));
    assert_eq!(remote.headers(), &port_headers("8080"));

    local.write_all(b"hello").await.unwrap();
    let mut buf = [0u8; 16];
    let n = within(remote.read(&mut buf)).await.unwrap();
    assert_eq!(&buf[..n], b"hello");

    remote.write_all(b"world").await.unwrap();
    let n = within(local.read(&mut buf)).await.unwrap();
    assert_eq!(&buf[..n], b"world");
}

#[tokio::test]
async fn test_no_cross_stream_leakage() {
    let ((client, _ci), (_server, mut server_incoming)) = mux_pair();

    let a = client
        .open_stream(Headers::new().with("name", "a"))
        .await
        .unwrap();
    let b = client
        .open_stream(Headers::new().with("name", "b"))
        .await
        .unwrap();

    let mut expected: HashMap<&str, Vec<u8>> = HashMap::new();
    for i in 0..50u8 {
        let chunk_a = vec![b'a', i];
        let chunk_b = vec![b'b', i, i];
        a.write_all(&chunk_a).await.unwrap();
        b.write_all(&chunk_b).await.unwrap();
        expected.entry("a").or_default().extend_from_slice(&chunk_a);
        expected.entry("b").or_default().extend_from_slice(&chunk_b);
    }
    a.close().await.unwrap();
    b.close().await.unwrap();

    for _ in 0..2 {
        let remote = within(server_incoming.accept()).await.unwrap();
        let name = remote.headers().get("name").unwrap().to_string();
        let received = read_to_end(&remote).await.unwrap();
        assert_eq!(received, expected[name.as_str()], "stream {}", name);
    }
}

#[tokio::test]
async fn test_end_to_end_scripted_peer() {
    let (_mux, mut incoming, mut raw) = mux_with_raw_peer(Role::Server, MuxConfig::default());

    let id = StreamId::new(1);
    raw.send(Frame::headers(id, &port_headers("8080")).unwrap())
        .await
        .unwrap();
    raw.send(Frame::data(id, Bytes::from_static(b"ping")))
        .await
        .unwrap();
    raw.send(Frame::close(id)).await.unwrap();

    let stream = within(incoming.accept()).await.unwrap();
    assert_eq!(stream.headers().get("port"), Some("8080"));

    let mut buf = [0u8; 16];
    let n = within(stream.read(&mut buf)).await.unwrap();
    assert_eq!(&buf[..n], b"ping");
    assert_eq!(within(stream.read(&mut buf)).await, Ok(0));
    assert_eq!(stream.state(), StreamState::RemoteClosed);
}

#[tokio::test]
async fn test_local_reset_discards_buffered_data() {
    let (mux, mut incoming, mut raw) = mux_with_raw_peer(Role::Server, MuxConfig::default());

    let id = StreamId::new(1);
    raw.send(Frame::headers(id, &Headers::new()).unwrap())
        .await
        .unwrap();
    raw.send(Frame::data(id, Bytes::from_static(b"secret")))
        .await
        .unwrap();

    let stream = within(incoming.accept()).await.unwrap();
    wait_for_buffered(&stream, 6).await;

    stream.reset().await.unwrap();
    stream.reset().await.unwrap();

    let mut buf = [0u8; 16];
    assert_eq!(stream.read(&mut buf).await, Err(StreamError::Reset));
    assert_eq!(stream.write(b"x").await, Err(StreamError::Reset));
    assert_eq!(stream.buffered(), 0);
    assert_eq!(mux.stream_count(), 0);

    // Exactly one Reset frame reaches the peer
    assert_eq!(next_frame(&mut raw).await, Frame::reset(id));
    raw.send(Frame::headers(StreamId::new(3), &Headers::new()).unwrap())
        .await
        .unwrap();
    let next = within(incoming.accept()).await.unwrap();
    assert_eq!(next.id(), StreamId::new(3));
}

#[tokio::test]
async fn test_remote_reset_discards_buffered_data() {
    let (_mux, mut incoming, mut raw) = mux_with_raw_peer(Role::Server, MuxConfig::default());

    let id = StreamId::new(1);
    raw.send(Frame::headers(id, &Headers::new()).unwrap())
        .await
        .unwrap();
    raw.send(Frame::data(id, Bytes::from_static(b"stale")))
        .await
        .unwrap();
    raw.send(Frame::reset(id)).await.unwrap();

    let stream = within(incoming.accept()).await.unwrap();
    within(async {
        while stream.state() != StreamState::Reset {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;

    let mut buf = [0u8; 16];
    assert_eq!(stream.read(&mut buf).await, Err(StreamError::Reset));
}

#[tokio::test]
async fn test_blocked_read_woken_by_reset() {
    let (_mux, mut incoming, mut raw) = mux_with_raw_peer(Role::Server, MuxConfig::default());

    let id = StreamId::new(1);
    raw.send(Frame::headers(id, &Headers::new()).unwrap())
        .await
        .unwrap();
    let stream = within(incoming.accept()).await.unwrap();

    let reader = tokio::spawn(async move {
        let mut buf = [0u8; 16];
        stream.read(&mut buf).await
    });

    tokio::time::sleep(Duration::from_millis(20)).await;
    raw.send(Frame::reset(id)).await.unwrap();

    let result = within(reader).await.unwrap();
    assert_eq!(result, Err(StreamError::Reset));
}

#[tokio::test]
async fn test_close_is_idempotent_on_the_wire() {
    let (mux, _incoming, mut raw) = mux_with_raw_peer(Role::Client, MuxConfig::default());

    let stream = mux.open_stream(Headers::new()).await.unwrap();
    let id = stream.id();
    assert_eq!(next_frame(&mut raw).await.frame_type, FrameType::Headers);

    stream.close().await.unwrap();
    stream.close().await.unwrap();
    assert_eq!(stream.state(), StreamState::LocalClosed);
    assert_eq!(stream.write(b"late").await, Err(StreamError::Closed));

    assert_eq!(next_frame(&mut raw).await, Frame::close(id));

    // The next frame on the wire belongs to a new stream, not a second Close
    let other = mux.open_stream(Headers::new()).await.unwrap();
    other.write_all(b"x").await.unwrap();
    let frame = next_frame(&mut raw).await;
    assert_eq!(frame.frame_type, FrameType::Headers);
    assert_eq!(frame.stream_id, other.id());
    assert_eq!(
        next_frame(&mut raw).await,
        Frame::data(other.id(), Bytes::from_static(b"x"))
    );
}

#[tokio::test]
async fn test_graceful_close_both_directions() {
    let ((client, _ci), (server, mut server_incoming)) = mux_pair();

    let local = client.open_stream(port_headers("22")).await.unwrap();
    local.write_all(b"request").await.unwrap();
    local.close().await.unwrap();

    let remote = within(server_incoming.accept()).await.unwrap();
    assert_eq!(read_to_end(&remote).await.unwrap(), b"request");
    assert_eq!(remote.state(), StreamState::RemoteClosed);

    remote.write_all(b"response").await.unwrap();
    remote.close().await.unwrap();
    assert_eq!(remote.state(), StreamState::Closed);

    assert_eq!(read_to_end(&local).await.unwrap(), b"response");
    assert_eq!(local.state(), StreamState::Closed);

    within(async {
        while client.stream_count() > 0 || server.stream_count() > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
}

#[tokio::test]
async fn test_stray_frame_for_unknown_stream_is_dropped() {
    let (mux, mut incoming, mut raw) = mux_with_raw_peer(Role::Server, MuxConfig::default());

    let id = StreamId::new(1);
    raw.send(Frame::headers(id, &Headers::new()).unwrap())
        .await
        .unwrap();
    raw.send(Frame::data(StreamId::new(999), Bytes::from_static(b"stray")))
        .await
        .unwrap();
    raw.send(Frame::close(StreamId::new(997))).await.unwrap();
    raw.send(Frame::reset(StreamId::new(995))).await.unwrap();
    raw.send(Frame::data(id, Bytes::from_static(b"ping")))
        .await
        .unwrap();

    let stream = within(incoming.accept()).await.unwrap();
    let mut buf = [0u8; 16];
    let n = within(stream.read(&mut buf)).await.unwrap();
    assert_eq!(&buf[..n], b"ping");

    stream.write_all(b"pong").await.unwrap();
    assert_eq!(
        next_frame(&mut raw).await,
        Frame::data(id, Bytes::from_static(b"pong"))
    );
    assert!(!mux.is_closed());
}

#[tokio::test]
async fn test_concurrent_open_gets_distinct_ids() {
    let ((client, _ci), (_server, _si)) = mux_pair();

    let handles: Vec<_> = (0..32)
        .map(|i| {
            let client = client.clone();
            tokio::spawn(async move {
                let stream = client
                    .open_stream(port_headers(&i.to_string()))
                    .await
                    .unwrap();
                let id = stream.id();
                // Keep the stream alive until every task has opened one
                (id, stream)
            })
        })
        .collect();

    let mut streams = Vec::new();
    let mut ids = HashSet::new();
    for handle in handles {
        let (id, stream) = within(handle).await.unwrap();
        assert!(id.is_client_initiated());
        assert!(ids.insert(id), "duplicate {}", id);
        streams.push(stream);
    }
    assert_eq!(ids.len(), 32);
    assert_eq!(client.stream_count(), 32);
}

#[tokio::test]
async fn test_both_sides_open_without_collision() {
    let ((client, mut client_incoming), (server, mut server_incoming)) = mux_pair();

    let from_client = client.open_stream(port_headers("1")).await.unwrap();
    let from_server = server.open_stream(port_headers("2")).await.unwrap();
    assert_ne!(from_client.id(), from_server.id());

    let at_server = within(server_incoming.accept()).await.unwrap();
    let at_client = within(client_incoming.accept()).await.unwrap();
    assert_eq!(at_server.id(), from_client.id());
    assert_eq!(at_client.id(), from_server.id());
}

#[tokio::test]
async fn test_transport_failure_resets_all_streams() {
    let (mux, _incoming, mut raw) = mux_with_raw_peer(Role::Client, MuxConfig::default());

    let mut streams = Vec::new();
    for port in ["1", "2", "3"] {
        streams.push(mux.open_stream(port_headers(port)).await.unwrap());
    }
    for _ in 0..3 {
        next_frame(&mut raw).await;
    }

    drop(raw);
    within(mux.closed()).await;

    let mut buf = [0u8; 8];
    for stream in &streams {
        assert_eq!(within(stream.read(&mut buf)).await, Err(StreamError::Reset));
        assert_eq!(stream.write(b"x").await, Err(StreamError::Reset));
    }
    assert_eq!(mux.stream_count(), 0);
    assert!(matches!(
        mux.open_stream(Headers::new()).await,
        Err(MuxError::ConnectionClosed)
    ));
}

#[tokio::test]
async fn test_incoming_ends_after_shutdown() {
    let ((_client, _ci), (server, mut server_incoming)) = mux_pair();

    server.shutdown();
    assert!(within(server_incoming.accept()).await.is_none());
    assert!(server.is_closed());
}

#[tokio::test]
async fn test_read_timeout_leaves_stream_usable() {
    let ((client, _ci), (_server, mut server_incoming)) = mux_pair();

    let local = client.open_stream(Headers::new()).await.unwrap();
    let remote = within(server_incoming.accept()).await.unwrap();

    let mut buf = [0u8; 8];
    assert_eq!(
        remote
            .read_timeout(&mut buf, Duration::from_millis(30))
            .await,
        Err(StreamError::Timeout)
    );
    assert_eq!(remote.state(), StreamState::Open);

    local.write_all(b"late").await.unwrap();
    let n = remote
        .read_timeout(&mut buf, TEST_TIMEOUT)
        .await
        .unwrap();
    assert_eq!(&buf[..n], b"late");
}

#[tokio::test]
async fn test_headers_on_open_stream_is_fatal() {
    let (mux, mut incoming, mut raw) = mux_with_raw_peer(Role::Server, MuxConfig::default());

    let id = StreamId::new(1);
    raw.send(Frame::headers(id, &Headers::new()).unwrap())
        .await
        .unwrap();
    let stream = within(incoming.accept()).await.unwrap();

    raw.send(Frame::headers(id, &port_headers("9")).unwrap())
        .await
        .unwrap();

    within(mux.closed()).await;
    let mut buf = [0u8; 8];
    assert_eq!(stream.read(&mut buf).await, Err(StreamError::Reset));
}

#[tokio::test]
async fn test_reused_peer_stream_id_is_fatal() {
    let (mux, mut incoming, mut raw) = mux_with_raw_peer(Role::Server, MuxConfig::default());

    let id = StreamId::new(1);
    raw.send(Frame::headers(id, &Headers::new()).unwrap())
        .await
        .unwrap();
    raw.send(Frame::reset(id)).await.unwrap();
    let old = within(incoming.accept()).await.unwrap();

    raw.send(Frame::headers(id, &Headers::new().with("gen", "2")).unwrap())
        .await
        .unwrap();

    within(mux.closed()).await;
    assert!(within(incoming.accept()).await.is_none());
    drop(old);
    assert_eq!(mux.stream_count(), 0);
}

#[tokio::test]
async fn test_peer_stream_in_own_range_is_fatal() {
    let (mux, mut incoming, mut raw) = mux_with_raw_peer(Role::Client, MuxConfig::default());

    raw.send(Frame::headers(StreamId::new(1), &Headers::new()).unwrap())
        .await
        .unwrap();

    within(mux.closed()).await;
    assert!(within(incoming.accept()).await.is_none());
}

#[tokio::test]
async fn test_dropping_reset_stream_keeps_later_streams_routed() {
    let (mux, mut incoming, mut raw) = mux_with_raw_peer(Role::Server, MuxConfig::default());

    raw.send(Frame::headers(StreamId::new(1), &Headers::new()).unwrap())
        .await
        .unwrap();
    raw.send(Frame::reset(StreamId::new(1))).await.unwrap();
    let old = within(incoming.accept()).await.unwrap();

    let id = StreamId::new(3);
    raw.send(Frame::headers(id, &Headers::new()).unwrap())
        .await
        .unwrap();
    let live = within(incoming.accept()).await.unwrap();
    drop(old);

    raw.send(Frame::data(id, Bytes::from_static(b"x")))
        .await
        .unwrap();
    let mut buf = [0u8; 4];
    let n = within(live.read(&mut buf)).await.unwrap();
    assert_eq!(&buf[..n], b"x");
    assert!(!mux.is_closed());
}

#[tokio::test]
async fn test_write_timeout_leaves_stream_usable() {
    let config = MuxConfig {
        outbound_queue: 1,
        ..Default::default()
    };
    let (a, b) = tokio::io::duplex(64);
    let (mux, _incoming) = Multiplexer::new(a, Role::Client, config);
    let mut raw = Framed::new(b, FrameCodec::new());

    let stream = mux.open_stream(Headers::new()).await.unwrap();
    let id = stream.id();

    // The peer is not reading, so the transport and the queue both fill up
    let big = vec![7u8; 64 * 1024];
    assert_eq!(
        stream
            .write_timeout(&big, Duration::from_millis(100))
            .await,
        Err(StreamError::Timeout)
    );
    assert_eq!(stream.state(), StreamState::Open);

    let drain = tokio::spawn(async move {
        while let Some(Ok(frame)) = raw.next().await {
            if frame == Frame::data(id, Bytes::from_static(b"after")) {
                return true;
            }
        }
        false
    });

    within(stream.write_all(b"after")).await.unwrap();
    assert!(within(drain).await.unwrap());
    assert_eq!(stream.state(), StreamState::Open);
}

#[tokio::test]
async fn test_unknown_frame_type_is_fatal() {
    use tokio::io::AsyncWriteExt;

    let (a, mut b) = tokio::io::duplex(1024);
    let (mux, _incoming) = Multiplexer::new(a, Role::Server, MuxConfig::default());

    b.write_all(&[0, 0, 0, 1, 0x09, 0, 0, 0]).await.unwrap();
    within(mux.closed()).await;
}

#[tokio::test]
async fn test_write_is_split_into_frames() {
    let config = MuxConfig {
        max_frame_payload: 4,
        ..Default::default()
    };
    let (mux, _incoming, mut raw) = mux_with_raw_peer(Role::Client, config);

    let stream = mux.open_stream(Headers::new()).await.unwrap();
    next_frame(&mut raw).await;

    assert_eq!(stream.write(b"0123456789").await, Ok(10));

    let mut payloads = Vec::new();
    for _ in 0..3 {
        let frame = next_frame(&mut raw).await;
        assert_eq!(frame.frame_type, FrameType::Data);
        payloads.push(frame.payload);
    }
    assert_eq!(
        payloads,
        vec![
            Bytes::from_static(b"0123"),
            Bytes::from_static(b"4567"),
            Bytes::from_static(b"89"),
        ]
    );
    assert_eq!(stream.write(b"").await, Ok(0));
}

#[tokio::test]
async fn test_dropping_open_stream_resets_it() {
    let (mux, _incoming, mut raw) = mux_with_raw_peer(Role::Client, MuxConfig::default());

    let stream = mux.open_stream(Headers::new()).await.unwrap();
    let id = stream.id();
    next_frame(&mut raw).await;

    drop(stream);
    assert_eq!(next_frame(&mut raw).await, Frame::reset(id));
    assert_eq!(mux.stream_count(), 0);
}

#[tokio::test]
async fn test_stream_refused_without_acceptor() {
    let (_mux, incoming, mut raw) = mux_with_raw_peer(Role::Server, MuxConfig::default());
    drop(incoming);

    let id = StreamId::new(1);
    raw.send(Frame::headers(id, &Headers::new()).unwrap())
        .await
        .unwrap();
    assert_eq!(next_frame(&mut raw).await, Frame::reset(id));
}

#[tokio::test]
async fn test_shutdown_flushes_queued_frames() {
    let (mux, _incoming, mut raw) = mux_with_raw_peer(Role::Client, MuxConfig::default());

    let stream = mux.open_stream(Headers::new()).await.unwrap();
    stream.write_all(b"bye").await.unwrap();
    mux.shutdown();

    assert_eq!(next_frame(&mut raw).await.frame_type, FrameType::Headers);
    assert_eq!(
        next_frame(&mut raw).await,
        Frame::data(stream.id(), Bytes::from_static(b"bye"))
    );
    assert!(within(raw.next()).await.is_none());
    assert_eq!(stream.state(), StreamState::Reset);
}
