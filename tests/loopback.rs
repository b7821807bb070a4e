//! End-to-end tests over real loopback TCP.
//!
//! These drive a live listener with live endpoints: framing, dispatch,
//! concurrency, shutdown contracts, and the callback bridge.

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::AsyncWriteExt;

use loopwire::bridge::{fire_callback, CallbackHost, CallbackToken};
use loopwire::protocol::FrameHeader;
use loopwire::{Endpoint, EndpointConfig, Listener, LoopwireError, OpError};

/// Deterministic echo transform: XOR every payload byte with 0x5A.
const OP_XOR: i32 = 1;
/// Registers a callback token and fires the callback before returning.
const OP_REGISTER_CB: i32 = 2;
/// Served by the caller's ephemeral callback host.
const OP_CB: i32 = 7;

const XOR_MASK: u8 = 0x5A;

async fn xor_listener() -> Listener {
    Listener::builder()
        .operation(OP_XOR, |mut payload: BytesMut| async move {
            payload.iter_mut().for_each(|b| *b ^= XOR_MASK);
            Ok(payload)
        })
        .bind(0)
        .await
        .unwrap()
}

fn bounded_connect(deadline: Duration) -> EndpointConfig {
    EndpointConfig {
        retry_interval: Duration::from_millis(50),
        connect_deadline: Some(deadline),
        ..EndpointConfig::default()
    }
}

#[tokio::test]
async fn test_echo_transform_across_payload_lengths() {
    let listener = xor_listener().await;
    let mut endpoint = Endpoint::connect(listener.local_port()).await.unwrap();

    for len in [0usize, 1, 4096, 16 * 1024 * 1024] {
        let mut payload = BytesMut::zeroed(len);
        for (i, b) in payload.iter_mut().enumerate() {
            *b = i as u8;
        }
        let expected: Vec<u8> = payload.iter().map(|b| b ^ XOR_MASK).collect();

        endpoint.invoke(OP_XOR, &mut payload).await.unwrap();

        assert_eq!(payload.len(), len);
        assert!(payload[..] == expected[..], "mismatch at len {len}");
    }

    endpoint.close().await.unwrap();
    listener.close().await.unwrap();
}

#[tokio::test]
async fn test_unregistered_operation_leaves_session_usable() {
    let listener = xor_listener().await;
    let mut endpoint = Endpoint::connect(listener.local_port()).await.unwrap();

    // Unregistered id: distinguished failure, request payload echoed back.
    let mut payload = BytesMut::from(&b"abc"[..]);
    let err = endpoint.invoke(OP_XOR + 98, &mut payload).await.unwrap_err();
    assert!(err.is_no_handler(), "unexpected error: {err}");
    assert_eq!(&payload[..], b"abc");

    // The reserved id 0 takes the same path.
    let mut payload = BytesMut::new();
    let err = endpoint.invoke(0, &mut payload).await.unwrap_err();
    assert!(err.is_no_handler());

    // Same connection still serves a valid call.
    let mut payload = BytesMut::from(&b"abc"[..]);
    endpoint.invoke(OP_XOR, &mut payload).await.unwrap();
    assert_eq!(&payload[..], &[b'a' ^ XOR_MASK, b'b' ^ XOR_MASK, b'c' ^ XOR_MASK]);

    endpoint.close().await.unwrap();
    listener.close().await.unwrap();
}

#[tokio::test]
async fn test_ephemeral_port_is_reachable() {
    let listener = xor_listener().await;
    let port = listener.local_port();
    assert_ne!(port, 0);

    let endpoint = Endpoint::connect_with(port, bounded_connect(Duration::from_secs(2)))
        .await
        .unwrap();
    endpoint.close().await.unwrap();
    listener.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_endpoints_see_their_own_responses() {
    let listener = xor_listener().await;
    let port = listener.local_port();

    let mut tasks = tokio::task::JoinSet::new();
    for client in 0..50u32 {
        tasks.spawn(async move {
            let mut endpoint = Endpoint::connect(port).await.unwrap();
            for seq in 0..100u32 {
                let mut payload = BytesMut::new();
                payload.extend_from_slice(&client.to_be_bytes());
                payload.extend_from_slice(&seq.to_be_bytes());
                let expected: Vec<u8> = payload.iter().map(|b| b ^ XOR_MASK).collect();

                endpoint.invoke(OP_XOR, &mut payload).await.unwrap();
                assert_eq!(&payload[..], &expected[..], "client {client} seq {seq}");
            }
            endpoint.close().await.unwrap();
        });
    }
    while let Some(result) = tasks.join_next().await {
        result.unwrap();
    }

    listener.close().await.unwrap();
}

#[tokio::test]
async fn test_close_stops_accepting_but_keeps_sessions() {
    let listener = xor_listener().await;
    let port = listener.local_port();

    let mut endpoint = Endpoint::connect(port).await.unwrap();
    let mut payload = BytesMut::from(&b"hi"[..]);
    endpoint.invoke(OP_XOR, &mut payload).await.unwrap();

    listener.close().await.unwrap();

    // New connections are refused until the bounded retry gives up.
    let err = Endpoint::connect_with(port, bounded_connect(Duration::from_millis(300)))
        .await
        .unwrap_err();
    assert!(matches!(err, LoopwireError::ConnectTimeout { .. }));

    // The already-accepted session keeps serving.
    let mut payload = BytesMut::from(&b"still alive"[..]);
    let expected: Vec<u8> = payload.iter().map(|b| b ^ XOR_MASK).collect();
    endpoint.invoke(OP_XOR, &mut payload).await.unwrap();
    assert_eq!(&payload[..], &expected[..]);

    endpoint.close().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_drains_idle_session() {
    let listener = xor_listener().await;
    let port = listener.local_port();

    let mut endpoint = Endpoint::connect(port).await.unwrap();
    let mut payload = BytesMut::from(&b"x"[..]);
    endpoint.invoke(OP_XOR, &mut payload).await.unwrap();

    // The session sits idle in its read; the drain deadline expires and
    // the session is cancelled rather than awaited forever.
    let started = std::time::Instant::now();
    listener.shutdown(Duration::from_millis(100)).await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(2));

    // The cancelled session dropped the connection.
    let mut payload = BytesMut::from(&b"y"[..]);
    assert!(endpoint.invoke(OP_XOR, &mut payload).await.is_err());
}

#[tokio::test]
async fn test_callback_end_to_end() {
    // Responder: decodes the token, fires the callback with value 1
    // while the original invoke is still in flight, then responds.
    let responder = Listener::builder()
        .operation(OP_REGISTER_CB, |payload: BytesMut| async move {
            let (token, value) =
                CallbackToken::decode(&payload).map_err(|_| OpError::new(-2))?;
            let value_bytes: [u8; 4] = value.try_into().map_err(|_| OpError::new(-3))?;
            if u32::from_be_bytes(value_bytes) != 12345 {
                return Err(OpError::new(-4));
            }
            fire_callback(&token, OP_CB, &1u32.to_be_bytes())
                .await
                .map_err(|_| OpError::new(-5))?;
            Ok(payload)
        })
        .bind(0)
        .await
        .unwrap();

    // Caller: ephemeral host around the local callback function.
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let host = CallbackHost::open(OP_CB, move |value: &[u8], cookie: &[u8]| {
        tx.send((value.to_vec(), cookie.to_vec()))
            .map_err(|_| OpError::new(-9))?;
        Ok(())
    })
    .await
    .unwrap();

    let token = host.token(Bytes::from_static(&[0xBE, 0xEF]));
    let mut payload = token.encode(&12345u32.to_be_bytes()).unwrap();

    let mut endpoint = Endpoint::connect(responder.local_port()).await.unwrap();
    endpoint.invoke(OP_REGISTER_CB, &mut payload).await.unwrap();

    // The handler only returned after the reverse leg completed.
    let (value, cookie) = rx.recv().await.unwrap();
    assert_eq!(value, 1u32.to_be_bytes().to_vec());
    assert_eq!(cookie, vec![0xBE, 0xEF]);

    endpoint.close().await.unwrap();
    host.close().await.unwrap();
    responder.close().await.unwrap();
}

#[tokio::test]
async fn test_truncated_frame_kills_session_not_listener() {
    let listener = xor_listener().await;
    let port = listener.local_port();

    // A raw peer declares 100 payload bytes, sends 40, and goes away.
    let mut raw = tokio::net::TcpStream::connect(("127.0.0.1", port))
        .await
        .unwrap();
    let header = FrameHeader::request(OP_XOR, 100);
    raw.write_all(&header.encode()).await.unwrap();
    raw.write_all(&[0xAB; 40]).await.unwrap();
    raw.shutdown().await.unwrap();
    drop(raw);

    // That session died with a logged short-transfer; the listener keeps
    // serving fresh connections.
    let mut endpoint = Endpoint::connect(port).await.unwrap();
    let mut payload = BytesMut::from(&b"ok"[..]);
    endpoint.invoke(OP_XOR, &mut payload).await.unwrap();
    assert_eq!(&payload[..], &[b'o' ^ XOR_MASK, b'k' ^ XOR_MASK]);

    endpoint.close().await.unwrap();
    listener.close().await.unwrap();
}

#[tokio::test]
async fn test_session_limit_refuses_excess_connections() {
    let listener = Listener::builder()
        .operation(OP_XOR, |mut payload: BytesMut| async move {
            payload.iter_mut().for_each(|b| *b ^= XOR_MASK);
            Ok(payload)
        })
        .max_sessions(1)
        .bind(0)
        .await
        .unwrap();
    let port = listener.local_port();

    let mut first = Endpoint::connect(port).await.unwrap();
    let mut payload = BytesMut::from(&b"a"[..]);
    first.invoke(OP_XOR, &mut payload).await.unwrap();

    // Second connection is accepted at the TCP level and immediately
    // dropped by the admission gate.
    let mut second = Endpoint::connect(port).await.unwrap();
    let mut payload = BytesMut::from(&b"b"[..]);
    assert!(second.invoke(OP_XOR, &mut payload).await.is_err());

    // Ending the first session frees its slot.
    first.close().await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let mut third = Endpoint::connect(port).await.unwrap();
    let mut payload = BytesMut::from(&b"c"[..]);
    third.invoke(OP_XOR, &mut payload).await.unwrap();

    third.close().await.unwrap();
    listener.close().await.unwrap();
}
