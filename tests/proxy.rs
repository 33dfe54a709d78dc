//! End-to-end scenarios exercising SNI routing, the default-route
//! fallback, the no-route and malformed-record alert paths, and the
//! half-close drain, each driving a real `Session` against real loopback
//! sockets: a shared `harness` module, `TcpListener`/`TcpStream` on
//! `127.0.0.1`, `#[tokio::test]`.


use std::rc::Rc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::LocalSet;

use harness::{client_hello, config_with, read_to_eof, spawn_echo_backend, FATAL_HANDSHAKE_ALERT};
use sni_proxy::dispatch::Dispatcher;
use sni_proxy::session::Session;

const BUFFER_LEN: usize = 16384;

/// Scenario 1: an exact SNI match routes to its backend, and both the
/// ClientHello and subsequent bytes are forwarded verbatim in both
/// directions.
#[tokio::test]
async fn sni_route_forwards_hello_and_subsequent_bytes() {
    let local = LocalSet::new();
    local
        .run_until(async {
            let backend_addr = spawn_echo_backend().await;
            let cfg = config_with(&[("example.com", backend_addr)], BUFFER_LEN);
            let dispatcher = Rc::new(Dispatcher::new(&cfg));

            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let proxy_addr = listener.local_addr().unwrap();

            let hello = client_hello(Some("example.com"));
            let hello_for_client = hello.clone();
            let client_task = tokio::task::spawn_local(async move {
                let mut client = TcpStream::connect(proxy_addr).await.unwrap();
                client.write_all(&hello_for_client).await.unwrap();
                client.write_all(b"hello after handshake").await.unwrap();

                let mut echoed = vec![0u8; hello_for_client.len() + b"hello after handshake".len()];
                client.read_exact(&mut echoed).await.unwrap();
                client.shutdown().await.unwrap();
                echoed
            });

            let (client_sock, peer) = listener.accept().await.unwrap();
            Session::new(client_sock, peer, BUFFER_LEN, dispatcher).run().await;

            let echoed = client_task.await.unwrap();
            assert_eq!(&echoed[..hello.len()], hello.as_slice());
            assert_eq!(&echoed[hello.len()..], b"hello after handshake");
        })
        .await;
}

/// Scenario 2: an unrecognized host falls back to the `"default"` entry.
#[tokio::test]
async fn default_route_used_when_no_exact_match() {
    let local = LocalSet::new();
    local
        .run_until(async {
            let backend_addr = spawn_echo_backend().await;
            let cfg = config_with(&[("default", backend_addr)], BUFFER_LEN);
            let dispatcher = Rc::new(Dispatcher::new(&cfg));

            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let proxy_addr = listener.local_addr().unwrap();

            let hello = client_hello(Some("other.test"));
            let hello_for_client = hello.clone();
            let client_task = tokio::task::spawn_local(async move {
                let mut client = TcpStream::connect(proxy_addr).await.unwrap();
                client.write_all(&hello_for_client).await.unwrap();
                let mut echoed = vec![0u8; hello_for_client.len()];
                client.read_exact(&mut echoed).await.unwrap();
                client.shutdown().await.unwrap();
                echoed
            });

            let (client_sock, peer) = listener.accept().await.unwrap();
            Session::new(client_sock, peer, BUFFER_LEN, dispatcher).run().await;

            let echoed = client_task.await.unwrap();
            assert_eq!(echoed, hello);
        })
        .await;
}

/// Scenario 3: no exact match and no `"default"` emits the fatal alert and
/// never dials a backend.
#[tokio::test]
async fn no_route_emits_alert_and_does_not_connect() {
    let local = LocalSet::new();
    local
        .run_until(async {
            let cfg = config_with(&[("example.com", "127.0.0.1:1".parse().unwrap())], BUFFER_LEN);
            let dispatcher = Rc::new(Dispatcher::new(&cfg));

            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let proxy_addr = listener.local_addr().unwrap();

            let client_task = tokio::task::spawn_local(async move {
                let mut client = TcpStream::connect(proxy_addr).await.unwrap();
                client.write_all(&client_hello(Some("absent.test"))).await.unwrap();
                read_to_eof(&mut client, 64).await
            });

            let (client_sock, peer) = listener.accept().await.unwrap();
            Session::new(client_sock, peer, BUFFER_LEN, dispatcher).run().await;

            let received = client_task.await.unwrap();
            assert_eq!(received, FATAL_HANDSHAKE_ALERT);
        })
        .await;
}

/// Scenario 4: a record that fails the handshake parse (here, a non-22
/// content type) emits the same alert, echoing the record's legacy version.
#[tokio::test]
async fn malformed_record_emits_alert() {
    let local = LocalSet::new();
    local
        .run_until(async {
            let cfg = config_with(&[], BUFFER_LEN);
            let dispatcher = Rc::new(Dispatcher::new(&cfg));

            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let proxy_addr = listener.local_addr().unwrap();

            let client_task = tokio::task::spawn_local(async move {
                let mut record = client_hello(Some("example.com"));
                record[0] = 0x17; // application_data, not a handshake record
                let mut client = TcpStream::connect(proxy_addr).await.unwrap();
                client.write_all(&record).await.unwrap();
                read_to_eof(&mut client, 64).await
            });

            let (client_sock, peer) = listener.accept().await.unwrap();
            Session::new(client_sock, peer, BUFFER_LEN, dispatcher).run().await;

            let received = client_task.await.unwrap();
            assert_eq!(received, FATAL_HANDSHAKE_ALERT);
        })
        .await;
}

/// Scenario 5: once the backend half-closes with buffered bytes still in
/// `bk2cl`, those bytes are flushed to the client before the session ends,
/// even though the client never writes anything further.
#[tokio::test]
async fn half_close_drain_flushes_buffered_bytes_before_closing() {
    let local = LocalSet::new();
    local
        .run_until(async {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let backend_listener_addr = listener.local_addr().unwrap();
            let backend_task = tokio::spawn(async move {
                let (mut backend, _) = listener.accept().await.unwrap();
                let mut hello_echo = vec![0u8; 1024];
                // Drain whatever the proxy forwarded (the ClientHello) before
                // sending our own payload and closing.
                let n = backend.read(&mut hello_echo).await.unwrap();
                let _ = n;
                backend.write_all(&[0xABu8; 100]).await.unwrap();
                backend.shutdown().await.unwrap();
            });

            let cfg = config_with(&[("drain.test", backend_listener_addr)], BUFFER_LEN);
            let dispatcher = Rc::new(Dispatcher::new(&cfg));

            let proxy_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let proxy_addr = proxy_listener.local_addr().unwrap();

            let client_task = tokio::task::spawn_local(async move {
                let mut client = TcpStream::connect(proxy_addr).await.unwrap();
                client.write_all(&client_hello(Some("drain.test"))).await.unwrap();
                read_to_eof(&mut client, 100).await
            });

            let (client_sock, peer) = proxy_listener.accept().await.unwrap();
            let session_fut = Session::new(client_sock, peer, BUFFER_LEN, dispatcher).run();

            let (received, _) = tokio::join!(
                async {
                    let r = client_task.await.unwrap();
                    r
                },
                session_fut,
            );

            backend_task.await.unwrap();
            assert_eq!(received, vec![0xABu8; 100]);
        })
        .await;
}
