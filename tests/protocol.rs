//! End-to-end scenarios driving a `Modem` over a loopback transport, with
//! real `TcpStream`s standing in for firmware clients on the TCP side. Unit
//! tests inside `src/` cover pure parsing logic; these cover the ordering
//! and interleaving guarantees that only a live bridge can exercise.

use std::sync::Arc;
use std::time::Duration;

use esp_at_sim::config::Config;
use esp_at_sim::engine::BOOT_BANNER;
use esp_at_sim::modem::Modem;
use esp_at_sim::transport::{LoopbackPeer, Transport};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

struct Harness {
    handle: tokio::task::JoinHandle<()>,
    peer: LoopbackPeer,
    stop: tokio::sync::oneshot::Sender<()>,
}

impl Harness {
    async fn start() -> Self {
        let (transport, peer) = Transport::loopback();
        let modem = Modem::new(transport, Arc::new(Config::default()));
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel();
        let handle = tokio::spawn(async move {
            modem
                .run(async {
                    let _ = stop_rx.await;
                })
                .await;
        });
        Self {
            handle,
            peer,
            stop: stop_tx,
        }
    }

    async fn send(&mut self, line: &str) {
        self.peer.send(line.as_bytes()).await;
    }

    async fn expect(&mut self, want: &str) {
        let got = self.peer.recv().await;
        assert_eq!(got, want.as_bytes());
    }

    async fn stop(self) {
        let _ = self.stop.send(());
        let _ = self.handle.await;
    }
}

/// A. Plain AT.
#[tokio::test]
async fn plain_at() {
    let mut h = Harness::start().await;
    h.send("AT\r\n").await;
    h.expect("\r\n\r\nOK\r\n").await;
    h.stop().await;
}

/// B. Mode set then queried back.
#[tokio::test]
async fn mode_then_list() {
    let mut h = Harness::start().await;
    h.send("AT+CWMODE=1\r\n").await;
    h.expect("\r\n\r\nOK\r\n").await;
    h.send("AT+CWMODE?\r\n").await;
    h.expect("\r\n+CWMODE:1\r\n\r\nOK\r\n").await;
    h.stop().await;
}

/// C. Server start, a client connects, sends data, and the host reads it
/// back through `CIPRECVLEN?`/`CIPRECVDATA`.
#[tokio::test]
async fn server_start_and_echo() {
    let port = 19_101;
    let mut h = Harness::start().await;

    h.send("AT+CIPMUX=1\r\n").await;
    h.expect("\r\n\r\nOK\r\n").await;
    h.send(&format!("AT+CIPSERVER=1,{port}\r\n")).await;
    h.expect("OK\r\n").await;

    let mut client = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    h.expect("0,CONNECT\r\n\r\n").await;

    client.write_all(b"hi").await.unwrap();
    h.expect("+IPD,0,2\r\n").await;

    h.send("AT+CIPRECVLEN?\r\n").await;
    h.expect("\r\n+CIPRECVLEN:2,0,0,0,0\r\n\r\nOK\r\n").await;

    h.send("AT+CIPRECVDATA=0,10\r\n").await;
    h.expect("\r\n\r\n+CIPRECVDATA,2:hi\r\n\r\nOK\r\n").await;

    drop(client);
    h.stop().await;
}

/// D. Raw-mode send path: arm, feed the payload, confirm the TCP peer
/// actually receives the bytes.
#[tokio::test]
async fn send_path_delivers_bytes_to_peer() {
    let port = 19_102;
    let mut h = Harness::start().await;

    h.send("AT+CIPMUX=1\r\n").await;
    h.expect("\r\n\r\nOK\r\n").await;
    h.send(&format!("AT+CIPSERVER=1,{port}\r\n")).await;
    h.expect("OK\r\n").await;

    let mut client = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    h.expect("0,CONNECT\r\n\r\n").await;

    h.send("AT+CIPSEND=0,5\r\n").await;
    h.expect("\r\n\r\nOK\r\n> ").await;

    h.send("hello").await;
    h.expect("\r\nRecv 5 bytes\r\n\r\nSEND OK\r\n").await;

    let mut buf = [0u8; 5];
    client.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"hello");

    drop(client);
    h.stop().await;
}

/// E. Oversized `CIPSEND` is truncated to the configured cap, not the
/// requested size.
#[tokio::test]
async fn oversized_send_is_truncated_to_configured_max() {
    let port = 19_103;
    let mut h = Harness::start().await;

    h.send("AT+CIPMUX=1\r\n").await;
    h.expect("\r\n\r\nOK\r\n").await;
    h.send(&format!("AT+CIPSERVER=1,{port}\r\n")).await;
    h.expect("OK\r\n").await;

    let client = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    h.expect("0,CONNECT\r\n\r\n").await;

    h.send("AT+CIPSEND=0,3000\r\n").await;
    h.expect("\r\n\r\nOK\r\n> ").await;

    let payload = vec![b'x'; 2048];
    h.send(std::str::from_utf8(&payload).unwrap()).await;
    h.expect("\r\nRecv 2048 bytes\r\n\r\nSEND OK\r\n").await;

    drop(client);
    h.stop().await;
}

/// F. Reset replies immediately, then the boot banner follows later, and
/// configuration set before the reset does not survive it.
#[tokio::test]
async fn reset_then_boot_banner_then_fresh_defaults() {
    let mut h = Harness::start().await;

    h.send("AT+CWMODE=0\r\n").await;
    h.expect("\r\n\r\nOK\r\n").await;

    h.send("AT+RST\r\n").await;
    h.expect("\r\n\r\nOK\r\n").await;

    let banner = h.peer.recv_at_least(BOOT_BANNER.len()).await;
    assert_eq!(banner, BOOT_BANNER.as_bytes());

    h.send("AT+CWMODE?\r\n").await;
    h.expect("\r\n+CWMODE:1\r\n\r\nOK\r\n").await;

    h.stop().await;
}

/// G. Connection cap: a fifth client is refused once the four-slot table
/// is full.
#[tokio::test]
async fn connection_cap_admits_four_and_rejects_the_fifth() {
    let port = 19_104;
    let mut h = Harness::start().await;

    h.send("AT+CIPMUX=1\r\n").await;
    h.expect("\r\n\r\nOK\r\n").await;
    h.send(&format!("AT+CIPSERVER=1,{port}\r\n")).await;
    h.expect("OK\r\n").await;

    let mut clients = Vec::new();
    for id in 0..4 {
        let client = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        h.expect(&format!("{id},CONNECT\r\n\r\n")).await;
        clients.push(client);
    }

    let mut fifth = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    let mut buf = [0u8; 1];
    let n = tokio::time::timeout(Duration::from_millis(500), fifth.read(&mut buf))
        .await
        .expect("fifth client should be closed promptly")
        .unwrap();
    assert_eq!(n, 0, "fifth client should see EOF, not data");

    drop(clients);
    h.stop().await;
}
