//! End-to-end tests: a real listener, real SOCKS clients, real destinations,
//! all on the loopback interface.

// @@ begin test lint list @@
#![allow(clippy::bool_assert_comparison)]
#![allow(clippy::clone_on_copy)]
#![allow(clippy::dbg_macro)]
#![allow(clippy::mixed_attributes_style)]
#![allow(clippy::print_stderr)]
#![allow(clippy::print_stdout)]
#![allow(clippy::single_char_pattern)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::useless_vec)]
#![allow(clippy::needless_pass_by_value)]
//! <!-- @@ end test lint list @@ -->

use hex_literal::hex;
use std::net::{SocketAddr, SocketAddrV4};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use socksrelay::SessionConfig;

/// Start a proxy on an ephemeral loopback port; return its address.
async fn start_proxy() -> SocketAddr {
    start_proxy_with(SessionConfig::new(
        Duration::from_secs(5),
        Duration::from_secs(5),
    ))
    .await
}

/// As [`start_proxy`], with the given session settings.
async fn start_proxy_with(session: SessionConfig) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(socksrelay::serve(listener, session));
    addr
}

/// Start a destination that echoes everything back until its peer closes.
async fn start_echo() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let (mut s, _) = listener.accept().await.unwrap();
            tokio::spawn(async move {
                let (mut r, mut w) = s.split();
                let _ = tokio::io::copy(&mut r, &mut w).await;
            });
        }
    });
    addr
}

/// Connect to the proxy and finish the greeting.
async fn greet(proxy: SocketAddr) -> TcpStream {
    let mut s = TcpStream::connect(proxy).await.unwrap();
    s.write_all(&hex!("05 01 00")).await.unwrap();
    let mut sel = [0_u8; 2];
    s.read_exact(&mut sel).await.unwrap();
    assert_eq!(sel, hex!("05 00"));
    s
}

/// Send a CONNECT request for an IPv4 target.
async fn request_ipv4(s: &mut TcpStream, target: SocketAddr) {
    let SocketAddr::V4(target) = target else {
        panic!("not ipv4");
    };
    let mut req = hex!("05 01 00 01").to_vec();
    req.extend_from_slice(&target.ip().octets());
    req.extend_from_slice(&target.port().to_be_bytes());
    s.write_all(&req).await.unwrap();
}

/// Read a 10-byte reply.
async fn read_reply(s: &mut TcpStream) -> [u8; 10] {
    let mut reply = [0_u8; 10];
    s.read_exact(&mut reply).await.unwrap();
    reply
}

/// Read until end of stream, and return what was read.
async fn read_rest(s: &mut TcpStream) -> Vec<u8> {
    let mut rest = Vec::new();
    tokio::time::timeout(Duration::from_secs(10), s.read_to_end(&mut rest))
        .await
        .unwrap()
        .unwrap();
    rest
}

#[tokio::test]
async fn connect_and_echo() {
    let proxy = start_proxy().await;
    let echo = start_echo().await;

    let mut s = greet(proxy).await;
    request_ipv4(&mut s, echo).await;
    let reply = read_reply(&mut s).await;
    assert_eq!(reply[..4], hex!("05 00 00 01"));
    let bound = SocketAddrV4::new(
        [reply[4], reply[5], reply[6], reply[7]].into(),
        u16::from_be_bytes([reply[8], reply[9]]),
    );
    assert_eq!(bound.ip(), &std::net::Ipv4Addr::LOCALHOST);
    assert_ne!(bound.port(), 0);

    s.write_all(b"hello, world").await.unwrap();
    let mut buf = [0_u8; 12];
    s.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"hello, world");
}

#[tokio::test]
async fn bound_address_is_proxy_side_of_destination() {
    let proxy = start_proxy().await;
    let dest = TcpListener::bind("127.0.0.1:0").await.unwrap();

    let mut s = greet(proxy).await;
    request_ipv4(&mut s, dest.local_addr().unwrap()).await;
    let (_conn, from) = dest.accept().await.unwrap();
    let reply = read_reply(&mut s).await;

    let mut expected = hex!("05 00 00 01").to_vec();
    let SocketAddr::V4(from) = from else {
        panic!("not ipv4");
    };
    expected.extend_from_slice(&from.ip().octets());
    expected.extend_from_slice(&from.port().to_be_bytes());
    assert_eq!(reply.to_vec(), expected);
}

#[tokio::test]
async fn hostname_target() {
    let proxy = start_proxy().await;
    let echo = start_echo().await;

    let mut s = greet(proxy).await;
    let mut req = hex!("05 01 00 03 09").to_vec();
    req.extend_from_slice(b"localhost");
    req.extend_from_slice(&echo.port().to_be_bytes());
    s.write_all(&req).await.unwrap();
    let reply = read_reply(&mut s).await;
    assert_eq!(reply[..2], hex!("05 00"));

    s.write_all(b"ping").await.unwrap();
    let mut buf = [0_u8; 4];
    s.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"ping");
}

#[tokio::test]
async fn bind_rejected() {
    let proxy = start_proxy().await;
    let mut s = greet(proxy).await;
    // Only the header: the command is refused before the address is read.
    s.write_all(&hex!("05 02 00 01")).await.unwrap();
    assert_eq!(read_reply(&mut s).await, hex!("05 07 00 01 00000000 0000"));
    assert!(read_rest(&mut s).await.is_empty());
}

#[tokio::test]
async fn udp_associate_rejected() {
    let proxy = start_proxy().await;
    let mut s = greet(proxy).await;
    s.write_all(&hex!("05 03 00 01")).await.unwrap();
    assert_eq!(read_reply(&mut s).await, hex!("05 07 00 01 00000000 0000"));
}

#[tokio::test]
async fn ipv6_rejected() {
    let proxy = start_proxy().await;
    let mut s = greet(proxy).await;
    // Only the header: the proxy must not wait for the 16 address bytes.
    s.write_all(&hex!("05 01 00 04")).await.unwrap();
    assert_eq!(read_reply(&mut s).await, hex!("05 08 00 01 00000000 0000"));
    assert!(read_rest(&mut s).await.is_empty());
}

#[tokio::test]
async fn refused_destination() {
    let closed = {
        let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
        l.local_addr().unwrap()
    };
    let proxy = start_proxy().await;
    let mut s = greet(proxy).await;
    request_ipv4(&mut s, closed).await;
    assert_eq!(read_reply(&mut s).await, hex!("05 05 00 01 00000000 0000"));
    assert!(read_rest(&mut s).await.is_empty());
}

#[tokio::test]
async fn bad_version_closed_without_reply() {
    let proxy = start_proxy().await;
    let mut s = TcpStream::connect(proxy).await.unwrap();
    s.write_all(&hex!("04 01")).await.unwrap();
    assert!(read_rest(&mut s).await.is_empty());
}

#[tokio::test]
async fn truncated_request_gets_failure() {
    let proxy = start_proxy().await;
    let mut s = greet(proxy).await;
    s.write_all(&hex!("05 01 00 01 7f00")).await.unwrap();
    s.shutdown().await.unwrap();
    let rest = read_rest(&mut s).await;
    assert_eq!(rest, hex!("05 01 00 01 00000000 0000"));
}

#[tokio::test]
async fn destination_close_tears_down_client() {
    let proxy = start_proxy().await;
    let dest = TcpListener::bind("127.0.0.1:0").await.unwrap();

    let mut s = greet(proxy).await;
    request_ipv4(&mut s, dest.local_addr().unwrap()).await;
    let (mut conn, _) = dest.accept().await.unwrap();
    read_reply(&mut s).await;

    conn.write_all(b"bye").await.unwrap();
    drop(conn);
    assert_eq!(read_rest(&mut s).await, b"bye");
}

#[tokio::test]
async fn client_close_tears_down_destination() {
    let proxy = start_proxy().await;
    let dest = TcpListener::bind("127.0.0.1:0").await.unwrap();

    let mut s = greet(proxy).await;
    request_ipv4(&mut s, dest.local_addr().unwrap()).await;
    let (mut conn, _) = dest.accept().await.unwrap();
    read_reply(&mut s).await;

    s.write_all(b"last words").await.unwrap();
    drop(s);
    assert_eq!(read_rest(&mut conn).await, b"last words");
}

#[tokio::test]
async fn quiet_client_keeps_receiving() {
    let proxy = start_proxy_with(SessionConfig::new(
        Duration::from_secs(1),
        Duration::from_secs(5),
    ))
    .await;
    let dest = TcpListener::bind("127.0.0.1:0").await.unwrap();

    let mut s = greet(proxy).await;
    request_ipv4(&mut s, dest.local_addr().unwrap()).await;
    let (mut conn, _) = dest.accept().await.unwrap();
    read_reply(&mut s).await;

    // A download that takes three times the I/O timeout, while the client
    // sends nothing at all.
    let sender = tokio::spawn(async move {
        for _ in 0..10 {
            tokio::time::sleep(Duration::from_millis(300)).await;
            conn.write_all(&[b'x'; 100]).await.unwrap();
        }
    });
    let mut got = vec![0_u8; 1000];
    tokio::time::timeout(Duration::from_secs(10), s.read_exact(&mut got))
        .await
        .unwrap()
        .unwrap();
    assert!(got.iter().all(|&b| b == b'x'));
    sender.await.unwrap();

    // Once the destination closes, so does the client side.
    assert!(read_rest(&mut s).await.is_empty());
}

#[tokio::test]
async fn idle_session_is_closed() {
    let proxy = start_proxy_with(SessionConfig::new(
        Duration::from_secs(1),
        Duration::from_secs(5),
    ))
    .await;
    let dest = TcpListener::bind("127.0.0.1:0").await.unwrap();

    let mut s = greet(proxy).await;
    request_ipv4(&mut s, dest.local_addr().unwrap()).await;
    let (mut conn, _) = dest.accept().await.unwrap();
    read_reply(&mut s).await;

    // Nobody says anything: both sides get closed.
    assert!(read_rest(&mut s).await.is_empty());
    assert!(read_rest(&mut conn).await.is_empty());
}

#[tokio::test]
async fn sessions_are_independent() {
    let proxy = start_proxy().await;
    let echo = start_echo().await;

    // One client goes wrong...
    let mut bad = greet(proxy).await;
    bad.write_all(&hex!("05 01 00 04")).await.unwrap();

    // ...while several others carry on.
    let mut tasks = Vec::new();
    for i in 0..8_u8 {
        tasks.push(tokio::spawn(async move {
            let mut s = greet(proxy).await;
            request_ipv4(&mut s, echo).await;
            assert_eq!(read_reply(&mut s).await[1], 0);
            let msg = vec![i; 1000];
            s.write_all(&msg).await.unwrap();
            let mut got = vec![0_u8; 1000];
            s.read_exact(&mut got).await.unwrap();
            assert_eq!(got, msg);
        }));
    }
    for t in tasks {
        t.await.unwrap();
    }
    assert_eq!(read_reply(&mut bad).await[1], 0x08);
}
