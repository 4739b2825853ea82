use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU16, Ordering::Relaxed};

use tokio::net::{TcpListener, TcpSocket};

pub static LISTEN_PORT: AtomicU16 = AtomicU16::new(19101);

/// Bind an ephemeral loopback listener, retrying a handful of candidate
/// ports if one is already taken.
pub async fn listener() -> TcpListener {
    let mut port: u16 = 0;
    for _ in 0..10 {
        port = LISTEN_PORT.fetch_add(1, Relaxed);
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port);
        let sock = TcpSocket::new_v4().unwrap();
        if sock.bind(addr).is_ok() {
            return sock.listen(32).expect("couldn't listen on socket");
        }
    }
    panic!("couldn't find an available listen port near {}", port);
}
