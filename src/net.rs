// src/net.rs
//! Socket construction for the market data and order gateway paths.
//!
//! Multicast sockets are built through `socket2` so reuse options can be
//! applied before bind; everything is handed back as plain `std::net`
//! types. All data-path sockets are non-blocking — workers poll.

use anyhow::Context;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4, TcpListener, TcpStream, UdpSocket};

/// Socket for publishing datagrams to a multicast group. The socket is
/// connected to group:port so each record goes out with one `send` call;
/// loopback stays enabled so same-host consumers (and tests) see the
/// stream.
pub fn build_mcast_tx_socket(group: Ipv4Addr, port: u16, iface_addr: Ipv4Addr) -> anyhow::Result<UdpSocket> {
    let sock = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).context("socket")?;
    let bind_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0);
    sock.bind(&bind_addr.into()).context("bind tx")?;
    sock.set_multicast_if_v4(&iface_addr).ok();
    sock.set_multicast_loop_v4(true).ok();
    sock.connect(&SocketAddr::new(IpAddr::V4(group), port).into())
        .context("connect to group")?;
    let s: UdpSocket = sock.into();
    s.set_nonblocking(true).ok();
    Ok(s)
}

/// Socket joined to a multicast group for receiving. Reuse-address is set
/// before bind so several consumers on one host can share the port.
pub fn build_mcast_rx_socket(
    group: Ipv4Addr,
    port: u16,
    iface_addr: Ipv4Addr,
    recv_buffer_bytes: usize,
) -> anyhow::Result<UdpSocket> {
    anyhow::ensure!(group.is_multicast(), "{group} is not a multicast group");
    let sock = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).context("socket")?;
    sock.set_reuse_address(true).ok();
    #[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
    sock.set_reuse_port(true).ok();

    let bind_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port);
    sock.bind(&bind_addr.into()).context("bind rx")?;

    if recv_buffer_bytes > 0 {
        let _ = sock.set_recv_buffer_size(recv_buffer_bytes);
    }
    sock.join_multicast_v4(&group, &iface_addr)
        .context("join_multicast_v4")?;

    let s: UdpSocket = sock.into();
    s.set_nonblocking(true).context("set nonblocking")?;
    Ok(s)
}

pub fn leave_mcast_group(sock: &UdpSocket, group: Ipv4Addr, iface_addr: Ipv4Addr) {
    let _ = sock.leave_multicast_v4(&group, &iface_addr);
}

/// Non-blocking listener for the order gateway.
pub fn build_tcp_listener(bind: SocketAddrV4) -> anyhow::Result<TcpListener> {
    let listener = TcpListener::bind(bind).with_context(|| format!("listen on {bind}"))?;
    listener.set_nonblocking(true).context("listener nonblocking")?;
    Ok(listener)
}

/// Blocking connect, then non-blocking stream with Nagle disabled for
/// the order path.
pub fn connect_tcp(addr: SocketAddrV4) -> anyhow::Result<TcpStream> {
    let stream = TcpStream::connect(addr).with_context(|| format!("connect to {addr}"))?;
    stream.set_nodelay(true).ok();
    stream.set_nonblocking(true).context("stream nonblocking")?;
    Ok(stream)
}
