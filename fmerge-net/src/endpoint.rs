//! Session endpoints: single-accept listener and IPv4 connector

use std::net::SocketAddr;

use tokio::net::{lookup_host, TcpListener, TcpSocket, TcpStream};
use tracing::{debug, info};

use crate::errors::{NetError, Result};

/// The well-known fmerge port.
pub const DEFAULT_PORT: u16 = 4512;

/// Bind the listening socket on all interfaces with address reuse enabled.
///
/// Passing port 0 binds an ephemeral port; the effective address is
/// available through [`TcpListener::local_addr`].
pub async fn bind_listener(port: u16) -> Result<TcpListener> {
    let socket = TcpSocket::new_v4()?;
    socket.set_reuseaddr(true)?;
    socket.bind(SocketAddr::from(([0, 0, 0, 0], port)))?;
    let listener = socket.listen(1)?;
    info!("Listening on {}", listener.local_addr()?);
    Ok(listener)
}

/// Accept exactly one peer connection.
pub async fn accept_peer(listener: &TcpListener) -> Result<(TcpStream, SocketAddr)> {
    let (stream, addr) = listener.accept().await?;
    info!("Accepted connection from {}", addr);
    Ok((stream, addr))
}

/// Listen on `port` and wait for the single peer of this session.
pub async fn listen_for_peer(port: u16) -> Result<(TcpStream, SocketAddr)> {
    let listener = bind_listener(port).await?;
    accept_peer(&listener).await
}

/// Resolve `host` (IPv4 only) and connect to it.
pub async fn connect_to_peer(host: &str, port: u16) -> Result<TcpStream> {
    let mut addrs = lookup_host((host, port)).await?;
    let addr = addrs
        .find(SocketAddr::is_ipv4)
        .ok_or_else(|| NetError::NoIpv4Address {
            host: host.to_string(),
        })?;
    debug!("Resolved {} to {}", host, addr);

    let stream = TcpStream::connect(addr).await?;
    info!("Connected to {}", addr);
    Ok(stream)
}
