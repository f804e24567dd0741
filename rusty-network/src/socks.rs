//! Optional SOCKS5 tunneling for outbound peer connections (§6 transport).

use std::net::SocketAddr;

use tokio::net::TcpStream;
use tokio_socks::tcp::Socks5Stream;

use crate::error::{NetworkError, NetworkResult};

/// Dials `target` through the SOCKS5 proxy at `proxy`, returning the
/// underlying stream once the proxy has established the relay.
pub async fn dial(proxy: SocketAddr, target: SocketAddr) -> NetworkResult<TcpStream> {
    let stream = Socks5Stream::connect(proxy, target)
        .await
        .map_err(|e| NetworkError::HandshakeFailed(format!("SOCKS5 connect to {target} via {proxy}: {e}")))?;
    Ok(stream.into_inner())
}
