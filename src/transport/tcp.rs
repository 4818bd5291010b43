//! TCP binding, grounded on the teacher crate's `TcpSocketTransport`: bind a
//! listener, tune `TCP_NODELAY` via `socket2`, and hand each accepted socket
//! to the shared mux engine.

use socket2::{SockRef, TcpKeepalive};
use tokio::net::{TcpListener, TcpStream};

use crate::config::RouterConfig;
use crate::error::RouterError;

use super::mux::MuxTransport;

/// Apply the same low-latency socket tuning the teacher's TCP binding uses:
/// disable Nagle's algorithm and enable keepalive so a dead peer is noticed
/// without waiting on an application-level heartbeat alone.
fn tune_socket(stream: &TcpStream) -> Result<(), RouterError> {
    stream
        .set_nodelay(true)
        .map_err(|e| RouterError::Internal(format!("set_nodelay failed: {e}")))?;
    let sock_ref = SockRef::from(stream);
    let keepalive = TcpKeepalive::new().with_time(std::time::Duration::from_secs(30));
    sock_ref
        .set_tcp_keepalive(&keepalive)
        .map_err(|e| RouterError::Internal(format!("set_tcp_keepalive failed: {e}")))?;
    Ok(())
}

/// Connect to `addr` and spawn a client-side [`MuxTransport`] over the
/// resulting socket.
pub async fn connect(addr: &str, config: RouterConfig) -> Result<MuxTransport, RouterError> {
    let stream = TcpStream::connect(addr)
        .await
        .map_err(|e| RouterError::Unavailable(format!("connect to {addr} failed: {e}")))?;
    tune_socket(&stream)?;
    Ok(MuxTransport::spawn(stream, config, true))
}

/// Bind a listener on `addr`. Callers drive [`accept_one`] in a loop,
/// spawning one [`MuxTransport`] (and its owning task tree) per connection.
pub async fn bind(addr: &str) -> Result<TcpListener, RouterError> {
    TcpListener::bind(addr)
        .await
        .map_err(|e| RouterError::Unavailable(format!("bind {addr} failed: {e}")))
}

/// Accept the next inbound connection and spawn a server-side
/// [`MuxTransport`] over it.
pub async fn accept_one(
    listener: &TcpListener,
    config: RouterConfig,
) -> Result<(MuxTransport, std::net::SocketAddr), RouterError> {
    let (stream, peer_addr) = listener
        .accept()
        .await
        .map_err(|e| RouterError::Unavailable(format!("accept failed: {e}")))?;
    tune_socket(&stream)?;
    Ok((MuxTransport::spawn(stream, config, false), peer_addr))
}
