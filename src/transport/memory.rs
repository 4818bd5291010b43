//! In-memory loopback transport, for tests and in-process embedding.
//!
//! Built on `tokio::io::duplex` and the same [`mux`](super::mux) engine the
//! real bindings use, per the decision (see `DESIGN.md`) that loopback must
//! exercise the actual frame codec and mux prefix rather than shortcutting
//! straight to in-process channels.

use crate::config::RouterConfig;

use super::mux::MuxTransport;
use super::Transport;

/// Default buffer size for the in-memory duplex pipe.
const DUPLEX_BUFFER: usize = 64 * 1024;

/// Build a connected client/server pair of transports sharing one in-memory
/// pipe, mirroring what a TCP accept would hand back on each side.
pub fn connected_pair(config: RouterConfig) -> (impl Transport, impl Transport) {
    let (client_io, server_io) = tokio::io::duplex(DUPLEX_BUFFER);
    let client = MuxTransport::spawn(client_io, config.clone(), true);
    let server = MuxTransport::spawn(server_io, config, false);
    (client, server)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[tokio::test]
    async fn client_can_open_a_stream_the_server_accepts() {
        let (client, server) = connected_pair(RouterConfig::default());
        let client_stream = client.create_stream().await.unwrap();
        client
            .send_message(&client_stream, Bytes::from_static(b"ping"))
            .await
            .unwrap();

        let server_stream = server.accept_stream().await.unwrap();
        let event = server_stream.next_event().await.unwrap();
        match event {
            crate::transport::StreamEvent::Message(bytes) => assert_eq!(&bytes[..], b"ping"),
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
