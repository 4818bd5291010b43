//! Client-streaming call shape: zero or more request messages, then exactly
//! one response message and a trailer.
//!
//! A client stream that ends without sending any request message is an
//! invalid call (§4.5 edge case): the server driver reports
//! `INVALID_ARGUMENT` rather than invoking the handler with an empty input.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::config::RouterConfig;
use crate::error::RouterError;
use crate::metadata::Metadata;
use crate::status::Status;
use crate::transport::{Stream, StreamEvent, Transport};

use super::ClientStreamHandler;

/// Client side: send every item from `requests`, close the send side, then
/// wait for the single response and trailer.
pub async fn call(
    transport: &dyn Transport,
    stream: &Stream,
    mut requests: mpsc::Receiver<Bytes>,
) -> Result<(Bytes, Status), RouterError> {
    while let Some(bytes) = requests.recv().await {
        transport.send_message(stream, bytes).await?;
    }
    transport.finish_sending(stream).await?;

    let mut response = None;
    loop {
        match stream.next_event().await {
            Some(StreamEvent::Message(bytes)) => response = Some(bytes),
            Some(StreamEvent::Metadata(metadata)) => {
                if let Some(status) = metadata.as_status() {
                    let response = response.ok_or_else(|| {
                        RouterError::Internal("client-stream call ended with no response".into())
                    })?;
                    return Ok((response, status));
                }
            }
            Some(StreamEvent::Closed(status)) => return Err(status.into()),
            None => {
                return Err(RouterError::Unavailable(
                    "stream closed before a trailer arrived".into(),
                ))
            }
        }
    }
}

/// Server side: forward inbound request messages to `handler` as they
/// arrive, then run it to completion once the client finishes sending.
pub async fn serve(
    transport: &dyn Transport,
    stream: &Stream,
    request_metadata: &Metadata,
    handler: Arc<dyn ClientStreamHandler>,
    config: &RouterConfig,
) -> Result<(), RouterError> {
    let (requests_tx, requests_rx) = mpsc::channel(config.stream_inbound_queue_depth);
    let handler_fut = handler.call(requests_rx, request_metadata);
    tokio::pin!(handler_fut);

    let mut saw_any_message = false;
    let outcome = loop {
        match stream.next_event().await {
            Some(StreamEvent::Message(bytes)) => {
                saw_any_message = true;
                if requests_tx.send(bytes).await.is_err() {
                    break (&mut handler_fut).await;
                }
            }
            Some(StreamEvent::Metadata(metadata)) => {
                if metadata.as_status().is_some() || metadata.is_empty() {
                    drop(requests_tx);
                    if !saw_any_message {
                        return fail(
                            transport,
                            stream,
                            Status::invalid_argument("client stream ended with no request messages"),
                        )
                        .await;
                    }
                    break (&mut handler_fut).await;
                }
            }
            Some(StreamEvent::Closed(status)) => return Err(status.into()),
            None => {
                return Err(RouterError::Unavailable(
                    "stream closed before the client finished sending".into(),
                ))
            }
        }
    };

    match outcome {
        Ok((response, mut trailer)) => {
            transport.send_message(stream, response).await?;
            for (name, value) in Metadata::trailer(&Status::ok()).iter() {
                trailer.insert(name, value);
            }
            transport.send_metadata(stream, trailer, true).await
        }
        Err(err) => fail(transport, stream, err.into()).await,
    }
}

async fn fail(transport: &dyn Transport, stream: &Stream, status: Status) -> Result<(), RouterError> {
    transport
        .send_metadata(stream, Metadata::trailer(&status), true)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory::connected_pair;
    use crate::transport::StreamEvent;

    struct Sum;

    #[async_trait::async_trait]
    impl ClientStreamHandler for Sum {
        async fn call(
            &self,
            mut requests: mpsc::Receiver<Bytes>,
            _metadata: &Metadata,
        ) -> Result<(Bytes, Metadata), RouterError> {
            let mut total: u32 = 0;
            while let Some(bytes) = requests.recv().await {
                total += bytes[0] as u32;
            }
            Ok((Bytes::from(total.to_le_bytes().to_vec()), Metadata::new()))
        }
    }

    async fn accept_and_serve(server: &impl crate::transport::Transport, handler: Arc<dyn ClientStreamHandler>) {
        let server_stream = server.accept_stream().await.unwrap();
        let request_metadata = match server_stream.next_event().await.unwrap() {
            StreamEvent::Metadata(md) => md,
            other => panic!("unexpected event: {other:?}"),
        };
        serve(server, &server_stream, &request_metadata, handler, &RouterConfig::default())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn sums_every_request_message() {
        let (client, server) = connected_pair(RouterConfig::default());
        let client_stream = client.create_stream().await.unwrap();
        client
            .send_metadata(&client_stream, Metadata::client_initial("Test", "Sum", "json"), false)
            .await
            .unwrap();

        let (tx, rx) = mpsc::channel(8);
        tx.send(Bytes::from_static(&[1])).await.unwrap();
        tx.send(Bytes::from_static(&[2])).await.unwrap();
        tx.send(Bytes::from_static(&[3])).await.unwrap();
        drop(tx);

        let serve_fut = accept_and_serve(&server, Arc::new(Sum));
        let call_fut = call(&client, &client_stream, rx);

        let (_, call_result) = tokio::join!(serve_fut, call_fut);
        let (response, status) = call_result.unwrap();
        assert!(status.is_ok());
        assert_eq!(u32::from_le_bytes(response[..4].try_into().unwrap()), 6);
    }

    #[tokio::test]
    async fn empty_client_stream_is_rejected() {
        let (client, server) = connected_pair(RouterConfig::default());
        let client_stream = client.create_stream().await.unwrap();
        client
            .send_metadata(&client_stream, Metadata::client_initial("Test", "Sum", "json"), false)
            .await
            .unwrap();

        let (_tx, rx) = mpsc::channel::<Bytes>(8);
        drop(_tx);

        let serve_fut = accept_and_serve(&server, Arc::new(Sum));
        let call_fut = call(&client, &client_stream, rx);

        let (_, call_result) = tokio::join!(serve_fut, call_fut);
        let (_, status) = call_result.unwrap();
        assert_eq!(status.code, crate::status::StatusCode::InvalidArgument);
    }
}
