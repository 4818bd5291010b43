//! Server-streaming call shape: one request message, then zero or more
//! response messages, then a trailer.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::config::RouterConfig;
use crate::error::RouterError;
use crate::metadata::Metadata;
use crate::status::Status;
use crate::transport::{Stream, StreamEvent, Transport};

use super::ServerStreamHandler;

/// Client side: send the request, then drain responses until the trailer
/// arrives. Responses are delivered on `tx` in order; the trailing
/// [`Status`] is the function's return value.
pub async fn call(
    transport: &dyn Transport,
    stream: &Stream,
    request: Bytes,
    tx: mpsc::Sender<Bytes>,
) -> Result<Status, RouterError> {
    transport.send_message(stream, request).await?;
    transport.finish_sending(stream).await?;

    loop {
        match stream.next_event().await {
            Some(StreamEvent::Message(bytes)) => {
                if tx.send(bytes).await.is_err() {
                    return Err(RouterError::Cancelled("caller stopped reading responses".into()));
                }
            }
            Some(StreamEvent::Metadata(metadata)) => {
                if let Some(status) = metadata.as_status() {
                    return Ok(status);
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

/// Server side: read the one request message, then run `handler`, forwarding
/// whatever it writes to its `responses` sender as outbound stream messages,
/// closing with the trailer it returns (or the error it raises).
pub async fn serve(
    transport: &dyn Transport,
    stream: &Stream,
    request_metadata: &Metadata,
    handler: Arc<dyn ServerStreamHandler>,
    config: &RouterConfig,
) -> Result<(), RouterError> {
    let request = match stream.next_event().await {
        Some(StreamEvent::Message(bytes)) => bytes,
        Some(StreamEvent::Metadata(_)) | None => {
            return fail(transport, stream, Status::invalid_argument("expected a request message")).await;
        }
        Some(StreamEvent::Closed(status)) => return Err(status.into()),
    };

    let (responses_tx, mut responses_rx) = mpsc::channel(config.stream_inbound_queue_depth);
    let handler_fut = handler.call(request, request_metadata, responses_tx);
    tokio::pin!(handler_fut);

    // The client finishing its send side right after the one request is the
    // routine case (it always does); only the transport actually tearing
    // the stream down early counts as cancellation per §4.5.
    let outcome = loop {
        tokio::select! {
            biased;
            cancel = stream.next_event() => {
                match cancel {
                    // Give the handler up to `cancellation_grace` to finish
                    // on its own before forcing the cancellation (§5).
                    Some(StreamEvent::Closed(status)) => {
                        break tokio::select! {
                            biased;
                            result = &mut handler_fut => result,
                            _ = tokio::time::sleep(config.cancellation_grace) => Err(status.into()),
                        };
                    }
                    None => {
                        break tokio::select! {
                            biased;
                            result = &mut handler_fut => result,
                            _ = tokio::time::sleep(config.cancellation_grace) => {
                                Err(RouterError::Cancelled("client disconnected before the server finished".into()))
                            }
                        };
                    }
                    Some(StreamEvent::Metadata(_)) | Some(StreamEvent::Message(_)) => continue,
                }
            }
            response = responses_rx.recv() => {
                match response {
                    Some(bytes) => transport.send_message(stream, bytes).await?,
                    None => {}
                }
            }
            result = &mut handler_fut => break result,
        }
    };

    while let Ok(bytes) = responses_rx.try_recv() {
        transport.send_message(stream, bytes).await?;
    }

    match outcome {
        Ok(trailer) => {
            let mut trailer = trailer;
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

    struct Countdown;

    #[async_trait::async_trait]
    impl ServerStreamHandler for Countdown {
        async fn call(
            &self,
            request: Bytes,
            _metadata: &Metadata,
            responses: mpsc::Sender<Bytes>,
        ) -> Result<Metadata, RouterError> {
            let n: u8 = request[0];
            for i in (0..n).rev() {
                responses.send(Bytes::from(vec![i])).await.ok();
            }
            Ok(Metadata::new())
        }
    }

    #[tokio::test]
    async fn streams_every_response_before_the_trailer() {
        let (client, server) = connected_pair(RouterConfig::default());
        let client_stream = client.create_stream().await.unwrap();
        client
            .send_metadata(&client_stream, Metadata::client_initial("Test", "Countdown", "json"), false)
            .await
            .unwrap();

        let server_stream = server.accept_stream().await.unwrap();
        let request_metadata = match server_stream.next_event().await.unwrap() {
            StreamEvent::Metadata(md) => md,
            other => panic!("unexpected event: {other:?}"),
        };

        let (tx, mut rx) = mpsc::channel(8);
        let serve_fut = serve(&server, &server_stream, &request_metadata, Arc::new(Countdown), &RouterConfig::default());
        let call_fut = call(&client, &client_stream, Bytes::from_static(&[3]), tx);

        let (serve_result, call_result) = tokio::join!(serve_fut, call_fut);
        serve_result.unwrap();
        let status = call_result.unwrap();
        assert!(status.is_ok());

        let mut received = Vec::new();
        while let Ok(bytes) = rx.try_recv() {
            received.push(bytes[0]);
        }
        assert_eq!(received, vec![2, 1, 0]);
    }
}
