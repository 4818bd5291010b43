//! Bidirectional-streaming call shape: an open stream of requests and an
//! open stream of responses, running concurrently until either side closes.
//!
//! If the client closes its send side with a `CLOSED`/cancel state while the
//! server is still mid-production, the server driver stops forwarding
//! further responses and finishes with `CANCELLED` rather than `OK` (§4.5
//! cancellation semantics) — there is no guarantee the client is still
//! listening.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::config::RouterConfig;
use crate::error::RouterError;
use crate::metadata::Metadata;
use crate::status::Status;
use crate::transport::{Stream, StreamEvent, Transport};

use super::BidiHandler;

/// Client side: drives both directions of one bidi call. `requests` is
/// drained to the stream as it produces items; inbound responses are
/// forwarded to `responses` as they arrive. Returns the trailing status once
/// both directions have finished.
pub async fn call(
    transport: &dyn Transport,
    stream: &Stream,
    mut requests: mpsc::Receiver<Bytes>,
    responses: mpsc::Sender<Bytes>,
) -> Result<Status, RouterError> {
    let send_side = async {
        while let Some(bytes) = requests.recv().await {
            transport.send_message(stream, bytes).await?;
        }
        transport.finish_sending(stream).await
    };

    let recv_side = async {
        loop {
            match stream.next_event().await {
                Some(StreamEvent::Message(bytes)) => {
                    if responses.send(bytes).await.is_err() {
                        return Err(RouterError::Cancelled(
                            "caller stopped reading responses".into(),
                        ));
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
    };

    let (send_result, recv_result) = tokio::join!(send_side, recv_side);
    send_result?;
    recv_result
}

/// Server side: runs `handler` concurrently with pumping inbound request
/// messages in and outbound response messages out.
pub async fn serve(
    transport: &dyn Transport,
    stream: &Stream,
    request_metadata: &Metadata,
    handler: Arc<dyn BidiHandler>,
    config: &RouterConfig,
) -> Result<(), RouterError> {
    let (requests_tx, requests_rx) = mpsc::channel(config.stream_inbound_queue_depth);
    let mut requests_tx = Some(requests_tx);
    let (responses_tx, mut responses_rx) = mpsc::channel(config.stream_inbound_queue_depth);

    let handler_fut = handler.call(requests_rx, request_metadata, responses_tx);
    tokio::pin!(handler_fut);

    let outcome = loop {
        tokio::select! {
            biased;
            event = stream.next_event() => {
                match event {
                    Some(StreamEvent::Message(bytes)) => {
                        if let Some(tx) = requests_tx.as_ref() {
                            let _ = tx.send(bytes).await;
                        }
                    }
                    Some(StreamEvent::Metadata(metadata)) => {
                        if metadata.is_empty() || metadata.as_status().is_some() {
                            requests_tx.take();
                        }
                    }
                    Some(StreamEvent::Closed(_)) | None => {
                        // Stop feeding the handler right away so it isn't
                        // waiting on input that will never arrive; still give
                        // it `cancellation_grace` to wind down on its own
                        // before forcing a `CANCELLED` outcome (§5).
                        requests_tx.take();
                        break tokio::select! {
                            biased;
                            result = &mut handler_fut => result,
                            _ = tokio::time::sleep(config.cancellation_grace) => {
                                Err(RouterError::Cancelled("client disconnected mid-call".into()))
                            }
                        };
                    }
                }
            }
            response = responses_rx.recv() => {
                if let Some(bytes) = response {
                    transport.send_message(stream, bytes).await?;
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
        Err(err) => {
            let status: Status = err.into();
            transport
                .send_metadata(stream, Metadata::trailer(&status), true)
                .await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory::connected_pair;
    use crate::transport::StreamEvent;

    struct Echo;

    #[async_trait::async_trait]
    impl BidiHandler for Echo {
        async fn call(
            &self,
            mut requests: mpsc::Receiver<Bytes>,
            _metadata: &Metadata,
            responses: mpsc::Sender<Bytes>,
        ) -> Result<Metadata, RouterError> {
            while let Some(bytes) = requests.recv().await {
                if responses.send(bytes).await.is_err() {
                    break;
                }
            }
            Ok(Metadata::new())
        }
    }

    #[tokio::test]
    async fn echoes_every_request_message_back() {
        let (client, server) = connected_pair(RouterConfig::default());
        let client_stream = client.create_stream().await.unwrap();
        client
            .send_metadata(&client_stream, Metadata::client_initial("Test", "Echo", "json"), false)
            .await
            .unwrap();

        let server_stream = server.accept_stream().await.unwrap();
        let request_metadata = match server_stream.next_event().await.unwrap() {
            StreamEvent::Metadata(md) => md,
            other => panic!("unexpected event: {other:?}"),
        };

        let (req_tx, req_rx) = mpsc::channel(8);
        let (resp_tx, mut resp_rx) = mpsc::channel(8);
        req_tx.send(Bytes::from_static(b"one")).await.unwrap();
        req_tx.send(Bytes::from_static(b"two")).await.unwrap();
        drop(req_tx);

        let serve_fut = serve(&server, &server_stream, &request_metadata, Arc::new(Echo), &RouterConfig::default());
        let call_fut = call(&client, &client_stream, req_rx, resp_tx);

        let (serve_result, call_result) = tokio::join!(serve_fut, call_fut);
        serve_result.unwrap();
        assert!(call_result.unwrap().is_ok());

        assert_eq!(resp_rx.recv().await.unwrap(), Bytes::from_static(b"one"));
        assert_eq!(resp_rx.recv().await.unwrap(), Bytes::from_static(b"two"));
    }
}
