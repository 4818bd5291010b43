//! Unary call shape: exactly one request message, exactly one response
//! message, then a trailer.

use std::sync::Arc;

use bytes::Bytes;

use crate::error::RouterError;
use crate::metadata::Metadata;
use crate::status::Status;
use crate::transport::{Stream, StreamEvent, Transport};

use super::UnaryHandler;

/// Client side: send `request` on `stream` (whose initial metadata the
/// caller has already sent) and wait for the single response message and
/// trailing status.
pub async fn call(
    transport: &dyn Transport,
    stream: &Stream,
    request: Bytes,
) -> Result<(Bytes, Status), RouterError> {
    transport.send_message(stream, request).await?;
    transport.finish_sending(stream).await?;

    let mut response = None;
    loop {
        match stream.next_event().await {
            Some(StreamEvent::Message(bytes)) => response = Some(bytes),
            Some(StreamEvent::Metadata(metadata)) => {
                if let Some(status) = metadata.as_status() {
                    let response = response.ok_or_else(|| {
                        RouterError::Internal("unary call ended with no response message".into())
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

/// Server side: read exactly one request message then drive `handler`,
/// sending its response and trailer back.
pub async fn serve(
    transport: &dyn Transport,
    stream: &Stream,
    request_metadata: &Metadata,
    handler: Arc<dyn UnaryHandler>,
) -> Result<(), RouterError> {
    let request = match stream.next_event().await {
        Some(StreamEvent::Message(bytes)) => bytes,
        Some(StreamEvent::Metadata(_)) | None => {
            return fail(transport, stream, Status::invalid_argument("expected a request message")).await;
        }
        Some(StreamEvent::Closed(status)) => return Err(status.into()),
    };

    let outcome = handler.call(request, request_metadata).await;
    match outcome {
        Ok((response, mut trailer)) => {
            transport.send_message(stream, response).await?;
            let status = Status::ok();
            merge_status(&mut trailer, &status);
            transport.send_metadata(stream, trailer, true).await
        }
        Err(err) => fail(transport, stream, err.into()).await,
    }
}

fn merge_status(trailer: &mut Metadata, status: &Status) {
    for (name, value) in Metadata::trailer(status).iter() {
        trailer.insert(name, value);
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
    use crate::config::RouterConfig;
    use crate::transport::memory::connected_pair;

    struct Echo;

    #[async_trait::async_trait]
    impl UnaryHandler for Echo {
        async fn call(&self, request: Bytes, _metadata: &Metadata) -> Result<(Bytes, Metadata), RouterError> {
            Ok((request, Metadata::new()))
        }
    }

    #[tokio::test]
    async fn echoes_the_request_back() {
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

        let serve_fut = serve(&server, &server_stream, &request_metadata, Arc::new(Echo));
        let call_fut = call(&client, &client_stream, Bytes::from_static(b"ping"));

        let (serve_result, call_result) = tokio::join!(serve_fut, call_fut);
        serve_result.unwrap();
        let (response, status) = call_result.unwrap();
        assert_eq!(&response[..], b"ping");
        assert!(status.is_ok());
    }
}
