//! Endpoint & Contracts (§4.6, component 6): binds method paths to handlers
//! and dispatches an inbound stream to the right interaction driver.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::RouterConfig;
use crate::error::RouterError;
use crate::interaction::{
    bidi, client_stream, server_stream, unary, BidiHandler, CallShape, ClientStreamHandler,
    ServerStreamHandler, UnaryHandler,
};
use crate::metadata::{Metadata, HEADER_METHOD};
use crate::status::Status;
use crate::transport::{Stream, StreamEvent, Transport};

enum Registration {
    Unary(Arc<dyn UnaryHandler>),
    ServerStreaming(Arc<dyn ServerStreamHandler>),
    ClientStreaming(Arc<dyn ClientStreamHandler>),
    Bidi(Arc<dyn BidiHandler>),
}

impl Registration {
    fn shape(&self) -> CallShape {
        match self {
            Registration::Unary(_) => CallShape::Unary,
            Registration::ServerStreaming(_) => CallShape::ServerStreaming,
            Registration::ClientStreaming(_) => CallShape::ClientStreaming,
            Registration::Bidi(_) => CallShape::Bidi,
        }
    }
}

/// A named group of methods, e.g. `"Router"`. Method names must be unique
/// within a contract.
pub struct ServiceContract {
    name: String,
    methods: HashMap<String, Registration>,
}

impl ServiceContract {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn register(&mut self, method: impl Into<String>, registration: Registration) {
        let method = method.into();
        assert!(
            self.methods.insert(method.clone(), registration).is_none(),
            "method {method} registered twice on contract {}",
            self.name
        );
    }

    pub fn unary(&mut self, method: impl Into<String>, handler: Arc<dyn UnaryHandler>) {
        self.register(method, Registration::Unary(handler));
    }

    pub fn server_streaming(&mut self, method: impl Into<String>, handler: Arc<dyn ServerStreamHandler>) {
        self.register(method, Registration::ServerStreaming(handler));
    }

    pub fn client_streaming(&mut self, method: impl Into<String>, handler: Arc<dyn ClientStreamHandler>) {
        self.register(method, Registration::ClientStreaming(handler));
    }

    pub fn bidi(&mut self, method: impl Into<String>, handler: Arc<dyn BidiHandler>) {
        self.register(method, Registration::Bidi(handler));
    }
}

/// Composes one or more [`ServiceContract`]s and dispatches inbound streams
/// by method path (`/<Service>/<Method>`).
pub struct Endpoint {
    services: HashMap<String, ServiceContract>,
    config: RouterConfig,
}

impl Endpoint {
    pub fn new(config: RouterConfig) -> Self {
        Self {
            services: HashMap::new(),
            config,
        }
    }

    pub fn add_service(&mut self, contract: ServiceContract) {
        let name = contract.name().to_string();
        assert!(
            self.services.insert(name.clone(), contract).is_none(),
            "service {name} registered twice on this endpoint"
        );
    }

    /// Read the inbound stream's initial metadata, look up the registered
    /// handler for its method path, and run the matching interaction
    /// driver. Unknown paths trail off with `UNIMPLEMENTED`; a request whose
    /// body doesn't match the registered shape trails off with
    /// `FAILED_PRECONDITION`.
    pub async fn dispatch(&self, transport: &dyn Transport, stream: Stream) -> Result<(), RouterError> {
        let initial_metadata = match stream.next_event().await {
            Some(StreamEvent::Metadata(md)) => md,
            Some(StreamEvent::Message(_)) => {
                return self
                    .fail(transport, &stream, Status::invalid_argument("expected initial metadata first"))
                    .await;
            }
            Some(StreamEvent::Closed(status)) => return Err(status.into()),
            None => return Ok(()),
        };

        let Some(path) = initial_metadata.get(HEADER_METHOD) else {
            return self
                .fail(transport, &stream, Status::invalid_argument("missing :path header"))
                .await;
        };

        let Some((service, method)) = parse_method_path(path) else {
            return self
                .fail(transport, &stream, Status::invalid_argument(format!("malformed method path {path}")))
                .await;
        };

        let Some(contract) = self.services.get(service) else {
            return self
                .fail(transport, &stream, Status::unimplemented(format!("unknown service {service}")))
                .await;
        };

        let Some(registration) = contract.methods.get(method) else {
            return self
                .fail(
                    transport,
                    &stream,
                    Status::unimplemented(format!("unknown method {service}/{method}")),
                )
                .await;
        };

        match registration {
            Registration::Unary(handler) => {
                unary::serve(transport, &stream, &initial_metadata, Arc::clone(handler)).await
            }
            Registration::ServerStreaming(handler) => {
                server_stream::serve(transport, &stream, &initial_metadata, Arc::clone(handler), &self.config)
                    .await
            }
            Registration::ClientStreaming(handler) => {
                client_stream::serve(transport, &stream, &initial_metadata, Arc::clone(handler), &self.config)
                    .await
            }
            Registration::Bidi(handler) => {
                bidi::serve(transport, &stream, &initial_metadata, Arc::clone(handler), &self.config).await
            }
        }
    }

    async fn fail(&self, transport: &dyn Transport, stream: &Stream, status: Status) -> Result<(), RouterError> {
        transport
            .send_metadata(stream, Metadata::trailer(&status), true)
            .await
    }
}

fn parse_method_path(path: &str) -> Option<(&str, &str)> {
    let trimmed = path.strip_prefix('/')?;
    trimmed.split_once('/')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_well_formed_method_path() {
        assert_eq!(parse_method_path("/Router/SendUnicast"), Some(("Router", "SendUnicast")));
    }

    #[test]
    fn rejects_a_path_missing_the_leading_slash() {
        assert_eq!(parse_method_path("Router/SendUnicast"), None);
    }

    #[test]
    fn rejects_a_path_missing_the_method_segment() {
        assert_eq!(parse_method_path("/Router"), None);
    }
}
