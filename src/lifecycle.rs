//! Startup wiring and graceful shutdown (§4.8, component 8).
//!
//! Mirrors the teacher crate's `main.rs` accept-loop-plus-spawn shape: one
//! task owns the listener, one task owns each accepted connection, and a
//! `watch` channel broadcasts the shutdown signal to all of them the way
//! the teacher's coordination module signals benchmark phases.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::config::RouterConfig;
use crate::diagnostics::TracingTap;
use crate::endpoint::Endpoint;
use crate::error::RouterError;
use crate::router::{router_contract, RouterState};
use crate::transport::{tcp, Transport};

/// Owns the router's shared state, the method dispatcher, and the listener
/// lifecycle. One instance per running daemon.
pub struct RouterServer {
    state: Arc<RouterState>,
    endpoint: Arc<Endpoint>,
    config: RouterConfig,
    shutdown_tx: watch::Sender<bool>,
}

impl RouterServer {
    pub fn new(config: RouterConfig) -> Self {
        let state = RouterState::with_event_tap(config.clone(), Arc::new(TracingTap));
        let mut endpoint = Endpoint::new(config.clone());
        endpoint.add_service(router_contract(state.clone()));
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            state,
            endpoint: Arc::new(endpoint),
            config,
            shutdown_tx,
        }
    }

    /// Start the two background reapers. Call once before `serve_tcp`.
    pub fn spawn_reapers(&self) {
        tokio::spawn(crate::router::reaper::run_heartbeat_reaper(self.state.clone()));
        tokio::spawn(crate::router::reaper::run_pending_request_reaper(self.state.clone()));
    }

    /// Bind `addr` and accept connections until `shutdown` fires.
    pub async fn serve_tcp(&self, addr: &str) -> Result<(), RouterError> {
        let listener = tcp::bind(addr).await?;
        info!(%addr, "router listening");
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("shutdown requested, no longer accepting new connections");
                        break;
                    }
                }
                accepted = tcp::accept_one(&listener, self.config.clone()) => {
                    match accepted {
                        Ok((transport, peer_addr)) => {
                            info!(%peer_addr, "accepted connection");
                            let endpoint = Arc::clone(&self.endpoint);
                            let mut conn_shutdown = self.shutdown_tx.subscribe();
                            tokio::spawn(async move {
                                let transport: Arc<dyn Transport> = Arc::new(transport);
                                handle_connection(transport, endpoint, &mut conn_shutdown).await;
                            });
                        }
                        Err(e) => {
                            warn!(error = %e, "accept failed, continuing");
                        }
                    }
                }
            }
        }

        self.drain(self.config.drain_timeout).await;
        Ok(())
    }

    /// Request a graceful shutdown: stop accepting, then give in-flight
    /// streams `drain_timeout` to finish before returning.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    async fn drain(&self, drain_timeout: Duration) {
        info!(?drain_timeout, "draining in-flight work");
        tokio::time::sleep(drain_timeout).await;
    }
}

/// Per-connection loop: accept every stream the peer opens and dispatch it
/// independently, so one slow call never blocks another on the same
/// connection. Exits (and cleans up the client's directory entry, if any)
/// when the transport closes or shutdown fires.
async fn handle_connection(
    transport: Arc<dyn Transport>,
    endpoint: Arc<Endpoint>,
    shutdown_rx: &mut watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    let _ = transport.close().await;
                    break;
                }
            }
            accepted = transport.accept_stream() => {
                match accepted {
                    Ok(stream) => {
                        let transport = Arc::clone(&transport);
                        let endpoint = Arc::clone(&endpoint);
                        tokio::spawn(async move {
                            if let Err(e) = endpoint.dispatch(transport.as_ref(), stream).await {
                                error!(error = %e, "stream dispatch failed");
                            }
                        });
                    }
                    Err(_) => break,
                }
            }
        }
    }
}
