//! Background sweeps (§5): idle-client reaping and pending-request deadline
//! enforcement, each its own periodic task in the style of the teacher
//! crate's `tokio::spawn` + `tokio::select!` pump loops.

use std::sync::Arc;

use tracing::{debug, info};

use crate::error::RouterError;

use super::ops;
use super::state::RouterState;

/// Periodically scans the client directory and disconnects anyone who
/// hasn't heartbeated within `client_idle_timeout`.
pub async fn run_heartbeat_reaper(state: Arc<RouterState>) {
    let mut ticker = tokio::time::interval(state.config.heartbeat_reaper_interval);
    loop {
        ticker.tick().await;
        let idle = state.idle_clients().await;
        for client in idle {
            info!(client_id = %client.id, "reaping idle client");
            client.request_disconnect().await;
            ops::unregister(&state, &client.id).await;
        }
    }
}

/// Periodically resolves pending `request()` calls whose deadline has
/// elapsed with `DEADLINE_EXCEEDED`, as a backstop for the `tokio::time::timeout`
/// already racing each individual request — this sweep exists so a pending
/// entry is never left dangling if its owning task was itself cancelled.
pub async fn run_pending_request_reaper(state: Arc<RouterState>) {
    let mut ticker = tokio::time::interval(state.config.pending_request_reaper_interval);
    loop {
        ticker.tick().await;
        let expired = state.drain_expired_pending().await;
        for pending in expired {
            debug!(correlation_id = %pending.correlation_id, "reaping expired pending request");
            let _ = pending
                .responder
                .send(Err(RouterError::DeadlineExceeded(format!(
                    "request {} timed out",
                    pending.correlation_id
                ))));
        }
    }
}
