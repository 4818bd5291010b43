//! Diagnostics hook (§4.8a, component 9): a minimal, emission-only tap for
//! router activity. Consumers (metrics exporters, audit logs) are out of
//! scope — this module only defines the interface and a tracing-backed
//! default, mirroring how little the teacher's own `metrics.rs` assumes
//! about what happens downstream of a recorded sample.

use crate::router::RouterEvent;

/// Receives a copy of every [`RouterEvent`] as it's emitted. Implementations
/// must not block or do expensive work inline; they own their own buffering
/// if they need it.
pub trait EventTap: Send + Sync {
    fn record(&self, event: &RouterEvent);
}

/// Discards everything. The default when no tap is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTap;

impl EventTap for NullTap {
    fn record(&self, _event: &RouterEvent) {}
}

/// Logs every event at `debug` level via `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingTap;

impl EventTap for TracingTap {
    fn record(&self, event: &RouterEvent) {
        tracing::debug!(?event, "router event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::ClientId;

    #[test]
    fn null_tap_accepts_any_event_without_panicking() {
        let tap = NullTap;
        tap.record(&RouterEvent::ClientRegistered {
            client_id: ClientId("x".into()),
        });
    }
}
