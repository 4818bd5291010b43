//! Router and transport tunables (§5, concurrency & resource model).
//!
//! Mirrors the teacher crate's `defaults` module and `TransportConfig`
//! pattern: one struct, one `Default` impl, every magic number named and
//! documented in one place instead of scattered through the engine.

use std::time::Duration;

use crate::frame::DEFAULT_MAX_FRAME_SIZE;

/// Tunable limits and timeouts for a running router instance.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Soft cap on a single frame's declared payload length.
    pub max_frame_size: usize,
    /// Bound on a stream's inbound message queue.
    pub stream_inbound_queue_depth: usize,
    /// Bound on a client's outbound P2P message queue.
    pub client_outbound_queue_depth: usize,
    /// Bound on a router-event subscriber's queue.
    pub event_subscriber_queue_depth: usize,
    /// How long a client may go without a heartbeat before it's reaped.
    pub client_idle_timeout: Duration,
    /// How often the idle reaper scans the client directory.
    pub heartbeat_reaper_interval: Duration,
    /// How often the pending-request reaper scans for expired deadlines.
    pub pending_request_reaper_interval: Duration,
    /// Grace period given to in-flight work during a graceful shutdown.
    pub drain_timeout: Duration,
    /// Number of out-of-window frames tolerated on a half-closed stream
    /// before the multiplexer treats it as a protocol violation.
    pub late_frame_tolerance: u32,
    /// Soft grace period a handler gets to notice cancellation before the
    /// multiplexer stops delivering its output.
    pub cancellation_grace: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            stream_inbound_queue_depth: 64,
            client_outbound_queue_depth: 1024,
            event_subscriber_queue_depth: 256,
            client_idle_timeout: Duration::from_secs(60),
            heartbeat_reaper_interval: Duration::from_secs(10),
            pending_request_reaper_interval: Duration::from_secs(1),
            drain_timeout: Duration::from_secs(5),
            late_frame_tolerance: 4,
            cancellation_grace: Duration::from_secs(2),
        }
    }
}

/// Default network-facing values, kept separate from [`RouterConfig`] since
/// they're surfaced on the CLI rather than tuned by an embedding application.
pub mod defaults {
    pub const HOST: &str = "0.0.0.0";
    pub const PORT: u16 = 8080;
    pub const LOG_LEVEL: &str = "info";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_the_documented_values() {
        let cfg = RouterConfig::default();
        assert_eq!(cfg.max_frame_size, DEFAULT_MAX_FRAME_SIZE);
        assert_eq!(cfg.stream_inbound_queue_depth, 64);
        assert_eq!(cfg.client_outbound_queue_depth, 1024);
        assert_eq!(cfg.event_subscriber_queue_depth, 256);
        assert_eq!(cfg.client_idle_timeout, Duration::from_secs(60));
        assert_eq!(cfg.heartbeat_reaper_interval, Duration::from_secs(10));
        assert_eq!(
            cfg.pending_request_reaper_interval,
            Duration::from_secs(1)
        );
        assert_eq!(cfg.drain_timeout, Duration::from_secs(5));
        assert_eq!(cfg.late_frame_tolerance, 4);
        assert_eq!(cfg.cancellation_grace, Duration::from_secs(2));
    }
}
