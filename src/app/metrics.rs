//! Prometheus-based metrics module
//!
//! Counters live in one process-wide registry. There is no HTTP endpoint;
//! the binary prints [`gather_text`] on exit when asked to.

use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // === UDP Metrics ===

    /// Datagrams handed to the socket
    pub static ref UDP_DATAGRAMS_SENT: IntCounter = IntCounter::new(
        "netpipe_udp_datagrams_sent_total",
        "Total number of UDP datagrams sent"
    ).unwrap();

    /// Datagrams read from the socket
    pub static ref UDP_DATAGRAMS_RECEIVED: IntCounter = IntCounter::new(
        "netpipe_udp_datagrams_received_total",
        "Total number of UDP datagrams received"
    ).unwrap();

    /// Chunks discarded after a transient send failure
    pub static ref UDP_SEND_DROPPED: IntCounter = IntCounter::new(
        "netpipe_udp_send_dropped_total",
        "Total number of UDP chunks dropped after a transient send failure"
    ).unwrap();

    // === Session Metrics ===

    /// Inbound sessions accepted per transport
    pub static ref SESSIONS_ACCEPTED: IntCounterVec = IntCounterVec::new(
        Opts::new("netpipe_sessions_accepted_total", "Total sessions accepted per transport"),
        &["transport"]
    ).unwrap();

    // === Traffic Metrics ===

    /// Bytes relayed, by direction
    pub static ref RELAY_BYTES: IntCounterVec = IntCounterVec::new(
        Opts::new("netpipe_relay_bytes_total", "Bytes relayed per direction"),
        &["direction"]
    ).unwrap();
}

/// Initialize and register all metrics with the global registry
pub fn init_metrics() {
    REGISTRY.register(Box::new(UDP_DATAGRAMS_SENT.clone())).ok();
    REGISTRY.register(Box::new(UDP_DATAGRAMS_RECEIVED.clone())).ok();
    REGISTRY.register(Box::new(UDP_SEND_DROPPED.clone())).ok();

    REGISTRY.register(Box::new(SESSIONS_ACCEPTED.clone())).ok();
    REGISTRY.register(Box::new(RELAY_BYTES.clone())).ok();
}

/// Text exposition of everything registered so far
pub fn gather_text() -> String {
    let mut buffer = Vec::new();
    if let Err(e) = TextEncoder::new().encode(&REGISTRY.gather(), &mut buffer) {
        return format!("# failed to encode metrics: {}\n", e);
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

/// Format bytes to human readable string
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * 1024;
    const GB: u64 = 1024 * 1024 * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(500), "500 B");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024 / 2), "1.50 MB");
    }

    #[test]
    fn test_gather_includes_registered_counters() {
        init_metrics();
        init_metrics();
        SESSIONS_ACCEPTED.with_label_values(&["udp"]).inc();
        let text = gather_text();
        assert!(text.contains("netpipe_sessions_accepted_total"));
        assert!(text.contains("netpipe_udp_datagrams_sent_total"));
    }
}
