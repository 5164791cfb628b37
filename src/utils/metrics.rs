//! Observability and Metrics
//!
//! Atomic counters for both planes. A single global instance is shared by
//! the master, the node control client and the edge proxy.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Global metrics collector
#[derive(Debug)]
pub struct Metrics {
    /// Control connections accepted or dialed
    pub control_connections_total: AtomicU64,
    /// Control connections currently open
    pub control_connections_active: AtomicU64,
    /// Total handshake attempts
    pub handshakes_total: AtomicU64,
    /// Successful handshakes
    pub handshakes_success: AtomicU64,
    /// Failed handshakes
    pub handshakes_failed: AtomicU64,
    /// Control packets written
    pub packets_sent: AtomicU64,
    /// Control packets read
    pub packets_received: AtomicU64,
    /// Control packets whose payload failed to decode
    pub decode_errors: AtomicU64,
    /// Client connections accepted by the edge proxy
    pub proxy_connections_total: AtomicU64,
    /// Client connections currently open
    pub proxy_connections_active: AtomicU64,
    /// Handshakes for a virtual host with no route
    pub route_misses: AtomicU64,
    /// Backend dials that failed
    pub backend_failures: AtomicU64,
    /// Sessions that reached the splice stage
    pub relayed_sessions: AtomicU64,
    /// Binary transfers pushed
    pub transfers_sent: AtomicU64,
    /// Binary transfers reassembled
    pub transfers_received: AtomicU64,
    /// Start time for uptime calculation
    start_time: Instant,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            control_connections_total: AtomicU64::new(0),
            control_connections_active: AtomicU64::new(0),
            handshakes_total: AtomicU64::new(0),
            handshakes_success: AtomicU64::new(0),
            handshakes_failed: AtomicU64::new(0),
            packets_sent: AtomicU64::new(0),
            packets_received: AtomicU64::new(0),
            decode_errors: AtomicU64::new(0),
            proxy_connections_total: AtomicU64::new(0),
            proxy_connections_active: AtomicU64::new(0),
            route_misses: AtomicU64::new(0),
            backend_failures: AtomicU64::new(0),
            relayed_sessions: AtomicU64::new(0),
            transfers_sent: AtomicU64::new(0),
            transfers_received: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Record a new control connection
    pub fn control_connection_opened(&self) {
        self.control_connections_total.fetch_add(1, Ordering::Relaxed);
        self.control_connections_active.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a control connection closed
    pub fn control_connection_closed(&self) {
        self.control_connections_active.fetch_sub(1, Ordering::Relaxed);
    }

    /// Record a handshake attempt
    pub fn handshake_attempt(&self) {
        self.handshakes_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a successful handshake
    pub fn handshake_success(&self) {
        self.handshakes_success.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed handshake
    pub fn handshake_failed(&self) {
        self.handshakes_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn packet_sent(&self) {
        self.packets_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn packet_received(&self) {
        self.packets_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a client connection on the data plane
    pub fn proxy_connection_opened(&self) {
        self.proxy_connections_total.fetch_add(1, Ordering::Relaxed);
        self.proxy_connections_active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn proxy_connection_closed(&self) {
        self.proxy_connections_active.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn route_miss(&self) {
        self.route_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn backend_failure(&self) {
        self.backend_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_relayed(&self) {
        self.relayed_sessions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn transfer_sent(&self) {
        self.transfers_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn transfer_received(&self) {
        self.transfers_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            control_connections_total: self.control_connections_total.load(Ordering::Relaxed),
            control_connections_active: self.control_connections_active.load(Ordering::Relaxed),
            handshakes_total: self.handshakes_total.load(Ordering::Relaxed),
            handshakes_success: self.handshakes_success.load(Ordering::Relaxed),
            handshakes_failed: self.handshakes_failed.load(Ordering::Relaxed),
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            packets_received: self.packets_received.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            proxy_connections_total: self.proxy_connections_total.load(Ordering::Relaxed),
            proxy_connections_active: self.proxy_connections_active.load(Ordering::Relaxed),
            route_misses: self.route_misses.load(Ordering::Relaxed),
            backend_failures: self.backend_failures.load(Ordering::Relaxed),
            relayed_sessions: self.relayed_sessions.load(Ordering::Relaxed),
            transfers_sent: self.transfers_sent.load(Ordering::Relaxed),
            transfers_received: self.transfers_received.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    /// Log current metrics
    pub fn log_metrics(&self) {
        let snapshot = self.snapshot();
        info!(
            control_connections_total = snapshot.control_connections_total,
            control_connections_active = snapshot.control_connections_active,
            handshakes_total = snapshot.handshakes_total,
            handshakes_success = snapshot.handshakes_success,
            handshakes_failed = snapshot.handshakes_failed,
            packets_sent = snapshot.packets_sent,
            packets_received = snapshot.packets_received,
            decode_errors = snapshot.decode_errors,
            proxy_connections_total = snapshot.proxy_connections_total,
            proxy_connections_active = snapshot.proxy_connections_active,
            route_misses = snapshot.route_misses,
            backend_failures = snapshot.backend_failures,
            relayed_sessions = snapshot.relayed_sessions,
            transfers_sent = snapshot.transfers_sent,
            transfers_received = snapshot.transfers_received,
            uptime_seconds = snapshot.uptime_seconds,
            "Metrics snapshot"
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub control_connections_total: u64,
    pub control_connections_active: u64,
    pub handshakes_total: u64,
    pub handshakes_success: u64,
    pub handshakes_failed: u64,
    pub packets_sent: u64,
    pub packets_received: u64,
    pub decode_errors: u64,
    pub proxy_connections_total: u64,
    pub proxy_connections_active: u64,
    pub route_misses: u64,
    pub backend_failures: u64,
    pub relayed_sessions: u64,
    pub transfers_sent: u64,
    pub transfers_received: u64,
    pub uptime_seconds: u64,
}

/// Global metrics instance (lazy static for simplicity)
static METRICS: once_cell::sync::Lazy<Metrics> = once_cell::sync::Lazy::new(Metrics::new);

/// Get the global metrics instance
pub fn global_metrics() -> &'static Metrics {
    &METRICS
}

/// Initialize metrics collection (call once at startup)
pub fn init_metrics() {
    let _ = global_metrics();
    info!("Metrics collection initialized");
}
