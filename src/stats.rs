use std::sync::atomic::{AtomicU64, Ordering};

/// Opaque sink for transport counters. Every component reports into this; what happens
///  with the numbers (metrics, logging, nothing) is up to the application.
///
/// All methods default to no-ops so implementors only pick up the counters they care about.
pub trait Statistics: Send + Sync + 'static {
    fn on_datagram_sent(&self, _bytes: usize) {}
    fn on_datagram_received(&self, _bytes: usize) {}
    fn on_reliable_sent(&self) {}
    fn on_retransmission(&self) {}
    fn on_duplicate_suppressed(&self) {}
    fn on_ack_sent(&self) {}
    fn on_ack_received(&self) {}
}

pub struct NoopStatistics;
impl Statistics for NoopStatistics {}

/// Simple atomic counters, good enough for tests and demos.
#[derive(Default)]
pub struct AtomicStatistics {
    pub datagrams_sent: AtomicU64,
    pub bytes_sent: AtomicU64,
    pub datagrams_received: AtomicU64,
    pub bytes_received: AtomicU64,
    pub reliable_sent: AtomicU64,
    pub retransmissions: AtomicU64,
    pub duplicates_suppressed: AtomicU64,
    pub acks_sent: AtomicU64,
    pub acks_received: AtomicU64,
}

impl Statistics for AtomicStatistics {
    fn on_datagram_sent(&self, bytes: usize) {
        self.datagrams_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    fn on_datagram_received(&self, bytes: usize) {
        self.datagrams_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    fn on_reliable_sent(&self) {
        self.reliable_sent.fetch_add(1, Ordering::Relaxed);
    }

    fn on_retransmission(&self) {
        self.retransmissions.fetch_add(1, Ordering::Relaxed);
    }

    fn on_duplicate_suppressed(&self) {
        self.duplicates_suppressed.fetch_add(1, Ordering::Relaxed);
    }

    fn on_ack_sent(&self) {
        self.acks_sent.fetch_add(1, Ordering::Relaxed);
    }

    fn on_ack_received(&self) {
        self.acks_received.fetch_add(1, Ordering::Relaxed);
    }
}
