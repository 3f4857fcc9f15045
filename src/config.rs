use anyhow::bail;
use std::time::Duration;

/// Transport configuration. The defaults are tuned for game traffic on consumer
///  networks; all timing values interact with the RTT estimator (see `rtt`).
pub struct RelgramConfig {
    /// Upper bound for a single datagram, header included. This is also the capacity of the
    ///  pooled framing buffers, so choosing it smaller reduces the per-writer footprint.
    pub max_packet_size: usize,

    /// Number of framing buffers retained in the pool - buffers in excess of this are
    ///  discarded when they are returned.
    pub buffer_pool_size: usize,

    /// Resend timeout used before any RTT sample exists, and the floor for the
    ///  RTT-derived timeout afterwards.
    pub resend_timeout_initial: Duration,

    /// Cap for the per-entry exponential backoff.
    pub resend_timeout_max: Duration,

    /// Total number of transmissions (first send included) before an unacknowledged
    ///  reliable datagram tears the connection down.
    pub resend_retry_limit: u32,

    /// Idle time after which a Ping is emitted, until the RTT estimator adapts it.
    pub keep_alive_interval: Duration,
    pub keep_alive_interval_min: Duration,
    pub keep_alive_interval_max: Duration,

    /// Number of recently seen inbound reliable ids retained for duplicate suppression.
    pub duplicate_window: usize,

    /// Granularity of the per-connection timer that drives retransmission and keep-alive.
    pub tick_interval: Duration,

    /// Depth of the per-connection inbound datagram queue fed by the listener.
    pub inbound_queue_depth: usize,
}

impl Default for RelgramConfig {
    fn default() -> RelgramConfig {
        RelgramConfig {
            max_packet_size: 65535,
            buffer_pool_size: 256,
            resend_timeout_initial: Duration::from_millis(100),
            resend_timeout_max: Duration::from_millis(1000),
            resend_retry_limit: 8,
            keep_alive_interval: Duration::from_millis(1500),
            keep_alive_interval_min: Duration::from_millis(100),
            keep_alive_interval_max: Duration::from_millis(15000),
            duplicate_window: 1024,
            tick_interval: Duration::from_millis(25),
            inbound_queue_depth: 64,
        }
    }
}

impl RelgramConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_packet_size < 64 {
            bail!("max packet size is too small to hold a header and a sub-message");
        }
        if self.max_packet_size > 65535 {
            bail!("max packet size exceeds what a UDP datagram can carry");
        }
        if self.resend_retry_limit == 0 {
            bail!("resend retry limit must be at least 1");
        }
        if self.resend_timeout_initial > self.resend_timeout_max {
            bail!("initial resend timeout exceeds the configured maximum");
        }
        if self.keep_alive_interval < self.keep_alive_interval_min
            || self.keep_alive_interval > self.keep_alive_interval_max
        {
            bail!("keep-alive interval is outside its configured range");
        }
        if self.duplicate_window == 0 {
            bail!("duplicate suppression window must hold at least one id");
        }
        if self.tick_interval.is_zero() {
            bail!("tick interval must be non-zero");
        }
        if self.inbound_queue_depth == 0 {
            bail!("inbound queue depth must be at least 1");
        }
        Ok(())
    }

    /// Window a server-side connection may linger in Connecting without a Hello before it
    ///  is silently discarded. Mirrors the client's worst-case handshake duration.
    pub(crate) fn handshake_window(&self) -> Duration {
        self.resend_timeout_max * self.resend_retry_limit
    }
}
