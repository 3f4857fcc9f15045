use crate::packet_header::SendOption;
use rustc_hash::FxHashMap;
use std::time::Duration;
use tokio::time::Instant;

/// Effect invoked exactly once when the matching acknowledgement arrives.
pub type AckCallback = Box<dyn FnOnce() + Send + Sync + 'static>;

/// Bookkeeping for one unacknowledged reliable datagram. An entry exists in the send
///  table iff the datagram is unacknowledged; removal (ack or connection teardown) is
///  the only destruction path.
pub(crate) struct ResendEntry {
    pub message_id: u16,
    pub send_option: SendOption,
    /// the framed datagram, header included, as it goes on the wire on every (re)send
    pub buffer: Vec<u8>,
    pub send_count: u32,
    pub first_sent_at: Instant,
    pub last_sent_at: Instant,
    pub next_resend_at: Instant,
    pub current_timeout: Duration,
    pub ack_callback: Option<AckCallback>,
}

pub(crate) struct AckOutcome {
    pub send_option: SendOption,
    /// RTT sample per Karn's algorithm: only present if the datagram was never retransmitted
    pub rtt_sample: Option<Duration>,
    pub ack_callback: Option<AckCallback>,
}

/// The outbound half of the reliable channel: id assignment and the outstanding-packet
///  table. Transmission itself stays with the connection, which owns the send pipeline.
pub(crate) struct ReliableSender {
    last_message_id: u16,
    send_table: FxHashMap<u16, ResendEntry>,
}

impl ReliableSender {
    pub fn new() -> ReliableSender {
        ReliableSender {
            last_message_id: 0,
            send_table: FxHashMap::default(),
        }
    }

    /// next outbound message id; wraps mod 2^16
    pub fn next_message_id(&mut self) -> u16 {
        self.last_message_id = self.last_message_id.wrapping_add(1);
        self.last_message_id
    }

    pub fn register(
        &mut self,
        message_id: u16,
        send_option: SendOption,
        buffer: Vec<u8>,
        now: Instant,
        resend_timeout: Duration,
        ack_callback: Option<AckCallback>,
    ) {
        let previous = self.send_table.insert(
            message_id,
            ResendEntry {
                message_id,
                send_option,
                buffer,
                send_count: 1,
                first_sent_at: now,
                last_sent_at: now,
                next_resend_at: now + resend_timeout,
                current_timeout: resend_timeout,
                ack_callback,
            },
        );
        debug_assert!(previous.is_none(), "message id reused while still in flight");
    }

    /// Process an acknowledgement. Returns None for unknown (already acked or never
    ///  sent) ids, which is the duplicate-ack case.
    pub fn on_ack(&mut self, message_id: u16, now: Instant) -> Option<AckOutcome> {
        let mut entry = self.send_table.remove(&message_id)?;

        let rtt_sample = if entry.send_count == 1 {
            Some(now.duration_since(entry.first_sent_at))
        } else {
            None
        };

        Some(AckOutcome {
            send_option: entry.send_option,
            rtt_sample,
            ack_callback: entry.ack_callback.take(),
        })
    }

    /// Ids whose resend timer has expired, in ascending wrap-aware id order rooted at
    ///  the oldest unacknowledged id.
    pub fn due_ids(&self, now: Instant) -> Vec<u16> {
        let root = match self
            .send_table
            .values()
            .min_by_key(|entry| entry.first_sent_at)
        {
            Some(oldest) => oldest.message_id,
            None => return Vec::new(),
        };

        let mut due: Vec<u16> = self
            .send_table
            .values()
            .filter(|entry| entry.next_resend_at <= now)
            .map(|entry| entry.message_id)
            .collect();
        due.sort_by_key(|id| id.wrapping_sub(root));
        due
    }

    pub fn entry(&self, message_id: u16) -> Option<&ResendEntry> {
        self.send_table.get(&message_id)
    }

    pub fn entry_mut(&mut self, message_id: u16) -> Option<&mut ResendEntry> {
        self.send_table.get_mut(&message_id)
    }

    pub fn contains(&self, message_id: u16) -> bool {
        self.send_table.contains_key(&message_id)
    }

    pub fn outstanding(&self) -> usize {
        self.send_table.len()
    }

    pub fn clear(&mut self) {
        self.send_table.clear();
    }
}
