//! A lightweight reliable-datagram transport layered over UDP, designed for low-latency
//!  game traffic.
//!
//! ## Design goals
//!
//! * Many logical peers multiplexed on a single UDP socket
//!   * a listening socket handles all 'connections'; each remote endpoint maps to one
//!     `Connection` instance
//!   * a degenerate client variant drives a single outbound connection over an
//!     ephemeral socket
//! * The abstraction is sending / receiving *datagram-sized messages*, not byte streams
//! * An at-least-once delivery channel on top of UDP's unreliable unordered service
//!   * reliable datagrams carry a 16-bit sequence id, are acknowledged individually and
//!     retransmitted on timer expiry with exponential backoff
//!   * the receiver suppresses duplicates in a bounded window but performs *no*
//!     reordering: delivery is in arrival order
//!   * this is explicitly weaker than TCP - dropped-and-recovered datagrams arrive
//!     late rather than stalling fresh ones
//! * Connection-oriented API (connect / send / receive / disconnect) with an explicit
//!   handshake: the opaque Hello payload is handed to the application, which accepts or
//!   rejects the peer
//! * Per-peer liveness through acknowledged keep-alive pings, with the probe interval
//!   adapted from a smoothed RTT estimate
//!
//! Out of scope: congestion control, fragmentation of payloads larger than one datagram
//!  (a send option byte is reserved), encryption, and ordered delivery across reliable
//!  messages.
//!
//! ## Wire format
//!
//! Every UDP payload is one framing unit:
//!
//! ```ascii
//! 0: send option (u8):
//!    *  0 None - fire-and-forget payload
//!    *  1 Reliable - acknowledged payload
//!    *  2 Fragment - reserved, currently dispatched like None
//!    *  8 Hello - handshake opener (reliable machinery)
//!    *  9 Disconnect - best-effort teardown, opaque reason bytes follow
//!    * 10 Acknowledgement - the 16-bit id being acknowledged follows
//!    * 12 Ping - keep-alive probe (reliable machinery, never delivered)
//! 1: message id (u16 BE) - only for Reliable / Hello / Ping / Acknowledgement
//! *: payload
//! ```
//!
//! Application payloads are built with [`message_writer::MessageWriter`] as nested
//!  length-prefixed sub-messages and parsed with [`message_reader::MessageReader`]:
//!
//! ```ascii
//! sub-message := [length: u16 LE][tag: u8][body: length bytes]
//! ```
//!
//! Payload integers are little-endian; only the message id in the datagram header is
//!  big-endian. Strings are UTF-8 prefixed by a packed length. Packed integers are
//!  7-bit groups, little-endian, with continuation bit 0x80 set on all bytes except
//!  the last; the encoding is minimal, so values 0..=127 occupy one byte.

pub mod buffers;
pub mod client;
pub mod config;
pub mod connection;
mod dedup;
pub mod error;
pub mod events;
pub mod listener;
pub mod message_reader;
pub mod message_writer;
pub mod packet_header;
mod reliable;
mod rtt;
pub mod send_pipeline;
pub mod stats;

pub use reliable::AckCallback;
