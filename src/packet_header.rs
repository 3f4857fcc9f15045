use anyhow::bail;
use bytes::{Buf, BufMut};

/// The 1-byte classifier at the head of every datagram.
///
/// `Reliable`, `Hello` and `Ping` are acknowledged kinds: they carry a 16-bit big-endian
///  message id immediately after the option byte, are ack'ed by the receiver and
///  retransmitted by the sender until the ack arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SendOption {
    /// fire-and-forget application payload
    None,
    /// acknowledged application payload
    Reliable,
    /// reserved for payloads split across datagrams; received Fragments are dispatched
    ///  like `None` until fragmentation is implemented
    Fragment,
    /// handshake opener, carrying the opaque handshake payload
    Hello,
    /// best-effort teardown notification, carrying opaque reason bytes
    Disconnect,
    /// acknowledgement of a single message id
    Acknowledgement,
    /// keep-alive probe; acknowledged but never delivered to the application
    Ping,
}

impl SendOption {
    pub fn as_byte(self) -> u8 {
        match self {
            SendOption::None => 0,
            SendOption::Reliable => 1,
            SendOption::Fragment => 2,
            SendOption::Hello => 8,
            SendOption::Disconnect => 9,
            SendOption::Acknowledgement => 10,
            SendOption::Ping => 12,
        }
    }

    pub fn from_byte(byte: u8) -> Option<SendOption> {
        match byte {
            0 => Some(SendOption::None),
            1 => Some(SendOption::Reliable),
            2 => Some(SendOption::Fragment),
            8 => Some(SendOption::Hello),
            9 => Some(SendOption::Disconnect),
            10 => Some(SendOption::Acknowledgement),
            12 => Some(SendOption::Ping),
            _ => None,
        }
    }

    /// true for kinds that carry a message id and participate in ack / resend / dedup
    pub fn is_acknowledged(self) -> bool {
        matches!(self, SendOption::Reliable | SendOption::Hello | SendOption::Ping)
    }
}

/// Datagram header: the send option byte, followed by the 16-bit big-endian message id
///  for acknowledged kinds.
///
/// ```ascii
/// 0: send option (u8)
/// 1: message id (u16 BE) - only for Reliable / Hello / Ping / Acknowledgement
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub send_option: SendOption,
    pub message_id: Option<u16>,
}

impl PacketHeader {
    pub fn new(send_option: SendOption, message_id: Option<u16>) -> PacketHeader {
        PacketHeader {
            send_option,
            message_id,
        }
    }

    pub fn serialized_len(&self) -> usize {
        if self.message_id.is_some() {
            3
        } else {
            1
        }
    }

    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_u8(self.send_option.as_byte());
        if let Some(id) = self.message_id {
            buf.put_u16(id);
        }
    }

    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<PacketHeader> {
        let option_byte = buf.try_get_u8()?;
        let send_option = match SendOption::from_byte(option_byte) {
            Some(send_option) => send_option,
            None => bail!("unknown send option byte {}", option_byte),
        };

        let message_id =
            if send_option.is_acknowledged() || send_option == SendOption::Acknowledgement {
                Some(buf.try_get_u16()?)
            } else {
                None
            };

        Ok(PacketHeader {
            send_option,
            message_id,
        })
    }

    /// Back-patch the message id into an already framed buffer. The framing writer
    ///  reserves the two id bytes for acknowledged kinds; the id itself is only known
    ///  when the reliable channel registers the datagram.
    pub fn patch_message_id(buf: &mut [u8], message_id: u16) {
        (&mut buf[1..3]).put_u16(message_id);
    }
}
