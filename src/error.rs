use thiserror::Error;

/// Errors of the framing codec. These indicate misuse of the writer / reader API or a
///  malformed buffer and are surfaced to the caller rather than tearing down a connection.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramingError {
    #[error("write of {required} bytes exceeds remaining buffer capacity {remaining}")]
    BufferOverflow { required: usize, remaining: usize },

    #[error("read past the end of the buffer")]
    Underflow,

    #[error("end_message / cancel_message without matching start_message")]
    Unbalanced,

    #[error("string payload is not valid UTF-8")]
    InvalidUtf8,
}

/// Errors surfaced when the application attempts to send on a connection.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendError {
    #[error("connection is not in Connected state")]
    NotConnected,

    #[error("send option is not valid for application sends")]
    UnsupportedSendOption,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectError {
    #[error("handshake failed: no acknowledgement from the remote endpoint")]
    ConnectFailed,

    #[error("connect is only valid on a fresh connection")]
    InvalidState,
}

/// The reason a connection reached its terminal state. Delivered with the single
///  `on_disconnected` event every terminal transition emits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// reliable retry limit exceeded or keep-alive failure
    Timeout,
    /// socket-level I/O failure
    TransportError,
    /// the remote endpoint sent a Disconnect datagram; the bytes are its opaque reason
    Remote(Vec<u8>),
    /// locally initiated teardown
    Local,
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DisconnectReason::Timeout => write!(f, "timeout"),
            DisconnectReason::TransportError => write!(f, "transport error"),
            DisconnectReason::Remote(reason) => write!(f, "remote disconnect ({} reason bytes)", reason.len()),
            DisconnectReason::Local => write!(f, "local disconnect"),
        }
    }
}
