use crate::connection::Connection;
use crate::error::DisconnectReason;
use crate::packet_header::SendOption;
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use std::net::SocketAddr;

/// Application-visible connection events. Callbacks run on the connection's own task
///  and must not block; the next inbound datagram is only processed once a callback
///  returns.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ConnectionEvents: Send + Sync + 'static {
    /// a payload arrived; `send_option` tells reliable from fire-and-forget delivery
    async fn on_data_received(&self, remote: SocketAddr, payload: Vec<u8>, send_option: SendOption);

    /// the connection reached its terminal state; fired exactly once per connection
    async fn on_disconnected(&self, remote: SocketAddr, reason: DisconnectReason);
}

/// Decides whether an inbound handshake is accepted. Invoked once per server-side
///  connection with the opaque payload bytes carried in the Hello datagram.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait NewConnectionHandler: Send + Sync + 'static {
    async fn on_new_connection(&self, handshake_payload: &[u8], connection: &Connection) -> bool;
}
