use crate::stats::Statistics;
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tracing::{error, trace};

/// This is an abstraction for sending a buffer on a UDP socket, introduced to facilitate
///  mocking the I/O part away for testing
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SendSocket: Send + Sync + 'static {
    async fn do_send_packet(&self, to: SocketAddr, packet_buf: &[u8]);

    fn local_addr(&self) -> SocketAddr;
}

#[async_trait]
impl SendSocket for Arc<UdpSocket> {
    async fn do_send_packet(&self, to: SocketAddr, packet_buf: &[u8]) {
        trace!("UDP socket: sending packet to {:?}", to);

        if let Err(e) = self.send_to(packet_buf, to).await {
            // send errors are not fatal for the socket as a whole; the reliable layer
            //  compensates for the lost datagram or times the connection out
            error!("error sending UDP packet to {:?}: {}", to, e);
        }
    }

    fn local_addr(&self) -> SocketAddr {
        self.as_ref()
            .local_addr()
            .expect("UdpSocket should have an initialized local addr")
    }
}

/// Outbound funnel shared by all connections of a listener: counts datagrams into the
///  statistics sink and hands them to the socket.
#[derive(Clone)]
pub struct SendPipeline {
    socket: Arc<dyn SendSocket>,
    stats: Arc<dyn Statistics>,
}

impl SendPipeline {
    pub fn new(socket: Arc<dyn SendSocket>, stats: Arc<dyn Statistics>) -> SendPipeline {
        SendPipeline { socket, stats }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.socket.local_addr()
    }

    pub async fn do_send_packet(&self, to: SocketAddr, packet_buf: &[u8]) {
        self.stats.on_datagram_sent(packet_buf.len());
        self.socket.do_send_packet(to, packet_buf).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::AtomicStatistics;
    use std::sync::atomic::Ordering;

    #[tokio::test]
    async fn test_pipeline_counts_and_forwards() {
        let peer = SocketAddr::from(([1, 2, 3, 4], 9));

        let mut socket = MockSendSocket::new();
        socket
            .expect_do_send_packet()
            .once()
            .withf(move |to, buf| *to == peer && buf == [1, 2, 3])
            .return_const(());

        let stats = Arc::new(AtomicStatistics::default());
        let pipeline = SendPipeline::new(Arc::new(socket), stats.clone());

        pipeline.do_send_packet(peer, &[1, 2, 3]).await;

        assert_eq!(stats.datagrams_sent.load(Ordering::Relaxed), 1);
        assert_eq!(stats.bytes_sent.load(Ordering::Relaxed), 3);
    }
}
