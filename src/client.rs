use crate::buffers::buffer_pool::BufferPool;
use crate::config::RelgramConfig;
use crate::connection::{Connection, ConnectionSide};
use crate::error::{ConnectError, DisconnectReason, SendError};
use crate::events::ConnectionEvents;
use crate::message_writer::MessageWriter;
use crate::packet_header::SendOption;
use crate::send_pipeline::SendPipeline;
use crate::stats::Statistics;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// A degenerate listener: one ephemeral socket with a single outbound connection.
///
/// The client runs the same receive pipeline as the listener, just without a
///  demultiplexing map - datagrams from anyone but the configured remote are dropped.
pub struct Client {
    local_addr: SocketAddr,
    connection: Connection,
    pool: Arc<BufferPool>,
    recv_task: JoinHandle<()>,
}

impl Client {
    pub async fn new(
        remote: SocketAddr,
        config: Arc<RelgramConfig>,
        events: Arc<dyn ConnectionEvents>,
        stats: Arc<dyn Statistics>,
    ) -> anyhow::Result<Client> {
        config.validate()?;

        let bind_addr: SocketAddr = if remote.is_ipv4() {
            "0.0.0.0:0".parse()?
        } else {
            "[::]:0".parse()?
        };
        let socket = Arc::new(UdpSocket::bind(bind_addr).await?);
        let local_addr = socket.local_addr()?;
        info!("bound client socket to {:?}", local_addr);

        let pipeline = Arc::new(SendPipeline::new(Arc::new(socket.clone()), stats.clone()));
        let pool = Arc::new(BufferPool::new(
            config.max_packet_size,
            config.buffer_pool_size,
        ));

        let connection = Connection::spawn(
            remote,
            ConnectionSide::Outbound,
            config.clone(),
            pipeline,
            stats.clone(),
            events,
            None,
            None,
        );

        let recv_task = tokio::spawn(Self::recv_loop(
            socket,
            connection.clone(),
            stats,
            config.max_packet_size,
        ));

        Ok(Client {
            local_addr,
            connection,
            pool,
            recv_task,
        })
    }

    async fn recv_loop(
        socket: Arc<UdpSocket>,
        connection: Connection,
        stats: Arc<dyn Statistics>,
        max_packet_size: usize,
    ) {
        let mut buf = vec![0u8; max_packet_size];
        loop {
            let (num_read, from) = match socket.recv_from(&mut buf).await {
                Ok(x) => x,
                Err(e) => {
                    error!("socket error: {}", e);
                    connection.shutdown(DisconnectReason::TransportError).await;
                    break;
                }
            };

            if from != connection.remote() {
                debug!("dropping datagram from unexpected sender {:?}", from);
                continue;
            }

            stats.on_datagram_received(num_read);
            if !connection.deliver_datagram(buf[..num_read].to_vec()).await {
                break;
            }
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// rent a framing writer from this client's buffer pool
    pub fn writer(&self, send_option: SendOption) -> MessageWriter {
        MessageWriter::new(self.pool.clone(), send_option)
    }

    /// Send the Hello handshake and wait for the remote to accept (or time out).
    pub async fn connect(&self, handshake_payload: &[u8]) -> Result<(), ConnectError> {
        self.connection.connect(handshake_payload).await
    }

    pub async fn send(&self, writer: &mut MessageWriter) -> Result<(), SendError> {
        self.connection.send(writer).await
    }

    pub async fn send_bytes(&self, payload: &[u8], send_option: SendOption) -> Result<(), SendError> {
        self.connection.send_bytes(payload, send_option).await
    }

    pub async fn disconnect(&self, reason: &[u8]) {
        self.connection.disconnect(reason).await;
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.recv_task.abort();
    }
}
