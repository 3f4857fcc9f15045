use crate::buffers::buffer_pool::BufferPool;
use crate::config::RelgramConfig;
use crate::connection::{Connection, ConnectionMap, ConnectionSide};
use crate::events::{ConnectionEvents, NewConnectionHandler};
use crate::message_writer::MessageWriter;
use crate::packet_header::SendOption;
use crate::send_pipeline::SendPipeline;
use crate::stats::Statistics;
use std::collections::hash_map::Entry;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::{ToSocketAddrs, UdpSocket};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, span, warn, Level};
use uuid::Uuid;

/// The place where all other parts of the transport come together: the listener owns the
///  UDP socket, maps each remote endpoint to its `Connection`, feeds every inbound
///  datagram into the owning connection's pipeline and hands handshake payloads to the
///  application's `NewConnectionHandler`.
pub struct Listener {
    socket: Arc<UdpSocket>,
    pipeline: Arc<SendPipeline>,
    config: Arc<RelgramConfig>,
    stats: Arc<dyn Statistics>,
    events: Arc<dyn ConnectionEvents>,
    handler: Arc<dyn NewConnectionHandler>,
    connections: ConnectionMap,
    pool: Arc<BufferPool>,
    recv_task: Mutex<Option<JoinHandle<()>>>,
}

impl Listener {
    pub async fn bind(
        addr: impl ToSocketAddrs,
        config: Arc<RelgramConfig>,
        handler: Arc<dyn NewConnectionHandler>,
        events: Arc<dyn ConnectionEvents>,
        stats: Arc<dyn Statistics>,
    ) -> anyhow::Result<Arc<Listener>> {
        config.validate()?;

        let socket = Arc::new(UdpSocket::bind(addr).await?);
        info!("bound listener socket to {:?}", socket.local_addr()?);

        let pipeline = Arc::new(SendPipeline::new(Arc::new(socket.clone()), stats.clone()));
        let pool = Arc::new(BufferPool::new(
            config.max_packet_size,
            config.buffer_pool_size,
        ));

        Ok(Arc::new(Listener {
            socket,
            pipeline,
            config,
            stats,
            events,
            handler,
            connections: Default::default(),
            pool,
            recv_task: Mutex::new(None),
        }))
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// rent a framing writer from this listener's buffer pool
    pub fn writer(&self, send_option: SendOption) -> MessageWriter {
        MessageWriter::new(self.pool.clone(), send_option)
    }

    pub async fn connection(&self, remote: SocketAddr) -> Option<Connection> {
        self.connections.read().await.get(&remote).cloned()
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// spawn the receive loop on its own task
    pub fn start(self: Arc<Self>) {
        let mut guard = self.recv_task.lock().unwrap();
        if guard.is_some() {
            warn!("receive loop already started");
            return;
        }

        let this = self.clone();
        *guard = Some(tokio::spawn(async move {
            this.recv_loop().await;
        }));
    }

    pub async fn recv_loop(&self) {
        info!("starting receive loop");

        let mut buf = self.pool.get_from_pool();
        loop {
            buf.maximize_len();
            let (num_read, from) = match self.socket.recv_from(buf.as_mut()).await {
                Ok(x) => x,
                Err(e) => {
                    error!("socket error: {}", e);
                    continue;
                }
            };
            buf.truncate(num_read);
            self.stats.on_datagram_received(num_read);

            let correlation_id = Uuid::new_v4();
            let span = span!(Level::TRACE, "datagram_received", ?correlation_id);
            let _entered = span.enter();

            let connection = self.get_or_create_connection(from).await;
            if !connection.deliver_datagram(buf.as_ref().to_vec()).await {
                debug!("connection for {:?} already terminated, dropping datagram", from);
            }
        }
    }

    async fn get_or_create_connection(&self, from: SocketAddr) -> Connection {
        if let Some(connection) = self.connections.read().await.get(&from) {
            return connection.clone();
        }

        match self.connections.write().await.entry(from) {
            Entry::Occupied(e) => e.get().clone(),
            Entry::Vacant(e) => {
                debug!("new connection from {:?}", from);
                let connection = Connection::spawn(
                    from,
                    ConnectionSide::Inbound,
                    self.config.clone(),
                    self.pipeline.clone(),
                    self.stats.clone(),
                    self.events.clone(),
                    Some(self.handler.clone()),
                    Some(self.connections.clone()),
                );
                e.insert(connection).clone()
            }
        }
    }

    /// Close the socket's receive loop and tear down all connections. Established
    ///  connections get a best-effort Disconnect datagram and their single
    ///  Disconnected event.
    pub async fn stop(&self) {
        info!("stopping listener");

        if let Some(task) = self.recv_task.lock().unwrap().take() {
            task.abort();
        }

        let connections: Vec<Connection> = self
            .connections
            .write()
            .await
            .drain()
            .map(|(_, connection)| connection)
            .collect();
        for connection in connections {
            connection.disconnect(&[]).await;
        }
    }
}
