use crate::config::RelgramConfig;
use crate::dedup::DedupWindow;
use crate::error::{ConnectError, DisconnectReason, SendError};
use crate::events::{ConnectionEvents, NewConnectionHandler};
use crate::message_writer::MessageWriter;
use crate::packet_header::{PacketHeader, SendOption};
use crate::reliable::{AckCallback, ReliableSender};
use crate::rtt::RttEstimator;
use crate::send_pipeline::SendPipeline;
use crate::stats::Statistics;
use bytes::BufMut;
use rustc_hash::FxHashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::select;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    NotConnected,
    Connecting,
    Connected,
    Disconnecting,
}

/// Whether this endpoint initiated the connection (client) or accepted it (server).
///  The sides differ only in the handshake: outbound connections send the Hello and
///  wait for its ack, inbound connections expect the Hello as their first datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionSide {
    Outbound,
    Inbound,
}

pub(crate) type ConnectionMap = Arc<RwLock<FxHashMap<SocketAddr, Connection>>>;

/// Events produced while the inner lock is held and dispatched to the application
///  after it is released.
enum ConnectionEvent {
    Data(Vec<u8>, SendOption),
    Disconnected(DisconnectReason),
    HandshakeReceived(Vec<u8>),
}

struct ConnectionInner {
    remote: SocketAddr,
    side: ConnectionSide,
    state: ConnectionState,
    config: Arc<RelgramConfig>,
    stats: Arc<dyn Statistics>,
    pipeline: Arc<SendPipeline>,

    reliable: ReliableSender,
    dedup: DedupWindow,
    rtt: RttEstimator,
    keep_alive_interval: Duration,

    created_at: Instant,
    last_send: Instant,
    last_receive: Instant,

    /// resolved with true on Connected, false on handshake failure
    connect_waiter: Option<oneshot::Sender<bool>>,
    /// inbound side: the new-connection handler runs only for the first Hello
    hello_seen: bool,
}

impl ConnectionInner {
    fn new(
        remote: SocketAddr,
        side: ConnectionSide,
        state: ConnectionState,
        config: Arc<RelgramConfig>,
        pipeline: Arc<SendPipeline>,
        stats: Arc<dyn Statistics>,
        now: Instant,
    ) -> ConnectionInner {
        ConnectionInner {
            remote,
            side,
            state,
            keep_alive_interval: config.keep_alive_interval,
            dedup: DedupWindow::new(config.duplicate_window),
            config,
            stats,
            pipeline,
            reliable: ReliableSender::new(),
            rtt: RttEstimator::new(),
            created_at: now,
            last_send: now,
            last_receive: now,
            connect_waiter: None,
            hello_seen: false,
        }
    }

    async fn on_datagram(
        &mut self,
        datagram: &[u8],
        now: Instant,
        events: &mut Vec<ConnectionEvent>,
    ) {
        self.last_receive = now;

        let mut parse = datagram;
        let header = match PacketHeader::deser(&mut parse) {
            Ok(header) => header,
            Err(_) => {
                warn!(
                    "received datagram with unparsable header from {:?}, dropping",
                    self.remote
                );
                return;
            }
        };

        trace!(
            "datagram from {:?}: {:?}, {} payload bytes",
            self.remote,
            header.send_option,
            parse.len()
        );

        match header.send_option {
            SendOption::None | SendOption::Fragment => {
                // Fragment is reserved; until fragmentation exists it dispatches like None
                if self.state == ConnectionState::Connected {
                    events.push(ConnectionEvent::Data(parse.to_vec(), SendOption::None));
                } else {
                    debug!("dropping payload from {:?} outside Connected state", self.remote);
                }
            }
            SendOption::Reliable => {
                let Some(message_id) = header.message_id else { return };
                self.send_ack(message_id, now).await;
                if self.dedup.observe(message_id) {
                    self.stats.on_duplicate_suppressed();
                    debug!("suppressing duplicate reliable message {} from {:?}", message_id, self.remote);
                    return;
                }
                if self.state == ConnectionState::Connected {
                    events.push(ConnectionEvent::Data(parse.to_vec(), SendOption::Reliable));
                } else {
                    debug!("dropping reliable payload from {:?} outside Connected state", self.remote);
                }
            }
            SendOption::Hello => {
                let Some(message_id) = header.message_id else { return };
                self.send_ack(message_id, now).await;
                if self.dedup.observe(message_id) {
                    self.stats.on_duplicate_suppressed();
                    return;
                }
                match self.side {
                    ConnectionSide::Inbound => {
                        if self.hello_seen {
                            debug!("repeated Hello from {:?}, ignoring", self.remote);
                        } else {
                            self.hello_seen = true;
                            events.push(ConnectionEvent::HandshakeReceived(parse.to_vec()));
                        }
                    }
                    ConnectionSide::Outbound => {
                        debug!("unexpected Hello on outbound connection from {:?}", self.remote);
                    }
                }
            }
            SendOption::Disconnect => {
                self.enter_not_connected(DisconnectReason::Remote(parse.to_vec()), events);
            }
            SendOption::Acknowledgement => {
                let Some(message_id) = header.message_id else { return };
                self.on_ack(message_id, now);
            }
            SendOption::Ping => {
                let Some(message_id) = header.message_id else { return };
                self.send_ack(message_id, now).await;
                if self.dedup.observe(message_id) {
                    self.stats.on_duplicate_suppressed();
                }
                // pings are acknowledged but never delivered
            }
        }
    }

    async fn send_ack(&mut self, message_id: u16, now: Instant) {
        let mut buffer = Vec::with_capacity(3);
        PacketHeader::new(SendOption::Acknowledgement, Some(message_id)).ser(&mut buffer);

        self.pipeline.do_send_packet(self.remote, &buffer).await;
        self.stats.on_ack_sent();
        self.last_send = now;
    }

    fn on_ack(&mut self, message_id: u16, now: Instant) {
        let outcome = match self.reliable.on_ack(message_id, now) {
            Some(outcome) => outcome,
            None => {
                trace!("ack for unknown message {} from {:?} - already acknowledged or never sent", message_id, self.remote);
                return;
            }
        };
        self.stats.on_ack_received();

        if let Some(sample) = outcome.rtt_sample {
            self.rtt.on_sample(sample);
            self.keep_alive_interval = self.rtt.keep_alive_interval(
                self.config.keep_alive_interval,
                self.config.keep_alive_interval_min,
                self.config.keep_alive_interval_max,
            );
        }

        if outcome.send_option == SendOption::Hello && self.state == ConnectionState::Connecting {
            debug!("handshake acknowledged by {:?} - connected", self.remote);
            self.state = ConnectionState::Connected;
            if let Some(waiter) = self.connect_waiter.take() {
                let _ = waiter.send(true);
            }
        }

        if let Some(callback) = outcome.ack_callback {
            callback();
        }
    }

    async fn reliable_send(
        &mut self,
        send_option: SendOption,
        payload: &[u8],
        ack_callback: Option<AckCallback>,
        now: Instant,
    ) -> u16 {
        let message_id = self.reliable.next_message_id();

        let mut buffer = Vec::with_capacity(3 + payload.len());
        PacketHeader::new(send_option, Some(message_id)).ser(&mut buffer);
        buffer.put_slice(payload);

        self.register_and_send(message_id, send_option, buffer, ack_callback, now)
            .await;
        message_id
    }

    async fn register_and_send(
        &mut self,
        message_id: u16,
        send_option: SendOption,
        buffer: Vec<u8>,
        ack_callback: Option<AckCallback>,
        now: Instant,
    ) {
        let resend_timeout = self.rtt.resend_timeout(
            self.config.resend_timeout_initial,
            self.config.resend_timeout_max,
        );

        self.pipeline.do_send_packet(self.remote, &buffer).await;
        self.stats.on_reliable_sent();
        self.last_send = now;

        self.reliable
            .register(message_id, send_option, buffer, now, resend_timeout, ack_callback);
    }

    async fn start_connect(&mut self, handshake_payload: &[u8], now: Instant) -> oneshot::Receiver<bool> {
        let (waiter_tx, waiter_rx) = oneshot::channel();
        self.state = ConnectionState::Connecting;
        self.connect_waiter = Some(waiter_tx);

        debug!("connecting to {:?}", self.remote);
        self.reliable_send(SendOption::Hello, handshake_payload, None, now)
            .await;
        waiter_rx
    }

    async fn send_writer(
        &mut self,
        writer: &mut MessageWriter,
        ack_callback: Option<AckCallback>,
        now: Instant,
    ) -> Result<(), SendError> {
        if self.state != ConnectionState::Connected {
            return Err(SendError::NotConnected);
        }

        match writer.send_option() {
            SendOption::None => {
                self.pipeline.do_send_packet(self.remote, writer.bytes()).await;
                self.last_send = now;
                Ok(())
            }
            SendOption::Reliable => {
                let message_id = self.reliable.next_message_id();
                writer.patch_message_id(message_id);
                let buffer = writer.bytes().to_vec();
                self.register_and_send(message_id, SendOption::Reliable, buffer, ack_callback, now)
                    .await;
                Ok(())
            }
            _ => Err(SendError::UnsupportedSendOption),
        }
    }

    async fn send_bytes(
        &mut self,
        payload: &[u8],
        send_option: SendOption,
        ack_callback: Option<AckCallback>,
        now: Instant,
    ) -> Result<(), SendError> {
        if self.state != ConnectionState::Connected {
            return Err(SendError::NotConnected);
        }

        match send_option {
            SendOption::None => {
                // prepend exactly the 1-byte send option header to the payload
                let mut buffer = Vec::with_capacity(1 + payload.len());
                PacketHeader::new(SendOption::None, None).ser(&mut buffer);
                buffer.put_slice(payload);

                self.pipeline.do_send_packet(self.remote, &buffer).await;
                self.last_send = now;
                Ok(())
            }
            SendOption::Reliable => {
                self.reliable_send(SendOption::Reliable, payload, ack_callback, now)
                    .await;
                Ok(())
            }
            _ => Err(SendError::UnsupportedSendOption),
        }
    }

    async fn on_tick(&mut self, now: Instant, events: &mut Vec<ConnectionEvent>) {
        if self.state == ConnectionState::NotConnected {
            return;
        }

        // inbound connections that never produced a Hello are discarded silently
        if self.side == ConnectionSide::Inbound
            && self.state == ConnectionState::Connecting
            && !self.hello_seen
            && now.duration_since(self.created_at) > self.config.handshake_window()
        {
            debug!("no handshake from {:?} within the handshake window", self.remote);
            self.enter_not_connected(DisconnectReason::Timeout, events);
            return;
        }

        for message_id in self.reliable.due_ids(now) {
            let failed = match self.reliable.entry_mut(message_id) {
                None => continue,
                Some(entry) => {
                    if entry.send_count >= self.config.resend_retry_limit {
                        true
                    } else {
                        trace!(
                            "retransmitting message {} to {:?} (attempt {}, {:?} since last send)",
                            message_id,
                            self.remote,
                            entry.send_count + 1,
                            now.duration_since(entry.last_sent_at)
                        );
                        entry.send_count += 1;
                        entry.last_sent_at = now;
                        entry.current_timeout =
                            std::cmp::min(entry.current_timeout * 2, self.config.resend_timeout_max);
                        entry.next_resend_at = now + entry.current_timeout;
                        false
                    }
                }
            };

            if failed {
                debug!("reliable retry limit reached for {:?}", self.remote);
                self.enter_not_connected(DisconnectReason::Timeout, events);
                return;
            }

            if let Some(entry) = self.reliable.entry(message_id) {
                self.pipeline.do_send_packet(self.remote, &entry.buffer).await;
            }
            self.stats.on_retransmission();
            self.last_send = now;
        }

        if self.state == ConnectionState::Connected
            && now.duration_since(self.last_send) >= self.keep_alive_interval
        {
            trace!("keep-alive: sending ping to {:?}", self.remote);
            self.reliable_send(SendOption::Ping, &[], None, now).await;
        }
    }

    async fn send_disconnect_datagram(&mut self, reason: &[u8]) {
        let mut buffer = Vec::with_capacity(1 + reason.len());
        PacketHeader::new(SendOption::Disconnect, None).ser(&mut buffer);
        buffer.put_slice(reason);

        // best effort: no ack, no resend
        self.pipeline.do_send_packet(self.remote, &buffer).await;
    }

    async fn local_disconnect(&mut self, reason: &[u8], events: &mut Vec<ConnectionEvent>) {
        match self.state {
            ConnectionState::Connected => {
                self.state = ConnectionState::Disconnecting;
                self.send_disconnect_datagram(reason).await;
                self.enter_not_connected(DisconnectReason::Local, events);
            }
            ConnectionState::Connecting | ConnectionState::Disconnecting => {
                self.enter_not_connected(DisconnectReason::Local, events);
            }
            ConnectionState::NotConnected => {}
        }
    }

    /// The single entry point into the terminal state. NotConnected is sticky, and
    ///  exactly one Disconnected event is emitted for a connection that was established;
    ///  a connection still in its handshake resolves the connect waiter instead.
    fn enter_not_connected(&mut self, reason: DisconnectReason, events: &mut Vec<ConnectionEvent>) {
        match self.state {
            ConnectionState::NotConnected => return,
            ConnectionState::Connecting => {
                debug!("connection to {:?} failed during handshake: {}", self.remote, reason);
                if let Some(waiter) = self.connect_waiter.take() {
                    let _ = waiter.send(false);
                }
            }
            ConnectionState::Connected | ConnectionState::Disconnecting => {
                debug!("connection to {:?} closed: {}", self.remote, reason);
                events.push(ConnectionEvent::Disconnected(reason));
            }
        }

        self.state = ConnectionState::NotConnected;
        self.reliable.clear();
    }
}

/// Handle to one logical peer multiplexed over the shared UDP socket.
///
/// The handle is cheap to clone; all per-connection state lives behind a lock that is
///  also taken by the connection's own task. Inbound datagrams arrive through the
///  listener's demultiplexer and are processed one at a time; timers for retransmission
///  and keep-alive run on the same task, so all protocol state is mutated sequentially.
#[derive(Clone)]
pub struct Connection {
    remote: SocketAddr,
    inner: Arc<RwLock<ConnectionInner>>,
    inbound_tx: mpsc::Sender<Vec<u8>>,
    events: Arc<dyn ConnectionEvents>,
}

impl Connection {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn spawn(
        remote: SocketAddr,
        side: ConnectionSide,
        config: Arc<RelgramConfig>,
        pipeline: Arc<SendPipeline>,
        stats: Arc<dyn Statistics>,
        events: Arc<dyn ConnectionEvents>,
        handler: Option<Arc<dyn NewConnectionHandler>>,
        connections: Option<ConnectionMap>,
    ) -> Connection {
        let initial_state = match side {
            ConnectionSide::Outbound => ConnectionState::NotConnected,
            ConnectionSide::Inbound => ConnectionState::Connecting,
        };

        let inner = Arc::new(RwLock::new(ConnectionInner::new(
            remote,
            side,
            initial_state,
            config.clone(),
            pipeline,
            stats,
            Instant::now(),
        )));

        let (inbound_tx, inbound_rx) = mpsc::channel(config.inbound_queue_depth);

        let connection = Connection {
            remote,
            inner,
            inbound_tx,
            events,
        };

        tokio::spawn(Self::run(
            connection.clone(),
            inbound_rx,
            handler,
            connections,
            config.tick_interval,
        ));

        connection
    }

    /// The per-connection task: awaits the next inbound datagram or timer tick,
    ///  processes it to completion, then dispatches the resulting application events
    ///  outside the lock. Exits when the terminal state is reached, removing the
    ///  connection from the listener's map.
    async fn run(
        connection: Connection,
        mut inbound_rx: mpsc::Receiver<Vec<u8>>,
        handler: Option<Arc<dyn NewConnectionHandler>>,
        connections: Option<ConnectionMap>,
        tick: Duration,
    ) {
        let mut ticker = interval(tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let mut events = Vec::new();

            select! {
                maybe_datagram = inbound_rx.recv() => match maybe_datagram {
                    Some(datagram) => {
                        connection.inner.write().await
                            .on_datagram(&datagram, Instant::now(), &mut events).await;
                    }
                    None => {
                        // the demultiplexer dropped us: treat like a failed transport
                        connection.inner.write().await
                            .enter_not_connected(DisconnectReason::TransportError, &mut events);
                    }
                },
                _ = ticker.tick() => {
                    connection.inner.write().await
                        .on_tick(Instant::now(), &mut events).await;
                }
            }

            for event in events {
                match event {
                    ConnectionEvent::HandshakeReceived(payload) => {
                        connection.handle_handshake(payload, handler.as_deref()).await;
                    }
                    other => connection.dispatch_event(other).await,
                }
            }

            if connection.inner.read().await.state == ConnectionState::NotConnected {
                if let Some(connections) = &connections {
                    connections.write().await.remove(&connection.remote);
                }
                break;
            }
        }

        trace!("connection task for {:?} terminated", connection.remote);
    }

    async fn handle_handshake(&self, payload: Vec<u8>, handler: Option<&dyn NewConnectionHandler>) {
        let accept = match handler {
            Some(handler) => handler.on_new_connection(&payload, self).await,
            None => false,
        };

        let mut events = Vec::new();
        {
            let mut inner = self.inner.write().await;
            if accept {
                if inner.state == ConnectionState::Connecting {
                    debug!("handshake from {:?} accepted", self.remote);
                    inner.state = ConnectionState::Connected;
                }
            } else {
                debug!("handshake from {:?} rejected", self.remote);
                inner.send_disconnect_datagram(&[]).await;
                inner.enter_not_connected(DisconnectReason::Local, &mut events);
            }
        }
        self.dispatch_events(events).await;
    }

    async fn dispatch_event(&self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Data(payload, send_option) => {
                self.events
                    .on_data_received(self.remote, payload, send_option)
                    .await;
            }
            ConnectionEvent::Disconnected(reason) => {
                self.events.on_disconnected(self.remote, reason).await;
            }
            ConnectionEvent::HandshakeReceived(_) => {
                // handled by the connection task before dispatch
            }
        }
    }

    async fn dispatch_events(&self, events: Vec<ConnectionEvent>) {
        for event in events {
            self.dispatch_event(event).await;
        }
    }

    pub fn remote(&self) -> SocketAddr {
        self.remote
    }

    pub async fn state(&self) -> ConnectionState {
        self.inner.read().await.state
    }

    pub async fn time_since_last_receive(&self) -> Duration {
        Instant::now().duration_since(self.inner.read().await.last_receive)
    }

    /// Send the Hello handshake and wait until the remote acknowledges it (Connected)
    ///  or the retry limit is exhausted (ConnectFailed).
    pub async fn connect(&self, handshake_payload: &[u8]) -> Result<(), ConnectError> {
        let waiter = {
            let mut inner = self.inner.write().await;
            if inner.side != ConnectionSide::Outbound
                || inner.state != ConnectionState::NotConnected
            {
                return Err(ConnectError::InvalidState);
            }
            inner.start_connect(handshake_payload, Instant::now()).await
        };

        match waiter.await {
            Ok(true) => Ok(()),
            _ => Err(ConnectError::ConnectFailed),
        }
    }

    /// Send a framed message. Reliable writers get their message id assigned here.
    pub async fn send(&self, writer: &mut MessageWriter) -> Result<(), SendError> {
        self.inner
            .write()
            .await
            .send_writer(writer, None, Instant::now())
            .await
    }

    /// Convenience: wrap `payload` in a minimal frame and send it.
    pub async fn send_bytes(&self, payload: &[u8], send_option: SendOption) -> Result<(), SendError> {
        self.inner
            .write()
            .await
            .send_bytes(payload, send_option, None, Instant::now())
            .await
    }

    /// Like `send_bytes` with `SendOption::Reliable`, invoking `ack_callback` exactly
    ///  once when the remote acknowledges the datagram.
    pub async fn send_reliable_with_ack(
        &self,
        payload: &[u8],
        ack_callback: AckCallback,
    ) -> Result<(), SendError> {
        self.inner
            .write()
            .await
            .send_bytes(payload, SendOption::Reliable, Some(ack_callback), Instant::now())
            .await
    }

    /// Best-effort transmission of a Disconnect datagram, then local teardown.
    pub async fn disconnect(&self, reason: &[u8]) {
        let mut events = Vec::new();
        self.inner
            .write()
            .await
            .local_disconnect(reason, &mut events)
            .await;
        self.dispatch_events(events).await;
    }

    /// Terminal teardown without notifying the remote; used by the demultiplexer.
    pub(crate) async fn shutdown(&self, reason: DisconnectReason) {
        let mut events = Vec::new();
        self.inner
            .write()
            .await
            .enter_not_connected(reason, &mut events);
        self.dispatch_events(events).await;
    }

    /// Feed one inbound datagram into this connection's pipeline. Returns false if the
    ///  connection's task has already terminated.
    pub(crate) async fn deliver_datagram(&self, datagram: Vec<u8>) -> bool {
        self.inbound_tx.send(datagram).await.is_ok()
    }
}
