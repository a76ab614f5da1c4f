//! TCP transport for a single peer connection.
//!
//! [`Transport`] owns at most one background task per connection attempt.
//! The task listens or dials, then multiplexes outbound messages, inbound
//! reads and a shutdown signal with `tokio::select!`. Everything it learns
//! is reported as a [`LinkEvent`] on an unbounded channel, tagged with the
//! attempt that produced it so stale reports can be told apart.

use crate::config::NetConfig;
use crate::error::{TransportError, TransportErrorKind};
use derive_new::new;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, trace, warn};
use tttlink_game::{LineFramer, Message, MessageSink, Role, SinkError};

/// Identifies one listen or connect attempt.
pub type AttemptId = u64;

/// How long [`Transport::shutdown`] waits before aborting the task.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

const READ_BUFFER_LEN: usize = 1024;

/// Something the transport observed.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Human-readable progress report.
    Status(String),
    /// The listener is bound and waiting on this address.
    Listening(SocketAddr),
    /// A peer connection is established.
    Connected {
        /// How this side got connected.
        role: Role,
        /// Remote address.
        peer: SocketAddr,
    },
    /// Setup failed before any peer connected.
    ConnectFailed(TransportError),
    /// A decoded message from the peer.
    Received(Message),
    /// The established connection is gone.
    Disconnected(String),
}

/// A [`TransportEvent`] tagged with the attempt that produced it.
#[derive(Debug, Clone, new)]
pub struct LinkEvent {
    /// Attempt that produced the event.
    pub attempt: AttemptId,
    /// What happened.
    pub event: TransportEvent,
}

/// Handle to the live attempt.
#[derive(Debug)]
struct Link {
    attempt: AttemptId,
    outbound: mpsc::UnboundedSender<Message>,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
    connected: Arc<AtomicBool>,
}

/// State handed to the background task.
struct LinkContext {
    attempt: AttemptId,
    events: mpsc::UnboundedSender<LinkEvent>,
    outbound: mpsc::UnboundedReceiver<Message>,
    shutdown: oneshot::Receiver<()>,
    connected: Arc<AtomicBool>,
    max_frame_len: usize,
}

impl LinkContext {
    fn emit(&self, event: TransportEvent) {
        if self.events.send(LinkEvent::new(self.attempt, event)).is_err() {
            debug!(attempt = self.attempt, "Event receiver dropped");
        }
    }
}

/// Owner of the one peer connection.
#[derive(Debug)]
pub struct Transport {
    config: NetConfig,
    events: mpsc::UnboundedSender<LinkEvent>,
    link: Option<Link>,
    next_attempt: AttemptId,
}

impl Transport {
    /// Creates an idle transport and the receiver for its events.
    #[instrument(skip(config), fields(port = config.port()))]
    pub fn new(config: NetConfig) -> (Self, mpsc::UnboundedReceiver<LinkEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let transport = Self {
            config,
            events,
            link: None,
            next_attempt: 0,
        };
        (transport, receiver)
    }

    /// The configuration this transport was built with.
    pub fn config(&self) -> &NetConfig {
        &self.config
    }

    /// Binds `ip:port` and waits for exactly one peer; this side gets mark X.
    ///
    /// Returns the new attempt id, or `None` if an attempt is already in
    /// flight, in which case nothing happens. Must be called from within a
    /// tokio runtime.
    #[instrument(skip(self))]
    pub fn listen(&mut self, ip: IpAddr, port: u16) -> Option<AttemptId> {
        if self.is_running() {
            warn!("Listen requested while an attempt is in flight, ignoring");
            return None;
        }
        let address = SocketAddr::new(ip, port);
        let poll = self.config.accept_poll();
        Some(self.spawn_link(move |ctx| run_listener(ctx, address, poll)))
    }

    /// Dials `host:port`; on success this side gets mark O.
    ///
    /// Returns the new attempt id, or `None` if an attempt is already in
    /// flight. Must be called from within a tokio runtime.
    #[instrument(skip(self, host), fields(host = %host.as_ref()))]
    pub fn connect(&mut self, host: impl AsRef<str>, port: u16) -> Option<AttemptId> {
        if self.is_running() {
            warn!("Connect requested while an attempt is in flight, ignoring");
            return None;
        }
        let host = host.as_ref().to_string();
        let limit = self.config.dial_timeout();
        Some(self.spawn_link(move |ctx| run_dialer(ctx, host, port, limit)))
    }

    /// Queues `message` for the peer.
    ///
    /// # Errors
    ///
    /// Returns [`TransportErrorKind::NotConnected`] when no connection is up.
    #[instrument(skip(self))]
    pub fn send(&self, message: Message) -> Result<(), TransportError> {
        let link = self
            .link
            .as_ref()
            .filter(|link| link.connected.load(Ordering::Acquire))
            .ok_or_else(|| TransportError::new(TransportErrorKind::NotConnected))?;
        link.outbound
            .send(message)
            .map_err(|_| TransportError::new(TransportErrorKind::NotConnected))
    }

    /// Tears down the current attempt, if any. Safe to call repeatedly.
    ///
    /// Events the stopped attempt already queued stay in the channel; check
    /// them with [`Transport::is_current`].
    #[instrument(skip(self))]
    pub fn stop(&mut self) {
        let Some(mut link) = self.link.take() else {
            return;
        };
        info!(attempt = link.attempt, "Stopping transport");
        link.connected.store(false, Ordering::Release);
        if let Some(shutdown) = link.shutdown.take() {
            let _ = shutdown.send(());
        }
        link.task.abort();
    }

    /// Like [`Transport::stop`], but waits until the sockets are closed.
    #[instrument(skip(self))]
    pub async fn shutdown(&mut self) {
        let Some(mut link) = self.link.take() else {
            return;
        };
        info!(attempt = link.attempt, "Shutting down transport");
        link.connected.store(false, Ordering::Release);
        if let Some(shutdown) = link.shutdown.take() {
            let _ = shutdown.send(());
        }
        match tokio::time::timeout(SHUTDOWN_GRACE, &mut link.task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Transport task ended abnormally"),
            Err(_) => {
                warn!("Transport task did not exit in time, aborting");
                link.task.abort();
                if let Err(e) = link.task.await {
                    debug!(error = %e, "Transport task aborted");
                }
            }
        }
    }

    /// True if `attempt` is the attempt currently owned by this transport.
    pub fn is_current(&self, attempt: AttemptId) -> bool {
        self.link.as_ref().is_some_and(|link| link.attempt == attempt)
    }

    /// True while a peer connection is up.
    pub fn is_connected(&self) -> bool {
        self.link
            .as_ref()
            .is_some_and(|link| link.connected.load(Ordering::Acquire))
    }

    /// True while an attempt's task is still alive.
    pub fn is_running(&self) -> bool {
        self.link.as_ref().is_some_and(|link| !link.task.is_finished())
    }

    fn spawn_link<F, Fut>(&mut self, run: F) -> AttemptId
    where
        F: FnOnce(LinkContext) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        // A finished task may still be parked here.
        self.stop();

        self.next_attempt += 1;
        let attempt = self.next_attempt;
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let connected = Arc::new(AtomicBool::new(false));

        let ctx = LinkContext {
            attempt,
            events: self.events.clone(),
            outbound: outbound_rx,
            shutdown: shutdown_rx,
            connected: Arc::clone(&connected),
            max_frame_len: *self.config.max_frame_len(),
        };
        let task = tokio::spawn(run(ctx));
        debug!(attempt, "Spawned transport task");

        self.link = Some(Link {
            attempt,
            outbound: outbound_tx,
            shutdown: Some(shutdown_tx),
            task,
            connected,
        });
        attempt
    }
}

impl MessageSink for Transport {
    fn send(&mut self, message: Message) -> Result<(), SinkError> {
        Transport::send(self, message).map_err(|e| SinkError::new(e.reason()))
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        if let Some(link) = self.link.take() {
            link.task.abort();
        }
    }
}

// ─────────────────────────────────────────────────────────────
//  Background tasks
// ─────────────────────────────────────────────────────────────

#[instrument(skip(ctx), fields(attempt = ctx.attempt))]
async fn run_listener(mut ctx: LinkContext, address: SocketAddr, poll: Duration) {
    let listener = match bind_listener(address) {
        Ok(listener) => listener,
        Err(e) => {
            error!(error = %e, "Failed to listen");
            ctx.emit(TransportEvent::ConnectFailed(e));
            return;
        }
    };
    let local = listener.local_addr().unwrap_or(address);
    info!(%local, "Listening for a peer");
    ctx.emit(TransportEvent::Status(format!(
        "Listening on {}:{}. Waiting...",
        local.ip(),
        local.port()
    )));
    ctx.emit(TransportEvent::Listening(local));

    let (stream, peer) = loop {
        tokio::select! {
            _ = &mut ctx.shutdown => {
                debug!("Stopped while waiting for a peer");
                return;
            }
            accepted = tokio::time::timeout(poll, listener.accept()) => match accepted {
                Ok(Ok(pair)) => break pair,
                Ok(Err(e)) => {
                    error!(error = %e, "Accept failed");
                    ctx.emit(TransportEvent::ConnectFailed(TransportError::new(
                        TransportErrorKind::Accept(e.to_string()),
                    )));
                    return;
                }
                Err(_) if ctx.events.is_closed() => {
                    debug!("Nobody is listening for events, giving up");
                    return;
                }
                Err(_) => trace!("Still waiting for a peer"),
            }
        }
    };
    // Only one peer per match.
    drop(listener);

    info!(%peer, "Peer connected");
    ctx.emit(TransportEvent::Status(format!(
        "Opponent connected from {}",
        peer
    )));
    mark_connected(&ctx, &stream);
    ctx.emit(TransportEvent::Connected {
        role: Role::Listener,
        peer,
    });
    run_connection(ctx, stream).await;
}

fn bind_listener(address: SocketAddr) -> Result<TcpListener, TransportError> {
    let bind_error = |e: io::Error| TransportError::new(TransportErrorKind::Bind(e.to_string()));
    let socket = match address {
        SocketAddr::V4(_) => TcpSocket::new_v4(),
        SocketAddr::V6(_) => TcpSocket::new_v6(),
    }
    .map_err(bind_error)?;
    socket.set_reuseaddr(true).map_err(bind_error)?;
    socket.bind(address).map_err(bind_error)?;
    socket.listen(1).map_err(bind_error)
}

#[instrument(skip(ctx), fields(attempt = ctx.attempt))]
async fn run_dialer(mut ctx: LinkContext, host: String, port: u16, limit: Duration) {
    ctx.emit(TransportEvent::Status(format!(
        "Connecting to {}:{}...",
        host, port
    )));

    let dialed = tokio::select! {
        _ = &mut ctx.shutdown => {
            debug!("Stopped while dialing");
            return;
        }
        dialed = dial(&host, port, limit) => dialed,
    };
    let stream = match dialed {
        Ok(stream) => stream,
        Err(e) => {
            warn!(error = %e, "Dial failed");
            ctx.emit(TransportEvent::ConnectFailed(e));
            return;
        }
    };
    let peer = match stream.peer_addr() {
        Ok(peer) => peer,
        Err(e) => {
            ctx.emit(TransportEvent::ConnectFailed(TransportError::new(
                TransportErrorKind::Connect(e.to_string()),
            )));
            return;
        }
    };

    info!(%peer, "Connected to host");
    ctx.emit(TransportEvent::Status("Connected to host.".to_string()));
    mark_connected(&ctx, &stream);
    ctx.emit(TransportEvent::Connected {
        role: Role::Dialer,
        peer,
    });
    run_connection(ctx, stream).await;
}

async fn dial(host: &str, port: u16, limit: Duration) -> Result<TcpStream, TransportError> {
    let target = format!("{}:{}", host, port);
    let candidates: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
        .await
        .map_err(|_| TransportErrorKind::AddressResolution(host.to_string()))?
        .collect();
    if candidates.is_empty() {
        return Err(TransportErrorKind::AddressResolution(host.to_string()).into());
    }

    match tokio::time::timeout(limit, TcpStream::connect(candidates.as_slice())).await {
        Err(_) => Err(TransportErrorKind::ConnectTimeout(target).into()),
        Ok(Err(e)) if e.kind() == io::ErrorKind::ConnectionRefused => {
            Err(TransportErrorKind::ConnectionRefused(target).into())
        }
        Ok(Err(e)) => Err(TransportErrorKind::Connect(e.to_string()).into()),
        Ok(Ok(stream)) => Ok(stream),
    }
}

/// Opens the link for sending. Must run before `Connected` is emitted.
fn mark_connected(ctx: &LinkContext, stream: &TcpStream) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!(error = %e, "Could not disable Nagle");
    }
    ctx.connected.store(true, Ordering::Release);
}

/// Pumps one established connection until either side ends it.
#[instrument(skip_all, fields(attempt = ctx.attempt))]
async fn run_connection(mut ctx: LinkContext, stream: TcpStream) {
    let (mut reader, mut writer) = stream.into_split();
    let mut framer = LineFramer::new(ctx.max_frame_len);
    let mut buffer = [0u8; READ_BUFFER_LEN];

    let reason = loop {
        tokio::select! {
            _ = &mut ctx.shutdown => {
                debug!("Connection stopped locally");
                ctx.connected.store(false, Ordering::Release);
                if let Err(e) = writer.shutdown().await {
                    debug!(error = %e, "Socket shutdown failed");
                }
                return;
            }
            outbound = ctx.outbound.recv() => match outbound {
                Some(message) => {
                    if let Err(e) = writer.write_all(&message.to_frame()).await {
                        error!(error = %e, outbound = %message, "Write failed");
                        break format!("Send Error: {}", e);
                    }
                    trace!(outbound = %message, "Sent");
                }
                None => {
                    debug!("Transport handle dropped");
                    return;
                }
            },
            read = reader.read(&mut buffer) => match read {
                Ok(0) => break "Opponent disconnected.".to_string(),
                Ok(n) => {
                    for decoded in framer.push(&buffer[..n]) {
                        match decoded {
                            Ok(message) => {
                                trace!(inbound = %message, "Received");
                                ctx.emit(TransportEvent::Received(message));
                            }
                            Err(e) => warn!(error = %e, "Discarding malformed message"),
                        }
                    }
                }
                Err(e) if matches!(
                    e.kind(),
                    io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted
                ) => break "Connection lost.".to_string(),
                Err(e) => break format!("Socket Error: {}", e),
            },
        }
    };

    ctx.connected.store(false, Ordering::Release);
    info!(%reason, "Connection closed");
    ctx.emit(TransportEvent::Disconnected(reason));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[tokio::test]
    async fn test_idle_transport() {
        let (mut transport, _events) = Transport::new(NetConfig::default());
        assert!(!transport.is_running());
        assert!(!transport.is_connected());
        assert!(!transport.is_current(1));

        let err = transport.send(Message::RematchRequest).unwrap_err();
        assert_eq!(err.kind, TransportErrorKind::NotConnected);

        transport.stop();
        transport.stop();
    }

    #[tokio::test]
    async fn test_sink_error_when_not_connected() {
        let (mut transport, _events) = Transport::new(NetConfig::default());
        let sink: &mut dyn MessageSink = &mut transport;
        assert!(sink.send(Message::Move { row: 0, col: 0 }).is_err());
    }

    #[tokio::test]
    async fn test_bind_failure_reported() {
        let (mut transport, mut events) = Transport::new(NetConfig::default());
        // TEST-NET-1 is never assigned to a local interface.
        let attempt = transport
            .listen(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1)), 0)
            .unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.attempt, attempt);
        match event.event {
            TransportEvent::ConnectFailed(e) => {
                assert!(matches!(e.kind, TransportErrorKind::Bind(_)))
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
}
