//! Controller: accept loop, handshake, and dispatch
//!
//! One task accepts and authenticates inbound connections; each registered
//! session gets its own reader task performing blocking frame reads; all
//! reader tasks feed a single dispatch task through one channel, preserving
//! per-session frame order.

use crate::denylist::DenyStore;
use crate::output::OutputSink;
use crate::registry::{AgentRegistry, Session};
use crate::{RelayError, Result};
use opsrelay_proto::{Credentials, FrameCodec, Message, MessageType, ProtocolError};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Depth of the reader-to-dispatch event queue
const EVENT_QUEUE_DEPTH: usize = 64;

/// Controller configuration
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Address to listen on
    pub bind_addr: SocketAddr,
    /// Password agents must present during the handshake
    pub password: String,
    /// Bound on how long an unauthenticated connection may hold a socket
    pub auth_timeout: Duration,
}

impl ControllerConfig {
    /// Create a configuration with the default auth timeout
    pub fn new(bind_addr: SocketAddr, password: impl Into<String>) -> Self {
        Self {
            bind_addr,
            password: password.into(),
            auth_timeout: Duration::from_secs(30),
        }
    }

    /// Override the handshake timeout
    pub fn with_auth_timeout(mut self, auth_timeout: Duration) -> Self {
        self.auth_timeout = auth_timeout;
        self
    }
}

/// Events flowing from per-session reader tasks into the dispatch task
enum SessionEvent {
    /// One decoded frame from a registered session
    Frame {
        /// Session the frame arrived on
        session: Arc<Session>,
        /// The decoded message
        message: Message,
    },
    /// The session's stream ended, cleanly or not
    Closed {
        /// Session whose stream ended
        session: Arc<Session>,
        /// Error that ended it, if any
        reason: Option<ProtocolError>,
    },
}

/// Builder wiring the controller to its collaborators
pub struct ControllerBuilder {
    config: ControllerConfig,
    address_denylist: Arc<dyn DenyStore>,
    identity_denylist: Arc<dyn DenyStore>,
    output: Arc<dyn OutputSink>,
}

impl ControllerBuilder {
    /// Create a builder with no-op deny-lists and a logging output sink
    pub fn new(config: ControllerConfig) -> Self {
        Self {
            config,
            address_denylist: Arc::new(crate::denylist::EmptyDenyList),
            identity_denylist: Arc::new(crate::denylist::EmptyDenyList),
            output: Arc::new(crate::output::LogSink),
        }
    }

    /// Set the store consulted with peer addresses before the handshake
    pub fn with_address_denylist(mut self, store: Arc<dyn DenyStore>) -> Self {
        self.address_denylist = store;
        self
    }

    /// Set the store consulted with asserted identities after the handshake
    pub fn with_identity_denylist(mut self, store: Arc<dyn DenyStore>) -> Self {
        self.identity_denylist = store;
        self
    }

    /// Set the sink receiving relayed command output
    pub fn with_output(mut self, sink: Arc<dyn OutputSink>) -> Self {
        self.output = sink;
        self
    }

    /// Bind the listening socket and start the accept and dispatch loops
    pub async fn start(self) -> Result<Controller> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        let local_addr = listener.local_addr()?;
        info!(%local_addr, "controller listening");

        let registry = Arc::new(AgentRegistry::new());
        let shutdown = CancellationToken::new();
        let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);

        let accept_task = tokio::spawn(accept_loop(
            listener,
            self.config,
            Arc::clone(&registry),
            self.address_denylist,
            self.identity_denylist,
            event_tx,
            shutdown.clone(),
        ));
        let dispatch_task = tokio::spawn(dispatch_loop(
            Arc::clone(&registry),
            self.output,
            event_rx,
            shutdown.clone(),
        ));

        Ok(Controller {
            registry,
            local_addr,
            shutdown,
            accept_task,
            dispatch_task,
        })
    }
}

/// The controller: accepts agents, authenticates them, relays messages
pub struct Controller {
    registry: Arc<AgentRegistry>,
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    accept_task: JoinHandle<()>,
    dispatch_task: JoinHandle<()>,
}

impl Controller {
    /// Start building a controller for the given configuration
    pub fn builder(config: ControllerConfig) -> ControllerBuilder {
        ControllerBuilder::new(config)
    }

    /// The bound listening address
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The connected-agent registry
    pub fn registry(&self) -> Arc<AgentRegistry> {
        Arc::clone(&self.registry)
    }

    /// Send a message to the agent registered under `identity`
    ///
    /// Fails with `UserOffline` if the identity is not registered. A write
    /// failure tears the target session down, like a read failure would.
    pub async fn send(&self, identity: &str, message: &Message) -> Result<()> {
        let session = self
            .registry
            .get(identity)
            .await
            .ok_or_else(|| RelayError::UserOffline(identity.to_string()))?;

        if let Err(e) = session.send(message).await {
            warn!(identity, "write failed, closing session: {}", e);
            self.registry.remove_session(&session).await;
            session.close().await;
            return Err(RelayError::Protocol(e));
        }
        Ok(())
    }

    /// Stop accepting, close every session, and stop the dispatch loop
    pub async fn shutdown(self) {
        info!("controller shutting down");
        self.shutdown.cancel();
        self.registry.drain().await;
        let _ = self.accept_task.await;
        let _ = self.dispatch_task.await;
        info!("controller stopped");
    }
}

/// Accept inbound connections and hand each to a handshake task
async fn accept_loop(
    listener: TcpListener,
    config: ControllerConfig,
    registry: Arc<AgentRegistry>,
    address_denylist: Arc<dyn DenyStore>,
    identity_denylist: Arc<dyn DenyStore>,
    events: mpsc::Sender<SessionEvent>,
    shutdown: CancellationToken,
) {
    info!("accept loop started");
    loop {
        let (stream, peer) = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    warn!("accept failed: {}", e);
                    continue;
                }
            },
        };
        debug!(%peer, "inbound connection");

        if address_denylist.contains(&peer.ip().to_string()).await {
            // Dropping the stream closes it; nothing is written back
            warn!(%peer, "rejected: denied address");
            continue;
        }

        // A stalling peer must not hold up further accepts
        tokio::spawn(handshake(
            stream,
            peer,
            config.clone(),
            Arc::clone(&registry),
            Arc::clone(&identity_denylist),
            events.clone(),
            shutdown.clone(),
        ));
    }
    info!("accept loop stopped");
}

/// Run the one-shot authentication handshake on a fresh connection
///
/// Every rejection path drops the connection silently; the peer is never
/// told why.
async fn handshake(
    stream: TcpStream,
    peer: SocketAddr,
    config: ControllerConfig,
    registry: Arc<AgentRegistry>,
    identity_denylist: Arc<dyn DenyStore>,
    events: mpsc::Sender<SessionEvent>,
    shutdown: CancellationToken,
) {
    let (mut read_half, write_half) = stream.into_split();
    let mut codec = FrameCodec::new();

    let first = match timeout(config.auth_timeout, codec.read_frame(&mut read_half)).await {
        Err(_) => {
            warn!(%peer, "rejected: handshake timed out");
            return;
        }
        Ok(Err(e)) => {
            warn!(%peer, "rejected: handshake read failed: {}", e);
            return;
        }
        Ok(Ok(None)) => {
            debug!(%peer, "closed before handshake");
            return;
        }
        Ok(Ok(Some(message))) => message,
    };

    if first.message_type != MessageType::UserData {
        warn!(%peer, "rejected: expected UserData, got {:?}", first.message_type);
        return;
    }

    let credentials = match Credentials::from_payload(&first.payload) {
        Ok(credentials) => credentials,
        Err(e) => {
            warn!(%peer, "rejected: {}", e);
            return;
        }
    };

    if credentials.credential != config.password {
        warn!(%peer, identity = %credentials.identity, "rejected: invalid credential");
        return;
    }

    if identity_denylist.contains(&credentials.identity).await {
        warn!(%peer, identity = %credentials.identity, "rejected: denied identity");
        return;
    }

    if shutdown.is_cancelled() {
        debug!(%peer, "controller shutting down, dropping fresh handshake");
        return;
    }

    let cancel = shutdown.child_token();
    let session = Arc::new(Session::new(
        credentials.identity.clone(),
        peer,
        Box::new(write_half),
        cancel.clone(),
    ));
    registry.insert(Arc::clone(&session)).await;
    info!(identity = %credentials.identity, %peer, "agent registered");

    // The codec keeps any bytes the agent pipelined behind the handshake
    tokio::spawn(session_reader(session, read_half, codec, cancel, events));
}

/// Blocking-read loop for one registered session
async fn session_reader(
    session: Arc<Session>,
    mut reader: OwnedReadHalf,
    mut codec: FrameCodec,
    cancel: CancellationToken,
    events: mpsc::Sender<SessionEvent>,
) {
    let reason = loop {
        tokio::select! {
            _ = cancel.cancelled() => break None,
            frame = codec.read_frame(&mut reader) => match frame {
                Ok(Some(message)) => {
                    let event = SessionEvent::Frame {
                        session: Arc::clone(&session),
                        message,
                    };
                    if events.send(event).await.is_err() {
                        return;
                    }
                }
                Ok(None) => break None,
                Err(e) => break Some(e),
            },
        }
    };
    let _ = events.send(SessionEvent::Closed { session, reason }).await;
}

/// Consume session events and dispatch by message type
///
/// A faulty session only ever tears itself down; the loop and all other
/// sessions keep running.
async fn dispatch_loop(
    registry: Arc<AgentRegistry>,
    output: Arc<dyn OutputSink>,
    mut events: mpsc::Receiver<SessionEvent>,
    shutdown: CancellationToken,
) {
    info!("dispatch loop started");
    loop {
        let event = tokio::select! {
            _ = shutdown.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        match event {
            SessionEvent::Frame { session, message } => match message.message_type {
                MessageType::Disconnect => {
                    info!(identity = %session.identity(), "agent disconnected");
                    registry.remove_session(&session).await;
                    session.close().await;
                }
                MessageType::CommandOutput => {
                    let text = message.payload_utf8();
                    output.command_output(session.identity(), &text).await;
                }
                MessageType::ExecuteCommand => {
                    warn!(
                        identity = %session.identity(),
                        "unexpected ExecuteCommand from agent"
                    );
                }
                MessageType::UserData => {
                    warn!(
                        identity = %session.identity(),
                        "unexpected UserData after authentication"
                    );
                }
            },
            SessionEvent::Closed { session, reason } => {
                match reason {
                    Some(e) if e.is_closed() => {
                        info!(identity = %session.identity(), "connection lost without disconnect")
                    }
                    Some(e) => {
                        warn!(identity = %session.identity(), "session failed, closing: {}", e)
                    }
                    None => debug!(identity = %session.identity(), "session stream ended"),
                }
                registry.remove_session(&session).await;
                session.close().await;
            }
        }
    }
    info!("dispatch loop stopped");
}
