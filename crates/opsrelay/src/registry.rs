//! Session records and the connected-agent registry

use opsrelay_proto::{FrameCodec, Message, ProtocolError};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// The exclusively-owned write half of a session's transport
pub(crate) type SessionWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// One authenticated agent connection
///
/// Created by the controller after a successful handshake and owned by the
/// registry. Closing the session closes its transport; an in-flight read on
/// the paired read half observes the close as `TransportClosed`.
pub struct Session {
    /// Agent-supplied name, asserted during the handshake
    identity: String,
    /// Peer network address, used for address-based deny checks
    remote_addr: SocketAddr,
    /// Write half of the transport; one message in flight at a time
    writer: Mutex<SessionWriter>,
    /// Cancels this session's reader task when the session closes
    cancel: CancellationToken,
}

impl Session {
    /// Create a session record for an authenticated connection
    pub(crate) fn new(
        identity: String,
        remote_addr: SocketAddr,
        writer: SessionWriter,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            identity,
            remote_addr,
            writer: Mutex::new(writer),
            cancel,
        }
    }

    /// The identity this session registered under
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// The peer's network address
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Whether the session has been closed
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Write one frame to this agent
    pub async fn send(&self, message: &Message) -> Result<(), ProtocolError> {
        if self.cancel.is_cancelled() {
            return Err(ProtocolError::TransportClosed);
        }
        let codec = FrameCodec::new();
        let mut writer = self.writer.lock().await;
        codec.write_frame(&mut *writer, message).await
    }

    /// Close the transport
    ///
    /// Idempotent and safe to call concurrently with an in-flight read on
    /// the paired read half.
    pub async fn close(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.cancel.cancel();
        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.shutdown().await {
            debug!(identity = %self.identity, "socket shutdown: {}", e);
        }
    }
}

/// Connected-agent registry, the single source of truth for who is online
///
/// All operations are mutually exclusive through one lock; the accept loop
/// inserts, the dispatch loop removes, and `send` looks up concurrently.
#[derive(Default)]
pub struct AgentRegistry {
    sessions: Mutex<HashMap<String, Arc<Session>>>,
}

impl AgentRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a session, replacing any prior session under the same identity
    ///
    /// The replaced session is closed so its transport is not leaked.
    pub async fn insert(&self, session: Arc<Session>) {
        let prior = {
            let mut sessions = self.sessions.lock().await;
            sessions.insert(session.identity().to_string(), session)
        };
        if let Some(prior) = prior {
            warn!(identity = %prior.identity(), "replacing existing session");
            prior.close().await;
        }
    }

    /// Remove and return the session registered under `identity`
    pub async fn remove(&self, identity: &str) -> Option<Arc<Session>> {
        self.sessions.lock().await.remove(identity)
    }

    /// Remove a specific session, only if it is still the registered one
    ///
    /// A reader task reporting a stale session must not evict the newer
    /// session that replaced it under the same identity.
    pub async fn remove_session(&self, session: &Arc<Session>) -> bool {
        let mut sessions = self.sessions.lock().await;
        match sessions.get(session.identity()) {
            Some(current) if Arc::ptr_eq(current, session) => {
                sessions.remove(session.identity());
                true
            }
            _ => false,
        }
    }

    /// Look up the session registered under `identity`
    pub async fn get(&self, identity: &str) -> Option<Arc<Session>> {
        self.sessions.lock().await.get(identity).cloned()
    }

    /// A stable snapshot of the current sessions
    ///
    /// Callers may mutate the registry while iterating the snapshot.
    pub async fn snapshot(&self) -> Vec<Arc<Session>> {
        self.sessions.lock().await.values().cloned().collect()
    }

    /// Number of registered sessions
    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Whether no sessions are registered
    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }

    /// Remove and close every session
    pub async fn drain(&self) {
        let all: Vec<Arc<Session>> = {
            let mut sessions = self.sessions.lock().await;
            sessions.drain().map(|(_, session)| session).collect()
        };
        for session in all {
            session.close().await;
        }
    }
}
