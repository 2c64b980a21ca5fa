//! Agent connection and receive loop

use crate::exec::CommandRunner;
use crate::AgentError;
use opsrelay_proto::{Credentials, FrameCodec, Message, MessageType};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// One live connection from the agent to its controller
///
/// Holds the read half exclusively; the write half is shared with spawned
/// command tasks so a slow command never blocks further frame reads, while
/// the mutex keeps one message in flight per direction.
pub struct AgentConn<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send + 'static,
{
    reader: R,
    writer: Arc<Mutex<W>>,
    codec: FrameCodec,
    runner: Arc<dyn CommandRunner>,
    shutdown: CancellationToken,
}

impl AgentConn<OwnedReadHalf, OwnedWriteHalf> {
    /// Connect over TCP and perform the one-way handshake
    ///
    /// No reply is awaited; the controller silently drops rejected peers.
    pub async fn connect(
        endpoint: SocketAddr,
        credentials: &Credentials,
        runner: Arc<dyn CommandRunner>,
    ) -> Result<Self, AgentError> {
        let stream = TcpStream::connect(endpoint).await.map_err(AgentError::Io)?;
        let (reader, writer) = stream.into_split();
        let conn = Self::with_io(reader, writer, credentials, runner).await?;
        info!(%endpoint, "connected to controller");
        Ok(conn)
    }
}

impl<R, W> AgentConn<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send + 'static,
{
    /// Build a connection over custom I/O and send the handshake frame
    pub async fn with_io(
        reader: R,
        mut writer: W,
        credentials: &Credentials,
        runner: Arc<dyn CommandRunner>,
    ) -> Result<Self, AgentError> {
        let codec = FrameCodec::new();
        codec
            .write_frame(&mut writer, &Message::user_data(credentials))
            .await?;
        info!(identity = %credentials.identity, "handshake sent");

        Ok(Self {
            reader,
            writer: Arc::new(Mutex::new(writer)),
            codec,
            runner,
            shutdown: CancellationToken::new(),
        })
    }

    /// Token that stops `run` when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Receive loop: dispatch frames until the transport closes or the
    /// shutdown token fires
    ///
    /// On shutdown a best-effort `Disconnect` frame is sent before the
    /// transport is closed.
    pub async fn run(mut self) -> Result<(), AgentError> {
        info!("receive loop started");
        let shutdown = self.shutdown.clone();
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("shutdown requested, disconnecting");
                    self.send_disconnect().await;
                    break;
                }
                frame = self.codec.read_frame(&mut self.reader) => match frame {
                    Ok(Some(message)) => self.dispatch(message),
                    Ok(None) => {
                        info!("controller closed the connection");
                        break;
                    }
                    Err(e) => {
                        warn!("receive failed: {}", e);
                        return Err(e.into());
                    }
                },
            }
        }
        info!("receive loop stopped");
        Ok(())
    }

    /// Dispatch one inbound message by type
    fn dispatch(&self, message: Message) {
        match message.message_type {
            MessageType::ExecuteCommand => {
                let command_line = message.payload_utf8().into_owned();
                info!("executing command: {}", command_line);

                let runner = Arc::clone(&self.runner);
                let writer = Arc::clone(&self.writer);
                tokio::spawn(async move {
                    let output = match runner.run(&command_line).await {
                        Ok(output) => output,
                        Err(e) => {
                            warn!("command failed: {}", e);
                            return;
                        }
                    };
                    let codec = FrameCodec::new();
                    let mut writer = writer.lock().await;
                    match codec
                        .write_frame(&mut *writer, &Message::command_output(&output))
                        .await
                    {
                        Ok(()) => info!("command output sent"),
                        Err(e) => warn!("failed to send command output: {}", e),
                    }
                });
            }
            other => warn!("unexpected {:?} from controller", other),
        }
    }

    /// Best-effort `Disconnect`, errors ignored, then close the transport
    async fn send_disconnect(&self) {
        let codec = FrameCodec::new();
        let mut writer = self.writer.lock().await;
        let _ = codec.write_frame(&mut *writer, &Message::disconnect()).await;
        let _ = writer.shutdown().await;
    }
}
