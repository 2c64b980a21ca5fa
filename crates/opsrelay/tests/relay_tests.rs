//! End-to-end tests running a controller and agents over loopback TCP

use async_trait::async_trait;
use opsrelay::registry::AgentRegistry;
use opsrelay::{Controller, ControllerConfig, FileDenyList, OutputSink};
use opsrelay_agent::agent::AgentConn;
use opsrelay_agent::exec::CommandRunner;
use opsrelay_agent::AgentError;
use opsrelay_proto::{Credentials, FrameCodec, Message};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};

fn any_addr() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

fn test_config() -> ControllerConfig {
    ControllerConfig::new(any_addr(), "secret").with_auth_timeout(Duration::from_millis(500))
}

/// Sink double that forwards relayed output to the test
struct CollectSink(mpsc::UnboundedSender<(String, String)>);

#[async_trait]
impl OutputSink for CollectSink {
    async fn command_output(&self, identity: &str, output: &str) {
        let _ = self.0.send((identity.to_string(), output.to_string()));
    }
}

/// Runner double emulating the shell collaborator
struct StubRunner;

#[async_trait]
impl CommandRunner for StubRunner {
    async fn run(&self, command_line: &str) -> Result<String, AgentError> {
        match command_line {
            "echo hi" => Ok("hi\n".to_string()),
            other => Ok(format!("ran: {}\n", other)),
        }
    }
}

async fn wait_for_len(registry: &AgentRegistry, expected: usize) {
    for _ in 0..200 {
        if registry.len().await == expected {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "registry did not reach {} sessions (has {})",
        expected,
        registry.len().await
    );
}

async fn start_agent(addr: SocketAddr, identity: &str, credential: &str) {
    let credentials = Credentials::new(identity, credential).unwrap();
    let conn = AgentConn::connect(addr, &credentials, Arc::new(StubRunner))
        .await
        .unwrap();
    tokio::spawn(conn.run());
}

#[tokio::test]
async fn end_to_end_execute_and_collect_output() {
    let (tx, mut outputs) = mpsc::unbounded_channel();
    let controller = Controller::builder(test_config())
        .with_output(Arc::new(CollectSink(tx)))
        .start()
        .await
        .unwrap();
    let registry = controller.registry();

    start_agent(controller.local_addr(), "alice", "secret").await;
    wait_for_len(&registry, 1).await;
    assert!(registry.get("alice").await.is_some());

    controller
        .send("alice", &Message::execute_command("echo hi"))
        .await
        .unwrap();

    let (identity, output) = timeout(Duration::from_secs(5), outputs.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(identity, "alice");
    assert_eq!(output, "hi\n");

    controller.shutdown().await;
}

#[tokio::test]
async fn wrong_password_is_rejected_silently() {
    let controller = Controller::builder(test_config()).start().await.unwrap();
    let registry = controller.registry();

    let mut stream = TcpStream::connect(controller.local_addr()).await.unwrap();
    let codec = FrameCodec::new();
    let credentials = Credentials::new("bob", "wrong").unwrap();
    codec
        .write_frame(&mut stream, &Message::user_data(&credentials))
        .await
        .unwrap();

    // The connection is closed without a single byte written back
    let mut reply = FrameCodec::new();
    let result = timeout(Duration::from_secs(5), reply.read_frame(&mut stream))
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_none());
    assert!(registry.is_empty().await);

    controller.shutdown().await;
}

#[tokio::test]
async fn denied_identity_is_not_registered() {
    let dir = tempfile::tempdir().unwrap();
    let denylist = FileDenyList::new(dir.path().join("banlist.txt"));
    denylist.add("mallory").await.unwrap();

    let controller = Controller::builder(test_config())
        .with_identity_denylist(Arc::new(denylist))
        .start()
        .await
        .unwrap();
    let registry = controller.registry();

    let mut stream = TcpStream::connect(controller.local_addr()).await.unwrap();
    let codec = FrameCodec::new();
    let credentials = Credentials::new("mallory", "secret").unwrap();
    codec
        .write_frame(&mut stream, &Message::user_data(&credentials))
        .await
        .unwrap();

    let mut buf = [0u8; 16];
    let n = timeout(Duration::from_secs(5), stream.read(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(n, 0);
    assert!(registry.is_empty().await);

    controller.shutdown().await;
}

#[tokio::test]
async fn denied_address_is_dropped_before_handshake() {
    let dir = tempfile::tempdir().unwrap();
    let denylist = FileDenyList::new(dir.path().join("ipbanlist.txt"));
    denylist.add("127.0.0.1").await.unwrap();

    let controller = Controller::builder(test_config())
        .with_address_denylist(Arc::new(denylist))
        .start()
        .await
        .unwrap();
    let registry = controller.registry();

    let mut stream = TcpStream::connect(controller.local_addr()).await.unwrap();
    let mut buf = [0u8; 16];
    let n = timeout(Duration::from_secs(5), stream.read(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(n, 0);
    assert!(registry.is_empty().await);

    controller.shutdown().await;
}

#[tokio::test]
async fn registry_tracks_connects_and_disconnects() {
    let controller = Controller::builder(test_config()).start().await.unwrap();
    let registry = controller.registry();

    let identities = ["a1", "a2", "a3", "a4"];
    let mut shutdowns = Vec::new();
    for identity in identities {
        let credentials = Credentials::new(identity, "secret").unwrap();
        let conn = AgentConn::connect(controller.local_addr(), &credentials, Arc::new(StubRunner))
            .await
            .unwrap();
        shutdowns.push(conn.shutdown_token());
        tokio::spawn(conn.run());
    }
    wait_for_len(&registry, identities.len()).await;
    for identity in identities {
        assert!(registry.get(identity).await.is_some());
    }

    // Each agent sends Disconnect on shutdown; the registry drains
    for shutdown in shutdowns {
        shutdown.cancel();
    }
    wait_for_len(&registry, 0).await;

    controller.shutdown().await;
}

#[tokio::test]
async fn garbage_frame_tears_down_only_its_session() {
    let (tx, mut outputs) = mpsc::unbounded_channel();
    let controller = Controller::builder(test_config())
        .with_output(Arc::new(CollectSink(tx)))
        .start()
        .await
        .unwrap();
    let registry = controller.registry();

    start_agent(controller.local_addr(), "alice", "secret").await;

    // Second peer authenticates by hand, then turns hostile
    let mut hostile = TcpStream::connect(controller.local_addr()).await.unwrap();
    let codec = FrameCodec::new();
    let credentials = Credentials::new("mallet", "secret").unwrap();
    codec
        .write_frame(&mut hostile, &Message::user_data(&credentials))
        .await
        .unwrap();
    wait_for_len(&registry, 2).await;

    // Length field announcing a 2-byte body cannot hold the type tag
    hostile.write_all(&[2, 0, 0, 0, 0, 0]).await.unwrap();
    hostile.flush().await.unwrap();

    wait_for_len(&registry, 1).await;
    assert!(registry.get("mallet").await.is_none());

    // The surviving session still relays
    controller
        .send("alice", &Message::execute_command("echo hi"))
        .await
        .unwrap();
    let (identity, output) = timeout(Duration::from_secs(5), outputs.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!((identity.as_str(), output.as_str()), ("alice", "hi\n"));

    controller.shutdown().await;
}

#[tokio::test]
async fn duplicate_identity_replaces_the_first_session() {
    let controller = Controller::builder(test_config()).start().await.unwrap();
    let registry = controller.registry();

    let codec = FrameCodec::new();
    let credentials = Credentials::new("alice", "secret").unwrap();

    let mut first = TcpStream::connect(controller.local_addr()).await.unwrap();
    codec
        .write_frame(&mut first, &Message::user_data(&credentials))
        .await
        .unwrap();
    wait_for_len(&registry, 1).await;
    let first_session = registry.get("alice").await.unwrap();

    let mut second = TcpStream::connect(controller.local_addr()).await.unwrap();
    codec
        .write_frame(&mut second, &Message::user_data(&credentials))
        .await
        .unwrap();

    // Still one session, but a different one; the first transport closes
    wait_for_len(&registry, 1).await;
    for _ in 0..200 {
        if !Arc::ptr_eq(&registry.get("alice").await.unwrap(), &first_session) {
            break;
        }
        sleep(Duration::from_millis(10)).await;
    }
    assert!(!Arc::ptr_eq(
        &registry.get("alice").await.unwrap(),
        &first_session
    ));

    let mut buf = [0u8; 16];
    let n = timeout(Duration::from_secs(5), first.read(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(n, 0);

    controller.shutdown().await;
}

#[tokio::test]
async fn send_to_unknown_identity_reports_offline() {
    let controller = Controller::builder(test_config()).start().await.unwrap();

    let result = controller
        .send("nobody", &Message::execute_command("ls"))
        .await;
    assert!(matches!(
        result,
        Err(opsrelay::RelayError::UserOffline(identity)) if identity == "nobody"
    ));

    controller.shutdown().await;
}

#[tokio::test]
async fn silent_connection_is_dropped_after_auth_timeout() {
    let config = test_config().with_auth_timeout(Duration::from_millis(100));
    let controller = Controller::builder(config).start().await.unwrap();
    let registry = controller.registry();

    let mut stream = TcpStream::connect(controller.local_addr()).await.unwrap();

    // Send nothing; the controller hangs up on its own
    let mut buf = [0u8; 16];
    let n = timeout(Duration::from_secs(5), stream.read(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(n, 0);
    assert!(registry.is_empty().await);

    controller.shutdown().await;
}
