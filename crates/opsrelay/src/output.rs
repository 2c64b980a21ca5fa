//! Operator-facing sink for relayed command output

use async_trait::async_trait;
use tracing::info;

/// Destination for `CommandOutput` text dispatched from agent sessions
#[async_trait]
pub trait OutputSink: Send + Sync {
    /// Called once per `CommandOutput` frame with the captured text
    async fn command_output(&self, identity: &str, output: &str);
}

/// Sink that logs relayed output through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

#[async_trait]
impl OutputSink for LogSink {
    async fn command_output(&self, identity: &str, output: &str) {
        info!(identity, "command output received:");
        info!("{}", output);
    }
}
