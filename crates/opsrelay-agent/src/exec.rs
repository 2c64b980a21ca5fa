//! Command invocation with captured output

use crate::AgentError;
use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Executes one command line and returns its captured standard output
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `command_line` to completion, blocking the calling task
    async fn run(&self, command_line: &str) -> Result<String, AgentError>;
}

/// Runner that spawns the command as a child process
///
/// The first whitespace token is the program, the rest are its arguments.
/// Only stdout is captured; stderr is discarded.
#[derive(Debug, Default, Clone, Copy)]
pub struct ShellRunner;

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn run(&self, command_line: &str) -> Result<String, AgentError> {
        let mut parts = command_line.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| AgentError::Exec("empty command line".to_string()))?;

        debug!(program, "spawning command");
        let output = Command::new(program)
            .args(parts)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .output()
            .await
            .map_err(|e| AgentError::Exec(format!("failed to run {}: {}", program, e)))?;

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
