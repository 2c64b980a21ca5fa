//! One-time embedding of connection parameters into an agent binary
//!
//! Appends the marker-delimited configuration blob to the end of the file.
//! The agent finds it at startup by scanning its own bytes.

use anyhow::{bail, Context, Result};
use opsrelay_agent::config::{end_marker, start_marker, AgentConfig};
use std::path::Path;
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Append the configuration blob to `file`, refusing a double patch
pub async fn patch_binary(file: &Path, config: &AgentConfig) -> Result<()> {
    let contents = fs::read(file)
        .await
        .with_context(|| format!("cannot read {}", file.display()))?;
    if AgentConfig::is_patched(&contents) {
        bail!("{} is already patched", file.display());
    }

    let blob = format!("{}{}{}", start_marker(), config.to_blob(), end_marker());
    let mut out = fs::OpenOptions::new()
        .append(true)
        .open(file)
        .await
        .with_context(|| format!("cannot open {} for appending", file.display()))?;
    out.write_all(blob.as_bytes()).await?;
    out.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use opsrelay_agent::config::EndpointMode;

    fn sample_config() -> AgentConfig {
        AgentConfig {
            identity: "alice".to_string(),
            credential: "secret".to_string(),
            endpoint: EndpointMode::Direct("10.0.0.1:9000".parse().unwrap()),
        }
    }

    #[tokio::test]
    async fn test_patch_then_extract() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("agent-binary");
        fs::write(&file, b"\x7fELF pretend binary contents")
            .await
            .unwrap();

        let config = sample_config();
        patch_binary(&file, &config).await.unwrap();

        let contents = fs::read(&file).await.unwrap();
        assert!(contents.starts_with(b"\x7fELF"));
        assert_eq!(AgentConfig::extract(&contents).unwrap(), config);
    }

    #[tokio::test]
    async fn test_double_patch_refused() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("agent-binary");
        fs::write(&file, b"contents").await.unwrap();

        patch_binary(&file, &sample_config()).await.unwrap();
        let result = patch_binary(&file, &sample_config()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_missing_file_reported() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("does-not-exist");
        let result = patch_binary(&file, &sample_config()).await;
        assert!(result.is_err());
    }
}
