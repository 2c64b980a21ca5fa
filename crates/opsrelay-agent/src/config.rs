//! Embedded agent configuration
//!
//! The agent carries no command line or config file; its connection
//! parameters are appended to the compiled binary by `opsrelay patch` as a
//! marker-delimited, pipe-separated UTF-8 blob and read back from the
//! binary's own bytes at startup.

use crate::AgentError;
use std::net::SocketAddr;
use tracing::info;

/// Marker preceding the embedded configuration blob
///
/// Assembled at runtime; the contiguous marker string must not appear
/// among the binary's own string constants, or extraction would match the
/// code instead of the patched-in blob.
pub fn start_marker() -> String {
    format!("%$_{}_START_$%", "OPSRELAY_CONFIG")
}

/// Marker following the embedded configuration blob
pub fn end_marker() -> String {
    format!("%$_{}_END_$%", "OPSRELAY_CONFIG")
}

/// How the agent learns its controller endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointMode {
    /// Fixed address embedded at patch time
    Direct(SocketAddr),
    /// URL serving `"<ip>:<port>"` as plain text, resolved at startup
    Fetch(String),
}

/// Configuration embedded into the agent binary at patch time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentConfig {
    /// Identity presented during the handshake
    pub identity: String,
    /// Credential presented during the handshake
    pub credential: String,
    /// Controller endpoint selection
    pub endpoint: EndpointMode,
}

impl AgentConfig {
    /// Render the pipe-delimited blob that `opsrelay patch` embeds
    pub fn to_blob(&self) -> String {
        match &self.endpoint {
            EndpointMode::Direct(addr) => format!(
                "{}|{}|direct|{}|{}",
                self.identity,
                self.credential,
                addr.ip(),
                addr.port()
            ),
            EndpointMode::Fetch(url) => {
                format!("{}|{}|fetch|{}", self.identity, self.credential, url)
            }
        }
    }

    /// Parse the blob found between the markers
    pub fn from_blob(blob: &str) -> Result<Self, AgentError> {
        let fields: Vec<&str> = blob.split('|').collect();
        if fields.len() < 4 {
            return Err(AgentError::Config(format!(
                "expected at least 4 config fields, found {}",
                fields.len()
            )));
        }
        let identity = fields[0].to_string();
        let credential = fields[1].to_string();

        let endpoint = match fields[2] {
            "direct" => {
                if fields.len() != 5 {
                    return Err(AgentError::Config(
                        "direct mode requires an ip and a port field".to_string(),
                    ));
                }
                let addr = format!("{}:{}", fields[3], fields[4])
                    .parse()
                    .map_err(|_| {
                        AgentError::Config(format!(
                            "invalid direct endpoint: {}:{}",
                            fields[3], fields[4]
                        ))
                    })?;
                EndpointMode::Direct(addr)
            }
            "fetch" => {
                if fields.len() != 4 {
                    return Err(AgentError::Config(
                        "fetch mode takes exactly one url field".to_string(),
                    ));
                }
                EndpointMode::Fetch(fields[3].to_string())
            }
            other => {
                return Err(AgentError::Config(format!(
                    "unknown endpoint mode: {}",
                    other
                )))
            }
        };

        Ok(Self {
            identity,
            credential,
            endpoint,
        })
    }

    /// Whether `contents` already carries an embedded configuration
    pub fn is_patched(contents: &[u8]) -> bool {
        let text = String::from_utf8_lossy(contents);
        text.contains(&start_marker())
    }

    /// Scan raw binary contents for the marker-delimited blob
    ///
    /// The blob is appended at patch time, so the last marker pair wins.
    pub fn extract(contents: &[u8]) -> Result<Self, AgentError> {
        let text = String::from_utf8_lossy(contents);
        let start_marker = start_marker();
        let end_marker = end_marker();

        let start = text
            .rfind(&start_marker)
            .ok_or_else(|| AgentError::Config("no embedded configuration found".to_string()))?
            + start_marker.len();
        let end = text[start..]
            .find(&end_marker)
            .map(|offset| start + offset)
            .ok_or_else(|| AgentError::Config("embedded configuration unterminated".to_string()))?;

        Self::from_blob(&text[start..end])
    }

    /// Resolve the endpoint mode to a concrete socket address
    pub async fn resolve_endpoint(&self) -> Result<SocketAddr, AgentError> {
        match &self.endpoint {
            EndpointMode::Direct(addr) => Ok(*addr),
            EndpointMode::Fetch(url) => {
                let body = reqwest::get(url.as_str())
                    .await
                    .map_err(|e| AgentError::EndpointResolution(format!("GET {}: {}", url, e)))?
                    .text()
                    .await
                    .map_err(|e| AgentError::EndpointResolution(format!("GET {}: {}", url, e)))?;
                let endpoint = body.trim();
                info!(%endpoint, "fetched connection info");
                endpoint.parse().map_err(|_| {
                    AgentError::EndpointResolution(format!(
                        "endpoint document is not <ip>:<port>: {}",
                        endpoint
                    ))
                })
            }
        }
    }
}
