//! # Node Module
//!
//! Everything about the remote audio nodes the client balances across.
//!
//! ### [`audio_node`] - Connection lifecycle
//! - One persistent WebSocket per node, authenticated with connection headers
//! - Inbound `playerUpdate` / `stats` / `event` dispatch in arrival order
//! - Failover of bound players and capped exponential reconnect backoff
//!
//! ### [`balancer`] - Penalty scoring
//! - Pure function of the latest [`stats::Statistics`] and the availability flag
//!
//! ### [`registry`] - Node registry
//! - Registration-ordered set of nodes keyed by address and WebSocket port
//! - Best-node selection built on the balancer

pub mod audio_node;
pub mod backoff;
pub mod balancer;
pub mod registry;
pub mod stats;

pub use audio_node::AudioNode;
pub use backoff::Backoff;
pub use balancer::LoadBalancer;
pub use registry::{NodePolicy, NodeRegistry};
pub use stats::{Cpu, Frames, Memory, Statistics};

use crate::error::{LavalinkError, Result};

/// Immutable settings of one node.
///
/// The identity key is the normalized address plus the WebSocket port.
#[derive(Clone, PartialEq, Eq)]
pub struct NodeEntry {
    address: String,
    password: String,
    rest_port: u16,
    port: u16,
}

impl NodeEntry {
    pub fn new(
        address: impl AsRef<str>,
        password: impl Into<String>,
        rest_port: u16,
        port: u16,
    ) -> Result<Self> {
        let address = normalize_address(address.as_ref())?;

        if rest_port == 0 || port == 0 {
            return Err(LavalinkError::validation(format!(
                "node {} needs non-zero ports (rest {}, websocket {})",
                address, rest_port, port
            )));
        }

        Ok(Self {
            address,
            password: password.into(),
            rest_port,
            port,
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    pub fn rest_port(&self) -> u16 {
        self.rest_port
    }

    /// WebSocket port.
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn key(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    pub fn websocket_url(&self) -> String {
        format!("ws://{}:{}", self.address, self.port)
    }

    pub fn rest_url(&self) -> String {
        format!("http://{}:{}", self.address, self.rest_port)
    }
}

impl std::fmt::Debug for NodeEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeEntry")
            .field("address", &self.address)
            .field("rest_port", &self.rest_port)
            .field("port", &self.port)
            .finish_non_exhaustive()
    }
}

fn normalize_address(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    let without_scheme = ["ws://", "wss://", "http://", "https://"]
        .iter()
        .find_map(|scheme| trimmed.strip_prefix(scheme))
        .unwrap_or(trimmed);
    let host = without_scheme.trim_end_matches('/').to_ascii_lowercase();

    let malformed = || LavalinkError::validation(format!("malformed node address '{}'", raw));

    if host.is_empty() || host.contains(['/', ' ', '?', '#', '@']) {
        return Err(malformed());
    }

    // The port is supplied separately; a host:port pair here is a mistake.
    let parsed = url::Url::parse(&format!("ws://{}", host)).map_err(|_| malformed())?;
    if parsed.host_str().is_none() || parsed.port().is_some() {
        return Err(malformed());
    }

    Ok(host)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_is_normalized_into_the_key() {
        let entry = NodeEntry::new("ws://Lavalink.Local/", "pw", 2333, 80).unwrap();
        assert_eq!(entry.address(), "lavalink.local");
        assert_eq!(entry.key(), "lavalink.local:80");
        assert_eq!(entry.websocket_url(), "ws://lavalink.local:80");
        assert_eq!(entry.rest_url(), "http://lavalink.local:2333");
    }

    #[test]
    fn same_host_with_different_schemes_shares_a_key() {
        let a = NodeEntry::new("http://node1", "pw", 2333, 80).unwrap();
        let b = NodeEntry::new("NODE1", "pw", 9999, 80).unwrap();
        assert_eq!(a.key(), b.key());
    }

    #[test]
    fn malformed_addresses_are_rejected() {
        for bad in ["", "   ", "node one", "host/path", "host:2333", "user@host"] {
            let result = NodeEntry::new(bad, "pw", 2333, 80);
            assert!(
                matches!(result, Err(LavalinkError::Validation(_))),
                "{:?} should be rejected",
                bad
            );
        }
        assert!(NodeEntry::new("host", "pw", 0, 80).is_err());
    }

    #[test]
    fn debug_output_hides_the_password() {
        let entry = NodeEntry::new("localhost", "hunter2", 2333, 80).unwrap();
        assert!(!format!("{:?}", entry).contains("hunter2"));
    }
}
