use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Errors of the Lavalink client.
///
/// Validation errors fail fast at the call site and are never retried.
/// Protocol errors (`UnsupportedMessage`, `MalformedMessage`, `PlayerNotFound`)
/// only abort the processing of the single inbound message that caused them;
/// the node connection stays open.
#[derive(Debug, Error)]
pub enum LavalinkError {
    #[error("invalid argument: {0}")]
    Validation(String),

    #[error("failed to connect to node {node}: {source}")]
    Connection {
        node: String,
        #[source]
        source: Box<tungstenite::Error>,
    },

    #[error("unsupported message: {0}")]
    UnsupportedMessage(String),

    #[error("malformed message: {0}")]
    MalformedMessage(#[source] serde_json::Error),

    #[error("failed to encode command: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("no player exists for guild {0}")]
    PlayerNotFound(i64),

    #[error("illegal state: {0}")]
    IllegalState(String),

    #[error("no available nodes")]
    NoAvailableNodes,

    #[error("node {0} is not connected")]
    NotConnected(String),

    #[error("track resolution failed: {0}")]
    Resolve(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("track codec error: {0}")]
    Codec(String),
}

impl LavalinkError {
    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub(crate) fn illegal_state(msg: impl Into<String>) -> Self {
        Self::IllegalState(msg.into())
    }

    /// Whether the error only concerns one inbound message and the
    /// connection it arrived on can keep going.
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedMessage(_) | Self::MalformedMessage(_) | Self::PlayerNotFound(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, LavalinkError>;

/// Rejects negative guild ids.
pub(crate) fn validate_guild_id(guild_id: i64) -> Result<()> {
    if guild_id < 0 {
        return Err(LavalinkError::validation(format!(
            "guild id must be non-negative, got {}",
            guild_id
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn json_error() -> serde_json::Error {
        serde_json::from_str::<serde_json::Value>("{").unwrap_err()
    }

    #[test]
    fn only_inbound_failures_are_protocol_errors() {
        assert!(LavalinkError::MalformedMessage(json_error()).is_protocol_error());
        assert!(LavalinkError::PlayerNotFound(1).is_protocol_error());
        assert!(!LavalinkError::Encode(json_error()).is_protocol_error());
        assert!(!LavalinkError::NoAvailableNodes.is_protocol_error());
    }

    #[test]
    fn negative_guild_ids_are_rejected() {
        assert!(validate_guild_id(0).is_ok());
        assert!(matches!(validate_guild_id(-1), Err(LavalinkError::Validation(_))));
    }
}
