use base64::{engine::general_purpose::STANDARD, Engine as _};

use super::Track;
use crate::error::{LavalinkError, Result};

/// Converts between a [`Track`] and the opaque blob nodes understand.
///
/// Nodes ship their own binary format; implement this trait to plug it in.
pub trait TrackCodec: Send + Sync {
    fn encode(&self, track: &Track) -> Result<String>;

    fn decode(&self, blob: &str) -> Result<Track>;
}

/// Codec por defecto: base64 de la representación JSON del track.
#[derive(Debug, Clone, Copy, Default)]
pub struct Base64JsonCodec;

impl TrackCodec for Base64JsonCodec {
    fn encode(&self, track: &Track) -> Result<String> {
        let json = serde_json::to_vec(track).map_err(|e| LavalinkError::Codec(e.to_string()))?;
        Ok(STANDARD.encode(json))
    }

    fn decode(&self, blob: &str) -> Result<Track> {
        let bytes = STANDARD
            .decode(blob.trim())
            .map_err(|e| LavalinkError::Codec(format!("invalid base64: {}", e)))?;
        serde_json::from_slice(&bytes).map_err(|e| LavalinkError::Codec(e.to_string()))
    }
}
