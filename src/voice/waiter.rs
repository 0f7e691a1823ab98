use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info};

use super::VoiceHandshake;
use crate::{
    error::{LavalinkError, Result},
    node::AudioNode,
    player::Player,
    protocol::OutboundCommand,
};

#[derive(Debug, Default)]
struct WaiterState {
    session_id: Option<String>,
    token: Option<String>,
    endpoint: Option<String>,
    fired: bool,
}

impl WaiterState {
    fn handshake(&self) -> Option<VoiceHandshake> {
        Some(VoiceHandshake {
            session_id: self.session_id.clone()?,
            token: self.token.clone()?,
            endpoint: self.endpoint.clone()?,
        })
    }
}

/// One-shot waiter for the voice handshake.
///
/// Whichever setter completes the triple sends the `voiceUpdate` straight on
/// the bound node's connection. A waiter sends at most once; create a new
/// one for every connection attempt.
pub struct EventWaiter {
    guild_id: i64,
    node: Arc<AudioNode>,
    player: Arc<Player>,
    state: Mutex<WaiterState>,
}

impl EventWaiter {
    pub(crate) fn new(guild_id: i64, node: Arc<AudioNode>, player: Arc<Player>) -> Self {
        debug!("Voice waiter for guild {} on {}", guild_id, node.key());
        Self {
            guild_id,
            node,
            player,
            state: Mutex::new(WaiterState::default()),
        }
    }

    pub fn guild_id(&self) -> i64 {
        self.guild_id
    }

    pub fn node(&self) -> &Arc<AudioNode> {
        &self.node
    }

    pub fn has_fired(&self) -> bool {
        self.state.lock().fired
    }

    /// Stores the voice session id. Returns `true` if this call sent the
    /// handshake.
    pub fn set_session_id(&self, session_id: impl Into<String>) -> Result<bool> {
        let session_id = session_id.into();
        if session_id.is_empty() {
            return Err(LavalinkError::validation("voice session id is empty"));
        }

        let mut state = self.state.lock();
        if state.fired {
            return Ok(false);
        }
        state.session_id = Some(session_id);
        self.fire(&mut state)
    }

    /// Stores the voice server. Returns `true` if this call sent the
    /// handshake.
    pub fn set_server(&self, token: impl Into<String>, endpoint: impl Into<String>) -> Result<bool> {
        let (token, endpoint) = (token.into(), endpoint.into());
        if token.is_empty() || endpoint.is_empty() {
            return Err(LavalinkError::validation("voice token and endpoint must not be empty"));
        }

        let mut state = self.state.lock();
        if state.fired {
            return Ok(false);
        }
        state.token = Some(token);
        state.endpoint = Some(endpoint);
        self.fire(&mut state)
    }

    /// Sends the handshake if every part is present and it was not sent yet.
    ///
    /// The setters already call this; calling it by hand is only useful to
    /// retry after a failed send.
    pub fn try_connect(&self) -> Result<bool> {
        let mut state = self.state.lock();
        self.fire(&mut state)
    }

    // Runs under the state lock so concurrent setters cannot both send.
    fn fire(&self, state: &mut WaiterState) -> Result<bool> {
        if state.fired {
            return Ok(false);
        }
        let Some(handshake) = state.handshake() else {
            return Ok(false);
        };

        self.node.send(&OutboundCommand::voice_update(
            self.guild_id,
            &handshake.session_id,
            &handshake.token,
            &handshake.endpoint,
        ))?;
        state.fired = true;

        info!("🎙️ Voice handshake sent for guild {} to {}", self.guild_id, self.node.key());
        self.player.attach_voice(Arc::clone(&self.node), handshake);
        Ok(true)
    }
}

impl std::fmt::Debug for EventWaiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventWaiter")
            .field("guild_id", &self.guild_id)
            .field("node", &self.node.key())
            .field("fired", &self.has_fired())
            .finish()
    }
}
