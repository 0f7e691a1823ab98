//! # Player Module
//!
//! Per-guild playback state and the commands that drive a remote node.
//!
//! ## Lifecycle
//!
//! ```text
//! NotConnected ──bind──▶ Connected ──destroy──▶ Destroyed
//!      ▲                    │                       │
//!      └──node lost, none ──┘        play / rebind ─┘
//! ```
//!
//! `destroy` only clears the node side. Track, position and volume stay so a
//! later `play_track` or a failover rebind can pick up where it left off.
//!
//! ## Position
//!
//! The node pushes `playerUpdate` with an authoritative position and the
//! wall-clock time it was sampled at; between updates the position is
//! extrapolated linearly (frozen while paused) and clamped to the track
//! duration.

pub mod event;
pub mod registry;

pub use event::{PlayerEvent, PlayerListener};
pub use registry::PlayerRegistry;

use parking_lot::{Mutex, RwLock};
use std::{
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{Arc, Weak},
};
use tracing::{debug, error, info, warn};

use crate::{
    client::{upgrade, ClientContext},
    error::{LavalinkError, Result},
    node::AudioNode,
    protocol::{NodeEventKind, OutboundCommand},
    track::{ResolvedTrack, Track},
    voice::VoiceHandshake,
};

pub const MAX_VOLUME: i32 = 150;
pub const DEFAULT_VOLUME: u16 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerStatus {
    NotConnected,
    Connected,
    Destroyed,
}

#[derive(Debug)]
struct PlayerState {
    status: PlayerStatus,
    channel_id: Option<u64>,
    node: Option<Arc<AudioNode>>,
    track: Option<Track>,
    encoded: Option<String>,
    /// Milliseconds; -1 while unknown.
    position: i64,
    /// Wall-clock ms at which `position` was authoritative; -1 while unset.
    timestamp: i64,
    volume: u16,
    paused: bool,
    voice: Option<VoiceHandshake>,
}

/// Reproductor de una guild.
pub struct Player {
    guild_id: i64,
    context: Weak<ClientContext>,
    state: Mutex<PlayerState>,
    listeners: RwLock<Vec<Arc<dyn PlayerListener>>>,
}

impl Player {
    pub(crate) fn new(guild_id: i64, context: Weak<ClientContext>) -> Self {
        Self {
            guild_id,
            context,
            state: Mutex::new(PlayerState {
                status: PlayerStatus::NotConnected,
                channel_id: None,
                node: None,
                track: None,
                encoded: None,
                position: -1,
                timestamp: -1,
                volume: DEFAULT_VOLUME,
                paused: false,
                voice: None,
            }),
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn guild_id(&self) -> i64 {
        self.guild_id
    }

    pub fn status(&self) -> PlayerStatus {
        self.state.lock().status
    }

    pub fn channel_id(&self) -> Option<u64> {
        self.state.lock().channel_id
    }

    pub fn set_channel_id(&self, channel_id: Option<u64>) {
        self.state.lock().channel_id = channel_id;
    }

    pub fn node(&self) -> Option<Arc<AudioNode>> {
        self.state.lock().node.clone()
    }

    pub fn track(&self) -> Option<Track> {
        self.state.lock().track.clone()
    }

    pub fn volume(&self) -> u16 {
        self.state.lock().volume
    }

    pub fn is_paused(&self) -> bool {
        self.state.lock().paused
    }

    pub fn add_listener(&self, listener: Arc<dyn PlayerListener>) {
        self.listeners.write().push(listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn PlayerListener>) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|l| !same_listener(l, listener));
        listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Current position in milliseconds.
    ///
    /// Fails with `IllegalState` when no track is loaded.
    pub fn position(&self) -> Result<i64> {
        self.position_at(now_millis())
    }

    /// Position as it would be at wall-clock `now` (ms).
    pub fn position_at(&self, now: i64) -> Result<i64> {
        let state = self.state.lock();
        extrapolate(&state, now)
    }

    /// Plays an already resolved track. The track is always encoded through
    /// the codec; the identifier cache is not consulted on this path.
    pub fn play_track(&self, track: Track, start_time: Option<i64>, end_time: Option<i64>) -> Result<()> {
        validate_times(start_time, end_time)?;
        let context = upgrade(&self.context)?;
        let node = self.ensure_node(&context)?;
        let blob = context.codec.encode(&track)?;
        self.send_play(&node, blob, track, start_time, end_time)
    }

    /// Resolves `identifier` (cache first, then the node's REST API) and
    /// plays the result.
    pub async fn play_identifier(
        &self,
        identifier: &str,
        start_time: Option<i64>,
        end_time: Option<i64>,
    ) -> Result<Track> {
        validate_times(start_time, end_time)?;
        let context = upgrade(&self.context)?;
        let node = self.ensure_node(&context)?;

        let resolved = match context.cache.get(identifier) {
            Some(hit) => {
                debug!("Track cache hit for '{}'", identifier);
                hit
            }
            None => {
                debug!("Track cache miss for '{}', resolving via {}", identifier, node.key());
                let resolved: ResolvedTrack = context
                    .resolver
                    .resolve(node.entry().clone(), identifier.to_string())
                    .await?;
                context.cache.insert(identifier.to_string(), resolved.clone());
                resolved
            }
        };

        // The node may have changed while resolving.
        let node = self.ensure_node(&context)?;
        self.send_play(&node, resolved.blob, resolved.track.clone(), start_time, end_time)?;
        Ok(resolved.track)
    }

    /// Stops playback and unloads the track.
    pub fn stop(&self) -> Result<()> {
        if let Some(node) = self.node() {
            node.send(&OutboundCommand::stop(self.guild_id))?;
        }

        let mut state = self.state.lock();
        state.track = None;
        state.encoded = None;
        state.position = -1;
        state.timestamp = -1;
        Ok(())
    }

    /// Pauses or resumes. Does nothing if already in that state.
    pub fn set_paused(&self, paused: bool) -> Result<()> {
        {
            let mut state = self.state.lock();
            if state.paused == paused {
                return Ok(());
            }
            if let Some(node) = &state.node {
                node.send(&OutboundCommand::pause(self.guild_id, paused))?;
            }

            let now = now_millis();
            if paused {
                if let Ok(position) = extrapolate(&state, now) {
                    state.position = position;
                }
            }
            if state.track.is_some() {
                state.timestamp = now;
            }
            state.paused = paused;
        }

        self.emit(&if paused {
            PlayerEvent::PlayerPause
        } else {
            PlayerEvent::PlayerResume
        });
        Ok(())
    }

    /// Sets the volume, which must be within `0..=150`.
    pub fn set_volume(&self, volume: i32) -> Result<()> {
        if !(0..=MAX_VOLUME).contains(&volume) {
            return Err(LavalinkError::validation(format!(
                "volume must be between 0 and {}, got {}",
                MAX_VOLUME, volume
            )));
        }
        let volume = volume as u16;

        let mut state = self.state.lock();
        if let Some(node) = &state.node {
            node.send(&OutboundCommand::volume(self.guild_id, volume))?;
        }
        state.volume = volume;
        Ok(())
    }

    /// Seeks within the current track; `position` must be within
    /// `0..=duration`.
    pub fn seek(&self, position: i64) -> Result<()> {
        let mut state = self.state.lock();
        let duration = state
            .track
            .as_ref()
            .ok_or_else(|| LavalinkError::illegal_state("cannot seek without a track"))?
            .duration();

        if !(0..=duration).contains(&position) {
            return Err(LavalinkError::validation(format!(
                "seek position must be between 0 and {}, got {}",
                duration, position
            )));
        }

        if let Some(node) = &state.node {
            node.send(&OutboundCommand::seek(self.guild_id, position))?;
        }
        state.position = position;
        state.timestamp = now_millis();
        Ok(())
    }

    /// Clears the player on the node. Local state is kept for a later resume.
    pub fn destroy(&self) -> Result<()> {
        let node = self
            .node()
            .ok_or_else(|| LavalinkError::illegal_state("no node is bound to this player"))?;
        node.send(&OutboundCommand::destroy(self.guild_id))?;
        self.state.lock().status = PlayerStatus::Destroyed;
        info!("Player for guild {} destroyed", self.guild_id);
        Ok(())
    }

    /// Delivers an event to every listener.
    ///
    /// A listener that fails or panics is logged and skipped; the rest still
    /// get the event. Returns how many listeners failed.
    pub fn emit(&self, event: &PlayerEvent) -> usize {
        let listeners: Vec<Arc<dyn PlayerListener>> = self.listeners.read().clone();
        let mut failures = 0;

        for listener in listeners {
            match catch_unwind(AssertUnwindSafe(|| event.deliver(self, listener.as_ref()))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    failures += 1;
                    error!(
                        "Listener failed on {} for guild {}: {:#}",
                        event.name(),
                        self.guild_id,
                        e
                    );
                }
                Err(_) => {
                    failures += 1;
                    error!(
                        "Listener panicked on {} for guild {}",
                        event.name(),
                        self.guild_id
                    );
                }
            }
        }

        failures
    }

    /// Binds a node without sending anything.
    pub(crate) fn bind_node(&self, node: Arc<AudioNode>) {
        let mut state = self.state.lock();
        state.node = Some(node);
        if state.status == PlayerStatus::NotConnected {
            state.status = PlayerStatus::Connected;
        }
    }

    /// Binds the node a voice handshake was just sent to.
    pub(crate) fn attach_voice(&self, node: Arc<AudioNode>, voice: VoiceHandshake) {
        let mut state = self.state.lock();
        state.node = Some(node);
        state.voice = Some(voice);
        state.status = PlayerStatus::Connected;
    }

    pub(crate) fn unbind(&self) {
        let mut state = self.state.lock();
        state.node = None;
        if state.status == PlayerStatus::Connected {
            state.status = PlayerStatus::NotConnected;
        }
    }

    /// Moves the player to `node` and resumes there: voice handshake first,
    /// then the loaded track from its last known position, then pause and
    /// volume.
    pub(crate) fn rebind(&self, node: Arc<AudioNode>) -> Result<()> {
        let now = now_millis();
        let (voice, resume, paused, volume) = {
            let mut state = self.state.lock();
            state.node = Some(Arc::clone(&node));

            let resume = if state.status == PlayerStatus::Destroyed {
                None
            } else {
                state.status = PlayerStatus::Connected;
                state.encoded.clone().map(|blob| {
                    let position = extrapolate(&state, now).unwrap_or(0);
                    (blob, position)
                })
            };

            (state.voice.clone(), resume, state.paused, state.volume)
        };

        if let Some(voice) = voice {
            node.send(&OutboundCommand::voice_update(
                self.guild_id,
                &voice.session_id,
                &voice.token,
                &voice.endpoint,
            ))?;
        }

        if let Some((blob, position)) = resume {
            node.send(&OutboundCommand::play(self.guild_id, blob, position, None))?;
            if paused {
                node.send(&OutboundCommand::pause(self.guild_id, true))?;
            }
            if volume != DEFAULT_VOLUME {
                node.send(&OutboundCommand::volume(self.guild_id, volume))?;
            }

            let mut state = self.state.lock();
            state.position = position;
            state.timestamp = now;
            debug!(
                "Resumed guild {} on {} at {}ms",
                self.guild_id,
                node.key(),
                position
            );
        }

        Ok(())
    }

    pub(crate) fn apply_update(&self, position: Option<i64>, time: i64) {
        let mut state = self.state.lock();
        state.position = position.unwrap_or(-1);
        state.timestamp = time;
    }

    /// Handles a track event pushed by the node: the track is unloaded
    /// first, then listeners are told.
    pub(crate) fn handle_node_event(&self, kind: NodeEventKind, track: Option<Track>) {
        let previous = {
            let mut state = self.state.lock();
            state.encoded = None;
            state.track.take()
        };
        let track = track.or(previous);

        let event = match kind {
            NodeEventKind::TrackEnd { reason } => PlayerEvent::TrackEnd { track, reason },
            NodeEventKind::TrackException { error } => {
                warn!("Track exception in guild {}: {}", self.guild_id, error);
                PlayerEvent::TrackException { track, error }
            }
            NodeEventKind::TrackStuck { threshold_ms } => {
                warn!("Track stuck in guild {} ({}ms)", self.guild_id, threshold_ms);
                PlayerEvent::TrackStuck { track, threshold_ms }
            }
        };
        self.emit(&event);
    }

    fn ensure_node(&self, context: &ClientContext) -> Result<Arc<AudioNode>> {
        if let Some(node) = self.node() {
            return Ok(node);
        }

        let best = context.nodes.available_node(None)?;
        let mut state = self.state.lock();
        match &state.node {
            Some(node) => Ok(Arc::clone(node)),
            None => {
                debug!("Binding guild {} to best node {}", self.guild_id, best.key());
                state.node = Some(Arc::clone(&best));
                if state.status == PlayerStatus::NotConnected {
                    state.status = PlayerStatus::Connected;
                }
                Ok(best)
            }
        }
    }

    fn send_play(
        &self,
        node: &AudioNode,
        blob: String,
        track: Track,
        start_time: Option<i64>,
        end_time: Option<i64>,
    ) -> Result<()> {
        let start = start_time.unwrap_or(0);
        node.send(&OutboundCommand::play(self.guild_id, blob.clone(), start, end_time))?;

        {
            let mut state = self.state.lock();
            state.track = Some(track.clone());
            state.encoded = Some(blob);
            state.position = start;
            state.timestamp = now_millis();
            state.status = PlayerStatus::Connected;
        }

        info!("🎵 Guild {} playing {} on {}", self.guild_id, track, node.key());
        self.emit(&PlayerEvent::TrackStart { track });
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn raw_position(&self) -> (i64, i64) {
        let state = self.state.lock();
        (state.position, state.timestamp)
    }
}

impl std::fmt::Debug for Player {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Player")
            .field("guild_id", &self.guild_id)
            .field("status", &state.status)
            .field("node", &state.node.as_ref().map(|n| n.key()))
            .field("track", &state.track)
            .field("position", &state.position)
            .field("paused", &state.paused)
            .field("volume", &state.volume)
            .finish()
    }
}

fn extrapolate(state: &PlayerState, now: i64) -> Result<i64> {
    let track = state
        .track
        .as_ref()
        .ok_or_else(|| LavalinkError::illegal_state("no track is loaded"))?;
    let duration = track.duration();
    let position = state.position.max(0);

    if state.paused || state.timestamp < 0 {
        return Ok(position.min(duration));
    }

    let elapsed = (now - state.timestamp).max(0);
    Ok(position.saturating_add(elapsed).min(duration))
}

fn validate_times(start_time: Option<i64>, end_time: Option<i64>) -> Result<()> {
    if start_time.is_some_and(|t| t < 0) || end_time.is_some_and(|t| t < 0) {
        return Err(LavalinkError::validation("start and end times must be non-negative"));
    }
    if let (Some(start), Some(end)) = (start_time, end_time) {
        if end <= start {
            return Err(LavalinkError::validation(format!(
                "end time {} must be after start time {}",
                end, start
            )));
        }
    }
    Ok(())
}

fn same_listener(a: &Arc<dyn PlayerListener>, b: &Arc<dyn PlayerListener>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
