use super::Player;
use crate::track::Track;

/// Eventos que un player entrega a sus listeners.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    TrackStart {
        track: Track,
    },
    TrackEnd {
        track: Option<Track>,
        reason: String,
    },
    TrackException {
        track: Option<Track>,
        error: String,
    },
    TrackStuck {
        track: Option<Track>,
        threshold_ms: i64,
    },
    PlayerPause,
    PlayerResume,
}

impl PlayerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::TrackStart { .. } => "TrackStart",
            Self::TrackEnd { .. } => "TrackEnd",
            Self::TrackException { .. } => "TrackException",
            Self::TrackStuck { .. } => "TrackStuck",
            Self::PlayerPause => "PlayerPause",
            Self::PlayerResume => "PlayerResume",
        }
    }

    /// Calls the one listener method that matches this variant.
    pub fn deliver(&self, player: &Player, listener: &dyn PlayerListener) -> anyhow::Result<()> {
        match self {
            Self::TrackStart { track } => listener.on_track_start(player, track),
            Self::TrackEnd { track, reason } => listener.on_track_end(player, track.as_ref(), reason),
            Self::TrackException { track, error } => {
                listener.on_track_exception(player, track.as_ref(), error)
            }
            Self::TrackStuck {
                track,
                threshold_ms,
            } => listener.on_track_stuck(player, track.as_ref(), *threshold_ms),
            Self::PlayerPause => listener.on_player_pause(player),
            Self::PlayerResume => listener.on_player_resume(player),
        }
    }
}

/// Receives the events of one player.
///
/// One method per [`PlayerEvent`] variant; all default to doing nothing.
/// An error returned here is logged and does not stop the other listeners.
pub trait PlayerListener: Send + Sync {
    fn on_track_start(&self, _player: &Player, _track: &Track) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_track_end(&self, _player: &Player, _track: Option<&Track>, _reason: &str) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_track_exception(
        &self,
        _player: &Player,
        _track: Option<&Track>,
        _error: &str,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_track_stuck(
        &self,
        _player: &Player,
        _track: Option<&Track>,
        _threshold_ms: i64,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_player_pause(&self, _player: &Player) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_player_resume(&self, _player: &Player) -> anyhow::Result<()> {
        Ok(())
    }
}
