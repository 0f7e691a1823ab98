//! Wire model for the node WebSocket.
//!
//! Outbound commands are plain serde structs tagged by `op`. Inbound messages
//! are parsed by reading `op` first, so an unknown kind surfaces as
//! [`LavalinkError::UnsupportedMessage`] instead of a generic parse error.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::{LavalinkError, Result};
use crate::node::stats::Statistics;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum OutboundCommand {
    Play(Play),
    Stop(GuildOnly),
    Pause(Pause),
    Seek(Seek),
    Volume(Volume),
    Destroy(GuildOnly),
    VoiceUpdate(VoiceUpdate),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Play {
    pub guild_id: String,
    pub track: String,
    pub start_time: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub no_replace: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GuildOnly {
    pub guild_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pause {
    pub guild_id: String,
    pub pause: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Seek {
    pub guild_id: String,
    pub position: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Volume {
    pub guild_id: String,
    pub volume: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceUpdate {
    pub guild_id: String,
    pub session_id: String,
    pub event: VoiceServerEvent,
}

/// Mirrors the gateway's voice server payload, hence snake_case.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VoiceServerEvent {
    pub token: String,
    pub guild_id: String,
    pub endpoint: String,
}

impl OutboundCommand {
    pub fn play(guild_id: i64, track: String, start_time: i64, end_time: Option<i64>) -> Self {
        Self::Play(Play {
            guild_id: guild_id.to_string(),
            track,
            start_time,
            end_time,
            no_replace: None,
        })
    }

    pub fn stop(guild_id: i64) -> Self {
        Self::Stop(GuildOnly {
            guild_id: guild_id.to_string(),
        })
    }

    pub fn pause(guild_id: i64, pause: bool) -> Self {
        Self::Pause(Pause {
            guild_id: guild_id.to_string(),
            pause,
        })
    }

    pub fn seek(guild_id: i64, position: i64) -> Self {
        Self::Seek(Seek {
            guild_id: guild_id.to_string(),
            position,
        })
    }

    pub fn volume(guild_id: i64, volume: u16) -> Self {
        Self::Volume(Volume {
            guild_id: guild_id.to_string(),
            volume,
        })
    }

    pub fn destroy(guild_id: i64) -> Self {
        Self::Destroy(GuildOnly {
            guild_id: guild_id.to_string(),
        })
    }

    pub fn voice_update(guild_id: i64, session_id: &str, token: &str, endpoint: &str) -> Self {
        Self::VoiceUpdate(VoiceUpdate {
            guild_id: guild_id.to_string(),
            session_id: session_id.to_string(),
            event: VoiceServerEvent {
                token: token.to_string(),
                guild_id: guild_id.to_string(),
                endpoint: endpoint.to_string(),
            },
        })
    }

    pub fn op(&self) -> &'static str {
        match self {
            Self::Play(_) => "play",
            Self::Stop(_) => "stop",
            Self::Pause(_) => "pause",
            Self::Seek(_) => "seek",
            Self::Volume(_) => "volume",
            Self::Destroy(_) => "destroy",
            Self::VoiceUpdate(_) => "voiceUpdate",
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(LavalinkError::Encode)
    }
}

/// Mensajes entrantes soportados.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    PlayerUpdate(PlayerUpdate),
    Stats(Statistics),
    Event(NodeEvent),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerUpdate {
    #[serde(deserialize_with = "guild_id_from_str")]
    pub guild_id: i64,
    pub state: PlayerUpdateState,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct PlayerUpdateState {
    /// Absent while nothing is playing.
    #[serde(default)]
    pub position: Option<i64>,
    /// Node wall clock (ms) at which `position` was sampled.
    pub time: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeEvent {
    pub guild_id: i64,
    /// Encoded track the event refers to, if the node sent one.
    pub track: Option<String>,
    pub kind: NodeEventKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeEventKind {
    TrackEnd { reason: String },
    TrackException { error: String },
    TrackStuck { threshold_ms: i64 },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEvent {
    #[serde(deserialize_with = "guild_id_from_str")]
    guild_id: i64,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    track: Option<String>,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    exception: Option<Value>,
    #[serde(default)]
    threshold_ms: Option<i64>,
}

impl InboundMessage {
    pub fn parse(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text).map_err(LavalinkError::MalformedMessage)?;
        let op = value
            .get("op")
            .and_then(Value::as_str)
            .ok_or_else(|| LavalinkError::UnsupportedMessage("message without op".to_string()))?
            .to_string();

        match op.as_str() {
            "playerUpdate" => serde_json::from_value(value)
                .map(Self::PlayerUpdate)
                .map_err(LavalinkError::MalformedMessage),
            "stats" => serde_json::from_value(value)
                .map(Self::Stats)
                .map_err(LavalinkError::MalformedMessage),
            "event" => {
                let raw: RawEvent =
                    serde_json::from_value(value).map_err(LavalinkError::MalformedMessage)?;
                Ok(Self::Event(raw.into_event()?))
            }
            other => Err(LavalinkError::UnsupportedMessage(format!("op '{}'", other))),
        }
    }
}

impl RawEvent {
    fn into_event(self) -> Result<NodeEvent> {
        let kind = match self.kind.as_str() {
            "TrackEndEvent" => NodeEventKind::TrackEnd {
                reason: self.reason.unwrap_or_else(|| "UNKNOWN".to_string()),
            },
            "TrackExceptionEvent" => {
                let from_exception = self
                    .exception
                    .as_ref()
                    .and_then(|e| e.get("message"))
                    .and_then(Value::as_str)
                    .map(str::to_string);
                NodeEventKind::TrackException {
                    error: self
                        .error
                        .or(from_exception)
                        .unwrap_or_else(|| "unknown error".to_string()),
                }
            }
            "TrackStuckEvent" => NodeEventKind::TrackStuck {
                threshold_ms: self.threshold_ms.unwrap_or(0),
            },
            other => {
                return Err(LavalinkError::UnsupportedMessage(format!(
                    "event type '{}'",
                    other
                )))
            }
        };

        Ok(NodeEvent {
            guild_id: self.guild_id,
            track: self.track,
            kind,
        })
    }
}

// Guild ids travel as strings; numbers are accepted too.
fn guild_id_from_str<'de, D>(deserializer: D) -> std::result::Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(i64),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Text(text) => text.parse().map_err(serde::de::Error::custom),
        Raw::Number(number) => Ok(number),
    }
}
