use serde::Deserialize;

/// Immutable snapshot a node publishes with every `stats` message.
///
/// Replaced wholesale on every push, never patched field by field.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Statistics {
    pub players: u32,
    pub playing_players: u32,
    /// Milliseconds since the node started.
    pub uptime: u64,
    pub memory: Memory,
    pub cpu: Cpu,
    /// Older node versions do not send frame statistics.
    #[serde(default)]
    pub frame_stats: Option<Frames>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Memory {
    pub free: u64,
    pub used: u64,
    pub allocated: u64,
    pub reservable: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cpu {
    pub cores: u32,
    pub system_load: f64,
    pub lavalink_load: f64,
}

/// Per-minute averages. Missing fields read as zero.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct Frames {
    #[serde(default)]
    pub sent: f64,
    #[serde(default)]
    pub nulled: f64,
    #[serde(default)]
    pub deficit: f64,
}

impl Statistics {
    pub fn has_frame_stats(&self) -> bool {
        self.frame_stats.is_some()
    }
}
