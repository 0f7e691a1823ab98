//! # Cache Module
//!
//! Resolved tracks, keyed by identifier.
//!
//! Resolving an identifier costs an HTTP round trip to a node, so the
//! result (encoded blob plus metadata) is kept in a bounded LRU with an
//! optional TTL. Only `Player::play_identifier` reads it; playing a
//! [`Track`](crate::track::Track) directly always re-encodes.
//!
//! ## Configuration
//!
//! ```env
//! LAVALINK_TRACK_CACHE_SIZE=500   # Maximum number of entries
//! LAVALINK_TRACK_CACHE_TTL=1h     # Time-to-live (humantime), 0 disables it
//! ```

pub mod lru_cache;

pub use lru_cache::{CacheMetrics, LRUCache};

use tracing::info;

use crate::track::ResolvedTrack;

/// Identifier → resolved track.
pub type TrackCache = LRUCache<String, ResolvedTrack>;

impl TrackCache {
    /// Removes expired entries and logs how many went away.
    pub fn cleanup_old_entries(&self) -> usize {
        let removed = self.cleanup_expired();
        if removed > 0 {
            info!("🧹 Cache cleanup: removed {} expired entries", removed);
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::resolved;
    use std::time::Duration;

    #[test]
    fn track_cache_keys_by_identifier() {
        let cache = TrackCache::new(8, Some(Duration::from_secs(60)));
        cache.insert("ytsearch:song".to_string(), resolved("ytsearch:song", 1000));
        let hit = cache.get("ytsearch:song").unwrap();
        assert_eq!(hit.blob, "blob-ytsearch:song");
        assert_eq!(cache.cleanup_old_entries(), 0);
    }
}
