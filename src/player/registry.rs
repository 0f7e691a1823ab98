use dashmap::DashMap;
use std::sync::{Arc, Weak};
use tracing::debug;

use super::Player;
use crate::{
    client::ClientContext,
    error::{validate_guild_id, Result},
};

/// Players por guild, con semántica get-or-create.
pub struct PlayerRegistry {
    players: DashMap<i64, Arc<Player>>,
    context: Weak<ClientContext>,
}

impl PlayerRegistry {
    pub(crate) fn new(context: Weak<ClientContext>) -> Self {
        Self {
            players: DashMap::new(),
            context,
        }
    }

    /// Returns the guild's player, creating it on first use.
    ///
    /// Concurrent callers for the same guild all get the same instance.
    pub fn get_or_create(&self, guild_id: i64) -> Result<Arc<Player>> {
        validate_guild_id(guild_id)?;

        let player = self
            .players
            .entry(guild_id)
            .or_insert_with(|| {
                debug!("Creating player for guild {}", guild_id);
                Arc::new(Player::new(guild_id, self.context.clone()))
            })
            .clone();
        Ok(player)
    }

    /// Lookup without creation.
    pub fn get(&self, guild_id: i64) -> Option<Arc<Player>> {
        self.players.get(&guild_id).map(|p| Arc::clone(p.value()))
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    pub fn guild_ids(&self) -> Vec<i64> {
        self.players.iter().map(|p| *p.key()).collect()
    }

    pub(crate) fn bound_to(&self, node_key: &str) -> Vec<Arc<Player>> {
        self.snapshot()
            .into_iter()
            .filter(|p| p.node().map_or(false, |n| n.key() == node_key))
            .collect()
    }

    pub(crate) fn unbound(&self) -> Vec<Arc<Player>> {
        self.snapshot()
            .into_iter()
            .filter(|p| p.node().is_none())
            .collect()
    }

    // Players are inspected after the shard locks are released.
    fn snapshot(&self) -> Vec<Arc<Player>> {
        self.players.iter().map(|p| Arc::clone(p.value())).collect()
    }
}
