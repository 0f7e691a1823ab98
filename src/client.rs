use std::{
    sync::{Arc, Weak},
    time::Duration,
};
use tracing::{info, warn};

use crate::{
    cache::TrackCache,
    error::{validate_guild_id, LavalinkError, Result},
    node::{AudioNode, NodeEntry, NodePolicy, NodeRegistry},
    player::{Player, PlayerRegistry},
    track::{Base64JsonCodec, HttpTrackResolver, ResolverPool, TrackCodec, TrackResolver},
    voice::EventWaiter,
};

/// Ajustes del cliente a nivel de librería.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    /// Bot user id sent as `User-Id` on every node handshake.
    pub user_id: u64,
    pub num_shards: u32,
    pub reconnect_base: Duration,
    pub reconnect_ceiling: Duration,
    pub node_policy: NodePolicy,
    pub track_cache_size: usize,
    pub track_cache_ttl: Option<Duration>,
    pub resolver_workers: usize,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            user_id: 0,
            num_shards: 1,
            reconnect_base: Duration::from_millis(1000),
            reconnect_ceiling: Duration::from_secs(60),
            node_policy: NodePolicy::BestEffort,
            track_cache_size: 500,
            track_cache_ttl: Some(Duration::from_secs(3600)),
            resolver_workers: num_cpus::get(),
        }
    }
}

/// State shared by nodes, players and waiters.
///
/// Nodes and players hold a `Weak` back-reference to it; the client owns
/// the only strong one.
pub(crate) struct ClientContext {
    pub(crate) settings: ClientSettings,
    pub(crate) nodes: NodeRegistry,
    pub(crate) players: PlayerRegistry,
    pub(crate) cache: TrackCache,
    pub(crate) resolver: ResolverPool,
    pub(crate) codec: Arc<dyn TrackCodec>,
}

impl ClientContext {
    pub(crate) fn new(
        settings: ClientSettings,
        codec: Arc<dyn TrackCodec>,
        resolver: Arc<dyn TrackResolver>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<ClientContext>| Self {
            nodes: NodeRegistry::new(settings.node_policy),
            players: PlayerRegistry::new(weak.clone()),
            cache: TrackCache::new(settings.track_cache_size, settings.track_cache_ttl),
            resolver: ResolverPool::new(resolver, settings.resolver_workers),
            codec,
            settings,
        })
    }
}

impl Drop for ClientContext {
    fn drop(&mut self) {
        for node in self.nodes.nodes() {
            node.close();
        }
    }
}

pub(crate) fn upgrade(context: &Weak<ClientContext>) -> Result<Arc<ClientContext>> {
    context
        .upgrade()
        .ok_or_else(|| LavalinkError::illegal_state("the client has been dropped"))
}

/// Punto de entrada: registros de nodos y players, caché y resolución.
#[derive(Clone)]
pub struct LavalinkClient {
    context: Arc<ClientContext>,
}

impl LavalinkClient {
    /// Builds a client with the default codec and the HTTP resolver.
    pub fn new(settings: ClientSettings) -> Result<Self> {
        let codec: Arc<dyn TrackCodec> = Arc::new(Base64JsonCodec);
        let resolver = Arc::new(HttpTrackResolver::new(Arc::clone(&codec))?);
        Ok(Self::with_components(settings, codec, resolver))
    }

    pub fn with_components(
        settings: ClientSettings,
        codec: Arc<dyn TrackCodec>,
        resolver: Arc<dyn TrackResolver>,
    ) -> Self {
        info!(
            "🎼 Lavalink client for user {} ({} shards, policy {:?})",
            settings.user_id, settings.num_shards, settings.node_policy
        );
        Self {
            context: ClientContext::new(settings, codec, resolver),
        }
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.context.settings
    }

    pub fn nodes(&self) -> &NodeRegistry {
        &self.context.nodes
    }

    pub fn players(&self) -> &PlayerRegistry {
        &self.context.players
    }

    pub fn track_cache(&self) -> &TrackCache {
        &self.context.cache
    }

    /// Connects to a node and registers it.
    ///
    /// A failure of this first connection attempt is returned as is and the
    /// node is not registered; there is no implicit retry.
    pub async fn add_node(&self, entry: NodeEntry) -> Result<Arc<AudioNode>> {
        let key = entry.key();
        if self.context.nodes.contains(&key) {
            return Err(LavalinkError::validation(format!(
                "node {} is already registered",
                key
            )));
        }

        let node = AudioNode::connect(entry, &self.context).await?;
        if let Err(e) = self.context.nodes.insert(Arc::clone(&node)) {
            warn!("Node {} registered concurrently, closing duplicate", key);
            node.close();
            return Err(e);
        }

        Ok(node)
    }

    /// Removes a node, closing its connection and failing its players over.
    pub fn remove_node(&self, key: &str) -> Option<Arc<AudioNode>> {
        self.context.nodes.remove(key)
    }

    pub fn best_node(&self) -> Result<Arc<AudioNode>> {
        self.context.nodes.best_node()
    }

    /// Get-or-create the player of a guild.
    pub fn player(&self, guild_id: i64) -> Result<Arc<Player>> {
        self.context.players.get_or_create(guild_id)
    }

    /// Starts a voice handshake for a guild.
    ///
    /// The waiter targets `node` if given, otherwise the current best node.
    pub fn event_waiter(
        &self,
        guild_id: i64,
        channel_id: Option<u64>,
        node: Option<Arc<AudioNode>>,
    ) -> Result<EventWaiter> {
        validate_guild_id(guild_id)?;
        let node = match node {
            Some(node) => node,
            None => self.context.nodes.best_node()?,
        };

        let player = self.context.players.get_or_create(guild_id)?;
        if let Some(channel_id) = channel_id {
            player.set_channel_id(Some(channel_id));
        }

        Ok(EventWaiter::new(guild_id, node, player))
    }

    /// Closes every node connection.
    pub fn shutdown(&self) {
        for node in self.context.nodes.nodes() {
            node.close();
        }
    }
}
