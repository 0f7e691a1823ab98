use parking_lot::RwLock;
use std::{str::FromStr, sync::Arc};
use tracing::{debug, info};

use super::AudioNode;
use crate::error::{LavalinkError, Result};

/// Qué hacer cuando ningún nodo está disponible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NodePolicy {
    /// Fall back to the lowest-penalty node anyway (first registered on ties).
    #[default]
    BestEffort,
    /// Fail with [`LavalinkError::NoAvailableNodes`].
    Strict,
}

impl FromStr for NodePolicy {
    type Err = LavalinkError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "best-effort" | "best_effort" | "besteffort" => Ok(Self::BestEffort),
            "strict" => Ok(Self::Strict),
            other => Err(LavalinkError::validation(format!(
                "unknown node policy '{}'",
                other
            ))),
        }
    }
}

/// Nodes, kept in the order they were registered.
///
/// Registration order matters: it breaks penalty ties.
pub struct NodeRegistry {
    nodes: RwLock<Vec<Arc<AudioNode>>>,
    policy: NodePolicy,
}

impl NodeRegistry {
    pub fn new(policy: NodePolicy) -> Self {
        Self {
            nodes: RwLock::new(Vec::new()),
            policy,
        }
    }

    pub fn policy(&self) -> NodePolicy {
        self.policy
    }

    pub(crate) fn insert(&self, node: Arc<AudioNode>) -> Result<()> {
        let key = node.key();
        let mut nodes = self.nodes.write();
        if nodes.iter().any(|n| n.key() == key) {
            return Err(LavalinkError::validation(format!(
                "node {} is already registered",
                key
            )));
        }

        nodes.push(node);
        info!("📡 Node {} registered ({} total)", key, nodes.len());
        Ok(())
    }

    /// Unregisters a node and closes it. Its connection task fails the bound
    /// players over once the socket is down.
    pub fn remove(&self, key: &str) -> Option<Arc<AudioNode>> {
        let removed = {
            let mut nodes = self.nodes.write();
            let index = nodes.iter().position(|n| n.key() == key)?;
            nodes.remove(index)
        };

        removed.close();
        info!("🗑️ Node {} removed", key);
        Some(removed)
    }

    pub fn get(&self, key: &str) -> Option<Arc<AudioNode>> {
        self.nodes.read().iter().find(|n| n.key() == key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.nodes.read().iter().any(|n| n.key() == key)
    }

    pub fn nodes(&self) -> Vec<Arc<AudioNode>> {
        self.nodes.read().clone()
    }

    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }

    /// Node with the strictly lowest penalty, recomputed now.
    ///
    /// Available nodes always win over unavailable ones. When nothing is
    /// available the result depends on the [`NodePolicy`].
    pub fn best_node(&self) -> Result<Arc<AudioNode>> {
        self.select(None)
    }

    /// Same as [`best_node`](Self::best_node) but never returns `key`.
    pub fn best_node_excluding(&self, key: &str) -> Result<Arc<AudioNode>> {
        self.select(Some(key))
    }

    /// Lowest-penalty node that is available right now, whatever the policy.
    ///
    /// Players are only ever bound or moved to a node returned here.
    pub(crate) fn available_node(&self, exclude: Option<&str>) -> Result<Arc<AudioNode>> {
        let scored = self.scored(exclude);
        lowest(scored.iter().filter(|(_, _, available)| *available))
            .ok_or(LavalinkError::NoAvailableNodes)
    }

    fn scored(&self, exclude: Option<&str>) -> Vec<(Arc<AudioNode>, i32, bool)> {
        self.nodes()
            .into_iter()
            .filter(|n| exclude.map_or(true, |key| n.key() != key))
            .map(|n| {
                let total = n.load_balancer().total();
                let available = n.is_available();
                (n, total, available)
            })
            .collect()
    }

    fn select(&self, exclude: Option<&str>) -> Result<Arc<AudioNode>> {
        let scored = self.scored(exclude);
        if scored.is_empty() {
            return Err(LavalinkError::NoAvailableNodes);
        }

        if let Some(best) = lowest(scored.iter().filter(|(_, _, available)| *available)) {
            debug!("Best node: {}", best.key());
            return Ok(best);
        }

        match self.policy {
            NodePolicy::BestEffort => {
                let best = lowest(scored.iter()).ok_or(LavalinkError::NoAvailableNodes)?;
                debug!("No node available, falling back to {}", best.key());
                Ok(best)
            }
            NodePolicy::Strict => Err(LavalinkError::NoAvailableNodes),
        }
    }
}

// First strictly-lowest total wins, so ties go to the earliest registration.
fn lowest<'a, I>(scored: I) -> Option<Arc<AudioNode>>
where
    I: Iterator<Item = &'a (Arc<AudioNode>, i32, bool)>,
{
    let mut best: Option<(&Arc<AudioNode>, i32)> = None;
    for (node, total, _) in scored {
        match best {
            Some((_, record)) if *total >= record => {}
            _ => best = Some((node, *total)),
        }
    }
    best.map(|(node, _)| Arc::clone(node))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::stats::{Cpu, Memory, Statistics};
    use crate::testing::{offline_node, test_context};

    fn stats(playing: u32, system_load: f64) -> Statistics {
        Statistics {
            players: playing,
            playing_players: playing,
            uptime: 1,
            memory: Memory {
                free: 0,
                used: 0,
                allocated: 0,
                reservable: 0,
            },
            cpu: Cpu {
                cores: 2,
                system_load,
                lavalink_load: 0.0,
            },
            frame_stats: None,
        }
    }

    #[test]
    fn empty_registry_has_no_best_node() {
        let registry = NodeRegistry::new(NodePolicy::BestEffort);
        assert!(matches!(registry.best_node(), Err(LavalinkError::NoAvailableNodes)));
    }

    #[test]
    fn duplicate_keys_are_rejected() {
        let ctx = test_context();
        let (a, _rx) = offline_node(&ctx, "node-a");
        let (again, _rx2) = offline_node(&ctx, "NODE-A");
        ctx.nodes.insert(a).unwrap();
        assert!(matches!(ctx.nodes.insert(again), Err(LavalinkError::Validation(_))));
        assert_eq!(ctx.nodes.len(), 1);
    }

    #[test]
    fn node_with_stats_beats_node_without() {
        let ctx = test_context();
        let (a, _ra) = offline_node(&ctx, "node-a");
        let (b, _rb) = offline_node(&ctx, "node-b");
        // b registered first and has no stats yet
        ctx.nodes.insert(b.clone()).unwrap();
        ctx.nodes.insert(a.clone()).unwrap();
        a.set_statistics(stats(500, 0.9));

        assert_eq!(ctx.nodes.best_node().unwrap().key(), a.key());
    }

    #[test]
    fn lowest_total_wins_and_ties_go_to_first_registered() {
        let ctx = test_context();
        let (a, _ra) = offline_node(&ctx, "node-a");
        let (b, _rb) = offline_node(&ctx, "node-b");
        let (c, _rc) = offline_node(&ctx, "node-c");
        for node in [&a, &b, &c] {
            ctx.nodes.insert(Arc::clone(node)).unwrap();
        }
        a.set_statistics(stats(4, 0.0));
        b.set_statistics(stats(2, 0.0));
        c.set_statistics(stats(2, 0.0));

        assert_eq!(ctx.nodes.best_node().unwrap().key(), b.key());

        b.set_statistics(stats(2, 0.1)); // cpu penalty 6
        assert_eq!(ctx.nodes.best_node().unwrap().key(), c.key());
    }

    #[test]
    fn two_node_scenario_follows_availability() {
        let ctx = test_context();
        let (a, _ra) = offline_node(&ctx, "node-a");
        let (b, _rb) = offline_node(&ctx, "node-b");
        ctx.nodes.insert(a.clone()).unwrap();
        ctx.nodes.insert(b.clone()).unwrap();
        a.set_statistics(stats(2, 0.1));

        assert_eq!(a.load_balancer().total(), 8);
        assert_eq!(ctx.nodes.best_node().unwrap().key(), a.key());

        a.set_available(false);
        assert_eq!(ctx.nodes.best_node().unwrap().key(), b.key());
    }

    #[test]
    fn all_unavailable_depends_on_policy() {
        let ctx = test_context();
        let (a, _ra) = offline_node(&ctx, "node-a");
        let (b, _rb) = offline_node(&ctx, "node-b");
        a.set_available(false);
        b.set_available(false);
        ctx.nodes.insert(a.clone()).unwrap();
        ctx.nodes.insert(b.clone()).unwrap();
        assert_eq!(ctx.nodes.best_node().unwrap().key(), a.key());

        let strict = NodeRegistry::new(NodePolicy::Strict);
        strict.insert(a).unwrap();
        strict.insert(b).unwrap();
        assert!(matches!(strict.best_node(), Err(LavalinkError::NoAvailableNodes)));
    }

    #[test]
    fn excluding_skips_the_given_node() {
        let ctx = test_context();
        let (a, _ra) = offline_node(&ctx, "node-a");
        ctx.nodes.insert(a.clone()).unwrap();
        assert!(matches!(
            ctx.nodes.best_node_excluding(&a.key()),
            Err(LavalinkError::NoAvailableNodes)
        ));
    }

    #[test]
    fn available_node_ignores_best_effort_fallback() {
        let ctx = test_context();
        let (a, _ra) = offline_node(&ctx, "node-a");
        let (b, _rb) = offline_node(&ctx, "node-b");
        ctx.nodes.insert(a.clone()).unwrap();
        ctx.nodes.insert(b.clone()).unwrap();
        b.set_available(false);

        // best_node still falls back to b, available_node does not
        assert_eq!(ctx.nodes.best_node_excluding(&a.key()).unwrap().key(), b.key());
        assert!(matches!(
            ctx.nodes.available_node(Some(&a.key())),
            Err(LavalinkError::NoAvailableNodes)
        ));
        assert_eq!(ctx.nodes.available_node(None).unwrap().key(), a.key());
    }

    #[test]
    fn policy_parses_from_config_strings() {
        assert_eq!("best-effort".parse::<NodePolicy>().unwrap(), NodePolicy::BestEffort);
        assert_eq!(" Strict ".parse::<NodePolicy>().unwrap(), NodePolicy::Strict);
        assert!("random".parse::<NodePolicy>().is_err());
    }
}
