use anyhow::{Context, Result};
use std::time::Duration;

use crate::{
    client::ClientSettings,
    node::{NodeEntry, NodePolicy},
};

/// Nodo tal como aparece en `LAVALINK_NODES`.
#[derive(Clone, PartialEq, Eq)]
pub struct NodeConfig {
    pub host: String,
    pub rest_port: u16,
    pub ws_port: u16,
    pub password: String,
}

impl NodeConfig {
    pub fn entry(&self) -> crate::error::Result<NodeEntry> {
        NodeEntry::new(&self.host, &self.password, self.rest_port, self.ws_port)
    }
}

impl std::fmt::Debug for NodeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeConfig")
            .field("host", &self.host)
            .field("rest_port", &self.rest_port)
            .field("ws_port", &self.ws_port)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    // Identidad
    pub user_id: u64,
    pub num_shards: u32,

    // Nodos
    pub nodes: Vec<NodeConfig>,
    pub node_policy: NodePolicy,

    // Reconexión
    pub reconnect_base: Duration,
    pub reconnect_ceiling: Duration,

    // Rendimiento
    pub track_cache_size: usize,
    pub track_cache_ttl: Option<Duration>,
    pub resolver_workers: usize,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds and validates a config from any key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        let config = Self {
            user_id: lookup("LAVALINK_USER_ID")
                .context("LAVALINK_USER_ID is required")?
                .trim()
                .parse()
                .context("LAVALINK_USER_ID must be a numeric id")?,
            num_shards: var("LAVALINK_NUM_SHARDS", "1")
                .trim()
                .parse()
                .context("LAVALINK_NUM_SHARDS must be a number")?,

            nodes: parse_nodes(&var("LAVALINK_NODES", ""))?,
            node_policy: var("LAVALINK_NODE_POLICY", "best-effort")
                .parse::<NodePolicy>()
                .context("LAVALINK_NODE_POLICY must be 'best-effort' or 'strict'")?,

            reconnect_base: parse_duration("LAVALINK_RECONNECT_BASE", &var("LAVALINK_RECONNECT_BASE", "1s"))?,
            reconnect_ceiling: parse_duration(
                "LAVALINK_RECONNECT_CEILING",
                &var("LAVALINK_RECONNECT_CEILING", "60s"),
            )?,

            track_cache_size: var("LAVALINK_TRACK_CACHE_SIZE", "500")
                .trim()
                .parse()
                .context("LAVALINK_TRACK_CACHE_SIZE must be a number")?,
            track_cache_ttl: match var("LAVALINK_TRACK_CACHE_TTL", "1h").trim() {
                "0" => None,
                ttl => Some(parse_duration("LAVALINK_TRACK_CACHE_TTL", ttl)?).filter(|d| !d.is_zero()),
            },
            resolver_workers: match lookup("LAVALINK_RESOLVER_WORKERS") {
                Some(val) if !val.trim().is_empty() => val
                    .trim()
                    .parse()
                    .context("LAVALINK_RESOLVER_WORKERS must be a number")?,
                _ => num_cpus::get(),
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Sanity checks on values that parse but cannot work.
    pub fn validate(&self) -> Result<()> {
        if self.num_shards == 0 {
            anyhow::bail!("Shard count must be greater than 0");
        }

        if self.reconnect_base.is_zero() {
            anyhow::bail!("Reconnect base interval must be greater than 0");
        }

        if self.reconnect_base > self.reconnect_ceiling {
            anyhow::bail!(
                "Reconnect base ({}) cannot exceed the ceiling ({})",
                humantime::format_duration(self.reconnect_base),
                humantime::format_duration(self.reconnect_ceiling)
            );
        }

        if self.track_cache_size == 0 {
            anyhow::bail!("Track cache size must be greater than 0");
        }

        if self.resolver_workers == 0 {
            anyhow::bail!("Resolver workers must be greater than 0");
        }

        Ok(())
    }

    /// Loggable summary; node passwords are left out.
    pub fn summary(&self) -> String {
        let nodes = if self.nodes.is_empty() {
            "none".to_string()
        } else {
            self.nodes
                .iter()
                .map(|n| format!("{}:{}/{}", n.host, n.rest_port, n.ws_port))
                .collect::<Vec<_>>()
                .join(", ")
        };

        format!(
            "Config Summary:\n  \
            Client: user {} ({} shards)\n  \
            Nodes: {} (policy {:?})\n  \
            Reconnect: {} base, {} ceiling\n  \
            Cache: {} tracks, TTL {}\n  \
            Resolver: {} workers",
            self.user_id,
            self.num_shards,
            nodes,
            self.node_policy,
            humantime::format_duration(self.reconnect_base),
            humantime::format_duration(self.reconnect_ceiling),
            self.track_cache_size,
            self.track_cache_ttl
                .map_or("none".to_string(), |ttl| humantime::format_duration(ttl).to_string()),
            self.resolver_workers,
        )
    }

    pub fn client_settings(&self) -> ClientSettings {
        ClientSettings {
            user_id: self.user_id,
            num_shards: self.num_shards,
            reconnect_base: self.reconnect_base,
            reconnect_ceiling: self.reconnect_ceiling,
            node_policy: self.node_policy,
            track_cache_size: self.track_cache_size,
            track_cache_ttl: self.track_cache_ttl,
            resolver_workers: self.resolver_workers,
        }
    }
}

/// Parses `host:restPort:wsPort:password[,...]`. The password may itself
/// contain `:`.
pub fn parse_nodes(raw: &str) -> Result<Vec<NodeConfig>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|item| {
            let mut parts = item.splitn(4, ':');
            let (Some(host), Some(rest), Some(ws), Some(password)) =
                (parts.next(), parts.next(), parts.next(), parts.next())
            else {
                anyhow::bail!("Invalid node '{}', expected host:restPort:wsPort:password", item);
            };

            let node = NodeConfig {
                host: host.to_string(),
                rest_port: rest
                    .parse()
                    .with_context(|| format!("Invalid REST port in node '{}'", host))?,
                ws_port: ws
                    .parse()
                    .with_context(|| format!("Invalid WebSocket port in node '{}'", host))?,
                password: password.to_string(),
            };
            node.entry()
                .with_context(|| format!("Invalid node '{}'", host))?;
            Ok(node)
        })
        .collect()
}

fn parse_duration(key: &str, value: &str) -> Result<Duration> {
    humantime::parse_duration(value.trim())
        .with_context(|| format!("{} must be a duration like '1s' or '500ms', got '{}'", key, value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_only_user_id_is_set() {
        let config = load(&[("LAVALINK_USER_ID", "1234")]).unwrap();
        assert_eq!(config.user_id, 1234);
        assert_eq!(config.num_shards, 1);
        assert!(config.nodes.is_empty());
        assert_eq!(config.node_policy, NodePolicy::BestEffort);
        assert_eq!(config.reconnect_base, Duration::from_secs(1));
        assert_eq!(config.reconnect_ceiling, Duration::from_secs(60));
        assert_eq!(config.track_cache_size, 500);
        assert_eq!(config.track_cache_ttl, Some(Duration::from_secs(3600)));
        assert!(config.resolver_workers > 0);
    }

    #[test]
    fn user_id_is_required() {
        let err = load(&[]).unwrap_err();
        assert!(err.to_string().contains("LAVALINK_USER_ID"));
    }

    #[test]
    fn full_configuration_is_parsed() {
        let config = load(&[
            ("LAVALINK_USER_ID", "99"),
            ("LAVALINK_NUM_SHARDS", "4"),
            ("LAVALINK_NODES", "a.local:2333:80:pw, b.local:2334:81:p:w"),
            ("LAVALINK_RECONNECT_BASE", "500ms"),
            ("LAVALINK_RECONNECT_CEILING", "30s"),
            ("LAVALINK_TRACK_CACHE_SIZE", "10"),
            ("LAVALINK_TRACK_CACHE_TTL", "0"),
            ("LAVALINK_RESOLVER_WORKERS", "3"),
            ("LAVALINK_NODE_POLICY", "strict"),
        ])
        .unwrap();

        assert_eq!(config.nodes.len(), 2);
        assert_eq!(config.nodes[1].password, "p:w");
        assert_eq!(config.nodes[1].ws_port, 81);
        assert_eq!(config.node_policy, NodePolicy::Strict);
        assert_eq!(config.track_cache_ttl, None);

        let settings = config.client_settings();
        assert_eq!(settings.num_shards, 4);
        assert_eq!(settings.reconnect_base, Duration::from_millis(500));
        assert_eq!(settings.resolver_workers, 3);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(load(&[("LAVALINK_USER_ID", "1"), ("LAVALINK_NUM_SHARDS", "0")]).is_err());
        assert!(load(&[("LAVALINK_USER_ID", "1"), ("LAVALINK_TRACK_CACHE_SIZE", "0")]).is_err());
        assert!(load(&[("LAVALINK_USER_ID", "1"), ("LAVALINK_RESOLVER_WORKERS", "0")]).is_err());
        assert!(load(&[("LAVALINK_USER_ID", "1"), ("LAVALINK_NODE_POLICY", "random")]).is_err());
        assert!(load(&[
            ("LAVALINK_USER_ID", "1"),
            ("LAVALINK_RECONNECT_BASE", "2m"),
            ("LAVALINK_RECONNECT_CEILING", "1m"),
        ])
        .is_err());
    }

    #[test]
    fn malformed_nodes_are_rejected() {
        assert!(parse_nodes("host:2333:80").is_err());
        assert!(parse_nodes("host:rest:80:pw").is_err());
        assert!(parse_nodes("bad host:2333:80:pw").is_err());
        assert!(parse_nodes(" , ").unwrap().is_empty());
    }

    #[test]
    fn summary_hides_passwords() {
        let config = load(&[
            ("LAVALINK_USER_ID", "1"),
            ("LAVALINK_NODES", "a.local:2333:80:supersecret"),
        ])
        .unwrap();
        let summary = config.summary();
        assert!(summary.contains("a.local:2333/80"));
        assert!(!summary.contains("supersecret"));
        assert!(!format!("{:?}", config).contains("supersecret"));
    }
}
