use async_trait::async_trait;
use serde::Deserialize;
use std::{sync::Arc, time::Duration};
use tokio::{sync::Semaphore, task::JoinHandle};
use tracing::{debug, error};

use super::{Track, TrackCodec};
use crate::error::{LavalinkError, Result};
use crate::node::NodeEntry;

/// Blob opaco más el track decodificado.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTrack {
    pub blob: String,
    pub track: Track,
}

/// Resolución de identificadores contra la API REST de un nodo.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TrackResolver: Send + Sync {
    async fn resolve(&self, node: &NodeEntry, identifier: &str) -> Result<ResolvedTrack>;
}

#[derive(Debug, Deserialize)]
struct LoadedTrack {
    track: String,
    #[serde(default)]
    info: Option<LoadedTrackInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoadedTrackInfo {
    identifier: String,
    #[serde(default)]
    author: String,
    #[serde(default)]
    length: i64,
    #[serde(default)]
    is_stream: bool,
    title: String,
    #[serde(default)]
    uri: Option<String>,
}

impl From<LoadedTrackInfo> for Track {
    fn from(info: LoadedTrackInfo) -> Self {
        Self {
            identifier: info.identifier,
            title: info.title,
            author: info.author,
            length: info.length,
            is_stream: info.is_stream,
            uri: info.uri,
        }
    }
}

/// `GET /loadtracks?identifier=...` sobre HTTP.
pub struct HttpTrackResolver {
    client: reqwest::Client,
    codec: Arc<dyn TrackCodec>,
}

impl HttpTrackResolver {
    pub fn new(codec: Arc<dyn TrackCodec>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self { client, codec })
    }
}

#[async_trait]
impl TrackResolver for HttpTrackResolver {
    async fn resolve(&self, node: &NodeEntry, identifier: &str) -> Result<ResolvedTrack> {
        let url = format!("{}/loadtracks", node.rest_url());
        debug!("🔍 Resolving '{}' via {}", identifier, url);

        let response = self
            .client
            .get(&url)
            .header("Authorization", node.password())
            .query(&[("identifier", identifier)])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("❌ loadtracks failed on {}: {} - {}", node.key(), status, body);
            return Err(LavalinkError::Resolve(format!("{} returned {}", url, status)));
        }

        let loaded: Vec<LoadedTrack> = response.json().await?;
        let first = loaded
            .into_iter()
            .next()
            .ok_or_else(|| LavalinkError::Resolve(format!("no matches for '{}'", identifier)))?;

        let track = match first.info {
            Some(info) => Track::from(info),
            None => self.codec.decode(&first.track)?,
        };

        Ok(ResolvedTrack {
            blob: first.track,
            track,
        })
    }
}

/// Bounded pool of resolutions.
///
/// Each resolution runs on its own spawned task once a permit is available,
/// so the completion never runs on the caller's task.
#[derive(Clone)]
pub struct ResolverPool {
    resolver: Arc<dyn TrackResolver>,
    permits: Arc<Semaphore>,
    workers: usize,
}

impl ResolverPool {
    pub fn new(resolver: Arc<dyn TrackResolver>, workers: usize) -> Self {
        let workers = workers.max(1);
        Self {
            resolver,
            permits: Arc::new(Semaphore::new(workers)),
            workers,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn spawn(&self, node: NodeEntry, identifier: String) -> JoinHandle<Result<ResolvedTrack>> {
        let resolver = Arc::clone(&self.resolver);
        let permits = Arc::clone(&self.permits);

        tokio::spawn(async move {
            let _permit = permits
                .acquire_owned()
                .await
                .map_err(|_| LavalinkError::Resolve("resolver pool closed".to_string()))?;
            resolver.resolve(&node, &identifier).await
        })
    }

    pub async fn resolve(&self, node: NodeEntry, identifier: String) -> Result<ResolvedTrack> {
        self.spawn(node, identifier)
            .await
            .map_err(|e| LavalinkError::Resolve(format!("resolver task failed: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn entry() -> NodeEntry {
        NodeEntry::new("localhost", "youshallnotpass", 2333, 80).unwrap()
    }

    #[tokio::test]
    async fn pool_forwards_to_resolver() {
        let mut mock = MockTrackResolver::new();
        mock.expect_resolve()
            .withf(|node, identifier| node.port() == 80 && identifier == "ytsearch:lofi")
            .times(1)
            .returning(|_, identifier| {
                Ok(ResolvedTrack {
                    blob: "QUFB".to_string(),
                    track: Track::new(identifier, "lofi", 1000),
                })
            });

        let pool = ResolverPool::new(Arc::new(mock), 2);
        let resolved = pool.resolve(entry(), "ytsearch:lofi".to_string()).await.unwrap();
        assert_eq!(resolved.blob, "QUFB");
        assert_eq!(resolved.track.identifier, "ytsearch:lofi");
    }

    struct SlowResolver {
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl TrackResolver for SlowResolver {
        async fn resolve(&self, _node: &NodeEntry, identifier: &str) -> Result<ResolvedTrack> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            Ok(ResolvedTrack {
                blob: identifier.to_string(),
                track: Track::new(identifier, identifier, 1),
            })
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn pool_bounds_concurrent_resolutions() {
        let resolver = Arc::new(SlowResolver {
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let pool = ResolverPool::new(resolver.clone(), 2);

        let handles: Vec<_> = (0..8)
            .map(|i| pool.spawn(entry(), format!("id-{}", i)))
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert!(resolver.peak.load(Ordering::SeqCst) <= 2);
    }

    #[test]
    fn loaded_track_info_maps_to_track() {
        let raw = r#"[{"track":"QUFB","info":{"identifier":"abc","isSeekable":true,
            "author":"Artist","length":1234,"isStream":false,"position":0,
            "title":"Song","uri":"https://example.com/abc"}}]"#;
        let loaded: Vec<LoadedTrack> = serde_json::from_str(raw).unwrap();
        let first = loaded.into_iter().next().unwrap();
        let track = Track::from(first.info.unwrap());
        assert_eq!(first.track, "QUFB");
        assert_eq!(track.length, 1234);
        assert_eq!(track.uri.as_deref(), Some("https://example.com/abc"));
    }
}
