//! # Open Lavalink
//!
//! Multi-node client for Lavalink audio servers.
//!
//! The client keeps one WebSocket per remote node, scores nodes by load and
//! sends each guild's player to the least loaded one. When a node drops, its
//! players move to the best remaining node right away and resume from their
//! last known position while the lost node reconnects with capped
//! exponential backoff.
//!
//! ## Layout
//!
//! - [`node`]: connections, penalty scoring and best-node selection
//! - [`player`]: per-guild playback state and listeners
//! - [`voice`]: one-shot voice handshake assembly
//! - [`track`]: track model, blob codec and REST resolution
//! - [`cache`]: identifier → resolved track LRU
//! - [`protocol`]: wire model of the node socket
//! - [`config`]: environment configuration for the binary
//!
//! ## Example
//!
//! ```rust,no_run
//! use open_lavalink::{ClientSettings, LavalinkClient, NodeEntry};
//!
//! # async fn example() -> open_lavalink::Result<()> {
//! let client = LavalinkClient::new(ClientSettings {
//!     user_id: 1234,
//!     ..ClientSettings::default()
//! })?;
//! client
//!     .add_node(NodeEntry::new("localhost", "youshallnotpass", 2333, 2333)?)
//!     .await?;
//!
//! let waiter = client.event_waiter(42, Some(7), None)?;
//! waiter.set_session_id("session")?;
//! waiter.set_server("token", "endpoint")?;
//!
//! client.player(42)?.play_identifier("ytsearch:never gonna", None, None).await?;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod node;
pub mod player;
pub mod protocol;
pub mod track;
pub mod voice;

#[cfg(test)]
mod testing;

pub use client::{ClientSettings, LavalinkClient};
pub use config::Config;
pub use error::{LavalinkError, Result};
pub use node::{AudioNode, LoadBalancer, NodeEntry, NodePolicy, NodeRegistry, Statistics};
pub use player::{Player, PlayerEvent, PlayerListener, PlayerRegistry, PlayerStatus};
pub use track::{Track, TrackCodec, TrackResolver};
pub use voice::EventWaiter;
