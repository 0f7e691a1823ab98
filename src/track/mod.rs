//! # Track Module
//!
//! Track model plus the two external boundaries the client talks through:
//!
//! - [`codec::TrackCodec`] turns a [`Track`] into the opaque blob the nodes
//!   understand and back.
//! - [`resolver::TrackResolver`] asks a node's REST API to turn an identifier
//!   (URL, search query) into a blob and a track.
//!
//! Resolutions run on a bounded [`resolver::ResolverPool`] so that a burst of
//! `play` calls cannot open an unbounded number of HTTP requests.

pub mod codec;
pub mod resolver;

use serde::{Deserialize, Serialize};

pub use codec::{Base64JsonCodec, TrackCodec};
pub use resolver::{HttpTrackResolver, ResolvedTrack, ResolverPool, TrackResolver};

/// A playable track as reported by a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    pub identifier: String,
    pub title: String,
    pub author: String,
    /// Duration in milliseconds.
    pub length: i64,
    #[serde(default)]
    pub is_stream: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
}

impl Track {
    pub fn new(identifier: impl Into<String>, title: impl Into<String>, length: i64) -> Self {
        Self {
            identifier: identifier.into(),
            title: title.into(),
            author: String::new(),
            length,
            is_stream: false,
            uri: None,
        }
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = author.into();
        self
    }

    pub fn with_uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self
    }

    pub fn with_stream(mut self, is_stream: bool) -> Self {
        self.is_stream = is_stream;
        self
    }

    /// Duration in milliseconds, never negative.
    pub fn duration(&self) -> i64 {
        self.length.max(0)
    }
}

impl std::fmt::Display for Track {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.author.is_empty() {
            write!(f, "{} ({})", self.title, self.identifier)
        } else {
            write!(f, "{} - {} ({})", self.author, self.title, self.identifier)
        }
    }
}
