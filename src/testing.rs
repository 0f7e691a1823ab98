//! Helpers shared by the unit tests.

use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_tungstenite::tungstenite::Message;

use crate::{
    client::{ClientContext, ClientSettings},
    node::{AudioNode, NodeEntry},
    track::{Base64JsonCodec, ResolvedTrack, TrackResolver},
};

pub(crate) fn test_context() -> Arc<ClientContext> {
    context_with_resolver(Arc::new(crate::track::resolver::MockTrackResolver::new()))
}

pub(crate) fn context_with_resolver(resolver: Arc<dyn TrackResolver>) -> Arc<ClientContext> {
    let settings = ClientSettings {
        user_id: 1,
        resolver_workers: 2,
        ..ClientSettings::default()
    };
    ClientContext::new(settings, Arc::new(Base64JsonCodec), resolver)
}

/// Available node whose outbound frames land in the returned receiver.
pub(crate) fn offline_node(
    ctx: &Arc<ClientContext>,
    address: &str,
) -> (Arc<AudioNode>, UnboundedReceiver<Message>) {
    let entry = NodeEntry::new(address, "youshallnotpass", 2333, 80).unwrap();
    AudioNode::detached(entry, ctx)
}

pub(crate) fn drain_commands(rx: &mut UnboundedReceiver<Message>) -> Vec<Value> {
    let mut commands = Vec::new();
    while let Ok(message) = rx.try_recv() {
        if let Message::Text(text) = message {
            commands.push(serde_json::from_str(text.as_str()).unwrap());
        }
    }
    commands
}

pub(crate) fn resolved(identifier: &str, length: i64) -> ResolvedTrack {
    ResolvedTrack {
        blob: format!("blob-{}", identifier),
        track: crate::track::Track::new(identifier, identifier, length),
    }
}
