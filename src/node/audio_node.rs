use futures::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use parking_lot::{Mutex, RwLock};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Weak,
};
use tokio::{net::TcpStream, sync::mpsc};
use tokio_tungstenite::{
    tungstenite::{
        self,
        client::IntoClientRequest,
        http::HeaderValue,
        protocol::{frame::coding::CloseCode, CloseFrame},
        Message,
    },
    MaybeTlsStream, WebSocketStream,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::{backoff::Backoff, balancer::LoadBalancer, stats::Statistics, NodeEntry};
use crate::{
    client::{upgrade, ClientContext},
    error::{LavalinkError, Result},
    protocol::{InboundMessage, OutboundCommand},
};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How a connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Disconnect {
    /// Normal closure code: no reconnect.
    Graceful(String),
    Abnormal(String),
    /// The node was removed or the client shut down.
    Shutdown,
}

/// Persistent connection to a remote node.
///
/// Each node runs its own connection task: it reads inbound messages in
/// arrival order, fails bound players over when the socket drops and
/// reconnects with capped exponential backoff after abnormal closures.
pub struct AudioNode {
    entry: NodeEntry,
    context: Weak<ClientContext>,
    stats: RwLock<Option<Statistics>>,
    available: AtomicBool,
    outbound: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    backoff: Mutex<Backoff>,
    shutdown: CancellationToken,
}

impl AudioNode {
    fn new(entry: NodeEntry, context: &Arc<ClientContext>) -> Self {
        let settings = &context.settings;
        Self {
            entry,
            context: Arc::downgrade(context),
            stats: RwLock::new(None),
            available: AtomicBool::new(false),
            outbound: Mutex::new(None),
            backoff: Mutex::new(Backoff::new(
                settings.reconnect_base,
                settings.reconnect_ceiling,
            )),
            shutdown: CancellationToken::new(),
        }
    }

    /// Opens the first connection and starts the node's connection task.
    ///
    /// A failure here is returned to the caller without any retry.
    pub(crate) async fn connect(
        entry: NodeEntry,
        context: &Arc<ClientContext>,
    ) -> Result<Arc<Self>> {
        let node = Arc::new(Self::new(entry, context));

        info!("🔗 Connecting to node {}", node.key());
        let socket = node.open().await?;
        let inbound = node.attach(socket);

        tokio::spawn(Arc::clone(&node).run(inbound));
        Ok(node)
    }

    pub fn entry(&self) -> &NodeEntry {
        &self.entry
    }

    pub fn key(&self) -> String {
        self.entry.key()
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    /// Marks the node (un)available for best-node selection.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn statistics(&self) -> Option<Statistics> {
        self.stats.read().clone()
    }

    pub(crate) fn set_statistics(&self, stats: Statistics) {
        *self.stats.write() = Some(stats);
    }

    /// Penalties recomputed from the latest statistics.
    pub fn load_balancer(&self) -> LoadBalancer {
        LoadBalancer::compute(self.stats.read().as_ref(), self.is_available())
    }

    pub fn penalty(&self) -> i32 {
        self.load_balancer().total()
    }

    pub fn is_connected(&self) -> bool {
        self.outbound.lock().is_some()
    }

    pub fn send(&self, command: &OutboundCommand) -> Result<()> {
        trace!("→ {} {}", self.key(), command.op());
        self.send_raw(command.to_json()?)
    }

    pub fn send_raw(&self, payload: String) -> Result<()> {
        self.send_message(Message::text(payload))
    }

    /// Stops the connection task for good. Idempotent.
    pub fn close(&self) {
        self.shutdown.cancel();
    }

    async fn open(&self) -> Result<Socket> {
        let connection_error = |e: tungstenite::Error| LavalinkError::Connection {
            node: self.key(),
            source: Box::new(e),
        };

        let context = upgrade(&self.context)?;
        let mut request = self
            .entry
            .websocket_url()
            .into_client_request()
            .map_err(connection_error)?;

        let password = HeaderValue::from_str(self.entry.password()).map_err(|_| {
            LavalinkError::validation(format!("password of node {} is not a valid header", self.key()))
        })?;
        let headers = request.headers_mut();
        headers.insert("authorization", password);
        headers.insert("user-id", HeaderValue::from(context.settings.user_id));
        headers.insert("num-shards", HeaderValue::from(context.settings.num_shards));

        let (socket, _) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(connection_error)?;
        Ok(socket)
    }

    /// Starts the writer for a fresh socket and runs the on-connect steps.
    /// Returns the read half.
    fn attach(self: &Arc<Self>, socket: Socket) -> SplitStream<Socket> {
        let (sink, stream) = socket.split();
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(write_loop(self.key(), sink, rx));
        *self.outbound.lock() = Some(tx);

        self.on_connected();
        stream
    }

    /// Resets the backoff, marks the node available and adopts every player
    /// that has no node.
    pub(crate) fn on_connected(self: &Arc<Self>) {
        self.backoff.lock().reset();
        self.set_available(true);
        info!("✅ Node {} connected", self.key());

        let Some(context) = self.context.upgrade() else {
            return;
        };
        // Players left on this node by a failed move are resumed too.
        let mut players = context.players.bound_to(&self.key());
        players.extend(context.players.unbound());
        for player in players {
            debug!("Binding guild {} to node {}", player.guild_id(), self.key());
            if let Err(e) = player.rebind(Arc::clone(self)) {
                warn!("Failed to resume guild {} on {}: {}", player.guild_id(), self.key(), e);
            }
        }
    }

    async fn run(self: Arc<Self>, mut inbound: SplitStream<Socket>) {
        loop {
            let reason = self.read_loop(&mut inbound).await;
            self.on_disconnected(&reason);

            match reason {
                Disconnect::Abnormal(_) => {}
                Disconnect::Graceful(_) | Disconnect::Shutdown => break,
            }

            let Some(socket) = self.reconnect().await else {
                break;
            };
            inbound = self.attach(socket);
        }

        debug!("Connection task for {} finished", self.key());
    }

    async fn read_loop(&self, inbound: &mut SplitStream<Socket>) -> Disconnect {
        loop {
            let next = tokio::select! {
                _ = self.shutdown.cancelled() => {
                    let _ = self.send_message(Message::Close(Some(CloseFrame {
                        code: CloseCode::Normal,
                        reason: "node removed".into(),
                    })));
                    return Disconnect::Shutdown;
                }
                next = inbound.next() => next,
            };

            match next {
                Some(Ok(Message::Text(text))) => {
                    if let Err(e) = self.handle_message(text.as_str()) {
                        if e.is_protocol_error() {
                            warn!("Node {} sent a message we could not process: {}", self.key(), e);
                        } else {
                            error!("Error handling message from {}: {}", self.key(), e);
                        }
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    let _ = self.send_message(Message::Pong(data));
                }
                Some(Ok(Message::Close(frame))) => {
                    return match frame {
                        Some(frame) if frame.code == CloseCode::Normal => {
                            Disconnect::Graceful(frame.reason.to_string())
                        }
                        Some(frame) => Disconnect::Abnormal(format!(
                            "closed with code {}: {}",
                            u16::from(frame.code),
                            frame.reason
                        )),
                        None => Disconnect::Abnormal("closed without a close frame".to_string()),
                    };
                }
                Some(Ok(other)) => trace!("Ignoring {:?} from {}", other, self.key()),
                Some(Err(e)) => return Disconnect::Abnormal(e.to_string()),
                None => return Disconnect::Abnormal("stream ended".to_string()),
            }
        }
    }

    fn send_message(&self, message: Message) -> Result<()> {
        let outbound = self.outbound.lock();
        outbound
            .as_ref()
            .ok_or_else(|| LavalinkError::NotConnected(self.key()))?
            .send(message)
            .map_err(|_| LavalinkError::NotConnected(self.key()))
    }

    /// Dispatches one inbound text frame.
    pub(crate) fn handle_message(&self, text: &str) -> Result<()> {
        let context = upgrade(&self.context)?;

        match InboundMessage::parse(text)? {
            InboundMessage::PlayerUpdate(update) => {
                let player = context
                    .players
                    .get(update.guild_id)
                    .ok_or(LavalinkError::PlayerNotFound(update.guild_id))?;
                player.apply_update(update.state.position, update.state.time);
            }
            InboundMessage::Stats(stats) => {
                trace!(
                    "Stats from {}: {} playing, load {:.2}",
                    self.key(),
                    stats.playing_players,
                    stats.cpu.system_load
                );
                self.set_statistics(stats);
            }
            InboundMessage::Event(event) => {
                let player = context
                    .players
                    .get(event.guild_id)
                    .ok_or(LavalinkError::PlayerNotFound(event.guild_id))?;
                let track = event
                    .track
                    .as_deref()
                    .and_then(|blob| context.codec.decode(blob).ok());
                player.handle_node_event(event.kind, track);
            }
        }

        Ok(())
    }

    /// Drops the connection state and moves every bound player to the best
    /// other node right away.
    pub(crate) fn on_disconnected(self: &Arc<Self>, reason: &Disconnect) {
        self.set_available(false);
        self.outbound.lock().take();

        match reason {
            Disconnect::Graceful(why) => info!("Node {} closed normally: {}", self.key(), why),
            Disconnect::Abnormal(why) => warn!("⚠️ Node {} disconnected: {}", self.key(), why),
            Disconnect::Shutdown => info!("Node {} shut down", self.key()),
        }

        let Some(context) = self.context.upgrade() else {
            return;
        };
        let key = self.key();
        for player in context.players.bound_to(&key) {
            match context.nodes.available_node(Some(&key)) {
                Ok(target) => {
                    info!(
                        "🔄 Moving guild {} from {} to {}",
                        player.guild_id(),
                        key,
                        target.key()
                    );
                    if let Err(e) = player.rebind(target) {
                        warn!("Failed to resume guild {}: {}", player.guild_id(), e);
                    }
                }
                Err(_) => {
                    debug!("No node to move guild {} to, unbinding", player.guild_id());
                    player.unbind();
                }
            }
        }
    }

    /// Retries until a connection opens or the node is closed.
    async fn reconnect(&self) -> Option<Socket> {
        loop {
            let delay = self.backoff.lock().next_delay();
            warn!(
                "Reconnecting to {} in {}",
                self.key(),
                humantime::format_duration(delay)
            );

            tokio::select! {
                _ = self.shutdown.cancelled() => return None,
                _ = tokio::time::sleep(delay) => {}
            }

            match self.open().await {
                Ok(socket) => return Some(socket),
                Err(e) => warn!("Reconnect to {} failed: {}", self.key(), e),
            }
        }
    }

    /// Node with no socket, writing into a channel the test can read.
    #[cfg(test)]
    pub(crate) fn detached(
        entry: NodeEntry,
        context: &Arc<ClientContext>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<Message>) {
        let node = Arc::new(Self::new(entry, context));
        let (tx, rx) = mpsc::unbounded_channel();
        *node.outbound.lock() = Some(tx);
        node.set_available(true);
        (node, rx)
    }

    #[cfg(test)]
    pub(crate) fn backoff_delay(&self) -> std::time::Duration {
        self.backoff.lock().current()
    }
}

impl std::fmt::Debug for AudioNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioNode")
            .field("key", &self.key())
            .field("available", &self.is_available())
            .field("connected", &self.is_connected())
            .finish()
    }
}

async fn write_loop(
    key: String,
    mut sink: SplitSink<Socket, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(message) = rx.recv().await {
        let closing = matches!(message, Message::Close(_));
        if let Err(e) = sink.send(message).await {
            warn!("Write to {} failed: {}", key, e);
            break;
        }
        if closing {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        player::PlayerStatus,
        testing::{drain_commands, offline_node, test_context},
        track::Track,
    };
    use std::time::Duration;

    const STATS: &str = r#"{"op":"stats","players":4,"playingPlayers":2,"uptime":1000,
        "memory":{"free":1,"used":2,"allocated":3,"reservable":4},
        "cpu":{"cores":4,"systemLoad":0.1,"lavalinkLoad":0.05}}"#;

    #[test]
    fn stats_replace_the_snapshot() {
        let ctx = test_context();
        let (node, _rx) = offline_node(&ctx, "node-a");
        assert!(node.load_balancer().is_sentinel());

        node.handle_message(STATS).unwrap();
        assert_eq!(node.statistics().unwrap().playing_players, 2);
        assert_eq!(node.penalty(), 8);
    }

    #[test]
    fn player_update_overwrites_position_and_timestamp() {
        let ctx = test_context();
        let (node, _rx) = offline_node(&ctx, "node-a");
        let player = ctx.players.get_or_create(10).unwrap();

        node.handle_message(r#"{"op":"playerUpdate","guildId":"10","state":{"position":1234,"time":5000}}"#)
            .unwrap();
        assert_eq!(player.raw_position(), (1234, 5000));
    }

    #[test]
    fn messages_for_unknown_guilds_are_not_found() {
        let ctx = test_context();
        let (node, _rx) = offline_node(&ctx, "node-a");
        let result =
            node.handle_message(r#"{"op":"playerUpdate","guildId":"99","state":{"position":1,"time":2}}"#);
        assert!(matches!(result, Err(LavalinkError::PlayerNotFound(99))));
        assert!(ctx.players.get(99).is_none());
    }

    #[test]
    fn unsupported_messages_are_protocol_errors() {
        let ctx = test_context();
        let (node, _rx) = offline_node(&ctx, "node-a");
        let err = node.handle_message(r#"{"op":"ready","resumed":false}"#).unwrap_err();
        assert!(matches!(err, LavalinkError::UnsupportedMessage(_)));
        assert!(err.is_protocol_error());
    }

    #[test]
    fn track_event_clears_the_track() {
        let ctx = test_context();
        let (node, mut rx) = offline_node(&ctx, "node-a");
        let player = ctx.players.get_or_create(3).unwrap();
        player.bind_node(node.clone());
        player.play_track(Track::new("abc", "Song", 60_000), None, None).unwrap();
        drain_commands(&mut rx);

        node.handle_message(
            r#"{"op":"event","type":"TrackEndEvent","guildId":"3","reason":"FINISHED"}"#,
        )
        .unwrap();
        assert!(player.track().is_none());
    }

    #[test]
    fn disconnect_moves_players_to_best_other_node() {
        let ctx = test_context();
        let (a, mut rx_a) = offline_node(&ctx, "node-a");
        let (b, mut rx_b) = offline_node(&ctx, "node-b");
        ctx.nodes.insert(a.clone()).unwrap();
        ctx.nodes.insert(b.clone()).unwrap();

        let player = ctx.players.get_or_create(1).unwrap();
        player.bind_node(a.clone());
        player.play_track(Track::new("abc", "Song", 60_000), None, None).unwrap();
        drain_commands(&mut rx_a);

        a.on_disconnected(&Disconnect::Abnormal("test".to_string()));

        assert!(!a.is_available());
        assert!(!a.is_connected());
        assert_eq!(player.node().unwrap().key(), b.key());
        let resumed = drain_commands(&mut rx_b);
        assert_eq!(resumed.last().unwrap()["op"], "play");
    }

    #[test]
    fn disconnect_without_other_nodes_unbinds() {
        let ctx = test_context();
        let (a, _rx) = offline_node(&ctx, "node-a");
        ctx.nodes.insert(a.clone()).unwrap();
        let player = ctx.players.get_or_create(1).unwrap();
        player.bind_node(a.clone());

        a.on_disconnected(&Disconnect::Graceful("bye".to_string()));
        assert!(player.node().is_none());
        assert_eq!(player.status(), PlayerStatus::NotConnected);
    }

    #[test]
    fn failover_never_targets_a_node_that_is_down() {
        let ctx = test_context();
        let (a, mut rx_a) = offline_node(&ctx, "node-a");
        let (b, _rx_b) = offline_node(&ctx, "node-b");
        ctx.nodes.insert(a.clone()).unwrap();
        ctx.nodes.insert(b.clone()).unwrap();
        b.on_disconnected(&Disconnect::Abnormal("reset".to_string()));

        let player = ctx.players.get_or_create(5).unwrap();
        player.bind_node(a.clone());
        player.play_track(Track::new("abc", "Song", 60_000), None, None).unwrap();
        drain_commands(&mut rx_a);

        a.on_disconnected(&Disconnect::Abnormal("reset".to_string()));
        assert!(player.node().is_none());
        assert_eq!(player.status(), PlayerStatus::NotConnected);

        // b comes back and picks the player up
        let (tx, mut rx_b) = mpsc::unbounded_channel();
        *b.outbound.lock() = Some(tx);
        b.on_connected();
        assert_eq!(player.node().unwrap().key(), b.key());
        let resumed = drain_commands(&mut rx_b);
        assert_eq!(resumed.last().unwrap()["op"], "play");
        assert_eq!(resumed.last().unwrap()["guildId"], "5");
    }

    #[test]
    fn reconnect_resumes_players_still_bound_to_the_node() {
        let ctx = test_context();
        let (a, _rx) = offline_node(&ctx, "node-a");
        ctx.nodes.insert(a.clone()).unwrap();
        let player = ctx.players.get_or_create(6).unwrap();
        player.bind_node(a.clone());
        player.play_track(Track::new("abc", "Song", 60_000), None, None).unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        *a.outbound.lock() = Some(tx);
        a.on_connected();
        let resumed = drain_commands(&mut rx);
        assert_eq!(resumed.len(), 1);
        assert_eq!(resumed[0]["op"], "play");
    }

    #[test]
    fn connect_adopts_unbound_players_and_resets_backoff() {
        let ctx = test_context();
        let (a, _rx) = offline_node(&ctx, "node-a");
        let player = ctx.players.get_or_create(8).unwrap();

        a.backoff.lock().next_delay();
        a.backoff.lock().next_delay();
        assert!(a.backoff_delay() > Duration::from_millis(1000));

        a.on_connected();
        assert_eq!(a.backoff_delay(), Duration::from_millis(1000));
        assert_eq!(player.node().unwrap().key(), a.key());
        assert_eq!(player.status(), PlayerStatus::Connected);
    }

    #[test]
    fn send_fails_once_disconnected() {
        let ctx = test_context();
        let (a, _rx) = offline_node(&ctx, "node-a");
        a.send(&OutboundCommand::stop(1)).unwrap();
        a.on_disconnected(&Disconnect::Shutdown);
        assert!(matches!(
            a.send(&OutboundCommand::stop(1)),
            Err(LavalinkError::NotConnected(_))
        ));
    }
}
