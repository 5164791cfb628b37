//! Edge node control plane client.
//!
//! The node keeps one control connection to the master at a time. Each
//! attempt resolves the master, fetches its public key over HTTP, dials,
//! runs the key exchange and introduces itself with Hello. After a session
//! ends the node waits `retry_delay` and starts over with a fresh key.
//!
//! Connection failures are counted. Once `max_connect_attempts` attempts in
//! a row have failed, [`NodeClient::run`] gives up with
//! [`ProtocolError::MasterUnreachable`].

use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, instrument, trace, warn};

use crate::config::{NodeConfig, VERSION};
use crate::error::{ProtocolError, Result};
use crate::protocol::handshake;
use crate::protocol::message::{BinaryChunk, ControlPacket, DisconnectPlayer, Hello};
use crate::registry::{PlayerRegistry, RouteTable};
use crate::service::bootstrap::fetch_public_key;
use crate::service::distributor::{write_download, TransferBuffers, UPGRADE_LABEL};
use crate::service::resolver;
use crate::service::secure::{spawn_writer, PacketSender, SecureChannel};
use crate::service::upgrade::{executable_hash, ImageReplacer, SelfUpgrade};
use crate::utils::metrics::global_metrics;
use crate::utils::timeout::with_timeout_error;

/// The node's current master connection, shared with the edge proxy
#[derive(Debug, Default)]
pub struct MasterLink {
    sender: RwLock<Option<PacketSender>>,
}

impl MasterLink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, sender: PacketSender) {
        *self.sender.write().unwrap_or_else(PoisonError::into_inner) = Some(sender);
    }

    /// Forget `sender` if it is still the current connection
    pub fn detach(&self, sender: &PacketSender) {
        let mut current = self.sender.write().unwrap_or_else(PoisonError::into_inner);
        if current.as_ref().is_some_and(|s| s.same_channel(sender)) {
            *current = None;
        }
    }

    pub fn is_connected(&self) -> bool {
        self.sender
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|s| !s.is_closed())
    }

    /// Send to the master. Returns `false` (and logs) when there is no
    /// connection or the send fails.
    pub async fn send(&self, packet: ControlPacket) -> bool {
        let sender = self
            .sender
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let Some(sender) = sender else {
            warn!(packet = ?packet.id(), "Not connected to master, dropping packet");
            return false;
        };
        let result = match packet.encode() {
            Ok(encoded) => sender.send(encoded).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => true,
            Err(e) => {
                warn!(packet = ?packet.id(), error = %e, "Failed to send to master");
                false
            }
        }
    }
}

/// The node side of the control plane
pub struct NodeClient {
    config: NodeConfig,
    routes: Arc<RouteTable>,
    players: Arc<PlayerRegistry>,
    link: Arc<MasterLink>,
    buffers: TransferBuffers,
    replacer: Arc<dyn ImageReplacer>,
    http: reqwest::Client,
    hash: String,
}

impl NodeClient {
    pub fn new(
        config: NodeConfig,
        routes: Arc<RouteTable>,
        players: Arc<PlayerRegistry>,
        link: Arc<MasterLink>,
    ) -> Self {
        let hash = executable_hash().unwrap_or_else(|e| {
            warn!(error = %e, "Cannot hash own executable");
            String::new()
        });
        Self {
            config,
            routes,
            players,
            link,
            buffers: TransferBuffers::new(),
            replacer: Arc::new(SelfUpgrade::new()),
            http: reqwest::Client::new(),
            hash,
        }
    }

    /// Use `replacer` for upgrade transfers instead of replacing the running
    /// executable
    pub fn with_replacer(mut self, replacer: Arc<dyn ImageReplacer>) -> Self {
        self.replacer = replacer;
        self
    }

    pub fn routes(&self) -> &Arc<RouteTable> {
        &self.routes
    }

    pub fn players(&self) -> &Arc<PlayerRegistry> {
        &self.players
    }

    pub fn link(&self) -> &Arc<MasterLink> {
        &self.link
    }

    pub fn buffers(&self) -> &TransferBuffers {
        &self.buffers
    }

    /// Connect, serve, reconnect. Only returns once the master has been
    /// unreachable for `max_connect_attempts` attempts in a row.
    pub async fn run(&self) -> Result<()> {
        let mut failures = 0u32;
        loop {
            match self.connect().await {
                Ok(channel) => {
                    failures = 0;
                    match self.session(channel).await {
                        Ok(()) => info!("Master closed the connection"),
                        Err(e) => warn!(error = %e, "Master connection lost"),
                    }
                }
                Err(e) => {
                    failures += 1;
                    warn!(
                        attempt = failures,
                        max = self.config.max_connect_attempts,
                        error = %e,
                        "Failed to reach master"
                    );
                    if failures >= self.config.max_connect_attempts {
                        error!(attempts = failures, "Giving up on master");
                        return Err(ProtocolError::MasterUnreachable(failures));
                    }
                }
            }
            tokio::time::sleep(self.config.retry_delay).await;
        }
    }

    /// One connection attempt, ending with Hello sent
    #[instrument(skip(self), fields(node = %self.config.key))]
    pub async fn connect(&self) -> Result<SecureChannel<TcpStream>> {
        let addr = resolver::master_address(&self.config).await;
        let key = fetch_public_key(&self.http, &self.config.bootstrap_url, self.config.connect_timeout).await?;

        let stream = with_timeout_error(
            async { TcpStream::connect(&addr).await.map_err(ProtocolError::from) },
            self.config.connect_timeout,
        )
        .await?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "Failed to set TCP_NODELAY");
        }

        let mut channel = SecureChannel::initiator(stream, Arc::new(key));
        handshake::initiate(&mut channel).await?;
        channel.send(ControlPacket::Hello(self.hello()).encode()?).await?;
        info!(%addr, "Connected to master");
        Ok(channel)
    }

    fn hello(&self) -> Hello {
        Hello {
            key: self.config.key.clone(),
            version: VERSION.to_string(),
            hash: self.hash.clone(),
            passphrase: self.config.passphrase.clone(),
            arch: std::env::consts::ARCH.to_string(),
        }
    }

    /// Serve an established channel until the master goes away
    pub async fn session<S>(&self, channel: SecureChannel<S>) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (mut reader, writer) = channel.into_split();
        let (sender, _writer) = spawn_writer(writer, self.config.send_queue);
        self.link.attach(sender.clone());
        let heartbeat = spawn_heartbeat(sender.clone(), self.config.heartbeat_interval);

        let result = loop {
            let packet = match reader.recv().await {
                Ok(Some(packet)) => packet,
                Ok(None) => break Ok(()),
                Err(e) => break Err(e),
            };
            match ControlPacket::decode(&packet) {
                Ok(Some(message)) => self.dispatch(message).await,
                Ok(None) => debug!(packet_id = packet.id, "Ignoring unknown packet"),
                Err(e) => {
                    global_metrics().decode_error();
                    warn!(packet_id = packet.id, error = %e, "Failed to decode packet");
                }
            }
        };

        heartbeat.abort();
        self.link.detach(&sender);
        result
    }

    async fn dispatch(&self, message: ControlPacket) {
        match message {
            ControlPacket::Ready => info!("Master ready"),
            ControlPacket::Pong => trace!("Pong"),
            ControlPacket::Routes(routes) => {
                info!(routes = routes.len(), "Routes updated");
                self.routes.set_routes(routes);
            }
            ControlPacket::BinaryData(BinaryChunk { label, data }) => {
                self.buffers.append(&label, data);
            }
            ControlPacket::BinaryEnd(BinaryChunk { label, .. }) => self.finish_transfer(&label).await,
            ControlPacket::DisconnectPlayer(target) => self.disconnect_player(&target),
            other => debug!(packet = ?other.id(), "Ignoring packet not meant for a node"),
        }
    }

    async fn finish_transfer(&self, label: &str) {
        let Some(data) = self.buffers.finish(label) else {
            debug!(label, "End of unknown transfer");
            return;
        };
        info!(label, bytes = data.len(), "Transfer complete");

        if label == UPGRADE_LABEL {
            let replacer = self.replacer.clone();
            match tokio::task::spawn_blocking(move || replacer.replace_and_restart(&data)).await {
                Ok(Ok(never)) => match never {},
                Ok(Err(e)) => error!(error = %e, "Self-upgrade failed, continuing on current build"),
                Err(e) => error!(error = %e, "Self-upgrade task panicked"),
            }
            return;
        }

        match write_download(&self.download_dir(), label, &data).await {
            Ok(path) => info!(path = %path.display(), "Download written"),
            Err(e) => error!(label, error = %e, "Failed to write download"),
        }
    }

    fn download_dir(&self) -> PathBuf {
        self.config.download_dir.clone()
    }

    fn disconnect_player(&self, target: &DisconnectPlayer) {
        let Some(entry) = self.players.find(&target.uuid, &target.host) else {
            debug!(uuid = %target.uuid, host = %target.host, "Disconnect for unknown player");
            return;
        };
        // The relay's teardown removes a live session and reports it
        match &entry.live {
            Some(live) => live.close(),
            None => {
                self.players.remove(&entry.session.key());
            }
        }
        info!(player = %entry.session.name, uuid = %target.uuid, "Player disconnected by master");
    }
}

/// Ping every `period` until the connection's queue closes
fn spawn_heartbeat(sender: PacketSender, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let ping = match ControlPacket::Ping.encode() {
                Ok(ping) => ping,
                Err(e) => {
                    error!(error = %e, "Failed to encode Ping");
                    return;
                }
            };
            if let Err(e) = sender.send(ping).await {
                debug!(error = %e, "Heartbeat stopped");
                return;
            }
        }
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::registry::{LiveConnection, PlayerSession};

    fn client() -> NodeClient {
        NodeClient::new(
            NodeConfig::default(),
            Arc::default(),
            Arc::default(),
            Arc::default(),
        )
    }

    #[tokio::test]
    async fn link_drops_while_disconnected() {
        let link = MasterLink::new();
        assert!(!link.is_connected());
        assert!(!link.send(ControlPacket::Ping).await);

        let (sender, mut rx) = PacketSender::channel(4);
        link.attach(sender.clone());
        assert!(link.is_connected());
        assert!(link.send(ControlPacket::Ping).await);
        assert_eq!(rx.recv().await.unwrap().id, 3);

        let (other, _rx) = PacketSender::channel(1);
        link.detach(&other);
        assert!(link.is_connected());
        link.detach(&sender);
        assert!(!link.is_connected());
    }

    #[tokio::test]
    async fn routes_replace_local_table() {
        let client = client();
        client
            .dispatch(ControlPacket::Routes(vec![crate::registry::Route {
                id: "lobby".into(),
                server_host: "10.0.0.5".into(),
                server_port: 25565,
                proxy_domain: "play.example.net".into(),
                proxy_port: 25565,
            }]))
            .await;
        assert!(client.routes().get_route_by_vhost("play.example.net").is_some());

        client.dispatch(ControlPacket::Routes(Vec::new())).await;
        assert!(client.routes().is_empty());
    }

    #[tokio::test]
    async fn disconnect_closes_live_connection() {
        let client = client();
        let live = LiveConnection::new();
        client.players().add(
            PlayerSession {
                name: "Steve".into(),
                uuid: "abcd".into(),
                joined_at: 0,
                backend: "10.0.0.5:25565".into(),
                virtual_host: "play.example.net".into(),
                protocol_version: 763,
                node_id: "node-a".into(),
            },
            Some(live.clone()),
        );

        client
            .dispatch(ControlPacket::DisconnectPlayer(DisconnectPlayer {
                uuid: "abcd".into(),
                host: "10.0.0.5:25565".into(),
            }))
            .await;
        tokio::time::timeout(Duration::from_secs(1), live.closed()).await.unwrap();
        assert_eq!(client.players().len(), 1);
    }

    #[tokio::test]
    async fn unknown_transfer_end_is_noop() {
        let client = client();
        client
            .dispatch(ControlPacket::BinaryEnd(BinaryChunk {
                label: "never-started".into(),
                data: Vec::new(),
            }))
            .await;
        assert_eq!(client.buffers().pending(), 0);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let config = NodeConfig {
            bootstrap_url: "http://127.0.0.1:1/api/connect/publickey".into(),
            connect_timeout: Duration::from_millis(200),
            retry_delay: Duration::from_millis(10),
            max_connect_attempts: 3,
            ..NodeConfig::default()
        };
        let client = NodeClient::new(config, Arc::default(), Arc::default(), Arc::default());
        assert!(matches!(
            client.run().await,
            Err(ProtocolError::MasterUnreachable(3))
        ));
    }
}
