//! Fleet master: control plane server, route broadcaster and the operations
//! an admin surface drives.
//!
//! Every accepted control connection runs in its own task:
//!
//! ```text
//! Accepted -> KeyExchange -> Ready -> dispatch loop -> Closed
//! ```
//!
//! The dispatch loop owns the read half. Writes go through a
//! [`PacketSender`] so the broadcaster, binary pushes and the loop itself can
//! all reach the node without blocking one another. Route tables travel on
//! a per-connection [`LatestSender`] lane, so a slow node always ends on the
//! newest table.

use rsa::RsaPrivateKey;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Instant, SystemTime};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::config::MasterConfig;
use crate::error::{ProtocolError, Result};
use crate::protocol::handshake;
use crate::protocol::message::{ControlPacket, DisconnectPlayer, Hello};
use crate::registry::nodes::next_connection_id;
use crate::registry::players::format_duration;
use crate::registry::{FleetDirectory, NodeEntry, NodeMeta, NodeRegistry, PlayerRegistry, PlayerSession, RouteTable};
use crate::service::bootstrap;
use crate::service::distributor::{send_binary, UPGRADE_LABEL};
use crate::service::secure::{spawn_latest, spawn_writer, LatestSender, PacketSender, SecureChannel};
use crate::utils::crypto::{load_or_generate_keypair, public_key_to_pem};
use crate::utils::metrics::global_metrics;

/// The fleet master
pub struct Master {
    config: MasterConfig,
    directory: Arc<FleetDirectory>,
    nodes: Arc<NodeRegistry>,
    players: Arc<PlayerRegistry>,
    key: Arc<RsaPrivateKey>,
    /// Held while a route table is read and published
    publish: Mutex<()>,
}

impl Master {
    pub fn new(config: MasterConfig, directory: Arc<FleetDirectory>, key: RsaPrivateKey) -> Self {
        Self {
            config,
            directory,
            nodes: Arc::new(NodeRegistry::new()),
            players: Arc::new(PlayerRegistry::new()),
            key: Arc::new(key),
            publish: Mutex::new(()),
        }
    }

    /// Load (or generate) the key pair and build the directory from `config`
    pub fn from_config(config: MasterConfig) -> Result<Self> {
        let key = load_or_generate_keypair(&config.key_path, &config.public_key_path, config.rsa_bits)?;
        let directory = Arc::new(FleetDirectory::from_config(&config));
        Ok(Self::new(config, directory, key))
    }

    pub fn directory(&self) -> &Arc<FleetDirectory> {
        &self.directory
    }

    pub fn routes(&self) -> &Arc<RouteTable> {
        self.directory.routes()
    }

    pub fn nodes(&self) -> &Arc<NodeRegistry> {
        &self.nodes
    }

    pub fn players(&self) -> &Arc<PlayerRegistry> {
        &self.players
    }

    pub fn public_key_pem(&self) -> Result<String> {
        public_key_to_pem(&self.key.to_public_key())
    }

    /// Run until CTRL+C
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
        tokio::spawn(async move {
            if let Ok(()) = tokio::signal::ctrl_c().await {
                info!("Received CTRL+C signal, shutting down");
                let _ = shutdown_tx.send(()).await;
            }
        });
        self.run_with_shutdown(shutdown_rx).await
    }

    /// Bind the control and bootstrap listeners and serve until `shutdown_rx`
    /// fires or a listener fails
    pub async fn run_with_shutdown(self: Arc<Self>, mut shutdown_rx: mpsc::Receiver<()>) -> Result<()> {
        let control = TcpListener::bind(&self.config.control_address).await?;
        let bootstrap_listener = TcpListener::bind(&self.config.bootstrap_address).await?;
        let pem = self.public_key_pem()?;
        let broadcaster = self.spawn_broadcaster();

        let result = tokio::select! {
            _ = shutdown_rx.recv() => {
                info!("Master shutting down");
                Ok(())
            }
            result = bootstrap::serve(bootstrap_listener, pem) => result,
            result = self.clone().serve_control(control) => result,
        };
        broadcaster.abort();
        global_metrics().log_metrics();
        result
    }

    /// Accept control connections forever
    #[instrument(skip_all)]
    pub async fn serve_control(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        let addr = listener.local_addr()?;
        info!(%addr, "Control plane listening");

        loop {
            let (stream, peer) = listener.accept().await?;
            if let Err(e) = stream.set_nodelay(true) {
                debug!(%peer, error = %e, "Failed to set TCP_NODELAY");
            }
            let master = self.clone();
            tokio::spawn(async move {
                global_metrics().control_connection_opened();
                if let Err(e) = master.handle_connection(stream, peer).await {
                    if e.is_disconnect() {
                        debug!(%peer, error = %e, "Control connection dropped");
                    } else {
                        error!(%peer, error = %e, "Control connection error");
                    }
                }
                global_metrics().control_connection_closed();
            });
        }
    }

    /// Run one control connection to completion
    #[instrument(skip(self, stream), fields(peer = %peer))]
    pub async fn handle_connection<S>(&self, stream: S, peer: SocketAddr) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let mut channel = SecureChannel::responder(stream, self.key.clone());
        handshake::accept(&mut channel, self.config.handshake_timeout).await?;

        let (mut reader, writer) = channel.into_split();
        let (sender, _writer) = spawn_writer(writer, self.config.send_queue);
        let (routes, route_lane) = spawn_latest(sender.clone());
        let conn_id = next_connection_id();
        let mut node_key: Option<String> = None;

        let result = loop {
            let packet = match reader.recv().await {
                Ok(Some(packet)) => packet,
                Ok(None) => break Ok(()),
                Err(e) if e.is_disconnect() => break Ok(()),
                Err(e) => break Err(e),
            };
            if let Some(key) = &node_key {
                self.nodes.touch(key, conn_id);
            }

            let message = match ControlPacket::decode(&packet) {
                Ok(Some(message)) => message,
                Ok(None) => {
                    debug!(packet_id = packet.id, "Ignoring unknown packet");
                    continue;
                }
                Err(e) => {
                    global_metrics().decode_error();
                    warn!(packet_id = packet.id, error = %e, "Failed to decode packet");
                    continue;
                }
            };

            let handled = match message {
                ControlPacket::Hello(hello) if node_key.as_ref().is_some_and(|key| *key != hello.key) => {
                    warn!(node = ?node_key, claimed = %hello.key, "Node key changed mid-connection");
                    Err(ProtocolError::HandshakeError(format!(
                        "node key cannot change on a connection (claimed {})",
                        hello.key
                    )))
                }
                ControlPacket::Hello(hello) => self
                    .on_hello(hello, conn_id, peer, &sender, &routes)
                    .await
                    .map(|key| node_key = Some(key)),
                ControlPacket::Ping => match ControlPacket::Pong.encode() {
                    Ok(pong) => sender.send(pong).await,
                    Err(e) => Err(e),
                },
                ControlPacket::PlayerAdd(session) => {
                    self.on_player_add(session, node_key.as_deref());
                    Ok(())
                }
                ControlPacket::PlayerRemove(session) => {
                    self.on_player_remove(&session);
                    Ok(())
                }
                other => {
                    debug!(packet = ?other.id(), "Ignoring packet not meant for the master");
                    Ok(())
                }
            };
            if let Err(e) = handled {
                break Err(e);
            }
        };

        if let Some(key) = &node_key {
            if self.nodes.remove_connection(key, conn_id) {
                let dropped = self.players.remove_by_node(key);
                info!(node = %key, sessions = dropped.len(), "Node disconnected");
            } else {
                debug!(node = %key, "Connection superseded, keeping newer entry");
            }
        } else {
            debug!("Connection closed before Hello");
        }
        route_lane.abort();
        result
    }

    async fn on_hello(
        &self,
        hello: Hello,
        conn_id: u64,
        peer: SocketAddr,
        sender: &PacketSender,
        routes: &LatestSender,
    ) -> Result<String> {
        if let Err(e) = self.directory.verify_node(&hello.key, hello.passphrase.as_deref()) {
            warn!(node = %hello.key, error = %e, "Node refused");
            return Err(e);
        }

        let now = Instant::now();
        let entry = NodeEntry {
            key: hello.key.clone(),
            conn_id,
            sender: sender.clone(),
            routes: routes.clone(),
            meta: NodeMeta {
                arch: hello.arch.clone(),
                version: hello.version.clone(),
                hash: hello.hash.clone(),
                peer,
                connected_at: SystemTime::now(),
                last_seen: now,
            },
        };
        if let Some(previous) = self.nodes.add(entry) {
            info!(node = %hello.key, previous = previous.conn_id, "Replacing earlier connection");
        }
        info!(node = %hello.key, version = %hello.version, arch = %hello.arch, "Node connected");

        match self.directory.build(&hello.arch) {
            Some(build) if build.hash != hello.hash => {
                info!(
                    node = %hello.key,
                    expected = %build.hash,
                    reported = %hello.hash,
                    "Node build out of date, pushing upgrade"
                );
                let sender = sender.clone();
                let mtu = self.config.mtu;
                let node = hello.key.clone();
                tokio::spawn(async move {
                    match tokio::fs::read(&build.binary_path).await {
                        Ok(image) => {
                            if let Err(e) = send_binary(&sender, UPGRADE_LABEL, &image, mtu).await {
                                warn!(%node, error = %e, "Upgrade push failed");
                            }
                        }
                        Err(e) => {
                            warn!(%node, path = %build.binary_path.display(), error = %e, "Cannot read node build");
                        }
                    }
                });
            }
            Some(_) => debug!(node = %hello.key, "Node build up to date"),
            None => debug!(arch = %hello.arch, "No build recorded for architecture"),
        }

        self.publish_routes(std::slice::from_ref(routes))?;
        Ok(hello.key)
    }

    fn on_player_add(&self, mut session: PlayerSession, node_key: Option<&str>) {
        if let Some(key) = node_key {
            if session.node_id != key {
                session.node_id = key.to_string();
            }
        }
        info!(
            player = %session.name,
            uuid = %session.uuid,
            backend = %session.backend,
            node = %session.node_id,
            "Player joined"
        );
        self.players.add(session, None);
    }

    fn on_player_remove(&self, session: &PlayerSession) {
        match self.players.remove(&session.key()) {
            Some(entry) => info!(
                player = %entry.session.name,
                uuid = %entry.session.uuid,
                backend = %entry.session.backend,
                duration = %format_duration(entry.session.session_secs()),
                "Player left"
            ),
            None => debug!(uuid = %session.uuid, "Removal for unknown session"),
        }
    }

    /// Spawn the task that pushes the route table to every node after each
    /// mutation
    pub fn spawn_broadcaster(self: &Arc<Self>) -> JoinHandle<()> {
        let master = self.clone();
        tokio::spawn(async move {
            loop {
                master.routes().changed().await;
                match master.broadcast_routes() {
                    Ok(nodes) => debug!(nodes, "Routes broadcast"),
                    Err(e) => error!(error = %e, "Failed to encode routes"),
                }
            }
        })
    }

    /// Publish the current routes on every connected node's lane. Returns
    /// the number of nodes targeted.
    pub fn broadcast_routes(&self) -> Result<usize> {
        let lanes: Vec<LatestSender> = self.nodes.snapshot().into_iter().map(|node| node.routes).collect();
        self.publish_routes(&lanes)?;
        Ok(lanes.len())
    }

    /// Read the table and publish it under one lock, so a lane can never be
    /// handed an older table after a newer one
    fn publish_routes(&self, lanes: &[LatestSender]) -> Result<()> {
        let _guard = self.publish.lock().unwrap_or_else(PoisonError::into_inner);
        let packet = ControlPacket::Routes(self.routes().get_routes()).encode()?;
        for lane in lanes {
            lane.publish(packet.clone());
        }
        Ok(())
    }

    /// Ask the node owning the session to drop the player. `false` when the
    /// session is unknown or its node is gone.
    pub async fn disconnect_player(&self, uuid: &str, host: &str) -> Result<bool> {
        let Some(entry) = self.players.find(uuid, host) else {
            debug!(%uuid, %host, "No such session");
            return Ok(false);
        };
        let Some(node) = self.nodes.find(&entry.session.node_id) else {
            warn!(%uuid, node = %entry.session.node_id, "Session owner not connected");
            return Ok(false);
        };
        let packet = ControlPacket::DisconnectPlayer(DisconnectPlayer {
            uuid: uuid.to_string(),
            host: host.to_string(),
        })
        .encode()?;
        node.sender.send(packet).await?;
        info!(%uuid, %host, node = %node.key, "Player disconnect requested");
        Ok(true)
    }

    /// Send `data` to one node under `label`. Returns the chunk count.
    pub async fn push_binary(&self, node_key: &str, label: &str, data: &[u8]) -> Result<usize> {
        let node = self
            .nodes
            .find(node_key)
            .ok_or_else(|| ProtocolError::Transfer(format!("node {node_key} is not connected")))?;
        send_binary(&node.sender, label, data, self.config.mtu).await
    }

    /// Push the recorded build for `arch` to every connected node of that
    /// architecture. Returns the number of nodes reached.
    pub async fn push_upgrade(&self, arch: &str) -> Result<usize> {
        let build = self
            .directory
            .build(arch)
            .ok_or_else(|| ProtocolError::Transfer(format!("no build recorded for {arch}")))?;
        let image = tokio::fs::read(&build.binary_path).await?;

        let mut reached = 0;
        for node in self.nodes.snapshot().into_iter().filter(|n| n.meta.arch == arch) {
            match send_binary(&node.sender, UPGRADE_LABEL, &image, self.config.mtu).await {
                Ok(_) => reached += 1,
                Err(e) => warn!(node = %node.key, error = %e, "Upgrade push failed"),
            }
        }
        info!(%arch, nodes = reached, "Upgrade pushed");
        Ok(reached)
    }
}
