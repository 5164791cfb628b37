//! Edge proxy for game clients.
//!
//! Reads the client's handshake, picks the backend by virtual host, rewrites
//! the handshake for the backend and splices the two sockets. Logins are
//! registered locally and reported to the master for the lifetime of the
//! splice. Clients that cannot be served get a protocol-correct status
//! response or login disconnect instead of a dropped socket.

use bytes::BytesMut;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, instrument, warn};

use crate::config::ProxyConfig;
use crate::core::packet::Packet;
use crate::error::{ProtocolError, Result};
use crate::protocol::game::{read_frame, Handshake, LoginStart, NextState};
use crate::protocol::message::ControlPacket;
use crate::protocol::status::FailureKind;
use crate::registry::players::{format_duration, unix_now};
use crate::registry::{LiveConnection, PlayerRegistry, PlayerSession, Route, RouteTable};
use crate::service::node::MasterLink;
use crate::transport::relay;
use crate::utils::metrics::global_metrics;
use crate::utils::timeout::with_timeout_error;

/// Handshake to send to the backend of `route`
pub fn backend_handshake(handshake: &Handshake, route: &Route) -> Handshake {
    let next_state = match handshake.next_state {
        NextState::Transfer => NextState::Login,
        other => other,
    };
    Handshake {
        protocol_version: handshake.protocol_version,
        host: route.server_host.clone(),
        port: handshake.port,
        next_state,
    }
}

/// The data plane of a node
pub struct EdgeProxy {
    config: ProxyConfig,
    node_id: String,
    routes: Arc<RouteTable>,
    players: Arc<PlayerRegistry>,
    link: Arc<MasterLink>,
}

impl EdgeProxy {
    pub fn new(
        config: ProxyConfig,
        node_id: impl Into<String>,
        routes: Arc<RouteTable>,
        players: Arc<PlayerRegistry>,
        link: Arc<MasterLink>,
    ) -> Self {
        Self {
            config,
            node_id: node_id.into(),
            routes,
            players,
            link,
        }
    }

    /// Bind the configured address and serve forever
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let listener = TcpListener::bind(&self.config.listen_address).await?;
        self.serve(listener).await
    }

    /// Accept clients on `listener`, one task each
    #[instrument(skip_all)]
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        let addr = listener.local_addr()?;
        info!(%addr, "Edge proxy listening");

        loop {
            let (stream, peer) = listener.accept().await?;
            if let Err(e) = stream.set_nodelay(true) {
                debug!(%peer, error = %e, "Failed to set TCP_NODELAY");
            }
            let proxy = self.clone();
            tokio::spawn(async move {
                global_metrics().proxy_connection_opened();
                if let Err(e) = proxy.handle_client(stream, peer).await {
                    debug!(%peer, error = %e, "Client connection ended with error");
                }
                global_metrics().proxy_connection_closed();
            });
        }
    }

    /// Serve one client connection to completion
    #[instrument(skip(self, client), fields(peer = %peer))]
    pub async fn handle_client<C>(&self, mut client: C, peer: SocketAddr) -> Result<()>
    where
        C: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let mut buf = BytesMut::with_capacity(1024);

        let handshake = match self.read_handshake(&mut client, &mut buf).await {
            Ok(handshake) => handshake,
            Err(e) => {
                warn!(error = %e, "Unreadable handshake");
                self.refuse(&mut client, &mut buf, FailureKind::NetworkFailure, true)
                    .await;
                return Err(e);
            }
        };
        let status = handshake.next_state == NextState::Status;

        let Some(route) = self.routes.get_route_by_vhost(&handshake.host) else {
            global_metrics().route_miss();
            info!(host = %handshake.host, "Route not found");
            self.refuse(&mut client, &mut buf, FailureKind::NotFound, status).await;
            return Err(ProtocolError::RouteNotFound(handshake.host));
        };

        let backend_addr = route.backend_addr();
        let forwarded = backend_handshake(&handshake, &route);
        let mut backend = match self.dial_backend(&backend_addr, &forwarded).await {
            Ok(backend) => backend,
            Err(e) => {
                global_metrics().backend_failure();
                warn!(backend = %backend_addr, error = %e, "Backend unavailable");
                self.refuse(&mut client, &mut buf, FailureKind::Offline, status).await;
                return Err(ProtocolError::BackendUnavailable(backend_addr));
            }
        };

        if forwarded.next_state != NextState::Login {
            backend.write_all(&buf).await?;
            buf.clear();
            global_metrics().session_relayed();
            relay(client, backend, None).await;
            return Ok(());
        }

        let (packet, raw) =
            with_timeout_error(read_frame(&mut client, &mut buf), self.config.client_timeout).await?;
        let login = LoginStart::decode(&packet)?;
        let session = PlayerSession {
            name: login.name.clone(),
            uuid: login.uuid_hex(),
            joined_at: unix_now(),
            backend: backend_addr,
            virtual_host: handshake.host,
            protocol_version: handshake.protocol_version,
            node_id: self.node_id.clone(),
        };
        info!(
            player = %session.name,
            uuid = %session.uuid,
            backend = %session.backend,
            "Player connected"
        );

        let live = LiveConnection::new();
        self.players.add(session.clone(), Some(live.clone()));
        self.link.send(ControlPacket::PlayerAdd(session.clone())).await;

        let result = async {
            backend.write_all(&raw).await?;
            backend.write_all(&buf).await?;
            buf.clear();
            global_metrics().session_relayed();
            relay(client, backend, Some(live.clone())).await;
            Ok::<(), ProtocolError>(())
        }
        .await;

        self.end_session(session, &live);
        result
    }

    async fn read_handshake<C>(&self, client: &mut C, buf: &mut BytesMut) -> Result<Handshake>
    where
        C: AsyncRead + Unpin,
    {
        let (packet, _) = with_timeout_error(read_frame(client, buf), self.config.client_timeout).await?;
        Handshake::decode(&packet)
    }

    async fn dial_backend(&self, addr: &str, handshake: &Handshake) -> Result<TcpStream> {
        let mut backend = with_timeout_error(
            async { TcpStream::connect(addr).await.map_err(ProtocolError::from) },
            self.config.backend_timeout,
        )
        .await?;
        if let Err(e) = backend.set_nodelay(true) {
            debug!(error = %e, "Failed to set TCP_NODELAY");
        }
        backend.write_all(&handshake.to_packet().to_bytes()).await?;
        Ok(backend)
    }

    /// Answer with `kind`, as a status response when the client is pinging
    async fn refuse<C>(&self, client: &mut C, buf: &mut BytesMut, kind: FailureKind, status: bool)
    where
        C: AsyncRead + AsyncWrite + Unpin,
    {
        let packet = if status {
            if let Err(e) = with_timeout_error(read_frame(client, buf), self.config.client_timeout).await {
                debug!(error = %e, "No status request before failure response");
            }
            kind.status_packet()
        } else {
            kind.disconnect_packet()
        };
        if let Err(e) = write_and_close(client, &packet).await {
            debug!(error = %e, ?kind, "Failed to send failure response");
        }
    }

    /// Drop the local session and tell the master after the removal delay.
    ///
    /// Nothing is removed or reported when a re-login with the same identity
    /// has taken the entry over from `live`.
    fn end_session(&self, session: PlayerSession, live: &LiveConnection) {
        if self.players.remove_if_owner(&session.key(), live).is_none() {
            debug!(
                player = %session.name,
                uuid = %session.uuid,
                backend = %session.backend,
                "Session superseded by a newer login"
            );
            return;
        }
        info!(
            player = %session.name,
            uuid = %session.uuid,
            duration = %format_duration(session.session_secs()),
            "Player disconnected"
        );

        let link = self.link.clone();
        let players = self.players.clone();
        let delay = self.config.session_removal_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if players.find(&session.uuid, &session.backend).is_some() {
                debug!(uuid = %session.uuid, backend = %session.backend, "Player rejoined, removal dropped");
                return;
            }
            link.send(ControlPacket::PlayerRemove(session)).await;
        });
    }
}

async fn write_and_close<C>(client: &mut C, packet: &Packet) -> Result<()>
where
    C: AsyncWrite + Unpin,
{
    client.write_all(&packet.to_bytes()).await?;
    client.flush().await?;
    client.shutdown().await?;
    Ok(())
}
