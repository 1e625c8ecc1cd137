//! Core server orchestration.
//!
//! `GameServer` owns the accept loop and the two background tickers
//! (liveness and room cleanup), and coordinates graceful shutdown
//! through a broadcast channel. Everything stateful lives in the
//! [`Registry`]; this module only drives it.

use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::{Arc, OnceLock};

use futures::stream::{FuturesUnordered, StreamExt};
use meridian_protocol::CommandKind;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::time::{interval, timeout, Duration};
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::connection;
use crate::current_timestamp_ms;
use crate::error::{ServerError, ServerResult};
use crate::hooks::{HookContext, HookEvent, HookRegistry};
use crate::peer::PeerState;
use crate::registry::Registry;

/// The server: accept loop, tickers, shutdown.
pub struct GameServer {
    registry: Arc<Registry>,
    shutdown_tx: broadcast::Sender<()>,
    local_addr: OnceLock<SocketAddr>,
}

impl GameServer {
    pub fn new(config: ServerConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            registry: Arc::new(Registry::new(config)),
            shutdown_tx,
            local_addr: OnceLock::new(),
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn hooks(&self) -> &Arc<HookRegistry> {
        self.registry.hooks()
    }

    /// The address the listener actually bound, once `run` has bound it.
    /// With `listen_port = 0` this is where the OS-assigned port shows up.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.get().copied()
    }

    /// Requests shutdown; `run` drains and returns.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Binds, serves, and on shutdown drains peers and rooms. Returns
    /// once shutdown has completed or the listener could not be bound.
    pub async fn run(&self) -> ServerResult<()> {
        let config = self.registry.config().clone();
        self.hooks()
            .emit(HookEvent::ServerStarting, &HookContext::default());

        let listener = bind_listener(&config)?;
        let bound = listener.local_addr()?;
        let _ = self.local_addr.set(bound);
        info!("🚀 Game server listening on {}", bound);
        info!(
            "   max_connections={} ping_interval={}ms timeout={}ms",
            config.max_connections, config.ping_interval_ms, config.connection_timeout_ms
        );

        tokio::spawn(liveness_ticker(
            Arc::clone(&self.registry),
            self.shutdown_tx.subscribe(),
        ));
        tokio::spawn(cleanup_ticker(
            Arc::clone(&self.registry),
            self.shutdown_tx.subscribe(),
        ));

        self.hooks()
            .emit(HookEvent::ServerStarted, &HookContext::default());

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => {
                            if self.registry.is_shutting_down()
                                || self.registry.peer_count() >= config.max_connections
                            {
                                // Capacity refusal is silent at the protocol
                                // level: just close.
                                self.registry.stats.peers_rejected.fetch_add(1, Ordering::Relaxed);
                                debug!("Refused connection from {} (at capacity)", addr);
                                drop(stream);
                                continue;
                            }
                            stream.set_nodelay(true).ok();
                            tokio::spawn(connection::drive(
                                Arc::clone(&self.registry),
                                stream,
                                addr,
                            ));
                        }
                        Err(e) => {
                            warn!("Accept failed: {}", e);
                        }
                    }
                }
            }
        }

        self.graceful_shutdown().await;
        Ok(())
    }

    /// Stops intake, drains every peer in parallel under the configured
    /// deadline, forcibly closes stragglers, then destroys all rooms.
    async fn graceful_shutdown(&self) {
        let config = self.registry.config().clone();
        info!("🛑 Shutting down: draining {} peer(s)", self.registry.peer_count());
        self.hooks()
            .emit(HookEvent::ServerStopping, &HookContext::default());
        self.registry.set_shutting_down();

        let drain = async {
            let mut pending: FuturesUnordered<_> = self
                .registry
                .peers()
                .into_iter()
                .map(|peer| {
                    let registry = Arc::clone(&self.registry);
                    // disconnect_peer sends the farewell Disconnect itself.
                    async move {
                        registry.disconnect_peer(&peer, "server shutting down").await;
                    }
                })
                .collect();
            while pending.next().await.is_some() {}
        };

        if timeout(Duration::from_millis(config.graceful_shutdown_ms), drain)
            .await
            .is_err()
        {
            warn!("Shutdown deadline reached, forcing remaining sockets closed");
            for peer in self.registry.peers() {
                peer.begin_close("server shutdown deadline");
                peer.set_state(PeerState::Disconnected);
                self.registry.remove_peer(peer.id);
            }
        }

        for room in self.registry.rooms() {
            self.registry.destroy_room(&room.name, "server shutdown").await;
        }

        self.hooks()
            .emit(HookEvent::ServerStopped, &HookContext::default());
        info!("Server stopped");
    }
}

/// Builds the listener with socket2 so reuse options can be set before
/// the bind.
fn bind_listener(config: &ServerConfig) -> ServerResult<TcpListener> {
    let addr: SocketAddr = config
        .listen_addr()
        .parse()
        .map_err(|e| ServerError::Internal(format!("invalid listen address: {e}")))?;

    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
        .map_err(|e| ServerError::Transport(format!("socket creation failed: {e}")))?;
    socket.set_reuse_address(true).ok();
    #[cfg(unix)]
    if config.use_reuse_port {
        if let Err(e) = socket.set_reuse_port(true) {
            warn!("Failed to set SO_REUSEPORT: {}", e);
        }
    }
    socket
        .bind(&addr.into())
        .map_err(|e| ServerError::Transport(format!("bind to {addr} failed: {e}")))?;
    socket
        .listen(1024)
        .map_err(|e| ServerError::Transport(format!("listen failed: {e}")))?;
    socket
        .set_nonblocking(true)
        .map_err(|e| ServerError::Transport(format!("nonblocking mode failed: {e}")))?;

    TcpListener::from_std(socket.into()).map_err(ServerError::Io)
}

/// Pings connected peers and disconnects the silent ones. Fires every
/// third of the ping interval.
async fn liveness_ticker(registry: Arc<Registry>, mut shutdown_rx: broadcast::Receiver<()>) {
    let config = registry.config().clone();
    let mut ticker = interval(Duration::from_millis(config.liveness_tick_ms()));
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = ticker.tick() => {
                let now = current_timestamp_ms();
                for peer in registry.peers() {
                    if peer.state() != PeerState::Connected {
                        continue;
                    }
                    if now.saturating_sub(peer.last_activity_ms()) > config.connection_timeout_ms {
                        registry.disconnect_peer(&peer, "inactivity timeout").await;
                        continue;
                    }
                    if now.saturating_sub(peer.last_ping_sent_ms()) > config.ping_interval_ms {
                        if peer.send_control(CommandKind::Ping).is_ok() {
                            peer.mark_ping_sent();
                        }
                    }
                }
            }
        }
    }
    debug!("Liveness ticker stopped");
}

/// Destroys rooms that have been empty past their TTL.
async fn cleanup_ticker(registry: Arc<Registry>, mut shutdown_rx: broadcast::Receiver<()>) {
    let config = registry.config().clone();
    let mut ticker = interval(Duration::from_millis(config.cleanup_interval_ms.max(1)));
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = ticker.tick() => {
                let now = current_timestamp_ms();
                for room in registry.rooms() {
                    if room.cleanup_eligible(now).await {
                        registry.destroy_room(&room.name, "empty room ttl expired").await;
                    }
                }
            }
        }
    }
    debug!("Cleanup ticker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn server_reports_no_address_before_running() {
        let server = GameServer::new(ServerConfig::default());
        assert!(server.local_addr().is_none());
        assert_eq!(server.registry().peer_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn run_binds_an_ephemeral_port_and_shuts_down() {
        let config = ServerConfig {
            listen_host: "127.0.0.1".into(),
            listen_port: 0,
            ..Default::default()
        };
        let server = Arc::new(GameServer::new(config));

        let runner = {
            let server = Arc::clone(&server);
            tokio::spawn(async move { server.run().await })
        };

        // Wait for the bind to land.
        let mut tries = 0;
        while server.local_addr().is_none() {
            tokio::time::sleep(Duration::from_millis(10)).await;
            tries += 1;
            assert!(tries < 200, "server never bound");
        }
        assert_ne!(server.local_addr().unwrap().port(), 0);

        server.shutdown();
        let result = timeout(Duration::from_secs(5), runner).await;
        assert!(matches!(result, Ok(Ok(Ok(())))));
    }
}
