//! Process-wide peer and room maps.
//!
//! The registry exclusively owns peers and rooms; everything else holds
//! non-owning handles (a `Weak` room reference on the peer, `Arc` member
//! handles in the room). Releasing a peer always detaches it from its
//! room first, and destroying a room always detaches every member, so
//! the cross references can never dangle.

use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use meridian_protocol::CommandKind;
use tracing::{debug, info};

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::hooks::{HookContext, HookEvent, HookRegistry};
use crate::peer::{Peer, PeerState};
use crate::room::{Room, RoomOptions};

/// Server-wide counters, all lock-free.
#[derive(Debug, Default)]
pub struct ServerStats {
    pub peers_accepted: AtomicU64,
    pub peers_rejected: AtomicU64,
    pub rooms_created: AtomicU64,
    pub rooms_destroyed: AtomicU64,
    pub operations_handled: AtomicU64,
    pub events_routed: AtomicU64,
}

/// Point-in-time copy of [`ServerStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerStatsSnapshot {
    pub peers_accepted: u64,
    pub peers_rejected: u64,
    pub rooms_created: u64,
    pub rooms_destroyed: u64,
    pub operations_handled: u64,
    pub events_routed: u64,
}

impl ServerStats {
    pub fn snapshot(&self) -> ServerStatsSnapshot {
        ServerStatsSnapshot {
            peers_accepted: self.peers_accepted.load(Ordering::Relaxed),
            peers_rejected: self.peers_rejected.load(Ordering::Relaxed),
            rooms_created: self.rooms_created.load(Ordering::Relaxed),
            rooms_destroyed: self.rooms_destroyed.load(Ordering::Relaxed),
            operations_handled: self.operations_handled.load(Ordering::Relaxed),
            events_routed: self.events_routed.load(Ordering::Relaxed),
        }
    }
}

/// Owner of all connected peers and live rooms.
pub struct Registry {
    config: ServerConfig,
    hooks: Arc<HookRegistry>,
    peers: DashMap<u16, Arc<Peer>>,
    rooms: DashMap<String, Arc<Room>>,
    next_peer_id: AtomicU16,
    shutting_down: AtomicBool,
    pub stats: ServerStats,
}

impl Registry {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            hooks: Arc::new(HookRegistry::new()),
            peers: DashMap::new(),
            rooms: DashMap::new(),
            next_peer_id: AtomicU16::new(1),
            shutting_down: AtomicBool::new(false),
            stats: ServerStats::default(),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn hooks(&self) -> &Arc<HookRegistry> {
        &self.hooks
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    pub fn set_shutting_down(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
    }

    // ------------------------------------------------------------------
    // Peers
    // ------------------------------------------------------------------

    /// Mints the next peer id: monotone, 1-origin, wrapping past 65535
    /// while skipping zero and ids still in use.
    pub fn mint_peer_id(&self) -> u16 {
        loop {
            let id = self.next_peer_id.fetch_add(1, Ordering::SeqCst);
            if id != 0 && !self.peers.contains_key(&id) {
                return id;
            }
        }
    }

    pub fn register_peer(&self, peer: Arc<Peer>) {
        self.stats.peers_accepted.fetch_add(1, Ordering::Relaxed);
        self.peers.insert(peer.id, peer);
    }

    pub fn remove_peer(&self, id: u16) -> Option<Arc<Peer>> {
        self.peers.remove(&id).map(|(_, peer)| peer)
    }

    pub fn peer(&self, id: u16) -> Option<Arc<Peer>> {
        self.peers.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Snapshot of every registered peer, for tickers and shutdown.
    pub fn peers(&self) -> Vec<Arc<Peer>> {
        self.peers
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Tears one peer down: detaches it from its room, sends the
    /// Disconnect command, unregisters it. Idempotent; the first caller
    /// wins and later callers only reinforce the close flag.
    pub async fn disconnect_peer(&self, peer: &Arc<Peer>, reason: &str) {
        if !peer.begin_disconnect() {
            peer.begin_close(reason);
            return;
        }

        self.hooks.emit(
            HookEvent::PeerDisconnecting,
            &HookContext::peer(peer.id).with_detail(reason),
        );

        if let Some(room) = peer.room() {
            let outcome = room.leave(peer).await;
            if let Some(master) = outcome.new_master {
                debug!(
                    "Peer {} left room '{}' on disconnect, master moved to {}",
                    peer.id, room.name, master
                );
            }
        }

        // Best-effort farewell; the writer flushes whatever is queued.
        let _ = peer.send_control(CommandKind::Disconnect);
        peer.begin_close(reason);

        self.peers.remove(&peer.id);
        peer.set_state(PeerState::Disconnected);

        self.hooks.emit(
            HookEvent::PeerDisconnected,
            &HookContext::peer(peer.id).with_detail(reason),
        );
        info!("Peer {} disconnected: {}", peer.id, reason);
    }

    // ------------------------------------------------------------------
    // Rooms
    // ------------------------------------------------------------------

    pub fn room(&self, name: &str) -> Option<Arc<Room>> {
        self.rooms.get(name).map(|entry| Arc::clone(entry.value()))
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Snapshot of every live room.
    pub fn rooms(&self) -> Vec<Arc<Room>> {
        self.rooms
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Creates a room, failing when the name is already taken.
    pub fn create_room(&self, name: &str, options: RoomOptions) -> ServerResult<Arc<Room>> {
        self.hooks
            .emit(HookEvent::RoomCreating, &HookContext::room(name));
        match self.rooms.entry(name.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(ServerError::Policy(format!(
                "room name '{name}' already in use"
            ))),
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                let room = Room::new(
                    name.to_string(),
                    options,
                    self.config.max_cached_events_per_room,
                    Arc::clone(&self.hooks),
                );
                vacant.insert(Arc::clone(&room));
                self.stats.rooms_created.fetch_add(1, Ordering::Relaxed);
                self.hooks
                    .emit(HookEvent::RoomCreated, &HookContext::room(name));
                info!("Room '{}' created", name);
                Ok(room)
            }
        }
    }

    /// Fetches a room, creating it when absent (the Join-with-create
    /// path). The boolean reports whether this call created it.
    pub fn get_or_create_room(
        &self,
        name: &str,
        options: impl FnOnce() -> RoomOptions,
    ) -> (Arc<Room>, bool) {
        if let Some(room) = self.room(name) {
            return (room, false);
        }
        match self.create_room(name, options()) {
            Ok(room) => (room, true),
            // Lost a creation race; the winner's room is what we join.
            Err(_) => (
                self.room(name).expect("racing room creation left no room"),
                false,
            ),
        }
    }

    /// Removes an empty room. Refuses when members remain.
    pub async fn remove_room(&self, name: &str) -> ServerResult<()> {
        let Some(room) = self.room(name) else {
            return Err(ServerError::Policy(format!("no such room '{name}'")));
        };
        if !room.is_empty().await {
            return Err(ServerError::Policy(format!(
                "room '{name}' is not empty"
            )));
        }
        self.rooms.remove(name);
        self.stats.rooms_destroyed.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Forcibly destroys a room: evacuates members, drops it from the
    /// map. Used by the cleanup ticker and shutdown.
    pub async fn destroy_room(&self, name: &str, reason: &str) {
        let Some(room) = self.room(name) else { return };
        self.hooks.emit(
            HookEvent::RoomDestroying,
            &HookContext::room(name).with_detail(reason),
        );
        let evacuated = room.evacuate().await;
        self.rooms.remove(name);
        self.stats.rooms_destroyed.fetch_add(1, Ordering::Relaxed);
        self.hooks.emit(
            HookEvent::RoomDestroyed,
            &HookContext::room(name).with_detail(reason),
        );
        info!(
            "Room '{}' destroyed ({}), {} member(s) detached",
            name,
            reason,
            evacuated.len()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::test_support::test_peer;
    use meridian_protocol::constants::operation;

    fn registry() -> Registry {
        Registry::new(ServerConfig::default())
    }

    fn options(registry: &Registry) -> RoomOptions {
        RoomOptions::defaults(registry.config())
    }

    #[test]
    fn peer_ids_are_monotone_and_one_origin() {
        let registry = registry();
        assert_eq!(registry.mint_peer_id(), 1);
        assert_eq!(registry.mint_peer_id(), 2);
        assert_eq!(registry.mint_peer_id(), 3);
    }

    #[test]
    fn minting_skips_ids_still_in_use() {
        let registry = registry();
        let first = registry.mint_peer_id();
        let (peer, _rx) = test_peer(first, 8);
        registry.register_peer(peer);

        // Wrap the counter all the way around; the taken id is skipped.
        for _ in 0..u16::MAX as usize {
            let id = registry.mint_peer_id();
            assert_ne!(id, 0, "id zero must never be minted");
            assert_ne!(id, first, "id in use must be skipped");
        }
    }

    #[test]
    fn duplicate_room_names_are_rejected() {
        let registry = registry();
        let opts = options(&registry);
        assert!(registry.create_room("arena", opts.clone()).is_ok());
        let err = registry.create_room("arena", opts).unwrap_err();
        assert!(matches!(err, ServerError::Policy(_)));
        assert_eq!(registry.room_count(), 1);
    }

    #[test]
    fn get_or_create_reports_creation() {
        let registry = registry();
        let (_, created) = registry.get_or_create_room("arena", || options(&registry));
        assert!(created);
        let (_, created) = registry.get_or_create_room("arena", || options(&registry));
        assert!(!created);
    }

    #[tokio::test]
    async fn remove_room_refuses_occupied_rooms() {
        let registry = registry();
        let room = registry.create_room("arena", options(&registry)).unwrap();
        let (peer, _rx) = test_peer(1, 8);
        peer.set_state(PeerState::Connected);
        room.join(&peer, None, operation::JOIN).await.unwrap();

        let err = registry.remove_room("arena").await.unwrap_err();
        assert!(matches!(err, ServerError::Policy(_)));
        assert!(registry.room("arena").is_some());

        room.leave(&peer).await;
        registry.remove_room("arena").await.unwrap();
        assert!(registry.room("arena").is_none());
    }

    #[tokio::test]
    async fn destroy_room_detaches_members() {
        let registry = registry();
        let room = registry.create_room("arena", options(&registry)).unwrap();
        let (peer, _rx) = test_peer(1, 8);
        peer.set_state(PeerState::Connected);
        room.join(&peer, None, operation::JOIN).await.unwrap();

        registry.destroy_room("arena", "test").await;
        assert!(registry.room("arena").is_none());
        assert!(peer.room().is_none());
        assert!(!peer.is_master());
    }

    #[tokio::test]
    async fn disconnect_detaches_from_room_and_unregisters() {
        let registry = registry();
        let room = registry.create_room("arena", options(&registry)).unwrap();

        let (a, _arx) = test_peer(registry.mint_peer_id(), 8);
        let (b, _brx) = test_peer(registry.mint_peer_id(), 8);
        a.set_state(PeerState::Connected);
        b.set_state(PeerState::Connected);
        registry.register_peer(Arc::clone(&a));
        registry.register_peer(Arc::clone(&b));
        room.join(&a, None, operation::JOIN).await.unwrap();
        room.join(&b, None, operation::JOIN).await.unwrap();
        assert_eq!(room.master_id().await, Some(a.id));

        registry.disconnect_peer(&a, "test").await;

        assert_eq!(a.state(), PeerState::Disconnected);
        assert!(registry.peer(a.id).is_none());
        assert!(a.room().is_none());
        // Mastership moved to the surviving member, exactly once.
        assert_eq!(room.master_id().await, Some(b.id));
        assert!(b.is_master());
        assert!(!a.is_master());

        // A second disconnect is a harmless no-op.
        registry.disconnect_peer(&a, "again").await;
        assert_eq!(registry.peer_count(), 1);
    }
}
