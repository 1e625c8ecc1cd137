//! Server configuration.
//!
//! Every tunable the engine reads lives here with its default. The binary
//! crate layers a TOML file and CLI overrides on top; this struct is what
//! the engine actually consumes.

use serde::{Deserialize, Serialize};

/// Engine configuration.
///
/// All durations are milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Interface to bind the listener to.
    pub listen_host: String,

    /// TCP port to listen on. Zero lets the OS pick (used by tests).
    pub listen_port: u16,

    /// Connections beyond this count are refused at accept time.
    pub max_connections: usize,

    /// How often a connected peer is pinged.
    pub ping_interval_ms: u64,

    /// A peer silent for longer than this is disconnected.
    pub connection_timeout_ms: u64,

    /// How often the room cleanup pass runs.
    pub cleanup_interval_ms: u64,

    /// Default time an empty room survives before cleanup, for rooms
    /// that don't specify their own TTL.
    pub empty_room_ttl_ms: u64,

    /// Window of inbound reliable sequence numbers remembered per peer
    /// for duplicate suppression.
    pub max_reliable_commands_per_peer: usize,

    /// Bound on each room's event replay cache.
    pub max_cached_events_per_room: usize,

    /// Hard ceiling on a room's max-players setting.
    pub max_players_hard_cap: usize,

    /// Deadline for the graceful shutdown drain before sockets are
    /// forcibly closed.
    pub graceful_shutdown_ms: u64,

    /// Bound on each peer's outbound packet queue. A full queue marks
    /// the client as too slow and disconnects it.
    pub send_queue_depth: usize,

    /// Enable SO_REUSEPORT on the listener socket.
    pub use_reuse_port: bool,

    /// Decode errors tolerated within `decode_error_window_ms` before
    /// the peer is disconnected.
    pub max_decode_errors: u32,

    /// Sliding window for the decode error threshold.
    pub decode_error_window_ms: u64,

    /// Successive packets with a bad signature before the connection is
    /// dropped.
    pub max_bad_packets: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_host: "0.0.0.0".to_string(),
            listen_port: 5055,
            max_connections: 1000,
            ping_interval_ms: 30_000,
            connection_timeout_ms: 60_000,
            cleanup_interval_ms: 60_000,
            empty_room_ttl_ms: 300_000,
            max_reliable_commands_per_peer: 1000,
            max_cached_events_per_room: 100,
            max_players_hard_cap: 500,
            graceful_shutdown_ms: 10_000,
            send_queue_depth: 1024,
            use_reuse_port: false,
            max_decode_errors: 10,
            decode_error_window_ms: 60_000,
            max_bad_packets: 3,
        }
    }
}

impl ServerConfig {
    /// `host:port` string for the listener bind.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.listen_host, self.listen_port)
    }

    /// Liveness ticker period: a third of the ping interval, never zero.
    pub fn liveness_tick_ms(&self) -> u64 {
        (self.ping_interval_ms / 3).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_values() {
        let config = ServerConfig::default();
        assert_eq!(config.listen_host, "0.0.0.0");
        assert_eq!(config.listen_port, 5055);
        assert_eq!(config.max_connections, 1000);
        assert_eq!(config.ping_interval_ms, 30_000);
        assert_eq!(config.connection_timeout_ms, 60_000);
        assert_eq!(config.empty_room_ttl_ms, 300_000);
        assert_eq!(config.max_cached_events_per_room, 100);
        assert_eq!(config.max_players_hard_cap, 500);
        assert_eq!(config.graceful_shutdown_ms, 10_000);
        assert_eq!(config.send_queue_depth, 1024);
        assert!(!config.use_reuse_port);
    }

    #[test]
    fn liveness_tick_never_collapses_to_zero() {
        let config = ServerConfig {
            ping_interval_ms: 2,
            ..Default::default()
        };
        assert_eq!(config.liveness_tick_ms(), 1);
    }

    #[test]
    fn listen_addr_joins_host_and_port() {
        let config = ServerConfig {
            listen_host: "127.0.0.1".into(),
            listen_port: 9000,
            ..Default::default()
        };
        assert_eq!(config.listen_addr(), "127.0.0.1:9000");
    }
}
