//! Application configuration loaded from TOML.
//!
//! The file mirrors [`game_server::ServerConfig`] but groups options the
//! way operators think about them. A missing file is created with
//! defaults on first start.

use std::path::Path;

use anyhow::Result;
use game_server::ServerConfig;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::cli::Args;

/// Root of the TOML configuration file.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    pub server: ServerSettings,
    pub rooms: RoomSettings,
    pub limits: LimitSettings,
    pub logging: LoggingSettings,
}

/// Network and timing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Interface to bind, e.g. "0.0.0.0"
    pub listen_host: String,
    /// TCP port to listen on
    pub listen_port: u16,
    /// Connections beyond this are refused at accept time
    pub max_connections: usize,
    /// How often connected peers are pinged (ms)
    pub ping_interval_ms: u64,
    /// Silence threshold before a peer is dropped (ms)
    pub connection_timeout_ms: u64,
    /// Deadline for the shutdown drain (ms)
    pub graceful_shutdown_ms: u64,
    /// Enable SO_REUSEPORT on the listener
    pub use_reuse_port: bool,
}

/// Room lifecycle settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomSettings {
    /// How often the empty-room sweep runs (ms)
    pub cleanup_interval_ms: u64,
    /// Default empty-room TTL for rooms that don't set their own (ms)
    pub empty_room_ttl_ms: u64,
    /// Bound on each room's event replay cache
    pub max_cached_events: usize,
    /// Hard ceiling on per-room max-players
    pub max_players_hard_cap: usize,
}

/// Per-peer resource limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitSettings {
    /// Outbound packet queue depth per peer
    pub send_queue_depth: usize,
    /// Inbound reliable sequence numbers remembered per peer
    pub max_reliable_commands_per_peer: usize,
    /// Decode errors tolerated inside the window before disconnect
    pub max_decode_errors: u32,
    /// Sliding window for the decode error threshold (ms)
    pub decode_error_window_ms: u64,
    /// Successive bad-signature packets before disconnect
    pub max_bad_packets: u32,
}

/// Log output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Level filter: trace, debug, info, warn, error
    pub level: String,
    /// Emit structured JSON instead of human-readable lines
    pub json_format: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        let engine = ServerConfig::default();
        Self {
            listen_host: engine.listen_host,
            listen_port: engine.listen_port,
            max_connections: engine.max_connections,
            ping_interval_ms: engine.ping_interval_ms,
            connection_timeout_ms: engine.connection_timeout_ms,
            graceful_shutdown_ms: engine.graceful_shutdown_ms,
            use_reuse_port: engine.use_reuse_port,
        }
    }
}

impl Default for RoomSettings {
    fn default() -> Self {
        let engine = ServerConfig::default();
        Self {
            cleanup_interval_ms: engine.cleanup_interval_ms,
            empty_room_ttl_ms: engine.empty_room_ttl_ms,
            max_cached_events: engine.max_cached_events_per_room,
            max_players_hard_cap: engine.max_players_hard_cap,
        }
    }
}

impl Default for LimitSettings {
    fn default() -> Self {
        let engine = ServerConfig::default();
        Self {
            send_queue_depth: engine.send_queue_depth,
            max_reliable_commands_per_peer: engine.max_reliable_commands_per_peer,
            max_decode_errors: engine.max_decode_errors,
            decode_error_window_ms: engine.decode_error_window_ms,
            max_bad_packets: engine.max_bad_packets,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

impl AppConfig {
    /// Flattens the file layout into the engine configuration.
    pub fn to_server_config(&self) -> ServerConfig {
        ServerConfig {
            listen_host: self.server.listen_host.clone(),
            listen_port: self.server.listen_port,
            max_connections: self.server.max_connections,
            ping_interval_ms: self.server.ping_interval_ms,
            connection_timeout_ms: self.server.connection_timeout_ms,
            cleanup_interval_ms: self.rooms.cleanup_interval_ms,
            empty_room_ttl_ms: self.rooms.empty_room_ttl_ms,
            max_reliable_commands_per_peer: self.limits.max_reliable_commands_per_peer,
            max_cached_events_per_room: self.rooms.max_cached_events,
            max_players_hard_cap: self.rooms.max_players_hard_cap,
            graceful_shutdown_ms: self.server.graceful_shutdown_ms,
            send_queue_depth: self.limits.send_queue_depth,
            use_reuse_port: self.server.use_reuse_port,
            max_decode_errors: self.limits.max_decode_errors,
            decode_error_window_ms: self.limits.decode_error_window_ms,
            max_bad_packets: self.limits.max_bad_packets,
        }
    }

    /// Applies command-line overrides on top of the file contents.
    pub fn apply_overrides(&mut self, args: &Args) -> Result<()> {
        if let Some(listen) = &args.listen {
            let (host, port) = listen.rsplit_once(':').ok_or_else(|| {
                anyhow::anyhow!("--listen must be IP:PORT, got '{listen}'")
            })?;
            self.server.listen_host = host.to_string();
            self.server.listen_port = port.parse()?;
        }
        if let Some(max) = args.max_connections {
            self.server.max_connections = max;
        }
        if args.debug {
            self.logging.level = "debug".to_string();
        }
        if args.json_logs {
            self.logging.json_format = true;
        }
        Ok(())
    }
}

/// Loads the configuration file, writing a default one when it is
/// missing.
pub async fn load_config(path: &Path) -> Result<AppConfig> {
    if path.exists() {
        let content = tokio::fs::read_to_string(path).await?;
        match toml::from_str::<AppConfig>(&content) {
            Ok(config) => Ok(config),
            Err(e) => {
                warn!("Failed to parse config file {}: {}", path.display(), e);
                Err(e.into())
            }
        }
    } else {
        warn!(
            "Configuration file not found: {}, using defaults",
            path.display()
        );
        let default_config = AppConfig::default();
        let content = toml::to_string_pretty(&default_config)?;
        tokio::fs::write(path, content).await?;
        info!("Created default configuration file: {}", path.display());
        Ok(default_config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[tokio::test]
    async fn missing_file_is_created_with_defaults() {
        let temp = NamedTempFile::new().unwrap();
        let path = temp.path().to_path_buf();
        drop(temp);

        let config = load_config(&path).await.unwrap();
        assert_eq!(config.server.listen_port, 5055);
        assert_eq!(config.rooms.max_cached_events, 100);
        assert!(path.exists());
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn existing_file_is_parsed() {
        let mut temp = NamedTempFile::new().unwrap();
        let content = r#"
[server]
listen_host = "127.0.0.1"
listen_port = 7777
max_connections = 64
ping_interval_ms = 10000
connection_timeout_ms = 20000
graceful_shutdown_ms = 5000
use_reuse_port = false

[rooms]
cleanup_interval_ms = 30000
empty_room_ttl_ms = 60000
max_cached_events = 50
max_players_hard_cap = 100

[limits]
send_queue_depth = 256
max_reliable_commands_per_peer = 500
max_decode_errors = 5
decode_error_window_ms = 30000
max_bad_packets = 3

[logging]
level = "debug"
json_format = true
"#;
        temp.write_all(content.as_bytes()).unwrap();

        let config = load_config(temp.path()).await.unwrap();
        assert_eq!(config.server.listen_port, 7777);
        assert_eq!(config.server.max_connections, 64);
        assert_eq!(config.rooms.max_cached_events, 50);
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json_format);

        let engine = config.to_server_config();
        assert_eq!(engine.listen_addr(), "127.0.0.1:7777");
        assert_eq!(engine.send_queue_depth, 256);
    }

    #[test]
    fn cli_overrides_win_over_the_file() {
        let mut config = AppConfig::default();
        let args = Args {
            listen: Some("10.0.0.1:9999".to_string()),
            max_connections: Some(42),
            debug: true,
            json_logs: true,
            ..Default::default()
        };
        config.apply_overrides(&args).unwrap();

        assert_eq!(config.server.listen_host, "10.0.0.1");
        assert_eq!(config.server.listen_port, 9999);
        assert_eq!(config.server.max_connections, 42);
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json_format);
    }

    #[test]
    fn malformed_listen_override_is_rejected() {
        let mut config = AppConfig::default();
        let args = Args {
            listen: Some("nonsense".to_string()),
            ..Default::default()
        };
        assert!(config.apply_overrides(&args).is_err());
    }
}
