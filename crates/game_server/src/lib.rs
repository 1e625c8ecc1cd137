//! # Game Server - Session and Room Engine
//!
//! The server side of the GpBinaryV16 protocol: connection lifecycle,
//! operation routing, and room membership with event fan-out. The wire
//! format itself lives in `meridian_protocol`; this crate owns everything
//! stateful.
//!
//! ## Architecture Overview
//!
//! * **Registry** - Process-wide peer and room maps, id minting, and the
//!   shutdown flag. Owns the observer hook registry.
//! * **Peer** - One connected client: state machine, session profile,
//!   sequence counters, activity stamps, and a bounded outbound queue.
//! * **Connection driver** - The per-socket reader and writer tasks that
//!   turn TCP bytes into dispatched commands and queued packets into
//!   writes.
//! * **Room** - Membership, master-client election, property merge,
//!   targeted/broadcast event raising with a bounded replay cache.
//! * **Router + handlers** - Operation dispatch; every received operation
//!   is answered by exactly one response.
//! * **GameServer** - Accept loop, liveness and cleanup tickers, graceful
//!   shutdown with a hard deadline.
//!
//! ## Data Flow
//!
//! 1. The accept loop hands a socket to the connection driver
//! 2. The driver reassembles packets, decodes command records, and feeds
//!    operation requests to the router
//! 3. Handlers mutate peer/room state through the registry
//! 4. Responses and events flow back through each target peer's bounded
//!    outbound queue; the writer task is the only code touching the
//!    socket's write half, so sends never interleave
//!
//! ## Lock Discipline
//!
//! Registry maps, then the room mutex, then peer-internal guards - always
//! in that order. Peer sends are lock-free channel pushes, so fan-out
//! under a room lock cannot deadlock. Membership and master-id share one
//! mutex with a single write path, so two-masters and phantom-master
//! states are unreachable.

pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use hooks::{HookContext, HookEvent, HookRegistry, ServerObserver};
pub use peer::{Peer, PeerState};
pub use registry::Registry;
pub use room::{Room, RoomOptions};
pub use server::GameServer;

pub mod config;
pub mod error;
pub mod hooks;
pub mod peer;
pub mod registry;
pub mod room;
pub mod server;

mod connection;
mod handlers;
mod router;

/// Returns the current Unix time in milliseconds.
///
/// All liveness stamps, room activity stamps and cache timestamps use
/// this single source so comparisons across subsystems are coherent.
pub fn current_timestamp_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("Time went backwards")
        .as_millis() as u64
}

/// Truncated millisecond timestamp carried in command record headers.
pub(crate) fn wire_timestamp() -> u32 {
    current_timestamp_ms() as u32
}
