//! Peer: one connected client session.
//!
//! A peer owns no socket directly; the connection driver gives it a
//! bounded channel to the writer task. Every send here is a synchronous,
//! lock-free channel push, which is what lets rooms fan events out while
//! holding their own mutex.
//!
//! The two sequence counters (reliable and unreliable) are independent
//! and only ever move forward. All liveness stamps are atomic
//! millisecond values, so the liveness ticker can scan peers without
//! taking any lock.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, Weak};

use meridian_protocol::{encode_packet, Command, CommandKind, Message, Value};
use tokio::sync::mpsc;
use tokio::sync::Notify;
use tracing::{error, warn};

use crate::room::Room;
use crate::{current_timestamp_ms, wire_timestamp};

/// Connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Connecting,
    Connected,
    Disconnecting,
    Disconnected,
}

impl PeerState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => PeerState::Connecting,
            1 => PeerState::Connected,
            2 => PeerState::Disconnecting,
            _ => PeerState::Disconnected,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            PeerState::Connecting => 0,
            PeerState::Connected => 1,
            PeerState::Disconnecting => 2,
            PeerState::Disconnected => 3,
        }
    }
}

/// Why a send could not be queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendError {
    /// The bounded outbound queue is full; the peer has been marked for
    /// disconnection as a slow consumer.
    QueueFull,
    /// The peer is already closing or closed.
    Closed,
    /// The message could not be encoded. Indicates a server-side bug,
    /// never client input.
    Encode,
}

/// Per-peer traffic counters, all updated lock-free.
#[derive(Debug, Default)]
pub struct PeerStats {
    pub bytes_in: AtomicU64,
    pub bytes_out: AtomicU64,
    pub commands_in: AtomicU64,
    pub commands_out: AtomicU64,
    pub decode_errors: AtomicU64,
}

/// Point-in-time copy of [`PeerStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerStatsSnapshot {
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub commands_in: u64,
    pub commands_out: u64,
    pub decode_errors: u64,
}

impl PeerStats {
    pub fn snapshot(&self) -> PeerStatsSnapshot {
        PeerStatsSnapshot {
            bytes_in: self.bytes_in.load(Ordering::Relaxed),
            bytes_out: self.bytes_out.load(Ordering::Relaxed),
            commands_in: self.commands_in.load(Ordering::Relaxed),
            commands_out: self.commands_out.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
        }
    }
}

/// Mutable session identity, set by Authenticate and ChangeProperties.
#[derive(Debug, Default, Clone)]
pub struct SessionProfile {
    pub nickname: String,
    pub user_id: String,
    pub properties: HashMap<String, Value>,
}

/// One connected client.
pub struct Peer {
    pub id: u16,
    pub addr: SocketAddr,

    state: AtomicU8,
    authenticated: AtomicBool,
    is_master: AtomicBool,

    profile: Mutex<SessionProfile>,
    /// Non-owning handle to the current room; the room's member map
    /// holds the matching back reference.
    room: Mutex<Option<Weak<Room>>>,

    reliable_seq: AtomicU32,
    unreliable_seq: AtomicU32,

    last_activity_ms: AtomicU64,
    last_ping_sent_ms: AtomicU64,
    last_pong_ms: AtomicU64,
    pub connected_at_ms: u64,

    pub stats: PeerStats,

    outbound: mpsc::Sender<Vec<u8>>,

    closed: AtomicBool,
    close_reason: Mutex<Option<String>>,
    close_notify: Notify,

    /// Recently seen inbound reliable sequence numbers, for duplicate
    /// suppression. Bounded by configuration.
    seen_reliable: Mutex<VecDeque<u32>>,
    seen_reliable_cap: usize,

    /// Decode error timestamps inside the sliding threshold window.
    decode_error_times: Mutex<VecDeque<u64>>,
}

impl Peer {
    pub fn new(
        id: u16,
        addr: SocketAddr,
        outbound: mpsc::Sender<Vec<u8>>,
        seen_reliable_cap: usize,
    ) -> Self {
        let now = current_timestamp_ms();
        Self {
            id,
            addr,
            state: AtomicU8::new(PeerState::Connecting.as_u8()),
            authenticated: AtomicBool::new(false),
            is_master: AtomicBool::new(false),
            profile: Mutex::new(SessionProfile::default()),
            room: Mutex::new(None),
            reliable_seq: AtomicU32::new(0),
            unreliable_seq: AtomicU32::new(0),
            last_activity_ms: AtomicU64::new(now),
            last_ping_sent_ms: AtomicU64::new(0),
            last_pong_ms: AtomicU64::new(now),
            connected_at_ms: now,
            stats: PeerStats::default(),
            outbound,
            closed: AtomicBool::new(false),
            close_reason: Mutex::new(None),
            close_notify: Notify::new(),
            seen_reliable: Mutex::new(VecDeque::new()),
            seen_reliable_cap,
            decode_error_times: Mutex::new(VecDeque::new()),
        }
    }

    // ------------------------------------------------------------------
    // State machine
    // ------------------------------------------------------------------

    pub fn state(&self) -> PeerState {
        PeerState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn set_state(&self, state: PeerState) {
        self.state.store(state.as_u8(), Ordering::SeqCst);
    }

    /// Moves into Disconnecting exactly once. Returns false when the
    /// peer was already disconnecting or disconnected, so both the
    /// driver's cleanup and an explicit disconnect can race safely.
    pub fn begin_disconnect(&self) -> bool {
        loop {
            let current = self.state.load(Ordering::SeqCst);
            if current >= PeerState::Disconnecting.as_u8() {
                return false;
            }
            if self
                .state
                .compare_exchange(
                    current,
                    PeerState::Disconnecting.as_u8(),
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                )
                .is_ok()
            {
                return true;
            }
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }

    pub fn set_authenticated(&self) {
        self.authenticated.store(true, Ordering::SeqCst);
    }

    pub fn is_master(&self) -> bool {
        self.is_master.load(Ordering::SeqCst)
    }

    pub fn set_master(&self, value: bool) {
        self.is_master.store(value, Ordering::SeqCst);
    }

    // ------------------------------------------------------------------
    // Session profile
    // ------------------------------------------------------------------

    pub fn set_identity(&self, nickname: String, user_id: String) {
        let mut profile = self.profile.lock().unwrap();
        profile.nickname = nickname;
        profile.user_id = user_id;
    }

    pub fn nickname(&self) -> String {
        self.profile.lock().unwrap().nickname.clone()
    }

    pub fn user_id(&self) -> String {
        self.profile.lock().unwrap().user_id.clone()
    }

    pub fn properties(&self) -> HashMap<String, Value> {
        self.profile.lock().unwrap().properties.clone()
    }

    /// Merges the given entries and returns the full post-merge map.
    pub fn merge_properties(&self, entries: HashMap<String, Value>) -> HashMap<String, Value> {
        let mut profile = self.profile.lock().unwrap();
        profile.properties.extend(entries);
        profile.properties.clone()
    }

    // ------------------------------------------------------------------
    // Room association
    // ------------------------------------------------------------------

    pub fn room(&self) -> Option<Arc<Room>> {
        self.room.lock().unwrap().as_ref().and_then(Weak::upgrade)
    }

    pub fn set_room(&self, room: Weak<Room>) {
        *self.room.lock().unwrap() = Some(room);
    }

    pub fn clear_room(&self) {
        *self.room.lock().unwrap() = None;
        self.set_master(false);
    }

    // ------------------------------------------------------------------
    // Sequence numbers and liveness stamps
    // ------------------------------------------------------------------

    pub fn next_reliable_seq(&self) -> u32 {
        self.reliable_seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn next_unreliable_seq(&self) -> u32 {
        self.unreliable_seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn reliable_seq(&self) -> u32 {
        self.reliable_seq.load(Ordering::SeqCst)
    }

    pub fn unreliable_seq(&self) -> u32 {
        self.unreliable_seq.load(Ordering::SeqCst)
    }

    /// Stamps inbound activity of any kind.
    pub fn touch(&self) {
        self.last_activity_ms
            .store(current_timestamp_ms(), Ordering::Relaxed);
    }

    pub fn last_activity_ms(&self) -> u64 {
        self.last_activity_ms.load(Ordering::Relaxed)
    }

    pub fn mark_ping_sent(&self) {
        self.last_ping_sent_ms
            .store(current_timestamp_ms(), Ordering::Relaxed);
    }

    pub fn last_ping_sent_ms(&self) -> u64 {
        self.last_ping_sent_ms.load(Ordering::Relaxed)
    }

    pub fn mark_pong(&self) {
        self.last_pong_ms
            .store(current_timestamp_ms(), Ordering::Relaxed);
    }

    pub fn last_pong_ms(&self) -> u64 {
        self.last_pong_ms.load(Ordering::Relaxed)
    }

    /// Remembers an inbound reliable sequence number; false means it was
    /// already seen and the command should be dropped as a duplicate.
    pub fn note_reliable_seq(&self, sequence: u32) -> bool {
        let mut seen = self.seen_reliable.lock().unwrap();
        if seen.contains(&sequence) {
            return false;
        }
        if seen.len() >= self.seen_reliable_cap {
            seen.pop_front();
        }
        seen.push_back(sequence);
        true
    }

    /// Records one decode error and returns how many fall inside the
    /// sliding window. The caller compares against its threshold.
    pub fn record_decode_error(&self, window_ms: u64) -> u32 {
        self.stats.decode_errors.fetch_add(1, Ordering::Relaxed);
        let now = current_timestamp_ms();
        let mut times = self.decode_error_times.lock().unwrap();
        while let Some(&oldest) = times.front() {
            if now.saturating_sub(oldest) >= window_ms {
                times.pop_front();
            } else {
                break;
            }
        }
        times.push_back(now);
        times.len() as u32
    }

    // ------------------------------------------------------------------
    // Outbound path
    // ------------------------------------------------------------------

    /// Queues one fully-encoded packet for the writer task.
    ///
    /// A full queue means the client cannot keep up; the peer is marked
    /// for disconnection and the caller sees `QueueFull`.
    pub fn enqueue_packet(&self, bytes: Vec<u8>) -> Result<(), SendError> {
        if self.is_closed() {
            return Err(SendError::Closed);
        }
        let len = bytes.len() as u64;
        match self.outbound.try_send(bytes) {
            Ok(()) => {
                self.stats.bytes_out.fetch_add(len, Ordering::Relaxed);
                self.stats.commands_out.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Peer {} send queue overflow, disconnecting", self.id);
                self.begin_close("send queue overflow");
                Err(SendError::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(SendError::Closed),
        }
    }

    /// Sends a control command (VerifyConnect, Disconnect, Ping).
    pub fn send_control(&self, kind: CommandKind) -> Result<(), SendError> {
        let command = Command::control(kind, wire_timestamp());
        self.enqueue_command(&command)
    }

    /// Sends an operation response, event, or request envelope. Reliable
    /// sends use the reliable counter, unreliable the other; both only
    /// ever increment.
    pub fn send_message(&self, message: &Message, reliable: bool) -> Result<(), SendError> {
        let (kind, sequence) = if reliable {
            (CommandKind::SendReliable, self.next_reliable_seq())
        } else {
            (CommandKind::SendUnreliable, self.next_unreliable_seq())
        };
        let command = Command::send(kind, sequence, wire_timestamp(), message.to_value());
        self.enqueue_command(&command)
    }

    fn enqueue_command(&self, command: &Command) -> Result<(), SendError> {
        let bytes = match command.to_bytes() {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("Peer {}: failed to encode outbound command: {}", self.id, e);
                return Err(SendError::Encode);
            }
        };
        self.enqueue_packet(encode_packet(self.id, &bytes))
    }

    // ------------------------------------------------------------------
    // Close coordination
    // ------------------------------------------------------------------

    /// Flags the peer for teardown and wakes its connection driver. Safe
    /// to call from any task, any number of times.
    pub fn begin_close(&self, reason: &str) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            *self.close_reason.lock().unwrap() = Some(reason.to_string());
        }
        self.close_notify.notify_waiters();
        self.close_notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn close_reason(&self) -> Option<String> {
        self.close_reason.lock().unwrap().clone()
    }

    /// Resolves when [`begin_close`](Self::begin_close) has been called.
    pub async fn closed(&self) {
        if self.is_closed() {
            return;
        }
        self.close_notify.notified().await;
    }
}

impl std::fmt::Debug for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peer")
            .field("id", &self.id)
            .field("addr", &self.addr)
            .field("state", &self.state())
            .field("authenticated", &self.is_authenticated())
            .field("is_master", &self.is_master())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// A peer wired to a capturing channel instead of a socket.
    pub fn test_peer(id: u16, queue_depth: usize) -> (Arc<Peer>, mpsc::Receiver<Vec<u8>>) {
        let (tx, rx) = mpsc::channel(queue_depth);
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        (Arc::new(Peer::new(id, addr, tx, 1000)), rx)
    }

    /// Decodes every queued packet back into messages.
    pub fn drain_messages(rx: &mut mpsc::Receiver<Vec<u8>>) -> Vec<Message> {
        use meridian_protocol::{CommandDecoder, FrameDecoder};

        let mut decoder = FrameDecoder::new();
        while let Ok(bytes) = rx.try_recv() {
            decoder.extend(&bytes);
        }
        let mut messages = Vec::new();
        while let Some(packet) = decoder.next_packet().expect("well-formed test packet") {
            let mut commands = CommandDecoder::new(&packet.payload);
            while let Some(command) = commands.next().expect("well-formed test command") {
                if let Some(payload) = command.payload {
                    messages.push(Message::from_value(&payload).expect("decodable envelope"));
                }
            }
        }
        messages
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn state_transitions_are_single_shot_into_disconnecting() {
        let (peer, _rx) = test_peer(1, 8);
        assert_eq!(peer.state(), PeerState::Connecting);

        peer.set_state(PeerState::Connected);
        assert!(peer.begin_disconnect());
        assert_eq!(peer.state(), PeerState::Disconnecting);
        // Second attempt loses the race by definition.
        assert!(!peer.begin_disconnect());

        peer.set_state(PeerState::Disconnected);
        assert!(!peer.begin_disconnect());
    }

    #[test]
    fn sequence_counters_are_monotonic_and_independent() {
        let (peer, _rx) = test_peer(1, 8);
        assert_eq!(peer.next_reliable_seq(), 1);
        assert_eq!(peer.next_reliable_seq(), 2);
        assert_eq!(peer.next_unreliable_seq(), 1);
        assert_eq!(peer.next_reliable_seq(), 3);
        assert_eq!(peer.reliable_seq(), 3);
        assert_eq!(peer.unreliable_seq(), 1);
    }

    #[test]
    fn queue_overflow_marks_the_peer_closed() {
        let (peer, _rx) = test_peer(1, 2);
        assert!(peer.enqueue_packet(vec![1]).is_ok());
        assert!(peer.enqueue_packet(vec![2]).is_ok());
        assert_eq!(peer.enqueue_packet(vec![3]), Err(SendError::QueueFull));
        assert!(peer.is_closed());
        assert_eq!(peer.close_reason().as_deref(), Some("send queue overflow"));
        // Everything after the overflow is refused.
        assert_eq!(peer.enqueue_packet(vec![4]), Err(SendError::Closed));
    }

    #[test]
    fn duplicate_reliable_sequences_are_detected() {
        let (peer, _rx) = test_peer(1, 8);
        assert!(peer.note_reliable_seq(1));
        assert!(peer.note_reliable_seq(2));
        assert!(!peer.note_reliable_seq(1));
        assert!(!peer.note_reliable_seq(2));
        assert!(peer.note_reliable_seq(3));
    }

    #[test]
    fn reliable_window_is_bounded() {
        let (tx, _rx) = mpsc::channel(8);
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let peer = Peer::new(1, addr, tx, 2);
        assert!(peer.note_reliable_seq(1));
        assert!(peer.note_reliable_seq(2));
        assert!(peer.note_reliable_seq(3)); // evicts 1
        assert!(peer.note_reliable_seq(1)); // forgotten, accepted again
    }

    #[test]
    fn decode_error_window_counts_recent_errors_only() {
        let (peer, _rx) = test_peer(1, 8);
        assert_eq!(peer.record_decode_error(60_000), 1);
        assert_eq!(peer.record_decode_error(60_000), 2);
        // Zero-width window: older entries fall out immediately.
        assert_eq!(peer.record_decode_error(0), 1);
    }

    #[test]
    fn sent_messages_carry_increasing_sequence_numbers() {
        use meridian_protocol::constants::return_code;
        use meridian_protocol::OperationResponse;

        let (peer, mut rx) = test_peer(5, 8);
        let response = Message::Response(OperationResponse::ok(1, Default::default()));
        peer.send_message(&response, true).unwrap();
        peer.send_message(&response, true).unwrap();

        let messages = drain_messages(&mut rx);
        assert_eq!(messages.len(), 2);
        for message in &messages {
            match message {
                Message::Response(r) => assert_eq!(r.return_code, return_code::OK),
                other => panic!("unexpected message {other:?}"),
            }
        }
        assert_eq!(peer.reliable_seq(), 2);
    }

    #[test]
    fn merge_properties_is_idempotent() {
        let (peer, _rx) = test_peer(1, 8);
        let mut entries = HashMap::new();
        entries.insert("class".to_string(), Value::from("mage"));
        entries.insert("level".to_string(), Value::integer(3));

        let first = peer.merge_properties(entries.clone());
        let second = peer.merge_properties(entries);
        assert_eq!(first.len(), 2);
        assert_eq!(first.get("class"), second.get("class"));
        assert_eq!(first.get("level"), second.get("level"));
        assert_eq!(second.len(), 2);
    }
}
