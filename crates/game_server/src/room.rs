//! Room: a named container of peers sharing events and properties.
//!
//! All mutable room state - member map, master id, game properties, and
//! the event replay cache - sits behind one mutex with a single write
//! path, so the invariants (at most one master, member count within
//! capacity, cache within bounds) hold by construction. Sends to members
//! are lock-free queue pushes, which makes fan-out under the room lock
//! both deadlock-free and order-preserving per recipient.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Weak};

use meridian_protocol::constants::{event_code, param, return_code};
use meridian_protocol::{EventMessage, Message, OperationResponse, Parameters, Value};
use tokio::sync::Mutex;
use tracing::debug;

use crate::config::ServerConfig;
use crate::current_timestamp_ms;
use crate::hooks::{HookContext, HookEvent, HookRegistry};
use crate::peer::Peer;

/// Creation-time settings for a room.
#[derive(Debug, Clone)]
pub struct RoomOptions {
    pub max_players: usize,
    pub is_open: bool,
    pub is_visible: bool,
    pub password: Option<String>,
    pub empty_room_ttl_ms: u64,
    /// Reserved: parsed, stored and echoed to clients, but drives no
    /// behavior yet.
    pub player_ttl_ms: u64,
    pub properties: HashMap<String, Value>,
}

impl RoomOptions {
    /// Baseline options for rooms created without explicit parameters.
    pub fn defaults(config: &ServerConfig) -> Self {
        Self {
            max_players: config.max_players_hard_cap,
            is_open: true,
            is_visible: true,
            password: None,
            empty_room_ttl_ms: config.empty_room_ttl_ms,
            player_ttl_ms: 0,
            properties: HashMap::new(),
        }
    }

    /// Reads creation options out of a client parameter map. Anything
    /// absent keeps its default; max-players is clamped into
    /// `[1, max_players_hard_cap]`.
    pub fn from_params(params: &Parameters, config: &ServerConfig) -> Self {
        let mut options = Self::defaults(config);
        if let Some(max) = params.get_i64(param::MAX_PLAYERS) {
            options.max_players = (max.max(1) as usize).min(config.max_players_hard_cap);
        }
        if let Some(open) = params.get_bool(param::IS_OPEN) {
            options.is_open = open;
        }
        if let Some(visible) = params.get_bool(param::IS_VISIBLE) {
            options.is_visible = visible;
        }
        if let Some(password) = params.get_str(param::PASSWORD) {
            if !password.is_empty() {
                options.password = Some(password.to_string());
            }
        }
        if let Some(ttl) = params.get_i64(param::EMPTY_ROOM_TTL) {
            options.empty_room_ttl_ms = ttl.max(0) as u64;
        }
        if let Some(ttl) = params.get_i64(param::PLAYER_TTL) {
            options.player_ttl_ms = ttl.max(0) as u64;
        }
        if let Some(props) = params.get(param::GAME_PROPERTIES).and_then(value_to_props) {
            options.properties = props;
        }
        options
    }
}

/// Why a join was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinError {
    Closed,
    Full,
    AlreadyMember,
    BadPassword,
}

impl JoinError {
    pub fn return_code(self) -> i16 {
        match self {
            JoinError::Closed => return_code::ROOM_CLOSED,
            JoinError::Full => return_code::ROOM_FULL,
            JoinError::AlreadyMember => return_code::OPERATION_INVALID,
            JoinError::BadPassword => return_code::JOIN_FAILED_DENIED,
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            JoinError::Closed => "room is closed",
            JoinError::Full => "room is full",
            JoinError::AlreadyMember => "already a member of this room",
            JoinError::BadPassword => "invalid password",
        }
    }
}

/// Why an event raise was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RaiseError {
    NotMember,
}

/// What a leave changed, for the caller's logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaveOutcome {
    pub was_member: bool,
    pub new_master: Option<u16>,
    pub now_empty: bool,
}

/// Arguments to an event raise.
#[derive(Debug, Clone)]
pub struct RaiseArgs {
    pub code: u8,
    pub data: Option<Value>,
    /// `None` broadcasts to everyone but the sender; a list targets the
    /// named members (absent or disconnected ids are silently skipped).
    pub targets: Option<Vec<u16>>,
    pub cache: bool,
    pub reliable: bool,
}

/// One cached event, replayed to late joiners in raise order.
#[derive(Debug, Clone)]
struct CachedEvent {
    code: u8,
    params: Parameters,
    sender: u16,
    timestamp_ms: u64,
}

/// Listing entry for GetRooms.
#[derive(Debug, Clone)]
pub struct RoomInfo {
    pub name: String,
    pub player_count: usize,
    pub max_players: usize,
    pub is_open: bool,
    pub is_visible: bool,
    pub properties: HashMap<String, Value>,
}

impl RoomInfo {
    /// The string-keyed table clients receive in room lists.
    pub fn to_value(&self) -> Value {
        Value::Table(vec![
            (Value::from("name"), Value::from(self.name.as_str())),
            (Value::from("playerCount"), Value::integer(self.player_count as i64)),
            (Value::from("maxPlayers"), Value::integer(self.max_players as i64)),
            (Value::from("isOpen"), Value::from(self.is_open)),
            (Value::from("isVisible"), Value::from(self.is_visible)),
            (Value::from("properties"), props_to_value(&self.properties)),
        ])
    }
}

struct RoomState {
    options: RoomOptions,
    properties: HashMap<String, Value>,
    members: BTreeMap<u16, Arc<Peer>>,
    master_id: Option<u16>,
    cache: VecDeque<CachedEvent>,
    last_activity_ms: u64,
    events_raised: u64,
    total_joins: u64,
    /// Set by [`Room::evacuate`]; a destroyed room admits nobody, which
    /// closes the race between a late join and the cleanup sweep.
    destroyed: bool,
}

/// A named container of peers. See the module docs for the locking
/// story.
pub struct Room {
    pub name: String,
    pub created_at_ms: u64,
    max_cached_events: usize,
    hooks: Arc<HookRegistry>,
    /// Handle to our own allocation, downgraded into joining peers.
    self_weak: Weak<Room>,
    state: Mutex<RoomState>,
}

impl std::fmt::Debug for Room {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Room")
            .field("name", &self.name)
            .field("created_at_ms", &self.created_at_ms)
            .finish_non_exhaustive()
    }
}

impl Room {
    pub fn new(
        name: String,
        options: RoomOptions,
        max_cached_events: usize,
        hooks: Arc<HookRegistry>,
    ) -> Arc<Self> {
        let now = current_timestamp_ms();
        let properties = options.properties.clone();
        Arc::new_cyclic(|self_weak| Self {
            name,
            created_at_ms: now,
            max_cached_events,
            hooks,
            self_weak: self_weak.clone(),
            state: Mutex::new(RoomState {
                options,
                properties,
                members: BTreeMap::new(),
                master_id: None,
                cache: VecDeque::new(),
                last_activity_ms: now,
                events_raised: 0,
                total_joins: 0,
                destroyed: false,
            }),
        })
    }

    // ------------------------------------------------------------------
    // Membership
    // ------------------------------------------------------------------

    /// Admits a peer, or explains why not.
    ///
    /// On success the joiner receives, in this order and atomically with
    /// respect to concurrent raises: the operation response (as
    /// `response_op`, since both Join and Create funnel here), every
    /// cached event, and nothing else until the next live event. Other
    /// members receive the Join broadcast.
    pub async fn join(
        &self,
        peer: &Arc<Peer>,
        password: Option<&str>,
        response_op: u8,
    ) -> Result<(), JoinError> {
        let mut state = self.state.lock().await;

        if state.destroyed || !state.options.is_open {
            return Err(JoinError::Closed);
        }
        if state.members.contains_key(&peer.id) {
            return Err(JoinError::AlreadyMember);
        }
        if state.members.len() >= state.options.max_players {
            return Err(JoinError::Full);
        }
        if let Some(expected) = &state.options.password {
            if password != Some(expected.as_str()) {
                return Err(JoinError::BadPassword);
            }
        }

        state.members.insert(peer.id, Arc::clone(peer));
        state.total_joins += 1;
        state.last_activity_ms = current_timestamp_ms();
        peer.set_room(self.self_weak.clone());
        if state.master_id.is_none() {
            state.master_id = Some(peer.id);
            peer.set_master(true);
        }

        debug!(
            "Peer {} joined room '{}' ({}/{})",
            peer.id,
            self.name,
            state.members.len(),
            state.options.max_players
        );

        // Join response strictly before any event triggered by the join.
        let response =
            OperationResponse::ok(response_op, self.join_response_params(&state, peer.id));
        let _ = peer.send_message(&Message::Response(response), true);

        for cached in &state.cache {
            let replay = EventMessage::new(cached.code, cached.params.clone());
            let _ = peer.send_message(&Message::Event(replay), true);
        }

        let join_event = EventMessage::new(
            event_code::JOIN,
            Parameters::new()
                .with(param::ACTOR_NR, Value::integer(peer.id as i64))
                .with(param::NICKNAME, Value::from(peer.nickname()))
                .with(
                    param::ACTOR_PROPERTIES,
                    props_to_value(&peer.properties()),
                ),
        );
        self.deliver(&state, &join_event, Some(peer.id), true);

        Ok(())
    }

    /// Removes a peer; elects and announces a new master if the peer
    /// held it. Harmless when the peer was not a member.
    pub async fn leave(&self, peer: &Arc<Peer>) -> LeaveOutcome {
        let mut state = self.state.lock().await;

        let was_member = state.members.remove(&peer.id).is_some();
        if !was_member {
            return LeaveOutcome {
                was_member: false,
                new_master: None,
                now_empty: state.members.is_empty(),
            };
        }
        peer.clear_room();

        state.last_activity_ms = current_timestamp_ms();

        let leave_event = EventMessage::new(
            event_code::LEAVE,
            Parameters::new()
                .with(param::ACTOR_NR, Value::integer(peer.id as i64))
                .with(param::NICKNAME, Value::from(peer.nickname())),
        );
        self.deliver(&state, &leave_event, None, true);

        let mut new_master = None;
        if state.master_id == Some(peer.id) {
            // Deterministic: smallest peer id wins.
            state.master_id = state.members.keys().next().copied();
            if let Some(master_id) = state.master_id {
                if let Some(master) = state.members.get(&master_id) {
                    master.set_master(true);
                }
                new_master = Some(master_id);
                let switch = EventMessage::new(
                    event_code::MASTER_CLIENT_SWITCHED,
                    Parameters::new()
                        .with(param::MASTER_CLIENT_ID, Value::integer(master_id as i64)),
                );
                self.deliver(&state, &switch, None, true);
                debug!(
                    "Room '{}': master switched to peer {}",
                    self.name, master_id
                );
            }
        }

        LeaveOutcome {
            was_member: true,
            new_master,
            now_empty: state.members.is_empty(),
        }
    }

    /// Detaches every member without broadcasting; used when the room
    /// itself is being destroyed.
    pub async fn evacuate(&self) -> Vec<u16> {
        let mut state = self.state.lock().await;
        state.destroyed = true;
        let ids: Vec<u16> = state.members.keys().copied().collect();
        for member in state.members.values() {
            member.clear_room();
        }
        state.members.clear();
        state.master_id = None;
        ids
    }

    // ------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------

    /// Raises an event into the room on behalf of `sender`.
    ///
    /// Raises from one sender are serialised by the room lock, so any
    /// given recipient sees them in raise order. Returns the number of
    /// members the event was queued to.
    pub async fn raise_event(
        &self,
        sender: &Arc<Peer>,
        args: RaiseArgs,
    ) -> Result<usize, RaiseError> {
        let mut state = self.state.lock().await;
        if !state.members.contains_key(&sender.id) {
            return Err(RaiseError::NotMember);
        }

        let mut params =
            Parameters::new().with(param::ACTOR_NR, Value::integer(sender.id as i64));
        if let Some(data) = args.data {
            params.insert(param::DATA, data);
        }

        if args.cache {
            if state.cache.len() >= self.max_cached_events {
                state.cache.pop_front();
            }
            state.cache.push_back(CachedEvent {
                code: args.code,
                params: params.clone(),
                sender: sender.id,
                timestamp_ms: current_timestamp_ms(),
            });
        }

        self.hooks.emit(
            HookEvent::EventRaised,
            &HookContext::peer(sender.id)
                .with_room(&self.name)
                .with_event(args.code),
        );

        let event = EventMessage::new(args.code, params);
        let sent = match &args.targets {
            None => self.deliver(&state, &event, Some(sender.id), args.reliable),
            Some(targets) => {
                let mut sent = 0;
                for target in targets {
                    if let Some(member) = state.members.get(target) {
                        if member
                            .send_message(&Message::Event(event.clone()), args.reliable)
                            .is_ok()
                        {
                            sent += 1;
                            self.hooks.emit(
                                HookEvent::EventSent,
                                &HookContext::peer(*target)
                                    .with_room(&self.name)
                                    .with_event(event.code),
                            );
                        }
                    }
                }
                sent
            }
        };

        state.events_raised += 1;
        state.last_activity_ms = current_timestamp_ms();
        Ok(sent)
    }

    /// Queues an event to every member except `exclude`. Returns the
    /// number of members it reached.
    fn deliver(
        &self,
        state: &RoomState,
        event: &EventMessage,
        exclude: Option<u16>,
        reliable: bool,
    ) -> usize {
        let mut sent = 0;
        for (id, member) in &state.members {
            if Some(*id) == exclude {
                continue;
            }
            if member
                .send_message(&Message::Event(event.clone()), reliable)
                .is_ok()
            {
                sent += 1;
                self.hooks.emit(
                    HookEvent::EventSent,
                    &HookContext::peer(*id)
                        .with_room(&self.name)
                        .with_event(event.code),
                );
            }
        }
        sent
    }

    // ------------------------------------------------------------------
    // Properties
    // ------------------------------------------------------------------

    /// Merges game properties and announces the full post-merge map to
    /// every other member.
    pub async fn merge_game_properties(
        &self,
        sender_id: u16,
        entries: HashMap<String, Value>,
    ) -> HashMap<String, Value> {
        let mut state = self.state.lock().await;
        state.properties.extend(entries);
        state.last_activity_ms = current_timestamp_ms();
        let merged = state.properties.clone();

        let event = EventMessage::new(
            event_code::PROPERTIES_CHANGED,
            Parameters::new()
                .with(param::ACTOR_NR, Value::integer(sender_id as i64))
                .with(param::GAME_PROPERTIES, props_to_value(&merged)),
        );
        self.deliver(&state, &event, Some(sender_id), true);
        merged
    }

    /// Announces a member's post-merge custom properties to the rest of
    /// the room. The merge itself happens on the peer.
    pub async fn broadcast_actor_properties(
        &self,
        sender_id: u16,
        properties: &HashMap<String, Value>,
    ) {
        let state = self.state.lock().await;
        let event = EventMessage::new(
            event_code::PROPERTIES_CHANGED,
            Parameters::new()
                .with(param::ACTOR_NR, Value::integer(sender_id as i64))
                .with(param::ACTOR_PROPERTIES, props_to_value(properties)),
        );
        self.deliver(&state, &event, Some(sender_id), true);
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub async fn member_count(&self) -> usize {
        self.state.lock().await.members.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.members.is_empty()
    }

    pub async fn contains(&self, peer_id: u16) -> bool {
        self.state.lock().await.members.contains_key(&peer_id)
    }

    pub async fn master_id(&self) -> Option<u16> {
        self.state.lock().await.master_id
    }

    pub async fn is_visible(&self) -> bool {
        self.state.lock().await.options.is_visible
    }

    pub async fn cached_event_count(&self) -> usize {
        self.state.lock().await.cache.len()
    }

    /// `(event code, sender, raise timestamp)` per cache entry, oldest
    /// first.
    pub async fn cache_snapshot(&self) -> Vec<(u8, u16, u64)> {
        self.state
            .lock()
            .await
            .cache
            .iter()
            .map(|cached| (cached.code, cached.sender, cached.timestamp_ms))
            .collect()
    }

    pub async fn game_properties(&self) -> HashMap<String, Value> {
        self.state.lock().await.properties.clone()
    }

    pub async fn last_activity_ms(&self) -> u64 {
        self.state.lock().await.last_activity_ms
    }

    /// Lifetime counters: `(total joins, events raised)`.
    pub async fn traffic_stats(&self) -> (u64, u64) {
        let state = self.state.lock().await;
        (state.total_joins, state.events_raised)
    }

    /// Listing entry for GetRooms responses.
    pub async fn info(&self) -> RoomInfo {
        let state = self.state.lock().await;
        RoomInfo {
            name: self.name.clone(),
            player_count: state.members.len(),
            max_players: state.options.max_players,
            is_open: state.options.is_open,
            is_visible: state.options.is_visible,
            properties: state.properties.clone(),
        }
    }

    /// JoinRandomRoom filter: visible, open, not full, capacity within
    /// the requested bound, and properties a superset of the filter.
    pub async fn matches_random_filter(
        &self,
        requested_max_players: Option<i64>,
        filter: &HashMap<String, Value>,
    ) -> bool {
        let state = self.state.lock().await;
        if !state.options.is_visible || !state.options.is_open {
            return false;
        }
        if state.members.len() >= state.options.max_players {
            return false;
        }
        if let Some(requested) = requested_max_players {
            if state.options.max_players as i64 > requested {
                return false;
            }
        }
        filter
            .iter()
            .all(|(key, value)| state.properties.get(key) == Some(value))
    }

    /// Whether the cleanup pass may destroy this room at `now`.
    pub async fn cleanup_eligible(&self, now_ms: u64) -> bool {
        let state = self.state.lock().await;
        state.members.is_empty()
            && state.options.empty_room_ttl_ms > 0
            && now_ms.saturating_sub(state.last_activity_ms) > state.options.empty_room_ttl_ms
    }

    fn join_response_params(&self, state: &RoomState, actor_nr: u16) -> Parameters {
        let mut actor_properties: Vec<(Value, Value)> = Vec::with_capacity(state.members.len());
        for (id, member) in &state.members {
            let mut profile = member.properties();
            profile.insert("nickname".to_string(), Value::from(member.nickname()));
            profile.insert("userId".to_string(), Value::from(member.user_id()));
            actor_properties.push((Value::integer(*id as i64), props_to_value(&profile)));
        }

        Parameters::new()
            .with(param::ACTOR_NR, Value::integer(actor_nr as i64))
            .with(
                param::MASTER_CLIENT_ID,
                match state.master_id {
                    Some(id) => Value::integer(id as i64),
                    None => Value::Null,
                },
            )
            .with(param::GAME_PROPERTIES, props_to_value(&state.properties))
            .with(param::ACTOR_PROPERTIES, Value::Table(actor_properties))
            .with(
                param::PLAYER_TTL,
                Value::integer(state.options.player_ttl_ms as i64),
            )
            .with(
                param::EMPTY_ROOM_TTL,
                Value::integer(state.options.empty_room_ttl_ms as i64),
            )
    }
}

/// Encodes a string-keyed property map as a wire table, sorted by key so
/// encodings are deterministic.
pub fn props_to_value(map: &HashMap<String, Value>) -> Value {
    let mut pairs: Vec<(&String, &Value)> = map.iter().collect();
    pairs.sort_by(|a, b| a.0.cmp(b.0));
    Value::Table(
        pairs
            .into_iter()
            .map(|(key, value)| (Value::from(key.as_str()), value.clone()))
            .collect(),
    )
}

/// Decodes a wire table into a string-keyed property map. Non-string
/// keys are ignored; anything that is not a table yields `None`.
pub fn value_to_props(value: &Value) -> Option<HashMap<String, Value>> {
    let pairs = value.as_table()?;
    let mut map = HashMap::with_capacity(pairs.len());
    for (key, val) in pairs {
        if let Some(key) = key.as_str() {
            map.insert(key.to_string(), val.clone());
        }
    }
    Some(map)
}
