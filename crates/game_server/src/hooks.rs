//! Observer hooks.
//!
//! External collaborators (metrics sinks, audit logs, plugin shims)
//! subscribe here and get a callback per lifecycle event. Observers see a
//! compact context record and must not mutate server state through it;
//! emission is synchronous, so observers are expected to be cheap and
//! non-blocking. Nothing in the engine's correctness depends on this
//! module.

use std::sync::{Arc, RwLock};

/// Lifecycle events emitted by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookEvent {
    ServerStarting,
    ServerStarted,
    ServerStopping,
    ServerStopped,
    PeerConnecting,
    PeerConnected,
    PeerAuthenticating,
    PeerAuthenticated,
    PeerDisconnecting,
    PeerDisconnected,
    RoomCreating,
    RoomCreated,
    RoomDestroying,
    RoomDestroyed,
    OperationReceived,
    OperationProcessed,
    EventRaised,
    EventSent,
}

impl HookEvent {
    /// The canonical `subsystem:phase` name observers key on.
    pub fn name(self) -> &'static str {
        match self {
            HookEvent::ServerStarting => "server:starting",
            HookEvent::ServerStarted => "server:started",
            HookEvent::ServerStopping => "server:stopping",
            HookEvent::ServerStopped => "server:stopped",
            HookEvent::PeerConnecting => "peer:connecting",
            HookEvent::PeerConnected => "peer:connected",
            HookEvent::PeerAuthenticating => "peer:authenticating",
            HookEvent::PeerAuthenticated => "peer:authenticated",
            HookEvent::PeerDisconnecting => "peer:disconnecting",
            HookEvent::PeerDisconnected => "peer:disconnected",
            HookEvent::RoomCreating => "room:creating",
            HookEvent::RoomCreated => "room:created",
            HookEvent::RoomDestroying => "room:destroying",
            HookEvent::RoomDestroyed => "room:destroyed",
            HookEvent::OperationReceived => "operation:received",
            HookEvent::OperationProcessed => "operation:processed",
            HookEvent::EventRaised => "event:raised",
            HookEvent::EventSent => "event:sent",
        }
    }
}

/// Compact, read-only context handed to observers.
#[derive(Debug, Clone, Default)]
pub struct HookContext {
    pub peer_id: Option<u16>,
    pub room: Option<String>,
    pub op_code: Option<u8>,
    pub event_code: Option<u8>,
    pub detail: Option<String>,
}

impl HookContext {
    pub fn peer(peer_id: u16) -> Self {
        Self {
            peer_id: Some(peer_id),
            ..Default::default()
        }
    }

    pub fn room(name: &str) -> Self {
        Self {
            room: Some(name.to_string()),
            ..Default::default()
        }
    }

    pub fn with_room(mut self, name: &str) -> Self {
        self.room = Some(name.to_string());
        self
    }

    pub fn with_op(mut self, op_code: u8) -> Self {
        self.op_code = Some(op_code);
        self
    }

    pub fn with_event(mut self, event_code: u8) -> Self {
        self.event_code = Some(event_code);
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Something that wants to watch the server live.
pub trait ServerObserver: Send + Sync {
    fn on_event(&self, event: HookEvent, ctx: &HookContext);
}

/// Holds the subscribed observers and fans events out to them.
#[derive(Default)]
pub struct HookRegistry {
    observers: RwLock<Vec<Arc<dyn ServerObserver>>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, observer: Arc<dyn ServerObserver>) {
        self.observers.write().unwrap().push(observer);
    }

    pub fn observer_count(&self) -> usize {
        self.observers.read().unwrap().len()
    }

    /// Notifies every observer. No-op with zero subscribers.
    pub fn emit(&self, event: HookEvent, ctx: &HookContext) {
        let observers = self.observers.read().unwrap();
        for observer in observers.iter() {
            observer.on_event(event, ctx);
        }
    }
}
