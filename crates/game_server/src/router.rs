//! Operation dispatch.
//!
//! One decoded operation request in, exactly one response out - unless
//! the handler already answered inline (joins must emit their response
//! under the room lock so it precedes the cached-event replay, so those
//! handlers return `None` on success).
//!
//! State gating happens here, before any handler runs: Authenticate is
//! valid while Connecting, everything else needs Connected; lobby
//! operations need authentication; room operations need a room.

use std::sync::Arc;

use meridian_protocol::constants::{operation, return_code};
use meridian_protocol::{Message, OperationRequest, OperationResponse};
use tracing::debug;

use crate::handlers;
use crate::hooks::{HookContext, HookEvent};
use crate::peer::{Peer, PeerState};
use crate::registry::Registry;

pub(crate) async fn dispatch(registry: &Arc<Registry>, peer: &Arc<Peer>, request: OperationRequest) {
    let op = request.code;
    registry.hooks().emit(
        HookEvent::OperationReceived,
        &HookContext::peer(peer.id).with_op(op),
    );
    registry
        .stats
        .operations_handled
        .fetch_add(1, std::sync::atomic::Ordering::Relaxed);

    if let Some(response) = route(registry, peer, request).await {
        debug!(
            "Peer {}: op {} -> return code {}",
            peer.id, op, response.return_code
        );
        let _ = peer.send_message(&Message::Response(response), true);
    }

    registry.hooks().emit(
        HookEvent::OperationProcessed,
        &HookContext::peer(peer.id).with_op(op),
    );
}

async fn route(
    registry: &Arc<Registry>,
    peer: &Arc<Peer>,
    request: OperationRequest,
) -> Option<OperationResponse> {
    let op = request.code;
    let params = request.params;
    let state = peer.state();

    // Authenticate is the one operation allowed before Connected.
    if op == operation::AUTHENTICATE {
        return match state {
            PeerState::Connecting | PeerState::Connected => {
                Some(handlers::auth::authenticate(registry, peer, &params))
            }
            _ => Some(not_allowed(op, "connection is shutting down")),
        };
    }
    if state != PeerState::Connected {
        return Some(not_allowed(op, "operation requires a connected session"));
    }

    match op {
        operation::GET_ROOMS | operation::GET_ROOMS_ALIAS => {
            Some(handlers::lobby::get_rooms(registry, op).await)
        }
        operation::JOIN => {
            if !peer.is_authenticated() {
                return Some(not_allowed(op, "authentication required"));
            }
            if peer.room().is_some() {
                return Some(not_allowed(op, "already in a room"));
            }
            handlers::lobby::join_room(registry, peer, &params).await
        }
        operation::JOIN_RANDOM => {
            if !peer.is_authenticated() {
                return Some(not_allowed(op, "authentication required"));
            }
            if peer.room().is_some() {
                return Some(not_allowed(op, "already in a room"));
            }
            handlers::lobby::join_random(registry, peer, &params).await
        }
        // Overloaded by clients: leave when in a room, create otherwise.
        operation::CREATE_OR_LEAVE => {
            if peer.room().is_some() {
                Some(handlers::lobby::leave_room(peer).await)
            } else {
                if !peer.is_authenticated() {
                    return Some(not_allowed(op, "authentication required"));
                }
                handlers::lobby::create_room(registry, peer, &params).await
            }
        }
        operation::CHANGE_PROPERTIES => {
            if !peer.is_authenticated() {
                return Some(not_allowed(op, "authentication required"));
            }
            Some(handlers::events::change_properties(peer, &params).await)
        }
        operation::RAISE_EVENT => {
            if peer.room().is_none() {
                return Some(not_allowed(op, "not in a room"));
            }
            Some(handlers::events::raise_event(registry, peer, &params).await)
        }
        other => Some(OperationResponse::error(
            other,
            return_code::OPERATION_INVALID,
            "unknown operation",
        )),
    }
}

fn not_allowed(op: u8, message: &str) -> OperationResponse {
    OperationResponse::error(op, return_code::NOT_ALLOWED_IN_STATE, message)
}
