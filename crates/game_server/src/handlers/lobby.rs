//! Lobby operations: join, create, leave, random matchmaking, listing.
//!
//! Join-shaped handlers return `None` on success because the room sends
//! the response itself, under its lock, so the response is on the wire
//! before any cached event or join broadcast reaches the joiner.

use std::sync::Arc;

use meridian_protocol::constants::{operation, param, return_code};
use meridian_protocol::{OperationResponse, Parameters, Value};
use rand::Rng;
use tracing::info;

use crate::peer::Peer;
use crate::registry::Registry;
use crate::room::{value_to_props, RoomOptions};

/// JoinRoom (226). Absent rooms are created from the request parameters.
pub(crate) async fn join_room(
    registry: &Arc<Registry>,
    peer: &Arc<Peer>,
    params: &Parameters,
) -> Option<OperationResponse> {
    let Some(name) = non_empty(params.get_str(param::ROOM_NAME)) else {
        return Some(OperationResponse::error(
            operation::JOIN,
            return_code::OPERATION_INVALID,
            "RoomName is required",
        ));
    };

    let (room, created) =
        registry.get_or_create_room(name, || RoomOptions::from_params(params, registry.config()));
    if created {
        info!("Peer {} created room '{}' via join", peer.id, name);
    }

    match room
        .join(peer, params.get_str(param::PASSWORD), operation::JOIN)
        .await
    {
        Ok(()) => None,
        Err(e) => Some(OperationResponse::error(
            operation::JOIN,
            e.return_code(),
            e.message(),
        )),
    }
}

/// The create half of operation 227: the name must be fresh, and the
/// creator joins its own room atomically.
pub(crate) async fn create_room(
    registry: &Arc<Registry>,
    peer: &Arc<Peer>,
    params: &Parameters,
) -> Option<OperationResponse> {
    let Some(name) = non_empty(params.get_str(param::ROOM_NAME)) else {
        return Some(OperationResponse::error(
            operation::CREATE_OR_LEAVE,
            return_code::OPERATION_INVALID,
            "RoomName is required",
        ));
    };

    let options = RoomOptions::from_params(params, registry.config());
    let room = match registry.create_room(name, options) {
        Ok(room) => room,
        Err(_) => {
            return Some(OperationResponse::error(
                operation::CREATE_OR_LEAVE,
                return_code::OPERATION_INVALID,
                "room name already in use",
            ))
        }
    };

    match room
        .join(peer, params.get_str(param::PASSWORD), operation::CREATE_OR_LEAVE)
        .await
    {
        Ok(()) => None,
        Err(e) => Some(OperationResponse::error(
            operation::CREATE_OR_LEAVE,
            e.return_code(),
            e.message(),
        )),
    }
}

/// The leave half of operation 227.
pub(crate) async fn leave_room(peer: &Arc<Peer>) -> OperationResponse {
    let Some(room) = peer.room() else {
        return OperationResponse::error(
            operation::CREATE_OR_LEAVE,
            return_code::NOT_ALLOWED_IN_STATE,
            "not in a room",
        );
    };

    let outcome = room.leave(peer).await;
    info!(
        "Peer {} left room '{}'{}",
        peer.id,
        room.name,
        match outcome.new_master {
            Some(master) => format!(", master moved to {master}"),
            None => String::new(),
        }
    );

    OperationResponse::ok(
        operation::CREATE_OR_LEAVE,
        Parameters::new().with(param::ACTOR_NR, Value::integer(peer.id as i64)),
    )
}

/// JoinRandomRoom (225): uniform pick over the rooms passing the filter.
pub(crate) async fn join_random(
    registry: &Arc<Registry>,
    peer: &Arc<Peer>,
    params: &Parameters,
) -> Option<OperationResponse> {
    let requested_max = params.get_i64(param::MAX_PLAYERS);
    let filter = params
        .get(param::EXPECTED_PROPERTIES)
        .and_then(value_to_props)
        .unwrap_or_default();

    let mut candidates = Vec::new();
    for room in registry.rooms() {
        if room.matches_random_filter(requested_max, &filter).await {
            candidates.push(room);
        }
    }
    if candidates.is_empty() {
        return Some(OperationResponse::error(
            operation::JOIN_RANDOM,
            return_code::ROOM_NOT_FOUND,
            "no room matches the filter",
        ));
    }

    let pick = &candidates[rand::thread_rng().gen_range(0..candidates.len())];
    match pick
        .join(peer, params.get_str(param::PASSWORD), operation::JOIN_RANDOM)
        .await
    {
        Ok(()) => None,
        Err(e) => Some(OperationResponse::error(
            operation::JOIN_RANDOM,
            e.return_code(),
            e.message(),
        )),
    }
}

/// GetRooms (253) and its legacy alias (220): every visible room.
pub(crate) async fn get_rooms(registry: &Arc<Registry>, op: u8) -> OperationResponse {
    let mut listing = Vec::new();
    for room in registry.rooms() {
        if room.is_visible().await {
            listing.push(room.info().await.to_value());
        }
    }
    OperationResponse::ok(
        op,
        Parameters::new().with(param::ROOM_LIST, Value::ObjectArray(listing)),
    )
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::peer::test_support::{drain_messages, test_peer};
    use crate::peer::PeerState;
    use meridian_protocol::Message;
    use std::collections::HashMap;

    fn registry() -> Arc<Registry> {
        Arc::new(Registry::new(ServerConfig::default()))
    }

    fn connected(id: u16) -> (Arc<Peer>, tokio::sync::mpsc::Receiver<Vec<u8>>) {
        let (peer, rx) = test_peer(id, 64);
        peer.set_state(PeerState::Connected);
        peer.set_authenticated();
        (peer, rx)
    }

    #[tokio::test]
    async fn join_creates_absent_rooms_with_request_parameters() {
        let registry = registry();
        let (peer, mut rx) = connected(1);

        let params = Parameters::new()
            .with(param::ROOM_NAME, Value::from("r1"))
            .with(param::MAX_PLAYERS, Value::integer(2))
            .with(param::IS_OPEN, Value::from(true))
            .with(param::IS_VISIBLE, Value::from(true));
        let outcome = join_room(&registry, &peer, &params).await;

        // None: the room answered inline.
        assert!(outcome.is_none());
        let room = registry.room("r1").expect("room created");
        assert_eq!(room.member_count().await, 1);
        assert_eq!(room.master_id().await, Some(1));

        let messages = drain_messages(&mut rx);
        let Message::Response(response) = &messages[0] else {
            panic!("expected a join response");
        };
        assert_eq!(response.return_code, return_code::OK);
        assert_eq!(response.params.get_i64(param::ACTOR_NR), Some(1));
        assert_eq!(response.params.get_i64(param::MASTER_CLIENT_ID), Some(1));
    }

    #[tokio::test]
    async fn join_without_room_name_is_invalid() {
        let registry = registry();
        let (peer, _rx) = connected(1);
        let outcome = join_room(&registry, &peer, &Parameters::new()).await;
        let response = outcome.expect("error response");
        assert_eq!(response.return_code, return_code::OPERATION_INVALID);
    }

    #[tokio::test]
    async fn create_rejects_duplicate_names() {
        let registry = registry();
        let (a, _arx) = connected(1);
        let (b, _brx) = connected(2);

        let params = Parameters::new().with(param::ROOM_NAME, Value::from("r1"));
        assert!(create_room(&registry, &a, &params).await.is_none());
        let response = create_room(&registry, &b, &params)
            .await
            .expect("duplicate rejected");
        assert_eq!(response.return_code, return_code::OPERATION_INVALID);
    }

    #[tokio::test]
    async fn full_room_returns_room_full() {
        let registry = registry();
        let (a, _arx) = connected(1);
        let (b, _brx) = connected(2);

        let params = Parameters::new()
            .with(param::ROOM_NAME, Value::from("duo"))
            .with(param::MAX_PLAYERS, Value::integer(1));
        assert!(join_room(&registry, &a, &params).await.is_none());

        let response = join_room(&registry, &b, &params)
            .await
            .expect("join refused");
        assert_eq!(response.return_code, return_code::ROOM_FULL);
    }

    #[tokio::test]
    async fn password_gate_round_trip() {
        let registry = registry();
        let (a, _arx) = connected(1);
        let (b, _brx) = connected(2);

        let create = Parameters::new()
            .with(param::ROOM_NAME, Value::from("p1"))
            .with(param::PASSWORD, Value::from("secret"));
        assert!(join_room(&registry, &a, &create).await.is_none());

        let wrong = Parameters::new()
            .with(param::ROOM_NAME, Value::from("p1"))
            .with(param::PASSWORD, Value::from("wrong"));
        let response = join_room(&registry, &b, &wrong).await.expect("denied");
        assert_eq!(response.return_code, return_code::JOIN_FAILED_DENIED);

        let right = Parameters::new()
            .with(param::ROOM_NAME, Value::from("p1"))
            .with(param::PASSWORD, Value::from("secret"));
        assert!(join_room(&registry, &b, &right).await.is_none());
    }

    #[tokio::test]
    async fn join_random_filters_on_properties_and_capacity() {
        let registry = registry();

        let mut props = HashMap::new();
        props.insert("mode".to_string(), Value::from("ctf"));
        let mut options = RoomOptions::defaults(registry.config());
        options.max_players = 4;
        options.properties = props;
        registry.create_room("ctf-room", options).unwrap();

        // Filter mismatch: nothing found.
        let (b, _brx) = connected(2);
        let miss = Parameters::new().with(
            param::EXPECTED_PROPERTIES,
            Value::Table(vec![(Value::from("mode"), Value::from("tdm"))]),
        );
        let response = join_random(&registry, &b, &miss).await.expect("no match");
        assert_eq!(response.return_code, return_code::ROOM_NOT_FOUND);

        // Matching filter joins the room.
        let hit = Parameters::new().with(
            param::EXPECTED_PROPERTIES,
            Value::Table(vec![(Value::from("mode"), Value::from("ctf"))]),
        );
        assert!(join_random(&registry, &b, &hit).await.is_none());
        assert!(registry.room("ctf-room").unwrap().contains(2).await);
    }

    #[tokio::test]
    async fn leave_then_create_disambiguation() {
        let registry = registry();
        let (peer, mut rx) = connected(1);

        let params = Parameters::new().with(param::ROOM_NAME, Value::from("r1"));
        assert!(create_room(&registry, &peer, &params).await.is_none());
        assert!(peer.room().is_some());
        drain_messages(&mut rx);

        let response = leave_room(&peer).await;
        assert_eq!(response.return_code, return_code::OK);
        assert!(peer.room().is_none());
        assert!(registry.room("r1").unwrap().is_empty().await);
    }

    #[tokio::test]
    async fn get_rooms_lists_only_visible_rooms() {
        let registry = registry();

        let visible = RoomOptions::defaults(registry.config());
        registry.create_room("public", visible).unwrap();
        let mut hidden = RoomOptions::defaults(registry.config());
        hidden.is_visible = false;
        registry.create_room("private", hidden).unwrap();

        let response = get_rooms(&registry, operation::GET_ROOMS).await;
        assert_eq!(response.return_code, return_code::OK);
        let Some(Value::ObjectArray(listing)) = response.params.get(param::ROOM_LIST) else {
            panic!("room list missing");
        };
        assert_eq!(listing.len(), 1);
        let table = listing[0].as_table().unwrap();
        assert!(table
            .iter()
            .any(|(k, v)| k.as_str() == Some("name") && v.as_str() == Some("public")));
    }
}
