//! RaiseEvent (255) and ChangeProperties (248).

use std::sync::Arc;

use meridian_protocol::constants::{operation, param, return_code};
use meridian_protocol::{OperationResponse, Parameters};
use tracing::debug;

use crate::peer::Peer;
use crate::registry::Registry;
use crate::room::{value_to_props, RaiseArgs, RaiseError};

/// Wraps the request's Data under the given event code and fans it out:
/// to the target list when one is supplied, otherwise to every member
/// but the sender. `CacheEvent` appends it to the room's replay cache;
/// `Reliable=false` downgrades the fan-out to unreliable sends.
pub(crate) async fn raise_event(
    registry: &Arc<Registry>,
    peer: &Arc<Peer>,
    params: &Parameters,
) -> OperationResponse {
    let Some(room) = peer.room() else {
        return OperationResponse::error(
            operation::RAISE_EVENT,
            return_code::NOT_ALLOWED_IN_STATE,
            "not in a room",
        );
    };

    let code = match params.get_i64(param::CODE).and_then(|c| u8::try_from(c).ok()) {
        Some(code) => code,
        None => {
            return OperationResponse::error(
                operation::RAISE_EVENT,
                return_code::OPERATION_INVALID,
                "Code is required",
            )
        }
    };

    let targets = params.get(param::TARGET_ACTORS).map(|value| {
        value
            .as_int_list()
            .unwrap_or_default()
            .into_iter()
            .filter_map(|id| u16::try_from(id).ok())
            .collect::<Vec<u16>>()
    });

    let args = RaiseArgs {
        code,
        data: params.get(param::DATA).cloned(),
        targets,
        cache: params.get_bool(param::CACHE_EVENT).unwrap_or(false),
        reliable: params.get_bool(param::RELIABLE).unwrap_or(true),
    };

    match room.raise_event(peer, args).await {
        Ok(sent) => {
            registry
                .stats
                .events_routed
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            debug!(
                "Peer {}: event {} fanned out to {} member(s) of '{}'",
                peer.id, code, sent, room.name
            );
            OperationResponse::ok(operation::RAISE_EVENT, Parameters::new())
        }
        Err(RaiseError::NotMember) => OperationResponse::error(
            operation::RAISE_EVENT,
            return_code::NOT_ALLOWED_IN_STATE,
            "not a member of the room",
        ),
    }
}

/// Merges property updates. Game properties require the master client
/// and land on the room; anything else merges into the sender's own
/// custom properties. Both paths announce the full post-merge map.
pub(crate) async fn change_properties(peer: &Arc<Peer>, params: &Parameters) -> OperationResponse {
    if let Some(game_properties) = params.get(param::GAME_PROPERTIES) {
        let Some(room) = peer.room() else {
            return OperationResponse::error(
                operation::CHANGE_PROPERTIES,
                return_code::NOT_ALLOWED_IN_STATE,
                "game properties require a room",
            );
        };
        if !peer.is_master() {
            return OperationResponse::error(
                operation::CHANGE_PROPERTIES,
                return_code::NOT_ALLOWED_IN_STATE,
                "only the master client may change game properties",
            );
        }
        let Some(entries) = value_to_props(game_properties) else {
            return OperationResponse::error(
                operation::CHANGE_PROPERTIES,
                return_code::OPERATION_INVALID,
                "GameProperties must be a table",
            );
        };
        room.merge_game_properties(peer.id, entries).await;
        return OperationResponse::ok(operation::CHANGE_PROPERTIES, Parameters::new());
    }

    let actor_properties = params
        .get(param::ACTOR_PROPERTIES)
        .or_else(|| params.get(param::PROPERTIES));
    let Some(actor_properties) = actor_properties else {
        return OperationResponse::error(
            operation::CHANGE_PROPERTIES,
            return_code::OPERATION_INVALID,
            "no properties supplied",
        );
    };
    let Some(entries) = value_to_props(actor_properties) else {
        return OperationResponse::error(
            operation::CHANGE_PROPERTIES,
            return_code::OPERATION_INVALID,
            "properties must be a table",
        );
    };

    let merged = peer.merge_properties(entries);
    if let Some(room) = peer.room() {
        room.broadcast_actor_properties(peer.id, &merged).await;
    }
    OperationResponse::ok(operation::CHANGE_PROPERTIES, Parameters::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::peer::test_support::{drain_messages, test_peer};
    use crate::peer::PeerState;
    use crate::room::RoomOptions;
    use meridian_protocol::constants::event_code;
    use meridian_protocol::{Message, Value};

    fn registry() -> Arc<Registry> {
        Arc::new(Registry::new(ServerConfig::default()))
    }

    fn connected(id: u16) -> (Arc<Peer>, tokio::sync::mpsc::Receiver<Vec<u8>>) {
        let (peer, rx) = test_peer(id, 64);
        peer.set_state(PeerState::Connected);
        peer.set_authenticated();
        (peer, rx)
    }

    async fn room_with_members(
        registry: &Arc<Registry>,
    ) -> (
        Arc<Peer>,
        tokio::sync::mpsc::Receiver<Vec<u8>>,
        Arc<Peer>,
        tokio::sync::mpsc::Receiver<Vec<u8>>,
    ) {
        let room = registry
            .create_room("r1", RoomOptions::defaults(registry.config()))
            .unwrap();
        let (a, mut arx) = connected(1);
        let (b, mut brx) = connected(2);
        room.join(&a, None, 226).await.unwrap();
        room.join(&b, None, 226).await.unwrap();
        drain_messages(&mut arx);
        drain_messages(&mut brx);
        (a, arx, b, brx)
    }

    #[tokio::test]
    async fn raise_without_code_is_invalid() {
        let registry = registry();
        let (a, _arx, _b, _brx) = room_with_members(&registry).await;
        let response = raise_event(&registry, &a, &Parameters::new()).await;
        assert_eq!(response.return_code, return_code::OPERATION_INVALID);
    }

    #[tokio::test]
    async fn raise_reaches_the_other_member() {
        let registry = registry();
        let (a, _arx, _b, mut brx) = room_with_members(&registry).await;

        let params = Parameters::new()
            .with(param::CODE, Value::integer(42))
            .with(param::DATA, Value::Table(vec![(Value::from("k"), Value::from("v"))]));
        let response = raise_event(&registry, &a, &params).await;
        assert_eq!(response.return_code, return_code::OK);

        let messages = drain_messages(&mut brx);
        assert_eq!(messages.len(), 1);
        match &messages[0] {
            Message::Event(e) => {
                assert_eq!(e.code, 42);
                assert_eq!(e.params.get_i64(param::ACTOR_NR), Some(1));
            }
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[tokio::test]
    async fn game_properties_require_mastership() {
        let registry = registry();
        let (_a, _arx, b, _brx) = room_with_members(&registry).await;

        let params = Parameters::new().with(
            param::GAME_PROPERTIES,
            Value::Table(vec![(Value::from("map"), Value::from("arena"))]),
        );
        // B is not the master.
        let response = change_properties(&b, &params).await;
        assert_eq!(response.return_code, return_code::NOT_ALLOWED_IN_STATE);
    }

    #[tokio::test]
    async fn master_game_property_change_is_broadcast() {
        let registry = registry();
        let (a, _arx, _b, mut brx) = room_with_members(&registry).await;

        let params = Parameters::new().with(
            param::GAME_PROPERTIES,
            Value::Table(vec![(Value::from("map"), Value::from("arena"))]),
        );
        let response = change_properties(&a, &params).await;
        assert_eq!(response.return_code, return_code::OK);

        let messages = drain_messages(&mut brx);
        assert_eq!(messages.len(), 1);
        match &messages[0] {
            Message::Event(e) => {
                assert_eq!(e.code, event_code::PROPERTIES_CHANGED);
                assert!(e.params.get(param::GAME_PROPERTIES).is_some());
            }
            other => panic!("unexpected message {other:?}"),
        }

        let room = registry.room("r1").unwrap();
        assert_eq!(
            room.game_properties().await.get("map"),
            Some(&Value::from("arena"))
        );
    }

    #[tokio::test]
    async fn actor_properties_merge_on_the_peer() {
        let registry = registry();
        let (_a, _arx, b, _brx) = room_with_members(&registry).await;

        let params = Parameters::new().with(
            param::ACTOR_PROPERTIES,
            Value::Table(vec![(Value::from("class"), Value::from("mage"))]),
        );
        let response = change_properties(&b, &params).await;
        assert_eq!(response.return_code, return_code::OK);
        assert_eq!(b.properties().get("class"), Some(&Value::from("mage")));
    }

    #[tokio::test]
    async fn change_without_any_properties_is_invalid() {
        let registry = registry();
        let (a, _arx, _b, _brx) = room_with_members(&registry).await;
        let response = change_properties(&a, &Parameters::new()).await;
        assert_eq!(response.return_code, return_code::OPERATION_INVALID);
    }
}
