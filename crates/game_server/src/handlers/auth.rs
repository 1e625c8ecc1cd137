//! Authenticate (operation 230).
//!
//! No credential backend exists; authentication fixes the session's
//! identity. Missing fields fall back to timestamped guest names the way
//! existing clients expect.

use std::sync::Arc;

use meridian_protocol::constants::{operation, param};
use meridian_protocol::{OperationResponse, Parameters, Value};
use tracing::info;

use crate::current_timestamp_ms;
use crate::hooks::{HookContext, HookEvent};
use crate::peer::Peer;
use crate::registry::Registry;

pub(crate) fn authenticate(
    registry: &Arc<Registry>,
    peer: &Arc<Peer>,
    params: &Parameters,
) -> OperationResponse {
    registry.hooks().emit(
        HookEvent::PeerAuthenticating,
        &HookContext::peer(peer.id),
    );

    let now = current_timestamp_ms();
    let nickname = match params.get_str(param::NICKNAME) {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => format!("Guest_{now}"),
    };
    let user_id = match params.get_str(param::USER_ID) {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => format!("user_{now}"),
    };

    peer.set_identity(nickname.clone(), user_id.clone());
    peer.set_authenticated();

    registry.hooks().emit(
        HookEvent::PeerAuthenticated,
        &HookContext::peer(peer.id).with_detail(&user_id),
    );
    info!("Peer {} authenticated as '{}' ({})", peer.id, nickname, user_id);

    OperationResponse::ok(
        operation::AUTHENTICATE,
        Parameters::new()
            .with(param::NICKNAME, Value::from(nickname))
            .with(param::USER_ID, Value::from(user_id)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::peer::test_support::test_peer;
    use meridian_protocol::constants::return_code;

    #[test]
    fn explicit_identity_is_adopted() {
        let registry = Arc::new(Registry::new(ServerConfig::default()));
        let (peer, _rx) = test_peer(1, 8);

        let params = Parameters::new()
            .with(param::NICKNAME, Value::from("alice"))
            .with(param::USER_ID, Value::from("u1"));
        let response = authenticate(&registry, &peer, &params);

        assert_eq!(response.return_code, return_code::OK);
        assert_eq!(response.params.get_str(param::NICKNAME), Some("alice"));
        assert_eq!(response.params.get_str(param::USER_ID), Some("u1"));
        assert!(peer.is_authenticated());
        assert_eq!(peer.nickname(), "alice");
        assert_eq!(peer.user_id(), "u1");
    }

    #[test]
    fn missing_identity_gets_guest_defaults() {
        let registry = Arc::new(Registry::new(ServerConfig::default()));
        let (peer, _rx) = test_peer(1, 8);

        let response = authenticate(&registry, &peer, &Parameters::new());

        assert_eq!(response.return_code, return_code::OK);
        assert!(peer.nickname().starts_with("Guest_"));
        assert!(peer.user_id().starts_with("user_"));
        assert!(peer.is_authenticated());
    }
}
