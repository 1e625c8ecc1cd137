//! Protocol constants: type tags, command kinds, operation codes, return
//! codes, event codes and parameter codes.
//!
//! The numeric values match what existing GpBinaryV16 clients send; the
//! alias tables cover the camel-case/Pascal-case string keys some client
//! builds use instead of the byte parameter codes.

/// Type tags for the tagged value encoding (§ wire format).
pub mod type_tag {
    pub const NULL: u8 = 0x2A;
    pub const BOOL: u8 = 0x6F;
    pub const BYTE: u8 = 0x62;
    pub const SHORT: u8 = 0x6B;
    pub const INT: u8 = 0x69;
    pub const LONG: u8 = 0x6C;
    pub const FLOAT: u8 = 0x66;
    pub const DOUBLE: u8 = 0x64;
    pub const STRING: u8 = 0x73;
    pub const BYTE_ARRAY: u8 = 0x78;
    pub const INT_ARRAY: u8 = 0x6E;
    pub const STRING_ARRAY: u8 = 0x61;
    pub const TYPED_ARRAY: u8 = 0x79;
    pub const OBJECT_ARRAY: u8 = 0x7A;
    pub const TABLE: u8 = 0x68;
    pub const DICTIONARY: u8 = 0x44;
    pub const CUSTOM: u8 = 0x63;
}

/// Variant markers for custom-data values.
pub mod custom_variant {
    pub const VEC2: u8 = b'W';
    pub const VEC3: u8 = b'V';
    pub const QUATERNION: u8 = b'Q';
    pub const PLAYER: u8 = b'P';
}

/// Command record kinds inside a packet payload.
pub mod command_kind {
    pub const VERIFY_CONNECT: u8 = 3;
    pub const DISCONNECT: u8 = 4;
    pub const PING: u8 = 5;
    pub const SEND_RELIABLE: u8 = 6;
    pub const SEND_UNRELIABLE: u8 = 7;
}

/// Operation codes dispatched by the router.
pub mod operation {
    pub const GET_ROOMS_ALIAS: u8 = 220;
    pub const JOIN_RANDOM: u8 = 225;
    pub const JOIN: u8 = 226;
    /// Overloaded by clients: LeaveRoom when in a room, CreateRoom otherwise.
    pub const CREATE_OR_LEAVE: u8 = 227;
    pub const AUTHENTICATE: u8 = 230;
    pub const CHANGE_PROPERTIES: u8 = 248;
    pub const GET_ROOMS: u8 = 253;
    pub const RAISE_EVENT: u8 = 255;
}

/// Return codes carried in operation responses.
pub mod return_code {
    pub const OK: i16 = 0;
    pub const OPERATION_INVALID: i16 = -1;
    pub const INTERNAL_SERVER_ERROR: i16 = -2;
    pub const NOT_ALLOWED_IN_STATE: i16 = 32760;
    pub const JOIN_FAILED_DENIED: i16 = 32758;
    pub const ROOM_FULL: i16 = 32765;
    pub const ROOM_NOT_FOUND: i16 = 32764;
    pub const ROOM_CLOSED: i16 = 32757;
}

/// Event codes for server-to-client notifications.
pub mod event_code {
    pub const MASTER_CLIENT_SWITCHED: u8 = 208;
    pub const PROPERTIES_CHANGED: u8 = 253;
    pub const LEAVE: u8 = 254;
    pub const JOIN: u8 = 255;
}

/// Parameter codes used inside operation and event parameter maps.
pub mod param {
    pub const NICKNAME: u8 = 202;
    pub const MASTER_CLIENT_ID: u8 = 203;
    pub const GET_ROOMS_ALIAS: u8 = 220;
    pub const USER_ID: u8 = 225;
    pub const RELIABLE: u8 = 230;
    pub const ROOM_LIST: u8 = 232;
    pub const EXPECTED_PROPERTIES: u8 = 233;
    pub const PLAYER_TTL: u8 = 235;
    pub const EMPTY_ROOM_TTL: u8 = 236;
    pub const PASSWORD: u8 = 240;
    pub const IS_VISIBLE: u8 = 241;
    pub const IS_OPEN: u8 = 242;
    pub const MAX_PLAYERS: u8 = 243;
    pub const CODE: u8 = 244;
    pub const DATA: u8 = 245;
    pub const CACHE_EVENT: u8 = 247;
    pub const GAME_PROPERTIES: u8 = 248;
    pub const ACTOR_PROPERTIES: u8 = 249;
    pub const BROADCAST: u8 = 250;
    pub const PROPERTIES: u8 = 251;
    pub const TARGET_ACTORS: u8 = 252;
    pub const ACTOR_NR: u8 = 254;
    pub const ROOM_NAME: u8 = 255;

    /// Resolves a string parameter key to its byte code.
    ///
    /// Matching is case-insensitive; unknown names return `None` and the
    /// entry is ignored (fail-open for optional extras, fail-closed for
    /// required parameters since the lookup simply misses).
    pub fn code_for_name(name: &str) -> Option<u8> {
        let lower = name.to_ascii_lowercase();
        Some(match lower.as_str() {
            "nickname" => NICKNAME,
            "masterclientid" => MASTER_CLIENT_ID,
            "userid" => USER_ID,
            "reliable" => RELIABLE,
            "roomlist" => ROOM_LIST,
            "expectedproperties" | "filter" => EXPECTED_PROPERTIES,
            "playerttl" => PLAYER_TTL,
            "emptyroomttl" => EMPTY_ROOM_TTL,
            "password" => PASSWORD,
            "isvisible" | "visible" => IS_VISIBLE,
            "isopen" | "open" => IS_OPEN,
            "maxplayers" => MAX_PLAYERS,
            "code" | "eventcode" => CODE,
            "data" => DATA,
            "cacheevent" | "cache" => CACHE_EVENT,
            "gameproperties" => GAME_PROPERTIES,
            "actorproperties" | "playerproperties" => ACTOR_PROPERTIES,
            "broadcast" => BROADCAST,
            "properties" => PROPERTIES,
            "targetactors" | "targets" => TARGET_ACTORS,
            "actornr" | "actornumber" => ACTOR_NR,
            "roomname" => ROOM_NAME,
            _ => return None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alias_lookup_is_case_insensitive() {
        assert_eq!(param::code_for_name("RoomName"), Some(param::ROOM_NAME));
        assert_eq!(param::code_for_name("roomName"), Some(param::ROOM_NAME));
        assert_eq!(param::code_for_name("ROOMNAME"), Some(param::ROOM_NAME));
    }

    #[test]
    fn alias_lookup_covers_client_spellings() {
        assert_eq!(param::code_for_name("playerProperties"), Some(param::ACTOR_PROPERTIES));
        assert_eq!(param::code_for_name("Cache"), Some(param::CACHE_EVENT));
        assert_eq!(param::code_for_name("targets"), Some(param::TARGET_ACTORS));
    }

    #[test]
    fn alias_lookup_rejects_unknown_names() {
        assert_eq!(param::code_for_name("definitelyNotAKey"), None);
        assert_eq!(param::code_for_name(""), None);
    }

    #[test]
    fn room_full_and_join_denied_are_distinct() {
        // 32758 is reserved for the password gate; RoomFull is pinned to 32765.
        assert_ne!(return_code::ROOM_FULL, return_code::JOIN_FAILED_DENIED);
    }
}
