//! Operation handlers, one module per concern.
//!
//! Handlers receive the peer and its decoded parameter map and produce
//! an [`meridian_protocol::OperationResponse`]. Join-shaped handlers
//! return `Option<OperationResponse>` instead: `None` means the room
//! already answered inline, so the response could precede the
//! cached-event replay.

pub(crate) mod auth;
pub(crate) mod events;
pub(crate) mod lobby;
