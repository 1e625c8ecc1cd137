//! Per-socket connection driver.
//!
//! Each accepted socket gets two tasks. The writer task is the only code
//! that touches the write half: it drains the peer's bounded queue, so a
//! queued packet is written contiguously and sends never interleave. The
//! reader task (this module's main loop) reassembles packets, walks the
//! command records inside them, and dispatches.
//!
//! Failure containment follows the error taxonomy: one malformed command
//! skips the rest of its packet and bumps a counter; repeated decode
//! errors or any socket error end the connection.

use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use meridian_protocol::{CommandKind, FrameDecoder, Message};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::hooks::{HookContext, HookEvent};
use crate::peer::{Peer, PeerState};
use crate::registry::Registry;
use crate::router;

const READ_BUFFER_SIZE: usize = 8 * 1024;

/// Runs one connection to completion: registration, VerifyConnect, the
/// read loop, and teardown.
pub(crate) async fn drive(registry: Arc<Registry>, stream: TcpStream, addr: SocketAddr) {
    let config = registry.config().clone();
    let (outbound_tx, outbound_rx) = mpsc::channel::<Vec<u8>>(config.send_queue_depth);

    let id = registry.mint_peer_id();
    let peer = Arc::new(Peer::new(
        id,
        addr,
        outbound_tx,
        config.max_reliable_commands_per_peer,
    ));
    registry.register_peer(Arc::clone(&peer));
    registry
        .hooks()
        .emit(HookEvent::PeerConnecting, &HookContext::peer(id));

    let (read_half, write_half) = stream.into_split();
    tokio::spawn(write_loop(write_half, outbound_rx, id));

    // The handshake: the server speaks first.
    if peer.send_control(CommandKind::VerifyConnect).is_err() {
        registry.disconnect_peer(&peer, "handshake send failed").await;
        return;
    }
    peer.set_state(PeerState::Connected);
    registry
        .hooks()
        .emit(HookEvent::PeerConnected, &HookContext::peer(id));
    info!("Peer {} connected from {}", id, addr);

    read_loop(&registry, &peer, read_half).await;

    let reason = peer
        .close_reason()
        .unwrap_or_else(|| "connection closed".to_string());
    registry.disconnect_peer(&peer, &reason).await;
}

/// Drains the outbound queue into the socket. Exits when every sender is
/// gone (peer fully released) or the socket dies; buffered packets are
/// still flushed after the peer closes, which is how the farewell
/// Disconnect command gets out.
async fn write_loop(
    mut write_half: OwnedWriteHalf,
    mut outbound_rx: mpsc::Receiver<Vec<u8>>,
    peer_id: u16,
) {
    while let Some(bytes) = outbound_rx.recv().await {
        if let Err(e) = write_half.write_all(&bytes).await {
            debug!("Peer {} write failed: {}", peer_id, e);
            break;
        }
    }
    let _ = write_half.shutdown().await;
}

async fn read_loop(registry: &Arc<Registry>, peer: &Arc<Peer>, mut read_half: OwnedReadHalf) {
    let mut decoder = FrameDecoder::new();
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    let mut bad_packets: u32 = 0;

    loop {
        tokio::select! {
            _ = peer.closed() => break,
            result = read_half.read(&mut buf) => {
                match result {
                    Ok(0) => {
                        debug!("Peer {} closed the connection", peer.id);
                        break;
                    }
                    Ok(n) => {
                        peer.stats.bytes_in.fetch_add(n as u64, Ordering::Relaxed);
                        decoder.extend(&buf[..n]);
                        if !process_buffered(registry, peer, &mut decoder, &mut bad_packets).await {
                            break;
                        }
                    }
                    Err(e) => {
                        debug!("Peer {} read error: {}", peer.id, e);
                        break;
                    }
                }
            }
        }
    }
}

/// Walks every complete packet currently buffered. Returns false when
/// the connection should end.
async fn process_buffered(
    registry: &Arc<Registry>,
    peer: &Arc<Peer>,
    decoder: &mut FrameDecoder,
    bad_packets: &mut u32,
) -> bool {
    let config = registry.config();
    loop {
        match decoder.next_packet() {
            Ok(None) => return true,
            Ok(Some(packet)) => {
                *bad_packets = 0;
                peer.touch();
                if !process_packet(registry, peer, &packet.payload).await {
                    return false;
                }
            }
            Err(e) => {
                *bad_packets += 1;
                warn!(
                    "Peer {}: bad packet ({}), {}/{} strikes",
                    peer.id, e, bad_packets, config.max_bad_packets
                );
                if *bad_packets >= config.max_bad_packets {
                    peer.begin_close("too many malformed packets");
                    return false;
                }
                // The decoder dropped its buffer; wait for fresh input.
                return true;
            }
        }
    }
}

/// Dispatches the command records inside one packet payload. A decode
/// error abandons the remainder of the packet only.
async fn process_packet(registry: &Arc<Registry>, peer: &Arc<Peer>, payload: &[u8]) -> bool {
    let mut commands = meridian_protocol::CommandDecoder::new(payload);
    loop {
        match commands.next() {
            Ok(None) => return true,
            Ok(Some(command)) => {
                peer.stats.commands_in.fetch_add(1, Ordering::Relaxed);
                if !dispatch_command(registry, peer, command).await {
                    return false;
                }
            }
            Err(e) => {
                if !note_decode_error(registry, peer, &e) {
                    return false;
                }
                // Skip whatever remains of this packet.
                return true;
            }
        }
    }
}

/// Counts one decode error against the sliding window. Returns false
/// when the peer crossed the threshold and must go.
fn note_decode_error(
    registry: &Arc<Registry>,
    peer: &Arc<Peer>,
    error: &meridian_protocol::ProtocolError,
) -> bool {
    let config = registry.config();
    let recent = peer.record_decode_error(config.decode_error_window_ms);
    warn!(
        "Peer {}: decode error ({}), {}/{} within window",
        peer.id, error, recent, config.max_decode_errors
    );
    if recent >= config.max_decode_errors {
        peer.begin_close("repeated decode errors");
        return false;
    }
    true
}

async fn dispatch_command(
    registry: &Arc<Registry>,
    peer: &Arc<Peer>,
    command: meridian_protocol::Command,
) -> bool {
    match command.kind {
        // Clients echo the handshake; nothing to do.
        CommandKind::VerifyConnect => true,
        CommandKind::Ping => {
            // Doubles as the pong for our server-driven liveness cycle.
            peer.touch();
            peer.mark_pong();
            true
        }
        CommandKind::Disconnect => {
            registry
                .disconnect_peer(peer, "client requested disconnect")
                .await;
            false
        }
        CommandKind::SendReliable | CommandKind::SendUnreliable => {
            if command.kind == CommandKind::SendReliable {
                if let Some(sequence) = command.sequence {
                    if !peer.note_reliable_seq(sequence) {
                        debug!("Peer {}: duplicate reliable command {}", peer.id, sequence);
                        return true;
                    }
                }
            }
            let Some(payload) = command.payload else {
                // The decoder guarantees payloads on send commands.
                return true;
            };
            match Message::from_value(&payload) {
                Ok(Message::Request(request)) => {
                    router::dispatch(registry, peer, request).await;
                    true
                }
                Ok(other) => {
                    debug!(
                        "Peer {}: ignoring non-request envelope {:?}",
                        peer.id,
                        std::mem::discriminant(&other)
                    );
                    true
                }
                Err(e) => note_decode_error(registry, peer, &e),
            }
        }
    }
}
