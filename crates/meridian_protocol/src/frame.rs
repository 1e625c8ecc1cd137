//! Outer packet framing.
//!
//! A TCP stream is a sequence of packets: signature `0xFB17` (u16),
//! peer id (u16), crc (u32, written as zero and not validated), payload
//! length (u32), then the payload. A single read may deliver several
//! packets or a fraction of one, so [`FrameDecoder`] buffers input until
//! a complete header + payload is available.

use crate::error::{ProtocolError, ProtocolResult};

/// Big-endian packet signature.
pub const PACKET_SIGNATURE: u16 = 0xFB17;

/// Header size in bytes: signature + peer id + crc + length.
pub const PACKET_HEADER_LEN: usize = 12;

/// Upper bound on a single packet payload. Anything larger is treated
/// as a framing error, not a legitimate packet.
pub const MAX_PACKET_PAYLOAD: usize = 1024 * 1024;

/// Decoded outer header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub peer_id: u16,
    pub crc: u32,
    pub length: u32,
}

/// A complete packet: header plus owned payload bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub header: PacketHeader,
    pub payload: Vec<u8>,
}

/// Encodes one packet around an already-encoded payload.
pub fn encode_packet(peer_id: u16, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(PACKET_HEADER_LEN + payload.len());
    out.extend_from_slice(&PACKET_SIGNATURE.to_be_bytes());
    out.extend_from_slice(&peer_id.to_be_bytes());
    out.extend_from_slice(&0u32.to_be_bytes()); // crc: written as zero
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(payload);
    out
}

/// Incremental packet reassembly over a byte stream.
///
/// Feed raw reads in with [`extend`](Self::extend) and drain complete
/// packets with [`next_packet`](Self::next_packet). On a signature
/// mismatch or an oversized length declaration the buffered input is
/// discarded (there is no way to find the next packet boundary) and the
/// error is returned for the caller to count against its bad-packet
/// policy.
#[derive(Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Appends freshly-read bytes to the reassembly buffer.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Bytes currently buffered and not yet consumed.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Pops the next complete packet, if one is buffered.
    ///
    /// Returns `Ok(None)` when more input is needed. Returns an error on
    /// a bad signature or oversized declaration, after which the buffer
    /// is empty.
    pub fn next_packet(&mut self) -> ProtocolResult<Option<Packet>> {
        if self.buf.len() < PACKET_HEADER_LEN {
            return Ok(None);
        }

        let signature = u16::from_be_bytes([self.buf[0], self.buf[1]]);
        if signature != PACKET_SIGNATURE {
            self.buf.clear();
            return Err(ProtocolError::BadSignature { found: signature });
        }

        let peer_id = u16::from_be_bytes([self.buf[2], self.buf[3]]);
        let crc = u32::from_be_bytes([self.buf[4], self.buf[5], self.buf[6], self.buf[7]]);
        let length = u32::from_be_bytes([self.buf[8], self.buf[9], self.buf[10], self.buf[11]]);

        if length as usize > MAX_PACKET_PAYLOAD {
            self.buf.clear();
            return Err(ProtocolError::OversizedPacket {
                length: length as usize,
                max: MAX_PACKET_PAYLOAD,
            });
        }

        let total = PACKET_HEADER_LEN + length as usize;
        if self.buf.len() < total {
            return Ok(None);
        }

        let payload = self.buf[PACKET_HEADER_LEN..total].to_vec();
        self.buf.drain(..total);

        Ok(Some(Packet {
            header: PacketHeader { peer_id, crc, length },
            payload,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_packet_round_trip() {
        let payload = vec![1u8, 2, 3, 4, 5];
        let bytes = encode_packet(7, &payload);

        let mut decoder = FrameDecoder::new();
        decoder.extend(&bytes);
        let packet = decoder.next_packet().unwrap().unwrap();
        assert_eq!(packet.header.peer_id, 7);
        assert_eq!(packet.header.length, 5);
        assert_eq!(packet.payload, payload);
        assert!(decoder.next_packet().unwrap().is_none());
    }

    #[test]
    fn partial_delivery_waits_for_the_rest() {
        let bytes = encode_packet(1, &[0xaa; 32]);
        let mut decoder = FrameDecoder::new();

        decoder.extend(&bytes[..10]);
        assert!(decoder.next_packet().unwrap().is_none());

        decoder.extend(&bytes[10..20]);
        assert!(decoder.next_packet().unwrap().is_none());

        decoder.extend(&bytes[20..]);
        let packet = decoder.next_packet().unwrap().unwrap();
        assert_eq!(packet.payload.len(), 32);
    }

    #[test]
    fn multiple_packets_in_one_read() {
        let mut stream = encode_packet(1, b"first");
        stream.extend_from_slice(&encode_packet(1, b"second"));
        stream.extend_from_slice(&encode_packet(1, b""));

        let mut decoder = FrameDecoder::new();
        decoder.extend(&stream);

        assert_eq!(decoder.next_packet().unwrap().unwrap().payload, b"first");
        assert_eq!(decoder.next_packet().unwrap().unwrap().payload, b"second");
        assert_eq!(decoder.next_packet().unwrap().unwrap().payload, b"");
        assert!(decoder.next_packet().unwrap().is_none());
    }

    #[test]
    fn bad_signature_discards_buffer() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(&[0u8; 16]);
        let err = decoder.next_packet().unwrap_err();
        assert!(matches!(err, ProtocolError::BadSignature { found: 0 }));
        assert_eq!(decoder.buffered(), 0);

        // A good packet afterwards still decodes.
        decoder.extend(&encode_packet(3, b"ok"));
        assert_eq!(decoder.next_packet().unwrap().unwrap().payload, b"ok");
    }

    #[test]
    fn oversized_declaration_is_rejected() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&PACKET_SIGNATURE.to_be_bytes());
        bytes.extend_from_slice(&1u16.to_be_bytes());
        bytes.extend_from_slice(&0u32.to_be_bytes());
        bytes.extend_from_slice(&(MAX_PACKET_PAYLOAD as u32 + 1).to_be_bytes());

        let mut decoder = FrameDecoder::new();
        decoder.extend(&bytes);
        let err = decoder.next_packet().unwrap_err();
        assert!(matches!(err, ProtocolError::OversizedPacket { .. }));
    }
}
