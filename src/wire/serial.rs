use crate::wire::{DropReason, WireError, TOTAL_LINES};
use bytes::{Bytes, BytesMut};

/// Two-byte synchronization marker opening every framed serial packet.
pub const SYNC_MARKER: [u8; 2] = [0x55, 0xAA];
/// Channel samples carried per serial line; each sample is 3 bytes.
pub const SAMPLES_PER_LINE: usize = 576;
/// Payload bytes per serial line.
pub const LINE_BYTES: usize = SAMPLES_PER_LINE * 3;
/// Total framed packet size: marker + PSN + declared length + payload + checksum.
pub const PACKET_LEN: usize = 2 + 1 + 2 + LINE_BYTES + 2;

const PSN_OFFSET: usize = 2;
const LEN_OFFSET: usize = 3;
const PAYLOAD_OFFSET: usize = 5;
const CHECKSUM_OFFSET: usize = PAYLOAD_OFFSET + LINE_BYTES;

/// Scans an accumulating byte buffer for framed packets.
///
/// A candidate starts wherever the marker matches; the declared-length field
/// must equal [`PACKET_LEN`] for the candidate to be emitted. On mismatch the
/// scan advances by one byte, not by a packet, since the marker can occur by
/// chance inside payload data and skipping a whole packet would desynchronize
/// permanently. Bytes too short to hold a candidate are retained for the next
/// read.
#[derive(Debug, Default)]
pub struct SerialFramer {
    buf: BytesMut,
    discarded: usize,
}

impl SerialFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends freshly received bytes to the scan buffer.
    pub fn feed(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Extracts the next complete packet, if any. Positions ruled out by a
    /// failed marker or declared-length check are discarded permanently; they
    /// cannot begin a packet no matter what arrives later.
    pub fn next_packet(&mut self) -> Option<Bytes> {
        let mut start = 0;
        while self.buf.len().saturating_sub(start) >= PACKET_LEN {
            let window = &self.buf[start..];
            if window[..2] == SYNC_MARKER {
                let declared = u16::from_le_bytes([window[LEN_OFFSET], window[LEN_OFFSET + 1]]) as usize;
                if declared == PACKET_LEN {
                    self.discarded += start;
                    let _ = self.buf.split_to(start);
                    return Some(self.buf.split_to(PACKET_LEN).freeze());
                }
            }
            start += 1;
        }
        self.discarded += start;
        let _ = self.buf.split_to(start);
        None
    }

    /// Bytes skipped during resynchronization since the last call.
    pub fn take_discarded(&mut self) -> usize {
        std::mem::take(&mut self.discarded)
    }

    /// Bytes currently buffered awaiting more data.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

/// A validated framed serial packet. Carries one whole line.
#[derive(Debug, Clone)]
pub struct SerialPacket {
    pub psn: u8,
    pub checksum: u16,
    packet: Bytes,
}

impl SerialPacket {
    /// Parses and validates a fixed-size candidate. The framer already checked
    /// marker and declared length for packets it emits; this re-validates so it
    /// holds as a pure classifier for any input.
    pub fn parse(packet: Bytes) -> Result<Self, WireError> {
        if packet.len() != PACKET_LEN {
            return Err(WireError::new(DropReason::Truncated, "bad_packet_len"));
        }
        if packet[..2] != SYNC_MARKER {
            return Err(WireError::new(DropReason::Truncated, "bad_marker"));
        }
        let psn = packet[PSN_OFFSET];
        let declared = u16::from_le_bytes([packet[LEN_OFFSET], packet[LEN_OFFSET + 1]]) as usize;
        if declared != PACKET_LEN {
            return Err(WireError::new(DropReason::DeclaredLen, "declared_len_mismatch").with_psn(psn));
        }
        if psn as usize >= TOTAL_LINES {
            return Err(WireError::new(DropReason::Sequence, "psn_out_of_range").with_psn(psn));
        }
        let checksum = u16::from_le_bytes([packet[CHECKSUM_OFFSET], packet[CHECKSUM_OFFSET + 1]]);
        Ok(Self { psn, checksum, packet })
    }

    /// The per-line ambient payload.
    pub fn payload(&self) -> Bytes {
        self.packet.slice(PAYLOAD_OFFSET..CHECKSUM_OFFSET)
    }

    /// Bytes covered by the trailing checksum (everything before it).
    pub fn checksum_covered(&self) -> &[u8] {
        &self.packet[..CHECKSUM_OFFSET]
    }
}
