//! Deterministic packet builders shared by tests, benches and demo feeds.
//! Scenarios mirror the sensor vendor's bring-up tool: a valid packet, a bad
//! declared-length field, a deliberately wrong checksum, and pure noise.

use crate::assembly::LineLayout;
use crate::checksum::ChecksumMode;
use crate::wire::datagram::{
    fragment_chunk_len, fragment_offset, FRAGMENTS_PER_LINE, FRAG_HEADER_LEN, PIXELS_PER_LINE, PIXEL_DATAGRAM_LEN,
};
use crate::wire::serial::{LINE_BYTES, PACKET_LEN, SYNC_MARKER};
use crate::wire::TOTAL_LINES;
use rand::{rngs::StdRng, Rng, SeedableRng};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    Valid,
    InvalidDeclaredLen,
    ChecksumMismatch,
    RandomFill,
}

/// Builds one framed serial packet carrying a whole line.
pub fn serial_packet(psn: u8, payload: &[u8], checksum: ChecksumMode, scenario: Scenario) -> Vec<u8> {
    assert_eq!(payload.len(), LINE_BYTES);
    let mut buf = vec![0u8; PACKET_LEN];
    buf[..2].copy_from_slice(&SYNC_MARKER);
    buf[2] = psn;
    buf[3..5].copy_from_slice(&(PACKET_LEN as u16).to_le_bytes());
    buf[5..5 + LINE_BYTES].copy_from_slice(payload);

    match scenario {
        Scenario::InvalidDeclaredLen => {
            buf[3..5].copy_from_slice(&0u16.to_le_bytes());
        }
        Scenario::ChecksumMismatch => {
            let sum = checksum.compute(&buf[..PACKET_LEN - 2]).wrapping_add(1);
            buf[PACKET_LEN - 2..].copy_from_slice(&sum.to_le_bytes());
            return buf;
        }
        Scenario::RandomFill => {
            let mut rng = StdRng::seed_from_u64(psn as u64 ^ 0x5AA5);
            rng.fill(&mut buf[..]);
            return buf;
        }
        Scenario::Valid => {}
    }

    let sum = checksum.compute(&buf[..PACKET_LEN - 2]);
    buf[PACKET_LEN - 2..].copy_from_slice(&sum.to_le_bytes());
    buf
}

/// Builds one `LineFragmented` datagram from a full line's bytes.
pub fn fragment_datagram(psn: u8, index: u8, line: &[u8], checksum: Option<ChecksumMode>) -> Vec<u8> {
    assert!((index as usize) < FRAGMENTS_PER_LINE);
    let chunk = fragment_chunk_len(index);
    let offset = fragment_offset(index);
    let mut buf = Vec::with_capacity(FRAG_HEADER_LEN + chunk + 2);
    buf.push(index);
    buf.push(psn);
    buf.extend_from_slice(&line[offset..offset + chunk]);
    if let Some(mode) = checksum {
        let sum = mode.compute(&buf);
        buf.extend_from_slice(&sum.to_le_bytes());
    }
    buf
}

/// Builds one `PixelIncremental` datagram.
pub fn pixel_datagram(psn: u8, coordinate: u16, sample: [u8; 3]) -> Vec<u8> {
    assert!((coordinate as usize) < PIXELS_PER_LINE);
    let mut buf = Vec::with_capacity(PIXEL_DATAGRAM_LEN);
    buf.extend_from_slice(&coordinate.to_le_bytes());
    buf.push(psn);
    buf.extend_from_slice(&sample);
    buf
}

/// A deterministic full source grid for the layout, line-major.
pub fn grid(layout: LineLayout, seed: u64) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut data = vec![0u8; layout.line_bytes() * TOTAL_LINES];
    rng.fill(&mut data[..]);
    data
}

/// Every wire packet needed to deliver `grid` as one frame, in raster order.
/// The grid must come from [`grid`] with the same layout.
pub fn frame_packets(layout: LineLayout, grid: &[u8], checksum: ChecksumMode, datagram_checksum: bool) -> Vec<Vec<u8>> {
    let stride = layout.line_bytes();
    let mut packets = Vec::new();
    for psn in 0..TOTAL_LINES as u8 {
        let line = &grid[psn as usize * stride..(psn as usize + 1) * stride];
        match layout {
            LineLayout::WholeLine => packets.push(serial_packet(psn, line, checksum, Scenario::Valid)),
            LineLayout::Fragmented => {
                let trailing = datagram_checksum.then_some(checksum);
                for index in 0..FRAGMENTS_PER_LINE as u8 {
                    packets.push(fragment_datagram(psn, index, line, trailing));
                }
            }
            LineLayout::PixelStream => {
                for coordinate in 0..PIXELS_PER_LINE as u16 {
                    let offset = coordinate as usize * 3;
                    let sample = [line[offset], line[offset + 1], line[offset + 2]];
                    packets.push(pixel_datagram(psn, coordinate, sample));
                }
            }
        }
    }
    packets
}

/// Hardware-free packet feed: successive frames of seeded noise in raster
/// order. Each frame's grid is returned alongside its packets so callers can
/// assert byte equality after reassembly.
#[derive(Debug)]
pub struct SimulatedSource {
    layout: LineLayout,
    checksum: ChecksumMode,
    datagram_checksum: bool,
    seed: u64,
    frames_emitted: u64,
}

impl SimulatedSource {
    pub fn new(layout: LineLayout, checksum: ChecksumMode, datagram_checksum: bool, seed: u64) -> Self {
        Self { layout, checksum, datagram_checksum, seed, frames_emitted: 0 }
    }

    pub fn frames_emitted(&self) -> u64 {
        self.frames_emitted
    }

    /// The next frame's source grid and the wire packets that deliver it.
    pub fn next_frame(&mut self) -> (Vec<u8>, Vec<Vec<u8>>) {
        let grid = grid(self.layout, self.seed.wrapping_add(self.frames_emitted));
        let packets = frame_packets(self.layout, &grid, self.checksum, self.datagram_checksum);
        self.frames_emitted += 1;
        (grid, packets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WireMode;
    use crate::wire::datagram::ParsedDatagram;
    use crate::wire::serial::SerialPacket;
    use bytes::Bytes;

    #[test]
    fn serial_fixture_parses_and_verifies() {
        let payload = vec![0xA5u8; LINE_BYTES];
        let built = serial_packet(3, &payload, ChecksumMode::SumOfBytes, Scenario::Valid);
        let packet = SerialPacket::parse(Bytes::from(built)).expect("parse");
        assert_eq!(packet.psn, 3);
        assert!(ChecksumMode::SumOfBytes.verify(packet.checksum_covered(), packet.checksum));

        let bad = serial_packet(3, &payload, ChecksumMode::SumOfBytes, Scenario::ChecksumMismatch);
        let packet = SerialPacket::parse(Bytes::from(bad)).expect("parse");
        assert!(!ChecksumMode::SumOfBytes.verify(packet.checksum_covered(), packet.checksum));
    }

    #[test]
    fn fragment_fixture_matches_classifier() {
        let source = grid(LineLayout::Fragmented, 1);
        let line = &source[..LineLayout::Fragmented.line_bytes()];
        let built = fragment_datagram(0, 3, line, Some(ChecksumMode::SumOfBytes));
        let parsed = ParsedDatagram::parse(&built, WireMode::LineFragmented, true).expect("parse");
        assert_eq!(parsed.psn, 0);
        let declared = parsed.checksum.expect("checksum present");
        assert!(ChecksumMode::SumOfBytes.verify(ParsedDatagram::checksum_covered(&built), declared));
    }

    #[test]
    fn simulated_source_frames_differ() {
        let mut source = SimulatedSource::new(LineLayout::WholeLine, ChecksumMode::SumOfBytes, false, 99);
        let (first, packets) = source.next_frame();
        let (second, _) = source.next_frame();
        assert_eq!(packets.len(), TOTAL_LINES);
        assert_ne!(first, second);
        assert_eq!(source.frames_emitted(), 2);
    }

    #[test]
    fn frame_packet_counts_per_layout() {
        let source = grid(LineLayout::PixelStream, 2);
        let packets = frame_packets(LineLayout::PixelStream, &source, ChecksumMode::Disabled, false);
        assert_eq!(packets.len(), TOTAL_LINES * PIXELS_PER_LINE);
        let source = grid(LineLayout::Fragmented, 2);
        let packets = frame_packets(LineLayout::Fragmented, &source, ChecksumMode::Disabled, false);
        assert_eq!(packets.len(), TOTAL_LINES * FRAGMENTS_PER_LINE);
    }
}
