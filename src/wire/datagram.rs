use crate::config::WireMode;
use crate::wire::{DropReason, WireError, TOTAL_LINES};

/// Fragments per line in `LineFragmented` mode.
pub const FRAGMENTS_PER_LINE: usize = 4;
/// Channel samples per fragmented line; each sample is 3 bytes.
pub const FRAG_SAMPLES_PER_LINE: usize = 1560;
/// Payload bytes per fragmented line.
pub const FRAG_LINE_BYTES: usize = FRAG_SAMPLES_PER_LINE * 3;
/// Chunk carried by fragments 0..=2; fragment 3 carries the shorter remainder.
pub const FRAG_CHUNK: usize = 1200;
/// Remainder carried by the final fragment.
pub const FRAG_LAST_CHUNK: usize = FRAG_LINE_BYTES - (FRAGMENTS_PER_LINE - 1) * FRAG_CHUNK;
/// Fragment-index byte + PSN byte.
pub const FRAG_HEADER_LEN: usize = 2;

/// Pixels per line in `PixelIncremental` mode.
pub const PIXELS_PER_LINE: usize = 520;
/// Bytes per pixel payload.
pub const PIXEL_PAYLOAD_LEN: usize = 3;
/// Coordinate (LE u16) + PSN byte.
pub const PIXEL_HEADER_LEN: usize = 3;
/// Fixed pixel datagram size.
pub const PIXEL_DATAGRAM_LEN: usize = PIXEL_HEADER_LEN + PIXEL_PAYLOAD_LEN;

/// Payload bytes a given fragment index carries.
pub fn fragment_chunk_len(index: u8) -> usize {
    if index as usize == FRAGMENTS_PER_LINE - 1 {
        FRAG_LAST_CHUNK
    } else {
        FRAG_CHUNK
    }
}

/// Byte offset of a fragment's payload within its line buffer.
pub fn fragment_offset(index: u8) -> usize {
    index as usize * FRAG_CHUNK
}

/// Expected datagram size for a fragment, with or without the trailing
/// checksum sub-variant.
pub fn fragment_datagram_len(index: u8, trailing_checksum: bool) -> usize {
    FRAG_HEADER_LEN + fragment_chunk_len(index) + if trailing_checksum { 2 } else { 0 }
}

/// Where a packet's payload lands within its line slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotWrite {
    /// Serial path: the packet carries the whole line.
    WholeLine,
    /// `LineFragmented`: one of four chunks, addressed by index.
    Fragment { index: u8 },
    /// `PixelIncremental`: a single pixel, addressed by coordinate.
    Pixel { coordinate: u16 },
}

/// Classifier output: header fields plus the payload slice. Borrows from the
/// datagram; does not outlive the reassembly step that consumes it.
#[derive(Debug)]
pub struct ParsedDatagram<'a> {
    pub psn: u8,
    pub write: SlotWrite,
    pub payload: &'a [u8],
    pub checksum: Option<u16>,
}

impl<'a> ParsedDatagram<'a> {
    /// Mode-aware classification. Pure: no side effects, rejection by reason.
    /// The two layouts place the PSN and the fragment/pixel address at
    /// different offsets and use different payload sizes.
    pub fn parse(buf: &'a [u8], mode: WireMode, trailing_checksum: bool) -> Result<Self, WireError> {
        match mode {
            WireMode::LineFragmented => Self::parse_fragment(buf, trailing_checksum),
            WireMode::PixelIncremental => Self::parse_pixel(buf),
        }
    }

    fn parse_fragment(buf: &'a [u8], trailing_checksum: bool) -> Result<Self, WireError> {
        if buf.len() < FRAG_HEADER_LEN {
            return Err(WireError::new(DropReason::Truncated, "short_fragment"));
        }
        let index = buf[0];
        let psn = buf[1];
        if index as usize >= FRAGMENTS_PER_LINE {
            return Err(WireError::new(DropReason::FragmentIndex, "fragment_index_out_of_range").with_psn(psn));
        }
        if psn as usize >= TOTAL_LINES {
            return Err(WireError::new(DropReason::Sequence, "psn_out_of_range").with_psn(psn));
        }
        if buf.len() != fragment_datagram_len(index, trailing_checksum) {
            return Err(WireError::new(DropReason::Truncated, "bad_fragment_len").with_psn(psn));
        }
        let payload_end = FRAG_HEADER_LEN + fragment_chunk_len(index);
        let checksum = trailing_checksum.then(|| u16::from_le_bytes([buf[payload_end], buf[payload_end + 1]]));
        Ok(Self { psn, write: SlotWrite::Fragment { index }, payload: &buf[FRAG_HEADER_LEN..payload_end], checksum })
    }

    fn parse_pixel(buf: &'a [u8]) -> Result<Self, WireError> {
        if buf.len() != PIXEL_DATAGRAM_LEN {
            return Err(WireError::new(DropReason::Truncated, "bad_pixel_len"));
        }
        let coordinate = u16::from_le_bytes([buf[0], buf[1]]);
        let psn = buf[2];
        if coordinate as usize >= PIXELS_PER_LINE {
            return Err(WireError::new(DropReason::PixelCoordinate, "pixel_out_of_range").with_psn(psn));
        }
        if psn as usize >= TOTAL_LINES {
            return Err(WireError::new(DropReason::Sequence, "psn_out_of_range").with_psn(psn));
        }
        Ok(Self { psn, write: SlotWrite::Pixel { coordinate }, payload: &buf[PIXEL_HEADER_LEN..], checksum: None })
    }

    /// Bytes covered by the trailing checksum, when the sub-variant carries one.
    pub fn checksum_covered(buf: &'a [u8]) -> &'a [u8] {
        &buf[..buf.len().saturating_sub(2)]
    }
}
