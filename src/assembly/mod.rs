pub mod slot;
pub mod state;

pub use slot::{ApplyOutcome, LineSlot};
pub use state::{LineState, ReassemblyState};

use crate::config::WireMode;
use crate::wire::{datagram, serial, FlushReason, TOTAL_LINES};

/// Per-line accumulation scheme. The serial path carries a whole line per
/// framed packet; the datagram path follows the active [`WireMode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineLayout {
    WholeLine,
    Fragmented,
    PixelStream,
}

impl LineLayout {
    pub fn from_wire_mode(mode: WireMode) -> Self {
        match mode {
            WireMode::LineFragmented => LineLayout::Fragmented,
            WireMode::PixelIncremental => LineLayout::PixelStream,
        }
    }

    /// Exact payload bytes per line. Slot buffers are allocated to this size
    /// and partial writes only ever touch their designated offset range.
    pub fn line_bytes(self) -> usize {
        match self {
            LineLayout::WholeLine => serial::LINE_BYTES,
            LineLayout::Fragmented => datagram::FRAG_LINE_BYTES,
            LineLayout::PixelStream => datagram::PIXELS_PER_LINE * datagram::PIXEL_PAYLOAD_LEN,
        }
    }

    pub fn samples_per_line(self) -> usize {
        self.line_bytes() / 3
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LineLayout::WholeLine => "whole_line",
            LineLayout::Fragmented => "fragmented",
            LineLayout::PixelStream => "pixel_stream",
        }
    }
}

/// An assembled 105-line grid handed off to consumers. Immutable after
/// hand-off; lines that never completed before a forced flush keep whatever
/// partial bytes arrived, zero-filled elsewhere.
#[derive(Debug, Clone)]
pub struct Frame {
    layout: LineLayout,
    data: Vec<u8>,
    complete: Vec<bool>,
    completed_lines: usize,
    reason: FlushReason,
}

impl Frame {
    pub(crate) fn new(
        layout: LineLayout,
        data: Vec<u8>,
        complete: Vec<bool>,
        completed_lines: usize,
        reason: FlushReason,
    ) -> Self {
        debug_assert_eq!(data.len(), layout.line_bytes() * TOTAL_LINES);
        debug_assert_eq!(complete.len(), TOTAL_LINES);
        Self { layout, data, complete, completed_lines, reason }
    }

    pub fn layout(&self) -> LineLayout {
        self.layout
    }

    pub fn reason(&self) -> FlushReason {
        self.reason
    }

    pub fn completed_lines(&self) -> usize {
        self.completed_lines
    }

    pub fn is_complete(&self) -> bool {
        self.completed_lines == TOTAL_LINES
    }

    pub fn line_complete(&self, psn: u8) -> bool {
        self.complete.get(psn as usize).copied().unwrap_or(false)
    }

    /// Payload bytes of one line.
    pub fn line(&self, psn: u8) -> &[u8] {
        let stride = self.layout.line_bytes();
        let start = psn as usize * stride;
        &self.data[start..start + stride]
    }

    /// The whole grid, line-major.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Reduces each 3-byte channel sample to its average, sample-major
    /// (`gray[sample * TOTAL_LINES + line]`), the orientation the original
    /// viewer renders.
    pub fn to_gray(&self) -> Vec<u8> {
        let samples = self.layout.samples_per_line();
        let mut gray = vec![0u8; samples * TOTAL_LINES];
        for line in 0..TOTAL_LINES {
            let row = self.line(line as u8);
            for sample in 0..samples {
                let r = row[sample * 3] as u16;
                let g = row[sample * 3 + 1] as u16;
                let b = row[sample * 3 + 2] as u16;
                gray[sample * TOTAL_LINES + line] = ((r + g + b) / 3) as u8;
            }
        }
        gray
    }
}
