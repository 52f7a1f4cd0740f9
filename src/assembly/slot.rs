use crate::assembly::LineLayout;
use crate::wire::datagram::{fragment_chunk_len, fragment_offset, SlotWrite, FRAGMENTS_PER_LINE, PIXELS_PER_LINE};

const FULL_FRAGMENT_MASK: u8 = (1 << FRAGMENTS_PER_LINE) - 1;

/// Result of applying a packet payload to a line slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Payload stored; line not yet complete (or already was).
    Progress,
    /// Payload stored and the line transitioned to complete.
    Completed,
    /// The addressed fragment bit was already set. Not an error: the sender
    /// has wrapped to a new frame, and the caller must flush and reset before
    /// re-applying this payload.
    Duplicate,
}

#[derive(Debug)]
enum Progress {
    Whole { received: bool },
    Fragments { mask: u8 },
    Pixels { received: Box<[bool]> },
}

/// One of the 105 ordered slots of the in-progress frame. The payload buffer
/// is allocated to the layout's exact per-line byte count; partial writes land
/// only in their designated offset range.
#[derive(Debug)]
pub struct LineSlot {
    buf: Vec<u8>,
    progress: Progress,
}

impl LineSlot {
    pub fn new(layout: LineLayout) -> Self {
        let progress = match layout {
            LineLayout::WholeLine => Progress::Whole { received: false },
            LineLayout::Fragmented => Progress::Fragments { mask: 0 },
            LineLayout::PixelStream => Progress::Pixels { received: vec![false; PIXELS_PER_LINE].into_boxed_slice() },
        };
        Self { buf: vec![0u8; layout.line_bytes()], progress }
    }

    pub fn apply(&mut self, write: SlotWrite, payload: &[u8]) -> ApplyOutcome {
        match (&mut self.progress, write) {
            (Progress::Whole { received }, SlotWrite::WholeLine) => {
                debug_assert_eq!(payload.len(), self.buf.len());
                self.buf.copy_from_slice(payload);
                // Re-delivery of the same line overwrites in place; only a PSN
                // decrease signals a new frame on the serial path.
                if *received {
                    ApplyOutcome::Progress
                } else {
                    *received = true;
                    ApplyOutcome::Completed
                }
            }
            (Progress::Fragments { mask }, SlotWrite::Fragment { index }) => {
                let bit = 1u8 << index;
                if *mask & bit != 0 {
                    return ApplyOutcome::Duplicate;
                }
                let offset = fragment_offset(index);
                debug_assert_eq!(payload.len(), fragment_chunk_len(index));
                self.buf[offset..offset + payload.len()].copy_from_slice(payload);
                *mask |= bit;
                if *mask == FULL_FRAGMENT_MASK {
                    ApplyOutcome::Completed
                } else {
                    ApplyOutcome::Progress
                }
            }
            (Progress::Pixels { received }, SlotWrite::Pixel { coordinate }) => {
                let idx = coordinate as usize;
                let offset = idx * 3;
                self.buf[offset..offset + payload.len()].copy_from_slice(payload);
                let first = !received[idx];
                received[idx] = true;
                // Completion sentinel: the highest-coordinate pixel in raster
                // order. Cheaper than counting every flag; a lost sentinel
                // stalls the line and a lost interior pixel goes undetected —
                // the accepted trade-off for this wire.
                if first && idx == PIXELS_PER_LINE - 1 {
                    ApplyOutcome::Completed
                } else {
                    ApplyOutcome::Progress
                }
            }
            _ => {
                debug_assert!(false, "slot write does not match layout");
                ApplyOutcome::Progress
            }
        }
    }

    pub fn is_complete(&self) -> bool {
        match &self.progress {
            Progress::Whole { received } => *received,
            Progress::Fragments { mask } => *mask == FULL_FRAGMENT_MASK,
            Progress::Pixels { received } => received[PIXELS_PER_LINE - 1],
        }
    }

    pub fn is_empty(&self) -> bool {
        match &self.progress {
            Progress::Whole { received } => !*received,
            Progress::Fragments { mask } => *mask == 0,
            Progress::Pixels { received } => !received.iter().any(|r| *r),
        }
    }

    /// Takes the payload buffer for frame hand-off, leaving the slot spent.
    pub(crate) fn take_buf(self) -> Vec<u8> {
        self.buf
    }

    pub fn bytes(&self) -> &[u8] {
        &self.buf
    }
}
