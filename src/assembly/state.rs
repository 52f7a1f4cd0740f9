use crate::assembly::{ApplyOutcome, Frame, LineLayout, LineSlot};
use crate::wire::{datagram::SlotWrite, FlushReason, TOTAL_LINES};
use parking_lot::Mutex;
use std::time::{Duration, Instant};

/// Coarse per-line view, mainly for inspection and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineState {
    Empty,
    Partial,
    Complete,
}

/// Frame-scoped accumulation shared between the transport-facing producer and
/// the synchronizer. Owns its lock: callers get atomic apply / sweep / reset
/// operations and never touch the slot map directly. The whole
/// check-duplicate → write-payload → mark-progress → test-completion cycle
/// runs under one lock acquisition so two packets for the same slot cannot
/// interleave into an inconsistent mask.
#[derive(Debug)]
pub struct ReassemblyState {
    layout: LineLayout,
    inner: Mutex<Inner>,
}

#[derive(Debug)]
struct Inner {
    slots: Vec<Option<LineSlot>>,
    completed_lines: usize,
    last_psn: Option<u8>,
    first_packet_at: Option<Instant>,
}

impl Inner {
    fn new() -> Self {
        Self { slots: (0..TOTAL_LINES).map(|_| None).collect(), completed_lines: 0, last_psn: None, first_packet_at: None }
    }

    fn is_empty(&self) -> bool {
        self.slots.iter().all(|slot| slot.as_ref().map_or(true, |s| s.is_empty()))
    }

    fn apply_to_slot(&mut self, layout: LineLayout, psn: u8, write: SlotWrite, payload: &[u8], now: Instant) -> ApplyOutcome {
        self.first_packet_at.get_or_insert(now);
        let slot = self.slots[psn as usize].get_or_insert_with(|| LineSlot::new(layout));
        let outcome = slot.apply(write, payload);
        match outcome {
            ApplyOutcome::Completed => {
                self.completed_lines += 1;
                self.last_psn = Some(psn);
            }
            ApplyOutcome::Progress => self.last_psn = Some(psn),
            // Duplicate: state untouched, the caller flushes and re-applies.
            ApplyOutcome::Duplicate => {}
        }
        outcome
    }

    /// Hands off the accumulated grid as a [`Frame`] and resets to empty.
    /// Never-completed lines carry whatever partial bytes arrived, zero-filled
    /// elsewhere: availability over completeness.
    fn flush(&mut self, layout: LineLayout, reason: FlushReason) -> Frame {
        let stride = layout.line_bytes();
        let mut data = vec![0u8; stride * TOTAL_LINES];
        let mut complete = vec![false; TOTAL_LINES];
        let slots = std::mem::replace(&mut self.slots, (0..TOTAL_LINES).map(|_| None).collect());
        for (psn, slot) in slots.into_iter().enumerate() {
            if let Some(slot) = slot {
                complete[psn] = slot.is_complete();
                let start = psn * stride;
                data[start..start + stride].copy_from_slice(&slot.take_buf());
            }
        }
        let completed_lines = self.completed_lines;
        self.completed_lines = 0;
        self.last_psn = None;
        self.first_packet_at = None;
        Frame::new(layout, data, complete, completed_lines, reason)
    }
}

impl ReassemblyState {
    pub fn new(layout: LineLayout) -> Self {
        Self { layout, inner: Mutex::new(Inner::new()) }
    }

    pub fn layout(&self) -> LineLayout {
        self.layout
    }

    /// Applies one classified packet. Returns a flushed [`Frame`] when this
    /// packet closed a frame boundary:
    ///
    /// - all 105 lines complete (`FlushReason::Complete`), the packet included;
    /// - a duplicate fragment (`FlushReason::DuplicateFragment`) — the partial
    ///   frame is flushed, state reset, and the packet applied to fresh state;
    /// - on the whole-line (serial) path, a PSN lower than the previous one
    ///   (`FlushReason::SequenceRollback`) — flushed before the packet is
    ///   applied, since serial ordering is monotonic within a frame.
    pub fn apply(&self, psn: u8, write: SlotWrite, payload: &[u8], now: Instant) -> Option<Frame> {
        debug_assert!((psn as usize) < TOTAL_LINES);
        let mut inner = self.inner.lock();

        let mut flushed = None;
        if matches!(write, SlotWrite::WholeLine) {
            if let Some(last) = inner.last_psn {
                if psn < last {
                    flushed = Some(inner.flush(self.layout, FlushReason::SequenceRollback));
                }
            }
        }

        if inner.apply_to_slot(self.layout, psn, write, payload, now) == ApplyOutcome::Duplicate {
            flushed = Some(inner.flush(self.layout, FlushReason::DuplicateFragment));
            let outcome = inner.apply_to_slot(self.layout, psn, write, payload, now);
            debug_assert_ne!(outcome, ApplyOutcome::Duplicate);
        }

        if flushed.is_none() && inner.completed_lines == TOTAL_LINES {
            flushed = Some(inner.flush(self.layout, FlushReason::Complete));
        }
        flushed
    }

    /// Force-flushes a stalled partial frame once it outlives `ttl`. The timer
    /// starts at the first packet of the frame and clears on every flush.
    pub fn sweep_expired(&self, now: Instant, ttl: Duration) -> Option<Frame> {
        let mut inner = self.inner.lock();
        let started = inner.first_packet_at?;
        if now.saturating_duration_since(started) < ttl {
            return None;
        }
        Some(inner.flush(self.layout, FlushReason::Expired))
    }

    /// Clears all accumulation. Idempotent.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        *inner = Inner::new();
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn completed_lines(&self) -> usize {
        self.inner.lock().completed_lines
    }

    pub fn line_state(&self, psn: u8) -> LineState {
        let inner = self.inner.lock();
        match inner.slots[psn as usize].as_ref() {
            None => LineState::Empty,
            Some(slot) if slot.is_complete() => LineState::Complete,
            Some(slot) if slot.is_empty() => LineState::Empty,
            Some(_) => LineState::Partial,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::datagram::{fragment_chunk_len, FRAGMENTS_PER_LINE};

    fn chunk(index: u8, fill: u8) -> Vec<u8> {
        vec![fill; fragment_chunk_len(index)]
    }

    fn complete_line(state: &ReassemblyState, psn: u8, now: Instant) -> Option<Frame> {
        let mut flushed = None;
        for index in 0..FRAGMENTS_PER_LINE as u8 {
            flushed = state.apply(psn, SlotWrite::Fragment { index }, &chunk(index, psn), now);
        }
        flushed
    }

    #[test]
    fn all_lines_complete_emits_one_frame() {
        let state = ReassemblyState::new(LineLayout::Fragmented);
        let now = Instant::now();
        let mut frames = 0;
        let mut last = None;
        for psn in 0..TOTAL_LINES as u8 {
            if let Some(frame) = complete_line(&state, psn, now) {
                frames += 1;
                last = Some(frame);
            }
        }
        assert_eq!(frames, 1);
        let frame = last.expect("frame");
        assert!(frame.is_complete());
        assert_eq!(frame.reason(), FlushReason::Complete);
        assert_eq!(frame.line(17)[0], 17);
        assert!(state.is_empty());
    }

    #[test]
    fn duplicate_fragment_flushes_and_reapplies() {
        let state = ReassemblyState::new(LineLayout::Fragmented);
        let now = Instant::now();
        for psn in 0..5u8 {
            assert!(complete_line(&state, psn, now).is_none());
        }
        assert!(state.apply(5, SlotWrite::Fragment { index: 2 }, &chunk(2, 0xAA), now).is_none());
        let frame =
            state.apply(5, SlotWrite::Fragment { index: 2 }, &chunk(2, 0xBB), now).expect("duplicate forces flush");
        assert_eq!(frame.reason(), FlushReason::DuplicateFragment);
        assert_eq!(frame.completed_lines(), 5);
        assert!(!frame.line_complete(5));
        assert!(frame.line_complete(4));
        // The duplicate landed in the fresh state.
        assert_eq!(state.line_state(5), LineState::Partial);
        assert_eq!(state.line_state(4), LineState::Empty);
    }

    #[test]
    fn whole_line_rollback_flushes_before_apply() {
        let state = ReassemblyState::new(LineLayout::WholeLine);
        let now = Instant::now();
        let line = vec![1u8; LineLayout::WholeLine.line_bytes()];
        assert!(state.apply(80, SlotWrite::WholeLine, &line, now).is_none());
        let frame = state.apply(3, SlotWrite::WholeLine, &line, now).expect("rollback flush");
        assert_eq!(frame.reason(), FlushReason::SequenceRollback);
        assert!(frame.line_complete(80));
        assert!(!frame.line_complete(3));
        assert_eq!(state.line_state(3), LineState::Complete);
        assert_eq!(state.line_state(80), LineState::Empty);
    }

    #[test]
    fn sweep_flushes_only_after_ttl() {
        let state = ReassemblyState::new(LineLayout::Fragmented);
        let start = Instant::now();
        state.apply(9, SlotWrite::Fragment { index: 0 }, &chunk(0, 1), start);
        let ttl = Duration::from_secs(5);
        assert!(state.sweep_expired(start + Duration::from_secs(1), ttl).is_none());
        let frame = state.sweep_expired(start + ttl, ttl).expect("expired flush");
        assert_eq!(frame.reason(), FlushReason::Expired);
        assert!(state.sweep_expired(start + ttl, ttl).is_none());
    }

    #[test]
    fn reset_leaves_no_stale_bits() {
        let state = ReassemblyState::new(LineLayout::Fragmented);
        let now = Instant::now();
        complete_line(&state, 0, now);
        state.apply(1, SlotWrite::Fragment { index: 1 }, &chunk(1, 2), now);
        state.reset();
        for psn in 0..TOTAL_LINES as u8 {
            assert_eq!(state.line_state(psn), LineState::Empty);
        }
        assert_eq!(state.completed_lines(), 0);
        // A frame after reset needs all four fragments of a line again.
        assert!(state.apply(1, SlotWrite::Fragment { index: 1 }, &chunk(1, 3), now).is_none());
        assert_eq!(state.line_state(1), LineState::Partial);
    }
}
