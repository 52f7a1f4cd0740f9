pub mod datagram;
pub mod serial;

pub use datagram::{ParsedDatagram, SlotWrite};
pub use serial::{SerialFramer, SerialPacket};

/// Lines per frame. Line-sequence numbers (PSN) run 0..=104 and recur every frame.
pub const TOTAL_LINES: usize = 105;

/// Reasons a packet never reaches the reassembly state. Exposed via metrics and
/// structured logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DropReason {
    /// Packet length does not match the active mode's fixed size.
    Truncated,
    /// Declared-length field disagrees with the known packet size.
    DeclaredLen,
    /// Line-sequence number outside 0..=104.
    Sequence,
    /// Fragment index outside 0..=3.
    FragmentIndex,
    /// Pixel coordinate outside 0..=519.
    PixelCoordinate,
    /// Raw-packet queue was full when the transport tried to enqueue.
    QueueFull,
}

impl DropReason {
    pub const ALL: [DropReason; 6] = [
        DropReason::Truncated,
        DropReason::DeclaredLen,
        DropReason::Sequence,
        DropReason::FragmentIndex,
        DropReason::PixelCoordinate,
        DropReason::QueueFull,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DropReason::Truncated => "truncated",
            DropReason::DeclaredLen => "declared_len",
            DropReason::Sequence => "sequence",
            DropReason::FragmentIndex => "fragment_index",
            DropReason::PixelCoordinate => "pixel_coordinate",
            DropReason::QueueFull => "queue_full",
        }
    }

    pub fn index(self) -> usize {
        match self {
            DropReason::Truncated => 0,
            DropReason::DeclaredLen => 1,
            DropReason::Sequence => 2,
            DropReason::FragmentIndex => 3,
            DropReason::PixelCoordinate => 4,
            DropReason::QueueFull => 5,
        }
    }
}

/// Lightweight description of a dropped packet, including the PSN when the
/// header parsed far enough to know it.
#[derive(Debug, Clone, Copy)]
pub struct DropEvent {
    pub reason: DropReason,
    pub psn: Option<u8>,
    pub bytes: usize,
}

impl DropEvent {
    pub fn new(reason: DropReason, psn: Option<u8>, bytes: usize) -> Self {
        Self { reason, psn, bytes }
    }
}

/// Why a frame was handed off. `Complete` is the explicit boundary; the rest
/// are implicit boundary signals or policy flushes carrying a partial frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlushReason {
    Complete,
    DuplicateFragment,
    SequenceRollback,
    Expired,
}

impl FlushReason {
    pub const ALL: [FlushReason; 4] =
        [FlushReason::Complete, FlushReason::DuplicateFragment, FlushReason::SequenceRollback, FlushReason::Expired];

    pub fn as_str(self) -> &'static str {
        match self {
            FlushReason::Complete => "complete",
            FlushReason::DuplicateFragment => "duplicate_fragment",
            FlushReason::SequenceRollback => "sequence_rollback",
            FlushReason::Expired => "expired",
        }
    }

    pub fn index(self) -> usize {
        match self {
            FlushReason::Complete => 0,
            FlushReason::DuplicateFragment => 1,
            FlushReason::SequenceRollback => 2,
            FlushReason::Expired => 3,
        }
    }
}

/// Typed rejection from a wire parser.
#[derive(Debug, Clone, Copy)]
pub struct WireError {
    pub reason: DropReason,
    pub message: &'static str,
    pub psn: Option<u8>,
}

impl WireError {
    pub(crate) fn new(reason: DropReason, message: &'static str) -> Self {
        Self { reason, message, psn: None }
    }

    pub(crate) fn with_psn(mut self, psn: u8) -> Self {
        self.psn = Some(psn);
        self
    }

    pub fn drop_event(&self, bytes: usize) -> DropEvent {
        DropEvent::new(self.reason, self.psn, bytes)
    }
}
