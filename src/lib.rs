pub mod assembly;
pub mod checksum;
pub mod config;
pub mod fixtures;
pub mod metrics;
pub mod service;
pub mod store;
pub mod task;
pub mod wire;

pub use assembly::{Frame, LineLayout, ReassemblyState};
pub use checksum::ChecksumMode;
pub use config::{BindTarget, IngestConfig, SerialConfig, WireMode};
pub use metrics::IngestMetrics;
pub use service::{IngestError, IngestService, IngestSnapshot, PacketSource, RawPacket};
pub use store::FrameStore;
pub use wire::{DropEvent, DropReason, FlushReason, TOTAL_LINES};
