use crate::checksum::ChecksumMode;
use std::{net::SocketAddr, time::Duration};

/// Active datagram wire-format variant. Fixes packet layout, payload size and
/// the line-completion test; threaded through constructors rather than read
/// from shared state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireMode {
    /// A line is split across 4 indexed fragments sharing one PSN.
    LineFragmented,
    /// A line arrives as many single-pixel packets with absolute coordinates.
    PixelIncremental,
}

impl WireMode {
    pub fn as_str(self) -> &'static str {
        match self {
            WireMode::LineFragmented => "line_fragmented",
            WireMode::PixelIncremental => "pixel_incremental",
        }
    }
}

/// Serial link parameters for the byte-stream transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialConfig {
    pub path: String,
    pub baud: u32,
}

#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub enable: bool,
    /// UDP listen address for the datagram transport.
    pub listen: Option<SocketAddr>,
    /// Serial device for the byte-stream transport. Takes precedence over
    /// `listen` when both are set.
    pub serial: Option<SerialConfig>,
    pub allow_non_local_bind: bool,
    pub mode: WireMode,
    /// Sub-variant: fragmented datagrams carry a trailing 2-byte checksum.
    pub datagram_checksum: bool,
    pub checksum: ChecksumMode,
    /// Raw-packet queue bound. Arrivals beyond it are dropped and counted.
    pub queue_capacity: usize,
    /// Consumer drain batch per yield cycle.
    pub batch_size: usize,
    /// A partial frame older than this is force-flushed by the consumer sweep.
    pub frame_ttl: Duration,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            enable: true,
            listen: None,
            serial: None,
            allow_non_local_bind: false,
            mode: WireMode::LineFragmented,
            datagram_checksum: false,
            checksum: ChecksumMode::default(),
            queue_capacity: 1024,
            batch_size: 32,
            frame_ttl: Duration::from_secs(5),
        }
    }
}

impl IngestConfig {
    pub fn bind_target(&self) -> BindTarget {
        if let Some(serial) = self.serial.clone() {
            BindTarget::Serial(serial)
        } else if let Some(addr) = self.listen {
            BindTarget::Udp(addr)
        } else {
            BindTarget::Disabled
        }
    }

    pub fn initially_enabled(&self) -> bool {
        self.enable
    }
}

#[derive(Debug, Clone)]
pub enum BindTarget {
    Disabled,
    Udp(SocketAddr),
    Serial(SerialConfig),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serial_takes_precedence() {
        let mut cfg = IngestConfig {
            listen: Some("127.0.0.1:0".parse().expect("addr")),
            ..Default::default()
        };
        assert!(matches!(cfg.bind_target(), BindTarget::Udp(_)));
        cfg.serial = Some(SerialConfig { path: "/dev/ttyUSB0".into(), baud: 115_200 });
        assert!(matches!(cfg.bind_target(), BindTarget::Serial(_)));
        cfg.serial = None;
        cfg.listen = None;
        assert!(matches!(cfg.bind_target(), BindTarget::Disabled));
    }
}
