use crate::{
    assembly::{Frame, LineLayout, ReassemblyState},
    checksum::ChecksumMode,
    config::{BindTarget, IngestConfig, WireMode},
    metrics::IngestMetrics,
    store::FrameStore,
    task::spawn_detached,
    wire::{
        datagram::{fragment_datagram_len, ParsedDatagram, SlotWrite, PIXEL_DATAGRAM_LEN},
        serial::{SerialFramer, SerialPacket, PACKET_LEN},
        DropEvent, DropReason, TOTAL_LINES,
    },
};
use bytes::Bytes;
use log::{debug, error, info, trace, warn};
use parking_lot::Mutex;
use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::{
    future::Future,
    net::SocketAddr,
    sync::Arc,
    time::{Duration, Instant},
};
use thiserror::Error;
use tokio::{
    net::UdpSocket,
    sync::{mpsc, watch},
    time::MissedTickBehavior,
};

const CHECKSUM_WARN_INTERVAL: Duration = Duration::from_secs(60);
const RESYNC_WARN_INTERVAL: Duration = Duration::from_secs(10);
const SERIAL_READ_TIMEOUT: Duration = Duration::from_millis(100);
const SERIAL_READ_BUF: usize = 4096;

/// One transport arrival, queued raw so the receive path never blocks on
/// reassembly. Serial packets arrive pre-framed; datagrams arrive as-is.
#[derive(Debug, Clone)]
pub struct RawPacket {
    pub data: Bytes,
    pub source: PacketSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketSource {
    Serial,
    Udp,
}

impl PacketSource {
    pub fn as_str(self) -> &'static str {
        match self {
            PacketSource::Serial => "serial",
            PacketSource::Udp => "udp",
        }
    }
}

/// The ingest pipeline: transport pump → bounded raw-packet queue → consumer
/// driving reassembly and publishing flushed frames to the [`FrameStore`].
///
/// The service binds exactly one transport per its config (serial taking
/// precedence), re-binding after transient receive errors until shutdown is
/// signalled. After shutdown the consumer drains the queue to empty before
/// exiting, so nothing already received is lost.
pub struct IngestService {
    config: IngestConfig,
    layout: LineLayout,
    metrics: Arc<IngestMetrics>,
    store: Arc<FrameStore>,
    state: Arc<ReassemblyState>,
    shutdown: watch::Sender<bool>,
    enabled_flag: AtomicBool,
    enabled_tx: watch::Sender<bool>,
    bound_addr: watch::Sender<Option<SocketAddr>>,
    tx: mpsc::Sender<RawPacket>,
    rx: Mutex<Option<mpsc::Receiver<RawPacket>>>,
    drop_logger: Arc<DropLogger>,
}

impl IngestService {
    pub const IDENT: &'static str = "frame-ingest";

    pub fn new(config: IngestConfig, metrics: Arc<IngestMetrics>, store: Arc<FrameStore>) -> Self {
        let initially_enabled = config.initially_enabled();
        let layout = match config.bind_target() {
            BindTarget::Serial(_) => LineLayout::WholeLine,
            _ => LineLayout::from_wire_mode(config.mode),
        };
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let (shutdown, _) = watch::channel(false);
        let (enabled_tx, _) = watch::channel(initially_enabled);
        let (bound_addr, _) = watch::channel(None);
        let drop_logger = Arc::new(DropLogger::new(metrics.clone()));
        Self {
            config,
            layout,
            metrics,
            store,
            state: Arc::new(ReassemblyState::new(layout)),
            shutdown,
            enabled_flag: AtomicBool::new(initially_enabled),
            enabled_tx,
            bound_addr,
            tx,
            rx: Mutex::new(Some(rx)),
            drop_logger,
        }
    }

    pub fn layout(&self) -> LineLayout {
        self.layout
    }

    pub fn store(&self) -> &Arc<FrameStore> {
        &self.store
    }

    /// The most recently handed-off frame, if any.
    pub fn latest_frame(&self) -> Option<Arc<Frame>> {
        self.store.latest()
    }

    /// The transport's actual bound address once a UDP listener is up. Useful
    /// when listening on an ephemeral port.
    pub fn bound_addr(&self) -> Option<SocketAddr> {
        *self.bound_addr.borrow()
    }

    pub fn subscribe_bound_addr(&self) -> watch::Receiver<Option<SocketAddr>> {
        self.bound_addr.subscribe()
    }

    /// Detaches the raw-packet receiver, e.g. to drive consumption manually.
    /// When taken before [`run`](Self::run), the service does not spawn its
    /// own consumer.
    pub fn take_packet_rx(&self) -> Option<mpsc::Receiver<RawPacket>> {
        self.rx.lock().take()
    }

    /// Invokes `handler` for every frame hand-off from now on.
    pub fn spawn_frame_consumer<F, Fut>(&self, mut handler: F)
    where
        F: FnMut(Arc<Frame>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut rx = self.store.subscribe();
        spawn_detached("frame-consumer", async move {
            while rx.changed().await.is_ok() {
                let frame = rx.borrow_and_update().clone();
                if let Some(frame) = frame {
                    handler(frame).await;
                }
            }
            trace!("ingest.event=frame_consumer_stopped");
        });
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled_flag.load(Ordering::SeqCst)
    }

    /// Flips the runtime enable toggle; returns the previous value. Disabling
    /// tears the transport down, re-enabling re-binds it.
    pub fn set_enabled(&self, enabled: bool) -> bool {
        let previous = self.enabled_flag.swap(enabled, Ordering::SeqCst);
        if previous != enabled {
            let _ = self.enabled_tx.send(enabled);
        }
        previous
    }

    pub fn snapshot(&self) -> IngestSnapshot {
        IngestSnapshot {
            enabled: self.is_enabled(),
            listen: self.config.listen,
            serial_path: self.config.serial.as_ref().map(|s| s.path.clone()),
            allow_non_local_bind: self.config.allow_non_local_bind,
            mode: self.config.mode,
            checksum: self.config.checksum,
            queue: QueueSnapshot {
                capacity: self.config.queue_capacity,
                depth: self.config.queue_capacity.saturating_sub(self.tx.capacity()),
            },
            frames: self.metrics.frames_snapshot(),
            drops: self.metrics.drops_snapshot(),
            packets_total: self.metrics.packets_total(),
            bytes_total: self.metrics.bytes_total(),
            checksum_flags_total: self.metrics.checksum_flags_total(),
            resync_bytes_total: self.metrics.resync_bytes_total(),
            last_frame_ts_ms: self.metrics.last_frame_ts_ms(),
        }
    }

    /// Runs the service until [`signal_exit`](Self::signal_exit).
    pub async fn run(self: &Arc<Self>) -> Result<(), IngestError> {
        let mut shutdown = self.shutdown.subscribe();
        let mut enabled_rx = self.enabled_tx.subscribe();
        let mut logged_disabled = false;

        if self.config.checksum.is_disabled() {
            warn!("ingest.event=checksum_disabled note=integrity_unverified");
        }
        self.spawn_consumer();

        loop {
            if *shutdown.borrow() {
                break;
            }
            if !self.is_enabled() {
                if !logged_disabled {
                    info!("ingest.event=disabled");
                    logged_disabled = true;
                }
                tokio::select! {
                    _ = shutdown.changed() => break,
                    changed = enabled_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        continue;
                    }
                }
            }

            logged_disabled = false;

            match self.bind_transport().await {
                Ok(BoundTransport::Udp(socket)) => {
                    let bind_desc = socket.local_addr().map(|a| a.to_string()).unwrap_or_else(|_| "unknown".to_string());
                    self.bound_addr.send_replace(socket.local_addr().ok());
                    info!("ingest.event=bind_ok kind=udp addr={bind_desc} mode={}", self.config.mode.as_str());
                    let mut pump_enabled = self.enabled_tx.subscribe();
                    self.pump_udp(socket, &mut shutdown, &mut pump_enabled).await;
                }
                Ok(BoundTransport::Serial(port)) => {
                    let path = self.config.serial.as_ref().map(|s| s.path.clone()).unwrap_or_else(|| "unknown".into());
                    info!("ingest.event=bind_ok kind=serial path={path}");
                    self.pump_serial(port).await;
                }
                Err(IngestError::NotConfigured) => {
                    warn!("ingest.event=bind_fail reason=not_configured");
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        changed = enabled_rx.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                    }
                }
                Err(err) => {
                    error!("ingest.event=bind_fail reason={err}");
                    return Err(err);
                }
            }
        }

        trace!("ingest.event=run_stopped");
        Ok(())
    }

    /// Requests shutdown. The consumer finishes draining queued packets first.
    pub fn signal_exit(&self) {
        let _ = self.shutdown.send(true);
    }

    async fn bind_transport(&self) -> Result<BoundTransport, IngestError> {
        match self.config.bind_target() {
            BindTarget::Disabled => Err(IngestError::NotConfigured),
            BindTarget::Udp(addr) => {
                self.ensure_loopback(addr)?;
                let socket = UdpSocket::bind(addr).await?;
                Ok(BoundTransport::Udp(socket))
            }
            BindTarget::Serial(serial) => {
                let port = serialport::new(serial.path.as_str(), serial.baud).timeout(SERIAL_READ_TIMEOUT).open()?;
                Ok(BoundTransport::Serial(port))
            }
        }
    }

    fn ensure_loopback(&self, addr: SocketAddr) -> Result<(), IngestError> {
        if self.config.allow_non_local_bind || addr.ip().is_loopback() {
            Ok(())
        } else {
            Err(IngestError::NonLocalBind(addr.to_string()))
        }
    }

    async fn pump_udp(
        &self,
        socket: UdpSocket,
        shutdown: &mut watch::Receiver<bool>,
        enabled_rx: &mut watch::Receiver<bool>,
    ) {
        let mut buf = vec![0u8; max_datagram_len()];
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                changed = enabled_rx.changed() => {
                    if changed.is_err() || !self.is_enabled() {
                        break;
                    }
                }
                result = socket.recv_from(&mut buf) => {
                    match result {
                        Ok((len, peer)) => {
                            trace!("ingest.event=packet kind=udp bytes={len} peer={peer}");
                            self.enqueue(Bytes::copy_from_slice(&buf[..len]), PacketSource::Udp);
                        }
                        Err(err) => {
                            warn!("ingest.event=recv_error kind=udp reason={err}");
                            break;
                        }
                    }
                }
            }
        }
        self.bound_addr.send_replace(None);
        info!("ingest.event=listener_stopped kind=udp");
    }

    /// Serial reads are blocking with a short timeout; the worker thread polls
    /// the shutdown and enable flags between reads.
    async fn pump_serial(self: &Arc<Self>, port: Box<dyn serialport::SerialPort>) {
        let service = Arc::clone(self);
        let shutdown = self.shutdown.subscribe();
        let enabled = self.enabled_tx.subscribe();
        let worker = tokio::task::spawn_blocking(move || service.read_serial(port, shutdown, enabled));
        if let Err(err) = worker.await {
            warn!("ingest.event=serial_worker_failed reason={err}");
        }
        info!("ingest.event=listener_stopped kind=serial");
    }

    fn read_serial(
        self: Arc<Self>,
        mut port: Box<dyn serialport::SerialPort>,
        shutdown: watch::Receiver<bool>,
        enabled: watch::Receiver<bool>,
    ) {
        let mut framer = SerialFramer::new();
        let mut buf = [0u8; SERIAL_READ_BUF];
        loop {
            if *shutdown.borrow() || !*enabled.borrow() {
                break;
            }
            match port.read(&mut buf) {
                Ok(0) => continue,
                Ok(n) => {
                    framer.feed(&buf[..n]);
                    while let Some(packet) = framer.next_packet() {
                        self.enqueue(packet, PacketSource::Serial);
                    }
                    let skipped = framer.take_discarded();
                    if skipped > 0 {
                        self.drop_logger.record_resync(skipped, Instant::now());
                    }
                }
                Err(err)
                    if matches!(
                        err.kind(),
                        std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock | std::io::ErrorKind::Interrupted
                    ) =>
                {
                    continue
                }
                Err(err) => {
                    warn!("ingest.event=recv_error kind=serial reason={err}");
                    break;
                }
            }
        }
    }

    fn enqueue(&self, data: Bytes, source: PacketSource) {
        let len = data.len();
        if self.tx.try_send(RawPacket { data, source }).is_err() {
            self.drop_logger.record(DropEvent::new(DropReason::QueueFull, None, len), source);
        }
    }

    fn spawn_consumer(self: &Arc<Self>) {
        let Some(rx) = self.rx.lock().take() else {
            return;
        };
        let processor = PacketProcessor::new(
            &self.config,
            Arc::clone(&self.state),
            Arc::clone(&self.store),
            Arc::clone(&self.metrics),
            Arc::clone(&self.drop_logger),
        );
        let shutdown = self.shutdown.subscribe();
        let batch = self.config.batch_size.max(1);
        let ttl = self.config.frame_ttl;
        spawn_detached("packet-consumer", consume(rx, processor, shutdown, batch, ttl));
    }
}

/// Drains the raw-packet queue, sweeping stalled frames on a timer. After the
/// shutdown signal the queue is drained to empty, since the transports stop
/// enqueuing once the flag is set.
async fn consume(
    mut rx: mpsc::Receiver<RawPacket>,
    mut processor: PacketProcessor,
    mut shutdown: watch::Receiver<bool>,
    batch: usize,
    ttl: Duration,
) {
    let mut sweep = tokio::time::interval(sweep_period(ttl));
    sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = sweep.tick() => processor.sweep(Instant::now(), ttl),
            received = rx.recv() => {
                let Some(packet) = received else { break };
                processor.process(packet);
                let mut drained = 1;
                while drained < batch {
                    match rx.try_recv() {
                        Ok(packet) => {
                            processor.process(packet);
                            drained += 1;
                        }
                        Err(_) => break,
                    }
                }
            }
        }
    }
    while let Ok(packet) = rx.try_recv() {
        processor.process(packet);
    }
    trace!("ingest.event=packet_consumer_stopped");
}

fn sweep_period(ttl: Duration) -> Duration {
    (ttl / 2).max(Duration::from_millis(100))
}

fn max_datagram_len() -> usize {
    PACKET_LEN.max(fragment_datagram_len(0, true)).max(PIXEL_DATAGRAM_LEN) + 64
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("ingest not configured (no serial device or UDP listen address set)")]
    NotConfigured,
    #[error("non-loopback bind attempted for {0} without override")]
    NonLocalBind(String),
    #[error("ingest io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serial open error: {0}")]
    Serial(#[from] serialport::Error),
}

enum BoundTransport {
    Udp(UdpSocket),
    Serial(Box<dyn serialport::SerialPort>),
}

impl std::fmt::Debug for BoundTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BoundTransport::Udp(socket) => f.debug_tuple("Udp").field(socket).finish(),
            BoundTransport::Serial(_) => f.debug_tuple("Serial").finish(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueueSnapshot {
    pub capacity: usize,
    pub depth: usize,
}

#[derive(Debug, Clone)]
pub struct IngestSnapshot {
    pub enabled: bool,
    pub listen: Option<SocketAddr>,
    pub serial_path: Option<String>,
    pub allow_non_local_bind: bool,
    pub mode: WireMode,
    pub checksum: ChecksumMode,
    pub queue: QueueSnapshot,
    pub frames: Vec<(&'static str, u64)>,
    pub drops: Vec<(&'static str, u64)>,
    pub packets_total: u64,
    pub bytes_total: u64,
    pub checksum_flags_total: u64,
    pub resync_bytes_total: u64,
    pub last_frame_ts_ms: Option<u64>,
}

/// Classifies queued packets and drives the reassembly state. A returned frame
/// from any apply call is a boundary crossing and is published immediately.
struct PacketProcessor {
    mode: WireMode,
    datagram_checksum: bool,
    checksum: ChecksumMode,
    state: Arc<ReassemblyState>,
    store: Arc<FrameStore>,
    metrics: Arc<IngestMetrics>,
    drop_logger: Arc<DropLogger>,
}

impl PacketProcessor {
    fn new(
        config: &IngestConfig,
        state: Arc<ReassemblyState>,
        store: Arc<FrameStore>,
        metrics: Arc<IngestMetrics>,
        drop_logger: Arc<DropLogger>,
    ) -> Self {
        Self {
            mode: config.mode,
            datagram_checksum: config.datagram_checksum,
            checksum: config.checksum,
            state,
            store,
            metrics,
            drop_logger,
        }
    }

    fn process(&mut self, packet: RawPacket) {
        let now = Instant::now();
        self.metrics.record_packet(packet.data.len());
        match packet.source {
            PacketSource::Serial => self.process_serial(packet.data, now),
            PacketSource::Udp => self.process_datagram(&packet.data, now),
        }
    }

    fn process_serial(&mut self, data: Bytes, now: Instant) {
        let len = data.len();
        let packet = match SerialPacket::parse(data) {
            Ok(packet) => packet,
            Err(err) => {
                self.drop_logger.record(err.drop_event(len), PacketSource::Serial);
                return;
            }
        };
        if !self.checksum.verify(packet.checksum_covered(), packet.checksum) {
            self.drop_logger.record_flag(packet.psn, now);
        }
        let payload = packet.payload();
        if let Some(frame) = self.state.apply(packet.psn, SlotWrite::WholeLine, &payload, now) {
            self.publish(frame);
        }
    }

    fn process_datagram(&mut self, data: &[u8], now: Instant) {
        let parsed = match ParsedDatagram::parse(data, self.mode, self.datagram_checksum) {
            Ok(parsed) => parsed,
            Err(err) => {
                self.drop_logger.record(err.drop_event(data.len()), PacketSource::Udp);
                return;
            }
        };
        if let Some(declared) = parsed.checksum {
            if !self.checksum.verify(ParsedDatagram::checksum_covered(data), declared) {
                self.drop_logger.record_flag(parsed.psn, now);
            }
        }
        if let Some(frame) = self.state.apply(parsed.psn, parsed.write, parsed.payload, now) {
            self.publish(frame);
        }
    }

    fn sweep(&mut self, now: Instant, ttl: Duration) {
        if let Some(frame) = self.state.sweep_expired(now, ttl) {
            self.publish(frame);
        }
    }

    fn publish(&self, frame: Frame) {
        self.metrics.record_frame(frame.reason());
        info!(
            "ingest.event=frame_handoff reason={} layout={} lines={}/{}",
            frame.reason().as_str(),
            frame.layout().as_str(),
            frame.completed_lines(),
            TOTAL_LINES
        );
        self.store.publish(frame);
    }
}

struct DropLogger {
    metrics: Arc<IngestMetrics>,
    resync_gate: Mutex<RateGate>,
    checksum_gate: Mutex<FlagStormGate>,
}

impl DropLogger {
    fn new(metrics: Arc<IngestMetrics>) -> Self {
        Self { metrics, resync_gate: Mutex::new(RateGate::new()), checksum_gate: Mutex::new(FlagStormGate::new()) }
    }

    fn record(&self, event: DropEvent, source: PacketSource) {
        self.metrics.record_drop(event.reason);
        let psn_repr = event.psn.map(|p| p.to_string()).unwrap_or_else(|| "na".to_string());
        debug!(
            "ingest.event=packet_drop reason={} psn={} bytes={} source={}",
            event.reason.as_str(),
            psn_repr,
            event.bytes,
            source.as_str()
        );
    }

    /// Checksum mismatch: flagged and counted, never dropped. Storm warnings
    /// are rate-limited so a bad link does not flood the log.
    fn record_flag(&self, psn: u8, now: Instant) {
        self.metrics.record_checksum_flag();
        trace!("ingest.event=checksum_flag psn={psn}");
        if let Some(count) = self.checksum_gate.lock().record(now) {
            warn!("ingest.event=checksum_storm flags={} window_secs={}", count, CHECKSUM_WARN_INTERVAL.as_secs());
        }
    }

    fn record_resync(&self, bytes: usize, now: Instant) {
        self.metrics.record_resync_bytes(bytes);
        if self.resync_gate.lock().should_log(now, RESYNC_WARN_INTERVAL) {
            warn!("ingest.event=serial_resync skipped_bytes={bytes}");
        }
    }
}

struct RateGate {
    last: Option<Instant>,
}

impl RateGate {
    fn new() -> Self {
        Self { last: None }
    }

    fn should_log(&mut self, now: Instant, interval: Duration) -> bool {
        match self.last {
            Some(prev) if now.duration_since(prev) < interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

struct FlagStormGate {
    last: Instant,
    suppressed: u64,
}

impl FlagStormGate {
    fn new() -> Self {
        let last = Instant::now().checked_sub(CHECKSUM_WARN_INTERVAL).unwrap_or_else(Instant::now);
        Self { last, suppressed: 0 }
    }

    fn record(&mut self, now: Instant) -> Option<u64> {
        self.suppressed += 1;
        if now.duration_since(self.last) >= CHECKSUM_WARN_INTERVAL {
            let count = std::mem::take(&mut self.suppressed);
            self.last = now;
            Some(count)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{self, Scenario};
    use crate::wire::serial::LINE_BYTES;

    fn base_config() -> IngestConfig {
        IngestConfig {
            listen: Some("127.0.0.1:0".parse().unwrap()),
            queue_capacity: 4,
            ..Default::default()
        }
    }

    fn service(config: IngestConfig) -> Arc<IngestService> {
        Arc::new(IngestService::new(config, Arc::new(IngestMetrics::new()), Arc::new(FrameStore::new())))
    }

    fn processor(config: &IngestConfig, layout: LineLayout) -> (PacketProcessor, Arc<IngestMetrics>, Arc<FrameStore>) {
        let metrics = Arc::new(IngestMetrics::new());
        let store = Arc::new(FrameStore::new());
        let processor = PacketProcessor::new(
            config,
            Arc::new(ReassemblyState::new(layout)),
            Arc::clone(&store),
            Arc::clone(&metrics),
            Arc::new(DropLogger::new(Arc::clone(&metrics))),
        );
        (processor, metrics, store)
    }

    #[tokio::test]
    async fn rejects_non_loopback_without_override() {
        let mut cfg = base_config();
        cfg.listen = Some("0.0.0.0:0".parse().unwrap());
        let service = service(cfg);
        let err = service.bind_transport().await.expect_err("expected bind failure");
        assert!(matches!(err, IngestError::NonLocalBind(_)));
    }

    #[tokio::test]
    async fn not_configured_without_targets() {
        let mut cfg = base_config();
        cfg.listen = None;
        let service = service(cfg);
        let err = service.bind_transport().await.expect_err("expected bind failure");
        assert!(matches!(err, IngestError::NotConfigured));
    }

    #[test]
    fn enable_toggle_reports_previous() {
        let service = service(base_config());
        assert!(service.is_enabled());
        assert!(service.set_enabled(false));
        assert!(!service.set_enabled(false));
        assert!(!service.is_enabled());
    }

    #[test]
    fn queue_overflow_counts_drop() {
        let mut cfg = base_config();
        cfg.queue_capacity = 1;
        let service = service(cfg);
        service.enqueue(Bytes::from_static(b"first"), PacketSource::Udp);
        service.enqueue(Bytes::from_static(b"second"), PacketSource::Udp);
        let drops = service.snapshot().drops;
        assert_eq!(drops.iter().find(|(k, _)| *k == "queue_full").map(|(_, v)| *v), Some(1));
        assert_eq!(service.snapshot().queue.depth, 1);
    }

    #[test]
    fn snapshot_reflects_config() {
        let snapshot = service(base_config()).snapshot();
        assert!(snapshot.enabled);
        assert_eq!(snapshot.mode, WireMode::LineFragmented);
        assert_eq!(snapshot.checksum, ChecksumMode::SumOfBytes);
        assert_eq!(snapshot.queue.capacity, 4);
        assert_eq!(snapshot.packets_total, 0);
        assert!(snapshot.last_frame_ts_ms.is_none());
    }

    #[test]
    fn checksum_mismatch_is_flagged_not_dropped() {
        let mut cfg = base_config();
        cfg.listen = None;
        cfg.serial = Some(crate::config::SerialConfig { path: "/dev/null".into(), baud: 115_200 });
        let (mut processor, metrics, _) = processor(&cfg, LineLayout::WholeLine);
        let payload = vec![9u8; LINE_BYTES];
        let packet = fixtures::serial_packet(7, &payload, ChecksumMode::SumOfBytes, Scenario::ChecksumMismatch);
        processor.process(RawPacket { data: Bytes::from(packet), source: PacketSource::Serial });
        assert_eq!(metrics.checksum_flags_total(), 1);
        assert_eq!(metrics.drops_snapshot().iter().map(|(_, v)| *v).sum::<u64>(), 0);
        assert_eq!(processor.state.line_state(7), crate::assembly::LineState::Complete);
    }

    #[test]
    fn malformed_datagram_is_dropped() {
        let cfg = base_config();
        let (mut processor, metrics, _) = processor(&cfg, LineLayout::Fragmented);
        processor.process(RawPacket { data: Bytes::from_static(b"tiny"), source: PacketSource::Udp });
        let drops = metrics.drops_snapshot();
        assert_eq!(drops.iter().find(|(k, _)| *k == "truncated").map(|(_, v)| *v), Some(1));
        assert!(processor.state.is_empty());
    }

    #[test]
    fn sweep_publishes_expired_partial() {
        let cfg = base_config();
        let (mut processor, metrics, store) = processor(&cfg, LineLayout::Fragmented);
        let source = fixtures::grid(LineLayout::Fragmented, 11);
        let line = &source[..LineLayout::Fragmented.line_bytes()];
        let datagram = fixtures::fragment_datagram(0, 0, line, None);
        processor.process(RawPacket { data: Bytes::from(datagram), source: PacketSource::Udp });
        let ttl = Duration::from_secs(5);
        processor.sweep(Instant::now() + ttl, ttl);
        let frame = store.latest().expect("expired frame published");
        assert_eq!(frame.reason(), crate::wire::FlushReason::Expired);
        assert_eq!(metrics.frames_snapshot().iter().find(|(k, _)| *k == "expired").map(|(_, v)| *v), Some(1));
    }
}
