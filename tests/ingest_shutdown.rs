use scanframe_ingest::{
    fixtures,
    wire::FlushReason,
    ChecksumMode, FrameStore, IngestConfig, IngestMetrics, IngestService, LineLayout, WireMode,
};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::{
    net::UdpSocket,
    sync::watch,
    time::{sleep, timeout},
};

fn test_config() -> IngestConfig {
    IngestConfig {
        enable: true,
        listen: Some("127.0.0.1:0".parse().expect("loopback addr")),
        serial: None,
        allow_non_local_bind: false,
        mode: WireMode::LineFragmented,
        datagram_checksum: false,
        checksum: ChecksumMode::SumOfBytes,
        queue_capacity: 1024,
        batch_size: 32,
        frame_ttl: Duration::from_secs(5),
    }
}

fn spawn_service(config: IngestConfig) -> (Arc<IngestService>, tokio::task::JoinHandle<()>) {
    let service = Arc::new(IngestService::new(config, Arc::new(IngestMetrics::new()), Arc::new(FrameStore::new())));
    let runner = {
        let svc = service.clone();
        tokio::spawn(async move {
            svc.run().await.expect("ingest service returned error");
        })
    };
    (service, runner)
}

async fn wait_bound(mut rx: watch::Receiver<Option<SocketAddr>>) -> SocketAddr {
    timeout(Duration::from_secs(5), async {
        loop {
            if let Some(addr) = *rx.borrow() {
                return addr;
            }
            rx.changed().await.expect("service alive");
        }
    })
    .await
    .expect("bind timed out")
}

async fn send_all(target: SocketAddr, datagrams: &[Vec<u8>]) {
    let sender = UdpSocket::bind("127.0.0.1:0").await.expect("sender socket");
    for (i, datagram) in datagrams.iter().enumerate() {
        sender.send_to(datagram, target).await.expect("send datagram");
        // Pace the burst so the loopback receive buffer never overflows.
        if i % 50 == 49 {
            sleep(Duration::from_millis(1)).await;
        }
    }
}

#[tokio::test]
async fn ingest_service_exits_on_signal() {
    let (service, runner) = spawn_service(test_config());

    sleep(Duration::from_millis(50)).await;
    service.signal_exit();

    timeout(Duration::from_secs(5), runner).await.expect("ingest service join timed out").expect("service task panicked");
}

#[tokio::test]
async fn udp_fragments_become_a_published_frame() {
    let (service, runner) = spawn_service(test_config());
    let mut frames = service.store().subscribe();
    let addr = wait_bound(service.subscribe_bound_addr()).await;

    let layout = LineLayout::Fragmented;
    let grid = fixtures::grid(layout, 77);
    let datagrams = fixtures::frame_packets(layout, &grid, ChecksumMode::Disabled, false);
    send_all(addr, &datagrams).await;

    timeout(Duration::from_secs(5), frames.changed()).await.expect("frame timed out").expect("store alive");
    let frame = frames.borrow().clone().expect("frame present");
    assert_eq!(frame.reason(), FlushReason::Complete);
    assert!(frame.is_complete());
    assert_eq!(frame.data(), &grid[..]);

    let snapshot = service.snapshot();
    assert_eq!(snapshot.packets_total, datagrams.len() as u64);

    service.signal_exit();
    timeout(Duration::from_secs(5), runner).await.expect("join timed out").expect("service task panicked");
}

#[tokio::test]
async fn received_packets_survive_immediate_shutdown() {
    let (service, runner) = spawn_service(test_config());
    let mut frames = service.store().subscribe();
    let addr = wait_bound(service.subscribe_bound_addr()).await;

    let layout = LineLayout::Fragmented;
    let grid = fixtures::grid(layout, 78);
    let datagrams = fixtures::frame_packets(layout, &grid, ChecksumMode::Disabled, false);
    send_all(addr, &datagrams).await;

    // Give the pump a beat to move everything off the socket, then stop. The
    // consumer must still drain the queue to empty before exiting.
    sleep(Duration::from_millis(200)).await;
    service.signal_exit();
    timeout(Duration::from_secs(5), runner).await.expect("join timed out").expect("service task panicked");

    timeout(Duration::from_secs(5), frames.changed()).await.expect("frame timed out").expect("store alive");
    let frame = frames.borrow().clone().expect("frame present");
    assert!(frame.is_complete());
    assert_eq!(frame.data(), &grid[..]);
}

#[tokio::test]
async fn enable_toggle_brings_listener_up_and_down() {
    let mut cfg = test_config();
    cfg.enable = false;
    let (service, runner) = spawn_service(cfg);

    sleep(Duration::from_millis(100)).await;
    assert!(service.bound_addr().is_none());

    assert!(!service.set_enabled(true));
    let addr = wait_bound(service.subscribe_bound_addr()).await;
    assert!(addr.ip().is_loopback());

    service.set_enabled(false);
    let mut bound = service.subscribe_bound_addr();
    timeout(Duration::from_secs(5), async {
        while bound.borrow().is_some() {
            bound.changed().await.expect("service alive");
        }
    })
    .await
    .expect("listener teardown timed out");

    service.signal_exit();
    timeout(Duration::from_secs(5), runner).await.expect("join timed out").expect("service task panicked");
}
