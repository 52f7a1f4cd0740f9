use crate::assembly::Frame;
use std::sync::Arc;
use tokio::sync::watch;

/// Double-buffered frame holder: the synchronizer owns the in-progress frame;
/// this holds the last completed one. Hand-off is a watch-channel swap, so
/// reads never block and consumers holding an `Arc<Frame>` keep it alive past
/// the next swap; anything copied out survives reuse of the superseded buffer.
#[derive(Debug)]
pub struct FrameStore {
    latest: watch::Sender<Option<Arc<Frame>>>,
}

impl Default for FrameStore {
    fn default() -> Self {
        let (latest, _) = watch::channel(None);
        Self { latest }
    }
}

impl FrameStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes a flushed frame, superseding the previous one.
    pub fn publish(&self, frame: Frame) -> Arc<Frame> {
        let frame = Arc::new(frame);
        self.latest.send_replace(Some(Arc::clone(&frame)));
        frame
    }

    /// The most recently handed-off frame, if any. Non-blocking.
    pub fn latest(&self) -> Option<Arc<Frame>> {
        self.latest.borrow().clone()
    }

    /// A receiver that observes every future hand-off. Non-blocking reads via
    /// `borrow`, or `changed().await` for notification.
    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<Frame>>> {
        self.latest.subscribe()
    }
}
