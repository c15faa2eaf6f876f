//! Single-slot frame mailbox
//!
//! Decouples the ingest cadence from the output cadence with at most one
//! frame in flight. A publish overwrites any unread frame (latest-wins, no
//! queueing) and the most recently published frame is retained even after
//! it has been taken, so the output stage can freeze on it during an
//! upstream outage. Frames carry `bytes::Bytes` payloads, so retention and
//! hand-out are reference bumps, not copies.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;

/// One decoded video image: packed RGB24 at the output resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub data: Bytes,
}

impl Frame {
    pub fn new(width: u32, height: u32, data: Bytes) -> Self {
        debug_assert_eq!(data.len(), width as usize * height as usize * 3);
        Self { width, height, data }
    }
}

#[derive(Debug, Default)]
struct Slot {
    /// Published but not yet taken.
    pending: Option<Frame>,
    /// Most recently published, kept across takes for freeze-frame reuse.
    delivered: Option<Frame>,
}

/// Latest-wins mailbox between the ingest and output stages.
#[derive(Debug)]
pub struct FrameBuffer {
    slot: Mutex<Slot>,
    epoch: Instant,
    /// Microseconds since `epoch` of the latest publish, offset by one;
    /// zero means no frame was ever received.
    received_at: AtomicU64,
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot::default()),
            epoch: Instant::now(),
            received_at: AtomicU64::new(0),
        }
    }

    /// Publishes a frame, discarding any unread one, and advances the
    /// freshness timestamp. Never blocks on the consumer.
    pub fn publish(&self, frame: Frame) {
        let stamp = self.epoch.elapsed().as_micros() as u64 + 1;
        {
            let mut slot = self.slot.lock();
            slot.delivered = Some(frame.clone());
            slot.pending = Some(frame);
        }
        // fetch_max keeps the timestamp monotone even if publishers race.
        self.received_at.fetch_max(stamp, Ordering::Release);
    }

    /// Takes the pending frame, if one was published since the last take.
    /// The delivered frame is unaffected.
    pub fn try_take(&self) -> Option<Frame> {
        self.slot.lock().pending.take()
    }

    /// The most recently published frame, taken or not.
    pub fn last_delivered(&self) -> Option<Frame> {
        self.slot.lock().delivered.clone()
    }

    /// Publish time of the most recent frame, or `None` if nothing was
    /// ever received.
    pub fn last_received_at(&self) -> Option<Instant> {
        match self.received_at.load(Ordering::Acquire) {
            0 => None,
            stamp => Some(self.epoch + Duration::from_micros(stamp - 1)),
        }
    }

    /// Time since the most recent publish.
    pub fn age(&self) -> Option<Duration> {
        self.last_received_at()
            .map(|at| Instant::now().saturating_duration_since(at))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(fill: u8) -> Frame {
        Frame::new(2, 2, Bytes::from(vec![fill; 12]))
    }

    #[test]
    fn take_returns_each_publish_once() {
        let buffer = FrameBuffer::new();
        assert!(buffer.try_take().is_none());

        buffer.publish(frame(1));
        assert_eq!(buffer.try_take().unwrap().data[0], 1);
        assert!(buffer.try_take().is_none());

        buffer.publish(frame(2));
        assert_eq!(buffer.try_take().unwrap().data[0], 2);
        assert!(buffer.try_take().is_none());
    }

    #[test]
    fn latest_wins_between_takes() {
        let buffer = FrameBuffer::new();
        buffer.publish(frame(1));
        buffer.publish(frame(2));

        // Only the second publish is observable.
        assert_eq!(buffer.try_take().unwrap().data[0], 2);
        assert!(buffer.try_take().is_none());
    }

    #[test]
    fn delivered_frame_survives_take() {
        let buffer = FrameBuffer::new();
        assert!(buffer.last_delivered().is_none());

        buffer.publish(frame(7));
        let _ = buffer.try_take();
        assert_eq!(buffer.last_delivered().unwrap().data[0], 7);
    }

    #[test]
    fn freshness_starts_never_and_is_monotone() {
        let buffer = FrameBuffer::new();
        assert!(buffer.last_received_at().is_none());
        assert!(buffer.age().is_none());

        buffer.publish(frame(1));
        let first = buffer.last_received_at().unwrap();

        std::thread::sleep(Duration::from_millis(5));
        buffer.publish(frame(2));
        let second = buffer.last_received_at().unwrap();

        assert!(second >= first);
        assert!(buffer.age().unwrap() < Duration::from_secs(1));
    }

    #[test]
    fn capacity_is_one_pending_frame() {
        let buffer = FrameBuffer::new();
        for i in 0..10 {
            buffer.publish(frame(i));
        }
        // Every intermediate frame was discarded, not queued.
        assert_eq!(buffer.try_take().unwrap().data[0], 9);
        assert!(buffer.try_take().is_none());
    }
}
