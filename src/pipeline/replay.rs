//! Time-bounded ring buffer of recent frames, the source for replay clips.
//!
//! Eviction is keyed by capture timestamp, not frame count: frame rate
//! varies, so memory is bounded by the retention window.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crossbeam::utils::CachePadded;

use crate::capture::Frame;

pub struct ReplayBuffer {
    frames: RwLock<VecDeque<Arc<Frame>>>,
    retention: Duration,
    stats: CachePadded<Stats>,
}

#[derive(Default)]
struct Stats {
    frames_appended: AtomicU64,
    frames_evicted: AtomicU64,
}

impl ReplayBuffer {
    pub fn new(retention: Duration) -> Self {
        Self {
            frames: RwLock::new(VecDeque::new()),
            retention,
            stats: CachePadded::new(Stats::default()),
        }
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Append at the tail, then evict from the head every frame older than
    /// the retention window relative to the newest timestamp.
    pub fn append(&self, frame: Arc<Frame>) {
        let newest = frame.timestamp;
        let mut frames = self.frames.write().expect("replay buffer lock poisoned");
        frames.push_back(frame);
        self.stats.frames_appended.fetch_add(1, Ordering::Relaxed);

        while let Some(front) = frames.front() {
            if newest.duration_since(front.timestamp) > self.retention {
                frames.pop_front();
                self.stats.frames_evicted.fetch_add(1, Ordering::Relaxed);
            } else {
                break;
            }
        }
    }

    /// Retained frames covering the trailing `duration`, oldest first.
    /// Capped to what is actually retained; never fails.
    pub fn window(&self, duration: Duration) -> Vec<Arc<Frame>> {
        let frames = self.frames.read().expect("replay buffer lock poisoned");
        let Some(newest) = frames.back().map(|f| f.timestamp) else {
            return Vec::new();
        };
        frames
            .iter()
            .filter(|f| newest.duration_since(f.timestamp) < duration)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.frames.read().expect("replay buffer lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// (appended, evicted)
    pub fn stats(&self) -> (u64, u64) {
        (
            self.stats.frames_appended.load(Ordering::Relaxed),
            self.stats.frames_evicted.load(Ordering::Relaxed),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::FrameMetadata;
    use bytes::Bytes;
    use std::time::{Instant, SystemTime};

    /// Frame with a synthetic capture time `secs` past a common base
    fn frame_at(base: Instant, secs: u64) -> Arc<Frame> {
        Arc::new(Frame {
            data: Bytes::from_static(b"jpeg"),
            meta: Arc::new(FrameMetadata {
                sequence: secs,
                width: 2,
                height: 2,
                detections: Vec::new(),
            }),
            captured_at: SystemTime::now(),
            timestamp: base + Duration::from_secs(secs),
        })
    }

    fn sequences(frames: &[Arc<Frame>]) -> Vec<u64> {
        frames.iter().map(|f| f.meta.sequence).collect()
    }

    #[test]
    fn window_of_an_empty_buffer_is_empty() {
        let buf = ReplayBuffer::new(Duration::from_secs(5));
        assert!(buf.window(Duration::from_secs(10)).is_empty());
    }

    #[test]
    fn trailing_window_returns_the_newest_frames() {
        // Frames at t = 0..=9, five-second retention
        let base = Instant::now();
        let buf = ReplayBuffer::new(Duration::from_secs(5));
        for s in 0..10 {
            buf.append(frame_at(base, s));
        }

        let got = buf.window(Duration::from_secs(3));
        assert_eq!(sequences(&got), vec![7, 8, 9]);
    }

    #[test]
    fn never_retains_frames_older_than_the_retention_window() {
        let base = Instant::now();
        let buf = ReplayBuffer::new(Duration::from_secs(5));
        for s in 0..10 {
            buf.append(frame_at(base, s));
        }

        let all = buf.window(Duration::from_secs(600));
        assert_eq!(sequences(&all), vec![4, 5, 6, 7, 8, 9]);
        let (appended, evicted) = buf.stats();
        assert_eq!(appended, 10);
        assert_eq!(evicted, 4);
    }

    #[test]
    fn bursty_arrivals_evict_in_arrival_order() {
        let base = Instant::now();
        let buf = ReplayBuffer::new(Duration::from_secs(5));
        buf.append(frame_at(base, 0));
        buf.append(frame_at(base, 1));
        // Long stall, then a burst
        buf.append(frame_at(base, 20));
        buf.append(frame_at(base, 21));

        let all = buf.window(Duration::from_secs(600));
        assert_eq!(sequences(&all), vec![20, 21]);
    }

    #[test]
    fn window_larger_than_retention_is_capped_to_what_is_retained() {
        let base = Instant::now();
        let buf = ReplayBuffer::new(Duration::from_secs(3));
        for s in 0..6 {
            buf.append(frame_at(base, s));
        }
        let capped = buf.window(Duration::from_secs(60));
        assert_eq!(sequences(&capped), vec![2, 3, 4, 5]);
    }

    #[test]
    fn window_never_holds_more_frames_than_fit_in_the_duration() {
        let base = Instant::now();
        let buf = ReplayBuffer::new(Duration::from_secs(300));
        // One frame per second
        for s in 0..30 {
            buf.append(frame_at(base, s));
        }
        assert_eq!(buf.window(Duration::from_secs(10)).len(), 10);
    }
}
