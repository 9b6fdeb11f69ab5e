//! Single-producer frame distribution: an atomically swapped latest-frame
//! slot plus a broadcast channel for continuous consumers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use crossbeam::utils::CachePadded;
use tokio::sync::broadcast;

use crate::capture::Frame;
use crate::pipeline::ReplayBuffer;

pub struct FrameBroadcaster {
    /// The most recent frame, or none before the first publish
    latest: ArcSwapOption<Frame>,

    /// Fan-out to stream/WebSocket consumers. Lagging receivers skip
    /// intermediate frames rather than stalling the publisher.
    tx: broadcast::Sender<Arc<Frame>>,

    replay: Arc<ReplayBuffer>,

    stats: CachePadded<Stats>,
}

#[derive(Default)]
struct Stats {
    frames_published: AtomicU64,
    subscribers_fed: AtomicU64,
    frames_lagged: AtomicU64,
}

impl FrameBroadcaster {
    pub fn new(replay: Arc<ReplayBuffer>, fanout_depth: usize) -> Self {
        let (tx, _) = broadcast::channel(fanout_depth);
        Self {
            latest: ArcSwapOption::const_empty(),
            tx,
            replay,
            stats: CachePadded::new(Stats::default()),
        }
    }

    /// Publish a new frame: swap the latest slot, feed the replay buffer,
    /// notify subscribers. Single producer by construction.
    pub fn publish(&self, frame: Frame) -> Arc<Frame> {
        let frame = Arc::new(frame);
        self.latest.store(Some(frame.clone()));
        self.replay.append(frame.clone());
        // No receivers is fine; the slot still updated
        if let Ok(fed) = self.tx.send(frame.clone()) {
            self.stats
                .subscribers_fed
                .fetch_add(fed as u64, Ordering::Relaxed);
        }
        self.stats.frames_published.fetch_add(1, Ordering::Relaxed);
        frame
    }

    pub fn latest(&self) -> Option<Arc<Frame>> {
        self.latest.load_full()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Frame>> {
        self.tx.subscribe()
    }

    pub fn replay(&self) -> &Arc<ReplayBuffer> {
        &self.replay
    }

    pub fn frames_published(&self) -> u64 {
        self.stats.frames_published.load(Ordering::Relaxed)
    }

    /// Called by consumers when the channel reports how far they fell behind
    pub fn note_lagged(&self, skipped: u64) {
        self.stats.frames_lagged.fetch_add(skipped, Ordering::Relaxed);
    }

    /// (subscribers fed, frames skipped by lagging consumers)
    pub fn fanout_stats(&self) -> (u64, u64) {
        (
            self.stats.subscribers_fed.load(Ordering::Relaxed),
            self.stats.frames_lagged.load(Ordering::Relaxed),
        )
    }
}
