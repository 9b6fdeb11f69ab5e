use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Instant, SystemTime};

/// One encoded JPEG frame with zero-copy semantics
#[derive(Clone, Debug)]
pub struct Frame {
    /// Immutable JPEG data - can be shared across threads without copying
    pub data: Bytes,

    /// Frame metadata, including detections current at capture time
    pub meta: Arc<FrameMetadata>,

    /// Wall-clock capture time, used for file naming and metadata rows
    pub captured_at: SystemTime,

    /// Monotonic capture time, used for retention and window math
    pub timestamp: Instant,
}

#[derive(Debug, Clone)]
pub struct FrameMetadata {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    pub detections: Vec<Detection>,
}

/// A labeled, scored bounding box reported by the camera hardware.
/// Coordinates are frame-relative in [0, 1].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    #[serde(rename = "class")]
    pub label: String,
    pub class_id: u32,
    pub confidence: f32,
    /// x1, y1, x2, y2
    pub bbox: [f32; 4],
}

impl Frame {
    pub fn new(data: Bytes, meta: FrameMetadata) -> Self {
        Self {
            data,
            meta: Arc::new(meta),
            captured_at: SystemTime::now(),
            timestamp: Instant::now(),
        }
    }

    /// Capture time as unix seconds
    pub fn unix_ts(&self) -> i64 {
        crate::utils::unix_ts(self.captured_at)
    }

    pub fn persons(&self) -> impl Iterator<Item = &Detection> {
        self.meta.detections.iter().filter(|d| d.label == "person")
    }
}
