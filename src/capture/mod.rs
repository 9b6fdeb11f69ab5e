pub mod detect;
pub mod frame;
pub mod rpicam;
pub mod v4l2;

pub use frame::{Detection, Frame, FrameMetadata};
pub use rpicam::RpicamSource;
pub use v4l2::V4l2Source;

use crate::error::CaptureError;
use crate::{CaptureConfig, DetectConfig, SourceKind};

/// The configured camera, behind one face so the supervisor loop does not
/// care which backend produced the frame.
pub enum CameraSource {
    Rpicam(RpicamSource),
    V4l2(V4l2Source),
}

impl CameraSource {
    pub async fn open(cfg: &CaptureConfig, detect: DetectConfig) -> Result<Self, CaptureError> {
        match cfg.source {
            SourceKind::Rpicam => Ok(Self::Rpicam(RpicamSource::open(cfg, detect).await?)),
            SourceKind::V4l2 => Ok(Self::V4l2(V4l2Source::open(cfg)?)),
        }
    }

    pub async fn next_frame(&mut self) -> Result<Frame, CaptureError> {
        match self {
            Self::Rpicam(s) => s.next_frame().await,
            Self::V4l2(s) => s.next_frame(),
        }
    }
}
