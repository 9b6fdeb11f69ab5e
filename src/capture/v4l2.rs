//! V4L2 fallback source for USB cameras, memory-mapped MJPEG capture.

use bytes::Bytes;
use tracing::info;
use v4l::buffer::Type;
use v4l::capability::Flags as CapFlags;
use v4l::io::traits::CaptureStream;
use v4l::prelude::MmapStream;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use crate::capture::frame::{Frame, FrameMetadata};
use crate::error::CaptureError;
use crate::CaptureConfig;

const BUFFER_COUNT: u32 = 4;

pub struct V4l2Source {
    // Held for the lifetime of the stream
    _device: Device,
    stream: MmapStream<'static>,
    sequence: u64,
    width: u32,
    height: u32,
}

impl V4l2Source {
    pub fn open(cfg: &CaptureConfig) -> Result<Self, CaptureError> {
        let device = Device::with_path(&cfg.device)
            .map_err(|e| classify_io(e, &format!("open {}", cfg.device)))?;

        let caps = device.query_caps()?;
        info!("V4L2 device: {} ({})", caps.card, caps.driver);
        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            return Err(CaptureError::Unsupported(format!(
                "{} does not support video capture",
                cfg.device
            )));
        }

        let mut fmt = device.format()?;
        fmt.width = cfg.width;
        fmt.height = cfg.height;
        fmt.fourcc = FourCC::new(b"MJPG");
        let fmt = device.set_format(&fmt)?;
        if fmt.fourcc != FourCC::new(b"MJPG") {
            // The rest of the pipeline assumes encoded JPEG frames
            return Err(CaptureError::Unsupported(format!(
                "{} cannot produce MJPEG (driver offered {})",
                cfg.device, fmt.fourcc
            )));
        }

        let stream = MmapStream::with_buffers(&device, Type::VideoCapture, BUFFER_COUNT)
            .map_err(|e| classify_io(e, "start stream"))?;

        Ok(Self {
            _device: device,
            stream,
            sequence: 0,
            width: fmt.width,
            height: fmt.height,
        })
    }

    /// Dequeue the next frame; blocks for at most one frame interval.
    pub fn next_frame(&mut self) -> Result<Frame, CaptureError> {
        let (buf, _meta) = self
            .stream
            .next()
            .map_err(|e| classify_io(e, "dequeue frame"))?;
        let data = Bytes::copy_from_slice(buf);

        self.sequence += 1;
        Ok(Frame::new(
            data,
            FrameMetadata {
                sequence: self.sequence,
                width: self.width,
                height: self.height,
                detections: Vec::new(),
            },
        ))
    }
}

/// Busy, absent, or unplugged devices are recoverable; everything else
/// propagates as-is.
fn classify_io(e: std::io::Error, what: &str) -> CaptureError {
    // 16 = EBUSY, 19 = ENODEV
    let recoverable = matches!(
        e.kind(),
        std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied
    ) || matches!(e.raw_os_error(), Some(16) | Some(19));

    if recoverable {
        CaptureError::Unavailable(format!("{what}: {e}"))
    } else {
        CaptureError::Io(e)
    }
}
