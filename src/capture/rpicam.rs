//! Camera source backed by an rpicam-vid subprocess: MJPEG frames on
//! stdout, IMX500 detection metadata streamed to a JSON file on the side.

use std::io::SeekFrom;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncSeekExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::capture::detect::{parse_metadata_chunk, TemporalFilter};
use crate::capture::frame::{Detection, Frame, FrameMetadata};
use crate::error::CaptureError;
use crate::{CaptureConfig, DetectConfig};

const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: [u8; 2] = [0xFF, 0xD9];
const READ_CHUNK: usize = 16 * 1024;
const METADATA_POLL: Duration = Duration::from_millis(100);

pub struct RpicamSource {
    child: Child,
    stdout: ChildStdout,
    acc: BytesMut,
    /// Latest temporally-filtered detections, written by the monitor task
    detections: Arc<ArcSwap<Vec<Detection>>>,
    monitor: JoinHandle<()>,
    sequence: u64,
    width: u32,
    height: u32,
}

impl RpicamSource {
    pub async fn open(cfg: &CaptureConfig, detect: DetectConfig) -> Result<Self, CaptureError> {
        // Stale metadata from a previous run must not feed the filter
        let _ = tokio::fs::remove_file(&cfg.metadata_file).await;

        let mut cmd = Command::new(&cfg.rpicam_bin);
        if let Some(pp) = &cfg.postprocess_file {
            cmd.arg("--post-process-file").arg(pp);
        }
        cmd.arg("--width")
            .arg(cfg.width.to_string())
            .arg("--height")
            .arg(cfg.height.to_string())
            .arg("--framerate")
            .arg(cfg.framerate.to_string())
            .arg("--nopreview")
            .arg("--codec")
            .arg("mjpeg")
            .arg("--metadata")
            .arg(&cfg.metadata_file)
            .arg("--metadata-format")
            .arg("json")
            .arg("-t")
            .arg("0")
            .arg("-o")
            .arg("-")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                CaptureError::Unavailable(format!("{} not found", cfg.rpicam_bin))
            }
            _ => CaptureError::Io(e),
        })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CaptureError::Unavailable("rpicam-vid stdout not captured".into()))?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(log_stderr(stderr));
        }

        let detections = Arc::new(ArcSwap::from_pointee(Vec::new()));
        let monitor = tokio::spawn(monitor_metadata(
            cfg.metadata_file.clone(),
            detect,
            detections.clone(),
        ));

        info!(
            bin = %cfg.rpicam_bin,
            width = cfg.width,
            height = cfg.height,
            fps = cfg.framerate,
            "rpicam source started"
        );

        Ok(Self {
            child,
            stdout,
            acc: BytesMut::with_capacity(READ_CHUNK * 4),
            detections,
            monitor,
            sequence: 0,
            width: cfg.width,
            height: cfg.height,
        })
    }

    pub async fn next_frame(&mut self) -> Result<Frame, CaptureError> {
        loop {
            if let Some(jpeg) = split_jpeg(&mut self.acc) {
                self.sequence += 1;
                let detections = self.detections.load().as_ref().clone();
                return Ok(Frame::new(
                    jpeg,
                    FrameMetadata {
                        sequence: self.sequence,
                        width: self.width,
                        height: self.height,
                        detections,
                    },
                ));
            }

            let n = self.stdout.read_buf(&mut self.acc).await?;
            if n == 0 {
                return Err(CaptureError::Unavailable("camera process ended".into()));
            }
        }
    }
}

impl Drop for RpicamSource {
    fn drop(&mut self) {
        self.monitor.abort();
        let _ = self.child.start_kill();
    }
}

/// Pull the next complete JPEG out of the accumulator, discarding any
/// leading bytes before the start-of-image marker.
fn split_jpeg(acc: &mut BytesMut) -> Option<Bytes> {
    let start = find_marker(acc, SOI)?;
    if start > 0 {
        acc.advance(start);
    }
    let end = find_marker(&acc[2..], EOI)? + 4;
    Some(acc.split_to(end).freeze())
}

fn find_marker(haystack: &[u8], marker: [u8; 2]) -> Option<usize> {
    haystack.windows(2).position(|w| w == marker)
}

async fn log_stderr(stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if line.contains("busy") || line.contains("no cameras") {
            warn!("rpicam-vid: {line}");
        } else {
            debug!("rpicam-vid: {line}");
        }
    }
}

/// Tail the metadata file, parsing new records and publishing the filtered
/// detections. The file appears ~30s after startup while the IMX500
/// firmware loads, so absence is not an error.
async fn monitor_metadata(
    path: PathBuf,
    detect: DetectConfig,
    slot: Arc<ArcSwap<Vec<Detection>>>,
) {
    let mut filter = TemporalFilter::new(detect.min_consecutive);
    let mut pos: u64 = 0;
    let mut announced = false;
    let mut ticker = tokio::time::interval(METADATA_POLL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;

        let Ok(mut file) = tokio::fs::File::open(&path).await else {
            continue;
        };
        if !announced {
            info!("IMX500 metadata stream is live");
            announced = true;
        }

        let len = match file.metadata().await {
            Ok(m) => m.len(),
            Err(_) => continue,
        };
        if len < pos {
            // file replaced or truncated
            pos = 0;
        }
        if len == pos {
            continue;
        }
        if file.seek(SeekFrom::Start(pos)).await.is_err() {
            continue;
        }

        let mut content = String::new();
        match file.read_to_string(&mut content).await {
            Ok(n) => pos += n as u64,
            Err(_) => continue,
        }

        for detections in parse_metadata_chunk(&content, &detect) {
            slot.store(Arc::new(filter.observe(detections)));
        }
    }
}
