pub mod capture;
pub mod error;
pub mod events;
pub mod monitor;
pub mod pipeline;
pub mod server;
pub mod snapshot;
pub mod storage;
pub mod utils;

use std::path::{Path, PathBuf};

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

/// Global configuration that can be atomically swapped at runtime
pub static CONFIG: once_cell::sync::Lazy<ArcSwap<Config>> =
    once_cell::sync::Lazy::new(|| ArcSwap::from_pointee(Config::default()));

/// System configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub capture: CaptureConfig,
    pub detect: DetectConfig,
    pub replay: ReplayConfig,
    pub storage: StorageConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// rpicam-vid subprocess with IMX500 on-sensor detection
    Rpicam,
    /// Plain V4L2 device, no detection metadata
    V4l2,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    pub source: SourceKind,
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub framerate: u32,
    pub rpicam_bin: String,
    pub metadata_file: PathBuf,
    pub postprocess_file: Option<PathBuf>,
    /// Seconds between re-open attempts when the camera is unavailable
    pub retry_secs: u64,
    pub channel_depth: usize,
}

/// Filtering applied to the raw IMX500 output tensor. The model reports
/// low confidence for people, so size filtering does most of the work.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DetectConfig {
    pub min_confidence: f32,
    pub min_box_width: f32,
    pub min_box_height: f32,
    pub min_box_area: f32,
    /// Consecutive frames with a person required before detections are reported
    pub min_consecutive: u32,
    /// Seconds between auto-capture reactions
    pub cooldown_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayConfig {
    /// How many seconds of frames the ring buffer retains
    pub retention_secs: u64,
    /// Upper bound on a single export request
    pub max_export_secs: u64,
    pub export_fps: u32,
    pub encoder_bin: String,
    pub encode_timeout_secs: u64,
    /// Newest replays kept on disk; older ones are pruned after each export
    pub keep_replays: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    pub db_file: String,
    pub thumb_width: u32,
    pub thumb_height: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind: String,
    /// Static front-end directory, served at the root when present
    pub static_dir: Option<PathBuf>,
    /// Frames per second pushed over the WebSocket channel
    pub ws_fps: u32,
    pub fanout_depth: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            capture: CaptureConfig {
                source: SourceKind::Rpicam,
                device: "/dev/video0".into(),
                width: 640,
                height: 480,
                framerate: 15,
                rpicam_bin: "rpicam-vid".into(),
                metadata_file: "/tmp/vigil_detections.json".into(),
                postprocess_file: None,
                retry_secs: 5,
                channel_depth: 8,
            },
            detect: DetectConfig {
                min_confidence: 0.10,
                min_box_width: 0.05,
                min_box_height: 0.20,
                min_box_area: 0.04,
                min_consecutive: 3,
                cooldown_secs: 3,
            },
            replay: ReplayConfig {
                retention_secs: 300,
                max_export_secs: 300,
                export_fps: 15,
                encoder_bin: "ffmpeg".into(),
                encode_timeout_secs: 30,
                keep_replays: 100,
            },
            storage: StorageConfig {
                data_dir: "data".into(),
                db_file: "database.db".into(),
                thumb_width: 300,
                thumb_height: 200,
            },
            server: ServerConfig {
                bind: "0.0.0.0:8000".into(),
                static_dir: None,
                ws_fps: 5,
                fanout_depth: 16,
            },
        }
    }
}

impl Config {
    /// Load configuration: defaults, overlaid with an optional TOML file,
    /// overlaid with VIGIL_-prefixed environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&Config::default())?);

        builder = match path {
            Some(p) => builder.add_source(config::File::from(p)),
            None => builder.add_source(config::File::with_name("vigil").required(false)),
        };

        builder
            .add_source(config::Environment::with_prefix("VIGIL").separator("__"))
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_round_trip_through_loader() {
        let cfg = Config::load(None).expect("default config loads");
        assert_eq!(cfg.replay.retention_secs, 300);
        assert_eq!(cfg.capture.source, SourceKind::Rpicam);
    }
}
