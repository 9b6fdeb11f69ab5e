//! Replay clip assembly: stage the window's JPEGs in a temp dir and hand
//! them to ffmpeg. Any failure removes partial output before returning.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, info};

use crate::capture::Frame;
use crate::error::ExportError;
use crate::ReplayConfig;

/// Handle to a finished clip
#[derive(Debug, Clone)]
pub struct ReplayArtifact {
    pub path: PathBuf,
    pub duration_secs: u64,
    pub frame_count: usize,
    pub file_size: u64,
}

pub async fn export_clip(
    frames: &[Arc<Frame>],
    dest: &Path,
    cfg: &ReplayConfig,
) -> Result<ReplayArtifact, ExportError> {
    if frames.is_empty() {
        return Err(ExportError::Empty);
    }

    let staging = tempfile::tempdir()?;
    for (i, frame) in frames.iter().enumerate() {
        let path = staging.path().join(format!("frame_{i:05}.jpg"));
        tokio::fs::write(path, &frame.data).await?;
    }

    let pattern = staging.path().join("frame_%05d.jpg");
    let args = encoder_args(&pattern, dest, cfg.export_fps);
    debug!(encoder = %cfg.encoder_bin, ?args, "running encoder");

    let timeout = Duration::from_secs(cfg.encode_timeout_secs);
    let output = Command::new(&cfg.encoder_bin)
        .args(&args)
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output();

    let output = match tokio::time::timeout(timeout, output).await {
        Err(_) => {
            discard_partial(dest).await;
            return Err(ExportError::Timeout(timeout));
        }
        Ok(Err(e)) => {
            discard_partial(dest).await;
            return Err(ExportError::Io(e));
        }
        Ok(Ok(out)) => out,
    };

    if !output.status.success() {
        discard_partial(dest).await;
        let mut stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        stderr.truncate(512);
        return Err(ExportError::Encoder {
            status: output.status.to_string(),
            stderr,
        });
    }

    let file_size = tokio::fs::metadata(dest).await?.len();
    let artifact = ReplayArtifact {
        path: dest.to_path_buf(),
        duration_secs: frames.len() as u64 / cfg.export_fps.max(1) as u64,
        frame_count: frames.len(),
        file_size,
    };
    info!(
        path = %artifact.path.display(),
        frames = artifact.frame_count,
        bytes = artifact.file_size,
        "replay clip written"
    );
    Ok(artifact)
}

fn encoder_args(pattern: &Path, dest: &Path, fps: u32) -> Vec<String> {
    vec![
        "-framerate".into(),
        fps.to_string(),
        "-i".into(),
        pattern.display().to_string(),
        "-c:v".into(),
        "libx264".into(),
        "-preset".into(),
        "fast".into(),
        "-crf".into(),
        "23".into(),
        "-pix_fmt".into(),
        "yuv420p".into(),
        // helps with in-browser playback
        "-movflags".into(),
        "+faststart".into(),
        "-y".into(),
        dest.display().to_string(),
    ]
}

async fn discard_partial(dest: &Path) {
    let _ = tokio::fs::remove_file(dest).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::FrameMetadata;
    use bytes::Bytes;

    fn frame(seq: u64) -> Arc<Frame> {
        Arc::new(Frame::new(
            Bytes::from_static(b"\xff\xd8jpeg\xff\xd9"),
            FrameMetadata {
                sequence: seq,
                width: 2,
                height: 2,
                detections: Vec::new(),
            },
        ))
    }

    fn cfg(encoder: &str) -> ReplayConfig {
        ReplayConfig {
            encoder_bin: encoder.into(),
            ..crate::Config::default().replay
        }
    }

    /// Stand-in encoder: a shell script that writes four bytes to its
    /// final argument, which is where the destination path goes.
    fn stub_encoder(dir: &Path) -> String {
        use std::os::unix::fs::PermissionsExt;
        let stub = dir.join("encoder.sh");
        std::fs::write(&stub, "#!/bin/sh\nfor last; do :; done\nprintf 'mp4!' > \"$last\"\n")
            .expect("write stub");
        let mut perms = std::fs::metadata(&stub).expect("stat").permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&stub, perms).expect("chmod");
        stub.display().to_string()
    }

    #[tokio::test]
    async fn successful_export_reports_window_metrics() {
        let dir = tempfile::tempdir().expect("tempdir");
        let dest = dir.path().join("out.mp4");

        let frames: Vec<_> = (0..30).map(frame).collect();
        let artifact = export_clip(&frames, &dest, &cfg(&stub_encoder(dir.path())))
            .await
            .expect("export succeeds");

        assert!(dest.exists());
        assert_eq!(artifact.path, dest);
        assert_eq!(artifact.frame_count, 30);
        // 30 frames at the default 15 fps
        assert_eq!(artifact.duration_secs, 2);
        assert_eq!(artifact.file_size, 4);
    }

    #[tokio::test]
    async fn empty_window_fails_cleanly_without_an_artifact() {
        let dir = tempfile::tempdir().expect("tempdir");
        let dest = dir.path().join("out.mp4");
        let err = export_clip(&[], &dest, &cfg("ffmpeg")).await.unwrap_err();
        assert!(matches!(err, ExportError::Empty));
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn encoder_failure_removes_partial_output() {
        let dir = tempfile::tempdir().expect("tempdir");
        let dest = dir.path().join("out.mp4");
        // Simulate the encoder dying after creating the file
        std::fs::write(&dest, b"partial").expect("seed partial file");

        let err = export_clip(&[frame(1)], &dest, &cfg("false"))
            .await
            .unwrap_err();
        assert!(matches!(err, ExportError::Encoder { .. }));
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn missing_encoder_is_an_io_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let dest = dir.path().join("out.mp4");
        let err = export_clip(&[frame(1)], &dest, &cfg("/nonexistent/encoder"))
            .await
            .unwrap_err();
        assert!(matches!(err, ExportError::Io(_)));
        assert!(!dest.exists());
    }

    #[test]
    fn encoder_args_match_the_expected_pipeline() {
        let args = encoder_args(Path::new("/tmp/x/frame_%05d.jpg"), Path::new("/tmp/out.mp4"), 15);
        assert_eq!(args[0..2], ["-framerate", "15"]);
        assert!(args.contains(&"libx264".to_string()));
        assert!(args.contains(&"yuv420p".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("/tmp/out.mp4"));
    }
}
