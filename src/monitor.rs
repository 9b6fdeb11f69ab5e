//! Reactions to person detections on published frames: auto-capture a
//! snapshot, record an event row, and notify WebSocket listeners, rate
//! limited by a cooldown so a lingering person does not flood the gallery.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::capture::Frame;
use crate::events::ServiceEvent;
use crate::snapshot::SnapshotWriter;
use crate::storage::Store;
use crate::utils;

pub struct DetectionMonitor {
    writer: Arc<SnapshotWriter>,
    store: Store,
    events: broadcast::Sender<ServiceEvent>,
    cooldown: Duration,
    last_fired: Option<Instant>,
}

impl DetectionMonitor {
    pub fn new(
        writer: Arc<SnapshotWriter>,
        store: Store,
        events: broadcast::Sender<ServiceEvent>,
        cooldown: Duration,
    ) -> Self {
        Self {
            writer,
            store,
            events,
            cooldown,
            last_fired: None,
        }
    }

    /// Called by the publisher loop for every published frame. Heavy work
    /// (decode, disk writes) runs off the publishing path.
    pub fn observe(&mut self, frame: &Arc<Frame>) {
        let Some(best) = frame
            .persons()
            .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
        else {
            return;
        };

        if self.last_fired.is_some_and(|t| t.elapsed() < self.cooldown) {
            return;
        }
        self.last_fired = Some(Instant::now());

        let confidence = best.confidence;
        let frame = frame.clone();
        let writer = self.writer.clone();
        let store = self.store.clone();
        let events = self.events.clone();

        tokio::task::spawn_blocking(move || {
            let snapshot_path = match writer.capture(&frame, "detection") {
                Ok(snap) => {
                    let fname = snap
                        .path
                        .file_name()
                        .and_then(|f| f.to_str())
                        .unwrap_or_default()
                        .to_string();
                    let public = utils::public_photo_path(&fname);
                    let thumb = snap.thumb.is_some().then(|| utils::public_thumb_path(&fname));
                    let _ = events.send(
                        ServiceEvent::named("photo_taken")
                            .with_id(snap.id)
                            .with_path(public.clone())
                            .with_thumb(thumb),
                    );
                    Some(public)
                }
                Err(e) => {
                    warn!("auto-capture failed: {e}");
                    None
                }
            };

            // The event row is recorded even when the snapshot failed
            if let Err(e) = store.add_event(
                frame.unix_ts(),
                "person",
                f64::from(confidence),
                snapshot_path.as_deref(),
            ) {
                warn!("failed to record detection event: {e}");
            }

            let pct = (confidence * 100.0).round() as u32;
            let _ = events.send(ServiceEvent::notification(format!(
                "Person detected ({pct}% confidence)"
            )));
            info!(confidence, "person detected");
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{Detection, FrameMetadata};
    use crate::StorageConfig;
    use bytes::Bytes;
    use image::{DynamicImage, Rgb, RgbImage};
    use std::io::Cursor;

    fn detection_frame() -> Arc<Frame> {
        let img = RgbImage::from_pixel(16, 16, Rgb([1, 2, 3]));
        let mut buf = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut buf, image::ImageFormat::Jpeg)
            .expect("encode");
        Arc::new(Frame::new(
            Bytes::from(buf.into_inner()),
            FrameMetadata {
                sequence: 1,
                width: 16,
                height: 16,
                detections: vec![Detection {
                    label: "person".into(),
                    class_id: 0,
                    confidence: 0.8,
                    bbox: [0.1, 0.1, 0.5, 0.9],
                }],
            },
        ))
    }

    #[tokio::test]
    async fn reacts_once_per_cooldown_window() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Store::open_in_memory().expect("store");
        let cfg = StorageConfig {
            data_dir: dir.path().to_path_buf(),
            db_file: "t.db".into(),
            thumb_width: 30,
            thumb_height: 20,
        };
        let writer = Arc::new(SnapshotWriter::new(&cfg, store.clone()).expect("writer"));
        let (tx, mut rx) = broadcast::channel(16);

        let mut monitor =
            DetectionMonitor::new(writer, store.clone(), tx, Duration::from_secs(60));

        let frame = detection_frame();
        monitor.observe(&frame);
        monitor.observe(&frame); // inside the cooldown, must not fire

        // photo_taken followed by the notification
        let ev = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("event in time")
            .expect("channel open");
        assert!(matches!(ev, ServiceEvent::Event { ref name, .. } if name == "photo_taken"));
        let ev = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("event in time")
            .expect("channel open");
        assert!(matches!(ev, ServiceEvent::Notification { .. }));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(rx.try_recv().is_err(), "second observe fired inside cooldown");

        let events = store.list_events(10).expect("events");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].label.as_deref(), Some("person"));
        assert!(events[0].snapshot_path.as_deref().is_some_and(|p| p.starts_with("/data/photos/")));
    }

    #[tokio::test]
    async fn frames_without_persons_are_ignored() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Store::open_in_memory().expect("store");
        let cfg = StorageConfig {
            data_dir: dir.path().to_path_buf(),
            db_file: "t.db".into(),
            thumb_width: 30,
            thumb_height: 20,
        };
        let writer = Arc::new(SnapshotWriter::new(&cfg, store.clone()).expect("writer"));
        let (tx, mut rx) = broadcast::channel(16);
        let mut monitor = DetectionMonitor::new(writer, store, tx, Duration::from_secs(1));

        let frame = Arc::new(Frame::new(
            Bytes::from_static(b"\xff\xd8x\xff\xd9"),
            FrameMetadata {
                sequence: 1,
                width: 2,
                height: 2,
                detections: Vec::new(),
            },
        ));
        monitor.observe(&frame);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(rx.try_recv().is_err());
    }
}
