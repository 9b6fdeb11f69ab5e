//! Durable snapshot writing: full image plus a downscaled thumbnail on
//! disk, one metadata row in the store.

use std::path::{Path, PathBuf};

use image::DynamicImage;
use tracing::{info, warn};

use crate::capture::Frame;
use crate::error::SnapshotError;
use crate::storage::Store;
use crate::StorageConfig;

#[derive(Debug, Clone)]
pub struct Snapshot {
    pub id: i64,
    pub path: PathBuf,
    pub thumb: Option<PathBuf>,
    pub timestamp: i64,
}

pub struct SnapshotWriter {
    photos_dir: PathBuf,
    thumbs_dir: PathBuf,
    thumb_size: (u32, u32),
    store: Store,
}

impl SnapshotWriter {
    pub fn new(cfg: &StorageConfig, store: Store) -> Result<Self, SnapshotError> {
        let photos_dir = cfg.data_dir.join("photos");
        let thumbs_dir = photos_dir.join("thumbs");
        std::fs::create_dir_all(&thumbs_dir)?;
        Ok(Self {
            photos_dir,
            thumbs_dir,
            thumb_size: (cfg.thumb_width, cfg.thumb_height),
            store,
        })
    }

    /// Persist one frame. The frame is decoded and re-encoded as plain
    /// three-channel JPEG: camera paths that hand us RGBA or other layouts
    /// must never reach an encoder that rejects them. Thumbnail failure is
    /// non-fatal; the photo row is written either way.
    pub fn capture(&self, frame: &Frame, prefix: &str) -> Result<Snapshot, SnapshotError> {
        let ts = frame.unix_ts();
        let fname = format!("{prefix}-{ts}-{}.jpg", frame.meta.sequence);

        let decoded = image::load_from_memory(&frame.data)?;
        let rgb = DynamicImage::ImageRgb8(decoded.to_rgb8());

        let path = self.photos_dir.join(&fname);
        rgb.save_with_format(&path, image::ImageFormat::Jpeg)?;

        let thumb = match self.write_thumb(&rgb, &fname) {
            Ok(p) => Some(p),
            Err(e) => {
                warn!("thumbnail generation failed for {fname}: {e}");
                None
            }
        };

        let id = self.store.add_photo(ts, &path.display().to_string())?;
        info!(photo = %fname, id, "snapshot saved");

        Ok(Snapshot {
            id,
            path,
            thumb,
            timestamp: ts,
        })
    }

    fn write_thumb(&self, img: &DynamicImage, fname: &str) -> Result<PathBuf, image::ImageError> {
        let (w, h) = self.thumb_size;
        let thumb = img.thumbnail(w, h);
        let path = self.thumbs_dir.join(fname);
        thumb.save_with_format(&path, image::ImageFormat::Jpeg)?;
        Ok(path)
    }

    pub fn photos_dir(&self) -> &Path {
        &self.photos_dir
    }

    pub fn thumbs_dir(&self) -> &Path {
        &self.thumbs_dir
    }
}
