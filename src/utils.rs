use std::time::SystemTime;

use bytes::Bytes;
use image::{codecs::jpeg::JpegEncoder, Rgb, RgbImage};
use once_cell::sync::Lazy;

/// Dark gray "no camera" image, served whenever no frame is available.
/// Built once; encoding a solid RGB image to an in-memory buffer cannot fail.
pub static PLACEHOLDER_JPEG: Lazy<Bytes> = Lazy::new(|| {
    let img = RgbImage::from_pixel(640, 480, Rgb([64, 64, 64]));
    let mut buf = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut buf, 85);
    encoder
        .encode_image(&img)
        .expect("placeholder encodes to memory");
    Bytes::from(buf)
});

/// Seconds since the unix epoch, clamped to zero for pre-epoch clocks
pub fn unix_ts(t: SystemTime) -> i64 {
    t.duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

pub fn now_ts() -> i64 {
    unix_ts(SystemTime::now())
}

/// Final path component of a stored file, for building public URLs
pub fn file_name(path: &str) -> Option<&str> {
    std::path::Path::new(path).file_name()?.to_str()
}

pub fn public_photo_path(fname: &str) -> String {
    format!("/data/photos/{fname}")
}

pub fn public_thumb_path(fname: &str) -> String {
    format!("/data/photos/thumbs/{fname}")
}

pub fn public_replay_path(fname: &str) -> String {
    format!("/data/replays/{fname}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_is_a_jpeg() {
        assert_eq!(&PLACEHOLDER_JPEG[..2], &[0xFF, 0xD8]);
        let img = image::load_from_memory(&PLACEHOLDER_JPEG).expect("decodes");
        assert_eq!((img.width(), img.height()), (640, 480));
    }

    #[test]
    fn file_name_strips_directories() {
        assert_eq!(file_name("/data/photos/detection-5.jpg"), Some("detection-5.jpg"));
        assert_eq!(file_name("bare.jpg"), Some("bare.jpg"));
    }
}
