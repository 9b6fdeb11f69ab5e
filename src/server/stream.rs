//! Live MJPEG endpoint: a multipart/x-mixed-replace body where each part
//! is one JPEG, pushed at the camera's natural rate.

use std::convert::Infallible;

use axum::body::Body;
use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use bytes::{BufMut, Bytes, BytesMut};
use tokio::sync::broadcast::error::RecvError;

use crate::capture::Frame;

use super::AppState;

const BOUNDARY: &str = "frame";

pub async fn mjpeg_stream(State(state): State<AppState>) -> impl IntoResponse {
    let rx = state.broadcaster.subscribe();
    let broadcaster = state.broadcaster.clone();

    // A slow client lags the broadcast channel and simply skips ahead;
    // dropping the connection ends the stream without touching anyone else.
    let stream = futures::stream::unfold((rx, broadcaster), |(mut rx, b)| async move {
        loop {
            match rx.recv().await {
                Ok(frame) => return Some((Ok::<_, Infallible>(encode_part(&frame)), (rx, b))),
                Err(RecvError::Lagged(n)) => {
                    b.note_lagged(n);
                    continue;
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });

    (
        [
            (
                header::CONTENT_TYPE,
                format!("multipart/x-mixed-replace; boundary={BOUNDARY}"),
            ),
            (header::CACHE_CONTROL, "no-store".to_string()),
        ],
        Body::from_stream(stream),
    )
}

fn encode_part(frame: &Frame) -> Bytes {
    let header = format!(
        "--{BOUNDARY}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        frame.data.len()
    );
    let mut part = BytesMut::with_capacity(header.len() + frame.data.len() + 2);
    part.put_slice(header.as_bytes());
    part.put_slice(&frame.data);
    part.put_slice(b"\r\n");
    part.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::FrameMetadata;

    #[test]
    fn parts_carry_boundary_and_exact_length() {
        let frame = Frame::new(
            Bytes::from_static(b"\xff\xd8abc\xff\xd9"),
            FrameMetadata {
                sequence: 1,
                width: 2,
                height: 2,
                detections: Vec::new(),
            },
        );
        let part = encode_part(&frame);
        let text = String::from_utf8_lossy(&part);
        assert!(text.starts_with("--frame\r\n"));
        assert!(text.contains("Content-Length: 7\r\n"));
        assert!(part.ends_with(b"\xff\xd9\r\n"));
    }
}
