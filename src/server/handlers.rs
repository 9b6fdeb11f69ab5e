//! JSON API handlers. Every failure becomes `{ "error": ... }` with an
//! appropriate status; none of them can disturb the publishing task.

use std::path::PathBuf;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::error::{SnapshotError, StoreError};
use crate::events::ServiceEvent;
use crate::pipeline::export_clip;
use crate::storage::EventRow;
use crate::utils::{
    self, now_ts, public_photo_path, public_replay_path, public_thumb_path, PLACEHOLDER_JPEG,
};

use super::AppState;

pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        ApiError::internal(e.to_string())
    }
}

impl From<SnapshotError> for ApiError {
    fn from(e: SnapshotError) -> Self {
        match e {
            SnapshotError::NoFrame => ApiError::unavailable(e.to_string()),
            other => ApiError::internal(other.to_string()),
        }
    }
}

// --- frames & snapshots ---

/// Current frame as a plain JPEG; the placeholder when the camera has not
/// produced anything yet.
pub async fn latest_frame(State(state): State<AppState>) -> impl IntoResponse {
    let data = state
        .broadcaster
        .latest()
        .map(|f| f.data.clone())
        .unwrap_or_else(|| PLACEHOLDER_JPEG.clone());
    (
        [
            (header::CONTENT_TYPE, "image/jpeg"),
            (header::CACHE_CONTROL, "no-store"),
        ],
        data,
    )
}

pub async fn take_snapshot(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let frame = state.broadcaster.latest().ok_or(SnapshotError::NoFrame)?;

    let snapshots = state.snapshots.clone();
    let snap = tokio::task::spawn_blocking(move || snapshots.capture(&frame, "photo"))
        .await
        .map_err(|e| ApiError::internal(format!("snapshot task failed: {e}")))??;

    let fname = snap
        .path
        .file_name()
        .and_then(|f| f.to_str())
        .unwrap_or_default()
        .to_string();
    let public = public_photo_path(&fname);
    let thumb = snap.thumb.is_some().then(|| public_thumb_path(&fname));

    let _ = state.events.send(
        ServiceEvent::named("photo_taken")
            .with_id(snap.id)
            .with_path(public.clone())
            .with_thumb(thumb.clone()),
    );

    Ok(Json(json!({
        "id": snap.id,
        "path": public,
        "thumb": thumb,
        "ts": snap.timestamp,
    })))
}

// --- photos ---

#[derive(Deserialize)]
pub struct LimitParams {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    100
}

pub async fn list_photos(
    State(state): State<AppState>,
    Query(params): Query<LimitParams>,
) -> Result<Json<Value>, ApiError> {
    let rows = state.store.list_photos(params.limit)?;
    let out: Vec<Value> = rows
        .iter()
        .map(|r| {
            let fname = utils::file_name(&r.path);
            json!({
                "id": r.id,
                "timestamp": r.timestamp,
                "path": fname.map(public_photo_path).unwrap_or_else(|| r.path.clone()),
                "thumb": fname.map(public_thumb_path),
            })
        })
        .collect();
    Ok(Json(json!(out)))
}

pub async fn delete_photo(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    let path = state
        .store
        .delete_photo(id)?
        .ok_or_else(|| ApiError::not_found("photo not found"))?;

    remove_photo_files(&state, &path).await;
    let _ = state.events.send(ServiceEvent::named("photo_deleted").with_id(id));
    Ok(Json(json!({ "success": true, "id": id })))
}

pub async fn delete_all_photos(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let paths = state.store.delete_all_photos()?;
    let deleted = paths.len();
    for path in &paths {
        remove_photo_files(&state, path).await;
    }
    let _ = state
        .events
        .send(ServiceEvent::named("photos_cleared").with_count(deleted));
    Ok(Json(json!({ "success": true, "deleted": deleted })))
}

/// Remove a stored photo and its thumbnail; rows are already gone, so a
/// failing unlink is only worth a warning.
async fn remove_photo_files(state: &AppState, path: &str) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        warn!("failed to delete photo file {path}: {e}");
    }
    if let Some(fname) = utils::file_name(path) {
        let thumb = state.data_dir.join("photos").join("thumbs").join(fname);
        let _ = tokio::fs::remove_file(thumb).await;
    }
}

// --- events & heatmap ---

pub async fn list_events(
    State(state): State<AppState>,
    Query(params): Query<LimitParams>,
) -> Result<Json<Vec<EventRow>>, ApiError> {
    Ok(Json(state.store.list_events(params.limit)?))
}

pub async fn clear_events(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let deleted = state.store.clear_events()?;
    let _ = state
        .events
        .send(ServiceEvent::named("events_cleared").with_count(deleted));
    Ok(Json(json!({ "success": true, "deleted": deleted })))
}

pub async fn clear_invalid_events(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let deleted = state.store.clear_events_without_snapshots()?;
    let _ = state
        .events
        .send(ServiceEvent::named("invalid_events_cleared").with_count(deleted));
    Ok(Json(json!({ "success": true, "deleted": deleted })))
}

#[derive(Deserialize)]
pub struct HeatmapParams {
    #[serde(default = "default_days")]
    pub days: u32,
}

fn default_days() -> u32 {
    30
}

pub async fn heatmap(
    State(state): State<AppState>,
    Query(params): Query<HeatmapParams>,
) -> Result<Json<Value>, ApiError> {
    Ok(Json(json!(state.store.heatmap(params.days)?)))
}

#[derive(Deserialize)]
pub struct HeatmapPhotosParams {
    pub weekday: u32,
    pub hour: u32,
    #[serde(default = "default_cell_days")]
    pub days: u32,
    #[serde(default = "default_cell_limit")]
    pub limit: usize,
    #[serde(default = "default_label")]
    pub label: String,
}

fn default_cell_days() -> u32 {
    7
}

fn default_cell_limit() -> usize {
    3
}

fn default_label() -> String {
    "person".into()
}

pub async fn heatmap_photos(
    State(state): State<AppState>,
    Query(params): Query<HeatmapPhotosParams>,
) -> Result<Json<Value>, ApiError> {
    if params.weekday > 6 || params.hour > 23 {
        return Err(ApiError::bad_request("weekday must be 0..=6, hour 0..=23"));
    }
    let rows = state.store.heatmap_photos(
        params.weekday,
        params.hour,
        params.days,
        params.limit,
        &params.label,
    )?;
    let out: Vec<Value> = rows
        .iter()
        .map(|r| {
            let fname = r.snapshot_path.as_deref().and_then(utils::file_name);
            json!({
                "id": r.id,
                "timestamp": r.timestamp,
                "label": r.label,
                "confidence": r.confidence,
                "path": fname.map(public_photo_path),
                "thumb": fname.map(public_thumb_path),
            })
        })
        .collect();
    Ok(Json(json!(out)))
}

// --- replays ---

#[derive(Deserialize)]
pub struct ReplayParams {
    #[serde(default = "default_seconds")]
    pub seconds: u64,
}

fn default_seconds() -> u64 {
    30
}

/// Kick off a clip export of the trailing `seconds`. Encoding takes a
/// while, so the request answers immediately; completion is announced on
/// the WebSocket event channel and the file lands under /data/replays.
pub async fn create_replay(
    State(state): State<AppState>,
    Query(params): Query<ReplayParams>,
) -> Result<Json<Value>, ApiError> {
    let cfg = crate::CONFIG.load_full();
    let max = cfg.replay.max_export_secs;
    if params.seconds == 0 || params.seconds > max {
        return Err(ApiError::bad_request(format!("seconds must be 1..={max}")));
    }
    if state.broadcaster.latest().is_none() {
        return Err(ApiError::unavailable("camera not running"));
    }

    tokio::fs::create_dir_all(&state.replays_dir)
        .await
        .map_err(|e| ApiError::internal(format!("cannot create replays dir: {e}")))?;

    let ts = now_ts();
    let filename = format!("replay-{ts}-{}s.mp4", params.seconds);
    let dest = state.replays_dir.join(&filename);
    let public = public_replay_path(&filename);

    tokio::spawn(run_export(state.clone(), params.seconds, dest, filename.clone()));

    Ok(Json(json!({
        "status": "encoding",
        "message": "replay is being created in background",
        "filename": filename,
        "path": public,
        "timestamp": ts,
        "seconds": params.seconds,
    })))
}

async fn run_export(state: AppState, seconds: u64, dest: PathBuf, filename: String) {
    let cfg = crate::CONFIG.load_full();
    let frames = state
        .broadcaster
        .replay()
        .window(Duration::from_secs(seconds));
    // The clip starts where the first retained frame does, not at request time
    let start_ts = frames.first().map(|f| f.unix_ts()).unwrap_or_else(now_ts);

    let artifact = match export_clip(&frames, &dest, &cfg.replay).await {
        Ok(a) => a,
        Err(e) => {
            warn!("replay export failed: {e}");
            let _ = state
                .events
                .send(ServiceEvent::error(format!("Replay encoding failed: {e}")));
            return;
        }
    };

    match state.store.add_replay(
        start_ts,
        artifact.duration_secs as i64,
        artifact.frame_count as i64,
        artifact.file_size as i64,
        &dest.display().to_string(),
    ) {
        Ok(id) => {
            if let Ok(evicted) = state.store.prune_replays(cfg.replay.keep_replays) {
                for path in evicted {
                    let _ = tokio::fs::remove_file(&path).await;
                }
            }
            info!(%filename, id, "replay saved");
            let _ = state.events.send(
                ServiceEvent::named("replay_saved")
                    .with_id(id)
                    .with_duration(artifact.duration_secs)
                    .with_path(public_replay_path(&filename)),
            );
        }
        Err(e) => {
            warn!("failed to record replay row: {e}");
            let _ = state
                .events
                .send(ServiceEvent::error(format!("Replay bookkeeping failed: {e}")));
        }
    }
}

pub async fn list_replays(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let rows = state.store.list_replays(100)?;
    let out: Vec<Value> = rows
        .iter()
        .map(|r| {
            json!({
                "id": r.id,
                "timestamp": r.timestamp,
                "duration": r.duration,
                "frame_count": r.frame_count,
                "file_size": r.file_size,
                "path": utils::file_name(&r.path)
                    .map(public_replay_path)
                    .unwrap_or_else(|| r.path.clone()),
            })
        })
        .collect();
    Ok(Json(json!(out)))
}

pub async fn delete_replay(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    let path = state
        .store
        .delete_replay(id)?
        .ok_or_else(|| ApiError::not_found("replay not found"))?;
    if let Err(e) = tokio::fs::remove_file(&path).await {
        warn!("failed to delete replay file {path}: {e}");
    }
    Ok(Json(json!({ "success": true, "id": id })))
}

pub async fn delete_all_replays(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let paths = state.store.delete_all_replays()?;
    let deleted = paths.len();
    for path in &paths {
        if let Err(e) = tokio::fs::remove_file(path).await {
            warn!("failed to delete replay file {path}: {e}");
        }
    }
    let _ = state
        .events
        .send(ServiceEvent::named("replays_cleared").with_count(deleted));
    Ok(Json(json!({ "success": true, "deleted": deleted })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listing_defaults_to_one_hundred_rows() {
        let p: LimitParams = serde_json::from_str("{}").expect("deserializes");
        assert_eq!(p.limit, 100);
    }
}
