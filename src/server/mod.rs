pub mod handlers;
pub mod stream;
pub mod ws;

use std::path::PathBuf;
use std::sync::Arc;

use axum::routing::{delete, get, post};
use axum::Router;
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::events::ServiceEvent;
use crate::pipeline::FrameBroadcaster;
use crate::snapshot::SnapshotWriter;
use crate::storage::Store;

#[derive(Clone)]
pub struct AppState {
    pub broadcaster: Arc<FrameBroadcaster>,
    pub snapshots: Arc<SnapshotWriter>,
    pub store: Store,
    pub events: broadcast::Sender<ServiceEvent>,
    pub data_dir: PathBuf,
    pub replays_dir: PathBuf,
}

pub fn create_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/stream", get(stream::mjpeg_stream))
        .route("/frame", get(handlers::latest_frame))
        .route("/snapshot", post(handlers::take_snapshot))
        .route(
            "/photos",
            get(handlers::list_photos).delete(handlers::delete_all_photos),
        )
        .route("/photo/:id", delete(handlers::delete_photo))
        .route(
            "/events",
            get(handlers::list_events).delete(handlers::clear_events),
        )
        .route("/events/invalid", delete(handlers::clear_invalid_events))
        .route("/heatmap", get(handlers::heatmap))
        .route("/heatmap/photos", get(handlers::heatmap_photos))
        .route("/replay", post(handlers::create_replay))
        .route(
            "/replays",
            get(handlers::list_replays).delete(handlers::delete_all_replays),
        )
        .route("/replay/:id", delete(handlers::delete_replay))
        .route("/ws", get(ws::ws_handler))
        .with_state(state.clone());

    let mut router = Router::new()
        .nest("/api", api)
        .route("/health", get(|| async { "OK" }))
        .nest_service("/data", ServeDir::new(&state.data_dir));

    // Static front end at the root, when configured
    if let Some(static_dir) = crate::CONFIG.load().server.static_dir.clone() {
        router = router.fallback_service(ServeDir::new(static_dir));
    }

    router
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
