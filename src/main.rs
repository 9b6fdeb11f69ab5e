//! Vigil: home-monitoring camera service for the Raspberry Pi.
//!
//! One background task pulls frames from the camera and publishes them;
//! the web layer serves live streams, snapshots, replays, and galleries.

use std::sync::Arc;
use std::time::Duration;

use color_eyre::eyre::WrapErr;
use color_eyre::Result;
use flume::bounded;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use vigil::capture::{CameraSource, Frame};
use vigil::events::ServiceEvent;
use vigil::monitor::DetectionMonitor;
use vigil::pipeline::{FrameBroadcaster, ReplayBuffer};
use vigil::server::{create_router, AppState};
use vigil::snapshot::SnapshotWriter;
use vigil::storage::Store;
use vigil::{CaptureConfig, Config, DetectConfig};

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vigil=info,tower_http=info".into()),
        )
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    info!("Vigil launching...");

    // Load configuration (optional path as the first argument)
    let config_path = std::env::args().nth(1);
    let config = Config::load(config_path.as_deref().map(std::path::Path::new))
        .wrap_err("loading configuration")?;
    vigil::CONFIG.store(Arc::new(config.clone()));

    // Data layout: photos/, photos/thumbs/, replays/, database
    let data_dir = config.storage.data_dir.clone();
    let replays_dir = data_dir.join("replays");
    std::fs::create_dir_all(&replays_dir).wrap_err("creating data directories")?;

    let store = Store::open(&data_dir.join(&config.storage.db_file))
        .wrap_err("opening metadata store")?;
    let snapshots = Arc::new(
        SnapshotWriter::new(&config.storage, store.clone()).wrap_err("preparing snapshot dirs")?,
    );

    let replay = Arc::new(ReplayBuffer::new(Duration::from_secs(
        config.replay.retention_secs,
    )));
    let broadcaster = Arc::new(FrameBroadcaster::new(
        replay.clone(),
        config.server.fanout_depth,
    ));
    let (events_tx, _) = broadcast::channel::<ServiceEvent>(64);

    // Capture -> publish stage
    let (tx, rx) = bounded::<Frame>(config.capture.channel_depth);
    tokio::spawn(supervise_camera(
        config.capture.clone(),
        config.detect,
        tx,
    ));

    let mut monitor = DetectionMonitor::new(
        snapshots.clone(),
        store.clone(),
        events_tx.clone(),
        Duration::from_secs(config.detect.cooldown_secs),
    );
    let publisher = broadcaster.clone();
    tokio::spawn(async move {
        while let Ok(frame) = rx.recv_async().await {
            let frame = publisher.publish(frame);
            monitor.observe(&frame);
        }
    });

    // Web layer
    let state = AppState {
        broadcaster,
        snapshots,
        store,
        events: events_tx,
        data_dir,
        replays_dir,
    };
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .wrap_err_with(|| format!("binding {}", config.server.bind))?;
    info!("Serving on http://{}", config.server.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Vigil shutting down");
    Ok(())
}

/// Keep the camera alive for the life of the process. Unavailability
/// (busy device, missing binary, process death) is never fatal: the loop
/// re-attempts on a timer while readers get the placeholder.
async fn supervise_camera(cfg: CaptureConfig, detect: DetectConfig, tx: flume::Sender<Frame>) {
    let retry = Duration::from_secs(cfg.retry_secs.max(1));
    loop {
        match CameraSource::open(&cfg, detect).await {
            Ok(mut source) => loop {
                match source.next_frame().await {
                    Ok(frame) => {
                        if tx.send_async(frame).await.is_err() {
                            return; // publisher gone, we are shutting down
                        }
                    }
                    Err(e) if e.is_unavailable() => {
                        warn!("camera became unavailable: {e}");
                        break;
                    }
                    Err(e) => {
                        error!("capture error: {e}");
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            },
            Err(e) => warn!("cannot open camera: {e}"),
        }
        tokio::time::sleep(retry).await;
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for shutdown signal: {e}");
    }
}
