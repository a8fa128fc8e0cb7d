use anyhow::Result;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;
mod sink;

use config::Config;
use dbus_interface::{BeamService, BUS_NAME, OBJECT_PATH};
use engine::{DeviceCapabilities, EngineSettings, SessionController};
use sink::{Fanout, PresentationSink, ReadoutBoard, ThumbnailWriter};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("beamd starting");

    let config = Config::load()?;
    tracing::info!(
        camera = %config.camera_device,
        model_dir = %config.model_dir.display(),
        sample_rate_hz = config.sample_rate_hz,
        refresh_rate_hz = config.refresh_rate_hz,
        alpha = config.smoothing_alpha,
        "configuration loaded"
    );

    let board = Arc::new(ReadoutBoard::default());
    let mut sinks: Vec<Arc<dyn PresentationSink>> = vec![board.clone()];
    if let Some(path) = &config.thumbnail_path {
        tracing::info!(path = %path.display(), size = config.thumbnail_size, "writing face thumbnails");
        sinks.push(Arc::new(ThumbnailWriter::new(path.clone(), config.thumbnail_size)));
    }

    let controller = Arc::new(SessionController::new(
        Arc::new(DeviceCapabilities::from_config(&config)),
        Arc::new(Fanout::new(sinks)),
        EngineSettings::from_config(&config),
    ));

    let service = BeamService::new(controller.clone(), board);
    let _connection = zbus::connection::Builder::session()?
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await?;

    tracing::info!(bus = BUS_NAME, path = OBJECT_PATH, "beamd ready");

    if config.autostart {
        if let Err(e) = controller.start().await {
            tracing::warn!(error = %e, "autostart failed; waiting for Start()");
        }
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("beamd shutting down");
    controller.stop().await;

    Ok(())
}
