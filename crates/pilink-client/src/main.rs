use anyhow::Result;
use clap::Parser;
use log::{error, info, warn};
use pilink_camera::{Camera, Gphoto2, HardwareQueue};
use pilink_client::{command, live, Cli, ClientConfig, RuntimeContext, Supervisor};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

// how long the job in flight gets to finish on shutdown
const STOP_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = ClientConfig::from_cli(&cli)?;
    info!(
        "[{}] command {} / liveview {}",
        config.client_id,
        config.server_uri,
        config.liveview_uri()?
    );

    let camera = Camera::new(Gphoto2::new(&config.camera_utility), config.capture.clone());
    let queue = HardwareQueue::spawn(camera, config.settings.clone())?;
    let ctx = Arc::new(RuntimeContext::new(config, queue.handle())?);

    tokio::spawn({
        let hardware = ctx.hardware.clone();
        async move {
            match hardware.probe().await {
                Ok(probe) => info!("[camera] ready, latest file #{}", probe.latest_file),
                Err(e) => warn!("[camera] not ready: {e}"),
            }
        }
    });

    let restarts = Supervisor::new(ctx.config.restart_delay)
        .run(
            {
                let ctx = ctx.clone();
                move || command::run(ctx.clone())
            },
            {
                let ctx = ctx.clone();
                move || live::run(ctx.clone())
            },
            shutdown_signal(),
        )
        .await;
    info!("[supervisor] stopped after {restarts} restarts");

    let utility = ctx.config.camera_utility.clone();
    drop(ctx);

    // queued jobs are abandoned; only the one in flight may hold us up
    let stopped = tokio::task::spawn_blocking(move || queue.stop(STOP_GRACE))
        .await
        .unwrap_or(false);
    if !stopped {
        warn!("[camera] hardware worker did not stop within {STOP_GRACE:?}");
    }
    // the live capture child was already killed when its channel was cancelled
    if let Some(name) = process_name(&utility) {
        kill_stray_utilities(&name).await;
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

/// `pkill` matches process names, not paths.
fn process_name(program: &str) -> Option<String> {
    Path::new(program)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
}

/// Live capture processes are killed on drop, but a utility started by
/// another client or a crashed run can still hold the camera.
async fn kill_stray_utilities(utility: &str) {
    match tokio::process::Command::new("pkill")
        .args(["-9", utility])
        .status()
        .await
    {
        Ok(status) if status.success() => info!("Killed leftover {utility} processes"),
        Ok(_) => {}
        Err(e) => warn!("pkill {utility} failed: {e}"),
    }
}
