//! LED Effects HTTP API Server
//!
//! Brings up the configured LED devices, starts the render thread, replays
//! saved boot state and serves the control API.
//!
//! ## Architecture
//! - **Render thread** (std::thread): composites and pushes every device each frame
//! - **HTTP server** (tokio/axum): handlers mutate device state under its lock
//!
//! ## Rust concepts
//! - `#[tokio::main]` async entry point
//! - `axum::serve(..).with_graceful_shutdown(..)` driven by the Ctrl+C flag
//! - `Arc` to share the system between the server and the render thread
//!
//! ## Usage
//! ```sh
//! ./target/release/led-effects-rs --media-dir /path/to/media --port 8080
//! ```

use clap::Parser;
use led_effects_rs::config::{CliArgs, SystemConfig};
use led_effects_rs::render::RenderLoop;
use led_effects_rs::server::{self, AppState};
use led_effects_rs::storage::FileKvStore;
use led_effects_rs::system::LedSystem;
use led_effects_rs::{is_running, setup_signal_handler};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_ansi(false) // Disable ANSI color codes for systemd/journald
        .compact()
        .init();

    let args = CliArgs::parse();
    let config = SystemConfig::from_args(&args)?;
    let running = setup_signal_handler()?;

    tracing::info!("LED Effects HTTP Server v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("State dir: {}", config.state_dir.display());
    tracing::info!("Media dir: {}", config.media_dir.display());
    tracing::info!("Fonts dir: {}", config.fonts_dir.display());

    let store = Arc::new(FileKvStore::new(&config.state_dir));
    let system = Arc::new(LedSystem::new(store, config.paths()));
    let created = system.create_devices(&config.devices);
    tracing::info!("{} of {} devices up", created, config.devices.len());

    let mut render = RenderLoop::spawn(
        system.registry().clone(),
        system.corrector().clone(),
        system.clock(),
        config.fps,
    )?;

    if config.restore {
        system.load_all_boot_config();
    } else {
        tracing::info!("Boot restore skipped");
    }

    let app = server::create_router(AppState { system: system.clone() });

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("Listening on http://{}", addr);
    tracing::info!("API Documentation: http://localhost:{}/docs", config.port);
    tracing::info!("Try: curl http://localhost:{}/api/v1/led/list", config.port);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_stop(running))
        .await?;

    tracing::info!("Shutting down");
    render.stop();
    system.shutdown();
    Ok(())
}

/// Resolves once Ctrl+C has cleared the running flag.
async fn wait_for_stop(running: Arc<AtomicBool>) {
    let mut tick = tokio::time::interval(Duration::from_millis(100));
    while is_running(&running) {
        tick.tick().await;
    }
}
