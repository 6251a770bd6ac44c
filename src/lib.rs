//! Layered LED rendering and effects engine.
//!
//! A [`device::Registry`] owns strips, rings and matrices. Each device has a
//! stack of layers: layer 0 carries fills, effects and images, higher layers
//! carry overlays such as text and the status indicator. The render thread
//! composites every device at a fixed frame rate, runs the result through
//! color correction and brightness, and pushes it to the device's sink.
//!
//! [`system::LedSystem`] ties this together with boot-state persistence and
//! is what the HTTP handlers in [`api`] and [`server`] drive.

pub mod animation;
pub mod api;
pub mod color;
pub mod config;
pub mod correction;
pub mod device;
pub mod error;
pub mod filter;
pub mod font;
pub mod geometry;
pub mod image_overlay;
pub mod layer;
pub mod media;
pub mod preset;
pub mod qrcode;
pub mod render;
pub mod server;
pub mod sink;
pub mod snapshot;
pub mod storage;
pub mod system;
pub mod text;

pub use error::{LedError, Result};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Set up a Ctrl+C handler that sets `running` to false.
///
/// # Rust concept: Arc and AtomicBool
/// The flag is shared between the signal handler, the render thread and the
/// server's shutdown future. `AtomicBool` needs no mutex for a single bool.
pub fn setup_signal_handler() -> std::result::Result<Arc<AtomicBool>, ctrlc::Error> {
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();

    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    Ok(running)
}

/// Check if the main loop should keep running.
pub fn is_running(running: &AtomicBool) -> bool {
    running.load(Ordering::SeqCst)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn running_flag_reads_through() {
        let flag = AtomicBool::new(true);
        assert!(is_running(&flag));
        flag.store(false, Ordering::SeqCst);
        assert!(!is_running(&flag));
    }
}
