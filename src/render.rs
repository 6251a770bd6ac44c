//! Render thread: ticks effects, composes layers and ships frames.
//!
//! One `std::thread` walks every registered device at a fixed rate. For each
//! device it takes that device's lock exactly once and runs the whole
//! pipeline under it: effect generators, text overlay, composition,
//! post-effects, color correction, brightness, sink output. The registry
//! lock is only held long enough to clone the device list, and no two device
//! locks are ever held together.
//!
//! ## Rust concepts
//! - `Arc<AtomicBool>` stop flag shared with the owner
//! - `thread::Builder` for a named thread and `JoinHandle::join` on stop
//! - `Instant`/`Duration` arithmetic for frame pacing

use crate::correction::ColorCorrector;
use crate::device::{Device, Registry};
use crate::error::{LedError, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{info, warn};

pub const DEFAULT_FPS: u32 = 60;

/// Slow frames logged before going quiet.
const SLOW_FRAME_LOG_LIMIT: u32 = 5;

// ── Time base ────────────────────────────────────────────────────────

/// Monotonic millisecond counter shared by the render thread and handlers.
#[derive(Clone, Copy, Debug)]
pub struct Clock {
    start: Instant,
}

impl Clock {
    pub fn new() -> Self {
        Self { start: Instant::now() }
    }

    pub fn now_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

// ── Frame pacing ─────────────────────────────────────────────────────

/// Fixed-rate deadline tracker with drift correction.
///
/// Falling more than two frames behind resyncs the deadline to `now`, so a
/// stall costs frames instead of producing a catch-up burst.
#[derive(Debug)]
pub struct FrameScheduler {
    frame_duration: Duration,
    next_frame: Instant,
}

impl FrameScheduler {
    pub fn new(fps: u32, start: Instant) -> Self {
        let fps = fps.clamp(1, 1000);
        Self {
            frame_duration: Duration::from_secs(1) / fps,
            next_frame: start,
        }
    }

    pub fn frame_duration(&self) -> Duration {
        self.frame_duration
    }

    /// Close the current frame at `now` and return how long to sleep.
    pub fn tick(&mut self, now: Instant) -> Duration {
        if now > self.next_frame + self.frame_duration * 2 {
            self.next_frame = now;
        }
        self.next_frame += self.frame_duration;
        self.next_frame.saturating_duration_since(now)
    }
}

// ── One device, one frame ────────────────────────────────────────────

/// Run the full pipeline for `device` at `now_ms`.
///
/// Sink failures come back as `Hardware` after being logged at most once per
/// second per device.
pub fn render_device(device: &Device, now_ms: u64, corrector: &ColorCorrector) -> Result<()> {
    let correction = corrector.snapshot();
    let brightness = device.brightness();
    let mut state = device.lock()?;

    state.tick_effects(now_ms);
    state.tick_text(now_ms);
    state.compose(now_ms);

    match state.push(&correction, brightness) {
        Ok(()) => Ok(()),
        Err(err) => {
            if let Some(suppressed) = state.errors.allow(Instant::now()) {
                if suppressed > 0 {
                    warn!("Output on {} failed: {} ({} more suppressed)", device.name(), err, suppressed);
                } else {
                    warn!("Output on {} failed: {}", device.name(), err);
                }
            }
            Err(LedError::Hardware(err.message().to_string()))
        }
    }
}

// ── Render thread ────────────────────────────────────────────────────

pub struct RenderLoop {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl RenderLoop {
    pub fn spawn(registry: Arc<Registry>, corrector: Arc<ColorCorrector>, clock: Clock, fps: u32) -> Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();
        let handle = thread::Builder::new()
            .name("led-render".to_string())
            .spawn(move || run(&registry, &corrector, clock, fps, &flag))?;
        Ok(Self {
            running,
            handle: Some(handle),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Signal the thread and wait for it to finish its current frame.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for RenderLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(registry: &Registry, corrector: &ColorCorrector, clock: Clock, fps: u32, running: &AtomicBool) {
    let mut scheduler = FrameScheduler::new(fps, Instant::now());
    let target = scheduler.frame_duration();
    let mut frame: u64 = 0;
    let mut slow_frame_count = 0u32;

    info!("Render thread started at {} fps", fps);

    while running.load(Ordering::Acquire) {
        let frame_start = Instant::now();
        let now_ms = clock.now_ms();

        for device in registry.list() {
            // destroyed mid-walk or a sink error already logged
            let _ = render_device(&device, now_ms, corrector);
        }

        let frame_time = frame_start.elapsed();
        if frame_time > target {
            slow_frame_count += 1;
            if slow_frame_count <= SLOW_FRAME_LOG_LIMIT {
                warn!(
                    "Frame {} took {}ms (target: {}ms)",
                    frame,
                    frame_time.as_millis(),
                    target.as_millis()
                );
            }
        }
        frame += 1;

        let sleep = scheduler.tick(Instant::now());
        if !sleep.is_zero() {
            thread::sleep(sleep);
        }
    }

    if slow_frame_count > 0 {
        warn!("Render thread saw {} slow frames out of {}", slow_frame_count, frame);
    }
    info!("Render thread stopped after {} frames", frame);
}
