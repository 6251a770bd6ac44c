//! Device registry.
//!
//! A device is one physical LED surface: its geometry, a stack of layers,
//! the composed framebuffer and the sink frames are shipped through. All
//! mutable state sits behind one mutex per device; brightness is a lone
//! atomic byte so it can be changed without waiting for a frame.
//!
//! ## Rust concepts
//! - `Arc<Device>` handles shared by the render thread, request handlers and
//!   overlay threads
//! - Atomics (`AtomicU8`, `AtomicBool`, `AtomicU64`) for state read without the lock
//! - Poisoned mutexes recovered with `into_inner` so one panicking handler
//!   doesn't take the display down

use crate::color::Rgb;
use crate::correction::CorrectionSnapshot;
use crate::error::{LedError, Result};
use crate::geometry::{Geometry, Layout, Origin, Scan};
use crate::layer::{Layer, LayerConfig, MAX_LAYERS};
use crate::sink::{OutputConfig, OutputSink, SinkInit, SinkPath};
use crate::text::TextOverlay;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::info;

pub const MAX_DEVICES: usize = 8;
pub const MAX_NAME_LEN: usize = 32;

// ── Configuration ────────────────────────────────────────────────────

fn default_height() -> u16 {
    1
}

fn default_brightness() -> u8 {
    128
}

/// Creation parameters for a device.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct DeviceConfig {
    pub name: String,
    #[serde(default)]
    pub layout: Layout,
    /// LED count for strips and rings, columns for matrices.
    pub width: u16,
    #[serde(default = "default_height")]
    pub height: u16,
    #[serde(default)]
    pub scan: Scan,
    #[serde(default)]
    pub origin: Origin,
    #[serde(default = "default_brightness")]
    pub brightness: u8,
    #[serde(default)]
    pub output: OutputConfig,
}

impl DeviceConfig {
    pub fn strip(name: &str, len: u16, brightness: u8) -> Self {
        Self::linear(name, Layout::Strip, len, brightness)
    }

    pub fn ring(name: &str, len: u16, brightness: u8) -> Self {
        Self::linear(name, Layout::Ring, len, brightness)
    }

    fn linear(name: &str, layout: Layout, len: u16, brightness: u8) -> Self {
        Self {
            name: name.to_string(),
            layout,
            width: len,
            height: 1,
            scan: Scan::Rows,
            origin: Origin::TopLeft,
            brightness,
            output: OutputConfig::Memory,
        }
    }

    pub fn matrix(name: &str, width: u16, height: u16, scan: Scan, origin: Origin, brightness: u8) -> Self {
        Self {
            name: name.to_string(),
            layout: Layout::Matrix,
            width,
            height,
            scan,
            origin,
            brightness,
            output: OutputConfig::Memory,
        }
    }

    pub fn with_output(mut self, output: OutputConfig) -> Self {
        self.output = output;
        self
    }

    pub fn geometry(&self) -> Geometry {
        match self.layout {
            Layout::Strip | Layout::Ring => Geometry::linear(self.width),
            Layout::Matrix => Geometry::matrix(self.width, self.height, self.scan, self.origin),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.name.is_empty() || self.name.len() > MAX_NAME_LEN {
            return Err(LedError::invalid_arg(format!(
                "device name must be 1-{MAX_NAME_LEN} bytes, got {:?}",
                self.name
            )));
        }
        if self.layout != Layout::Matrix && self.height > 1 {
            return Err(LedError::invalid_arg(format!(
                "{} devices have a single row, got height {}",
                self.layout.as_str(),
                self.height
            )));
        }
        if self.geometry().led_count() == 0 {
            return Err(LedError::invalid_arg(format!("{} has no LEDs", self.name)));
        }
        Ok(())
    }
}

// ── Device ───────────────────────────────────────────────────────────

/// Rate limiter for sink error logs.
#[derive(Debug, Default)]
pub(crate) struct ErrorThrottle {
    pub last_logged: Option<Instant>,
    pub suppressed: u32,
}

impl ErrorThrottle {
    const WINDOW: Duration = Duration::from_secs(1);

    /// `Some(suppressed since last log)` when an error may be logged at `now`.
    pub fn allow(&mut self, now: Instant) -> Option<u32> {
        match self.last_logged {
            Some(t) if now.duration_since(t) < Self::WINDOW => {
                self.suppressed += 1;
                None
            }
            _ => {
                self.last_logged = Some(now);
                Some(std::mem::take(&mut self.suppressed))
            }
        }
    }
}

/// Everything guarded by the device lock.
pub struct DeviceState {
    geometry: Geometry,
    pub(crate) framebuffer: Vec<Rgb>,
    layers: Vec<Layer>,
    pub(crate) sink: Box<dyn OutputSink>,
    /// Scrolling or static text drawn on layer 1 every frame.
    pub(crate) text: Option<TextOverlay>,
    pub(crate) errors: ErrorThrottle,
}

impl DeviceState {
    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub fn framebuffer(&self) -> &[Rgb] {
        &self.framebuffer
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub(crate) fn layers_mut(&mut self) -> &mut [Layer] {
        &mut self.layers
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    /// Layer `index`; layers up to and including it are created on demand.
    pub fn layer(&mut self, index: usize) -> Result<&mut Layer> {
        if index >= MAX_LAYERS {
            return Err(LedError::invalid_arg(format!(
                "layer {index} outside 0..{MAX_LAYERS}"
            )));
        }
        while self.layers.len() <= index {
            self.layers.push(Layer::new(self.geometry, LayerConfig::default()));
        }
        Ok(&mut self.layers[index])
    }

    /// The base layer, created on first use.
    pub fn base(&mut self) -> &mut Layer {
        if self.layers.is_empty() {
            self.layers.push(Layer::new(self.geometry, LayerConfig::default()));
        }
        &mut self.layers[0]
    }

    /// Append a layer and return its index.
    pub fn layer_create(&mut self, config: LayerConfig) -> Result<usize> {
        if self.layers.is_empty() {
            self.base();
        }
        if self.layers.len() >= MAX_LAYERS {
            return Err(LedError::NoMem(format!("all {MAX_LAYERS} layers in use")));
        }
        self.layers.push(Layer::new(self.geometry, config));
        Ok(self.layers.len() - 1)
    }

    pub fn text(&self) -> Option<&TextOverlay> {
        self.text.as_ref()
    }

    /// Install a text overlay on layer 1, replacing any previous one.
    pub fn set_text(&mut self, overlay: TextOverlay) -> Result<()> {
        self.base();
        self.layer(1)?.set_visible(true);
        self.text = Some(overlay);
        Ok(())
    }

    /// Drop the text overlay and blank layer 1. Returns whether one was active.
    pub fn stop_text(&mut self) -> bool {
        let active = self.text.take().is_some();
        if let Some(layer) = self.layers.get_mut(1) {
            layer.clear();
            layer.set_visible(false);
        }
        active
    }

    // ── Per-frame steps ──────────────────────────────────────────────

    pub(crate) fn tick_effects(&mut self, now_ms: u64) {
        for layer in &mut self.layers {
            layer.tick_effect(now_ms);
        }
    }

    pub(crate) fn tick_text(&mut self, now_ms: u64) {
        if self.text.is_none() || self.layers.len() < 2 {
            return;
        }
        let (base, rest) = self.layers.split_at_mut(1);
        if let Some(text) = self.text.as_mut() {
            text.tick(&self.geometry, now_ms);
            text.render(&mut rest[0], Some(&base[0]));
        }
    }

    pub(crate) fn compose(&mut self, now_ms: u64) {
        crate::layer::compose(&mut self.framebuffer, &mut self.layers, now_ms);
    }

    /// Correct, scale and ship the framebuffer.
    pub(crate) fn push(&mut self, correction: &CorrectionSnapshot, brightness: u8) -> Result<()> {
        for (index, &px) in self.framebuffer.iter().enumerate() {
            let c = correction.apply(px).scale(brightness);
            self.sink.set_pixel(index, c.r, c.g, c.b);
        }
        self.sink.refresh()
    }
}

pub struct Device {
    name: String,
    layout: Layout,
    geometry: Geometry,
    sink_path: SinkPath,
    brightness: AtomicU8,
    destroyed: AtomicBool,
    /// Bumped whenever the running image player must stop.
    image_generation: AtomicU64,
    state: Mutex<DeviceState>,
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("name", &self.name)
            .field("layout", &self.layout)
            .field("geometry", &self.geometry)
            .finish_non_exhaustive()
    }
}

impl Device {
    fn new(config: &DeviceConfig, sink: Box<dyn OutputSink>) -> Self {
        let geometry = config.geometry();
        Self {
            name: config.name.clone(),
            layout: config.layout,
            geometry,
            sink_path: SinkPath::for_led_count(geometry.led_count()),
            brightness: AtomicU8::new(config.brightness),
            destroyed: AtomicBool::new(false),
            image_generation: AtomicU64::new(0),
            state: Mutex::new(DeviceState {
                geometry,
                framebuffer: vec![Rgb::BLACK; geometry.led_count()],
                layers: Vec::new(),
                sink,
                text: None,
                errors: ErrorThrottle::default(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub fn led_count(&self) -> usize {
        self.geometry.led_count()
    }

    pub fn sink_path(&self) -> SinkPath {
        self.sink_path
    }

    pub fn brightness(&self) -> u8 {
        self.brightness.load(Ordering::Relaxed)
    }

    pub fn set_brightness(&self, brightness: u8) {
        self.brightness.store(brightness, Ordering::Relaxed);
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    /// Take the device lock. Fails once the device has been destroyed.
    pub fn lock(&self) -> Result<MutexGuard<'_, DeviceState>> {
        if self.is_destroyed() {
            return Err(LedError::invalid_state(format!("device {} destroyed", self.name)));
        }
        let guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        // destroy may have won the race for the lock
        if self.is_destroyed() {
            return Err(LedError::invalid_state(format!("device {} destroyed", self.name)));
        }
        Ok(guard)
    }

    /// Run `f` under the device lock.
    pub fn with_state<R>(&self, f: impl FnOnce(&mut DeviceState) -> Result<R>) -> Result<R> {
        let mut state = self.lock()?;
        f(&mut state)
    }

    pub fn fill(&self, color: Rgb) -> Result<()> {
        self.with_state(|s| {
            s.base().fill(color);
            Ok(())
        })
    }

    pub fn clear(&self) -> Result<()> {
        self.fill(Rgb::BLACK)
    }

    pub fn set_pixel(&self, index: usize, color: Rgb) -> Result<()> {
        self.with_state(|s| s.base().set_pixel(index, color))
    }

    pub fn image_generation(&self) -> u64 {
        self.image_generation.load(Ordering::Acquire)
    }

    /// Invalidate any running image player; returns the new generation.
    pub fn stop_image_player(&self) -> u64 {
        self.image_generation.fetch_add(1, Ordering::AcqRel) + 1
    }

    fn teardown(&self) {
        self.stop_image_player();
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        self.destroyed.store(true, Ordering::Release);
        state.sink.release();
        state.layers.clear();
        state.text = None;
        state.framebuffer.fill(Rgb::BLACK);
    }
}

// ── Registry ─────────────────────────────────────────────────────────

#[derive(Default)]
pub struct Registry {
    devices: Mutex<Vec<Arc<Device>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> MutexGuard<'_, Vec<Arc<Device>>> {
        self.devices.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Open the configured sink and register the device.
    pub fn create(&self, config: DeviceConfig) -> Result<Arc<Device>> {
        config.validate()?;
        let sink = config.output.open(SinkInit::new(config.geometry()))?;
        self.create_with_sink(config, sink)
    }

    /// Register a device around an already-open sink.
    pub fn create_with_sink(&self, config: DeviceConfig, sink: Box<dyn OutputSink>) -> Result<Arc<Device>> {
        config.validate()?;
        let mut slots = self.slots();
        if slots.iter().any(|d| d.name == config.name) {
            return Err(LedError::invalid_arg(format!("device {} already exists", config.name)));
        }
        if slots.len() >= MAX_DEVICES {
            return Err(LedError::NoMem(format!("all {MAX_DEVICES} device slots in use")));
        }
        let device = Arc::new(Device::new(&config, sink));
        info!(
            "Device {} created: {} {}x{} ({} LEDs, {:?} path)",
            device.name,
            device.layout.as_str(),
            device.geometry.width,
            device.geometry.height,
            device.led_count(),
            device.sink_path
        );
        slots.push(device.clone());
        Ok(device)
    }

    pub fn get(&self, name: &str) -> Result<Arc<Device>> {
        self.slots()
            .iter()
            .find(|d| d.name == name)
            .cloned()
            .ok_or_else(|| LedError::not_found(format!("device {name} not found")))
    }

    /// Look up by internal name or short alias.
    pub fn get_by_alias(&self, name: &str) -> Result<Arc<Device>> {
        self.get(crate::preset::resolve_alias(name))
    }

    /// Registered devices, in creation order. The registry lock is released
    /// before this returns.
    pub fn list(&self) -> Vec<Arc<Device>> {
        self.slots().clone()
    }

    pub fn len(&self) -> usize {
        self.slots().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Release the sink and drop the slot. Outstanding handles see `InvalidState`.
    pub fn destroy(&self, name: &str) -> Result<()> {
        let device = {
            let mut slots = self.slots();
            let pos = slots
                .iter()
                .position(|d| d.name == name)
                .ok_or_else(|| LedError::not_found(format!("device {name} not found")))?;
            slots.remove(pos)
        };
        device.teardown();
        info!("Device {} destroyed", device.name);
        Ok(())
    }

    /// Tear down every device (shutdown path).
    pub fn destroy_all(&self) {
        let devices: Vec<_> = self.slots().drain(..).collect();
        for device in devices {
            device.teardown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemorySink;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn memory(config: &DeviceConfig) -> Box<dyn OutputSink> {
        Box::new(MemorySink::new(SinkInit::new(config.geometry())).0)
    }

    #[test]
    fn create_and_lookup() {
        let reg = Registry::new();
        let cfg = DeviceConfig::strip("led_touch", 16, 80);
        let dev = reg.create_with_sink(cfg.clone(), memory(&cfg)).unwrap();
        assert_eq!(dev.led_count(), 16);
        assert_eq!(dev.brightness(), 80);
        assert_eq!(dev.sink_path(), SinkPath::LowLatency);
        assert_eq!(reg.get("led_touch").unwrap().name(), "led_touch");
        assert!(matches!(reg.get("nope"), Err(LedError::NotFound(_))));
    }

    #[test]
    fn large_matrix_takes_bulk_path() {
        let reg = Registry::new();
        let cfg = DeviceConfig::matrix("led_matrix", 32, 32, Scan::ZigzagRows, Origin::TopLeft, 50);
        let dev = reg.create(cfg).unwrap();
        assert_eq!(dev.sink_path(), SinkPath::Bulk);
    }

    #[rstest]
    #[case(DeviceConfig::strip("", 4, 10))]
    #[case(DeviceConfig::strip(&"x".repeat(33), 4, 10))]
    #[case(DeviceConfig::strip("empty", 0, 10))]
    #[case(DeviceConfig { height: 2, ..DeviceConfig::ring("tall", 4, 10) })]
    fn invalid_configs_are_rejected(#[case] cfg: DeviceConfig) {
        let reg = Registry::new();
        assert!(matches!(reg.create(cfg), Err(LedError::InvalidArg(_))));
        assert!(reg.is_empty());
    }

    #[test]
    fn duplicate_names_and_capacity() {
        let reg = Registry::new();
        for i in 0..MAX_DEVICES {
            reg.create(DeviceConfig::strip(&format!("d{i}"), 4, 10)).unwrap();
        }
        assert!(matches!(
            reg.create(DeviceConfig::strip("d0", 4, 10)),
            Err(LedError::InvalidArg(_))
        ));
        assert!(matches!(
            reg.create(DeviceConfig::strip("d9", 4, 10)),
            Err(LedError::NoMem(_))
        ));
    }

    #[test]
    fn destroyed_handles_fail_invalid_state() {
        let reg = Registry::new();
        let cfg = DeviceConfig::ring("led_board", 32, 60);
        let (sink, tap) = MemorySink::new(SinkInit::new(cfg.geometry()));
        let dev = reg.create_with_sink(cfg, Box::new(sink)).unwrap();
        reg.destroy("led_board").unwrap();

        assert!(tap.released());
        assert!(dev.is_destroyed());
        assert!(matches!(dev.fill(Rgb::RED), Err(LedError::InvalidState(_))));
        assert!(matches!(reg.get("led_board"), Err(LedError::NotFound(_))));
        assert!(matches!(reg.destroy("led_board"), Err(LedError::NotFound(_))));
    }

    #[test]
    fn base_layer_created_on_demand_and_layers_capped() {
        let reg = Registry::new();
        let dev = reg.create(DeviceConfig::strip("s", 4, 10)).unwrap();
        let mut state = dev.lock().unwrap();
        assert_eq!(state.layer_count(), 0);
        state.base().fill(Rgb::RED);
        assert_eq!(state.layer_count(), 1);
        for _ in 1..MAX_LAYERS {
            state.layer_create(LayerConfig::default()).unwrap();
        }
        assert!(matches!(state.layer_create(LayerConfig::default()), Err(LedError::NoMem(_))));
        assert!(state.layer(MAX_LAYERS).is_err());
    }

    #[test]
    fn brightness_is_lock_free() {
        let reg = Registry::new();
        let dev = reg.create(DeviceConfig::strip("s", 4, 10)).unwrap();
        let _guard = dev.lock().unwrap();
        dev.set_brightness(200);
        assert_eq!(dev.brightness(), 200);
    }

    #[test]
    fn alias_lookup() {
        let reg = Registry::new();
        reg.create(DeviceConfig::matrix("led_matrix", 8, 8, Scan::Rows, Origin::TopLeft, 50))
            .unwrap();
        assert_eq!(reg.get_by_alias("matrix").unwrap().name(), "led_matrix");
        assert_eq!(reg.get_by_alias("led_matrix").unwrap().name(), "led_matrix");
    }
}
