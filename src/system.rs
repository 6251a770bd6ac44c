//! The assembled subsystem: devices, correction, overlays and boot state.
//!
//! `LedSystem` is what request handlers talk to. Every content operation
//! takes a device name (short alias or internal name), mutates that device
//! under its lock and records the change in the [`Snapshot`] so it can be
//! saved and replayed at boot.
//!
//! ## Rust concepts
//! - One owner struct handed around as `Arc<LedSystem>`
//! - `HashMap<String, ImagePlayer>` behind a `Mutex` for the overlay threads
//! - Errors on one device during restore are logged, never propagated

use crate::animation::{Animation, EffectInstance, list_for_layout, speed_to_interval};
use crate::color::Rgb;
use crate::correction::ColorCorrector;
use crate::device::{Device, DeviceConfig, Registry};
use crate::error::{LedError, Result};
use crate::filter::{FilterConfig, FilterOverrides, PostEffect, canonical_name};
use crate::font::FontCache;
use crate::geometry::Layout;
use crate::image_overlay::{self, ImageOptions, ImagePlayer, ShowInfo};
use crate::media::{load_image, resolve_media_path};
use crate::preset::{self, Status, StatusIndicator};
use crate::qrcode::{self, Ecc, QrConfig, QrResult};
use crate::render::Clock;
use crate::sink::SinkPath;
use crate::snapshot::{BootConfig, CurrentState, Restore, Snapshot};
use crate::storage::KvStore;
use crate::text::{TextOptions, TextOverlay};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

pub const DEFAULT_SPEED: u8 = 50;
pub const DEFAULT_FONT: &str = "cjk";

/// Filesystem roots the system reads assets from.
#[derive(Clone, Debug)]
pub struct SystemPaths {
    pub fonts_dir: PathBuf,
    pub media_dir: PathBuf,
    /// Where the portable color-correction file lives, if anywhere.
    pub config_dir: Option<PathBuf>,
}

/// One row of the device listing.
#[derive(Clone, Debug, Serialize, utoipa::ToSchema)]
pub struct DeviceInfo {
    /// Short alias for presets, internal name otherwise.
    pub name: String,
    pub internal_name: String,
    pub layout: Layout,
    pub count: usize,
    pub width: u16,
    pub height: u16,
    pub brightness: u8,
    pub sink_path: SinkPath,
    pub layers: usize,
    pub effects: Vec<&'static str>,
    pub current: Option<CurrentState>,
}

/// QR code request after parameter parsing.
#[derive(Clone, Debug)]
pub struct QrRequest {
    pub text: String,
    pub ecc: Ecc,
    pub color: Option<Rgb>,
    /// Background image, relative to the media directory.
    pub bg_image: Option<String>,
}

impl QrRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ecc: Ecc::default(),
            color: None,
            bg_image: None,
        }
    }
}

pub struct LedSystem {
    registry: Arc<Registry>,
    corrector: Arc<ColorCorrector>,
    snapshot: Snapshot,
    fonts: FontCache,
    media_dir: PathBuf,
    status: StatusIndicator,
    clock: Clock,
    players: Mutex<HashMap<String, ImagePlayer>>,
}

impl LedSystem {
    /// Build an empty system. Color correction is loaded from `store` (and
    /// the portable file under `config_dir`, when present).
    pub fn new(store: Arc<dyn KvStore>, paths: SystemPaths) -> Self {
        let corrector = Arc::new(ColorCorrector::load(store.clone(), paths.config_dir));
        Self {
            registry: Arc::new(Registry::new()),
            corrector,
            snapshot: Snapshot::new(store),
            fonts: FontCache::new(paths.fonts_dir),
            media_dir: paths.media_dir,
            status: StatusIndicator::default(),
            clock: Clock::new(),
            players: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn corrector(&self) -> &Arc<ColorCorrector> {
        &self.corrector
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    pub fn clock(&self) -> Clock {
        self.clock
    }

    pub fn media_dir(&self) -> &Path {
        &self.media_dir
    }

    pub fn fonts_dir(&self) -> &Path {
        self.fonts.dir()
    }

    /// Create every configured device. A device that fails to open is
    /// logged and skipped; the rest still come up.
    pub fn create_devices(&self, configs: &[DeviceConfig]) -> usize {
        let mut created = 0;
        for config in configs {
            match self.registry.create(config.clone()) {
                Ok(_) => created += 1,
                Err(e) => warn!("Device {} not created: {}", config.name, e),
            }
        }
        created
    }

    pub fn device(&self, name: &str) -> Result<Arc<Device>> {
        self.registry.get_by_alias(name)
    }

    fn matrix(&self, name: &str, what: &str) -> Result<Arc<Device>> {
        let device = self.device(name)?;
        if device.layout() != Layout::Matrix {
            return Err(LedError::Unsupported(format!(
                "{what} only supported on a matrix, {} is a {}",
                device.name(),
                device.layout().as_str()
            )));
        }
        Ok(device)
    }

    fn stop_player(&self, device: &Device) {
        device.stop_image_player();
        self.players
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(device.name());
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn devices(&self) -> Vec<DeviceInfo> {
        self.registry
            .list()
            .iter()
            .map(|d| {
                let short = preset::short_name(d.name());
                let geometry = d.geometry();
                DeviceInfo {
                    name: short.unwrap_or(d.name()).to_string(),
                    internal_name: d.name().to_string(),
                    layout: d.layout(),
                    count: d.led_count(),
                    width: geometry.width,
                    height: geometry.height,
                    brightness: d.brightness(),
                    sink_path: d.sink_path(),
                    layers: d.lock().map(|s| s.layer_count()).unwrap_or(0),
                    effects: list_for_layout(d.layout()),
                    current: short.and_then(|s| self.snapshot.current(s).ok()),
                }
            })
            .collect()
    }

    /// Set brightness when given; returns the value now in effect.
    pub fn brightness(&self, name: &str, value: Option<u8>) -> Result<u8> {
        let device = self.device(name)?;
        if let Some(b) = value {
            device.set_brightness(b);
            debug!("Brightness of {} set to {}", device.name(), b);
        }
        Ok(device.brightness())
    }

    // ── Base-layer content ───────────────────────────────────────────

    /// Stop whatever drives the base layer and blank it.
    pub fn clear(&self, name: &str) -> Result<()> {
        let device = self.device(name)?;
        self.stop_player(&device);
        device.with_state(|s| {
            let base = s.base();
            base.stop_effect();
            base.clear();
            Ok(())
        })?;
        self.snapshot.update(name, |s| {
            s.clear_animation();
            s.clear_color();
            s.clear_image();
            s.clear_qrcode();
        });
        Ok(())
    }

    /// Paint `count` pixels from `index` on the base layer. Without an index
    /// the whole device is painted. Returns the `(start, count)` written.
    pub fn set_pixels(&self, name: &str, index: Option<usize>, count: Option<usize>, color: Rgb) -> Result<(usize, usize)> {
        let device = self.device(name)?;
        let start = index.unwrap_or(0);
        let count = count.unwrap_or(if index.is_some() { 1 } else { device.led_count() });
        device.with_state(|s| s.base().fill_range(start, count, color))?;
        Ok((start, count))
    }

    /// Solid fill, recorded as the `solid` animation in `color`.
    pub fn fill(&self, name: &str, color: Rgb) -> Result<()> {
        let device = self.device(name)?;
        self.stop_player(&device);
        device.with_state(|s| {
            let base = s.base();
            base.stop_effect();
            base.fill(color);
            Ok(())
        })?;
        self.snapshot.update(name, |s| {
            s.set_animation(Animation::Solid.name(), None);
            s.set_color(color);
            s.clear_image();
            s.clear_qrcode();
        });
        Ok(())
    }

    /// Start a catalog effect on the base layer. Without a speed the
    /// effect's own interval is used. Returns the requested speed, or
    /// [`DEFAULT_SPEED`] when none was given.
    pub fn start_effect(&self, name: &str, effect: &str, speed: Option<u8>, color: Option<Rgb>) -> Result<u8> {
        let animation = Animation::from_name(effect)
            .ok_or_else(|| LedError::not_found(format!("effect {effect:?} not found")))?;
        let device = self.device(name)?;
        let speed = speed.map(|s| s.clamp(1, 100));
        let interval = speed.map(|s| speed_to_interval(s as u32));
        self.stop_player(&device);
        let now = self.clock.now_ms();
        device.with_state(|s| {
            let instance = EffectInstance::new(animation, interval, color, s.geometry(), now);
            s.base().start_effect(instance);
            Ok(())
        })?;

        self.snapshot.update(name, |s| {
            s.set_animation(animation.name(), speed);
            s.clear_image();
            s.clear_qrcode();
            match color {
                Some(c) => s.set_color(c),
                None => s.clear_color(),
            }
        });
        info!(
            "Effect {} started on {} (interval {} ms)",
            animation.name(),
            device.name(),
            interval.unwrap_or_else(|| animation.default_interval_ms())
        );
        Ok(speed.unwrap_or(DEFAULT_SPEED))
    }

    /// Idempotent; the base layer keeps its last frame.
    pub fn stop_effect(&self, name: &str) -> Result<()> {
        let device = self.device(name)?;
        device.with_state(|s| {
            s.base().stop_effect();
            Ok(())
        })?;
        self.snapshot.update(name, CurrentState::clear_animation);
        Ok(())
    }

    // ── Filters ──────────────────────────────────────────────────────

    /// Attach a post-processing filter to the base layer.
    pub fn start_filter(
        &self,
        name: &str,
        filter: &str,
        speed: Option<u8>,
        overrides: &FilterOverrides,
    ) -> Result<(&'static str, FilterConfig)> {
        let speed = speed.unwrap_or(DEFAULT_SPEED).clamp(1, 100);
        let config = FilterConfig::from_request(filter, speed as u32, overrides)?;
        self.apply_filter(name, config, speed)?;
        Ok((config.name(), config))
    }

    fn apply_filter(&self, name: &str, config: FilterConfig, speed: u8) -> Result<()> {
        let device = self.device(name)?;
        let now = self.clock.now_ms();
        device.with_state(|s| {
            let post = PostEffect::new(config, s.geometry(), now);
            s.base().set_post_effect(post);
            Ok(())
        })?;
        self.snapshot
            .update(name, |s| s.set_filter(config.name(), speed, config));
        debug!("Filter {} on {}", config.name(), device.name());
        Ok(())
    }

    pub fn stop_filter(&self, name: &str) -> Result<()> {
        let device = self.device(name)?;
        device.with_state(|s| {
            s.base().clear_post_effect();
            Ok(())
        })?;
        self.snapshot.update(name, CurrentState::clear_filter);
        Ok(())
    }

    // ── Overlays ─────────────────────────────────────────────────────

    /// Decode `path` (relative to the media directory) and show it on a
    /// matrix. Animated images keep playing on their own thread.
    pub fn show_image(&self, name: &str, path: &str, opts: ImageOptions) -> Result<ShowInfo> {
        let device = self.matrix(name, "images")?;
        let full = resolve_media_path(&self.media_dir, path)?;
        let image = load_image(&full)?;
        let (info, player) = image_overlay::show(&device, image, opts)?;

        let mut players = self.players.lock().unwrap_or_else(|e| e.into_inner());
        players.retain(|_, p| !p.is_finished());
        match player {
            Some(p) => {
                players.insert(device.name().to_string(), p);
            }
            None => {
                players.remove(device.name());
            }
        }
        drop(players);

        self.snapshot.update(name, |s| {
            s.set_image(path);
            s.clear_animation();
            s.clear_qrcode();
        });
        Ok(info)
    }

    /// Encode and show a QR code. Oversized text fails `InvalidSize` before
    /// the device is touched.
    pub fn show_qrcode(&self, name: &str, request: &QrRequest) -> Result<QrResult> {
        let device = self.matrix(name, "QR codes")?;
        let mut config = QrConfig::new(request.text.clone());
        config.ecc = request.ecc;
        if let Some(c) = request.color {
            config.fg = c;
        }
        let bg = request.bg_image.as_deref().filter(|p| !p.is_empty());
        if let Some(path) = bg {
            config.bg_image = Some(load_image(&resolve_media_path(&self.media_dir, path)?)?);
        }

        self.stop_player(&device);
        let result = qrcode::show(&device, &config)?;
        self.snapshot.update(name, |s| {
            s.clear_image();
            s.clear_animation();
            s.set_qrcode(&request.text, bg);
        });
        Ok(result)
    }

    /// Start a text overlay. `"default"` names the default font. Returns the
    /// font actually used.
    pub fn show_text(&self, name: &str, text: &str, font: Option<&str>, opts: TextOptions) -> Result<String> {
        let device = self.matrix(name, "text")?;
        let font_name = match font {
            None | Some("default") => DEFAULT_FONT,
            Some(f) => f,
        };
        let font = self.fonts.get(font_name)?;
        let opts = TextOptions {
            scroll_speed: opts.scroll_speed.clamp(1, 100),
            ..opts
        };
        let now = self.clock.now_ms();
        device.with_state(|s| {
            let overlay = TextOverlay::new(text, font, opts, s.geometry(), now);
            s.set_text(overlay)
        })?;
        self.snapshot.update(name, |s| s.set_text(text));
        info!("Text overlay on {}: {:?} ({})", device.name(), text, font_name);
        Ok(font_name.to_string())
    }

    /// Returns whether an overlay was running.
    pub fn stop_text(&self, name: &str) -> Result<bool> {
        let device = self.device(name)?;
        let was_active = device.with_state(|s| Ok(s.stop_text()))?;
        self.snapshot.update(name, CurrentState::clear_text);
        Ok(was_active)
    }

    pub fn set_status(&self, status: Status) -> Result<()> {
        self.status.set(&self.registry, status)
    }

    // ── Boot state ───────────────────────────────────────────────────

    pub fn save(&self, name: &str) -> Result<BootConfig> {
        let device = self.device(name)?;
        self.snapshot.save(name, device.brightness())
    }

    /// Saved records, for one preset or all three.
    pub fn boot_config(&self, name: Option<&str>) -> Result<Vec<(&'static str, BootConfig)>> {
        let shorts: Vec<&'static str> = match name {
            Some(n) => vec![preset::short_name(n).ok_or_else(|| LedError::not_found(format!("device {n} not found")))?],
            None => preset::SHORT_NAMES.to_vec(),
        };
        let mut out = Vec::new();
        for short in shorts {
            if let Some(config) = self.snapshot.get(short)? {
                out.push((short, config));
            }
        }
        Ok(out)
    }

    pub fn clear_boot_config(&self, name: Option<&str>) -> Result<()> {
        self.snapshot.clear(name)
    }

    /// Replay every saved record. A failing device is logged and skipped.
    pub fn load_all_boot_config(&self) {
        for short in preset::SHORT_NAMES {
            match self.snapshot.get(short) {
                Ok(Some(config)) if config.enabled => match self.restore(short, &config) {
                    Ok(()) => info!("Restored boot state for {}", short),
                    Err(e) => warn!("Boot restore failed for {}: {}", short, e),
                },
                Ok(Some(_)) => debug!("Boot config for {} disabled", short),
                Ok(None) => debug!("No boot config for {}", short),
                Err(e) => warn!("Unreadable boot config for {}: {}", short, e),
            }
        }
    }

    fn restore(&self, short: &str, config: &BootConfig) -> Result<()> {
        self.device(short)?.set_brightness(config.brightness);
        match config.restore() {
            Restore::Image(path) => {
                self.show_image(short, path, ImageOptions::default())?;
            }
            Restore::QrCode { text, background } => {
                let request = QrRequest {
                    bg_image: background.map(str::to_string),
                    ..QrRequest::new(text)
                };
                self.show_qrcode(short, &request)?;
            }
            Restore::Animation { name, speed, color } => {
                self.start_effect(short, name, speed, color)?;
            }
            Restore::Fill(color) => self.fill(short, color)?,
            Restore::Nothing => {}
        }
        if let Some((filter, filter_config)) = config.saved_filter() {
            if canonical_name(filter).is_none() {
                warn!("Saved filter {:?} for {} is unknown, skipping", filter, short);
            } else {
                self.apply_filter(short, filter_config, config.filter_speed)?;
            }
        }
        Ok(())
    }

    /// Stop overlay threads and release every device.
    pub fn shutdown(&self) {
        for device in self.registry.list() {
            device.stop_image_player();
        }
        let players: Vec<_> = self
            .players
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain()
            .map(|(_, p)| p)
            .collect();
        for player in players {
            player.join();
        }
        self.registry.destroy_all();
        info!("LED system shut down");
    }
}
