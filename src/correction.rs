//! Global output color correction.
//!
//! Applied once per pixel at output time, after composition and filters and
//! before per-device brightness. Stages run in a fixed order: white point,
//! gamma (through a cached 256-entry table), brightness, saturation.
//!
//! The render loop takes a [`CorrectionSnapshot`] per frame so it never holds
//! the configuration lock while writing pixels.

use crate::color::{Rgb, hsl_to_rgb, rgb_to_hsl};
use crate::error::{LedError, Result};
use crate::storage::{KvStore, get_json, set_json};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

const KV_NAMESPACE: &str = "led_cc";
const KV_KEY: &str = "config";
const FILE_TYPE: &str = "led_color_correction";
const FILE_VERSION: &str = "1.0";
pub const PORTABLE_FILE: &str = "led_color_correction.json";

/// Parameters whose change is below this are treated as unchanged.
const EPSILON: f32 = 1e-3;

// ── Configuration ────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct WhitePoint {
    pub enabled: bool,
    pub red_scale: f32,
    pub green_scale: f32,
    pub blue_scale: f32,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct GammaStage {
    pub enabled: bool,
    pub gamma: f32,
}

/// A stage with a single multiplicative factor.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct FactorStage {
    pub enabled: bool,
    pub factor: f32,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct CorrectionConfig {
    pub enabled: bool,
    pub white_point: WhitePoint,
    pub gamma: GammaStage,
    pub brightness: FactorStage,
    pub saturation: FactorStage,
}

impl Default for CorrectionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            white_point: WhitePoint {
                enabled: false,
                red_scale: 1.0,
                green_scale: 1.0,
                blue_scale: 1.0,
            },
            gamma: GammaStage {
                enabled: false,
                gamma: 1.0,
            },
            brightness: FactorStage {
                enabled: false,
                factor: 1.0,
            },
            saturation: FactorStage {
                enabled: false,
                factor: 1.0,
            },
        }
    }
}

impl CorrectionConfig {
    /// Scales and factors in `[0, 4]`, gamma in `[0.1, 5.0]`.
    pub fn validate(&self) -> Result<()> {
        let factors = [
            ("white_point.red_scale", self.white_point.red_scale),
            ("white_point.green_scale", self.white_point.green_scale),
            ("white_point.blue_scale", self.white_point.blue_scale),
            ("brightness.factor", self.brightness.factor),
            ("saturation.factor", self.saturation.factor),
        ];
        for (name, v) in factors {
            if !(0.0..=4.0).contains(&v) {
                return Err(LedError::invalid_arg(format!("{name} {v} outside [0, 4]")));
            }
        }
        let g = self.gamma.gamma;
        if !(0.1..=5.0).contains(&g) {
            return Err(LedError::invalid_arg(format!("gamma {g} outside [0.1, 5.0]")));
        }
        Ok(())
    }

    /// Overlay the fields present in `patch`.
    pub fn merged(mut self, patch: &CorrectionPatch) -> Self {
        if let Some(v) = patch.enabled {
            self.enabled = v;
        }
        if let Some(wp) = &patch.white_point {
            set_if(&mut self.white_point.enabled, wp.enabled);
            set_if(&mut self.white_point.red_scale, wp.red_scale);
            set_if(&mut self.white_point.green_scale, wp.green_scale);
            set_if(&mut self.white_point.blue_scale, wp.blue_scale);
        }
        if let Some(g) = &patch.gamma {
            set_if(&mut self.gamma.enabled, g.enabled);
            set_if(&mut self.gamma.gamma, g.gamma);
        }
        if let Some(b) = &patch.brightness {
            set_if(&mut self.brightness.enabled, b.enabled);
            set_if(&mut self.brightness.factor, b.factor);
        }
        if let Some(s) = &patch.saturation {
            set_if(&mut self.saturation.enabled, s.enabled);
            set_if(&mut self.saturation.factor, s.factor);
        }
        self
    }
}

fn set_if<T: Copy>(slot: &mut T, value: Option<T>) {
    if let Some(v) = value {
        *slot = v;
    }
}

// ── Partial updates ──────────────────────────────────────────────────

#[derive(Clone, Debug, Default, Deserialize, utoipa::ToSchema)]
pub struct WhitePointPatch {
    pub enabled: Option<bool>,
    #[serde(alias = "r")]
    pub red_scale: Option<f32>,
    #[serde(alias = "g")]
    pub green_scale: Option<f32>,
    #[serde(alias = "b")]
    pub blue_scale: Option<f32>,
}

#[derive(Clone, Debug, Default, Deserialize, utoipa::ToSchema)]
pub struct GammaPatch {
    pub enabled: Option<bool>,
    #[serde(alias = "value")]
    pub gamma: Option<f32>,
}

#[derive(Clone, Debug, Default, Deserialize, utoipa::ToSchema)]
pub struct FactorPatch {
    pub enabled: Option<bool>,
    pub factor: Option<f32>,
}

/// Fields to change; absent fields keep their current value.
///
/// Also the shape accepted on import, where `type` must name this format
/// when present.
#[derive(Clone, Debug, Default, Deserialize, utoipa::ToSchema)]
pub struct CorrectionPatch {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub enabled: Option<bool>,
    pub white_point: Option<WhitePointPatch>,
    pub gamma: Option<GammaPatch>,
    pub brightness: Option<FactorPatch>,
    pub saturation: Option<FactorPatch>,
}

/// On-disk portable representation.
#[derive(Serialize)]
struct CorrectionFile<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    version: &'a str,
    #[serde(flatten)]
    config: &'a CorrectionConfig,
}

// ── Pipeline ─────────────────────────────────────────────────────────

fn build_lut(gamma: f32) -> [u8; 256] {
    let mut lut = [0u8; 256];
    for (i, slot) in lut.iter_mut().enumerate() {
        *slot = ((i as f32 / 255.0).powf(gamma) * 255.0) as u8;
    }
    lut
}

/// Immutable copy of the corrector used for one frame.
#[derive(Clone, Copy, Debug)]
pub struct CorrectionSnapshot {
    config: CorrectionConfig,
    lut: [u8; 256],
}

impl CorrectionSnapshot {
    pub fn identity() -> Self {
        Self::new(CorrectionConfig::default())
    }

    fn new(config: CorrectionConfig) -> Self {
        Self {
            config,
            lut: build_lut(config.gamma.gamma),
        }
    }

    pub fn config(&self) -> &CorrectionConfig {
        &self.config
    }

    pub fn apply(&self, c: Rgb) -> Rgb {
        let cfg = &self.config;
        if !cfg.enabled {
            return c;
        }
        let mut c = c;

        if cfg.white_point.enabled {
            let wp = &cfg.white_point;
            let s = |v: u8, k: f32| (v as f32 * k + 0.5).clamp(0.0, 255.0) as u8;
            c = Rgb::new(s(c.r, wp.red_scale), s(c.g, wp.green_scale), s(c.b, wp.blue_scale));
        }
        if cfg.gamma.enabled {
            c = Rgb::new(self.lut[c.r as usize], self.lut[c.g as usize], self.lut[c.b as usize]);
        }
        if cfg.brightness.enabled && (cfg.brightness.factor - 1.0).abs() > EPSILON {
            let f = cfg.brightness.factor;
            let s = |v: u8| (v as f32 * f).clamp(0.0, 255.0) as u8;
            c = Rgb::new(s(c.r), s(c.g), s(c.b));
        }
        if cfg.saturation.enabled && (cfg.saturation.factor - 1.0).abs() > EPSILON {
            let (h, s, l) = rgb_to_hsl(c);
            c = hsl_to_rgb(h, (s * cfg.saturation.factor).clamp(0.0, 1.0), l);
        }
        c
    }

    pub fn apply_slice(&self, pixels: &mut [Rgb]) {
        if !self.config.enabled {
            return;
        }
        for px in pixels.iter_mut() {
            *px = self.apply(*px);
        }
    }
}

// ── Shared corrector ─────────────────────────────────────────────────

/// Process-wide corrector with persistence.
pub struct ColorCorrector {
    state: RwLock<CorrectionSnapshot>,
    store: Arc<dyn KvStore>,
    config_dir: Option<PathBuf>,
}

impl ColorCorrector {
    /// Load the portable file if present, else the stored record, else defaults.
    pub fn load(store: Arc<dyn KvStore>, config_dir: Option<PathBuf>) -> Self {
        let corrector = Self {
            state: RwLock::new(CorrectionSnapshot::identity()),
            store,
            config_dir,
        };

        let from_file = corrector.portable_path().filter(|p| p.is_file()).and_then(|p| {
            match read_patch(&p) {
                Ok(patch) => Some(CorrectionConfig::default().merged(&patch)),
                Err(e) => {
                    warn!("Ignoring {}: {}", p.display(), e);
                    None
                }
            }
        });
        let from_kv = || match get_json::<CorrectionConfig>(corrector.store.as_ref(), KV_NAMESPACE, KV_KEY) {
            Ok(cfg) => cfg,
            Err(e) => {
                warn!("Ignoring stored color correction: {}", e);
                None
            }
        };

        if let Some(cfg) = from_file.or_else(from_kv) {
            match cfg.validate() {
                Ok(()) => {
                    info!("Color correction loaded ({})", if cfg.enabled { "enabled" } else { "disabled" });
                    *corrector.write() = CorrectionSnapshot::new(cfg);
                }
                Err(e) => warn!("Stored color correction rejected: {}", e),
            }
        }
        corrector
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, CorrectionSnapshot> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, CorrectionSnapshot> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn portable_path(&self) -> Option<PathBuf> {
        self.config_dir.as_ref().map(|d| d.join(PORTABLE_FILE))
    }

    pub fn config(&self) -> CorrectionConfig {
        self.read().config
    }

    pub fn snapshot(&self) -> CorrectionSnapshot {
        *self.read()
    }

    /// Validate, swap in and persist. An invalid config leaves the prior one
    /// in place.
    pub fn set_config(&self, config: CorrectionConfig) -> Result<()> {
        config.validate()?;
        {
            let mut state = self.write();
            let lut = if (state.config.gamma.gamma - config.gamma.gamma).abs() > EPSILON {
                build_lut(config.gamma.gamma)
            } else {
                state.lut
            };
            *state = CorrectionSnapshot { config, lut };
        }
        if let Err(e) = set_json(self.store.as_ref(), KV_NAMESPACE, KV_KEY, &config) {
            warn!("Failed to persist color correction: {}", e);
        }
        Ok(())
    }

    /// Apply a partial update on top of the current config.
    pub fn update(&self, patch: &CorrectionPatch) -> Result<CorrectionConfig> {
        let merged = self.config().merged(patch);
        self.set_config(merged)?;
        Ok(merged)
    }

    pub fn set_enabled(&self, enabled: bool) -> Result<()> {
        let mut cfg = self.config();
        cfg.enabled = enabled;
        self.set_config(cfg)
    }

    /// Back to defaults; the stored record is erased.
    pub fn reset(&self) -> Result<()> {
        *self.write() = CorrectionSnapshot::identity();
        self.store.erase(KV_NAMESPACE, KV_KEY)
    }

    pub fn apply(&self, c: Rgb) -> Rgb {
        self.read().apply(c)
    }

    pub fn apply_slice(&self, pixels: &mut [Rgb]) {
        self.snapshot().apply_slice(pixels);
    }

    /// Resolve an export/import target. `path` is taken relative to the
    /// config directory and must stay inside it; without one the portable
    /// file is used.
    fn confined_path(&self, path: Option<&Path>) -> Result<PathBuf> {
        let dir = self
            .config_dir
            .as_ref()
            .ok_or_else(|| LedError::invalid_arg("no config directory set"))?;
        let Some(requested) = path else {
            return Ok(dir.join(PORTABLE_FILE));
        };
        let outside = || LedError::invalid_arg(format!("{} is outside the config directory", requested.display()));
        let full = dir.join(requested);
        if requested.components().any(|c| c == Component::ParentDir) || !full.starts_with(dir) {
            return Err(outside());
        }
        // symlinks inside the directory must not lead out of it
        if let (Ok(real), Ok(root)) = (full.canonicalize(), dir.canonicalize()) {
            if !real.starts_with(&root) {
                return Err(outside());
            }
        }
        Ok(full)
    }

    /// Write the portable JSON document. Without `path` the default location
    /// under the config directory is used.
    pub fn export(&self, path: Option<&Path>) -> Result<PathBuf> {
        let path = self.confined_path(path)?;
        let config = self.config();
        let doc = CorrectionFile {
            kind: FILE_TYPE,
            version: FILE_VERSION,
            config: &config,
        };
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        fs::write(&path, serde_json::to_string_pretty(&doc)?)?;
        info!("Color correction exported to {}", path.display());
        Ok(path)
    }

    /// Overlay a portable JSON document onto the current config.
    pub fn import(&self, path: Option<&Path>) -> Result<CorrectionConfig> {
        let path = self.confined_path(path)?;
        let patch = read_patch(&path)?;
        let cfg = self.update(&patch)?;
        info!("Color correction imported from {}", path.display());
        Ok(cfg)
    }
}

fn read_patch(path: &Path) -> Result<CorrectionPatch> {
    let text = fs::read_to_string(path)?;
    let patch: CorrectionPatch = serde_json::from_str(&text)?;
    match patch.kind.as_deref() {
        None | Some(FILE_TYPE) => Ok(patch),
        Some(other) => Err(LedError::invalid_arg(format!("not a color correction file: type {other:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryKvStore;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use tempfile::TempDir;

    fn corrector() -> (ColorCorrector, Arc<MemoryKvStore>) {
        let store = Arc::new(MemoryKvStore::new());
        (ColorCorrector::load(store.clone(), None), store)
    }

    fn in_dir(dir: &TempDir) -> ColorCorrector {
        ColorCorrector::load(Arc::new(MemoryKvStore::new()), Some(dir.path().to_path_buf()))
    }

    fn gamma_only(g: f32) -> CorrectionConfig {
        let mut cfg = CorrectionConfig::default();
        cfg.enabled = true;
        cfg.gamma = GammaStage {
            enabled: true,
            gamma: g,
        };
        cfg
    }

    #[test]
    fn disabled_is_identity() {
        let (cc, _) = corrector();
        for c in [Rgb::new(1, 2, 3), Rgb::WHITE, Rgb::new(128, 64, 200)] {
            assert_eq!(cc.apply(c), c);
        }
    }

    #[test]
    fn gamma_22_maps_mid_gray_to_55() {
        let (cc, _) = corrector();
        cc.set_config(gamma_only(2.2)).unwrap();
        assert_eq!(cc.apply(Rgb::new(128, 128, 128)), Rgb::new(55, 55, 55));
    }

    #[test]
    fn gamma_lut_within_one_of_exact() {
        let lut = build_lut(2.2);
        for (i, v) in lut.iter().enumerate() {
            let exact = ((i as f64 / 255.0).powf(2.2) * 255.0).round();
            assert!((*v as f64 - exact).abs() <= 1.0, "{i}");
        }
    }

    #[rstest]
    #[case(6.0, 1.0)]
    #[case(0.05, 1.0)]
    #[case(2.2, 4.5)]
    #[case(2.2, -0.1)]
    fn invalid_update_keeps_prior_state(#[case] gamma: f32, #[case] red: f32) {
        let (cc, _) = corrector();
        cc.set_config(gamma_only(1.8)).unwrap();
        let mut bad = gamma_only(gamma);
        bad.white_point.red_scale = red;
        assert!(matches!(cc.set_config(bad), Err(LedError::InvalidArg(_))));
        assert_eq!(cc.config(), gamma_only(1.8));
    }

    #[test]
    fn white_point_rounds_and_clamps() {
        let (cc, _) = corrector();
        let mut cfg = CorrectionConfig::default();
        cfg.enabled = true;
        cfg.white_point = WhitePoint {
            enabled: true,
            red_scale: 2.0,
            green_scale: 0.5,
            blue_scale: 1.0,
        };
        cc.set_config(cfg).unwrap();
        assert_eq!(cc.apply(Rgb::new(200, 101, 7)), Rgb::new(255, 51, 7));
    }

    #[test]
    fn zero_saturation_gives_gray() {
        let (cc, _) = corrector();
        let mut cfg = CorrectionConfig::default();
        cfg.enabled = true;
        cfg.saturation = FactorStage {
            enabled: true,
            factor: 0.0,
        };
        cc.set_config(cfg).unwrap();
        let out = cc.apply(Rgb::new(200, 100, 0));
        assert_eq!(out.r, out.g);
        assert_eq!(out.g, out.b);
    }

    #[test]
    fn set_persists_and_reset_erases() {
        let (cc, store) = corrector();
        cc.set_config(gamma_only(2.0)).unwrap();
        assert!(!store.is_empty());

        let reloaded = ColorCorrector::load(store.clone(), None);
        assert_eq!(reloaded.config(), gamma_only(2.0));

        cc.reset().unwrap();
        assert!(store.is_empty());
        assert_eq!(cc.config(), CorrectionConfig::default());
    }

    #[test]
    fn import_accepts_aliases_and_overlays() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("cc.json"),
            r#"{"type":"led_color_correction","enabled":true,
                "white_point":{"enabled":true,"r":1.5},
                "gamma":{"value":2.4}}"#,
        )
        .unwrap();

        let cc = in_dir(&dir);
        let cfg = cc.import(Some(Path::new("cc.json"))).unwrap();
        assert!(cfg.enabled);
        assert_eq!(cfg.white_point.red_scale, 1.5);
        assert_eq!(cfg.white_point.green_scale, 1.0);
        assert_eq!(cfg.gamma.gamma, 2.4);
        assert!(!cfg.gamma.enabled);
    }

    #[test]
    fn import_rejects_foreign_documents() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("cc.json"), r#"{"type":"something_else"}"#).unwrap();
        let cc = in_dir(&dir);
        assert!(cc.import(Some(Path::new("cc.json"))).is_err());
    }

    #[rstest]
    #[case("/etc/passwd")]
    #[case("../x.json")]
    #[case("sub/../../x.json")]
    fn import_and_export_stay_in_config_dir(#[case] path: &str) {
        let dir = TempDir::new().unwrap();
        let cc = in_dir(&dir);
        assert!(matches!(cc.import(Some(Path::new(path))), Err(LedError::InvalidArg(_))));
        assert!(matches!(cc.export(Some(Path::new(path))), Err(LedError::InvalidArg(_))));
    }

    #[test]
    fn export_writes_named_file_under_config_dir() {
        let dir = TempDir::new().unwrap();
        let cc = in_dir(&dir);
        let written = cc.export(Some(Path::new("backup/cc.json"))).unwrap();
        assert_eq!(written, dir.path().join("backup/cc.json"));
        assert!(written.exists());
    }

    #[test]
    fn named_paths_need_a_config_dir() {
        let (cc, _) = corrector();
        assert!(matches!(cc.export(Some(Path::new("cc.json"))), Err(LedError::InvalidArg(_))));
    }

    #[test]
    fn export_then_load_prefers_portable_file() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryKvStore::new());
        let cc = ColorCorrector::load(store.clone(), Some(dir.path().to_path_buf()));
        cc.set_config(gamma_only(2.6)).unwrap();
        let written = cc.export(None).unwrap();
        assert_eq!(written, dir.path().join(PORTABLE_FILE));

        let text = fs::read_to_string(&written).unwrap();
        let json: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(json["type"], "led_color_correction");
        assert_eq!(json["version"], "1.0");

        // stored record differs, portable file wins
        set_json(store.as_ref(), KV_NAMESPACE, KV_KEY, &gamma_only(1.2)).unwrap();
        let reloaded = ColorCorrector::load(store, Some(dir.path().to_path_buf()));
        assert_eq!(reloaded.config(), gamma_only(2.6));
    }
}
