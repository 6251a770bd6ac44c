//! Post-processing filters.
//!
//! A filter is attached to a layer and rewrites the composed framebuffer in
//! place right after that layer is stacked. Time-based filters measure their
//! phase from the moment the filter was started, so one-shot fades freeze at
//! their end value.
//!
//! ## Rust concepts
//! - Internally tagged serde enum (`#[serde(tag = "type")]`) so a stored
//!   config is self-describing JSON
//! - Per-instance scratch state allocated up front and reused every frame

use crate::animation::Lcg;
use crate::color::{Hsv, Rgb, hsl_to_rgb, hsv_to_rgb, rgb_to_hsl, rgb_to_hsv, scale_color};
use crate::error::{LedError, Result};
use crate::geometry::Geometry;
use serde::{Deserialize, Serialize};
use std::f32::consts::{PI, TAU};

// ── Configuration ────────────────────────────────────────────────────

/// A filter and its parameters.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FilterConfig {
    None,
    Brightness { level: u8 },
    Pulse { frequency: f32, min: u8, max: u8 },
    Blink { on_ms: u32, off_ms: u32 },
    FadeIn { duration_ms: u32 },
    FadeOut { duration_ms: u32 },
    Breathing { frequency: f32, min: u8, max: u8 },
    /// Hue rotation in degrees per second.
    ColorShift { speed: f32 },
    Saturation { factor: f32 },
    Invert,
    Grayscale,
    Scanline { speed: f32, width: u8, angle: f32, intensity: u8 },
    Wave { speed: f32, wavelength: f32, amplitude: u8, angle: f32 },
    Glitch { intensity: u8, frequency: u8 },
    Rainbow { speed: f32, saturation: u8 },
    Sparkle { speed: f32, density: u8, decay: u8 },
    Plasma { speed: f32, scale: u8 },
    Sepia,
    Posterize { levels: u8 },
    Contrast { amount: i8 },
    ColorTemp { shift: i16 },
    Strobe { frequency: f32 },
    Noise { amount: u8 },
}

/// Listing order and one-line descriptions.
pub const FILTERS: &[(&str, &str)] = &[
    ("none", "No effect"),
    ("brightness", "Static brightness adjustment"),
    ("pulse", "Pulsing brightness (sine wave)"),
    ("blink", "On/off blinking"),
    ("fade-in", "Fade in (one-shot)"),
    ("fade-out", "Fade out (one-shot)"),
    ("breathing", "Smooth breathing effect"),
    ("color-shift", "Hue rotation over time"),
    ("saturation", "Saturation adjustment"),
    ("invert", "Invert colors"),
    ("grayscale", "Convert to grayscale"),
    ("scanline", "Bright band sweeping at an angle"),
    ("wave", "Brightness wave"),
    ("glitch", "Random glitch artifacts"),
    ("rainbow", "Rainbow color cycling"),
    ("sparkle", "Sparkling white pixels"),
    ("plasma", "Plasma wave effect"),
    ("sepia", "Sepia tone filter"),
    ("posterize", "Color posterization"),
    ("contrast", "Contrast adjustment"),
    ("color-temp", "Warm/cool white balance shift"),
    ("strobe", "Short flashes at a fixed rate"),
    ("noise", "Random per-channel noise"),
];

/// Optional explicit parameters for [`FilterConfig::from_request`].
#[derive(Clone, Copy, Debug, Default, Deserialize, utoipa::ToSchema)]
pub struct FilterOverrides {
    pub level: Option<u8>,
    pub duration_ms: Option<u32>,
    pub factor: Option<f32>,
    pub intensity: Option<u8>,
    pub density: Option<u8>,
    pub decay: Option<u8>,
    pub scale: Option<u8>,
    pub levels: Option<u8>,
    pub amount: Option<i32>,
    pub saturation: Option<u8>,
    pub angle: Option<f32>,
    pub width: Option<u8>,
    pub wavelength: Option<f32>,
    pub amplitude: Option<u8>,
    pub shift: Option<i16>,
}

/// Canonical listing name for any accepted spelling (`fade_in` → `fade-in`).
pub fn canonical_name(name: &str) -> Option<&'static str> {
    let wanted = name.trim().to_ascii_lowercase().replace('_', "-");
    FILTERS.iter().map(|(n, _)| *n).find(|n| *n == wanted)
}

impl FilterConfig {
    pub fn name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Brightness { .. } => "brightness",
            Self::Pulse { .. } => "pulse",
            Self::Blink { .. } => "blink",
            Self::FadeIn { .. } => "fade-in",
            Self::FadeOut { .. } => "fade-out",
            Self::Breathing { .. } => "breathing",
            Self::ColorShift { .. } => "color-shift",
            Self::Saturation { .. } => "saturation",
            Self::Invert => "invert",
            Self::Grayscale => "grayscale",
            Self::Scanline { .. } => "scanline",
            Self::Wave { .. } => "wave",
            Self::Glitch { .. } => "glitch",
            Self::Rainbow { .. } => "rainbow",
            Self::Sparkle { .. } => "sparkle",
            Self::Plasma { .. } => "plasma",
            Self::Sepia => "sepia",
            Self::Posterize { .. } => "posterize",
            Self::Contrast { .. } => "contrast",
            Self::ColorTemp { .. } => "color-temp",
            Self::Strobe { .. } => "strobe",
            Self::Noise { .. } => "noise",
        }
    }

    /// Build a config from a filter name and a 1-100 speed, filling every
    /// parameter not given in `overrides` from the speed.
    ///
    /// Unknown names are `NotFound`.
    pub fn from_request(name: &str, speed: u32, o: &FilterOverrides) -> Result<Self> {
        let canonical = canonical_name(name)
            .ok_or_else(|| LedError::not_found(format!("filter {name:?} not found")))?;
        let speed = speed.clamp(1, 100);
        let sf = speed as f32;
        let freq = 0.2 + (sf - 1.0) * 4.8 / 99.0;
        let period_ms = (1000.0 / freq).round() as u32;

        Ok(match canonical {
            "brightness" => Self::Brightness {
                level: o.level.unwrap_or(255),
            },
            "pulse" => Self::Pulse {
                frequency: freq,
                min: 20,
                max: 255,
            },
            "blink" => Self::Blink {
                on_ms: period_ms / 2,
                off_ms: period_ms / 2,
            },
            "fade-in" => Self::FadeIn {
                duration_ms: o.duration_ms.unwrap_or(period_ms),
            },
            "fade-out" => Self::FadeOut {
                duration_ms: o.duration_ms.unwrap_or(period_ms),
            },
            "breathing" => Self::Breathing {
                frequency: freq,
                min: 10,
                max: 255,
            },
            "color-shift" => Self::ColorShift { speed: sf * 3.6 },
            "saturation" => Self::Saturation {
                factor: o.factor.unwrap_or(1.0).clamp(0.0, 4.0),
            },
            "invert" => Self::Invert,
            "grayscale" => Self::Grayscale,
            "scanline" => Self::Scanline {
                speed: sf,
                width: o.width.filter(|w| *w > 0).unwrap_or(3),
                angle: o.angle.unwrap_or(0.0),
                intensity: o.intensity.filter(|i| *i > 0).unwrap_or(150),
            },
            "wave" => Self::Wave {
                speed: sf,
                wavelength: o.wavelength.filter(|w| *w > 0.0).unwrap_or(8.0),
                amplitude: o.amplitude.filter(|a| *a > 0).unwrap_or(128),
                angle: o.angle.unwrap_or(0.0),
            },
            "glitch" => Self::Glitch {
                intensity: o.intensity.filter(|i| *i > 0).unwrap_or(speed as u8),
                frequency: 10,
            },
            "rainbow" => Self::Rainbow {
                speed: sf,
                saturation: o.saturation.filter(|s| *s > 0).unwrap_or(255),
            },
            "sparkle" => Self::Sparkle {
                speed: sf,
                density: o.density.filter(|d| *d > 0).unwrap_or(50),
                decay: o.decay.filter(|d| *d > 0).unwrap_or(150),
            },
            "plasma" => Self::Plasma {
                speed: sf / 10.0,
                scale: o.scale.filter(|s| *s > 0).unwrap_or(20),
            },
            "sepia" => Self::Sepia,
            "posterize" => Self::Posterize {
                levels: o
                    .levels
                    .filter(|l| *l > 0)
                    .unwrap_or((2 + speed * 14 / 100) as u8),
            },
            "contrast" => Self::Contrast {
                amount: match o.amount {
                    Some(a) if (-100..=100).contains(&a) => a as i8,
                    _ => ((speed as i32 - 50) * 2) as i8,
                },
            },
            "color-temp" => Self::ColorTemp {
                shift: o
                    .shift
                    .unwrap_or(((speed as i32 - 50) * 2) as i16)
                    .clamp(-255, 255),
            },
            "strobe" => Self::Strobe { frequency: freq * 2.0 },
            "noise" => Self::Noise {
                amount: o.amount.map_or(speed as u8 * 2, |a| a.clamp(0, 255) as u8),
            },
            _ => Self::None,
        })
    }
}

// ── Running instance ─────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, Default)]
struct SparkleCell {
    brightness: u8,
    phase: SparklePhase,
    target: u8,
    fade_speed: u8,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
enum SparklePhase {
    #[default]
    Off,
    Rising,
    Hold,
    Falling,
}

/// A filter attached to a layer.
#[derive(Clone, Debug)]
pub struct PostEffect {
    pub config: FilterConfig,
    pub start_ms: u64,
    rng: Lcg,
    sparkles: Vec<SparkleCell>,
    row: Vec<Rgb>,
}

impl PostEffect {
    pub fn new(config: FilterConfig, geometry: &Geometry, now_ms: u64) -> Self {
        let sparkles = match config {
            FilterConfig::Sparkle { .. } => vec![SparkleCell::default(); geometry.led_count()],
            _ => Vec::new(),
        };
        let row = match config {
            FilterConfig::Glitch { .. } => vec![Rgb::BLACK; geometry.width as usize],
            _ => Vec::new(),
        };
        Self {
            config,
            start_ms: now_ms,
            rng: Lcg::new(0x5eed ^ now_ms as u32),
            sparkles,
            row,
        }
    }

    /// Rewrite `fb` in place for time `now_ms`.
    pub fn apply(&mut self, fb: &mut [Rgb], g: &Geometry, now_ms: u64) {
        let t = now_ms.saturating_sub(self.start_ms);
        let secs = t as f32 / 1000.0;
        let config = self.config;

        match config {
            FilterConfig::None => {}
            FilterConfig::Brightness { level } => scale_all(fb, level),
            FilterConfig::Pulse {
                frequency,
                min,
                max,
            } => {
                let wave = 0.5 * ((TAU * frequency * secs).sin() + 1.0);
                scale_all(fb, ramp(min, max, wave));
            }
            FilterConfig::Breathing {
                frequency,
                min,
                max,
            } => {
                let wave = 0.5 * (1.0 - (TAU * frequency * secs).cos());
                scale_all(fb, ramp(min, max, wave));
            }
            FilterConfig::Blink { on_ms, off_ms } => {
                let period = (on_ms as u64 + off_ms as u64).max(1);
                if t % period >= on_ms as u64 {
                    fb.fill(Rgb::BLACK);
                }
            }
            FilterConfig::FadeIn { duration_ms } => {
                let d = duration_ms as u64;
                let level = if t >= d { 255 } else { t * 255 / d };
                scale_all(fb, level as u8);
            }
            FilterConfig::FadeOut { duration_ms } => {
                let d = duration_ms as u64;
                let level = if t >= d { 0 } else { 255 - t * 255 / d };
                scale_all(fb, level as u8);
            }
            FilterConfig::ColorShift { speed } => {
                let shift = ((speed * secs) as i64).rem_euclid(360) as u16;
                for px in fb.iter_mut() {
                    let hsv = rgb_to_hsv(*px);
                    *px = hsv_to_rgb(Hsv::new((hsv.h + shift) % 360, hsv.s, hsv.v));
                }
            }
            FilterConfig::Saturation { factor } => {
                for px in fb.iter_mut() {
                    let (h, s, l) = rgb_to_hsl(*px);
                    *px = hsl_to_rgb(h, (s * factor).clamp(0.0, 1.0), l);
                }
            }
            FilterConfig::Invert => {
                for px in fb.iter_mut() {
                    *px = px.invert();
                }
            }
            FilterConfig::Grayscale => {
                for px in fb.iter_mut() {
                    let y = ((77 * px.r as u32 + 150 * px.g as u32 + 29 * px.b as u32) >> 8) as u8;
                    *px = Rgb::new(y, y, y);
                }
            }
            FilterConfig::Scanline {
                speed,
                width,
                angle,
                intensity,
            } => scanline(fb, g, secs, speed, width, angle, intensity),
            FilterConfig::Wave {
                speed,
                wavelength,
                amplitude,
                angle,
            } => wave(fb, g, secs, speed, wavelength, amplitude, angle),
            FilterConfig::Glitch {
                intensity,
                frequency,
            } => self.glitch(fb, g, intensity, frequency),
            FilterConfig::Rainbow { speed, saturation } => {
                let offset = (speed * secs).rem_euclid(360.0) as u16;
                for px in fb.iter_mut() {
                    let hsv = rgb_to_hsv(*px);
                    let s = hsv.s as u16 + (((255 - hsv.s as u16) * saturation as u16) >> 8);
                    *px = hsv_to_rgb(Hsv::new((hsv.h + offset) % 360, s as u8, hsv.v));
                }
            }
            FilterConfig::Sparkle {
                speed,
                density,
                decay,
            } => self.sparkle(fb, speed, density, decay),
            FilterConfig::Plasma { speed, scale } => {
                let time = speed * secs;
                let k = scale as f32;
                for (i, px) in fb.iter_mut().enumerate() {
                    let Ok((x, y)) = g.index_to_xy(i) else { continue };
                    let (x, y) = (x as f32, y as f32);
                    let v1 = ((x + time) * k / 10.0).sin();
                    let v2 = ((y + time) * k / 8.0).sin();
                    let v3 = ((x + y + time) * k / 6.0).sin();
                    let level = ((v1 + v2 + v3) / 3.0 + 1.0) * 0.5 * 255.0;
                    *px = scale_color(*px, level as u8);
                }
            }
            FilterConfig::Sepia => {
                for px in fb.iter_mut() {
                    let (r, gr, b) = (px.r as u32, px.g as u32, px.b as u32);
                    let mix = |a: u32, m: u32, c: u32| ((r * a + gr * m + b * c) >> 10).min(255) as u8;
                    *px = Rgb::new(mix(393, 769, 189), mix(349, 686, 168), mix(272, 534, 131));
                }
            }
            FilterConfig::Posterize { levels } => {
                let step = 256 / levels.clamp(2, 16) as u16;
                let q = |c: u8| ((c as u16 / step) * step) as u8;
                for px in fb.iter_mut() {
                    *px = Rgb::new(q(px.r), q(px.g), q(px.b));
                }
            }
            FilterConfig::Contrast { amount } => {
                let factor = 1.0 + amount as f32 / 100.0;
                let c = |v: u8| ((v as f32 - 128.0) * factor + 128.0).clamp(0.0, 255.0) as u8;
                for px in fb.iter_mut() {
                    *px = Rgb::new(c(px.r), c(px.g), c(px.b));
                }
            }
            FilterConfig::ColorTemp { shift } => {
                for px in fb.iter_mut() {
                    px.r = (px.r as i32 + shift as i32).clamp(0, 255) as u8;
                    px.b = (px.b as i32 - shift as i32).clamp(0, 255) as u8;
                }
            }
            FilterConfig::Strobe { frequency } => {
                let f = if frequency > 0.0 { frequency } else { 1.0 };
                let period = ((1000.0 / f) as u64).max(1);
                if t % period > period / 10 {
                    fb.fill(Rgb::BLACK);
                }
            }
            FilterConfig::Noise { amount } => {
                for px in fb.iter_mut() {
                    for ch in [&mut px.r, &mut px.g, &mut px.b] {
                        let n = ((self.rng.next() & 0xFF) as i32 - 128) * amount as i32 / 255;
                        *ch = (*ch as i32 + n).clamp(0, 255) as u8;
                    }
                }
            }
        }
    }

    fn glitch(&mut self, fb: &mut [Rgb], g: &Geometry, intensity: u8, frequency: u8) {
        let rng = &mut self.rng;
        if rng.next() & 0xFF > frequency as u32 {
            return;
        }
        if g.height <= 1 {
            let count = fb.len();
            let start = (rng.next() as usize * count) >> 16;
            let len = ((rng.next() * intensity as u32) >> 16) as usize;
            let end = (start + len).min(count);
            let shift = (rng.next() & 0xFF) as i32 - 128;
            for px in &mut fb[start..end] {
                px.r = (px.r as i32 + shift).clamp(0, 255) as u8;
            }
            return;
        }

        let w = g.width as i32;
        let row = ((rng.next() * g.height as u32) >> 16) as i32;
        let offset = (rng.next() & 0x0F) as i32 - 8;
        for x in 0..w {
            if let Ok(i) = g.xy_to_index(x, row) {
                self.row[x as usize] = fb[i];
            }
        }
        for x in 0..w {
            let src = (x + offset).rem_euclid(w) as usize;
            if let Ok(i) = g.xy_to_index(x, row) {
                fb[i] = self.row[src];
            }
        }
    }

    fn sparkle(&mut self, fb: &mut [Rgb], speed: f32, density: u8, decay: u8) {
        let chance = ((speed * density as f32) as u32).min(0xFFFF);
        let decay_factor = decay as u32 * decay as u32 / 255;
        let rng = &mut self.rng;

        for (px, cell) in fb.iter_mut().zip(self.sparkles.iter_mut()) {
            if px.r < 5 && px.g < 5 && px.b < 5 {
                *cell = SparkleCell::default();
                continue;
            }
            if cell.phase == SparklePhase::Off && rng.next() & 0xFFFF < chance {
                *cell = SparkleCell {
                    brightness: 0,
                    phase: SparklePhase::Rising,
                    target: 200 + (rng.next() & 0x37) as u8,
                    fade_speed: 15 + (rng.next() & 0x1F) as u8,
                };
            }
            match cell.phase {
                SparklePhase::Off => {}
                SparklePhase::Rising => {
                    cell.brightness = cell.brightness.saturating_add(cell.fade_speed);
                    if cell.brightness >= cell.target {
                        cell.brightness = cell.target;
                        cell.phase = SparklePhase::Hold;
                    }
                }
                SparklePhase::Hold => {
                    if rng.next() & 0x7F < 10 {
                        cell.phase = SparklePhase::Falling;
                    }
                }
                SparklePhase::Falling => {
                    let fade = ((cell.fade_speed as u32 * decay_factor) >> 7).clamp(1, 255) as u8;
                    if cell.brightness > fade {
                        cell.brightness -= fade;
                    } else {
                        cell.brightness = 0;
                        cell.phase = SparklePhase::Off;
                    }
                }
            }
            if cell.brightness > 0 {
                let lift = |c: u8| c + (((255 - c) as u16 * cell.brightness as u16) >> 8) as u8;
                *px = Rgb::new(lift(px.r), lift(px.g), lift(px.b));
            }
        }
    }
}

// ── Helpers ──────────────────────────────────────────────────────────

fn scale_all(fb: &mut [Rgb], level: u8) {
    if level == 255 {
        return;
    }
    for px in fb.iter_mut() {
        *px = scale_color(*px, level);
    }
}

/// `min + (max - min) * w` for `w` in 0..=1.
fn ramp(min: u8, max: u8, w: f32) -> u8 {
    let span = max as f32 - min as f32;
    (min as f32 + span * w).clamp(0.0, 255.0) as u8
}

fn scanline(fb: &mut [Rgb], g: &Geometry, secs: f32, speed: f32, width: u8, angle: f32, intensity: u8) {
    let line_width = if width > 0 { width as f32 } else { 3.0 };
    let (sin_a, cos_a) = (angle * PI / 180.0).sin_cos();
    let (w, h) = (g.width as f32, g.height as f32);
    let diag = (w * w + h * h).sqrt();
    let pos = (speed * secs).rem_euclid(diag);
    let line_pos = pos - diag / 2.0;

    for (i, px) in fb.iter_mut().enumerate() {
        let Ok((x, y)) = g.index_to_xy(i) else { continue };
        let perp = (x as f32 - w / 2.0) * cos_a + (y as f32 - h / 2.0) * sin_a;
        let dist = (perp - line_pos).abs();
        if dist < line_width {
            let fade = 1.0 - dist / line_width;
            let boost = 1.0 + intensity as f32 / 255.0 * 3.0 * fade * fade;
            let b = |c: u8| (c as f32 * boost).min(255.0) as u8;
            *px = Rgb::new(b(px.r), b(px.g), b(px.b));
        }
    }
}

fn wave(fb: &mut [Rgb], g: &Geometry, secs: f32, speed: f32, wavelength: f32, amplitude: u8, angle: f32) {
    let wavelength = if wavelength < 1.0 { 8.0 } else { wavelength };
    let (sin_a, cos_a) = (angle * PI / 180.0).sin_cos();
    let (cx, cy) = (g.width as f32 / 2.0, g.height as f32 / 2.0);
    let travel = speed * secs;

    for (i, px) in fb.iter_mut().enumerate() {
        let Ok((x, y)) = g.index_to_xy(i) else { continue };
        let coord = (x as f32 - cx) * cos_a + (y as f32 - cy) * sin_a;
        let phase = (coord + travel) * TAU / wavelength;
        let w = (phase.sin() + 1.0) * 0.5;
        let level = 255 - amplitude + (w * amplitude as f32) as u8;
        *px = scale_color(*px, level);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Origin, Scan};
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn strip() -> Geometry {
        Geometry::linear(4)
    }

    fn run(config: FilterConfig, input: Rgb, at_ms: u64) -> Rgb {
        let g = strip();
        let mut fb = vec![input; 4];
        PostEffect::new(config, &g, 0).apply(&mut fb, &g, at_ms);
        fb[0]
    }

    #[rstest]
    #[case("fade_in", "fade-in")]
    #[case("color-shift", "color-shift")]
    #[case("Color_Shift", "color-shift")]
    #[case("sepia", "sepia")]
    fn names_accept_both_spellings(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(canonical_name(input), Some(expected));
    }

    #[test]
    fn unknown_filter_is_not_found() {
        let err = FilterConfig::from_request("vortex", 50, &FilterOverrides::default()).unwrap_err();
        assert!(matches!(err, LedError::NotFound(_)));
    }

    #[test]
    fn speed_derived_defaults() {
        let none = FilterOverrides::default();
        match FilterConfig::from_request("pulse", 1, &none).unwrap() {
            FilterConfig::Pulse { frequency, min, max } => {
                assert!((frequency - 0.2).abs() < 1e-6);
                assert_eq!((min, max), (20, 255));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(
            FilterConfig::from_request("blink", 100, &none).unwrap(),
            FilterConfig::Blink { on_ms: 100, off_ms: 100 }
        );
        assert_eq!(
            FilterConfig::from_request("posterize", 50, &none).unwrap(),
            FilterConfig::Posterize { levels: 9 }
        );
        assert_eq!(
            FilterConfig::from_request("contrast", 75, &none).unwrap(),
            FilterConfig::Contrast { amount: 50 }
        );
        match FilterConfig::from_request("color_shift", 10, &none).unwrap() {
            FilterConfig::ColorShift { speed } => assert!((speed - 36.0).abs() < 1e-3),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn explicit_contrast_amount_wins() {
        let o = FilterOverrides {
            amount: Some(-40),
            ..Default::default()
        };
        assert_eq!(
            FilterConfig::from_request("contrast", 90, &o).unwrap(),
            FilterConfig::Contrast { amount: -40 }
        );
    }

    #[rstest]
    #[case(i16::MAX, 255, Rgb::new(255, 10, 0))]
    #[case(i16::MIN, -255, Rgb::new(0, 10, 255))]
    #[case(40, 40, Rgb::new(50, 10, 0))]
    fn color_temp_shift_is_bounded(#[case] shift: i16, #[case] stored: i16, #[case] expected: Rgb) {
        let o = FilterOverrides {
            shift: Some(shift),
            ..Default::default()
        };
        let config = FilterConfig::from_request("color-temp", 50, &o).unwrap();
        assert_eq!(config, FilterConfig::ColorTemp { shift: stored });
        assert_eq!(run(config, Rgb::new(10, 10, 10), 0), expected);
    }

    #[test]
    fn stored_color_temp_extremes_do_not_overflow() {
        assert_eq!(run(FilterConfig::ColorTemp { shift: i16::MAX }, Rgb::new(10, 10, 10), 0), Rgb::new(255, 10, 0));
        assert_eq!(run(FilterConfig::ColorTemp { shift: i16::MIN }, Rgb::new(10, 10, 10), 0), Rgb::new(0, 10, 255));
    }

    #[rstest]
    #[case(FilterConfig::None, Rgb::new(10, 20, 30))]
    #[case(FilterConfig::Invert, Rgb::new(245, 235, 225))]
    #[case(FilterConfig::Grayscale, Rgb::new(18, 18, 18))]
    #[case(FilterConfig::Brightness { level: 0 }, Rgb::BLACK)]
    #[case(FilterConfig::Posterize { levels: 4 }, Rgb::new(0, 0, 0))]
    fn static_filters(#[case] config: FilterConfig, #[case] expected: Rgb) {
        assert_eq!(run(config, Rgb::new(10, 20, 30), 0), expected);
    }

    #[test]
    fn sepia_clamps() {
        assert_eq!(run(FilterConfig::Sepia, Rgb::WHITE, 0), Rgb::new(255, 255, 233));
    }

    #[rstest]
    #[case(100, Rgb::new(255, 255, 0))]
    #[case(-100, Rgb::new(128, 128, 128))]
    #[case(0, Rgb::new(200, 200, 50))]
    fn contrast_stretches_around_mid(#[case] amount: i8, #[case] expected: Rgb) {
        assert_eq!(run(FilterConfig::Contrast { amount }, Rgb::new(200, 200, 50), 0), expected);
    }

    #[rstest]
    #[case(0, 0)]
    #[case(500, 127)]
    #[case(1000, 255)]
    #[case(5000, 255)]
    fn fade_in_freezes_at_end(#[case] at: u64, #[case] level: u8) {
        let out = run(FilterConfig::FadeIn { duration_ms: 1000 }, Rgb::WHITE, at);
        assert_eq!(out, Rgb::new(level, level, level));
    }

    #[test]
    fn fade_out_reaches_black() {
        assert_eq!(run(FilterConfig::FadeOut { duration_ms: 200 }, Rgb::WHITE, 250), Rgb::BLACK);
    }

    #[rstest]
    #[case(0, true)]
    #[case(99, true)]
    #[case(100, false)]
    #[case(299, false)]
    #[case(300, true)]
    fn blink_phases(#[case] at: u64, #[case] lit: bool) {
        let out = run(FilterConfig::Blink { on_ms: 100, off_ms: 200 }, Rgb::RED, at);
        assert_eq!(!out.is_black(), lit);
    }

    #[test]
    fn pulse_stays_within_bounds() {
        let cfg = FilterConfig::Pulse {
            frequency: 1.0,
            min: 20,
            max: 200,
        };
        for at in (0..1000).step_by(50) {
            let v = run(cfg, Rgb::WHITE, at).r;
            assert!((20..=200).contains(&v), "{at}: {v}");
        }
    }

    #[test]
    fn color_shift_rotates_hue() {
        // 120 deg/s for one second moves red to green
        let out = run(FilterConfig::ColorShift { speed: 120.0 }, Rgb::RED, 1000);
        assert_eq!(out, Rgb::GREEN);
    }

    #[test]
    fn sparkle_only_brightens_lit_pixels() {
        let g = Geometry::matrix(8, 8, Scan::Rows, Origin::TopLeft);
        let mut post = PostEffect::new(
            FilterConfig::Sparkle {
                speed: 100.0,
                density: 255,
                decay: 150,
            },
            &g,
            0,
        );
        let mut brightened = false;
        for frame in 0..50u64 {
            let mut fb = vec![Rgb::BLACK; 64];
            fb[..32].fill(Rgb::new(40, 40, 40));
            post.apply(&mut fb, &g, frame * 30);
            assert!(fb[32..].iter().all(|p| p.is_black()));
            brightened |= fb[..32].iter().any(|p| p.r > 40);
        }
        assert!(brightened);
    }

    #[test]
    fn glitch_on_matrix_only_moves_pixels() {
        let g = Geometry::matrix(8, 4, Scan::ZigzagRows, Origin::TopLeft);
        let mut post = PostEffect::new(
            FilterConfig::Glitch {
                intensity: 50,
                frequency: 255,
            },
            &g,
            0,
        );
        let original: Vec<Rgb> = (0..32u8).map(|i| Rgb::new(i, 0, 0)).collect();
        let mut fb = original.clone();
        post.apply(&mut fb, &g, 0);
        let mut a: Vec<u8> = original.iter().map(|p| p.r).collect();
        let mut b: Vec<u8> = fb.iter().map(|p| p.r).collect();
        a.sort_unstable();
        b.sort_unstable();
        assert_eq!(a, b);
    }

    #[test]
    fn stored_config_is_tagged_json() {
        let cfg = FilterConfig::Wave {
            speed: 50.0,
            wavelength: 8.0,
            amplitude: 128,
            angle: 90.0,
        };
        let json = serde_json::to_value(cfg).unwrap();
        assert_eq!(json["type"], "wave");
        let back: FilterConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back, cfg);
    }
}
