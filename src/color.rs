//! Pixel and color primitives: RGB/HSV types, parsing, wheel and scaling.
//!
//! ## Rust concepts
//! - `Copy` value types for pixels (three bytes, passed by value)
//! - `FromStr` so `"#FF0000".parse::<Rgb>()` works
//! - Associated constants (`Rgb::BLACK`)

use crate::error::{LedError, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

// ── RGB ──────────────────────────────────────────────────────────────

/// One 8-bit-per-channel pixel. Black is "transparent" during composition.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, utoipa::ToSchema,
)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const BLACK: Rgb = Rgb::new(0, 0, 0);
    pub const WHITE: Rgb = Rgb::new(255, 255, 255);
    pub const RED: Rgb = Rgb::new(255, 0, 0);
    pub const GREEN: Rgb = Rgb::new(0, 255, 0);
    pub const BLUE: Rgb = Rgb::new(0, 0, 255);
    pub const CYAN: Rgb = Rgb::new(0, 255, 255);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub fn is_black(self) -> bool {
        self.r == 0 && self.g == 0 && self.b == 0
    }

    /// Parse `#RRGGBB`. Anything else is `InvalidArg`.
    pub fn from_hex(s: &str) -> Result<Self> {
        let hex = s
            .strip_prefix('#')
            .filter(|h| h.len() == 6 && h.is_ascii())
            .ok_or_else(|| LedError::invalid_arg(format!("not a #RRGGBB color: {s}")))?;
        let value = u32::from_str_radix(hex, 16)
            .map_err(|_| LedError::invalid_arg(format!("not a #RRGGBB color: {s}")))?;
        Ok(Self::from_u32(value))
    }

    /// Look up a named color (case-insensitive).
    pub fn from_name(name: &str) -> Result<Self> {
        let lower = name.to_ascii_lowercase();
        NAMED_COLORS
            .iter()
            .find(|(n, _)| *n == lower)
            .map(|(_, c)| *c)
            .ok_or_else(|| LedError::invalid_arg(format!("unknown color: {name}")))
    }

    pub const fn from_u32(value: u32) -> Self {
        Self::new((value >> 16) as u8, (value >> 8) as u8, value as u8)
    }

    pub const fn to_u32(self) -> u32 {
        ((self.r as u32) << 16) | ((self.g as u32) << 8) | self.b as u32
    }

    pub fn to_hex(self) -> String {
        format!("#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }

    /// Scale every channel by `k/255`.
    pub fn scale(self, k: u8) -> Self {
        scale_color(self, k)
    }

    /// Channel-wise `255 - c`.
    pub fn invert(self) -> Self {
        Self::new(255 - self.r, 255 - self.g, 255 - self.b)
    }

    /// Sum of channels, used as a cheap brightness measure.
    pub fn sum(self) -> u16 {
        self.r as u16 + self.g as u16 + self.b as u16
    }
}

impl FromStr for Rgb {
    type Err = LedError;

    fn from_str(s: &str) -> Result<Self> {
        parse_color(s)
    }
}

/// Names understood by [`Rgb::from_name`].
pub const NAMED_COLORS: &[(&str, Rgb)] = &[
    ("black", Rgb::new(0, 0, 0)),
    ("white", Rgb::new(255, 255, 255)),
    ("red", Rgb::new(255, 0, 0)),
    ("green", Rgb::new(0, 255, 0)),
    ("blue", Rgb::new(0, 0, 255)),
    ("yellow", Rgb::new(255, 255, 0)),
    ("cyan", Rgb::new(0, 255, 255)),
    ("magenta", Rgb::new(255, 0, 255)),
    ("orange", Rgb::new(255, 165, 0)),
    ("purple", Rgb::new(128, 0, 128)),
    ("pink", Rgb::new(255, 192, 203)),
];

/// Hex first, then the name table.
pub fn parse_color(s: &str) -> Result<Rgb> {
    let s = s.trim();
    if s.starts_with('#') {
        Rgb::from_hex(s)
    } else {
        Rgb::from_name(s)
            .map_err(|_| LedError::invalid_arg(format!("expected #RRGGBB or a color name, got {s:?}")))
    }
}

/// `(c·k)/255` per channel.
pub fn scale_color(c: Rgb, k: u8) -> Rgb {
    let s = |v: u8| ((v as u16 * k as u16) / 255) as u8;
    Rgb::new(s(c.r), s(c.g), s(c.b))
}

/// Linear interpolation, `amount` 0 → `a`, 255 → `b`.
pub fn blend(a: Rgb, b: Rgb, amount: u8) -> Rgb {
    let mix = |x: u8, y: u8| {
        let x = x as i32;
        let y = y as i32;
        (x + (y - x) * amount as i32 / 255) as u8
    };
    Rgb::new(mix(a.r, b.r), mix(a.g, b.g), mix(a.b, b.b))
}

/// 256-step rainbow: red → green → blue → red.
pub fn color_wheel(pos: u8) -> Rgb {
    let p = 255 - pos;
    match p {
        0..85 => Rgb::new(255 - p * 3, 0, p * 3),
        85..170 => {
            let p = p - 85;
            Rgb::new(0, p * 3, 255 - p * 3)
        }
        _ => {
            let p = p - 170;
            Rgb::new(p * 3, 255 - p * 3, 0)
        }
    }
}

// ── HSV ──────────────────────────────────────────────────────────────

/// Hue in degrees (0-359), saturation and value 0-255.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct Hsv {
    pub h: u16,
    pub s: u8,
    pub v: u8,
}

impl Hsv {
    pub const fn new(h: u16, s: u8, v: u8) -> Self {
        Self { h, s, v }
    }
}

/// Standard six-sector conversion, rounded to the nearest count.
pub fn hsv_to_rgb(hsv: Hsv) -> Rgb {
    if hsv.s == 0 {
        return Rgb::new(hsv.v, hsv.v, hsv.v);
    }
    let h = (hsv.h % 360) as f32 / 60.0;
    let sector = h.floor();
    let f = h - sector;
    let v = hsv.v as f32;
    let s = hsv.s as f32 / 255.0;

    let p = v * (1.0 - s);
    let q = v * (1.0 - s * f);
    let t = v * (1.0 - s * (1.0 - f));
    let (r, g, b) = match sector as u8 {
        0 => (v, t, p),
        1 => (q, v, p),
        2 => (p, v, t),
        3 => (p, q, v),
        4 => (t, p, v),
        _ => (v, p, q),
    };
    Rgb::new(to_channel(r), to_channel(g), to_channel(b))
}

/// Inverse of [`hsv_to_rgb`]. Grays report hue 0.
pub fn rgb_to_hsv(c: Rgb) -> Hsv {
    let r = c.r as f32;
    let g = c.g as f32;
    let b = c.b as f32;
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    if max == 0.0 || delta == 0.0 {
        return Hsv::new(0, 0, max as u8);
    }

    let s = delta / max * 255.0;
    let mut h = if max == r {
        60.0 * ((g - b) / delta)
    } else if max == g {
        60.0 * ((b - r) / delta + 2.0)
    } else {
        60.0 * ((r - g) / delta + 4.0)
    };
    if h < 0.0 {
        h += 360.0;
    }
    Hsv::new((h.round() as u16) % 360, to_channel(s), max as u8)
}

// ── HSL (float) ──────────────────────────────────────────────────────

/// RGB → (hue 0..1, saturation 0..1, lightness 0..1).
pub fn rgb_to_hsl(c: Rgb) -> (f32, f32, f32) {
    let r = c.r as f32 / 255.0;
    let g = c.g as f32 / 255.0;
    let b = c.b as f32 / 255.0;
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let l = (max + min) / 2.0;
    if max == min {
        return (0.0, 0.0, l);
    }
    let d = max - min;
    let s = if l > 0.5 { d / (2.0 - max - min) } else { d / (max + min) };
    let h = if max == r {
        (g - b) / d + if g < b { 6.0 } else { 0.0 }
    } else if max == g {
        (b - r) / d + 2.0
    } else {
        (r - g) / d + 4.0
    };
    (h / 6.0, s, l)
}

pub fn hsl_to_rgb(h: f32, s: f32, l: f32) -> Rgb {
    if s <= 0.0 {
        let v = to_channel(l * 255.0);
        return Rgb::new(v, v, v);
    }
    let q = if l < 0.5 { l * (1.0 + s) } else { l + s - l * s };
    let p = 2.0 * l - q;
    let r = hue_to_channel(p, q, h + 1.0 / 3.0);
    let g = hue_to_channel(p, q, h);
    let b = hue_to_channel(p, q, h - 1.0 / 3.0);
    Rgb::new(to_channel(r * 255.0), to_channel(g * 255.0), to_channel(b * 255.0))
}

fn hue_to_channel(p: f32, q: f32, mut t: f32) -> f32 {
    if t < 0.0 {
        t += 1.0;
    }
    if t > 1.0 {
        t -= 1.0;
    }
    if t < 1.0 / 6.0 {
        p + (q - p) * 6.0 * t
    } else if t < 0.5 {
        q
    } else if t < 2.0 / 3.0 {
        p + (q - p) * (2.0 / 3.0 - t) * 6.0
    } else {
        p
    }
}

/// Round and clamp a float channel into a byte.
pub(crate) fn to_channel(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[rstest]
    #[case("#FF0000", Rgb::new(255, 0, 0))]
    #[case("#00ff80", Rgb::new(0, 255, 128))]
    #[case("red", Rgb::RED)]
    #[case("Cyan", Rgb::CYAN)]
    #[case("orange", Rgb::new(255, 165, 0))]
    #[case("  #010203 ", Rgb::new(1, 2, 3))]
    fn parse_accepts_hex_and_names(#[case] input: &str, #[case] expected: Rgb) {
        assert_eq!(parse_color(input).unwrap(), expected);
    }

    #[rstest]
    #[case("#FF00")]
    #[case("#GG0000")]
    #[case("FF0000")]
    #[case("chartreuse")]
    #[case("")]
    fn parse_rejects_garbage(#[case] input: &str) {
        let err = parse_color(input).unwrap_err();
        assert!(matches!(err, LedError::InvalidArg(_)), "{err:?}");
    }

    #[test]
    fn u32_and_hex_agree() {
        let c = Rgb::from_u32(0x12AB34);
        assert_eq!(c, Rgb::new(0x12, 0xAB, 0x34));
        assert_eq!(c.to_u32(), 0x12AB34);
        assert_eq!(c.to_hex(), "#12AB34");
    }

    #[rstest]
    #[case(Rgb::new(255, 0, 0), 80, Rgb::new(80, 0, 0))]
    #[case(Rgb::new(255, 255, 255), 255, Rgb::new(255, 255, 255))]
    #[case(Rgb::new(200, 100, 50), 0, Rgb::BLACK)]
    #[case(Rgb::new(200, 100, 50), 128, Rgb::new(100, 50, 25))]
    fn scale_divides_by_255(#[case] c: Rgb, #[case] k: u8, #[case] expected: Rgb) {
        assert_eq!(scale_color(c, k), expected);
    }

    #[rstest]
    #[case(0, Rgb::new(255, 0, 0))]
    #[case(85, Rgb::new(0, 255, 0))]
    #[case(170, Rgb::new(0, 0, 255))]
    fn wheel_hits_primaries(#[case] pos: u8, #[case] expected: Rgb) {
        assert_eq!(color_wheel(pos), expected);
    }

    #[test]
    fn wheel_never_black() {
        for pos in 0..=255u8 {
            assert!(!color_wheel(pos).is_black(), "pos {pos}");
        }
    }

    #[rstest]
    #[case(Hsv::new(0, 255, 255), Rgb::RED)]
    #[case(Hsv::new(120, 255, 255), Rgb::GREEN)]
    #[case(Hsv::new(240, 255, 255), Rgb::BLUE)]
    #[case(Hsv::new(60, 255, 255), Rgb::new(255, 255, 0))]
    #[case(Hsv::new(77, 0, 90), Rgb::new(90, 90, 90))]
    fn hsv_to_rgb_primaries(#[case] hsv: Hsv, #[case] expected: Rgb) {
        assert_eq!(hsv_to_rgb(hsv), expected);
    }

    fn hue_distance(a: u16, b: u16) -> u16 {
        let d = a.abs_diff(b);
        d.min(360 - d)
    }

    #[test]
    fn hsv_round_trip_within_two_counts() {
        for s in [160u8, 200, 255] {
            for v in [160u8, 200, 255] {
                for h in (0..360u16).step_by(7) {
                    let back = rgb_to_hsv(hsv_to_rgb(Hsv::new(h, s, v)));
                    assert!(hue_distance(back.h, h) <= 2, "h {h} s {s} v {v} -> {back:?}");
                    assert!(back.s.abs_diff(s) <= 2, "h {h} s {s} v {v} -> {back:?}");
                    assert!(back.v.abs_diff(v) <= 2, "h {h} s {s} v {v} -> {back:?}");
                }
            }
        }
    }

    #[test]
    fn hsl_round_trip_is_close() {
        let c = Rgb::new(200, 80, 30);
        let (h, s, l) = rgb_to_hsl(c);
        let back = hsl_to_rgb(h, s, l);
        assert!(back.r.abs_diff(c.r) <= 1);
        assert!(back.g.abs_diff(c.g) <= 1);
        assert!(back.b.abs_diff(c.b) <= 1);
    }

    #[test]
    fn blend_endpoints() {
        let a = Rgb::new(10, 20, 30);
        let b = Rgb::new(200, 100, 0);
        assert_eq!(blend(a, b, 0), a);
        assert_eq!(blend(a, b, 255), b);
    }
}
