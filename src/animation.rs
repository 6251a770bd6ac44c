//! Effect catalog and runner.
//!
//! An effect is a procedural generator that repaints a layer at its own
//! interval. The catalog is a closed enum; per-effect state (heat map,
//! droplets) lives inside the [`EffectInstance`] and is allocated once when
//! the effect starts, never during a tick.
//!
//! ## Rust concepts
//! - A fieldless enum as a static catalog (`Animation::ALL`)
//! - An enum carrying data (`EffectState`) instead of function pointers plus `void*`
//! - Wrapping arithmetic for the pseudo-random generator

use crate::color::{Rgb, color_wheel, scale_color};
use crate::geometry::{Geometry, Layout};
use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;

// ── Speed mapping ────────────────────────────────────────────────────

/// Map a 1-100 speed to a frame interval: 1 → 200 ms, 100 → 5 ms.
///
/// The subtracted term rounds up, so speed 50 lands on 103 ms.
pub fn speed_to_interval(speed: u32) -> u32 {
    let s = speed.clamp(1, 100);
    200 - ((s - 1) * 195).div_ceil(99)
}

// ── Device kinds ─────────────────────────────────────────────────────

/// Which kinds of device an effect is designed for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeviceKinds(u8);

impl DeviceKinds {
    pub const POINT: Self = Self(0b001);
    pub const RING: Self = Self(0b010);
    pub const MATRIX: Self = Self(0b100);
    pub const ALL: Self = Self(0b111);

    pub fn for_layout(layout: Layout) -> Self {
        match layout {
            Layout::Strip => Self::POINT,
            Layout::Ring => Self::RING,
            Layout::Matrix => Self::MATRIX,
        }
    }

    pub fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    pub fn names(self) -> Vec<&'static str> {
        if self == Self::ALL {
            return vec!["all"];
        }
        [(Self::POINT, "point"), (Self::RING, "ring"), (Self::MATRIX, "matrix")]
            .into_iter()
            .filter(|(k, _)| self.intersects(*k))
            .map(|(_, n)| n)
            .collect()
    }
}

// ── Catalog ──────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Animation {
    Rainbow,
    Breathing,
    Solid,
    Sparkle,
    Pulse,
    ColorCycle,
    Heartbeat,
    Chase,
    Comet,
    Spin,
    BreatheWave,
    Fire,
    Rain,
    Coderain,
    Plasma,
    Ripple,
}

impl Animation {
    /// Catalog order, used for listings.
    pub const ALL: [Animation; 16] = [
        Self::Rainbow,
        Self::Breathing,
        Self::Solid,
        Self::Sparkle,
        Self::Pulse,
        Self::ColorCycle,
        Self::Heartbeat,
        Self::Chase,
        Self::Comet,
        Self::Spin,
        Self::BreatheWave,
        Self::Fire,
        Self::Rain,
        Self::Coderain,
        Self::Plasma,
        Self::Ripple,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Rainbow => "rainbow",
            Self::Breathing => "breathing",
            Self::Solid => "solid",
            Self::Sparkle => "sparkle",
            Self::Pulse => "pulse",
            Self::ColorCycle => "color_cycle",
            Self::Heartbeat => "heartbeat",
            Self::Chase => "chase",
            Self::Comet => "comet",
            Self::Spin => "spin",
            Self::BreatheWave => "breathe_wave",
            Self::Fire => "fire",
            Self::Rain => "rain",
            Self::Coderain => "coderain",
            Self::Plasma => "plasma",
            Self::Ripple => "ripple",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.name() == name)
    }

    pub fn default_interval_ms(self) -> u32 {
        match self {
            Self::Rainbow | Self::Breathing | Self::Pulse | Self::Heartbeat => 20,
            Self::Solid => 100,
            Self::Sparkle | Self::ColorCycle | Self::Comet | Self::BreatheWave => 30,
            Self::Fire | Self::Plasma | Self::Ripple => 30,
            Self::Spin => 25,
            Self::Chase | Self::Rain | Self::Coderain => 50,
        }
    }

    pub fn kinds(self) -> DeviceKinds {
        match self {
            Self::Rainbow | Self::Breathing | Self::Solid | Self::Sparkle => DeviceKinds::ALL,
            Self::Pulse | Self::ColorCycle | Self::Heartbeat => DeviceKinds::POINT,
            Self::Chase | Self::Comet | Self::Spin | Self::BreatheWave => DeviceKinds::RING,
            Self::Fire | Self::Rain | Self::Coderain | Self::Plasma | Self::Ripple => {
                DeviceKinds::MATRIX
            }
        }
    }
}

/// Every catalog entry, in catalog order.
pub fn list_builtin() -> Vec<&'static str> {
    Animation::ALL.iter().map(|a| a.name()).collect()
}

/// Entries applicable to a layout (shared entries included).
pub fn list_for_layout(layout: Layout) -> Vec<&'static str> {
    let kind = DeviceKinds::for_layout(layout);
    Animation::ALL
        .iter()
        .filter(|a| a.kinds().intersects(kind))
        .map(|a| a.name())
        .collect()
}

// ── Pseudo-random source ─────────────────────────────────────────────

/// 16-bit linear congruential generator. Cheap, deterministic per seed.
#[derive(Clone, Debug)]
pub struct Lcg(u32);

impl Lcg {
    pub fn new(seed: u32) -> Self {
        Self(seed)
    }

    pub fn next(&mut self) -> u32 {
        self.0 = self.0.wrapping_mul(1_103_515_245).wrapping_add(12_345);
        (self.0 >> 16) & 0xFFFF
    }

    /// Uniform-ish value in `0..n`.
    pub fn below(&mut self, n: u32) -> u32 {
        if n == 0 { 0 } else { self.next() % n }
    }
}

// ── Per-effect state ─────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, Default)]
struct Droplet {
    active: bool,
    y: u16,
    life: u8,
}

#[derive(Clone, Copy, Debug)]
struct CodeDrop {
    /// Head row, `None` while the column is idle.
    head: Option<i32>,
    len: u8,
    wait: u8,
    speed: u8,
    life: u8,
}

impl Default for CodeDrop {
    fn default() -> Self {
        Self {
            head: None,
            len: 0,
            wait: 0,
            speed: 2,
            life: 0,
        }
    }
}

#[derive(Clone, Debug)]
enum EffectState {
    Stateless,
    Fire { heat: Vec<u8> },
    Rain { drops: Vec<Droplet> },
    Code { drops: Vec<CodeDrop> },
}

impl EffectState {
    fn for_animation(animation: Animation, geometry: &Geometry) -> Self {
        let w = geometry.width as usize;
        match animation {
            Animation::Fire => Self::Fire {
                heat: vec![0; geometry.led_count()],
            },
            Animation::Rain => Self::Rain {
                drops: vec![Droplet::default(); w],
            },
            Animation::Coderain => Self::Code {
                drops: vec![CodeDrop::default(); w],
            },
            _ => Self::Stateless,
        }
    }
}

// ── Runner ───────────────────────────────────────────────────────────

const RAIN_DEFAULT: Rgb = Rgb::new(100, 150, 255);

/// A running effect on one layer.
#[derive(Clone, Debug)]
pub struct EffectInstance {
    pub animation: Animation,
    pub interval_ms: u32,
    /// Tint supplied by the caller, if any.
    pub color: Option<Rgb>,
    pub start_ms: u64,
    /// `None` until the first tick.
    pub last_ms: Option<u64>,
    latched: Rgb,
    rng: Lcg,
    state: EffectState,
}

impl EffectInstance {
    pub fn new(
        animation: Animation,
        interval_ms: Option<u32>,
        color: Option<Rgb>,
        geometry: &Geometry,
        now_ms: u64,
    ) -> Self {
        Self {
            animation,
            interval_ms: interval_ms.unwrap_or_else(|| animation.default_interval_ms()),
            color,
            start_ms: now_ms,
            last_ms: None,
            latched: Rgb::WHITE,
            rng: Lcg::new(12_345 ^ now_ms as u32),
            state: EffectState::for_animation(animation, geometry),
        }
    }

    pub fn is_due(&self, now_ms: u64) -> bool {
        match self.last_ms {
            None => true,
            Some(last) => now_ms.saturating_sub(last) >= self.interval_ms as u64,
        }
    }

    /// Run the generator if its interval has elapsed. Returns whether it ran.
    pub fn tick_if_due(&mut self, buf: &mut [Rgb], geometry: &Geometry, now_ms: u64) -> bool {
        if !self.is_due(now_ms) {
            return false;
        }
        if self.last_ms.is_none() {
            self.first_frame(buf);
        }
        self.generate(buf, geometry, now_ms);
        self.last_ms = Some(now_ms);
        true
    }

    fn first_frame(&mut self, buf: &mut [Rgb]) {
        let fallback = match self.animation {
            Animation::Rain => RAIN_DEFAULT,
            Animation::Heartbeat => Rgb::RED,
            Animation::Chase => Rgb::CYAN,
            _ => Rgb::WHITE,
        };
        self.latched = self.color.unwrap_or(fallback);
        match &mut self.state {
            EffectState::Rain { drops } => {
                drops.fill(Droplet::default());
                buf.fill(Rgb::BLACK);
            }
            EffectState::Code { drops } => drops.fill(CodeDrop::default()),
            EffectState::Fire { heat } => heat.fill(0),
            EffectState::Stateless => {}
        }
    }

    fn generate(&mut self, buf: &mut [Rgb], g: &Geometry, now: u64) {
        let n = buf.len();
        if n == 0 {
            return;
        }
        let color = self.latched;
        match self.animation {
            Animation::Solid => buf.fill(color),
            Animation::Rainbow => {
                let offset = (now / 20) as usize;
                for (i, px) in buf.iter_mut().enumerate() {
                    *px = color_wheel(((i * 256 / n + offset) & 0xFF) as u8);
                }
            }
            Animation::Breathing => {
                let phase = (now % 2000) as f64 / 2000.0 * TAU;
                let k = ((phase.sin() + 1.0) * 127.0) as u8;
                buf.fill(scale_color(color, k));
            }
            Animation::Sparkle => {
                fade(buf, 200);
                let mask = if n > 100 { 0x03 } else { 0x0F };
                if self.rng.next() & mask == 0 {
                    let pos = self.rng.below(n as u32) as usize;
                    buf[pos] = color;
                }
            }
            Animation::Pulse => {
                let cycle = (now % 1000) as u32;
                let k = match cycle {
                    0..100 => 255,
                    100..200 => 0,
                    200..300 => 200,
                    _ => 200 * (1000 - cycle) / 700,
                };
                buf.fill(scale_color(color, k as u8));
            }
            Animation::ColorCycle => buf.fill(color_wheel(((now / 30) & 0xFF) as u8)),
            Animation::Heartbeat => {
                let cycle = (now % 1200) as u32;
                let k = match cycle {
                    0..100 => cycle * 255 / 100,
                    100..200 => 255 - (cycle - 100) * 200 / 100,
                    200..300 => 55 + (cycle - 200) * 200 / 100,
                    300..500 => 255 - (cycle - 300) * 255 / 200,
                    _ => 0,
                };
                buf.fill(scale_color(color, k as u8));
            }
            Animation::Chase => {
                buf.fill(Rgb::BLACK);
                let pos = (now / 50) as usize % n;
                for i in 0..n.min(5) {
                    let idx = (pos + n - i) % n;
                    buf[idx] = scale_color(color, 255 - (i as u8) * 50);
                }
            }
            Animation::Comet => {
                fade(buf, 180);
                let pos = (now / 30) as usize % n;
                buf[pos] = color;
                if pos > 0 {
                    buf[pos - 1] = scale_color(Rgb::CYAN, 200);
                }
            }
            Animation::Spin => {
                let offset = (now / 25) as usize % n;
                for i in 0..n {
                    let k = if i < n / 2 { 255 } else { 50 };
                    let c = color_wheel((i * 256 / n) as u8);
                    buf[(i + offset) % n] = scale_color(c, k);
                }
            }
            Animation::BreatheWave => {
                let base = (now % 3000) as f64 / 3000.0 * TAU;
                for (i, px) in buf.iter_mut().enumerate() {
                    let phase = base + i as f64 / n as f64 * TAU;
                    let k = ((phase.sin() + 1.0) * 127.0) as u8;
                    let c = match self.color {
                        Some(c) => c,
                        None => color_wheel((i * 256 / n) as u8),
                    };
                    *px = scale_color(c, k);
                }
            }
            Animation::Fire => self.fire(buf, g),
            Animation::Rain => self.rain(buf, g),
            Animation::Coderain => self.coderain(buf, g),
            Animation::Plasma => {
                let t = (now % 3_600_000) as f64 / 1000.0;
                for y in 0..g.height as i32 {
                    for x in 0..g.width as i32 {
                        let (fx, fy) = (x as f64, y as f64);
                        let v = (fx / 4.0 + t).sin()
                            + (fy / 4.0 + t).sin()
                            + ((fx + fy) / 4.0 + t).sin()
                            + ((fx * fx + fy * fy).sqrt() / 4.0 + t).sin();
                        let idx = ((v + 4.0) * 32.0) as u32 & 0xFF;
                        put(buf, g, x, y, color_wheel(idx as u8));
                    }
                }
            }
            Animation::Ripple => {
                buf.fill(Rgb::BLACK);
                let cx = g.width as f64 / 2.0;
                let cy = g.height as f64 / 2.0;
                let radius = ((now / 50) % 40) as f64;
                for y in 0..g.height as i32 {
                    for x in 0..g.width as i32 {
                        let dist = ((x as f64 - cx).powi(2) + (y as f64 - cy).powi(2)).sqrt();
                        let diff = (dist - radius).abs();
                        if diff < 3.0 {
                            let k = 255 - (diff * 85.0) as u8;
                            put(buf, g, x, y, scale_color(Rgb::BLUE, k));
                        }
                    }
                }
            }
        }
    }

    /// Heat rises from the bottom row; row 0 of the heat map is the bottom.
    fn fire(&mut self, buf: &mut [Rgb], g: &Geometry) {
        let EffectState::Fire { heat } = &mut self.state else {
            return;
        };
        let w = g.width as usize;
        let h = g.height as usize;
        let rng = &mut self.rng;

        for cell in heat.iter_mut() {
            *cell = if *cell > 20 {
                *cell - (rng.next() & 15) as u8 - 5
            } else {
                0
            };
        }
        for row in (2..h).rev() {
            for x in 0..w {
                let i = row * w + x;
                heat[i] = ((heat[i - w] as u16 + 2 * heat[i - 2 * w] as u16) / 3) as u8;
            }
        }
        for cell in heat.iter_mut().take(w) {
            if rng.next() & 0xFF < 150 {
                *cell = 180 + rng.below(76) as u8;
            }
        }

        for row in 0..h {
            for x in 0..w {
                let t = heat[row * w + x];
                let c = match t {
                    0..85 => Rgb::new(t * 3, 0, 0),
                    85..170 => Rgb::new(255, (t - 85) * 3, 0),
                    _ => Rgb::new(255, 255, (t - 170) * 3),
                };
                put(buf, g, x as i32, (h - 1 - row) as i32, c);
            }
        }
    }

    fn rain(&mut self, buf: &mut [Rgb], g: &Geometry) {
        let EffectState::Rain { drops } = &mut self.state else {
            return;
        };
        let h = g.height;
        let rng = &mut self.rng;
        fade(buf, 160);

        for (x, drop) in drops.iter_mut().enumerate() {
            if drop.active {
                drop.y += 1;
                drop.life = drop.life.saturating_sub(1);
                if drop.life == 0 || drop.y >= h {
                    drop.active = false;
                }
            }
            if !drop.active && rng.below(80) == 0 {
                *drop = Droplet {
                    active: true,
                    y: 0,
                    life: 8 + rng.below(21) as u8,
                };
            }
            if drop.active && drop.y < h {
                put(buf, g, x as i32, drop.y as i32, self.latched);
            }
        }
    }

    /// Every other column carries a glyph stream with a short fading tail.
    fn coderain(&mut self, buf: &mut [Rgb], g: &Geometry) {
        let EffectState::Code { drops } = &mut self.state else {
            return;
        };
        let h = g.height as i32;
        let rng = &mut self.rng;
        fade(buf, 120);

        for (x, drop) in drops.iter_mut().enumerate().step_by(2) {
            if let Some(head) = drop.head {
                drop.wait += 1;
                if drop.wait >= drop.speed {
                    drop.wait = 0;
                    drop.head = Some(head + 1);
                    drop.life = drop.life.saturating_sub(1);
                    if drop.life == 0 || head + 1 > h + drop.len as i32 {
                        drop.head = None;
                    }
                }
            }

            let Some(head) = drop.head else {
                if rng.below(180) == 0 {
                    *drop = CodeDrop {
                        head: Some(0),
                        len: 2 + rng.below(4) as u8,
                        wait: 0,
                        speed: 2 + rng.below(2) as u8,
                        life: 10 + rng.below(25) as u8,
                    };
                }
                continue;
            };

            let falloff = |y: i32| 1.0 - (y as f32 / h as f32) * 0.6;
            if (0..h).contains(&head) {
                let f = falloff(head);
                let c = Rgb::new((25.0 * f) as u8, (100.0 * f) as u8, (35.0 * f) as u8);
                put(buf, g, x as i32, head, c);
            }
            for i in 1..=drop.len as i32 {
                let y = head - i;
                if (0..h).contains(&y) {
                    let ratio = 1.0 - i as f32 / drop.len as f32;
                    let f = falloff(y);
                    let c = Rgb::new(
                        (ratio * 8.0 * f) as u8,
                        ((15.0 + ratio * 45.0) * f) as u8,
                        (ratio * 10.0 * f) as u8,
                    );
                    put(buf, g, x as i32, y, c);
                }
            }
        }
    }
}

fn fade(buf: &mut [Rgb], k: u8) {
    for px in buf.iter_mut() {
        *px = scale_color(*px, k);
    }
}

fn put(buf: &mut [Rgb], g: &Geometry, x: i32, y: i32, c: Rgb) {
    if let Ok(i) = g.xy_to_index(x, y) {
        buf[i] = c;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Origin, Scan};
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn matrix() -> Geometry {
        Geometry::matrix(32, 32, Scan::ZigzagRows, Origin::TopLeft)
    }

    #[rstest]
    #[case(1, 200)]
    #[case(30, 142)]
    #[case(50, 103)]
    #[case(100, 5)]
    #[case(0, 200)]
    #[case(250, 5)]
    fn interval_from_speed(#[case] speed: u32, #[case] expected: u32) {
        assert_eq!(speed_to_interval(speed), expected);
    }

    #[test]
    fn interval_strictly_decreasing() {
        for s in 1..100 {
            assert!(speed_to_interval(s) > speed_to_interval(s + 1), "speed {s}");
        }
    }

    #[test]
    fn catalog_names_round_trip() {
        for a in Animation::ALL {
            assert_eq!(Animation::from_name(a.name()), Some(a));
        }
        assert_eq!(Animation::from_name("disco"), None);
        assert_eq!(list_builtin().len(), 16);
    }

    #[rstest]
    #[case(Layout::Strip, vec!["rainbow", "breathing", "solid", "sparkle", "pulse", "color_cycle", "heartbeat"])]
    #[case(Layout::Ring, vec!["rainbow", "breathing", "solid", "sparkle", "chase", "comet", "spin", "breathe_wave"])]
    #[case(Layout::Matrix, vec!["rainbow", "breathing", "solid", "sparkle", "fire", "rain", "coderain", "plasma", "ripple"])]
    fn list_per_layout(#[case] layout: Layout, #[case] expected: Vec<&str>) {
        assert_eq!(list_for_layout(layout), expected);
    }

    #[test]
    fn serde_names_match_catalog() {
        for a in Animation::ALL {
            let json = serde_json::to_string(&a).unwrap();
            assert_eq!(json, format!("\"{}\"", a.name()));
        }
    }

    #[test]
    fn runner_respects_interval() {
        let g = Geometry::linear(4);
        let mut buf = vec![Rgb::BLACK; 4];
        let mut fx = EffectInstance::new(Animation::Solid, Some(100), None, &g, 1_000);
        assert!(fx.tick_if_due(&mut buf, &g, 1_000));
        assert!(!fx.tick_if_due(&mut buf, &g, 1_099));
        assert!(fx.tick_if_due(&mut buf, &g, 1_100));
        assert_eq!(fx.last_ms, Some(1_100));
    }

    #[test]
    fn solid_uses_payload_or_white() {
        let g = Geometry::linear(3);
        let mut buf = vec![Rgb::BLACK; 3];
        EffectInstance::new(Animation::Solid, None, Some(Rgb::RED), &g, 0).tick_if_due(&mut buf, &g, 0);
        assert_eq!(buf, vec![Rgb::RED; 3]);
        EffectInstance::new(Animation::Solid, None, None, &g, 0).tick_if_due(&mut buf, &g, 0);
        assert_eq!(buf, vec![Rgb::WHITE; 3]);
    }

    #[test]
    fn rainbow_follows_wheel() {
        let g = Geometry::linear(32);
        let mut buf = vec![Rgb::BLACK; 32];
        let mut fx = EffectInstance::new(Animation::Rainbow, None, None, &g, 0);
        fx.tick_if_due(&mut buf, &g, 200);
        // offset 10, pixel 1 adds 8
        assert_eq!(buf[0], color_wheel(10));
        assert_eq!(buf[1], color_wheel(18));
    }

    #[rstest]
    #[case(0, 127)]
    #[case(500, 254)]
    #[case(1500, 0)]
    fn breathing_curve(#[case] now: u64, #[case] k: u8) {
        let g = Geometry::linear(1);
        let mut buf = vec![Rgb::BLACK; 1];
        let mut fx = EffectInstance::new(Animation::Breathing, None, Some(Rgb::GREEN), &g, 0);
        fx.tick_if_due(&mut buf, &g, now);
        assert!(buf[0].g.abs_diff(scale_color(Rgb::GREEN, k).g) <= 1, "{now}: {:?}", buf[0]);
    }

    #[rstest]
    #[case(50, 255)]
    #[case(150, 0)]
    #[case(250, 200)]
    #[case(650, 100)]
    fn pulse_shape(#[case] now: u64, #[case] level: u8) {
        let g = Geometry::linear(1);
        let mut buf = vec![Rgb::BLACK; 1];
        let mut fx = EffectInstance::new(Animation::Pulse, None, None, &g, 0);
        fx.tick_if_due(&mut buf, &g, now);
        assert_eq!(buf[0], Rgb::new(level, level, level));
    }

    #[test]
    fn chase_draws_fading_tail() {
        let g = Geometry::linear(32);
        let mut buf = vec![Rgb::BLACK; 32];
        let mut fx = EffectInstance::new(Animation::Chase, None, None, &g, 0);
        fx.tick_if_due(&mut buf, &g, 500);
        assert_eq!(buf[10], scale_color(Rgb::CYAN, 255));
        assert_eq!(buf[6], scale_color(Rgb::CYAN, 55));
        assert_eq!(buf[5], Rgb::BLACK);
        assert_eq!(buf.iter().filter(|p| !p.is_black()).count(), 5);
    }

    #[test]
    fn plasma_fills_matrix() {
        let g = matrix();
        let mut buf = vec![Rgb::BLACK; g.led_count()];
        let mut fx = EffectInstance::new(Animation::Plasma, Some(speed_to_interval(50)), None, &g, 0);
        for now in (0..=1000).step_by(103) {
            fx.tick_if_due(&mut buf, &g, now);
        }
        let lit = buf.iter().filter(|p| !p.is_black()).count();
        assert!(lit * 10 >= buf.len() * 9, "{lit} lit");
    }

    #[test]
    fn fire_lights_bottom_rows() {
        let g = matrix();
        let mut buf = vec![Rgb::BLACK; g.led_count()];
        let mut fx = EffectInstance::new(Animation::Fire, None, None, &g, 0);
        for now in (0..600).step_by(30) {
            fx.tick_if_due(&mut buf, &g, now);
        }
        let bottom: usize = (0..32)
            .filter(|&x| !buf[g.xy_to_index(x, 31).unwrap()].is_black())
            .count();
        assert!(bottom > 16, "only {bottom} burning");
    }

    #[test]
    fn rain_resets_on_first_frame_and_uses_payload() {
        let g = matrix();
        let mut buf = vec![Rgb::WHITE; g.led_count()];
        let mut fx = EffectInstance::new(Animation::Rain, None, Some(Rgb::RED), &g, 0);
        fx.tick_if_due(&mut buf, &g, 0);
        assert!(buf.iter().all(|p| p.is_black() || *p == Rgb::RED));
        for now in (50..5000).step_by(50) {
            fx.tick_if_due(&mut buf, &g, now);
        }
        assert!(buf.iter().any(|p| !p.is_black()));
    }

    #[test]
    fn coderain_stays_green() {
        let g = matrix();
        let mut buf = vec![Rgb::BLACK; g.led_count()];
        let mut fx = EffectInstance::new(Animation::Coderain, None, None, &g, 7);
        for now in (0..20_000).step_by(50) {
            fx.tick_if_due(&mut buf, &g, now);
        }
        assert!(buf.iter().all(|p| p.g >= p.r && p.g >= p.b));
    }

    #[test]
    fn ripple_ring_is_blue() {
        let g = matrix();
        let mut buf = vec![Rgb::BLACK; g.led_count()];
        let mut fx = EffectInstance::new(Animation::Ripple, None, None, &g, 0);
        fx.tick_if_due(&mut buf, &g, 500);
        assert!(buf.iter().any(|p| p.b > 0));
        assert!(buf.iter().all(|p| p.r == 0 && p.g == 0));
    }

    #[test]
    fn lcg_is_deterministic() {
        let mut a = Lcg::new(1);
        let mut b = Lcg::new(1);
        for _ in 0..10 {
            assert_eq!(a.next(), b.next());
        }
        assert!(a.next() <= 0xFFFF);
    }
}
