//! Layer store and compositor.
//!
//! Each device owns a stack of layers. A layer is a full-size pixel buffer
//! plus blend settings, and optionally a running effect (generator) and a
//! post-effect (filter). Black pixels are transparent: composition never
//! writes to the framebuffer on behalf of a black layer pixel.
//!
//! ## Rust concepts
//! - Clipping by ignoring `Err` from the coordinate mapper (`if let Ok(..)`)
//! - Slices (`&mut [Rgb]`) so compositing works on any framebuffer
//! - `Option<T>` for "at most one effect per layer"

use crate::animation::EffectInstance;
use crate::color::{Rgb, blend};
use crate::error::{LedError, Result};
use crate::filter::PostEffect;
use crate::geometry::Geometry;
use serde::{Deserialize, Serialize};

/// Layers allowed per device.
pub const MAX_LAYERS: usize = 8;

/// How a layer's non-black pixels combine with what is below.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum BlendMode {
    #[default]
    Normal,
    Add,
    Multiply,
    Screen,
}

/// Creation-time settings for a layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct LayerConfig {
    #[serde(default)]
    pub blend: BlendMode,
    #[serde(default = "default_opacity")]
    pub opacity: u8,
    #[serde(default = "default_visible")]
    pub visible: bool,
}

fn default_opacity() -> u8 {
    255
}

fn default_visible() -> bool {
    true
}

impl Default for LayerConfig {
    fn default() -> Self {
        Self {
            blend: BlendMode::Normal,
            opacity: 255,
            visible: true,
        }
    }
}

pub struct Layer {
    geometry: Geometry,
    buffer: Vec<Rgb>,
    config: LayerConfig,
    effect: Option<EffectInstance>,
    post_effect: Option<PostEffect>,
}

impl Layer {
    pub fn new(geometry: Geometry, config: LayerConfig) -> Self {
        Self {
            geometry,
            buffer: vec![Rgb::BLACK; geometry.led_count()],
            config,
            effect: None,
            post_effect: None,
        }
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub fn config(&self) -> LayerConfig {
        self.config
    }

    pub fn pixels(&self) -> &[Rgb] {
        &self.buffer
    }

    pub fn pixels_mut(&mut self) -> &mut [Rgb] {
        &mut self.buffer
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn effect(&self) -> Option<&EffectInstance> {
        self.effect.as_ref()
    }

    pub fn post_effect(&self) -> Option<&PostEffect> {
        self.post_effect.as_ref()
    }

    // ── Settings ─────────────────────────────────────────────────────

    pub fn set_visible(&mut self, visible: bool) {
        self.config.visible = visible;
    }

    pub fn set_opacity(&mut self, opacity: u8) {
        self.config.opacity = opacity;
    }

    pub fn set_blend(&mut self, blend: BlendMode) {
        self.config.blend = blend;
    }

    // ── Effect and post-effect slots ─────────────────────────────────

    /// Replace any running effect.
    pub fn start_effect(&mut self, effect: EffectInstance) {
        self.effect = Some(effect);
    }

    pub fn stop_effect(&mut self) -> Option<EffectInstance> {
        self.effect.take()
    }

    /// Run the effect generator if it is due. Returns whether the buffer changed.
    pub fn tick_effect(&mut self, now_ms: u64) -> bool {
        match self.effect.as_mut() {
            Some(effect) => effect.tick_if_due(&mut self.buffer, &self.geometry, now_ms),
            None => false,
        }
    }

    pub fn set_post_effect(&mut self, post: PostEffect) {
        self.post_effect = Some(post);
    }

    pub fn clear_post_effect(&mut self) -> Option<PostEffect> {
        self.post_effect.take()
    }

    // ── Drawing primitives ───────────────────────────────────────────

    pub fn clear(&mut self) {
        self.buffer.fill(Rgb::BLACK);
    }

    pub fn fill(&mut self, color: Rgb) {
        self.buffer.fill(color);
    }

    /// Fill `count` pixels from `start`, clipped at the end of the buffer.
    pub fn fill_range(&mut self, start: usize, count: usize, color: Rgb) -> Result<()> {
        if start >= self.buffer.len() {
            return Err(LedError::invalid_arg(format!(
                "start {start} outside {} LEDs",
                self.buffer.len()
            )));
        }
        let end = start.saturating_add(count).min(self.buffer.len());
        self.buffer[start..end].fill(color);
        Ok(())
    }

    pub fn set_pixel(&mut self, index: usize, color: Rgb) -> Result<()> {
        let len = self.buffer.len();
        let px = self
            .buffer
            .get_mut(index)
            .ok_or_else(|| LedError::invalid_arg(format!("index {index} outside {len} LEDs")))?;
        *px = color;
        Ok(())
    }

    pub fn get_pixel(&self, index: usize) -> Option<Rgb> {
        self.buffer.get(index).copied()
    }

    pub fn set_pixel_xy(&mut self, x: i32, y: i32, color: Rgb) -> Result<()> {
        let index = self.geometry.xy_to_index(x, y)?;
        self.buffer[index] = color;
        Ok(())
    }

    pub fn get_pixel_xy(&self, x: i32, y: i32) -> Option<Rgb> {
        let index = self.geometry.xy_to_index(x, y).ok()?;
        self.buffer.get(index).copied()
    }

    /// Clipped plot used by the shape primitives.
    fn plot(&mut self, x: i32, y: i32, color: Rgb) {
        if let Ok(index) = self.geometry.xy_to_index(x, y) {
            self.buffer[index] = color;
        }
    }

    pub fn fill_rect(&mut self, x: i32, y: i32, w: i32, h: i32, color: Rgb) {
        for yy in y.max(0)..y.saturating_add(h).min(self.geometry.height as i32) {
            for xx in x.max(0)..x.saturating_add(w).min(self.geometry.width as i32) {
                self.plot(xx, yy, color);
            }
        }
    }

    /// Bresenham line, both endpoints inclusive.
    pub fn draw_line(&mut self, x0: i32, y0: i32, x1: i32, y1: i32, color: Rgb) {
        let dx = (x1 - x0).abs();
        let dy = -(y1 - y0).abs();
        let sx = if x0 < x1 { 1 } else { -1 };
        let sy = if y0 < y1 { 1 } else { -1 };
        let mut err = dx + dy;
        let (mut x, mut y) = (x0, y0);

        loop {
            self.plot(x, y, color);
            if x == x1 && y == y1 {
                break;
            }
            let e2 = 2 * err;
            if e2 >= dy {
                err += dy;
                x += sx;
            }
            if e2 <= dx {
                err += dx;
                y += sy;
            }
        }
    }

    /// Midpoint circle outline.
    pub fn draw_circle(&mut self, cx: i32, cy: i32, r: i32, color: Rgb) {
        if r < 0 {
            return;
        }
        let mut x = r;
        let mut y = 0;
        let mut err = 1 - r;
        while x >= y {
            for (px, py) in [
                (x, y),
                (y, x),
                (-y, x),
                (-x, y),
                (-x, -y),
                (-y, -x),
                (y, -x),
                (x, -y),
            ] {
                self.plot(cx + px, cy + py, color);
            }
            y += 1;
            if err < 0 {
                err += 2 * y + 1;
            } else {
                x -= 1;
                err += 2 * (y - x) + 1;
            }
        }
    }

    /// Linear RGB gradient from `c1` at `start` to `c2` at `start + count - 1`.
    pub fn gradient(&mut self, start: usize, count: usize, c1: Rgb, c2: Rgb) -> Result<()> {
        if count == 0 {
            return Err(LedError::invalid_arg("gradient needs at least one pixel"));
        }
        if start >= self.buffer.len() {
            return Err(LedError::invalid_arg(format!(
                "start {start} outside {} LEDs",
                self.buffer.len()
            )));
        }
        let end = start.saturating_add(count).min(self.buffer.len());
        for (i, px) in self.buffer[start..end].iter_mut().enumerate() {
            let t = if count == 1 { 0 } else { i * 255 / (count - 1) };
            *px = blend(c1, c2, t as u8);
        }
        Ok(())
    }
}

// ── Composition ──────────────────────────────────────────────────────

fn combine(below: Rgb, above: Rgb, config: LayerConfig) -> Rgb {
    let op = config.opacity;
    match config.blend {
        BlendMode::Normal => blend(below, above, op),
        BlendMode::Add => {
            let a = above.scale(op);
            Rgb::new(
                below.r.saturating_add(a.r),
                below.g.saturating_add(a.g),
                below.b.saturating_add(a.b),
            )
        }
        BlendMode::Multiply => {
            let m = |x: u8, y: u8| ((x as u16 * y as u16) / 255) as u8;
            let product = Rgb::new(m(below.r, above.r), m(below.g, above.g), m(below.b, above.b));
            blend(below, product, op)
        }
        BlendMode::Screen => {
            let s = |x: u8, y: u8| 255 - (((255 - x) as u16 * (255 - y) as u16) / 255) as u8;
            let screened = Rgb::new(s(below.r, above.r), s(below.g, above.g), s(below.b, above.b));
            blend(below, screened, op)
        }
    }
}

/// Zero `framebuffer` and stack every visible layer onto it in order.
///
/// Black layer pixels are skipped so an empty overlay never erases what is
/// below; with the default normal/255 settings a non-black pixel overwrites.
/// A layer's post-effect runs on the framebuffer right after that layer.
pub fn compose(framebuffer: &mut [Rgb], layers: &mut [Layer], now_ms: u64) {
    framebuffer.fill(Rgb::BLACK);
    for layer in layers.iter_mut().filter(|l| l.config.visible) {
        let plain = layer.config.blend == BlendMode::Normal && layer.config.opacity == 255;
        for (dst, &src) in framebuffer.iter_mut().zip(&layer.buffer) {
            if src.is_black() {
                continue;
            }
            *dst = if plain { src } else { combine(*dst, src, layer.config) };
        }
        if let Some(post) = layer.post_effect.as_mut() {
            post.apply(framebuffer, &layer.geometry, now_ms);
        }
    }
}
