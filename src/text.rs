//! Text rendering on matrix layers.
//!
//! Static text is drawn once with [`draw_text`]. A [`TextOverlay`] is owned by
//! the device and redrawn onto layer 1 every frame, so it can scroll over a
//! running effect on layer 0 without touching it.

use crate::animation::speed_to_interval;
use crate::color::Rgb;
use crate::font::{Font, Glyph};
use crate::geometry::Geometry;
use crate::layer::Layer;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Gap between glyphs, in pixels.
pub const SPACING: i32 = 1;

/// Base pixels with `r + g + b` below this count as dark.
const DARK_THRESHOLD: u16 = 30;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Align {
    #[default]
    Left,
    Center,
    Right,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Scroll {
    #[default]
    None,
    Left,
    Right,
    Up,
    Down,
}

/// Rendered width and height of `text` in pixels.
pub fn measure(text: &str, font: &Font, spacing: i32) -> (i32, i32) {
    let mut width = 0;
    let mut count = 0;
    for ch in text.chars() {
        width += font.advance(ch) as i32 + spacing;
        count += 1;
    }
    if count > 0 {
        width -= spacing;
    }
    (width, font.height() as i32)
}

fn aligned_x(align: Align, x: i32, text_width: i32, screen_width: i32) -> i32 {
    match align {
        Align::Left => x,
        Align::Center => (screen_width - text_width) / 2,
        Align::Right => screen_width - text_width,
    }
}

/// Walk the glyphs of `text` starting at `x`, calling `draw` for each one
/// that is at least partly on screen.
fn layout(text: &str, font: &Font, mut x: i32, screen_width: i32, mut draw: impl FnMut(Glyph<'_>, i32)) {
    for ch in text.chars() {
        if x >= screen_width {
            break;
        }
        let advance = font.advance(ch) as i32;
        if x + advance >= 0 {
            if let Some(glyph) = font.glyph(ch) {
                draw(glyph, x);
            }
        }
        x += advance + SPACING;
    }
}

fn for_each_lit(glyph: Glyph<'_>, x: i32, y: i32, mut plot: impl FnMut(i32, i32)) {
    for gy in 0..glyph.height {
        for gx in 0..glyph.width {
            if glyph.is_set(gx, gy) {
                plot(x + gx as i32, y + gy as i32);
            }
        }
    }
}

/// Draw `text` once onto `layer`, clipped to the surface.
pub fn draw_text(layer: &mut Layer, text: &str, font: &Font, x: i32, y: i32, color: Rgb, align: Align) {
    let screen_width = layer.geometry().width as i32;
    let (text_width, _) = measure(text, font, SPACING);
    let start = aligned_x(align, x, text_width, screen_width);
    layout(text, font, start, screen_width, |glyph, gx| {
        for_each_lit(glyph, gx, y, |px, py| {
            let _ = layer.set_pixel_xy(px, py, color);
        });
    });
}

// ── Overlay ──────────────────────────────────────────────────────────

fn default_scroll_speed() -> u32 {
    30
}

/// How a text overlay is placed and animated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct TextOptions {
    pub color: Rgb,
    #[serde(default)]
    pub align: Align,
    #[serde(default)]
    pub scroll: Scroll,
    /// 1-100, one pixel per `speed_to_interval(scroll_speed)` ms.
    #[serde(default = "default_scroll_speed")]
    pub scroll_speed: u32,
    #[serde(default)]
    pub x: i32,
    #[serde(default)]
    pub y: i32,
    #[serde(default)]
    pub invert_on_overlap: bool,
    #[serde(default)]
    pub loop_scroll: bool,
}

impl Default for TextOptions {
    fn default() -> Self {
        Self {
            color: Rgb::WHITE,
            align: Align::Left,
            scroll: Scroll::None,
            scroll_speed: default_scroll_speed(),
            x: 0,
            y: 0,
            invert_on_overlap: false,
            loop_scroll: false,
        }
    }
}

pub struct TextOverlay {
    text: String,
    font: Arc<Font>,
    options: TextOptions,
    text_width: i32,
    text_height: i32,
    scroll_x: i32,
    scroll_y: i32,
    last_step_ms: u64,
}

impl std::fmt::Debug for TextOverlay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextOverlay")
            .field("text", &self.text)
            .field("font", &self.font.name())
            .field("scroll_x", &self.scroll_x)
            .field("scroll_y", &self.scroll_y)
            .finish()
    }
}

impl TextOverlay {
    pub fn new(text: &str, font: Arc<Font>, options: TextOptions, geometry: &Geometry, now_ms: u64) -> Self {
        let (text_width, text_height) = measure(text, &font, SPACING);
        let scroll_x = match options.scroll {
            Scroll::Left => geometry.width as i32,
            _ => 0,
        };
        Self {
            text: text.to_string(),
            font,
            options,
            text_width,
            text_height,
            scroll_x,
            scroll_y: 0,
            last_step_ms: now_ms,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn options(&self) -> &TextOptions {
        &self.options
    }

    pub fn width(&self) -> i32 {
        self.text_width
    }

    pub fn offset(&self) -> (i32, i32) {
        (self.scroll_x, self.scroll_y)
    }

    /// Advance the scroll position by one pixel if a step is due.
    pub fn tick(&mut self, geometry: &Geometry, now_ms: u64) {
        if self.options.scroll == Scroll::None {
            return;
        }
        let step = speed_to_interval(self.options.scroll_speed) as u64;
        if now_ms.saturating_sub(self.last_step_ms) < step {
            return;
        }
        self.last_step_ms = now_ms;

        let (w, h) = (geometry.width as i32, geometry.height as i32);
        let looping = self.options.loop_scroll;
        let (tw, th) = (self.text_width, self.text_height);
        match self.options.scroll {
            Scroll::None => {}
            Scroll::Left => {
                self.scroll_x -= 1;
                if self.scroll_x + tw < 0 {
                    self.scroll_x = if looping { w } else { -tw };
                }
            }
            Scroll::Right => {
                self.scroll_x += 1;
                if self.scroll_x > w {
                    self.scroll_x = if looping { -tw } else { w };
                }
            }
            Scroll::Up => {
                self.scroll_y -= 1;
                if self.scroll_y + th < 0 {
                    self.scroll_y = if looping { h } else { -th };
                }
            }
            Scroll::Down => {
                self.scroll_y += 1;
                if self.scroll_y > h {
                    self.scroll_y = if looping { -th } else { h };
                }
            }
        }
    }

    /// Redraw onto `overlay`. With invert-on-overlap, lit glyph pixels over a
    /// bright `base` pixel take the inverse of that pixel instead.
    pub fn render(&self, overlay: &mut Layer, base: Option<&Layer>) {
        overlay.clear();
        let screen_width = overlay.geometry().width as i32;
        let x = match self.options.scroll {
            Scroll::None => aligned_x(self.options.align, self.options.x, self.text_width, screen_width),
            _ => self.options.x,
        } + self.scroll_x;
        let y = self.options.y + self.scroll_y;
        let color = self.options.color;
        let invert = self.options.invert_on_overlap;

        layout(&self.text, &self.font, x, screen_width, |glyph, gx| {
            for_each_lit(glyph, gx, y, |px, py| {
                let c = match base.and_then(|b| b.get_pixel_xy(px, py)) {
                    Some(under) if invert && under.sum() >= DARK_THRESHOLD => under.invert(),
                    _ => color,
                };
                let _ = overlay.set_pixel_xy(px, py, c);
            });
        });
    }
}
