//! Drawing decoded images onto a matrix layer.
//!
//! Shrinking uses area averaging and enlarging uses bilinear sampling.
//! Pixels whose alpha is below half are left untouched. Multi-frame images
//! are driven by an [`ImagePlayer`] thread that redraws layer 0 at the
//! image's own frame interval until its generation is superseded.

use crate::color::Rgb;
use crate::device::Device;
use crate::error::{LedError, Result};
use crate::geometry::Layout;
use crate::layer::Layer;
use crate::media::{Frame, Image};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info};

/// Alpha at or above this counts as opaque.
const ALPHA_OPAQUE: u8 = 128;
/// Frame delays below this are treated as unset.
const MIN_FRAME_DELAY_MS: u32 = 50;
const FALLBACK_FRAME_DELAY_MS: u32 = 100;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Scale {
    /// Native size, centered.
    None,
    /// Keep aspect ratio, fit inside, centered.
    #[default]
    Fit,
    /// Keep aspect ratio, cover the surface, crop the overflow evenly.
    Fill,
    Stretch,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Center {
    /// Center the whole image rectangle.
    Image,
    /// Center the tight box around opaque pixels.
    #[default]
    Content,
}

fn default_brightness() -> u8 {
    255
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct ImageOptions {
    #[serde(default)]
    pub x: i32,
    #[serde(default)]
    pub y: i32,
    #[serde(default)]
    pub scale: Scale,
    #[serde(default)]
    pub center: Center,
    #[serde(default = "default_brightness")]
    pub brightness: u8,
}

impl Default for ImageOptions {
    fn default() -> Self {
        Self {
            x: 0,
            y: 0,
            scale: Scale::Fit,
            center: Center::Content,
            brightness: 255,
        }
    }
}

// ── Sampling ─────────────────────────────────────────────────────────

/// Source rectangle `(x0, y0, w, h)` covering every opaque pixel, or the
/// whole image when the frame is opaque or fully transparent.
fn content_bounds(image: &Image, frame: &Frame) -> (u32, u32, u32, u32) {
    let full = (0, 0, image.width, image.height);
    let Some(alpha) = frame.alpha.as_deref() else {
        return full;
    };
    let mut bounds: Option<(u32, u32, u32, u32)> = None;
    for y in 0..image.height {
        for x in 0..image.width {
            if alpha[(y * image.width + x) as usize] < ALPHA_OPAQUE {
                continue;
            }
            let b = bounds.get_or_insert((x, y, x + 1, y + 1));
            b.0 = b.0.min(x);
            b.1 = b.1.min(y);
            b.2 = b.2.max(x + 1);
            b.3 = b.3.max(y + 1);
        }
    }
    match bounds {
        Some((x0, y0, x1, y1)) => (x0, y0, x1 - x0, y1 - y0),
        None => full,
    }
}

/// Source cells `[x0, x0 + 1/sx) × [y0, y0 + 1/sy)` clipped to the image.
fn area_cells(w: u32, h: u32, src_x: f32, src_y: f32, sx: f32, sy: f32) -> impl Iterator<Item = usize> {
    let x0 = src_x.max(0.0) as u32;
    let y0 = src_y.max(0.0) as u32;
    let x1 = ((src_x + 1.0 / sx).min(w as f32) as u32).min(w);
    let y1 = ((src_y + 1.0 / sy).min(h as f32) as u32).min(h);
    (y0..y1).flat_map(move |y| (x0..x1).map(move |x| (y * w + x) as usize))
}

fn sample_area(image: &Image, frame: &Frame, src_x: f32, src_y: f32, sx: f32, sy: f32) -> Rgb {
    let (mut r, mut g, mut b, mut n) = (0u32, 0u32, 0u32, 0u32);
    for i in area_cells(image.width, image.height, src_x, src_y, sx, sy) {
        let p = frame.pixels[i];
        r += p.r as u32;
        g += p.g as u32;
        b += p.b as u32;
        n += 1;
    }
    if n == 0 {
        return Rgb::BLACK;
    }
    Rgb::new((r / n) as u8, (g / n) as u8, (b / n) as u8)
}

fn sample_bilinear(image: &Image, frame: &Frame, src_x: f32, src_y: f32) -> Rgb {
    let (w, h) = (image.width as i32, image.height as i32);
    let sx = src_x.clamp(0.0, ((w - 1) as f32 - 0.001).max(0.0));
    let sy = src_y.clamp(0.0, ((h - 1) as f32 - 0.001).max(0.0));
    let (x0, y0) = (sx as i32, sy as i32);
    let x1 = (x0 + 1).min(w - 1);
    let y1 = (y0 + 1).min(h - 1);
    let (fx, fy) = (sx - x0 as f32, sy - y0 as f32);
    let at = |x: i32, y: i32| frame.pixels[(y * w + x) as usize];
    let (p00, p10, p01, p11) = (at(x0, y0), at(x1, y0), at(x0, y1), at(x1, y1));
    let mix = |a: u8, b: u8, c: u8, d: u8| {
        ((1.0 - fx) * (1.0 - fy) * a as f32
            + fx * (1.0 - fy) * b as f32
            + (1.0 - fx) * fy * c as f32
            + fx * fy * d as f32)
            .round() as u8
    };
    Rgb::new(
        mix(p00.r, p10.r, p01.r, p11.r),
        mix(p00.g, p10.g, p01.g, p11.g),
        mix(p00.b, p10.b, p01.b, p11.b),
    )
}

fn sample_alpha(image: &Image, alpha: &[u8], src_x: f32, src_y: f32, sx: f32, sy: f32, area: bool) -> u8 {
    if area {
        let (mut sum, mut n) = (0u32, 0u32);
        for i in area_cells(image.width, image.height, src_x, src_y, sx, sy) {
            sum += alpha[i] as u32;
            n += 1;
        }
        return if n == 0 { 0 } else { (sum / n) as u8 };
    }
    let ix = ((src_x + 0.5) as u32).min(image.width - 1);
    let iy = ((src_y + 0.5) as u32).min(image.height - 1);
    alpha[(iy * image.width + ix) as usize]
}

/// Draw frame `index` of `image` onto `layer`.
///
/// Images carrying alpha clear the layer first so transparent regions show
/// as black.
pub fn draw_frame(layer: &mut Layer, image: &Image, index: usize, opts: &ImageOptions) -> Result<()> {
    let frame = image
        .frames
        .get(index)
        .ok_or_else(|| LedError::invalid_arg(format!("frame {index} of {}", image.frame_count())))?;
    if image.width == 0 || image.height == 0 {
        return Err(LedError::invalid_arg("empty image"));
    }
    let geometry = *layer.geometry();
    let (dev_w, dev_h) = (geometry.width as i32, geometry.height as i32);

    if frame.alpha.is_some() {
        layer.clear();
    }

    let (src_x0, src_y0, src_w, src_h) = match opts.center {
        Center::Content => content_bounds(image, frame),
        Center::Image => (0, 0, image.width, image.height),
    };
    let (sw, sh) = (src_w as f32, src_h as f32);

    let (dst_w, dst_h, scale_x, scale_y, off_x, off_y) = match opts.scale {
        Scale::None => {
            let (w, h) = (src_w as i32, src_h as i32);
            (w, h, 1.0, 1.0, opts.x + (dev_w - w) / 2, opts.y + (dev_h - h) / 2)
        }
        Scale::Fit => {
            let ratio = (dev_w as f32 / sw).min(dev_h as f32 / sh);
            let (w, h) = ((sw * ratio) as i32, (sh * ratio) as i32);
            (w, h, ratio, ratio, opts.x + (dev_w - w) / 2, opts.y + (dev_h - h) / 2)
        }
        Scale::Fill => {
            let ratio = (dev_w as f32 / sw).max(dev_h as f32 / sh);
            (dev_w, dev_h, ratio, ratio, opts.x, opts.y)
        }
        Scale::Stretch => (dev_w, dev_h, dev_w as f32 / sw, dev_h as f32 / sh, opts.x, opts.y),
    };

    let area = scale_x < 1.0 || scale_y < 1.0;
    let (crop_x, crop_y) = match opts.scale {
        Scale::Fill => ((sw * scale_x - dev_w as f32) / 2.0, (sh * scale_y - dev_h as f32) / 2.0),
        _ => (0.0, 0.0),
    };

    for dy in 0..dst_h {
        let py = dy + off_y;
        if py >= dev_h {
            break;
        }
        for dx in 0..dst_w {
            let px = dx + off_x;
            if px >= dev_w {
                break;
            }
            if px < 0 || py < 0 {
                continue;
            }
            let src_x = src_x0 as f32 + (dx as f32 + crop_x) / scale_x;
            let src_y = src_y0 as f32 + (dy as f32 + crop_y) / scale_y;
            if src_x < 0.0 || src_y < 0.0 || src_x >= image.width as f32 || src_y >= image.height as f32 {
                continue;
            }
            if let Some(alpha) = frame.alpha.as_deref() {
                if sample_alpha(image, alpha, src_x, src_y, scale_x, scale_y, area) < ALPHA_OPAQUE {
                    continue;
                }
            }
            let mut c = if area {
                sample_area(image, frame, src_x, src_y, scale_x, scale_y)
            } else {
                sample_bilinear(image, frame, src_x, src_y)
            };
            if opts.brightness < 255 {
                c = c.scale(opts.brightness);
            }
            let _ = layer.set_pixel_xy(px, py, c);
        }
    }
    Ok(())
}

// ── Animated playback ────────────────────────────────────────────────

/// Native delay, or the fallback when the image asks for less than 50 ms.
pub fn frame_delay(delay_ms: u32) -> Duration {
    let ms = if delay_ms < MIN_FRAME_DELAY_MS {
        FALLBACK_FRAME_DELAY_MS
    } else {
        delay_ms
    };
    Duration::from_millis(ms as u64)
}

/// Background thread advancing an animated image on a device's base layer.
///
/// Holds only an `Arc<Device>`; each wake re-checks the device generation
/// and exits once a newer overlay (or destroy) has bumped it.
#[derive(Debug)]
pub struct ImagePlayer {
    handle: JoinHandle<()>,
}

impl ImagePlayer {
    pub fn spawn(device: Arc<Device>, image: Arc<Image>, opts: ImageOptions, generation: u64) -> Result<Self> {
        let name = format!("image-{}", device.name());
        let handle = thread::Builder::new()
            .name(name)
            .spawn(move || play(&device, &image, &opts, generation))?;
        Ok(Self { handle })
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the thread; call only after its generation was superseded.
    pub fn join(self) {
        let _ = self.handle.join();
    }
}

fn play(device: &Device, image: &Image, opts: &ImageOptions, generation: u64) {
    let mut index = 0;
    loop {
        thread::sleep(frame_delay(image.frames[index].delay_ms));
        if device.image_generation() != generation {
            break;
        }
        index = (index + 1) % image.frame_count();
        let drawn = device.with_state(|state| {
            // re-check under the lock so a stop never races a late frame
            if device.image_generation() != generation {
                return Err(LedError::invalid_state("superseded"));
            }
            draw_frame(state.base(), image, index, opts)
        });
        if drawn.is_err() {
            break;
        }
    }
    debug!("Image player on {} exited", device.name());
}

/// Summary of what [`show`] put on screen.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ShowInfo {
    pub width: u32,
    pub height: u32,
    pub frames: usize,
}

/// Replace the device's base layer content with `image`.
///
/// Stops the layer-0 effect and any running player. Animated images always
/// play fit-scaled and image-centered since their frames are already
/// composited.
pub fn show(device: &Arc<Device>, image: Image, opts: ImageOptions) -> Result<(ShowInfo, Option<ImagePlayer>)> {
    if device.layout() != Layout::Matrix {
        return Err(LedError::Unsupported(format!(
            "images need a matrix, {} is a {}",
            device.name(),
            device.layout().as_str()
        )));
    }
    let info = ShowInfo {
        width: image.width,
        height: image.height,
        frames: image.frame_count(),
    };
    let opts = if image.is_animated() {
        ImageOptions {
            scale: Scale::Fit,
            center: Center::Image,
            ..opts
        }
    } else {
        opts
    };

    let generation = device.stop_image_player();
    device.with_state(|state| {
        let base = state.base();
        base.stop_effect();
        draw_frame(base, &image, 0, &opts)
    })?;

    let player = if image.is_animated() {
        let player = ImagePlayer::spawn(device.clone(), Arc::new(image), opts, generation)?;
        info!("Image player started on {}: {} frames", device.name(), info.frames);
        Some(player)
    } else {
        None
    };
    Ok((info, player))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceConfig, Registry};
    use crate::geometry::{Geometry, Origin, Scan};
    use crate::layer::LayerConfig;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn grid(w: u16, h: u16) -> Layer {
        Layer::new(Geometry::matrix(w, h, Scan::Rows, Origin::TopLeft), LayerConfig::default())
    }

    fn solid(w: u32, h: u32, c: Rgb) -> Image {
        Image {
            width: w,
            height: h,
            frames: vec![Frame {
                pixels: vec![c; (w * h) as usize],
                alpha: None,
                delay_ms: 0,
            }],
        }
    }

    fn lit(layer: &Layer) -> usize {
        layer.pixels().iter().filter(|p| !p.is_black()).count()
    }

    #[test]
    fn fit_enlarges_to_cover_square() {
        let mut l = grid(4, 4);
        draw_frame(&mut l, &solid(2, 2, Rgb::RED), 0, &ImageOptions::default()).unwrap();
        assert_eq!(lit(&l), 16);
        assert_eq!(l.get_pixel_xy(3, 3), Some(Rgb::RED));
    }

    #[test]
    fn fit_letterboxes_wide_images() {
        let mut l = grid(4, 4);
        draw_frame(&mut l, &solid(4, 2, Rgb::BLUE), 0, &ImageOptions::default()).unwrap();
        assert_eq!(lit(&l), 8);
        assert_eq!(l.get_pixel_xy(0, 0), Some(Rgb::BLACK));
        assert_eq!(l.get_pixel_xy(0, 1), Some(Rgb::BLUE));
        assert_eq!(l.get_pixel_xy(3, 2), Some(Rgb::BLUE));
    }

    #[test]
    fn shrinking_averages_blocks() {
        // each 2x2 block: two white, two black
        let mut pixels = Vec::new();
        for y in 0..8 {
            for _ in 0..8 {
                pixels.push(if y % 2 == 0 { Rgb::WHITE } else { Rgb::BLACK });
            }
        }
        let image = Image {
            width: 8,
            height: 8,
            frames: vec![Frame { pixels, alpha: None, delay_ms: 0 }],
        };
        let mut l = grid(4, 4);
        draw_frame(&mut l, &image, 0, &ImageOptions::default()).unwrap();
        assert!(l.pixels().iter().all(|p| *p == Rgb::new(127, 127, 127)));
    }

    #[test]
    fn native_size_is_centered() {
        let mut l = grid(4, 4);
        let opts = ImageOptions { scale: Scale::None, ..Default::default() };
        draw_frame(&mut l, &solid(2, 2, Rgb::GREEN), 0, &opts).unwrap();
        assert_eq!(lit(&l), 4);
        assert_eq!(l.get_pixel_xy(1, 1), Some(Rgb::GREEN));
        assert_eq!(l.get_pixel_xy(0, 0), Some(Rgb::BLACK));
    }

    #[rstest]
    #[case(Scale::Stretch, 16)]
    #[case(Scale::Fill, 16)]
    #[case(Scale::Fit, 8)]
    fn scale_modes_on_wide_source(#[case] scale: Scale, #[case] expected: usize) {
        let mut l = grid(4, 4);
        let opts = ImageOptions { scale, ..Default::default() };
        draw_frame(&mut l, &solid(8, 4, Rgb::WHITE), 0, &opts).unwrap();
        assert_eq!(lit(&l), expected);
    }

    fn corner_dot() -> Image {
        let mut alpha = vec![0u8; 16];
        alpha[15] = 255;
        Image {
            width: 4,
            height: 4,
            frames: vec![Frame {
                pixels: vec![Rgb::RED; 16],
                alpha: Some(alpha),
                delay_ms: 0,
            }],
        }
    }

    #[test]
    fn content_centering_zooms_on_opaque_box() {
        let mut l = grid(4, 4);
        l.fill(Rgb::BLUE);
        draw_frame(&mut l, &corner_dot(), 0, &ImageOptions::default()).unwrap();
        assert_eq!(lit(&l), 16);
        assert!(l.pixels().iter().all(|p| *p == Rgb::RED));
    }

    #[test]
    fn transparent_pixels_are_skipped_after_clear() {
        let mut l = grid(4, 4);
        l.fill(Rgb::BLUE);
        let opts = ImageOptions { center: Center::Image, ..Default::default() };
        draw_frame(&mut l, &corner_dot(), 0, &opts).unwrap();
        assert_eq!(lit(&l), 1);
        assert_eq!(l.get_pixel_xy(3, 3), Some(Rgb::RED));
    }

    #[test]
    fn brightness_scales_pixels() {
        let mut l = grid(2, 2);
        let opts = ImageOptions { brightness: 128, ..Default::default() };
        draw_frame(&mut l, &solid(2, 2, Rgb::WHITE), 0, &opts).unwrap();
        assert_eq!(l.get_pixel_xy(0, 0), Some(Rgb::WHITE.scale(128)));
    }

    #[rstest]
    #[case(0, 100)]
    #[case(20, 100)]
    #[case(50, 50)]
    #[case(120, 120)]
    fn frame_delays(#[case] native: u32, #[case] expected: u64) {
        assert_eq!(frame_delay(native), Duration::from_millis(expected));
    }

    #[test]
    fn show_rejects_non_matrix() {
        let reg = Registry::new();
        let dev = reg.create(DeviceConfig::strip("s", 8, 50)).unwrap();
        let err = show(&dev, solid(2, 2, Rgb::RED), ImageOptions::default()).unwrap_err();
        assert!(matches!(err, LedError::Unsupported(_)));
    }

    #[test]
    fn player_exits_when_superseded() {
        let reg = Registry::new();
        let dev = reg
            .create(DeviceConfig::matrix("m", 4, 4, Scan::Rows, Origin::TopLeft, 50))
            .unwrap();
        let mut image = solid(4, 4, Rgb::RED);
        image.frames.push(Frame {
            pixels: vec![Rgb::BLUE; 16],
            alpha: None,
            delay_ms: 50,
        });
        image.frames[0].delay_ms = 50;

        let (info, player) = show(&dev, image, ImageOptions::default()).unwrap();
        assert_eq!(info.frames, 2);
        let player = player.unwrap();
        thread::sleep(Duration::from_millis(80));
        dev.stop_image_player();
        player.join();
        let frozen = dev.lock().unwrap().layers()[0].pixels().to_vec();
        thread::sleep(Duration::from_millis(120));
        assert_eq!(dev.lock().unwrap().layers()[0].pixels(), &frozen[..]);
    }
}
