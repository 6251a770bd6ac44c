//! Media discovery and image decoding.
//!
//! Images are decoded once into plain RGB frames (plus an optional alpha
//! plane) so the overlay code never touches the decoder again. Animated GIFs
//! yield one composited frame per GIF frame.
//!
//! ## Rust concepts
//! - `fs::read_dir()` for directory traversal
//! - The `image` crate's `AnimationDecoder` trait for multi-frame formats
//! - `serde::Serialize` for automatic JSON conversion

use crate::color::Rgb;
use crate::error::{LedError, Result};
use image::codecs::gif::GifDecoder;
use image::{AnimationDecoder, ImageFormat, RgbaImage};
use serde::Serialize;
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Frame delay used when a GIF frame carries none.
pub const DEFAULT_FRAME_DELAY_MS: u32 = 100;

// ── Decoded images ───────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    /// Row-major, `width * height` entries.
    pub pixels: Vec<Rgb>,
    /// Per-pixel alpha, present only when some pixel is not fully opaque.
    pub alpha: Option<Vec<u8>>,
    pub delay_ms: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Image {
    pub width: u32,
    pub height: u32,
    pub frames: Vec<Frame>,
}

impl Image {
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn is_animated(&self) -> bool {
        self.frames.len() > 1
    }
}

fn frame_from_rgba(buf: &RgbaImage, delay_ms: u32) -> Frame {
    let mut pixels = Vec::with_capacity((buf.width() * buf.height()) as usize);
    let mut alpha = Vec::with_capacity(pixels.capacity());
    for p in buf.pixels() {
        pixels.push(Rgb::new(p[0], p[1], p[2]));
        alpha.push(p[3]);
    }
    let translucent = alpha.iter().any(|&a| a < 255);
    Frame {
        pixels,
        alpha: translucent.then_some(alpha),
        delay_ms,
    }
}

/// Decode an in-memory PNG, JPEG, BMP or GIF.
pub fn decode_image(bytes: &[u8]) -> Result<Image> {
    let format = image::guess_format(bytes)?;
    if format == ImageFormat::Gif {
        let decoder = GifDecoder::new(Cursor::new(bytes))?;
        let frames = decoder.into_frames().collect_frames()?;
        let first = frames
            .first()
            .ok_or_else(|| LedError::invalid_arg("GIF has no frames"))?;
        let (width, height) = first.buffer().dimensions();
        let frames = frames
            .iter()
            .map(|f| {
                let (num, den) = f.delay().numer_denom_ms();
                let ms = if den == 0 { 0 } else { num / den };
                let delay = if ms == 0 { DEFAULT_FRAME_DELAY_MS } else { ms };
                frame_from_rgba(f.buffer(), delay)
            })
            .collect();
        return Ok(Image { width, height, frames });
    }

    let decoded = image::load_from_memory_with_format(bytes, format)?;
    let rgba = decoded.to_rgba8();
    Ok(Image {
        width: rgba.width(),
        height: rgba.height(),
        frames: vec![frame_from_rgba(&rgba, 0)],
    })
}

/// Read and decode an image file. Missing files are `NotFound`.
pub fn load_image(path: &Path) -> Result<Image> {
    let bytes = fs::read(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => LedError::not_found(format!("image {}", path.display())),
        _ => e.into(),
    })?;
    let image = decode_image(&bytes)?;
    debug!(
        "Decoded {}: {}x{}, {} frame(s)",
        path.display(),
        image.width,
        image.height,
        image.frame_count()
    );
    Ok(image)
}

/// Resolve a request path against the media directory.
///
/// The result must stay inside `media_dir` once `..` components and
/// symlinks are resolved. An absolute path is accepted only when it points
/// into `media_dir`.
pub fn resolve_media_path(media_dir: &Path, requested: &str) -> Result<PathBuf> {
    let canonical = media_dir
        .join(requested)
        .canonicalize()
        .map_err(|_| LedError::not_found(format!("path not found: {requested}")))?;
    let canonical_media = media_dir
        .canonicalize()
        .map_err(|_| LedError::not_found(format!("media directory {}", media_dir.display())))?;
    if !canonical.starts_with(&canonical_media) {
        return Err(LedError::invalid_arg("path is outside the media directory"));
    }
    Ok(canonical)
}

// ── Discovery ────────────────────────────────────────────────────────

/// Information about a single media file.
#[derive(Serialize, utoipa::ToSchema)]
pub struct MediaEntry {
    /// Filename (e.g., "sunset.png")
    pub name: String,
    /// Relative path from media dir (e.g., "images/sunset.png")
    pub path: String,
    /// File size in bytes
    pub size: u64,
}

/// Scan the images directory for decodable files.
pub fn list_images(media_dir: &Path) -> Vec<MediaEntry> {
    let images_dir = media_dir.join("images");
    let mut entries = Vec::new();

    let read_dir = match fs::read_dir(&images_dir) {
        Ok(rd) => rd,
        Err(_) => return entries,
    };

    for entry in read_dir.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        let is_image = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| matches!(e.to_ascii_lowercase().as_str(), "png" | "jpg" | "jpeg" | "gif" | "bmp"));

        if is_image {
            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            let name = path
                .file_name()
                .unwrap_or_default()
                .to_string_lossy()
                .into_owned();
            let rel_path = format!("images/{name}");

            entries.push(MediaEntry {
                name,
                path: rel_path,
                size,
            });
        }
    }

    entries.sort_by(|a, b| a.name.cmp(&b.name));
    entries
}

/// Font names (without `.fnt`) available in `fonts_dir`.
pub fn list_fonts(fonts_dir: &Path) -> Vec<String> {
    let mut fonts = Vec::new();

    let read_dir = match fs::read_dir(fonts_dir) {
        Ok(rd) => rd,
        Err(_) => return fonts,
    };

    for entry in read_dir.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let is_fnt = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e == "fnt");
        if is_fnt {
            if let Some(name) = path.file_stem().and_then(|s| s.to_str()) {
                fonts.push(name.to_string());
            }
        }
    }

    fonts.sort();
    fonts
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::codecs::gif::GifEncoder;
    use image::{Delay, Rgba};
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use tempfile::TempDir;

    fn create_file(dir: &Path, name: &str) {
        std::fs::write(dir.join(name), b"fake").unwrap();
    }

    fn png_bytes(img: &RgbaImage) -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[test]
    fn list_images_finds_supported_formats() {
        let tmp = TempDir::new().unwrap();
        let images_dir = tmp.path().join("images");
        std::fs::create_dir(&images_dir).unwrap();

        create_file(&images_dir, "photo.png");
        create_file(&images_dir, "pic.jpg");
        create_file(&images_dir, "anim.gif");
        create_file(&images_dir, "raw.BMP");
        create_file(&images_dir, "readme.txt");

        let entries = list_images(tmp.path());
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["anim.gif", "photo.png", "pic.jpg", "raw.BMP"]);
        assert_eq!(entries[1].path, "images/photo.png");
    }

    #[test]
    fn list_images_returns_empty_when_no_dir() {
        let tmp = TempDir::new().unwrap();
        assert!(list_images(tmp.path()).is_empty());
    }

    #[test]
    fn list_fonts_finds_fnt_files() {
        let tmp = TempDir::new().unwrap();
        create_file(tmp.path(), "cjk.fnt");
        create_file(tmp.path(), "ascii8.fnt");
        create_file(tmp.path(), "6x13.bdf");

        assert_eq!(list_fonts(tmp.path()), vec!["ascii8", "cjk"]);
    }

    #[test]
    fn opaque_png_has_no_alpha_plane() {
        let img = RgbaImage::from_pixel(3, 2, Rgba([10, 20, 30, 255]));
        let decoded = decode_image(&png_bytes(&img)).unwrap();
        assert_eq!((decoded.width, decoded.height), (3, 2));
        assert_eq!(decoded.frame_count(), 1);
        assert_eq!(decoded.frames[0].pixels[5], Rgb::new(10, 20, 30));
        assert!(decoded.frames[0].alpha.is_none());
    }

    #[test]
    fn transparent_png_keeps_alpha() {
        let mut img = RgbaImage::from_pixel(2, 2, Rgba([255, 0, 0, 255]));
        img.put_pixel(1, 1, Rgba([0, 0, 0, 0]));
        let decoded = decode_image(&png_bytes(&img)).unwrap();
        assert_eq!(decoded.frames[0].alpha.as_deref(), Some(&[255, 255, 255, 0][..]));
    }

    #[test]
    fn gif_frames_and_delays() {
        let mut bytes = Vec::new();
        {
            let mut encoder = GifEncoder::new(&mut bytes);
            let frames = [Rgba([255, 0, 0, 255]), Rgba([0, 0, 255, 255])].map(|c| {
                image::Frame::from_parts(
                    RgbaImage::from_pixel(4, 4, c),
                    0,
                    0,
                    Delay::from_numer_denom_ms(80, 1),
                )
            });
            encoder.encode_frames(frames).unwrap();
        }
        let decoded = decode_image(&bytes).unwrap();
        assert!(decoded.is_animated());
        assert_eq!(decoded.frames[0].delay_ms, 80);
        assert_eq!(decoded.frames[1].pixels[0], Rgb::new(0, 0, 255));
    }

    #[test]
    fn load_image_missing_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let err = load_image(&tmp.path().join("none.png")).unwrap_err();
        assert!(matches!(err, LedError::NotFound(_)));
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(decode_image(b"definitely not an image").is_err());
    }

    #[test]
    fn media_paths_stay_inside_root() {
        let tmp = TempDir::new().unwrap();
        let images = tmp.path().join("images");
        std::fs::create_dir(&images).unwrap();
        create_file(&images, "a.png");

        let ok = resolve_media_path(tmp.path(), "images/a.png").unwrap();
        assert!(ok.ends_with("images/a.png"));
        assert!(matches!(
            resolve_media_path(&images, "../images/a.png"),
            Ok(_)
        ));
        assert!(matches!(
            resolve_media_path(&images, "../../etc/passwd"),
            Err(LedError::NotFound(_)) | Err(LedError::InvalidArg(_))
        ));
        assert!(matches!(
            resolve_media_path(tmp.path(), "images/missing.png"),
            Err(LedError::NotFound(_))
        ));
    }

    #[rstest]
    #[case("/etc/passwd")]
    #[case("../x")]
    #[case("images/../../x")]
    fn paths_leaving_media_dir_are_rejected(#[case] requested: &str) {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("media");
        std::fs::create_dir_all(root.join("images")).unwrap();
        std::fs::write(tmp.path().join("x"), b"outside").unwrap();
        assert!(matches!(
            resolve_media_path(&root, requested),
            Err(LedError::InvalidArg(_))
        ));
    }

    #[test]
    fn absolute_path_inside_media_dir_is_accepted() {
        let tmp = TempDir::new().unwrap();
        let images = tmp.path().join("images");
        std::fs::create_dir(&images).unwrap();
        create_file(&images, "a.png");
        let absolute = images.join("a.png").canonicalize().unwrap();
        let resolved = resolve_media_path(tmp.path(), &absolute.to_string_lossy()).unwrap();
        assert_eq!(resolved, absolute);
    }
}
