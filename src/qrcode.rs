//! QR code overlay for matrix devices.
//!
//! Text is encoded in byte mode with `qrcodegen`, picking the smallest
//! version in the requested range, then rasterized onto layer 0 at the
//! largest integer module size that fits.

use crate::color::Rgb;
use crate::device::Device;
use crate::error::{LedError, Result};
use crate::geometry::Layout;
use crate::image_overlay::{self, ImageOptions};
use crate::layer::Layer;
use crate::media::Image;
use qrcodegen::{QrCode, QrCodeEcc, QrSegment, Version};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::info;

/// Largest version this overlay renders (57x57 modules).
pub const MAX_VERSION: u8 = 10;

/// Byte-mode capacity per version, columns L, M, Q, H.
const BYTE_CAPACITY: [[u16; 4]; MAX_VERSION as usize] = [
    [17, 14, 11, 7],
    [32, 26, 20, 14],
    [53, 42, 32, 24],
    [78, 62, 46, 34],
    [106, 84, 60, 44],
    [134, 106, 74, 58],
    [154, 122, 86, 64],
    [192, 152, 108, 84],
    [230, 180, 130, 98],
    [271, 213, 151, 119],
];

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
pub enum Ecc {
    #[serde(rename = "L", alias = "l")]
    Low,
    #[default]
    #[serde(rename = "M", alias = "m")]
    Medium,
    #[serde(rename = "Q", alias = "q")]
    Quartile,
    #[serde(rename = "H", alias = "h")]
    High,
}

impl Ecc {
    fn column(self) -> usize {
        match self {
            Self::Low => 0,
            Self::Medium => 1,
            Self::Quartile => 2,
            Self::High => 3,
        }
    }

    fn to_qrcodegen(self) -> QrCodeEcc {
        match self {
            Self::Low => QrCodeEcc::Low,
            Self::Medium => QrCodeEcc::Medium,
            Self::Quartile => QrCodeEcc::Quartile,
            Self::High => QrCodeEcc::High,
        }
    }
}

impl FromStr for Ecc {
    type Err = LedError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "l" | "low" => Ok(Self::Low),
            "m" | "medium" => Ok(Self::Medium),
            "q" | "quartile" => Ok(Self::Quartile),
            "h" | "high" => Ok(Self::High),
            other => Err(LedError::invalid_arg(format!("unknown ECC level {other:?}"))),
        }
    }
}

/// Byte-mode payload limit for `version` at `ecc`.
pub fn byte_capacity(version: u8, ecc: Ecc) -> Option<u16> {
    let row = BYTE_CAPACITY.get(usize::from(version).checked_sub(1)?)?;
    Some(row[ecc.column()])
}

#[derive(Clone, Debug)]
pub struct QrConfig {
    pub text: String,
    pub ecc: Ecc,
    pub fg: Rgb,
    pub bg: Rgb,
    pub version_min: u8,
    pub version_max: u8,
    pub center: bool,
    /// Drawn first; light modules only paint where it left black.
    pub bg_image: Option<Image>,
}

impl QrConfig {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ecc: Ecc::Medium,
            fg: Rgb::WHITE,
            bg: Rgb::BLACK,
            version_min: 1,
            version_max: 4,
            center: true,
            bg_image: None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, utoipa::ToSchema)]
pub struct QrResult {
    pub version: u8,
    /// Modules per side.
    pub size: u16,
    /// Byte capacity of the chosen version.
    pub data_capacity: u16,
}

/// Encode `config.text`. Fails `InvalidSize` when it exceeds the largest
/// allowed version.
pub fn encode(config: &QrConfig) -> Result<(QrCode, QrResult)> {
    let (min, max) = (config.version_min, config.version_max);
    if min < 1 || max > MAX_VERSION || min > max {
        return Err(LedError::invalid_arg(format!(
            "QR version range {min}..={max} outside 1..={MAX_VERSION}"
        )));
    }
    let segments = [QrSegment::make_bytes(config.text.as_bytes())];
    let qr = QrCode::encode_segments_advanced(
        &segments,
        config.ecc.to_qrcodegen(),
        Version::new(min),
        Version::new(max),
        None,
        false,
    )
    .map_err(|e| {
        LedError::InvalidSize(format!(
            "text too long for QR code ({} bytes, version {max} {:?}): {e}",
            config.text.len(),
            config.ecc
        ))
    })?;
    let version = qr.version().value();
    let result = QrResult {
        version,
        size: qr.size() as u16,
        data_capacity: byte_capacity(version, config.ecc).unwrap_or(0),
    };
    Ok((qr, result))
}

/// Draw `qr` onto `layer`, replacing its content.
pub fn rasterize(layer: &mut Layer, qr: &QrCode, config: &QrConfig) -> Result<()> {
    let geometry = *layer.geometry();
    let (w, h) = (geometry.width as i32, geometry.height as i32);
    let size = qr.size();
    let scale = (w.min(h) / size).max(1);
    let total = size * scale;
    let (off_x, off_y) = if config.center {
        ((w - total) / 2, (h - total) / 2)
    } else {
        (0, 0)
    };

    layer.clear();
    if let Some(bg) = &config.bg_image {
        image_overlay::draw_frame(layer, bg, 0, &ImageOptions::default())?;
    }
    let has_bg_image = config.bg_image.is_some();

    for my in 0..size {
        for mx in 0..size {
            let dark = qr.get_module(mx, my);
            for dy in 0..scale {
                for dx in 0..scale {
                    let (px, py) = (off_x + mx * scale + dx, off_y + my * scale + dy);
                    let color = if dark {
                        config.fg
                    } else {
                        let under = layer.get_pixel_xy(px, py);
                        match under {
                            Some(c) if has_bg_image && !c.is_black() => continue,
                            _ => config.bg,
                        }
                    };
                    let _ = layer.set_pixel_xy(px, py, color);
                }
            }
        }
    }
    Ok(())
}

/// Encode and show a QR code on a matrix device's base layer.
///
/// Encoding happens before the device is touched, so an oversize payload
/// leaves the display as it was.
pub fn show(device: &Device, config: &QrConfig) -> Result<QrResult> {
    if device.layout() != Layout::Matrix {
        return Err(LedError::Unsupported(format!(
            "QR codes need a matrix, {} is a {}",
            device.name(),
            device.layout().as_str()
        )));
    }
    let (qr, result) = encode(config)?;
    device.stop_image_player();
    device.with_state(|state| {
        let base = state.base();
        base.stop_effect();
        rasterize(base, &qr, config)
    })?;
    info!(
        "QR code on {}: version {}, {}x{} modules",
        device.name(),
        result.version,
        result.size,
        result.size
    );
    Ok(result)
}
